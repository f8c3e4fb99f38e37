// clcore REPL
//
// Read-eval-print loop over one runtime. Given a file argument, the file is
// loaded instead and the process exits.

use std::io;
use std::thread;

use clcore::config::RuntimeConfig;
use clcore::context::Runtime;
use clcore::eval::{ControlSignal, Interpreter};
use clcore::symbol::Symbol;
use clcore::types::Value;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

/// Deep recursion in Lisp code recurses in the evaluator.
const MAIN_STACK_SIZE: usize = 64 * 1024 * 1024;
const STACK_RESERVE: usize = 4 * 1024 * 1024;
const HISTORY_FILE: &str = ".clcore_history";

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let handle = thread::Builder::new()
        .name("clcore-main".to_string())
        .stack_size(MAIN_STACK_SIZE)
        .spawn(run)?;
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "main thread panicked")))
}

fn run() -> io::Result<()> {
    let mut config = RuntimeConfig::from_env();
    if std::env::var_os("CLCORE_MAX_STACK").is_none() {
        config = config.with_max_stack_bytes(MAIN_STACK_SIZE - STACK_RESERVE);
    }
    let runtime = Runtime::with_config(config);
    let mut interp = runtime.interpreter();

    if let Some(path) = std::env::args().nth(1) {
        let source = std::fs::read_to_string(&path)?;
        if let Err(signal) = interp.load_source(&source) {
            report(signal);
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("clcore {} - Common Lisp runtime core", env!("CARGO_PKG_VERSION"));
    println!("Type (quit) or Ctrl-D to exit");
    repl(&mut interp)
}

/// `*`, `**` and `***`.
struct History {
    vars: [Symbol; 3],
}

impl History {
    fn new(interp: &Interpreter) -> Self {
        let packages = interp.runtime().packages();
        let vars = ["*", "**", "***"].map(|name| {
            let sym = packages.intern_cl(name);
            sym.set_special();
            sym.set_value(Value::Nil);
            sym
        });
        Self { vars }
    }

    fn push(&self, value: Value) {
        let [one, two, three] = &self.vars;
        three.set_value(two.value().unwrap_or(Value::Nil));
        two.set_value(one.value().unwrap_or(Value::Nil));
        one.set_value(value);
    }
}

fn repl(interp: &mut Interpreter) -> io::Result<()> {
    let mut rl = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let _ = rl.load_history(HISTORY_FILE);
    let history = History::new(interp);
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            format!("{}> ", interp.current_package().name())
        } else {
            "... ".to_string()
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
                if !is_balanced(&buffer) {
                    continue;
                }
                let input = std::mem::take(&mut buffer);
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                if trimmed.eq_ignore_ascii_case("(quit)") {
                    break;
                }
                match interp.eval_string(trimmed) {
                    Ok(primary) => {
                        let values = interp.capture_values(primary);
                        for value in &values {
                            println!("{}", interp.prin1(value));
                        }
                        if let Some(first) = values.into_iter().next() {
                            history.push(first);
                        }
                    }
                    Err(signal) => report(signal),
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                println!("^C");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline: {}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(HISTORY_FILE);
    Ok(())
}

fn report(signal: ControlSignal) {
    let condition = signal.into_condition();
    eprintln!("{}", condition);
    if let Some(backtrace) = condition.backtrace() {
        for frame in backtrace.frames.iter().take(8) {
            eprintln!("  ({} {})", frame.operator, frame.arguments.join(" "));
        }
    }
}

/// True once parentheses outside strings and comments are closed.
fn is_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    let mut in_comment = false;

    for c in s.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_string = !in_string,
            ';' if !in_string => in_comment = true,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth <= 0 && !in_string
}
