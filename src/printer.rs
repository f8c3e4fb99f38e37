// clcore Printer - Expression Output
//
// Implements PRIN1 and PRINC style output. Symbols are printed with a
// package prefix unless accessible from the package printing is relative to,
// and escaped with |...| when they would not read back as themselves.

use std::sync::Arc;

use crate::reader::{char_name, looks_like_number};
use crate::symbol::{Package, Symbol};
use crate::types::{read_lock, Value};

/// Print options
#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Print readably (escape special chars)
    pub escape: bool,
    /// Maximum depth to print
    pub max_depth: usize,
    /// Maximum list length to print
    pub max_length: usize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            escape: true,
            max_depth: 100,
            max_length: 1000,
        }
    }
}

impl PrintOptions {
    /// For prin1 (readable)
    pub fn prin1() -> Self {
        Self::default()
    }

    /// For princ (human-readable)
    pub fn princ() -> Self {
        Self {
            escape: false,
            ..Self::default()
        }
    }
}

/// The clcore Printer
pub struct Printer<'a> {
    package: Option<&'a Arc<Package>>,
    output: String,
    options: PrintOptions,
    current_depth: usize,
}

impl<'a> Printer<'a> {
    pub fn new(package: Option<&'a Arc<Package>>, options: PrintOptions) -> Self {
        Self {
            package,
            output: String::new(),
            options,
            current_depth: 0,
        }
    }

    /// Print an expression to string
    pub fn print(&mut self, value: &Value) -> &str {
        self.print_value(value);
        &self.output
    }

    fn print_value(&mut self, value: &Value) {
        if self.current_depth > self.options.max_depth {
            self.output.push_str("...");
            return;
        }
        self.current_depth += 1;

        match value {
            Value::Nil => self.output.push_str("NIL"),
            Value::Eof => self.output.push_str("#<EOF>"),
            Value::Symbol(sym) => self.print_symbol(sym),
            Value::Fixnum(n) => self.output.push_str(&n.to_string()),
            Value::Bignum(n) => self.output.push_str(&n.to_string()),
            Value::Ratio(r) => {
                self.output.push_str(&format!("{}/{}", r.numerator, r.denominator));
            }
            Value::Float(f) => self.print_float(*f),
            Value::Complex(c) => {
                self.output.push_str("#C(");
                self.print_value(&c.real);
                self.output.push(' ');
                self.print_value(&c.imag);
                self.output.push(')');
            }
            Value::Char(c) => self.print_char(*c),
            Value::String(s) => self.print_string(s),
            Value::Cons(_) => self.print_list(value),
            Value::Vector(items) => {
                let items = read_lock(items).clone();
                self.output.push('#');
                self.print_sequence(&items);
            }
            Value::BitVector(bits) => {
                self.output.push_str("#*");
                for bit in bits.iter() {
                    self.output.push(if *bit { '1' } else { '0' });
                }
            }
            Value::Array(array) => {
                let elements = read_lock(&array.elements).clone();
                self.output.push_str(&format!("#{}A", array.dimensions.len()));
                if array.dimensions.is_empty() {
                    self.output.push(' ');
                    if let Some(v) = elements.first() {
                        self.print_value(v);
                    }
                } else {
                    self.print_array_level(&elements, &array.dimensions);
                }
            }
            Value::Pathname(p) => {
                if self.options.escape {
                    self.output.push_str("#P");
                    self.print_string(p);
                } else {
                    self.output.push_str(p);
                }
            }
            Value::Function(f) => self.output.push_str(&format!("{:?}", f)),
            Value::Package(p) => self.output.push_str(&format!("#<PACKAGE {}>", p.name())),
            Value::Readtable(_) => self.output.push_str("#<READTABLE>"),
            Value::Stream(s) => self.output.push_str(&format!("#<STREAM {}>", s.name())),
            Value::Environment(_) => self.output.push_str("#<ENVIRONMENT>"),
            Value::Thread(t) => self.output.push_str(&format!("#<THREAD {}>", t.name())),
        }

        self.current_depth -= 1;
    }

    fn print_float(&mut self, f: f64) {
        if f.is_nan() {
            self.output.push_str("#<NaN>");
        } else if f.is_infinite() {
            self.output.push_str(if f > 0.0 { "#<+Inf>" } else { "#<-Inf>" });
        } else {
            self.output.push_str(&format!("{:?}", f));
        }
    }

    fn print_char(&mut self, c: char) {
        if !self.options.escape {
            self.output.push(c);
            return;
        }
        self.output.push_str("#\\");
        match char_name(c) {
            Some(name) => self.output.push_str(name),
            None => self.output.push(c),
        }
    }

    fn print_string(&mut self, s: &str) {
        if !self.options.escape {
            self.output.push_str(s);
            return;
        }
        self.output.push('"');
        for c in s.chars() {
            if c == '"' || c == '\\' {
                self.output.push('\\');
            }
            self.output.push(c);
        }
        self.output.push('"');
    }

    fn print_symbol(&mut self, sym: &Symbol) {
        if !self.options.escape {
            self.output.push_str(sym.name());
            return;
        }
        match sym.package() {
            None => self.output.push_str("#:"),
            Some(home) if home.is_keyword_package() => self.output.push(':'),
            Some(home) => {
                if !self.is_accessible(sym, &home) {
                    self.push_symbol_name(home.name());
                    let external = home.find_external(sym.name()).is_some_and(|s| s == *sym);
                    self.output.push_str(if external { ":" } else { "::" });
                }
            }
        }
        self.push_symbol_name(sym.name());
    }

    fn is_accessible(&self, sym: &Symbol, home: &Arc<Package>) -> bool {
        match self.package {
            Some(pkg) => pkg
                .find_symbol(sym.name())
                .is_some_and(|(found, _)| found == *sym),
            None => matches!(home.name(), "COMMON-LISP" | "COMMON-LISP-USER"),
        }
    }

    fn push_symbol_name(&mut self, name: &str) {
        if needs_escape(name) {
            self.output.push('|');
            for c in name.chars() {
                if c == '|' || c == '\\' {
                    self.output.push('\\');
                }
                self.output.push(c);
            }
            self.output.push('|');
        } else {
            self.output.push_str(name);
        }
    }

    fn print_list(&mut self, value: &Value) {
        self.output.push('(');

        let mut current = value.clone();
        let mut first = true;
        let mut count = 0;

        loop {
            if count >= self.options.max_length {
                self.output.push_str(" ...");
                break;
            }

            match current {
                Value::Cons(c) => {
                    if !first {
                        self.output.push(' ');
                    }
                    first = false;

                    self.print_value(&c.car());
                    current = c.cdr();
                    count += 1;
                }
                Value::Nil => break,
                other => {
                    // Improper list
                    self.output.push_str(" . ");
                    self.print_value(&other);
                    break;
                }
            }
        }

        self.output.push(')');
    }

    fn print_sequence(&mut self, items: &[Value]) {
        self.output.push('(');
        for (i, item) in items.iter().enumerate() {
            if i >= self.options.max_length {
                self.output.push_str(" ...");
                break;
            }
            if i > 0 {
                self.output.push(' ');
            }
            self.print_value(item);
        }
        self.output.push(')');
    }

    fn print_array_level(&mut self, elements: &[Value], dimensions: &[usize]) {
        let Some((first, rest)) = dimensions.split_first() else {
            if let Some(v) = elements.first() {
                self.print_value(v);
            }
            return;
        };
        let stride: usize = rest.iter().product();
        self.output.push('(');
        for i in 0..*first {
            if i > 0 {
                self.output.push(' ');
            }
            let start = (i * stride).min(elements.len());
            let end = (start + stride).min(elements.len());
            if rest.is_empty() {
                if let Some(v) = elements.get(i) {
                    self.print_value(v);
                }
            } else {
                self.print_array_level(&elements[start..end], rest);
            }
        }
        self.output.push(')');
    }
}

/// Whether a symbol name must be written inside |...| to read back.
fn needs_escape(name: &str) -> bool {
    if name.is_empty() || name.chars().all(|c| c == '.') {
        return true;
    }
    if name.chars().any(|c| {
        c.is_lowercase()
            || c.is_whitespace()
            || matches!(c, '(' | ')' | '"' | '\'' | ';' | '`' | ',' | '|' | '\\' | ':')
    }) {
        return true;
    }
    name.starts_with('#') || looks_like_number(name)
}

/// Print expression to string (like prin1-to-string)
pub fn prin1_to_string(value: &Value, package: Option<&Arc<Package>>) -> String {
    let mut printer = Printer::new(package, PrintOptions::prin1());
    printer.print(value).to_string()
}

/// Print expression without escapes (like princ-to-string)
pub fn princ_to_string(value: &Value, package: Option<&Arc<Package>>) -> String {
    let mut printer = Printer::new(package, PrintOptions::princ());
    printer.print(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::PackageRegistry;

    #[test]
    fn test_print_integer() {
        assert_eq!(prin1_to_string(&Value::Fixnum(42), None), "42");
        assert_eq!(prin1_to_string(&Value::Fixnum(-7), None), "-7");
    }

    #[test]
    fn test_print_float() {
        assert_eq!(prin1_to_string(&Value::Float(1.5), None), "1.5");
        assert_eq!(prin1_to_string(&Value::Float(1000.0), None), "1000.0");
    }

    #[test]
    fn test_print_nil() {
        assert_eq!(prin1_to_string(&Value::Nil, None), "NIL");
    }

    #[test]
    fn test_print_list() {
        let list = Value::list(vec![Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]);
        assert_eq!(prin1_to_string(&list, None), "(1 2 3)");
        let nested = Value::list(vec![list, Value::Nil]);
        assert_eq!(prin1_to_string(&nested, None), "((1 2 3) NIL)");
    }

    #[test]
    fn test_print_dotted_pair() {
        let pair = Value::cons(Value::Fixnum(1), Value::Fixnum(2));
        assert_eq!(prin1_to_string(&pair, None), "(1 . 2)");
    }

    #[test]
    fn test_print_strings_and_chars() {
        let s = Value::string("say \"hi\"");
        assert_eq!(prin1_to_string(&s, None), "\"say \\\"hi\\\"\"");
        assert_eq!(princ_to_string(&s, None), "say \"hi\"");
        assert_eq!(prin1_to_string(&Value::Char(' '), None), "#\\Space");
        assert_eq!(prin1_to_string(&Value::Char('x'), None), "#\\x");
        assert_eq!(princ_to_string(&Value::Char('x'), None), "x");
    }

    #[test]
    fn test_print_symbols() {
        let packages = PackageRegistry::new();
        let user = packages.cl_user();
        let foo = Value::Symbol(user.intern_symbol("FOO"));
        assert_eq!(prin1_to_string(&foo, Some(user)), "FOO");
        assert_eq!(prin1_to_string(&foo, Some(packages.system())), "COMMON-LISP-USER::FOO");

        let kw = Value::Symbol(packages.intern_keyword("TEST"));
        assert_eq!(prin1_to_string(&kw, Some(user)), ":TEST");

        let odd = Value::Symbol(user.intern_symbol("Hello World"));
        assert_eq!(prin1_to_string(&odd, Some(user)), "|Hello World|");
        assert_eq!(princ_to_string(&odd, Some(user)), "Hello World");

        let numeric = Value::Symbol(user.intern_symbol("12"));
        assert_eq!(prin1_to_string(&numeric, Some(user)), "|12|");

        let gensym = Value::Symbol(Symbol::uninterned("G1"));
        assert_eq!(prin1_to_string(&gensym, Some(user)), "#:G1");
    }

    #[test]
    fn test_print_vectors() {
        let v = Value::vector(vec![Value::Fixnum(1), Value::string("a")]);
        assert_eq!(prin1_to_string(&v, None), "#(1 \"a\")");
        let bits = Value::BitVector(Arc::new(vec![true, false, true]));
        assert_eq!(prin1_to_string(&bits, None), "#*101");
    }

    #[test]
    fn test_circular_list_is_bounded() {
        let cell = Value::cons(Value::Fixnum(1), Value::Nil);
        if let Value::Cons(c) = &cell {
            c.set_cdr(cell.clone());
        }
        let printed = prin1_to_string(&cell, None);
        assert!(printed.ends_with(" ...)"));
        if let Value::Cons(c) = &cell {
            c.set_cdr(Value::Nil);
        }
    }
}
