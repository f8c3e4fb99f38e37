// clcore Runtime Configuration
//
// Defaults plus environment overrides. Reader settings seed the initial
// global values of the corresponding special variables.

use std::env;

/// Tunables for one runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Nested `eval` calls allowed before STORAGE-CONDITION.
    pub max_eval_depth: usize,
    /// Host stack bytes evaluation may use below its outermost `eval`
    /// before STORAGE-CONDITION. Sized for a 2 MiB thread.
    pub max_stack_bytes: usize,
    /// Attach a backtrace to errors.
    pub capture_backtraces: bool,
    pub backtrace_limit: usize,
    /// Initial `*FEATURES*`, as keyword names.
    pub features: Vec<String>,
    /// Initial `*READ-EVAL*`.
    pub read_eval: bool,
    /// Unknown `#x` dispatch sub-characters are reader errors. When false
    /// they are skipped with a warning and produce no datum.
    pub strict_dispatch: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_eval_depth: 1024,
            max_stack_bytes: 1 << 20,
            capture_backtraces: true,
            backtrace_limit: 64,
            features: ["COMMON-LISP", "ANSI-CL", "CLCORE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            read_eval: true,
            strict_dispatch: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `CLCORE_MAX_DEPTH`, `CLCORE_MAX_STACK`,
    /// `CLCORE_BACKTRACE`, `CLCORE_FEATURES` and `CLCORE_READ_EVAL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(depth) = env::var("CLCORE_MAX_DEPTH").ok().and_then(|v| v.parse().ok()) {
            config.max_eval_depth = depth;
        }
        if let Some(bytes) = env::var("CLCORE_MAX_STACK").ok().and_then(|v| v.parse().ok()) {
            config.max_stack_bytes = bytes;
        }
        if let Ok(v) = env::var("CLCORE_BACKTRACE") {
            config.capture_backtraces = parse_flag(&v).unwrap_or(config.capture_backtraces);
        }
        if let Ok(v) = env::var("CLCORE_FEATURES") {
            config.features.extend(
                v.split(',')
                    .map(|f| f.trim().trim_start_matches(':').to_uppercase())
                    .filter(|f| !f.is_empty()),
            );
        }
        if let Ok(v) = env::var("CLCORE_READ_EVAL") {
            config.read_eval = parse_flag(&v).unwrap_or(config.read_eval);
        }
        config
    }

    pub fn with_max_eval_depth(mut self, depth: usize) -> Self {
        self.max_eval_depth = depth;
        self
    }

    pub fn with_max_stack_bytes(mut self, bytes: usize) -> Self {
        self.max_stack_bytes = bytes;
        self
    }

    pub fn with_strict_dispatch(mut self, strict: bool) -> Self {
        self.strict_dispatch = strict;
        self
    }

    pub fn with_feature(mut self, feature: &str) -> Self {
        self.features.push(feature.to_uppercase());
        self
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
