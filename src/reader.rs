// clcore Reader - S-Expression Parser
//
// Implements the readtable-driven reader: tokens, numbers, package-qualified
// symbols, the standard macro characters and the # dispatch table. Reader
// parameters come from the current dynamic values of *PACKAGE*,
// *READTABLE*, *READ-BASE*, *READ-EVAL*, *READ-SUPPRESS* and *FEATURES*.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use num_bigint::BigInt;

use crate::conditions::Condition;
use crate::environment::Environment;
use crate::eval::{ControlSignal, EvalResult, Interpreter};
use crate::numbers::{self, integer_from_bigint, make_ratio};
use crate::readtable::{DispatchFunction, MacroFunction, Readtable, ReadtableCase, SyntaxType};
use crate::streams::Stream;
use crate::symbol::Symbol;
use crate::types::{symbol_value_of, Array, Complex, Value, ARRAY_RANK_LIMIT, ARRAY_TOTAL_SIZE_LIMIT};

/// Outcome of a macro character: a datum, or `None` when it read nothing
/// (comments, failed feature tests).
pub type ReadResult = Result<Option<Value>, ControlSignal>;

fn reader_error<T>(message: impl Into<String>) -> Result<T, ControlSignal> {
    Err(Condition::reader_error(message).into())
}

fn eof_error<T>() -> Result<T, ControlSignal> {
    Err(Condition::end_of_file().into())
}

/// A token's characters after case conversion, each flagged if escaped.
struct Token {
    chars: Vec<(char, bool)>,
    escaped: bool,
}

impl Token {
    fn text(&self) -> String {
        self.chars.iter().map(|(c, _)| *c).collect()
    }

    fn slice_text(&self, from: usize, to: usize) -> String {
        self.chars[from..to].iter().map(|(c, _)| *c).collect()
    }

    /// Positions of unescaped package markers.
    fn colons(&self) -> Vec<usize> {
        self.chars
            .iter()
            .enumerate()
            .filter(|(_, (c, escaped))| *c == ':' && !escaped)
            .map(|(i, _)| i)
            .collect()
    }
}

struct Label {
    placeholder: Value,
    value: Option<Value>,
}

/// The Reader
pub struct Reader<'a> {
    interp: &'a mut Interpreter,
    stream: Arc<Stream>,
    readtable: Arc<Readtable>,
    labels: HashMap<u64, Label>,
}

impl<'a> Reader<'a> {
    pub fn new(interp: &'a mut Interpreter, stream: Arc<Stream>) -> Self {
        let readtable = interp.current_readtable();
        Self {
            interp,
            stream,
            readtable,
            labels: HashMap::new(),
        }
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        self.interp
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    /// Read one datum. At end of input, signal END-OF-FILE when
    /// `eof_error_p`, otherwise return `eof_value`. A recursive read is part
    /// of an enclosing one and shares its `#n=` labels.
    pub fn read(&mut self, eof_error_p: bool, eof_value: Value, recursive: bool) -> EvalResult {
        match self.read_datum()? {
            Some(value) => {
                if !recursive && !self.labels.is_empty() {
                    self.patch_labels(&value);
                    self.labels.clear();
                }
                Ok(value)
            }
            None if eof_error_p || recursive => eof_error(),
            None => Ok(eof_value),
        }
    }

    /// Read data up to `close`, which is consumed.
    pub fn read_delimited_list(&mut self, close: char) -> EvalResult {
        let items = self.read_delimited_items(close)?;
        Ok(Value::list(items))
    }

    // ------------------------------------------------------------------
    // Character level
    // ------------------------------------------------------------------

    fn next_char(&mut self) -> Result<Option<char>, ControlSignal> {
        Ok(self.stream.read_char()?)
    }

    fn next_char_or_eof(&mut self) -> Result<char, ControlSignal> {
        match self.stream.read_char()? {
            Some(c) => Ok(c),
            None => eof_error(),
        }
    }

    fn peek_char(&mut self) -> Result<Option<char>, ControlSignal> {
        Ok(self.stream.peek_char()?)
    }

    /// Next non-whitespace character; end of input is an error here.
    fn next_significant_char(&mut self) -> Result<char, ControlSignal> {
        loop {
            let c = self.next_char_or_eof()?;
            if !self.readtable.is_whitespace(c) {
                return Ok(c);
            }
        }
    }

    // ------------------------------------------------------------------
    // Reader parameters
    // ------------------------------------------------------------------

    fn suppressed(&self) -> bool {
        let sym = &self.interp.symbols().read_suppress;
        self.interp.dynamic_value(sym).is_some_and(|v| v.is_true())
    }

    fn read_base(&self) -> u32 {
        let sym = &self.interp.symbols().read_base;
        match self.interp.dynamic_value(sym) {
            Some(Value::Fixnum(n)) if (2..=36).contains(&n) => n as u32,
            _ => 10,
        }
    }

    fn read_eval_enabled(&self) -> bool {
        let sym = &self.interp.symbols().read_eval;
        self.interp.dynamic_value(sym).is_some_and(|v| v.is_true())
    }

    // ------------------------------------------------------------------
    // Datum level
    // ------------------------------------------------------------------

    fn read_datum(&mut self) -> Result<Option<Value>, ControlSignal> {
        loop {
            let c = match self.next_char()? {
                Some(c) => c,
                None => return Ok(None),
            };
            if self.readtable.is_whitespace(c) {
                continue;
            }
            if let Some(value) = self.read_starting_with(c)? {
                return Ok(Some(value));
            }
        }
    }

    /// Read a datum that must exist (inside a construct).
    fn read_object(&mut self) -> Result<Value, ControlSignal> {
        match self.read_datum()? {
            Some(v) => Ok(v),
            None => eof_error(),
        }
    }

    /// Dispatch on the syntax type of an already consumed character.
    fn read_starting_with(&mut self, c: char) -> ReadResult {
        match self.readtable.get_syntax_type(c) {
            SyntaxType::Whitespace => Ok(None),
            SyntaxType::TerminatingMacro | SyntaxType::NonTerminatingMacro => {
                match self.readtable.get_macro_character(c) {
                    Some((func, _)) => self.call_macro(func, c),
                    None => self.read_token_object(c),
                }
            }
            _ => self.read_token_object(c),
        }
    }

    fn read_token_object(&mut self, first: char) -> ReadResult {
        self.stream.unread_char(first);
        let token = self.read_token(self.readtable.readtable_case())?;
        self.make_object(&token).map(Some)
    }

    fn call_macro(&mut self, func: MacroFunction, c: char) -> ReadResult {
        match func {
            MacroFunction::Native(f) => f(self, c),
            MacroFunction::Lisp(function) => {
                let args = [Value::Stream(Arc::clone(&self.stream)), Value::Char(c)];
                self.call_lisp_reader_function(&function, &args)
            }
        }
    }

    /// A Lisp reader macro returning zero values produced no datum.
    fn call_lisp_reader_function(
        &mut self,
        function: &crate::function::Function,
        args: &[Value],
    ) -> ReadResult {
        let value = self.interp.apply_function(function, args)?;
        let none = self.interp.returned_no_values();
        self.interp.clear_values();
        if none {
            Ok(None)
        } else if self.suppressed() {
            Ok(Some(Value::Nil))
        } else {
            Ok(Some(value))
        }
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    fn read_token(&mut self, case_mode: ReadtableCase) -> Result<Token, ControlSignal> {
        let mut chars: Vec<(char, bool)> = Vec::new();
        let mut in_multi_escape = false;
        let mut saw_escape = false;

        loop {
            let c = match self.next_char()? {
                Some(c) => c,
                None if in_multi_escape => return eof_error(),
                None => break,
            };

            if in_multi_escape {
                match self.readtable.get_syntax_type(c) {
                    SyntaxType::MultiEscape => in_multi_escape = false,
                    SyntaxType::SingleEscape => chars.push((self.next_char_or_eof()?, true)),
                    _ => chars.push((c, true)),
                }
                continue;
            }

            match self.readtable.get_syntax_type(c) {
                SyntaxType::Whitespace | SyntaxType::TerminatingMacro => {
                    self.stream.unread_char(c);
                    break;
                }
                SyntaxType::SingleEscape => {
                    saw_escape = true;
                    chars.push((self.next_char_or_eof()?, true));
                }
                SyntaxType::MultiEscape => {
                    saw_escape = true;
                    in_multi_escape = true;
                }
                SyntaxType::Constituent | SyntaxType::NonTerminatingMacro => chars.push((c, false)),
            }
        }

        let mut has_upper = false;
        let mut has_lower = false;
        for (ch, escaped) in &chars {
            if *escaped {
                continue;
            }
            if ch.is_uppercase() {
                has_upper = true;
            } else if ch.is_lowercase() {
                has_lower = true;
            }
        }

        let to_upper = match case_mode {
            ReadtableCase::Upcase => Some(true),
            ReadtableCase::Downcase => Some(false),
            ReadtableCase::Preserve => None,
            ReadtableCase::Invert if has_lower && !has_upper => Some(true),
            ReadtableCase::Invert if has_upper && !has_lower => Some(false),
            ReadtableCase::Invert => None,
        };

        let mut converted = Vec::with_capacity(chars.len());
        for (ch, escaped) in chars {
            match to_upper {
                Some(upper) if !escaped => {
                    let mapped: Vec<char> = if upper {
                        ch.to_uppercase().collect()
                    } else {
                        ch.to_lowercase().collect()
                    };
                    converted.extend(mapped.into_iter().map(|c| (c, false)));
                }
                _ => converted.push((ch, escaped)),
            }
        }

        Ok(Token {
            chars: converted,
            escaped: saw_escape,
        })
    }

    /// Interpret a token as a number or symbol.
    fn make_object(&mut self, token: &Token) -> EvalResult {
        if self.suppressed() {
            return Ok(Value::Nil);
        }
        let text = token.text();

        if !token.escaped {
            if !text.is_empty() && text.chars().all(|c| c == '.') {
                return reader_error(format!("Illegal token {:?}: dots only", text));
            }
            if let Some(num) = parse_number(&text, self.read_base())? {
                return Ok(num);
            }
        }

        let colons = token.colons();
        let registry = self.interp.runtime().packages();
        let sym = match colons.as_slice() {
            [] => self.interp.current_package().intern_symbol(&text),
            [0] | [0, 1] => {
                let start = colons.len();
                registry.intern_keyword(&token.slice_text(start, token.chars.len()))
            }
            [p] => {
                let pkg_name = token.slice_text(0, *p);
                let name = token.slice_text(p + 1, token.chars.len());
                self.find_external(&pkg_name, &name)?
            }
            [p, q] if *q == p + 1 => {
                let pkg_name = token.slice_text(0, *p);
                let name = token.slice_text(q + 1, token.chars.len());
                let pkg = registry.find_package(&pkg_name).ok_or_else(|| {
                    Condition::package_error(format!("Package {} does not exist.", pkg_name))
                })?;
                pkg.intern_symbol(&name)
            }
            _ => return reader_error(format!("Too many package markers in {:?}", text)),
        };
        Ok(symbol_value_of(self.interp.runtime(), sym))
    }

    fn find_external(&self, pkg_name: &str, name: &str) -> Result<Symbol, ControlSignal> {
        let pkg = self
            .interp
            .runtime()
            .packages()
            .find_package(pkg_name)
            .ok_or_else(|| Condition::package_error(format!("Package {} does not exist.", pkg_name)))?;
        if let Some(sym) = pkg.find_external(name) {
            return Ok(sym);
        }
        if pkg.is_keyword_package() {
            return Ok(pkg.intern_symbol(name));
        }
        let message = if pkg.find_symbol(name).is_some() {
            format!("The symbol {} is not external in the {} package.", name, pkg.name())
        } else {
            format!("Symbol {} not found in the {} package.", name, pkg.name())
        };
        Err(Condition::package_error(message).into())
    }

    // ------------------------------------------------------------------
    // Standard macro characters
    // ------------------------------------------------------------------

    pub(crate) fn unmatched_close(&mut self) -> ReadResult {
        reader_error("Unmatched close parenthesis")
    }

    pub(crate) fn skip_line_comment(&mut self) -> ReadResult {
        while let Some(c) = self.next_char()? {
            if c == '\n' {
                break;
            }
        }
        Ok(None)
    }

    pub(crate) fn read_string(&mut self, delimiter: char) -> ReadResult {
        let mut out = String::new();
        loop {
            let c = self.next_char_or_eof()?;
            if c == delimiter {
                break;
            }
            if self.readtable.get_syntax_type(c) == SyntaxType::SingleEscape {
                out.push(self.next_char_or_eof()?);
            } else {
                out.push(c);
            }
        }
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        Ok(Some(Value::string(out)))
    }

    fn wrap(&mut self, head: Symbol) -> ReadResult {
        let obj = self.read_object()?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        Ok(Some(Value::list(vec![Value::Symbol(head), obj])))
    }

    pub(crate) fn read_quote(&mut self) -> ReadResult {
        let quote = self.interp.symbols().quote.clone();
        self.wrap(quote)
    }

    pub(crate) fn read_backquote(&mut self) -> ReadResult {
        let backquote = self.interp.symbols().backquote.clone();
        self.wrap(backquote)
    }

    pub(crate) fn read_comma(&mut self) -> ReadResult {
        let head = match self.peek_char()? {
            Some('@') => {
                self.next_char()?;
                self.interp.symbols().comma_at.clone()
            }
            Some('.') => {
                self.next_char()?;
                self.interp.symbols().comma_dot.clone()
            }
            _ => self.interp.symbols().comma.clone(),
        };
        self.wrap(head)
    }

    /// A '.' that stands alone as a token.
    fn at_consing_dot(&mut self) -> Result<bool, ControlSignal> {
        Ok(match self.peek_char()? {
            None => true,
            Some(next) => self.readtable.is_terminator(next),
        })
    }

    pub(crate) fn read_list(&mut self) -> ReadResult {
        let mut items = Vec::new();
        loop {
            let c = self.next_significant_char()?;
            if c == ')' {
                return Ok(Some(Value::list(items)));
            }
            if c == '.' && self.at_consing_dot()? {
                if items.is_empty() {
                    return reader_error("Nothing appears before . in list");
                }
                let tail = self.read_dotted_tail()?;
                return Ok(Some(Value::list_with_tail(items, tail)));
            }
            if let Some(v) = self.read_starting_with(c)? {
                items.push(v);
            }
        }
    }

    fn read_dotted_tail(&mut self) -> Result<Value, ControlSignal> {
        let tail = loop {
            let c = self.next_significant_char()?;
            if c == ')' {
                return reader_error("Nothing appears after . in list");
            }
            if let Some(v) = self.read_starting_with(c)? {
                break v;
            }
        };
        loop {
            let c = self.next_significant_char()?;
            if c == ')' {
                return Ok(tail);
            }
            if self.read_starting_with(c)?.is_some() {
                return reader_error("More than one object follows . in list");
            }
        }
    }

    fn read_delimited_items(&mut self, close: char) -> Result<Vec<Value>, ControlSignal> {
        let mut items = Vec::new();
        loop {
            let c = self.next_significant_char()?;
            if c == close {
                return Ok(items);
            }
            if let Some(v) = self.read_starting_with(c)? {
                items.push(v);
            }
        }
    }

    /// A dispatching macro character: optional decimal argument, then the
    /// sub-character selects the function.
    pub(crate) fn read_dispatch(&mut self, disp: char) -> ReadResult {
        let mut arg: Option<u64> = None;
        let sub = loop {
            let c = self.next_char_or_eof()?;
            match c.to_digit(10) {
                Some(d) => {
                    arg = Some(arg.unwrap_or(0).saturating_mul(10).saturating_add(u64::from(d)));
                }
                None => break c,
            }
        };

        match self.readtable.get_dispatch_macro_character(disp, sub) {
            Some(DispatchFunction::Native(f)) => f(self, sub, arg),
            Some(DispatchFunction::Lisp(function)) => {
                let args = [
                    Value::Stream(Arc::clone(&self.stream)),
                    Value::Char(sub),
                    arg.and_then(|n| i64::try_from(n).ok()).map_or(Value::Nil, Value::Fixnum),
                ];
                self.call_lisp_reader_function(&function, &args)
            }
            None if self.suppressed() => Ok(Some(Value::Nil)),
            None if self.interp.runtime().config().strict_dispatch => reader_error(format!(
                "No dispatch function defined for {}{}",
                disp, sub
            )),
            None => {
                tracing::warn!(dispatch = %disp, sub = %sub, "undefined dispatch macro skipped");
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // # dispatch functions
    // ------------------------------------------------------------------

    pub(crate) fn read_function_quote(&mut self) -> ReadResult {
        let function = self.interp.symbols().function.clone();
        self.wrap(function)
    }

    pub(crate) fn read_vector(&mut self, length: Option<u64>) -> ReadResult {
        let mut items = self.read_delimited_items(')')?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        if let Some(n) = length {
            let n = total_size(n)?;
            if items.len() > n {
                return reader_error(format!("Vector longer than specified length {}", n));
            }
            if items.len() < n {
                let last = match items.last() {
                    Some(v) => v.clone(),
                    None => return reader_error("#n() with no elements to fill from"),
                };
                items.resize(n, last);
            }
        }
        Ok(Some(Value::vector(items)))
    }

    pub(crate) fn read_character(&mut self) -> ReadResult {
        let first = self.next_char_or_eof()?;
        let mut name = String::new();
        name.push(first);
        while let Some(c) = self.peek_char()? {
            if self.readtable.is_terminator(c) {
                break;
            }
            self.next_char()?;
            name.push(c);
        }
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        if name.chars().count() == 1 {
            return Ok(Some(Value::Char(first)));
        }
        match char_from_name(&name) {
            Some(c) => Ok(Some(Value::Char(c))),
            None => reader_error(format!("Unrecognized character name: {}", name)),
        }
    }

    pub(crate) fn read_feature_conditional(&mut self, plus: bool) -> ReadResult {
        let keyword = Value::Package(Arc::clone(self.interp.runtime().packages().keyword()));
        let package_var = self.interp.symbols().package_var.clone();
        let expr = self.with_bindings(vec![(package_var, keyword)], |r| r.read_object())?;
        let included = self.eval_feature(&expr)?;
        if included == plus {
            return self.read_object().map(Some);
        }
        let suppress = self.interp.symbols().read_suppress.clone();
        let t = self.interp.t();
        self.with_bindings(vec![(suppress, t)], |r| r.read_object())?;
        Ok(None)
    }

    fn eval_feature(&mut self, expr: &Value) -> Result<bool, ControlSignal> {
        match expr {
            Value::Nil => Ok(false),
            Value::Symbol(sym) => {
                let features = self
                    .interp
                    .dynamic_value(&self.interp.symbols().features)
                    .unwrap_or(Value::Nil);
                Ok(features.iter().any(|f| match f {
                    Value::Symbol(s) => s == *sym || s.name() == sym.name(),
                    _ => false,
                }))
            }
            Value::Cons(c) => {
                let op = match c.car() {
                    Value::Symbol(s) => s.name().to_string(),
                    other => return reader_error(format!("Bad feature expression operator {}", other)),
                };
                let args = c.cdr();
                match op.as_str() {
                    "NOT" => match args.car() {
                        Some(arg) if args.list_length() == Some(1) => Ok(!self.eval_feature(&arg)?),
                        _ => reader_error("NOT feature expression takes one argument"),
                    },
                    "AND" => {
                        for arg in args.iter() {
                            if !self.eval_feature(&arg)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    "OR" => {
                        for arg in args.iter() {
                            if self.eval_feature(&arg)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    other => reader_error(format!("Unknown feature expression operator {}", other)),
                }
            }
            other => reader_error(format!("Bad feature expression {}", other)),
        }
    }

    pub(crate) fn read_uninterned_symbol(&mut self) -> ReadResult {
        let token = self.read_token(self.readtable.readtable_case())?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        if !token.colons().is_empty() {
            return reader_error(format!("Package marker in uninterned symbol #:{}", token.text()));
        }
        Ok(Some(Value::Symbol(Symbol::uninterned(&token.text()))))
    }

    /// Skip a possibly nested #| ... |# comment.
    pub(crate) fn skip_block_comment(&mut self) -> ReadResult {
        let mut depth = 1;
        let mut prev: Option<char> = None;
        loop {
            let c = self.next_char_or_eof()?;
            match (prev, c) {
                (Some('|'), '#') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(None);
                    }
                    prev = None;
                }
                (Some('#'), '|') => {
                    depth += 1;
                    prev = None;
                }
                _ => prev = Some(c),
            }
        }
    }

    pub(crate) fn read_eval_form(&mut self) -> ReadResult {
        let form = self.read_object()?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        if !self.read_eval_enabled() {
            return reader_error("#. read-time evaluation is disabled (*READ-EVAL* is false)");
        }
        let value = self.interp.eval(&form, &Environment::new())?;
        self.interp.clear_values();
        Ok(Some(value))
    }

    pub(crate) fn read_bit_vector(&mut self, length: Option<u64>) -> ReadResult {
        let mut bits = Vec::new();
        while let Some(c) = self.peek_char()? {
            if self.readtable.is_terminator(c) {
                break;
            }
            self.next_char()?;
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                _ if self.suppressed() => {}
                _ => return reader_error(format!("Illegal bit vector element {:?}", c)),
            }
        }
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        if let Some(n) = length {
            let n = total_size(n)?;
            if bits.len() > n {
                return reader_error(format!("Bit vector longer than specified length {}", n));
            }
            if bits.len() < n {
                match bits.last().copied() {
                    Some(last) => bits.resize(n, last),
                    None => return reader_error("#n* with no bits to fill from"),
                }
            }
        }
        Ok(Some(Value::BitVector(Arc::new(bits))))
    }

    pub(crate) fn read_array(&mut self, rank: Option<u64>) -> ReadResult {
        let contents = self.read_object()?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        let rank = match rank {
            Some(r) if r < ARRAY_RANK_LIMIT as u64 => r as usize,
            Some(r) => return reader_error(format!("Array rank {} exceeds the limit of {}", r, ARRAY_RANK_LIMIT)),
            None => return reader_error("#A requires a rank argument"),
        };
        if rank == 1 {
            return Ok(Some(Value::vector(sequence_items(&contents)?)));
        }
        let mut dimensions = Vec::with_capacity(rank);
        let mut level = contents.clone();
        for depth in 0..rank {
            let items = match &level {
                Value::Nil | Value::Cons(_) | Value::Vector(_) | Value::String(_) => sequence_items(&level)?,
                _ => {
                    return reader_error(format!(
                        "#{}A contents are only nested {} levels deep",
                        rank, depth
                    ))
                }
            };
            dimensions.push(items.len());
            match items.into_iter().next() {
                Some(first) => level = first,
                // An empty dimension leaves nothing to infer the rest from.
                None => {
                    dimensions.resize(rank, 0);
                    break;
                }
            }
        }
        let total = dimensions.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
        if !total.is_some_and(|t| t <= ARRAY_TOTAL_SIZE_LIMIT) {
            return reader_error("Array total size exceeds the limit");
        }
        let mut elements = Vec::new();
        collect_array_elements(&contents, &dimensions, &mut elements)?;
        Ok(Some(Value::Array(Arc::new(Array {
            dimensions,
            elements: RwLock::new(elements),
        }))))
    }

    pub(crate) fn read_radix(&mut self, radix: Option<u64>) -> ReadResult {
        let token = self.read_token(ReadtableCase::Upcase)?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        let radix = match radix {
            Some(r) if (2..=36).contains(&r) => r as u32,
            _ => return reader_error("Radix must be between 2 and 36"),
        };
        let text = token.text();
        match parse_rational(&text, radix)? {
            Some(v) if !token.escaped => Ok(Some(v)),
            _ => reader_error(format!("#{}R{} is not a rational in radix {}", radix, text, radix)),
        }
    }

    pub(crate) fn read_complex(&mut self) -> ReadResult {
        let obj = self.read_object()?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        match obj.list_to_vec().as_deref() {
            Some([real, imag]) if numbers::is_real(real) && numbers::is_real(imag) => {
                if numbers::is_rational(real) && numbers::is_exact_zero(imag) {
                    return Ok(Some(real.clone()));
                }
                Ok(Some(Value::Complex(Arc::new(Complex {
                    real: real.clone(),
                    imag: imag.clone(),
                }))))
            }
            _ => reader_error(format!("#C requires a list of two reals, got {}", obj)),
        }
    }

    pub(crate) fn read_pathname(&mut self) -> ReadResult {
        let obj = self.read_object()?;
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        match obj {
            Value::String(s) => Ok(Some(Value::Pathname(s))),
            other => reader_error(format!("#P requires a string, got {}", other)),
        }
    }

    pub(crate) fn read_label_definition(&mut self, arg: Option<u64>) -> ReadResult {
        let n = match arg {
            Some(n) => n,
            None => return reader_error("#= requires a label number"),
        };
        if self.suppressed() {
            return self.read_object().map(Some);
        }
        if self.labels.contains_key(&n) {
            return reader_error(format!("Label #{}= defined twice", n));
        }
        let placeholder = Value::cons(Value::Nil, Value::Nil);
        self.labels.insert(
            n,
            Label {
                placeholder: placeholder.clone(),
                value: None,
            },
        );
        let obj = self.read_object()?;
        if crate::types::eq(&obj, &placeholder) {
            return reader_error(format!("Label #{}= refers only to itself", n));
        }
        if let Some(label) = self.labels.get_mut(&n) {
            label.value = Some(obj.clone());
        }
        Ok(Some(obj))
    }

    pub(crate) fn read_label_reference(&mut self, arg: Option<u64>) -> ReadResult {
        if self.suppressed() {
            return Ok(Some(Value::Nil));
        }
        let n = match arg {
            Some(n) => n,
            None => return reader_error("## requires a label number"),
        };
        match self.labels.get(&n) {
            Some(label) => Ok(Some(label.value.clone().unwrap_or_else(|| label.placeholder.clone()))),
            None => reader_error(format!("Reference to undefined label #{}#", n)),
        }
    }

    pub(crate) fn unreadable_object(&mut self, sub: char) -> ReadResult {
        reader_error(format!("Illegal sharp character {:?}: object cannot be read back", sub))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn with_bindings<T>(
        &mut self,
        bindings: Vec<(Symbol, Value)>,
        f: impl FnOnce(&mut Self) -> Result<T, ControlSignal>,
    ) -> Result<T, ControlSignal> {
        let mark = self.interp.specials_mark();
        for (sym, value) in bindings {
            self.interp.push_special(sym, value);
        }
        let result = f(self);
        self.interp.restore_specials(mark);
        result
    }

    /// Replace `#n#` placeholders left in structure that was still being
    /// read when they were referenced.
    fn patch_labels(&self, root: &Value) {
        let replacements: Vec<(Value, Value)> = self
            .labels
            .values()
            .filter_map(|l| l.value.clone().map(|v| (l.placeholder.clone(), v)))
            .collect();
        let substitute = |v: &Value| {
            replacements
                .iter()
                .find(|(p, _)| crate::types::eq(p, v))
                .map(|(_, r)| r.clone())
        };

        let mut visited: HashSet<usize> = HashSet::new();
        let mut pending = vec![root.clone()];
        while let Some(value) = pending.pop() {
            match &value {
                Value::Cons(c) => {
                    if !visited.insert(c.addr()) {
                        continue;
                    }
                    let car = c.car();
                    match substitute(&car) {
                        Some(r) => c.set_car(r),
                        None => pending.push(car),
                    }
                    let cdr = c.cdr();
                    match substitute(&cdr) {
                        Some(r) => c.set_cdr(r),
                        None => pending.push(cdr),
                    }
                }
                Value::Vector(items) => {
                    if !visited.insert(Arc::as_ptr(items) as usize) {
                        continue;
                    }
                    let mut items = crate::types::write_lock(items);
                    for item in items.iter_mut() {
                        match substitute(item) {
                            Some(r) => *item = r,
                            None => pending.push(item.clone()),
                        }
                    }
                }
                Value::Array(array) => {
                    if !visited.insert(Arc::as_ptr(array) as usize) {
                        continue;
                    }
                    let mut items = crate::types::write_lock(&array.elements);
                    for item in items.iter_mut() {
                        match substitute(item) {
                            Some(r) => *item = r,
                            None => pending.push(item.clone()),
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

// ============================================================================
// Number syntax
// ============================================================================

fn split_sign(s: &str) -> (bool, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    }
}

fn parse_digits(s: &str, base: u32) -> Option<BigInt> {
    if s.is_empty() || !s.chars().all(|c| c.is_digit(base)) {
        return None;
    }
    BigInt::parse_bytes(s.to_ascii_lowercase().as_bytes(), base)
}

fn parse_integer(s: &str, base: u32) -> Option<Value> {
    let (neg, digits) = split_sign(s);
    let n = parse_digits(digits, base)?;
    Some(integer_from_bigint(if neg { -n } else { n }))
}

/// Integer or ratio in `base`. A zero denominator is a reader error.
fn parse_rational(s: &str, base: u32) -> Result<Option<Value>, ControlSignal> {
    if let Some((num_str, den_str)) = s.split_once('/') {
        let (neg, num_digits) = split_sign(num_str);
        let (Some(num), Some(den)) = (parse_digits(num_digits, base), parse_digits(den_str, base)) else {
            return Ok(None);
        };
        if den == BigInt::from(0) {
            return reader_error(format!("Division by zero in ratio {}", s));
        }
        return Ok(Some(make_ratio(if neg { -num } else { num }, den)));
    }
    Ok(parse_integer(s, base))
}

/// Potential number per the current base: decimal-point integers, ratios,
/// integers, then floats (always decimal).
fn parse_number(s: &str, base: u32) -> Result<Option<Value>, ControlSignal> {
    if let Some(stripped) = s.strip_suffix('.') {
        if let Some(v) = parse_integer(stripped, 10) {
            return Ok(Some(v));
        }
    }
    if let Some(v) = parse_rational(s, base)? {
        return Ok(Some(v));
    }
    Ok(parse_float_token(s).map(Value::Float))
}

/// True when `s`, read as an unescaped token in base ten, would be a number.
pub(crate) fn looks_like_number(s: &str) -> bool {
    !matches!(parse_number(s, 10), Ok(None))
}

const EXPONENT_MARKERS: [char; 10] = ['e', 'E', 'd', 'D', 's', 'S', 'f', 'F', 'l', 'L'];

fn parse_float_token(s: &str) -> Option<f64> {
    let (neg, rest) = split_sign(s);
    if rest.is_empty() {
        return None;
    }

    let (mantissa, exponent) = match rest.find(|c| EXPONENT_MARKERS.contains(&c)) {
        Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
        None => (rest, None),
    };

    let mut saw_digit = false;
    let mut saw_dot = false;
    for c in mantissa.chars() {
        if c == '.' {
            if saw_dot {
                return None;
            }
            saw_dot = true;
        } else if c.is_ascii_digit() {
            saw_digit = true;
        } else {
            return None;
        }
    }
    if !saw_digit || (exponent.is_none() && !saw_dot) {
        return None;
    }

    let mut normalized = String::new();
    if neg {
        normalized.push('-');
    }
    normalized.push_str(mantissa);

    if let Some(exp) = exponent {
        let (exp_neg, exp_digits) = split_sign(exp);
        if exp_digits.is_empty() || !exp_digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        normalized.push('e');
        if exp_neg {
            normalized.push('-');
        }
        normalized.push_str(exp_digits);
    }

    normalized.parse::<f64>().ok()
}

// ============================================================================
// Characters and arrays
// ============================================================================

const CHAR_NAMES: [(&str, char); 14] = [
    ("SPACE", ' '),
    ("NEWLINE", '\n'),
    ("LINEFEED", '\n'),
    ("TAB", '\t'),
    ("RETURN", '\r'),
    ("PAGE", '\x0c'),
    ("BACKSPACE", '\x08'),
    ("RUBOUT", '\x7f'),
    ("DELETE", '\x7f'),
    ("NULL", '\0'),
    ("NUL", '\0'),
    ("ESCAPE", '\x1b'),
    ("ESC", '\x1b'),
    ("BELL", '\x07'),
];

pub(crate) fn char_from_name(name: &str) -> Option<char> {
    let upper = name.to_uppercase();
    if let Some((_, c)) = CHAR_NAMES.iter().find(|(n, _)| *n == upper) {
        return Some(*c);
    }
    let hex = upper.strip_prefix("U+").or_else(|| upper.strip_prefix('U'))?;
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

/// Printed name for characters that have one.
pub(crate) fn char_name(c: char) -> Option<&'static str> {
    match c {
        ' ' => Some("Space"),
        '\n' => Some("Newline"),
        '\t' => Some("Tab"),
        '\r' => Some("Return"),
        '\x0c' => Some("Page"),
        '\x08' => Some("Backspace"),
        '\x7f' => Some("Rubout"),
        '\0' => Some("Null"),
        '\x1b' => Some("Escape"),
        '\x07' => Some("Bell"),
        _ => None,
    }
}

fn sequence_items(v: &Value) -> Result<Vec<Value>, ControlSignal> {
    match v {
        Value::Nil | Value::Cons(_) => match v.list_to_vec() {
            Some(items) => Ok(items),
            None => reader_error(format!("Array contents {} is a dotted list", v)),
        },
        Value::Vector(items) => Ok(crate::types::read_lock(items).clone()),
        Value::String(s) => Ok(s.chars().map(Value::Char).collect()),
        other => reader_error(format!("Array contents {} is not a sequence", other)),
    }
}

fn total_size(n: u64) -> Result<usize, ControlSignal> {
    match usize::try_from(n) {
        Ok(n) if n <= ARRAY_TOTAL_SIZE_LIMIT => Ok(n),
        _ => reader_error(format!("Length {} exceeds the array size limit of {}", n, ARRAY_TOTAL_SIZE_LIMIT)),
    }
}

fn collect_array_elements(
    contents: &Value,
    dimensions: &[usize],
    out: &mut Vec<Value>,
) -> Result<(), ControlSignal> {
    let Some((first, rest)) = dimensions.split_first() else {
        out.push(contents.clone());
        return Ok(());
    };
    let items = sequence_items(contents)?;
    if items.len() != *first {
        return reader_error("Array contents do not match the inferred dimensions");
    }
    for item in &items {
        collect_array_elements(item, rest, out)?;
    }
    Ok(())
}

// ============================================================================
// Entry points
// ============================================================================

impl Interpreter {
    /// READ from a stream.
    pub fn read_from_stream(
        &mut self,
        stream: &Arc<Stream>,
        eof_error_p: bool,
        eof_value: Value,
    ) -> EvalResult {
        let mut reader = Reader::new(self, Arc::clone(stream));
        reader.read(eof_error_p, eof_value, false)
    }

    /// Read the first datum of `input`.
    pub fn read_from_string(&mut self, input: &str) -> EvalResult {
        let stream = Stream::from_string(input);
        self.read_from_stream(&stream, true, Value::Nil)
    }

    /// Read every datum in `input`.
    pub fn read_all_from_string(&mut self, input: &str) -> Result<Vec<Value>, ControlSignal> {
        let stream = Stream::from_string(input);
        let mut forms = Vec::new();
        loop {
            let form = self.read_from_stream(&stream, false, Value::Eof)?;
            if matches!(form, Value::Eof) {
                return Ok(forms);
            }
            forms.push(form);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ErrorKind;
    use crate::context::Runtime;
    use crate::printer::prin1_to_string;

    fn setup() -> Interpreter {
        Runtime::new().interpreter()
    }

    fn read_print(interp: &mut Interpreter, input: &str) -> String {
        let value = interp.read_from_string(input).unwrap();
        interp.prin1(&value)
    }

    fn read_error(interp: &mut Interpreter, input: &str) -> ErrorKind {
        match interp.read_from_string(input) {
            Err(ControlSignal::Error(c)) => c.kind(),
            Err(other) => panic!("unexpected signal {:?}", other),
            Ok(v) => panic!("expected error, read {:?}", v),
        }
    }

    #[test]
    fn test_read_integer() {
        let mut interp = setup();
        assert!(matches!(interp.read_from_string("42").unwrap(), Value::Fixnum(42)));
        assert!(matches!(interp.read_from_string("-17").unwrap(), Value::Fixnum(-17)));
        assert!(matches!(interp.read_from_string("+5").unwrap(), Value::Fixnum(5)));
        assert!(matches!(interp.read_from_string("10.").unwrap(), Value::Fixnum(10)));
        let big = interp.read_from_string("123456789012345678901234567890").unwrap();
        assert!(matches!(big, Value::Bignum(_)));
    }

    #[test]
    fn test_read_ratio_and_float() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "6/4"), "3/2");
        assert!(matches!(interp.read_from_string("4/2").unwrap(), Value::Fixnum(2)));
        assert!(matches!(interp.read_from_string("1.5").unwrap(), Value::Float(f) if f == 1.5));
        assert!(matches!(interp.read_from_string("1e3").unwrap(), Value::Float(f) if f == 1000.0));
        assert!(matches!(interp.read_from_string("-.5d0").unwrap(), Value::Float(f) if f == -0.5));
        assert_eq!(read_error(&mut interp, "1/0"), ErrorKind::ReaderError);
    }

    #[test]
    fn test_read_base() {
        let mut interp = setup();
        let base = interp.symbols().read_base.clone();
        interp.push_special(base, Value::Fixnum(16));
        assert!(matches!(interp.read_from_string("ff").unwrap(), Value::Fixnum(255)));
        assert!(matches!(interp.read_from_string("10.").unwrap(), Value::Fixnum(10)));
    }

    #[test]
    fn test_read_symbols() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "hello"), "HELLO");
        assert_eq!(read_print(&mut interp, "|Mixed Case|"), "|Mixed Case|");
        assert_eq!(read_print(&mut interp, "ab\\c"), "|ABc|");
        assert_eq!(read_print(&mut interp, ":key"), ":KEY");
        assert_eq!(read_print(&mut interp, "cl:car"), "CAR");
        assert!(interp.read_from_string("nil").unwrap().is_nil());
        assert!(interp.read_from_string("cl:nil").unwrap().is_nil());
        assert!(matches!(interp.read_from_string("|1|").unwrap(), Value::Symbol(_)));
    }

    #[test]
    fn test_package_errors() {
        let mut interp = setup();
        assert_eq!(read_error(&mut interp, "no-such-package:foo"), ErrorKind::PackageError);
        assert_eq!(read_error(&mut interp, "cl:not-a-cl-symbol-xyz"), ErrorKind::PackageError);
        let sym = interp.read_from_string("cl-user::internal-thing").unwrap();
        assert_eq!(sym.as_symbol().unwrap().package().unwrap().name(), "COMMON-LISP-USER");
    }

    #[test]
    fn test_read_lists() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "(1 2 3)"), "(1 2 3)");
        assert_eq!(read_print(&mut interp, "(a . b)"), "(A . B)");
        assert_eq!(read_print(&mut interp, "(a b . (c))"), "(A B C)");
        assert_eq!(read_print(&mut interp, "( a ; comment\n b #| block #| nested |# |# )"), "(A B)");
        assert_eq!(read_print(&mut interp, "(a .b)"), "(A .B)");
        assert_eq!(read_error(&mut interp, "(a . b c)"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "( . b)"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "(a . )"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, ")"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "(1 2"), ErrorKind::EndOfFile);
    }

    #[test]
    fn test_read_strings_and_chars() {
        let mut interp = setup();
        match interp.read_from_string("\"a\\\"b\\\\c\\n\"").unwrap() {
            Value::String(s) => assert_eq!(&*s, "a\"b\\cn"),
            other => panic!("expected string, got {:?}", other),
        }
        assert!(matches!(interp.read_from_string("#\\a").unwrap(), Value::Char('a')));
        assert!(matches!(interp.read_from_string("#\\Space").unwrap(), Value::Char(' ')));
        assert!(matches!(interp.read_from_string("#\\newline").unwrap(), Value::Char('\n')));
        assert!(matches!(interp.read_from_string("#\\(").unwrap(), Value::Char('(')));
        assert_eq!(read_error(&mut interp, "#\\bogusname"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "\"open"), ErrorKind::EndOfFile);
    }

    #[test]
    fn test_quote_family() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "'x"), "(QUOTE X)");
        assert_eq!(read_print(&mut interp, "#'car"), "(FUNCTION CAR)");
        let bq = interp.read_from_string("`(a ,b ,@c)").unwrap();
        let head = bq.car().unwrap();
        assert_eq!(head.as_symbol().unwrap(), &interp.symbols().backquote);
        assert_eq!(read_error(&mut interp, "'"), ErrorKind::EndOfFile);
    }

    #[test]
    fn test_dispatch_forms() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "#(1 2 3)"), "#(1 2 3)");
        assert_eq!(read_print(&mut interp, "#4(1 2)"), "#(1 2 2 2)");
        assert_eq!(read_print(&mut interp, "#*1011"), "#*1011");
        assert_eq!(read_print(&mut interp, "#5*10"), "#*10000");
        assert_eq!(read_print(&mut interp, "#x1F"), "31");
        assert_eq!(read_print(&mut interp, "#b-101/11"), "-5/3");
        assert_eq!(read_print(&mut interp, "#o17"), "15");
        assert_eq!(read_print(&mut interp, "#3r12"), "5");
        assert_eq!(read_print(&mut interp, "#c(1 2)"), "#C(1 2)");
        assert_eq!(read_print(&mut interp, "#c(3 0)"), "3");
        assert_eq!(read_print(&mut interp, "#p\"/tmp/x\""), "#P\"/tmp/x\"");
        assert_eq!(read_print(&mut interp, "#2a((1 2) (3 4))"), "#2A((1 2) (3 4))");
        let sym = interp.read_from_string("#:foo").unwrap();
        assert!(sym.as_symbol().unwrap().package().is_none());
        assert_eq!(read_error(&mut interp, "#c(1 a)"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "#<thing>"), ErrorKind::ReaderError);
    }

    #[test]
    fn test_dispatch_sizes_are_bounded() {
        let mut interp = setup();
        assert_eq!(read_error(&mut interp, "#1000000000000000000A nil"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "#65A nil"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "#99999999999999999999(1)"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "#100000000(1)"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "#100000000*1"), ErrorKind::ReaderError);
        assert_eq!(read_error(&mut interp, "#3A((1 2) (3 4))"), ErrorKind::ReaderError);
        assert_eq!(read_print(&mut interp, "#0A 7"), "#0A 7");
    }

    #[test]
    fn test_unknown_dispatch() {
        let mut interp = setup();
        assert_eq!(read_error(&mut interp, "#q foo"), ErrorKind::ReaderError);

        let config = crate::config::RuntimeConfig::default().with_strict_dispatch(false);
        let mut lenient = Runtime::with_config(config).interpreter();
        assert_eq!(read_print(&mut lenient, "#q foo"), "FOO");
    }

    #[test]
    fn test_feature_expressions() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "(#+common-lisp a b)"), "(A B)");
        assert_eq!(read_print(&mut interp, "(#-common-lisp a b)"), "(B)");
        assert_eq!(read_print(&mut interp, "(#+(or nope clcore) yes)"), "(YES)");
        assert_eq!(read_print(&mut interp, "(#+(and clcore (not ansi-cl)) yes no)"), "(NO)");
        assert_eq!(read_print(&mut interp, "(#+nope (unknown-pkg::x #\\bogus) z)"), "(Z)");
    }

    #[test]
    fn test_read_eval() {
        let mut interp = setup();
        assert_eq!(read_print(&mut interp, "#.(+ 1 2)"), "3");
        let read_eval = interp.symbols().read_eval.clone();
        interp.push_special(read_eval, Value::Nil);
        assert_eq!(read_error(&mut interp, "#.(+ 1 2)"), ErrorKind::ReaderError);
    }

    #[test]
    fn test_labels_share_structure() {
        let mut interp = setup();
        let v = interp.read_from_string("(#1=(x) #1#)").unwrap();
        let items = v.list_to_vec().unwrap();
        assert!(crate::types::eq(&items[0], &items[1]));

        let circular = interp.read_from_string("#1=(a . #1#)").unwrap();
        let cdr = circular.cdr().unwrap();
        assert!(crate::types::eq(&circular, &cdr));
    }

    #[test]
    fn test_readtable_case_modes() {
        let mut interp = setup();
        let rt = interp.current_readtable();
        rt.set_readtable_case(ReadtableCase::Preserve);
        assert_eq!(interp.read_from_string("Foo").unwrap().as_symbol().unwrap().name(), "Foo");
        rt.set_readtable_case(ReadtableCase::Invert);
        assert_eq!(interp.read_from_string("foo").unwrap().as_symbol().unwrap().name(), "FOO");
        assert_eq!(interp.read_from_string("FOO").unwrap().as_symbol().unwrap().name(), "foo");
        assert_eq!(interp.read_from_string("Foo").unwrap().as_symbol().unwrap().name(), "Foo");
        rt.set_readtable_case(ReadtableCase::Downcase);
        assert_eq!(interp.read_from_string("FOO").unwrap().as_symbol().unwrap().name(), "foo");
    }

    #[test]
    fn test_read_all_and_eof() {
        let mut interp = setup();
        let forms = interp.read_all_from_string("a (b) ; trailing\n 3").unwrap();
        assert_eq!(forms.len(), 3);
        let empty = interp.read_all_from_string("   ; only a comment").unwrap();
        assert!(empty.is_empty());
        assert_eq!(read_error(&mut interp, "  "), ErrorKind::EndOfFile);
    }

    #[test]
    fn test_dots_only_token() {
        let mut interp = setup();
        assert_eq!(read_error(&mut interp, "..."), ErrorKind::ReaderError);
        assert_eq!(prin1_to_string(&interp.read_from_string("a.b").unwrap(), None), "A.B");
    }
}
