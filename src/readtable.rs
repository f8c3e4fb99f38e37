// clcore Readtables
//
// Defines syntactic character types and macro dispatch tables. A readtable
// is shared through `*READTABLE*` and mutated in place by
// SET-MACRO-CHARACTER and friends, so its tables sit behind a lock.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::function::Function;
use crate::reader::{ReadResult, Reader};
use crate::types::{read_lock, write_lock};

/// Character Syntax Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxType {
    Constituent,
    Whitespace,
    TerminatingMacro,
    NonTerminatingMacro,
    SingleEscape,   // \
    MultiEscape,    // |
}

/// Native reader macro. Takes the Reader and the triggering character.
pub type ReaderMacroFn = fn(&mut Reader<'_>, char) -> ReadResult;

/// Native dispatch macro: reader, sub-character, optional numeric argument.
pub type DispatchMacroFn = fn(&mut Reader<'_>, char, Option<u64>) -> ReadResult;

#[derive(Clone)]
pub enum MacroFunction {
    Native(ReaderMacroFn),
    Lisp(Function),
}

#[derive(Clone)]
pub enum DispatchFunction {
    Native(DispatchMacroFn),
    Lisp(Function),
}

/// Readtable case modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadtableCase {
    Upcase,
    Downcase,
    Preserve,
    Invert,
}

impl ReadtableCase {
    pub fn keyword_name(self) -> &'static str {
        match self {
            Self::Upcase => "UPCASE",
            Self::Downcase => "DOWNCASE",
            Self::Preserve => "PRESERVE",
            Self::Invert => "INVERT",
        }
    }

    pub fn from_keyword_name(name: &str) -> Option<Self> {
        match name {
            "UPCASE" => Some(Self::Upcase),
            "DOWNCASE" => Some(Self::Downcase),
            "PRESERVE" => Some(Self::Preserve),
            "INVERT" => Some(Self::Invert),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Tables {
    syntax_types: HashMap<char, SyntaxType>,
    macro_functions: HashMap<char, MacroFunction>,
    dispatch_tables: HashMap<char, HashMap<char, DispatchFunction>>,
    case_mode: ReadtableCase,
}

/// The Readtable
pub struct Readtable {
    tables: RwLock<Tables>,
}

impl Readtable {
    /// The standard syntax.
    pub fn standard() -> Self {
        let rt = Self {
            tables: RwLock::new(Tables {
                syntax_types: HashMap::new(),
                macro_functions: HashMap::new(),
                dispatch_tables: HashMap::new(),
                case_mode: ReadtableCase::Upcase,
            }),
        };

        for c in [' ', '\t', '\n', '\r', '\x0c'] {
            rt.set_syntax_type(c, SyntaxType::Whitespace);
        }

        // Escapes
        rt.set_syntax_type('\\', SyntaxType::SingleEscape);
        rt.set_syntax_type('|', SyntaxType::MultiEscape);

        // Standard macro functions
        rt.set_macro_character('(', MacroFunction::Native(macro_left_paren), false);
        rt.set_macro_character(')', MacroFunction::Native(macro_right_paren), false);
        rt.set_macro_character('"', MacroFunction::Native(macro_string), false);
        rt.set_macro_character('\'', MacroFunction::Native(macro_quote), false);
        rt.set_macro_character(';', MacroFunction::Native(macro_comment), false);
        rt.set_macro_character('`', MacroFunction::Native(macro_backquote), false);
        rt.set_macro_character(',', MacroFunction::Native(macro_comma), false);

        // Dispatch macro table
        rt.make_dispatch_macro_character('#', true);
        let standard: [(char, DispatchMacroFn); 21] = [
            ('\'', dispatch_function),
            ('(', dispatch_vector),
            ('\\', dispatch_character),
            ('+', dispatch_feature),
            ('-', dispatch_feature),
            (':', dispatch_uninterned),
            ('|', dispatch_block_comment),
            ('.', dispatch_read_eval),
            ('*', dispatch_bit_vector),
            ('A', dispatch_array),
            ('B', dispatch_radix),
            ('O', dispatch_radix),
            ('X', dispatch_radix),
            ('R', dispatch_radix),
            ('C', dispatch_complex),
            ('P', dispatch_pathname),
            ('=', dispatch_label_define),
            ('#', dispatch_label_reference),
            ('<', dispatch_unreadable),
            (')', dispatch_unreadable),
            (' ', dispatch_unreadable),
        ];
        for (sub, f) in standard {
            // Ignoring the result: '#' was just made a dispatch character.
            let _ = rt.set_dispatch_macro_character('#', sub, DispatchFunction::Native(f));
        }
        rt
    }

    /// An independent copy (COPY-READTABLE).
    pub fn copy(&self) -> Self {
        Self {
            tables: RwLock::new(read_lock(&self.tables).clone()),
        }
    }

    /// Replace this readtable's contents with another's.
    pub fn copy_into(&self, target: &Readtable) {
        let snapshot = read_lock(&self.tables).clone();
        *write_lock(&target.tables) = snapshot;
    }

    pub fn get_syntax_type(&self, c: char) -> SyntaxType {
        read_lock(&self.tables)
            .syntax_types
            .get(&c)
            .copied()
            .unwrap_or(SyntaxType::Constituent)
    }

    pub fn set_syntax_type(&self, c: char, syntax: SyntaxType) {
        write_lock(&self.tables).syntax_types.insert(c, syntax);
    }

    pub fn get_macro_character(&self, c: char) -> Option<(MacroFunction, bool)> {
        let tables = read_lock(&self.tables);
        let f = tables.macro_functions.get(&c)?.clone();
        let non_terminating = tables.syntax_types.get(&c) == Some(&SyntaxType::NonTerminatingMacro);
        Some((f, non_terminating))
    }

    pub fn set_macro_character(&self, c: char, func: MacroFunction, non_terminating: bool) {
        let mut tables = write_lock(&self.tables);
        tables.macro_functions.insert(c, func);
        tables.syntax_types.insert(
            c,
            if non_terminating {
                SyntaxType::NonTerminatingMacro
            } else {
                SyntaxType::TerminatingMacro
            },
        );
    }

    pub fn make_dispatch_macro_character(&self, c: char, non_terminating: bool) {
        self.set_macro_character(c, MacroFunction::Native(macro_dispatch), non_terminating);
        write_lock(&self.tables).dispatch_tables.entry(c).or_default();
    }

    pub fn is_dispatch_macro_character(&self, c: char) -> bool {
        read_lock(&self.tables).dispatch_tables.contains_key(&c)
    }

    /// Sub-characters are case-insensitive. Fails if `disp` is not a
    /// dispatching macro character.
    pub fn set_dispatch_macro_character(
        &self,
        disp: char,
        sub: char,
        func: DispatchFunction,
    ) -> Result<(), String> {
        let mut tables = write_lock(&self.tables);
        let table = tables
            .dispatch_tables
            .get_mut(&disp)
            .ok_or_else(|| format!("{:?} is not a dispatching macro character", disp))?;
        table.insert(sub.to_ascii_uppercase(), func);
        Ok(())
    }

    pub fn get_dispatch_macro_character(&self, disp: char, sub: char) -> Option<DispatchFunction> {
        read_lock(&self.tables)
            .dispatch_tables
            .get(&disp)
            .and_then(|t| t.get(&sub.to_ascii_uppercase()))
            .cloned()
    }

    pub fn is_whitespace(&self, c: char) -> bool {
        self.get_syntax_type(c) == SyntaxType::Whitespace
    }

    /// Ends a token.
    pub fn is_terminator(&self, c: char) -> bool {
        matches!(
            self.get_syntax_type(c),
            SyntaxType::Whitespace | SyntaxType::TerminatingMacro
        )
    }

    pub fn readtable_case(&self) -> ReadtableCase {
        read_lock(&self.tables).case_mode
    }

    pub fn set_readtable_case(&self, mode: ReadtableCase) {
        write_lock(&self.tables).case_mode = mode;
    }
}

impl Default for Readtable {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Standard macro characters
// ============================================================================

fn macro_left_paren(reader: &mut Reader<'_>, _c: char) -> ReadResult {
    reader.read_list()
}

fn macro_right_paren(reader: &mut Reader<'_>, _c: char) -> ReadResult {
    reader.unmatched_close()
}

fn macro_string(reader: &mut Reader<'_>, c: char) -> ReadResult {
    reader.read_string(c)
}

fn macro_quote(reader: &mut Reader<'_>, _c: char) -> ReadResult {
    reader.read_quote()
}

fn macro_comment(reader: &mut Reader<'_>, _c: char) -> ReadResult {
    reader.skip_line_comment()
}

fn macro_backquote(reader: &mut Reader<'_>, _c: char) -> ReadResult {
    reader.read_backquote()
}

fn macro_comma(reader: &mut Reader<'_>, _c: char) -> ReadResult {
    reader.read_comma()
}

fn macro_dispatch(reader: &mut Reader<'_>, c: char) -> ReadResult {
    reader.read_dispatch(c)
}

// ============================================================================
// Standard # dispatch functions
// ============================================================================

fn dispatch_function(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_function_quote()
}

fn dispatch_vector(reader: &mut Reader<'_>, _sub: char, arg: Option<u64>) -> ReadResult {
    reader.read_vector(arg)
}

fn dispatch_character(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_character()
}

fn dispatch_feature(reader: &mut Reader<'_>, sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_feature_conditional(sub == '+')
}

fn dispatch_uninterned(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_uninterned_symbol()
}

fn dispatch_block_comment(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.skip_block_comment()
}

fn dispatch_read_eval(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_eval_form()
}

fn dispatch_bit_vector(reader: &mut Reader<'_>, _sub: char, arg: Option<u64>) -> ReadResult {
    reader.read_bit_vector(arg)
}

fn dispatch_array(reader: &mut Reader<'_>, _sub: char, arg: Option<u64>) -> ReadResult {
    reader.read_array(arg)
}

fn dispatch_radix(reader: &mut Reader<'_>, sub: char, arg: Option<u64>) -> ReadResult {
    let radix = match sub.to_ascii_uppercase() {
        'B' => Some(2),
        'O' => Some(8),
        'X' => Some(16),
        _ => arg,
    };
    reader.read_radix(radix)
}

fn dispatch_complex(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_complex()
}

fn dispatch_pathname(reader: &mut Reader<'_>, _sub: char, _arg: Option<u64>) -> ReadResult {
    reader.read_pathname()
}

fn dispatch_label_define(reader: &mut Reader<'_>, _sub: char, arg: Option<u64>) -> ReadResult {
    reader.read_label_definition(arg)
}

fn dispatch_label_reference(reader: &mut Reader<'_>, _sub: char, arg: Option<u64>) -> ReadResult {
    reader.read_label_reference(arg)
}

fn dispatch_unreadable(reader: &mut Reader<'_>, sub: char, _arg: Option<u64>) -> ReadResult {
    reader.unreadable_object(sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_syntax() {
        let rt = Readtable::standard();
        assert!(rt.is_whitespace(' '));
        assert_eq!(rt.get_syntax_type('('), SyntaxType::TerminatingMacro);
        assert_eq!(rt.get_syntax_type('#'), SyntaxType::NonTerminatingMacro);
        assert_eq!(rt.get_syntax_type('a'), SyntaxType::Constituent);
        assert!(rt.is_terminator(')'));
        assert!(!rt.is_terminator('#'));
        assert!(rt.is_dispatch_macro_character('#'));
        assert!(rt.get_dispatch_macro_character('#', 'x').is_some());
        assert!(rt.get_dispatch_macro_character('#', 'q').is_none());
    }

    #[test]
    fn test_copy_is_independent() {
        let rt = Readtable::standard();
        let copy = rt.copy();
        copy.set_readtable_case(ReadtableCase::Preserve);
        copy.set_syntax_type('!', SyntaxType::Whitespace);
        assert_eq!(rt.readtable_case(), ReadtableCase::Upcase);
        assert!(!rt.is_whitespace('!'));
        assert!(copy.is_whitespace('!'));
    }

    #[test]
    fn test_dispatch_requires_dispatch_char() {
        let rt = Readtable::standard();
        let f = DispatchFunction::Native(dispatch_vector);
        assert!(rt.set_dispatch_macro_character('!', 'a', f.clone()).is_err());
        rt.make_dispatch_macro_character('!', false);
        assert!(rt.set_dispatch_macro_character('!', 'a', f).is_ok());
        assert!(rt.get_dispatch_macro_character('!', 'A').is_some());
    }

    #[test]
    fn test_case_keyword_names() {
        for mode in [ReadtableCase::Upcase, ReadtableCase::Downcase, ReadtableCase::Preserve, ReadtableCase::Invert] {
            assert_eq!(ReadtableCase::from_keyword_name(mode.keyword_name()), Some(mode));
        }
    }
}
