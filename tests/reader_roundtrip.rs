mod common;

use clcore::types::equal;
use clcore::{ErrorKind, Interpreter, Value};
use common::{interpreter, read_error, read_str};
use proptest::prelude::*;

/// Read `text`, print it, and read the printed form back. Conses, strings
/// and numbers compare with EQUAL; vectors by their printed form.
fn assert_round_trip(interp: &mut Interpreter, text: &str) {
    let first = interp.read_from_string(text).unwrap();
    let printed = interp.prin1(&first);
    let second = interp.read_from_string(&printed).unwrap();
    assert_eq!(interp.prin1(&second), printed, "{:?} does not read back", text);
    if !matches!(first, Value::Vector(_)) && !printed.contains("#(") {
        assert!(equal(&first, &second), "{:?} printed as {:?} reads back differently", text, printed);
    }
}

#[test]
fn test_literal_classes_round_trip() {
    let mut interp = interpreter();
    for text in [
        "42",
        "-17",
        "123456789012345678901234567890",
        "3/4",
        "-6/8",
        "1.5",
        "1.5e10",
        "2.0d0",
        "\"say \\\"hi\\\" \\\\ there\"",
        "#\\a",
        "#\\Space",
        "#\\Newline",
        "#(1 2 3)",
        ":keyword",
        "'(quoted form)",
        "(a (b . c) #(d))",
        "#*1011",
    ] {
        assert_round_trip(&mut interp, text);
    }
}

#[test]
fn test_examples_from_reader_contract() {
    let mut interp = interpreter();
    assert_eq!(read_str(&mut interp, "#(1 2 3)"), "#(1 2 3)");
    assert_eq!(read_str(&mut interp, "#xFF"), "255");
    assert_eq!(read_str(&mut interp, "#\\Space"), "#\\Space");
    assert_eq!(read_str(&mut interp, "#b-101"), "-5");
    assert_eq!(read_str(&mut interp, "#36rZZ"), "1295");
}

#[test]
fn test_dotted_lists() {
    let mut interp = interpreter();
    let pair = interp.read_from_string("(1 . 2)").unwrap();
    assert_eq!(pair.list_length(), None);
    assert_eq!(interp.prin1(&pair.car().unwrap()), "1");
    assert_eq!(interp.prin1(&pair.cdr().unwrap()), "2");

    let chain = interp.read_from_string("(1 2 . 3)").unwrap();
    let tail = chain.cdr().unwrap();
    assert_eq!(interp.prin1(&tail.car().unwrap()), "2");
    assert_eq!(interp.prin1(&tail.cdr().unwrap()), "3");

    assert_eq!(read_error(&mut interp, "( . 2)"), ErrorKind::ReaderError);
    assert_eq!(read_error(&mut interp, "(1 . 2 3)"), ErrorKind::ReaderError);
}

#[test]
fn test_comments_are_transparent() {
    let mut interp = interpreter();
    assert_eq!(read_str(&mut interp, "(1 ;comment\n 2)"), read_str(&mut interp, "(1 2)"));
    assert_eq!(read_str(&mut interp, "(1 #| block #| nested |# |# 2)"), "(1 2)");
    assert_eq!(read_str(&mut interp, "; leading\n sym"), "SYM");
}

#[test]
fn test_unbalanced_input() {
    let mut interp = interpreter();
    assert_eq!(read_error(&mut interp, "(1 2"), ErrorKind::EndOfFile);
    assert_eq!(read_error(&mut interp, ")"), ErrorKind::ReaderError);
    assert_eq!(read_error(&mut interp, "\"open"), ErrorKind::EndOfFile);
}

#[test]
fn test_circular_label() {
    let mut interp = interpreter();
    let v = interp.eval_string("(let ((x '#1=(a . #1#))) (eq x (cdr x)))").unwrap();
    assert_eq!(interp.prin1(&v), "T");
}

proptest! {
    #[test]
    fn prop_integers_round_trip(n in any::<i64>()) {
        let mut interp = interpreter();
        prop_assert_eq!(read_str(&mut interp, &n.to_string()), n.to_string());
    }

    #[test]
    fn prop_big_integers_round_trip(digits in "[1-9][0-9]{18,40}") {
        let mut interp = interpreter();
        prop_assert_eq!(read_str(&mut interp, &digits), digits);
    }

    #[test]
    fn prop_ratios_round_trip(n in -10_000i64..10_000, d in 1i64..10_000) {
        let mut interp = interpreter();
        assert_round_trip(&mut interp, &format!("{}/{}", n, d));
    }

    #[test]
    fn prop_strings_round_trip(s in "[ -~]{0,24}") {
        let mut interp = interpreter();
        let printed = interp.prin1(&Value::string(s.as_str()));
        let back = interp.read_from_string(&printed).unwrap();
        prop_assert_eq!(interp.princ(&back), s);
    }

    #[test]
    fn prop_characters_round_trip(c in prop::char::range('!', '~')) {
        let mut interp = interpreter();
        let printed = interp.prin1(&Value::Char(c));
        let back = interp.read_from_string(&printed).unwrap();
        prop_assert!(matches!(back, Value::Char(x) if x == c));
    }
}
