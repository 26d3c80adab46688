use ember::error::Error;
use ember::runtime::Runtime;

fn eval(rt: &mut Runtime, src: &str) -> String {
    let out = rt.rep(src);
    assert!(
        rt.errors.is_empty(),
        "unexpected errors evaluating `{}`: {:?}",
        src,
        rt.errors.drain().collect::<Vec<_>>()
    );
    out
}

#[test]
fn numbers() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "42"), "42");
    assert_eq!(eval(&mut rt, "-17"), "-17");
    assert_eq!(eval(&mut rt, "0"), "0");
}

#[test]
fn sixty_two_bit_bounds() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "2305843009213693951"), "2305843009213693951");
    assert_eq!(eval(&mut rt, "-2305843009213693952"), "-2305843009213693952");
}

#[test]
fn integer_overflow_is_a_parse_error() {
    let mut rt = Runtime::new();
    assert_eq!(rt.rep("4611686018427387904"), "nil");
    assert_eq!(
        rt.errors.drain().next(),
        Some(Error::Parse("Integer overflow".into()))
    );

    assert_eq!(rt.rep("-4611686018427387905"), "nil");
    assert_eq!(
        rt.errors.drain().next(),
        Some(Error::Parse("Integer overflow".into()))
    );
}

#[test]
fn minus_disambiguation() {
    let mut rt = Runtime::new();
    // `-` followed by a digit is a negative literal.
    assert_eq!(eval(&mut rt, "'-5"), "-5");
    // `-` alone is the subtraction operator's symbol.
    assert_eq!(eval(&mut rt, "'-"), "-");
    assert_eq!(eval(&mut rt, "(- 5)"), "-5");
    // `-` followed by anything else starts a symbol.
    assert_eq!(eval(&mut rt, "'-foo"), "-foo");
}

#[test]
fn quote_sugar() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "'x"), "x");
    assert_eq!(eval(&mut rt, "'(1 2 3)"), "(1 2 3)");
    assert_eq!(eval(&mut rt, "''x"), "(quote x)");
}

#[test]
fn comments_are_skipped() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "; a comment\n42"), "42");
    assert_eq!(eval(&mut rt, "(+ 1 ; inline\n 2)"), "3");
}

#[test]
fn symbols_are_interned_by_the_reader() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(eq 'interned 'interned)"), "t");
}

#[test]
fn adjacent_number_and_symbol_split() {
    let mut rt = Runtime::new();
    // `123abc` is the number 123 followed by the symbol abc.
    assert_eq!(rt.rep("'(123abc)"), "(123 abc)");
    assert!(rt.errors.is_empty());
}

#[test]
fn stray_close_paren_is_malformed() {
    let mut rt = Runtime::new();
    rt.rep(")");
    assert_eq!(
        rt.errors.drain().next(),
        Some(Error::Parse("Malformed input".into()))
    );
}

#[test]
fn unterminated_list_is_a_parse_error() {
    let mut rt = Runtime::new();
    rt.rep("(1 2");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Parse(_))));
}

#[test]
fn over_long_symbols_are_rejected() {
    let mut rt = Runtime::new();
    let long = "x".repeat(2000);
    rt.rep(&long);
    assert_eq!(
        rt.errors.drain().next(),
        Some(Error::Parse("Symbol name too long".into()))
    );
}

#[test]
fn multiple_expressions_per_source() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "1 2 3"), "3");
}
