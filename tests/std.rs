use ember::runtime::{Runtime, RuntimeOptions};

fn std_runtime() -> Runtime {
    let mut rt =
        Runtime::with_options(RuntimeOptions { quiet: true, ..Default::default() });
    rt.rep("(load lisp/std.lisp)");
    assert!(
        rt.errors.is_empty(),
        "loading std failed: {:?}",
        rt.errors.drain().collect::<Vec<_>>()
    );
    rt
}

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
fn multiplication() {
    let mut rt = std_runtime();
    assert_eq!(eval(&mut rt, "(mul 7 6)"), "42");
    assert_eq!(eval(&mut rt, "(mul 7 -6)"), "-42");
    assert_eq!(eval(&mut rt, "(mul 0 100)"), "0");
}

#[test]
fn factorial_of_ten() {
    let mut rt = std_runtime();
    assert_eq!(eval(&mut rt, "(fact 10)"), "3628800");
}

#[test]
fn factorial_is_tail_recursive() {
    // The value wraps, but the point is that it finishes without growing
    // the host stack.
    let mut rt = std_runtime();
    eval(&mut rt, "(fact 1000)");
}

#[test]
fn list_utilities() {
    let mut rt = std_runtime();
    assert_eq!(eval(&mut rt, "(len '(1 2 3))"), "3");
    assert_eq!(eval(&mut rt, "(append '(1 2) '(3 4))"), "(1 2 3 4)");
    assert_eq!(eval(&mut rt, "(reverse '(1 2 3))"), "(3 2 1)");
    assert_eq!(eval(&mut rt, "(nth 2 '(a b c d))"), "c");
    assert_eq!(eval(&mut rt, "(not nil)"), "t");
    assert_eq!(eval(&mut rt, "(not 5)"), "nil");
}

#[test]
fn std_functions_are_compilable() {
    let mut rt = std_runtime();
    eval(&mut rt, "(compile mul-acc mul fact-acc)");
    assert_eq!(eval(&mut rt, "mul-acc"), "<compiled func>");
    assert_eq!(eval(&mut rt, "fact-acc"), "<compiled func>");
    assert_eq!(eval(&mut rt, "(mul 7 6)"), "42");
    assert_eq!(eval(&mut rt, "(fact 10)"), "3628800");
    // Large inputs run in bounded stack once the accumulator loops are
    // native.
    eval(&mut rt, "(fact 10000)");
}
