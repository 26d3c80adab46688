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
fn arithmetic() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(+ 1 2 3)"), "6");
    assert_eq!(eval(&mut rt, "(- 5 7 2)"), "-4");
    assert_eq!(eval(&mut rt, "(- 3)"), "-3");
    assert_eq!(eval(&mut rt, "(+ 40 (- 5 3))"), "42");
}

#[test]
fn comparison_and_identity() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(< 1 2)"), "t");
    assert_eq!(eval(&mut rt, "(< 2 1)"), "nil");
    assert_eq!(eval(&mut rt, "(eq 1 1)"), "t");
    assert_eq!(eval(&mut rt, "(eq 1 2)"), "nil");
    assert_eq!(eval(&mut rt, "(eq 'foo 'foo)"), "t");
    assert_eq!(eval(&mut rt, "(eq 'foo 'bar)"), "nil");
    assert_eq!(eval(&mut rt, "(eq (cons 1 2) (cons 1 2))"), "nil");
    assert_eq!(eval(&mut rt, "(define p (cons 1 2)) (eq p p)"), "t");
}

#[test]
fn list_operations() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(cons 1 2)"), "(1 . 2)");
    assert_eq!(eval(&mut rt, "(list 1 2 3)"), "(1 2 3)");
    assert_eq!(eval(&mut rt, "(car '(1 2 3))"), "1");
    assert_eq!(eval(&mut rt, "(cdr '(1 2 3))"), "(2 3)");
    assert_eq!(eval(&mut rt, "(list)"), "nil");
    assert_eq!(eval(&mut rt, "(quote (a b))"), "(a b)");
}

#[test]
fn control_flow() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(if t 1 2)"), "1");
    assert_eq!(eval(&mut rt, "(if nil 1 2)"), "2");
    assert_eq!(eval(&mut rt, "(if 0 1 2)"), "1"); // only nil is false
    assert_eq!(eval(&mut rt, "(progn 1 2 3)"), "3");
    assert_eq!(eval(&mut rt, "(progn)"), "nil");
}

#[test]
fn binding_forms() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(define x 41)"), "x");
    assert_eq!(eval(&mut rt, "(+ x 1)"), "42");
    assert_eq!(eval(&mut rt, "(defvar y 1) (+ x y)"), "42");
    assert_eq!(eval(&mut rt, "((lambda (a b) (+ a b)) 20 22)"), "42");
    assert_eq!(eval(&mut rt, "(defun add2 (n) (+ n 2)) (add2 40)"), "42");
}

#[test]
fn closures_capture_their_scope() {
    let mut rt = Runtime::new();
    let src = "
        (defun make-adder (n) (lambda (x) (+ x n)))
        (define add5 (make-adder 5))
        (add5 37)
    ";
    assert_eq!(eval(&mut rt, src), "42");
}

#[test]
fn apply_and_eval() {
    let mut rt = Runtime::new();
    assert_eq!(eval(&mut rt, "(apply + '(1 2 3))"), "6");
    assert_eq!(eval(&mut rt, "(eval ''(+ 1 2))"), "3");
}

#[test]
fn factorial() {
    let mut rt = Runtime::new();
    let src = "
        (defun mul (a b) (if (eq b 0) 0 (+ a (mul a (- b 1)))))
        (defun fact (n) (if (< n 2) 1 (mul (fact (- n 1)) n)))
        (fact 10)
    ";
    assert_eq!(eval(&mut rt, src), "3628800");
}

#[test]
fn tail_recursion_runs_in_constant_host_stack() {
    let mut rt = Runtime::new();
    let src = "
        (defun f (x) (if (eq x 0) 0 (f (- x 1))))
        (f 300000)
    ";
    assert_eq!(eval(&mut rt, src), "0");
}

#[test]
fn progn_tail_position_recurses_in_place() {
    let mut rt = Runtime::new();
    let src = "
        (defun g (x) (if (eq x 0) 'done (progn 1 (g (- x 1)))))
        (g 200000)
    ";
    assert_eq!(eval(&mut rt, src), "done");
}

#[test]
fn macros_expand_then_evaluate() {
    let mut rt = Runtime::new();
    let src = "
        (defmacro unless (c body) (list 'if c 'nil body))
        (unless nil 42)
    ";
    assert_eq!(eval(&mut rt, src), "42");
}

#[test]
fn macroexpand_returns_the_form_unevaluated() {
    let mut rt = Runtime::new();
    let src = "
        (defmacro unless (c body) (list 'if c 'nil body))
        (macroexpand unless (nil 42))
    ";
    assert_eq!(eval(&mut rt, src), "(if nil nil 42)");
}

//===----------------------------------------------------------------------===//
// Error behavior: everything is non-fatal and yields nil
//===----------------------------------------------------------------------===//

#[test]
fn undefined_symbol_yields_nil_and_an_error() {
    let mut rt = Runtime::new();
    assert_eq!(rt.rep("no-such-symbol"), "nil");
    let errs: Vec<_> = rt.errors.drain().collect();
    assert_eq!(errs, vec![Error::Undefined("no-such-symbol".into())]);
    // The runtime stays usable.
    assert_eq!(eval(&mut rt, "(+ 1 2)"), "3");
}

#[test]
fn type_errors_are_recorded() {
    let mut rt = Runtime::new();
    assert_eq!(rt.rep("(car 5)"), "nil");
    assert_eq!(rt.errors.len(), 1);
    rt.errors.drain().count();

    assert_eq!(rt.rep("(+ 1 'a)"), "nil");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Type(_))));
}

#[test]
fn arity_errors_are_recorded() {
    let mut rt = Runtime::new();
    assert_eq!(rt.rep("((lambda (x) x))"), "nil");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Arity(_))));

    assert_eq!(rt.rep("((lambda (x) x) 1 2)"), "nil");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Arity(_))));
}

#[test]
fn applying_a_non_function_is_an_error() {
    let mut rt = Runtime::new();
    assert_eq!(rt.rep("(1 2 3)"), "nil");
    assert!(matches!(rt.errors.drain().next(), Some(Error::NotAFunction(_))));
}

#[test]
fn multiple_errors_keep_insertion_order() {
    let mut rt = Runtime::new();
    rt.rep("(progn (car 1) (cdr 2))");
    let errs: Vec<_> = rt.errors.drain().collect();
    assert_eq!(errs.len(), 2);
}

#[test]
fn exit_stops_the_driver_loop() {
    let mut rt = Runtime::new();
    assert_eq!(rt.rep("(exit) (+ 1 2)"), "nil");
    assert!(!rt.running);
}
