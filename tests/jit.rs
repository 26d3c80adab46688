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

/// Defines a function, records its interpreted results for every probe,
/// compiles it, and checks the native results are identical.
fn assert_compile_equivalent(def: &str, name: &str, probes: &[&str]) {
    let mut rt = Runtime::new();
    eval(&mut rt, def);
    let interpreted: Vec<String> =
        probes.iter().map(|p| eval(&mut rt, p)).collect();

    eval(&mut rt, &format!("(compile {})", name));
    assert_eq!(eval(&mut rt, name), "<compiled func>");

    for (probe, expected) in probes.iter().zip(&interpreted) {
        assert_eq!(&eval(&mut rt, probe), expected, "probe `{}` diverged", probe);
    }
}

#[test]
fn compiled_add1_returns_native_results() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun add1 (x) (+ x 1))");
    eval(&mut rt, "(compile add1)");
    assert_eq!(eval(&mut rt, "(add1 41)"), "42");
    assert_eq!(eval(&mut rt, "(add1 -1)"), "0");
}

#[test]
fn compiled_tail_recursion_runs_in_bounded_stack() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun f (x) (if (eq x 0) 0 (f (- x 1))))");
    eval(&mut rt, "(compile f)");
    assert_eq!(eval(&mut rt, "(f 1000000)"), "0");
}

#[test]
fn compiled_multi_argument_recursion() {
    let mut rt = Runtime::new();
    eval(
        &mut rt,
        "(defun count-up (n acc) (if (eq n 0) acc (count-up (- n 1) (+ acc 1))))",
    );
    eval(&mut rt, "(compile count-up)");
    assert_eq!(eval(&mut rt, "(count-up 100000 0)"), "100000");
}

#[test]
fn arithmetic_equivalence() {
    assert_compile_equivalent(
        "(defun g (a b) (+ (- a b) (+ a 1) 5))",
        "g",
        &["(g 10 3)", "(g -4 7)", "(g 0 0)"],
    );
}

#[test]
fn negation_equivalence() {
    assert_compile_equivalent("(defun neg (x) (- x))", "neg", &["(neg 5)", "(neg -5)", "(neg 0)"]);
}

#[test]
fn comparison_equivalence() {
    assert_compile_equivalent(
        "(defun max2 (a b) (if (< a b) b a))",
        "max2",
        &["(max2 3 9)", "(max2 9 3)", "(max2 -1 -2)", "(max2 4 4)"],
    );
}

#[test]
fn comparison_result_materializes_outside_if() {
    assert_compile_equivalent(
        "(defun lt (a b) (< a b))",
        "lt",
        &["(lt 1 2)", "(lt 2 1)", "(lt 2 2)"],
    );
}

#[test]
fn list_access_equivalence() {
    assert_compile_equivalent(
        "(defun second (p) (car (cdr p)))",
        "second",
        &["(second '(1 2 3))", "(second '(a b))"],
    );
}

#[test]
fn progn_equivalence() {
    assert_compile_equivalent(
        "(defun pg (x) (progn 1 2 (+ x 1)))",
        "pg",
        &["(pg 41)", "(pg -1)"],
    );
}

#[test]
fn constant_body_compiles() {
    assert_compile_equivalent("(defun k () (+ 1 2 3))", "k", &["(k)"]);
}

#[test]
fn wide_constants_compile() {
    assert_compile_equivalent(
        "(defun bigk () 123456789012345)",
        "bigk",
        &["(bigk)"],
    );
}

#[test]
fn register_pressure_forces_spills() {
    assert_compile_equivalent(
        "(defun big (a b c d)
           (+ (+ (+ (+ a b) (+ c d)) (+ (+ a c) (+ b d)))
              (+ (+ (+ a d) (+ b c)) (+ (+ a a) (+ b b)))))",
        "big",
        &["(big 1 2 3 4)", "(big -5 17 0 9)"],
    );
}

#[test]
fn cross_function_calls_between_compiled_code() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun inc (x) (+ x 1))");
    eval(&mut rt, "(compile inc)");
    eval(&mut rt, "(defun twice (x) (inc (inc x)))");
    eval(&mut rt, "(compile twice)");
    assert_eq!(eval(&mut rt, "(twice 5)"), "7");
    assert_eq!(eval(&mut rt, "(twice -2)"), "0");
}

#[test]
fn later_batch_members_may_call_earlier_ones() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun inc (x) (+ x 1))");
    eval(&mut rt, "(defun plus2 (x) (inc (inc x)))");
    eval(&mut rt, "(compile inc plus2)");
    assert_eq!(eval(&mut rt, "(plus2 40)"), "42");
}

#[test]
fn compiled_callee_mixes_with_interpreted_callers() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun sq-ish (x) (+ x x))");
    eval(&mut rt, "(compile sq-ish)");
    // Interpreted call sites dispatch into native code per application.
    assert_eq!(eval(&mut rt, "(+ (sq-ish 10) (sq-ish 11))"), "42");
}

#[test]
fn freeze_resolves_symbols_without_emitting() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun h (x) (+ x 1))");
    eval(&mut rt, "(freeze h)");
    assert_eq!(eval(&mut rt, "(h 41)"), "42");
    assert_eq!(eval(&mut rt, "h"), "<func>");
}

#[test]
fn write_char_compiles() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun wc (x) (progn (write-char x) 0))");
    eval(&mut rt, "(compile wc)");
    assert_eq!(eval(&mut rt, "(wc 10)"), "0");
}

//===----------------------------------------------------------------------===//
// Failure semantics
//===----------------------------------------------------------------------===//

#[test]
fn unsupported_bodies_are_rejected_and_stay_interpreted() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun shout (x) (print x))");
    rt.rep("(compile shout)");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Compile(_))));
    // Still a plain interpreted function and still callable.
    assert_eq!(eval(&mut rt, "shout"), "<func>");
    assert_eq!(eval(&mut rt, "(progn (shout 1) 42)"), "42");
}

#[test]
fn non_tail_self_calls_are_rejected() {
    let mut rt = Runtime::new();
    eval(
        &mut rt,
        "(defun fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))",
    );
    rt.rep("(compile fib)");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Compile(_))));
    assert_eq!(eval(&mut rt, "(fib 10)"), "55");
}

#[test]
fn a_failing_batch_member_does_not_disturb_the_others() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun good (x) (+ x 1))");
    eval(&mut rt, "(defun bad (x) (print x))");
    rt.rep("(compile good bad)");
    assert_eq!(rt.errors.len(), 1);
    rt.errors.drain().count();

    assert_eq!(eval(&mut rt, "good"), "<compiled func>");
    assert_eq!(eval(&mut rt, "(good 41)"), "42");
    assert_eq!(eval(&mut rt, "bad"), "<func>");
    assert_eq!(eval(&mut rt, "(progn (bad 7) 'ok)"), "ok");
}

#[test]
fn compiling_an_unbound_name_is_an_error() {
    let mut rt = Runtime::new();
    rt.rep("(compile nothing-here)");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Undefined(_))));
}

#[test]
fn unresolved_symbols_fail_the_freeze_pass() {
    let mut rt = Runtime::new();
    eval(&mut rt, "(defun u (x) (+ x missing))");
    rt.rep("(compile u)");
    assert!(matches!(rt.errors.drain().next(), Some(Error::Compile(_))));
    assert_eq!(eval(&mut rt, "u"), "<func>");
}

//===----------------------------------------------------------------------===//
// Interaction with the collector
//===----------------------------------------------------------------------===//

#[test]
fn compiled_functions_survive_collection() {
    use ember::heap::HeapOptions;
    use ember::runtime::RuntimeOptions;

    let mut rt = Runtime::with_options(RuntimeOptions {
        heap: HeapOptions { size: 64 * 1024, stress: true, ..Default::default() },
        quiet: true,
        ..Default::default()
    });
    eval(&mut rt, "(defun add1 (x) (+ x 1))");
    eval(&mut rt, "(compile add1)");
    eval(
        &mut rt,
        "(defun churn (n) (if (eq n 0) nil (progn (cons n n) (churn (- n 1)))))",
    );
    eval(&mut rt, "(churn 200)");
    assert_eq!(eval(&mut rt, "(add1 41)"), "42");
}
