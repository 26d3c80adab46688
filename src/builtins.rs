use std::fs;
use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::eval::{bind, Flow};
use crate::reader::{Read, Reader};
use crate::root;
use crate::runtime::Runtime;
use crate::value::{is_list_of, reverse, Tag, Value, NIL, TRUE};

//===----------------------------------------------------------------------===//
// Builtins
//
// The closed set of primitives. A builtin heap object stores a pointer into
// the static `BUILTINS` table below, which gives the JIT validity check a
// reliable identity for each primitive without comparing function pointers.
//
// Every primitive enforces its own arity and argument types; a violation
// records an error and yields nil.
//===----------------------------------------------------------------------===//

pub type BuiltinFn = fn(&mut Runtime, Value, Value) -> Flow;

/// Which primitive a table entry is. The JIT compiles the subset
/// {Add, Sub, Less, Eq, Car, Cdr, If, Progn, WriteChar}.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Prim {
    Add,
    Sub,
    Less,
    Eq,
    Cons,
    Car,
    Cdr,
    List,
    If,
    Progn,
    Quote,
    Eval,
    Apply,
    Define,
    Defun,
    Lambda,
    Defmacro,
    Macroexpand,
    Print,
    WriteChar,
    Rand,
    Sleep,
    Load,
    Exit,
    Freeze,
    Compile,
    Debug,
}

pub struct BuiltinDef {
    pub name: &'static str,
    pub kind: Prim,
    pub f: BuiltinFn,
}

macro_rules! expect_args {
    ($rt:expr, $args:expr, $n:expr, $msg:expr) => {
        if !is_list_of($args, $n) {
            $rt.errors.push(Error::Arity($msg.to_string()));
            return Flow::Value(NIL);
        }
    };
}

unsafe fn cadr(v: Value) -> Value {
    v.cdr().car()
}

unsafe fn caddr(v: Value) -> Value {
    v.cdr().cdr().car()
}

//===----------------------------------------------------------------------===//
// Arithmetic and comparison
//===----------------------------------------------------------------------===//

/// `(+ x ...)`: integer sum. Wraps on 62-bit overflow.
fn add(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    if !args.is_cons() {
        rt.errors.push(Error::Arity("Not enough arguments to '+'.".into()));
        return Flow::Value(NIL);
    }

    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);
    let mut sum = 0i64;

    while args.is_cons() {
        let v = rt.eval(scope, unsafe { args.car() });
        if !v.is_number() {
            rt.errors.push(Error::Type("Not a number".into()));
            return Flow::Value(NIL);
        }
        sum = sum.wrapping_add(v.as_number());
        args = unsafe { args.cdr() };
    }

    Flow::Value(Value::number(sum))
}

/// `(- x)`: negation. `(- x y ...)`: left-fold subtraction.
fn sub(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    if !args.is_cons() {
        rt.errors.push(Error::Arity("Not enough arguments to '-'.".into()));
        return Flow::Value(NIL);
    }

    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);

    let v = rt.eval(scope, unsafe { args.car() });
    if !v.is_number() {
        rt.errors.push(Error::Type("Not a number".into()));
        return Flow::Value(NIL);
    }
    let mut acc = v.as_number();
    args = unsafe { args.cdr() };

    if !args.is_cons() {
        acc = acc.wrapping_neg();
    } else {
        while args.is_cons() {
            let v = rt.eval(scope, unsafe { args.car() });
            if !v.is_number() {
                rt.errors.push(Error::Type("Not a number".into()));
                return Flow::Value(NIL);
            }
            acc = acc.wrapping_sub(v.as_number());
            args = unsafe { args.cdr() };
        }
    }

    Flow::Value(Value::number(acc))
}

/// `(< a b)`: t iff a < b.
fn less(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "< expects exactly two arguments");

    let mut scope = scope;
    let mut args = args;
    let mut lhs = NIL;
    root!(rt.heap, scope, args, lhs);

    lhs = rt.eval(scope, unsafe { args.car() });
    let rhs = rt.eval(scope, unsafe { cadr(args) });
    if !lhs.is_number() || !rhs.is_number() {
        rt.errors.push(Error::Type("'<' compares numbers".into()));
        return Flow::Value(NIL);
    }

    Flow::Value(if lhs.as_number() < rhs.as_number() { TRUE } else { NIL })
}

/// `(eq a b)`: word identity. Numbers compare by value and symbols by name
/// because both are canonical; two distinct cons cells are never eq.
fn eq(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "eq takes exactly two arguments");

    let mut scope = scope;
    let mut args = args;
    let mut lhs = NIL;
    root!(rt.heap, scope, args, lhs);

    lhs = rt.eval(scope, unsafe { args.car() });
    let rhs = rt.eval(scope, unsafe { cadr(args) });

    Flow::Value(if lhs == rhs { TRUE } else { NIL })
}

//===----------------------------------------------------------------------===//
// List operations
//===----------------------------------------------------------------------===//

fn cons(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "cons takes exactly two arguments");

    let mut scope = scope;
    let mut args = args;
    let mut head = NIL;
    root!(rt.heap, scope, args, head);

    head = rt.eval(scope, unsafe { args.car() });
    let tail = rt.eval(scope, unsafe { cadr(args) });

    Flow::Value(rt.heap.cons(head, tail))
}

fn car(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "car takes a list as its argument");

    let v = rt.eval(scope, unsafe { args.car() });
    if !v.is_cons() {
        rt.errors.push(Error::Type("Evaluation did not produce a list".into()));
        return Flow::Value(NIL);
    }
    Flow::Value(unsafe { v.car() })
}

fn cdr(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "cdr takes a list as its argument");

    let v = rt.eval(scope, unsafe { args.car() });
    if !v.is_cons() {
        rt.errors.push(Error::Type("Evaluation did not produce a list".into()));
        return Flow::Value(NIL);
    }
    Flow::Value(unsafe { v.cdr() })
}

/// `(list ...)`: evaluates the arguments left to right and builds a fresh
/// list of the results.
fn list(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    let mut scope = scope;
    let mut args = args;
    let mut acc = NIL;
    let mut item = NIL;
    root!(rt.heap, scope, args, acc, item);

    while args.is_cons() {
        item = rt.eval(scope, unsafe { args.car() });
        acc = rt.heap.cons(item, acc);
        args = unsafe { args.cdr() };
    }

    Flow::Value(unsafe { reverse(acc) })
}

//===----------------------------------------------------------------------===//
// Control
//===----------------------------------------------------------------------===//

/// `(if c t e)`: evaluates the condition here, but hands the chosen branch
/// back to the application loop so it runs in tail position.
fn if_(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 3, "if takes exactly three arguments");

    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);

    let cond = rt.eval(scope, unsafe { args.car() });
    let branch = if !cond.is_nil() {
        unsafe { cadr(args) }
    } else {
        unsafe { caddr(args) }
    };

    Flow::Tail { expr: branch, scope }
}

/// `(progn ...)`: evaluates the forms in order; only the last is in tail
/// position.
fn progn(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);

    while args.is_cons() && unsafe { args.cdr() }.is_cons() {
        let _ = rt.eval(scope, unsafe { args.car() });
        args = unsafe { args.cdr() };
    }

    if args.is_cons() {
        Flow::Tail { expr: unsafe { args.car() }, scope }
    } else {
        Flow::Value(NIL)
    }
}

fn quote(rt: &mut Runtime, _scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "Quote takes exactly one argument");
    Flow::Value(unsafe { args.car() })
}

/// `(eval x)`: evaluates x, then evaluates the result.
fn eval_(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "eval takes exactly one argument");

    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);

    let form = rt.eval(scope, unsafe { args.car() });
    Flow::Value(rt.eval(scope, form))
}

/// `(apply f args)`: evaluates both, then applies f to the argument list by
/// building the call form and evaluating it.
fn apply(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "apply takes exactly two arguments");

    let mut scope = scope;
    let mut args = args;
    let mut func = NIL;
    root!(rt.heap, scope, args, func);

    func = rt.eval(scope, unsafe { args.car() });
    let func_args = rt.eval(scope, unsafe { cadr(args) });

    if !func_args.is_nil() && !func_args.is_cons() {
        rt.errors.push(Error::Type("Arguments for apply are not a list".into()));
        return Flow::Value(NIL);
    }

    let call = rt.heap.cons(func, func_args);
    Flow::Value(rt.eval(scope, call))
}

//===----------------------------------------------------------------------===//
// Binding forms
//===----------------------------------------------------------------------===//

/// `(define name v)` and its alias `defvar`: binds in the current scope and
/// returns the name.
fn define(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "define takes exactly two arguments");

    let name = unsafe { args.car() };
    if !name.is_symbol() {
        rt.errors.push(Error::Type("First argument is not a symbol".into()));
        return Flow::Value(NIL);
    }

    let mut scope = scope;
    let mut args = args;
    let mut name = name;
    root!(rt.heap, scope, args, name);

    let value = rt.eval(scope, unsafe { cadr(args) });
    bind(&mut rt.heap, scope, name, value);
    Flow::Value(name)
}

fn defun(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 3, "defun takes exactly three arguments");

    let mut scope = scope;
    let mut name = unsafe { args.car() };
    let mut func = NIL;
    root!(rt.heap, scope, name, func);

    func = rt.heap.make_function(
        unsafe { cadr(args) },
        unsafe { caddr(args) },
        scope,
        Tag::Lambda,
    );
    bind(&mut rt.heap, scope, name, func);
    Flow::Value(func)
}

fn lambda(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "lambda takes exactly two arguments");

    let params = unsafe { args.car() };
    let body = unsafe { cadr(args) };
    Flow::Value(rt.heap.make_function(params, body, scope, Tag::Lambda))
}

fn defmacro(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 3, "defmacro takes exactly three arguments");

    let mut scope = scope;
    let mut name = unsafe { args.car() };
    let mut func = NIL;
    root!(rt.heap, scope, name, func);

    func = rt.heap.make_function(
        unsafe { cadr(args) },
        unsafe { caddr(args) },
        scope,
        Tag::Macro,
    );
    bind(&mut rt.heap, scope, name, func);
    Flow::Value(func)
}

/// `(macroexpand m arg)`: expands without evaluating the result.
fn macroexpand(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 2, "macroexpand takes exactly two arguments");

    if !unsafe { args.car() }.is_symbol() {
        rt.errors.push(Error::Type("First argument is not a symbol".into()));
        return Flow::Value(NIL);
    }

    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);

    let mac = rt.eval(scope, unsafe { args.car() });
    if mac.tag() != Tag::Macro {
        let name = unsafe { args.car().symbol_name() }.to_string();
        rt.errors.push(Error::Type(format!("{} is not a macro", name)));
        return Flow::Value(NIL);
    }

    Flow::Value(rt.expand_macro(scope, mac, unsafe { cadr(args) }))
}

//===----------------------------------------------------------------------===//
// I/O and OS glue
//===----------------------------------------------------------------------===//

fn print(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    let mut scope = scope;
    let mut args = args;
    root!(rt.heap, scope, args);

    while args.is_cons() {
        let v = rt.eval(scope, unsafe { args.car() });
        println!("{}", v);
        args = unsafe { args.cdr() };
    }

    Flow::Value(NIL)
}

/// `(write-char x)`: a number writes the byte, a symbol writes its name.
fn write_char(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "'write-char' takes exactly one argument.");

    let v = rt.eval(scope, unsafe { args.car() });
    let mut out = std::io::stdout();
    match v.tag() {
        Tag::Number => {
            let _ = out.write_all(&[v.as_number() as u8]);
        }
        Tag::Symbol => {
            let _ = out.write_all(unsafe { v.symbol_name() }.as_bytes());
        }
        _ => {
            rt.errors.push(Error::Type(
                "'write-char' takes a symbol or a number as its argument.".into(),
            ));
        }
    }

    Flow::Value(NIL)
}

fn rand_(_rt: &mut Runtime, _scope: Value, _args: Value) -> Flow {
    Flow::Value(Value::number(rand::random::<u32>() as i64))
}

/// `(sleep ms)`: blocks the interpreter; there is nothing else to schedule.
fn sleep(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "sleep takes exactly one argument");

    let v = rt.eval(scope, unsafe { args.car() });
    if !v.is_number() {
        rt.errors.push(Error::Type("sleep takes a number of milliseconds".into()));
        return Flow::Value(NIL);
    }
    thread::sleep(Duration::from_millis(v.as_number().max(0) as u64));
    Flow::Value(NIL)
}

/// `(load file)`: reads and evaluates every form in the named file. The
/// argument is an unevaluated symbol; there is no string type.
fn load(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "load takes exactly one argument");

    let name = unsafe { args.car() };
    if !name.is_symbol() {
        rt.errors.push(Error::Type("First argument is not a symbol".into()));
        return Flow::Value(NIL);
    }

    let path = unsafe { name.symbol_name() }.to_string();
    let src = match fs::read_to_string(&path) {
        Ok(src) => src,
        Err(e) => {
            rt.errors.push(Error::Io(format!("Failed to open file: {}", e)));
            return Flow::Value(NIL);
        }
    };

    let mut scope = scope;
    root!(rt.heap, scope);

    let mut reader = Reader::new(&src);
    loop {
        match reader.read(rt) {
            Read::Eof => break,
            Read::Malformed => {
                rt.errors.push(Error::Parse("Malformed input".into()));
                break;
            }
            Read::Expr(expr) => {
                let v = rt.eval(scope, expr);
                if !rt.quiet {
                    println!("{}", v);
                }
                if !rt.running {
                    break;
                }
            }
        }
    }

    Flow::Value(NIL)
}

fn exit(rt: &mut Runtime, _scope: Value, _args: Value) -> Flow {
    rt.running = false;
    Flow::Value(NIL)
}

#[cfg(debug_assertions)]
fn debug(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    expect_args!(rt, args, 1, "debug takes exactly one argument");
    let v = rt.eval(scope, unsafe { args.car() });
    rt.stack_trace = !v.is_nil();
    Flow::Value(NIL)
}

#[cfg(not(debug_assertions))]
fn debug(rt: &mut Runtime, _scope: Value, _args: Value) -> Flow {
    rt.errors.push(Error::Type("debug is not usable in release mode".into()));
    Flow::Value(NIL)
}

//===----------------------------------------------------------------------===//
// Compilation hooks
//===----------------------------------------------------------------------===//

fn freeze(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    rt.jit_freeze(scope, args);
    Flow::Value(NIL)
}

fn compile(rt: &mut Runtime, scope: Value, args: Value) -> Flow {
    rt.jit_compile(scope, args);
    Flow::Value(NIL)
}

//===----------------------------------------------------------------------===//
// The table
//===----------------------------------------------------------------------===//

pub static BUILTINS: &[BuiltinDef] = &[
    BuiltinDef { name: "+", kind: Prim::Add, f: add },
    BuiltinDef { name: "-", kind: Prim::Sub, f: sub },
    BuiltinDef { name: "<", kind: Prim::Less, f: less },
    BuiltinDef { name: "eq", kind: Prim::Eq, f: eq },
    BuiltinDef { name: "cons", kind: Prim::Cons, f: cons },
    BuiltinDef { name: "car", kind: Prim::Car, f: car },
    BuiltinDef { name: "cdr", kind: Prim::Cdr, f: cdr },
    BuiltinDef { name: "list", kind: Prim::List, f: list },
    BuiltinDef { name: "if", kind: Prim::If, f: if_ },
    BuiltinDef { name: "progn", kind: Prim::Progn, f: progn },
    BuiltinDef { name: "quote", kind: Prim::Quote, f: quote },
    BuiltinDef { name: "eval", kind: Prim::Eval, f: eval_ },
    BuiltinDef { name: "apply", kind: Prim::Apply, f: apply },
    BuiltinDef { name: "define", kind: Prim::Define, f: define },
    BuiltinDef { name: "defvar", kind: Prim::Define, f: define },
    BuiltinDef { name: "defun", kind: Prim::Defun, f: defun },
    BuiltinDef { name: "lambda", kind: Prim::Lambda, f: lambda },
    BuiltinDef { name: "defmacro", kind: Prim::Defmacro, f: defmacro },
    BuiltinDef { name: "macroexpand", kind: Prim::Macroexpand, f: macroexpand },
    BuiltinDef { name: "print", kind: Prim::Print, f: print },
    BuiltinDef { name: "write-char", kind: Prim::WriteChar, f: write_char },
    BuiltinDef { name: "rand", kind: Prim::Rand, f: rand_ },
    BuiltinDef { name: "sleep", kind: Prim::Sleep, f: sleep },
    BuiltinDef { name: "load", kind: Prim::Load, f: load },
    BuiltinDef { name: "exit", kind: Prim::Exit, f: exit },
    BuiltinDef { name: "freeze", kind: Prim::Freeze, f: freeze },
    BuiltinDef { name: "compile", kind: Prim::Compile, f: compile },
    BuiltinDef { name: "debug", kind: Prim::Debug, f: debug },
];
