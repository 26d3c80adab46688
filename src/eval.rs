use crate::error::Error;
use crate::heap::Heap;
use crate::jit;
use crate::root;
use crate::runtime::Runtime;
use crate::value::{list_len, Tag, Value, COMPILED, NIL, UNDEFINED};

//===----------------------------------------------------------------------===//
// Scopes
//
// A scope is a cons chain of bindings lists; each bindings list is a cons
// chain of (symbol . value) pairs. Function invocation pushes a fresh
// bindings list over the captured (or calling) scope.
//===----------------------------------------------------------------------===//

pub fn new_scope(heap: &mut Heap, prev: Value) -> Value {
    heap.cons(NIL, prev)
}

/// Prepends `(sym . val)` to the innermost bindings list of `scope`.
pub fn bind(heap: &mut Heap, scope: Value, sym: Value, val: Value) {
    let mut scope = scope;
    root!(heap, scope);
    let pair = heap.cons(sym, val);
    let bindings = heap.cons(pair, unsafe { scope.car() });
    unsafe { scope.set_car(bindings) };
}

/// Innermost-first search over every bindings list in the scope chain.
/// Returns the `UNDEFINED` sentinel when nothing matches; the sentinel never
/// escapes into the heap.
pub fn lookup(scope: Value, sym: Value) -> Value {
    let mut s = scope;
    while s.is_cons() {
        let mut bindings = unsafe { s.car() };
        while bindings.is_cons() {
            let pair = unsafe { bindings.car() };
            debug_assert!(pair.is_cons());
            if unsafe { pair.car() } == sym {
                return unsafe { pair.cdr() };
            }
            bindings = unsafe { bindings.cdr() };
        }
        s = unsafe { s.cdr() };
    }
    UNDEFINED
}

//===----------------------------------------------------------------------===//
// Evaluation
//===----------------------------------------------------------------------===//

/// Result of a primitive. `if` and `progn` do not evaluate their result
/// expression themselves; they hand it back as `Tail` and the application
/// loop re-dispatches without growing the host stack.
pub enum Flow {
    Value(Value),
    Tail { expr: Value, scope: Value },
}

impl Runtime {
    /// The single evaluation entry point. Numbers, builtins, functions,
    /// macros and constants evaluate to themselves; symbols to their
    /// innermost binding; cons cells to an application.
    pub fn eval(&mut self, scope: Value, expr: Value) -> Value {
        #[cfg(debug_assertions)]
        if self.stack_trace {
            println!("EVAL {}{}", ". ".repeat(self.trace_depth), expr);
            self.trace_depth += 1;
        }

        let ret = match expr.tag() {
            Tag::Symbol => {
                let v = lookup(scope, expr);
                if v.is_undefined() {
                    let name = unsafe { expr.symbol_name() }.to_string();
                    self.errors.push(Error::Undefined(name));
                    NIL
                } else {
                    v
                }
            }
            Tag::Cons => self.eval_cell(scope, expr),
            _ => expr,
        };

        #[cfg(debug_assertions)]
        if self.stack_trace {
            self.trace_depth -= 1;
            println!("RET  {}{} -> {}", ". ".repeat(self.trace_depth), expr, ret);
        }

        ret
    }

    /// Applies the head of `expr` to its arguments. Loops in place for
    /// lambda bodies and for the tail expressions `if`/`progn` hand back, so
    /// tail calls run in constant host stack.
    fn eval_cell(&mut self, scope: Value, expr: Value) -> Value {
        let mut scope = scope;
        let mut expr = expr;
        let mut ret = NIL;
        let mut callee = NIL;
        let mut param = NIL;
        let mut arg = NIL;
        let mut call_scope = NIL;
        root!(self.heap, scope, expr, ret, callee, param, arg, call_scope);

        loop {
            callee = self.eval(scope, unsafe { expr.car() });
            let mut tail: Option<(Value, Value)> = None;

            match callee.tag() {
                Tag::Macro => {
                    ret = self.expand_macro(scope, callee, unsafe { expr.cdr() });
                    ret = self.eval(scope, ret);
                }
                Tag::Builtin => {
                    let def = unsafe { callee.builtin() };
                    match (def.f)(self, scope, unsafe { expr.cdr() }) {
                        Flow::Value(v) => ret = v,
                        Flow::Tail { expr: e, scope: s } => tail = Some((e, s)),
                    }
                }
                Tag::Lambda => {
                    call_scope = new_scope(&mut self.heap, unsafe { callee.env() });
                    param = unsafe { callee.params() };
                    arg = unsafe { expr.cdr() };

                    while param.is_cons() && arg.is_cons() {
                        ret = self.eval(scope, unsafe { arg.car() });
                        bind(&mut self.heap, call_scope, unsafe { param.car() }, ret);
                        param = unsafe { param.cdr() };
                        arg = unsafe { arg.cdr() };
                    }

                    if param.is_cons() || arg.is_cons() {
                        self.arity_error(callee, expr, param.is_cons());
                        ret = NIL;
                    } else if unsafe { callee.compiled() } == COMPILED {
                        // The freshly bound arguments sit in the newest
                        // bindings list, most recent first.
                        ret = jit::invoke(callee, unsafe { call_scope.car() });
                    } else {
                        let body = unsafe { callee.body() };
                        if body.is_cons() {
                            expr = body;
                            scope = call_scope;
                            continue;
                        }
                        ret = self.eval(call_scope, body);
                    }
                }
                _ => {
                    self.errors.push(Error::NotAFunction(callee.to_string()));
                    ret = NIL;
                }
            }

            if let Some((e, s)) = tail {
                expr = e;
                scope = s;
                if expr.is_cons() {
                    continue;
                }
                // Not an application; nothing left to trampoline.
                ret = self.eval(scope, expr);
            }

            return ret;
        }
    }

    /// Binds the raw, unevaluated arguments to the macro's formals in a
    /// fresh scope over the call scope, then evaluates the macro body there.
    /// The caller evaluates the resulting form.
    pub(crate) fn expand_macro(&mut self, scope: Value, mac: Value, args: Value) -> Value {
        let mut mac = mac;
        let mut args = args;
        let mut mac_scope = scope;
        let mut param = unsafe { mac.params() };
        root!(self.heap, mac, args, mac_scope, param);

        mac_scope = new_scope(&mut self.heap, mac_scope);

        while param.is_cons() && args.is_cons() {
            bind(&mut self.heap, mac_scope, unsafe { param.car() }, unsafe {
                args.car()
            });
            param = unsafe { param.cdr() };
            args = unsafe { args.cdr() };
        }

        if args.is_cons() {
            self.errors.push(Error::Arity("Too many arguments to macro".into()));
            NIL
        } else if !args.is_nil() {
            self.errors.push(Error::Type(format!("Invalid argument type: {}", args)));
            NIL
        } else if !param.is_nil() {
            self.errors.push(Error::Arity("Not enough arguments to macro".into()));
            NIL
        } else {
            let body = unsafe { mac.body() };
            self.eval(mac_scope, body)
        }
    }

    fn arity_error(&mut self, callee: Value, expr: Value, not_enough: bool) {
        let head = unsafe { expr.car() };
        let name = if head.is_symbol() {
            unsafe { head.symbol_name() }.to_string()
        } else {
            "<func>".to_string()
        };
        let expected = list_len(unsafe { callee.params() });
        let have = list_len(unsafe { expr.cdr() });
        let which = if not_enough { "Not enough" } else { "Too many" };
        self.errors.push(Error::Arity(format!(
            "{} arguments to function '{}'. Expected {}, have {}.",
            which, name, expected, have
        )));
    }
}
