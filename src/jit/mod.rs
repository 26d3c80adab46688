//! Native-code compilation of selected functions.
//!
//! `(freeze f ...)` runs symbol resolution alone; `(compile f ...)` runs the
//! whole pipeline per function:
//!
//! 1. resolve symbols in the body in place (formals stay symbols, the
//!    function's own name becomes a direct self-reference),
//! 2. lower to the bite tree, which doubles as the validity check,
//! 3. fold literal arithmetic,
//! 4. run the register-requirement pass,
//! 5. emit x86-64 into a writable page, patch the prologue, flip the page
//!    executable, and store the entry address in the function's body slot.
//!
//! Any failure rolls the function back to its previous state, records one
//! error, and the batch moves on. Functions compile in argument order, so a
//! later function may call an earlier one from the same batch.

mod bite;
mod code;
mod codegen;
mod emit;

use std::fmt;
use std::io::Write;

use smallvec::{smallvec, SmallVec};

pub use code::{CodePage, CODE_PAGE_SIZE};

use crate::builtins::Prim;
use crate::error::Error;
use crate::eval::lookup;
use crate::root;
use crate::runtime::Runtime;
use crate::value::{list_len, Tag, Value, COMPILED, NIL, SYMBOLS_RESOLVED};

#[derive(Debug, Clone)]
pub enum JitError {
    UnresolvedSymbol(String),
    NonTailSelfCall,
    UnsupportedForm(String),
    UnsupportedPrimitive(Prim),
    BadArity(String),
    CodeTooLarge,
    Os(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JitError::UnresolvedSymbol(name) => write!(f, "unresolved symbol '{}'", name),
            JitError::NonTailSelfCall => {
                write!(f, "self-call outside tail position")
            }
            JitError::UnsupportedForm(what) => write!(f, "unsupported form: {}", what),
            JitError::UnsupportedPrimitive(p) => {
                write!(f, "primitive {:?} is not compilable", p)
            }
            JitError::BadArity(msg) => write!(f, "{}", msg),
            JitError::CodeTooLarge => write!(f, "emitted code exceeds the code page"),
            JitError::Os(msg) => write!(f, "{}", msg),
        }
    }
}

//===----------------------------------------------------------------------===//
// Dispatch
//===----------------------------------------------------------------------===//

/// Compiled functions receive a pointer to their evaluated-argument array
/// and return the result value. Arguments may be overwritten in place by a
/// tail self-call.
pub type JitFn = unsafe extern "C" fn(*mut Value) -> Value;

type HostFn = extern "C" fn(usize) -> usize;

/// Invokes a compiled function. `bindings` is the freshly bound argument
/// list, most recently bound first; the values are copied into a contiguous
/// array in declaration order. Emitted code never allocates, so the array
/// needs no rooting.
pub fn invoke(func: Value, bindings: Value) -> Value {
    let n = list_len(unsafe { func.params() });
    let mut argv: SmallVec<[Value; 8]> = smallvec![NIL; n];

    let mut b = bindings;
    let mut i = n;
    while b.is_cons() && i > 0 {
        i -= 1;
        let pair = unsafe { b.car() };
        argv[i] = unsafe { pair.cdr() };
        b = unsafe { b.cdr() };
    }

    let entry = unsafe { func.body() }.raw() as *const u8;
    let f: JitFn = unsafe { std::mem::transmute(entry) };
    unsafe { f(argv.as_mut_ptr()) }
}

/// Host helper behind the write-char bite. Mirrors the interpreter's
/// primitive for the argument kinds the validity check lets through.
pub extern "C" fn native_write_char(word: usize) -> usize {
    let v = Value::from_raw(word);
    let mut out = std::io::stdout();
    match v.tag() {
        Tag::Number => {
            let _ = out.write_all(&[v.as_number() as u8]);
        }
        Tag::Symbol => {
            let _ = out.write_all(unsafe { v.symbol_name() }.as_bytes());
        }
        _ => {}
    }
    NIL.raw()
}

//===----------------------------------------------------------------------===//
// Symbol resolution
//===----------------------------------------------------------------------===//

fn is_param(params: Value, sym: Value) -> bool {
    let mut p = params;
    while p.is_cons() {
        if unsafe { p.car() } == sym {
            return true;
        }
        p = unsafe { p.cdr() };
    }
    false
}

/// Rewrites every symbol in the tree to the value it currently resolves to,
/// in place. Formal parameters stay symbols; the function's own name becomes
/// the function itself so lowering can detect recursion. Allocates nothing.
fn resolve_tree(
    scope: Value,
    fname: Value,
    self_val: Value,
    params: Value,
    expr: Value,
) -> Result<Value, JitError> {
    match expr.tag() {
        Tag::Symbol => {
            if is_param(params, expr) {
                return Ok(expr);
            }
            if expr == fname {
                return Ok(self_val);
            }
            let v = lookup(scope, expr);
            if v.is_undefined() {
                Err(JitError::UnresolvedSymbol(
                    unsafe { expr.symbol_name() }.to_string(),
                ))
            } else {
                Ok(v)
            }
        }
        Tag::Cons => {
            let mut cell = expr;
            while cell.is_cons() {
                let resolved =
                    resolve_tree(scope, fname, self_val, params, unsafe { cell.car() })?;
                unsafe { cell.set_car(resolved) };
                cell = unsafe { cell.cdr() };
            }
            Ok(expr)
        }
        _ => Ok(expr),
    }
}

//===----------------------------------------------------------------------===//
// Batch driver
//===----------------------------------------------------------------------===//

impl Runtime {
    pub(crate) fn jit_freeze(&mut self, scope: Value, args: Value) {
        self.compile_batch(scope, args, false);
    }

    pub(crate) fn jit_compile(&mut self, scope: Value, args: Value) {
        self.compile_batch(scope, args, true);
    }

    /// Processes each named function independently: one failure records an
    /// error and rolls that function back, while the rest of the batch
    /// proceeds.
    fn compile_batch(&mut self, scope: Value, args: Value, emit: bool) {
        let mut scope = scope;
        let mut args = args;
        root!(self.heap, scope, args);

        while args.is_cons() {
            let name = unsafe { args.car() };
            args = unsafe { args.cdr() };

            if !name.is_symbol() {
                self.errors.push(Error::Compile("Argument is not a symbol".into()));
                continue;
            }
            let name_str = unsafe { name.symbol_name() }.to_string();

            let func = lookup(scope, name);
            if func.is_undefined() {
                self.errors.push(Error::Undefined(name_str));
                continue;
            }
            if func.tag() != Tag::Lambda {
                self.errors.push(Error::Compile(format!(
                    "Symbol '{}' does not point to a function",
                    name_str
                )));
                continue;
            }
            if unsafe { func.compiled() } == COMPILED {
                continue;
            }

            let prev = unsafe { func.compiled() };
            if let Err(e) = self.compile_one(scope, name, func, emit) {
                unsafe { func.set_compiled(prev) };
                self.errors.push(Error::Compile(format!(
                    "Cannot compile '{}': {}",
                    name_str, e
                )));
            }
        }
    }

    fn compile_one(
        &mut self,
        scope: Value,
        name: Value,
        func: Value,
        emit: bool,
    ) -> Result<(), JitError> {
        let params = unsafe { func.params() };
        let body = unsafe { func.body() };

        let resolved = resolve_tree(scope, name, func, params, body)?;
        unsafe {
            func.set_body(resolved);
            func.set_compiled(SYMBOLS_RESOLVED);
        }
        if !emit {
            return Ok(());
        }

        let mut param_syms = Vec::new();
        let mut p = params;
        while p.is_cons() {
            param_syms.push(unsafe { p.car() });
            p = unsafe { p.cdr() };
        }

        let ctx = bite::LowerCtx { params: param_syms, self_val: func };
        let mut tree = bite::lower(&ctx, unsafe { func.body() }, true)?;
        bite::fold_constants(&mut tree);
        bite::assign_need(&mut tree, true);

        let mut page = CodePage::new(CODE_PAGE_SIZE)?;
        let write_char = native_write_char as HostFn as usize;
        let len = codegen::CodeGen::new(page.as_mut_slice(), write_char).function(&mut tree)?;
        page.protect_exec()?;

        if self.stack_trace {
            println!(
                "compiled '{}': {} bytes at {:p}",
                unsafe { name.symbol_name() },
                len,
                page.entry()
            );
        }

        unsafe {
            func.set_body(Value::from_raw(page.entry() as usize));
            func.set_compiled(COMPILED);
        }
        self.jit_pages.push(page);
        Ok(())
    }
}
