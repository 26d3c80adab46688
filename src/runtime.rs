use crate::builtins::BUILTINS;
use crate::error::{Error, ErrorLog};
use crate::eval::{bind, new_scope};
use crate::heap::{Heap, HeapOptions};
use crate::jit::CodePage;
use crate::reader::{Read, Reader};
use crate::root;
use crate::value::{NIL, TRUE};

//===----------------------------------------------------------------------===//
// Runtime
//
// Owns the heap, the pending-error ring, and the registry of executable
// pages. Strictly single-threaded: evaluation, collection and compilation
// all run on the caller's thread, and every allocation is a potential
// collection point.
//===----------------------------------------------------------------------===//

#[derive(Default)]
pub struct RuntimeOptions {
    pub heap: HeapOptions,
    pub quiet: bool,
    pub echo: bool,
}

pub struct Runtime {
    pub heap: Heap,
    pub errors: ErrorLog,
    /// Executable pages, freed when the runtime drops.
    pub(crate) jit_pages: Vec<CodePage>,
    /// Cleared by `(exit)`; the driver loop finishes its current form and
    /// stops.
    pub running: bool,
    pub quiet: bool,
    pub echo: bool,
    pub stack_trace: bool,
    #[cfg(debug_assertions)]
    pub(crate) trace_depth: usize,
}

impl Runtime {
    pub fn new() -> Runtime {
        Self::with_options(RuntimeOptions::default())
    }

    pub fn with_options(opts: RuntimeOptions) -> Runtime {
        let mut rt = Runtime {
            heap: Heap::new(opts.heap),
            errors: ErrorLog::new(),
            jit_pages: Vec::new(),
            running: true,
            quiet: opts.quiet,
            echo: opts.echo,
            stack_trace: false,
            #[cfg(debug_assertions)]
            trace_depth: 0,
        };
        rt.install_globals();
        rt
    }

    /// Builds the outermost scope: the constants nil and t, then one
    /// builtin object per entry in the primitives table.
    fn install_globals(&mut self) {
        self.heap.globals = new_scope(&mut self.heap, NIL);

        let nil_sym = self.heap.intern("nil");
        let globals = self.heap.globals;
        bind(&mut self.heap, globals, nil_sym, NIL);

        let t_sym = self.heap.intern("t");
        let globals = self.heap.globals;
        bind(&mut self.heap, globals, t_sym, TRUE);

        for def in BUILTINS {
            let mut builtin = self.heap.make_builtin(def);
            root!(self.heap, builtin);
            let sym = self.heap.intern(def.name);
            let globals = self.heap.globals;
            bind(&mut self.heap, globals, sym, builtin);
        }
    }

    /// Reads and evaluates every form in `src` against the global scope and
    /// returns the last value's printed form. The error ring is left for
    /// the caller to inspect or drain.
    pub fn rep(&mut self, src: &str) -> String {
        let mut last = String::from("nil");
        let mut reader = Reader::new(src);
        loop {
            match reader.read(self) {
                Read::Eof => break,
                Read::Malformed => {
                    self.errors.push(Error::Parse("Malformed input".into()));
                    break;
                }
                Read::Expr(expr) => {
                    let globals = self.heap.globals;
                    let value = self.eval(globals, expr);
                    last = value.to_string();
                    if !self.running {
                        break;
                    }
                }
            }
        }
        last
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rep_evaluates_a_form() {
        let mut rt = Runtime::new();
        assert_eq!(rt.rep("(+ 1 2 3)"), "6");
        assert!(rt.errors.is_empty());
    }

    #[test]
    fn rep_returns_last_value() {
        let mut rt = Runtime::new();
        assert_eq!(rt.rep("(define x 40) (+ x 2)"), "42");
    }

    #[test]
    fn globals_include_constants() {
        let mut rt = Runtime::new();
        assert_eq!(rt.rep("t"), "t");
        assert_eq!(rt.rep("nil"), "nil");
    }
}
