//! Ember — a small Lisp with three tightly coupled subsystems over one heap
//! representation: a tree-walking evaluator with proper tail calls, a
//! semi-space copying garbage collector with a precise root set, and a
//! just-in-time compiler that emits raw x86-64 into executable pages for a
//! restricted subset of the language.

pub mod builtins;
pub mod error;
pub mod eval;
pub mod heap;
pub mod jit;
pub mod reader;
pub mod repl;
pub mod runtime;
pub mod value;
