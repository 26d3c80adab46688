//! Interactive REPL and batch driver.
//!
//! Line editing and history come from rustyline; input accumulates until
//! the parens balance, then every complete form is evaluated, its value
//! printed, and the error ring drained to stderr.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::reader::{Read, Reader};
use crate::runtime::Runtime;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HISTORY_FILE: &str = ".ember-history";

pub struct Repl {
    pub rt: Runtime,
}

impl Repl {
    pub fn new(rt: Runtime) -> Repl {
        Repl { rt }
    }

    /// Evaluates every form in `src`, printing each value unless quiet and
    /// draining errors after each top-level form.
    pub fn eval_source(&mut self, src: &str) {
        let mut reader = Reader::new(src);
        loop {
            match reader.read(&mut self.rt) {
                Read::Eof => break,
                Read::Malformed => println!("Malformed input"),
                Read::Expr(expr) => {
                    let globals = self.rt.heap.globals;
                    let value = self.rt.eval(globals, expr);
                    if !self.rt.quiet {
                        println!("{}", value);
                    }
                }
            }
            self.drain_errors();
            if !self.rt.running {
                break;
            }
        }
    }

    /// Non-interactive driver for files and piped stdin.
    pub fn run_batch(&mut self, src: &str) {
        if self.rt.echo {
            print!("{}", src);
            if !src.ends_with('\n') {
                println!();
            }
        }
        self.eval_source(src);
    }

    pub fn run(&mut self) {
        let mut rl = DefaultEditor::new().unwrap();
        let _ = rl.load_history(HISTORY_FILE);

        if !self.rt.quiet {
            println!("ember v{} — a small Lisp with a JIT", VERSION);
            println!("Ctrl+D or (exit) to quit.\n");
        }

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "> " } else { ".. " };
            match rl.readline(prompt) {
                Ok(line) => {
                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    buffer.push_str(&line);

                    if is_incomplete(&buffer) {
                        continue;
                    }

                    if !buffer.trim().is_empty() {
                        let _ = rl.add_history_entry(buffer.as_str());
                        let _ = rl.save_history(HISTORY_FILE);
                        self.eval_source(&buffer);
                    }
                    buffer.clear();

                    if !self.rt.running {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{}: {:?}", "readline error".red(), err);
                    break;
                }
            }
        }
    }

    fn drain_errors(&mut self) {
        for err in self.rt.errors.drain() {
            eprintln!("{} {}", "Error:".red(), err);
        }
    }
}

/// Unbalanced open parens mean the form continues on the next line.
/// Comments hide parens to the end of the line; there are no string
/// literals to worry about.
fn is_incomplete(src: &str) -> bool {
    let mut depth = 0i32;
    let mut in_comment = false;
    for c in src.chars() {
        match c {
            '\n' => in_comment = false,
            ';' => in_comment = true,
            '(' if !in_comment => depth += 1,
            ')' if !in_comment => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_input_is_complete() {
        assert!(!is_incomplete("(+ 1 2)"));
        assert!(!is_incomplete("42"));
    }

    #[test]
    fn open_parens_continue() {
        assert!(is_incomplete("(defun f (x)"));
    }

    #[test]
    fn comments_hide_parens() {
        assert!(!is_incomplete("42 ; (unclosed"));
        assert!(is_incomplete("(list 1 ; )\n2"));
    }
}
