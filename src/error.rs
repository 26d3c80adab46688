use std::collections::VecDeque;
use std::fmt;

//===----------------------------------------------------------------------===//
// Error
//
// Every fault except memory exhaustion is non-fatal: the offending primitive
// records an error here, returns nil, and evaluation continues. The REPL
// drains the ring after each top-level form.
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed input: bad token, symbol too long, integer overflow.
    Parse(String),
    /// Wrong kind of value handed to a primitive.
    Type(String),
    /// Wrong number of arguments.
    Arity(String),
    /// Symbol with no binding in any enclosing scope.
    Undefined(String),
    /// Application of something that is not callable.
    NotAFunction(String),
    /// JIT pipeline failure: unresolved symbol, unsupported construct.
    Compile(String),
    /// OS-level failure, e.g. a file that would not open.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "{}", msg),
            Error::Type(msg) => write!(f, "{}", msg),
            Error::Arity(msg) => write!(f, "{}", msg),
            Error::Undefined(name) => write!(f, "Undefined symbol: {}", name),
            Error::NotAFunction(what) => write!(f, "Not a function: {}", what),
            Error::Compile(msg) => write!(f, "{}", msg),
            Error::Io(msg) => write!(f, "{}", msg),
        }
    }
}

pub const ERROR_CAPACITY: usize = 16;

/// Bounded ring of pending errors. A single form can fault more than once;
/// beyond capacity the oldest entries are overwritten.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: VecDeque<Error>,
}

impl ErrorLog {
    pub fn new() -> ErrorLog {
        ErrorLog { entries: VecDeque::with_capacity(ERROR_CAPACITY) }
    }

    pub fn push(&mut self, err: Error) {
        if self.entries.len() == ERROR_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(err);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes and returns all pending errors in insertion order.
    pub fn drain(&mut self) -> impl Iterator<Item = Error> + '_ {
        self.entries.drain(..)
    }
}
