use logos::Logos;

use crate::error::Error;
use crate::heap::MAX_SYMBOL_LEN;
use crate::root;
use crate::runtime::Runtime;
use crate::value::{reverse, Value, NIL};

//===----------------------------------------------------------------------===//
// Token
//
// Uses the logos crate for tokenization. `(` and `)` delimit lists, `'` is
// sugar for (quote X), `;` starts a line comment, tokens are whitespace
// separated. A leading `-` followed by a digit is a negative number; `-`
// followed by anything else begins a symbol, so `-` alone is the subtract
// operator's name.
//===----------------------------------------------------------------------===//

fn lex_number(lex: &mut logos::Lexer<Token>) -> Option<i64> {
    let n: i64 = lex.slice().parse().ok()?;
    // Two tag bits are reserved; integers carry 62 bits of magnitude.
    const MAX: i64 = (1 << 61) - 1;
    const MIN: i64 = -(1 << 61);
    (MIN..=MAX).contains(&n).then_some(n)
}

fn lex_symbol(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let s = lex.slice();
    (s.len() <= MAX_SYMBOL_LEN).then(|| s.to_string())
}

#[derive(Logos, Debug, Clone, PartialEq)]
pub enum Token {
    #[regex(r"[ \t\r\n]+", logos::skip)]
    #[regex(r";[^\n]*", logos::skip)]
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("'")]
    Quote,

    #[regex(r"-?[0-9]+", priority = 3, callback = lex_number)]
    Number(i64),

    // Symbols may not start with a digit, so `123abc` lexes as the number
    // 123 followed by the symbol `abc`.
    #[regex(r"[^ \t\r\n();'0-9][^ \t\r\n();']*", callback = lex_symbol)]
    Symbol(String),
}

//===----------------------------------------------------------------------===//
// Reader
//
// A lazy expression source: each call to `read` consumes exactly one
// expression from the input. Symbols are interned and list structure is
// allocated directly in the heap, under root protection because any
// allocation may collect.
//===----------------------------------------------------------------------===//

pub enum Read {
    Expr(Value),
    Eof,
    /// A stray `)` at top level.
    Malformed,
}

pub struct Reader<'src> {
    lexer: logos::Lexer<'src, Token>,
}

impl<'src> Reader<'src> {
    pub fn new(src: &'src str) -> Reader<'src> {
        Reader { lexer: Token::lexer(src) }
    }

    /// Produces the next expression, `Eof` at end of input, or `Malformed`
    /// for an unmatched closing paren. Lexical faults are recorded in the
    /// error ring and yield nil in place of the bad expression.
    pub fn read(&mut self, rt: &mut Runtime) -> Read {
        match self.lexer.next() {
            None => Read::Eof,
            Some(Ok(Token::RParen)) => Read::Malformed,
            Some(tok) => Read::Expr(self.expr_from(tok, rt)),
        }
    }

    fn expr_from(&mut self, tok: Result<Token, ()>, rt: &mut Runtime) -> Value {
        match tok {
            Ok(Token::Number(n)) => Value::number(n),
            Ok(Token::Symbol(name)) => self.symbol(&name, rt),
            Ok(Token::Quote) => self.read_quote(rt),
            Ok(Token::LParen) => self.read_list(rt),
            Ok(Token::RParen) => {
                // Only reachable through read_quote; list closers are
                // consumed by read_list.
                rt.errors.push(Error::Parse("Unexpected ')'".into()));
                NIL
            }
            Err(()) => {
                self.lex_error(rt);
                NIL
            }
        }
    }

    fn symbol(&mut self, name: &str, rt: &mut Runtime) -> Value {
        // An out-of-range negative literal fails the number rule but still
        // fits the symbol shape. Surface it as overflow, not as a symbol.
        let mut bytes = name.bytes();
        if bytes.next() == Some(b'-')
            && name.len() > 1
            && bytes.all(|b| b.is_ascii_digit())
        {
            rt.errors.push(Error::Parse("Integer overflow".into()));
            return NIL;
        }
        rt.heap.intern(name)
    }

    fn read_list(&mut self, rt: &mut Runtime) -> Value {
        let mut list = NIL;
        let mut item = NIL;
        root!(rt.heap, list, item);

        loop {
            match self.lexer.next() {
                None => {
                    rt.errors.push(Error::Parse("Unexpected end of input in list".into()));
                    break;
                }
                Some(Ok(Token::RParen)) => break,
                Some(tok) => {
                    item = self.expr_from(tok, rt);
                    list = rt.heap.cons(item, list);
                }
            }
        }

        unsafe { reverse(list) }
    }

    fn read_quote(&mut self, rt: &mut Runtime) -> Value {
        let mut quote_sym = rt.heap.intern("quote");
        let mut inner = NIL;
        root!(rt.heap, quote_sym, inner);

        inner = match self.lexer.next() {
            None => {
                rt.errors.push(Error::Parse("Unexpected end of input after quote".into()));
                NIL
            }
            Some(tok) => self.expr_from(tok, rt),
        };

        let arg_list = rt.heap.cons(inner, NIL);
        rt.heap.cons(quote_sym, arg_list)
    }

    fn lex_error(&mut self, rt: &mut Runtime) {
        let slice = self.lexer.slice();
        let digits = slice.strip_prefix('-').unwrap_or(slice);
        let msg = if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            "Integer overflow".to_string()
        } else if slice.len() > MAX_SYMBOL_LEN {
            "Symbol name too long".to_string()
        } else {
            format!("Unrecognized token: {}", slice)
        };
        rt.errors.push(Error::Parse(msg));
    }
}
