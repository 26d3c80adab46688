//! The bite tree, the compiler's intermediate representation.
//!
//! Lowering walks a symbol-resolved function body and produces one bite per
//! operation: a node with an opcode, up to two children, a register assigned
//! during emission, and a cached register-requirement estimate. Call
//! arguments are chained through `Arg` bites so the tree keeps a uniform
//! two-child shape. Lowering doubles as the validity check: anything outside
//! the compilable subset rejects with a diagnostic and the function stays
//! interpreted.

use super::emit::Reg;
use super::JitError;
use crate::builtins::Prim;
use crate::value::{list_len, Tag, Value, COMPILED, NIL, OFF_CAR, OFF_CDR, TRUE};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Op {
    /// A tagged word: a number literal, nil or t.
    Const(Value),
    /// Formal parameter by index; emitted as a load from the ARGS array.
    Param(usize),
    Add,
    Sub,
    Neg,
    Less,
    Eq,
    /// Pointer-offset load: strips the tag from the child's value and reads
    /// the word at the given offset. Implements car and cdr.
    Load(i32),
    /// lhs: condition, rhs: Branch.
    If,
    /// lhs: then-branch, rhs: else-branch.
    Branch,
    /// Argument-list link: lhs is the value, rhs the rest of the chain.
    Arg,
    /// Self-call; lhs is the Arg chain. Emitted as an argument rewrite and
    /// a jump to the prologue end, so it is only admitted in tail position.
    Recurse,
    /// Call to an already-compiled function through its entry address.
    Call(usize),
    /// Sequencing: lhs is evaluated and dropped, rhs is the result.
    Progn,
    WriteChar,
}

#[derive(Debug)]
pub struct Bite {
    pub op: Op,
    pub lhs: Option<Box<Bite>>,
    pub rhs: Option<Box<Bite>>,
    /// Register the value lands in; filled in during emission.
    pub reg: Option<Reg>,
    /// Cached Sethi-Ullman register requirement.
    pub need: u32,
}

impl Bite {
    fn leaf(op: Op) -> Bite {
        Bite { op, lhs: None, rhs: None, reg: None, need: 0 }
    }

    fn unary(op: Op, child: Bite) -> Bite {
        Bite { op, lhs: Some(Box::new(child)), rhs: None, reg: None, need: 0 }
    }

    fn binary(op: Op, lhs: Bite, rhs: Bite) -> Bite {
        Bite {
            op,
            lhs: Some(Box::new(lhs)),
            rhs: Some(Box::new(rhs)),
            reg: None,
            need: 0,
        }
    }
}

/// True when the tagged word survives as a sign-extended 32-bit immediate.
pub fn imm32_ok(v: Value) -> bool {
    let w = v.raw() as i64;
    (i32::MIN as i64..=i32::MAX as i64).contains(&w)
}

//===----------------------------------------------------------------------===//
// Lowering
//===----------------------------------------------------------------------===//

pub struct LowerCtx {
    /// Formal parameter symbols, in declaration order.
    pub params: Vec<Value>,
    /// The function being compiled; a resolved self-reference in the body
    /// is this exact value.
    pub self_val: Value,
}

pub fn lower(ctx: &LowerCtx, expr: Value, tail: bool) -> Result<Bite, JitError> {
    match expr.tag() {
        Tag::Number => Ok(Bite::leaf(Op::Const(expr))),
        Tag::Const if expr == NIL || expr == TRUE => Ok(Bite::leaf(Op::Const(expr))),
        Tag::Symbol => {
            let name = unsafe { expr.symbol_name() };
            match ctx.params.iter().position(|p| *p == expr) {
                Some(i) => Ok(Bite::leaf(Op::Param(i))),
                None => Err(JitError::UnresolvedSymbol(name.to_string())),
            }
        }
        Tag::Cons => lower_call(ctx, expr, tail),
        _ => Err(JitError::UnsupportedForm(expr.to_string())),
    }
}

fn lower_call(ctx: &LowerCtx, expr: Value, tail: bool) -> Result<Bite, JitError> {
    let head = unsafe { expr.car() };
    let mut args = Vec::new();
    let mut a = unsafe { expr.cdr() };
    while a.is_cons() {
        args.push(unsafe { a.car() });
        a = unsafe { a.cdr() };
    }

    if head == ctx.self_val {
        if !tail {
            return Err(JitError::NonTailSelfCall);
        }
        if args.len() != ctx.params.len() {
            return Err(JitError::BadArity(format!(
                "self-call expects {} arguments, has {}",
                ctx.params.len(),
                args.len()
            )));
        }
        return Ok(Bite {
            op: Op::Recurse,
            lhs: arg_chain(ctx, &args)?,
            rhs: None,
            reg: None,
            need: 0,
        });
    }

    match head.tag() {
        Tag::Lambda => {
            if unsafe { head.compiled() } != COMPILED {
                return Err(JitError::UnsupportedForm(
                    "call to an uncompiled function".into(),
                ));
            }
            let expected = list_len(unsafe { head.params() });
            if args.len() != expected {
                return Err(JitError::BadArity(format!(
                    "callee expects {} arguments, has {}",
                    expected,
                    args.len()
                )));
            }
            let entry = unsafe { head.body() }.raw();
            Ok(Bite {
                op: Op::Call(entry),
                lhs: arg_chain(ctx, &args)?,
                rhs: None,
                reg: None,
                need: 0,
            })
        }
        Tag::Builtin => lower_builtin(ctx, unsafe { head.builtin() }.kind, &args, tail),
        _ => Err(JitError::UnsupportedForm(head.to_string())),
    }
}

fn arg_chain(ctx: &LowerCtx, args: &[Value]) -> Result<Option<Box<Bite>>, JitError> {
    let mut chain = None;
    for &arg in args.iter().rev() {
        let value = lower(ctx, arg, false)?;
        chain = Some(Box::new(Bite {
            op: Op::Arg,
            lhs: Some(Box::new(value)),
            rhs: chain,
            reg: None,
            need: 0,
        }));
    }
    Ok(chain)
}

fn lower_builtin(
    ctx: &LowerCtx,
    kind: Prim,
    args: &[Value],
    tail: bool,
) -> Result<Bite, JitError> {
    match kind {
        Prim::Add => {
            if args.is_empty() {
                return Err(JitError::BadArity("'+' needs at least one argument".into()));
            }
            let mut acc = lower(ctx, args[0], false)?;
            for &a in &args[1..] {
                acc = Bite::binary(Op::Add, acc, lower(ctx, a, false)?);
            }
            Ok(acc)
        }
        Prim::Sub => {
            if args.is_empty() {
                return Err(JitError::BadArity("'-' needs at least one argument".into()));
            }
            if args.len() == 1 {
                return Ok(Bite::unary(Op::Neg, lower(ctx, args[0], false)?));
            }
            let mut acc = lower(ctx, args[0], false)?;
            for &a in &args[1..] {
                acc = Bite::binary(Op::Sub, acc, lower(ctx, a, false)?);
            }
            Ok(acc)
        }
        Prim::Less | Prim::Eq => {
            if args.len() != 2 {
                return Err(JitError::BadArity("comparison needs two arguments".into()));
            }
            let op = if kind == Prim::Less { Op::Less } else { Op::Eq };
            Ok(Bite::binary(op, lower(ctx, args[0], false)?, lower(ctx, args[1], false)?))
        }
        Prim::Car | Prim::Cdr => {
            if args.len() != 1 {
                return Err(JitError::BadArity("car/cdr need one argument".into()));
            }
            let off = if kind == Prim::Car { OFF_CAR } else { OFF_CDR };
            Ok(Bite::unary(Op::Load(off as i32), lower(ctx, args[0], false)?))
        }
        Prim::If => {
            if args.len() != 3 {
                return Err(JitError::BadArity("if takes exactly three arguments".into()));
            }
            let cond = lower(ctx, args[0], false)?;
            let then = lower(ctx, args[1], tail)?;
            let els = lower(ctx, args[2], tail)?;
            Ok(Bite::binary(Op::If, cond, Bite::binary(Op::Branch, then, els)))
        }
        Prim::Progn => {
            if args.is_empty() {
                return Ok(Bite::leaf(Op::Const(NIL)));
            }
            lower_progn(ctx, args, tail)
        }
        Prim::WriteChar => {
            if args.len() != 1 {
                return Err(JitError::BadArity("write-char takes one argument".into()));
            }
            Ok(Bite::unary(Op::WriteChar, lower(ctx, args[0], false)?))
        }
        other => Err(JitError::UnsupportedPrimitive(other)),
    }
}

fn lower_progn(ctx: &LowerCtx, forms: &[Value], tail: bool) -> Result<Bite, JitError> {
    if forms.len() == 1 {
        return lower(ctx, forms[0], tail);
    }
    let first = lower(ctx, forms[0], false)?;
    let rest = lower_progn(ctx, &forms[1..], tail)?;
    Ok(Bite::binary(Op::Progn, first, rest))
}

//===----------------------------------------------------------------------===//
// Constant folding
//===----------------------------------------------------------------------===//

/// Folds +/- chains whose operands are both literal numbers. Bottom-up, so
/// a whole constant subtree collapses to one bite.
pub fn fold_constants(b: &mut Bite) {
    if let Some(l) = b.lhs.as_deref_mut() {
        fold_constants(l);
    }
    if let Some(r) = b.rhs.as_deref_mut() {
        fold_constants(r);
    }

    match b.op {
        Op::Add | Op::Sub => {
            let (l, r) = match (b.lhs.as_deref(), b.rhs.as_deref()) {
                (Some(l), Some(r)) => (l, r),
                _ => return,
            };
            if let (Op::Const(a), Op::Const(c)) = (l.op, r.op) {
                if a.is_number() && c.is_number() {
                    let n = if b.op == Op::Add {
                        a.as_number().wrapping_add(c.as_number())
                    } else {
                        a.as_number().wrapping_sub(c.as_number())
                    };
                    b.op = Op::Const(Value::number(n));
                    b.lhs = None;
                    b.rhs = None;
                }
            }
        }
        Op::Neg => {
            if let Some(Op::Const(a)) = b.lhs.as_deref().map(|l| l.op) {
                if a.is_number() {
                    b.op = Op::Const(Value::number(a.as_number().wrapping_neg()));
                    b.lhs = None;
                }
            }
        }
        _ => {}
    }
}

//===----------------------------------------------------------------------===//
// Register counting
//===----------------------------------------------------------------------===//

/// Sethi-Ullman register requirement. A left child must materialize into a
/// register; a right child may stay a memory or immediate operand, so
/// parameters and small constants on the right cost nothing.
pub fn assign_need(b: &mut Bite, is_left: bool) -> u32 {
    let need = match b.op {
        Op::Const(v) => {
            if !imm32_ok(v) || is_left {
                1
            } else {
                0
            }
        }
        Op::Param(_) => is_left as u32,
        Op::Add | Op::Sub | Op::Less | Op::Eq => {
            let l = assign_need(b.lhs.as_deref_mut().unwrap(), true);
            let r = assign_need(b.rhs.as_deref_mut().unwrap(), false);
            if l == r {
                l + 1
            } else {
                l.max(r)
            }
        }
        Op::Neg | Op::Load(_) | Op::WriteChar => {
            assign_need(b.lhs.as_deref_mut().unwrap(), true).max(1)
        }
        Op::If => {
            let c = assign_need(b.lhs.as_deref_mut().unwrap(), true);
            let branches = assign_need(b.rhs.as_deref_mut().unwrap(), true);
            c.max(branches).max(1)
        }
        Op::Branch | Op::Progn => {
            let l = assign_need(b.lhs.as_deref_mut().unwrap(), true);
            let r = assign_need(b.rhs.as_deref_mut().unwrap(), true);
            l.max(r).max(1)
        }
        Op::Recurse | Op::Call(_) => {
            let mut max = 0;
            let mut arg = b.lhs.as_deref_mut();
            while let Some(node) = arg {
                debug_assert_eq!(node.op, Op::Arg);
                max = max.max(assign_need(node.lhs.as_deref_mut().unwrap(), true));
                arg = node.rhs.as_deref_mut();
            }
            max.max(1)
        }
        Op::Arg => unreachable!("arg chains are walked by their call"),
    };
    b.need = need;
    need
}

pub fn chain_len(chain: &Option<Box<Bite>>) -> usize {
    let mut n = 0;
    let mut node = chain.as_deref();
    while let Some(arg) = node {
        n += 1;
        node = arg.rhs.as_deref();
    }
    n
}
