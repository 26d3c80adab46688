//! Bite-tree code emission.
//!
//! Four scratch registers form the free list; RAX doubles as the return
//! register and RDI stays pinned on the argument array for the whole
//! function. For a binary bite the child with the higher register
//! requirement compiles first; when only one register remains the right
//! child's result spills to a stack slot and the left computes in place.
//! Stack slots live below RBP; the prologue's reservation is patched after
//! emission and elided entirely when no slot was ever needed.

use super::bite::{chain_len, imm32_ok, Bite, Op};
use super::emit::{Asm, Cond, Reg};
use super::JitError;
use crate::value::{Value, NIL, TRUE, WORD};

const SCRATCH: [Reg; 4] = [Reg::Rax, Reg::Rdx, Reg::Rcx, Reg::Rsi];
const ARGS: Reg = Reg::Rdi;

/// Length of `push rbp; mov rbp, rsp`.
const PROLOGUE_HEAD: usize = 4;
/// Length of the patchable `sub rsp, imm32`.
const RESERVE_LEN: usize = 7;

#[derive(Copy, Clone, PartialEq, Eq)]
enum BinKind {
    Add,
    Sub,
    Cmp,
}

pub struct CodeGen<'a> {
    asm: Asm<'a>,
    free: Vec<Reg>,
    next_slot: usize,
    max_slot: usize,
    prologue_end: usize,
    reserve_patch: usize,
    write_char_fn: usize,
}

fn slot_disp(slot: usize) -> i32 {
    -(WORD as i32) * (slot as i32 + 1)
}

impl<'a> CodeGen<'a> {
    pub fn new(buf: &'a mut [u8], write_char_fn: usize) -> CodeGen<'a> {
        // Popping from the back hands out RAX first.
        let free = vec![Reg::Rsi, Reg::Rcx, Reg::Rdx, Reg::Rax];
        CodeGen {
            asm: Asm::new(buf),
            free,
            next_slot: 0,
            max_slot: 0,
            prologue_end: 0,
            reserve_patch: 0,
            write_char_fn,
        }
    }

    /// Emits the whole function and returns the code length.
    pub fn function(mut self, body: &mut Bite) -> Result<usize, JitError> {
        self.asm.push(Reg::Rbp);
        self.asm.mov_rr(Reg::Rbp, Reg::Rsp);
        self.reserve_patch = self.asm.sub_rsp_imm32(0);
        self.prologue_end = self.asm.here();
        debug_assert_eq!(self.prologue_end, PROLOGUE_HEAD + RESERVE_LEN);

        let r = self.emit(body)?;
        if r != Reg::Rax {
            self.asm.mov_rr(Reg::Rax, r);
        }
        self.asm.leave();
        self.asm.ret();

        // Keep the reservation 16-byte aligned so every call site inside the
        // body sees an aligned stack.
        let reserve = (self.max_slot * WORD + 15) & !15;
        if reserve == 0 {
            self.asm.remove(PROLOGUE_HEAD, RESERVE_LEN);
        } else {
            self.asm.patch32(self.reserve_patch, reserve as i32);
        }

        self.asm.finish()
    }

    //===------------------------------------------------------------------===//
    // Register and slot bookkeeping
    //===------------------------------------------------------------------===//

    fn take(&mut self) -> Reg {
        self.free.pop().expect("scratch register underflow")
    }

    fn release(&mut self, r: Reg) {
        debug_assert!(!self.free.contains(&r));
        self.free.push(r);
    }

    fn in_use(&self) -> Vec<Reg> {
        SCRATCH.iter().copied().filter(|r| !self.free.contains(r)).collect()
    }

    fn alloc_slots(&mut self, n: usize) -> usize {
        let base = self.next_slot;
        self.next_slot += n;
        self.max_slot = self.max_slot.max(self.next_slot);
        base
    }

    fn free_slots(&mut self, n: usize) {
        self.next_slot -= n;
    }

    //===------------------------------------------------------------------===//
    // Emission
    //===------------------------------------------------------------------===//

    fn emit(&mut self, b: &mut Bite) -> Result<Reg, JitError> {
        let reg = match b.op {
            Op::Const(v) => {
                let dst = self.take();
                self.load_const(dst, v);
                dst
            }
            Op::Param(i) => {
                let dst = self.take();
                self.asm.mov_load(dst, ARGS, (i * WORD) as i32);
                dst
            }
            Op::Add => self.emit_binary(BinKind::Add, b)?,
            Op::Sub => self.emit_binary(BinKind::Sub, b)?,
            Op::Neg => {
                let dst = self.emit(b.lhs.as_deref_mut().unwrap())?;
                self.asm.neg(dst);
                dst
            }
            Op::Less => self.emit_compare(b, Cond::L)?,
            Op::Eq => self.emit_compare(b, Cond::E)?,
            Op::Load(off) => {
                let dst = self.emit(b.lhs.as_deref_mut().unwrap())?;
                self.asm.and_ri8(dst, -8);
                self.asm.mov_load(dst, dst, off);
                dst
            }
            Op::If => self.emit_if(b)?,
            Op::Progn => {
                let first = self.emit(b.lhs.as_deref_mut().unwrap())?;
                self.release(first);
                self.emit(b.rhs.as_deref_mut().unwrap())?
            }
            Op::Recurse => self.emit_recurse(b)?,
            Op::Call(entry) => self.emit_call(b, entry)?,
            Op::WriteChar => self.emit_write_char(b)?,
            Op::Arg | Op::Branch => unreachable!("structural bites have no value"),
        };
        b.reg = Some(reg);
        Ok(reg)
    }

    fn load_const(&mut self, dst: Reg, v: Value) {
        if imm32_ok(v) {
            self.asm.mov_ri32(dst, v.raw() as i32);
        } else {
            self.asm.mov_ri64(dst, v.raw() as u64);
        }
    }

    /// Emits both operands of a binary bite and the instruction, returning
    /// the register holding the result (and, for Cmp, the flags).
    fn emit_binary(&mut self, kind: BinKind, b: &mut Bite) -> Result<Reg, JitError> {
        let lhs = b.lhs.as_deref_mut().unwrap();
        let rhs = b.rhs.as_deref_mut().unwrap();

        // A right-hand leaf stays a memory or immediate operand.
        match rhs.op {
            Op::Const(v) if imm32_ok(v) => {
                let dst = self.emit(lhs)?;
                self.op_ri(kind, dst, v.raw() as i32);
                return Ok(dst);
            }
            Op::Param(i) => {
                let dst = self.emit(lhs)?;
                self.op_rm(kind, dst, ARGS, (i * WORD) as i32);
                return Ok(dst);
            }
            _ => {}
        }

        if self.free.len() < 2 {
            // Neither child fits in what's left: spill the right result and
            // compute the left in place.
            let r = self.emit(rhs)?;
            let slot = self.alloc_slots(1);
            self.asm.mov_store(Reg::Rbp, slot_disp(slot), r);
            self.release(r);
            let dst = self.emit(lhs)?;
            self.op_rm(kind, dst, Reg::Rbp, slot_disp(slot));
            self.free_slots(1);
            return Ok(dst);
        }

        if rhs.need > lhs.need {
            let r = self.emit(rhs)?;
            let dst = self.emit(lhs)?;
            self.op_rr(kind, dst, r);
            self.release(r);
            Ok(dst)
        } else {
            let dst = self.emit(lhs)?;
            let r = self.emit(rhs)?;
            self.op_rr(kind, dst, r);
            self.release(r);
            Ok(dst)
        }
    }

    fn op_rr(&mut self, kind: BinKind, dst: Reg, src: Reg) {
        match kind {
            BinKind::Add => self.asm.add_rr(dst, src),
            BinKind::Sub => self.asm.sub_rr(dst, src),
            BinKind::Cmp => self.asm.cmp_rr(dst, src),
        }
    }

    fn op_ri(&mut self, kind: BinKind, dst: Reg, imm: i32) {
        match kind {
            BinKind::Add => self.asm.add_ri(dst, imm),
            BinKind::Sub => self.asm.sub_ri(dst, imm),
            BinKind::Cmp => self.asm.cmp_ri(dst, imm),
        }
    }

    fn op_rm(&mut self, kind: BinKind, dst: Reg, base: Reg, disp: i32) {
        match kind {
            BinKind::Add => self.asm.add_rm(dst, base, disp),
            BinKind::Sub => self.asm.sub_rm(dst, base, disp),
            BinKind::Cmp => self.asm.cmp_rm(dst, base, disp),
        }
    }

    /// Materialized comparison: cmp, then t/nil selected without touching
    /// the flags (mov with an immediate preserves them, so the conditional
    /// jump can skip the nil overwrite).
    fn emit_compare(&mut self, b: &mut Bite, cc: Cond) -> Result<Reg, JitError> {
        let dst = self.emit_binary(BinKind::Cmp, b)?;
        self.asm.mov_ri32(dst, TRUE.raw() as i32);
        self.asm.jcc8(cc, 7); // over the seven-byte nil mov
        self.asm.mov_ri32(dst, NIL.raw() as i32);
        Ok(dst)
    }

    /// When the condition is itself a comparison, its flags feed the branch
    /// directly and no t/nil value is ever built.
    fn emit_if(&mut self, b: &mut Bite) -> Result<Reg, JitError> {
        let cond = b.lhs.as_deref_mut().unwrap();
        let else_jump = match cond.op {
            Op::Less => {
                let dst = self.emit_binary(BinKind::Cmp, cond)?;
                self.release(dst);
                self.asm.jcc32(Cond::Ge)
            }
            Op::Eq => {
                let dst = self.emit_binary(BinKind::Cmp, cond)?;
                self.release(dst);
                self.asm.jcc32(Cond::Ne)
            }
            _ => {
                let c = self.emit(cond)?;
                self.asm.cmp_ri(c, NIL.raw() as i32);
                self.release(c);
                self.asm.jcc32(Cond::E)
            }
        };

        let branch = b.rhs.as_deref_mut().unwrap();
        let then = branch.lhs.as_deref_mut().unwrap();
        let els = branch.rhs.as_deref_mut().unwrap();

        let free_snapshot = self.free.clone();
        let slot_snapshot = self.next_slot;

        let t = self.emit(then)?;
        let end_jump = self.asm.jmp32();
        self.asm.patch_here(else_jump);

        // The else branch starts from the same allocator state and must
        // deliver into the same register.
        self.free = free_snapshot;
        self.next_slot = slot_snapshot;
        let e = self.emit(els)?;
        if e != t {
            self.asm.mov_rr(t, e);
            self.release(e);
            self.free.retain(|r| *r != t);
        }

        self.asm.patch_here(end_jump);
        Ok(t)
    }

    /// Tail self-call: every argument value is computed into a stack slot
    /// first (they may read the old parameters), then the slots overwrite
    /// the ARGS array and control jumps back to the prologue end.
    fn emit_recurse(&mut self, b: &mut Bite) -> Result<Reg, JitError> {
        let n = chain_len(&b.lhs);
        let base = self.alloc_slots(n);

        let mut i = 0;
        let mut node = b.lhs.as_deref_mut();
        while let Some(arg) = node {
            let r = self.emit(arg.lhs.as_deref_mut().unwrap())?;
            self.asm.mov_store(Reg::Rbp, slot_disp(base + i), r);
            self.release(r);
            i += 1;
            node = arg.rhs.as_deref_mut();
        }

        for i in 0..n {
            let r = self.take();
            self.asm.mov_load(r, Reg::Rbp, slot_disp(base + i));
            self.asm.mov_store(ARGS, (i * WORD) as i32, r);
            self.release(r);
        }
        self.free_slots(n);
        self.asm.jmp_to(self.prologue_end);

        // Unreachable, but the node still owns a result register.
        Ok(self.take())
    }

    /// Cross-function call. The callee's argument array is laid out in this
    /// frame's stack slots; live scratch registers and the own ARGS pointer
    /// are preserved by push/pop around the call, with the stack kept
    /// 16-byte aligned at the call instruction.
    fn emit_call(&mut self, b: &mut Bite, entry: usize) -> Result<Reg, JitError> {
        let n = chain_len(&b.lhs);
        let base = self.alloc_slots(n);

        // Slot addresses descend, so argument i lands at base + n - 1 - i
        // and the block reads as an ascending array from its lowest slot.
        let mut i = 0;
        let mut node = b.lhs.as_deref_mut();
        while let Some(arg) = node {
            let r = self.emit(arg.lhs.as_deref_mut().unwrap())?;
            self.asm.mov_store(Reg::Rbp, slot_disp(base + n - 1 - i), r);
            self.release(r);
            i += 1;
            node = arg.rhs.as_deref_mut();
        }

        let live = self.in_use();
        for &r in &live {
            self.asm.push(r);
        }
        self.asm.push(ARGS);
        let pad = (live.len() + 1) % 2 == 1;
        if pad {
            self.asm.sub_ri(Reg::Rsp, WORD as i32);
        }

        self.asm.lea(ARGS, Reg::Rbp, -(WORD as i32) * (base + n) as i32);
        self.asm.mov_ri64(Reg::Rax, entry as u64);
        self.asm.call_r(Reg::Rax);

        if pad {
            self.asm.add_ri(Reg::Rsp, WORD as i32);
        }
        self.asm.pop(ARGS);
        let dst = self.take();
        if dst != Reg::Rax {
            self.asm.mov_rr(dst, Reg::Rax);
        }
        for &r in live.iter().rev() {
            self.asm.pop(r);
        }
        self.free_slots(n);
        Ok(dst)
    }

    /// Calls the host write-char helper with the value as its only System V
    /// argument.
    fn emit_write_char(&mut self, b: &mut Bite) -> Result<Reg, JitError> {
        let v = self.emit(b.lhs.as_deref_mut().unwrap())?;

        let live: Vec<Reg> = self.in_use().into_iter().filter(|r| *r != v).collect();
        for &r in &live {
            self.asm.push(r);
        }
        self.asm.push(ARGS);
        let pad = (live.len() + 1) % 2 == 1;
        if pad {
            self.asm.sub_ri(Reg::Rsp, WORD as i32);
        }

        self.asm.mov_rr(ARGS, v);
        self.asm.mov_ri64(Reg::Rax, self.write_char_fn as u64);
        self.asm.call_r(Reg::Rax);

        if pad {
            self.asm.add_ri(Reg::Rsp, WORD as i32);
        }
        self.asm.pop(ARGS);
        self.release(v);
        let dst = self.take();
        if dst != Reg::Rax {
            self.asm.mov_rr(dst, Reg::Rax);
        }
        for &r in live.iter().rev() {
            self.asm.pop(r);
        }
        Ok(dst)
    }
}
