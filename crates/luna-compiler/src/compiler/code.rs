//! Code generator: turns expression descriptors into instructions.
//!
//! Jump lists are threaded through the sBx fields of the JMP instructions
//! themselves; `jpc` holds jumps that target "the next instruction emitted".

use super::expr::{arith_opcode, BinOp, ExpDesc, ExpKind, IndexBase, UnOp, MULTRET, NO_JUMP};
use super::{CResult, Compiler, MAX_REGS};
use crate::opcode::{
    is_k, rk_as_k, Instruction, OpCode, FIELDS_PER_FLUSH, MAX_AX, MAX_BX, MAX_C, MAX_INDEX_RK,
    MAX_SBX, NO_REG,
};
use crate::proto::Constant;
use luna_core::number::{arith, Number};
use luna_core::{ArithOp, LuaStr};


impl Compiler<'_> {
    // ---- Emission ----

    pub(super) fn pc(&self) -> usize {
        self.fs.proto.code.len()
    }

    fn inst(&self, pc: usize) -> Instruction {
        self.fs.proto.code[pc]
    }

    fn inst_mut(&mut self, pc: usize) -> &mut Instruction {
        self.fs.proto.get_mut(pc)
    }

    /// Emit an instruction at the line of the last consumed token.
    pub(super) fn code(&mut self, i: Instruction) -> CResult<usize> {
        self.discharge_jpc()?;
        let line = self.lexer.lastline;
        Ok(self.fs.proto.emit(i, line))
    }

    pub(super) fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> CResult<usize> {
        self.code(Instruction::abc(op, a, b, c))
    }

    pub(super) fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> CResult<usize> {
        self.code(Instruction::abx(op, a, bx))
    }

    pub(super) fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> CResult<usize> {
        self.code(Instruction::asbx(op, a, sbx))
    }

    fn code_extra_arg(&mut self, a: u32) -> CResult<usize> {
        self.code(Instruction::ax(OpCode::ExtraArg, a))
    }

    /// Load constant `k` into `reg`, with LOADKX for indices beyond Bx.
    pub(super) fn code_k(&mut self, reg: u32, k: u32) -> CResult<usize> {
        if k <= MAX_BX {
            self.code_abx(OpCode::LoadK, reg, k)
        } else {
            let p = self.code_abx(OpCode::LoadKx, reg, 0)?;
            self.code_extra_arg(k)?;
            Ok(p)
        }
    }

    /// Set the line of the last emitted instruction.
    pub(super) fn fix_line(&mut self, line: u32) {
        if let Some(last) = self.fs.proto.line_info.last_mut() {
            *last = line;
        }
    }

    /// LOADNIL for `n` registers starting at `from`, merged into a
    /// preceding LOADNIL when the ranges touch.
    pub(super) fn code_nil(&mut self, mut from: u32, n: u32) -> CResult<()> {
        let mut l = from + n - 1;
        let pc = self.pc();
        if pc > self.fs.lasttarget && pc > 0 {
            let prev = self.inst(pc - 1);
            if prev.opcode() == OpCode::LoadNil {
                let pfrom = prev.a();
                let pl = pfrom + prev.b();
                if (pfrom <= from && from <= pl + 1) || (from <= pfrom && pfrom <= l + 1) {
                    from = from.min(pfrom);
                    l = l.max(pl);
                    let prev = self.inst_mut(pc - 1);
                    prev.set_a(from);
                    prev.set_b(l - from);
                    return Ok(());
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, n - 1, 0)?;
        Ok(())
    }

    pub(super) fn ret(&mut self, first: u32, nret: i32) -> CResult<()> {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0)?;
        Ok(())
    }

    // ---- Jump lists ----

    fn get_jump(&self, pc: usize) -> i32 {
        let offset = self.inst(pc).sbx();
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc as i32 + 1 + offset
        }
    }

    fn fix_jump(&mut self, pc: usize, dest: usize) -> CResult<()> {
        let offset = dest as i64 - (pc as i64 + 1);
        if offset.abs() > MAX_SBX as i64 {
            return Err(self.syntax_error("control structure too long"));
        }
        self.inst_mut(pc).set_sbx(offset as i32);
        Ok(())
    }

    /// Append list `l2` to list `l1`.
    pub(super) fn concat(&mut self, l1: &mut i32, l2: i32) -> CResult<()> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1 as usize;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next as usize;
        }
        self.fix_jump(list, l2 as usize)
    }

    /// Emit a JMP, absorbing any jumps pending to this position.
    pub(super) fn jump(&mut self) -> CResult<i32> {
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP)? as i32;
        self.concat(&mut j, jpc)?;
        Ok(j)
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> CResult<i32> {
        self.code_abc(op, a, b, c)?;
        self.jump()
    }

    /// Mark the current pc as a jump target and return it.
    pub(super) fn get_label(&mut self) -> usize {
        let pc = self.pc();
        self.fs.lasttarget = pc;
        pc
    }

    /// The instruction controlling a jump: its test, if it has one.
    fn jump_control(&self, pc: usize) -> usize {
        if pc >= 1 && self.inst(pc - 1).opcode().is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Point a TESTSET at `reg`, or turn it into TEST when no value is wanted.
    fn patch_test_reg(&mut self, node: usize, reg: u32) -> bool {
        let ctl = self.jump_control(node);
        let i = self.inst(ctl);
        if i.opcode() != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != i.b() {
            self.inst_mut(ctl).set_a(reg);
        } else {
            self.fs.proto.code[ctl] = Instruction::abc(OpCode::Test, i.b(), 0, i.c());
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list as usize, NO_REG);
            list = self.get_jump(list as usize);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: usize, reg: u32, dtarget: usize) -> CResult<()> {
        while list != NO_JUMP {
            let node = list as usize;
            let next = self.get_jump(node);
            if self.patch_test_reg(node, reg) {
                self.fix_jump(node, vtarget)?;
            } else {
                self.fix_jump(node, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    fn discharge_jpc(&mut self) -> CResult<()> {
        let pc = self.pc();
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        self.patch_list_aux(jpc, pc, NO_REG, pc)
    }

    /// Resolve every jump in `list` to `target`.
    pub(super) fn patch_list(&mut self, list: i32, target: usize) -> CResult<()> {
        if target == self.pc() {
            self.patch_to_here(list)
        } else {
            debug_assert!(target < self.pc());
            self.patch_list_aux(list, target, NO_REG, target)
        }
    }

    /// Resolve `list` to whatever instruction is emitted next.
    pub(super) fn patch_to_here(&mut self, list: i32) -> CResult<()> {
        self.get_label();
        let mut jpc = self.fs.jpc;
        self.concat(&mut jpc, list)?;
        self.fs.jpc = jpc;
        Ok(())
    }

    /// Make every JMP in `list` close upvalues from register `level` up.
    pub(super) fn patch_close(&mut self, mut list: i32, level: u32) {
        let level = level + 1;
        while list != NO_JUMP {
            let node = list as usize;
            let next = self.get_jump(node);
            debug_assert!(self.inst(node).opcode() == OpCode::Jmp);
            self.inst_mut(node).set_a(level);
            list = next;
        }
    }

    // ---- Registers ----

    pub(super) fn check_stack(&mut self, n: u32) -> CResult<()> {
        let newstack = self.fs.freereg + n;
        if newstack > self.fs.proto.max_stack_size as u32 {
            if newstack >= MAX_REGS {
                return Err(self.syntax_error("function or expression needs too many registers"));
            }
            self.fs.proto.max_stack_size = newstack as u8;
        }
        Ok(())
    }

    pub(super) fn reserve_regs(&mut self, n: u32) -> CResult<()> {
        self.check_stack(n)?;
        self.fs.freereg += n;
        Ok(())
    }

    fn free_reg(&mut self, reg: u32) {
        if !is_k(reg) && reg >= self.fs.nactvar {
            self.fs.freereg -= 1;
            debug_assert_eq!(reg, self.fs.freereg);
        }
    }

    fn free_exp(&mut self, e: &ExpDesc) {
        if let ExpKind::NonReloc(r) = e.kind {
            self.free_reg(r);
        }
    }

    /// Free two registers in the right (top-first) order.
    fn free_exps(&mut self, e1: &ExpDesc, e2: &ExpDesc) {
        let r1 = match e1.kind {
            ExpKind::NonReloc(r) => Some(r),
            _ => None,
        };
        let r2 = match e2.kind {
            ExpKind::NonReloc(r) => Some(r),
            _ => None,
        };
        match (r1, r2) {
            (Some(a), Some(b)) if a > b => {
                self.free_reg(a);
                self.free_reg(b);
            }
            (Some(a), Some(b)) => {
                self.free_reg(b);
                self.free_reg(a);
            }
            (Some(a), None) | (None, Some(a)) => self.free_reg(a),
            (None, None) => {}
        }
    }

    // ---- Constants ----

    fn add_k(&mut self, k: Constant) -> CResult<u32> {
        if let Some(&idx) = self.fs.kcache.get(&k) {
            return Ok(idx);
        }
        let idx = self.fs.proto.constants.len() as u32;
        if idx > MAX_AX {
            return Err(self.error_limit(MAX_AX, "constants"));
        }
        self.fs.proto.constants.push(k.clone());
        self.fs.kcache.insert(k, idx);
        Ok(idx)
    }

    pub(super) fn string_k(&mut self, s: LuaStr) -> CResult<u32> {
        self.add_k(Constant::String(s))
    }

    pub(super) fn int_k(&mut self, i: i64) -> CResult<u32> {
        self.add_k(Constant::Integer(i))
    }

    fn number_k(&mut self, f: f64) -> CResult<u32> {
        self.add_k(Constant::Float(f))
    }

    // ---- Discharging ----

    /// Fix the number of results of a multi-value expression.
    pub(super) fn set_returns(&mut self, e: &ExpDesc, nresults: i32) -> CResult<()> {
        match e.kind {
            ExpKind::Call(pc) => self.inst_mut(pc).set_c((nresults + 1) as u32),
            ExpKind::VarArg(pc) => {
                let freereg = self.fs.freereg;
                let i = self.inst_mut(pc);
                i.set_b((nresults + 1) as u32);
                i.set_a(freereg);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn set_multret(&mut self, e: &ExpDesc) -> CResult<()> {
        self.set_returns(e, MULTRET)
    }

    /// Adjust a multi-value expression to exactly one result.
    pub(super) fn set_oneret(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::Call(pc) => e.kind = ExpKind::NonReloc(self.inst(pc).a()),
            ExpKind::VarArg(pc) => {
                self.inst_mut(pc).set_b(2);
                e.kind = ExpKind::Reloc(pc);
            }
            _ => {}
        }
    }

    /// Turn variable descriptors into value descriptors.
    pub(super) fn discharge_vars(&mut self, e: &mut ExpDesc) -> CResult<()> {
        match e.kind {
            ExpKind::Local(r) => e.kind = ExpKind::NonReloc(r),
            ExpKind::Upval(idx) => {
                e.kind = ExpKind::Reloc(self.code_abc(OpCode::GetUpval, 0, idx, 0)?);
            }
            ExpKind::Indexed { t, idx, base } => {
                self.free_reg(idx);
                let op = match base {
                    IndexBase::Local => {
                        self.free_reg(t);
                        OpCode::GetTable
                    }
                    IndexBase::Upval => OpCode::GetTabUp,
                };
                e.kind = ExpKind::Reloc(self.code_abc(op, 0, t, idx)?);
            }
            ExpKind::Call(_) | ExpKind::VarArg(_) => self.set_oneret(e),
            _ => {}
        }
        Ok(())
    }

    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> CResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::Nil => self.code_nil(reg, 1)?,
            ExpKind::False => {
                self.code_abc(OpCode::LoadBool, reg, 0, 0)?;
            }
            ExpKind::True => {
                self.code_abc(OpCode::LoadBool, reg, 1, 0)?;
            }
            ExpKind::K(k) => {
                self.code_k(reg, k)?;
            }
            ExpKind::KFlt(f) => {
                let k = self.number_k(f)?;
                self.code_k(reg, k)?;
            }
            ExpKind::KInt(i) => {
                let k = self.int_k(i)?;
                self.code_k(reg, k)?;
            }
            ExpKind::Reloc(pc) => self.inst_mut(pc).set_a(reg),
            ExpKind::NonReloc(r) => {
                if r != reg {
                    self.code_abc(OpCode::Move, reg, r, 0)?;
                }
            }
            _ => {
                debug_assert!(matches!(e.kind, ExpKind::Jmp(_) | ExpKind::Void));
                return Ok(());
            }
        }
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if !matches!(e.kind, ExpKind::NonReloc(_)) {
            self.reserve_regs(1)?;
            let reg = self.fs.freereg - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    fn code_load_bool(&mut self, a: u32, b: u32, jump: u32) -> CResult<usize> {
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump)
    }

    /// Does some jump in the list need to produce a value (i.e. is not a TESTSET)?
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctl = self.jump_control(list as usize);
            if self.inst(ctl).opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list as usize);
        }
        false
    }

    /// Put the final value of `e`, jumps included, into `reg`.
    fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> CResult<()> {
        self.discharge_to_reg(e, reg)?;
        if let ExpKind::Jmp(pc) = e.kind {
            let mut t = e.t;
            self.concat(&mut t, pc as i32)?;
            e.t = t;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP as usize;
            let mut p_t = NO_JUMP as usize;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if matches!(e.kind, ExpKind::Jmp(_)) {
                    NO_JUMP
                } else {
                    self.jump()?
                };
                p_f = self.code_load_bool(reg, 0, 1)?;
                p_t = self.code_load_bool(reg, 1, 0)?;
                self.patch_to_here(fj)?;
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, reg, p_f)?;
            self.patch_list_aux(e.t, end, reg, p_t)?;
        }
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    /// Put `e` into the next free register.
    pub(super) fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.fs.freereg - 1;
        self.exp_to_reg(e, reg)
    }

    /// Put `e` into some register and return it.
    pub(super) fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> CResult<u32> {
        self.discharge_vars(e)?;
        if let ExpKind::NonReloc(r) = e.kind {
            if !e.has_jumps() {
                return Ok(r);
            }
            if r >= self.fs.nactvar {
                self.exp_to_reg(e, r)?;
                return Ok(r);
            }
        }
        self.exp_to_next_reg(e)?;
        Ok(e.reg().unwrap_or(0))
    }

    /// Register or upvalue.
    pub(super) fn exp_to_any_reg_up(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if !matches!(e.kind, ExpKind::Upval(_)) || e.has_jumps() {
            self.exp_to_any_reg(e)?;
        }
        Ok(())
    }

    /// Register or constant, as a value (no pending jumps).
    pub(super) fn exp_to_val(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
            Ok(())
        } else {
            self.discharge_vars(e)
        }
    }

    /// RK operand for `e`: a constant index when it fits, else a register.
    pub(super) fn exp_to_rk(&mut self, e: &mut ExpDesc) -> CResult<u32> {
        self.exp_to_val(e)?;
        let k = match e.kind {
            ExpKind::True => Some(self.add_k(Constant::Boolean(true))?),
            ExpKind::False => Some(self.add_k(Constant::Boolean(false))?),
            ExpKind::Nil => Some(self.add_k(Constant::Nil)?),
            ExpKind::KInt(i) => Some(self.int_k(i)?),
            ExpKind::KFlt(f) => Some(self.number_k(f)?),
            ExpKind::K(k) => Some(k),
            _ => None,
        };
        if let Some(k) = k {
            e.kind = ExpKind::K(k);
            if k <= MAX_INDEX_RK {
                return Ok(rk_as_k(k));
            }
        }
        self.exp_to_any_reg(e)
    }

    /// Generate code to store `ex` into variable `var`.
    pub(super) fn store_var(&mut self, var: &ExpDesc, ex: &mut ExpDesc) -> CResult<()> {
        match var.kind {
            ExpKind::Local(reg) => {
                self.free_exp(ex);
                return self.exp_to_reg(ex, reg);
            }
            ExpKind::Upval(idx) => {
                let e = self.exp_to_any_reg(ex)?;
                self.code_abc(OpCode::SetUpval, e, idx, 0)?;
            }
            ExpKind::Indexed { t, idx, base } => {
                let op = match base {
                    IndexBase::Local => OpCode::SetTable,
                    IndexBase::Upval => OpCode::SetTabUp,
                };
                let e = self.exp_to_rk(ex)?;
                self.code_abc(op, t, idx, e)?;
            }
            _ => debug_assert!(false, "invalid var kind to store"),
        }
        self.free_exp(ex);
        Ok(())
    }

    /// `obj:key` → SELF, leaving the method and `self` in consecutive registers.
    pub(super) fn code_self(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) -> CResult<()> {
        let ereg = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let base = self.fs.freereg;
        e.kind = ExpKind::NonReloc(base);
        self.reserve_regs(2)?;
        let rk = self.exp_to_rk(key)?;
        self.code_abc(OpCode::OpSelf, base, ereg, rk)?;
        self.free_exp(key);
        Ok(())
    }

    // ---- Conditions ----

    fn negate_condition(&mut self, pc: usize) {
        let ctl = self.jump_control(pc);
        let i = self.inst_mut(ctl);
        debug_assert!(i.opcode().is_test() && i.opcode() != OpCode::TestSet && i.opcode() != OpCode::Test);
        let a = i.a();
        i.set_a(if a == 0 { 1 } else { 0 });
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: u32) -> CResult<i32> {
        if let ExpKind::Reloc(pc) = e.kind {
            let ie = self.inst(pc);
            if ie.opcode() == OpCode::Not && pc + 1 == self.pc() {
                // drop the NOT and test its operand with the opposite sense
                self.fs.proto.pop_instruction();
                return self.cond_jump(OpCode::Test, ie.b(), 0, 1 - cond);
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        let reg = e.reg().unwrap_or(0);
        self.cond_jump(OpCode::TestSet, NO_REG, reg, cond)
    }

    /// Emit code to fall through when `e` is true and jump when false.
    pub(super) fn go_if_true(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::Jmp(pc) => {
                self.negate_condition(pc);
                pc as i32
            }
            ExpKind::K(_) | ExpKind::KFlt(_) | ExpKind::KInt(_) | ExpKind::True => NO_JUMP,
            _ => self.jump_on_cond(e, 0)?,
        };
        let mut f = e.f;
        self.concat(&mut f, pc)?;
        e.f = f;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    /// Emit code to fall through when `e` is false and jump when true.
    pub(super) fn go_if_false(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::Jmp(pc) => pc as i32,
            ExpKind::Nil | ExpKind::False => NO_JUMP,
            _ => self.jump_on_cond(e, 1)?,
        };
        let mut t = e.t;
        self.concat(&mut t, pc)?;
        e.t = t;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::Nil | ExpKind::False => e.kind = ExpKind::True,
            ExpKind::K(_) | ExpKind::KFlt(_) | ExpKind::KInt(_) | ExpKind::True => {
                e.kind = ExpKind::False
            }
            ExpKind::Jmp(pc) => self.negate_condition(pc),
            ExpKind::Reloc(_) | ExpKind::NonReloc(_) => {
                self.discharge_to_any_reg(e)?;
                self.free_exp(e);
                let reg = e.reg().unwrap_or(0);
                e.kind = ExpKind::Reloc(self.code_abc(OpCode::Not, 0, reg, 0)?);
            }
            _ => debug_assert!(false, "cannot negate {:?}", e.kind),
        }
        std::mem::swap(&mut e.f, &mut e.t);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    /// Turn `t` (register or upvalue) into the indexed expression `t[k]`.
    pub(super) fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> CResult<()> {
        debug_assert!(!t.has_jumps());
        let (tt, base) = match t.kind {
            ExpKind::Upval(idx) => (idx, IndexBase::Upval),
            ExpKind::Local(r) | ExpKind::NonReloc(r) => (r, IndexBase::Local),
            other => {
                debug_assert!(false, "cannot index {other:?}");
                (0, IndexBase::Local)
            }
        };
        let idx = self.exp_to_rk(k)?;
        t.kind = ExpKind::Indexed { t: tt, idx, base };
        Ok(())
    }

    // ---- Operators ----

    fn to_numeral(e: &ExpDesc) -> Option<Number> {
        if e.has_jumps() {
            return None;
        }
        match e.kind {
            ExpKind::KInt(i) => Some(Number::Int(i)),
            ExpKind::KFlt(f) => Some(Number::Float(f)),
            _ => None,
        }
    }

    /// Try to evaluate `e1 op e2` at compile time, leaving the result in `e1`.
    fn const_folding(op: ArithOp, e1: &mut ExpDesc, e2: &ExpDesc) -> bool {
        let (Some(v1), Some(v2)) = (Self::to_numeral(e1), Self::to_numeral(e2)) else {
            return false;
        };
        let valid = if op.is_bitwise() {
            v1.to_integer().is_some() && v2.to_integer().is_some()
        } else if matches!(op, ArithOp::Div | ArithOp::IDiv | ArithOp::Mod) {
            v2.to_f64() != 0.0
        } else {
            true
        };
        if !valid {
            return false;
        }
        match arith(op, v1, v2) {
            Ok(Number::Int(i)) => e1.kind = ExpKind::KInt(i),
            // NaN and 0.0 (which may be -0.0) stay runtime operations
            Ok(Number::Float(n)) if n.is_nan() || n == 0.0 => return false,
            Ok(Number::Float(n)) => e1.kind = ExpKind::KFlt(n),
            Err(_) => return false,
        }
        true
    }

    fn code_unexp_val(&mut self, op: OpCode, e: &mut ExpDesc, line: u32) -> CResult<()> {
        let r = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        e.kind = ExpKind::Reloc(self.code_abc(op, 0, r, 0)?);
        self.fix_line(line);
        Ok(())
    }

    fn code_binexp_val(&mut self, op: OpCode, e1: &mut ExpDesc, e2: &mut ExpDesc, line: u32) -> CResult<()> {
        let rk2 = self.exp_to_rk(e2)?;
        let rk1 = self.exp_to_rk(e1)?;
        self.free_exps(e1, e2);
        e1.kind = ExpKind::Reloc(self.code_abc(op, 0, rk1, rk2)?);
        self.fix_line(line);
        Ok(())
    }

    fn code_comp(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CResult<()> {
        let rk1 = match e1.kind {
            ExpKind::K(k) => rk_as_k(k),
            _ => e1.reg().unwrap_or(0),
        };
        let rk2 = self.exp_to_rk(e2)?;
        self.free_exps(e1, e2);
        let pc = match op {
            BinOp::Ne => self.cond_jump(OpCode::Eq, 0, rk1, rk2)?,
            BinOp::Gt => self.cond_jump(OpCode::Lt, 1, rk2, rk1)?,
            BinOp::Ge => self.cond_jump(OpCode::Le, 1, rk2, rk1)?,
            BinOp::Eq => self.cond_jump(OpCode::Eq, 1, rk1, rk2)?,
            BinOp::Lt => self.cond_jump(OpCode::Lt, 1, rk1, rk2)?,
            _ => self.cond_jump(OpCode::Le, 1, rk1, rk2)?,
        };
        e1.kind = ExpKind::Jmp(pc as usize);
        Ok(())
    }

    /// Apply a unary operator.
    pub(super) fn prefix(&mut self, op: UnOp, e: &mut ExpDesc, line: u32) -> CResult<()> {
        let zero = ExpDesc::new(ExpKind::KInt(0));
        match op {
            UnOp::Minus => {
                if !Self::const_folding(ArithOp::Unm, e, &zero) {
                    self.code_unexp_val(OpCode::Unm, e, line)?;
                }
            }
            UnOp::BNot => {
                if !Self::const_folding(ArithOp::BNot, e, &zero) {
                    self.code_unexp_val(OpCode::BNot, e, line)?;
                }
            }
            UnOp::Len => self.code_unexp_val(OpCode::Len, e, line)?,
            UnOp::Not => self.code_not(e)?,
        }
        Ok(())
    }

    /// Prepare the left operand before the right one is parsed.
    pub(super) fn infix(&mut self, op: BinOp, v: &mut ExpDesc) -> CResult<()> {
        match op {
            BinOp::And => self.go_if_true(v),
            BinOp::Or => self.go_if_false(v),
            BinOp::Concat => self.exp_to_next_reg(v),
            _ if op.arith().is_some() => {
                // numerals stay as they are for constant folding
                if Self::to_numeral(v).is_none() {
                    self.exp_to_rk(v)?;
                }
                Ok(())
            }
            _ => {
                self.exp_to_rk(v)?;
                Ok(())
            }
        }
    }

    /// Finish a binary operation once both operands are parsed.
    pub(super) fn posfix(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc, line: u32) -> CResult<()> {
        match op {
            BinOp::And => {
                debug_assert_eq!(e1.t, NO_JUMP);
                self.discharge_vars(e2)?;
                let mut f = e2.f;
                self.concat(&mut f, e1.f)?;
                e2.f = f;
                *e1 = *e2;
            }
            BinOp::Or => {
                debug_assert_eq!(e1.f, NO_JUMP);
                self.discharge_vars(e2)?;
                let mut t = e2.t;
                self.concat(&mut t, e1.t)?;
                e2.t = t;
                *e1 = *e2;
            }
            BinOp::Concat => {
                self.exp_to_val(e2)?;
                if let ExpKind::Reloc(pc) = e2.kind {
                    if self.inst(pc).opcode() == OpCode::Concat {
                        let r1 = e1.reg().unwrap_or(0);
                        debug_assert_eq!(r1 + 1, self.inst(pc).b());
                        self.free_exp(e1);
                        self.inst_mut(pc).set_b(r1);
                        e1.kind = ExpKind::Reloc(pc);
                        return Ok(());
                    }
                }
                self.exp_to_next_reg(e2)?;
                self.code_binexp_val(OpCode::Concat, e1, e2, line)?;
            }
            BinOp::Eq | BinOp::Lt | BinOp::Le | BinOp::Ne | BinOp::Gt | BinOp::Ge => {
                self.code_comp(op, e1, e2)?;
            }
            _ => {
                let aop = op.arith().unwrap_or(ArithOp::Add);
                if !Self::const_folding(aop, e1, e2) {
                    self.code_binexp_val(arith_opcode(aop), e1, e2, line)?;
                }
            }
        }
        Ok(())
    }

    /// Flush pending list items of a table constructor.
    pub(super) fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) -> CResult<()> {
        let c = (nelems.saturating_sub(1)) / FIELDS_PER_FLUSH + 1;
        let b = if tostore == MULTRET { 0 } else { tostore as u32 };
        if c <= MAX_C {
            self.code_abc(OpCode::SetList, base, b, c)?;
        } else if c <= MAX_AX {
            self.code_abc(OpCode::SetList, base, b, 0)?;
            self.code_extra_arg(c)?;
        } else {
            return Err(self.syntax_error("constructor too long"));
        }
        self.fs.freereg = base + 1;
        Ok(())
    }
}
