/// Scope management: locals, upvalue resolution, blocks, labels and gotos.
use super::expr::{ExpDesc, ExpKind};
use super::{CResult, CompileError, Compiler, MAX_UPVALUES, MAX_VARS};
use crate::proto::{LocalVar, UpvalDesc};
use luna_core::LuaStr;


/// A lexical block of the function being compiled.
#[derive(Clone, Debug)]
pub(crate) struct BlockCnt {
    /// Index of the first label visible only in this block.
    pub firstlabel: usize,
    /// Index of the first goto still pending in this block.
    pub firstgoto: usize,
    /// Active locals outside the block.
    pub nactvar: u32,
    /// Some local of this block is captured by a closure.
    pub upval: bool,
    pub isloop: bool,
}

/// A label, or a pending goto (whose `pc` heads a jump list).
#[derive(Clone, Debug)]
pub(crate) struct LabelDesc {
    pub name: LuaStr,
    pub pc: i32,
    pub line: u32,
    /// Active locals at the point of definition.
    pub nactvar: u32,
}

impl Compiler<'_> {
    // ---- Locals ----

    /// Declare a local; it becomes visible after `adjust_local_vars`.
    pub(super) fn new_local_var(&mut self, name: LuaStr) -> CResult<()> {
        if self.fs.actvar.len() + 1 > MAX_VARS as usize {
            return Err(self.error_limit(MAX_VARS, "local variables"));
        }
        let idx = self.fs.proto.local_vars.len() as u32;
        self.fs.proto.local_vars.push(LocalVar { name, start_pc: 0, end_pc: 0 });
        self.fs.actvar.push(idx);
        Ok(())
    }

    pub(super) fn new_local_var_literal(&mut self, name: &str) -> CResult<()> {
        self.new_local_var(LuaStr::from(name))
    }

    fn local_var_mut(&mut self, i: u32) -> &mut LocalVar {
        let idx = self.fs.actvar[i as usize] as usize;
        &mut self.fs.proto.local_vars[idx]
    }

    fn local_var_name(&self, i: u32) -> LuaStr {
        let idx = self.fs.actvar[i as usize] as usize;
        self.fs.proto.local_vars[idx].name.clone()
    }

    /// Activate the last `n` declared locals.
    pub(super) fn adjust_local_vars(&mut self, n: u32) {
        self.fs.nactvar += n;
        let pc = self.pc() as u32;
        for i in self.fs.nactvar - n..self.fs.nactvar {
            self.local_var_mut(i).start_pc = pc;
        }
    }

    /// Set the start pc of active local `i`.
    pub(super) fn set_local_start(&mut self, i: u32) {
        let pc = self.pc() as u32;
        self.local_var_mut(i).start_pc = pc;
    }

    fn remove_vars(&mut self, tolevel: u32) {
        let pc = self.pc() as u32;
        while self.fs.nactvar > tolevel {
            self.fs.nactvar -= 1;
            let i = self.fs.nactvar;
            self.local_var_mut(i).end_pc = pc;
        }
        self.fs.actvar.truncate(tolevel as usize);
    }

    // ---- Name resolution ----

    /// Function state `level` steps out from the current one.
    fn func_at(&self, level: usize) -> &super::FuncState {
        if level == 0 {
            &self.fs
        } else {
            &self.enclosing[self.enclosing.len() - level]
        }
    }

    fn func_at_mut(&mut self, level: usize) -> &mut super::FuncState {
        if level == 0 {
            &mut self.fs
        } else {
            let n = self.enclosing.len();
            &mut self.enclosing[n - level]
        }
    }

    fn search_var(&self, level: usize, name: &LuaStr) -> Option<u32> {
        let fs = self.func_at(level);
        (0..fs.nactvar).rev().find(|&i| {
            let idx = fs.actvar[i as usize] as usize;
            &fs.proto.local_vars[idx].name == name
        })
    }

    fn search_upvalue(&self, level: usize, name: &LuaStr) -> Option<u32> {
        self.func_at(level)
            .proto
            .upvalues
            .iter()
            .position(|uv| uv.name.as_ref() == Some(name))
            .map(|i| i as u32)
    }

    /// Mark the block owning local `var` as having a captured variable.
    fn mark_upval(&mut self, level: usize, var: u32) {
        let fs = self.func_at_mut(level);
        if let Some(bl) = fs.blocks.iter_mut().rev().find(|bl| bl.nactvar <= var) {
            bl.upval = true;
        }
    }

    pub(super) fn new_upvalue(&mut self, level: usize, name: LuaStr, v: ExpKind) -> CResult<u32> {
        let fs = self.func_at(level);
        let count = fs.proto.upvalues.len() as u32;
        if count + 1 > MAX_UPVALUES {
            let line_defined = fs.proto.line_defined;
            return Err(self.error_limit_at(line_defined, MAX_UPVALUES, "upvalues"));
        }
        let (in_stack, index) = match v {
            ExpKind::Local(r) => (true, r),
            ExpKind::Upval(i) => (false, i),
            _ => (true, 0),
        };
        self.func_at_mut(level).proto.upvalues.push(UpvalDesc {
            name: Some(name),
            in_stack,
            index: index as u8,
        });
        Ok(count)
    }

    /// Find `name` as a local of function `level` or an upvalue reaching it.
    /// Returns `Void` when the name is global.
    fn single_var_aux(&mut self, level: usize, name: &LuaStr, base: bool) -> CResult<ExpKind> {
        if level > self.enclosing.len() {
            return Ok(ExpKind::Void);
        }
        if let Some(v) = self.search_var(level, name) {
            if !base {
                self.mark_upval(level, v);
            }
            return Ok(ExpKind::Local(v));
        }
        let idx = match self.search_upvalue(level, name) {
            Some(idx) => idx,
            None => {
                let outer = self.single_var_aux(level + 1, name, false)?;
                if outer == ExpKind::Void {
                    return Ok(ExpKind::Void);
                }
                self.new_upvalue(level, name.clone(), outer)?
            }
        };
        Ok(ExpKind::Upval(idx))
    }

    /// Resolve a variable name; globals become `_ENV[name]`.
    pub(super) fn single_var(&mut self, name: LuaStr) -> CResult<ExpDesc> {
        let kind = self.single_var_aux(0, &name, true)?;
        if kind != ExpKind::Void {
            return Ok(ExpDesc::new(kind));
        }
        let env = LuaStr::from("_ENV");
        let mut var = ExpDesc::new(self.single_var_aux(0, &env, true)?);
        debug_assert!(var.kind != ExpKind::Void);
        let mut key = ExpDesc::new(ExpKind::K(self.string_k(name)?));
        self.indexed(&mut var, &mut key)?;
        Ok(var)
    }

    // ---- Blocks ----

    pub(super) fn enter_block(&mut self, isloop: bool) {
        let fs = &mut self.fs;
        fs.blocks.push(BlockCnt {
            firstlabel: fs.labels.len(),
            firstgoto: fs.gotos.len(),
            nactvar: fs.nactvar,
            upval: false,
            isloop,
        });
        debug_assert_eq!(fs.freereg, fs.nactvar);
    }

    pub(super) fn leave_block(&mut self) -> CResult<()> {
        let Some(bl) = self.fs.blocks.last().cloned() else {
            return Ok(());
        };
        let has_previous = self.fs.blocks.len() > 1;
        if has_previous && bl.upval {
            // jump to the next instruction, closing the block's upvalues
            let j = self.jump()?;
            self.patch_close(j, bl.nactvar);
            self.patch_to_here(j)?;
        }
        if bl.isloop {
            self.break_label()?;
        }
        self.fs.blocks.pop();
        self.remove_vars(bl.nactvar);
        debug_assert_eq!(bl.nactvar, self.fs.nactvar);
        self.fs.freereg = self.fs.nactvar;
        self.fs.labels.truncate(bl.firstlabel);
        if has_previous {
            self.move_gotos_out(&bl)?;
        } else if bl.firstgoto < self.fs.gotos.len() {
            let gt = self.fs.gotos[bl.firstgoto].clone();
            return Err(self.undef_goto(&gt));
        }
        Ok(())
    }

    /// Does the innermost block have a captured local?
    pub(super) fn block_has_upval(&self) -> bool {
        self.fs.blocks.last().is_some_and(|bl| bl.upval)
    }

    // ---- Labels and gotos ----

    fn new_label_entry(list: &mut Vec<LabelDesc>, name: LuaStr, line: u32, pc: i32, nactvar: u32) -> usize {
        list.push(LabelDesc { name, pc, line, nactvar });
        list.len() - 1
    }

    /// Resolve pending goto `g` to `label` and drop it.
    fn close_goto(&mut self, g: usize, label: &LabelDesc) -> CResult<()> {
        let gt = self.fs.gotos[g].clone();
        debug_assert!(gt.name == label.name);
        if gt.nactvar < label.nactvar {
            let vname = self.local_var_name(gt.nactvar);
            return Err(self.sem_error(format!(
                "<goto {}> at line {} jumps into the scope of local '{}'",
                gt.name, gt.line, vname
            )));
        }
        self.patch_list(gt.pc, label.pc as usize)?;
        self.fs.gotos.remove(g);
        Ok(())
    }

    /// Try to resolve goto `g` against the labels of the current block.
    fn find_label(&mut self, g: usize) -> CResult<bool> {
        let Some(bl) = self.fs.blocks.last().cloned() else {
            return Ok(false);
        };
        let gt = self.fs.gotos[g].clone();
        let found = self.fs.labels[bl.firstlabel..]
            .iter()
            .find(|lb| lb.name == gt.name)
            .cloned();
        let Some(lb) = found else {
            return Ok(false);
        };
        if gt.nactvar > lb.nactvar && (bl.upval || self.fs.labels.len() > bl.firstlabel) {
            self.patch_close(gt.pc, lb.nactvar);
        }
        self.close_goto(g, &lb)?;
        Ok(true)
    }

    /// Resolve every pending goto of the current block that targets `lb`.
    fn find_gotos(&mut self, lb: &LabelDesc) -> CResult<()> {
        let mut i = self.fs.blocks.last().map_or(0, |bl| bl.firstgoto);
        while i < self.fs.gotos.len() {
            if self.fs.gotos[i].name == lb.name {
                self.close_goto(i, lb)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Hand the pending gotos of a finished block to the enclosing one.
    fn move_gotos_out(&mut self, bl: &BlockCnt) -> CResult<()> {
        let mut i = bl.firstgoto;
        while i < self.fs.gotos.len() {
            let gt = self.fs.gotos[i].clone();
            if gt.nactvar > bl.nactvar {
                if bl.upval {
                    self.patch_close(gt.pc, bl.nactvar);
                }
                self.fs.gotos[i].nactvar = bl.nactvar;
            }
            if !self.find_label(i)? {
                i += 1;
            }
        }
        Ok(())
    }

    /// Resolve the `break`s of a loop block to the current pc.
    fn break_label(&mut self) -> CResult<()> {
        let pc = self.get_label() as i32;
        let nactvar = self.fs.nactvar;
        let l = Self::new_label_entry(&mut self.fs.labels, LuaStr::from("break"), 0, pc, nactvar);
        let lb = self.fs.labels[l].clone();
        self.find_gotos(&lb)
    }

    fn undef_goto(&self, gt: &LabelDesc) -> Box<CompileError> {
        if gt.name.as_bytes() == b"break" {
            self.sem_error(format!("break at line {} not inside a loop", gt.line))
        } else {
            self.sem_error(format!("no visible label '{}' for goto at line {}", gt.name, gt.line))
        }
    }

    fn check_repeated(&self, name: &LuaStr) -> CResult<()> {
        let first = self.fs.blocks.last().map_or(0, |bl| bl.firstlabel);
        if let Some(lb) = self.fs.labels[first..].iter().find(|lb| &lb.name == name) {
            return Err(self.sem_error(format!(
                "label '{}' already defined on line {}",
                name, lb.line
            )));
        }
        Ok(())
    }

    /// `goto name` or `break`, given the jump already emitted for it.
    pub(super) fn goto_stat(&mut self, pc: i32) -> CResult<()> {
        let line = self.lexer.line();
        let name = if self.test_next(&crate::token::Token::Goto)? {
            self.str_check_name()?
        } else {
            self.next()?;
            LuaStr::from("break")
        };
        let nactvar = self.fs.nactvar;
        let g = Self::new_label_entry(&mut self.fs.gotos, name, line, pc, nactvar);
        self.find_label(g)?;
        Ok(())
    }

    /// `::name::`
    pub(super) fn label_stat(&mut self, name: LuaStr, line: u32) -> CResult<()> {
        use crate::token::Token;
        self.check_repeated(&name)?;
        self.check_next(&Token::DoubleColon)?;
        let pc = self.get_label() as i32;
        let nactvar = self.fs.nactvar;
        let l = Self::new_label_entry(&mut self.fs.labels, name, line, pc, nactvar);
        // skip other no-op statements
        while matches!(self.lexer.token(), Token::Semi | Token::DoubleColon) {
            self.statement()?;
        }
        if self.lexer.token().is_block_follow(false) {
            // a label at the end of a block sees none of the block's locals
            if let Some(bl) = self.fs.blocks.last() {
                self.fs.labels[l].nactvar = bl.nactvar;
            }
        }
        let lb = self.fs.labels[l].clone();
        self.find_gotos(&lb)
    }
}
