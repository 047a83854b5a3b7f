/// Single-pass Lua 5.3 compiler: source → Proto bytecode.
///
/// The parser is recursive descent and generates code as it goes; there is
/// no syntax tree. Expressions are tracked by [`ExpDesc`] values that say
/// where a partially compiled value lives until it is forced somewhere.
mod code;
pub mod expr;
mod scope;

use crate::lexer::{LexError, Lexer};
use crate::opcode::{int2fb, OpCode, MAX_BX};
use crate::proto::{Constant, Proto};
use crate::token::Token;
use expr::{BinOp, ExpDesc, ExpKind, UnOp, MULTRET, NO_JUMP, UNARY_PRIORITY};
use luna_core::LuaStr;
use scope::{BlockCnt, LabelDesc};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Registers per function.
pub(crate) const MAX_REGS: u32 = 255;
/// Active locals per function.
pub(crate) const MAX_VARS: u32 = 200;
pub(crate) const MAX_UPVALUES: u32 = 255;
/// Nesting of syntactic constructs (expressions, blocks, assignments).
const MAX_LEVELS: u32 = 200;

/// A positioned compile error.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{chunk}:{line}: {message}{}", near_suffix(.near))]
pub struct CompileError {
    pub message: String,
    /// Display form of the chunk name (see [`crate::chunk_id`]).
    pub chunk: String,
    pub line: u32,
    /// Quoted token the error points at; absent for semantic errors.
    pub near: Option<String>,
}

/// Parser results. The error is boxed so the recursive descent frames stay
/// small enough for the full nesting limit.
pub(super) type CResult<T> = Result<T, Box<CompileError>>;

fn near_suffix(near: &Option<String>) -> String {
    match near {
        Some(n) => format!(" near {n}"),
        None => String::new(),
    }
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError {
            message: e.message,
            chunk: String::new(),
            line: e.line,
            near: e.near,
        }
    }
}

/// State for a single function being compiled.
pub(crate) struct FuncState {
    pub proto: Proto,
    /// Constant pool index by value.
    pub kcache: HashMap<Constant, u32>,
    pub blocks: Vec<BlockCnt>,
    /// Indices into `proto.local_vars` of declared locals, by register.
    pub actvar: Vec<u32>,
    /// Number of active locals.
    pub nactvar: u32,
    /// First free register.
    pub freereg: u32,
    /// Jumps pending to the next emitted instruction.
    pub jpc: i32,
    /// pc of the last jump target.
    pub lasttarget: usize,
    pub labels: Vec<LabelDesc>,
    pub gotos: Vec<LabelDesc>,
}

impl FuncState {
    fn new(source: LuaStr, line_defined: u32) -> Self {
        let mut proto = Proto::new();
        proto.source = Some(source);
        proto.line_defined = line_defined;
        FuncState {
            proto,
            kcache: HashMap::new(),
            blocks: Vec::new(),
            actvar: Vec::new(),
            nactvar: 0,
            freereg: 0,
            jpc: NO_JUMP,
            lasttarget: 0,
            labels: Vec::new(),
            gotos: Vec::new(),
        }
    }
}

/// Table constructor bookkeeping.
struct ConsControl {
    /// Last list item read.
    v: ExpDesc,
    /// Register holding the table.
    table: u32,
    /// Record items.
    nh: u32,
    /// Array items.
    na: u32,
    /// Array items pending a flush.
    tostore: u32,
}

/// The compiler: the lexer plus the stack of functions being compiled.
pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    /// Chunk name as shown in messages.
    chunk: String,
    /// Raw chunk name stored in every prototype.
    source: LuaStr,
    /// Innermost function.
    fs: FuncState,
    /// Enclosing functions, outermost first.
    enclosing: Vec<FuncState>,
    level: u32,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a [u8], chunkname: &str) -> CResult<Self> {
        let chunk = crate::chunk_id(chunkname);
        let lexer = Lexer::new(source).map_err(|e| {
            Box::new(CompileError {
                chunk: chunk.clone(),
                ..CompileError::from(e)
            })
        })?;
        let name = LuaStr::from(chunkname);
        Ok(Compiler {
            lexer,
            chunk,
            fs: FuncState::new(name.clone(), 0),
            source: name,
            enclosing: Vec::new(),
            level: 0,
        })
    }

    // ---- Errors ----

    /// Error at the current token.
    fn syntax_error(&self, msg: impl Into<String>) -> Box<CompileError> {
        Box::new(CompileError {
            message: msg.into(),
            chunk: self.chunk.clone(),
            line: self.lexer.line(),
            near: Some(self.lexer.near()),
        })
    }

    /// Error without a token reference.
    fn sem_error(&self, msg: impl Into<String>) -> Box<CompileError> {
        Box::new(CompileError {
            message: msg.into(),
            chunk: self.chunk.clone(),
            line: self.lexer.line(),
            near: None,
        })
    }

    fn error_limit(&self, limit: u32, what: &str) -> Box<CompileError> {
        self.error_limit_at(self.fs.proto.line_defined, limit, what)
    }

    fn error_limit_at(&self, line_defined: u32, limit: u32, what: &str) -> Box<CompileError> {
        let location = if line_defined == 0 {
            "main function".to_string()
        } else {
            format!("function at line {line_defined}")
        };
        self.syntax_error(format!("too many {what} (limit is {limit}) in {location}"))
    }

    fn error_expected(&self, tok: &Token) -> Box<CompileError> {
        self.syntax_error(format!("{} expected", token_desc(tok)))
    }

    fn enter_level(&mut self) -> CResult<()> {
        self.level += 1;
        if self.level > MAX_LEVELS {
            return Err(self.syntax_error("chunk has too many syntax levels"));
        }
        Ok(())
    }

    fn leave_level(&mut self) {
        self.level -= 1;
    }

    // ---- Token helpers ----

    fn next(&mut self) -> CResult<()> {
        let res = self.lexer.next();
        res.map(|_| ()).map_err(|e| self.lex_error(e))
    }

    fn lex_error(&self, e: LexError) -> Box<CompileError> {
        Box::new(CompileError {
            chunk: self.chunk.clone(),
            ..CompileError::from(e)
        })
    }

    fn peek(&mut self) -> CResult<Token> {
        let res = self.lexer.peek().cloned();
        res.map_err(|e| self.lex_error(e))
    }

    fn check(&self, tok: &Token) -> CResult<()> {
        if self.lexer.token() != tok {
            return Err(self.error_expected(tok));
        }
        Ok(())
    }

    fn check_next(&mut self, tok: &Token) -> CResult<()> {
        self.check(tok)?;
        self.next()
    }

    fn test_next(&mut self, tok: &Token) -> CResult<bool> {
        if self.lexer.token() == tok {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Expect `what` closing the `who` opened at line `where_`.
    fn check_match(&mut self, what: &Token, who: &Token, where_: u32) -> CResult<()> {
        if self.test_next(what)? {
            return Ok(());
        }
        if where_ == self.lexer.line() {
            Err(self.error_expected(what))
        } else {
            Err(self.syntax_error(format!(
                "{} expected (to close {} at line {})",
                token_desc(what),
                token_desc(who),
                where_
            )))
        }
    }

    fn str_check_name(&mut self) -> CResult<LuaStr> {
        match self.lexer.token() {
            Token::Name(s) => {
                let s = s.clone();
                self.next()?;
                Ok(s)
            }
            _ => Err(self.error_expected(&Token::Name(LuaStr::from("")))),
        }
    }

    fn code_string(&mut self, s: LuaStr) -> CResult<ExpDesc> {
        Ok(ExpDesc::new(ExpKind::K(self.string_k(s)?)))
    }

    fn check_name(&mut self) -> CResult<ExpDesc> {
        let s = self.str_check_name()?;
        self.code_string(s)
    }

    fn block_follow(&self, with_until: bool) -> bool {
        self.lexer.token().is_block_follow(with_until)
    }

    // ---- Functions ----

    /// Start compiling a nested function.
    fn open_function(&mut self, line: u32) {
        let child = FuncState::new(self.source.clone(), line);
        let parent = std::mem::replace(&mut self.fs, child);
        self.enclosing.push(parent);
        self.enter_block(false);
    }

    /// Emit the final return and close the outermost block of the function.
    fn close_function_body(&mut self) -> CResult<()> {
        self.ret(0, 0)?;
        self.leave_block()?;
        trace!(
            line_defined = self.fs.proto.line_defined,
            instructions = self.fs.proto.code.len(),
            constants = self.fs.proto.constants.len(),
            "closed function prototype"
        );
        Ok(())
    }

    /// Finish a nested function and emit its CLOSURE in the parent.
    fn close_function(&mut self) -> CResult<ExpDesc> {
        self.close_function_body()?;
        let Some(parent) = self.enclosing.pop() else {
            return Err(self.sem_error("no enclosing function"));
        };
        let child = std::mem::replace(&mut self.fs, parent);
        let idx = self.fs.proto.protos.len() as u32;
        if idx >= MAX_BX {
            return Err(self.error_limit(MAX_BX, "functions"));
        }
        self.fs.proto.protos.push(Rc::new(child.proto));
        let mut e = ExpDesc::new(ExpKind::Reloc(self.code_abx(OpCode::Closure, 0, idx)?));
        self.exp_to_next_reg(&mut e)?;
        Ok(e)
    }

    /// Compile the main chunk.
    fn main_function(mut self) -> CResult<Proto> {
        self.enter_block(false);
        self.fs.proto.is_vararg = true;
        self.new_upvalue(0, LuaStr::from("_ENV"), ExpKind::Local(0))?;
        self.statlist()?;
        self.check(&Token::Eof)?;
        self.close_function_body()?;
        Ok(self.fs.proto)
    }

    // ---- Statements ----

    fn statlist(&mut self) -> CResult<()> {
        while !self.block_follow(true) {
            if self.lexer.token() == &Token::Return {
                // 'return' must be the last statement
                return self.statement();
            }
            self.statement()?;
        }
        Ok(())
    }

    fn statement(&mut self) -> CResult<()> {
        let line = self.lexer.line();
        self.enter_level()?;
        match self.lexer.token() {
            Token::Semi => self.next()?,
            Token::If => self.if_stat(line)?,
            Token::While => self.while_stat(line)?,
            Token::Do => {
                self.next()?;
                self.block()?;
                self.check_match(&Token::End, &Token::Do, line)?;
            }
            Token::For => self.for_stat(line)?,
            Token::Repeat => self.repeat_stat(line)?,
            Token::Function => self.func_stat(line)?,
            Token::Local => {
                self.next()?;
                if self.test_next(&Token::Function)? {
                    self.local_func()?;
                } else {
                    self.local_stat()?;
                }
            }
            Token::DoubleColon => {
                self.next()?;
                let name = self.str_check_name()?;
                self.label_stat(name, line)?;
            }
            Token::Return => {
                self.next()?;
                self.ret_stat()?;
            }
            Token::Break | Token::Goto => {
                let j = self.jump()?;
                self.goto_stat(j)?;
            }
            _ => self.expr_stat()?,
        }
        debug_assert!(
            self.fs.proto.max_stack_size as u32 >= self.fs.freereg
                && self.fs.freereg >= self.fs.nactvar
        );
        self.fs.freereg = self.fs.nactvar;
        self.leave_level();
        Ok(())
    }

    fn block(&mut self) -> CResult<()> {
        self.enter_block(false);
        self.statlist()?;
        self.leave_block()
    }

    /// Condition of a loop: returns the jump list taken when it is false.
    fn cond(&mut self) -> CResult<i32> {
        let mut v = self.expr()?;
        if v.kind == ExpKind::Nil {
            v.kind = ExpKind::False;
        }
        self.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn test_then_block(&mut self, escape_list: &mut i32) -> CResult<()> {
        self.next()?;
        let mut v = self.expr()?;
        self.check_next(&Token::Then)?;
        let jf;
        if matches!(self.lexer.token(), Token::Goto | Token::Break) {
            // 'if c then goto l' jumps straight on the condition
            self.go_if_false(&mut v)?;
            self.enter_block(false);
            self.goto_stat(v.t)?;
            while self.test_next(&Token::Semi)? {}
            if self.block_follow(false) {
                return self.leave_block();
            }
            jf = self.jump()?;
        } else {
            self.go_if_true(&mut v)?;
            self.enter_block(false);
            jf = v.f;
        }
        self.statlist()?;
        self.leave_block()?;
        if matches!(self.lexer.token(), Token::Else | Token::ElseIf) {
            let j = self.jump()?;
            self.concat(escape_list, j)?;
        }
        self.patch_to_here(jf)
    }

    fn if_stat(&mut self, line: u32) -> CResult<()> {
        let mut escape_list = NO_JUMP;
        self.test_then_block(&mut escape_list)?;
        while self.lexer.token() == &Token::ElseIf {
            self.test_then_block(&mut escape_list)?;
        }
        if self.test_next(&Token::Else)? {
            self.block()?;
        }
        self.check_match(&Token::End, &Token::If, line)?;
        self.patch_to_here(escape_list)
    }

    fn while_stat(&mut self, line: u32) -> CResult<()> {
        self.next()?;
        let while_init = self.get_label();
        let cond_exit = self.cond()?;
        self.enter_block(true);
        self.check_next(&Token::Do)?;
        self.block()?;
        let j = self.jump()?;
        self.patch_list(j, while_init)?;
        self.check_match(&Token::End, &Token::While, line)?;
        self.leave_block()?;
        self.patch_to_here(cond_exit)
    }

    fn repeat_stat(&mut self, line: u32) -> CResult<()> {
        let repeat_init = self.get_label();
        self.enter_block(true); // loop block
        self.enter_block(false); // scope block
        self.next()?;
        self.statlist()?;
        self.check_match(&Token::Until, &Token::Repeat, line)?;
        // the condition can see the body's locals
        let cond_exit = self.cond()?;
        if self.block_has_upval() {
            let nactvar = self.fs.blocks.last().map_or(0, |bl| bl.nactvar);
            self.patch_close(cond_exit, nactvar);
        }
        self.leave_block()?;
        self.patch_list(cond_exit, repeat_init)?;
        self.leave_block()
    }

    fn exp1(&mut self) -> CResult<()> {
        let mut e = self.expr()?;
        self.exp_to_next_reg(&mut e)
    }

    fn for_body(&mut self, base: u32, line: u32, nvars: u32, is_num: bool) -> CResult<()> {
        self.adjust_local_vars(3); // control variables
        self.check_next(&Token::Do)?;
        let prep = if is_num {
            self.code_asbx(OpCode::ForPrep, base, NO_JUMP)? as i32
        } else {
            self.jump()?
        };
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.reserve_regs(nvars)?;
        self.block()?;
        self.leave_block()?;
        self.patch_to_here(prep)?;
        let end_for = if is_num {
            self.code_asbx(OpCode::ForLoop, base, NO_JUMP)?
        } else {
            self.code_abc(OpCode::TForCall, base, 0, nvars)?;
            self.fix_line(line);
            self.code_asbx(OpCode::TForLoop, base + 2, NO_JUMP)?
        };
        self.patch_list(end_for as i32, prep as usize + 1)?;
        self.fix_line(line);
        Ok(())
    }

    fn for_num(&mut self, var_name: LuaStr, line: u32) -> CResult<()> {
        let base = self.fs.freereg;
        self.new_local_var_literal("(for index)")?;
        self.new_local_var_literal("(for limit)")?;
        self.new_local_var_literal("(for step)")?;
        self.new_local_var(var_name)?;
        self.check_next(&Token::Assign)?;
        self.exp1()?;
        self.check_next(&Token::Comma)?;
        self.exp1()?;
        if self.test_next(&Token::Comma)? {
            self.exp1()?;
        } else {
            let reg = self.fs.freereg;
            let k = self.int_k(1)?;
            self.code_k(reg, k)?;
            self.reserve_regs(1)?;
        }
        self.for_body(base, line, 1, true)
    }

    fn for_list(&mut self, index_name: LuaStr) -> CResult<()> {
        let base = self.fs.freereg;
        let mut nvars = 4;
        self.new_local_var_literal("(for generator)")?;
        self.new_local_var_literal("(for state)")?;
        self.new_local_var_literal("(for control)")?;
        self.new_local_var(index_name)?;
        while self.test_next(&Token::Comma)? {
            let name = self.str_check_name()?;
            self.new_local_var(name)?;
            nvars += 1;
        }
        self.check_next(&Token::In)?;
        let line = self.lexer.line();
        let (nexps, mut e) = self.explist()?;
        self.adjust_assign(3, nexps, &mut e)?;
        self.check_stack(3)?; // room for the iterator call
        self.for_body(base, line, nvars - 3, false)
    }

    fn for_stat(&mut self, line: u32) -> CResult<()> {
        self.enter_block(true);
        self.next()?;
        let var_name = self.str_check_name()?;
        match self.lexer.token() {
            Token::Assign => self.for_num(var_name, line)?,
            Token::Comma | Token::In => self.for_list(var_name)?,
            _ => return Err(self.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(&Token::End, &Token::For, line)?;
        self.leave_block()
    }

    /// `a.b.c:m`; returns the target and whether it is a method.
    fn func_name(&mut self) -> CResult<(ExpDesc, bool)> {
        let name = self.str_check_name()?;
        let mut v = self.single_var(name)?;
        while self.lexer.token() == &Token::Dot {
            self.field_sel(&mut v)?;
        }
        let mut is_method = false;
        if self.lexer.token() == &Token::Colon {
            is_method = true;
            self.field_sel(&mut v)?;
        }
        Ok((v, is_method))
    }

    fn func_stat(&mut self, line: u32) -> CResult<()> {
        self.next()?;
        let (v, is_method) = self.func_name()?;
        let mut b = self.body(is_method, line)?;
        self.store_var(&v, &mut b)?;
        self.fix_line(line);
        Ok(())
    }

    fn local_func(&mut self) -> CResult<()> {
        let fvar = self.fs.nactvar;
        let name = self.str_check_name()?;
        self.new_local_var(name)?;
        self.adjust_local_vars(1); // visible inside its own body
        let line = self.lexer.line();
        self.body(false, line)?;
        // debug range starts after the closure is in place
        self.set_local_start(fvar);
        Ok(())
    }

    fn local_stat(&mut self) -> CResult<()> {
        let mut nvars = 0;
        loop {
            let name = self.str_check_name()?;
            self.new_local_var(name)?;
            nvars += 1;
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let (nexps, mut e) = if self.test_next(&Token::Assign)? {
            self.explist()?
        } else {
            (0, ExpDesc::void())
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.adjust_local_vars(nvars);
        Ok(())
    }

    /// Make `nexps` values fill exactly `nvars` registers.
    fn adjust_assign(&mut self, nvars: u32, nexps: u32, e: &mut ExpDesc) -> CResult<()> {
        let mut extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            extra = (extra + 1).max(0);
            self.set_returns(e, extra)?;
            if extra > 1 {
                self.reserve_regs(extra as u32 - 1)?;
            }
        } else {
            if e.kind != ExpKind::Void {
                self.exp_to_next_reg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.freereg;
                self.reserve_regs(extra as u32)?;
                self.code_nil(reg, extra as u32)?;
            }
        }
        if nexps > nvars {
            // drop the extra values
            self.fs.freereg -= nexps - nvars;
        }
        Ok(())
    }

    fn ret_stat(&mut self) -> CResult<()> {
        let (first, nret) = if self.block_follow(true) || self.lexer.token() == &Token::Semi {
            (0, 0)
        } else {
            let (n, mut e) = self.explist()?;
            if e.has_multret() {
                self.set_multret(&e)?;
                if let (ExpKind::Call(pc), 1) = (e.kind, n) {
                    self.fs.proto.get_mut(pc).set_opcode(OpCode::TailCall);
                    debug_assert_eq!(self.fs.proto.code[pc].a(), self.fs.nactvar);
                }
                (self.fs.nactvar, MULTRET)
            } else if n == 1 {
                (self.exp_to_any_reg(&mut e)?, 1)
            } else {
                self.exp_to_next_reg(&mut e)?;
                let first = self.fs.nactvar;
                debug_assert_eq!(n, self.fs.freereg - first);
                (first, n as i32)
            }
        };
        self.ret(first, nret)?;
        self.test_next(&Token::Semi)?;
        Ok(())
    }

    fn expr_stat(&mut self) -> CResult<()> {
        let v = self.suffixed_exp()?;
        if matches!(self.lexer.token(), Token::Assign | Token::Comma) {
            let mut lhs = vec![v];
            self.rest_assign(&mut lhs)
        } else {
            match v.kind {
                ExpKind::Call(pc) => {
                    // statement calls keep no results
                    self.fs.proto.get_mut(pc).set_c(1);
                    Ok(())
                }
                _ => Err(self.syntax_error("syntax error")),
            }
        }
    }

    /// If an indexed target already parsed uses the local or upvalue being
    /// assigned now, copy it to a fresh register first.
    fn check_conflict(&mut self, lhs: &mut [ExpDesc], v: &ExpDesc) -> CResult<()> {
        use expr::IndexBase;
        let extra = self.fs.freereg;
        let mut conflict = false;
        for lh in lhs.iter_mut() {
            if let ExpKind::Indexed { t, idx, base } = &mut lh.kind {
                let same_table = match (v.kind, *base) {
                    (ExpKind::Local(r), IndexBase::Local) => *t == r,
                    (ExpKind::Upval(u), IndexBase::Upval) => *t == u,
                    _ => false,
                };
                if same_table {
                    conflict = true;
                    *base = IndexBase::Local;
                    *t = extra;
                }
                if let ExpKind::Local(r) = v.kind {
                    if *idx == r {
                        conflict = true;
                        *idx = extra;
                    }
                }
            }
        }
        if conflict {
            match v.kind {
                ExpKind::Local(r) => self.code_abc(OpCode::Move, extra, r, 0)?,
                ExpKind::Upval(u) => self.code_abc(OpCode::GetUpval, extra, u, 0)?,
                _ => return Ok(()),
            };
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    /// Parse the rest of `t1, t2, ... = e1, e2, ...`; `lhs` holds the targets read so far.
    fn rest_assign(&mut self, lhs: &mut Vec<ExpDesc>) -> CResult<()> {
        let nvars = lhs.len() as u32;
        let Some(&current) = lhs.last() else {
            return Err(self.syntax_error("syntax error"));
        };
        if !current.is_var() {
            return Err(self.syntax_error("syntax error"));
        }
        if self.test_next(&Token::Comma)? {
            let nv = self.suffixed_exp()?;
            if !matches!(nv.kind, ExpKind::Indexed { .. }) {
                self.check_conflict(lhs, &nv)?;
            }
            if nvars + self.level > MAX_LEVELS {
                return Err(self.syntax_error("chunk has too many syntax levels"));
            }
            lhs.push(nv);
            self.rest_assign(lhs)?;
            lhs.pop();
        } else {
            self.check_next(&Token::Assign)?;
            let (nexps, mut e) = self.explist()?;
            if nexps != nvars {
                self.adjust_assign(nvars, nexps, &mut e)?;
            } else {
                self.set_oneret(&mut e);
                return self.store_var(&current, &mut e);
            }
        }
        // default assignment: take the value on top of the stack
        let target = lhs[nvars as usize - 1];
        let mut e = ExpDesc::new(ExpKind::NonReloc(self.fs.freereg - 1));
        self.store_var(&target, &mut e)
    }

    // ---- Expressions ----

    fn field_sel(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.exp_to_any_reg_up(v)?;
        self.next()?; // skip the dot or colon
        let mut key = self.check_name()?;
        self.indexed(v, &mut key)
    }

    /// `[exp]`
    fn y_index(&mut self) -> CResult<ExpDesc> {
        self.next()?;
        let mut v = self.expr()?;
        self.exp_to_val(&mut v)?;
        self.check_next(&Token::RBracket)?;
        Ok(v)
    }

    fn rec_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        let reg = self.fs.freereg;
        let mut key = if matches!(self.lexer.token(), Token::Name(_)) {
            self.check_name()?
        } else {
            self.y_index()?
        };
        cc.nh += 1;
        self.check_next(&Token::Assign)?;
        let rk_key = self.exp_to_rk(&mut key)?;
        let mut val = self.expr()?;
        let rk_val = self.exp_to_rk(&mut val)?;
        self.code_abc(OpCode::SetTable, cc.table, rk_key, rk_val)?;
        self.fs.freereg = reg;
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        if cc.v.kind == ExpKind::Void {
            return Ok(());
        }
        self.exp_to_next_reg(&mut cc.v)?;
        cc.v = ExpDesc::void();
        if cc.tostore == crate::opcode::FIELDS_PER_FLUSH {
            self.set_list(cc.table, cc.na, cc.tostore as i32)?;
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.set_multret(&cc.v)?;
            self.set_list(cc.table, cc.na, MULTRET)?;
            // the open item is not counted
            cc.na -= 1;
        } else {
            if cc.v.kind != ExpKind::Void {
                self.exp_to_next_reg(&mut cc.v)?;
            }
            self.set_list(cc.table, cc.na, cc.tostore as i32)?;
        }
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        cc.v = self.expr()?;
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    fn field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        match self.lexer.token() {
            Token::Name(_) => {
                if self.peek()? == Token::Assign {
                    self.rec_field(cc)
                } else {
                    self.list_field(cc)
                }
            }
            Token::LBracket => self.rec_field(cc),
            _ => self.list_field(cc),
        }
    }

    fn constructor(&mut self) -> CResult<ExpDesc> {
        let line = self.lexer.line();
        let pc = self.code_abc(OpCode::NewTable, 0, 0, 0)?;
        let mut t = ExpDesc::new(ExpKind::Reloc(pc));
        self.exp_to_next_reg(&mut t)?;
        let mut cc = ConsControl {
            v: ExpDesc::void(),
            table: t.reg().unwrap_or(0),
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.check_next(&Token::LBrace)?;
        loop {
            debug_assert!(cc.v.kind == ExpKind::Void || cc.tostore > 0);
            if self.lexer.token() == &Token::RBrace {
                break;
            }
            self.close_list_field(&mut cc)?;
            self.field(&mut cc)?;
            if !(self.test_next(&Token::Comma)? || self.test_next(&Token::Semi)?) {
                break;
            }
        }
        self.check_match(&Token::RBrace, &Token::LBrace, line)?;
        self.last_list_field(&mut cc)?;
        // size hints
        let inst = self.fs.proto.get_mut(pc);
        inst.set_b(int2fb(cc.na));
        inst.set_c(int2fb(cc.nh));
        Ok(t)
    }

    fn par_list(&mut self) -> CResult<()> {
        let mut nparams = 0;
        self.fs.proto.is_vararg = false;
        if self.lexer.token() != &Token::RParen {
            loop {
                match self.lexer.token() {
                    Token::Name(_) => {
                        let name = self.str_check_name()?;
                        self.new_local_var(name)?;
                        nparams += 1;
                    }
                    Token::DotDotDot => {
                        self.next()?;
                        self.fs.proto.is_vararg = true;
                    }
                    _ => return Err(self.syntax_error("<name> or '...' expected")),
                }
                if self.fs.proto.is_vararg || !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        self.adjust_local_vars(nparams);
        self.fs.proto.num_params = self.fs.nactvar as u8;
        let n = self.fs.nactvar;
        self.reserve_regs(n)
    }

    /// Function body after `function` (and its name); leaves the closure in
    /// the next register.
    fn body(&mut self, is_method: bool, line: u32) -> CResult<ExpDesc> {
        self.open_function(line);
        self.check_next(&Token::LParen)?;
        if is_method {
            self.new_local_var_literal("self")?;
            self.adjust_local_vars(1);
        }
        self.par_list()?;
        self.check_next(&Token::RParen)?;
        self.statlist()?;
        self.fs.proto.last_line_defined = self.lexer.line();
        self.check_match(&Token::End, &Token::Function, line)?;
        self.close_function()
    }

    /// Expression list; all but the last value go to consecutive registers.
    fn explist(&mut self) -> CResult<(u32, ExpDesc)> {
        let mut n = 1;
        let mut v = self.expr()?;
        while self.test_next(&Token::Comma)? {
            self.exp_to_next_reg(&mut v)?;
            v = self.expr()?;
            n += 1;
        }
        Ok((n, v))
    }

    fn func_args(&mut self, f: &mut ExpDesc, line: u32) -> CResult<()> {
        let mut args = match self.lexer.token().clone() {
            Token::LParen => {
                self.next()?;
                let args = if self.lexer.token() == &Token::RParen {
                    ExpDesc::void()
                } else {
                    let (_, args) = self.explist()?;
                    self.set_multret(&args)?;
                    args
                };
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                args
            }
            Token::LBrace => self.constructor()?,
            Token::String(s) => {
                let e = self.code_string(s)?;
                self.next()?;
                e
            }
            _ => return Err(self.syntax_error("function arguments expected")),
        };
        let base = f.reg().unwrap_or(0);
        let nparams = if args.has_multret() {
            MULTRET
        } else {
            if args.kind != ExpKind::Void {
                self.exp_to_next_reg(&mut args)?;
            }
            (self.fs.freereg - (base + 1)) as i32
        };
        f.kind = ExpKind::Call(self.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2)?);
        self.fix_line(line);
        // the call removes function and arguments, leaving one result
        self.fs.freereg = base + 1;
        Ok(())
    }

    fn primary_exp(&mut self) -> CResult<ExpDesc> {
        match self.lexer.token() {
            Token::Name(_) => {
                let name = self.str_check_name()?;
                self.single_var(name)
            }
            Token::LParen => {
                let line = self.lexer.line();
                self.next()?;
                let mut v = self.expr()?;
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                self.discharge_vars(&mut v)?;
                Ok(v)
            }
            _ => Err(self.syntax_error("unexpected symbol")),
        }
    }

    fn suffixed_exp(&mut self) -> CResult<ExpDesc> {
        let line = self.lexer.line();
        let mut v = self.primary_exp()?;
        loop {
            match self.lexer.token() {
                Token::Dot => self.field_sel(&mut v)?,
                Token::LBracket => {
                    self.exp_to_any_reg_up(&mut v)?;
                    let mut key = self.y_index()?;
                    self.indexed(&mut v, &mut key)?;
                }
                Token::Colon => {
                    self.next()?;
                    let mut key = self.check_name()?;
                    self.code_self(&mut v, &mut key)?;
                    self.func_args(&mut v, line)?;
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    self.exp_to_next_reg(&mut v)?;
                    self.func_args(&mut v, line)?;
                }
                _ => return Ok(v),
            }
        }
    }

    fn simple_exp(&mut self) -> CResult<ExpDesc> {
        let v = match self.lexer.token().clone() {
            Token::Float(n) => ExpDesc::new(ExpKind::KFlt(n)),
            Token::Integer(i) => ExpDesc::new(ExpKind::KInt(i)),
            Token::String(s) => self.code_string(s)?,
            Token::Nil => ExpDesc::new(ExpKind::Nil),
            Token::True => ExpDesc::new(ExpKind::True),
            Token::False => ExpDesc::new(ExpKind::False),
            Token::DotDotDot => {
                if !self.fs.proto.is_vararg {
                    return Err(self.syntax_error("cannot use '...' outside a vararg function"));
                }
                ExpDesc::new(ExpKind::VarArg(self.code_abc(OpCode::VarArg, 0, 1, 0)?))
            }
            Token::LBrace => return self.constructor(),
            Token::Function => {
                self.next()?;
                let line = self.lexer.line();
                return self.body(false, line);
            }
            _ => return self.suffixed_exp(),
        };
        self.next()?;
        Ok(v)
    }

    /// Precedence climbing: parse operators binding tighter than `limit`.
    /// Returns the first operator that was not consumed.
    fn subexpr(&mut self, v: &mut ExpDesc, limit: u8) -> CResult<Option<BinOp>> {
        self.enter_level()?;
        if let Some(uop) = UnOp::from_token(self.lexer.token()) {
            let line = self.lexer.line();
            self.next()?;
            self.subexpr(v, UNARY_PRIORITY)?;
            self.prefix(uop, v, line)?;
        } else {
            *v = self.simple_exp()?;
        }
        let mut op = BinOp::from_token(self.lexer.token());
        while let Some(bop) = op {
            let (left, right) = bop.priority();
            if left <= limit {
                break;
            }
            let line = self.lexer.line();
            self.next()?;
            self.infix(bop, v)?;
            let mut v2 = ExpDesc::void();
            let next_op = self.subexpr(&mut v2, right)?;
            self.posfix(bop, v, &mut v2, line)?;
            op = next_op;
        }
        self.leave_level();
        Ok(op)
    }

    pub(crate) fn expr(&mut self) -> CResult<ExpDesc> {
        let mut v = ExpDesc::void();
        self.subexpr(&mut v, 0)?;
        Ok(v)
    }
}

/// Token text for "X expected" messages.
fn token_desc(tok: &Token) -> String {
    match tok {
        Token::Name(_) => "<name>".to_string(),
        Token::String(_) => "<string>".to_string(),
        Token::Integer(_) => "<integer>".to_string(),
        Token::Float(_) => "<number>".to_string(),
        Token::Eof => "<eof>".to_string(),
        other => format!("'{other}'"),
    }
}

/// Compile a chunk; `chunkname` is stored as the prototype's source.
pub fn compile(source: &[u8], chunkname: &str) -> Result<Proto, CompileError> {
    let compiler = Compiler::new(source, chunkname).map_err(|e| *e)?;
    let chunk = compiler.chunk.clone();
    compiler.main_function().map_err(|e| {
        let mut e = *e;
        if e.chunk.is_empty() {
            e.chunk = chunk;
        }
        e
    })
}
