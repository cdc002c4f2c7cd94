//! Bytecode compiler: translates the syntax tree to a flat byte stream.
//!
//! The compiler walks the AST once and appends opcodes and operands to the
//! code buffer. Jump targets use a placeholder/patch approach: a jump is
//! emitted with a zero offset and patched once the target position is
//! known. `JUMP` offsets are signed 8-bit and `JUMP_IF_FALSE` offsets
//! unsigned 8-bit, so an over-long block is a compile error rather than a
//! silently wrong jump.
//!
//! Function bodies are compiled inline behind a `DEFINE_FUNC`/`JUMP`
//! sentinel pair; at runtime the VM copies the body bytes into the
//! function's own unit and skips over them.

use crate::ast::{BinOp, CatchClause, Expr, Stmt, UnOp};
use crate::bytecode::{Bytecode, Op, TYPE_ANY};
use crate::error::{Error, Result};
use crate::value::Value;

/// Compile a parsed program into a bytecode unit ending in `HALT`.
pub fn compile(program: &[Stmt]) -> Result<Bytecode> {
    let mut compiler = Compiler {
        code: Bytecode::new(),
    };
    for stmt in program {
        compiler.compile_stmt(stmt)?;
    }
    compiler.emit(Op::Halt);
    Ok(compiler.code)
}

struct Compiler {
    code: Bytecode,
}

impl Compiler {
    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn pos(&self) -> usize {
        self.code.code.len()
    }

    fn emit(&mut self, op: Op) {
        self.code.code.push(op as u8);
    }

    fn emit_u8(&mut self, byte: u8) {
        self.code.code.push(byte);
    }

    fn emit_u16(&mut self, value: u16) {
        self.code.code.extend_from_slice(&value.to_be_bytes());
    }

    /// Pool a constant, reusing an existing identical entry.
    fn add_const(&mut self, value: Value) -> Result<u16> {
        for (i, existing) in self.code.constants.iter().enumerate() {
            if *existing == value {
                return Ok(i as u16);
            }
        }
        let idx = self.code.constants.len();
        if idx >= TYPE_ANY as usize {
            return Err(Error::compile("Too many constants in one unit"));
        }
        self.code.constants.push(value);
        Ok(idx as u16)
    }

    fn add_name(&mut self, name: &str) -> Result<u16> {
        self.add_const(Value::string(name))
    }

    /// Emit a forward jump with a placeholder offset; returns the operand
    /// position for patching.
    fn emit_forward_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        let operand_pos = self.pos();
        self.emit_u8(0);
        operand_pos
    }

    /// Patch a forward `JUMP`/`JUMP_IF_FALSE` to land at the current
    /// position. `JUMP` offsets are signed, so their forward range is half
    /// that of `JUMP_IF_FALSE`.
    fn patch_forward_jump(&mut self, operand_pos: usize) -> Result<()> {
        let delta = self.pos() - (operand_pos + 1);
        let max = if self.code.code[operand_pos - 1] == Op::Jump as u8 {
            i8::MAX as usize
        } else {
            u8::MAX as usize
        };
        if delta > max {
            return Err(Error::compile(format!(
                "Jump distance exceeds {} bytes",
                max
            )));
        }
        self.code.code[operand_pos] = delta as u8;
        Ok(())
    }

    /// Emit an unconditional backward jump to `target`.
    fn emit_jump_back(&mut self, target: usize) -> Result<()> {
        self.emit(Op::Jump);
        let delta = target as i64 - (self.pos() as i64 + 1);
        if delta < i8::MIN as i64 || delta > i8::MAX as i64 {
            return Err(Error::compile("Loop body exceeds the 127-byte jump range"));
        }
        self.emit_u8(delta as i8 as u8);
        Ok(())
    }

    /// Emit a `TRY_ENTER`/`TRY_EXIT` with a placeholder u16 offset; returns
    /// the operand position.
    fn emit_try_op(&mut self, op: Op) -> usize {
        self.emit(op);
        let operand_pos = self.pos();
        self.emit_u16(0);
        operand_pos
    }

    /// Patch a u16 try offset to land at `target`.
    fn patch_try_offset(&mut self, operand_pos: usize, target: usize) -> Result<()> {
        let delta = target as i64 - (operand_pos as i64 + 2);
        if delta < 0 || delta > u16::MAX as i64 {
            return Err(Error::compile("Handler offset out of range"));
        }
        let bytes = (delta as u16).to_be_bytes();
        self.code.code[operand_pos] = bytes[0];
        self.code.code[operand_pos + 1] = bytes[1];
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Bind {
                name,
                value,
                mutable,
                type_tag,
            } => {
                self.compile_expr(value)?;
                let name_idx = self.add_name(name)?;
                self.emit(Op::StoreVar);
                self.emit_u16(name_idx);
                self.emit_u8(*mutable as u8);
                match type_tag {
                    Some(tag) => {
                        let tag_idx = self.add_name(tag)?;
                        self.emit_u8(1);
                        self.emit_u16(tag_idx);
                    }
                    None => self.emit_u8(0),
                }
            }

            Stmt::SetIndex {
                target,
                index,
                value,
            } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit(Op::ListSet);
            }

            Stmt::Delete { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(Op::Delete);
            }

            Stmt::Print(expr) => {
                self.compile_expr(expr)?;
                self.emit(Op::Print);
            }

            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Op::Pop);
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.compile_expr(cond)?;
                let else_jump = self.emit_forward_jump(Op::JumpIfFalse);
                self.compile_body(then_body)?;
                match else_body {
                    Some(else_body) => {
                        let end_jump = self.emit_forward_jump(Op::Jump);
                        self.patch_forward_jump(else_jump)?;
                        self.compile_body(else_body)?;
                        self.patch_forward_jump(end_jump)?;
                    }
                    None => self.patch_forward_jump(else_jump)?,
                }
            }

            Stmt::While { cond, body } => {
                let loop_start = self.pos();
                self.compile_expr(cond)?;
                let exit_jump = self.emit_forward_jump(Op::JumpIfFalse);
                self.compile_body(body)?;
                self.emit_jump_back(loop_start)?;
                self.patch_forward_jump(exit_jump)?;
            }

            Stmt::For {
                var,
                iterable,
                body,
            } => {
                self.compile_expr(iterable)?;
                self.emit(Op::ListIter);
                let loop_start = self.pos();
                self.emit(Op::ListNext);
                let exit_jump = self.emit_forward_jump(Op::JumpIfFalse);
                let var_idx = self.add_name(var)?;
                self.emit(Op::StoreVar);
                self.emit_u16(var_idx);
                self.emit_u8(1);
                self.emit_u8(0);
                self.compile_body(body)?;
                self.emit_jump_back(loop_start)?;
                self.patch_forward_jump(exit_jump)?;
                // Drop the iteration state and the iterable.
                self.emit(Op::Pop);
                self.emit(Op::Pop);
            }

            Stmt::Function { name, params, body } => {
                self.compile_function(name, params, body)?;
            }

            Stmt::Return(expr) => {
                match expr {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        let nil_idx = self.add_const(Value::Nil)?;
                        self.emit(Op::LoadConst);
                        self.emit_u16(nil_idx);
                    }
                }
                self.emit(Op::ReturnVal);
            }

            Stmt::Throw { message, type_name } => {
                self.compile_expr(message)?;
                let type_idx = match type_name {
                    Some(name) => self.add_name(name)?,
                    None => TYPE_ANY,
                };
                self.emit(Op::Throw);
                self.emit_u16(type_idx);
            }

            Stmt::Import { path, alias } => {
                let alias_idx = self.add_name(alias)?;
                let path_idx = self.add_name(path)?;
                self.emit(Op::Import);
                self.emit_u16(alias_idx);
                self.emit_u16(path_idx);
            }

            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                self.compile_try(body, catches, finally.as_deref())?;
            }
        }
        Ok(())
    }

    fn compile_body(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_function(&mut self, name: &str, params: &[String], body: &[Stmt]) -> Result<()> {
        let name_idx = self.add_name(name)?;
        let param_idxs: Vec<u16> = params
            .iter()
            .map(|p| self.add_name(p))
            .collect::<Result<_>>()?;
        if param_idxs.len() > u8::MAX as usize {
            return Err(Error::compile(format!(
                "Function '{}' has too many parameters",
                name
            )));
        }

        self.emit(Op::DefineFunc);
        self.emit_u16(name_idx);
        self.emit_u8(param_idxs.len() as u8);
        for idx in &param_idxs {
            self.emit_u16(*idx);
        }
        let body_start_pos = self.pos();
        self.emit_u16(0); // body start, patched below

        // The sentinel jump the VM consumes to skip the inline body.
        self.emit(Op::Jump);
        let skip_pos = self.pos();
        self.emit_u8(0);

        let body_start = self.pos();
        let bytes = (body_start as u16).to_be_bytes();
        self.code.code[body_start_pos] = bytes[0];
        self.code.code[body_start_pos + 1] = bytes[1];

        self.compile_body(body)?;
        // Implicit `return nil` for bodies that fall off the end.
        let nil_idx = self.add_const(Value::Nil)?;
        self.emit(Op::LoadConst);
        self.emit_u16(nil_idx);
        self.emit(Op::ReturnVal);

        let body_len = self.pos() - body_start;
        if body_len > u8::MAX as usize {
            return Err(Error::compile(format!(
                "Function '{}' body exceeds 255 bytes of code",
                name
            )));
        }
        self.code.code[skip_pos] = body_len as u8;
        Ok(())
    }

    fn compile_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        finally: Option<&[Stmt]>,
    ) -> Result<()> {
        // `try`/`finally` with no catches needs no handler at all.
        if catches.is_empty() {
            self.compile_body(body)?;
            if let Some(finally_body) = finally {
                self.emit(Op::Finally);
                self.compile_body(finally_body)?;
            }
            return Ok(());
        }

        // One handler record per clause, innermost handling the first
        // clause. A non-matching CATCH re-raises, which diverts to the next
        // record; the clause bodies pop the records that are still live.
        let enter_operands: Vec<usize> = (0..catches.len())
            .map(|_| self.emit_try_op(Op::TryEnter))
            .collect();

        self.compile_body(body)?;

        // Normal completion pops every record; the last TRY_EXIT carries the
        // finally offset.
        for _ in 0..catches.len() - 1 {
            let operand = self.emit_try_op(Op::TryExit);
            self.patch_try_offset(operand, operand + 2)?;
        }
        let exit_operand = self.emit_try_op(Op::TryExit);
        let over_catches = if finally.is_none() {
            Some(self.emit_forward_jump(Op::Jump))
        } else {
            None
        };

        let mut end_jumps = Vec::new();
        for (i, clause) in catches.iter().enumerate() {
            // Records are popped innermost-first, so clause i's handler
            // offset lives in the last-pushed TRY_ENTER.
            let enter_operand = enter_operands[catches.len() - 1 - i];
            self.patch_try_offset(enter_operand, self.pos())?;

            let type_idx = match &clause.type_name {
                Some(name) => self.add_name(name)?,
                None => TYPE_ANY,
            };
            let var_idx = match &clause.var {
                Some(var) => self.add_name(var)?,
                None => TYPE_ANY,
            };
            self.emit(Op::Catch);
            self.emit_u16(type_idx);
            self.emit_u16(var_idx);
            // An unbound catch leaves the error message on the stack.
            if clause.var.is_none() {
                self.emit(Op::Pop);
            }

            // Records for the clauses after this one are still pushed.
            for _ in 0..catches.len() - 1 - i {
                let operand = self.emit_try_op(Op::TryExit);
                self.patch_try_offset(operand, operand + 2)?;
            }

            self.compile_body(&clause.body)?;
            end_jumps.push(self.emit_forward_jump(Op::Jump));
        }

        match finally {
            Some(finally_body) => {
                let finally_pos = self.pos();
                self.patch_try_offset(exit_operand, finally_pos)?;
                for jump in end_jumps {
                    self.patch_forward_jump(jump)?;
                }
                self.emit(Op::Finally);
                self.compile_body(finally_body)?;
            }
            None => {
                self.patch_try_offset(exit_operand, exit_operand + 2)?;
                self.patch_forward_jump(
                    over_catches.expect("jump emitted when there is no finally"),
                )?;
                for jump in end_jumps {
                    self.patch_forward_jump(jump)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Number(n) => self.compile_const(Value::Number(*n))?,
            Expr::Str(s) => self.compile_const(Value::string(s))?,
            Expr::Bool(b) => self.compile_const(Value::Bool(*b))?,
            Expr::Nil => self.compile_const(Value::Nil)?,

            Expr::Var(name) => {
                let idx = self.add_name(name)?;
                self.emit(Op::LoadVar);
                self.emit_u16(idx);
            }

            Expr::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binop_opcode(*op));
            }

            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(match op {
                    UnOp::Neg => Op::Neg,
                    UnOp::Not => Op::Not,
                });
            }

            Expr::Index { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(Op::ListGet);
            }

            Expr::IsType { value, type_name } => {
                // Lowered onto the built-in registry.
                self.compile_expr(value)?;
                self.compile_const(Value::string(type_name))?;
                let name_idx = self.add_name("is_type")?;
                self.emit(Op::CallFunc);
                self.emit_u16(name_idx);
                self.emit_u8(2);
            }

            Expr::ListLit(items) => {
                if items.len() > u16::MAX as usize {
                    return Err(Error::compile("List literal is too long"));
                }
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(Op::ListNew);
                self.emit_u16(items.len() as u16);
            }

            Expr::MapLit => {
                self.emit(Op::MapNew);
                self.emit_u16(0);
            }

            Expr::RangeLit { start, end, step } => {
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                match step {
                    Some(step) => self.compile_expr(step)?,
                    None => self.compile_const(Value::Number(1.0))?,
                }
                self.emit(Op::RangeNew);
            }

            Expr::Call { name, args } => {
                if args.len() > u8::MAX as usize {
                    return Err(Error::compile(format!(
                        "Call to '{}' has too many arguments",
                        name
                    )));
                }
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let name_idx = self.add_name(name)?;
                self.emit(Op::CallFunc);
                self.emit_u16(name_idx);
                self.emit_u8(args.len() as u8);
            }
        }
        Ok(())
    }

    fn compile_const(&mut self, value: Value) -> Result<()> {
        let idx = self.add_const(value)?;
        self.emit(Op::LoadConst);
        self.emit_u16(idx);
        Ok(())
    }
}

fn binop_opcode(op: BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Mul,
        BinOp::Div => Op::Div,
        BinOp::Mod => Op::Mod,
        BinOp::Eq => Op::Eq,
        BinOp::Neq => Op::Neq,
        BinOp::Gt => Op::Gt,
        BinOp::Lt => Op::Lt,
        BinOp::Gte => Op::Gte,
        BinOp::Lte => Op::Lte,
        BinOp::And => Op::And,
        BinOp::Or => Op::Or,
    }
}
