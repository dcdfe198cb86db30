//! The parser.
//!
//! A single-pass recursive-descent parser: there is no AST.  Declarations
//! land in the entity store and statements are flattened into Phase-1 IR
//! as they are recognized, with fresh dotted temporaries (`.t0`, `.t1`,
//! ...) carrying intermediate values and dotted label variables (`.L0`,
//! ...) carrying control flow.  A loop-start label remembers the body-IR
//! index of its matching loop-end label in `init_val`, which is what the
//! liveness pass keys its loop extension on.
//!
//! Everything parsed while no function is open goes to the global
//! initializer stream; anything more elaborate than an allocation, a
//! constant load, or a plain assignment is rejected later by the passes
//! that consume that stream.

use crate::common::{id, Id};
use crate::error::{CompileError, Result};
use crate::middle::ir::{Op, Ph1Instr};
use crate::middle::store::{
    BaseType, BlockId, FuncId, Store, VarId, Variable, GLOBAL_BLOCK, MAX_PARAMS,
};

use super::lex::{tokenize, Token, TokenKind};

/// Parse one source text into the store.  Called once for the libc
/// prelude and once for the user program; entities accumulate.
pub fn parse_into(store: &mut Store, source: &str) -> Result<()> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        store,
        tokens,
        pos: 0,
        cur_block: GLOBAL_BLOCK,
        cur_fn: None,
        break_labels: Vec::new(),
        continue_labels: Vec::new(),
    };
    parser.install_builtins()?;
    parser.run()
}

struct Parser<'s, 'a> {
    store: &'a mut Store,
    tokens: Vec<Token<'s>>,
    pos: usize,
    cur_block: BlockId,
    cur_fn: Option<FuncId>,
    break_labels: Vec<VarId>,
    continue_labels: Vec<VarId>,
}

impl<'s, 'a> Parser<'s, 'a> {
    fn install_builtins(&mut self) -> Result<()> {
        self.store.add_type(id("void"), BaseType::Void, 0)?;
        self.store.add_type(id("int"), BaseType::Int, 4)?;
        self.store.add_type(id("char"), BaseType::Char, 1)?;

        // the system-call trampoline is synthesized by the emitter; the
        // front-end only needs its signature
        if self.store.find_func(id("__syscall")).is_none() {
            let fid = self.store.add_func(id("__syscall"))?;
            let mut params = Vec::new();
            for name in ["num", "a", "b", "c"] {
                params.push(self.store.add_var(Variable::new(id(name), id("int")))?);
            }
            self.store.func_mut(fid).params = params;
            self.store.func_mut(fid).variadic = true;
        }
        Ok(())
    }

    // ---- token plumbing ----

    fn peek(&self) -> Option<&Token<'s>> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token<'s>> {
        self.tokens.get(self.pos + ahead)
    }

    fn line(&self) -> usize {
        self.peek()
            .or(self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::Parse {
            line: self.line(),
            msg: msg.into(),
        }
    }

    fn advance(&mut self) -> Result<Token<'s>> {
        let token = *self
            .peek()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|t| t.kind == kind).unwrap_or(false)
    }

    fn check_kw(&self, word: &str) -> bool {
        self.peek()
            .map(|t| t.kind == TokenKind::Keyword && t.text == word)
            .unwrap_or(false)
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn accept_kw(&mut self, word: &str) -> bool {
        if self.check_kw(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'s>> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error(format!("expected `{kind}`")))
        }
    }

    fn expect_kw(&mut self, word: &str) -> Result<()> {
        if self.accept_kw(word) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{word}`")))
        }
    }

    // ---- IR plumbing ----

    /// Instructions inside a function body go to the body stream,
    /// top-level ones to the global-initializer stream.
    fn emit(&mut self, instr: Ph1Instr) -> Result<usize> {
        if self.cur_fn.is_some() {
            self.store.push_body(instr)
        } else {
            self.store.push_global(instr)
        }
    }

    fn emit_const(&mut self, value: i32) -> Result<VarId> {
        let temp = self.store.new_temp(id("int"))?;
        self.store.var_mut(temp).init_val = value;
        let mut instr = Ph1Instr::new(Op::LoadConst);
        instr.dest = Some(temp);
        self.emit(instr)?;
        Ok(temp)
    }

    fn emit_binary(&mut self, op: Op, lhs: VarId, rhs: VarId) -> Result<VarId> {
        let temp = self.store.new_temp(id("int"))?;
        let mut instr = Ph1Instr::new(op);
        instr.dest = Some(temp);
        instr.src0 = Some(lhs);
        instr.src1 = Some(rhs);
        self.emit(instr)?;
        Ok(temp)
    }

    fn emit_label(&mut self, label: VarId) -> Result<usize> {
        let mut instr = Ph1Instr::new(Op::Label);
        instr.src0 = Some(label);
        self.emit(instr)
    }

    fn emit_jump(&mut self, label: VarId) -> Result<()> {
        let mut instr = Ph1Instr::new(Op::Jump);
        instr.dest = Some(label);
        self.emit(instr)?;
        Ok(())
    }

    fn emit_branch(&mut self, cond: VarId, tt: VarId, ff: VarId) -> Result<()> {
        let mut instr = Ph1Instr::new(Op::Branch);
        instr.dest = Some(cond);
        instr.src0 = Some(tt);
        instr.src1 = Some(ff);
        self.emit(instr)?;
        Ok(())
    }

    // ---- top level ----

    fn run(&mut self) -> Result<()> {
        while self.peek().is_some() {
            if self.check(TokenKind::Hash) {
                self.parse_define()?;
            } else if self.check_kw("enum") {
                self.parse_enum()?;
            } else if self.check_kw("struct")
                && self.peek_at(1).map(|t| t.kind) == Some(TokenKind::Id)
                && self.peek_at(2).map(|t| t.kind) == Some(TokenKind::LBrace)
            {
                self.parse_struct_decl()?;
            } else {
                self.parse_top_decl()?;
            }
        }
        Ok(())
    }

    /// `#define NAME <number or identifier>`
    fn parse_define(&mut self) -> Result<()> {
        self.expect(TokenKind::Hash)?;
        let directive = self.expect(TokenKind::Id)?;
        if directive.text != "define" {
            return Err(self.error(format!("unknown directive `{}`", directive.text)));
        }
        let name = id(self.expect(TokenKind::Id)?.text);
        if self.accept(TokenKind::Minus) {
            let value = self.number()?;
            self.store.add_constant(name, -value)?;
        } else if self.check(TokenKind::Num) {
            let value = self.number()?;
            self.store.add_constant(name, value)?;
        } else if self.check(TokenKind::CharLit) {
            let token = self.advance()?;
            self.store.add_constant(name, char_value(token.text))?;
        } else {
            let value = id(self.expect(TokenKind::Id)?.text);
            self.store.add_alias(name, value)?;
        }
        Ok(())
    }

    /// `enum [Name] { A, B = expr, ... };`
    fn parse_enum(&mut self) -> Result<()> {
        self.expect_kw("enum")?;
        self.accept(TokenKind::Id);
        self.expect(TokenKind::LBrace)?;
        let mut value = 0;
        while !self.check(TokenKind::RBrace) {
            let name = id(self.expect(TokenKind::Id)?.text);
            if self.accept(TokenKind::Assign) {
                let negative = self.accept(TokenKind::Minus);
                value = self.number()?;
                if negative {
                    value = -value;
                }
            }
            self.store.add_constant(name, value)?;
            value += 1;
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    /// `struct Name { fields };`
    fn parse_struct_decl(&mut self) -> Result<()> {
        self.expect_kw("struct")?;
        let name = id(self.expect(TokenKind::Id)?.text);
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        let mut size = 0;
        while !self.check(TokenKind::RBrace) {
            let base = self
                .parse_base_type()?
                .ok_or_else(|| self.error("expected field type"))?;
            loop {
                let mut field = Variable::new(id(""), base);
                while self.accept(TokenKind::Star) {
                    field.ptr += 1;
                }
                field.name = id(self.expect(TokenKind::Id)?.text);
                if self.accept(TokenKind::LBracket) {
                    field.array_size = self.number()? as usize;
                    self.expect(TokenKind::RBracket)?;
                }
                size += self.store.var_size(&field)?;
                fields.push(field);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semi)?;
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Semi)?;

        if fields.len() > crate::middle::store::MAX_FIELDS {
            return Err(CompileError::Capacity("struct fields"));
        }
        let tid = self.store.add_type(name, BaseType::Struct, size)?;
        self.store.types[tid.index()].size = size;
        self.store.types[tid.index()].fields = fields;
        Ok(())
    }

    /// Type name at the head of a declaration, or `None`.
    fn parse_base_type(&mut self) -> Result<Option<Id>> {
        for word in ["int", "char", "void"] {
            if self.check_kw(word) {
                self.pos += 1;
                return Ok(Some(id(word)));
            }
        }
        if self.check_kw("struct") && self.peek_at(1).map(|t| t.kind) == Some(TokenKind::Id) {
            self.pos += 1;
            let name = id(self.advance()?.text);
            if self.store.find_type(name).is_none() {
                return Err(self.error(format!("unknown struct `{name}`")));
            }
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn parse_top_decl(&mut self) -> Result<()> {
        let base = self
            .parse_base_type()?
            .ok_or_else(|| self.error("expected a declaration"))?;

        // `int (*f)(int);` — a global function pointer
        if self.check(TokenKind::LParen) {
            let var = self.parse_fnptr_declarator(base)?;
            self.declare_var(var)?;
            self.expect(TokenKind::Semi)?;
            return Ok(());
        }

        let mut ptr = 0u8;
        while self.accept(TokenKind::Star) {
            ptr += 1;
        }
        let name = id(self.expect(TokenKind::Id)?.text);

        if self.check(TokenKind::LParen) {
            return self.parse_function(base, ptr, name);
        }

        // global variables
        let mut var = Variable::new(name, base);
        var.ptr = ptr;
        self.finish_var_decl(var)?;
        while self.accept(TokenKind::Comma) {
            let mut var = Variable::new(id(""), base);
            while self.accept(TokenKind::Star) {
                var.ptr += 1;
            }
            var.name = id(self.expect(TokenKind::Id)?.text);
            self.finish_var_decl(var)?;
        }
        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    /// Definition or prototype, starting at the parameter list.
    fn parse_function(&mut self, ret_type: Id, ret_ptr: u8, name: Id) -> Result<()> {
        let fid = self.store.add_func(name)?;
        let ret = self.store.func(fid).ret;
        self.store.var_mut(ret).type_name = ret_type;
        self.store.var_mut(ret).ptr = ret_ptr;

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut variadic = false;
        if !self.accept(TokenKind::RParen) {
            loop {
                if self.accept(TokenKind::Ellipsis) {
                    variadic = true;
                    break;
                }
                let base = self
                    .parse_base_type()?
                    .ok_or_else(|| self.error("expected parameter type"))?;
                if base == id("void") && self.check(TokenKind::RParen) {
                    break;
                }
                let mut param = Variable::new(id(format!(".p{}", params.len())), base);
                while self.accept(TokenKind::Star) {
                    param.ptr += 1;
                }
                if self.check(TokenKind::Id) {
                    param.name = id(self.advance()?.text);
                }
                params.push(self.store.add_var(param)?);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        if params.len() > MAX_PARAMS {
            return Err(CompileError::TooManyParams {
                name,
                count: params.len(),
            });
        }
        self.store.func_mut(fid).params = params;
        self.store.func_mut(fid).variadic = variadic;

        if self.accept(TokenKind::Semi) {
            return Ok(()); // prototype
        }

        let mut define = Ph1Instr::new(Op::Define);
        define.func_name = Some(name);
        self.cur_fn = Some(fid);
        self.emit(define)?;
        self.parse_block()?;
        self.cur_fn = None;
        self.cur_block = GLOBAL_BLOCK;
        Ok(())
    }

    /// `( * name ) ( param types )`
    fn parse_fnptr_declarator(&mut self, base: Id) -> Result<Variable> {
        self.expect(TokenKind::LParen)?;
        self.expect(TokenKind::Star)?;
        let name = id(self.expect(TokenKind::Id)?.text);
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LParen)?;
        let mut depth = 1;
        while depth > 0 {
            match self.advance()?.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                _ => {}
            }
        }
        let mut var = Variable::new(name, base);
        var.is_func = true;
        Ok(var)
    }

    /// Register a variable in the current scope and emit its allocation.
    fn declare_var(&mut self, mut var: Variable) -> Result<VarId> {
        let vid = if self.cur_fn.is_some() {
            self.store.add_local(self.cur_block, var)?
        } else {
            var.is_global = true;
            self.store.add_local(GLOBAL_BLOCK, var)?
        };
        let size = self.store.var_size(self.store.var(vid))?;
        self.store.block_mut(if self.cur_fn.is_some() {
            self.cur_block
        } else {
            GLOBAL_BLOCK
        })
        .locals_size += size;

        let mut alloc = Ph1Instr::new(Op::Alloc);
        alloc.src0 = Some(vid);
        self.emit(alloc)?;
        Ok(vid)
    }

    /// Array suffix and initializer of one declarator.
    fn finish_var_decl(&mut self, mut var: Variable) -> Result<()> {
        if self.accept(TokenKind::LBracket) {
            var.array_size = self.number()? as usize;
            self.expect(TokenKind::RBracket)?;
        }
        let array = var.array_size;
        let is_char = var.type_name == id("char") && var.ptr == 0;
        let vid = self.declare_var(var)?;

        if !self.accept(TokenKind::Assign) {
            return Ok(());
        }

        if array > 0 {
            if !is_char || !self.check(TokenKind::StrLit) {
                return Err(self.error("only char arrays take string initializers"));
            }
            let token = self.advance()?;
            let mut bytes = string_bytes(token.text);
            bytes.push(0);
            if bytes.len() > array {
                return Err(self.error("string initializer longer than the array"));
            }
            // write the bytes through the array's base pointer
            for (i, byte) in bytes.into_iter().enumerate() {
                let index = self.emit_const(i as i32)?;
                let addr = self.emit_binary(Op::Add, vid, index)?;
                let value = self.emit_const(byte as i32)?;
                let mut write = Ph1Instr::new(Op::Write);
                write.dest = Some(addr);
                write.src0 = Some(value);
                write.size = 1;
                self.emit(write)?;
            }
            return Ok(());
        }

        let value = self.parse_expr()?;
        let mut assign = Ph1Instr::new(Op::Assign);
        assign.dest = Some(vid);
        assign.src0 = Some(value);
        self.emit(assign)?;
        Ok(())
    }

    // ---- statements ----

    fn parse_block(&mut self) -> Result<()> {
        self.expect(TokenKind::LBrace)?;
        let parent = self.cur_block;
        self.cur_block = self.store.add_block(Some(parent), self.cur_fn)?;
        self.emit(Ph1Instr::new(Op::BlockStart))?;
        while !self.check(TokenKind::RBrace) {
            self.parse_statement()?;
        }
        self.expect(TokenKind::RBrace)?;
        self.emit(Ph1Instr::new(Op::BlockEnd))?;
        self.cur_block = parent;
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<()> {
        if self.check(TokenKind::LBrace) {
            return self.parse_block();
        }
        if self.check_kw("if") {
            return self.parse_if();
        }
        if self.check_kw("while") {
            return self.parse_while();
        }
        if self.check_kw("for") {
            return self.parse_for();
        }
        if self.accept_kw("break") {
            let target = *self
                .break_labels
                .last()
                .ok_or_else(|| self.error("`break` outside a loop"))?;
            self.emit_jump(target)?;
            self.expect(TokenKind::Semi)?;
            return Ok(());
        }
        if self.accept_kw("continue") {
            let target = *self
                .continue_labels
                .last()
                .ok_or_else(|| self.error("`continue` outside a loop"))?;
            self.emit_jump(target)?;
            self.expect(TokenKind::Semi)?;
            return Ok(());
        }
        if self.accept_kw("return") {
            let mut ret = Ph1Instr::new(Op::Return);
            if !self.check(TokenKind::Semi) {
                ret.src0 = Some(self.parse_expr()?);
            }
            self.emit(ret)?;
            self.expect(TokenKind::Semi)?;
            return Ok(());
        }
        if self.check_kw("int") || self.check_kw("char") || self.check_kw("void") || self.check_kw("struct")
        {
            return self.parse_local_decl();
        }
        self.parse_simple()?;
        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    fn parse_local_decl(&mut self) -> Result<()> {
        let base = self
            .parse_base_type()?
            .ok_or_else(|| self.error("expected a declaration"))?;
        if self.check(TokenKind::LParen) {
            let var = self.parse_fnptr_declarator(base)?;
            self.declare_var(var)?;
            self.expect(TokenKind::Semi)?;
            return Ok(());
        }
        loop {
            let mut var = Variable::new(id(""), base);
            while self.accept(TokenKind::Star) {
                var.ptr += 1;
            }
            var.name = id(self.expect(TokenKind::Id)?.text);
            self.finish_var_decl(var)?;
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi)?;
        Ok(())
    }

    fn parse_if(&mut self) -> Result<()> {
        self.expect_kw("if")?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;

        let then_label = self.store.new_label()?;
        // doubles as the end label when no else-branch shows up
        let else_label = self.store.new_label()?;

        self.emit_branch(cond, then_label, else_label)?;
        self.emit_label(then_label)?;
        self.parse_statement()?;

        if self.check_kw("else") {
            let end_label = self.store.new_label()?;
            self.emit_jump(end_label)?;
            self.emit_label(else_label)?;
            self.expect_kw("else")?;
            self.parse_statement()?;
            self.emit_label(end_label)?;
        } else {
            self.emit_label(else_label)?;
        }
        Ok(())
    }

    fn parse_while(&mut self) -> Result<()> {
        self.expect_kw("while")?;
        let start = self.store.new_label()?;
        let body = self.store.new_label()?;
        let end = self.store.new_label()?;

        self.emit_label(start)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        self.emit_branch(cond, body, end)?;
        self.emit_label(body)?;

        self.break_labels.push(end);
        self.continue_labels.push(start);
        self.parse_statement()?;
        self.break_labels.pop();
        self.continue_labels.pop();

        self.emit_jump(start)?;
        let end_idx = self.emit_label(end)?;
        // the loop-start label remembers where the loop ends
        self.store.var_mut(start).init_val = end_idx as i32;
        Ok(())
    }

    fn parse_for(&mut self) -> Result<()> {
        self.expect_kw("for")?;
        self.expect(TokenKind::LParen)?;
        if !self.check(TokenKind::Semi) {
            self.parse_simple()?;
        }
        self.expect(TokenKind::Semi)?;

        let cond_label = self.store.new_label()?;
        let body_label = self.store.new_label()?;
        let step_label = self.store.new_label()?;
        let end_label = self.store.new_label()?;

        self.emit_label(cond_label)?;
        let cond = if self.check(TokenKind::Semi) {
            self.emit_const(1)?
        } else {
            self.parse_expr()?
        };
        self.expect(TokenKind::Semi)?;
        self.emit_branch(cond, body_label, end_label)?;

        // the step clause executes after the body; remember its tokens and
        // come back once the body is out
        let step_start = self.pos;
        let mut depth = 1usize;
        while depth > 0 {
            match self.advance()?.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                _ => {}
            }
        }

        self.emit_label(body_label)?;
        self.break_labels.push(end_label);
        self.continue_labels.push(step_label);
        self.parse_statement()?;
        self.break_labels.pop();
        self.continue_labels.pop();
        let after_body = self.pos;

        self.emit_label(step_label)?;
        self.pos = step_start;
        if !self.check(TokenKind::RParen) {
            self.parse_simple()?;
        }
        self.pos = after_body;
        self.emit_jump(cond_label)?;
        let end_idx = self.emit_label(end_label)?;
        self.store.var_mut(cond_label).init_val = end_idx as i32;
        Ok(())
    }

    /// Assignment or call statement (also the init/step clauses of `for`).
    fn parse_simple(&mut self) -> Result<()> {
        if self.accept(TokenKind::Star) {
            // *p = expr
            let ptr = self.parse_unary()?;
            self.expect(TokenKind::Assign)?;
            let value = self.parse_expr()?;
            let size = self.store.access_size(self.store.var(ptr));
            let mut write = Ph1Instr::new(Op::Write);
            write.dest = Some(ptr);
            write.src0 = Some(value);
            write.size = size;
            self.emit(write)?;
            return Ok(());
        }

        if self.check(TokenKind::Id) {
            match self.peek_at(1).map(|t| t.kind) {
                Some(TokenKind::Assign) => {
                    let name = id(self.advance()?.text);
                    self.pos += 1; // the `=`
                    let target = self
                        .store
                        .find_var(name, self.cur_block)
                        .ok_or_else(|| self.error(format!("unknown variable `{name}`")))?;
                    if self.store.var(target).is_func {
                        return self.parse_fnptr_assign(target);
                    }
                    let value = self.parse_expr()?;
                    let mut assign = Ph1Instr::new(Op::Assign);
                    assign.dest = Some(target);
                    assign.src0 = Some(value);
                    self.emit(assign)?;
                    return Ok(());
                }
                Some(TokenKind::LBracket) => {
                    let name = id(self.advance()?.text);
                    let base = self
                        .store
                        .find_var(name, self.cur_block)
                        .ok_or_else(|| self.error(format!("unknown variable `{name}`")))?;
                    self.expect(TokenKind::LBracket)?;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let (addr, size) = self.index_address(base, index)?;
                    self.expect(TokenKind::Assign)?;
                    let value = self.parse_expr()?;
                    let mut write = Ph1Instr::new(Op::Write);
                    write.dest = Some(addr);
                    write.src0 = Some(value);
                    write.size = size;
                    self.emit(write)?;
                    return Ok(());
                }
                Some(TokenKind::Dot) | Some(TokenKind::Arrow) => {
                    let name = id(self.advance()?.text);
                    let base = self
                        .store
                        .find_var(name, self.cur_block)
                        .ok_or_else(|| self.error(format!("unknown variable `{name}`")))?;
                    let (addr, field) = self.member_address(base)?;
                    self.expect(TokenKind::Assign)?;
                    let value = self.parse_expr()?;
                    let mut write = Ph1Instr::new(Op::Write);
                    write.dest = Some(addr);
                    write.src0 = Some(value);
                    write.size = self.store.access_size(&field);
                    self.emit(write)?;
                    return Ok(());
                }
                _ => {}
            }
        }

        // anything else: an expression for its side effects (a call)
        self.parse_expr()?;
        Ok(())
    }

    /// `f = &g;` or `f = g;` where `g` names a function.
    fn parse_fnptr_assign(&mut self, target: VarId) -> Result<()> {
        self.accept(TokenKind::Amp);
        let name = id(self.expect(TokenKind::Id)?.text);
        if self.store.find_func(name).is_none() {
            return Err(self.error(format!("`{name}` is not a function")));
        }

        // take the pointer variable's own address, then store the code
        // address through it
        let slot = self.store.new_temp(self.store.var(target).type_name)?;
        self.store.var_mut(slot).ptr = 1;
        let mut addr_of = Ph1Instr::new(Op::AddrOf);
        addr_of.dest = Some(slot);
        addr_of.src0 = Some(target);
        self.emit(addr_of)?;

        let mut callee = Variable::new(name, id("int"));
        callee.is_func = true;
        let callee = self.store.add_var(callee)?;
        let mut write = Ph1Instr::new(Op::Write);
        write.dest = Some(slot);
        write.src0 = Some(callee);
        write.size = crate::common::PTR_SIZE;
        self.emit(write)?;
        Ok(())
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Result<VarId> {
        self.parse_binary(0)
    }

    fn binop(&self) -> Option<(Op, u8)> {
        use TokenKind::*;
        let kind = self.peek()?.kind;
        Some(match kind {
            Star => (Op::Mul, 10),
            Slash => (Op::Div, 10),
            Percent => (Op::Mod, 10),
            Plus => (Op::Add, 9),
            Minus => (Op::Sub, 9),
            Shl => (Op::Lshift, 8),
            Shr => (Op::Rshift, 8),
            Lt => (Op::Lt, 7),
            Le => (Op::Leq, 7),
            Gt => (Op::Gt, 7),
            Ge => (Op::Geq, 7),
            EqEq => (Op::Eq, 6),
            Ne => (Op::Neq, 6),
            Amp => (Op::BitAnd, 5),
            Caret => (Op::BitXor, 4),
            Pipe => (Op::BitOr, 3),
            AndAnd => (Op::LogAnd, 2),
            OrOr => (Op::LogOr, 1),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<VarId> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.binop() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = self.emit_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<VarId> {
        if self.accept(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return self.emit_unary(Op::Negate, operand);
        }
        if self.accept(TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return self.emit_unary(Op::LogNot, operand);
        }
        if self.accept(TokenKind::Tilde) {
            let operand = self.parse_unary()?;
            return self.emit_unary(Op::BitNot, operand);
        }
        if self.accept(TokenKind::Amp) {
            let name = id(self.expect(TokenKind::Id)?.text);
            let target = self
                .store
                .find_var(name, self.cur_block)
                .ok_or_else(|| self.error(format!("cannot take the address of `{name}`")))?;
            let v = *self.store.var(target);
            let temp = self.store.new_temp(v.type_name)?;
            self.store.var_mut(temp).ptr = v.ptr + 1;
            let mut addr_of = Ph1Instr::new(Op::AddrOf);
            addr_of.dest = Some(temp);
            addr_of.src0 = Some(target);
            self.emit(addr_of)?;
            return Ok(temp);
        }
        if self.accept(TokenKind::Star) {
            let ptr = self.parse_unary()?;
            let v = *self.store.var(ptr);
            let size = self.store.access_size(&v);
            let temp = self.store.new_temp(v.type_name)?;
            self.store.var_mut(temp).ptr = v.ptr.saturating_sub(1);
            let mut read = Ph1Instr::new(Op::Read);
            read.dest = Some(temp);
            read.src0 = Some(ptr);
            read.size = size;
            self.emit(read)?;
            return Ok(temp);
        }
        self.parse_primary()
    }

    fn emit_unary(&mut self, op: Op, operand: VarId) -> Result<VarId> {
        let temp = self.store.new_temp(id("int"))?;
        let mut instr = Ph1Instr::new(op);
        instr.dest = Some(temp);
        instr.src0 = Some(operand);
        self.emit(instr)?;
        Ok(temp)
    }

    fn parse_primary(&mut self) -> Result<VarId> {
        if self.accept(TokenKind::LParen) {
            let inner = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        if self.check(TokenKind::Num) {
            let value = self.number()?;
            return self.emit_const(value);
        }
        if self.check(TokenKind::CharLit) {
            let token = self.advance()?;
            return self.emit_const(char_value(token.text));
        }
        if self.check(TokenKind::StrLit) {
            let token = self.advance()?;
            let mut bytes = string_bytes(token.text);
            bytes.push(0);
            let offset = self.store.push_data(&bytes)?;
            let temp = self.store.new_temp(id("char"))?;
            self.store.var_mut(temp).ptr = 1;
            self.store.var_mut(temp).init_val = offset as i32;
            let mut instr = Ph1Instr::new(Op::LoadDataAddr);
            instr.dest = Some(temp);
            self.emit(instr)?;
            return Ok(temp);
        }

        let token = self.expect(TokenKind::Id)?;
        let name = id(token.text);

        if self.check(TokenKind::LParen) {
            return self.parse_call(name);
        }

        if let Some(var) = self.store.find_var(name, self.cur_block) {
            if self.accept(TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                let (addr, size) = self.index_address(var, index)?;
                let v = *self.store.var(var);
                let temp = self.store.new_temp(v.type_name)?;
                self.store.var_mut(temp).ptr = v.ptr.saturating_sub(1);
                let mut read = Ph1Instr::new(Op::Read);
                read.dest = Some(temp);
                read.src0 = Some(addr);
                read.size = size;
                self.emit(read)?;
                return Ok(temp);
            }
            if self.check(TokenKind::Dot) || self.check(TokenKind::Arrow) {
                let (addr, field) = self.member_address(var)?;
                let temp = self.store.new_temp(field.type_name)?;
                self.store.var_mut(temp).ptr = field.ptr;
                let mut read = Ph1Instr::new(Op::Read);
                read.dest = Some(temp);
                read.src0 = Some(addr);
                read.size = self.store.access_size(&field);
                self.emit(read)?;
                return Ok(temp);
            }
            return Ok(var);
        }

        if let Some(value) = self.store.find_constant(name) {
            return self.emit_const(value);
        }
        if let Some(alias) = self.store.find_alias(name) {
            if let Some(value) = self.store.find_constant(alias) {
                return self.emit_const(value);
            }
            if let Ok(value) = alias.parse::<i32>() {
                return self.emit_const(value);
            }
            if let Some(var) = self.store.find_var(alias, self.cur_block) {
                return Ok(var);
            }
        }
        Err(self.error(format!("unknown identifier `{name}`")))
    }

    /// Call through a function name or a function-pointer variable.
    fn parse_call(&mut self, name: Id) -> Result<VarId> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.accept(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let fnptr = self
            .store
            .find_var(name, self.cur_block)
            .filter(|&v| self.store.var(v).is_func);

        let (ret_type, ret_ptr, variadic, param_count) = match fnptr {
            Some(v) => {
                let v = self.store.var(v);
                (v.type_name, 0u8, false, args.len())
            }
            None => {
                let fid = self
                    .store
                    .find_func(name)
                    .ok_or(CompileError::UnknownFunction(name))?;
                let f = self.store.func(fid);
                let ret = *self.store.var(f.ret);
                (ret.type_name, ret.ptr, f.variadic, f.params.len())
            }
        };
        if args.len() > MAX_PARAMS || (!variadic && args.len() != param_count) {
            return Err(self.error(format!(
                "`{name}` called with {} arguments, expected {param_count}",
                args.len()
            )));
        }

        for &arg in &args {
            let mut push = Ph1Instr::new(Op::Push);
            push.src0 = Some(arg);
            self.emit(push)?;
        }

        match fnptr {
            Some(v) => {
                let mut call = Ph1Instr::new(Op::Indirect);
                call.src0 = Some(v);
                call.arg_count = args.len();
                self.emit(call)?;
            }
            None => {
                let mut call = Ph1Instr::new(Op::Call);
                call.func_name = Some(name);
                call.arg_count = args.len();
                self.emit(call)?;
            }
        }

        let temp = self.store.new_temp(ret_type)?;
        self.store.var_mut(temp).ptr = ret_ptr;
        let mut retval = Ph1Instr::new(Op::RetVal);
        retval.dest = Some(temp);
        self.emit(retval)?;
        Ok(temp)
    }

    /// Address of `base[index]` plus the element access size.
    fn index_address(&mut self, base: VarId, index: VarId) -> Result<(VarId, i32)> {
        let v = *self.store.var(base);
        let size = self.store.access_size(&v);
        let scaled = if size == 1 {
            index
        } else {
            let width = self.emit_const(size)?;
            self.emit_binary(Op::Mul, index, width)?
        };
        let addr = self.emit_binary(Op::Add, base, scaled)?;
        self.store.var_mut(addr).type_name = v.type_name;
        self.store.var_mut(addr).ptr = v.ptr.max(1);
        Ok((addr, size))
    }

    /// Address of a (possibly chained) member access rooted at `base`,
    /// plus the final field.
    fn member_address(&mut self, base: VarId) -> Result<(VarId, Variable)> {
        let v = *self.store.var(base);
        let mut addr;
        let mut type_name;
        if self.accept(TokenKind::Dot) {
            // value form: take the variable's address
            let temp = self.store.new_temp(v.type_name)?;
            self.store.var_mut(temp).ptr = 1;
            let mut addr_of = Ph1Instr::new(Op::AddrOf);
            addr_of.dest = Some(temp);
            addr_of.src0 = Some(base);
            self.emit(addr_of)?;
            addr = temp;
            type_name = v.type_name;
        } else {
            self.expect(TokenKind::Arrow)?;
            addr = base;
            type_name = v.type_name;
        }

        loop {
            let tid = self
                .store
                .find_type(type_name)
                .ok_or(CompileError::UnknownType(type_name))?;
            let field_name = id(self.expect(TokenKind::Id)?.text);
            let (offset, field) = self
                .store
                .find_member(tid, field_name)
                .ok_or_else(|| self.error(format!("no member `{field_name}` in `{type_name}`")))?;
            if offset != 0 {
                let delta = self.emit_const(offset)?;
                addr = self.emit_binary(Op::Add, addr, delta)?;
            }
            if self.accept(TokenKind::Dot) {
                // struct-valued field: keep accumulating the offset
                type_name = field.type_name;
                continue;
            }
            if self.accept(TokenKind::Arrow) {
                // pointer field: follow it
                let temp = self.store.new_temp(field.type_name)?;
                self.store.var_mut(temp).ptr = 1;
                let mut read = Ph1Instr::new(Op::Read);
                read.dest = Some(temp);
                read.src0 = Some(addr);
                read.size = crate::common::PTR_SIZE;
                self.emit(read)?;
                addr = temp;
                type_name = field.type_name;
                continue;
            }
            return Ok((addr, field));
        }
    }

    fn number(&mut self) -> Result<i32> {
        let token = self.expect(TokenKind::Num)?;
        let value = if let Some(hex) = token.text.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else {
            token.text.parse::<i64>()
        }
        .map_err(|_| self.error(format!("bad number `{}`", token.text)))?;
        Ok(value as i32)
    }
}

/// Decode a character literal, quotes included.
fn char_value(text: &str) -> i32 {
    let inner = &text[1..text.len() - 1];
    let mut chars = inner.chars();
    match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => b'\n' as i32,
            Some('t') => b'\t' as i32,
            Some('r') => b'\r' as i32,
            Some('0') => 0,
            Some(other) => other as i32,
            None => 0,
        },
        Some(other) => other as i32,
        None => 0,
    }
}

/// Decode a string literal, quotes included.
fn string_bytes(text: &str) -> Vec<u8> {
    let inner = &text[1..text.len() - 1];
    let mut bytes = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => bytes.push(b'\n'),
                Some('t') => bytes.push(b'\t'),
                Some('r') => bytes.push(b'\r'),
                Some('0') => bytes.push(0),
                Some(other) => bytes.extend(other.to_string().as_bytes()),
                None => {}
            }
        } else {
            bytes.extend(c.to_string().as_bytes());
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Store {
        let mut store = Store::new();
        parse_into(&mut store, source).unwrap();
        store
    }

    fn body_ops(store: &Store) -> Vec<Op> {
        store.body_ir.iter().map(|i| i.op).collect()
    }

    #[test]
    fn minimal_main() {
        let store = parse("int main() { return 0; }");
        assert_eq!(
            body_ops(&store),
            vec![Op::Define, Op::BlockStart, Op::LoadConst, Op::Return, Op::BlockEnd]
        );
        assert!(store.find_func(id("main")).is_some());
    }

    #[test]
    fn globals_go_to_the_global_stream() {
        let store = parse("int g = 5; int main() { return g; }");
        let ops: Vec<Op> = store.global_ir.iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::Alloc, Op::LoadConst, Op::Assign]);
        let g = store.find_var(id("g"), GLOBAL_BLOCK).unwrap();
        assert!(store.var(g).is_global);
    }

    #[test]
    fn while_loop_start_label_carries_the_end_index() {
        let store = parse("int main() { int i = 0; while (i < 3) { i = i + 1; } return i; }");
        let starts: Vec<_> = store
            .body_ir
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == Op::Label)
            .collect();
        // start, body, end
        assert_eq!(starts.len(), 3);
        let (end_idx, _) = *starts.last().unwrap();
        let (_, start) = starts[0];
        let start_var = start.src0.unwrap();
        assert_eq!(store.var(start_var).init_val, end_idx as i32);
    }

    #[test]
    fn calls_push_arguments_in_order() {
        let store = parse("int f(int a, int b) { return a; } int main() { return f(1, 2); }");
        let ops = body_ops(&store);
        let call_at = ops.iter().position(|&o| o == Op::Call).unwrap();
        assert_eq!(ops[call_at - 1], Op::Push);
        assert_eq!(ops[call_at - 2], Op::Push);
        assert_eq!(ops[call_at + 1], Op::RetVal);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut store = Store::new();
        let result = parse_into(
            &mut store,
            "int f(int a) { return a; } int main() { return f(); }",
        );
        assert!(matches!(result, Err(CompileError::Parse { .. })));
    }

    #[test]
    fn function_pointer_assignment_materializes_the_callee() {
        let store = parse(
            "int g(int x) { return x; } int main() { int (*f)(int); f = &g; return f(41); }",
        );
        let ops = body_ops(&store);
        assert!(ops.contains(&Op::Indirect));
        let write = store
            .body_ir
            .iter()
            .find(|i| i.op == Op::Write)
            .unwrap();
        assert!(store.var(write.src0.unwrap()).is_func);
    }

    #[test]
    fn string_initializer_writes_every_byte() {
        let store = parse("int main() { char s[4] = \"abc\"; return s[1]; }");
        let writes = store
            .body_ir
            .iter()
            .filter(|i| i.op == Op::Write && i.size == 1)
            .count();
        assert_eq!(writes, 4, "three characters and the terminator");
        let read = store.body_ir.iter().find(|i| i.op == Op::Read).unwrap();
        assert_eq!(read.size, 1);
    }

    #[test]
    fn enums_and_defines_become_constants() {
        let store = parse("#define LIMIT 10\nenum { A, B = 5, C };\nint main() { return LIMIT + C; }");
        assert_eq!(store.find_constant(id("LIMIT")), Some(10));
        assert_eq!(store.find_constant(id("A")), Some(0));
        assert_eq!(store.find_constant(id("C")), Some(6));
    }

    #[test]
    fn struct_members_are_reached_through_offsets() {
        let store = parse(
            "struct point { int x; int y; };\nint main() { struct point p; p.y = 3; return p.y; }",
        );
        let ty = store.find_type(id("point")).unwrap();
        assert_eq!(store.typ(ty).size, 8);
        assert!(body_ops(&store).contains(&Op::Write));
    }
}
