//! The entity store.
//!
//! Every entity the compiler manipulates (variables, functions, blocks,
//! types, aliases, enum constants) lives in an append-only arena owned by
//! [Store]; cross-references between entities are stable indices, never
//! mutual ownership.  Lookup is a linear scan by interned name.  Deletion
//! is not supported, capacities are fixed, and exceeding any of them is a
//! fatal [CompileError::Capacity].

use crate::common::{id, Id, PTR_SIZE};
use crate::error::{CompileError, Result};
use crate::middle::ir::{Ph1Instr, Ph2Instr};

pub const MAX_PARAMS: usize = 8;
pub const MAX_LOCALS: usize = 960;
pub const MAX_FIELDS: usize = 32;
pub const MAX_FUNCS: usize = 256;
pub const MAX_BLOCKS: usize = 625;
pub const MAX_TYPES: usize = 64;
pub const MAX_VARS: usize = 32768;
pub const MAX_IR: usize = 32768;
pub const MAX_GLOBAL_IR: usize = 256;
pub const MAX_ALIASES: usize = 1024;
pub const MAX_CONSTANTS: usize = 1024;
pub const MAX_DATA: usize = 262144;

/// End-of-life sentinel for process-lifetime variables; larger than any
/// instruction index the IR streams can hold.
pub const EOL_FOREVER: usize = 1 << 28;

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

entity_id!(VarId);
entity_id!(FuncId);
entity_id!(BlockId);
entity_id!(TypeId);

/// The pseudo-function holding process-lifetime variables; its stack size
/// is the size of the global data area.
pub const GLOBAL_FRAME: FuncId = FuncId(0);

/// The block holding global variables.
pub const GLOBAL_BLOCK: BlockId = BlockId(0);

/// Base kind of a type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BaseType {
    Void,
    Int,
    Char,
    Struct,
}

/// A variable.  Also used for function parameters, struct fields, compiler
/// temporaries, and labels (a label is a variable whose name is the label
/// and whose `init_val` carries the loop-end index for loop-start labels).
#[derive(Clone, Copy, Debug)]
pub struct Variable {
    pub name: Id,
    pub type_name: Id,
    /// Pointer indirection depth; 0 for a direct value.
    pub ptr: u8,
    /// Function-pointer flag.
    pub is_func: bool,
    /// Element count; 0 for a scalar.
    pub array_size: usize,
    /// Byte offset of the home slot in the owning frame; 0 = unassigned.
    pub offset: i32,
    /// Initial value for constants and global initialization; loop-end
    /// Phase-1 index for loop-start labels.
    pub init_val: i32,
    pub is_global: bool,
    /// Largest instruction index at which the variable is still
    /// referenced.  Written by the liveness pass.
    pub eol: usize,
    pub in_loop: bool,
}

impl Variable {
    pub fn new(name: Id, type_name: Id) -> Self {
        Variable {
            name,
            type_name,
            ptr: 0,
            is_func: false,
            array_size: 0,
            offset: 0,
            init_val: 0,
            is_global: false,
            eol: 0,
            in_loop: false,
        }
    }
}

/// A function.  The name lives in the return-slot variable.
#[derive(Clone, Debug)]
pub struct Function {
    /// Return-slot variable; carries the function name and return type.
    pub ret: VarId,
    pub params: Vec<VarId>,
    pub variadic: bool,
    /// Frame size in bytes, monotonically grown by the allocator.  Offset
    /// 0 is reserved, so the size starts at one pointer.
    pub stack_size: i32,
}

/// A lexical block.  Blocks form a tree; name lookup walks parent links.
#[derive(Clone, Debug)]
pub struct Block {
    pub locals: Vec<VarId>,
    pub parent: Option<BlockId>,
    pub func: Option<FuncId>,
    pub locals_size: i32,
    pub index: BlockId,
}

/// A named type.
#[derive(Clone, Debug)]
pub struct Type {
    pub name: Id,
    pub base: BaseType,
    /// Size in bytes; fields are laid out back to back.
    pub size: i32,
    pub fields: Vec<Variable>,
}

/// A `#define` of one token for another.
#[derive(Clone, Copy, Debug)]
pub struct Alias {
    pub name: Id,
    pub value: Id,
}

/// An `enum` member.
#[derive(Clone, Copy, Debug)]
pub struct EnumConst {
    pub name: Id,
    pub value: i32,
}

/// Arena-allocated tables of every entity plus the IR streams and the
/// global data buffer.
pub struct Store {
    pub vars: Vec<Variable>,
    pub funcs: Vec<Function>,
    pub blocks: Vec<Block>,
    pub types: Vec<Type>,
    pub aliases: Vec<Alias>,
    pub constants: Vec<EnumConst>,
    /// IR for global initializers, lowered against the global frame.
    pub global_ir: Vec<Ph1Instr>,
    /// IR for function bodies.
    pub body_ir: Vec<Ph1Instr>,
    /// Lowered IR, filled by the register allocator.
    pub ph2_ir: Vec<Ph2Instr>,
    /// Read-only data (string literals), appended by the front-end.
    pub data: Vec<u8>,
    next_temp: usize,
    next_label: usize,
}

impl Store {
    pub fn new() -> Self {
        // Slot 0 of each arena is the global frame: a pseudo-function whose
        // stack is the global data area, and the block holding globals.
        let ret = Variable::new(id(""), id("void"));
        let global_fn = Function {
            ret: VarId(0),
            params: Vec::new(),
            variadic: false,
            stack_size: PTR_SIZE,
        };
        let global_block = Block {
            locals: Vec::new(),
            parent: None,
            func: None,
            locals_size: 0,
            index: BlockId(0),
        };
        Store {
            vars: vec![ret],
            funcs: vec![global_fn],
            blocks: vec![global_block],
            types: Vec::new(),
            aliases: Vec::new(),
            constants: Vec::new(),
            global_ir: Vec::new(),
            body_ir: Vec::new(),
            ph2_ir: Vec::new(),
            data: Vec::new(),
            next_temp: 0,
            next_label: 0,
        }
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.index()]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn typ(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    /// Name of a function, read out of its return-slot variable.
    pub fn func_name(&self, id: FuncId) -> Id {
        self.var(self.func(id).ret).name
    }

    pub fn add_var(&mut self, var: Variable) -> Result<VarId> {
        if self.vars.len() >= MAX_VARS {
            return Err(CompileError::Capacity("variables"));
        }
        self.vars.push(var);
        Ok(VarId(self.vars.len() as u32 - 1))
    }

    /// Register a variable as a local of `block`.
    pub fn add_local(&mut self, block: BlockId, var: Variable) -> Result<VarId> {
        if self.block(block).locals.len() >= MAX_LOCALS {
            return Err(CompileError::Capacity("block locals"));
        }
        let vid = self.add_var(var)?;
        self.block_mut(block).locals.push(vid);
        Ok(vid)
    }

    pub fn add_block(&mut self, parent: Option<BlockId>, func: Option<FuncId>) -> Result<BlockId> {
        if self.blocks.len() >= MAX_BLOCKS {
            return Err(CompileError::Capacity("blocks"));
        }
        let index = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            locals: Vec::new(),
            parent,
            func,
            locals_size: 0,
            index,
        });
        Ok(index)
    }

    /// Find or add a function; the same name always returns the same
    /// record.
    pub fn add_func(&mut self, name: Id) -> Result<FuncId> {
        if let Some(found) = self.find_func(name) {
            return Ok(found);
        }
        if self.funcs.len() >= MAX_FUNCS {
            return Err(CompileError::Capacity("functions"));
        }
        let ret = self.add_var(Variable::new(name, id("int")))?;
        self.funcs.push(Function {
            ret,
            params: Vec::new(),
            variadic: false,
            stack_size: PTR_SIZE,
        });
        Ok(FuncId(self.funcs.len() as u32 - 1))
    }

    pub fn find_func(&self, name: Id) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| self.var(f.ret).name == name)
            .map(|i| FuncId(i as u32))
    }

    /// Find or add a named type.
    pub fn add_type(&mut self, name: Id, base: BaseType, size: i32) -> Result<TypeId> {
        if let Some(found) = self.find_type(name) {
            return Ok(found);
        }
        if self.types.len() >= MAX_TYPES {
            return Err(CompileError::Capacity("types"));
        }
        self.types.push(Type {
            name,
            base,
            size,
            fields: Vec::new(),
        });
        Ok(TypeId(self.types.len() as u32 - 1))
    }

    pub fn find_type(&self, name: Id) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| TypeId(i as u32))
    }

    /// Field of a struct type, with its byte offset from the struct base.
    pub fn find_member(&self, ty: TypeId, name: Id) -> Option<(i32, Variable)> {
        let mut offset = 0;
        for field in &self.typ(ty).fields {
            if field.name == name {
                return Some((offset, *field));
            }
            offset += self.var_size(field).ok()?;
        }
        None
    }

    /// Find or add an alias; redefinition replaces the value.
    pub fn add_alias(&mut self, name: Id, value: Id) -> Result<()> {
        if let Some(existing) = self.aliases.iter_mut().find(|a| a.name == name) {
            existing.value = value;
            return Ok(());
        }
        if self.aliases.len() >= MAX_ALIASES {
            return Err(CompileError::Capacity("aliases"));
        }
        self.aliases.push(Alias { name, value });
        Ok(())
    }

    pub fn find_alias(&self, name: Id) -> Option<Id> {
        self.aliases.iter().find(|a| a.name == name).map(|a| a.value)
    }

    /// Find or add an enum constant.
    pub fn add_constant(&mut self, name: Id, value: i32) -> Result<()> {
        if self.constants.iter().any(|c| c.name == name) {
            return Ok(());
        }
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::Capacity("constants"));
        }
        self.constants.push(EnumConst { name, value });
        Ok(())
    }

    pub fn find_constant(&self, name: Id) -> Option<i32> {
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// Look a name up through the block tree, then the owning function's
    /// parameters, then the globals.
    pub fn find_var(&self, name: Id, block: BlockId) -> Option<VarId> {
        let func = self.block(block).func;
        let mut cursor = Some(block);
        while let Some(b) = cursor {
            let b = self.block(b);
            for &v in &b.locals {
                if self.var(v).name == name {
                    return Some(v);
                }
            }
            cursor = b.parent;
        }
        if let Some(f) = func {
            for &p in &self.func(f).params {
                if self.var(p).name == name {
                    return Some(p);
                }
            }
        }
        self.block(GLOBAL_BLOCK)
            .locals
            .iter()
            .copied()
            .find(|&v| self.var(v).name == name)
    }

    /// Storage size of a variable in bytes.
    pub fn var_size(&self, var: &Variable) -> Result<i32> {
        let base = if var.ptr > 0 || var.is_func {
            PTR_SIZE
        } else {
            let ty = self
                .find_type(var.type_name)
                .ok_or(CompileError::UnknownType(var.type_name))?;
            self.typ(ty).size
        };
        if var.array_size > 0 {
            Ok(base * var.array_size as i32)
        } else {
            Ok(base)
        }
    }

    /// Byte width of one element behind a pointer or array variable.
    pub fn access_size(&self, var: &Variable) -> i32 {
        if var.ptr > 1 {
            return PTR_SIZE;
        }
        match self.find_type(var.type_name) {
            Some(ty) if self.typ(ty).base == BaseType::Char => 1,
            _ => PTR_SIZE,
        }
    }

    /// Extend a variable's end of life; never decreases it.
    pub fn set_liveout(&mut self, var: VarId, end: usize) {
        let var = self.var_mut(var);
        if var.eol < end {
            var.eol = end;
        }
    }

    pub fn push_global(&mut self, instr: Ph1Instr) -> Result<usize> {
        if self.global_ir.len() >= MAX_GLOBAL_IR {
            return Err(CompileError::Capacity("global IR instructions"));
        }
        self.global_ir.push(instr);
        Ok(self.global_ir.len() - 1)
    }

    pub fn push_body(&mut self, instr: Ph1Instr) -> Result<usize> {
        if self.body_ir.len() >= MAX_IR {
            return Err(CompileError::Capacity("IR instructions"));
        }
        self.body_ir.push(instr);
        Ok(self.body_ir.len() - 1)
    }

    pub fn push_ph2(&mut self, instr: Ph2Instr) -> Result<()> {
        if self.ph2_ir.len() >= MAX_IR {
            return Err(CompileError::Capacity("Phase-2 IR instructions"));
        }
        self.ph2_ir.push(instr);
        Ok(())
    }

    /// Append bytes to the read-only data area, returning their offset.
    pub fn push_data(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.data.len() + bytes.len() > MAX_DATA {
            return Err(CompileError::Capacity("data bytes"));
        }
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Fresh compiler temporary.  Temporaries live in the variable arena
    /// but are not registered as block locals; their dotted names cannot
    /// collide with source identifiers.
    pub fn new_temp(&mut self, type_name: Id) -> Result<VarId> {
        let name = id(format!(".t{}", self.next_temp));
        self.next_temp += 1;
        self.add_var(Variable::new(name, type_name))
    }

    /// Fresh label variable.
    pub fn new_label(&mut self) -> Result<VarId> {
        let name = id(format!(".L{}", self.next_label));
        self.next_label += 1;
        self.add_var(Variable::new(name, id("void")))
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn func_find_or_add_returns_same_record() {
        let mut store = Store::new();
        let a = store.add_func(id("main")).unwrap();
        let b = store.add_func(id("main")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.func_name(a), id("main"));
        // the global frame occupies index 0
        assert_ne!(a, GLOBAL_FRAME);
    }

    #[test]
    fn name_lookup_walks_block_parents() {
        let mut store = Store::new();
        let f = store.add_func(id("f")).unwrap();
        let outer = store.add_block(Some(GLOBAL_BLOCK), Some(f)).unwrap();
        let inner = store.add_block(Some(outer), Some(f)).unwrap();
        let v = store
            .add_local(outer, Variable::new(id("x"), id("int")))
            .unwrap();
        assert_eq!(store.find_var(id("x"), inner), Some(v));
        assert_eq!(store.find_var(id("y"), inner), None);
    }

    #[test]
    fn globals_visible_from_any_block() {
        let mut store = Store::new();
        let g = store
            .add_local(GLOBAL_BLOCK, {
                let mut v = Variable::new(id("g"), id("int"));
                v.is_global = true;
                v
            })
            .unwrap();
        let f = store.add_func(id("f")).unwrap();
        let b = store.add_block(Some(GLOBAL_BLOCK), Some(f)).unwrap();
        assert_eq!(store.find_var(id("g"), b), Some(g));
    }

    #[test]
    fn member_offsets_accumulate() {
        let mut store = Store::new();
        store.add_type(id("char"), BaseType::Char, 1).unwrap();
        store.add_type(id("int"), BaseType::Int, 4).unwrap();
        let ty = store.add_type(id("pair"), BaseType::Struct, 8).unwrap();
        store.types[ty.index()].fields = vec![
            Variable::new(id("a"), id("int")),
            Variable::new(id("b"), id("int")),
        ];
        let (ofs, field) = store.find_member(ty, id("b")).unwrap();
        assert_eq!(ofs, 4);
        assert_eq!(field.name, id("b"));
    }

    #[test]
    fn liveout_never_decreases() {
        let mut store = Store::new();
        let v = store.add_var(Variable::new(id("x"), id("int"))).unwrap();
        store.set_liveout(v, 10);
        store.set_liveout(v, 3);
        assert_eq!(store.var(v).eol, 10);
    }
}
