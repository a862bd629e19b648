use num_derive::FromPrimitive;

use super::opcode::Opcode;

pub const LIMITS_HAS_MAX: u8 = 0x1;

pub const SEG_IS_PASSIVE: u32 = 0x1;
pub const SEG_HAS_MEMINDEX: u32 = 0x2;

/// Value types as signed LEB128 codes (0x7F == -0x01 and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32, // -0x01
    I64, // -0x02
    F32, // -0x03
    F64, // -0x04
}

impl ValueType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -0x01 => Some(ValueType::I32),
            -0x02 => Some(ValueType::I64),
            -0x03 => Some(ValueType::F32),
            -0x04 => Some(ValueType::F64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    FuncRef,   // -0x10
    ExternRef, // -0x11
}

impl RefType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -0x10 => Some(RefType::FuncRef),
            -0x11 => Some(RefType::ExternRef),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ExternKind {
    Func = 0,
    Table = 1,
    Memory = 2,
    Global = 3,
    Event = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub flags: u8,
    pub initial: u32,
    pub maximum: Option<u32>,
}

impl Limits {
    pub fn has_max(&self) -> bool {
        self.flags & LIMITS_HAS_MAX != 0
    }
}

/// A constant initializer: one `i32.const`/`i64.const` followed by `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitExpr {
    pub opcode: Opcode,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    Func(u32),
    Table { ref_type: RefType, limits: Limits },
    Memory(Limits),
    Global { value_type: ValueType, mutable: bool },
    Event { attribute: u32, type_index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

impl Import {
    pub fn kind(&self) -> ExternKind {
        match self.desc {
            ImportDesc::Func(_) => ExternKind::Func,
            ImportDesc::Table { .. } => ExternKind::Table,
            ImportDesc::Memory(_) => ExternKind::Memory,
            ImportDesc::Global { .. } => ExternKind::Global,
            ImportDesc::Event { .. } => ExternKind::Event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub ref_type: RefType,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub value_type: ValueType,
    pub mutable: bool,
    pub init: InitExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub flags: u32,
    pub memory_index: u32,
    /// `None` for passive segments.
    pub init: Option<InitExpr>,
    pub bytes: Vec<u8>,
}

impl DataSegment {
    pub fn is_passive(&self) -> bool {
        self.flags & SEG_IS_PASSIVE != 0
    }
}
