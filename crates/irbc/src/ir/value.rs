//! Values, their kinds, and the use edges between them.

use std::fmt;

use super::TypeId;

/// Handle to a value in a module's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A back-edge: `user` references this value at operand position `operand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: ValueId,
    pub operand: u32,
}

/// Instruction and constant-expression opcodes, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    Ret = 1,
    Br = 2,
    Switch = 3,
    Invoke = 4,
    Unwind = 5,
    Unreachable = 6,
    Add = 7,
    Sub = 8,
    Mul = 9,
    Div = 10,
    Rem = 11,
    And = 12,
    Or = 13,
    Xor = 14,
    SetEQ = 15,
    SetNE = 16,
    SetLE = 17,
    SetGE = 18,
    SetLT = 19,
    SetGT = 20,
    Malloc = 21,
    Free = 22,
    Alloca = 23,
    Load = 24,
    Store = 25,
    GetElementPtr = 26,
    PHI = 27,
    Cast = 28,
    Call = 29,
    Shl = 30,
    Shr = 31,
    VAArg = 32,
    Select = 33,
}

impl Opcode {
    pub fn from_u32(v: u32) -> Option<Self> {
        use Opcode::*;
        Some(match v {
            1 => Ret,
            2 => Br,
            3 => Switch,
            4 => Invoke,
            5 => Unwind,
            6 => Unreachable,
            7 => Add,
            8 => Sub,
            9 => Mul,
            10 => Div,
            11 => Rem,
            12 => And,
            13 => Or,
            14 => Xor,
            15 => SetEQ,
            16 => SetNE,
            17 => SetLE,
            18 => SetGE,
            19 => SetLT,
            20 => SetGT,
            21 => Malloc,
            22 => Free,
            23 => Alloca,
            24 => Load,
            25 => Store,
            26 => GetElementPtr,
            27 => PHI,
            28 => Cast,
            29 => Call,
            30 => Shl,
            31 => Shr,
            32 => VAArg,
            33 => Select,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Ret
                | Opcode::Br
                | Opcode::Switch
                | Opcode::Invoke
                | Opcode::Unwind
                | Opcode::Unreachable
        )
    }

    /// Two operands of the result type, result of the same type.
    pub fn is_binary(self) -> bool {
        (Opcode::Add.code()..=Opcode::Xor.code()).contains(&self.code())
    }

    /// SetEQ through SetGT.
    pub fn is_comparison(self) -> bool {
        (Opcode::SetEQ.code()..=Opcode::SetGT.code()).contains(&self.code())
    }

    pub fn is_shift(self) -> bool {
        matches!(self, Opcode::Shl | Opcode::Shr)
    }

    /// Opcodes allowed in a constant expression.
    pub fn is_constant_expr(self) -> bool {
        self.is_binary()
            || self.is_comparison()
            || self.is_shift()
            || matches!(self, Opcode::Cast | Opcode::GetElementPtr)
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Ret => "ret",
            Br => "br",
            Switch => "switch",
            Invoke => "invoke",
            Unwind => "unwind",
            Unreachable => "unreachable",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Rem => "rem",
            And => "and",
            Or => "or",
            Xor => "xor",
            SetEQ => "seteq",
            SetNE => "setne",
            SetLE => "setle",
            SetGE => "setge",
            SetLT => "setlt",
            SetGT => "setgt",
            Malloc => "malloc",
            Free => "free",
            Alloca => "alloca",
            Load => "load",
            Store => "store",
            GetElementPtr => "getelementptr",
            PHI => "phi",
            Cast => "cast",
            Call => "call",
            Shl => "shl",
            Shr => "shr",
            VAArg => "vaarg",
            Select => "select",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Linkage of a global variable or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Linkage {
    #[default]
    External = 0,
    LinkOnce = 1,
    Weak = 2,
    Appending = 3,
    Internal = 4,
}

impl Linkage {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Linkage::External,
            1 => Linkage::LinkOnce,
            2 => Linkage::Weak,
            3 => Linkage::Appending,
            4 => Linkage::Internal,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Linkage::External => "external",
            Linkage::LinkOnce => "linkonce",
            Linkage::Weak => "weak",
            Linkage::Appending => "appending",
            Linkage::Internal => "internal",
        }
    }
}

/// Payload of a constant. Scalars carry their value inline; aggregates and
/// expressions keep their elements in [`Constant::operands`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantKind {
    /// The zero value of the constant's type.
    Null,
    Bool(bool),
    /// Signed integer types.
    Int(i64),
    /// Unsigned integer types.
    UInt(u64),
    /// Bit pattern of an `f32`.
    Float(u32),
    /// Bit pattern of an `f64`.
    Double(u64),
    Array,
    Struct,
    Expr(Opcode),
}

impl ConstantKind {
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            ConstantKind::Null
                | ConstantKind::Bool(_)
                | ConstantKind::Int(_)
                | ConstantKind::UInt(_)
                | ConstantKind::Float(_)
                | ConstantKind::Double(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub kind: ConstantKind,
    pub operands: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<ValueId>,
    /// Only meaningful for loads and stores.
    pub volatile: bool,
    pub parent: Option<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicBlock {
    pub parent: Option<ValueId>,
    pub instructions: Vec<ValueId>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<ValueId> {
        self.instructions.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub linkage: Linkage,
    pub is_constant: bool,
    /// Stored as the global's single operand so it takes part in use lists.
    pub initializer: Option<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub linkage: Linkage,
    pub arguments: Vec<ValueId>,
    pub blocks: Vec<ValueId>,
}

impl Function {
    /// A function without blocks is an external declaration.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Constant(Constant),
    Instruction(Instruction),
    BasicBlock(BasicBlock),
    Argument { parent: ValueId, index: u32 },
    GlobalVariable(GlobalVariable),
    Function(Function),
    /// Stand-in for a value referenced before its definition was decoded.
    Placeholder { slot: u32 },
    /// A value that was removed from the graph. Its arena slot is never reused.
    Retired,
}

impl ValueKind {
    /// Values this one references, in operand order.
    pub fn operands(&self) -> &[ValueId] {
        match self {
            ValueKind::Constant(c) => &c.operands,
            ValueKind::Instruction(i) => &i.operands,
            ValueKind::GlobalVariable(g) => g.initializer.as_slice(),
            _ => &[],
        }
    }

    pub(crate) fn operands_mut(&mut self) -> Option<&mut [ValueId]> {
        match self {
            ValueKind::Constant(c) => Some(&mut c.operands),
            ValueKind::Instruction(i) => Some(&mut i.operands),
            ValueKind::GlobalVariable(g) => Some(g.initializer.as_mut_slice()),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ValueKind::Constant(_))
    }

    /// Globals and functions: values addressable from every scope.
    pub fn is_global(&self) -> bool {
        matches!(self, ValueKind::GlobalVariable(_) | ValueKind::Function(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueData {
    pub ty: TypeId,
    pub name: Option<String>,
    pub kind: ValueKind,
    pub(crate) uses: Vec<Use>,
}

impl ValueData {
    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    pub fn constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            ValueKind::Instruction(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Constant(Constant {
                kind: ConstantKind::Null,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_numbers_round_trip() {
        for v in 0..70 {
            if let Some(op) = Opcode::from_u32(v) {
                assert_eq!(op.code(), v);
            }
        }
        assert_eq!(Opcode::from_u32(0), None);
        assert_eq!(Opcode::from_u32(34), None);
        assert_eq!(Opcode::from_u32(62), None, "volatile variants are not opcodes");
    }

    #[test]
    fn opcode_classes() {
        assert!(Opcode::Xor.is_binary());
        assert!(!Opcode::SetEQ.is_binary());
        assert!(Opcode::SetGT.is_comparison());
        assert!(Opcode::Invoke.is_terminator());
        assert!(!Opcode::Call.is_terminator());
        assert!(Opcode::Cast.is_constant_expr());
        assert!(!Opcode::Load.is_constant_expr());
    }

    #[test]
    fn linkage_codes() {
        for code in 0..5 {
            assert_eq!(Linkage::from_u32(code).map(Linkage::code), Some(code));
        }
        assert_eq!(Linkage::from_u32(5), None);
    }

    #[test]
    fn global_initializer_is_an_operand() {
        let kind = ValueKind::GlobalVariable(GlobalVariable {
            linkage: Linkage::Internal,
            is_constant: false,
            initializer: Some(ValueId(4)),
        });
        assert_eq!(kind.operands(), &[ValueId(4)]);
    }
}
