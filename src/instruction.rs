//! Decoded instruction model shared by the key-function resolver and the semantic lifter.
//!
//! Decoding itself is performed by a collaborator (see
//! [`InstructionDecoder`](crate::binary::InstructionDecoder)); this module only defines
//! the normalized representation that decoders produce. The representation is
//! deliberately small: it covers the mnemonics needed to recognize the supported
//! patterns, and captures everything else as [`Mnemonic::Unsupported`] for graceful
//! degradation.
//!
//! # Overview
//!
//! The type hierarchy is:
//!
//! - [`Register`] - normalized general-purpose and vector registers across x86-64 and ARM64
//! - [`Memory`] - memory operands with a base (register or instruction pointer) and offset
//! - [`Operand`] - closed union of register, memory, immediate, or in-binary constant
//! - [`Mnemonic`] - closed operation enumeration, with branch conditions folded in
//! - [`DecodedInstruction`] - one instruction with its address and encoded length
//!
//! Decoding adapters are expected to normalize architecture spellings into this model:
//! `b.eq` becomes [`Mnemonic::Je`], `bl` becomes [`Mnemonic::Call`], 32-bit register
//! forms map onto their full-width parents via [`Register::normalize`].

use std::fmt;

use strum::Display;

/// Absolute virtual address inside the analyzed binary.
pub type VirtualAddress = u64;

/// Instruction set of the analyzed binary.
///
/// Selects the thunk-scanning strategy and the calling convention used for
/// parameter binding. Anything outside this set causes key-function resolution
/// to be skipped entirely for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Architecture {
    /// 32-bit x86
    #[strum(serialize = "x86")]
    X86,
    /// 64-bit x86
    #[strum(serialize = "x86-64")]
    X86_64,
    /// AArch64
    #[strum(serialize = "arm64")]
    Arm64,
    /// Anything the crate has no strategy for
    #[strum(serialize = "unknown")]
    Unknown,
}

/// Normalized register name.
///
/// One enum spans both supported instruction sets; a decoded stream only ever
/// mentions the registers of its own architecture. Sub-registers (`eax` on
/// x86-64, `w0` on ARM64) are collapsed by [`Register::normalize`] so that the
/// symbolic machine state is keyed consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
#[allow(missing_docs)]
pub enum Register {
    // x86/x86-64 general purpose
    Rax, Rcx, Rdx, Rbx, Rsp, Rbp, Rsi, Rdi,
    R8, R9, R10, R11, R12, R13, R14, R15,
    Eax, Ecx, Edx, Ebx, Esp, Ebp, Esi, Edi,

    // x86 SSE scalar registers used for floating-point arguments
    Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7,

    // ARM64 general purpose
    X0, X1, X2, X3, X4, X5, X6, X7,
    X8, X9, X10, X11, X12, X13, X14, X15,
    X16, X17, X18, X19, X20, X21, X22, X23,
    X24, X25, X26, X27, X28,
    /// Frame pointer (x29)
    Fp,
    /// Link register (x30)
    Lr,
    /// Stack pointer
    Sp,
    /// Zero register
    Xzr,

    // ARM64 vector registers used for floating-point arguments
    V0, V1, V2, V3, V4, V5, V6, V7,
}

impl Register {
    /// Collapses a sub-register onto the full-width register it aliases.
    ///
    /// The symbolic machine state tracks one slot per architectural register;
    /// writes through `eax` and `rax` must land in the same slot.
    #[must_use]
    pub fn normalize(self) -> Register {
        match self {
            Register::Eax => Register::Rax,
            Register::Ecx => Register::Rcx,
            Register::Edx => Register::Rdx,
            Register::Ebx => Register::Rbx,
            Register::Esp => Register::Rsp,
            Register::Ebp => Register::Rbp,
            Register::Esi => Register::Rsi,
            Register::Edi => Register::Rdi,
            other => other,
        }
    }

    /// Returns true for registers that carry scalar floating-point values.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(
            self,
            Register::Xmm0
                | Register::Xmm1
                | Register::Xmm2
                | Register::Xmm3
                | Register::Xmm4
                | Register::Xmm5
                | Register::Xmm6
                | Register::Xmm7
                | Register::V0
                | Register::V1
                | Register::V2
                | Register::V3
                | Register::V4
                | Register::V5
                | Register::V6
                | Register::V7
        )
    }

    /// Returns true for the architectural zero register (ARM64 only).
    #[must_use]
    pub fn is_zero_register(self) -> bool {
        matches!(self, Register::Xzr)
    }
}

/// Base of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBase {
    /// Address computed from a general-purpose register
    Register(Register),
    /// Address computed relative to the next instruction (`rip`-relative on
    /// x86-64, literal-pool loads on ARM64 after adapter normalization)
    InstructionPointer,
}

/// Memory operand: a base plus a signed byte offset.
///
/// Index/scale addressing is not modeled; none of the recognized patterns
/// need it, and a decoder that encounters one emits [`Mnemonic::Unsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory {
    /// What the offset is relative to.
    pub base: MemoryBase,
    /// Signed byte offset added to the base.
    pub offset: i64,
}

impl Memory {
    /// Creates a `[reg + offset]` operand.
    #[must_use]
    pub fn base_offset(base: Register, offset: i64) -> Self {
        Memory {
            base: MemoryBase::Register(base),
            offset,
        }
    }

    /// Creates an instruction-pointer-relative operand.
    #[must_use]
    pub fn ip_relative(offset: i64) -> Self {
        Memory {
            base: MemoryBase::InstructionPointer,
            offset,
        }
    }

    /// Resolves an instruction-pointer-relative operand to an absolute address.
    ///
    /// Returns `None` for register-based operands; the offset is applied to the
    /// address of the *next* instruction, matching the x86 encoding convention.
    #[must_use]
    pub fn absolute_target(&self, insn: &DecodedInstruction) -> Option<VirtualAddress> {
        match self.base {
            MemoryBase::InstructionPointer => {
                Some(insn.end_address().wrapping_add_signed(self.offset))
            }
            MemoryBase::Register(_) => None,
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            MemoryBase::Register(reg) if self.offset == 0 => write!(f, "[{reg}]"),
            MemoryBase::Register(reg) if self.offset < 0 => {
                write!(f, "[{reg}-{:#x}]", -self.offset)
            }
            MemoryBase::Register(reg) => write!(f, "[{reg}+{:#x}]", self.offset),
            MemoryBase::InstructionPointer if self.offset < 0 => {
                write!(f, "[rip-{:#x}]", -self.offset)
            }
            MemoryBase::InstructionPointer => write!(f, "[rip+{:#x}]", self.offset),
        }
    }
}

/// Operand of a decoded instruction.
///
/// A closed tagged union; the lifter matches exhaustively so the compiler
/// catches unhandled operand kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Register operand
    Register(Register),
    /// Memory operand
    Memory(Memory),
    /// Immediate value encoded in the instruction
    Immediate(i64),
    /// Absolute address of read-only data inside the binary (a branch target,
    /// or the location of an in-binary constant)
    Constant(VirtualAddress),
}

impl Operand {
    /// Returns the register if this is a register operand.
    #[must_use]
    pub fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Register(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the memory operand if this is one.
    #[must_use]
    pub fn as_memory(&self) -> Option<Memory> {
        match self {
            Operand::Memory(m) => Some(*m),
            _ => None,
        }
    }

    /// Returns the immediate value if this is an immediate operand.
    #[must_use]
    pub fn as_immediate(&self) -> Option<i64> {
        match self {
            Operand::Immediate(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{r}"),
            Operand::Memory(m) => write!(f, "{m}"),
            Operand::Immediate(v) if *v < 0 => write!(f, "-{:#x}", -v),
            Operand::Immediate(v) => write!(f, "{v:#x}"),
            Operand::Constant(a) => write!(f, "{a:#x}"),
        }
    }
}

/// Branch condition, shared across architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Equal (ZF=1)
    Equal,
    /// Not equal (ZF=0)
    NotEqual,
    /// Signed greater
    Greater,
    /// Signed greater or equal
    GreaterOrEqual,
    /// Signed less
    Less,
    /// Signed less or equal
    LessOrEqual,
    /// Unsigned above
    Above,
    /// Unsigned above or equal
    AboveOrEqual,
    /// Unsigned below
    Below,
    /// Unsigned below or equal
    BelowOrEqual,
    /// Sign flag set
    Sign,
    /// Sign flag clear
    NotSign,
}

impl Condition {
    /// Returns the negation of this condition.
    #[must_use]
    pub fn negate(self) -> Condition {
        match self {
            Condition::Equal => Condition::NotEqual,
            Condition::NotEqual => Condition::Equal,
            Condition::Greater => Condition::LessOrEqual,
            Condition::GreaterOrEqual => Condition::Less,
            Condition::Less => Condition::GreaterOrEqual,
            Condition::LessOrEqual => Condition::Greater,
            Condition::Above => Condition::BelowOrEqual,
            Condition::AboveOrEqual => Condition::Below,
            Condition::Below => Condition::AboveOrEqual,
            Condition::BelowOrEqual => Condition::Above,
            Condition::Sign => Condition::NotSign,
            Condition::NotSign => Condition::Sign,
        }
    }

    /// Comparison operator spelling used in reconstructed conditions.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Condition::Equal => "==",
            Condition::NotEqual => "!=",
            Condition::Greater | Condition::Above => ">",
            Condition::GreaterOrEqual | Condition::AboveOrEqual => ">=",
            Condition::Less | Condition::Below | Condition::Sign => "<",
            Condition::LessOrEqual | Condition::BelowOrEqual => "<=",
            Condition::NotSign => ">=",
        }
    }
}

/// Closed enumeration of recognized operations.
///
/// Only the mnemonics needed to recognize the supported patterns are modeled;
/// everything else decodes to [`Mnemonic::Unsupported`] and is carried through
/// the analysis without aborting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mnemonic {
    /// Plain move
    Mov,
    /// Move with zero/sign extension
    #[strum(serialize = "movext")]
    MovExtend,
    /// Load effective address
    Lea,
    /// Exclusive or (the `xor r, r` register-clear idiom carrier)
    Xor,
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Increment by one
    Inc,
    /// Decrement by one
    Dec,
    /// Scalar floating-point multiply (`mulss`/`fmul`)
    #[strum(serialize = "mulss")]
    MulFloat,
    /// Integer compare
    Cmp,
    /// Bitwise test (`test r, r` self-comparison idiom carrier)
    Test,
    /// Scalar floating-point compare (`ucomiss`/`fcmp`)
    #[strum(serialize = "ucomiss")]
    CmpFloat,
    /// Unconditional jump
    Jmp,
    /// Jump if equal
    Je,
    /// Jump if not equal
    Jne,
    /// Jump if greater (signed)
    Jg,
    /// Jump if greater or equal (signed)
    Jge,
    /// Jump if less (signed)
    Jl,
    /// Jump if less or equal (signed)
    Jle,
    /// Jump if above (unsigned)
    Ja,
    /// Jump if above or equal (unsigned)
    Jae,
    /// Jump if below (unsigned)
    Jb,
    /// Jump if below or equal (unsigned)
    Jbe,
    /// Jump if sign
    Js,
    /// Jump if not sign
    Jns,
    /// Call
    Call,
    /// Return (near and far forms both normalize here)
    Ret,
    /// No operation
    Nop,
    /// Anything outside the recognized set
    Unsupported,
}

impl Mnemonic {
    /// Returns the branch condition for conditional-jump mnemonics.
    #[must_use]
    pub fn condition(self) -> Option<Condition> {
        match self {
            Mnemonic::Je => Some(Condition::Equal),
            Mnemonic::Jne => Some(Condition::NotEqual),
            Mnemonic::Jg => Some(Condition::Greater),
            Mnemonic::Jge => Some(Condition::GreaterOrEqual),
            Mnemonic::Jl => Some(Condition::Less),
            Mnemonic::Jle => Some(Condition::LessOrEqual),
            Mnemonic::Ja => Some(Condition::Above),
            Mnemonic::Jae => Some(Condition::AboveOrEqual),
            Mnemonic::Jb => Some(Condition::Below),
            Mnemonic::Jbe => Some(Condition::BelowOrEqual),
            Mnemonic::Js => Some(Condition::Sign),
            Mnemonic::Jns => Some(Condition::NotSign),
            _ => None,
        }
    }

    /// Returns true if this is a conditional branch.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        self.condition().is_some()
    }

    /// Returns true for unconditional control transfers (`jmp`, not `call`).
    #[must_use]
    pub fn is_unconditional_jump(self) -> bool {
        matches!(self, Mnemonic::Jmp)
    }

    /// Returns true for `call`.
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, Mnemonic::Call)
    }

    /// Returns true for returns.
    #[must_use]
    pub fn is_return(self) -> bool {
        matches!(self, Mnemonic::Ret)
    }

    /// Returns true for comparison instructions that set up a following branch.
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(self, Mnemonic::Cmp | Mnemonic::Test | Mnemonic::CmpFloat)
    }
}

/// One decoded instruction.
///
/// Immutable once decoded. Instructions carry at most two operands; the
/// operand order follows the Intel convention (destination first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Absolute virtual address of the instruction
    pub address: VirtualAddress,
    /// Encoded length in bytes
    pub size: u8,
    /// Operation
    pub mnemonic: Mnemonic,
    /// Operands, destination first (0-2 entries)
    pub operands: Vec<Operand>,
}

impl DecodedInstruction {
    /// Creates an instruction with no operands.
    #[must_use]
    pub fn nullary(address: VirtualAddress, size: u8, mnemonic: Mnemonic) -> Self {
        DecodedInstruction {
            address,
            size,
            mnemonic,
            operands: Vec::new(),
        }
    }

    /// Creates an instruction with one operand.
    #[must_use]
    pub fn unary(address: VirtualAddress, size: u8, mnemonic: Mnemonic, op: Operand) -> Self {
        DecodedInstruction {
            address,
            size,
            mnemonic,
            operands: vec![op],
        }
    }

    /// Creates an instruction with two operands.
    #[must_use]
    pub fn binary(
        address: VirtualAddress,
        size: u8,
        mnemonic: Mnemonic,
        dst: Operand,
        src: Operand,
    ) -> Self {
        DecodedInstruction {
            address,
            size,
            mnemonic,
            operands: vec![dst, src],
        }
    }

    /// Address of the byte immediately after this instruction.
    #[must_use]
    pub fn end_address(&self) -> VirtualAddress {
        self.address + u64::from(self.size)
    }

    /// First operand, if present.
    #[must_use]
    pub fn op0(&self) -> Option<&Operand> {
        self.operands.first()
    }

    /// Second operand, if present.
    #[must_use]
    pub fn op1(&self) -> Option<&Operand> {
        self.operands.get(1)
    }

    /// The literal control-flow target of a branch or call, if it has one.
    ///
    /// Register-indirect and memory-indirect transfers return `None`; resolving
    /// those needs symbolic state and is the lifter's job.
    #[must_use]
    pub fn branch_target(&self) -> Option<VirtualAddress> {
        if !(self.mnemonic.is_call()
            || self.mnemonic.is_unconditional_jump()
            || self.mnemonic.is_conditional_branch())
        {
            return None;
        }
        match self.op0() {
            Some(Operand::Constant(a)) => Some(*a),
            Some(Operand::Immediate(v)) => Some(*v as VirtualAddress),
            _ => None,
        }
    }

    /// Returns true for the `xor r, r` register-clear idiom (and the ARM64
    /// `mov xN, xzr` equivalent after adapter normalization).
    #[must_use]
    pub fn is_register_clear(&self) -> bool {
        match (self.mnemonic, self.op0(), self.op1()) {
            (Mnemonic::Xor, Some(Operand::Register(a)), Some(Operand::Register(b))) => {
                a.normalize() == b.normalize()
            }
            (Mnemonic::Mov, Some(Operand::Register(_)), Some(Operand::Register(src))) => {
                src.is_zero_register()
            }
            _ => false,
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} {}", self.address, self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}
