//! Symbolic machine state for one method analysis.
//!
//! The lifter does not execute anything; it tracks what each register
//! *represents*: a display name (parameter, local, literal), a managed type,
//! and, where statically known, a constant value. The state also carries the
//! pending comparison consumed by the next conditional branch and the set of
//! registers identified as loop counters by the pre-pass.
//!
//! All keys are normalized registers ([`Register::normalize`]); the state is
//! private to one method analysis and never escapes it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::instruction::Register;
use crate::metadata::{FieldRef, GlobalIdentifier, MethodRef, TypeRef};

/// A value a register is statically known to hold.
#[derive(Debug, Clone)]
pub enum ConstantValue {
    /// Known integer
    Integer(i64),
    /// Known float
    Float(f64),
    /// Known boolean
    Boolean(bool),
    /// Named reference embedded in the binary (type/method/field pointer)
    Global(Arc<GlobalIdentifier>),
    /// The static-fields block of the class named by the identifier
    StaticsBlock(Arc<GlobalIdentifier>),
    /// Resolved method reference (seeded by native-call resolution)
    Method(Arc<MethodRef>),
    /// Resolved field reference
    Field(Arc<FieldRef>),
    /// In-binary string literal
    Literal(String),
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Integer(v) => write!(f, "{v}"),
            ConstantValue::Float(v) => write!(f, "{v}"),
            ConstantValue::Boolean(v) => write!(f, "{v}"),
            ConstantValue::Global(g) => write!(f, "{}", g.name),
            ConstantValue::StaticsBlock(g) => write!(f, "statics of {}", g.name),
            ConstantValue::Method(m) => write!(f, "{}", m.full_name()),
            ConstantValue::Field(field) => write!(f, "{field}"),
            ConstantValue::Literal(s) => write!(f, "\"{s}\""),
        }
    }
}

/// One side of a captured comparison.
#[derive(Debug, Clone)]
pub struct ComparisonOperand {
    /// Resolved display name
    pub display: String,
    /// Resolved type, when known
    pub ty: Option<Arc<TypeRef>>,
}

/// The last comparison, consumed by the next conditional branch.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Left operand
    pub left: ComparisonOperand,
    /// Right operand
    pub right: ComparisonOperand,
}

impl Comparison {
    /// True for self-comparisons (`test r, r`) and comparisons against a
    /// literal zero, which get boolean null/zero phrasing.
    #[must_use]
    pub fn is_zero_test(&self) -> bool {
        self.left.display == self.right.display || self.right.display == "0"
    }
}

/// What a reconstructed block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Forward branch over a span of instructions
    If,
    /// Backward branch forming a loop
    Loop,
}

/// One open block scope.
///
/// Pushed when a forward branch is classified, decremented once per
/// instruction, popped at zero. An explicit stack instead of bare counters so
/// nesting is a testable data structure.
#[derive(Debug, Clone, Copy)]
pub struct IndentFrame {
    /// Instructions left inside the block, counting from the branch
    pub remaining: usize,
    /// Block classification
    pub kind: BlockKind,
}

/// Per-method mutable model of what each register currently represents.
#[derive(Debug, Default)]
pub struct MachineState {
    aliases: HashMap<Register, String>,
    types: HashMap<Register, Arc<TypeRef>>,
    constants: HashMap<Register, ConstantValue>,
    last_comparison: Option<Comparison>,
    loop_counters: HashSet<Register>,
}

impl MachineState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        MachineState::default()
    }

    /// Display name bound to a register.
    #[must_use]
    pub fn alias(&self, reg: Register) -> Option<&str> {
        self.aliases.get(&reg.normalize()).map(String::as_str)
    }

    /// Binds a display name to a register.
    pub fn set_alias(&mut self, reg: Register, alias: &str) {
        self.aliases.insert(reg.normalize(), alias.to_string());
    }

    /// Type bound to a register.
    #[must_use]
    pub fn type_of(&self, reg: Register) -> Option<Arc<TypeRef>> {
        self.types.get(&reg.normalize()).cloned()
    }

    /// Binds a type to a register.
    pub fn set_type(&mut self, reg: Register, ty: Arc<TypeRef>) {
        self.types.insert(reg.normalize(), ty);
    }

    /// Constant value a register is known to hold.
    #[must_use]
    pub fn constant(&self, reg: Register) -> Option<&ConstantValue> {
        self.constants.get(&reg.normalize())
    }

    /// Binds a constant value to a register.
    pub fn set_constant(&mut self, reg: Register, value: ConstantValue) {
        self.constants.insert(reg.normalize(), value);
    }

    /// Forgets only the constant value of a register, keeping alias and type.
    pub fn clear_constant(&mut self, reg: Register) {
        self.constants.remove(&reg.normalize());
    }

    /// Forgets everything about a register.
    pub fn clear_register(&mut self, reg: Register) {
        let reg = reg.normalize();
        self.aliases.remove(&reg);
        self.types.remove(&reg);
        self.constants.remove(&reg);
    }

    /// Propagates alias, type, and constant from `src` to `dst`.
    pub fn copy_register(&mut self, dst: Register, src: Register) {
        let (dst, src) = (dst.normalize(), src.normalize());
        if dst == src {
            return;
        }
        match self.aliases.get(&src).cloned() {
            Some(alias) => self.aliases.insert(dst, alias),
            None => self.aliases.remove(&dst),
        };
        match self.types.get(&src).cloned() {
            Some(ty) => self.types.insert(dst, ty),
            None => self.types.remove(&dst),
        };
        match self.constants.get(&src).cloned() {
            Some(value) => self.constants.insert(dst, value),
            None => self.constants.remove(&dst),
        };
    }

    /// Applies the register-clear idiom.
    ///
    /// Loop counters keep their alias and type across re-zeroing; anything
    /// else loses its alias and becomes a plain zero of the matching
    /// primitive type.
    pub fn zero_register(&mut self, reg: Register, float: bool) {
        let reg = reg.normalize();
        if float {
            self.constants.insert(reg, ConstantValue::Float(0.0));
        } else {
            self.constants.insert(reg, ConstantValue::Integer(0));
        }
        if !self.loop_counters.contains(&reg) {
            self.aliases.remove(&reg);
            let primitive = if float { "Single" } else { "Int32" };
            self.types.insert(reg, TypeRef::primitive(primitive));
        }
    }

    /// Flags a register as a loop counter.
    pub fn mark_loop_counter(&mut self, reg: Register) {
        self.loop_counters.insert(reg.normalize());
    }

    /// True when a register was identified as a loop counter.
    #[must_use]
    pub fn is_loop_counter(&self, reg: Register) -> bool {
        self.loop_counters.contains(&reg.normalize())
    }

    /// Captures a comparison for the next conditional branch.
    pub fn set_comparison(&mut self, comparison: Comparison) {
        self.last_comparison = Some(comparison);
    }

    /// Consumes the pending comparison.
    pub fn take_comparison(&mut self) -> Option<Comparison> {
        self.last_comparison.take()
    }
}
