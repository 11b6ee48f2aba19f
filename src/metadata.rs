//! Managed-model surface consumed by the resolver and the lifter.
//!
//! The type-model builder that turns the metadata side-table into these records is an
//! external collaborator; this module only defines the handles the lifter needs
//! ([`TypeRef`], [`FieldRef`], [`MethodRef`]), the [`MetadataResolver`] lookup trait,
//! the per-architecture calling-convention and struct-layout constants, and the
//! [`GlobalIdTable`] of named references embedded in the binary.
//!
//! All handles are `Arc`-shared: one binary's model is built once and read concurrently
//! by every method analysis.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use dashmap::DashMap;

use crate::instruction::{Architecture, Register, VirtualAddress};

/// A managed type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple type name
    pub name: String,
}

impl TypeRef {
    /// Creates a type reference from namespace and name.
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Arc<Self> {
        Arc::new(TypeRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Creates a reference to a `System` primitive (`System.Int32`, ...).
    #[must_use]
    pub fn primitive(name: &str) -> Arc<Self> {
        TypeRef::new("System", name)
    }

    /// Namespace-qualified name.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns true for the scalar floating-point primitives.
    #[must_use]
    pub fn is_float(&self) -> bool {
        self.namespace == "System" && (self.name == "Single" || self.name == "Double")
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// A declared field resolved from a struct offset.
#[derive(Debug, Clone)]
pub struct FieldRef {
    /// Field name
    pub name: String,
    /// Type declaring the field
    pub declaring_type: Arc<TypeRef>,
    /// Declared type of the field
    pub field_type: Arc<TypeRef>,
    /// Whether the field lives in the class's static block
    pub is_static: bool,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

bitflags! {
    /// Attributes of a managed method relevant to lifting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// No implicit receiver; parameter binding starts at the first slot
        const STATIC = 0x0001;
        /// Dispatched through the vtable
        const VIRTUAL = 0x0002;
        /// Property getter
        const GETTER = 0x0004;
        /// Property setter
        const SETTER = 0x0008;
        /// Instance constructor
        const CONSTRUCTOR = 0x0010;
    }
}

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Declared name
    pub name: String,
    /// Declared type
    pub ty: Arc<TypeRef>,
}

impl Parameter {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: &str, ty: Arc<TypeRef>) -> Self {
        Parameter {
            name: name.to_string(),
            ty,
        }
    }
}

/// A managed method reference.
#[derive(Debug, Clone)]
pub struct MethodRef {
    /// Method name
    pub name: String,
    /// Declaring type
    pub declaring_type: Arc<TypeRef>,
    /// Declared parameters, excluding the implicit receiver
    pub parameters: Vec<Parameter>,
    /// Return type, `None` for `void`
    pub return_type: Option<Arc<TypeRef>>,
    /// Compiled entry point, zero when unknown
    pub address: VirtualAddress,
    /// Method attributes
    pub attributes: MethodAttributes,
}

impl MethodRef {
    /// Returns true when the method has no implicit receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// `Type.Method` display form.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Kind of a named reference embedded in the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    /// Runtime class pointer for a managed type
    Type,
    /// Runtime method metadata pointer
    Method,
    /// Runtime field metadata pointer
    Field,
    /// Interned string literal
    StringLiteral,
}

/// A named type/method/field/string-literal reference at a known address.
#[derive(Debug, Clone)]
pub struct GlobalIdentifier {
    /// Address of the reference inside the binary
    pub address: VirtualAddress,
    /// What the reference points at
    pub kind: GlobalKind,
    /// Display name (type full name, `Type.Method`, or the literal text)
    pub name: String,
}

/// Address-keyed table of [`GlobalIdentifier`] entries, supplied pre-built by
/// the metadata collaborator and read concurrently during method analysis.
#[derive(Debug, Default)]
pub struct GlobalIdTable {
    entries: HashMap<VirtualAddress, Arc<GlobalIdentifier>>,
}

impl GlobalIdTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        GlobalIdTable::default()
    }

    /// Registers an identifier at its address.
    pub fn insert(&mut self, kind: GlobalKind, address: VirtualAddress, name: &str) {
        self.entries.insert(
            address,
            Arc::new(GlobalIdentifier {
                address,
                kind,
                name: name.to_string(),
            }),
        );
    }

    /// Looks up the identifier at an address.
    #[must_use]
    pub fn lookup(&self, address: VirtualAddress) -> Option<Arc<GlobalIdentifier>> {
        self.entries.get(&address).cloned()
    }

    /// Number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no identifiers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Metadata lookups the lifter and resolver depend on.
///
/// Implementations map runtime struct offsets and addresses back to declared
/// identities. All methods are fallible lookups; `None` means "not modeled",
/// which the callers surface as placeholders, never as failures.
pub trait MetadataResolver: Send + Sync {
    /// Resolves an instance field from its declaring type and byte offset
    /// within the object layout.
    fn instance_field_at(&self, ty: &TypeRef, offset: i64) -> Option<Arc<FieldRef>>;

    /// Resolves a static field from its declaring type and byte offset within
    /// the class's static-fields block.
    fn static_field_at(&self, ty: &TypeRef, offset: i64) -> Option<Arc<FieldRef>>;

    /// Resolves the managed method compiled at an address.
    fn method_at_address(&self, address: VirtualAddress) -> Option<Arc<MethodRef>>;

    /// Resolves a method from a `Namespace.Type::Method` qualified name.
    fn method_by_name(&self, qualified: &str) -> Option<Arc<MethodRef>>;

    /// Address of the base exception type's message property getter.
    ///
    /// Always compiled into these binaries; used as the fixed anchor for
    /// locating the metadata-initialization routine, which has no export.
    fn exception_message_getter(&self) -> Option<VirtualAddress>;

    /// Entry points of the compiler-generated attribute-generator functions.
    ///
    /// On ARM64 these always precede everything the resolver cares about, so
    /// the scanner discards the region before the last of them.
    fn attribute_generators(&self) -> Vec<VirtualAddress>;

    /// Entry points of all compiled managed methods, used to detect managed
    /// code interleaved into the scanned region.
    fn managed_method_starts(&self) -> Vec<VirtualAddress>;
}

/// Ordered argument registers of the platform calling convention.
///
/// Each integer slot has a floating-point alternate: a parameter of scalar
/// float type consumes the float register of its slot instead of the integer
/// one.
#[derive(Debug, Clone, Copy)]
pub struct CallingConvention {
    /// Integer/pointer argument registers in order
    pub integer: &'static [Register],
    /// Floating-point alternates, same slot order
    pub float: &'static [Register],
    /// Integer/pointer return register
    pub return_register: Register,
    /// Floating-point return register
    pub float_return: Register,
}

const X64_INTEGER_ARGS: &[Register] = &[Register::Rcx, Register::Rdx, Register::R8, Register::R9];
const X64_FLOAT_ARGS: &[Register] = &[Register::Xmm0, Register::Xmm1, Register::Xmm2, Register::Xmm3];

const X86_INTEGER_ARGS: &[Register] = &[Register::Ecx, Register::Edx];
const X86_FLOAT_ARGS: &[Register] = &[Register::Xmm0, Register::Xmm1];

const ARM64_INTEGER_ARGS: &[Register] = &[
    Register::X0,
    Register::X1,
    Register::X2,
    Register::X3,
    Register::X4,
    Register::X5,
    Register::X6,
    Register::X7,
];
const ARM64_FLOAT_ARGS: &[Register] = &[
    Register::V0,
    Register::V1,
    Register::V2,
    Register::V3,
    Register::V4,
    Register::V5,
    Register::V6,
    Register::V7,
];

impl CallingConvention {
    /// Convention for an architecture, `None` when unsupported.
    #[must_use]
    pub fn for_architecture(arch: Architecture) -> Option<&'static CallingConvention> {
        const X64: CallingConvention = CallingConvention {
            integer: X64_INTEGER_ARGS,
            float: X64_FLOAT_ARGS,
            return_register: Register::Rax,
            float_return: Register::Xmm0,
        };
        const X86: CallingConvention = CallingConvention {
            integer: X86_INTEGER_ARGS,
            float: X86_FLOAT_ARGS,
            return_register: Register::Eax,
            float_return: Register::Xmm0,
        };
        const ARM64: CallingConvention = CallingConvention {
            integer: ARM64_INTEGER_ARGS,
            float: ARM64_FLOAT_ARGS,
            return_register: Register::X0,
            float_return: Register::V0,
        };
        match arch {
            Architecture::X86_64 => Some(&X64),
            Architecture::X86 => Some(&X86),
            Architecture::Arm64 => Some(&ARM64),
            Architecture::Unknown => None,
        }
    }
}

/// Fixed runtime struct-layout constants per architecture.
///
/// Used to classify a `[base + offset]` access as an instance field (offset at
/// or past the object header) or as a hop through the class's static-fields
/// block pointer.
#[derive(Debug, Clone, Copy)]
pub struct StructLayout {
    /// Size of the object header; instance fields start here
    pub object_header_size: i64,
    /// Offset of the static-fields block pointer inside the runtime class struct
    pub class_static_fields_offset: i64,
}

impl StructLayout {
    /// Layout constants for an architecture, `None` when unsupported.
    #[must_use]
    pub fn for_architecture(arch: Architecture) -> Option<StructLayout> {
        match arch {
            Architecture::X86_64 | Architecture::Arm64 => Some(StructLayout {
                object_header_size: 0x10,
                class_static_fields_offset: 0xb8,
            }),
            Architecture::X86 => Some(StructLayout {
                object_header_size: 0x8,
                class_static_fields_offset: 0x5c,
            }),
            Architecture::Unknown => None,
        }
    }
}

/// Everything the lifter needs to know about one method under analysis.
#[derive(Debug, Clone)]
pub struct MethodContext {
    /// The method being analyzed (declared parameters, return type, static-ness)
    pub method: Arc<MethodRef>,
    /// Address of the first instruction
    pub start: VirtualAddress,
    /// Address one past the last instruction
    pub end: VirtualAddress,
}

impl MethodContext {
    /// Returns true when an address lies inside the method's bounds.
    #[must_use]
    pub fn contains(&self, address: VirtualAddress) -> bool {
        address >= self.start && address < self.end
    }
}

/// Cache of native-call resolutions, keyed by the `Type::Method(args)` name
/// string the generated code passes to the internal-call resolver.
///
/// Shared read/write across concurrent method analyses; lifetime is one binary.
#[derive(Debug, Default)]
pub struct NativeCallCache {
    entries: DashMap<String, Arc<MethodRef>>,
}

impl NativeCallCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        NativeCallCache::default()
    }

    /// Returns the cached resolution for a name, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<MethodRef>> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// Caches a resolution.
    pub fn insert(&self, name: &str, method: Arc<MethodRef>) {
        self.entries.insert(name.to_string(), method);
    }
}
