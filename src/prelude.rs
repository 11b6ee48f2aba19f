//! # aotscope Prelude
//!
//! Convenient re-exports of the most commonly used types. Importing this
//! module is enough to wire up the collaborators, resolve the key-function
//! table, and lift methods.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all aotscope operations
pub use crate::Error;

/// The result type used throughout aotscope
pub use crate::Result;

// ================================================================================================
// Collaborator Seams
// ================================================================================================

/// Image access, decoding, and the per-binary collaborator bundle
pub use crate::binary::{BinaryContext, BinaryOracle, CodeRegion, InstructionDecoder};

// ================================================================================================
// Instruction Model
// ================================================================================================

/// The normalized decoded-instruction representation
pub use crate::instruction::{
    Architecture, Condition, DecodedInstruction, Memory, MemoryBase, Mnemonic, Operand, Register,
    VirtualAddress,
};

// ================================================================================================
// Managed Model
// ================================================================================================

/// Managed type/method/field handles and lookup seams
pub use crate::metadata::{
    CallingConvention, FieldRef, GlobalIdTable, GlobalIdentifier, GlobalKind, MetadataResolver,
    MethodAttributes, MethodContext, MethodRef, NativeCallCache, Parameter, StructLayout, TypeRef,
};

// ================================================================================================
// Resolution and Lifting
// ================================================================================================

/// Key-function resolution
pub use crate::keyfunctions::{resolve_key_functions, KeyFunction, KeyFunctionTable};

/// Thunk-walking primitives
pub use crate::thunks::{scanner_for, ThunkScanner};

/// The per-method semantic lifter
pub use crate::lifter::{analyze_method, analyze_methods, output::AnalysisOutput};
