//! Key function resolution.
//!
//! A fixed catalogue of runtime-support routines (allocation, boxing,
//! exception raising, class init, native-call resolution) must be known by
//! address before any method can be lifted: every call a compiled managed
//! method makes is either one of these or a real user/library call, and the
//! lifter tells them apart purely by address.
//!
//! Only a handful of these routines are exported. The rest are reached from
//! the exports by walking trampoline layers with the
//! [`ThunkScanner`](crate::thunks::ThunkScanner) primitives, in a fixed
//! dependency order: exports first, their internal implementations next, and
//! finally the codegen-facing wrappers found by scanning for thunks *of* the
//! internal implementations. One routine (metadata initialization) has no
//! export at all and is anchored on a managed method that is always compiled
//! in: the base exception type's message property getter.

use log::{debug, info, trace};
use strum::Display;

use crate::binary::BinaryContext;
use crate::instruction::VirtualAddress;
use crate::thunks::{self, ThunkScanner};

/// Exported runtime API names used to seed resolution.
///
/// Missing exports are not fatal; they leave their dependent slots unresolved.
pub(crate) const RUNTIME_EXPORTS: [&str; 8] = [
    "il2cpp_object_new",
    "il2cpp_string_new",
    "il2cpp_value_box",
    "il2cpp_raise_exception",
    "il2cpp_runtime_class_init",
    "il2cpp_array_new_specific",
    "il2cpp_type_get_object",
    "il2cpp_resolve_icall",
];

/// Backtrack window handed to [`ThunkScanner::find_all_thunks`].
const THUNK_BACKTRACK_BYTES: usize = 0x10;

/// One slot of the [`KeyFunctionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum KeyFunction {
    /// Exported object allocator
    ObjectNew,
    /// Internal VM object allocator the export wraps
    VmObjectNew,
    /// Codegen-facing object allocation wrapper called from user code
    CodegenObjectNew,
    /// Type-object retrieval
    TypeGetObject,
    /// Internal-call (native method) resolution
    ResolveInternalCall,
    /// String construction
    StringNew,
    /// Value boxing
    ValueBox,
    /// Exception raising
    RaiseException,
    /// Exported class initializer
    ClassInitExport,
    /// Internal class initializer the export wraps
    ClassInitActual,
    /// Typed array allocation
    ArrayNewSpecific,
    /// Single-dimension zero-based array allocation
    SzArrayNew,
    /// Per-method metadata initialization (no export exists)
    InitMethodMetadata,
}

/// Addresses of the recognized runtime-support routines.
///
/// A fixed-shape record, not a dynamic map: each slot is either a valid
/// address or the zero sentinel for "unresolved". Constructed once per loaded
/// binary by [`resolve_key_functions`], immutable afterwards, and shared
/// read-only by every method analysis. An unresolved slot makes the lifter
/// fall back to "unknown call target" rather than mis-attributing a call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyFunctionTable {
    /// Exported object allocator
    pub object_new: VirtualAddress,
    /// Internal VM object allocator
    pub vm_object_new: VirtualAddress,
    /// Codegen-facing object allocation wrapper
    pub codegen_object_new: VirtualAddress,
    /// Type-object retrieval
    pub type_get_object: VirtualAddress,
    /// Internal-call resolution
    pub resolve_internal_call: VirtualAddress,
    /// String construction
    pub string_new: VirtualAddress,
    /// Value boxing
    pub value_box: VirtualAddress,
    /// Exception raising
    pub raise_exception: VirtualAddress,
    /// Exported class initializer
    pub class_init_export: VirtualAddress,
    /// Internal class initializer
    pub class_init_actual: VirtualAddress,
    /// Typed array allocation
    pub array_new_specific: VirtualAddress,
    /// Single-dimension zero-based array allocation
    pub szarray_new: VirtualAddress,
    /// Per-method metadata initialization
    pub init_method_metadata: VirtualAddress,
}

impl KeyFunctionTable {
    /// Address of a slot.
    #[must_use]
    pub fn get(&self, slot: KeyFunction) -> VirtualAddress {
        match slot {
            KeyFunction::ObjectNew => self.object_new,
            KeyFunction::VmObjectNew => self.vm_object_new,
            KeyFunction::CodegenObjectNew => self.codegen_object_new,
            KeyFunction::TypeGetObject => self.type_get_object,
            KeyFunction::ResolveInternalCall => self.resolve_internal_call,
            KeyFunction::StringNew => self.string_new,
            KeyFunction::ValueBox => self.value_box,
            KeyFunction::RaiseException => self.raise_exception,
            KeyFunction::ClassInitExport => self.class_init_export,
            KeyFunction::ClassInitActual => self.class_init_actual,
            KeyFunction::ArrayNewSpecific => self.array_new_specific,
            KeyFunction::SzArrayNew => self.szarray_new,
            KeyFunction::InitMethodMetadata => self.init_method_metadata,
        }
    }

    /// Matches a call target against the table.
    ///
    /// The zero sentinel never matches: an unresolved slot cannot claim a call.
    #[must_use]
    pub fn classify(&self, address: VirtualAddress) -> Option<KeyFunction> {
        if address == 0 {
            return None;
        }
        const SLOTS: [KeyFunction; 13] = [
            KeyFunction::CodegenObjectNew,
            KeyFunction::VmObjectNew,
            KeyFunction::ObjectNew,
            KeyFunction::TypeGetObject,
            KeyFunction::ResolveInternalCall,
            KeyFunction::StringNew,
            KeyFunction::ValueBox,
            KeyFunction::RaiseException,
            KeyFunction::ClassInitExport,
            KeyFunction::ClassInitActual,
            KeyFunction::ArrayNewSpecific,
            KeyFunction::SzArrayNew,
            KeyFunction::InitMethodMetadata,
        ];
        SLOTS.into_iter().find(|slot| self.get(*slot) == address)
    }

    /// Number of resolved slots.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        const ALL: [KeyFunction; 13] = [
            KeyFunction::ObjectNew,
            KeyFunction::VmObjectNew,
            KeyFunction::CodegenObjectNew,
            KeyFunction::TypeGetObject,
            KeyFunction::ResolveInternalCall,
            KeyFunction::StringNew,
            KeyFunction::ValueBox,
            KeyFunction::RaiseException,
            KeyFunction::ClassInitExport,
            KeyFunction::ClassInitActual,
            KeyFunction::ArrayNewSpecific,
            KeyFunction::SzArrayNew,
            KeyFunction::InitMethodMetadata,
        ];
        ALL.into_iter().filter(|slot| self.get(*slot) != 0).count()
    }
}

/// Resolves the key-function table for a loaded binary.
///
/// Runs once, single-threaded, before any method analysis. Individual slots
/// that cannot be resolved stay at zero; an unsupported instruction set skips
/// resolution entirely and yields the all-zero table.
#[must_use]
pub fn resolve_key_functions(ctx: &BinaryContext<'_>) -> KeyFunctionTable {
    let Some(scanner) = thunks::scanner_for(ctx) else {
        return KeyFunctionTable::default();
    };
    resolve_with_scanner(ctx, scanner.as_ref())
}

/// Shared orchestration over an already-constructed scanner.
pub(crate) fn resolve_with_scanner(
    ctx: &BinaryContext<'_>,
    scanner: &dyn ThunkScanner,
) -> KeyFunctionTable {
    let mut table = KeyFunctionTable::default();

    // Seed from exports. Order matters below: derived slots depend on these.
    table.object_new = seed_export(ctx, "il2cpp_object_new");
    table.string_new = seed_export(ctx, "il2cpp_string_new");
    table.value_box = seed_export(ctx, "il2cpp_value_box");
    table.raise_exception = seed_export(ctx, "il2cpp_raise_exception");
    table.class_init_export = seed_export(ctx, "il2cpp_runtime_class_init");
    table.array_new_specific = seed_export(ctx, "il2cpp_array_new_specific");
    table.type_get_object = seed_export(ctx, "il2cpp_type_get_object");
    table.resolve_internal_call = seed_export(ctx, "il2cpp_resolve_icall");

    // One forward hop from each export to the internal implementation it wraps.
    table.vm_object_new = hop(scanner, table.object_new, false);
    table.class_init_actual = hop(scanner, table.class_init_export, false);
    table.string_new = hop_or_keep(scanner, table.string_new);
    table.value_box = hop_or_keep(scanner, table.value_box);
    table.raise_exception = hop_or_keep(scanner, table.raise_exception);
    let array_export = table.array_new_specific;
    table.array_new_specific = hop_or_keep(scanner, array_export);
    table.type_get_object = hop_or_keep(scanner, table.type_get_object);
    table.resolve_internal_call = hop_or_keep(scanner, table.resolve_internal_call);

    // The wrapper user code actually calls is a thunk *of* the internal
    // allocator; several may exist, the most-referenced one wins.
    if table.vm_object_new != 0 {
        let candidates = scanner.find_all_thunks(
            table.vm_object_new,
            THUNK_BACKTRACK_BYTES,
            &[table.object_new],
        );
        table.codegen_object_new = pick_most_called(scanner, &candidates);
        trace!(
            "codegen object allocator {:#x} ({} candidates)",
            table.codegen_object_new,
            candidates.len()
        );
    }

    // Same reverse chase for the single-dimension array allocator.
    if table.array_new_specific != 0 {
        let candidates = scanner.find_all_thunks(
            table.array_new_specific,
            THUNK_BACKTRACK_BYTES,
            &[array_export],
        );
        table.szarray_new = pick_most_called(scanner, &candidates);
        trace!(
            "szarray allocator {:#x} ({} candidates)",
            table.szarray_new,
            candidates.len()
        );
    }

    // Metadata initialization has no export. Anchor on the exception message
    // getter, which is always compiled in, and take its first call target.
    if let Some(getter) = ctx.metadata.exception_message_getter() {
        match ctx.decoder.decode_function(getter) {
            Ok(body) => {
                table.init_method_metadata = body
                    .iter()
                    .find(|insn| insn.mnemonic.is_call())
                    .and_then(|insn| insn.branch_target())
                    .unwrap_or(0);
                trace!(
                    "metadata initializer {:#x} via getter {getter:#x}",
                    table.init_method_metadata
                );
            }
            Err(err) => debug!("exception getter body decode failed: {err}"),
        }
    }

    info!(
        "key function resolution complete: {}/13 slots",
        table.resolved_count()
    );
    table
}

/// Export lookup with anchor-level logging.
fn seed_export(ctx: &BinaryContext<'_>, name: &str) -> VirtualAddress {
    match ctx.oracle.export(name) {
        Some(address) => {
            info!("export {name} at {address:#x}");
            address
        }
        None => {
            debug!("export {name} not present");
            0
        }
    }
}

/// One forward thunk hop, zero stays zero.
fn hop(scanner: &dyn ThunkScanner, address: VirtualAddress, prefer_call: bool) -> VirtualAddress {
    if address == 0 {
        return 0;
    }
    scanner
        .find_thunked_function(address, prefer_call)
        .unwrap_or(0)
}

/// One forward thunk hop, keeping the export address when no thunk is found.
fn hop_or_keep(scanner: &dyn ThunkScanner, address: VirtualAddress) -> VirtualAddress {
    match hop(scanner, address, false) {
        0 => address,
        hopped => hopped,
    }
}

/// Picks the most-referenced candidate; exact ties keep the first in address
/// order (candidates arrive ascending). An accepted ambiguity, not a proof.
fn pick_most_called(scanner: &dyn ThunkScanner, candidates: &[VirtualAddress]) -> VirtualAddress {
    let mut best = 0;
    let mut best_count = 0;
    for &candidate in candidates {
        let count = scanner.caller_count(candidate);
        if count > best_count || best == 0 {
            best = candidate;
            best_count = count;
        }
    }
    best
}
