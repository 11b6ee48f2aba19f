//! Thunk resolution engine.
//!
//! Compiled runtime-support call sites are usually reached through one or more
//! layers of auto-generated trampolines. No symbol exists for the internal
//! routines, so locating them means walking those layers in both directions
//! using only structural evidence: forward ("what does this thunk jump to")
//! and backward ("which one-instruction functions branch to this target").
//!
//! The walking primitives are architecture-specific. They are exposed through
//! the [`ThunkScanner`] capability trait and selected once per binary from the
//! architecture tag; see [`x86::X86ThunkScanner`] and [`arm64::Arm64ThunkScanner`].

pub mod arm64;
pub mod x86;

use log::warn;

use crate::binary::BinaryContext;
use crate::instruction::{Architecture, VirtualAddress};

/// Architecture-specific thunk-walking primitives.
///
/// Implementations pre-decode the text region at construction time so the
/// whole-region scans (`find_all_thunks`, `caller_count`) are cheap repeated
/// lookups. All three operations are deterministic over the same bytes.
pub trait ThunkScanner {
    /// Returns the target of the first unconditional branch (or, with
    /// `prefer_call`, the first call) decoded forward from `address` within a
    /// bounded window. Decode errors are swallowed and reported as `None`.
    fn find_thunked_function(
        &self,
        address: VirtualAddress,
        prefer_call: bool,
    ) -> Option<VirtualAddress>;

    /// Scans the entire text region for branch/call instructions targeting
    /// `target` whose branch is the whole body of its containing function,
    /// judged by walking backward up to `max_backtrack` bytes for structural
    /// evidence. Addresses in `ignore` are skipped. Candidates come back in
    /// ascending address order, possibly empty.
    fn find_all_thunks(
        &self,
        target: VirtualAddress,
        max_backtrack: usize,
        ignore: &[VirtualAddress],
    ) -> Vec<VirtualAddress>;

    /// Number of call/branch instructions in the scanned region that target
    /// `address`. Used as a tie-break when several thunk candidates qualify.
    fn caller_count(&self, address: VirtualAddress) -> usize;
}

/// Builds the scanner for the binary's instruction set.
///
/// Returns `None` for unsupported architectures; callers must then treat the
/// whole key-function table as empty.
#[must_use]
pub fn scanner_for<'a>(ctx: &'a BinaryContext<'a>) -> Option<Box<dyn ThunkScanner + 'a>> {
    match ctx.architecture() {
        Architecture::X86 | Architecture::X86_64 => {
            Some(Box::new(x86::X86ThunkScanner::new(ctx)))
        }
        Architecture::Arm64 => Some(Box::new(arm64::Arm64ThunkScanner::new(ctx))),
        Architecture::Unknown => {
            warn!("no thunk scanner for unknown instruction set, key function resolution skipped");
            None
        }
    }
}
