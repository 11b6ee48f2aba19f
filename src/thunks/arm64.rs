//! Thunk scanning for ARM64.
//!
//! ARM64 toolchains emit no inter-function filler, so the only whole-body
//! evidence is the previous instruction being a return or unconditional
//! branch. In exchange, the fixed 4-byte encoding makes it practical to
//! decode the entire candidate region up front and treat it as a random-access
//! array.
//!
//! Two region trims run before anything is resolved, both purely as search
//! space reductions: everything before the last attribute-generator function
//! is discarded (those always precede the material of interest), and when
//! compiled managed methods are interleaved into the region, the scan start is
//! advanced to the lower of the first exported runtime function and the last
//! managed method start. Trims are clamped so they can never move past a seed
//! export.

use log::{debug, trace, warn};

use crate::binary::BinaryContext;
use crate::instruction::{DecodedInstruction, Mnemonic, VirtualAddress};
use crate::keyfunctions::RUNTIME_EXPORTS;
use crate::thunks::ThunkScanner;

/// Forward probe window for a single thunk body, in instructions.
const PROBE_WINDOW_INSNS: usize = 12;

/// ARM64 instruction width.
const INSN_BYTES: usize = 4;

/// Thunk scanner over a pre-decoded ARM64 text region.
pub struct Arm64ThunkScanner<'a> {
    ctx: &'a BinaryContext<'a>,
    /// Trimmed-region linear decode, ascending by address.
    instructions: Vec<DecodedInstruction>,
}

impl<'a> Arm64ThunkScanner<'a> {
    /// Trims the candidate region and decodes the remainder up front.
    #[must_use]
    pub fn new(ctx: &'a BinaryContext<'a>) -> Self {
        let region = ctx.oracle.code_region();
        let mut scan_start = region.start;

        // Attribute generators always come first in the region.
        if let Some(last_generator) = ctx
            .metadata
            .attribute_generators()
            .into_iter()
            .filter(|a| region.contains(*a))
            .max()
        {
            scan_start = scan_start.max(last_generator);
            debug!("arm64 scan trimmed to last attribute generator {scan_start:#x}");
        }

        // Managed methods interleaved past that point mean most of the rest of
        // the region is compiled user code; skip as much of it as is safe.
        let method_starts: Vec<VirtualAddress> = ctx
            .metadata
            .managed_method_starts()
            .into_iter()
            .filter(|a| region.contains(*a))
            .collect();
        if method_starts.iter().any(|m| *m > scan_start) {
            let lowest_export = RUNTIME_EXPORTS
                .iter()
                .filter_map(|name| ctx.oracle.export(name))
                .min();
            let last_method = method_starts.iter().copied().max();
            let trim = match (lowest_export, last_method) {
                (Some(export), Some(method)) => Some(export.min(method)),
                (Some(export), None) => Some(export),
                (None, Some(method)) => Some(method),
                (None, None) => None,
            };
            if let Some(trim) = trim {
                // Clamp: never past a seed export.
                let trim = lowest_export.map_or(trim, |export| trim.min(export));
                if trim > scan_start {
                    scan_start = trim;
                    debug!("arm64 scan trimmed past interleaved managed methods to {scan_start:#x}");
                }
            }
        }

        let len = (region.end.saturating_sub(scan_start)) as usize;
        let instructions = match ctx.decoder.decode_range(scan_start, len) {
            Ok(instructions) => instructions,
            Err(err) => {
                warn!("arm64 text region decode failed, thunk scanning degraded: {err}");
                Vec::new()
            }
        };
        Arm64ThunkScanner { ctx, instructions }
    }

    /// True when the branch at `instructions[index]` is the entire body of its
    /// containing function: the previous instruction within the backtrack
    /// window ends another function.
    fn is_whole_body(&self, index: usize, max_backtrack: usize) -> bool {
        if index == 0 {
            return true;
        }
        let prev = &self.instructions[index - 1];
        let distance =
            self.instructions[index].address.saturating_sub(prev.address) as usize;
        distance <= max_backtrack.max(INSN_BYTES)
            && (prev.mnemonic.is_return() || prev.mnemonic.is_unconditional_jump())
    }
}

impl ThunkScanner for Arm64ThunkScanner<'_> {
    fn find_thunked_function(
        &self,
        address: VirtualAddress,
        prefer_call: bool,
    ) -> Option<VirtualAddress> {
        let body = self
            .ctx
            .decoder
            .decode_range(address, PROBE_WINDOW_INSNS * INSN_BYTES)
            .ok()?;

        let mut first_branch = None;
        for insn in body.iter().take(PROBE_WINDOW_INSNS) {
            match insn.mnemonic {
                Mnemonic::Call if prefer_call => {
                    return insn.branch_target();
                }
                Mnemonic::Jmp => {
                    if !prefer_call {
                        return insn.branch_target();
                    }
                    if first_branch.is_none() {
                        first_branch = insn.branch_target();
                    }
                }
                Mnemonic::Ret => break,
                _ => {}
            }
        }
        first_branch
    }

    fn find_all_thunks(
        &self,
        target: VirtualAddress,
        max_backtrack: usize,
        ignore: &[VirtualAddress],
    ) -> Vec<VirtualAddress> {
        let mut candidates = Vec::new();
        for (index, insn) in self.instructions.iter().enumerate() {
            if !matches!(insn.mnemonic, Mnemonic::Jmp | Mnemonic::Call) {
                continue;
            }
            if insn.branch_target() != Some(target) || ignore.contains(&insn.address) {
                continue;
            }
            if self.is_whole_body(index, max_backtrack) {
                trace!("thunk candidate {:#x} -> {:#x}", insn.address, target);
                candidates.push(insn.address);
            }
        }
        candidates
    }

    fn caller_count(&self, address: VirtualAddress) -> usize {
        self.instructions
            .iter()
            .filter(|insn| {
                matches!(insn.mnemonic, Mnemonic::Jmp | Mnemonic::Call)
                    && insn.branch_target() == Some(address)
            })
            .count()
    }
}
