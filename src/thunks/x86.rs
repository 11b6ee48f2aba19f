//! Thunk scanning for x86 and x86-64.
//!
//! x86 compilers separate functions with filler bytes (`int3`/`nop`), which
//! gives a second source of whole-body evidence besides a preceding return or
//! unconditional jump. `call` and `jmp` are distinct mnemonics with distinct
//! roles here: a thunk body is a `jmp`, while `call` only matters when the
//! caller explicitly prefers it.

use log::{trace, warn};

use crate::binary::{BinaryContext, CodeRegion};
use crate::instruction::{DecodedInstruction, Mnemonic, VirtualAddress};
use crate::thunks::ThunkScanner;

/// Forward probe window for a single thunk body.
const PROBE_WINDOW_BYTES: usize = 50;

/// Inter-function filler bytes emitted by x86 toolchains.
const PADDING_BYTES: [u8; 2] = [0xcc, 0x90];

/// Thunk scanner over a pre-decoded x86/x86-64 text region.
pub struct X86ThunkScanner<'a> {
    ctx: &'a BinaryContext<'a>,
    region: CodeRegion,
    /// Whole-region linear decode, ascending by address.
    instructions: Vec<DecodedInstruction>,
}

impl<'a> X86ThunkScanner<'a> {
    /// Decodes the text region up front for random-access scanning.
    ///
    /// A failed region decode leaves the scan list empty; forward probes still
    /// work through the decoder directly.
    #[must_use]
    pub fn new(ctx: &'a BinaryContext<'a>) -> Self {
        let region = ctx.oracle.code_region();
        let instructions = match ctx.decoder.decode_range(region.start, region.len()) {
            Ok(instructions) => instructions,
            Err(err) => {
                warn!("x86 text region decode failed, thunk scanning degraded: {err}");
                Vec::new()
            }
        };
        X86ThunkScanner {
            ctx,
            region,
            instructions,
        }
    }

    /// True when the branch at `instructions[index]` is the entire body of its
    /// containing function.
    ///
    /// Evidence, in order of cheapness: the byte immediately before it is
    /// inter-function padding, or the previous decoded instruction within the
    /// backtrack window is itself a return or unconditional jump.
    fn is_whole_body(&self, index: usize, max_backtrack: usize) -> bool {
        let address = self.instructions[index].address;

        if address == self.region.start {
            return true;
        }
        if let Some(bytes) = self.ctx.oracle.read(address.wrapping_sub(1), 1) {
            if bytes.first().is_some_and(|b| PADDING_BYTES.contains(b)) {
                return true;
            }
        }
        if index > 0 {
            let prev = &self.instructions[index - 1];
            let distance = address.saturating_sub(prev.address) as usize;
            if distance <= max_backtrack
                && (prev.mnemonic.is_return() || prev.mnemonic.is_unconditional_jump())
            {
                return true;
            }
        }
        false
    }
}

impl ThunkScanner for X86ThunkScanner<'_> {
    fn find_thunked_function(
        &self,
        address: VirtualAddress,
        prefer_call: bool,
    ) -> Option<VirtualAddress> {
        let body = self
            .ctx
            .decoder
            .decode_range(address, PROBE_WINDOW_BYTES)
            .ok()?;

        let mut first_jump = None;
        for insn in &body {
            match insn.mnemonic {
                Mnemonic::Call if prefer_call => {
                    return insn.branch_target();
                }
                Mnemonic::Jmp => {
                    if !prefer_call {
                        return insn.branch_target();
                    }
                    // A tail jump still counts when no call shows up.
                    if first_jump.is_none() {
                        first_jump = insn.branch_target();
                    }
                }
                Mnemonic::Ret => break,
                _ => {}
            }
        }
        first_jump
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
                trace!(
                    "thunk candidate {:#x} -> {:#x}",
                    insn.address,
                    target
                );
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
