//! Collaborator traits for reading the analyzed binary.
//!
//! Container parsing lives outside this crate. The resolver and lifter consume the
//! binary exclusively through two seams: a [`BinaryOracle`] for address translation,
//! raw reads, exports and section bounds, and an [`InstructionDecoder`] that yields
//! [`DecodedInstruction`](crate::instruction::DecodedInstruction) streams. Both are
//! `Send + Sync` so method analyses can run in parallel over shared references.

use crate::instruction::{Architecture, DecodedInstruction, VirtualAddress};
use crate::metadata::{GlobalIdTable, MetadataResolver, NativeCallCache};
use crate::Result;

/// Bounds of the executable text region, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRegion {
    /// First address of the region
    pub start: VirtualAddress,
    /// One past the last address of the region
    pub end: VirtualAddress,
}

impl CodeRegion {
    /// Byte length of the region.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.end.saturating_sub(self.start)) as usize
    }

    /// Returns true for an empty region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true when an address lies inside the region.
    #[must_use]
    pub fn contains(&self, address: VirtualAddress) -> bool {
        address >= self.start && address < self.end
    }
}

/// Low-level view of the binary image.
///
/// Implemented by the container-parsing collaborator. All reads are bounded and
/// fallible; `None` from any lookup degrades the analysis rather than aborting it.
pub trait BinaryOracle: Send + Sync {
    /// Pointer width of the target in bytes (4 or 8).
    fn pointer_size(&self) -> u8;

    /// Maps a virtual address to its raw file offset.
    fn virtual_to_raw(&self, address: VirtualAddress) -> Option<u64>;

    /// Reads up to `len` bytes at a virtual address. Returns `None` when the
    /// address is unmapped; short reads at a section boundary are permitted.
    fn read(&self, address: VirtualAddress, len: usize) -> Option<Vec<u8>>;

    /// Resolves an exported symbol to its address.
    fn export(&self, name: &str) -> Option<VirtualAddress>;

    /// Bounds of the executable text region.
    fn code_region(&self) -> CodeRegion;
}

/// Decoded instruction stream provider, one per instruction set.
pub trait InstructionDecoder: Send + Sync {
    /// Instruction set this decoder produces.
    fn architecture(&self) -> Architecture;

    /// Decodes the range `[start, start + len)`. Trailing bytes that do not
    /// form a whole instruction are dropped; bytes that decode to nothing the
    /// model covers come back as [`Mnemonic::Unsupported`] entries.
    ///
    /// [`Mnemonic::Unsupported`]: crate::instruction::Mnemonic::Unsupported
    ///
    /// # Errors
    /// Returns [`Error::Decode`](crate::Error::Decode) when the range is
    /// unmapped or decoding cannot make progress at its start.
    fn decode_range(&self, start: VirtualAddress, len: usize) -> Result<Vec<DecodedInstruction>>;

    /// Decodes from `start` until a recognizable function terminator.
    ///
    /// # Errors
    /// Returns [`Error::Decode`](crate::Error::Decode) when the start is
    /// unmapped or no terminator is found within the decoder's limit.
    fn decode_function(&self, start: VirtualAddress) -> Result<Vec<DecodedInstruction>>;
}

/// Read-only bundle of collaborators for one loaded binary.
///
/// Built once per binary and passed explicitly into the resolver and every
/// lifter invocation; there is no ambient global state. The only internally
/// mutable member is the [`NativeCallCache`], which is safe for concurrent use.
pub struct BinaryContext<'a> {
    /// Address translation, raw reads, exports, section bounds
    pub oracle: &'a dyn BinaryOracle,
    /// Instruction stream provider
    pub decoder: &'a dyn InstructionDecoder,
    /// Named references embedded in the binary
    pub globals: &'a GlobalIdTable,
    /// Managed type/field/method lookups
    pub metadata: &'a dyn MetadataResolver,
    /// Native-call resolutions, lifetime tied to this binary
    pub native_calls: NativeCallCache,
}

impl<'a> BinaryContext<'a> {
    /// Bundles the collaborators for one binary.
    #[must_use]
    pub fn new(
        oracle: &'a dyn BinaryOracle,
        decoder: &'a dyn InstructionDecoder,
        globals: &'a GlobalIdTable,
        metadata: &'a dyn MetadataResolver,
    ) -> Self {
        BinaryContext {
            oracle,
            decoder,
            globals,
            metadata,
            native_calls: NativeCallCache::new(),
        }
    }

    /// Instruction set of the binary.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.decoder.architecture()
    }
}
