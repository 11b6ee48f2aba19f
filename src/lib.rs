// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![deny(unsafe_code)]

//! # aotscope
//!
//! Semantic lifting of ahead-of-time-compiled managed binaries. Given a
//! decoded machine-code view of a binary produced by an AOT compiler for a
//! managed runtime, `aotscope` recovers *what the original source did*: object
//! and array allocations, string construction, field reads and writes,
//! managed calls, exceptions, and reconstructed control flow, rendered as a
//! per-method synopsis and pseudocode listing.
//!
//! ## How it works
//!
//! Analysis happens in two phases:
//!
//! 1. **Key-function resolution** ([`keyfunctions`]) locates the runtime's
//!    support routines (allocators, boxing, exception raising, class init,
//!    native-call resolution) by seeding from the handful of exported entry
//!    points and walking trampoline layers with architecture-specific
//!    [`thunks`] scanners. The result is an immutable [`KeyFunctionTable`].
//! 2. **Per-method lifting** ([`lifter`]) walks each method's instructions
//!    once with a symbolic register state, classifies every call against the
//!    table, and emits the recovered semantics.
//!
//! Container parsing, instruction decoding, and the managed type model are
//! collaborators supplied through the traits in [`binary`] and [`metadata`];
//! the crate itself never touches a file format.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aotscope::prelude::*;
//!
//! let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
//! let key = resolve_key_functions(&ctx);
//! let output = analyze_method(&ctx, &instructions, &method, &key)?;
//! println!("{}", output.pseudocode());
//! # Ok::<(), aotscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - convenient re-exports of the commonly used types
//! - [`instruction`] - the normalized decoded-instruction model
//! - [`binary`] - collaborator traits for image access and decoding
//! - [`metadata`] - managed type/method/field handles and lookups
//! - [`thunks`] - per-architecture trampoline walking
//! - [`keyfunctions`] - runtime-support routine resolution
//! - [`lifter`] - the per-method semantic lifter
//! - [`Error`] and [`Result`] - error handling
//!
//! Unresolved lookups are never errors: a missing export leaves its table
//! slot at the zero sentinel, an unknown call target becomes a placeholder
//! line. Only decode faults, structural violations, and unsupported
//! instruction sets surface as [`Error`].
//!
//! [`KeyFunctionTable`]: crate::keyfunctions::KeyFunctionTable

#[macro_use]
mod error;

pub mod binary;
pub mod instruction;
pub mod keyfunctions;
pub mod lifter;
pub mod metadata;
pub mod prelude;
pub mod thunks;

pub use error::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
pub(crate) mod test;
