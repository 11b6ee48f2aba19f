//! Analysis output accumulation.
//!
//! Two synchronized renderings grow as the lifter walks a method: a synopsis
//! interleaving each raw instruction with the semantic actions recognized at
//! it, and an indented pseudocode listing of just the recovered semantics.
//! Both are plain strings; rendering decisions stay here so the lifter only
//! ever states *what* happened.

use crate::instruction::DecodedInstruction;

/// Pseudocode indent unit.
const INDENT: &str = "    ";

/// Accumulated synopsis and pseudocode for one method.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalysisOutput {
    synopsis: String,
    pseudocode: String,
}

impl AnalysisOutput {
    /// Creates an empty output.
    #[must_use]
    pub fn new() -> Self {
        AnalysisOutput::default()
    }

    /// Appends a free-standing synopsis line, outside any instruction.
    pub fn note(&mut self, text: &str) {
        self.synopsis.push_str(text);
        self.synopsis.push('\n');
    }

    /// Appends the raw rendering of the instruction about to be interpreted.
    pub fn begin_instruction(&mut self, instruction: &DecodedInstruction) {
        self.synopsis.push_str(&instruction.to_string());
        self.synopsis.push('\n');
    }

    /// Appends a semantic action under the current instruction.
    pub fn action(&mut self, text: &str) {
        self.synopsis.push_str(INDENT);
        self.synopsis.push_str("; ");
        self.synopsis.push_str(text);
        self.synopsis.push('\n');
    }

    /// Appends a non-fatal interpretation gap under the current instruction.
    pub fn warning(&mut self, text: &str) {
        self.synopsis.push_str(INDENT);
        self.synopsis.push_str("; WARNING: ");
        self.synopsis.push_str(text);
        self.synopsis.push('\n');
    }

    /// Appends one pseudocode line at the given block depth.
    pub fn pseudo(&mut self, depth: usize, line: &str) {
        for _ in 0..depth {
            self.pseudocode.push_str(INDENT);
        }
        self.pseudocode.push_str(line);
        self.pseudocode.push('\n');
    }

    /// The instruction-by-instruction synopsis.
    #[must_use]
    pub fn synopsis(&self) -> &str {
        &self.synopsis
    }

    /// The indented pseudocode listing.
    #[must_use]
    pub fn pseudocode(&self) -> &str {
        &self.pseudocode
    }
}
