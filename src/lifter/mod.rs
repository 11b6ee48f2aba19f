//! Per-method semantic lifting.
//!
//! The lifter walks a method's decoded instructions exactly once, in address
//! order, carrying a [`MachineState`] of what each register currently
//! represents. Each instruction is run through a battery of independent
//! pattern checks; a recognized pattern appends a semantic action to the
//! synopsis and, where it has a source-level shape, a pseudocode line. Nothing
//! is ever executed and no dataflow is solved: an unrecognized instruction
//! falls through with its raw rendering only.
//!
//! Call targets are classified against the [`KeyFunctionTable`] first, so
//! runtime-support calls (allocation, boxing, throwing, class init) become
//! high-level statements instead of opaque calls. Everything unresolved
//! degrades to a placeholder or a `WARNING:` synopsis line; the only hard
//! failures are an empty instruction stream, an unsupported instruction set,
//! and structural violations such as an absurd array length.

pub mod output;
pub mod state;

use std::sync::Arc;

use log::{debug, trace};
use rayon::prelude::*;

use crate::binary::BinaryContext;
use crate::instruction::{
    Condition, DecodedInstruction, Memory, MemoryBase, Mnemonic, Operand, Register, VirtualAddress,
};
use crate::keyfunctions::{KeyFunction, KeyFunctionTable};
use crate::lifter::output::AnalysisOutput;
use crate::lifter::state::{
    BlockKind, Comparison, ComparisonOperand, ConstantValue, IndentFrame, MachineState,
};
use crate::metadata::{
    CallingConvention, GlobalIdentifier, GlobalKind, MethodContext, MethodRef, StructLayout,
    TypeRef,
};
use crate::{Error, Result};

/// Longest string literal read out of the binary image.
const MAX_LITERAL_BYTES: usize = 4096;

/// Largest array length accepted before the binary is considered misread.
const MAX_ARRAY_LENGTH: i64 = 0x10000;

/// Lifts one method into a synopsis and pseudocode listing.
///
/// `instructions` must be the method's full body in ascending address order,
/// as produced by the decoder. The key-function table and context are shared
/// read-only; every invocation starts from a fresh machine state, so repeated
/// analyses of the same method yield byte-identical output.
///
/// # Errors
/// Returns [`Error::Empty`] for an empty body,
/// [`Error::UnsupportedArchitecture`] when no calling convention exists for
/// the binary, and [`Error::Structural`] when a recognized pattern carries a
/// value no well-formed binary can contain.
pub fn analyze_method(
    ctx: &BinaryContext<'_>,
    instructions: &[DecodedInstruction],
    method: &MethodContext,
    key: &KeyFunctionTable,
) -> Result<AnalysisOutput> {
    if instructions.is_empty() {
        return Err(Error::Empty);
    }
    let arch = ctx.architecture();
    let convention =
        CallingConvention::for_architecture(arch).ok_or(Error::UnsupportedArchitecture(arch))?;
    let layout =
        StructLayout::for_architecture(arch).ok_or(Error::UnsupportedArchitecture(arch))?;
    debug!(
        "lifting {} ({} instructions)",
        method.method.full_name(),
        instructions.len()
    );
    Lifter {
        ctx,
        key,
        method,
        instructions,
        convention,
        layout,
        state: MachineState::new(),
        indents: Vec::new(),
        output: AnalysisOutput::new(),
        locals: 0,
    }
    .run()
}

/// Lifts a batch of methods in parallel.
///
/// Per-method failures stay per-method: the result vector is positionally
/// aligned with `jobs` and sibling analyses are unaffected by one failing.
pub fn analyze_methods(
    ctx: &BinaryContext<'_>,
    jobs: &[(Vec<DecodedInstruction>, MethodContext)],
    key: &KeyFunctionTable,
) -> Vec<Result<AnalysisOutput>> {
    jobs.par_iter()
        .map(|(instructions, method)| analyze_method(ctx, instructions, method, key))
        .collect()
}

struct Lifter<'a> {
    ctx: &'a BinaryContext<'a>,
    key: &'a KeyFunctionTable,
    method: &'a MethodContext,
    instructions: &'a [DecodedInstruction],
    convention: &'static CallingConvention,
    layout: StructLayout,
    state: MachineState,
    indents: Vec<IndentFrame>,
    output: AnalysisOutput,
    locals: usize,
}

impl Lifter<'_> {
    fn run(mut self) -> Result<AnalysisOutput> {
        self.emit_signature();
        self.bind_parameters();
        self.prescan_loop_counters();

        let instructions = self.instructions;
        for (index, insn) in instructions.iter().enumerate() {
            self.output.begin_instruction(insn);
            self.step(index, insn)?;
            self.tick_indents();
        }
        Ok(self.output)
    }

    /// Runs the pattern battery for one instruction.
    fn step(&mut self, index: usize, insn: &DecodedInstruction) -> Result<()> {
        if insn.is_register_clear() {
            self.on_register_clear(insn);
            return Ok(());
        }
        match insn.mnemonic {
            Mnemonic::Mov | Mnemonic::MovExtend => self.on_move(insn),
            Mnemonic::Lea => self.on_load_address(insn),
            Mnemonic::Cmp | Mnemonic::Test | Mnemonic::CmpFloat => self.on_comparison(insn),
            Mnemonic::Je
            | Mnemonic::Jne
            | Mnemonic::Jg
            | Mnemonic::Jge
            | Mnemonic::Jl
            | Mnemonic::Jle
            | Mnemonic::Ja
            | Mnemonic::Jae
            | Mnemonic::Jb
            | Mnemonic::Jbe
            | Mnemonic::Js
            | Mnemonic::Jns => self.on_conditional_branch(index, insn),
            Mnemonic::Call => self.on_call(insn)?,
            Mnemonic::Jmp => self.on_jump(insn)?,
            Mnemonic::Inc => self.on_step_counter(insn, "++"),
            Mnemonic::Dec => self.on_step_counter(insn, "--"),
            Mnemonic::MulFloat => self.on_float_multiply(insn),
            Mnemonic::Ret => self.on_return(),
            Mnemonic::Xor | Mnemonic::Add | Mnemonic::Sub => self.on_arithmetic(insn),
            Mnemonic::Nop | Mnemonic::Unsupported => {}
        }
        Ok(())
    }

    /// Current pseudocode block depth.
    fn depth(&self) -> usize {
        self.indents.len()
    }

    /// Advances every open block by one instruction and drops exhausted ones.
    fn tick_indents(&mut self) {
        for frame in &mut self.indents {
            frame.remaining = frame.remaining.saturating_sub(1);
        }
        self.indents.retain(|frame| frame.remaining > 0);
    }

    fn emit_signature(&mut self) {
        let method = self.method.method.clone();
        let parameters: Vec<String> = method
            .parameters
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect();
        let ret = method
            .return_type
            .as_ref()
            .map_or_else(|| "void".to_string(), ToString::to_string);
        self.output.note(&format!(
            "{ret} {}({}) at {:#x}",
            method.full_name(),
            parameters.join(", "),
            self.method.start
        ));
    }

    /// Seeds argument registers with the declared parameter names and types.
    fn bind_parameters(&mut self) {
        let method = self.method.method.clone();
        let mut slot = 0usize;
        if !method.is_static() {
            if let Some(reg) = self.argument_register(0) {
                self.state.set_alias(reg, "this");
                self.state.set_type(reg, method.declaring_type.clone());
            }
            slot = 1;
        }
        for parameter in &method.parameters {
            let bank = if parameter.ty.is_float() {
                self.convention.float
            } else {
                self.convention.integer
            };
            match bank.get(slot) {
                Some(reg) => {
                    self.state.set_alias(*reg, &parameter.name);
                    self.state.set_type(*reg, parameter.ty.clone());
                }
                None => self
                    .output
                    .note(&format!("parameter {} is passed on the stack", parameter.name)),
            }
            slot += 1;
        }
    }

    /// Names every incremented register `counter1`, `counter2`, ... before the
    /// main walk, so the zeroing that precedes a loop reads as counter reset.
    /// Registers already bound to a parameter keep their name.
    fn prescan_loop_counters(&mut self) {
        let instructions = self.instructions;
        let mut counters = 0usize;
        for insn in instructions {
            if insn.mnemonic != Mnemonic::Inc {
                continue;
            }
            let Some(reg) = insn.op0().and_then(Operand::as_register) else {
                continue;
            };
            if self.state.is_loop_counter(reg) || self.state.alias(reg).is_some() {
                continue;
            }
            counters += 1;
            let name = format!("counter{counters}");
            trace!("loop counter {name} in {}", reg.normalize());
            self.state.mark_loop_counter(reg);
            self.state.set_alias(reg, &name);
            self.state.set_type(reg, TypeRef::primitive("Int32"));
        }
    }

    fn on_register_clear(&mut self, insn: &DecodedInstruction) {
        let Some(reg) = insn.op0().and_then(Operand::as_register) else {
            return;
        };
        self.state.zero_register(reg, reg.is_float());
        if self.state.is_loop_counter(reg) {
            let name = self
                .state
                .alias(reg)
                .unwrap_or("counter")
                .to_string();
            self.output.action(&format!("Resets {name} to 0"));
            self.output.pseudo(self.depth(), &format!("{name} = 0"));
        } else {
            self.output
                .action(&format!("Sets {} to zero", reg.normalize()));
        }
    }

    fn on_move(&mut self, insn: &DecodedInstruction) {
        let (Some(dst), Some(src)) = (insn.op0().copied(), insn.op1().copied()) else {
            return;
        };
        match (dst, src) {
            (Operand::Register(d), Operand::Register(s)) => self.state.copy_register(d, s),
            (Operand::Register(d), Operand::Immediate(v)) => {
                self.state.clear_register(d);
                self.state.set_constant(d, ConstantValue::Integer(v));
            }
            (Operand::Register(d), Operand::Constant(address)) => self.on_global_load(d, address),
            (Operand::Register(d), Operand::Memory(m)) => match m.base {
                MemoryBase::InstructionPointer => {
                    let address = m.absolute_target(insn).unwrap_or(0);
                    self.on_global_load(d, address);
                }
                MemoryBase::Register(b) if m.offset == 0 => self.state.copy_register(d, b),
                MemoryBase::Register(b) => self.on_field_read(d, b, m.offset),
            },
            (Operand::Memory(m), src) => self.on_field_write(m, &src, insn),
            _ => {}
        }
    }

    /// `lea` only matters for instruction-pointer-relative sources, where the
    /// computed address itself names a global or a literal.
    fn on_load_address(&mut self, insn: &DecodedInstruction) {
        let Some(d) = insn.op0().and_then(Operand::as_register) else {
            return;
        };
        let Some(m) = insn.op1().and_then(Operand::as_memory) else {
            self.state.clear_register(d);
            return;
        };
        match m.absolute_target(insn) {
            Some(address) => self.on_global_load(d, address),
            None => self.state.clear_register(d),
        }
    }

    /// Resolves a load whose source address lies in read-only data: a named
    /// global if the table knows it, a raw string literal if the bytes look
    /// like one, otherwise nothing.
    fn on_global_load(&mut self, d: Register, address: VirtualAddress) {
        if let Some(global) = self.ctx.globals.lookup(address) {
            let name = global.name.clone();
            self.state.clear_register(d);
            match global.kind {
                GlobalKind::Type => {
                    self.output
                        .action(&format!("Loads the class pointer for {name}"));
                    self.state.set_alias(d, &name);
                    self.state.set_constant(d, ConstantValue::Global(global));
                }
                GlobalKind::Method => {
                    self.output
                        .action(&format!("Loads the method pointer for {name}"));
                    self.state.set_alias(d, &name);
                    let value = self
                        .ctx
                        .metadata
                        .method_by_name(&name)
                        .map_or(ConstantValue::Global(global), ConstantValue::Method);
                    self.state.set_constant(d, value);
                }
                GlobalKind::Field => {
                    self.output
                        .action(&format!("Loads the field pointer for {name}"));
                    self.state.set_alias(d, &name);
                    self.state.set_constant(d, ConstantValue::Global(global));
                }
                GlobalKind::StringLiteral => {
                    self.output
                        .action(&format!("Loads the string literal \"{name}\""));
                    self.bind_literal(d, &name);
                }
            }
        } else if let Some(text) = self.read_literal(address) {
            self.output
                .action(&format!("Loads the string literal \"{text}\""));
            self.bind_literal(d, &text);
        } else {
            self.state.clear_register(d);
        }
    }

    fn bind_literal(&mut self, d: Register, text: &str) {
        self.state.clear_register(d);
        self.state.set_alias(d, &format!("\"{text}\""));
        self.state.set_type(d, TypeRef::primitive("String"));
        self.state.set_constant(d, ConstantValue::Literal(text.to_string()));
    }

    /// Reads a NUL-terminated printable-ASCII string, bounded, or nothing.
    fn read_literal(&self, address: VirtualAddress) -> Option<String> {
        if address == 0 {
            return None;
        }
        let bytes = self.ctx.oracle.read(address, MAX_LITERAL_BYTES)?;
        let terminator = bytes.iter().position(|b| *b == 0)?;
        if terminator == 0 {
            return None;
        }
        let text = &bytes[..terminator];
        if text.iter().all(|b| (0x20..0x7f).contains(b)) {
            String::from_utf8(text.to_vec()).ok()
        } else {
            None
        }
    }

    fn read_f32(&self, address: VirtualAddress) -> Option<f32> {
        let bytes = self.ctx.oracle.read(address, 4)?;
        let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(f32::from_le_bytes(raw))
    }

    fn on_field_read(&mut self, d: Register, b: Register, offset: i64) {
        let b = b.normalize();
        if is_stack_register(b) {
            self.state.clear_register(d);
            return;
        }

        // A load at the well-known offset off a class pointer is the hop to
        // that class's static-fields block, not a field in its own right.
        if offset == self.layout.class_static_fields_offset {
            if let Some(ConstantValue::Global(global)) = self.state.constant(b).cloned() {
                if global.kind == GlobalKind::Type {
                    let name = global.name.clone();
                    self.state.clear_register(d);
                    self.state
                        .set_constant(d, ConstantValue::StaticsBlock(global));
                    self.output
                        .action(&format!("Loads the static fields of {name}"));
                    return;
                }
            }
        }

        if let Some(ConstantValue::StaticsBlock(global)) = self.state.constant(b).cloned() {
            let ty = type_ref_from_name(&global.name);
            match self.ctx.metadata.static_field_at(&ty, offset) {
                Some(field) => {
                    let local = self.new_local();
                    self.output.action(&format!("Reads the static field {field}"));
                    self.output.pseudo(
                        self.depth(),
                        &format!("{} {local} = {field}", field.field_type),
                    );
                    self.state.clear_register(d);
                    self.state.set_alias(d, &local);
                    self.state.set_type(d, field.field_type.clone());
                }
                None => {
                    self.output.warning(&format!(
                        "unresolved static field at offset {offset:#x} of {}",
                        global.name
                    ));
                    self.state.clear_register(d);
                }
            }
            return;
        }

        if let Some(ty) = self.state.type_of(b) {
            if offset >= self.layout.object_header_size {
                let base_display = self.display_register(b);
                match self.ctx.metadata.instance_field_at(&ty, offset) {
                    Some(field) => {
                        let local = self.new_local();
                        self.output.action(&format!(
                            "Reads the field {} of {base_display}",
                            field.name
                        ));
                        self.output.pseudo(
                            self.depth(),
                            &format!(
                                "{} {local} = {base_display}.{}",
                                field.field_type, field.name
                            ),
                        );
                        self.state.clear_register(d);
                        self.state.set_alias(d, &local);
                        self.state.set_type(d, field.field_type.clone());
                    }
                    None => {
                        self.output.warning(&format!(
                            "unresolved field at offset {offset:#x} of {ty}"
                        ));
                        self.state.clear_register(d);
                    }
                }
                return;
            }
        }

        self.output.warning(&format!(
            "field read through {b} with unknown base could not be resolved"
        ));
        self.state.clear_register(d);
    }

    fn on_field_write(&mut self, m: Memory, src: &Operand, insn: &DecodedInstruction) {
        let value = self.display_value(src);
        let MemoryBase::Register(b) = m.base else {
            self.output.warning(&format!(
                "write to unresolved global at {:#x}",
                m.absolute_target(insn).unwrap_or(0)
            ));
            return;
        };
        let b = b.normalize();
        if is_stack_register(b) {
            return;
        }

        if let Some(ConstantValue::StaticsBlock(global)) = self.state.constant(b).cloned() {
            let ty = type_ref_from_name(&global.name);
            match self.ctx.metadata.static_field_at(&ty, m.offset) {
                Some(field) => {
                    self.output
                        .action(&format!("Sets the static field {field} to {value}"));
                    self.output
                        .pseudo(self.depth(), &format!("{field} = {value}"));
                }
                None => self.output.warning(&format!(
                    "unresolved static field at offset {:#x} of {}",
                    m.offset, global.name
                )),
            }
            return;
        }

        if let Some(ty) = self.state.type_of(b) {
            if m.offset >= self.layout.object_header_size {
                let base_display = self.display_register(b);
                match self.ctx.metadata.instance_field_at(&ty, m.offset) {
                    Some(field) => {
                        self.output.action(&format!(
                            "Sets the field {} of {base_display} to {value}",
                            field.name
                        ));
                        self.output.pseudo(
                            self.depth(),
                            &format!("{base_display}.{} = {value}", field.name),
                        );
                    }
                    None => self.output.warning(&format!(
                        "unresolved field at offset {:#x} of {ty}",
                        m.offset
                    )),
                }
                return;
            }
        }

        self.output.warning(&format!(
            "field write through {b} with unknown base could not be resolved"
        ));
    }

    fn on_comparison(&mut self, insn: &DecodedInstruction) {
        let (Some(l), Some(r)) = (insn.op0().copied(), insn.op1().copied()) else {
            return;
        };
        let left = self.comparison_operand(&l);
        let right = self.comparison_operand(&r);
        self.output
            .action(&format!("Compares {} and {}", left.display, right.display));
        self.state.set_comparison(Comparison { left, right });
    }

    fn comparison_operand(&self, op: &Operand) -> ComparisonOperand {
        match op {
            Operand::Register(r) => ComparisonOperand {
                display: self.display_register(*r),
                ty: self.state.type_of(*r),
            },
            Operand::Immediate(v) => ComparisonOperand {
                display: v.to_string(),
                ty: None,
            },
            // Float compares reference their literal through the constant pool.
            Operand::Constant(address) => ComparisonOperand {
                display: self
                    .read_f32(*address)
                    .map_or_else(|| format!("{address:#x}"), |v| v.to_string()),
                ty: None,
            },
            Operand::Memory(m) => ComparisonOperand {
                display: m.to_string(),
                ty: None,
            },
        }
    }

    fn on_conditional_branch(&mut self, index: usize, insn: &DecodedInstruction) {
        let Some(cond) = insn.mnemonic.condition() else {
            return;
        };
        let comparison = self.state.take_comparison();
        let Some(target) = insn.branch_target() else {
            self.output.warning("conditional branch with indirect target");
            return;
        };

        // Leaving the method entirely: render the guard and the escape, no
        // else branch is ever synthesized.
        if !self.method.contains(target) {
            let phrase = condition_phrase(comparison.as_ref(), cond);
            self.output.action(&format!(
                "If {phrase}, continues at {target:#x} outside this method"
            ));
            let depth = self.depth();
            self.output.pseudo(depth, &format!("if ({phrase})"));
            self.output.pseudo(depth + 1, &format!("goto {target:#x}"));
            return;
        }

        if target > insn.address {
            let Some(target_index) = self.index_of(target) else {
                self.output.warning(&format!(
                    "branch target {target:#x} does not start an instruction"
                ));
                return;
            };
            // The branch skips the block, so the block runs under the
            // negated guard.
            let inverted = cond.negate();
            let phrase = condition_phrase(comparison.as_ref(), inverted);
            let span = target_index - index;
            let kind = if self.ends_with_back_jump(target_index, insn.address) {
                BlockKind::Loop
            } else {
                BlockKind::If
            };
            let depth = self.depth();
            match kind {
                BlockKind::Loop => {
                    self.output.action(&format!(
                        "Loops over the next {} instructions while {phrase}",
                        span - 1
                    ));
                    self.output.pseudo(depth, &format!("while ({phrase})"));
                }
                BlockKind::If => {
                    self.output.action(&format!(
                        "If {phrase}, executes the next {} instructions",
                        span - 1
                    ));
                    self.output.pseudo(depth, &format!("if ({phrase})"));
                }
            }
            self.indents.push(IndentFrame {
                remaining: span,
                kind,
            });
        } else {
            let phrase = condition_phrase(comparison.as_ref(), cond);
            self.output.action(&format!("Repeats while {phrase}"));
            self.output
                .pseudo(self.depth(), &format!("repeat while ({phrase})"));
        }
    }

    /// True when the instruction just before the branch target is an
    /// unconditional jump back at or before the branch, the shape of a guarded
    /// loop head.
    fn ends_with_back_jump(&self, target_index: usize, branch_address: VirtualAddress) -> bool {
        target_index
            .checked_sub(1)
            .and_then(|i| self.instructions.get(i))
            .is_some_and(|last| {
                last.mnemonic.is_unconditional_jump()
                    && last.branch_target().is_some_and(|t| t <= branch_address)
            })
    }

    fn index_of(&self, address: VirtualAddress) -> Option<usize> {
        self.instructions.iter().position(|i| i.address == address)
    }

    fn on_jump(&mut self, insn: &DecodedInstruction) -> Result<()> {
        match insn.branch_target() {
            Some(target) if self.method.contains(target) => {
                if target <= insn.address {
                    self.output.action("Repeats unconditionally");
                    self.output.pseudo(self.depth(), "repeat");
                } else {
                    self.output.action(&format!("Jumps forward to {target:#x}"));
                    self.output
                        .pseudo(self.depth(), &format!("goto {target:#x}"));
                }
                Ok(())
            }
            // A tail jump out of the method is a call in disguise.
            _ => self.on_call(insn),
        }
    }

    fn on_call(&mut self, insn: &DecodedInstruction) -> Result<()> {
        if let Some(target) = insn.branch_target() {
            if let Some(slot) = self.key.classify(target) {
                return self.on_key_function_call(slot, insn);
            }
            if let Some(method) = self.ctx.metadata.method_at_address(target) {
                self.emit_managed_call(&method);
                return Ok(());
            }
            if self.method.contains(target) {
                self.output
                    .action(&format!("Jumps to {target:#x} within this method"));
                self.output
                    .pseudo(self.depth(), &format!("goto {target:#x}"));
                return Ok(());
            }
            if let Some(method) = self.argument_register_fallback() {
                self.emit_managed_call(&method);
                return Ok(());
            }
            self.output
                .warning(&format!("call to unknown function {target:#x}"));
            self.state.clear_register(self.convention.return_register);
            return Ok(());
        }

        // Register-indirect call: the target must already be in the state.
        if let Some(reg) = insn.op0().and_then(Operand::as_register) {
            if let Some(ConstantValue::Method(method)) = self.state.constant(reg).cloned() {
                self.emit_managed_call(&method);
                return Ok(());
            }
            self.output.warning(&format!(
                "indirect call through {} with unknown target",
                reg.normalize()
            ));
        } else {
            self.output.warning("indirect call with unresolved target");
        }
        self.state.clear_register(self.convention.return_register);
        Ok(())
    }

    /// Last resort for an unclassifiable target: if an argument register holds
    /// a method reference whose arity matches the number of argument slots
    /// filled below it, assume the compiler materialized the callee there.
    fn argument_register_fallback(&self) -> Option<Arc<MethodRef>> {
        for (slot, reg) in self.convention.integer.iter().enumerate().rev() {
            if let Some(ConstantValue::Method(method)) = self.state.constant(*reg) {
                let consumed = method.parameters.len() + usize::from(!method.is_static());
                if consumed == slot {
                    return Some(method.clone());
                }
            }
        }
        None
    }

    fn emit_managed_call(&mut self, method: &MethodRef) {
        let mut slot = 0usize;
        let receiver = if method.is_static() {
            method.declaring_type.full_name()
        } else {
            let this = self.argument_display(slot, false);
            slot += 1;
            this
        };
        let mut arguments = Vec::new();
        for parameter in &method.parameters {
            arguments.push(self.argument_display(slot, parameter.ty.is_float()));
            slot += 1;
        }
        let call = format!("{receiver}.{}({})", method.name, arguments.join(", "));
        self.output.action(&format!("Calls {}", method.full_name()));
        match &method.return_type {
            Some(ret) => {
                let local = self.new_local();
                self.output
                    .pseudo(self.depth(), &format!("{ret} {local} = {call}"));
                self.bind_return(&local, ret.clone());
            }
            None => {
                self.output.pseudo(self.depth(), &call);
                self.state.clear_register(self.convention.return_register);
            }
        }
    }

    fn argument_display(&self, slot: usize, float: bool) -> String {
        let bank = if float {
            self.convention.float
        } else {
            self.convention.integer
        };
        match bank.get(slot) {
            Some(reg) => self.display_register(*reg),
            None => "<stack>".to_string(),
        }
    }

    fn argument_register(&self, slot: usize) -> Option<Register> {
        self.convention.integer.get(slot).copied()
    }

    /// Class pointer currently held in an integer argument slot, if any.
    fn class_argument(&self, slot: usize) -> Option<Arc<GlobalIdentifier>> {
        let reg = self.argument_register(slot)?;
        match self.state.constant(reg) {
            Some(ConstantValue::Global(g)) if g.kind == GlobalKind::Type => Some(g.clone()),
            _ => None,
        }
    }

    fn bind_return(&mut self, alias: &str, ty: Arc<TypeRef>) {
        let reg = if ty.is_float() {
            self.convention.float_return
        } else {
            self.convention.return_register
        };
        self.state.clear_register(reg);
        self.state.set_alias(reg, alias);
        self.state.set_type(reg, ty);
    }

    fn on_key_function_call(&mut self, slot: KeyFunction, insn: &DecodedInstruction) -> Result<()> {
        let depth = self.depth();
        match slot {
            KeyFunction::ObjectNew | KeyFunction::VmObjectNew | KeyFunction::CodegenObjectNew => {
                match self.class_argument(0) {
                    Some(global) => {
                        let ty = type_ref_from_name(&global.name);
                        let local = self.new_local();
                        self.output
                            .action(&format!("Creates an instance of type {}", global.name));
                        self.output
                            .pseudo(depth, &format!("{ty} {local} = new {ty}()"));
                        self.bind_return(&local, ty);
                    }
                    None => {
                        let local = self.new_local();
                        self.output.action("Creates an instance of an unresolved type");
                        self.output
                            .pseudo(depth, &format!("object {local} = new <unknown>()"));
                        self.bind_return(&local, TypeRef::primitive("Object"));
                    }
                }
            }
            KeyFunction::StringNew => {
                let text = self.argument_register(0).and_then(|reg| {
                    match self.state.constant(reg) {
                        Some(ConstantValue::Literal(s)) => Some(s.clone()),
                        _ => None,
                    }
                });
                let local = self.new_local();
                match text {
                    Some(text) => {
                        self.output
                            .action(&format!("Creates a managed string from \"{text}\""));
                        self.output
                            .pseudo(depth, &format!("string {local} = \"{text}\""));
                    }
                    None => {
                        self.output
                            .action("Creates a managed string from an unresolved buffer");
                        self.output
                            .pseudo(depth, &format!("string {local} = <unknown>"));
                    }
                }
                self.bind_return(&local, TypeRef::primitive("String"));
            }
            KeyFunction::ValueBox => {
                let type_name = self
                    .class_argument(0)
                    .map_or_else(|| "<unknown>".to_string(), |g| g.name.clone());
                let value = self
                    .argument_register(1)
                    .map_or_else(|| "<unknown>".to_string(), |r| self.display_register(r));
                let local = self.new_local();
                self.output
                    .action(&format!("Boxes {value} into a {type_name}"));
                self.output.pseudo(
                    depth,
                    &format!("object {local} = (object)({type_name}){value}"),
                );
                self.bind_return(&local, TypeRef::primitive("Object"));
            }
            KeyFunction::RaiseException => {
                let value = self
                    .argument_register(0)
                    .map_or_else(|| "<unknown>".to_string(), |r| self.display_register(r));
                self.output.action(&format!("Throws {value}"));
                self.output.pseudo(depth, &format!("throw {value}"));
            }
            KeyFunction::ClassInitExport | KeyFunction::ClassInitActual => {
                match self.class_argument(0) {
                    Some(global) => self
                        .output
                        .action(&format!("Initializes the class {}", global.name)),
                    None => self.output.action("Initializes an unresolved class"),
                }
            }
            KeyFunction::TypeGetObject => {
                let type_name = self
                    .class_argument(0)
                    .map_or_else(|| "<unknown>".to_string(), |g| g.name.clone());
                let local = self.new_local();
                self.output
                    .action(&format!("Gets the reflection Type object for {type_name}"));
                self.output
                    .pseudo(depth, &format!("Type {local} = typeof({type_name})"));
                self.bind_return(&local, TypeRef::primitive("Type"));
            }
            KeyFunction::ArrayNewSpecific | KeyFunction::SzArrayNew => {
                let type_name = self
                    .class_argument(0)
                    .map_or_else(|| "<unknown>".to_string(), |g| g.name.clone());
                let length = self.argument_register(1).and_then(|reg| {
                    match self.state.constant(reg) {
                        Some(ConstantValue::Integer(v)) => Some(*v),
                        _ => None,
                    }
                });
                if let Some(length) = length {
                    if !(0..=MAX_ARRAY_LENGTH).contains(&length) {
                        return Err(structural_error!(
                            "array length {length:#x} at {:#x} is outside any sane bound",
                            insn.address
                        ));
                    }
                }
                let shown = length.map_or_else(|| "<unknown>".to_string(), |v| v.to_string());
                let local = self.new_local();
                self.output.action(&format!(
                    "Creates an array of {type_name} with {shown} elements"
                ));
                self.output.pseudo(
                    depth,
                    &format!("{type_name}[] {local} = new {type_name}[{shown}]"),
                );
                self.bind_return(&local, type_ref_from_name(&format!("{type_name}[]")));
            }
            KeyFunction::ResolveInternalCall => {
                let name = self.argument_register(0).and_then(|reg| {
                    match self.state.constant(reg) {
                        Some(ConstantValue::Literal(s)) => Some(s.clone()),
                        _ => None,
                    }
                });
                match name {
                    Some(name) => self.resolve_internal_call(&name),
                    None => {
                        self.output
                            .warning("internal-call resolution with unresolved name");
                        self.state.clear_register(self.convention.return_register);
                    }
                }
            }
            KeyFunction::InitMethodMetadata => {
                self.output.action("Initializes this method's metadata, once");
            }
        }
        Ok(())
    }

    /// Maps a `Namespace.Type::Method(args)` name string to its managed method
    /// and leaves the result in the return register for the following indirect
    /// call. Resolutions are cached for the lifetime of the binary.
    fn resolve_internal_call(&mut self, name: &str) {
        self.output
            .action(&format!("Looks up the native implementation of {name}"));
        if let Some(method) = self.ctx.native_calls.get(name) {
            self.bind_native(&method);
            return;
        }
        let qualified = name.split('(').next().unwrap_or(name);
        match self.ctx.metadata.method_by_name(qualified) {
            Some(method) => {
                self.ctx.native_calls.insert(name, method.clone());
                self.bind_native(&method);
            }
            None => {
                self.output.warning(&format!(
                    "native implementation of {name} is not modeled"
                ));
                self.state.clear_register(self.convention.return_register);
            }
        }
    }

    fn bind_native(&mut self, method: &Arc<MethodRef>) {
        let reg = self.convention.return_register;
        self.state.clear_register(reg);
        self.state.set_alias(reg, &method.full_name());
        self.state.set_constant(reg, ConstantValue::Method(method.clone()));
    }

    fn on_step_counter(&mut self, insn: &DecodedInstruction, op: &str) {
        let Some(reg) = insn.op0().and_then(Operand::as_register) else {
            return;
        };
        let display = self.display_register(reg);
        let verb = if op == "++" { "Increments" } else { "Decrements" };
        self.output.action(&format!("{verb} {display}"));
        self.output.pseudo(self.depth(), &format!("{display}{op}"));
        self.state.clear_constant(reg);
    }

    fn on_float_multiply(&mut self, insn: &DecodedInstruction) {
        let Some(reg) = insn.op0().and_then(Operand::as_register) else {
            return;
        };
        let display = self.display_register(reg);
        let factor = match insn.op1() {
            Some(Operand::Constant(address)) => {
                self.read_f32(*address).map(|v| v.to_string())
            }
            Some(Operand::Register(r)) => Some(self.display_register(*r)),
            Some(Operand::Memory(m)) => m
                .absolute_target(insn)
                .and_then(|a| self.read_f32(a))
                .map(|v| v.to_string()),
            _ => None,
        };
        let factor = factor.unwrap_or_else(|| "<unknown>".to_string());
        self.output
            .action(&format!("Multiplies {display} by {factor}"));
        self.output
            .pseudo(self.depth(), &format!("{display} *= {factor}"));
        self.state.clear_constant(reg);
    }

    fn on_return(&mut self) {
        match self.method.method.return_type.clone() {
            Some(ret) => {
                let reg = if ret.is_float() {
                    self.convention.float_return
                } else {
                    self.convention.return_register
                };
                let value = self.display_register(reg);
                self.output.action(&format!("Returns {value}"));
                self.output.pseudo(self.depth(), &format!("return {value}"));
            }
            None => {
                self.output.action("Returns");
                self.output.pseudo(self.depth(), "return");
            }
        }
    }

    /// Arithmetic the battery has no source-level shape for still invalidates
    /// the destination's known constant.
    fn on_arithmetic(&mut self, insn: &DecodedInstruction) {
        if let Some(reg) = insn.op0().and_then(Operand::as_register) {
            self.state.clear_constant(reg);
        }
    }

    fn display_register(&self, reg: Register) -> String {
        let reg = reg.normalize();
        if let Some(alias) = self.state.alias(reg) {
            return alias.to_string();
        }
        if let Some(value) = self.state.constant(reg) {
            return value.to_string();
        }
        reg.to_string()
    }

    fn display_value(&self, op: &Operand) -> String {
        match op {
            Operand::Register(r) => self.display_register(*r),
            Operand::Immediate(v) => v.to_string(),
            Operand::Constant(a) => format!("{a:#x}"),
            Operand::Memory(m) => m.to_string(),
        }
    }

    fn new_local(&mut self) -> String {
        self.locals += 1;
        format!("local{}", self.locals)
    }
}

fn is_stack_register(reg: Register) -> bool {
    matches!(
        reg,
        Register::Rsp | Register::Rbp | Register::Sp | Register::Fp
    )
}

/// Renders a condition over the captured comparison operands.
fn condition_phrase(comparison: Option<&Comparison>, cond: Condition) -> String {
    let Some(comparison) = comparison else {
        return format!("the previous result {} 0", cond.symbol());
    };
    if comparison.is_zero_test() {
        let subject = &comparison.left.display;
        return match cond {
            Condition::Equal => format!("{subject} is zero or null"),
            Condition::NotEqual => format!("{subject} is not zero or null"),
            _ => format!("{subject} {} 0", cond.symbol()),
        };
    }
    format!(
        "{} {} {}",
        comparison.left.display,
        cond.symbol(),
        comparison.right.display
    )
}

fn type_ref_from_name(full: &str) -> Arc<TypeRef> {
    match full.rsplit_once('.') {
        Some((namespace, name)) => TypeRef::new(namespace, name),
        None => TypeRef::new("", full),
    }
}
