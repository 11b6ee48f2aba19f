//! In-memory fakes for the collaborator seams, shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::binary::{BinaryOracle, CodeRegion, InstructionDecoder};
use crate::instruction::{
    Architecture, DecodedInstruction, Memory, Mnemonic, Operand, Register, VirtualAddress,
};
use crate::metadata::{
    FieldRef, MetadataResolver, MethodAttributes, MethodContext, MethodRef, Parameter, TypeRef,
};
use crate::{Error, Result};

/// Flat in-memory image with a name/address export map.
pub struct FakeOracle {
    pub base: VirtualAddress,
    pub image: Vec<u8>,
    pub exports: HashMap<String, VirtualAddress>,
    pub region: CodeRegion,
}

impl FakeOracle {
    pub fn new(base: VirtualAddress, image: Vec<u8>) -> Self {
        let region = CodeRegion {
            start: base,
            end: base + image.len() as u64,
        };
        FakeOracle {
            base,
            image,
            exports: HashMap::new(),
            region,
        }
    }

    pub fn with_export(mut self, name: &str, address: VirtualAddress) -> Self {
        self.exports.insert(name.to_string(), address);
        self
    }
}

impl BinaryOracle for FakeOracle {
    fn pointer_size(&self) -> u8 {
        8
    }

    fn virtual_to_raw(&self, address: VirtualAddress) -> Option<u64> {
        address.checked_sub(self.base)
    }

    fn read(&self, address: VirtualAddress, len: usize) -> Option<Vec<u8>> {
        let start = usize::try_from(address.checked_sub(self.base)?).ok()?;
        if start >= self.image.len() {
            return None;
        }
        let end = self.image.len().min(start + len);
        Some(self.image[start..end].to_vec())
    }

    fn export(&self, name: &str) -> Option<VirtualAddress> {
        self.exports.get(name).copied()
    }

    fn code_region(&self) -> CodeRegion {
        self.region
    }
}

/// Decoder backed by a fixed instruction list in ascending address order.
pub struct FakeDecoder {
    pub architecture: Architecture,
    pub instructions: Vec<DecodedInstruction>,
}

impl FakeDecoder {
    pub fn new(architecture: Architecture, mut instructions: Vec<DecodedInstruction>) -> Self {
        instructions.sort_by_key(|i| i.address);
        FakeDecoder {
            architecture,
            instructions,
        }
    }
}

impl InstructionDecoder for FakeDecoder {
    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn decode_range(&self, start: VirtualAddress, len: usize) -> Result<Vec<DecodedInstruction>> {
        let end = start + len as u64;
        Ok(self
            .instructions
            .iter()
            .filter(|i| i.address >= start && i.address < end)
            .cloned()
            .collect())
    }

    fn decode_function(&self, start: VirtualAddress) -> Result<Vec<DecodedInstruction>> {
        let mut body = Vec::new();
        for insn in self.instructions.iter().filter(|i| i.address >= start) {
            let terminal = insn.mnemonic.is_return();
            body.push(insn.clone());
            if terminal {
                break;
            }
        }
        if body.is_empty() {
            Err(Error::Decode {
                address: start,
                message: "no instructions at address".to_string(),
            })
        } else {
            Ok(body)
        }
    }
}

/// Table-driven managed model.
#[derive(Default)]
pub struct FakeModel {
    pub instance_fields: HashMap<(String, i64), Arc<FieldRef>>,
    pub static_fields: HashMap<(String, i64), Arc<FieldRef>>,
    pub methods_by_address: HashMap<VirtualAddress, Arc<MethodRef>>,
    pub methods_by_name: HashMap<String, Arc<MethodRef>>,
    pub exception_getter: Option<VirtualAddress>,
    pub generators: Vec<VirtualAddress>,
    pub method_starts: Vec<VirtualAddress>,
}

impl FakeModel {
    pub fn with_instance_field(
        mut self,
        ty: &Arc<TypeRef>,
        offset: i64,
        name: &str,
        field_type: Arc<TypeRef>,
    ) -> Self {
        self.instance_fields.insert(
            (ty.full_name(), offset),
            Arc::new(FieldRef {
                name: name.to_string(),
                declaring_type: ty.clone(),
                field_type,
                is_static: false,
            }),
        );
        self
    }

    pub fn with_static_field(
        mut self,
        ty: &Arc<TypeRef>,
        offset: i64,
        name: &str,
        field_type: Arc<TypeRef>,
    ) -> Self {
        self.static_fields.insert(
            (ty.full_name(), offset),
            Arc::new(FieldRef {
                name: name.to_string(),
                declaring_type: ty.clone(),
                field_type,
                is_static: true,
            }),
        );
        self
    }

    pub fn with_method(mut self, method: Arc<MethodRef>) -> Self {
        if method.address != 0 {
            self.methods_by_address.insert(method.address, method.clone());
        }
        let qualified = format!("{}::{}", method.declaring_type.full_name(), method.name);
        self.methods_by_name.insert(qualified, method);
        self
    }
}

impl MetadataResolver for FakeModel {
    fn instance_field_at(&self, ty: &TypeRef, offset: i64) -> Option<Arc<FieldRef>> {
        self.instance_fields.get(&(ty.full_name(), offset)).cloned()
    }

    fn static_field_at(&self, ty: &TypeRef, offset: i64) -> Option<Arc<FieldRef>> {
        self.static_fields.get(&(ty.full_name(), offset)).cloned()
    }

    fn method_at_address(&self, address: VirtualAddress) -> Option<Arc<MethodRef>> {
        self.methods_by_address.get(&address).cloned()
    }

    fn method_by_name(&self, qualified: &str) -> Option<Arc<MethodRef>> {
        self.methods_by_name.get(qualified).cloned()
    }

    fn exception_message_getter(&self) -> Option<VirtualAddress> {
        self.exception_getter
    }

    fn attribute_generators(&self) -> Vec<VirtualAddress> {
        self.generators.clone()
    }

    fn managed_method_starts(&self) -> Vec<VirtualAddress> {
        self.method_starts.clone()
    }
}

// Instruction construction shorthand.

pub fn jmp(address: VirtualAddress, size: u8, target: VirtualAddress) -> DecodedInstruction {
    DecodedInstruction::unary(address, size, Mnemonic::Jmp, Operand::Constant(target))
}

pub fn call(address: VirtualAddress, size: u8, target: VirtualAddress) -> DecodedInstruction {
    DecodedInstruction::unary(address, size, Mnemonic::Call, Operand::Constant(target))
}

pub fn ret(address: VirtualAddress, size: u8) -> DecodedInstruction {
    DecodedInstruction::nullary(address, size, Mnemonic::Ret)
}

/// `mov reg, [rip+disp]` where `disp` is chosen so the load resolves to
/// `target`.
pub fn mov_reg_ip(
    address: VirtualAddress,
    size: u8,
    reg: Register,
    target: VirtualAddress,
) -> DecodedInstruction {
    let offset = target as i64 - (address + u64::from(size)) as i64;
    DecodedInstruction::binary(
        address,
        size,
        Mnemonic::Mov,
        Operand::Register(reg),
        Operand::Memory(Memory::ip_relative(offset)),
    )
}

pub fn make_method(
    namespace: &str,
    type_name: &str,
    name: &str,
    parameters: Vec<Parameter>,
    return_type: Option<Arc<TypeRef>>,
    address: VirtualAddress,
    attributes: MethodAttributes,
) -> Arc<MethodRef> {
    Arc::new(MethodRef {
        name: name.to_string(),
        declaring_type: TypeRef::new(namespace, type_name),
        parameters,
        return_type,
        address,
        attributes,
    })
}

pub fn method_context(method: Arc<MethodRef>, start: VirtualAddress, end: VirtualAddress) -> MethodContext {
    MethodContext { method, start, end }
}
