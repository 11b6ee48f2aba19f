//! Semantic lifter integration tests.
//!
//! Each test builds a short synthetic method body, lifts it through the public
//! API, and checks the synopsis and pseudocode for the recovered semantics.

mod common;

use aotscope::prelude::*;
use aotscope::Error;
use common::{
    call, lea_reg_ip, make_method, method_context, mov_reg_ip, ret, FakeDecoder, FakeModel,
    FakeOracle,
};

fn insn(
    address: VirtualAddress,
    size: u8,
    mnemonic: Mnemonic,
    operands: Vec<Operand>,
) -> DecodedInstruction {
    DecodedInstruction {
        address,
        size,
        mnemonic,
        operands,
    }
}

fn reg(r: Register) -> Operand {
    Operand::Register(r)
}

fn imm(v: i64) -> Operand {
    Operand::Immediate(v)
}

/// Static `void Game.Test::Run()` spanning the given addresses.
fn static_void_method(start: VirtualAddress, end: VirtualAddress) -> MethodContext {
    method_context(
        make_method("Game", "Test", "Run", Vec::new(), None, start, MethodAttributes::STATIC),
        start,
        end,
    )
}

#[test]
fn test_object_creation_end_to_end() {
    // mov rcx, [rip -> class pointer] ; call codegen allocator ; ret
    let oracle = FakeOracle::new(0x1000, vec![0; 0x3000]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let mut globals = GlobalIdTable::new();
    globals.insert(GlobalKind::Type, 0x3000, "Game.Enemy");
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);

    let key = KeyFunctionTable {
        codegen_object_new: 0x2000,
        ..Default::default()
    };
    let body = vec![
        mov_reg_ip(0x1000, 7, Register::Rcx, 0x3000),
        call(0x1007, 5, 0x2000),
        ret(0x100c, 1),
    ];
    let method = static_void_method(0x1000, 0x100d);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Loads the class pointer for Game.Enemy"));
    assert!(output.synopsis().contains("Creates an instance of type Game.Enemy"));
    assert!(output
        .pseudocode()
        .contains("Game.Enemy local1 = new Game.Enemy()"));
    assert!(output.pseudocode().contains("return"));
}

#[test]
fn test_register_clear_without_counter() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        insn(0x1000, 2, Mnemonic::Xor, vec![reg(Register::Eax), reg(Register::Eax)]),
        ret(0x1002, 1),
    ];
    let method = static_void_method(0x1000, 0x1003);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Sets rax to zero"));
    assert!(!output.synopsis().contains("counter"));
}

#[test]
fn test_register_clear_resets_loop_counter() {
    // xor ecx, ecx ; inc ecx ; cmp ecx, 10 ; jl back ; ret
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        insn(0x1000, 2, Mnemonic::Xor, vec![reg(Register::Ecx), reg(Register::Ecx)]),
        insn(0x1002, 2, Mnemonic::Inc, vec![reg(Register::Ecx)]),
        insn(0x1004, 3, Mnemonic::Cmp, vec![reg(Register::Ecx), imm(10)]),
        insn(0x1007, 2, Mnemonic::Jl, vec![Operand::Constant(0x1002)]),
        ret(0x1009, 1),
    ];
    let method = static_void_method(0x1000, 0x100a);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Resets counter1 to 0"));
    assert!(output.synopsis().contains("Increments counter1"));
    assert!(output.synopsis().contains("Repeats while counter1 < 10"));
    assert!(output.pseudocode().contains("counter1 = 0"));
    assert!(output.pseudocode().contains("counter1++"));
}

#[test]
fn test_forward_branch_becomes_if_block() {
    // test eax, eax ; je past-the-nops ; nop ; nop ; ret
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        insn(0x1000, 2, Mnemonic::Test, vec![reg(Register::Eax), reg(Register::Eax)]),
        insn(0x1002, 2, Mnemonic::Je, vec![Operand::Constant(0x100a)]),
        insn(0x1004, 2, Mnemonic::Nop, Vec::new()),
        insn(0x1006, 4, Mnemonic::Nop, Vec::new()),
        ret(0x100a, 1),
    ];
    let method = static_void_method(0x1000, 0x100b);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    // The branch skips the block when rax is zero, so the block guard is the
    // inverted condition.
    assert!(output
        .synopsis()
        .contains("If rax is not zero or null, executes the next 2 instructions"));
    assert_eq!(output.pseudocode().matches("if (").count(), 1);
    assert!(!output.pseudocode().contains("else"));
    assert!(!output.synopsis().contains("Repeats"));
}

#[test]
fn test_branch_past_method_end_keeps_single_if() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        insn(0x1000, 2, Mnemonic::Test, vec![reg(Register::Eax), reg(Register::Eax)]),
        insn(0x1002, 6, Mnemonic::Je, vec![Operand::Constant(0x5000)]),
        ret(0x1008, 1),
    ];
    let method = static_void_method(0x1000, 0x1009);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output
        .synopsis()
        .contains("If rax is zero or null, continues at 0x5000 outside this method"));
    assert_eq!(output.pseudocode().matches("if (").count(), 1);
    assert!(output.pseudocode().contains("goto 0x5000"));
    assert!(!output.pseudocode().contains("else"));
}

#[test]
fn test_instance_field_read_and_write() {
    let player = TypeRef::new("Game", "Player");
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default().with_instance_field(
        &player,
        0x18,
        "health",
        TypeRef::primitive("Int32"),
    );
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    // Instance method: rcx holds `this`.
    let method = method_context(
        make_method("Game", "Player", "Tick", Vec::new(), None, 0x1000, MethodAttributes::empty()),
        0x1000,
        0x1010,
    );
    let body = vec![
        insn(
            0x1000,
            4,
            Mnemonic::Mov,
            vec![reg(Register::Rax), Operand::Memory(Memory::base_offset(Register::Rcx, 0x18))],
        ),
        insn(
            0x1004,
            4,
            Mnemonic::Mov,
            vec![Operand::Memory(Memory::base_offset(Register::Rcx, 0x18)), reg(Register::Rax)],
        ),
        ret(0x1008, 1),
    ];

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Reads the field health of this"));
    assert!(output.pseudocode().contains("System.Int32 local1 = this.health"));
    assert!(output.synopsis().contains("Sets the field health of this to local1"));
    assert!(output.pseudocode().contains("this.health = local1"));
}

#[test]
fn test_static_field_read_through_class_pointer() {
    // mov rax, [rip -> class ptr] ; mov rax, [rax+0xb8] (statics block) ;
    // mov rdx, [rax+0x10] (the field) ; ret
    let config = TypeRef::new("Game", "Config");
    let oracle = FakeOracle::new(0x1000, vec![0; 0x3000]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let mut globals = GlobalIdTable::new();
    globals.insert(GlobalKind::Type, 0x3800, "Game.Config");
    let model = FakeModel::default().with_static_field(
        &config,
        0x10,
        "Difficulty",
        TypeRef::primitive("Int32"),
    );
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        mov_reg_ip(0x1000, 7, Register::Rax, 0x3800),
        insn(
            0x1007,
            7,
            Mnemonic::Mov,
            vec![reg(Register::Rax), Operand::Memory(Memory::base_offset(Register::Rax, 0xb8))],
        ),
        insn(
            0x100e,
            4,
            Mnemonic::Mov,
            vec![reg(Register::Rdx), Operand::Memory(Memory::base_offset(Register::Rax, 0x10))],
        ),
        ret(0x1012, 1),
    ];
    let method = static_void_method(0x1000, 0x1013);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Loads the static fields of Game.Config"));
    assert!(output
        .synopsis()
        .contains("Reads the static field Game.Config.Difficulty"));
    assert!(output
        .pseudocode()
        .contains("System.Int32 local1 = Game.Config.Difficulty"));
}

#[test]
fn test_string_literal_and_string_new() {
    let mut image = vec![0u8; 0x3000];
    image[0x2000..0x2005].copy_from_slice(b"Hello");
    let oracle = FakeOracle::new(0x1000, image);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);

    let key = KeyFunctionTable {
        string_new: 0x2100,
        ..Default::default()
    };
    let body = vec![
        lea_reg_ip(0x1000, 7, Register::Rcx, 0x3000),
        call(0x1007, 5, 0x2100),
        ret(0x100c, 1),
    ];
    let method = static_void_method(0x1000, 0x100d);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Loads the string literal \"Hello\""));
    assert!(output
        .synopsis()
        .contains("Creates a managed string from \"Hello\""));
    assert!(output.pseudocode().contains("string local1 = \"Hello\""));
}

#[test]
fn test_managed_call_binds_return_local() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let callee = make_method(
        "Game",
        "Spawner",
        "Next",
        vec![Parameter::new("count", TypeRef::primitive("Int32"))],
        Some(TypeRef::new("Game", "Enemy")),
        0x4000,
        MethodAttributes::STATIC,
    );
    let model = FakeModel::default().with_method(callee);
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        insn(0x1000, 5, Mnemonic::Mov, vec![reg(Register::Ecx), imm(3)]),
        call(0x1005, 5, 0x4000),
        ret(0x100a, 1),
    ];
    let method = static_void_method(0x1000, 0x100b);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output.synopsis().contains("Calls Game.Spawner.Next"));
    assert!(output
        .pseudocode()
        .contains("Game.Enemy local1 = Game.Spawner.Next(3)"));
}

#[test]
fn test_unknown_call_falls_back_to_argument_register_method() {
    // The call target resolves to nothing, but r9 holds a method pointer for a
    // three-argument static method and exactly the three slots below it are
    // filled, so the callee is taken from the argument register.
    let oracle = FakeOracle::new(0x1000, vec![0; 0x3000]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let mut globals = GlobalIdTable::new();
    globals.insert(GlobalKind::Method, 0x3000, "Game.Native::Helper");
    let helper = make_method(
        "Game",
        "Native",
        "Helper",
        vec![
            Parameter::new("a", TypeRef::primitive("Int32")),
            Parameter::new("b", TypeRef::primitive("Int32")),
            Parameter::new("c", TypeRef::primitive("Int32")),
        ],
        None,
        0,
        MethodAttributes::STATIC,
    );
    let model = FakeModel::default().with_method(helper);
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let body = vec![
        mov_reg_ip(0x1000, 7, Register::R9, 0x3000),
        insn(0x1007, 5, Mnemonic::Mov, vec![reg(Register::Ecx), imm(1)]),
        insn(0x100c, 5, Mnemonic::Mov, vec![reg(Register::Edx), imm(2)]),
        insn(0x1011, 7, Mnemonic::Mov, vec![reg(Register::R8), imm(3)]),
        call(0x1018, 5, 0x6000),
        ret(0x101d, 1),
    ];
    let method = static_void_method(0x1000, 0x101e);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output
        .synopsis()
        .contains("Loads the method pointer for Game.Native::Helper"));
    assert!(output.synopsis().contains("Calls Game.Native.Helper"));
    assert!(output.pseudocode().contains("Game.Native.Helper(1, 2, 3)"));
    assert!(!output.synopsis().contains("WARNING"));
}

#[test]
fn test_oversized_array_aborts_method() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x3000]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let mut globals = GlobalIdTable::new();
    globals.insert(GlobalKind::Type, 0x3000, "System.Byte");
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);

    let key = KeyFunctionTable {
        szarray_new: 0x2200,
        ..Default::default()
    };
    let body = vec![
        mov_reg_ip(0x1000, 7, Register::Rcx, 0x3000),
        insn(0x1007, 7, Mnemonic::Mov, vec![reg(Register::Rdx), imm(0x20000)]),
        call(0x100e, 5, 0x2200),
        ret(0x1013, 1),
    ];
    let method = static_void_method(0x1000, 0x1014);

    let result = analyze_method(&ctx, &body, &method, &key);
    assert!(matches!(result, Err(Error::Structural { .. })));
}

#[test]
fn test_reanalysis_is_byte_identical() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x3000]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let mut globals = GlobalIdTable::new();
    globals.insert(GlobalKind::Type, 0x3000, "Game.Enemy");
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);

    let key = KeyFunctionTable {
        codegen_object_new: 0x2000,
        ..Default::default()
    };
    let body = vec![
        mov_reg_ip(0x1000, 7, Register::Rcx, 0x3000),
        call(0x1007, 5, 0x2000),
        ret(0x100c, 1),
    ];
    let method = static_void_method(0x1000, 0x100d);

    let first = analyze_method(&ctx, &body, &method, &key).unwrap();
    let second = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_batch_analysis_is_positionally_aligned() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();

    let jobs = vec![
        (vec![ret(0x1000, 1)], static_void_method(0x1000, 0x1001)),
        (Vec::new(), static_void_method(0x2000, 0x2000)),
        (vec![ret(0x3000, 1)], static_void_method(0x3000, 0x3001)),
    ];

    let results = analyze_methods(&ctx, &jobs, &key);
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(Error::Empty)));
    assert!(results[2].is_ok());
}

#[test]
fn test_empty_body_is_rejected() {
    let oracle = FakeOracle::new(0x1000, vec![0; 0x100]);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let model = FakeModel::default();
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);
    let key = KeyFunctionTable::default();
    let method = static_void_method(0x1000, 0x1000);

    assert!(matches!(
        analyze_method(&ctx, &[], &method, &key),
        Err(Error::Empty)
    ));
}

#[test]
fn test_internal_call_resolution_feeds_indirect_call() {
    // lea rcx -> "Game.Native::Query()" ; call resolver ; call rax ; ret
    let mut image = vec![0u8; 0x3000];
    let literal = b"Game.Native::Query()";
    image[0x2000..0x2000 + literal.len()].copy_from_slice(literal);
    let oracle = FakeOracle::new(0x1000, image);
    let decoder = FakeDecoder::new(Architecture::X86_64, Vec::new());
    let globals = GlobalIdTable::new();
    let native = make_method(
        "Game",
        "Native",
        "Query",
        Vec::new(),
        Some(TypeRef::primitive("Int32")),
        0,
        MethodAttributes::STATIC,
    );
    let model = FakeModel::default().with_method(native);
    let ctx = BinaryContext::new(&oracle, &decoder, &globals, &model);

    let key = KeyFunctionTable {
        resolve_internal_call: 0x2300,
        ..Default::default()
    };
    let body = vec![
        lea_reg_ip(0x1000, 7, Register::Rcx, 0x3000),
        call(0x1007, 5, 0x2300),
        insn(0x100c, 2, Mnemonic::Call, vec![reg(Register::Rax)]),
        ret(0x100e, 1),
    ];
    let method = static_void_method(0x1000, 0x100f);

    let output = analyze_method(&ctx, &body, &method, &key).unwrap();
    assert!(output
        .synopsis()
        .contains("Looks up the native implementation of Game.Native::Query()"));
    assert!(output.synopsis().contains("Calls Game.Native.Query"));
    assert!(output
        .pseudocode()
        .contains("System.Int32 local1 = Game.Native.Query()"));
}
