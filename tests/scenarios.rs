use ci::{
    bytecode::{LinkError, Parser},
    memory::Memory,
    vm::{Halt, RuntimeError, Vm},
};

fn run<'m>(program: &str, memory: &'m mut Memory) -> (Result<(), RuntimeError>, String, Vm<'m>) {
    let mut vm = Vm::load(program, memory).unwrap();
    let mut out = Vec::new();
    let result = vm.run(&mut out);
    (result, String::from_utf8(out).unwrap(), vm)
}

#[test]
fn add_and_print() {
    let mut memory = Memory::new();
    let (result, out, vm) = run("mov x0 5\nmov x1 3\nadd x2 x0 x1\nprint x2 d\n", &mut memory);
    result.unwrap();
    assert_eq!(out, "8\n");
    assert_eq!(&vm.registers()[..3], &[5, 3, 8]);
    assert!(!vm.had_error());
}

#[test]
fn branch_to_halt_label() {
    let mut memory = Memory::new();
    let (result, out, vm) = run("cmp x0 x0\nb.eq .end\nprint x0 d\n.end:\n", &mut memory);
    result.unwrap();
    assert_eq!(out, "");
    assert_eq!(vm.halt, Some(Halt::Finished));
    assert!(vm.flags().equal);
}

#[test]
fn put_and_print_string() {
    let mut memory = Memory::new();
    let (result, out, vm) = run("put \"hi\" 0\nprint 0 s\n", &mut memory);
    result.unwrap();
    assert_eq!(out, "hi\n");
    drop(vm);
    assert_eq!(&memory.as_bytes()[..3], b"hi\0");
    assert_eq!(
        memory.to_string(),
        "Memory state:\n0x000-0x00f:\n    0x000: 68690000 00000000 00000000 00000000 \n"
    );
}

#[test]
fn branch_to_missing_label() {
    let mut memory = Memory::new();
    let (result, out, vm) = run("b.eq missing\n", &mut memory);
    match result {
        Err(RuntimeError::Link(LinkError(labels))) => assert_eq!(labels, vec!["missing"]),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(out, "");
    assert!(vm.had_error());
    assert!(vm.to_string().starts_with("Error: 1\n"));
}

#[test]
fn missing_labels_are_reported_together() {
    let mut memory = Memory::new();
    let (result, out, _) = run("print 1 d\ncall f\nb.ne g\nb .ok\n", &mut memory);
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "unresolved label(s): f, g");
    assert_eq!(out, "");
}

#[test]
fn recursive_factorial() {
    let program = r#"
        mov x1 5
        call fact
        print x0 d
        b .exit

        // x0 = x1!
        fact:
            cmp x1 1
            b.gt recurse
            mov x0 1
            ret
        recurse:
            sub x1 x1 1
            call fact
            add x1 x1 1
            mov x2 0
            mov x3 0
        mul:
            add x2 x2 x0
            add x3 x3 1
            cmp x3 x1
            b.lt mul
            mov x0 0
            add x0 x0 x2
            ret
    "#;
    let mut memory = Memory::new();
    let (result, out, vm) = run(program, &mut memory);
    result.unwrap();
    assert_eq!(out, "120\n");
    assert_eq!(vm.registers()[1], 5);
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn memory_is_shared_between_runs() {
    let mut memory = Memory::with_capacity(64);
    let (result, _, _) = run("mov x1 0x0102\nstore x1 32 2", &mut memory);
    result.unwrap();

    let (result, out, vm) = run("load x0 2 32\nprint x0 x", &mut memory);
    result.unwrap();
    assert_eq!(out, "0x102\n");
    assert_eq!(vm.registers()[0], 0x102);
}

#[test]
fn out_of_bounds_store_is_fatal_and_leaves_memory_untouched() {
    let mut memory = Memory::with_capacity(32);
    let (result, out, vm) = run("print 1 d\nstore 0xffff 31 2\nprint 2 d", &mut memory);
    assert!(matches!(result, Err(RuntimeError::Memory(_))));
    assert_eq!(out, "1\n");
    assert!(vm.had_error());
    drop(vm);
    assert_eq!(memory.to_string(), "Memory state:\nUnmodified\n");
}

#[test]
fn parse_failure_reports_position_and_partial_program() {
    let failure = Parser::new("mov x0 1\nadd x1 x0\n").parse().unwrap_err();
    assert_eq!(failure.error.line, 2);
    assert_eq!(failure.partial.instructions.len(), 1);
    assert_eq!(failure.partial.to_string(), "   0: mov x0 1\n");
}

#[test]
fn non_ascii_string_round_trips() {
    let mut memory = Memory::new();
    let mut vm = Vm::load("put \"café\" 0\nprint 0 s", &mut memory).unwrap();
    let mut out = Vec::new();
    vm.run(&mut out).unwrap();
    assert_eq!(out, "café\n".as_bytes());
}

#[test]
fn statements_on_one_line() {
    let mut memory = Memory::new();
    let (result, out, _) = run("mov x0 2; lsl x0 x0 3; print x0 b", &mut memory);
    result.unwrap();
    assert_eq!(out, "0b10000\n");
}
