use kiln::bytecode::disasm::disassemble_module;
use kiln::bytecode::op::{Instruction, Opcode, decode};
use kiln::bytecode::stack_check::{check_method, check_module};
use kiln::bytecode::{CompiledMethod, CompiledModule, GenerationError, PoolEntry};
use kiln::emit::{load_artifact, read_artifact};
use kiln::{CompileSession, CompilerConfig, Diagnostic};

const PROGRAM: &str = r#"
class Counter {
    count = 0
    step = 2
    def bump() {
        count = count + step
        return count
    }
}

def fib(n) {
    if (n < 2) { return n }
    return fib(n - 1) + fib(n - 2)
}

def churn(n) {
    total = 0
    for (i = 0; i < n; i = i + 1) {
        if (i % 2 == 0 && i != 4) { total = total + i } else { total = total - 1 }
    }
    while (total > 100) { total = total / 2 }
    return total
}

print(fib(10))
print(churn(20))
println("done")
"#;

fn compile(source: &str) -> (CompiledModule, Vec<Diagnostic>) {
    let output = CompileSession::new().compile(source);
    (output.module.expect("module"), output.diagnostics)
}

fn instructions(method: &CompiledMethod) -> Vec<Instruction> {
    decode(&method.code).expect("decodes")
}

fn count(method: &CompiledMethod, opcode: Opcode) -> usize {
    instructions(method).iter().filter(|i| i.opcode == opcode).count()
}

#[test]
fn test_add_is_invoke_free_with_two_slots() {
    let (module, diagnostics) = compile("def add(a, b) { return a + b }");
    assert!(diagnostics.is_empty());

    let add = module.method("Main", "add").expect("add");
    assert_eq!(add.max_locals, 2);
    assert_eq!(count(add, Opcode::Iadd), 1);
    assert_eq!(count(add, Opcode::Vreturn), 1);
    assert_eq!(count(add, Opcode::Invokestatic) + count(add, Opcode::Invokevirtual), 0);
}

#[test]
fn test_repeated_string_literal_shares_pool_entry() {
    let (module, _) = compile("print(\"abc\")\nprint(\"abc\")");

    let strings: Vec<u16> = module
        .pool
        .iter()
        .filter(|(_, entry)| matches!(entry, PoolEntry::String { .. }))
        .map(|(index, _)| index)
        .collect();
    assert_eq!(strings.len(), 1);
    let abc = module
        .pool
        .entries()
        .iter()
        .filter(|entry| **entry == PoolEntry::Utf8("abc".into()))
        .count();
    assert_eq!(abc, 1);

    let main = module.method("Main", "<main>").unwrap();
    let refs: Vec<u16> = instructions(main)
        .iter()
        .filter(|i| i.opcode == Opcode::Ldc)
        .map(|i| i.operand)
        .collect();
    assert_eq!(refs, vec![strings[0], strings[0]]);
}

#[test]
fn test_missing_paren_reports_one_syntax_error() {
    let output = CompileSession::new().compile("def f( { return 1 }");
    assert_eq!(output.diagnostics.len(), 1, "{:?}", output.diagnostics);
    match &output.diagnostics[0] {
        Diagnostic::Syntax(error) => assert_eq!((error.line, error.column), (1, 8)),
        other => panic!("expected a syntax error, got {:?}", other),
    }
    assert!(output.failed());
    let module = output.module.expect("best-effort module");
    assert!(module.method("Main", "f").is_some());
}

#[test]
fn test_failing_function_does_not_stop_siblings() {
    let source = "def broken() { return nowhere }\ndef fine(x) { return x * 2 }\nprint(fine(4))";
    let (module, diagnostics) = compile(source);

    assert_eq!(diagnostics.len(), 1);
    match &diagnostics[0] {
        Diagnostic::Generation { function, error } => {
            assert_eq!(function, "broken");
            assert!(matches!(error, GenerationError::UndefinedVariable { name, .. } if name == "nowhere"));
        }
        other => panic!("unexpected diagnostic {:?}", other),
    }
    assert!(module.method("Main", "broken").is_none());
    assert!(module.method("Main", "fine").is_some());
    assert!(module.method("Main", "<main>").is_some());
}

#[test]
fn test_constant_folding_reaches_codegen() {
    let (module, _) = compile("def a() { return 2 + 3 * 4 }\ndef b() { return (2 + 3) * 4 }");
    let a = instructions(module.method("Main", "a").unwrap());
    assert_eq!(a[0].opcode, Opcode::Bipush);
    assert_eq!(a[0].immediate(), 14);
    assert_eq!(a.len(), 2);

    let b = instructions(module.method("Main", "b").unwrap());
    assert_eq!(b[0].immediate(), 20);
}

#[test]
fn test_folding_can_be_disabled_from_toml() {
    let config = CompilerConfig::from_toml_str("module_name = \"Demo\"\nfold_constants = false\n").unwrap();
    let output = CompileSession::with_config(config).compile("print(1 + 2)");
    let module = output.module.unwrap();
    let main = module.method("Demo", "<main>").expect("main in the configured module class");
    assert_eq!(count(main, Opcode::Iadd), 1);
}

#[test]
fn test_dead_code_is_not_emitted() {
    let (module, diagnostics) = compile("def f(x) {\n return 1\n print(x)\n}");
    assert!(diagnostics.is_empty());
    let f = module.method("Main", "f").unwrap();
    assert_eq!(f.code, vec![Opcode::Iconst1.byte(), Opcode::Vreturn.byte()]);
}

#[test]
fn test_generated_code_passes_stack_check() {
    let (module, diagnostics) = compile(PROGRAM);
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert_eq!(check_module(&module), Ok(()));

    for class in &module.classes {
        for method in &class.methods {
            let computed = check_method(method, &module.pool).unwrap();
            assert_eq!(computed, method.max_stack, "{}.{}", class.name, method.name);
        }
    }
}

#[test]
fn test_module_layout() {
    let (module, _) = compile(PROGRAM);

    let names: Vec<&str> = module.classes.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Main", "Counter"]);

    let main_class = module.module_class().unwrap();
    let methods: Vec<&str> = main_class.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(methods, vec!["fib", "churn", "<main>"]);
    assert!(main_class.methods.iter().all(|m| m.is_static()));

    let counter = module.class("Counter").unwrap();
    let fields: Vec<&str> = counter.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(fields, vec!["count", "step"]);
    let bump = counter.method("bump").unwrap();
    assert!(!bump.is_static());
    assert_eq!(bump.descriptor, "()A");
    assert_eq!(bump.max_locals, 1);
}

#[test]
fn test_artifact_round_trip() {
    let (module, _) = compile(PROGRAM);
    let bytes = module.to_bytes().unwrap();

    let image = read_artifact(&bytes).unwrap();
    assert_eq!(image.classes.len(), 2);
    assert_eq!(image.pool.len(), module.pool.len());

    assert_eq!(load_artifact(&bytes).unwrap(), module);
}

#[test]
fn test_snapshot_round_trip() {
    let (module, _) = compile(PROGRAM);
    let snapshot = module.to_snapshot().unwrap();
    assert_eq!(CompiledModule::from_snapshot(&snapshot).unwrap(), module);
}

#[test]
fn test_disassembly_lists_every_method() {
    let (module, _) = compile(PROGRAM);
    let listing = disassemble_module(&module);
    for name in ["static fib(A)A", "static churn(A)A", "static <main>()V", "bump()A", "<init>()V"] {
        assert!(listing.contains(name), "missing {}", name);
    }
    assert!(listing.contains("kiln/Builtins.println:(A)V"));
}
