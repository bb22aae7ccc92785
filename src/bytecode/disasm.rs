use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::bytecode::ir::{CompiledMethod, CompiledModule};
use crate::bytecode::op::{Instruction, Opcode, decode};
use crate::bytecode::pool::ConstantPool;

/// Print disassembly of a whole module
pub fn print_module(module: &CompiledModule) {
    print!("{}", disassemble_module(module));
}

/// Return disassembly of a module as a String: pool first, then every class.
pub fn disassemble_module(module: &CompiledModule) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "=== MODULE {} (version {}.{}) ===\n",
        module.pool.class_name(module.this_class).unwrap_or("?"),
        module.major_version,
        module.minor_version
    );

    output.push_str(&disassemble_pool(&module.pool));
    output.push('\n');

    for class in &module.classes {
        let _ = writeln!(output, "class {}", class.name);
        for field in &class.fields {
            let _ = writeln!(output, "  field {}", field.name);
        }
        output.push('\n');
        for method in &class.methods {
            output.push_str(&disassemble_method(method, &module.pool));
            output.push('\n');
        }
    }

    output
}

pub fn disassemble_pool(pool: &ConstantPool) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "constant pool ({} entries)", pool.len());
    for (index, entry) in pool.iter() {
        let _ = writeln!(
            output,
            "  #{:<4} {:<12} {}",
            index,
            entry.kind_name(),
            pool.describe(index)
        );
    }
    output
}

/// Header box plus listing for one method
pub fn disassemble_method(method: &CompiledMethod, pool: &ConstantPool) -> String {
    let mut output = String::new();
    let flags = if method.is_static() { "static " } else { "" };

    output.push_str("════════════════════════════════════════\n");
    let _ = writeln!(output, " {}{}{}", flags, method.name, method.descriptor);
    let _ = writeln!(
        output,
        " {} bytes, max_stack {}, max_locals {}",
        method.code.len(),
        method.max_stack,
        method.max_locals
    );
    output.push_str("════════════════════════════════════════\n");
    output.push_str(&disassemble_code(&method.code, pool));
    output
}

/// Return disassembly of raw method code as a String
pub fn disassemble_code(code: &[u8], pool: &ConstantPool) -> String {
    let instructions = match decode(code) {
        Ok(instructions) => instructions,
        Err(error) => return format!("<undecodable: {}>\n", error),
    };
    let jump_targets = collect_jump_targets(&instructions);
    let mut output = String::new();

    for instruction in &instructions {
        let is_target = jump_targets.contains(&instruction.address);
        if is_target {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        let _ = write!(output, "{:04} ", instruction.address);
        output.push_str(if is_target { "► " } else { "  " });
        output.push_str(&format_instruction(instruction, pool));
        output.push('\n');
    }

    output
}

fn collect_jump_targets(instructions: &[Instruction]) -> HashSet<usize> {
    instructions
        .iter()
        .filter_map(|instruction| instruction.target())
        .collect()
}

fn format_instruction(instruction: &Instruction, pool: &ConstantPool) -> String {
    let name = instruction.opcode.mnemonic();
    let index = instruction.operand;

    match instruction.opcode {
        Opcode::Bipush | Opcode::Sipush => format!("{:<14}{}", name, instruction.immediate()),

        Opcode::Ldc | Opcode::LdcW => format!("{:<14}#{:<6}; {}", name, index, pool.describe(index)),

        Opcode::Load => format!("{:<14}{:<7}; ( -- v )", name, index),
        Opcode::Store => format!("{:<14}{:<7}; ( v -- )", name, index),

        op if op.is_jump() => {
            let offset = index as i16;
            let direction = if offset < 0 { "↑" } else { "↓" };
            let target = instruction.target().unwrap_or(0);
            format!("{:<14}{:+} {} (→ {:04})", name, offset, direction, target)
        }

        Opcode::Getfield => format!("{:<14}#{:<6}; ( obj -- v ) {}", name, index, pool.describe(index)),
        Opcode::Putfield => format!("{:<14}#{:<6}; ( obj v -- ) {}", name, index, pool.describe(index)),
        Opcode::Invokestatic | Opcode::Invokevirtual => {
            format!("{:<14}#{:<6}; {}", name, index, pool.describe(index))
        }

        op => match stack_comment(op) {
            Some(comment) => format!("{:<21}; {}", name, comment),
            None => name.to_string(),
        },
    }
}

fn stack_comment(op: Opcode) -> Option<&'static str> {
    use Opcode::*;
    Some(match op {
        Pop => "( a -- )",
        Dup => "( a -- a a )",
        DupX1 => "( a b -- b a b )",
        Iadd => "( a b -- a+b )",
        Isub => "( a b -- a-b )",
        Imul => "( a b -- a*b )",
        Idiv => "( a b -- a/b )",
        Irem => "( a b -- a%b )",
        Ineg => "( a -- -a )",
        Vreturn => "( v -- )",
        _ => return None,
    })
}

// =============================================================================
// Statistics
// =============================================================================

/// Print bytecode statistics
pub fn print_module_stats(module: &CompiledModule) {
    print!("{}", module_stats(module));
}

pub fn module_stats(module: &CompiledModule) -> String {
    let mut output = String::new();
    output.push_str("=== BYTECODE STATISTICS ===\n\n");

    let methods: Vec<&CompiledMethod> = module.classes.iter().flat_map(|class| &class.methods).collect();
    let code_bytes: usize = methods.iter().map(|method| method.code.len()).sum();

    let _ = writeln!(output, "Classes:          {}", module.classes.len());
    let _ = writeln!(output, "Methods:          {}", methods.len());
    let _ = writeln!(output, "Pool entries:     {}", module.pool.len());
    let _ = writeln!(output, "Code bytes:       {}", code_bytes);
    output.push('\n');

    let counts = count_opcodes(&methods);
    let total: usize = counts.values().sum();
    if total == 0 {
        return output;
    }

    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    output.push_str("Op frequency:\n");
    for (op, count) in ranked.iter().take(10) {
        let pct = (*count as f64 / total as f64) * 100.0;
        let _ = writeln!(output, "  {:<14} {:>4} ({:>5.1}%)", op, count, pct);
    }
    output
}

fn count_opcodes(methods: &[&CompiledMethod]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for method in methods {
        // undecodable code is reported by the listing, not counted here
        let Ok(instructions) = decode(&method.code) else {
            continue;
        };
        for instruction in instructions {
            *counts.entry(instruction.opcode.mnemonic()).or_insert(0) += 1;
        }
    }
    counts
}
