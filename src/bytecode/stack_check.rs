use std::collections::HashMap;

use crate::bytecode::ir::{CompiledMethod, CompiledModule};
use crate::bytecode::op::{DecodeError, Instruction, Opcode, decode};
use crate::bytecode::pool::ConstantPool;
use crate::resolve::parse_method_descriptor;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StackCheckError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("stack underflow at {address:04}: {opcode} needs {needed}, found {found}")]
    Underflow {
        address: usize,
        opcode: Opcode,
        needed: u16,
        found: u16,
    },

    #[error("stack depth at {address:04} is {found} on one path and {expected} on another")]
    DepthMismatch { address: usize, expected: u16, found: u16 },

    #[error("jump at {address:04} does not land on an instruction")]
    BadJumpTarget { address: usize },

    #[error("{opcode} at {address:04} refers to #{index}, which is not a method")]
    BadMethodRef { address: usize, opcode: Opcode, index: u16 },

    #[error("control runs off the end of the code")]
    FallsOffEnd,

    #[error("declared max_stack {declared} is below the computed {computed}")]
    MaxStackTooSmall { declared: u16, computed: u16 },

    #[error("'{descriptor}' is not a method descriptor")]
    BadDescriptor { descriptor: String },

    #[error("{opcode} at {address:04} does not match the method's return type")]
    WrongReturn { address: usize, opcode: Opcode },
}

/// Follows every path through `code` and returns the largest stack depth
/// reached.
///
/// Each instruction must be entered with the same depth on every path, no
/// instruction may pop more than the stack holds, and every path must end in
/// a return matching `descriptor`: VRETURN in `...)A` methods, RETURN in
/// `...)V` ones. Invoke effects come from the method descriptor in `pool`.
pub fn check_code(code: &[u8], descriptor: &str, pool: &ConstantPool) -> Result<u16, StackCheckError> {
    let (_, returns_value) = parse_method_descriptor(descriptor).ok_or_else(|| StackCheckError::BadDescriptor {
        descriptor: descriptor.to_string(),
    })?;
    let expected_return = if returns_value { Opcode::Vreturn } else { Opcode::Return };

    let instructions = decode(code)?;
    if instructions.is_empty() {
        return Err(StackCheckError::FallsOffEnd);
    }
    let by_address: HashMap<usize, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, instruction)| (instruction.address, i))
        .collect();

    let mut depths: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut worklist = vec![(0usize, 0u16)];
    let mut max_depth = 0u16;

    while let Some((ip, depth)) = worklist.pop() {
        match depths[ip] {
            Some(expected) if expected == depth => continue,
            Some(expected) => {
                return Err(StackCheckError::DepthMismatch {
                    address: instructions[ip].address,
                    expected,
                    found: depth,
                });
            }
            None => depths[ip] = Some(depth),
        }

        let instruction = &instructions[ip];
        let (pops, pushes) = effect(instruction, pool)?;
        if depth < pops {
            return Err(StackCheckError::Underflow {
                address: instruction.address,
                opcode: instruction.opcode,
                needed: pops,
                found: depth,
            });
        }
        if matches!(instruction.opcode, Opcode::Vreturn | Opcode::Return) && instruction.opcode != expected_return {
            return Err(StackCheckError::WrongReturn {
                address: instruction.address,
                opcode: instruction.opcode,
            });
        }
        let after = depth - pops + pushes;
        max_depth = max_depth.max(after);

        if instruction.opcode.is_jump() {
            let target = instruction
                .target()
                .and_then(|target| by_address.get(&target))
                .ok_or(StackCheckError::BadJumpTarget {
                    address: instruction.address,
                })?;
            worklist.push((*target, after));
        }
        if !instruction.opcode.ends_flow() {
            if ip + 1 == instructions.len() {
                return Err(StackCheckError::FallsOffEnd);
            }
            worklist.push((ip + 1, after));
        }
    }

    Ok(max_depth)
}

/// Checks a method and its declared `max_stack`.
pub fn check_method(method: &CompiledMethod, pool: &ConstantPool) -> Result<u16, StackCheckError> {
    let computed = check_code(&method.code, &method.descriptor, pool)?;
    if method.max_stack < computed {
        return Err(StackCheckError::MaxStackTooSmall {
            declared: method.max_stack,
            computed,
        });
    }
    Ok(computed)
}

/// Checks every method of every class, stopping at the first failure.
pub fn check_module(module: &CompiledModule) -> Result<(), (String, StackCheckError)> {
    for class in &module.classes {
        for method in &class.methods {
            check_method(method, &module.pool).map_err(|error| (format!("{}.{}", class.name, method.name), error))?;
        }
    }
    Ok(())
}

fn effect(instruction: &Instruction, pool: &ConstantPool) -> Result<(u16, u16), StackCheckError> {
    if let Some(effect) = instruction.opcode.stack_effect() {
        return Ok(effect);
    }

    let bad_ref = || StackCheckError::BadMethodRef {
        address: instruction.address,
        opcode: instruction.opcode,
        index: instruction.operand,
    };
    let (_, _, descriptor) = pool.member(instruction.operand).ok_or_else(bad_ref)?;
    let (arity, returns_value) = parse_method_descriptor(descriptor).ok_or_else(bad_ref)?;
    let receiver = usize::from(instruction.opcode == Opcode::Invokevirtual);
    let pops = u16::try_from(arity + receiver).map_err(|_| bad_ref())?;
    Ok((pops, u16::from(returns_value)))
}
