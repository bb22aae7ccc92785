use crate::bytecode::compile_error::GenerationError;
use crate::bytecode::op::Opcode;

/// Largest method body the artifact format accepts.
pub const MAX_CODE_SIZE: usize = u16::MAX as usize;

/// Local slots addressable by the one-byte LOAD/STORE operand.
pub const MAX_LOCALS: usize = 256;

/// Handle to a jump target inside one [`CodeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelSlot {
    address: Option<usize>,
    /// Stack depth on entry, taken from the first jump that reaches it.
    depth: Option<i32>,
}

#[derive(Debug)]
struct PendingJump {
    label: Label,
    /// Address of the jump opcode; the offset goes in the next two bytes.
    at: usize,
}

/// Finished bytecode for one method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCode {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Byte buffer for one method body.
///
/// Forward jumps are emitted with a placeholder offset and patched when
/// their label is marked. The buffer also simulates the operand stack so
/// that `max_stack` falls out of emission: depth follows each
/// instruction's effect, stops being tracked after GOTO and returns, and
/// resumes at a marked label with the depth its jumps recorded.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    labels: Vec<LabelSlot>,
    pending: Vec<PendingJump>,
    depth: i32,
    unreachable: bool,
    max_stack: i32,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the next instruction will occupy.
    pub fn address(&self) -> usize {
        self.code.len()
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn is_reachable(&self) -> bool {
        !self.unreachable
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelSlot::default());
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current address and patches every jump waiting
    /// on it.
    pub fn mark(&mut self, label: Label) -> Result<(), GenerationError> {
        let address = self.address();
        let slot = &mut self.labels[label.0];
        if slot.address.is_some() {
            return Err(GenerationError::LabelAlreadyMarked);
        }
        slot.address = Some(address);

        if self.unreachable {
            self.depth = slot.depth.unwrap_or(0);
            self.unreachable = false;
        } else {
            slot.depth.get_or_insert(self.depth);
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|jump| jump.label == label);
        self.pending = waiting;
        for jump in ready {
            self.patch(jump.at, address)?;
        }
        Ok(())
    }

    /// Emits an instruction without operands.
    pub fn emit(&mut self, op: Opcode) -> Result<(), GenerationError> {
        debug_assert_eq!(op.operand_width(), 0, "{} takes an operand", op);
        self.simulate(op)?;
        self.code.push(op.byte());
        self.end_flow_after(op);
        Ok(())
    }

    pub fn emit_u8(&mut self, op: Opcode, operand: u8) -> Result<(), GenerationError> {
        debug_assert_eq!(op.operand_width(), 1, "{} takes a one-byte operand", op);
        self.simulate(op)?;
        self.code.push(op.byte());
        self.code.push(operand);
        Ok(())
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16) -> Result<(), GenerationError> {
        debug_assert_eq!(op.operand_width(), 2, "{} takes a two-byte operand", op);
        self.simulate(op)?;
        self.code.push(op.byte());
        self.code.extend_from_slice(&operand.to_be_bytes());
        Ok(())
    }

    /// Emits INVOKESTATIC/INVOKEVIRTUAL. `pops` counts the arguments plus the
    /// receiver, if any.
    pub fn emit_invoke(
        &mut self,
        op: Opcode,
        method_ref: u16,
        pops: u16,
        returns_value: bool,
    ) -> Result<(), GenerationError> {
        self.adjust(i32::from(pops), i32::from(returns_value))?;
        self.code.push(op.byte());
        self.code.extend_from_slice(&method_ref.to_be_bytes());
        Ok(())
    }

    /// Emits a jump to `label`. Backward jumps are resolved immediately;
    /// forward jumps wait for [`CodeBuffer::mark`].
    pub fn emit_jump(&mut self, op: Opcode, label: Label) -> Result<(), GenerationError> {
        debug_assert!(op.is_jump(), "{} is not a jump", op);
        self.simulate(op)?;
        if !self.unreachable {
            self.labels[label.0].depth.get_or_insert(self.depth);
        }

        let at = self.address();
        self.code.push(op.byte());
        self.code.extend_from_slice(&[0, 0]);
        self.end_flow_after(op);

        match self.labels[label.0].address {
            Some(target) => self.patch(at, target),
            None => {
                self.pending.push(PendingJump { label, at });
                Ok(())
            }
        }
    }

    /// Verifies every label was bound and hands out the finished code.
    pub fn finish(self, max_locals: usize) -> Result<MethodCode, GenerationError> {
        if !self.pending.is_empty() {
            return Err(GenerationError::UnmarkedLabel);
        }
        if self.code.len() > MAX_CODE_SIZE {
            return Err(GenerationError::CodeTooLarge {
                size: self.code.len(),
            });
        }
        if max_locals > MAX_LOCALS {
            return Err(GenerationError::TooManyLocals { count: max_locals });
        }

        Ok(MethodCode {
            code: self.code,
            max_stack: u16::try_from(self.max_stack).unwrap_or(u16::MAX),
            max_locals: max_locals as u16,
        })
    }

    fn patch(&mut self, at: usize, target: usize) -> Result<(), GenerationError> {
        let offset = i16::try_from(target as i64 - at as i64)
            .map_err(|_| GenerationError::JumpOutOfRange { from: at, to: target })?;
        self.code[at + 1..at + 3].copy_from_slice(&offset.to_be_bytes());
        Ok(())
    }

    fn simulate(&mut self, op: Opcode) -> Result<(), GenerationError> {
        let (pops, pushes) = op.stack_effect().unwrap_or((0, 0));
        self.adjust(i32::from(pops), i32::from(pushes))
    }

    fn end_flow_after(&mut self, op: Opcode) {
        if op.ends_flow() {
            self.unreachable = true;
            self.depth = 0;
        }
    }

    fn adjust(&mut self, pops: i32, pushes: i32) -> Result<(), GenerationError> {
        if self.unreachable {
            return Ok(());
        }
        if self.depth < pops {
            return Err(GenerationError::StackUnderflow {
                address: self.address(),
            });
        }
        self.depth += pushes - pops;
        self.max_stack = self.max_stack.max(self.depth);
        Ok(())
    }
}
