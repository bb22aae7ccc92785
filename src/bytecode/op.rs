use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - Stack machine instruction set
// =============================================================================

/// One-byte opcodes. Operands follow the opcode byte big-endian; see
/// [`Opcode::operand_width`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,

    // constants
    Iconst0 = 0x03,
    Iconst1 = 0x04,
    Iconst2 = 0x05,
    Iconst3 = 0x06,
    Iconst4 = 0x07,
    Iconst5 = 0x08,
    Bipush = 0x10,
    Sipush = 0x11,
    Ldc = 0x12,
    LdcW = 0x13,

    // locals
    Load = 0x15,
    Store = 0x36,

    // stack ops
    Pop = 0x57,
    Dup = 0x59,
    DupX1 = 0x5a,

    // arithmetic
    Iadd = 0x60,
    Isub = 0x64,
    Imul = 0x68,
    Idiv = 0x6c,
    Irem = 0x70,
    Ineg = 0x74,

    // ==========================================================================
    // Jumps: 2-byte signed offset relative to the jump opcode's address
    // ==========================================================================
    Ifeq = 0x99,
    Ifne = 0x9a,
    IfIcmpeq = 0x9f,
    IfIcmpne = 0xa0,
    IfIcmplt = 0xa1,
    IfIcmpge = 0xa2,
    IfIcmpgt = 0xa3,
    IfIcmple = 0xa4,
    Goto = 0xa7,

    // returns
    Vreturn = 0xb0,
    Return = 0xb1,

    // members: 2-byte constant pool index
    Getfield = 0xb4,
    Putfield = 0xb5,
    Invokevirtual = 0xb6,
    Invokestatic = 0xb8,
}

impl Opcode {
    pub const ALL: [Opcode; 37] = [
        Opcode::Nop,
        Opcode::Iconst0,
        Opcode::Iconst1,
        Opcode::Iconst2,
        Opcode::Iconst3,
        Opcode::Iconst4,
        Opcode::Iconst5,
        Opcode::Bipush,
        Opcode::Sipush,
        Opcode::Ldc,
        Opcode::LdcW,
        Opcode::Load,
        Opcode::Store,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::DupX1,
        Opcode::Iadd,
        Opcode::Isub,
        Opcode::Imul,
        Opcode::Idiv,
        Opcode::Irem,
        Opcode::Ineg,
        Opcode::Ifeq,
        Opcode::Ifne,
        Opcode::IfIcmpeq,
        Opcode::IfIcmpne,
        Opcode::IfIcmplt,
        Opcode::IfIcmpge,
        Opcode::IfIcmpgt,
        Opcode::IfIcmple,
        Opcode::Goto,
        Opcode::Vreturn,
        Opcode::Return,
        Opcode::Getfield,
        Opcode::Putfield,
        Opcode::Invokevirtual,
        Opcode::Invokestatic,
    ];

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Self::ALL.iter().copied().find(|op| op.byte() == byte)
    }

    /// `ICONST_n` for `n` in `0..=5`.
    pub fn iconst(n: i32) -> Option<Opcode> {
        Some(match n {
            0 => Opcode::Iconst0,
            1 => Opcode::Iconst1,
            2 => Opcode::Iconst2,
            3 => Opcode::Iconst3,
            4 => Opcode::Iconst4,
            5 => Opcode::Iconst5,
            _ => return None,
        })
    }

    /// Number of operand bytes following the opcode.
    pub fn operand_width(self) -> usize {
        use Opcode::*;
        match self {
            Bipush | Ldc | Load | Store => 1,
            Sipush | LdcW | Getfield | Putfield | Invokevirtual | Invokestatic => 2,
            op if op.is_jump() => 2,
            _ => 0,
        }
    }

    pub fn is_jump(self) -> bool {
        self == Opcode::Goto || self.is_conditional_jump()
    }

    pub fn is_conditional_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Ifeq | Ifne | IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple
        )
    }

    /// Instructions after which control never falls through.
    pub fn ends_flow(self) -> bool {
        matches!(self, Opcode::Goto | Opcode::Vreturn | Opcode::Return)
    }

    /// The conditional jump taken exactly when `self` is not.
    pub fn negate(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            Ifeq => Ifne,
            Ifne => Ifeq,
            IfIcmpeq => IfIcmpne,
            IfIcmpne => IfIcmpeq,
            IfIcmplt => IfIcmpge,
            IfIcmpge => IfIcmplt,
            IfIcmpgt => IfIcmple,
            IfIcmple => IfIcmpgt,
            _ => return None,
        })
    }

    /// Returns (pops, pushes), or None when the effect depends on the
    /// invoked method's descriptor.
    pub fn stack_effect(self) -> Option<(u16, u16)> {
        use Opcode::*;
        Some(match self {
            Nop => (0, 0),

            Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5 => (0, 1),
            Bipush | Sipush | Ldc | LdcW => (0, 1),

            Load => (0, 1),
            Store => (1, 0),

            Pop => (1, 0),
            Dup => (1, 2),
            DupX1 => (2, 3),

            Iadd | Isub | Imul | Idiv | Irem => (2, 1),
            Ineg => (1, 1),

            Ifeq | Ifne => (1, 0),
            IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple => (2, 0),
            Goto => (0, 0),

            Vreturn => (1, 0),
            Return => (0, 0),

            Getfield => (1, 1),
            Putfield => (2, 0),

            Invokevirtual | Invokestatic => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Iconst0 => "ICONST_0",
            Iconst1 => "ICONST_1",
            Iconst2 => "ICONST_2",
            Iconst3 => "ICONST_3",
            Iconst4 => "ICONST_4",
            Iconst5 => "ICONST_5",
            Bipush => "BIPUSH",
            Sipush => "SIPUSH",
            Ldc => "LDC",
            LdcW => "LDC_W",
            Load => "LOAD",
            Store => "STORE",
            Pop => "POP",
            Dup => "DUP",
            DupX1 => "DUP_X1",
            Iadd => "IADD",
            Isub => "ISUB",
            Imul => "IMUL",
            Idiv => "IDIV",
            Irem => "IREM",
            Ineg => "INEG",
            Ifeq => "IFEQ",
            Ifne => "IFNE",
            IfIcmpeq => "IF_ICMPEQ",
            IfIcmpne => "IF_ICMPNE",
            IfIcmplt => "IF_ICMPLT",
            IfIcmpge => "IF_ICMPGE",
            IfIcmpgt => "IF_ICMPGT",
            IfIcmple => "IF_ICMPLE",
            Goto => "GOTO",
            Vreturn => "VRETURN",
            Return => "RETURN",
            Getfield => "GETFIELD",
            Putfield => "PUTFIELD",
            Invokevirtual => "INVOKEVIRTUAL",
            Invokestatic => "INVOKESTATIC",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub address: usize,
    pub opcode: Opcode,
    /// Raw operand: zero-extended for one-byte operands, big-endian for
    /// two-byte operands.
    pub operand: u16,
}

impl Instruction {
    pub fn width(&self) -> usize {
        1 + self.opcode.operand_width()
    }

    /// Jump target for jump instructions.
    pub fn target(&self) -> Option<usize> {
        if !self.opcode.is_jump() {
            return None;
        }
        let offset = self.operand as i16 as i64;
        usize::try_from(self.address as i64 + offset).ok()
    }

    /// Operand reinterpreted as the signed immediate of BIPUSH/SIPUSH.
    pub fn immediate(&self) -> i32 {
        match self.opcode {
            Opcode::Bipush => self.operand as u8 as i8 as i32,
            _ => self.operand as i16 as i32,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unknown opcode 0x{byte:02x} at {address}")]
    UnknownOpcode { byte: u8, address: usize },
    #[error("{opcode} at {address} is missing its operand")]
    Truncated { opcode: Opcode, address: usize },
}

/// Splits method code into instructions.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut address = 0;

    while address < code.len() {
        let byte = code[address];
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, address })?;

        let operand = match opcode.operand_width() {
            0 => 0,
            1 => *code
                .get(address + 1)
                .ok_or(DecodeError::Truncated { opcode, address })? as u16,
            _ => match code.get(address + 1..address + 3) {
                Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
                _ => return Err(DecodeError::Truncated { opcode, address }),
            },
        };

        let instruction = Instruction {
            address,
            opcode,
            operand,
        };
        address += instruction.width();
        instructions.push(instruction);
    }

    Ok(instructions)
}
