pub mod code;
pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod pool;
pub mod stack_check;

pub use compile::{FunctionFailure, ModuleOutput, compile_unit};
pub use compile_error::GenerationError;
pub use ir::{CompiledClass, CompiledField, CompiledMethod, CompiledModule};
pub use op::Opcode;
pub use pool::{ConstantPool, PoolEntry};
