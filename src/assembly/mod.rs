//! Instruction-stream types shared by every detector.

pub mod instruction;

pub use instruction::{Code, Instruction, Operand};
