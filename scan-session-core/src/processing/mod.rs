pub mod assembler;
pub mod codec;
