//! Everything between the AST and code generation. The resolver turns an AST
//! into a [`program::Program`], transforms rewrite programs, and the IR
//! builder lowers a valid program into [`ir::Module`] for optimization and
//! SPIR-V generation.

pub mod builtin;
pub mod constant;
pub mod interface;
pub mod ir;
pub mod optimization;
pub mod program;
pub mod resolve;
pub mod transform;
pub mod ty;
