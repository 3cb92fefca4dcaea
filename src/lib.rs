//! Optimizer IR, pass pipeline, and amd64 SysV code generator core for
//! a standalone C compiler (spec.md §1).
//!
//! A front-end builds an [`ir::Module`] and its [`ir::Function`]
//! bodies; [`opt`] optimizes each function in place; [`isa::amd64`]
//! classifies its ABI surface; [`codegen`] lowers it through
//! [`asmcmp`] into one of [`codegen::xasmgen`]'s textual dialects.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod types;
pub mod util;

pub mod asmcmp;
pub mod codegen;

pub use config::{AbiVariant, Config, ConfigBuilder};
pub use error::{CoreError, ErrorKind, Result};
