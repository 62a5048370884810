//! CLI command implementations.
//!
//! Each submodule implements one codebox subcommand, keeping parsing and
//! rendering helpers pure where the IO allows.

pub mod exec;
pub mod image;
pub mod init;
pub mod restart;
pub mod serve;
pub mod status;
