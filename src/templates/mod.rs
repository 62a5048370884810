//! Embedded templates for codebox files.

/// Default `codebox.toml` configuration.
pub(crate) const CODEBOX_TOML: &str = include_str!("codebox.toml");

/// Kernel driver executed by the interpreter (`python -u -c`).
pub(crate) const KERNEL_DRIVER: &str = include_str!("driver.py");

/// Dockerfile for the kernel image.
pub(crate) const KERNEL_DOCKERFILE: &str = include_str!("Dockerfile");
