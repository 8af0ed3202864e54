//! Configuration module for dashplan
//!
//! Process-wide defaults live in [`DashplanConfig`], loaded from TOML and
//! optionally patched from the environment. Executor settings can be
//! overridden per plan through `ExecutionContext`.

pub mod types;

pub use types::*;
