//! CLI commands for Chronicle.
//!
//! Each submodule implements a single CLI command with its argument
//! parsing and execution logic.

/// Interactive segmented timeline collection.
pub mod collect;

/// Detail-note generation for collected event lists.
pub mod details;

/// Show the resolved configuration.
pub mod env;
