//! Command-line interface for Chronicle.
//!
//! Wires the collection and detail pipelines to an interactive terminal
//! session, plus a small command for inspecting the resolved settings.

/// Individual CLI command implementations.
pub mod commands;
