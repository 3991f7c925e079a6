//! Chronicle - historical event timelines for Obsidian
//!
//! Chronicle asks a chat-completion model about historical events one
//! time window at a time and stores each answer as a Markdown note in an
//! Obsidian vault. Event-list notes can then be expanded into per-event
//! detail notes that are linked back from the list.

pub mod config;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod timeline;
pub mod vault;
