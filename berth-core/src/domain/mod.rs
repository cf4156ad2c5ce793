//! Core domain types
//!
//! One module per deployment artifact. Every record is plain data: it can
//! be serialized, rendered by `berth-render` and checked by `berth-check`.

pub mod compose;
pub mod deployment;
pub mod entrypoint;
pub mod image;
pub mod pipeline;
pub mod stack;
