//! Governance action process templates
//!
//! A process is a graph of governance action types joined by guard-labelled
//! next-action edges. Templates are authored as [`ProcessTemplate`] DTOs,
//! registered into the metadata repository and read back as a
//! [`ProcessGraph`] whenever the sequencer needs them.

pub mod dto;
pub mod graph;
pub mod properties;
pub mod registry;

pub use dto::{ActionTypeDefinition, EntryPoint, ExecutorDefinition, NextActionDefinition, ProcessTemplate};
pub use graph::{guard_matches, ActionTypeNode, Executor, NextActionEdge, ProcessEntry, ProcessGraph, TriggeredEdge};
pub use registry::{register_process_template, RegisteredTemplate};
