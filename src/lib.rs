//! Governance Action Sequencer
//!
//! Drives governance action processes: a process template is a graph of
//! governance action types joined by guard-labelled next-action edges. The
//! sequencer materializes one instance per step of a run, propagates
//! completion guards forward, enforces mandatory-guard joins at fan-in points
//! and arbitrates which engine may claim and complete each instance.
//!
//! Storage is delegated to a [`repository::MetadataRepository`]; every
//! lifecycle step is reported to an [`audit::AuditLog`].

pub mod action;
pub mod audit;
pub mod config;
pub mod error;
pub mod repository;
pub mod sequencer;
pub mod telemetry;
pub mod template;

pub use action::{
    ActionTarget, ActionTargetUpdate, CompletionReport, GovernanceAction, GovernanceActionStatus,
    InitiateActionTypeRequest, InitiateProcessRequest, NewActionTarget, NewRequestSource, Originator,
    RequestSource,
};
pub use audit::{AuditAction, AuditEntry, AuditLog, MemoryAuditLog, TracingAuditLog};
pub use config::{SequencerConfig, Settings};
pub use error::{ErrorCategory, SequencerError, SequencerResult};
pub use repository::{InMemoryRepository, MetadataRepository};
pub use sequencer::{CompletionOutcome, GovernanceActionSequencer};
pub use template::{ProcessGraph, ProcessTemplate, RegisteredTemplate};
