//! Governance action instances
//!
//! Status state machine, typed views over stored instances and their
//! relationships, and the request DTOs callers send to the sequencer.

pub mod models;
pub mod requests;
pub mod status;

pub use models::*;
pub use requests::*;
pub use status::GovernanceActionStatus;
