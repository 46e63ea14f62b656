//! Agent-based pipeline for collecting, processing, and analyzing
//! neighborhood data. Three long-lived agents (collector, processor,
//! analyzer) exchange batches through per-agent mailboxes under the
//! supervision of an [`agents::AgentManager`].

pub mod agents;
pub mod analyze;
pub mod cli;
pub mod collect;
pub mod config;
pub mod errors;
pub mod models;
pub mod process;
