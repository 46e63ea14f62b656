//! The pipeline's agents: the uniform lifecycle contract, per-agent
//! mailboxes, the three workers, and their supervisor.

pub mod agent;
pub mod analyzer;
pub mod collector;
pub mod mailbox;
pub mod manager;
pub mod processor;

pub use agent::{run_agent, Agent, AgentContext, AgentIdentity, AgentState, Lifecycle, SharedState};
pub use analyzer::AnalyzerAgent;
pub use collector::CollectorAgent;
pub use mailbox::{Mailbox, MailboxRouter, MailboxSender, Message, MessagePayload};
pub use manager::{AgentManager, AgentStatus};
pub use processor::ProcessorAgent;

/// Well-known agent ids used by the default pipeline wiring.
pub const COLLECTOR_ID: &str = "collector";
pub const PROCESSOR_ID: &str = "processor";
pub const ANALYZER_ID: &str = "analyzer";
