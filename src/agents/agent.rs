//! The uniform agent contract: identity, lifecycle state, a mailbox, and
//! the initialize / process / cleanup cycle driven by [`run_agent`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::mailbox::{Mailbox, MailboxRouter, Message, MessagePayload};
use crate::errors::PulseError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub name: String,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Created,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable record owned by its agent. The manager only reads snapshots;
/// it never reaches into these fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub lifecycle: Lifecycle,
    pub last_activity: DateTime<Utc>,
    pub internal: HashMap<String, Value>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Created,
            last_activity: Utc::now(),
            internal: HashMap::new(),
        }
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedState = Arc<RwLock<AgentState>>;

/// Everything an agent touches while running: its own mailbox, the router
/// for outbound messages, and its state record.
pub struct AgentContext {
    identity: AgentIdentity,
    mailbox: Mailbox,
    router: MailboxRouter,
    state: SharedState,
}

impl AgentContext {
    pub fn new(
        identity: AgentIdentity,
        mailbox: Mailbox,
        router: MailboxRouter,
        state: SharedState,
    ) -> Self {
        Self {
            identity,
            mailbox,
            router,
            state,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Enqueue a payload for another agent. Fire-and-forget; delivery
    /// problems are the router's to log, never the sender's to handle.
    pub fn send(&self, to: &str, payload: MessagePayload) {
        self.router
            .route(Message::new(self.identity.id.clone(), to, payload));
    }

    pub fn receive(&mut self) -> Option<Message> {
        self.mailbox.receive()
    }

    /// Drain the mailbox, oldest first.
    pub fn drain(&mut self) -> Vec<Message> {
        self.mailbox.drain()
    }

    pub async fn set_internal(&self, key: impl Into<String>, value: Value) {
        let mut state = self.state.write().await;
        state.internal.insert(key.into(), value);
        state.last_activity = Utc::now();
    }
}

/// Contract every pipeline worker implements. The runtime owns the loop
/// cadence; implementations only provide the three lifecycle methods.
#[async_trait]
pub trait Agent: Send + Sync {
    fn identity(&self) -> &AgentIdentity;

    /// Suspension between `process` cycles. A stop request is observed at
    /// least once per this interval.
    fn idle_interval(&self) -> Duration;

    async fn initialize(&mut self, ctx: &mut AgentContext) -> Result<(), PulseError>;

    async fn process(&mut self, ctx: &mut AgentContext) -> Result<(), PulseError>;

    async fn cleanup(&mut self, ctx: &mut AgentContext) -> Result<(), PulseError>;
}

async fn set_lifecycle(state: &SharedState, lifecycle: Lifecycle) {
    let mut s = state.write().await;
    s.lifecycle = lifecycle;
    s.last_activity = Utc::now();
}

/// Best-effort cleanup after a fault, then mark the agent failed. The
/// fault stays inside this task; nothing propagates to other agents.
async fn fail_agent(agent: &mut dyn Agent, ctx: &mut AgentContext, state: &SharedState) {
    if let Err(e) = agent.cleanup(ctx).await {
        error!(agent = %ctx.identity().name, error = %e, "Cleanup after fault failed");
    }
    set_lifecycle(state, Lifecycle::Failed).await;
}

/// Execute the full lifecycle until stopped or failed.
///
/// Created -> Initializing -> Running -> (process, idle)* -> Stopping ->
/// Stopped. Any error in a lifecycle method routes through [`fail_agent`].
/// The idle wait races the cancellation token, so a stop request never
/// blocks for longer than one in-flight `process` call plus one interval.
pub async fn run_agent(mut agent: Box<dyn Agent>, mut ctx: AgentContext, cancel: CancellationToken) {
    let state = ctx.state();
    let name = agent.identity().name.clone();

    set_lifecycle(&state, Lifecycle::Initializing).await;
    if let Err(e) = agent.initialize(&mut ctx).await {
        error!(agent = %name, error = %e, "Initialization failed");
        fail_agent(agent.as_mut(), &mut ctx, &state).await;
        return;
    }

    set_lifecycle(&state, Lifecycle::Running).await;
    info!(agent = %name, "Agent running");

    while !cancel.is_cancelled() {
        if let Err(e) = agent.process(&mut ctx).await {
            error!(agent = %name, error = %e, "Process cycle failed");
            fail_agent(agent.as_mut(), &mut ctx, &state).await;
            return;
        }
        {
            let mut s = state.write().await;
            s.last_activity = Utc::now();
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(agent.idle_interval()) => {}
        }
    }

    set_lifecycle(&state, Lifecycle::Stopping).await;
    match agent.cleanup(&mut ctx).await {
        Ok(()) => {
            set_lifecycle(&state, Lifecycle::Stopped).await;
            info!(agent = %name, "Agent stopped");
        }
        Err(e) => {
            error!(agent = %name, error = %e, "Cleanup failed");
            set_lifecycle(&state, Lifecycle::Failed).await;
        }
    }
}
