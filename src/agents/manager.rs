//! Registry and supervisor for the pipeline's agents. Each agent runs as
//! its own tokio task; the manager starts them, stops them with a grace
//! period, and aggregates status snapshots. One agent's fault never
//! crosses into another.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::agent::{
    run_agent, Agent, AgentContext, AgentIdentity, AgentState, Lifecycle, SharedState,
};
use super::mailbox::{Mailbox, MailboxRouter};
use crate::errors::PulseError;

/// Point-in-time view of one agent, safe to serialize and report.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub id: String,
    pub name: String,
    pub lifecycle: Lifecycle,
    pub last_activity: DateTime<Utc>,
}

struct AgentSlot {
    identity: AgentIdentity,
    state: SharedState,
    cancel: CancellationToken,
    /// Present until `start` consumes it.
    pending: Option<(Box<dyn Agent>, AgentContext)>,
    task: Option<JoinHandle<()>>,
}

pub struct AgentManager {
    agents: DashMap<String, AgentSlot>,
    router: MailboxRouter,
    stop_grace: Duration,
}

impl AgentManager {
    pub fn new(stop_grace: Duration) -> Self {
        Self {
            agents: DashMap::new(),
            router: MailboxRouter::new(),
            stop_grace,
        }
    }

    pub fn router(&self) -> &MailboxRouter {
        &self.router
    }

    /// Add an agent to the registry and wire up its mailbox. The agent
    /// does not run until [`start`](Self::start).
    pub fn register(&self, agent: Box<dyn Agent>) -> Result<(), PulseError> {
        let identity = agent.identity().clone();
        if self.agents.contains_key(&identity.id) {
            return Err(PulseError::Registry(format!(
                "agent id {} already registered",
                identity.id
            )));
        }

        let mailbox = Mailbox::new();
        self.router.register(identity.id.clone(), mailbox.sender());
        let state: SharedState = Arc::new(RwLock::new(AgentState::new()));
        let ctx = AgentContext::new(
            identity.clone(),
            mailbox,
            self.router.clone(),
            Arc::clone(&state),
        );

        info!(agent = %identity.name, id = %identity.id, "Registered agent");
        self.agents.insert(
            identity.id.clone(),
            AgentSlot {
                identity,
                state,
                cancel: CancellationToken::new(),
                pending: Some((agent, ctx)),
                task: None,
            },
        );
        Ok(())
    }

    /// Spawn the agent's lifecycle task. Starting an unknown or already
    /// started agent is an error.
    pub fn start(&self, id: &str) -> Result<(), PulseError> {
        let mut slot = self
            .agents
            .get_mut(id)
            .ok_or_else(|| PulseError::Registry(format!("no agent registered as {id}")))?;
        let (agent, ctx) = slot
            .pending
            .take()
            .ok_or_else(|| PulseError::Registry(format!("agent {id} already started")))?;

        info!(agent = %slot.identity.name, "Starting agent");
        slot.task = Some(tokio::spawn(run_agent(agent, ctx, slot.cancel.clone())));
        Ok(())
    }

    pub fn start_all(&self) -> Result<(), PulseError> {
        let ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.start(&id)?;
        }
        Ok(())
    }

    /// Request a stop and wait up to the grace period for cleanup. An
    /// agent that does not finish in time is aborted and marked Failed.
    pub async fn stop(&self, id: &str) -> Result<(), PulseError> {
        // Take what we need out of the slot; never hold the map guard
        // across an await.
        let (name, state, task) = {
            let mut slot = self
                .agents
                .get_mut(id)
                .ok_or_else(|| PulseError::Registry(format!("no agent registered as {id}")))?;
            slot.cancel.cancel();
            (
                slot.identity.name.clone(),
                Arc::clone(&slot.state),
                slot.task.take(),
            )
        };

        let Some(task) = task else {
            // Never started, or already stopped.
            return Ok(());
        };

        let abort = task.abort_handle();
        match tokio::time::timeout(self.stop_grace, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(agent = %name, error = %e, "Agent task panicked");
                state.write().await.lifecycle = Lifecycle::Failed;
            }
            Err(_) => {
                warn!(agent = %name, grace_secs = self.stop_grace.as_secs(), "Agent unresponsive to stop, aborting");
                abort.abort();
                state.write().await.lifecycle = Lifecycle::Failed;
            }
        }
        self.router.deregister(id);
        Ok(())
    }

    /// Cancel every agent first, then wait for each. Cancelling up front
    /// lets the stops overlap instead of serializing grace periods.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        for slot in self.agents.iter() {
            slot.cancel.cancel();
        }
        let stops = ids.iter().map(|id| self.stop(id));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                error!(error = %e, "Stop failed");
            }
        }
        info!("All agents stopped");
    }

    pub async fn status(&self, id: &str) -> Option<AgentStatus> {
        let (identity, state) = {
            let slot = self.agents.get(id)?;
            (slot.identity.clone(), Arc::clone(&slot.state))
        };
        let state = state.read().await;
        Some(AgentStatus {
            id: identity.id,
            name: identity.name,
            lifecycle: state.lifecycle,
            last_activity: state.last_activity,
        })
    }

    pub async fn status_all(&self) -> Vec<AgentStatus> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(status) = self.status(&id).await {
                statuses.push(status);
            }
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::agents::agent::AgentContext;

    struct IdleAgent {
        identity: AgentIdentity,
        fail_in_process: bool,
    }

    impl IdleAgent {
        fn boxed(id: &str, fail_in_process: bool) -> Box<dyn Agent> {
            Box::new(Self {
                identity: AgentIdentity::new(id, id.to_uppercase()),
                fail_in_process,
            })
        }
    }

    #[async_trait]
    impl Agent for IdleAgent {
        fn identity(&self) -> &AgentIdentity {
            &self.identity
        }

        fn idle_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn initialize(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
            Ok(())
        }

        async fn process(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
            if self.fail_in_process {
                return Err(PulseError::Internal("injected fault".into()));
            }
            Ok(())
        }

        async fn cleanup(&mut self, _ctx: &mut AgentContext) -> Result<(), PulseError> {
            Ok(())
        }
    }

    fn manager() -> AgentManager {
        AgentManager::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let manager = manager();
        manager.register(IdleAgent::boxed("a", false)).unwrap();
        let err = manager.register(IdleAgent::boxed("a", false)).unwrap_err();
        assert!(matches!(err, PulseError::Registry(_)));
    }

    #[tokio::test]
    async fn test_start_stop_reaches_stopped() {
        let manager = manager();
        manager.register(IdleAgent::boxed("a", false)).unwrap();
        manager.start("a").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.stop("a").await.unwrap();
        let status = manager.status("a").await.unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_is_an_error() {
        let manager = manager();
        manager.register(IdleAgent::boxed("a", false)).unwrap();
        manager.start("a").unwrap();
        assert!(manager.start("a").is_err());
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_one_failure_leaves_others_running() {
        let manager = manager();
        manager.register(IdleAgent::boxed("bad", true)).unwrap();
        manager.register(IdleAgent::boxed("good", false)).unwrap();
        manager.start_all().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(
            manager.status("bad").await.unwrap().lifecycle,
            Lifecycle::Failed
        );
        assert_eq!(
            manager.status("good").await.unwrap().lifecycle,
            Lifecycle::Running
        );
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_status_all_sorted_by_id() {
        let manager = manager();
        manager.register(IdleAgent::boxed("b", false)).unwrap();
        manager.register(IdleAgent::boxed("a", false)).unwrap();
        let statuses = manager.status_all().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].id, "a");
        assert_eq!(statuses[1].id, "b");
        assert!(statuses
            .iter()
            .all(|s| s.lifecycle == Lifecycle::Created));
    }

    #[tokio::test]
    async fn test_stop_never_started_agent_is_noop() {
        let manager = manager();
        manager.register(IdleAgent::boxed("a", false)).unwrap();
        manager.stop("a").await.unwrap();
        assert_eq!(
            manager.status("a").await.unwrap().lifecycle,
            Lifecycle::Created
        );
    }
}
