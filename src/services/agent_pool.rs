//! Agent pool: role-configured worker lifecycle for one session.
//!
//! Spawning is capped twice: by the session-wide `max_agents` and by the
//! role profile's own concurrency cap. Terminated agents stop counting
//! toward either cap but stay in the roster for bookkeeping.

use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::agent::{AgentInstance, AgentRole, AgentStatus};
use crate::services::event_bus::SwarmEvent;

/// Worker roster for a single session.
#[derive(Debug)]
pub struct AgentPool {
    session_id: Uuid,
    agents: HashMap<Uuid, AgentInstance>,
    /// Spawn order, for stable listings.
    order: Vec<Uuid>,
    max_agents: usize,
    events: Vec<SwarmEvent>,
}

impl AgentPool {
    pub fn new(session_id: Uuid, max_agents: usize) -> Self {
        Self {
            session_id,
            agents: HashMap::new(),
            order: Vec::new(),
            max_agents,
            events: Vec::new(),
        }
    }

    /// Spawn a worker of the given role, enforcing both caps.
    pub fn spawn(&mut self, role: AgentRole) -> SwarmResult<Uuid> {
        if self.active_count() >= self.max_agents {
            return Err(SwarmError::AgentLimitExceeded {
                reason: format!(
                    "session already runs {} of {} agents",
                    self.active_count(),
                    self.max_agents
                ),
            });
        }
        let role_cap = role.profile().max_concurrent_tasks;
        let role_count = self.by_role(role).len();
        if role_count >= role_cap {
            return Err(SwarmError::AgentLimitExceeded {
                reason: format!(
                    "role {} already runs {role_count} of {role_cap} agents",
                    role.as_str()
                ),
            });
        }

        let mut agent = AgentInstance::new(self.session_id, role);
        agent.activate();
        let id = agent.id;
        self.events.push(SwarmEvent::AgentSpawned {
            session_id: self.session_id,
            agent_id: id,
            role,
        });
        self.order.push(id);
        self.agents.insert(id, agent);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> SwarmResult<&AgentInstance> {
        self.agents.get(&id).ok_or(SwarmError::AgentNotFound(id))
    }

    pub fn get_mut(&mut self, id: Uuid) -> SwarmResult<&mut AgentInstance> {
        self.agents.get_mut(&id).ok_or(SwarmError::AgentNotFound(id))
    }

    /// Agents in spawn order.
    pub fn list(&self) -> Vec<&AgentInstance> {
        self.order.iter().map(|id| &self.agents[id]).collect()
    }

    /// Non-terminated agents of a role.
    pub fn by_role(&self, role: AgentRole) -> Vec<&AgentInstance> {
        self.order
            .iter()
            .map(|id| &self.agents[id])
            .filter(|a| a.role == role && a.status.counts_toward_cap())
            .collect()
    }

    /// Agents currently available for assignment.
    pub fn idle(&self) -> Vec<&AgentInstance> {
        self.order
            .iter()
            .map(|id| &self.agents[id])
            .filter(|a| a.is_available())
            .collect()
    }

    /// First available agent of the given role.
    pub fn find_idle_by_role(&self, role: AgentRole) -> Option<&AgentInstance> {
        self.idle().into_iter().find(|a| a.role == role)
    }

    /// Agents counting toward the session cap.
    pub fn active_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.status.counts_toward_cap())
            .count()
    }

    /// Update an agent's status, publishing the change.
    pub fn set_status(&mut self, id: Uuid, status: AgentStatus) -> SwarmResult<()> {
        let agent = self.get_mut(id)?;
        agent.status = status;
        agent.touch();
        self.events.push(SwarmEvent::AgentUpdated {
            session_id: self.session_id,
            agent_id: id,
            status,
            progress: None,
        });
        Ok(())
    }

    /// Hand a task to an idle agent.
    pub fn assign(&mut self, agent_id: Uuid, task_id: Uuid) -> SwarmResult<()> {
        let session_id = self.session_id;
        let agent = self.get_mut(agent_id)?;
        agent
            .assign(task_id)
            .map_err(SwarmError::ValidationError)?;
        let status = agent.status;
        self.events.push(SwarmEvent::AgentUpdated {
            session_id,
            agent_id,
            status,
            progress: None,
        });
        Ok(())
    }

    /// Record a successful assignment, returning the finished task id.
    pub fn complete_assignment(&mut self, agent_id: Uuid) -> SwarmResult<Option<Uuid>> {
        self.finish(agent_id, true)
    }

    /// Record a failed assignment, returning the finished task id.
    pub fn fail_assignment(&mut self, agent_id: Uuid) -> SwarmResult<Option<Uuid>> {
        self.finish(agent_id, false)
    }

    fn finish(&mut self, agent_id: Uuid, succeeded: bool) -> SwarmResult<Option<Uuid>> {
        let session_id = self.session_id;
        let agent = self.get_mut(agent_id)?;
        let task_id = agent.finish_assignment(succeeded);
        let status = agent.status;
        self.events.push(SwarmEvent::AgentUpdated {
            session_id,
            agent_id,
            status,
            progress: None,
        });
        Ok(task_id)
    }

    /// Terminate an agent. Admissible from any state.
    pub fn terminate(&mut self, agent_id: Uuid) -> SwarmResult<()> {
        let session_id = self.session_id;
        let agent = self.get_mut(agent_id)?;
        agent.status = AgentStatus::Terminated;
        agent.current_task_id = None;
        self.events.push(SwarmEvent::AgentTerminated {
            session_id,
            agent_id,
        });
        Ok(())
    }

    /// Terminate every non-terminated agent.
    pub fn terminate_all(&mut self) {
        let ids: Vec<Uuid> = self
            .agents
            .values()
            .filter(|a| a.status.counts_toward_cap())
            .map(|a| a.id)
            .collect();
        for id in ids {
            let _ = self.terminate(id);
        }
    }

    /// Take the events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<SwarmEvent> {
        std::mem::take(&mut self.events)
    }
}
