//! The kernel: a host-owned collection of isolated agents.
//!
//! Agents share nothing: each owns its own symbol table, working
//! memory, match network, and goal stack. The kernel's scheduler is an
//! explicit cooperative loop: each slice advances exactly one agent by
//! one run unit, then control returns here. Multiple kernels in one
//! process are fully independent.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{Agent, RunUnit};
use crate::config::AgentConfig;
use crate::error::{NoesisError, NoesisResult, RuntimeError};

/// Host-facing handle for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of agents plus the cooperative scheduler that steps them.
#[derive(Debug, Default)]
pub struct Kernel {
    agents: HashMap<AgentId, Agent>,
    order: Vec<AgentId>,
}

impl Kernel {
    /// Creates an empty kernel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an agent with the default configuration.
    pub fn create_agent(&mut self, name: impl Into<String>) -> AgentId {
        self.create_agent_with_config(name, AgentConfig::default())
    }

    /// Creates an agent with an explicit configuration.
    pub fn create_agent_with_config(
        &mut self,
        name: impl Into<String>,
        config: AgentConfig,
    ) -> AgentId {
        let id = AgentId::new();
        self.agents.insert(id, Agent::new(name, config));
        self.order.push(id);
        id
    }

    /// Destroys an agent and everything it owns.
    pub fn destroy_agent(&mut self, id: AgentId) -> NoesisResult<()> {
        if self.agents.remove(&id).is_none() {
            return Err(NoesisError::Runtime(RuntimeError::AgentNotFound {
                id: id.to_string(),
            }));
        }
        self.order.retain(|a| *a != id);
        Ok(())
    }

    /// Shared access to an agent.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Exclusive access to an agent.
    #[must_use]
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    /// Finds an agent by name.
    #[must_use]
    pub fn agent_by_name(&self, name: &str) -> Option<AgentId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.agents.get(id).is_some_and(|a| a.name() == name))
    }

    /// Agent ids in creation order.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.order.clone()
    }

    /// Number of agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True if the kernel holds no agents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Round-robin scheduler: `n` slices, each advancing one agent by
    /// one unit, in creation order. Control returns to this loop after
    /// every slice; no agent can starve another.
    pub fn run_all(&mut self, n: u64, unit: RunUnit) {
        for _ in 0..n {
            let order = self.order.clone();
            for id in order {
                if let Some(agent) = self.agents.get_mut(&id) {
                    agent.run(1, unit);
                }
            }
        }
    }

    /// Raises every agent's interrupt flag.
    pub fn stop_all(&self) {
        for agent in self.agents.values() {
            agent.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_destroy() {
        let mut kernel = Kernel::new();
        let a = kernel.create_agent("alpha");
        let b = kernel.create_agent("beta");
        assert_eq!(kernel.len(), 2);
        assert_eq!(kernel.agent_by_name("beta"), Some(b));

        kernel.destroy_agent(a).unwrap();
        assert_eq!(kernel.len(), 1);
        let err = kernel.destroy_agent(a).unwrap_err();
        assert!(matches!(
            err,
            NoesisError::Runtime(RuntimeError::AgentNotFound { .. })
        ));
    }

    #[test]
    fn test_agents_are_isolated() {
        let mut kernel = Kernel::new();
        let a = kernel.create_agent("alpha");
        let b = kernel.create_agent("beta");

        kernel
            .agent_mut(a)
            .unwrap()
            .load_productions("sp {p (state <s> ^superstate nil) --> (<s> ^mark alpha)}")
            .unwrap();
        kernel.run_all(1, RunUnit::Decision);

        let alpha = kernel.agent(a).unwrap();
        let beta = kernel.agent(b).unwrap();
        assert_eq!(alpha.firing_count("p"), 1);
        assert_eq!(beta.firing_count("p"), 0);
        assert!(beta.production_names().is_empty());
    }

    #[test]
    fn test_round_robin_advances_all_agents() {
        let mut kernel = Kernel::new();
        let a = kernel.create_agent("alpha");
        let b = kernel.create_agent("beta");
        kernel.run_all(3, RunUnit::Decision);
        assert_eq!(kernel.agent(a).unwrap().stats().decision_cycles, 3);
        assert_eq!(kernel.agent(b).unwrap().stats().decision_cycles, 3);
    }

    #[test]
    fn test_two_kernels_are_independent() {
        let mut first = Kernel::new();
        let mut second = Kernel::new();
        first.create_agent("solo");
        second.create_agent("solo");
        first.run_all(2, RunUnit::Decision);
        let id = second.agent_by_name("solo").unwrap();
        assert_eq!(second.agent(id).unwrap().stats().decision_cycles, 0);
    }
}
