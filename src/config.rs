//! Agent configuration.
//!
//! Every tunable of the decision cycle lives here so hosts can build,
//! serialize, and replay agent setups.

use serde::{Deserialize, Serialize};

/// Whether and where chunks are learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnMode {
    /// Never build chunks; justifications are still built to support
    /// results crossing goal levels.
    Off,
    /// Build chunks for every resolving sub-goal.
    On,
    /// Build chunks only for states on the force-learn list.
    Only,
    /// Build chunks for every state except those on the dont-learn list.
    Except,
}

/// Which goal levels chunking applies to when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnScope {
    /// Chunk results at every goal level.
    AllLevels,
    /// Chunk only results of the bottom-most sub-goal.
    BottomUp,
}

/// Preference-type policy for non-context slots.
///
/// Context (operator) slots always honor the full preference vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePreferenceMode {
    /// Only acceptable and reject preferences are honored on non-context
    /// slots; other kinds are reported through the trace and ignored.
    Strict,
    /// All preference kinds participate in non-context resolution.
    Permissive,
}

/// Configuration for a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum elaboration cycles inside one decision cycle before the
    /// driver forces the decision phase.
    pub max_elaborations: u64,
    /// Maximum chunks built inside one decision cycle.
    pub max_chunks: u64,
    /// Maximum consecutive output phases without output-link activity
    /// before `run_til_output` stops.
    pub max_nil_output_cycles: u64,
    /// Chunk-learning policy.
    pub learn: LearnMode,
    /// Goal levels chunking applies to.
    pub learn_scope: LearnScope,
    /// Preference-type policy for non-context slots.
    pub attribute_preference_mode: AttributePreferenceMode,
    /// Seed for indifferent-choice selection. `None` seeds from entropy;
    /// a fixed seed makes runs reproducible.
    pub rng_seed: Option<u64>,
    /// Run the input callback every N decision cycles.
    pub input_period: u64,
    /// Run the output callback every N decision cycles.
    pub output_period: u64,
    /// Bounded capacity of each trace subscription queue.
    pub trace_queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_elaborations: 100,
            max_chunks: 50,
            max_nil_output_cycles: 15,
            learn: LearnMode::Off,
            learn_scope: LearnScope::AllLevels,
            attribute_preference_mode: AttributePreferenceMode::Strict,
            rng_seed: None,
            input_period: 1,
            output_period: 1,
            trace_queue_capacity: 1024,
        }
    }
}

impl AgentConfig {
    /// Enables chunking at all levels.
    #[must_use]
    pub fn with_learning(mut self) -> Self {
        self.learn = LearnMode::On;
        self
    }

    /// Sets a fixed random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Sets the elaboration bound.
    #[must_use]
    pub const fn with_max_elaborations(mut self, max: u64) -> Self {
        self.max_elaborations = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.max_elaborations, 100);
        assert_eq!(config.learn, LearnMode::Off);
        assert_eq!(config.learn_scope, LearnScope::AllLevels);
        assert_eq!(
            config.attribute_preference_mode,
            AttributePreferenceMode::Strict
        );
        assert!(config.rng_seed.is_none());
    }

    #[test]
    fn test_builder_helpers() {
        let config = AgentConfig::default()
            .with_learning()
            .with_seed(7)
            .with_max_elaborations(3);
        assert_eq!(config.learn, LearnMode::On);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.max_elaborations, 3);
    }

    #[test]
    fn test_config_serialization() {
        let config = AgentConfig::default().with_seed(11);
        let json = serde_json::to_string(&config).unwrap();
        let back: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
