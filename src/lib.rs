//! # Noesis - a production-rule cognition kernel
//!
//! Noesis is an embeddable rule-execution kernel for cognitive agents:
//! a working-memory store plus an incremental match network that
//! determines, after each working-memory change, which rules match,
//! fires and retracts them in a fixed-point decision cycle, and learns
//! new rules (chunks) from the trace of a resolved sub-goal.
//!
//! ## Core Concepts
//!
//! - **Symbol**: an interned atom; identifiers anchor graph structure
//! - **WME**: a `(identifier ^attribute value)` working-memory element
//! - **Production**: conditions over WMEs, actions producing preferences
//! - **Preference**: a typed vote about a slot value
//! - **Impasse**: a sub-goal pushed when a decision cannot settle
//! - **Chunk**: a rule learned by backtracing a sub-goal result
//!
//! ## Usage
//!
//! ```rust,ignore
//! use noesis::{Agent, AgentConfig, RunUnit};
//!
//! let mut agent = Agent::new("demo", AgentConfig::default());
//! agent.load_productions(
//!     "sp {hello (state <s> ^superstate nil) --> (<s> ^greeting hi)}",
//! )?;
//! agent.run(1, RunUnit::Decision);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod prefs;
pub mod production;
pub mod symbol;
pub mod trace;
pub mod wm;

// Matching and deciding
pub mod chunk;
pub mod decide;
pub mod parser;
pub mod rete;

// Driver and host surface
pub mod agent;
pub mod interface;
pub mod kernel;

// Re-export primary types at crate root for convenience
pub use agent::{Agent, InputContext, RunStats, RunUnit};
pub use config::{AgentConfig, AttributePreferenceMode, LearnMode, LearnScope};
pub use error::{NoesisError, NoesisResult, ParseError, ProductionError, RuntimeError, WmError};
pub use interface::execute_command_line;
pub use kernel::{AgentId, Kernel};
pub use prefs::{ImpasseKind, Preference, SlotDecision};
pub use production::{
    Action, Condition, PatternCondition, PreferenceSpec, Production, ProductionKind, Test,
};
pub use rete::{ExciseOutcome, MatchChange, MatchDirection, ReteNetwork};
pub use symbol::{GoalLevel, Symbol, SymbolTable, SymbolValue};
pub use trace::{Phase, TraceBus, TraceEvent, TraceRecord, TraceStream};
pub use wm::{Wme, WmeDelta, WmeRef, WorkingMemory};
