//! The agent: one kernel instance with its own symbols, working memory,
//! match network, preference memory, and goal stack.
//!
//! The decision cycle is a phase state machine:
//! `Input -> Preference -> WorkingMemory -> Output -> Decision`, where
//! Preference and WorkingMemory repeat as elaboration cycles until the
//! match network quiesces (bounded by `max_elaborations`). All working
//! memory mutation is buffered and applied at phase boundaries, so the
//! network always sees one consistent batch per phase and is never run
//! concurrently with same-agent mutation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AgentConfig;
use crate::decide::{self, Ctx, DecisionState};
use crate::error::{NoesisError, NoesisResult, RuntimeError, WmError};
use crate::parser;
use crate::prefs::{Preference, PreferenceMemory};
use crate::production::Production;
use crate::rete::ReteNetwork;
use crate::symbol::{Symbol, SymbolTable};
use crate::trace::{Phase, TraceBus, TraceEvent, TraceStream};
use crate::wm::{WmeDelta, WmeRef, WorkingMemory};

/// Units a run request is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunUnit {
    /// Full decision cycles.
    Decision,
    /// Preference/working-memory elaboration cycles.
    Elaboration,
    /// Individual phases.
    Phase,
}

/// Lifetime execution counters. Totals survive [`Agent::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Completed decision cycles.
    pub decision_cycles: u64,
    /// Completed elaboration cycles.
    pub elaboration_cycles: u64,
    /// Completed phases.
    pub phases: u64,
    /// WMEs added to working memory.
    pub wme_additions: u64,
    /// WMEs removed from working memory.
    pub wme_removals: u64,
    /// Production firings.
    pub production_firings: u64,
    /// Chunks learned.
    pub chunks_built: u64,
    /// Justifications learned.
    pub justifications_built: u64,
}

/// Host view of working memory during the input phase.
pub struct InputContext<'a> {
    syms: &'a mut SymbolTable,
    wm: &'a mut WorkingMemory,
    input_link: Symbol,
}

impl InputContext<'_> {
    /// The input-link identifier input WMEs hang off.
    #[must_use]
    pub fn input_link(&self) -> Symbol {
        self.input_link.clone()
    }

    /// Interns a string constant.
    pub fn str_sym(&mut self, s: impl Into<String>) -> Symbol {
        self.syms.str_constant(s)
    }

    /// Interns an integer constant.
    pub fn int_sym(&mut self, v: i64) -> Symbol {
        self.syms.int_constant(v)
    }

    /// Mints a fresh identifier for input structure.
    pub fn new_id(&mut self, letter: char) -> Symbol {
        let sym = self.syms.new_identifier(letter, 1);
        self.wm.register_identifier(&sym);
        sym
    }

    /// Adds an input WME.
    pub fn add(&mut self, id: Symbol, attr: Symbol, value: Symbol) -> WmeRef {
        self.wm.add(id, attr, value, false)
    }

    /// Removes an input WME by timetag.
    pub fn remove(&mut self, timetag: u64) -> Result<(), WmError> {
        self.wm.remove(timetag).map(|_| ())
    }
}

type InputCallback = Box<dyn FnMut(&mut InputContext<'_>) + Send>;
type OutputCallback = Box<dyn FnMut(&[WmeRef]) + Send>;

/// One agent.
pub struct Agent {
    name: String,
    config: AgentConfig,
    syms: SymbolTable,
    wm: WorkingMemory,
    net: ReteNetwork,
    prefs: PreferenceMemory,
    decide: DecisionState,
    trace: TraceBus,
    rng: StdRng,
    stats: RunStats,
    firing_counts: HashMap<String, u64>,

    phase: Phase,
    decision_cycle: u64,
    elaborations_this_cycle: u64,
    elaboration_bound_reported: bool,

    top_state: Symbol,
    input_link: Symbol,
    output_link: Symbol,

    stop: Arc<AtomicBool>,
    input_callback: Option<InputCallback>,
    output_callback: Option<OutputCallback>,
    output_activity: bool,
    nil_output_cycles: u64,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("decision_cycle", &self.decision_cycle)
            .field("wmes", &self.wm.len())
            .field("goals", &self.decide.goals.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent with a fresh top state and io links.
    #[must_use]
    pub fn new(name: impl Into<String>, config: AgentConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut agent = Self {
            name: name.into(),
            config,
            syms: SymbolTable::new(),
            wm: WorkingMemory::new(),
            net: ReteNetwork::new(),
            prefs: PreferenceMemory::new(),
            decide: DecisionState::new(),
            trace: TraceBus::new(),
            rng,
            stats: RunStats::default(),
            firing_counts: HashMap::new(),
            phase: Phase::Input,
            decision_cycle: 0,
            elaborations_this_cycle: 0,
            elaboration_bound_reported: false,
            // Placeholders replaced by bootstrap below.
            top_state: SymbolTable::new().new_identifier('S', 1),
            input_link: SymbolTable::new().new_identifier('I', 1),
            output_link: SymbolTable::new().new_identifier('I', 1),
            stop: Arc::new(AtomicBool::new(false)),
            input_callback: None,
            output_callback: None,
            output_activity: false,
            nil_output_cycles: 0,
        };
        agent.bootstrap();
        agent
    }

    fn bootstrap(&mut self) {
        let mut ctx = Self::make_ctx(
            &mut self.syms,
            &mut self.wm,
            &mut self.net,
            &mut self.prefs,
            &mut self.decide,
            &mut self.trace,
            &self.config,
            &mut self.rng,
            &mut self.firing_counts,
            &mut self.stats,
        );
        let (top, input, output) = decide::create_top_state(&mut ctx);
        self.top_state = top;
        self.input_link = input;
        self.output_link = output;
        self.flush_changes();
    }

    #[allow(clippy::too_many_arguments)]
    fn make_ctx<'a>(
        syms: &'a mut SymbolTable,
        wm: &'a mut WorkingMemory,
        net: &'a mut ReteNetwork,
        prefs: &'a mut PreferenceMemory,
        decide: &'a mut DecisionState,
        trace: &'a mut TraceBus,
        config: &'a AgentConfig,
        rng: &'a mut StdRng,
        firing_counts: &'a mut HashMap<String, u64>,
        stats: &'a mut RunStats,
    ) -> Ctx<'a> {
        Ctx {
            syms,
            wm,
            net,
            prefs,
            decide,
            trace,
            config,
            rng,
            firing_counts,
            stats,
        }
    }

    // --- identity & accessors -------------------------------------------

    /// The agent's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Mutable configuration access (takes effect next phase).
    pub fn config_mut(&mut self) -> &mut AgentConfig {
        &mut self.config
    }

    /// The top state identifier.
    #[must_use]
    pub fn top_state(&self) -> Symbol {
        self.top_state.clone()
    }

    /// The input-link identifier.
    #[must_use]
    pub fn input_link(&self) -> Symbol {
        self.input_link.clone()
    }

    /// The output-link identifier.
    #[must_use]
    pub fn output_link(&self) -> Symbol {
        self.output_link.clone()
    }

    /// Current goal stack, top state first.
    #[must_use]
    pub fn goal_stack(&self) -> Vec<Symbol> {
        self.decide.goals.iter().map(|g| g.goal.clone()).collect()
    }

    /// Execution counters.
    #[must_use]
    pub const fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Lifetime firing count of one production.
    #[must_use]
    pub fn firing_count(&self, production: &str) -> u64 {
        self.firing_counts.get(production).copied().unwrap_or(0)
    }

    /// Interns a string constant in this agent's symbol table.
    pub fn str_sym(&mut self, s: impl Into<String>) -> Symbol {
        self.syms.str_constant(s)
    }

    /// Interns an integer constant.
    pub fn int_sym(&mut self, v: i64) -> Symbol {
        self.syms.int_constant(v)
    }

    /// Interns a float constant.
    pub fn float_sym(&mut self, v: f64) -> Symbol {
        self.syms.float_constant(v)
    }

    /// Looks up a live identifier by printed name (`"S1"`).
    #[must_use]
    pub fn find_identifier(&self, printed: &str) -> Option<Symbol> {
        let mut chars = printed.chars();
        let letter = chars.next()?;
        let number: u64 = chars.as_str().parse().ok()?;
        self.syms.find_identifier(letter, number)
    }

    /// Names of loaded productions in load order.
    #[must_use]
    pub fn production_names(&self) -> Vec<String> {
        self.net
            .production_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// A loaded production.
    #[must_use]
    pub fn production(&self, name: &str) -> Option<&Production> {
        self.net.production(name)
    }

    /// Live complete matches of a production.
    #[must_use]
    pub fn match_count(&self, name: &str) -> usize {
        self.net.match_count(name)
    }

    /// All live WMEs in timetag order.
    #[must_use]
    pub fn wmes(&self) -> Vec<WmeRef> {
        self.wm.iter_live().cloned().collect()
    }

    /// Live WMEs owned by an identifier.
    #[must_use]
    pub fn wmes_of(&self, id: &Symbol) -> Vec<WmeRef> {
        self.wm.wmes_of(id).to_vec()
    }

    /// The preference set of a slot.
    #[must_use]
    pub fn preferences_for(&self, id: &Symbol, attr: &Symbol) -> Vec<Preference> {
        self.prefs
            .slot(&(id.clone(), attr.clone()))
            .map(|s| s.preferences.clone())
            .unwrap_or_default()
    }

    /// The operator currently selected at a goal, if any.
    #[must_use]
    pub fn selected_operator(&self, goal: &Symbol) -> Option<Symbol> {
        let operator = self.find_constant("operator")?;
        self.prefs
            .slot(&(goal.clone(), operator))
            .and_then(|s| s.installed.keys().next().cloned())
    }

    fn find_constant(&self, name: &str) -> Option<Symbol> {
        self.syms.lookup_str(name)
    }

    // --- trace ----------------------------------------------------------

    /// Opens a bounded trace subscription.
    pub fn subscribe_trace(&mut self) -> TraceStream {
        let capacity = self.config.trace_queue_capacity;
        self.trace.subscribe(capacity)
    }

    // --- callbacks ------------------------------------------------------

    /// Installs the input-phase callback.
    pub fn set_input_callback(&mut self, callback: InputCallback) {
        self.input_callback = Some(callback);
    }

    /// Installs the output-phase callback. It receives the WMEs hanging
    /// off the output link.
    pub fn set_output_callback(&mut self, callback: OutputCallback) {
        self.output_callback = Some(callback);
    }

    // --- production loading ---------------------------------------------

    /// Parses and installs every production in the text.
    ///
    /// A malformed or structurally invalid production aborts only
    /// itself; the rest load. Reloading an identical rule is a no-op;
    /// reloading a changed body excises the old rule first. Returns the
    /// number installed, or the first error if nothing installed and
    /// something failed.
    pub fn load_productions(&mut self, text: &str) -> NoesisResult<usize> {
        let outcome = parser::parse_productions(text, &mut self.syms)?;
        let mut loaded = 0usize;
        let mut first_error: Option<NoesisError> = outcome.errors.into_iter().next().map(Into::into);

        for production in outcome.productions {
            match self.install_production(production) {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if loaded == 0 {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(loaded)
    }

    /// Loads productions from a file.
    pub fn load_productions_from_path(&mut self, path: impl AsRef<Path>) -> NoesisResult<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NoesisError::Runtime(RuntimeError::Internal {
                message: format!("failed to read production file: {e}"),
            })
        })?;
        self.load_productions(&text)
    }

    /// Installs one parsed production. Returns false for an identical
    /// reload.
    fn install_production(&mut self, production: Production) -> NoesisResult<bool> {
        production.validate().map_err(NoesisError::Production)?;
        if let Some(existing) = self.net.production(&production.name) {
            if existing.fingerprint() == production.fingerprint() {
                return Ok(false);
            }
            self.excise_production(&production.name)?;
        }
        let live: Vec<WmeRef> = self.wm.iter_live().cloned().collect();
        self.net
            .add_production(production, &live)
            .map_err(NoesisError::Production)?;
        Ok(true)
    }

    /// Excises a production, retracting every live instantiation (and
    /// the i-supported WMEs they alone held up) before returning.
    pub fn excise_production(&mut self, name: &str) -> NoesisResult<usize> {
        let outcome = self.net.excise(name).ok_or_else(|| {
            NoesisError::Runtime(RuntimeError::ProductionNotFound {
                name: name.to_string(),
            })
        })?;
        // Drive the queued retractions through preference withdrawal
        // and slot re-resolution now, not at the next phase.
        self.with_ctx(|ctx| {
            decide::fire_pending_matches(ctx);
            decide::resolve_attribute_slots(ctx);
        });
        self.flush_changes();
        Ok(outcome.retracted)
    }

    /// Excises every loaded production.
    pub fn excise_all(&mut self) -> usize {
        let names = self.production_names();
        let mut total = 0;
        for name in names {
            if let Ok(retracted) = self.excise_production(&name) {
                total += retracted;
            }
        }
        total
    }

    // --- working memory surface -----------------------------------------

    /// Creates a WME on a known identifier. The change is buffered until
    /// [`Agent::commit`] or the next phase boundary.
    pub fn create_wme(
        &mut self,
        id: &Symbol,
        attr: Symbol,
        value: Symbol,
        acceptable: bool,
    ) -> Result<WmeRef, WmError> {
        if !id.is_identifier() || !self.wm.knows_identifier(id) {
            return Err(WmError::UnknownIdentifier { id: id.to_string() });
        }
        Ok(self.wm.add(id.clone(), attr, value, acceptable))
    }

    /// Destroys a WME by timetag. A second destroy of the same timetag
    /// is [`WmError::NotFound`].
    pub fn destroy_wme(&mut self, timetag: u64) -> Result<(), WmError> {
        self.wm.remove(timetag).map(|_| ())
    }

    /// Flushes buffered working-memory deltas into the match network.
    pub fn commit(&mut self) {
        self.flush_changes();
    }

    fn flush_changes(&mut self) {
        loop {
            if !self.wm.has_pending_changes() {
                break;
            }
            let deltas = self.wm.drain_changes();
            let mut removed = Vec::new();
            for delta in &deltas {
                match delta {
                    WmeDelta::Add(w) => {
                        self.stats.wme_additions += 1;
                        if w.id == self.output_link {
                            self.output_activity = true;
                        }
                        if self.trace.has_subscribers() {
                            self.trace.emit(TraceEvent::WmeAdded {
                                timetag: w.timetag,
                                wme: w.to_string(),
                            });
                        }
                    }
                    WmeDelta::Remove(w) => {
                        self.stats.wme_removals += 1;
                        removed.push(w.timetag);
                        if self.trace.has_subscribers() {
                            self.trace.emit(TraceEvent::WmeRemoved {
                                timetag: w.timetag,
                                wme: w.to_string(),
                            });
                        }
                    }
                }
            }
            self.net.apply_deltas(&deltas);
            for tag in &removed {
                self.decide.wme_support.remove(tag);
            }
            self.with_ctx(|ctx| decide::check_gds(ctx, &removed));
            // A GDS hit pops goals, which buffers more removals; loop
            // until stable.
        }
    }

    fn with_ctx<R>(&mut self, f: impl FnOnce(&mut Ctx<'_>) -> R) -> R {
        let mut ctx = Self::make_ctx(
            &mut self.syms,
            &mut self.wm,
            &mut self.net,
            &mut self.prefs,
            &mut self.decide,
            &mut self.trace,
            &self.config,
            &mut self.rng,
            &mut self.firing_counts,
            &mut self.stats,
        );
        f(&mut ctx)
    }

    // --- run control ----------------------------------------------------

    /// A host-shareable interrupt flag; setting it stops any run at the
    /// next phase boundary.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Requests an interrupt.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True if an interrupt is pending.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Runs one phase. Returns false if an interrupt was pending (the
    /// phase does not run).
    pub fn step_phase(&mut self) -> bool {
        if self.stop.load(Ordering::Acquire) {
            self.trace.emit(TraceEvent::RunHalted {
                reason: "interrupted".to_string(),
            });
            return false;
        }

        let phase = self.phase;
        let cycle = self.decision_cycle;
        self.trace.emit(TraceEvent::PhaseStart {
            phase,
            decision_cycle: cycle,
        });

        match phase {
            Phase::Input => {
                if self.config.input_period > 0 && cycle % self.config.input_period == 0 {
                    let mut callback = self.input_callback.take();
                    if let Some(f) = &mut callback {
                        let mut io = InputContext {
                            syms: &mut self.syms,
                            wm: &mut self.wm,
                            input_link: self.input_link.clone(),
                        };
                        f(&mut io);
                    }
                    self.input_callback = callback;
                }
                self.flush_changes();
                self.phase = Phase::Preference;
            }
            Phase::Preference => {
                self.with_ctx(decide::fire_pending_matches);
                self.phase = Phase::WorkingMemory;
            }
            Phase::WorkingMemory => {
                self.with_ctx(|ctx| {
                    decide::resolve_attribute_slots(ctx);
                });
                self.flush_changes();
                self.stats.elaboration_cycles += 1;
                self.elaborations_this_cycle += 1;
                if self.net.has_pending_matches() {
                    if self.elaborations_this_cycle >= self.config.max_elaborations {
                        if !self.elaboration_bound_reported {
                            self.elaboration_bound_reported = true;
                            self.trace.emit(TraceEvent::ResourceBound {
                                bound: "max-elaborations".to_string(),
                                limit: self.config.max_elaborations,
                            });
                        }
                        self.phase = Phase::Output;
                    } else {
                        self.phase = Phase::Preference;
                    }
                } else {
                    self.phase = Phase::Output;
                }
            }
            Phase::Output => {
                if self.config.output_period > 0 && cycle % self.config.output_period == 0 {
                    let output_wmes = self.wm.wmes_of(&self.output_link).to_vec();
                    if self.output_activity {
                        self.nil_output_cycles = 0;
                    } else {
                        self.nil_output_cycles += 1;
                    }
                    let mut callback = self.output_callback.take();
                    if let Some(f) = &mut callback {
                        f(&output_wmes);
                    }
                    self.output_callback = callback;
                }
                self.phase = Phase::Decision;
            }
            Phase::Decision => {
                self.with_ctx(|ctx| {
                    decide::run_decision_phase(ctx);
                });
                self.flush_changes();
                self.decision_cycle += 1;
                self.stats.decision_cycles += 1;
                self.elaborations_this_cycle = 0;
                self.elaboration_bound_reported = false;
                self.decide.chunks_this_cycle = 0;
                self.decide.chunk_bound_reported = false;
                self.output_activity = false;
                self.phase = Phase::Input;
            }
        }

        self.stats.phases += 1;
        self.trace.emit(TraceEvent::PhaseEnd {
            phase,
            decision_cycle: cycle,
        });
        true
    }

    /// Runs `n` units, stopping early on interrupt.
    pub fn run(&mut self, n: u64, unit: RunUnit) {
        self.stop.store(false, Ordering::Release);
        let mut remaining = n;
        while remaining > 0 {
            let before = self.phase;
            if !self.step_phase() {
                return;
            }
            let completed = match unit {
                RunUnit::Phase => true,
                RunUnit::Elaboration => before == Phase::WorkingMemory,
                RunUnit::Decision => before == Phase::Decision,
            };
            if completed {
                remaining -= 1;
            }
        }
        self.trace.emit(TraceEvent::RunHalted {
            reason: format!("ran {n} {}", unit_name(n, unit)),
        });
    }

    /// Runs until interrupted.
    pub fn run_forever(&mut self) {
        self.stop.store(false, Ordering::Release);
        while self.step_phase() {}
    }

    /// Runs until the agent produces output, bounded by
    /// `max_nil_output_cycles` output phases without activity.
    pub fn run_til_output(&mut self) {
        self.stop.store(false, Ordering::Release);
        self.nil_output_cycles = 0;
        self.output_activity = false;
        loop {
            let before = self.phase;
            if !self.step_phase() {
                return;
            }
            if before == Phase::Output {
                if self.output_activity {
                    self.trace.emit(TraceEvent::RunHalted {
                        reason: "output generated".to_string(),
                    });
                    return;
                }
                if self.nil_output_cycles >= self.config.max_nil_output_cycles {
                    self.trace.emit(TraceEvent::ResourceBound {
                        bound: "max-nil-output-cycles".to_string(),
                        limit: self.config.max_nil_output_cycles,
                    });
                    self.trace.emit(TraceEvent::RunHalted {
                        reason: "no output".to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Clears working memory, the goal stack, and match state, then
    /// recreates the top state and io links. Productions stay loaded;
    /// firing counts and stats totals are preserved.
    pub fn init(&mut self) {
        debug!(agent = %self.name, "init");
        let live: Vec<u64> = self.wm.iter_live().map(|w| w.timetag).collect();
        for timetag in live {
            let _ = self.wm.remove(timetag);
        }
        // Apply removals so every token dies, then discard the match
        // events: nothing fires across an init boundary.
        let deltas = self.wm.drain_changes();
        self.net.apply_deltas(&deltas);
        self.stats.wme_removals += deltas.len() as u64;
        let _ = self.net.take_match_changes();

        self.prefs.clear();
        self.decide.clear();
        self.wm.clear();
        self.syms.reclaim();

        self.phase = Phase::Input;
        self.decision_cycle = 0;
        self.elaborations_this_cycle = 0;
        self.elaboration_bound_reported = false;
        self.output_activity = false;
        self.nil_output_cycles = 0;
        self.stop.store(false, Ordering::Release);

        self.bootstrap();
    }

    /// Marks a state for forced chunking (`LearnMode::Only`).
    pub fn force_learn_state(&mut self, goal: Symbol) {
        self.decide.force_learn.insert(goal);
    }

    /// Marks a state as never chunked (`LearnMode::Except`).
    pub fn dont_learn_state(&mut self, goal: Symbol) {
        self.decide.dont_learn.insert(goal);
    }
}

fn unit_name(n: u64, unit: RunUnit) -> &'static str {
    match (unit, n) {
        (RunUnit::Decision, 1) => "decision",
        (RunUnit::Decision, _) => "decisions",
        (RunUnit::Elaboration, 1) => "elaboration",
        (RunUnit::Elaboration, _) => "elaborations",
        (RunUnit::Phase, 1) => "phase",
        (RunUnit::Phase, _) => "phases",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn agent() -> Agent {
        Agent::new("test", AgentConfig::default().with_seed(7))
    }

    #[test]
    fn test_new_agent_has_top_state_and_io() {
        let a = agent();
        let top = a.top_state();
        assert!(top.is_identifier());
        let wmes = a.wmes_of(&top);
        // superstate, type, io
        assert_eq!(wmes.len(), 3);
        assert_eq!(a.goal_stack().len(), 1);
    }

    #[test]
    fn test_load_and_fire_simple_production() {
        let mut a = agent();
        a.load_productions("sp {p (state <s> ^superstate nil) --> (<s> ^greeting hello)}")
            .unwrap();
        a.run(1, RunUnit::Elaboration);
        let top = a.top_state();
        let greeting = a
            .wmes_of(&top)
            .into_iter()
            .find(|w| w.attr.as_str() == Some("greeting"));
        assert!(greeting.is_some());
        assert_eq!(a.firing_count("p"), 1);
    }

    #[test]
    fn test_reload_identical_is_noop_changed_replaces() {
        let mut a = agent();
        let n = a
            .load_productions("sp {p (state <s> ^superstate nil) --> (<s> ^x 1)}")
            .unwrap();
        assert_eq!(n, 1);
        let n = a
            .load_productions("sp {p (state <s> ^superstate nil) --> (<s> ^x 1)}")
            .unwrap();
        assert_eq!(n, 0);
        let n = a
            .load_productions("sp {p (state <s> ^superstate nil) --> (<s> ^x 2)}")
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(a.production_names(), vec!["p".to_string()]);
    }

    #[test]
    fn test_create_wme_unknown_identifier() {
        let mut a = agent();
        let orphan = {
            let mut other = SymbolTable::new();
            other.new_identifier('Z', 1)
        };
        let attr = a.str_sym("x");
        let value = a.int_sym(1);
        let err = a.create_wme(&orphan, attr, value, false).unwrap_err();
        assert!(matches!(err, WmError::UnknownIdentifier { .. }));
    }

    #[test]
    fn test_destroy_wme_twice_reports_not_found() {
        let mut a = agent();
        let top = a.top_state();
        let attr = a.str_sym("x");
        let value = a.int_sym(1);
        let wme = a.create_wme(&top, attr, value, false).unwrap();
        a.destroy_wme(wme.timetag).unwrap();
        let err = a.destroy_wme(wme.timetag).unwrap_err();
        assert!(matches!(err, WmError::NotFound { .. }));
    }

    #[test]
    fn test_init_preserves_firing_counts() {
        let mut a = agent();
        a.load_productions("sp {p (state <s> ^superstate nil) --> (<s> ^x 1)}")
            .unwrap();
        a.run(1, RunUnit::Decision);
        let fired = a.firing_count("p");
        assert!(fired >= 1);
        a.init();
        assert_eq!(a.firing_count("p"), fired);
        assert_eq!(a.goal_stack().len(), 1);
        // Productions survive init and fire again on the fresh state.
        a.run(1, RunUnit::Elaboration);
        assert_eq!(a.firing_count("p"), fired + 1);
    }

    #[test]
    fn test_stop_handle_interrupts_run_forever() {
        let mut a = agent();
        let stop = a.stop_handle();
        // Raise the flag from "another thread" before running.
        stop.store(true, std::sync::atomic::Ordering::Release);
        a.step_phase();
        // The phase did not advance.
        assert_eq!(a.stats().phases, 0);
    }

    #[test]
    fn test_input_callback_feeds_input_link() {
        let mut a = agent();
        a.load_productions(
            "sp {sense (state <s> ^io <io>) (<io> ^input-link <il>) (<il> ^heard <x>) --> (<s> ^echo <x>)}",
        )
        .unwrap();
        a.set_input_callback(Box::new(|io: &mut InputContext<'_>| {
            let link = io.input_link();
            let attr = io.str_sym("heard");
            let value = io.str_sym("ping");
            io.add(link, attr, value);
        }));
        a.run(1, RunUnit::Decision);
        let top = a.top_state();
        let echo = a
            .wmes_of(&top)
            .into_iter()
            .find(|w| w.attr.as_str() == Some("echo"));
        assert!(echo.is_some());
    }

    #[test]
    fn test_output_callback_sees_output_link() {
        let mut a = agent();
        a.load_productions(
            "sp {emit (state <s> ^io <io>) (<io> ^output-link <ol>) --> (<ol> ^beep loud)}",
        )
        .unwrap();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen2 = std::sync::Arc::clone(&seen);
        a.set_output_callback(Box::new(move |wmes| {
            seen2.store(wmes.len(), std::sync::atomic::Ordering::Release);
        }));
        a.run(1, RunUnit::Decision);
        assert_eq!(seen.load(std::sync::atomic::Ordering::Acquire), 1);
    }

    #[test]
    fn test_run_til_output_stops_on_output() {
        let mut a = agent();
        a.load_productions(
            "sp {emit (state <s> ^io <io>) (<io> ^output-link <ol>) --> (<ol> ^done yes)}",
        )
        .unwrap();
        a.run_til_output();
        let out = a.wmes_of(&a.output_link());
        assert_eq!(out.len(), 1);
        // Bounded even with no output.
        let mut idle = Agent::new("idle", AgentConfig::default().with_seed(1));
        idle.run_til_output();
        assert!(idle.stats().decision_cycles <= idle.config().max_nil_output_cycles + 2);
    }
}
