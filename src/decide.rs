//! Instantiation firing and the decision procedure.
//!
//! The match network reports assertions and retractions; this module
//! turns assertions into instantiations (evaluating RHS actions into
//! preferences, with operand2 o-support), turns retractions into
//! preference withdrawals, resolves ordinary attribute slots into
//! working-memory changes, and runs the decision phase proper: walking
//! the goal stack, selecting operators, pushing sub-goals on impasses,
//! and popping them when a higher slot settles.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::prefs::{resolve_slot, ImpasseKind, PreferenceMemory, SlotDecision, SlotKey};
use crate::production::{PreferenceSpec, ProductionKind, RhsFunction, RhsValue};
use crate::rete::{MatchChange, MatchDirection, ReteNetwork, WmeField};
use crate::symbol::{GoalLevel, Symbol, SymbolTable};
use crate::trace::{TraceBus, TraceEvent};
use crate::wm::{WmeRef, WorkingMemory};

/// One firing of a production.
#[derive(Debug, Clone)]
pub struct Instantiation {
    /// Unique id.
    pub id: u64,
    /// The production that fired.
    pub production: String,
    /// Complete-match token in the network.
    pub token: u64,
    /// Matched WMEs, one per condition (None at negated positions).
    pub wmes: Vec<Option<WmeRef>>,
    /// The deepest goal tested by the match.
    pub goal: Symbol,
    /// Its level.
    pub level: GoalLevel,
    /// Preferences created by this firing.
    pub preferences: Vec<(SlotKey, u64)>,
    /// True if the match tested the goal's selected operator.
    pub tested_operator: bool,
}

/// One goal (state) on the stack.
#[derive(Debug)]
pub struct GoalRecord {
    /// The goal identifier.
    pub goal: Symbol,
    /// Stack depth; the top state is 1.
    pub level: GoalLevel,
    /// The impasse that created this goal (None for the top state).
    pub impasse: Option<ImpasseKind>,
    /// Timetags of the architecture WMEs describing the goal.
    pub architecture_wmes: Vec<u64>,
    /// Grounded dependency set: higher-level timetags this goal's
    /// o-supported results were built from.
    pub gds: HashSet<u64>,
}

/// Decision-procedure state: the goal stack and live instantiations.
#[derive(Debug, Default)]
pub struct DecisionState {
    /// The goal stack, top state first.
    pub goals: Vec<GoalRecord>,
    /// Live instantiations by id.
    pub instantiations: HashMap<u64, Instantiation>,
    /// Complete-match token to instantiation id.
    pub token_to_inst: HashMap<u64, u64>,
    /// Timetag of a slot-installed WME to the instantiation whose
    /// acceptable preference put it there (backtrace support).
    pub wme_support: HashMap<u64, u64>,
    /// States chunking is forced on (`LearnMode::Only`).
    pub force_learn: HashSet<Symbol>,
    /// States chunking is suppressed on (`LearnMode::Except`).
    pub dont_learn: HashSet<Symbol>,
    /// Chunks built in the current decision cycle.
    pub chunks_this_cycle: u64,
    /// True once the max-chunks bound was reported this cycle.
    pub chunk_bound_reported: bool,
    next_inst: u64,
    pub(crate) chunk_counter: u64,
    pub(crate) justification_counter: u64,
}

impl DecisionState {
    /// Creates empty decision state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the goal record for an identifier, if it is a goal.
    #[must_use]
    pub fn goal_record(&self, id: &Symbol) -> Option<&GoalRecord> {
        self.goals.iter().find(|g| g.goal == *id)
    }

    /// True if the identifier is on the goal stack.
    #[must_use]
    pub fn is_goal(&self, id: &Symbol) -> bool {
        self.goal_record(id).is_some()
    }

    /// The deepest goal.
    #[must_use]
    pub fn bottom_goal(&self) -> Option<&GoalRecord> {
        self.goals.last()
    }

    pub(crate) fn next_instantiation_id(&mut self) -> u64 {
        self.next_inst += 1;
        self.next_inst
    }

    /// Clears the stack and instantiation maps; learning lists and
    /// counters survive (they are policy, not state).
    pub fn clear(&mut self) {
        self.goals.clear();
        self.instantiations.clear();
        self.token_to_inst.clear();
        self.wme_support.clear();
        self.chunks_this_cycle = 0;
        self.chunk_bound_reported = false;
    }
}

/// Borrowed view over everything a decision-cycle step may touch.
pub(crate) struct Ctx<'a> {
    pub syms: &'a mut SymbolTable,
    pub wm: &'a mut WorkingMemory,
    pub net: &'a mut ReteNetwork,
    pub prefs: &'a mut PreferenceMemory,
    pub decide: &'a mut DecisionState,
    pub trace: &'a mut TraceBus,
    pub config: &'a AgentConfig,
    pub rng: &'a mut StdRng,
    pub firing_counts: &'a mut HashMap<String, u64>,
    pub stats: &'a mut crate::agent::RunStats,
}

/// A preference that targets a level above its creating instantiation:
/// a sub-goal result, the seed of chunking.
#[derive(Debug, Clone)]
pub(crate) struct ResultPref {
    pub id: Symbol,
    pub attr: Symbol,
    pub value: Symbol,
    pub kind: PreferenceSpec,
    pub referent: Option<Symbol>,
}

/// Creates the top state with its io structure. Returns
/// `(state, input_link, output_link)`.
pub(crate) fn create_top_state(ctx: &mut Ctx) -> (Symbol, Symbol, Symbol) {
    let s = ctx.syms.new_identifier('S', 1);
    ctx.wm.register_identifier(&s);
    ctx.net.add_goal(&s);

    let superstate = ctx.syms.str_constant("superstate");
    let nil = ctx.syms.str_constant("nil");
    let type_attr = ctx.syms.str_constant("type");
    let state_sym = ctx.syms.str_constant("state");
    let io_attr = ctx.syms.str_constant("io");
    let input_link_attr = ctx.syms.str_constant("input-link");
    let output_link_attr = ctx.syms.str_constant("output-link");

    let io = ctx.syms.new_identifier('I', 1);
    let input_link = ctx.syms.new_identifier('I', 1);
    let output_link = ctx.syms.new_identifier('I', 1);

    let mut architecture_wmes = Vec::new();
    for (id, attr, value) in [
        (s.clone(), superstate, nil),
        (s.clone(), type_attr, state_sym),
        (s.clone(), io_attr, io.clone()),
        (io.clone(), input_link_attr, input_link.clone()),
        (io, output_link_attr, output_link.clone()),
    ] {
        let wme = ctx.wm.add(id, attr, value, false);
        architecture_wmes.push(wme.timetag);
    }

    ctx.decide.goals.push(GoalRecord {
        goal: s.clone(),
        level: 1,
        impasse: None,
        architecture_wmes,
        gds: HashSet::new(),
    });

    (s, input_link, output_link)
}

/// Processes every queued match change: assertions fire, retractions
/// withdraw.
pub(crate) fn fire_pending_matches(ctx: &mut Ctx) {
    let changes = ctx.net.take_match_changes();
    for change in changes {
        match change.direction {
            MatchDirection::Assert => fire_instantiation(ctx, change),
            MatchDirection::Retract => retract_instantiation(ctx, &change),
        }
    }
}

fn fire_instantiation(ctx: &mut Ctx, change: MatchChange) {
    let Some(production) = ctx.net.production(&change.production).cloned() else {
        return;
    };
    let bindings = ctx
        .net
        .bindings_of(&change.production)
        .cloned()
        .unwrap_or_default();

    let operator_attr = ctx.syms.str_constant("operator");

    // The match goal is the deepest tested goal; default to the top.
    let mut goal = ctx
        .decide
        .goals
        .first()
        .map(|g| g.goal.clone())
        .unwrap_or_else(|| ctx.syms.new_identifier('S', 1));
    let mut level: GoalLevel = 1;
    for wme in change.wmes.iter().flatten() {
        if let Some(record) = ctx.decide.goal_record(&wme.id) {
            if record.level >= level {
                level = record.level;
                goal = record.goal.clone();
            }
        }
    }

    let tested_operator = change
        .wmes
        .iter()
        .flatten()
        .any(|w| w.id == goal && w.attr == operator_attr && !w.acceptable);

    let inst_id = ctx.decide.next_instantiation_id();
    let mut fresh: HashMap<String, Symbol> = HashMap::new();
    let mut created: Vec<(SlotKey, u64)> = Vec::new();
    let mut results: Vec<ResultPref> = Vec::new();

    for action in &production.actions {
        let Some(id_sym) = eval_rhs(ctx, &action.id, &bindings, &change.wmes, &mut fresh, level)
        else {
            continue;
        };
        if !id_sym.is_identifier() {
            warn!(production = %change.production, "action identifier evaluated to a constant; action skipped");
            continue;
        }
        let Some(attr_sym) =
            eval_rhs(ctx, &action.attr, &bindings, &change.wmes, &mut fresh, level)
        else {
            continue;
        };
        let Some(value_sym) =
            eval_rhs(ctx, &action.value, &bindings, &change.wmes, &mut fresh, level)
        else {
            continue;
        };
        let referent = match &action.referent {
            Some(r) => eval_rhs(ctx, r, &bindings, &change.wmes, &mut fresh, level),
            None => None,
        };

        // Operand2 o-support: the instantiation applied the selected
        // operator, and this action is not itself an operator
        // proposal/comparison.
        let o_supported = tested_operator && attr_sym != operator_attr;

        let pref_id = ctx.prefs.add(
            id_sym.clone(),
            attr_sym.clone(),
            value_sym.clone(),
            action.preference,
            referent.clone(),
            o_supported,
            Some(inst_id),
        );
        created.push(((id_sym.clone(), attr_sym.clone()), pref_id));

        let target_level = ctx.wm.effective_level(&id_sym);
        if target_level != 0 && target_level < level {
            results.push(ResultPref {
                id: id_sym.clone(),
                attr: attr_sym.clone(),
                value: value_sym,
                kind: action.preference,
                referent,
            });
        }

        // O-supported local structure ties this goal's fate to the
        // higher-level WMEs it was derived from.
        if o_supported && level > 1 {
            if let Some(record) = ctx.decide.goals.iter_mut().find(|g| g.level == level) {
                for wme in change.wmes.iter().flatten() {
                    let wme_level = ctx.wm.effective_level(&wme.id);
                    if wme_level != 0 && wme_level < level {
                        record.gds.insert(wme.timetag);
                    }
                }
            }
        }
    }

    let instantiation = Instantiation {
        id: inst_id,
        production: change.production.clone(),
        token: change.token,
        wmes: change.wmes,
        goal,
        level,
        preferences: created,
        tested_operator,
    };
    ctx.decide.instantiations.insert(inst_id, instantiation);
    ctx.decide.token_to_inst.insert(change.token, inst_id);
    *ctx.firing_counts.entry(change.production.clone()).or_insert(0) += 1;
    ctx.stats.production_firings += 1;

    debug!(production = %change.production, instantiation = inst_id, "fired");
    ctx.trace.emit(TraceEvent::ProductionFired {
        production: change.production.clone(),
        instantiation: inst_id,
    });

    if !results.is_empty() {
        if ctx.decide.chunks_this_cycle >= ctx.config.max_chunks {
            if !ctx.decide.chunk_bound_reported {
                ctx.decide.chunk_bound_reported = true;
                ctx.trace.emit(TraceEvent::ResourceBound {
                    bound: "max-chunks".to_string(),
                    limit: ctx.config.max_chunks,
                });
            }
        } else {
            crate::chunk::learn_from_instantiation(ctx, inst_id, &results);
        }
    }
}

fn retract_instantiation(ctx: &mut Ctx, change: &MatchChange) {
    let Some(inst_id) = ctx.decide.token_to_inst.remove(&change.token) else {
        return;
    };
    let Some(instantiation) = ctx.decide.instantiations.remove(&inst_id) else {
        return;
    };
    ctx.prefs.retract_instantiation(inst_id);

    debug!(production = %instantiation.production, instantiation = inst_id, "retracted");
    ctx.trace.emit(TraceEvent::ProductionRetracted {
        production: instantiation.production.clone(),
        instantiation: inst_id,
    });

    // A justification exists only to support its one instantiation.
    let is_justification = ctx
        .net
        .production(&instantiation.production)
        .is_some_and(|p| p.kind == ProductionKind::Justification);
    if is_justification {
        ctx.net.excise(&instantiation.production);
    }
}

fn eval_rhs(
    ctx: &mut Ctx,
    value: &RhsValue,
    bindings: &HashMap<String, (usize, WmeField)>,
    wmes: &[Option<WmeRef>],
    fresh: &mut HashMap<String, Symbol>,
    level: GoalLevel,
) -> Option<Symbol> {
    match value {
        RhsValue::Constant(s) => Some(s.clone()),
        RhsValue::Variable(name) => {
            if let Some((ordinal, field)) = bindings.get(name) {
                if let Some(Some(wme)) = wmes.get(*ordinal) {
                    return Some(field.of(wme).clone());
                }
            }
            if let Some(sym) = fresh.get(name) {
                return Some(sym.clone());
            }
            // First unbound use mints a fresh identifier.
            let letter = name.chars().next().unwrap_or('i');
            let sym = ctx.syms.new_identifier(letter, level);
            ctx.wm.register_identifier(&sym);
            fresh.insert(name.clone(), sym.clone());
            Some(sym)
        }
        RhsValue::Function(RhsFunction::Gensym { prefix }) => {
            Some(ctx.syms.generate_unique(prefix))
        }
        RhsValue::Function(RhsFunction::RandInt { bound }) => {
            let bound = (*bound).max(1);
            let v = ctx.rng.gen_range(0..bound);
            Some(ctx.syms.int_constant(v))
        }
    }
}

/// Resolves every non-context slot into working-memory changes.
/// Returns true if anything was installed or removed.
pub(crate) fn resolve_attribute_slots(ctx: &mut Ctx) -> bool {
    let operator_attr = ctx.syms.str_constant("operator");
    let mut changed = false;

    let keys = ctx.prefs.keys();
    for key in keys {
        if key.1 == operator_attr && ctx.decide.is_goal(&key.0) {
            continue;
        }
        let Some(slot) = ctx.prefs.slot(&key) else {
            continue;
        };
        let decision = resolve_slot(
            slot,
            false,
            ctx.config.attribute_preference_mode,
            ctx.rng,
        );

        // Supporting instantiation per winner, for chunk backtracing.
        let mut support: HashMap<Symbol, u64> = HashMap::new();
        for pref in &slot.preferences {
            if pref.kind == PreferenceSpec::Acceptable {
                if let Some(inst) = pref.instantiation {
                    support.entry(pref.value.clone()).or_insert(inst);
                }
            }
        }

        let winners: HashSet<Symbol> = decision.winners.iter().cloned().collect();
        let installed: Vec<(Symbol, u64)> = slot
            .installed
            .iter()
            .map(|(v, t)| (v.clone(), *t))
            .collect();

        for (value, timetag) in &installed {
            if !winners.contains(value) {
                let _ = ctx.wm.remove(*timetag);
                ctx.decide.wme_support.remove(timetag);
                ctx.prefs.slot_mut(&key).installed.remove(value);
                changed = true;
            }
        }
        for value in &decision.winners {
            let already = ctx
                .prefs
                .slot(&key)
                .is_some_and(|s| s.installed.contains_key(value));
            if !already {
                let wme = ctx
                    .wm
                    .add(key.0.clone(), key.1.clone(), value.clone(), false);
                if let Some(inst) = support.get(value) {
                    ctx.decide.wme_support.insert(wme.timetag, *inst);
                }
                ctx.prefs
                    .slot_mut(&key)
                    .installed
                    .insert(value.clone(), wme.timetag);
                changed = true;
            }
        }
    }

    ctx.prefs.sweep_empty();
    changed
}

/// Runs the decision phase: walks the goal stack top-down, settles
/// context slots, installs operators, and pushes/pops sub-goals.
/// Returns true if the stack or any operator selection changed.
pub(crate) fn run_decision_phase(ctx: &mut Ctx) -> bool {
    let operator_attr = ctx.syms.str_constant("operator");
    let mut changed = false;

    let mut index = 0;
    while index < ctx.decide.goals.len() {
        let goal = ctx.decide.goals[index].goal.clone();
        let key: SlotKey = (goal.clone(), operator_attr.clone());

        let (decision, acceptables, reconsider_current) = match ctx.prefs.slot(&key) {
            Some(slot) => {
                let decision =
                    resolve_slot(slot, true, ctx.config.attribute_preference_mode, ctx.rng);
                let mut acceptables: Vec<Symbol> = Vec::new();
                for p in &slot.preferences {
                    if p.kind == PreferenceSpec::Acceptable && !acceptables.contains(&p.value) {
                        acceptables.push(p.value.clone());
                    }
                }
                let current = slot.installed.keys().next().cloned();
                let reconsider = current.as_ref().is_some_and(|cur| {
                    slot.preferences
                        .iter()
                        .any(|p| p.kind == PreferenceSpec::Reconsider && p.value == *cur)
                });
                (decision, acceptables, reconsider)
            }
            None => (
                SlotDecision {
                    winners: Vec::new(),
                    impasse: None,
                    candidates: Vec::new(),
                    conflict_report: None,
                },
                Vec::new(),
                false,
            ),
        };

        if let Some(reason) = &decision.conflict_report {
            warn!(goal = %goal, reason = %reason, "inconsistent preference set");
            ctx.trace.emit(TraceEvent::PreferenceConflict {
                id: goal.to_string(),
                attr: "operator".to_string(),
                reason: reason.clone(),
            });
        }

        sync_acceptable_wmes(ctx, &key, &acceptables);

        let current: Option<(Symbol, u64)> = ctx
            .prefs
            .slot(&key)
            .and_then(|s| s.installed.iter().next().map(|(v, t)| (v.clone(), *t)));

        if reconsider_current {
            if let Some((value, timetag)) = &current {
                let _ = ctx.wm.remove(*timetag);
                ctx.decide.wme_support.remove(timetag);
                ctx.prefs.slot_mut(&key).installed.remove(value);
                pop_goals_below(ctx, index);
                changed = true;
                break;
            }
        }

        match (decision.winners.first(), decision.impasse) {
            (Some(winner), _) => {
                if current.as_ref().is_some_and(|(v, _)| v == winner) {
                    index += 1;
                    continue;
                }
                if let Some((value, timetag)) = &current {
                    let _ = ctx.wm.remove(*timetag);
                    ctx.decide.wme_support.remove(timetag);
                    ctx.prefs.slot_mut(&key).installed.remove(value);
                }
                let wme = ctx
                    .wm
                    .add(goal.clone(), operator_attr.clone(), winner.clone(), false);
                let support = ctx.prefs.slot(&key).and_then(|s| {
                    s.preferences
                        .iter()
                        .find(|p| p.kind == PreferenceSpec::Acceptable && p.value == *winner)
                        .and_then(|p| p.instantiation)
                });
                if let Some(inst) = support {
                    ctx.decide.wme_support.insert(wme.timetag, inst);
                }
                ctx.prefs
                    .slot_mut(&key)
                    .installed
                    .insert(winner.clone(), wme.timetag);
                pop_goals_below(ctx, index);
                debug!(goal = %goal, operator = %winner, "operator selected");
                ctx.trace.emit(TraceEvent::DecisionMade {
                    goal: goal.to_string(),
                    operator: winner.to_string(),
                });
                changed = true;
                break;
            }
            (None, Some(kind)) => {
                if let Some((value, timetag)) = &current {
                    let _ = ctx.wm.remove(*timetag);
                    ctx.decide.wme_support.remove(timetag);
                    ctx.prefs.slot_mut(&key).installed.remove(value);
                }
                let existing = ctx.decide.goals.get(index + 1);
                if existing.is_some_and(|g| g.impasse == Some(kind)) {
                    index += 1;
                    continue;
                }
                pop_goals_below(ctx, index);
                push_subgoal(ctx, index, kind, "operator", &decision.candidates);
                changed = true;
                break;
            }
            (None, None) => {
                if let Some((value, timetag)) = &current {
                    // The selection lost its preferences.
                    let _ = ctx.wm.remove(*timetag);
                    ctx.decide.wme_support.remove(timetag);
                    ctx.prefs.slot_mut(&key).installed.remove(value);
                    pop_goals_below(ctx, index);
                    changed = true;
                    break;
                }
                index += 1;
            }
        }
    }

    if !changed {
        // Quiescence with no selection anywhere: the bottom goal
        // impasses with a no-change.
        let bottom = ctx.decide.goals.len() - 1;
        let goal = ctx.decide.goals[bottom].goal.clone();
        let key: SlotKey = (goal, operator_attr);
        let has_operator = ctx
            .prefs
            .slot(&key)
            .is_some_and(|s| !s.installed.is_empty());
        let attr = if has_operator { "operator" } else { "state" };
        push_subgoal(ctx, bottom, ImpasseKind::NoChange, attr, &[]);
        changed = true;
    }

    changed
}

/// Keeps the context slot's acceptable-preference WMEs
/// (`goal ^operator <o> +`) in sync with the candidate set.
fn sync_acceptable_wmes(ctx: &mut Ctx, key: &SlotKey, acceptables: &[Symbol]) {
    let mut support: HashMap<Symbol, u64> = HashMap::new();
    if let Some(slot) = ctx.prefs.slot(key) {
        for pref in &slot.preferences {
            if pref.kind == PreferenceSpec::Acceptable {
                if let Some(inst) = pref.instantiation {
                    support.entry(pref.value.clone()).or_insert(inst);
                }
            }
        }
    }

    let installed: Vec<(Symbol, u64)> = ctx
        .prefs
        .slot(key)
        .map(|s| {
            s.acceptable_installed
                .iter()
                .map(|(v, t)| (v.clone(), *t))
                .collect()
        })
        .unwrap_or_default();

    for (value, timetag) in &installed {
        if !acceptables.contains(value) {
            let _ = ctx.wm.remove(*timetag);
            ctx.decide.wme_support.remove(timetag);
            ctx.prefs
                .slot_mut(key)
                .acceptable_installed
                .remove(value);
        }
    }
    for value in acceptables {
        let present = ctx
            .prefs
            .slot(key)
            .is_some_and(|s| s.acceptable_installed.contains_key(value));
        if !present {
            let wme = ctx.wm.add(key.0.clone(), key.1.clone(), value.clone(), true);
            if let Some(inst) = support.get(value) {
                ctx.decide.wme_support.insert(wme.timetag, *inst);
            }
            ctx.prefs
                .slot_mut(key)
                .acceptable_installed
                .insert(value.clone(), wme.timetag);
        }
    }
}

fn impasse_name(kind: ImpasseKind) -> &'static str {
    match kind {
        ImpasseKind::Tie => "tie",
        ImpasseKind::Conflict => "conflict",
        ImpasseKind::ConstraintFailure => "constraint-failure",
        ImpasseKind::NoChange => "no-change",
    }
}

/// Pushes a sub-goal under `parent_index` for the given impasse.
fn push_subgoal(
    ctx: &mut Ctx,
    parent_index: usize,
    kind: ImpasseKind,
    attribute: &str,
    items: &[Symbol],
) {
    let parent = ctx.decide.goals[parent_index].goal.clone();
    let level = u32::try_from(parent_index).unwrap_or(u32::MAX - 2) + 2;
    let goal = ctx.syms.new_identifier('S', level);
    ctx.wm.register_identifier(&goal);
    ctx.net.add_goal(&goal);

    let superstate = ctx.syms.str_constant("superstate");
    let type_attr = ctx.syms.str_constant("type");
    let state_sym = ctx.syms.str_constant("state");
    let attribute_attr = ctx.syms.str_constant("attribute");
    let attribute_value = ctx.syms.str_constant(attribute);
    let impasse_attr = ctx.syms.str_constant("impasse");
    let impasse_value = ctx.syms.str_constant(impasse_name(kind));
    let choices_attr = ctx.syms.str_constant("choices");
    let choices_value = match kind {
        ImpasseKind::Tie | ImpasseKind::Conflict => ctx.syms.str_constant("multiple"),
        _ => ctx.syms.str_constant("none"),
    };
    let quiescence_attr = ctx.syms.str_constant("quiescence");
    let t_sym = ctx.syms.str_constant("t");
    let item_attr = ctx.syms.str_constant("item");

    let mut architecture_wmes = Vec::new();
    for (attr, value) in [
        (superstate, parent.clone()),
        (type_attr, state_sym),
        (attribute_attr, attribute_value),
        (impasse_attr, impasse_value),
        (choices_attr, choices_value),
        (quiescence_attr, t_sym),
    ] {
        let wme = ctx.wm.add(goal.clone(), attr, value, false);
        architecture_wmes.push(wme.timetag);
    }
    for item in items {
        let wme = ctx.wm.add(goal.clone(), item_attr.clone(), item.clone(), false);
        architecture_wmes.push(wme.timetag);
    }

    debug!(parent = %parent, subgoal = %goal, impasse = impasse_name(kind), "impasse");
    ctx.trace.emit(TraceEvent::ImpasseCreated {
        goal: parent.to_string(),
        impasse: impasse_name(kind).to_string(),
        subgoal: goal.to_string(),
    });

    ctx.decide.goals.push(GoalRecord {
        goal,
        level,
        impasse: Some(kind),
        architecture_wmes,
        gds: HashSet::new(),
    });
}

/// Pops every goal below `keep_index`, removing their structures from
/// working memory.
pub(crate) fn pop_goals_below(ctx: &mut Ctx, keep_index: usize) {
    while ctx.decide.goals.len() > keep_index + 1 {
        let record = ctx.decide.goals.pop().expect("stack length checked");
        let parent = ctx
            .decide
            .goals
            .last()
            .map(|g| g.goal.to_string())
            .unwrap_or_default();
        ctx.trace.emit(TraceEvent::ImpasseResolved {
            goal: parent,
            subgoal: record.goal.to_string(),
        });
        ctx.net.remove_goal(&record.goal);

        let installed = ctx.prefs.remove_slots_of(&record.goal);
        for timetag in installed {
            let _ = ctx.wm.remove(timetag);
            ctx.decide.wme_support.remove(&timetag);
        }
        for timetag in record.architecture_wmes {
            let _ = ctx.wm.remove(timetag);
        }

        // Sweep structures local to the popped goal (and anything
        // deeper that survived only through it).
        let doomed: Vec<u64> = ctx
            .wm
            .iter_live()
            .filter(|w| {
                let lvl = ctx.wm.effective_level(&w.id);
                lvl >= record.level
            })
            .map(|w| w.timetag)
            .collect();
        for timetag in doomed {
            let _ = ctx.wm.remove(timetag);
            ctx.decide.wme_support.remove(&timetag);
        }
    }
}

/// Invalidates goals whose grounded dependency set lost a member.
pub(crate) fn check_gds(ctx: &mut Ctx, removed: &[u64]) {
    if removed.is_empty() {
        return;
    }
    let hit = ctx
        .decide
        .goals
        .iter()
        .position(|g| removed.iter().any(|t| g.gds.contains(t)));
    if let Some(index) = hit {
        let goal = ctx.decide.goals[index].goal.clone();
        debug!(goal = %goal, "grounded dependency lost; goal removed");
        if index == 0 {
            // The top state carries no GDS; defensive guard.
            return;
        }
        pop_goals_below(ctx, index - 1);
    }
}
