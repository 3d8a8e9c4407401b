//! Preference memory: slots and the slot-resolution algorithm.
//!
//! Every preference targets one `(identifier, attribute)` slot. A slot
//! collects the preferences of all live instantiations (plus any created
//! by the architecture) and resolution computes which values are
//! installed in working memory. Context slots (the per-goal `^operator`
//! slots) run the full preference vocabulary and can impasse; ordinary
//! attribute slots install every surviving acceptable value.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::AttributePreferenceMode;
use crate::production::PreferenceSpec;
use crate::symbol::Symbol;

/// Key of a slot: the owning identifier and attribute.
pub type SlotKey = (Symbol, Symbol);

/// A runtime preference: one vote about a slot value.
#[derive(Debug, Clone)]
pub struct Preference {
    /// Unique, monotonically increasing id (creation order).
    pub id: u64,
    /// Slot value the preference is about.
    pub value: Symbol,
    /// The preference kind.
    pub kind: PreferenceSpec,
    /// Referent value for binary kinds.
    pub referent: Option<Symbol>,
    /// o-supported preferences persist after their instantiation
    /// retracts; i-supported ones are removed with it.
    pub o_supported: bool,
    /// Creating instantiation, or `None` for architecture preferences.
    pub instantiation: Option<u64>,
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.kind)?;
        if let Some(r) = &self.referent {
            write!(f, " {r}")?;
        }
        write!(f, " ({})", if self.o_supported { "o" } else { "i" })
    }
}

/// All preferences for one slot.
#[derive(Debug, Default)]
pub struct Slot {
    /// Live preferences in creation order.
    pub preferences: Vec<Preference>,
    /// Timetags of the WMEs resolution currently has installed,
    /// keyed by value.
    pub installed: HashMap<Symbol, u64>,
    /// Timetags of acceptable-preference WMEs materialized for context
    /// slots, keyed by candidate value.
    pub acceptable_installed: HashMap<Symbol, u64>,
}

/// Why a context slot could not settle on one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpasseKind {
    /// Several candidates with no ordering between them.
    Tie,
    /// Candidates with contradictory orderings.
    Conflict,
    /// Require/prohibit contradiction, or every candidate screened out.
    ConstraintFailure,
    /// Nothing changed this decision (pushed by the driver, not by slot
    /// resolution).
    NoChange,
}

impl fmt::Display for ImpasseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tie => write!(f, "tie"),
            Self::Conflict => write!(f, "conflict"),
            Self::ConstraintFailure => write!(f, "constraint-failure"),
            Self::NoChange => write!(f, "no-change"),
        }
    }
}

/// Outcome of resolving one slot.
#[derive(Debug, Clone)]
pub struct SlotDecision {
    /// Values to install. At most one for context slots.
    pub winners: Vec<Symbol>,
    /// Impasse to raise, if the slot is a context slot and could not
    /// settle.
    pub impasse: Option<ImpasseKind>,
    /// Acceptable candidates that survived screening, for impasse
    /// `^item` structure.
    pub candidates: Vec<Symbol>,
    /// Human-readable description of an inconsistent preference set
    /// (require and prohibit on one value), reported through the trace.
    pub conflict_report: Option<String>,
}

impl SlotDecision {
    fn empty() -> Self {
        Self {
            winners: Vec::new(),
            impasse: None,
            candidates: Vec::new(),
            conflict_report: None,
        }
    }
}

/// The per-agent preference store.
#[derive(Debug, Default)]
pub struct PreferenceMemory {
    slots: HashMap<SlotKey, Slot>,
    next_pref_id: u64,
}

impl PreferenceMemory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a preference to its slot, returning its id.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        id: Symbol,
        attr: Symbol,
        value: Symbol,
        kind: PreferenceSpec,
        referent: Option<Symbol>,
        o_supported: bool,
        instantiation: Option<u64>,
    ) -> u64 {
        self.next_pref_id += 1;
        let pref = Preference {
            id: self.next_pref_id,
            value,
            kind,
            referent,
            o_supported,
            instantiation,
        };
        self.slots.entry((id, attr)).or_default().preferences.push(pref);
        self.next_pref_id
    }

    /// Removes one preference by id. Returns true if it was present.
    pub fn remove(&mut self, key: &SlotKey, pref_id: u64) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        let before = slot.preferences.len();
        slot.preferences.retain(|p| p.id != pref_id);
        before != slot.preferences.len()
    }

    /// Removes the i-supported preferences created by an instantiation.
    /// Returns the affected slot keys.
    pub fn retract_instantiation(&mut self, instantiation: u64) -> Vec<SlotKey> {
        let mut touched = Vec::new();
        for (key, slot) in &mut self.slots {
            let before = slot.preferences.len();
            slot.preferences
                .retain(|p| p.o_supported || p.instantiation != Some(instantiation));
            if slot.preferences.len() != before {
                touched.push(key.clone());
            }
        }
        touched
    }

    /// The slot for a key, if it exists.
    #[must_use]
    pub fn slot(&self, key: &SlotKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Mutable access, creating the slot on first use.
    pub fn slot_mut(&mut self, key: &SlotKey) -> &mut Slot {
        self.slots.entry(key.clone()).or_default()
    }

    /// Keys of every slot currently holding preferences or installed
    /// WMEs.
    #[must_use]
    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots.keys().cloned().collect()
    }

    /// Drops slots with no preferences and nothing installed.
    pub fn sweep_empty(&mut self) {
        self.slots.retain(|_, slot| {
            !slot.preferences.is_empty()
                || !slot.installed.is_empty()
                || !slot.acceptable_installed.is_empty()
        });
    }

    /// Removes every slot owned by the given identifier, returning the
    /// timetags of WMEs that were installed from them.
    pub fn remove_slots_of(&mut self, id: &Symbol) -> Vec<u64> {
        let keys: Vec<SlotKey> = self
            .slots
            .keys()
            .filter(|(slot_id, _)| slot_id == id)
            .cloned()
            .collect();
        let mut timetags = Vec::new();
        for key in keys {
            if let Some(slot) = self.slots.remove(&key) {
                timetags.extend(slot.installed.values().copied());
                timetags.extend(slot.acceptable_installed.values().copied());
            }
        }
        timetags
    }

    /// Clears all slots.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Resolves a slot's preference set into installed values.
///
/// `context` selects the full operator-slot semantics; non-context slots
/// honor the vocabulary allowed by `mode`. `rng` breaks fully
/// indifferent context choices.
pub fn resolve_slot(
    slot: &Slot,
    context: bool,
    mode: AttributePreferenceMode,
    rng: &mut StdRng,
) -> SlotDecision {
    let prefs = &slot.preferences;
    if prefs.is_empty() {
        return SlotDecision::empty();
    }

    // Candidate order follows preference creation order for determinism.
    let mut candidates: Vec<Symbol> = Vec::new();
    for p in prefs {
        if p.kind == PreferenceSpec::Acceptable && !candidates.contains(&p.value) {
            candidates.push(p.value.clone());
        }
    }

    if !context && mode == AttributePreferenceMode::Strict {
        // Only acceptable and reject participate.
        let rejected: HashSet<&Symbol> = prefs
            .iter()
            .filter(|p| p.kind == PreferenceSpec::Reject)
            .map(|p| &p.value)
            .collect();
        let winners: Vec<Symbol> = candidates
            .iter()
            .filter(|v| !rejected.contains(v))
            .cloned()
            .collect();
        return SlotDecision {
            candidates: winners.clone(),
            winners,
            impasse: None,
            conflict_report: None,
        };
    }

    let had_acceptables = !candidates.is_empty();

    let requires: Vec<Symbol> = dedup_values(prefs, PreferenceSpec::Require);
    let prohibits: HashSet<Symbol> = dedup_values(prefs, PreferenceSpec::Prohibit)
        .into_iter()
        .collect();

    // An internally inconsistent require set is reported and resolved
    // through the constraint-failure path.
    if let Some(clash) = requires.iter().find(|v| prohibits.contains(v)) {
        return SlotDecision {
            winners: Vec::new(),
            impasse: context.then_some(ImpasseKind::ConstraintFailure),
            candidates,
            conflict_report: Some(format!(
                "require and prohibit on the same value {clash}"
            )),
        };
    }
    match requires.len() {
        0 => {}
        1 => {
            return SlotDecision {
                winners: vec![requires[0].clone()],
                impasse: None,
                candidates,
                conflict_report: None,
            };
        }
        _ => {
            return SlotDecision {
                winners: Vec::new(),
                impasse: context.then_some(ImpasseKind::ConstraintFailure),
                candidates,
                conflict_report: Some("multiple require preferences".to_string()),
            };
        }
    }

    let rejected: HashSet<&Symbol> = prefs
        .iter()
        .filter(|p| p.kind == PreferenceSpec::Reject)
        .map(|p| &p.value)
        .collect();
    candidates.retain(|v| !rejected.contains(v) && !prohibits.contains(v));

    if candidates.is_empty() {
        return SlotDecision {
            winners: Vec::new(),
            impasse: (context && had_acceptables).then_some(ImpasseKind::ConstraintFailure),
            candidates,
            conflict_report: None,
        };
    }

    // Better/worse dominance. `worse(a, b)` is `better(b, a)`.
    let mut edges: HashSet<(Symbol, Symbol)> = HashSet::new();
    for p in prefs {
        let Some(referent) = &p.referent else {
            continue;
        };
        match p.kind {
            PreferenceSpec::Better => {
                edges.insert((p.value.clone(), referent.clone()));
            }
            PreferenceSpec::Worse => {
                edges.insert((referent.clone(), p.value.clone()));
            }
            _ => {}
        }
    }
    for (a, b) in &edges {
        if a != b
            && edges.contains(&(b.clone(), a.clone()))
            && candidates.contains(a)
            && candidates.contains(b)
        {
            return SlotDecision {
                winners: Vec::new(),
                impasse: context.then_some(ImpasseKind::Conflict),
                candidates,
                conflict_report: None,
            };
        }
    }
    let undominated: Vec<Symbol> = candidates
        .iter()
        .filter(|v| {
            !candidates
                .iter()
                .any(|u| u != *v && edges.contains(&(u.clone(), (*v).clone())))
        })
        .cloned()
        .collect();
    if undominated.is_empty() {
        // A dominance cycle with no mutual pair still leaves no basis
        // for choice.
        return SlotDecision {
            winners: Vec::new(),
            impasse: context.then_some(ImpasseKind::Conflict),
            candidates,
            conflict_report: None,
        };
    }
    let mut candidates = undominated;

    // Best narrows to its subset; worst is a last resort.
    let best: Vec<Symbol> = filter_marked(&candidates, prefs, PreferenceSpec::Best);
    if !best.is_empty() {
        candidates = best;
    } else {
        let worst: HashSet<Symbol> = dedup_values(prefs, PreferenceSpec::Worst)
            .into_iter()
            .collect();
        let not_worst: Vec<Symbol> = candidates
            .iter()
            .filter(|v| !worst.contains(v))
            .cloned()
            .collect();
        if !not_worst.is_empty() {
            candidates = not_worst;
        }
    }

    if candidates.len() == 1 {
        return SlotDecision {
            winners: candidates.clone(),
            impasse: None,
            candidates,
            conflict_report: None,
        };
    }

    if !context {
        // Multi-valued attribute: install every survivor.
        return SlotDecision {
            candidates: candidates.clone(),
            winners: candidates,
            impasse: None,
            conflict_report: None,
        };
    }

    // Indifference closure: every pair must be covered by unary or
    // binary indifference.
    let unary: HashSet<Symbol> = dedup_values(prefs, PreferenceSpec::UnaryIndifferent)
        .into_iter()
        .collect();
    let binary: HashSet<(Symbol, Symbol)> = prefs
        .iter()
        .filter(|p| p.kind == PreferenceSpec::BinaryIndifferent)
        .filter_map(|p| p.referent.as_ref().map(|r| (p.value.clone(), r.clone())))
        .collect();
    let indifferent_pair = |a: &Symbol, b: &Symbol| {
        unary.contains(a) && unary.contains(b)
            || binary.contains(&(a.clone(), b.clone()))
            || binary.contains(&(b.clone(), a.clone()))
    };
    let fully_indifferent = candidates.iter().enumerate().all(|(i, a)| {
        candidates
            .iter()
            .skip(i + 1)
            .all(|b| indifferent_pair(a, b))
    });

    if fully_indifferent {
        let pick = rng.gen_range(0..candidates.len());
        return SlotDecision {
            winners: vec![candidates[pick].clone()],
            impasse: None,
            candidates,
            conflict_report: None,
        };
    }

    SlotDecision {
        winners: Vec::new(),
        impasse: Some(ImpasseKind::Tie),
        candidates,
        conflict_report: None,
    }
}

fn dedup_values(prefs: &[Preference], kind: PreferenceSpec) -> Vec<Symbol> {
    let mut out: Vec<Symbol> = Vec::new();
    for p in prefs {
        if p.kind == kind && !out.contains(&p.value) {
            out.push(p.value.clone());
        }
    }
    out
}

fn filter_marked(candidates: &[Symbol], prefs: &[Preference], kind: PreferenceSpec) -> Vec<Symbol> {
    let marked: HashSet<Symbol> = dedup_values(prefs, kind).into_iter().collect();
    candidates
        .iter()
        .filter(|v| marked.contains(v))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    struct Setup {
        syms: SymbolTable,
        prefs: PreferenceMemory,
        key: SlotKey,
    }

    impl Setup {
        fn new() -> Self {
            let mut syms = SymbolTable::new();
            let s = syms.new_identifier('S', 1);
            let operator = syms.str_constant("operator");
            Self {
                syms,
                prefs: PreferenceMemory::new(),
                key: (s, operator),
            }
        }

        fn add(&mut self, value: &Symbol, kind: PreferenceSpec, referent: Option<&Symbol>) {
            self.prefs.add(
                self.key.0.clone(),
                self.key.1.clone(),
                value.clone(),
                kind,
                referent.cloned(),
                false,
                None,
            );
        }

        fn resolve(&mut self, context: bool) -> SlotDecision {
            let slot = self.prefs.slot(&self.key).unwrap();
            resolve_slot(slot, context, AttributePreferenceMode::Strict, &mut rng())
        }
    }

    #[test]
    fn test_single_acceptable_wins() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        let decision = s.resolve(true);
        assert_eq!(decision.winners, vec![o1]);
        assert!(decision.impasse.is_none());
    }

    #[test]
    fn test_reject_screens_candidate() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::Reject, None);
        let decision = s.resolve(true);
        assert_eq!(decision.winners, vec![o2]);
    }

    #[test]
    fn test_two_candidates_tie() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        let decision = s.resolve(true);
        assert!(decision.winners.is_empty());
        assert_eq!(decision.impasse, Some(ImpasseKind::Tie));
        assert_eq!(decision.candidates.len(), 2);
    }

    #[test]
    fn test_better_resolves_tie() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::Better, Some(&o2));
        let decision = s.resolve(true);
        assert_eq!(decision.winners, vec![o1]);
    }

    #[test]
    fn test_mutual_better_is_conflict() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::Better, Some(&o2));
        s.add(&o2, PreferenceSpec::Better, Some(&o1));
        let decision = s.resolve(true);
        assert_eq!(decision.impasse, Some(ImpasseKind::Conflict));
    }

    #[test]
    fn test_best_narrows() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Best, None);
        let decision = s.resolve(true);
        assert_eq!(decision.winners, vec![o2]);
    }

    #[test]
    fn test_worst_is_last_resort() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::Worst, None);
        let decision = s.resolve(true);
        assert_eq!(decision.winners, vec![o2]);
    }

    #[test]
    fn test_require_overrides() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Require, None);
        let decision = s.resolve(true);
        assert_eq!(decision.winners, vec![o2]);
    }

    #[test]
    fn test_require_prohibit_clash_reports_conflict() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::Require, None);
        s.add(&o1, PreferenceSpec::Prohibit, None);
        let decision = s.resolve(true);
        assert_eq!(decision.impasse, Some(ImpasseKind::ConstraintFailure));
        assert!(decision.conflict_report.is_some());
    }

    #[test]
    fn test_all_rejected_is_constraint_failure_on_context() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::Reject, None);
        let decision = {
            let slot = s.prefs.slot(&s.key).unwrap();
            resolve_slot(slot, true, AttributePreferenceMode::Permissive, &mut rng())
        };
        assert!(decision.winners.is_empty());
        assert_eq!(decision.impasse, Some(ImpasseKind::ConstraintFailure));
    }

    #[test]
    fn test_indifferent_candidates_pick_deterministically_by_seed() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o1, PreferenceSpec::UnaryIndifferent, None);
        s.add(&o2, PreferenceSpec::UnaryIndifferent, None);

        let slot = s.prefs.slot(&s.key).unwrap();
        let first = resolve_slot(slot, true, AttributePreferenceMode::Strict, &mut rng());
        let second = resolve_slot(slot, true, AttributePreferenceMode::Strict, &mut rng());
        assert_eq!(first.winners, second.winners);
        assert!(first.impasse.is_none());
    }

    #[test]
    fn test_non_context_installs_all_survivors() {
        let mut s = Setup::new();
        let a = s.syms.str_constant("red");
        let b = s.syms.str_constant("blue");
        s.add(&a, PreferenceSpec::Acceptable, None);
        s.add(&b, PreferenceSpec::Acceptable, None);
        let decision = s.resolve(false);
        assert_eq!(decision.winners.len(), 2);
        assert!(decision.impasse.is_none());
    }

    #[test]
    fn test_strict_mode_ignores_orderings_on_non_context() {
        let mut s = Setup::new();
        let a = s.syms.str_constant("red");
        let b = s.syms.str_constant("blue");
        s.add(&a, PreferenceSpec::Acceptable, None);
        s.add(&b, PreferenceSpec::Acceptable, None);
        s.add(&a, PreferenceSpec::Better, Some(&b));
        let decision = s.resolve(false);
        // Strict non-context resolution honors only accept/reject.
        assert_eq!(decision.winners.len(), 2);
    }

    #[test]
    fn test_retract_instantiation_removes_i_supported_only() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        s.prefs.add(
            s.key.0.clone(),
            s.key.1.clone(),
            o1.clone(),
            PreferenceSpec::Acceptable,
            None,
            false,
            Some(7),
        );
        s.prefs.add(
            s.key.0.clone(),
            s.key.1.clone(),
            o1,
            PreferenceSpec::Acceptable,
            None,
            true,
            Some(7),
        );
        let touched = s.prefs.retract_instantiation(7);
        assert_eq!(touched.len(), 1);
        assert_eq!(s.prefs.slot(&s.key).unwrap().preferences.len(), 1);
        assert!(s.prefs.slot(&s.key).unwrap().preferences[0].o_supported);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut s = Setup::new();
        let o1 = s.syms.new_identifier('O', 1);
        let o2 = s.syms.new_identifier('O', 1);
        s.add(&o1, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Acceptable, None);
        s.add(&o2, PreferenceSpec::Better, Some(&o1));
        let first = s.resolve(true);
        let second = s.resolve(true);
        assert_eq!(first.winners, second.winners);
    }
}
