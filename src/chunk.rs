//! Chunking: learning new productions from sub-goal results.
//!
//! When an instantiation inside a sub-goal creates a preference whose
//! target lives at a higher level, that preference is a result. The
//! builder backtraces from the result's instantiation through the
//! instantiations that created each tested WME, bottoming out at grounds
//! (WMEs whose identifier lives above the sub-goal). The grounds become
//! the conditions of a new rule; the results become its actions.
//!
//! A generalizable trace yields a chunk (identifiers variablized); a
//! trace that depends on sub-goal-local identifiers the conditions
//! cannot bind yields a justification (identifiers literal, excised when
//! its instantiation retracts). Either way the new rule matches the
//! current situation immediately and re-derives the results under its
//! own support, which is what lets results outlive their sub-goal.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::{LearnMode, LearnScope};
use crate::decide::{Ctx, ResultPref};
use crate::production::{
    Action, Condition, PatternCondition, Production, ProductionKind, RhsValue, Test,
};
use crate::symbol::Symbol;
use crate::trace::TraceEvent;
use crate::wm::WmeRef;

/// Where a build attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// A new production was installed.
    Built {
        /// Its name.
        name: String,
        /// Chunk or justification.
        kind: ProductionKind,
    },
    /// The attempt was dropped; not an error.
    Rejected {
        /// Why (duplicate, empty grounds, invalid structure).
        reason: &'static str,
    },
}

/// Builds and installs a chunk or justification for the results of one
/// instantiation.
pub(crate) fn learn_from_instantiation(
    ctx: &mut Ctx,
    inst_id: u64,
    results: &[ResultPref],
) -> ChunkOutcome {
    let Some(inst) = ctx.decide.instantiations.get(&inst_id) else {
        return ChunkOutcome::Rejected {
            reason: "instantiation already retracted",
        };
    };
    let level = inst.level;
    let goal = inst.goal.clone();
    if level <= 1 {
        return ChunkOutcome::Rejected {
            reason: "results from the top state need no support",
        };
    }

    // Tracing: backtrace to grounds.
    let mut grounds: Vec<WmeRef> = Vec::new();
    let mut ground_tags: HashSet<u64> = HashSet::new();
    let mut visited: HashSet<u64> = HashSet::new();
    let mut ungrounded = false;
    let mut stack = vec![inst_id];
    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let Some(instantiation) = ctx.decide.instantiations.get(&current) else {
            ungrounded = true;
            continue;
        };
        let wmes: Vec<WmeRef> = instantiation.wmes.iter().flatten().cloned().collect();
        for wme in wmes {
            let wme_level = ctx.wm.effective_level(&wme.id);
            if wme_level != 0 && wme_level < level {
                if ground_tags.insert(wme.timetag) {
                    grounds.push(wme);
                }
            } else if let Some(&support) = ctx.decide.wme_support.get(&wme.timetag) {
                stack.push(support);
            }
            // Local WMEs with no producing instantiation are the
            // sub-goal's architecture structure; they drop out of the
            // trace.
        }
    }

    if grounds.is_empty() {
        return ChunkOutcome::Rejected {
            reason: "no grounds above the sub-goal",
        };
    }
    grounds.sort_by_key(|w| w.timetag);

    let chunk_wanted = chunking_enabled(ctx, &goal, level);

    // Variablizing.
    let mut var_map: HashMap<Symbol, String> = HashMap::new();
    let mut var_counter = 0usize;
    let mut variablize = |sym: &Symbol, map: &mut HashMap<Symbol, String>| -> String {
        if let Some(existing) = map.get(sym) {
            return existing.clone();
        }
        var_counter += 1;
        let letter = sym
            .to_string()
            .chars()
            .next()
            .unwrap_or('x')
            .to_ascii_lowercase();
        let name = format!("{letter}{var_counter}");
        map.insert(sym.clone(), name.clone());
        name
    };

    for wme in &grounds {
        variablize(&wme.id, &mut var_map);
        if wme.attr.is_identifier() {
            variablize(&wme.attr, &mut var_map);
        }
        if wme.value.is_identifier() {
            variablize(&wme.value, &mut var_map);
        }
    }

    // A result referencing an identifier the conditions cannot bind is
    // not generalizable.
    for result in results {
        if !var_map.contains_key(&result.id) {
            ungrounded = true;
        }
        for sym in [Some(&result.attr), Some(&result.value), result.referent.as_ref()]
            .into_iter()
            .flatten()
        {
            if sym.is_identifier() && !var_map.contains_key(sym) {
                ungrounded = true;
            }
        }
    }

    let as_chunk = chunk_wanted && !ungrounded;

    let id_test = |sym: &Symbol, map: &HashMap<Symbol, String>| -> Test {
        if as_chunk {
            Test::Variable(map[sym].clone())
        } else {
            Test::Constant(sym.clone())
        }
    };
    let value_test = |sym: &Symbol, map: &HashMap<Symbol, String>| -> Test {
        if sym.is_identifier() && as_chunk {
            Test::Variable(map[sym].clone())
        } else {
            Test::Constant(sym.clone())
        }
    };
    let rhs_value = |sym: &Symbol, map: &HashMap<Symbol, String>| -> RhsValue {
        if sym.is_identifier() && as_chunk {
            RhsValue::Variable(map[sym].clone())
        } else {
            RhsValue::Constant(sym.clone())
        }
    };

    // Merging: identical condition triples collapse.
    let mut conditions: Vec<Condition> = Vec::new();
    let mut seen_triples: HashSet<(Symbol, Symbol, Symbol, bool)> = HashSet::new();
    for wme in &grounds {
        let triple = (
            wme.id.clone(),
            wme.attr.clone(),
            wme.value.clone(),
            wme.acceptable,
        );
        if !seen_triples.insert(triple) {
            continue;
        }
        conditions.push(Condition::Positive(PatternCondition {
            id: id_test(&wme.id, &var_map),
            attr: value_test(&wme.attr, &var_map),
            value: value_test(&wme.value, &var_map),
            acceptable: wme.acceptable,
            goal_test: ctx.decide.is_goal(&wme.id),
        }));
    }

    // Literalizing: constants stay literal. Backtracing established
    // these exact values, so conditions and actions carry them verbatim.

    let mut actions: Vec<Action> = Vec::new();
    for result in results {
        actions.push(Action {
            id: rhs_value(&result.id, &var_map),
            attr: rhs_value(&result.attr, &var_map),
            value: rhs_value(&result.value, &var_map),
            preference: result.kind,
            referent: result.referent.as_ref().map(|r| rhs_value(r, &var_map)),
        });
    }

    let (kind, name) = if as_chunk {
        loop {
            ctx.decide.chunk_counter += 1;
            let candidate = format!("chunk-{}", ctx.decide.chunk_counter);
            if !ctx.net.has_production(&candidate) {
                break (ProductionKind::Chunk, candidate);
            }
        }
    } else {
        loop {
            ctx.decide.justification_counter += 1;
            let candidate = format!("justification-{}", ctx.decide.justification_counter);
            if !ctx.net.has_production(&candidate) {
                break (ProductionKind::Justification, candidate);
            }
        }
    };

    let production = Production::new(name.clone(), conditions, actions).with_kind(kind);
    if production.validate().is_err() {
        return ChunkOutcome::Rejected {
            reason: "trace produced an invalid rule",
        };
    }
    if kind == ProductionKind::Chunk && ctx.net.has_fingerprint(&production.fingerprint()) {
        return ChunkOutcome::Rejected {
            reason: "duplicates an existing production",
        };
    }

    let live: Vec<WmeRef> = ctx.wm.iter_live().cloned().collect();
    if ctx.net.add_production(production, &live).is_err() {
        return ChunkOutcome::Rejected {
            reason: "installation failed",
        };
    }

    ctx.decide.chunks_this_cycle += 1;
    match kind {
        ProductionKind::Chunk => ctx.stats.chunks_built += 1,
        _ => ctx.stats.justifications_built += 1,
    }
    debug!(name = %name, kind = %kind, "learned");
    ctx.trace.emit(TraceEvent::ChunkBuilt {
        name: name.clone(),
        kind: kind.to_string(),
    });

    ChunkOutcome::Built { name, kind }
}

fn chunking_enabled(ctx: &Ctx, goal: &Symbol, level: u32) -> bool {
    let mode_allows = match ctx.config.learn {
        LearnMode::Off => false,
        LearnMode::On => true,
        LearnMode::Only => ctx.decide.force_learn.contains(goal),
        LearnMode::Except => !ctx.decide.dont_learn.contains(goal),
    };
    if !mode_allows {
        return false;
    }
    match ctx.config.learn_scope {
        LearnScope::AllLevels => true,
        LearnScope::BottomUp => ctx
            .decide
            .bottom_goal()
            .is_some_and(|g| g.level == level),
    }
}
