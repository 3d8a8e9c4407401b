//! Compiling productions into the network and excising them back out.
//!
//! Nodes are shared: two productions with a common condition prefix use
//! the same alpha memory, join node, and beta memory for it. Newly built
//! nodes are populated from existing matches so a production loaded
//! mid-run immediately sees every current match.

use std::collections::HashMap;

use super::{
    AlphaKey, BetaNodeKind, JoinTest, ProductionRecord, ReteNetwork, VariableBindings, WmeField,
};
use crate::error::ProductionError;
use crate::production::{Condition, PatternCondition, Production, Test, TestArg};
use crate::wm::WmeRef;

/// Result of excising a production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExciseOutcome {
    /// Complete matches retracted by the excise.
    pub retracted: usize,
}

struct ConditionAnalysis {
    key: AlphaKey,
    tests: Vec<JoinTest>,
}

impl ReteNetwork {
    /// Validates and compiles a production into the network.
    ///
    /// `live` is the current set of working-memory elements, used to
    /// seed any alpha memory created by this production.
    pub fn add_production(
        &mut self,
        production: Production,
        live: &[WmeRef],
    ) -> Result<(), ProductionError> {
        production.validate()?;
        if self.records.contains_key(&production.name) {
            return Err(ProductionError::DuplicateName {
                name: production.name.clone(),
            });
        }

        let mut bindings: VariableBindings = HashMap::new();
        let mut ordinal = 0usize;
        let (bottom, bottom_is_producer) = self.compile_chain(
            &production.conditions,
            self.root_node,
            &mut bindings,
            &mut ordinal,
            live,
        );

        let pnode = self.alloc_node(
            Some(bottom),
            BetaNodeKind::Production {
                name: production.name.clone(),
                tokens: Vec::new(),
            },
        );
        if bottom_is_producer {
            for token in self.visible_tokens(bottom) {
                self.left_activate(pnode, token);
            }
        } else {
            self.populate_child_of_join(bottom, pnode);
        }

        let name = production.name.clone();
        self.records.insert(
            name.clone(),
            ProductionRecord {
                production,
                pnode,
                bindings,
            },
        );
        self.note_loaded(name);
        Ok(())
    }

    /// Removes a production, retracting all of its live matches first.
    pub fn excise(&mut self, name: &str) -> Option<ExciseOutcome> {
        let record = self.records.remove(name)?;
        let pnode = record.pnode;

        let tokens = match self.nodes.get(&pnode).map(|n| &n.kind) {
            Some(BetaNodeKind::Production { tokens, .. }) => tokens.clone(),
            _ => Vec::new(),
        };
        let retracted = tokens.len();
        for token in tokens {
            if self.tokens.contains_key(&token) {
                self.delete_token(token);
            }
        }

        self.remove_obsolete_node(pnode);
        Some(ExciseOutcome { retracted })
    }

    /// The variable-binding map of a loaded production.
    pub(crate) fn bindings_of(&self, name: &str) -> Option<&VariableBindings> {
        self.records.get(name).map(|r| &r.bindings)
    }

    /// Compiles a condition chain starting under `start`. Returns the
    /// bottom node and whether it is a token producer (negative/NCC
    /// bottoms) rather than a join.
    fn compile_chain(
        &mut self,
        conditions: &[Condition],
        start: u32,
        bindings: &mut VariableBindings,
        ordinal: &mut usize,
        live: &[WmeRef],
    ) -> (u32, bool) {
        let mut producer = start;
        let mut bottom = start;
        let mut bottom_is_producer = true;

        for (index, condition) in conditions.iter().enumerate() {
            let last = index + 1 == conditions.len();
            match condition {
                Condition::Positive(pattern) => {
                    let analysis = self.analyze_pattern(pattern, bindings, *ordinal);
                    let alpha = self.build_or_share_alpha(analysis.key);
                    self.populate_alpha(alpha, live);
                    let join = self.build_or_share_join(producer, alpha, analysis.tests);
                    *ordinal += 1;
                    if last {
                        bottom = join;
                        bottom_is_producer = false;
                    } else {
                        let memory = self.build_or_share_memory(join);
                        producer = memory;
                        bottom = memory;
                        bottom_is_producer = true;
                    }
                }
                Condition::Negative(pattern) => {
                    // Bindings introduced inside a negation are scoped to
                    // that condition.
                    let mut scoped = bindings.clone();
                    let analysis = self.analyze_pattern(pattern, &mut scoped, *ordinal);
                    let alpha = self.build_or_share_alpha(analysis.key);
                    self.populate_alpha(alpha, live);
                    let negative =
                        self.build_or_share_negative(producer, alpha, analysis.tests);
                    *ordinal += 1;
                    producer = negative;
                    bottom = negative;
                    bottom_is_producer = true;
                }
                Condition::NegatedConjunction(inner) => {
                    let ncc = self.alloc_node(
                        Some(producer),
                        BetaNodeKind::Ncc {
                            partner: 0,
                            tokens: Vec::new(),
                        },
                    );
                    // Create NCC tokens for existing branch tokens before
                    // the sub-network can block them.
                    for token in self.visible_tokens(producer) {
                        self.left_activate(ncc, token);
                    }

                    let mut scoped = bindings.clone();
                    let mut inner_ordinal = *ordinal;
                    let (sub_bottom, sub_is_producer) =
                        self.compile_chain(inner, producer, &mut scoped, &mut inner_ordinal, live);

                    let conjuncts = inner.len() + usize::from(sub_is_producer);
                    let partner = self.alloc_node(
                        Some(sub_bottom),
                        BetaNodeKind::NccPartner { ncc, conjuncts },
                    );
                    if let Some(node) = self.nodes.get_mut(&ncc) {
                        if let BetaNodeKind::Ncc { partner: p, .. } = &mut node.kind {
                            *p = partner;
                        }
                    }

                    // Feed existing sub-network matches to the partner,
                    // blocking the NCC tokens they contradict.
                    if sub_is_producer {
                        for token in self.visible_tokens(sub_bottom) {
                            self.left_activate(partner, token);
                        }
                    } else {
                        self.populate_child_of_join(sub_bottom, partner);
                    }

                    *ordinal += 1;
                    producer = ncc;
                    bottom = ncc;
                    bottom_is_producer = true;
                }
            }
        }

        (bottom, bottom_is_producer)
    }

    /// Folds a pattern into an alpha key plus join tests, extending the
    /// binding map with newly bound variables.
    fn analyze_pattern(
        &self,
        pattern: &PatternCondition,
        bindings: &mut VariableBindings,
        ordinal: usize,
    ) -> ConditionAnalysis {
        let mut key = AlphaKey {
            id: None,
            attr: None,
            value: None,
            acceptable: pattern.acceptable,
        };
        let mut tests = Vec::new();

        if pattern.goal_test {
            tests.push(JoinTest::Goal { own: WmeField::Id });
        }

        for (field, test) in [
            (WmeField::Id, &pattern.id),
            (WmeField::Attr, &pattern.attr),
            (WmeField::Value, &pattern.value),
        ] {
            self.analyze_test(test, field, &mut key, &mut tests, bindings, ordinal);
        }

        ConditionAnalysis { key, tests }
    }

    fn analyze_test(
        &self,
        test: &Test,
        field: WmeField,
        key: &mut AlphaKey,
        tests: &mut Vec<JoinTest>,
        bindings: &mut VariableBindings,
        ordinal: usize,
    ) {
        match test {
            Test::Any => {}
            Test::Constant(symbol) => {
                let slot = match field {
                    WmeField::Id => &mut key.id,
                    WmeField::Attr => &mut key.attr,
                    WmeField::Value => &mut key.value,
                };
                if slot.is_none() {
                    *slot = Some(symbol.clone());
                } else {
                    tests.push(JoinTest::ConstantRel {
                        own: field,
                        relation: None,
                        referent: symbol.clone(),
                    });
                }
            }
            Test::Variable(name) => match bindings.get(name) {
                Some(&(bound_at, bound_field)) if bound_at == ordinal => {
                    tests.push(JoinTest::IntraVariable {
                        own: field,
                        other: bound_field,
                    });
                }
                Some(&(bound_at, bound_field)) => {
                    tests.push(JoinTest::Variable {
                        own: field,
                        levels_up: ordinal - 1 - bound_at,
                        other: bound_field,
                    });
                }
                None => {
                    bindings.insert(name.clone(), (ordinal, field));
                }
            },
            Test::Disjunction(allowed) => {
                tests.push(JoinTest::Disjunction {
                    own: field,
                    allowed: allowed.clone(),
                });
            }
            Test::Relational { relation, referent } => match referent {
                TestArg::Constant(symbol) => {
                    tests.push(JoinTest::ConstantRel {
                        own: field,
                        relation: Some(*relation),
                        referent: symbol.clone(),
                    });
                }
                TestArg::Variable(name) => match bindings.get(name) {
                    Some(&(bound_at, bound_field)) if bound_at == ordinal => {
                        tests.push(JoinTest::IntraVariableRel {
                            own: field,
                            relation: *relation,
                            other: bound_field,
                        });
                    }
                    Some(&(bound_at, bound_field)) => {
                        tests.push(JoinTest::VariableRel {
                            own: field,
                            relation: *relation,
                            levels_up: ordinal - 1 - bound_at,
                            other: bound_field,
                        });
                    }
                    // A relational referent that is never bound cannot
                    // match; compile it as an empty disjunction so the
                    // production loads but never fires.
                    None => {
                        tests.push(JoinTest::Disjunction {
                            own: field,
                            allowed: Vec::new(),
                        });
                    }
                },
            },
            Test::Conjunctive(parts) => {
                for part in parts {
                    self.analyze_test(part, field, key, tests, bindings, ordinal);
                }
            }
        }
    }

    fn build_or_share_join(&mut self, producer: u32, alpha: u32, tests: Vec<JoinTest>) -> u32 {
        let existing = self
            .nodes
            .get(&producer)
            .into_iter()
            .flat_map(|n| n.children.iter().copied())
            .find(|child| {
                self.nodes.get(child).is_some_and(|node| {
                    matches!(
                        &node.kind,
                        BetaNodeKind::Join { alpha: a, tests: t } if *a == alpha && *t == tests
                    )
                })
            });
        if let Some(join) = existing {
            return join;
        }

        let join = self.alloc_node(Some(producer), BetaNodeKind::Join { alpha, tests });
        self.attach_alpha(alpha, join);
        join
    }

    fn build_or_share_negative(&mut self, producer: u32, alpha: u32, tests: Vec<JoinTest>) -> u32 {
        let existing = self
            .nodes
            .get(&producer)
            .into_iter()
            .flat_map(|n| n.children.iter().copied())
            .find(|child| {
                self.nodes.get(child).is_some_and(|node| {
                    matches!(
                        &node.kind,
                        BetaNodeKind::Negative { alpha: a, tests: t, .. }
                            if *a == alpha && *t == tests
                    )
                })
            });
        if let Some(negative) = existing {
            return negative;
        }

        let negative = self.alloc_node(
            Some(producer),
            BetaNodeKind::Negative {
                alpha,
                tests,
                tokens: Vec::new(),
            },
        );
        self.attach_alpha(alpha, negative);
        for token in self.visible_tokens(producer) {
            self.left_activate(negative, token);
        }
        negative
    }

    fn build_or_share_memory(&mut self, join: u32) -> u32 {
        let existing = self
            .nodes
            .get(&join)
            .into_iter()
            .flat_map(|n| n.children.iter().copied())
            .find(|child| {
                self.nodes
                    .get(child)
                    .is_some_and(|node| matches!(node.kind, BetaNodeKind::Memory { .. }))
            });
        if let Some(memory) = existing {
            return memory;
        }

        let memory = self.alloc_node(Some(join), BetaNodeKind::Memory { tokens: Vec::new() });
        self.populate_child_of_join(join, memory);
        memory
    }

    fn attach_alpha(&mut self, alpha: u32, node: u32) {
        if let Some(mem) = self.alphas.get_mut(&alpha) {
            mem.successors.push(node);
            mem.refcount += 1;
        }
    }

    /// Replays a join node's current matches into one new child.
    fn populate_child_of_join(&mut self, join: u32, child: u32) {
        let Some(node) = self.nodes.get(&join) else {
            return;
        };
        let BetaNodeKind::Join { alpha, tests } = &node.kind else {
            return;
        };
        let alpha = *alpha;
        let tests = tests.clone();
        let parent = node.parent.expect("join nodes always have a producer parent");
        let wmes = self
            .alphas
            .get(&alpha)
            .map(|a| a.wmes.clone())
            .unwrap_or_default();
        for token in self.visible_tokens(parent) {
            for wme in &wmes {
                if self.join_tests_pass(&tests, Some(token), wme) {
                    self.emit_join_match(join, token, wme, Some(child));
                }
            }
        }
    }

    /// Removes a node with no remaining children, then walks upward.
    fn remove_obsolete_node(&mut self, node_id: u32) {
        if node_id == self.root_node {
            return;
        }
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        if !node.children.is_empty() {
            return;
        }
        let parent = node.parent;

        let (stored, alpha, partner) = match &node.kind {
            BetaNodeKind::Memory { tokens } => (tokens.clone(), None, None),
            BetaNodeKind::Join { alpha, .. } => (Vec::new(), Some(*alpha), None),
            BetaNodeKind::Negative { alpha, tokens, .. } => {
                (tokens.clone(), Some(*alpha), None)
            }
            BetaNodeKind::Ncc { partner, tokens } => (tokens.clone(), None, Some(*partner)),
            BetaNodeKind::NccPartner { .. } => (Vec::new(), None, None),
            BetaNodeKind::Production { tokens, .. } => (tokens.clone(), None, None),
        };

        for token in stored {
            if self.tokens.contains_key(&token) {
                self.delete_token(token);
            }
        }
        if let Some(alpha_id) = alpha {
            self.detach_alpha(alpha_id, node_id);
        }

        if let Some(p) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&p) {
                parent_node.children.retain(|c| *c != node_id);
            }
        }
        self.nodes.remove(&node_id);

        // An NCC node owns its partner and, through it, the private
        // sub-network chain.
        if let Some(partner_id) = partner {
            let sub_parent = self.nodes.get(&partner_id).and_then(|n| n.parent);
            if let Some(sp) = sub_parent {
                if let Some(parent_node) = self.nodes.get_mut(&sp) {
                    parent_node.children.retain(|c| *c != partner_id);
                }
            }
            self.nodes.remove(&partner_id);
            if let Some(sp) = sub_parent {
                self.remove_obsolete_node(sp);
            }
        }

        if let Some(p) = parent {
            self.remove_obsolete_node(p);
        }
    }

    fn detach_alpha(&mut self, alpha_id: u32, node_id: u32) {
        let empty = {
            let Some(alpha) = self.alphas.get_mut(&alpha_id) else {
                return;
            };
            alpha.successors.retain(|s| *s != node_id);
            alpha.refcount = alpha.refcount.saturating_sub(1);
            alpha.refcount == 0
        };
        if empty {
            if let Some(alpha) = self.alphas.remove(&alpha_id) {
                for wme in &alpha.wmes {
                    if let Some(list) = self.wme_alphas.get_mut(&wme.timetag) {
                        list.retain(|a| *a != alpha_id);
                    }
                }
                self.alpha_index.remove(&alpha.key);
            }
        }
    }

}

