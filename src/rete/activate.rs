//! Token propagation: left/right activations, blocking, and deletion.
//!
//! Producers (memories, negative nodes, NCC nodes) store tokens and push
//! visibility changes downward; join nodes combine a producer's visible
//! tokens with one alpha memory, strictly over deltas. Nothing here ever
//! rescans working memory.

use super::{BetaNodeKind, JoinTest, MatchChange, MatchDirection, ReteNetwork, WmeField};
use crate::production::Relation;
use crate::wm::WmeRef;

impl ReteNetwork {
    /// A WME arrived in an alpha memory feeding this node.
    pub(crate) fn right_activate(&mut self, node_id: u32, wme: &WmeRef) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        match &node.kind {
            BetaNodeKind::Join { tests, .. } => {
                let parent = node.parent.expect("join nodes always have a producer parent");
                let tests = tests.clone();
                for token in self.visible_tokens(parent) {
                    if self.join_tests_pass(&tests, Some(token), wme) {
                        self.emit_join_match(node_id, token, wme, None);
                    }
                }
            }
            BetaNodeKind::Negative { tests, tokens, .. } => {
                let tests = tests.clone();
                let tokens = tokens.clone();
                for token_id in tokens {
                    let Some(tok) = self.tokens.get(&token_id) else {
                        continue;
                    };
                    let base = tok.parent;
                    if !self.join_tests_pass(&tests, base, wme) {
                        continue;
                    }
                    let tok = self.tokens.get_mut(&token_id).expect("checked above");
                    let was_unblocked = tok.join_results.is_empty();
                    tok.join_results.push(wme.timetag);
                    self.wme_blocks.entry(wme.timetag).or_default().push(token_id);
                    if was_unblocked {
                        // Counter-evidence appeared: everything built on
                        // this token is no longer a match.
                        self.delete_token_children(token_id);
                    }
                }
            }
            _ => {}
        }
    }

    /// Tokens a producer currently presents to its children.
    pub(crate) fn visible_tokens(&self, producer: u32) -> Vec<u64> {
        let Some(node) = self.nodes.get(&producer) else {
            return Vec::new();
        };
        match &node.kind {
            BetaNodeKind::Memory { tokens } => tokens.clone(),
            BetaNodeKind::Negative { tokens, .. } => tokens
                .iter()
                .copied()
                .filter(|id| {
                    self.tokens
                        .get(id)
                        .is_some_and(|t| t.join_results.is_empty())
                })
                .collect(),
            BetaNodeKind::Ncc { tokens, .. } => tokens
                .iter()
                .copied()
                .filter(|id| {
                    self.tokens
                        .get(id)
                        .is_some_and(|t| t.ncc_results.is_empty())
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A producer token was created unblocked or just became unblocked.
    pub(crate) fn producer_token_visible(&mut self, token_id: u64) {
        let Some(tok) = self.tokens.get(&token_id) else {
            return;
        };
        let node_id = tok.node;
        let children = self
            .nodes
            .get(&node_id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            self.left_activate(child, token_id);
        }
    }

    /// Push one visible producer token into a child node.
    pub(crate) fn left_activate(&mut self, child: u32, token_id: u64) {
        let Some(node) = self.nodes.get(&child) else {
            return;
        };
        match &node.kind {
            BetaNodeKind::Join { alpha, tests } => {
                let alpha = *alpha;
                let tests = tests.clone();
                let wmes = self
                    .alphas
                    .get(&alpha)
                    .map(|a| a.wmes.clone())
                    .unwrap_or_default();
                for wme in wmes {
                    if self.join_tests_pass(&tests, Some(token_id), &wme) {
                        self.emit_join_match(child, token_id, &wme, None);
                    }
                }
            }
            BetaNodeKind::Negative { alpha, tests, .. } => {
                let alpha = *alpha;
                let tests = tests.clone();
                let new_token = self.alloc_token(Some(token_id), None, child);
                if let Some(node) = self.nodes.get_mut(&child) {
                    if let BetaNodeKind::Negative { tokens, .. } = &mut node.kind {
                        tokens.push(new_token);
                    }
                }
                let wmes = self
                    .alphas
                    .get(&alpha)
                    .map(|a| a.wmes.clone())
                    .unwrap_or_default();
                for wme in wmes {
                    if self.join_tests_pass(&tests, Some(token_id), &wme) {
                        self.tokens
                            .get_mut(&new_token)
                            .expect("fresh negative token")
                            .join_results
                            .push(wme.timetag);
                        self.wme_blocks
                            .entry(wme.timetag)
                            .or_default()
                            .push(new_token);
                    }
                }
                let unblocked = self
                    .tokens
                    .get(&new_token)
                    .is_some_and(|t| t.join_results.is_empty());
                if unblocked {
                    self.producer_token_visible(new_token);
                }
            }
            BetaNodeKind::Ncc { .. } => {
                let new_token = self.alloc_token(Some(token_id), None, child);
                if let Some(node) = self.nodes.get_mut(&child) {
                    if let BetaNodeKind::Ncc { tokens, .. } = &mut node.kind {
                        tokens.push(new_token);
                    }
                }
                // The NCC node is ordered before its sub-network in the
                // branch node's children, so no sub-matches for this
                // token can exist yet: the token starts visible.
                self.producer_token_visible(new_token);
            }
            BetaNodeKind::NccPartner { .. } => {
                self.handle_partner_result(child, token_id, None);
            }
            BetaNodeKind::Production { .. } => {
                let new_token = self.alloc_token(Some(token_id), None, child);
                self.store_pnode_token(child, new_token);
                self.queue_assertion(child, new_token);
            }
            BetaNodeKind::Memory { .. } => {
                debug_assert!(false, "memories are only fed by join nodes");
            }
        }
    }

    /// A join node found a (token, wme) pair satisfying its tests.
    ///
    /// `target` restricts delivery to one child while populating a newly
    /// built node from existing matches.
    pub(crate) fn emit_join_match(
        &mut self,
        join_id: u32,
        parent_token: u64,
        wme: &WmeRef,
        target: Option<u32>,
    ) {
        let children = self
            .nodes
            .get(&join_id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            if target.is_some_and(|t| t != child) {
                continue;
            }
            let Some(node) = self.nodes.get(&child) else {
                continue;
            };
            match &node.kind {
                BetaNodeKind::Memory { .. } => {
                    let new_token =
                        self.alloc_token(Some(parent_token), Some(WmeRef::clone(wme)), child);
                    if let Some(node) = self.nodes.get_mut(&child) {
                        if let BetaNodeKind::Memory { tokens } = &mut node.kind {
                            tokens.push(new_token);
                        }
                    }
                    self.producer_token_visible(new_token);
                }
                BetaNodeKind::Production { .. } => {
                    let new_token =
                        self.alloc_token(Some(parent_token), Some(WmeRef::clone(wme)), child);
                    self.store_pnode_token(child, new_token);
                    self.queue_assertion(child, new_token);
                }
                BetaNodeKind::NccPartner { .. } => {
                    self.handle_partner_result(child, parent_token, Some(WmeRef::clone(wme)));
                }
                _ => {
                    debug_assert!(false, "join children are memories, leaves, or partners");
                }
            }
        }
    }

    /// A complete sub-network match reached an NCC partner: block the
    /// owning NCC token.
    fn handle_partner_result(&mut self, partner_id: u32, parent_token: u64, wme: Option<WmeRef>) {
        let Some(node) = self.nodes.get(&partner_id) else {
            return;
        };
        let BetaNodeKind::NccPartner { ncc, conjuncts } = &node.kind else {
            return;
        };
        let (ncc_id, conjuncts) = (*ncc, *conjuncts);

        let result = self.alloc_token(Some(parent_token), wme, partner_id);

        // The branch token sits `conjuncts` levels above the result's own
        // level (the result chain adds one level per sub-condition).
        let Some(branch) = self.ascend(result, conjuncts) else {
            self.delete_token(result);
            return;
        };
        let owner = self
            .tokens
            .get(&branch)
            .into_iter()
            .flat_map(|t| t.children.iter().copied())
            .find(|id| self.tokens.get(id).is_some_and(|t| t.node == ncc_id));
        let Some(owner) = owner else {
            // The NCC token is created before the sub-network can
            // produce results for its branch token.
            self.delete_token(result);
            return;
        };

        self.tokens.get_mut(&result).expect("fresh result token").owner = Some(owner);
        let owner_tok = self.tokens.get_mut(&owner).expect("live ncc token");
        let was_visible = owner_tok.ncc_results.is_empty();
        owner_tok.ncc_results.push(result);
        if was_visible {
            self.delete_token_children(owner);
        }
    }

    fn store_pnode_token(&mut self, pnode: u32, token_id: u64) {
        if let Some(node) = self.nodes.get_mut(&pnode) {
            if let BetaNodeKind::Production { tokens, .. } = &mut node.kind {
                tokens.push(token_id);
            }
        }
    }

    fn queue_assertion(&mut self, pnode: u32, token_id: u64) {
        let Some(node) = self.nodes.get(&pnode) else {
            return;
        };
        let BetaNodeKind::Production { name, .. } = &node.kind else {
            return;
        };
        let name = name.clone();
        let wmes = self.token_wme_chain(token_id);
        self.pending.push(MatchChange {
            direction: MatchDirection::Assert,
            production: name,
            token: token_id,
            wmes,
        });
    }

    fn queue_retraction(&mut self, name: String, token_id: u64, wmes: Vec<Option<WmeRef>>) {
        // An assertion that never fired cancels against its retraction:
        // the driver must not observe either.
        let before = self.pending.len();
        self.pending.retain(|change| {
            !(change.direction == MatchDirection::Assert && change.token == token_id)
        });
        if self.pending.len() != before {
            return;
        }
        self.pending.push(MatchChange {
            direction: MatchDirection::Retract,
            production: name,
            token: token_id,
            wmes,
        });
    }

    /// Deletes a token and everything built on it.
    pub(crate) fn delete_token(&mut self, token_id: u64) {
        if token_id == self.root_token {
            return;
        }
        let children = self
            .tokens
            .get(&token_id)
            .map(|t| t.children.clone())
            .unwrap_or_default();
        for child in children {
            if self.tokens.contains_key(&child) {
                self.delete_token(child);
            }
        }

        let Some(tok) = self.tokens.get(&token_id) else {
            return;
        };
        let node_id = tok.node;
        let parent = tok.parent;
        let wme_tag = tok.wme.as_ref().map(|w| w.timetag);
        let join_results = tok.join_results.clone();
        let ncc_results = tok.ncc_results.clone();
        let owner = tok.owner;

        // If this is a complete match at a production leaf, the match
        // chain must be captured before the token is unlinked.
        let retraction = self.nodes.get(&node_id).and_then(|node| match &node.kind {
            BetaNodeKind::Production { name, .. } => {
                Some((name.clone(), self.token_wme_chain(token_id)))
            }
            _ => None,
        });

        if let Some(p) = parent {
            if let Some(parent_tok) = self.tokens.get_mut(&p) {
                parent_tok.children.retain(|c| *c != token_id);
            }
        }
        if let Some(tag) = wme_tag {
            if let Some(list) = self.wme_tokens.get_mut(&tag) {
                list.retain(|t| *t != token_id);
            }
        }
        for tag in join_results {
            if let Some(list) = self.wme_blocks.get_mut(&tag) {
                list.retain(|t| *t != token_id);
            }
        }
        // Detach owned sub-network results; they die with their own
        // chains and must not resurrect the owner.
        for result in ncc_results {
            if let Some(r) = self.tokens.get_mut(&result) {
                r.owner = None;
            }
        }
        // A dying sub-network result may unblock its NCC token.
        if let Some(owner_id) = owner {
            if let Some(owner_tok) = self.tokens.get_mut(&owner_id) {
                owner_tok.ncc_results.retain(|r| *r != token_id);
                if owner_tok.ncc_results.is_empty() {
                    self.tokens.remove(&token_id);
                    self.detach_from_node(node_id, token_id);
                    if let Some((name, wmes)) = retraction {
                        self.queue_retraction(name, token_id, wmes);
                    }
                    self.producer_token_visible(owner_id);
                    return;
                }
            }
        }

        self.tokens.remove(&token_id);
        self.detach_from_node(node_id, token_id);
        if let Some((name, wmes)) = retraction {
            self.queue_retraction(name, token_id, wmes);
        }
    }

    fn detach_from_node(&mut self, node_id: u32, token_id: u64) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            match &mut node.kind {
                BetaNodeKind::Memory { tokens }
                | BetaNodeKind::Negative { tokens, .. }
                | BetaNodeKind::Ncc { tokens, .. }
                | BetaNodeKind::Production { tokens, .. } => {
                    tokens.retain(|t| *t != token_id);
                }
                _ => {}
            }
        }
    }

    /// Deletes only the structures built on a token, leaving the token
    /// itself stored (used when a producer token becomes blocked).
    pub(crate) fn delete_token_children(&mut self, token_id: u64) {
        let children = self
            .tokens
            .get(&token_id)
            .map(|t| t.children.clone())
            .unwrap_or_default();
        for child in children {
            if self.tokens.contains_key(&child) {
                self.delete_token(child);
            }
        }
    }

    /// Walks `levels` parent links up from a token.
    pub(crate) fn ascend(&self, token_id: u64, levels: usize) -> Option<u64> {
        let mut current = token_id;
        for _ in 0..levels {
            current = self.tokens.get(&current)?.parent?;
        }
        Some(current)
    }

    /// Evaluates join tests for a candidate WME against the chain rooted
    /// at `base` (the parent token of the level being built).
    pub(crate) fn join_tests_pass(&self, tests: &[JoinTest], base: Option<u64>, wme: &WmeRef) -> bool {
        for test in tests {
            let pass = match test {
                JoinTest::Variable { own, levels_up, other } => self
                    .chain_binding(base, *levels_up, *other)
                    .is_some_and(|bound| *own.of(wme) == bound),
                JoinTest::IntraVariable { own, other } => own.of(wme) == other.of(wme),
                JoinTest::IntraVariableRel { own, relation, other } => {
                    eval_relation(*relation, own.of(wme), other.of(wme))
                }
                JoinTest::ConstantRel {
                    own,
                    relation,
                    referent,
                } => match relation {
                    None => own.of(wme) == referent,
                    Some(rel) => eval_relation(*rel, own.of(wme), referent),
                },
                JoinTest::VariableRel {
                    own,
                    relation,
                    levels_up,
                    other,
                } => self
                    .chain_binding(base, *levels_up, *other)
                    .is_some_and(|bound| eval_relation(*relation, own.of(wme), &bound)),
                JoinTest::Disjunction { own, allowed } => allowed.contains(own.of(wme)),
                JoinTest::Goal { own } => self.goals.contains(own.of(wme)),
            };
            if !pass {
                return false;
            }
        }
        true
    }

    fn chain_binding(
        &self,
        base: Option<u64>,
        levels_up: usize,
        field: WmeField,
    ) -> Option<crate::symbol::Symbol> {
        let base = base?;
        let target = self.ascend(base, levels_up)?;
        let tok = self.tokens.get(&target)?;
        tok.wme.as_ref().map(|w| field.of(w).clone())
    }
}

fn eval_relation(relation: Relation, a: &crate::symbol::Symbol, b: &crate::symbol::Symbol) -> bool {
    use std::cmp::Ordering;
    match relation {
        Relation::NotEq => a != b,
        Relation::SameType => a.same_type(b),
        Relation::Less => a.numeric_cmp(b) == Some(Ordering::Less),
        Relation::Greater => a.numeric_cmp(b) == Some(Ordering::Greater),
        Relation::LessEq => matches!(a.numeric_cmp(b), Some(Ordering::Less | Ordering::Equal)),
        Relation::GreaterEq => {
            matches!(a.numeric_cmp(b), Some(Ordering::Greater | Ordering::Equal))
        }
    }
}
