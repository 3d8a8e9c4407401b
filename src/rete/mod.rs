//! The incremental match network.
//!
//! Maintains, for every loaded production, the exact set of current
//! matches as working-memory deltas are flushed. The network is the
//! classic two-layer design: alpha memories filter single WMEs by
//! constant tests, beta-side nodes join them into partial matches
//! (tokens) one condition at a time. Negative conditions and negated
//! conjunctions block propagation while counter-evidence exists; a
//! production leaf queues an assertion or retraction whenever a complete
//! match appears or dies.
//!
//! The core invariant is incrementality: each delta is processed in time
//! proportional to the work it causes, never by rescanning working
//! memory.
//!
//! Structure: this module holds the node/token arenas, the alpha layer,
//! and the public API; `activate` implements token propagation;
//! `build` compiles productions into (and out of) the network.

mod activate;
mod build;

pub use build::ExciseOutcome;

use std::collections::{HashMap, HashSet};

use crate::production::{Production, Relation};
use crate::symbol::Symbol;
use crate::wm::{WmeDelta, WmeRef};

/// Which field of a WME a test inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WmeField {
    /// The identifier field.
    Id,
    /// The attribute field.
    Attr,
    /// The value field.
    Value,
}

impl WmeField {
    pub(crate) fn of(self, wme: &WmeRef) -> &Symbol {
        match self {
            Self::Id => &wme.id,
            Self::Attr => &wme.attr,
            Self::Value => &wme.value,
        }
    }
}

/// A test evaluated when joining a candidate WME against a token chain.
///
/// Constant-equality tests never appear here; they are folded into the
/// alpha key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JoinTest {
    /// Field must equal a binding made by an earlier condition.
    Variable {
        own: WmeField,
        levels_up: usize,
        other: WmeField,
    },
    /// Field must equal another field of the same WME.
    IntraVariable { own: WmeField, other: WmeField },
    /// Field must relate to another field of the same WME.
    IntraVariableRel {
        own: WmeField,
        relation: Relation,
        other: WmeField,
    },
    /// Field must relate to a constant (non-equality relations, or an
    /// equality the alpha key had no free slot for).
    ConstantRel {
        own: WmeField,
        relation: Option<Relation>,
        referent: Symbol,
    },
    /// Field must relate to an earlier binding.
    VariableRel {
        own: WmeField,
        relation: Relation,
        levels_up: usize,
        other: WmeField,
    },
    /// Field must equal one of the listed constants.
    Disjunction { own: WmeField, allowed: Vec<Symbol> },
    /// The identifier must be a current goal (`state` keyword).
    Goal { own: WmeField },
}

/// Key identifying one alpha memory: the constant-equality signature of
/// a condition plus its acceptable-preference flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AlphaKey {
    pub id: Option<Symbol>,
    pub attr: Option<Symbol>,
    pub value: Option<Symbol>,
    pub acceptable: bool,
}

#[derive(Debug)]
pub(crate) struct AlphaMemory {
    pub key: AlphaKey,
    /// Matching WMEs in arrival (timetag) order.
    pub wmes: Vec<WmeRef>,
    /// Join and negative nodes fed by this memory, in creation order.
    pub successors: Vec<u32>,
    /// Number of attached nodes; the memory dies at zero.
    pub refcount: usize,
}

impl AlphaMemory {
    pub(crate) fn accepts(&self, wme: &WmeRef) -> bool {
        self.key.acceptable == wme.acceptable
            && self.key.id.as_ref().map_or(true, |s| *s == wme.id)
            && self.key.attr.as_ref().map_or(true, |s| *s == wme.attr)
            && self.key.value.as_ref().map_or(true, |s| *s == wme.value)
    }
}

/// Node payloads. `Memory`, `Negative`, and `Ncc` are token producers:
/// they store tokens and push visibility changes to their children.
#[derive(Debug)]
pub(crate) enum BetaNodeKind {
    /// Stores tokens produced by the parent join.
    Memory { tokens: Vec<u64> },
    /// Joins the parent producer's tokens against an alpha memory.
    Join { alpha: u32, tests: Vec<JoinTest> },
    /// Blocks while any WME in the alpha memory joins the token chain.
    Negative {
        alpha: u32,
        tests: Vec<JoinTest>,
        tokens: Vec<u64>,
    },
    /// Blocks while any full sub-network match exists.
    Ncc { partner: u32, tokens: Vec<u64> },
    /// Collects sub-network matches for its Ncc node.
    NccPartner { ncc: u32, conjuncts: usize },
    /// Production leaf: every stored token is one complete instantiation.
    Production { name: String, tokens: Vec<u64> },
}

#[derive(Debug)]
pub(crate) struct BetaNode {
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub kind: BetaNodeKind,
}

/// A partial or complete match: a parent-linked chain with one level per
/// condition. Negative and NCC levels carry no WME.
#[derive(Debug)]
pub(crate) struct Token {
    pub parent: Option<u64>,
    pub wme: Option<WmeRef>,
    pub node: u32,
    pub children: Vec<u64>,
    /// Negative nodes: timetags of WMEs currently blocking this token.
    pub join_results: Vec<u64>,
    /// Ncc nodes: sub-network result tokens currently blocking this token.
    pub ncc_results: Vec<u64>,
    /// Sub-network result tokens: the Ncc token they block.
    pub owner: Option<u64>,
}

/// Direction of a queued match change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDirection {
    /// A new complete match appeared.
    Assert,
    /// An existing complete match died.
    Retract,
}

/// A queued production match change, drained by the decision driver.
#[derive(Debug, Clone)]
pub struct MatchChange {
    /// Assert or retract.
    pub direction: MatchDirection,
    /// The production that matched.
    pub production: String,
    /// The complete-match token. For retractions the token is already
    /// gone from the network; the id keys the driver's instantiation map.
    pub token: u64,
    /// The matched WME per condition (outermost first); `None` at
    /// negative and NCC positions. Captured at queue time so a
    /// retraction still describes what had matched.
    pub wmes: Vec<Option<WmeRef>>,
}

/// Where a production's variables were bound: condition ordinal (in the
/// main chain) and field.
pub(crate) type VariableBindings = HashMap<String, (usize, WmeField)>;

#[derive(Debug)]
pub(crate) struct ProductionRecord {
    pub production: Production,
    pub pnode: u32,
    pub bindings: VariableBindings,
}

/// The per-agent match network.
#[derive(Debug, Default)]
pub struct ReteNetwork {
    pub(crate) alpha_index: HashMap<AlphaKey, u32>,
    pub(crate) alphas: HashMap<u32, AlphaMemory>,
    next_alpha: u32,

    pub(crate) nodes: HashMap<u32, BetaNode>,
    next_node: u32,
    pub(crate) root_node: u32,

    pub(crate) tokens: HashMap<u64, Token>,
    next_token: u64,
    pub(crate) root_token: u64,

    pub(crate) records: HashMap<String, ProductionRecord>,
    load_order: Vec<String>,

    /// timetag -> alpha memories currently holding the WME.
    pub(crate) wme_alphas: HashMap<u64, Vec<u32>>,
    /// timetag -> tokens whose own level carries the WME.
    pub(crate) wme_tokens: HashMap<u64, Vec<u64>>,
    /// timetag -> negative-node tokens this WME is blocking.
    pub(crate) wme_blocks: HashMap<u64, Vec<u64>>,

    /// Current goal identifiers, for `state`-keyword tests.
    pub(crate) goals: HashSet<Symbol>,

    pub(crate) pending: Vec<MatchChange>,
}

impl ReteNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        let mut net = Self::default();
        net.next_node = 1;
        net.next_token = 1;
        net.root_node = net.alloc_node(None, BetaNodeKind::Memory { tokens: Vec::new() });
        let root_token = net.alloc_token(None, None, net.root_node);
        net.root_token = root_token;
        if let BetaNodeKind::Memory { tokens } = &mut net.nodes.get_mut(&net.root_node).expect("root node").kind {
            tokens.push(root_token);
        }
        net
    }

    pub(crate) fn alloc_node(&mut self, parent: Option<u32>, kind: BetaNodeKind) -> u32 {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(
            id,
            BetaNode {
                parent,
                children: Vec::new(),
                kind,
            },
        );
        if let Some(p) = parent {
            if let Some(node) = self.nodes.get_mut(&p) {
                node.children.push(id);
            }
        }
        id
    }

    pub(crate) fn alloc_token(&mut self, parent: Option<u64>, wme: Option<WmeRef>, node: u32) -> u64 {
        let id = self.next_token;
        self.next_token += 1;
        if let Some(w) = &wme {
            self.wme_tokens.entry(w.timetag).or_default().push(id);
        }
        self.tokens.insert(
            id,
            Token {
                parent,
                wme,
                node,
                children: Vec::new(),
                join_results: Vec::new(),
                ncc_results: Vec::new(),
                owner: None,
            },
        );
        if let Some(p) = parent {
            if let Some(tok) = self.tokens.get_mut(&p) {
                tok.children.push(id);
            }
        }
        id
    }

    /// Registers an identifier as a current goal.
    pub fn add_goal(&mut self, goal: &Symbol) {
        self.goals.insert(goal.clone());
    }

    /// Unregisters a goal identifier.
    pub fn remove_goal(&mut self, goal: &Symbol) {
        self.goals.remove(goal);
    }

    /// Returns true if a production with this name is loaded.
    #[must_use]
    pub fn has_production(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// The loaded production, if present.
    #[must_use]
    pub fn production(&self, name: &str) -> Option<&Production> {
        self.records.get(name).map(|r| &r.production)
    }

    /// Names of loaded productions, in load order.
    #[must_use]
    pub fn production_names(&self) -> Vec<&str> {
        self.load_order
            .iter()
            .filter(|n| self.records.contains_key(n.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Returns true if any production body carries this fingerprint.
    #[must_use]
    pub fn has_fingerprint(&self, fingerprint: &blake3::Hash) -> bool {
        self.records
            .values()
            .any(|r| r.production.fingerprint() == *fingerprint)
    }

    pub(crate) fn note_loaded(&mut self, name: String) {
        if !self.load_order.contains(&name) {
            self.load_order.push(name);
        }
    }

    /// Number of live complete matches for a production.
    #[must_use]
    pub fn match_count(&self, name: &str) -> usize {
        self.records
            .get(name)
            .and_then(|r| self.nodes.get(&r.pnode))
            .map_or(0, |node| match &node.kind {
                BetaNodeKind::Production { tokens, .. } => tokens.len(),
                _ => 0,
            })
    }

    /// Applies one net batch of working-memory deltas.
    pub fn apply_deltas(&mut self, deltas: &[WmeDelta]) {
        for delta in deltas {
            match delta {
                WmeDelta::Add(wme) => self.add_wme(wme),
                WmeDelta::Remove(wme) => self.remove_wme(wme),
            }
        }
    }

    /// Drains queued assertions and retractions in arrival order.
    pub fn take_match_changes(&mut self) -> Vec<MatchChange> {
        std::mem::take(&mut self.pending)
    }

    /// Returns true if match changes are waiting to be drained.
    #[must_use]
    pub fn has_pending_matches(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The matched WMEs of a live token, outermost condition first.
    pub(crate) fn token_wme_chain(&self, token: u64) -> Vec<Option<WmeRef>> {
        let mut out = Vec::new();
        let mut current = Some(token);
        while let Some(id) = current {
            if id == self.root_token {
                break;
            }
            let Some(tok) = self.tokens.get(&id) else {
                break;
            };
            out.push(tok.wme.clone());
            current = tok.parent;
        }
        out.reverse();
        out
    }

    /// Routes a WME addition through the alpha layer.
    ///
    /// Dispatch tries the eight constrained/unconstrained field
    /// combinations for the exact acceptable flag, so the cost is a
    /// constant number of hash lookups.
    fn add_wme(&mut self, wme: &WmeRef) {
        let keys = Self::dispatch_keys(wme);
        for key in keys {
            if let Some(&alpha_id) = self.alpha_index.get(&key) {
                self.alpha_add_wme(alpha_id, wme);
            }
        }
    }

    fn remove_wme(&mut self, wme: &WmeRef) {
        // Drop the WME from every alpha memory holding it.
        if let Some(alpha_ids) = self.wme_alphas.remove(&wme.timetag) {
            for alpha_id in alpha_ids {
                if let Some(alpha) = self.alphas.get_mut(&alpha_id) {
                    alpha.wmes.retain(|w| w.timetag != wme.timetag);
                }
            }
        }

        // Delete every token whose own level carries the WME.
        if let Some(token_ids) = self.wme_tokens.remove(&wme.timetag) {
            for token_id in token_ids {
                if self.tokens.contains_key(&token_id) {
                    self.delete_token(token_id);
                }
            }
        }

        // Unblock negative tokens this WME was the evidence for.
        if let Some(blocked) = self.wme_blocks.remove(&wme.timetag) {
            for token_id in blocked {
                let Some(tok) = self.tokens.get_mut(&token_id) else {
                    continue;
                };
                tok.join_results.retain(|tag| *tag != wme.timetag);
                if tok.join_results.is_empty() {
                    self.producer_token_visible(token_id);
                }
            }
        }
    }

    fn dispatch_keys(wme: &WmeRef) -> [AlphaKey; 8] {
        let id = Some(wme.id.clone());
        let attr = Some(wme.attr.clone());
        let value = Some(wme.value.clone());
        let acc = wme.acceptable;
        [
            AlphaKey { id: None, attr: None, value: None, acceptable: acc },
            AlphaKey { id: None, attr: None, value: value.clone(), acceptable: acc },
            AlphaKey { id: None, attr: attr.clone(), value: None, acceptable: acc },
            AlphaKey { id: None, attr: attr.clone(), value: value.clone(), acceptable: acc },
            AlphaKey { id: id.clone(), attr: None, value: None, acceptable: acc },
            AlphaKey { id: id.clone(), attr: None, value: value.clone(), acceptable: acc },
            AlphaKey { id: id.clone(), attr: attr.clone(), value: None, acceptable: acc },
            AlphaKey { id, attr, value, acceptable: acc },
        ]
    }

    fn alpha_add_wme(&mut self, alpha_id: u32, wme: &WmeRef) {
        let Some(alpha) = self.alphas.get_mut(&alpha_id) else {
            return;
        };
        alpha.wmes.push(WmeRef::clone(wme));
        self.wme_alphas.entry(wme.timetag).or_default().push(alpha_id);
        let successors = alpha.successors.clone();
        for node_id in successors {
            self.right_activate(node_id, wme);
        }
    }

    /// Finds or creates the alpha memory for a key. The refcount is
    /// owned by attached nodes, not by lookups.
    pub(crate) fn build_or_share_alpha(&mut self, key: AlphaKey) -> u32 {
        if let Some(&existing) = self.alpha_index.get(&key) {
            return existing;
        }
        let id = self.next_alpha;
        self.next_alpha += 1;
        self.alphas.insert(
            id,
            AlphaMemory {
                key: key.clone(),
                wmes: Vec::new(),
                successors: Vec::new(),
                refcount: 0,
            },
        );
        self.alpha_index.insert(key, id);
        id
    }

    /// Seeds a fresh alpha memory from live working memory. Called once
    /// when the memory is created while WMEs already exist.
    pub(crate) fn populate_alpha(&mut self, alpha_id: u32, live: &[WmeRef]) {
        let Some(alpha) = self.alphas.get(&alpha_id) else {
            return;
        };
        if !alpha.wmes.is_empty() {
            return;
        }
        let matching: Vec<WmeRef> = live
            .iter()
            .filter(|w| self.alphas[&alpha_id].accepts(w))
            .cloned()
            .collect();
        for wme in matching {
            self.alphas
                .get_mut(&alpha_id)
                .expect("populated alpha memory")
                .wmes
                .push(WmeRef::clone(&wme));
            self.wme_alphas.entry(wme.timetag).or_default().push(alpha_id);
        }
    }

}
