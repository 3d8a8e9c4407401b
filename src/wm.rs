//! Working memory: the WME store and its buffered change queue.
//!
//! A working memory element is an `(identifier, attribute, value)` triple
//! plus an acceptable-preference flag and a unique timetag. Additions and
//! removals are buffered: the match network only ever observes the net
//! batch drained at a phase boundary, so all mutations inside one phase
//! land as a single consistent delta and a WME added and removed in the
//! same phase is never seen at all.
//!
//! Identifier-valued WMEs form an arbitrary graph over working memory;
//! cycles are legal. The store therefore indexes WMEs by timetag and by
//! owning identifier instead of nesting ownership.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::WmError;
use crate::symbol::{GoalLevel, Symbol};

/// A working memory element.
///
/// Immutable once created; shared between the store, alpha memories,
/// match tokens, and goal dependency sets.
#[derive(Debug)]
pub struct Wme {
    /// The owning identifier.
    pub id: Symbol,
    /// The attribute symbol.
    pub attr: Symbol,
    /// The value symbol; identifiers here link sub-structures.
    pub value: Symbol,
    /// True for acceptable-preference WMEs (`^operator <o> +`).
    pub acceptable: bool,
    /// Unique, monotonically increasing creation tag.
    pub timetag: u64,
}

/// Shared handle to a WME.
pub type WmeRef = Arc<Wme>;

impl fmt::Display for Wme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}: {} ^{} {}{})",
            self.timetag,
            self.id,
            self.attr,
            self.value,
            if self.acceptable { " +" } else { "" }
        )
    }
}

/// A buffered working-memory change.
#[derive(Debug, Clone)]
pub enum WmeDelta {
    /// The WME entered working memory.
    Add(WmeRef),
    /// The WME left working memory.
    Remove(WmeRef),
}

impl WmeDelta {
    /// The WME this delta concerns.
    #[must_use]
    pub fn wme(&self) -> &WmeRef {
        match self {
            Self::Add(w) | Self::Remove(w) => w,
        }
    }
}

/// The per-agent WME store.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    live: HashMap<u64, WmeRef>,
    by_id: HashMap<Symbol, Vec<WmeRef>>,
    id_levels: HashMap<Symbol, GoalLevel>,
    pending: Vec<WmeDelta>,
    next_timetag: u64,
    total_adds: u64,
    total_removes: u64,
}

impl WorkingMemory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a WME, allocating its timetag and buffering an addition delta.
    pub fn add(&mut self, id: Symbol, attr: Symbol, value: Symbol, acceptable: bool) -> WmeRef {
        self.next_timetag += 1;
        let wme = Arc::new(Wme {
            id: id.clone(),
            attr,
            value: value.clone(),
            acceptable,
            timetag: self.next_timetag,
        });

        self.register_identifier(&id);
        if value.is_identifier() {
            self.register_identifier(&value);
            // Linking can pull the value's sub-structure up to the owner's
            // level (identifier promotion).
            let owner_level = self.effective_level(&id);
            self.promote(&value, owner_level);
        }

        self.live.insert(wme.timetag, Arc::clone(&wme));
        self.by_id.entry(id).or_default().push(Arc::clone(&wme));
        self.pending.push(WmeDelta::Add(Arc::clone(&wme)));
        self.total_adds += 1;
        wme
    }

    /// Removes a WME by timetag, buffering a removal delta.
    ///
    /// A second removal of the same timetag returns [`WmError::NotFound`]
    /// and has no other effect.
    pub fn remove(&mut self, timetag: u64) -> Result<WmeRef, WmError> {
        let Some(wme) = self.live.remove(&timetag) else {
            return Err(WmError::NotFound { timetag });
        };
        if let Some(list) = self.by_id.get_mut(&wme.id) {
            list.retain(|w| w.timetag != timetag);
            if list.is_empty() {
                self.by_id.remove(&wme.id);
            }
        }
        self.pending.push(WmeDelta::Remove(Arc::clone(&wme)));
        self.total_removes += 1;
        Ok(wme)
    }

    /// Drains the buffered deltas as one net batch.
    ///
    /// A WME both added and removed since the last drain cancels out and
    /// is absent from the result, preserving the buffering invariant: the
    /// match network never observes an intermediate state.
    pub fn drain_changes(&mut self) -> Vec<WmeDelta> {
        let mut added = HashMap::new();
        let mut removed = HashMap::new();
        for delta in &self.pending {
            match delta {
                WmeDelta::Add(w) => {
                    added.insert(w.timetag, ());
                }
                WmeDelta::Remove(w) => {
                    removed.insert(w.timetag, ());
                }
            }
        }

        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter(|delta| {
                let tag = delta.wme().timetag;
                !(added.contains_key(&tag) && removed.contains_key(&tag))
            })
            .collect()
    }

    /// Returns true if any deltas are waiting to be drained.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Looks up a live WME by timetag.
    #[must_use]
    pub fn get(&self, timetag: u64) -> Option<&WmeRef> {
        self.live.get(&timetag)
    }

    /// Returns true if the timetag names a live WME.
    #[must_use]
    pub fn contains(&self, timetag: u64) -> bool {
        self.live.contains_key(&timetag)
    }

    /// All live WMEs owned by the given identifier.
    #[must_use]
    pub fn wmes_of(&self, id: &Symbol) -> &[WmeRef] {
        self.by_id.get(id).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the identifier is known to working memory (it owns
    /// or owned a WME, is linked as a value, or was registered as a goal).
    #[must_use]
    pub fn knows_identifier(&self, id: &Symbol) -> bool {
        self.id_levels.contains_key(id)
    }

    /// Registers an identifier without attaching a WME. Used for goals and
    /// io anchors created by the architecture.
    pub fn register_identifier(&mut self, id: &Symbol) {
        if id.is_identifier() {
            self.id_levels.entry(id.clone()).or_insert_with(|| id.level());
        }
    }

    /// The effective goal level of an identifier: its creation level,
    /// lowered by any links from higher goals.
    #[must_use]
    pub fn effective_level(&self, id: &Symbol) -> GoalLevel {
        self.id_levels.get(id).copied().unwrap_or_else(|| id.level())
    }

    /// Pulls an identifier (and, transitively, everything it reaches) up
    /// to `level` if that is higher in the stack than its current level.
    fn promote(&mut self, id: &Symbol, level: GoalLevel) {
        let current = self.effective_level(id);
        if level == 0 || (current != 0 && current <= level) {
            return;
        }
        self.id_levels.insert(id.clone(), level);
        let children: Vec<Symbol> = self
            .wmes_of(id)
            .iter()
            .filter(|w| w.value.is_identifier())
            .map(|w| w.value.clone())
            .collect();
        // Monotonic: each identifier's level only ever decreases, so the
        // walk terminates even on cyclic structures.
        for child in children {
            self.promote(&child, level);
        }
    }

    /// Iterates over all live WMEs in timetag order.
    pub fn iter_live(&self) -> impl Iterator<Item = &WmeRef> {
        let mut wmes: Vec<&WmeRef> = self.live.values().collect();
        wmes.sort_by_key(|w| w.timetag);
        wmes.into_iter()
    }

    /// Number of live WMEs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if working memory holds no live WMEs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Lifetime counters `(additions, removals)`.
    #[must_use]
    pub const fn totals(&self) -> (u64, u64) {
        (self.total_adds, self.total_removes)
    }

    /// Clears all WMEs, indexes, and buffered deltas.
    ///
    /// Timetags keep counting so traces stay unambiguous across an
    /// `init`; lifetime counters are preserved.
    pub fn clear(&mut self) {
        self.live.clear();
        self.by_id.clear();
        self.id_levels.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn setup() -> (SymbolTable, WorkingMemory) {
        (SymbolTable::new(), WorkingMemory::new())
    }

    #[test]
    fn test_add_allocates_increasing_timetags() {
        let (mut syms, mut wm) = setup();
        let s = syms.new_identifier('S', 1);
        let attr = syms.str_constant("foo");
        let one = syms.int_constant(1);
        let w1 = wm.add(s.clone(), attr.clone(), one.clone(), false);
        let w2 = wm.add(s, attr, one, false);
        assert!(w2.timetag > w1.timetag);
        assert_eq!(wm.len(), 2);
    }

    #[test]
    fn test_double_remove_is_not_found() {
        let (mut syms, mut wm) = setup();
        let s = syms.new_identifier('S', 1);
        let w = wm.add(s, syms.str_constant("foo"), syms.int_constant(1), false);
        assert!(wm.remove(w.timetag).is_ok());
        let err = wm.remove(w.timetag).unwrap_err();
        assert!(matches!(err, WmError::NotFound { timetag } if timetag == w.timetag));
        // The failed call corrupted nothing.
        assert!(wm.is_empty());
    }

    #[test]
    fn test_same_batch_add_remove_cancels() {
        let (mut syms, mut wm) = setup();
        let s = syms.new_identifier('S', 1);
        let keep = wm.add(
            s.clone(),
            syms.str_constant("keep"),
            syms.int_constant(1),
            false,
        );
        let ephemeral = wm.add(s, syms.str_constant("gone"), syms.int_constant(2), false);
        wm.remove(ephemeral.timetag).unwrap();

        let deltas = wm.drain_changes();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            WmeDelta::Add(w) => assert_eq!(w.timetag, keep.timetag),
            WmeDelta::Remove(_) => panic!("expected the surviving addition"),
        }
        assert!(!wm.has_pending_changes());
    }

    #[test]
    fn test_by_id_index() {
        let (mut syms, mut wm) = setup();
        let s = syms.new_identifier('S', 1);
        let o = syms.new_identifier('O', 1);
        wm.add(s.clone(), syms.str_constant("a"), syms.int_constant(1), false);
        wm.add(s.clone(), syms.str_constant("b"), syms.int_constant(2), false);
        wm.add(o.clone(), syms.str_constant("c"), syms.int_constant(3), false);
        assert_eq!(wm.wmes_of(&s).len(), 2);
        assert_eq!(wm.wmes_of(&o).len(), 1);
    }

    #[test]
    fn test_identifier_promotion_lowers_level() {
        let (mut syms, mut wm) = setup();
        let top = syms.new_identifier('S', 1);
        let local = syms.new_identifier('X', 3);
        wm.register_identifier(&top);
        assert_eq!(wm.effective_level(&local), 3);
        // Linking the local structure to the top state promotes it.
        wm.add(top, syms.str_constant("link"), local.clone(), false);
        assert_eq!(wm.effective_level(&local), 1);
    }

    #[test]
    fn test_promotion_follows_links_through_cycles() {
        let (mut syms, mut wm) = setup();
        let top = syms.new_identifier('S', 1);
        let a = syms.new_identifier('A', 2);
        let b = syms.new_identifier('B', 2);
        wm.register_identifier(&top);
        // a and b form a cycle at level 2.
        wm.add(a.clone(), syms.str_constant("next"), b.clone(), false);
        wm.add(b.clone(), syms.str_constant("next"), a.clone(), false);
        wm.add(top, syms.str_constant("head"), a.clone(), false);
        assert_eq!(wm.effective_level(&a), 1);
        assert_eq!(wm.effective_level(&b), 1);
    }

    #[test]
    fn test_clear_preserves_totals_and_timetags() {
        let (mut syms, mut wm) = setup();
        let s = syms.new_identifier('S', 1);
        let w = wm.add(s.clone(), syms.str_constant("x"), syms.int_constant(1), false);
        wm.clear();
        assert!(wm.is_empty());
        assert_eq!(wm.totals().0, 1);
        let w2 = wm.add(s, syms.str_constant("y"), syms.int_constant(2), false);
        assert!(w2.timetag > w.timetag);
    }
}
