// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The transaction tree.
//!
//! Every mutation the host is about to perform is logged as a [`Transaction`] node in a
//! [`TransactionLog`]. Nodes logged at the top level form a flat chain in recording order.
//! Nodes logged while another mutation is still being applied become children of that mutation:
//! they are appended to a [`SideEffect`] group of the parent, which is itself a chain. The result
//! is a tree whose every level is a doubly linked list.
//!
//! ```text
//! tx#0 ChangeBlock ─────────────────────────── tx#3 Notification
//!   └ side effects: [tx#1 Notification ── tx#2 SpawnObject]
//! ```
//!
//! Nodes live in an arena and refer to each other by [`TxId`] and [`EffectId`], so the tree has
//! no ownership cycles and the whole log can be dropped in one go when a tick ends.
//!
//! # Recording
//!
//! ```
//! use ticktx::{BlockPos, BlockSnapshot, MemoryWorld, Phase, TransactionLog, World};
//!
//! let mut world = MemoryWorld::new();
//! let mut log = TransactionLog::<MemoryWorld>::new();
//! let phase = Phase::new("tick");
//! let pos = BlockPos::ORIGIN;
//!
//! {
//!     let original = BlockSnapshot::capture(&world, pos);
//!     let mut scope = log.log_block_change(&phase, original, "stone");
//!     world.set_block(pos, "stone");
//!     // anything logged through `scope` is a side effect of the block change
//!     scope.log_notification(pos, pos.offset(1, 0, 0), "stone");
//! }
//! assert_eq!(log.len(), 2);
//! ```
//!
//! # Absorption
//!
//! Some transactions are better described as an amendment of a transaction that is still being
//! applied than as a transaction of their own. Removing the block entity of a chest while the
//! chest block is being replaced is part of that replacement. Such transactions declare an
//! absorber; before they are appended anywhere, every node already in the log is offered the new
//! transaction, newest first, and the first one that accepts it swallows it.

use crate::World;
use std::{fmt, panic::Location};

mod dump;
mod effect;
mod iter;
mod kind;
mod ledger;
mod sink;

pub use dump::{DumpEffect, DumpNode, TreeDump};
pub use effect::{EffectId, SideEffect};
pub use iter::{DeepIter, ReverseDeepIter};
pub use kind::{
    AbsorbingStep, AttachedChange, BlockChange, ChangeBlock, DroppedObject, FrameMutator, Target,
    Transaction, TransactionType,
};
pub use sink::{EffectScope, TransactionLog};

pub(crate) use iter::{DeepWalk, ReverseWalk};
pub(crate) use ledger::Ledger;

/// Identifies a node in a [`TransactionLog`].
///
/// Ids are only meaningful for the log that issued them, and only until that log is unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct TxId(u32);

impl TxId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// A transaction together with its place in the tree.
pub struct Node<W: World> {
    pub(crate) transaction: Transaction<W>,
    pub(crate) cancelled: bool,
    /// Set once the deferred parts of the transaction have been captured.
    pub(crate) recorded: bool,
    pub(crate) side_effects: smallvec::SmallVec<[EffectId; 2]>,
    pub(crate) previous: Option<TxId>,
    pub(crate) next: Option<TxId>,
    /// The side effect group this node belongs to, `None` at the top level.
    pub(crate) parent: Option<EffectId>,
    pub(crate) location: &'static Location<'static>,
}

impl<W: World> Node<W> {
    pub(crate) fn new(transaction: Transaction<W>, location: &'static Location<'static>) -> Self {
        Self {
            transaction,
            cancelled: false,
            recorded: false,
            side_effects: smallvec::SmallVec::new(),
            previous: None,
            next: None,
            parent: None,
            location,
        }
    }

    pub fn transaction(&self) -> &Transaction<W> {
        &self.transaction
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    /// The side effect groups opened while this transaction was applied, in opening order.
    pub fn side_effects(&self) -> &[EffectId] {
        &self.side_effects
    }

    pub fn previous(&self) -> Option<TxId> {
        self.previous
    }

    pub fn next(&self) -> Option<TxId> {
        self.next
    }

    pub fn parent(&self) -> Option<EffectId> {
        self.parent
    }

    /// Where the transaction was logged from.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Captures the deferred parts of the transaction. Idempotent.
    pub(crate) fn materialize(&mut self) {
        if !self.recorded {
            self.transaction.materialize();
            self.recorded = true;
        }
    }
}

/// Storage for the nodes and side effect groups of one log.
pub(crate) struct Arena<W: World> {
    nodes: Vec<Node<W>>,
    effects: Vec<SideEffect>,
}

impl<W: World> Arena<W> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The id the next pushed node will get.
    pub(crate) fn next_id(&self) -> TxId {
        TxId(self.nodes.len() as u32)
    }

    pub(crate) fn push_node(&mut self, node: Node<W>) -> TxId {
        let id = self.next_id();
        self.nodes.push(node);
        id
    }

    pub(crate) fn get(&self, id: TxId) -> Option<&Node<W>> {
        self.nodes.get(id.index())
    }

    pub(crate) fn node(&self, id: TxId) -> &Node<W> {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: TxId) -> &mut Node<W> {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node<W>> {
        self.nodes.iter()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node<W>> {
        self.nodes.iter_mut()
    }

    pub(crate) fn get_effect(&self, id: EffectId) -> Option<&SideEffect> {
        self.effects.get(id.index())
    }

    pub(crate) fn effect(&self, id: EffectId) -> &SideEffect {
        &self.effects[id.index()]
    }

    pub(crate) fn effect_mut(&mut self, id: EffectId) -> &mut SideEffect {
        &mut self.effects[id.index()]
    }

    pub(crate) fn push_effect(&mut self, effect: SideEffect) -> EffectId {
        let id = EffectId::new(self.effects.len());
        self.effects.push(effect);
        id
    }

    /// The transaction whose side effect `id` is, if any.
    pub(crate) fn parent_of(&self, id: TxId) -> Option<TxId> {
        let effect = self.node(id).parent?;
        Some(self.effect(effect).owner())
    }

    /// The transactions `id` is nested in, outermost first.
    pub(crate) fn ancestors(&self, id: TxId) -> Vec<TxId> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent_of(parent);
        }
        ancestors.reverse();
        ancestors
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.effects.clear();
    }
}
