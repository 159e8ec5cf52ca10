// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Arena, ReverseWalk, Transaction, TxId};
use crate::World;
use std::fmt;

/// Identifies a [`SideEffect`] group in a [`TransactionLog`](super::TransactionLog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct EffectId(u32);

impl EffectId {
    pub(super) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

/// The transactions that resulted, as a side effect, from applying another one.
///
/// A group is opened for a transaction whose mutation is known to trigger further mutations
/// (a block change notifying its neighbors, an entity dropping its items). Everything logged
/// while the group is open is appended to it, in order, as a chain of its own.
#[derive(Debug, Clone)]
pub struct SideEffect {
    owner: TxId,
    label: &'static str,
    head: Option<TxId>,
    tail: Option<TxId>,
}

impl SideEffect {
    /// The transaction that produced these side effects.
    pub fn owner(&self) -> TxId {
        self.owner
    }

    /// What kind of processing produced these side effects, for diagnostics.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The first transaction in the group.
    pub fn head(&self) -> Option<TxId> {
        self.head
    }

    /// The most recently appended transaction in the group.
    pub fn tail(&self) -> Option<TxId> {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl<W: World> Arena<W> {
    /// Opens a new, empty side effect group on `owner`.
    pub(crate) fn open_effect(&mut self, owner: TxId, label: &'static str) -> EffectId {
        let id = self.push_effect(SideEffect {
            owner,
            label,
            head: None,
            tail: None,
        });
        self.node_mut(owner).side_effects.push(id);
        id
    }

    /// Removes `effect` from its owner if nothing was ever recorded into it.
    pub(crate) fn prune_if_empty(&mut self, effect: EffectId) {
        if !self.effect(effect).is_empty() {
            return;
        }
        let owner = self.effect(effect).owner;
        self.node_mut(owner)
            .side_effects
            .retain(|side_effect| *side_effect != effect);
    }

    /// Offers `child` to everything already recorded, newest first, starting at `newest`.
    ///
    /// Returns true if some transaction absorbed it, in which case `child` must not be recorded.
    pub(crate) fn try_absorb(&mut self, child: &Transaction<W>, newest: Option<TxId>) -> bool {
        let Some(absorber) = child.parent_absorber() else {
            return false;
        };
        let mut walk = ReverseWalk::new(newest, true);
        while let Some(candidate) = walk.next(self) {
            if absorber(child, self.node_mut(candidate)) {
                tracing::debug!(
                    absorbed = child.name(),
                    into = %candidate,
                    "transaction absorbed by an earlier one"
                );
                return true;
            }
        }
        false
    }

    /// Appends the already pushed node `id` to the chain of `effect`.
    pub(crate) fn link_child(&mut self, effect: EffectId, id: TxId) {
        let tail = self.effect(effect).tail;
        {
            let node = self.node_mut(id);
            node.parent = Some(effect);
            node.previous = tail;
        }
        match tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.effect_mut(effect).head = Some(id),
        }
        self.effect_mut(effect).tail = Some(id);
    }
}
