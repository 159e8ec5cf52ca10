// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The per-position ledger.
//!
//! A position can be changed several times while a log is open: a block is placed, then updated
//! by a neighbor, then replaced again. Each change is its own [`Transaction::ChangeBlock`], but
//! listeners should see one change per position, from the state before the first change to the
//! state after the last one. The ledger remembers, per position, the snapshot from before the
//! first change and every transaction that touched the position since, in order.

use super::{Arena, Transaction, TxId};
use crate::{BlockChange, BlockPos, BlockSnapshotOf, BlockTransaction, World};
use ahash::RandomState;
use smallvec::SmallVec;
use std::collections::HashMap;

struct PositionHistory<W: World> {
    /// The state before the first touch. Never replaced.
    original: BlockSnapshotOf<W>,
    touches: SmallVec<[TxId; 2]>,
}

pub(crate) struct Ledger<W: World> {
    histories: HashMap<BlockPos, PositionHistory<W>, RandomState>,
}

impl<W: World> Ledger<W> {
    pub(crate) fn new() -> Self {
        Self {
            histories: crate::create_map(),
        }
    }

    /// Records that `tx`, which is about to be pushed, changes the position of `original` to
    /// `new_state`.
    ///
    /// Returns the effective kind of the change: the kind of going from the state before the
    /// first touch straight to `new_state`. All earlier touches of the position are reclassified
    /// to that kind too, so that they keep batching together.
    pub(crate) fn put(
        &mut self,
        arena: &mut Arena<W>,
        tx: TxId,
        original: &BlockSnapshotOf<W>,
        new_state: &W::Block,
        classify: impl Fn(&W::Block, &W::Block) -> BlockChange,
    ) -> BlockChange {
        let history = self
            .histories
            .entry(original.pos)
            .or_insert_with(|| PositionHistory {
                original: original.clone(),
                touches: SmallVec::new(),
            });
        let effective = classify(&history.original.state, new_state);
        for earlier in &history.touches {
            match &mut arena.node_mut(*earlier).transaction {
                Transaction::ChangeBlock(change) => change.change = effective,
                other => panic!(
                    "ledger entry {earlier} for {} is a {}, not a block change",
                    original.pos,
                    other.name()
                ),
            }
        }
        history.touches.push(tx);
        if history.touches.len() > 1 {
            tracing::trace!(
                pos = %original.pos,
                touches = history.touches.len(),
                ?effective,
                "position touched again"
            );
        }
        effective
    }

    /// The transactions that touched `pos`, in recording order.
    pub(crate) fn touches(&self, pos: BlockPos) -> &[TxId] {
        self.histories
            .get(&pos)
            .map(|history| history.touches.as_slice())
            .unwrap_or_default()
    }

    /// Collapses the touches of `pos` that are part of `batch` into a single block transaction.
    ///
    /// Returns the transaction and the nodes it stands for, or `None` if no member of `batch`
    /// touched `pos`.
    pub(crate) fn transaction_for(
        &self,
        arena: &Arena<W>,
        pos: BlockPos,
        batch: &[TxId],
    ) -> Option<(BlockTransaction<W::Block, W::Attached>, SmallVec<[TxId; 2]>)> {
        let history = self.histories.get(&pos)?;
        let members: SmallVec<[TxId; 2]> = history
            .touches
            .iter()
            .copied()
            .filter(|touch| batch.contains(touch))
            .collect();
        let (first, rest) = members.split_first()?;

        let change_at = |id: TxId| match arena.node(id).transaction.as_change_block() {
            Some(change) => change,
            None => panic!("ledger entry {id} for {pos} has no block change snapshot"),
        };
        // the first member's own snapshot, which may have been completed by absorption
        let original = change_at(*first).original.clone();
        let result = change_at(*members.last().unwrap_or(first)).result.clone();
        let intermediary = match rest.split_last() {
            Some((_, middle)) => middle
                .iter()
                .map(|id| change_at(*id).result.clone())
                .collect(),
            None => Vec::new(),
        };
        Some((
            BlockTransaction {
                original,
                result,
                intermediary,
            },
            members,
        ))
    }

    pub(crate) fn clear(&mut self) {
        self.histories.clear();
    }
}
