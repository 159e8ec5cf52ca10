// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Turning a recorded log into events, and applying what listeners decided.
//!
//! [`TransactionLog::unwind`] runs once the outermost mutation has completed. It walks the log
//! through a fixed sequence of states:
//!
//! 1. **Batching**: every node is materialized, then runs of adjacent siblings that can share an
//!    event are grouped into [`Batch`]es, ordered by their first member.
//! 2. **Posting** and **Resolving**, once per batch: the cause is assembled in a fresh frame of the
//!    cause stack, the event is built and handed to the listener, and the transactions behind
//!    cancelled events or invalidated entries are marked cancelled.
//! 3. **Reverting**: every cancelled transaction is restored, in reverse depth-first order, so
//!    that later mutations are undone before the ones they depended on.
//! 4. **Committing**: deferred transactions (spawns, drops) that survived are applied to the
//!    world, in recording order.
//!
//! The log is then empty again and back to [`DriverState::Idle`].

use crate::{
    Cause, CauseStack, EntryPayload, Event, EventEntry, EventKind, Listener, ListenerError,
    PhaseContext, SpawnType, Transaction, TransactionLog, TxId, World,
    transaction::{DeepWalk, ReverseWalk},
};
use smallvec::{SmallVec, smallvec};
use std::{
    iter,
    panic::{self, AssertUnwindSafe},
};

/// Where a [`TransactionLog`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Nothing recorded.
    Idle,
    Recording,
    Batching,
    Posting,
    Resolving,
    Reverting,
    Committing,
}

/// A maximal run of adjacent sibling transactions reported in one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    kind: EventKind,
    parent: Option<TxId>,
    members: SmallVec<[TxId; 4]>,
}

impl Batch {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The transaction all members are side effects of.
    pub fn parent(&self) -> Option<TxId> {
        self.parent
    }

    pub fn members(&self) -> &[TxId] {
        &self.members
    }
}

/// What happened while unwinding a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub batches: usize,
    pub events_posted: usize,
    /// Transactions marked cancelled, including those cancelled through their parent or
    /// predecessor.
    pub cancelled: usize,
    pub restored: usize,
    /// Deferred transactions applied to the world.
    pub committed: usize,
    /// Batches whose event could not be built, or whose listener failed.
    pub listener_failures: usize,
}

impl<W: World> TransactionLog<W> {
    /// Groups the log into batches, in the order events are posted.
    pub fn batches(&self) -> Vec<Batch> {
        let mut assigned = vec![false; self.arena.len()];
        let mut batches = Vec::new();
        let mut walk = DeepWalk::new(self.head, true);
        while let Some(first) = walk.next(&self.arena) {
            if assigned[first.index()] {
                continue;
            }
            let mut members: SmallVec<[TxId; 4]> = smallvec![first];
            assigned[first.index()] = true;
            let mut current = first;
            while let Some(next) = self.arena.node(current).next {
                let node = &self.arena.node(current).transaction;
                if !node.can_batch_with(&self.arena.node(next).transaction) {
                    break;
                }
                members.push(next);
                assigned[next.index()] = true;
                current = next;
            }
            batches.push(Batch {
                kind: self.arena.node(first).transaction.event_kind(),
                parent: self.arena.parent_of(first),
                members,
            });
        }
        batches
    }

    /// Marks `id` cancelled, together with all of its side effects and the following siblings
    /// that must be cancelled with it. Returns how many transactions were newly cancelled.
    pub fn mark_cancelled(&mut self, id: TxId) -> usize {
        let mut cancelled = 0;
        let mut pending: SmallVec<[TxId; 4]> = smallvec![id];
        while let Some(id) = pending.pop() {
            let mut walk = DeepWalk::new(Some(id), false);
            while let Some(member) = walk.next(&self.arena) {
                let node = self.arena.node_mut(member);
                if !node.cancelled {
                    node.cancelled = true;
                    cancelled += 1;
                }
            }
            if let Some(next) = self.arena.node(id).next {
                let node = self.arena.node(next);
                if !node.cancelled && node.transaction.requires_cancellation_if_chained() {
                    pending.push(next);
                }
            }
        }
        cancelled
    }

    /// Posts one event per batch to `listener`, rolls back whatever was cancelled, applies the
    /// surviving deferred transactions, and empties the log.
    ///
    /// Listener failures never abort the unwind: the event is treated as not cancelled and the
    /// failure is logged together with the batch (and, with
    /// [`Config::dump_on_listener_failure`](crate::Config::dump_on_listener_failure), the tree).
    /// The same holds for a phase that panics while building an event. A panic that is not
    /// caught still leaves the log empty and [`DriverState::Idle`] before it propagates.
    pub fn unwind(
        &mut self,
        ctx: &dyn PhaseContext<W>,
        causes: &mut CauseStack,
        world: &mut W,
        listener: &mut dyn Listener<W>,
    ) -> UnwindReport {
        if self.is_empty() {
            self.reset();
            return UnwindReport::default();
        }
        let unwound =
            panic::catch_unwind(AssertUnwindSafe(|| self.drive(ctx, causes, world, listener)));
        match unwound {
            Ok(report) => report,
            Err(payload) => {
                tracing::error!(
                    phase = ctx.name(),
                    state = ?self.state(),
                    "unwind panicked, dropping the log"
                );
                self.reset();
                panic::resume_unwind(payload)
            }
        }
    }

    fn drive(
        &mut self,
        ctx: &dyn PhaseContext<W>,
        causes: &mut CauseStack,
        world: &mut W,
        listener: &mut dyn Listener<W>,
    ) -> UnwindReport {
        let mut report = UnwindReport::default();
        tracing::debug!(phase = ctx.name(), transactions = self.len(), "unwinding");

        self.enter(DriverState::Batching);
        for node in self.arena.nodes_mut() {
            node.materialize();
        }
        let batches = self.batches();
        report.batches = batches.len();

        for batch in &batches {
            self.enter(DriverState::Posting);
            let live: SmallVec<[TxId; 4]> = batch
                .members
                .iter()
                .copied()
                .filter(|id| !self.arena.node(*id).cancelled)
                .collect();
            if live.is_empty() {
                continue;
            }
            let mut event = match self.guarded_generate(ctx, causes, batch, &live) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    report.listener_failures += 1;
                    self.report_failure(&err, batch, None);
                    continue;
                }
            };
            report.events_posted += 1;
            if let Err(err) = self.post(listener, &mut event) {
                report.listener_failures += 1;
                self.report_failure(&err, batch, Some(&event));
                event.reset_outcome();
            }

            self.enter(DriverState::Resolving);
            report.cancelled += self.mark_cancelled_transactions(&event, &live);
        }

        self.enter(DriverState::Reverting);
        report.restored = self.revert(world);
        self.enter(DriverState::Committing);
        report.committed = self.commit(world);

        tracing::debug!(?report, "unwound");
        self.reset();
        report
    }

    /// Builds the event of a batch, turning a panicking phase into an error when panics are
    /// caught.
    fn guarded_generate(
        &self,
        ctx: &dyn PhaseContext<W>,
        causes: &mut CauseStack,
        batch: &Batch,
        live: &[TxId],
    ) -> Result<Option<Event<W>>, ListenerError> {
        if !self.config.catch_listener_panics {
            return Ok(self.generate_event(ctx, causes, batch, live));
        }
        let generated = AssertUnwindSafe(|| self.generate_event(ctx, causes, batch, live));
        panic::catch_unwind(generated)
            .map_err(|payload| ListenerError::from_panic(format!("phase {}", ctx.name()), payload))
    }

    fn generate_event(
        &self,
        ctx: &dyn PhaseContext<W>,
        causes: &mut CauseStack,
        batch: &Batch,
        live: &[TxId],
    ) -> Option<Event<W>> {
        let entries = self.entries_for(live);
        if entries.is_empty() {
            return None;
        }
        let cause = self.batch_cause(ctx, causes, batch);
        let parent = batch.parent.map(|id| &self.arena.node(id).transaction);
        ctx.create_event(batch.kind, parent, cause, entries)
    }

    /// Assembles the cause of a batch: the phase's own causes, then what each transaction the
    /// batch is nested in contributes, outermost first.
    fn batch_cause(
        &self,
        ctx: &dyn PhaseContext<W>,
        causes: &mut CauseStack,
        batch: &Batch,
    ) -> Cause {
        let mut frame = causes.frame();
        ctx.populate_frame(&mut frame);
        if let Some(parent) = batch.parent {
            for ancestor in self.arena.ancestors(parent).into_iter().chain(iter::once(parent)) {
                let outer = self
                    .arena
                    .parent_of(ancestor)
                    .map(|id| &self.arena.node(id).transaction);
                if let Some(mutator) = self.arena.node(ancestor).transaction.frame_mutator(outer) {
                    mutator(&mut *frame);
                }
            }
        }
        frame.current_cause()
    }

    fn entries_for(&self, live: &[TxId]) -> Vec<EventEntry<W>> {
        let mut entries = Vec::new();
        let mut positions = Vec::new();
        for id in live {
            match &self.arena.node(*id).transaction {
                Transaction::ChangeBlock(change) => {
                    // every touch of a position within the batch becomes a single entry
                    if positions.contains(&change.pos()) {
                        continue;
                    }
                    positions.push(change.pos());
                    if let Some((transaction, members)) =
                        self.ledger.transaction_for(&self.arena, change.pos(), live)
                    {
                        entries.push(EventEntry::new(EntryPayload::Block(transaction), members));
                    }
                }
                Transaction::AttachObjectAdd { pos, added } => entries.push(EventEntry::new(
                    EntryPayload::Attached {
                        pos: *pos,
                        removed: None,
                        added: Some(added.clone()),
                    },
                    smallvec![*id],
                )),
                Transaction::AttachObjectRemove { pos, removed } => {
                    entries.push(EventEntry::new(
                        EntryPayload::Attached {
                            pos: *pos,
                            removed: Some(removed.clone()),
                            added: None,
                        },
                        smallvec![*id],
                    ))
                }
                Transaction::AttachObjectReplace {
                    pos,
                    removed,
                    added,
                } => entries.push(EventEntry::new(
                    EntryPayload::Attached {
                        pos: *pos,
                        removed: Some(removed.clone()),
                        added: Some(added.clone()),
                    },
                    smallvec![*id],
                )),
                Transaction::Notification {
                    source,
                    target,
                    source_state,
                } => entries.push(EventEntry::new(
                    EntryPayload::Notify {
                        source: *source,
                        target: *target,
                        state: source_state.clone(),
                    },
                    smallvec![*id],
                )),
                Transaction::SpawnObject { entity, spawn_type } => entries.push(EventEntry::new(
                    EntryPayload::Spawn {
                        entity: entity.clone(),
                        spawn_type: *spawn_type,
                    },
                    smallvec![*id],
                )),
                Transaction::DestroyDrops { drops, .. } => {
                    for (part, dropped) in drops.iter().enumerate() {
                        if dropped.is_rejected() {
                            continue;
                        }
                        let payload = EntryPayload::Spawn {
                            entity: dropped.snapshot().clone(),
                            spawn_type: SpawnType::Drops,
                        };
                        entries.push(EventEntry::new(payload, smallvec![*id]).with_part(part));
                    }
                }
                Transaction::ContainerClick { container, changes } => {
                    for change in changes {
                        let payload = EntryPayload::Slot {
                            container: *container,
                            change: change.clone(),
                        };
                        entries.push(EventEntry::new(payload, smallvec![*id]));
                    }
                }
                Transaction::ContainerClose { container } => entries.push(EventEntry::new(
                    EntryPayload::Close {
                        container: *container,
                    },
                    smallvec![*id],
                )),
            }
        }
        entries
    }

    fn post(
        &self,
        listener: &mut dyn Listener<W>,
        event: &mut Event<W>,
    ) -> Result<(), ListenerError> {
        if !self.config.catch_listener_panics {
            return listener.on_event(event);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            Ok(result) => result,
            Err(payload) => Err(ListenerError::from_panic("<panicked>", payload)),
        }
    }

    fn report_failure(&self, err: &ListenerError, batch: &Batch, event: Option<&Event<W>>) {
        let targets: Vec<String> = batch
            .members
            .iter()
            .map(|id| self.arena.node(*id).transaction.target().to_string())
            .collect();
        let event = event.map_or_else(|| format!("{} (not built)", batch.kind), Event::describe);
        if self.config.dump_on_listener_failure {
            tracing::error!(
                %err,
                %event,
                ?targets,
                tree = %self.dump(),
                "event failed, treating it as not cancelled"
            );
        } else {
            tracing::error!(
                %err,
                %event,
                ?targets,
                "event failed, treating it as not cancelled"
            );
        }
    }

    /// Flags the transactions behind a posted event according to its outcome.
    fn mark_cancelled_transactions(&mut self, event: &Event<W>, live: &[TxId]) -> usize {
        if event.is_cancelled() {
            return live.iter().map(|id| self.mark_cancelled(*id)).sum();
        }
        let mut cancelled = 0;
        for entry in event.entries().iter().filter(|entry| !entry.is_valid()) {
            for member in entry.members() {
                if self.arena.get(*member).is_none() {
                    tracing::warn!(tx = %member, "event entry refers to an unknown transaction");
                    continue;
                }
                cancelled += match entry.part() {
                    Some(part) => self.reject_part(*member, part),
                    None => self.mark_cancelled(*member),
                };
            }
        }
        cancelled
    }

    /// Rejects a single drop. The drops transaction is only cancelled once every drop is.
    fn reject_part(&mut self, id: TxId, part: usize) -> usize {
        let Transaction::DestroyDrops { drops, .. } = &mut self.arena.node_mut(id).transaction
        else {
            return self.mark_cancelled(id);
        };
        if let Some(dropped) = drops.get_mut(part) {
            dropped.rejected = true;
        }
        if drops.iter().all(|dropped| dropped.rejected) {
            self.mark_cancelled(id)
        } else {
            0
        }
    }

    fn revert(&mut self, world: &mut W) -> usize {
        let mut restored = 0;
        let mut walk = ReverseWalk::new(self.tail, true);
        while let Some(id) = walk.next(&self.arena) {
            let node = self.arena.node(id);
            if node.cancelled {
                tracing::debug!(
                    tx = %id,
                    transaction = node.transaction.name(),
                    target = %node.transaction.target(),
                    "restoring"
                );
                node.transaction.restore(world);
                restored += 1;
            }
        }
        restored
    }

    fn commit(&mut self, world: &mut W) -> usize {
        let mut committed = 0;
        let mut walk = DeepWalk::new(self.head, true);
        while let Some(id) = walk.next(&self.arena) {
            let node = self.arena.node(id);
            if node.transaction.is_deferred() && !node.cancelled {
                node.transaction.commit(world);
                committed += 1;
            }
        }
        committed
    }
}
