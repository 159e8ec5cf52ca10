// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Events synthesized from batches of transactions.
//!
//! Every batch of the log is reported as exactly one [`Event`]. The event lists one
//! [`EventEntry`] per sub-change, each with its own validity flag, and carries an overall
//! cancellation flag. Listeners may cancel the whole event, or invalidate individual entries
//! to cancel only the transactions behind them.

use crate::{
    BlockChange, BlockPos, BlockSnapshot, Cause, ContainerId, EntitySnapshot, SlotChange,
    SpawnType, TxId, World,
};
use smallvec::SmallVec;
use std::fmt;

/// The family of an event. Also the key transactions are batched by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub enum EventKind {
    ChangeBlock(BlockChange),
    AttachedObject,
    Notify,
    SpawnObject,
    DropItems,
    ContainerClick(ContainerId),
    ContainerClose,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ChangeBlock(change) => write!(f, "ChangeBlock.{change:?}"),
            EventKind::AttachedObject => f.write_str("AttachedObject"),
            EventKind::Notify => f.write_str("Notify"),
            EventKind::SpawnObject => f.write_str("SpawnObject"),
            EventKind::DropItems => f.write_str("DropItems"),
            EventKind::ContainerClick(container) => write!(f, "ContainerClick({container})"),
            EventKind::ContainerClose => f.write_str("ContainerClose"),
        }
    }
}

/// Everything that happened to one position within one batch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct BlockTransaction<B, A> {
    /// The state before the first change.
    pub original: BlockSnapshot<B, A>,
    /// The state after the last change.
    pub result: BlockSnapshot<B, A>,
    /// The states in between, in order. Excludes `original` and `result`.
    pub intermediary: Vec<BlockSnapshot<B, A>>,
}

impl<B, A> BlockTransaction<B, A> {
    pub fn pos(&self) -> BlockPos {
        self.original.pos
    }
}

/// What a single event entry reports.
pub enum EntryPayload<W: World> {
    Block(BlockTransaction<W::Block, W::Attached>),
    Attached {
        pos: BlockPos,
        removed: Option<W::Attached>,
        added: Option<W::Attached>,
    },
    Notify {
        source: BlockPos,
        target: BlockPos,
        state: W::Block,
    },
    Spawn {
        entity: EntitySnapshot<W::Entity>,
        spawn_type: SpawnType,
    },
    Slot {
        container: ContainerId,
        change: SlotChange<W::Item>,
    },
    Close {
        container: ContainerId,
    },
}

impl<W: World> fmt::Debug for EntryPayload<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPayload::Block(transaction) => f.debug_tuple("Block").field(transaction).finish(),
            EntryPayload::Attached {
                pos,
                removed,
                added,
            } => f
                .debug_struct("Attached")
                .field("pos", pos)
                .field("removed", removed)
                .field("added", added)
                .finish(),
            EntryPayload::Notify {
                source,
                target,
                state,
            } => f
                .debug_struct("Notify")
                .field("source", source)
                .field("target", target)
                .field("state", state)
                .finish(),
            EntryPayload::Spawn { entity, spawn_type } => f
                .debug_struct("Spawn")
                .field("entity", entity)
                .field("spawn_type", spawn_type)
                .finish(),
            EntryPayload::Slot { container, change } => f
                .debug_struct("Slot")
                .field("container", container)
                .field("change", change)
                .finish(),
            EntryPayload::Close { container } => f
                .debug_struct("Close")
                .field("container", container)
                .finish(),
        }
    }
}

/// A short summary naming what the entry is about.
impl<W: World> fmt::Display for EntryPayload<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPayload::Block(transaction) => transaction.pos().fmt(f),
            EntryPayload::Attached { pos, .. } => write!(f, "attached {pos}"),
            EntryPayload::Notify { source, target, .. } => write!(f, "{source} -> {target}"),
            EntryPayload::Spawn { entity, .. } => entity.id.fmt(f),
            EntryPayload::Slot { container, change } => write!(f, "{container}[{}]", change.slot),
            EntryPayload::Close { container } => container.fmt(f),
        }
    }
}

/// One sub-change of an [`Event`].
pub struct EventEntry<W: World> {
    payload: EntryPayload<W>,
    valid: bool,
    /// The transactions this entry stands for.
    members: SmallVec<[TxId; 2]>,
    /// For entries reporting one part of a transaction (one drop of many), which part.
    part: Option<usize>,
}

impl<W: World> EventEntry<W> {
    pub(crate) fn new(payload: EntryPayload<W>, members: SmallVec<[TxId; 2]>) -> Self {
        Self {
            payload,
            valid: true,
            members,
            part: None,
        }
    }

    pub(crate) fn with_part(mut self, part: usize) -> Self {
        self.part = Some(part);
        self
    }

    pub fn payload(&self) -> &EntryPayload<W> {
        &self.payload
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Marks the entry invalid: the transactions behind it will be cancelled and rolled back.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn members(&self) -> &[TxId] {
        &self.members
    }

    pub fn part(&self) -> Option<usize> {
        self.part
    }

    /// The position this entry is about, if it is about a position.
    pub fn pos(&self) -> Option<BlockPos> {
        match &self.payload {
            EntryPayload::Block(transaction) => Some(transaction.pos()),
            EntryPayload::Attached { pos, .. } => Some(*pos),
            EntryPayload::Notify { target, .. } => Some(*target),
            _ => None,
        }
    }
}

impl<W: World> fmt::Debug for EventEntry<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEntry")
            .field("payload", &self.payload)
            .field("valid", &self.valid)
            .field("members", &self.members)
            .field("part", &self.part)
            .finish()
    }
}

/// A cancellable event reporting one batch of transactions.
pub struct Event<W: World> {
    kind: EventKind,
    cause: Cause,
    entries: Vec<EventEntry<W>>,
    cancelled: bool,
}

impl<W: World> Event<W> {
    pub fn new(kind: EventKind, cause: Cause, entries: Vec<EventEntry<W>>) -> Self {
        Self {
            kind,
            cause,
            entries,
            cancelled: false,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn entries(&self) -> &[EventEntry<W>] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [EventEntry<W>] {
        &mut self.entries
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    /// Invalidates every entry matching `predicate`. Returns how many were invalidated.
    pub fn invalidate_where(&mut self, mut predicate: impl FnMut(&EventEntry<W>) -> bool) -> usize {
        let mut invalidated = 0;
        for entry in &mut self.entries {
            if entry.valid && predicate(entry) {
                entry.valid = false;
                invalidated += 1;
            }
        }
        invalidated
    }

    /// A one-line summary, as used in logs.
    pub fn describe(&self) -> String {
        let invalid = self.entries.iter().filter(|entry| !entry.valid).count();
        let mut summary = format!("{} with {} entries", self.kind, self.entries.len());
        if invalid > 0 {
            summary.push_str(&format!(", {invalid} invalid"));
        }
        if self.cancelled {
            summary.push_str(", cancelled");
        }
        summary
    }

    /// Treats the event as if no listener had touched it.
    pub(crate) fn reset_outcome(&mut self) {
        self.cancelled = false;
        for entry in &mut self.entries {
            entry.valid = true;
        }
    }
}

impl<W: World> fmt::Debug for Event<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("cause", &self.cause)
            .field("entries", &self.entries)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
