// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! What the tracker needs to know about the part of the tick that is running.
//!
//! The host runs a tick in phases: entity ticks, block updates, player packets, plugin tasks.
//! Each phase decides how block changes are classified, what the root cause of its mutations is,
//! and which events it reports. That policy is a [`PhaseContext`]; [`Phase`] is a configurable
//! implementation that covers the common cases.

use crate::{
    BlockChange, Cause, CauseEntry, CauseStack, EntityId, Event, EventEntry, EventKind,
    Transaction, World, keys,
};
use std::borrow::Cow;

/// The policy of the phase a log is recorded and unwound in.
///
/// Every method has a default, so implementations only override what they care about.
pub trait PhaseContext<W: World> {
    fn name(&self) -> &str;

    /// Classifies a change of a position from `original` to `new`.
    ///
    /// Called once per logged block change, and again with the state from before the first
    /// change whenever a position is changed more than once.
    fn classify_change(&self, original: &W::Block, new: &W::Block) -> BlockChange {
        BlockChange::classify(W::is_empty_block(original), W::is_empty_block(new))
    }

    /// The root cause of everything that happens in this phase.
    fn source(&self) -> Option<&CauseEntry> {
        None
    }

    /// The entity that owns what is being changed, if the phase tracks one.
    fn tracked_creator(&self) -> Option<EntityId> {
        None
    }

    /// The entity that triggered what is being changed, if the phase tracks one.
    fn tracked_notifier(&self) -> Option<EntityId> {
        None
    }

    /// Pushes the phase's own causes and context into a freshly opened frame.
    fn populate_frame(&self, causes: &mut CauseStack) {
        if let Some(source) = self.source() {
            causes.push_cause(source.clone());
        }
        if let Some(creator) = self.tracked_creator() {
            causes.add_context(&keys::CREATOR, creator);
        }
        if let Some(notifier) = self.tracked_notifier() {
            causes.add_context(&keys::NOTIFIER, notifier);
        }
    }

    /// Builds the event for one batch. Returning `None` suppresses the event, which then counts
    /// as not cancelled.
    ///
    /// `parent` is the transaction the batch is a side effect of.
    #[expect(unused_variables)]
    fn create_event(
        &self,
        kind: EventKind,
        parent: Option<&Transaction<W>>,
        cause: Cause,
        entries: Vec<EventEntry<W>>,
    ) -> Option<Event<W>> {
        Some(Event::new(kind, cause, entries))
    }
}

/// A [`PhaseContext`] configured with builder-style setters.
///
/// ```
/// use ticktx::{BlockChange, CauseEntry, EntityId, Phase};
///
/// let phase = Phase::new("leaf decay")
///     .with_source(CauseEntry::Named("random tick".into()))
///     .with_creator(EntityId(3))
///     .with_change_kind(BlockChange::Decay);
/// assert_eq!(phase.name(), "leaf decay");
/// ```
#[derive(Debug, Clone)]
pub struct Phase {
    name: Cow<'static, str>,
    source: Option<CauseEntry>,
    creator: Option<EntityId>,
    notifier: Option<EntityId>,
    change_kind: Option<BlockChange>,
}

impl Phase {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: None,
            creator: None,
            notifier: None,
            change_kind: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_source(mut self, source: CauseEntry) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_creator(mut self, creator: EntityId) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn with_notifier(mut self, notifier: EntityId) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Reports every block change of this phase as `change`, whatever the states involved.
    pub fn with_change_kind(mut self, change: BlockChange) -> Self {
        self.change_kind = Some(change);
        self
    }
}

impl<W: World> PhaseContext<W> for Phase {
    fn name(&self) -> &str {
        &self.name
    }

    fn classify_change(&self, original: &W::Block, new: &W::Block) -> BlockChange {
        self.change_kind.unwrap_or_else(|| {
            BlockChange::classify(W::is_empty_block(original), W::is_empty_block(new))
        })
    }

    fn source(&self) -> Option<&CauseEntry> {
        self.source.as_ref()
    }

    fn tracked_creator(&self) -> Option<EntityId> {
        self.creator
    }

    fn tracked_notifier(&self) -> Option<EntityId> {
        self.notifier
    }
}
