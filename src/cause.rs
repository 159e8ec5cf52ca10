// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The "why" of every mutation.
//!
//! A [`CauseStack`] is a last-in-first-out stack of [`CauseEntry`] values plus a side channel of
//! typed context values (see [`ContextKey`]). Whenever an event is synthesized, the tracker
//! snapshots the stack into an immutable [`Cause`] and hands it to the event.
//!
//! Pushing causes directly is rarely what you want; instead open a frame, push within it, and
//! let the frame put everything back when it closes:
//!
//! ```
//! use ticktx::{BlockPos, CauseEntry, CauseStack, keys};
//!
//! let mut causes = CauseStack::new();
//! causes.push_cause(CauseEntry::Player(7));
//! {
//!     let mut frame = causes.frame();
//!     frame.push_cause(CauseEntry::Block(BlockPos::ORIGIN));
//!     frame.add_context(&keys::BLOCK_TARGET, BlockPos::ORIGIN);
//!
//!     let cause = frame.current_cause();
//!     assert_eq!(cause.root(), Some(&CauseEntry::Block(BlockPos::ORIGIN)));
//!     assert_eq!(cause.context(&keys::BLOCK_TARGET), Some(&BlockPos::ORIGIN));
//! }
//! // closing the frame popped the block and dropped the context value again
//! assert_eq!(causes.peek_cause(), Some(&CauseEntry::Player(7)));
//! assert_eq!(causes.context(&keys::BLOCK_TARGET), None);
//! ```
//!
//! # Thread confinement
//!
//! The stack belongs to the simulation thread. Context values are reference counted without
//! atomics, which makes [`CauseStack`] neither `Send` nor `Sync`:
//!
//! ```compile_fail
//! fn assert_send<T: Send>() {}
//! assert_send::<ticktx::CauseStack>();
//! ```

use crate::{BlockPos, Config, ContainerId, EntityId};
use ahash::RandomState;
use std::{any::Any, borrow::Cow, collections::HashMap, fmt, rc::Rc};

mod context;
mod frame;
pub use context::{ContextKey, SpawnType, keys};
pub use frame::{FrameError, FrameHandle, StackFrame};
use frame::Frame;

type ContextMap = HashMap<&'static str, Rc<dyn Any>, RandomState>;

/// A single reason on the cause stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CauseEntry {
    Block(BlockPos),
    Entity(EntityId),
    Container(ContainerId),
    Player(u64),
    Plugin(Cow<'static, str>),
    /// Anything else the host wants to report, by name.
    Named(Cow<'static, str>),
}

impl fmt::Display for CauseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CauseEntry::Block(pos) => write!(f, "block {pos}"),
            CauseEntry::Entity(id) => write!(f, "{id}"),
            CauseEntry::Container(id) => write!(f, "{id}"),
            CauseEntry::Player(id) => write!(f, "player#{id}"),
            CauseEntry::Plugin(name) => write!(f, "plugin {name}"),
            CauseEntry::Named(name) => f.write_str(name),
        }
    }
}

/// An immutable snapshot of a [`CauseStack`], taken when an event is synthesized.
///
/// Entries are ordered top-first: [`Cause::root`] is the most recently pushed entry.
#[derive(Clone)]
pub struct Cause {
    entries: Vec<CauseEntry>,
    context: ContextMap,
}

impl Cause {
    /// The most immediate reason, if any.
    pub fn root(&self) -> Option<&CauseEntry> {
        self.entries.first()
    }

    pub fn entries(&self) -> &[CauseEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &CauseEntry) -> bool {
        self.entries.contains(entry)
    }

    /// The closest block on the stack.
    pub fn first_block(&self) -> Option<BlockPos> {
        self.entries.iter().find_map(|entry| match entry {
            CauseEntry::Block(pos) => Some(*pos),
            _ => None,
        })
    }

    /// The closest entity on the stack.
    pub fn first_entity(&self) -> Option<EntityId> {
        self.entries.iter().find_map(|entry| match entry {
            CauseEntry::Entity(id) => Some(*id),
            _ => None,
        })
    }

    pub fn context<T: 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.context.get(key.name())?.downcast_ref()
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.context.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Cause")
            .field("entries", &self.entries)
            .field("context", &keys)
            .finish()
    }
}

/// The live stack of causes and context for the current tick.
pub struct CauseStack {
    entries: Vec<CauseEntry>,
    context: ContextMap,
    frames: Vec<Frame>,
    next_frame: u64,
    verbose: bool,
}

impl Default for CauseStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CauseStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CauseStack")
            .field("entries", &self.entries)
            .field("context", &self.context.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl CauseStack {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        Self {
            entries: Vec::new(),
            context: crate::create_map(),
            frames: Vec::new(),
            next_frame: 0,
            verbose: config.verbose_frames,
        }
    }

    pub fn push_cause(&mut self, entry: CauseEntry) {
        self.entries.push(entry);
    }

    /// Pops the most recent cause.
    ///
    /// Popping below the depth at which the innermost frame was opened is allowed, but the frame
    /// will complain about it when it closes.
    pub fn pop_cause(&mut self) -> Option<CauseEntry> {
        self.entries.pop()
    }

    pub fn peek_cause(&self) -> Option<&CauseEntry> {
        self.entries.last()
    }

    /// Number of causes currently on the stack.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Number of frames currently open.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Snapshots the stack and context into a [`Cause`].
    pub fn current_cause(&self) -> Cause {
        Cause {
            entries: self.entries.iter().rev().cloned().collect(),
            context: self.context.clone(),
        }
    }

    /// Sets a context value, returning the one it replaced.
    ///
    /// If a frame is open, the first write to a key inside that frame remembers the key's
    /// previous value (or its absence) so that closing the frame can put it back.
    pub fn add_context<T: 'static>(&mut self, key: &ContextKey<T>, value: T) -> Option<Rc<T>> {
        self.remember(key.name());
        let previous = self.context.insert(key.name(), Rc::new(value))?;
        previous.downcast().ok()
    }

    pub fn context<T: 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.context.get(key.name())?.downcast_ref()
    }

    pub fn remove_context<T: 'static>(&mut self, key: &ContextKey<T>) -> Option<Rc<T>> {
        self.remember(key.name());
        let previous = self.context.remove(key.name())?;
        previous.downcast().ok()
    }

    fn remember(&mut self, key: &'static str) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if frame.saved.iter().any(|(saved, _)| *saved == key) {
            return;
        }
        frame.saved.push((key, self.context.get(key).cloned()));
    }

    /// Puts back everything `frame` remembered.
    fn close(&mut self, frame: Frame) {
        for (key, value) in frame.saved.into_iter().rev() {
            match value {
                Some(value) => {
                    self.context.insert(key, value);
                }
                None => {
                    self.context.remove(key);
                }
            }
        }
        if self.entries.len() < frame.depth {
            tracing::warn!(
                frame = %frame.handle,
                depth = frame.depth,
                remaining = self.entries.len(),
                "causes were popped below the depth of the frame that is closing"
            );
        } else {
            self.entries.truncate(frame.depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_is_top_first() {
        let mut causes = CauseStack::new();
        causes.push_cause(CauseEntry::Player(1));
        causes.push_cause(CauseEntry::Entity(EntityId(2)));
        causes.push_cause(CauseEntry::Block(BlockPos::ORIGIN));

        let cause = causes.current_cause();
        assert_eq!(cause.root(), Some(&CauseEntry::Block(BlockPos::ORIGIN)));
        assert_eq!(cause.first_entity(), Some(EntityId(2)));
        assert_eq!(cause.first_block(), Some(BlockPos::ORIGIN));
        assert_eq!(cause.entries().last(), Some(&CauseEntry::Player(1)));
    }

    #[test]
    fn cause_is_detached_from_the_stack() {
        let mut causes = CauseStack::new();
        causes.add_context(&keys::CREATOR, EntityId(3));
        let cause = causes.current_cause();
        causes.remove_context(&keys::CREATOR);
        causes.push_cause(CauseEntry::Player(9));

        assert!(cause.is_empty());
        assert_eq!(cause.context(&keys::CREATOR), Some(&EntityId(3)));
    }

    #[test]
    fn context_is_typed() {
        let mut causes = CauseStack::new();
        assert_eq!(causes.add_context(&keys::CREATOR, EntityId(1)), None);
        let replaced = causes.add_context(&keys::CREATOR, EntityId(2));
        assert_eq!(replaced.as_deref(), Some(&EntityId(1)));

        // same name, different type: never observed as the wrong type
        let imposter: ContextKey<u64> = ContextKey::new("creator");
        assert_eq!(causes.context(&imposter), None);
        assert_eq!(causes.context(&keys::CREATOR), Some(&EntityId(2)));
    }

    #[test]
    fn frame_restores_overwritten_context() {
        let mut causes = CauseStack::new();
        causes.add_context(&keys::NOTIFIER, EntityId(1));
        {
            let mut frame = causes.frame();
            frame.add_context(&keys::NOTIFIER, EntityId(2));
            frame.add_context(&keys::NOTIFIER, EntityId(3));
            frame.remove_context(&keys::NOTIFIER);
            frame.add_context(&keys::CREATOR, EntityId(4));
        }
        assert_eq!(causes.context(&keys::NOTIFIER), Some(&EntityId(1)));
        assert_eq!(causes.context(&keys::CREATOR), None);
    }

    #[test]
    fn frame_pops_back_to_its_depth() {
        let mut causes = CauseStack::new();
        causes.push_cause(CauseEntry::Player(1));
        {
            let mut frame = causes.frame();
            frame.push_cause(CauseEntry::Player(2));
            frame.push_cause(CauseEntry::Player(3));
            assert_eq!(frame.depth(), 3);
        }
        assert_eq!(causes.depth(), 1);
        assert_eq!(causes.frame_depth(), 0);
    }

    #[test]
    fn over_popping_inside_a_frame_is_survivable() {
        let mut causes = CauseStack::new();
        causes.push_cause(CauseEntry::Player(1));
        {
            let mut frame = causes.frame();
            frame.pop_cause();
        }
        assert_eq!(causes.depth(), 0);
    }
}
