// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Depth-first walks over the transaction tree.
//!
//! The forward walk visits a node, then every side effect group of that node (each one deeply,
//! in opening order), then the node's successor. This is recording order, the order in which
//! batches are formed and deferred transactions are applied.
//!
//! The reverse walk is its exact mirror: side effect groups last-to-first, each from its tail
//! backwards, then the node itself, then the node's predecessor. It visits later-dependent
//! transactions before the ones they depend on, which is the order for rollback and for finding
//! absorbers.
//!
//! The walks keep their position in a small explicit stack and only borrow the arena for the
//! duration of a single step. That lets the tracker mutate nodes between steps.

use super::{Arena, TxId};
use crate::World;
use smallvec::{SmallVec, smallvec};

/// Forward depth-first walk state. See the module docs.
#[derive(Debug, Clone)]
pub(crate) struct DeepWalk {
    /// Nodes still to visit, with whether their successors are part of the walk.
    stack: SmallVec<[(TxId, bool); 8]>,
}

impl DeepWalk {
    /// Starts at `start`. With `follow_siblings` unset, the walk covers only `start` and what is
    /// nested below it.
    pub(crate) fn new(start: Option<TxId>, follow_siblings: bool) -> Self {
        let stack = match start {
            Some(start) => smallvec![(start, follow_siblings)],
            None => SmallVec::new(),
        };
        Self { stack }
    }

    pub(crate) fn next<W: World>(&mut self, arena: &Arena<W>) -> Option<TxId> {
        let (id, follow_next) = self.stack.pop()?;
        let node = arena.node(id);
        if follow_next {
            if let Some(next) = node.next {
                self.stack.push((next, true));
            }
        }
        // pushed in reverse so that the first group is walked first
        for effect in node.side_effects.iter().rev() {
            if let Some(head) = arena.effect(*effect).head() {
                self.stack.push((head, true));
            }
        }
        Some(id)
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Expand { follow_previous: bool },
    Visit,
}

/// Reverse depth-first walk state. See the module docs.
#[derive(Debug, Clone)]
pub(crate) struct ReverseWalk {
    stack: SmallVec<[(TxId, Step); 8]>,
}

impl ReverseWalk {
    /// Starts at `start`. With `follow_siblings` unset, the walk covers only `start` and what is
    /// nested below it.
    pub(crate) fn new(start: Option<TxId>, follow_siblings: bool) -> Self {
        let stack = match start {
            Some(start) => smallvec![(
                start,
                Step::Expand {
                    follow_previous: follow_siblings
                }
            )],
            None => SmallVec::new(),
        };
        Self { stack }
    }

    pub(crate) fn next<W: World>(&mut self, arena: &Arena<W>) -> Option<TxId> {
        loop {
            let (id, step) = self.stack.pop()?;
            let follow_previous = match step {
                Step::Visit => return Some(id),
                Step::Expand { follow_previous } => follow_previous,
            };
            let node = arena.node(id);
            if follow_previous {
                if let Some(previous) = node.previous {
                    self.stack.push((
                        previous,
                        Step::Expand {
                            follow_previous: true,
                        },
                    ));
                }
            }
            self.stack.push((id, Step::Visit));
            // the last group ends up on top, so it is walked first
            for effect in node.side_effects.iter() {
                if let Some(tail) = arena.effect(*effect).tail() {
                    self.stack.push((
                        tail,
                        Step::Expand {
                            follow_previous: true,
                        },
                    ));
                }
            }
        }
    }
}

/// Iterator over a forward depth-first walk. Created by
/// [`TransactionLog::deep_iter`](super::TransactionLog::deep_iter) and
/// [`TransactionLog::subtree`](super::TransactionLog::subtree).
pub struct DeepIter<'a, W: World> {
    arena: &'a Arena<W>,
    walk: DeepWalk,
}

impl<'a, W: World> DeepIter<'a, W> {
    pub(crate) fn new(arena: &'a Arena<W>, start: Option<TxId>, follow_siblings: bool) -> Self {
        Self {
            arena,
            walk: DeepWalk::new(start, follow_siblings),
        }
    }
}

impl<W: World> Iterator for DeepIter<'_, W> {
    type Item = TxId;

    fn next(&mut self) -> Option<Self::Item> {
        self.walk.next(self.arena)
    }
}

/// Iterator over a reverse depth-first walk. Created by
/// [`TransactionLog::reverse_deep_iter`](super::TransactionLog::reverse_deep_iter).
pub struct ReverseDeepIter<'a, W: World> {
    arena: &'a Arena<W>,
    walk: ReverseWalk,
}

impl<'a, W: World> ReverseDeepIter<'a, W> {
    pub(crate) fn new(arena: &'a Arena<W>, start: Option<TxId>, follow_siblings: bool) -> Self {
        Self {
            arena,
            walk: ReverseWalk::new(start, follow_siblings),
        }
    }
}

impl<W: World> Iterator for ReverseDeepIter<'_, W> {
    type Item = TxId;

    fn next(&mut self) -> Option<Self::Item> {
        self.walk.next(self.arena)
    }
}
