// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # ticktx: Transactional Mutation Tracking for Tick-Based Simulations
//!
//! This crate records every mutation a tick-based world simulation performs as a tree of
//! reversible transactions, turns that tree into events for external listeners once the
//! outermost mutation has completed, and rolls back exactly the mutations the listeners vetoed.
//!
//! The primary goal of this library is to let the host apply mutations eagerly, as it would
//! without any tracking, while still giving listeners (plugins, anti-cheat, region protection)
//! the final say over each one of them, together with a precise account of *why* it happened.
//!
//! ## Core Concepts
//!
//! The tracker is built from four pieces:
//!
//! - [`TransactionLog`]: the **transaction tree**. Each mutation is logged as a [`Transaction`]
//!   right before it is applied. Mutations logged while another one is still being applied are
//!   recorded as its side effects, through an [`EffectScope`].
//! - [`CauseStack`]: the **why**. A stack of [`CauseEntry`] values plus typed context (see
//!   [`ContextKey`] and [`keys`]), organized in frames that put everything back when they close.
//! - [`Listener`]: the **veto**. Listeners see one [`Event`] per batch of similar adjacent
//!   transactions and can cancel it, or invalidate individual [`EventEntry`]s.
//! - [`PhaseContext`]: the **policy** of the part of the tick that is running. It classifies
//!   block changes, provides the root cause, and decides which events are created.
//!
//! The host itself is abstracted as a [`World`]: the tracker only reads what it needs to
//! snapshot and writes back what it needs to restore. [`MemoryWorld`] is an in-memory
//! implementation used throughout the tests and benchmarks.
//!
//! ## Record, Batch, Post, Revert
//!
//! A log goes through a fixed lifecycle (see [`DriverState`]):
//!
//! 1. **Recording.** Call sites log transactions. Block changes at the same position are tracked
//!    by a per-position ledger, so that an event can report a position's first original, its
//!    final result and everything in between. Attached object changes are folded into the block
//!    change they belong to, spawns into the drops they are part of.
//! 2. **Batching.** Once the outermost mutation has completed, [`TransactionLog::unwind`]
//!    groups maximal runs of adjacent siblings of the same [`EventKind`] into [`Batch`]es.
//! 3. **Posting.** One event per batch is built, with a cause assembled from the phase and from
//!    every transaction the batch is nested in, and handed to the listener.
//! 4. **Reverting.** Cancelled transactions, their side effects, and the siblings chained to
//!    them are restored, latest first. Deferred transactions that survived are applied.
//!
//! A listener that fails (or panics) never stalls the simulation: the failure is logged and the
//! event is treated as not cancelled.
//!
//! ## Getting Started: Vetoing a Spawn
//!
//! ```rust
//! use ticktx::{
//!     BlockPos, BlockSnapshot, CauseEntry, CauseStack, EntityId, EntitySnapshot, Event,
//!     EventKind, ListenerError, MemoryWorld, Phase, SpawnType, TransactionLog, World,
//! };
//!
//! let mut world = MemoryWorld::new();
//! let pos = BlockPos::new(0, 64, 0);
//! world.set_block(pos, "chest");
//!
//! let phase = Phase::new("player interaction").with_source(CauseEntry::Player(1));
//! let mut causes = CauseStack::new();
//! let mut log = TransactionLog::new();
//!
//! // 1. RECORD
//! // The host logs each mutation right before applying it.
//! {
//!     let mut scope = log.log_block_change(&phase, BlockSnapshot::capture(&world, pos), "air");
//!     world.set_block(pos, "air");
//!     // breaking the chest spills its content; spawns are deferred to the unwind
//!     scope.log_spawn(
//!         EntitySnapshot::new(EntityId(7), "apple".to_string()),
//!         SpawnType::Drops,
//!     );
//! }
//!
//! // 2. UNWIND
//! // One event per batch. This listener vetoes every spawn.
//! let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
//!     if event.kind() == EventKind::SpawnObject {
//!         event.set_cancelled(true);
//!     }
//!     Ok(())
//! };
//! let report = log.unwind(&phase, &mut causes, &mut world, &mut listener);
//!
//! // 3. RESULT
//! // The chest stays broken, the apple never appeared.
//! assert_eq!(world.block(pos), "air");
//! assert_eq!(world.entity(EntityId(7)), None);
//! assert_eq!(report.events_posted, 2);
//! assert_eq!(report.restored, 1);
//! assert!(log.is_empty());
//! ```
//!
//! ## Scope of this Crate
//!
//! This crate does not simulate anything. It does not know how blocks are stored, how entities
//! move, or how plugins are loaded. It is meant to be embedded in a host that calls the `log_*`
//! methods at its mutation sites and [`TransactionLog::unwind`] at the end of each outermost
//! mutation.
//!
//! Logs and cause stacks belong to the simulation thread and are neither `Send` nor `Sync`.
//!
//! ## Features
//!
//! - `json`: Enables rendering a [`TreeDump`] as a `serde_json::Value`. This feature is enabled
//!   by default.
//! - `serde`: Provides `serde` support for positions, ids, snapshots and the tree dump.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for positions, ids and change kinds, useful
//!   for property-based testing.

use ahash::RandomState;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

// Use a constant seed for hashing to make benchmarks have less variance.
pub(crate) const DETERMINISTIC_HASHER: RandomState = RandomState::with_seeds(48, 1516, 23, 42);

pub mod cause;
pub use cause::{
    Cause, CauseEntry, CauseStack, ContextKey, FrameError, FrameHandle, SpawnType, StackFrame,
    keys,
};
mod config;
pub use config::Config;
mod driver;
pub use driver::{Batch, DriverState, UnwindReport};
pub mod event;
pub use event::{BlockTransaction, EntryPayload, Event, EventEntry, EventKind};
pub mod listener;
pub use listener::{DummyListener, Listener, ListenerError, RecordingListener};
mod phase;
pub use phase::{Phase, PhaseContext};
/// The transaction tree and its recording API.
///
/// See [`transaction`] module documentation for details and examples.
pub mod transaction;
pub use transaction::{
    AttachedChange, BlockChange, ChangeBlock, DroppedObject, EffectId, EffectScope, Node,
    SideEffect, Target, Transaction, TransactionLog, TransactionType, TreeDump, TxId,
};
pub mod world;
pub use world::{
    BlockPos, BlockSnapshot, BlockSnapshotOf, ContainerId, EntityId, EntitySnapshot, MemoryWorld,
    SlotChange, World,
};
/// Macros usable for tests and initialization
pub mod macros;

static ENABLE_DETERMINISM: AtomicBool = AtomicBool::new(false);

/// Makes all internal hash maps use a fixed seed.
///
/// This should only be enabled for testing and benchmarking.
#[doc(hidden)]
pub fn enable_determinism() {
    ENABLE_DETERMINISM.store(true, Ordering::Release);
}

/// Checks if determinism is enabled.
#[doc(hidden)]
pub fn determinism_enabled() -> bool {
    ENABLE_DETERMINISM.load(Ordering::Acquire)
}

#[inline]
fn make_random_state() -> RandomState {
    if determinism_enabled() {
        DETERMINISTIC_HASHER
    } else {
        RandomState::new()
    }
}

fn create_map<K, V>() -> HashMap<K, V, RandomState> {
    HashMap::with_hasher(make_random_state())
}
