// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use std::{fmt, marker::PhantomData};

/// A typed key into the context side channel of a [`CauseStack`](super::CauseStack).
///
/// Keys are compared by name; the type parameter only ensures that a value is read back as the
/// type it was written with. Reading through a key whose type does not match the stored value
/// yields `None`.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// Why an object was spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum SpawnType {
    /// Dropped by something that was destroyed.
    Drops,
    /// Spawned by the simulation on its own.
    Natural,
    /// Placed by a player or another entity.
    Placement,
    /// Spawned by a plugin.
    Plugin,
}

/// The context keys the tracker itself reads or writes.
pub mod keys {
    use super::{ContextKey, SpawnType};
    use crate::{BlockChange, BlockPos, EntityId};

    /// The entity that created the thing currently being changed.
    pub const CREATOR: ContextKey<EntityId> = ContextKey::new("creator");
    /// The entity that triggered the current neighbor notification.
    pub const NOTIFIER: ContextKey<EntityId> = ContextKey::new("notifier");
    /// The position whose change is producing side effects.
    pub const BLOCK_TARGET: ContextKey<BlockPos> = ContextKey::new("block_target");
    /// The position that sent the neighbor notification being processed.
    pub const NOTIFY_SOURCE: ContextKey<BlockPos> = ContextKey::new("notify_source");
    /// The kind of block change that led to the current notification.
    pub const CHANGE_KIND: ContextKey<BlockChange> = ContextKey::new("change_kind");
    pub const SPAWN_TYPE: ContextKey<SpawnType> = ContextKey::new("spawn_type");
    /// Name of the plugin on whose behalf the current phase runs.
    pub const PLUGIN: ContextKey<String> = ContextKey::new("plugin");
}
