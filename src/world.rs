// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The host simulation as seen by the tracker.
//!
//! The tracker never knows how a block is written or how an entity is added to a spatial
//! index. It only needs to read enough state to snapshot a position before it changes, and to
//! write a snapshot back when a change is rolled back. That surface is the [`World`] trait.
//!
//! [`MemoryWorld`] is a small in-memory implementation, used by the tests and benchmarks of this
//! crate and handy for trying the tracker out.

use std::fmt;

mod memory;
pub use memory::MemoryWorld;

/// The position of a block (world cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    /// The position at `(0, 0, 0)`.
    pub const ORIGIN: BlockPos = BlockPos::new(0, 0, 0);

    /// Creates a new position.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the position offset by the given deltas.
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Identifies a spawned object (an entity) in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Identifies an open container (inventory menu) in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

/// The mutable state of a host simulation, reduced to what the tracker reads and restores.
///
/// Implementations are expected to be plain setters: the tracker calls them only to put back
/// state it captured earlier (and to materialize deferred spawns), so they must not log new
/// transactions themselves.
pub trait World {
    /// The state of a single world cell.
    type Block: Clone + PartialEq + fmt::Debug;
    /// An object attached to a world cell (a block entity).
    type Attached: Clone + PartialEq + fmt::Debug;
    /// The full state of a spawned object.
    type Entity: Clone + fmt::Debug;
    /// The content of a single container slot.
    type Item: Clone + PartialEq + fmt::Debug;

    /// Returns true if `block` is the "nothing here" state (air).
    ///
    /// Used by the default change classification in
    /// [`PhaseContext::classify_change`](crate::PhaseContext::classify_change).
    fn is_empty_block(block: &Self::Block) -> bool;

    fn block(&self, pos: BlockPos) -> Self::Block;

    fn set_block(&mut self, pos: BlockPos, block: Self::Block);

    fn attached(&self, pos: BlockPos) -> Option<Self::Attached>;

    /// Replaces (or clears, for `None`) the object attached at `pos`.
    fn set_attached(&mut self, pos: BlockPos, attached: Option<Self::Attached>);

    fn entity(&self, id: EntityId) -> Option<&Self::Entity>;

    fn add_entity(&mut self, id: EntityId, entity: Self::Entity);

    /// Removes an entity, returning it if it existed.
    fn remove_entity(&mut self, id: EntityId) -> Option<Self::Entity>;

    fn slot(&self, container: ContainerId, slot: usize) -> Self::Item;

    fn set_slot(&mut self, container: ContainerId, slot: usize, item: Self::Item);

    fn set_container_open(&mut self, container: ContainerId, open: bool);
}

/// The captured state of a single position: the cell itself and what is attached to it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct BlockSnapshot<B, A> {
    pub pos: BlockPos,
    pub state: B,
    pub attached: Option<A>,
}

/// The [`BlockSnapshot`] type of a given [`World`].
pub type BlockSnapshotOf<W> = BlockSnapshot<<W as World>::Block, <W as World>::Attached>;

impl<B, A> BlockSnapshot<B, A>
where
    B: Clone,
    A: Clone,
{
    /// Creates a snapshot from its parts.
    pub fn new(pos: BlockPos, state: B, attached: Option<A>) -> Self {
        Self {
            pos,
            state,
            attached,
        }
    }

    /// Reads the current state of `pos` from `world`.
    pub fn capture<W>(world: &W, pos: BlockPos) -> Self
    where
        W: World<Block = B, Attached = A>,
    {
        Self {
            pos,
            state: world.block(pos),
            attached: world.attached(pos),
        }
    }

    /// Writes this snapshot back into `world`, including the attached object (or its absence).
    pub fn restore<W>(&self, world: &mut W)
    where
        W: World<Block = B, Attached = A>,
    {
        world.set_block(self.pos, self.state.clone());
        world.set_attached(self.pos, self.attached.clone());
    }
}

/// The captured state of a spawned object.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct EntitySnapshot<E> {
    pub id: EntityId,
    pub entity: E,
}

impl<E> EntitySnapshot<E> {
    pub fn new(id: EntityId, entity: E) -> Self {
        Self { id, entity }
    }
}

/// A single container slot going from `original` to `result`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct SlotChange<I> {
    pub slot: usize,
    pub original: I,
    pub result: I,
}

impl<I> SlotChange<I> {
    pub fn new(slot: usize, original: I, result: I) -> Self {
        Self {
            slot,
            original,
            result,
        }
    }
}

#[cfg(feature = "arbitrary")]
mod arbitrary {
    use super::{BlockPos, EntityId};
    use quickcheck::{Arbitrary, Gen};

    impl Arbitrary for BlockPos {
        fn arbitrary(g: &mut Gen) -> Self {
            // keep positions in a small cube so that repeated touches actually happen
            let coord = |g: &mut Gen| i32::from(u8::arbitrary(g) % 4);
            BlockPos::new(coord(g), coord(g), coord(g))
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            Box::new(
                (self.x, self.y, self.z)
                    .shrink()
                    .map(|(x, y, z)| BlockPos::new(x, y, z)),
            )
        }
    }

    impl Arbitrary for EntityId {
        fn arbitrary(g: &mut Gen) -> Self {
            EntityId(u64::arbitrary(g))
        }

        fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
            Box::new(self.0.shrink().map(EntityId))
        }
    }
}
