// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{BlockPos, ContainerId, EntityId, World};
use std::collections::{BTreeMap, BTreeSet};

/// A [`World`] that keeps everything in ordered maps.
///
/// Blocks are named by `&'static str` with `"air"` as the empty state (and as the state of every
/// position that was never written). Attached objects and entities are plain strings, container
/// slots hold an optional `(item, count)` pair.
///
/// Two `MemoryWorld`s compare equal when every tracked key holds the same value, which is what
/// the rollback tests of this crate rely on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryWorld {
    blocks: BTreeMap<BlockPos, &'static str>,
    attached: BTreeMap<BlockPos, String>,
    entities: BTreeMap<EntityId, String>,
    slots: BTreeMap<(ContainerId, usize), (&'static str, u32)>,
    open_containers: BTreeSet<ContainerId>,
}

impl MemoryWorld {
    pub const AIR: &'static str = "air";

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spawned entities currently in the world.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_container_open(&self, container: ContainerId) -> bool {
        self.open_containers.contains(&container)
    }
}

impl World for MemoryWorld {
    type Block = &'static str;
    type Attached = String;
    type Entity = String;
    type Item = Option<(&'static str, u32)>;

    fn is_empty_block(block: &Self::Block) -> bool {
        *block == Self::AIR
    }

    fn block(&self, pos: BlockPos) -> Self::Block {
        self.blocks.get(&pos).copied().unwrap_or(Self::AIR)
    }

    fn set_block(&mut self, pos: BlockPos, block: Self::Block) {
        // air is the implicit default, so don't keep it around; this keeps equality honest
        if block == Self::AIR {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, block);
        }
    }

    fn attached(&self, pos: BlockPos) -> Option<Self::Attached> {
        self.attached.get(&pos).cloned()
    }

    fn set_attached(&mut self, pos: BlockPos, attached: Option<Self::Attached>) {
        match attached {
            Some(attached) => {
                self.attached.insert(pos, attached);
            }
            None => {
                self.attached.remove(&pos);
            }
        }
    }

    fn entity(&self, id: EntityId) -> Option<&Self::Entity> {
        self.entities.get(&id)
    }

    fn add_entity(&mut self, id: EntityId, entity: Self::Entity) {
        self.entities.insert(id, entity);
    }

    fn remove_entity(&mut self, id: EntityId) -> Option<Self::Entity> {
        self.entities.remove(&id)
    }

    fn slot(&self, container: ContainerId, slot: usize) -> Self::Item {
        self.slots.get(&(container, slot)).copied()
    }

    fn set_slot(&mut self, container: ContainerId, slot: usize, item: Self::Item) {
        match item {
            Some(item) => {
                self.slots.insert((container, slot), item);
            }
            None => {
                self.slots.remove(&(container, slot));
            }
        }
    }

    fn set_container_open(&mut self, container: ContainerId, open: bool) {
        if open {
            self.open_containers.insert(container);
        } else {
            self.open_containers.remove(&container);
        }
    }
}
