// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::Node;
use crate::{
    BlockPos, BlockSnapshotOf, CauseEntry, CauseStack, ContainerId, EntityId, EntitySnapshot,
    EventKind, SlotChange, SpawnType, World, keys,
};
use std::fmt;

/// Offers a freshly logged transaction to an already recorded node.
///
/// Returns true if the node took the transaction over, in which case the transaction is not
/// recorded on its own.
pub type AbsorbingStep<W> = fn(&Transaction<W>, &mut Node<W>) -> bool;

/// Pushes what a transaction contributes to the cause of its side effects.
pub type FrameMutator = Box<dyn FnOnce(&mut CauseStack)>;

/// The kind of a block change, as reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum BlockChange {
    Break,
    Place,
    Modify,
    Decay,
    Grow,
}

impl BlockChange {
    /// The default classification: from nothing to something is a placement, the reverse a
    /// break, anything else a modification.
    pub fn classify(was_empty: bool, is_empty: bool) -> Self {
        match (was_empty, is_empty) {
            (true, false) => BlockChange::Place,
            (false, true) => BlockChange::Break,
            _ => BlockChange::Modify,
        }
    }
}

#[cfg(feature = "arbitrary")]
impl quickcheck::Arbitrary for BlockChange {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        *g.choose(&[
            BlockChange::Break,
            BlockChange::Place,
            BlockChange::Modify,
            BlockChange::Decay,
            BlockChange::Grow,
        ])
        .expect("choose non empty slice")
    }
}

/// What happens to the object attached to a position over the course of a block change.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachedChange<A> {
    /// Whatever was attached stays attached.
    Unchanged,
    Removed,
    /// A new object is attached, replacing any previous one.
    Added(A),
}

/// A change to a single world cell.
///
/// Created with only the intent of the change. The final state, including what ends up attached
/// to the cell, is computed when the node is materialized; until then, attached object changes
/// at the same position are absorbed into it.
pub struct ChangeBlock<W: World> {
    pub(crate) original: BlockSnapshotOf<W>,
    pub(crate) new_state: W::Block,
    pub(crate) attached: AttachedChange<W::Attached>,
    pub(crate) result: BlockSnapshotOf<W>,
    /// Kind of the change relative to the first recorded state of the position.
    pub(crate) change: BlockChange,
}

impl<W: World> ChangeBlock<W> {
    pub(crate) fn new(
        original: BlockSnapshotOf<W>,
        new_state: W::Block,
        change: BlockChange,
    ) -> Self {
        let result = BlockSnapshotOf::<W>::new(
            original.pos,
            new_state.clone(),
            original.attached.clone(),
        );
        Self {
            original,
            new_state,
            attached: AttachedChange::Unchanged,
            result,
            change,
        }
    }

    pub fn pos(&self) -> BlockPos {
        self.original.pos
    }

    pub fn original(&self) -> &BlockSnapshotOf<W> {
        &self.original
    }

    pub fn new_state(&self) -> &W::Block {
        &self.new_state
    }

    pub fn attached(&self) -> &AttachedChange<W::Attached> {
        &self.attached
    }

    /// The state of the position after the change.
    ///
    /// Only final once the owning node is recorded.
    pub fn result(&self) -> &BlockSnapshotOf<W> {
        &self.result
    }

    pub fn change(&self) -> BlockChange {
        self.change
    }

    fn materialize(&mut self) {
        let attached = match &self.attached {
            AttachedChange::Unchanged => self.original.attached.clone(),
            AttachedChange::Removed => None,
            AttachedChange::Added(attached) => Some(attached.clone()),
        };
        self.result =
            BlockSnapshotOf::<W>::new(self.original.pos, self.new_state.clone(), attached);
    }
}

/// An object spawned as part of a [`Transaction::DestroyDrops`].
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedObject<E> {
    pub(crate) snapshot: EntitySnapshot<E>,
    pub(crate) rejected: bool,
}

impl<E> DroppedObject<E> {
    pub fn snapshot(&self) -> &EntitySnapshot<E> {
        &self.snapshot
    }

    /// Whether a listener refused to let this object spawn.
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }
}

/// What a transaction mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Block(BlockPos),
    Entity(EntityId),
    Container(ContainerId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Block(pos) => pos.fmt(f),
            Target::Entity(id) => id.fmt(f),
            Target::Container(id) => id.fmt(f),
        }
    }
}

/// Whether a transaction mutates the world on its own account, or follows from another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub enum TransactionType {
    /// Block-like: a mutation the host applies directly.
    Primary,
    /// Derived from applying another mutation, like a notification or a spawn.
    Secondary,
}

/// A single recorded intent to mutate the world.
///
/// Every variant carries what is needed to describe it to listeners and to undo it, and nothing
/// that would have to be read back from the (possibly further mutated) world later on.
pub enum Transaction<W: World> {
    ChangeBlock(ChangeBlock<W>),
    AttachObjectAdd {
        pos: BlockPos,
        added: W::Attached,
    },
    AttachObjectRemove {
        pos: BlockPos,
        removed: W::Attached,
    },
    AttachObjectReplace {
        pos: BlockPos,
        removed: W::Attached,
        added: W::Attached,
    },
    /// A position telling a neighbor that it changed.
    Notification {
        source: BlockPos,
        target: BlockPos,
        source_state: W::Block,
    },
    /// An object about to enter the world. Deferred: the object is only added to the world once
    /// the log is unwound and the spawn survived its event.
    SpawnObject {
        entity: EntitySnapshot<W::Entity>,
        spawn_type: SpawnType,
    },
    /// The objects an entity leaves behind when it is destroyed. Deferred like
    /// [`Transaction::SpawnObject`], and always posted in an event of its own.
    DestroyDrops {
        entity: EntityId,
        drops: Vec<DroppedObject<W::Entity>>,
    },
    ContainerClick {
        container: ContainerId,
        changes: Vec<SlotChange<W::Item>>,
    },
    ContainerClose {
        container: ContainerId,
    },
}

impl<W: World> Transaction<W> {
    pub fn name(&self) -> &'static str {
        match self {
            Transaction::ChangeBlock(_) => "ChangeBlock",
            Transaction::AttachObjectAdd { .. } => "AttachObjectAdd",
            Transaction::AttachObjectRemove { .. } => "AttachObjectRemove",
            Transaction::AttachObjectReplace { .. } => "AttachObjectReplace",
            Transaction::Notification { .. } => "Notification",
            Transaction::SpawnObject { .. } => "SpawnObject",
            Transaction::DestroyDrops { .. } => "DestroyDrops",
            Transaction::ContainerClick { .. } => "ContainerClick",
            Transaction::ContainerClose { .. } => "ContainerClose",
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Transaction::ChangeBlock(change) => Target::Block(change.pos()),
            Transaction::AttachObjectAdd { pos, .. }
            | Transaction::AttachObjectRemove { pos, .. }
            | Transaction::AttachObjectReplace { pos, .. } => Target::Block(*pos),
            Transaction::Notification { target, .. } => Target::Block(*target),
            Transaction::SpawnObject { entity, .. } => Target::Entity(entity.id),
            Transaction::DestroyDrops { entity, .. } => Target::Entity(*entity),
            Transaction::ContainerClick { container, .. }
            | Transaction::ContainerClose { container } => Target::Container(*container),
        }
    }

    /// The family of event this transaction is reported in. Adjacent transactions can only share
    /// an event if their kinds are equal.
    pub fn event_kind(&self) -> EventKind {
        match self {
            Transaction::ChangeBlock(change) => EventKind::ChangeBlock(change.change),
            Transaction::AttachObjectAdd { .. }
            | Transaction::AttachObjectRemove { .. }
            | Transaction::AttachObjectReplace { .. } => EventKind::AttachedObject,
            Transaction::Notification { .. } => EventKind::Notify,
            Transaction::SpawnObject { .. } => EventKind::SpawnObject,
            Transaction::DestroyDrops { .. } => EventKind::DropItems,
            Transaction::ContainerClick { container, .. } => EventKind::ContainerClick(*container),
            Transaction::ContainerClose { .. } => EventKind::ContainerClose,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Transaction::ChangeBlock(_)
            | Transaction::ContainerClick { .. }
            | Transaction::ContainerClose { .. } => TransactionType::Primary,
            Transaction::AttachObjectAdd { .. }
            | Transaction::AttachObjectRemove { .. }
            | Transaction::AttachObjectReplace { .. }
            | Transaction::Notification { .. }
            | Transaction::SpawnObject { .. }
            | Transaction::DestroyDrops { .. } => TransactionType::Secondary,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.transaction_type() == TransactionType::Primary
    }

    /// Unbatchable transactions always get an event of their own.
    pub fn is_unbatchable(&self) -> bool {
        matches!(self, Transaction::DestroyDrops { .. })
    }

    /// Whether `next`, recorded right after this transaction in the same chain, can be reported
    /// in the same event.
    pub fn can_batch_with(&self, next: &Transaction<W>) -> bool {
        !self.is_unbatchable() && !next.is_unbatchable() && self.event_kind() == next.event_kind()
    }

    /// Whether this transaction must be cancelled together with the transaction recorded right
    /// before it in the same chain.
    pub fn requires_cancellation_if_chained(&self) -> bool {
        matches!(
            self,
            Transaction::AttachObjectAdd { .. }
                | Transaction::AttachObjectRemove { .. }
                | Transaction::AttachObjectReplace { .. }
                | Transaction::Notification { .. }
        )
    }

    /// Deferred transactions are not applied by the host when logged; the tracker applies them
    /// once their event has been resolved.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            Transaction::SpawnObject { .. } | Transaction::DestroyDrops { .. }
        )
    }

    pub fn as_change_block(&self) -> Option<&ChangeBlock<W>> {
        match self {
            Transaction::ChangeBlock(change) => Some(change),
            _ => None,
        }
    }

    /// How transactions of this kind are merged into an earlier, still open transaction.
    pub fn parent_absorber(&self) -> Option<AbsorbingStep<W>> {
        match self {
            Transaction::AttachObjectAdd { .. }
            | Transaction::AttachObjectRemove { .. }
            | Transaction::AttachObjectReplace { .. } => Some(absorb_attached::<W>),
            Transaction::SpawnObject { .. } => Some(absorb_spawn::<W>),
            _ => None,
        }
    }

    /// The causes and context this transaction adds for the events of its side effects, given
    /// the transaction it is itself a side effect of.
    pub fn frame_mutator(&self, parent: Option<&Transaction<W>>) -> Option<FrameMutator> {
        match self {
            Transaction::ChangeBlock(change) => {
                let pos = change.pos();
                Some(Box::new(move |causes: &mut CauseStack| {
                    causes.push_cause(CauseEntry::Block(pos));
                    causes.add_context(&keys::BLOCK_TARGET, pos);
                }))
            }
            Transaction::Notification { source, .. } => {
                let source = *source;
                let change = parent
                    .and_then(Transaction::as_change_block)
                    .map(ChangeBlock::change);
                Some(Box::new(move |causes: &mut CauseStack| {
                    causes.push_cause(CauseEntry::Block(source));
                    causes.add_context(&keys::NOTIFY_SOURCE, source);
                    if let Some(change) = change {
                        causes.add_context(&keys::CHANGE_KIND, change);
                    }
                }))
            }
            Transaction::SpawnObject { entity, .. } => {
                let id = entity.id;
                Some(Box::new(move |causes: &mut CauseStack| {
                    causes.push_cause(CauseEntry::Entity(id));
                }))
            }
            Transaction::DestroyDrops { entity, .. } => {
                let id = *entity;
                Some(Box::new(move |causes: &mut CauseStack| {
                    causes.push_cause(CauseEntry::Entity(id));
                    causes.add_context(&keys::SPAWN_TYPE, SpawnType::Drops);
                }))
            }
            Transaction::ContainerClick { container, .. }
            | Transaction::ContainerClose { container } => {
                let id = *container;
                Some(Box::new(move |causes: &mut CauseStack| {
                    causes.push_cause(CauseEntry::Container(id));
                }))
            }
            Transaction::AttachObjectAdd { .. }
            | Transaction::AttachObjectRemove { .. }
            | Transaction::AttachObjectReplace { .. } => None,
        }
    }

    pub(crate) fn materialize(&mut self) {
        if let Transaction::ChangeBlock(change) = self {
            change.materialize();
        }
    }

    /// Undoes the transaction using only the state captured when it was logged.
    ///
    /// For deferred transactions this removes whatever a commit may have added.
    pub fn restore(&self, world: &mut W) {
        match self {
            Transaction::ChangeBlock(change) => change.original.restore(world),
            Transaction::AttachObjectAdd { pos, .. } => world.set_attached(*pos, None),
            Transaction::AttachObjectRemove { pos, removed }
            | Transaction::AttachObjectReplace { pos, removed, .. } => {
                world.set_attached(*pos, Some(removed.clone()))
            }
            Transaction::Notification { .. } => {}
            Transaction::SpawnObject { entity, .. } => {
                world.remove_entity(entity.id);
            }
            Transaction::DestroyDrops { drops, .. } => {
                for dropped in drops.iter().rev() {
                    world.remove_entity(dropped.snapshot.id);
                }
            }
            Transaction::ContainerClick { container, changes } => {
                for change in changes.iter().rev() {
                    world.set_slot(*container, change.slot, change.original.clone());
                }
            }
            Transaction::ContainerClose { container } => {
                world.set_container_open(*container, true)
            }
        }
    }

    /// Applies the deferred part of the transaction. Returns the number of objects added.
    pub fn commit(&self, world: &mut W) -> usize {
        match self {
            Transaction::SpawnObject { entity, .. } => {
                world.add_entity(entity.id, entity.entity.clone());
                1
            }
            Transaction::DestroyDrops { drops, .. } => {
                let mut added = 0;
                for dropped in drops.iter().filter(|dropped| !dropped.rejected) {
                    world.add_entity(dropped.snapshot.id, dropped.snapshot.entity.clone());
                    added += 1;
                }
                added
            }
            _ => 0,
        }
    }
}

fn absorb_attached<W: World>(child: &Transaction<W>, candidate: &mut Node<W>) -> bool {
    if candidate.recorded {
        return false;
    }
    let Transaction::ChangeBlock(change) = &mut candidate.transaction else {
        return false;
    };
    let (pos, removed, added) = match child {
        Transaction::AttachObjectAdd { pos, added } => (*pos, None, Some(added)),
        Transaction::AttachObjectRemove { pos, removed } => (*pos, Some(removed), None),
        Transaction::AttachObjectReplace {
            pos,
            removed,
            added,
        } => (*pos, Some(removed), Some(added)),
        _ => return false,
    };
    if change.pos() != pos {
        return false;
    }
    // the block change was logged before the host read the attached object
    if let Some(removed) = removed {
        if change.original.attached.is_none() {
            change.original.attached = Some(removed.clone());
        }
    }
    change.attached = match added {
        Some(added) => AttachedChange::Added(added.clone()),
        None => AttachedChange::Removed,
    };
    true
}

fn absorb_spawn<W: World>(child: &Transaction<W>, candidate: &mut Node<W>) -> bool {
    if candidate.recorded {
        return false;
    }
    let (Transaction::SpawnObject { entity, .. }, Transaction::DestroyDrops { drops, .. }) =
        (child, &mut candidate.transaction)
    else {
        return false;
    };
    drops.push(DroppedObject {
        snapshot: entity.clone(),
        rejected: false,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockSnapshot, MemoryWorld, World};
    use std::panic::Location;

    fn change(pos: BlockPos, from: &'static str, to: &'static str) -> Transaction<MemoryWorld> {
        let original = BlockSnapshot::new(pos, from, None);
        Transaction::ChangeBlock(ChangeBlock::new(
            original,
            to,
            BlockChange::classify(from == "air", to == "air"),
        ))
    }

    fn node(transaction: Transaction<MemoryWorld>) -> Node<MemoryWorld> {
        Node::new(transaction, Location::caller())
    }

    #[test]
    fn classify() {
        assert_eq!(BlockChange::classify(true, false), BlockChange::Place);
        assert_eq!(BlockChange::classify(false, true), BlockChange::Break);
        assert_eq!(BlockChange::classify(false, false), BlockChange::Modify);
        assert_eq!(BlockChange::classify(true, true), BlockChange::Modify);
    }

    #[test]
    fn block_like_transactions_are_primary() {
        let pos = BlockPos::ORIGIN;
        assert!(change(pos, "air", "stone").is_primary());
        let close = Transaction::<MemoryWorld>::ContainerClose {
            container: ContainerId(1),
        };
        assert_eq!(close.transaction_type(), TransactionType::Primary);
        let notification = Transaction::<MemoryWorld>::Notification {
            source: pos,
            target: pos.offset(1, 0, 0),
            source_state: "stone",
        };
        assert_eq!(notification.transaction_type(), TransactionType::Secondary);
        let removal = Transaction::<MemoryWorld>::AttachObjectRemove {
            pos,
            removed: "chest{}".to_string(),
        };
        assert!(!removal.is_primary());
    }

    #[test]
    fn attached_removal_is_absorbed_into_open_change_at_same_pos() {
        let pos = BlockPos::new(1, 1, 1);
        let mut chest = node(change(pos, "chest", "air"));
        let removal = Transaction::AttachObjectRemove {
            pos,
            removed: "chest{items: 3}".to_string(),
        };
        let absorb = removal.parent_absorber().unwrap();

        assert!(absorb(&removal, &mut chest));
        chest.materialize();

        let change = chest.transaction().as_change_block().unwrap();
        assert_eq!(change.original().attached.as_deref(), Some("chest{items: 3}"));
        assert_eq!(change.result().attached, None);
        assert_eq!(change.result().state, "air");
    }

    #[test]
    fn attached_changes_are_not_absorbed_elsewhere() {
        let pos = BlockPos::new(1, 1, 1);
        let addition = Transaction::<MemoryWorld>::AttachObjectAdd {
            pos,
            added: "furnace{}".to_string(),
        };
        let absorb = addition.parent_absorber().unwrap();

        let mut elsewhere = node(change(pos.offset(0, 1, 0), "air", "furnace"));
        assert!(!absorb(&addition, &mut elsewhere));

        let mut recorded = node(change(pos, "air", "furnace"));
        recorded.materialize();
        assert!(!absorb(&addition, &mut recorded));

        let mut notification = node(Transaction::Notification {
            source: pos,
            target: pos,
            source_state: "air",
        });
        assert!(!absorb(&addition, &mut notification));
    }

    #[test]
    fn spawns_are_absorbed_into_open_drops() {
        let mut drops = node(Transaction::DestroyDrops {
            entity: EntityId(1),
            drops: Vec::new(),
        });
        let spawn = Transaction::SpawnObject {
            entity: EntitySnapshot::new(EntityId(2), "item{apple}".to_string()),
            spawn_type: SpawnType::Drops,
        };
        let absorb = spawn.parent_absorber().unwrap();
        assert!(absorb(&spawn, &mut drops));
        assert!(absorb(&spawn, &mut drops));

        let Transaction::DestroyDrops { drops: dropped, .. } = drops.transaction() else {
            unreachable!()
        };
        assert_eq!(dropped.len(), 2);
    }

    #[test]
    fn batching_rules() {
        let a = change(BlockPos::ORIGIN, "air", "stone");
        let b = change(BlockPos::new(1, 0, 0), "air", "dirt");
        let broken = change(BlockPos::new(2, 0, 0), "stone", "air");
        let notification = Transaction::<MemoryWorld>::Notification {
            source: BlockPos::ORIGIN,
            target: BlockPos::new(0, 1, 0),
            source_state: "stone",
        };
        let drops = Transaction::<MemoryWorld>::DestroyDrops {
            entity: EntityId(1),
            drops: Vec::new(),
        };

        assert!(a.can_batch_with(&b));
        assert!(!a.can_batch_with(&broken));
        assert!(!b.can_batch_with(&notification));
        assert!(!drops.can_batch_with(&drops));
        assert!(notification.requires_cancellation_if_chained());
        assert!(!a.requires_cancellation_if_chained());
    }

    #[test]
    fn restore_uses_captured_state_only() {
        let mut world = MemoryWorld::new();
        let container = ContainerId(3);
        world.set_slot(container, 0, Some(("apple", 2)));
        let click = Transaction::<MemoryWorld>::ContainerClick {
            container,
            changes: vec![
                SlotChange::new(0, Some(("apple", 2)), None),
                SlotChange::new(1, None, Some(("apple", 2))),
                // a second change to the same slot within one click
                SlotChange::new(0, None, Some(("stick", 1))),
            ],
        };
        world.set_slot(container, 0, Some(("stick", 1)));
        world.set_slot(container, 1, Some(("apple", 2)));

        click.restore(&mut world);
        assert_eq!(world.slot(container, 0), Some(("apple", 2)));
        assert_eq!(world.slot(container, 1), None);
    }

    #[test]
    fn frame_mutators_compose_causes() {
        let pos = BlockPos::new(4, 0, 4);
        let parent = change(pos, "stone", "air");
        let notification = Transaction::<MemoryWorld>::Notification {
            source: pos,
            target: pos.offset(1, 0, 0),
            source_state: "air",
        };

        let mut causes = CauseStack::new();
        parent.frame_mutator(None).unwrap()(&mut causes);
        notification.frame_mutator(Some(&parent)).unwrap()(&mut causes);

        let cause = causes.current_cause();
        assert_eq!(cause.entries().len(), 2);
        assert_eq!(cause.context(&keys::BLOCK_TARGET), Some(&pos));
        assert_eq!(cause.context(&keys::NOTIFY_SOURCE), Some(&pos));
        assert_eq!(cause.context(&keys::CHANGE_KIND), Some(&BlockChange::Break));
    }
}
