// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{
    Arena, ChangeBlock, DeepIter, EffectId, Ledger, Node, ReverseDeepIter, SideEffect,
    Transaction, TreeDump, TxId,
};
use crate::{
    BlockPos, BlockSnapshotOf, Config, ContainerId, DriverState, EntityId, EntitySnapshot,
    PhaseContext, SlotChange, SpawnType, World,
};
use std::{
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    panic::Location,
    rc::Rc,
};

/// The log of every mutation applied during one outermost mutation.
///
/// Call sites log a transaction right before applying the mutation it describes. Mutations that
/// are known to trigger further mutations return an [`EffectScope`]; everything logged through the
/// scope (or while it is alive) becomes a side effect of the scoped transaction.
///
/// Once the outermost mutation has completed, [`TransactionLog::unwind`] turns the log into events,
/// rolls back what listeners cancelled, and leaves the log empty.
///
/// The log belongs to the simulation thread, like the [`CauseStack`](crate::CauseStack) it is
/// unwound with, and is neither `Send` nor `Sync`:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<ticktx::TransactionLog<ticktx::MemoryWorld>>();
/// ```
pub struct TransactionLog<W: World> {
    pub(crate) arena: Arena<W>,
    /// First and last transaction logged at the top level.
    pub(crate) head: Option<TxId>,
    pub(crate) tail: Option<TxId>,
    /// The side effect group new transactions are appended to, if any.
    pub(crate) open_effect: Option<EffectId>,
    pub(crate) ledger: Ledger<W>,
    pub(crate) state: DriverState,
    pub(crate) config: Config,
    _thread: PhantomData<Rc<()>>,
}

impl<W: World> Default for TransactionLog<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: World> fmt::Debug for TransactionLog<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLog")
            .field("len", &self.len())
            .field("state", &self.state)
            .field("open_effect", &self.open_effect)
            .finish()
    }
}

impl<W: World> TransactionLog<W> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            arena: Arena::new(),
            head: None,
            tail: None,
            open_effect: None,
            ledger: Ledger::new(),
            state: DriverState::Idle,
            config,
            _thread: PhantomData,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// Number of transactions recorded, not counting absorbed ones.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// The first transaction logged at the top level.
    pub fn head(&self) -> Option<TxId> {
        self.head
    }

    /// The most recent transaction logged at the top level.
    pub fn tail(&self) -> Option<TxId> {
        self.tail
    }

    /// # Panics
    ///
    /// If `id` was not issued by this log.
    pub fn node(&self, id: TxId) -> &Node<W> {
        self.arena.node(id)
    }

    pub fn get(&self, id: TxId) -> Option<&Node<W>> {
        self.arena.get(id)
    }

    pub fn side_effect(&self, id: EffectId) -> Option<&SideEffect> {
        self.arena.get_effect(id)
    }

    /// The side effect group new transactions are currently appended to.
    pub fn open_effect(&self) -> Option<EffectId> {
        self.open_effect
    }

    /// The transaction `id` is a side effect of, if any.
    pub fn parent_of(&self, id: TxId) -> Option<TxId> {
        self.arena.parent_of(id)
    }

    /// Every transaction, depth first, in recording order.
    pub fn deep_iter(&self) -> DeepIter<'_, W> {
        DeepIter::new(&self.arena, self.head, true)
    }

    /// Every transaction, depth first, in rollback order.
    pub fn reverse_deep_iter(&self) -> ReverseDeepIter<'_, W> {
        ReverseDeepIter::new(&self.arena, self.tail, true)
    }

    /// `id` and all of its side effects, in recording order.
    pub fn subtree(&self, id: TxId) -> DeepIter<'_, W> {
        DeepIter::new(&self.arena, Some(id), false)
    }

    /// The block changes recorded for `pos`, in order.
    pub fn touches(&self, pos: BlockPos) -> &[TxId] {
        self.ledger.touches(pos)
    }

    /// A printable snapshot of the whole tree.
    pub fn dump(&self) -> TreeDump {
        TreeDump::capture(&self.arena, self.head)
    }

    /// Logs a change of the position of `original` to `new_state`.
    ///
    /// `original` must be captured before the host applies the change. Attached object changes
    /// logged for the same position while the returned scope is alive are folded into this
    /// transaction.
    #[track_caller]
    pub fn log_block_change(
        &mut self,
        ctx: &dyn PhaseContext<W>,
        original: BlockSnapshotOf<W>,
        new_state: W::Block,
    ) -> EffectScope<'_, W> {
        let pos = original.pos;
        let next = self.arena.next_id();
        let change = self
            .ledger
            .put(&mut self.arena, next, &original, &new_state, |from, to| {
                ctx.classify_change(from, to)
            });
        let id = self.append(Node::new(
            Transaction::ChangeBlock(ChangeBlock::new(original, new_state, change)),
            Location::caller(),
        ));
        debug_assert_eq!(id, next);
        tracing::trace!(tx = %id, %pos, "logged block change");
        self.open_scope(id, "block change")
    }

    /// Logs that `source` notifies its neighbor `target` of its new `state`.
    #[track_caller]
    pub fn log_notification(
        &mut self,
        source: BlockPos,
        target: BlockPos,
        state: W::Block,
    ) -> EffectScope<'_, W> {
        let id = self.append(Node::new(
            Transaction::Notification {
                source,
                target,
                source_state: state,
            },
            Location::caller(),
        ));
        self.open_scope(id, "neighbor notification")
    }

    /// Logs that `added` is attached to `pos`.
    ///
    /// Returns `None` if the change was folded into a block change of the same position.
    #[track_caller]
    pub fn log_attached_add(&mut self, pos: BlockPos, added: W::Attached) -> Option<TxId> {
        self.record(Node::new(
            Transaction::AttachObjectAdd { pos, added },
            Location::caller(),
        ))
    }

    /// Logs that `removed` is detached from `pos`.
    ///
    /// Returns `None` if the change was folded into a block change of the same position.
    #[track_caller]
    pub fn log_attached_remove(&mut self, pos: BlockPos, removed: W::Attached) -> Option<TxId> {
        self.record(Node::new(
            Transaction::AttachObjectRemove { pos, removed },
            Location::caller(),
        ))
    }

    /// Logs that the object attached to `pos` is replaced.
    ///
    /// Returns `None` if the change was folded into a block change of the same position.
    #[track_caller]
    pub fn log_attached_replace(
        &mut self,
        pos: BlockPos,
        removed: W::Attached,
        added: W::Attached,
    ) -> Option<TxId> {
        self.record(Node::new(
            Transaction::AttachObjectReplace {
                pos,
                removed,
                added,
            },
            Location::caller(),
        ))
    }

    /// Logs that `entity` is about to spawn.
    ///
    /// The host must not add the entity itself: spawning is deferred until the log is unwound,
    /// and only happens if no listener cancelled it. Returns `None` if the spawn was folded into
    /// a [`TransactionLog::log_drops`] scope.
    #[track_caller]
    pub fn log_spawn(
        &mut self,
        entity: EntitySnapshot<W::Entity>,
        spawn_type: SpawnType,
    ) -> Option<TxId> {
        self.record(Node::new(
            Transaction::SpawnObject { entity, spawn_type },
            Location::caller(),
        ))
    }

    /// Logs that `entity` is destroyed and leaves objects behind.
    ///
    /// Every spawn logged while the returned scope is alive becomes one of the drops.
    #[track_caller]
    pub fn log_drops(&mut self, entity: EntityId) -> EffectScope<'_, W> {
        let id = self.append(Node::new(
            Transaction::DestroyDrops {
                entity,
                drops: Vec::new(),
            },
            Location::caller(),
        ));
        self.open_scope(id, "drops")
    }

    /// Logs a click in `container` and the slot changes it causes.
    #[track_caller]
    pub fn log_container_click(
        &mut self,
        container: ContainerId,
        changes: Vec<SlotChange<W::Item>>,
    ) -> TxId {
        self.append(Node::new(
            Transaction::ContainerClick { container, changes },
            Location::caller(),
        ))
    }

    #[track_caller]
    pub fn log_container_close(&mut self, container: ContainerId) -> TxId {
        self.append(Node::new(
            Transaction::ContainerClose { container },
            Location::caller(),
        ))
    }

    /// Records `node` unless an earlier transaction absorbs it.
    fn record(&mut self, node: Node<W>) -> Option<TxId> {
        // absorption is always attempted before anything is appended
        if self.arena.try_absorb(&node.transaction, self.tail) {
            return None;
        }
        Some(self.append(node))
    }

    /// Appends `node` to the open side effect group, or to the top level if none is open.
    fn append(&mut self, node: Node<W>) -> TxId {
        let ty = node.transaction.transaction_type();
        let id = self.arena.push_node(node);
        match self.open_effect {
            Some(effect) => self.arena.link_child(effect, id),
            None => {
                self.arena.node_mut(id).previous = self.tail;
                match self.tail {
                    Some(tail) => self.arena.node_mut(tail).next = Some(id),
                    None => self.head = Some(id),
                }
                self.tail = Some(id);
            }
        }
        if self.state == DriverState::Idle {
            self.enter(DriverState::Recording);
        }
        tracing::trace!(tx = %id, ?ty, parent = ?self.open_effect, "appended");
        id
    }

    fn open_scope(&mut self, owner: TxId, label: &'static str) -> EffectScope<'_, W> {
        let effect = self.arena.open_effect(owner, label);
        let previous = self.open_effect.replace(effect);
        EffectScope {
            log: self,
            owner,
            effect,
            previous,
            materializes: true,
        }
    }

    pub(crate) fn enter(&mut self, state: DriverState) {
        tracing::trace!(from = ?self.state, to = ?state, "transaction log state");
        self.state = state;
    }

    /// Drops every recorded transaction and returns to [`DriverState::Idle`].
    pub(crate) fn reset(&mut self) {
        self.arena.clear();
        self.ledger.clear();
        self.head = None;
        self.tail = None;
        self.open_effect = None;
        self.enter(DriverState::Idle);
    }
}

/// Keeps the side effect group of a transaction open.
///
/// While the scope is alive, everything logged into the [`TransactionLog`] is a side effect of
/// [`EffectScope::transaction`]. The scope dereferences to the log, so nested mutations can log
/// through it directly. Dropping the scope closes the group, prunes it if it stayed empty, and
/// materializes the scoped transaction.
///
/// A transaction can collect its side effects in several groups, one per processing stage, with
/// [`EffectScope::push_effect`].
pub struct EffectScope<'a, W: World> {
    log: &'a mut TransactionLog<W>,
    owner: TxId,
    effect: EffectId,
    previous: Option<EffectId>,
    /// Unset for the extra groups of [`EffectScope::push_effect`].
    materializes: bool,
}

impl<W: World> EffectScope<'_, W> {
    /// The transaction this scope collects side effects for.
    pub fn transaction(&self) -> TxId {
        self.owner
    }

    pub fn effect(&self) -> EffectId {
        self.effect
    }

    /// Opens another side effect group on the scoped transaction.
    ///
    /// Everything logged through the returned scope goes into the new group, which is walked
    /// after the groups opened before it. Dropping the returned scope makes this scope's group
    /// the open one again.
    ///
    /// ```
    /// use ticktx::{BlockPos, BlockSnapshot, MemoryWorld, Phase, TransactionLog, World};
    ///
    /// let mut world = MemoryWorld::new();
    /// let mut log = TransactionLog::<MemoryWorld>::new();
    /// let pos = BlockPos::ORIGIN;
    ///
    /// let original = BlockSnapshot::capture(&world, pos);
    /// let mut change = log.log_block_change(&Phase::new("tick"), original, "air");
    /// world.set_block(pos, "air");
    /// change.log_notification(pos, pos.offset(0, 1, 0), "air");
    /// {
    ///     let mut removal = change.push_effect("block entity removal");
    ///     removal.log_attached_remove(pos.offset(0, 1, 0), "sign{}".to_string());
    /// }
    /// let owner = change.transaction();
    /// drop(change);
    /// assert_eq!(log.node(owner).side_effects().len(), 2);
    /// ```
    pub fn push_effect(&mut self, label: &'static str) -> EffectScope<'_, W> {
        let mut scope = self.log.open_scope(self.owner, label);
        scope.materializes = false;
        scope
    }
}

impl<W: World> Deref for EffectScope<'_, W> {
    type Target = TransactionLog<W>;

    fn deref(&self) -> &Self::Target {
        self.log
    }
}

impl<W: World> DerefMut for EffectScope<'_, W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.log
    }
}

impl<W: World> Drop for EffectScope<'_, W> {
    fn drop(&mut self) {
        if self.log.open_effect != Some(self.effect) {
            tracing::warn!(
                effect = %self.effect,
                open = ?self.log.open_effect,
                "side effect scope closed while another one was open"
            );
        }
        self.log.open_effect = self.previous;
        self.log.arena.prune_if_empty(self.effect);
        if self.materializes {
            self.log.arena.node_mut(self.owner).materialize();
        }
    }
}
