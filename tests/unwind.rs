// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! End-to-end tests of recording a tick and unwinding it against listeners.

use ticktx::{
    BlockChange, BlockPos, BlockSnapshot, CauseEntry, CauseStack, Config, ContainerId,
    DriverState, EntityId, EntitySnapshot, EntryPayload, Event, EventKind, Listener,
    ListenerError, MemoryWorld, Phase, RecordingListener, SpawnType, TransactionLog, World,
    block_pos, keys, memory_world,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Logs and applies a block change the way a host mutation site would.
fn set_block(
    log: &mut TransactionLog<MemoryWorld>,
    world: &mut MemoryWorld,
    phase: &Phase,
    pos: BlockPos,
    block: &'static str,
) {
    let original = BlockSnapshot::capture(&*world, pos);
    let _scope = log.log_block_change(phase, original, block);
    world.set_block(pos, block);
}

#[test]
fn cancelled_spawn_keeps_the_block_change() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let phase = Phase::new("placement").with_source(CauseEntry::Player(1));
    let mut log = TransactionLog::new();
    let pos = BlockPos::ORIGIN;

    {
        let mut scope = log.log_block_change(&phase, BlockSnapshot::capture(&world, pos), "stone");
        world.set_block(pos, "stone");
        scope.log_spawn(
            EntitySnapshot::new(EntityId(42), "falling_stone".to_string()),
            SpawnType::Natural,
        );
    }

    let mut kinds = Vec::new();
    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        kinds.push(event.kind());
        if event.kind() == EventKind::SpawnObject {
            event.set_cancelled(true);
        }
        Ok(())
    };
    let report = log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);

    assert_eq!(
        kinds,
        [EventKind::ChangeBlock(BlockChange::Place), EventKind::SpawnObject]
    );
    assert_eq!(world.block(pos), "stone");
    assert_eq!(world.entity(EntityId(42)), None);
    assert_eq!(report.batches, 2);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.restored, 1);
    assert_eq!(report.committed, 0);
}

#[test]
fn accepted_spawns_are_committed_after_the_unwind() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let mut log = TransactionLog::new();
    log.log_spawn(
        EntitySnapshot::new(EntityId(1), "pig".to_string()),
        SpawnType::Natural,
    );
    // deferred until the unwind
    assert_eq!(world.entity_count(), 0);

    let report = log.unwind(
        &Phase::new("spawning"),
        &mut CauseStack::new(),
        &mut world,
        &mut RecordingListener::new(),
    );
    assert_eq!(report.committed, 1);
    assert_eq!(world.entity(EntityId(1)).map(String::as_str), Some("pig"));
}

#[test]
fn cancelling_a_change_undoes_its_whole_subtree() {
    init_tracing();
    let mut world = memory_world! {
        (0, 0, 0) => "tnt",
        (1, 0, 0) => "stone",
        (2, 0, 0) => "stone"
    };
    let pristine = world.clone();
    let phase = Phase::new("explosion");
    let mut log = TransactionLog::new();

    {
        let origin = block_pos!(0, 0, 0);
        let mut scope = log.log_block_change(&phase, BlockSnapshot::capture(&world, origin), "air");
        world.set_block(origin, "air");
        for x in 1..3 {
            let pos = block_pos!(x, 0, 0);
            let mut notification = scope.log_notification(origin, pos, "air");
            let original = BlockSnapshot::capture(&world, pos);
            let _broken = notification.log_block_change(&phase, original, "air");
            world.set_block(pos, "air");
        }
    }
    // a block update chained to the explosion, recorded at the top level
    drop(log.log_notification(block_pos!(0, 0, 0), block_pos!(0, 1, 0), "air"));
    // an unrelated change that must survive
    set_block(&mut log, &mut world, &phase, block_pos!(9, 0, 0), "dirt");

    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        let explosion = event.entries().iter().any(|entry| {
            entry.pos() == Some(block_pos!(0, 0, 0))
                && matches!(entry.payload(), EntryPayload::Block(_))
        });
        if explosion {
            event.set_cancelled(true);
        }
        Ok(())
    };
    let report = log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);

    // the explosion, two notifications, two broken blocks, the chained notification
    assert_eq!(report.cancelled, 6);
    assert_eq!(report.restored, 6);
    assert_eq!(world.block(block_pos!(9, 0, 0)), "dirt");
    world.set_block(block_pos!(9, 0, 0), "air");
    assert_eq!(world, pristine);
}

#[test]
fn both_side_effect_chains_go_down_with_their_parent() {
    init_tracing();
    let mut world = memory_world! {
        (0, 0, 0) => "chest",
        (0, 1, 0) => "torch"
    };
    world.set_attached(BlockPos::ORIGIN, Some("chest{}".to_string()));
    let pristine = world.clone();
    let phase = Phase::new("explosion");
    let mut log = TransactionLog::new();

    {
        let original = BlockSnapshot::capture(&world, BlockPos::ORIGIN);
        let mut change = log.log_block_change(&phase, original, "air");
        world.set_block(BlockPos::ORIGIN, "air");
        drop(change.log_notification(BlockPos::ORIGIN, block_pos!(0, 1, 0), "air"));
        set_block(&mut change, &mut world, &phase, block_pos!(0, 1, 0), "air");
        {
            let mut removal = change.push_effect("block entity removal");
            // the chest contents spill next to it
            set_block(&mut removal, &mut world, &phase, block_pos!(1, 0, 0), "item_frame");
            removal.log_spawn(
                EntitySnapshot::new(EntityId(7), "chest_minecart".to_string()),
                SpawnType::Drops,
            );
        }
        // the block entity goes last, into the change itself
        assert_eq!(change.log_attached_remove(BlockPos::ORIGIN, "chest{}".to_string()), None);
        world.set_attached(BlockPos::ORIGIN, None);
    }
    assert_eq!(log.len(), 5);

    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        let breaks_chest = event.entries().iter().any(|entry| {
            matches!(entry.payload(), EntryPayload::Block(block) if block.original.state == "chest")
        });
        event.set_cancelled(breaks_chest);
        Ok(())
    };
    let report = log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);

    assert_eq!(report.cancelled, 5);
    assert_eq!(report.restored, 5);
    assert_eq!(report.committed, 0);
    assert_eq!(world, pristine);
}

#[test]
fn repeated_touches_collapse_into_one_entry() {
    init_tracing();
    let mut world = memory_world! { (0, 0, 0) => "grass" };
    let phase = Phase::new("farming");
    let mut log = TransactionLog::new();
    let pos = BlockPos::ORIGIN;
    for block in ["dirt", "farmland", "sand"] {
        set_block(&mut log, &mut world, &phase, pos, block);
    }

    let mut seen = Vec::new();
    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        for entry in event.entries() {
            let EntryPayload::Block(transaction) = entry.payload() else {
                panic!("expected a block entry");
            };
            seen.push((
                event.kind(),
                transaction.original.state,
                transaction.result.state,
                transaction
                    .intermediary
                    .iter()
                    .map(|snapshot| snapshot.state)
                    .collect::<Vec<_>>(),
                entry.members().len(),
            ));
        }
        Ok(())
    };
    log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);

    assert_eq!(
        seen,
        [(
            EventKind::ChangeBlock(BlockChange::Modify),
            "grass",
            "sand",
            vec!["farmland"],
            3
        )]
    );
}

#[test]
fn invalidating_a_collapsed_entry_restores_the_first_original() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let pristine = world.clone();
    let phase = Phase::new("building");
    let mut log = TransactionLog::new();
    for block in ["stone", "cobblestone"] {
        set_block(&mut log, &mut world, &phase, BlockPos::ORIGIN, block);
    }
    set_block(&mut log, &mut world, &phase, block_pos!(1, 0, 0), "stone");

    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        event.invalidate_where(|entry| entry.pos() == Some(BlockPos::ORIGIN));
        Ok(())
    };
    let report = log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);

    assert_eq!(report.cancelled, 2);
    assert_eq!(world.block(BlockPos::ORIGIN), "air");
    assert_eq!(world.block(block_pos!(1, 0, 0)), "stone");
    world.set_block(block_pos!(1, 0, 0), "air");
    assert_eq!(world, pristine);
}

#[test]
fn absorbed_attached_changes_do_not_add_events() {
    init_tracing();
    let phase = Phase::new("interaction");
    let pos = block_pos!(3, 3, 3);

    let run = |split: bool| {
        let mut world = memory_world! { (3, 3, 3) => "chest" };
        world.set_attached(pos, Some("chest{items: 2}".to_string()));
        let mut log = TransactionLog::new();
        {
            let original = if split {
                // the host logs the change before reading the block entity
                BlockSnapshot::new(pos, "chest", None)
            } else {
                BlockSnapshot::capture(&world, pos)
            };
            let mut scope = log.log_block_change(&phase, original, "air");
            if split {
                scope.log_attached_remove(pos, "chest{items: 2}".to_string());
            }
            world.set_block(pos, "air");
            world.set_attached(pos, None);
        }
        let mut recording = RecordingListener::new();
        let mut entries = Vec::new();
        let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
            for entry in event.entries() {
                if let EntryPayload::Block(transaction) = entry.payload() {
                    entries.push(transaction.clone());
                }
            }
            recording.on_event(event)
        };
        let report = log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);
        (report.batches, recording.events_seen, entries)
    };

    let (split_batches, split_events, split_entries) = run(true);
    let (whole_batches, whole_events, whole_entries) = run(false);
    assert_eq!(split_batches, whole_batches);
    assert_eq!(split_events, whole_events);
    assert_eq!(split_entries.len(), whole_entries.len());
    assert_eq!(split_entries[0].original, whole_entries[0].original);
    assert_eq!(
        split_entries[0].original.attached.as_deref(),
        Some("chest{items: 2}")
    );
    assert_eq!(split_entries[0].result.attached, None);
}

#[test]
fn side_effect_events_carry_the_causes_of_their_ancestors() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let phase = Phase::new("redstone")
        .with_source(CauseEntry::Plugin("circuits".into()))
        .with_notifier(EntityId(5));
    let mut log = TransactionLog::new();
    let lever = block_pos!(0, 1, 0);
    let lamp = block_pos!(1, 1, 0);

    {
        let original = BlockSnapshot::capture(&world, lever);
        let mut change = log.log_block_change(&phase, original, "lever_on");
        world.set_block(lever, "lever_on");
        let mut notification = change.log_notification(lever, lamp, "lever_on");
        let original = BlockSnapshot::capture(&world, lamp);
        let _lit = notification.log_block_change(&phase, original, "lamp_lit");
        world.set_block(lamp, "lamp_lit");
    }

    let mut causes = CauseStack::new();
    let mut lamp_cause = None;
    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        let lamp_changed = event.entries().iter().any(|entry| {
            entry.pos() == Some(lamp) && matches!(entry.payload(), EntryPayload::Block(_))
        });
        if lamp_changed {
            lamp_cause = Some(event.cause().clone());
        }
        Ok(())
    };
    log.unwind(&phase, &mut causes, &mut world, &mut listener);

    let cause = lamp_cause.expect("the lamp change was posted");
    assert_eq!(
        cause.entries(),
        [
            CauseEntry::Block(lever),
            CauseEntry::Block(lever),
            CauseEntry::Plugin("circuits".into()),
        ]
    );
    assert_eq!(cause.context(&keys::NOTIFY_SOURCE), Some(&lever));
    assert_eq!(cause.context(&keys::CHANGE_KIND), Some(&BlockChange::Place));
    assert_eq!(cause.context(&keys::NOTIFIER), Some(&EntityId(5)));
    // nothing leaked into the caller's stack
    assert_eq!(causes.depth(), 0);
    assert_eq!(causes.context(&keys::NOTIFY_SOURCE), None);
}

#[test]
fn failing_listeners_count_as_not_cancelled() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let phase = Phase::new("building");
    let mut log = TransactionLog::new();
    set_block(&mut log, &mut world, &phase, BlockPos::ORIGIN, "stone");
    drop(log.log_notification(BlockPos::ORIGIN, block_pos!(0, 1, 0), "stone"));

    let mut listener = |event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
        event.set_cancelled(true);
        match event.kind() {
            EventKind::Notify => panic!("listener bug"),
            _ => Err(ListenerError::new("protection", "region database unavailable")),
        }
    };
    let report = log.unwind(&phase, &mut CauseStack::new(), &mut world, &mut listener);

    assert_eq!(report.events_posted, 2);
    assert_eq!(report.listener_failures, 2);
    assert_eq!(report.cancelled, 0);
    assert_eq!(world.block(BlockPos::ORIGIN), "stone");
    assert_eq!(log.state(), DriverState::Idle);
}

/// Builds block change events but panics on notifications.
struct BrokenNotify;

impl ticktx::PhaseContext<MemoryWorld> for BrokenNotify {
    fn name(&self) -> &str {
        "broken notify"
    }

    fn create_event(
        &self,
        kind: EventKind,
        _parent: Option<&ticktx::Transaction<MemoryWorld>>,
        cause: ticktx::Cause,
        entries: Vec<ticktx::EventEntry<MemoryWorld>>,
    ) -> Option<Event<MemoryWorld>> {
        assert_ne!(kind, EventKind::Notify, "no notify events in this phase");
        Some(Event::new(kind, cause, entries))
    }
}

fn change_with_notification(log: &mut TransactionLog<MemoryWorld>, world: &mut MemoryWorld) {
    let original = BlockSnapshot::capture(&*world, BlockPos::ORIGIN);
    let mut scope = log.log_block_change(&BrokenNotify, original, "stone");
    world.set_block(BlockPos::ORIGIN, "stone");
    scope.log_notification(BlockPos::ORIGIN, block_pos!(0, 1, 0), "stone");
}

#[test]
fn panicking_event_creation_counts_as_not_cancelled() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let mut log = TransactionLog::new();
    change_with_notification(&mut log, &mut world);

    let mut causes = CauseStack::new();
    let mut recording = RecordingListener::new();
    let report = log.unwind(&BrokenNotify, &mut causes, &mut world, &mut recording);

    assert_eq!(report.batches, 2);
    assert_eq!(report.events_posted, 1);
    assert_eq!(report.listener_failures, 1);
    assert_eq!(report.cancelled, 0);
    assert_eq!(world.block(BlockPos::ORIGIN), "stone");
    assert_eq!(log.state(), DriverState::Idle);
    assert!(log.is_empty());
    assert_eq!(causes.frame_depth(), 0);

    // the next tick starts from an empty tree
    set_block(&mut log, &mut world, &Phase::new("next"), block_pos!(4, 0, 0), "dirt");
    assert_eq!(log.len(), 1);
    assert_eq!(log.batches().len(), 1);
}

#[test]
fn uncaught_panics_still_empty_the_log() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let mut log =
        TransactionLog::with_config(Config::default().with_catch_listener_panics(false));
    change_with_notification(&mut log, &mut world);

    let mut causes = CauseStack::new();
    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        log.unwind(
            &BrokenNotify,
            &mut causes,
            &mut world,
            &mut ticktx::DummyListener,
        )
    }));

    assert!(unwound.is_err());
    assert_eq!(log.state(), DriverState::Idle);
    assert!(log.is_empty());
    assert!(log.touches(BlockPos::ORIGIN).is_empty());
    assert_eq!(causes.frame_depth(), 0);
}

#[test]
fn suppressed_events_count_as_not_cancelled() {
    use ticktx::{Cause, EventEntry, PhaseContext, Transaction};

    struct Quiet;

    impl PhaseContext<MemoryWorld> for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn create_event(
            &self,
            kind: EventKind,
            _parent: Option<&Transaction<MemoryWorld>>,
            cause: Cause,
            entries: Vec<EventEntry<MemoryWorld>>,
        ) -> Option<Event<MemoryWorld>> {
            // notifications are not reported in this phase
            (kind != EventKind::Notify).then(|| Event::new(kind, cause, entries))
        }
    }

    init_tracing();
    let mut world = MemoryWorld::new();
    let mut log = TransactionLog::new();
    {
        let original = BlockSnapshot::capture(&world, BlockPos::ORIGIN);
        let mut scope = log.log_block_change(&Quiet, original, "sand");
        world.set_block(BlockPos::ORIGIN, "sand");
        scope.log_notification(BlockPos::ORIGIN, block_pos!(0, -1, 0), "sand");
    }
    let mut recording = RecordingListener::new();
    let report = log.unwind(&Quiet, &mut CauseStack::new(), &mut world, &mut recording);
    assert_eq!(report.batches, 2);
    assert_eq!(report.events_posted, 1);
    assert_eq!(recording.events_seen, ["ChangeBlock.Place [(0, 0, 0)] caused by nothing"]);
}

#[test]
fn closing_a_container_can_be_vetoed() {
    init_tracing();
    let mut world = MemoryWorld::new();
    let chest = ContainerId(3);
    world.set_container_open(chest, true);
    let mut log =
        TransactionLog::with_config(Config::default().with_dump_on_listener_failure(false));
    log.log_container_close(chest);
    world.set_container_open(chest, false);

    let mut listeners: Vec<Box<dyn Listener<MemoryWorld>>> = vec![
        Box::new(RecordingListener::new()),
        Box::new(|event: &mut Event<MemoryWorld>| -> Result<(), ListenerError> {
            event.set_cancelled(event.kind() == EventKind::ContainerClose);
            Ok(())
        }),
    ];
    let report = log.unwind(
        &Phase::new("player input"),
        &mut CauseStack::new(),
        &mut world,
        &mut listeners,
    );
    assert_eq!(report.restored, 1);
    assert!(world.is_container_open(chest));
}
