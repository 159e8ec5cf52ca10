// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! A detached, printable copy of the transaction tree.
//!
//! The dump owns plain strings only, so it can outlive the log, be attached to a crash report,
//! or (with the `serde` feature) be serialized.

use super::{Arena, TxId};
use crate::World;
use std::fmt::{self, Write};

/// See the module docs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct TreeDump {
    pub roots: Vec<DumpNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct DumpNode {
    pub id: TxId,
    pub transaction: String,
    pub target: String,
    /// Where the transaction was logged from.
    pub location: String,
    pub cancelled: bool,
    pub recorded: bool,
    pub effects: Vec<DumpEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct DumpEffect {
    pub label: String,
    pub children: Vec<DumpNode>,
}

impl TreeDump {
    pub(crate) fn capture<W: World>(arena: &Arena<W>, head: Option<TxId>) -> Self {
        Self {
            roots: capture_chain(arena, head),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of nodes in the dump.
    pub fn len(&self) -> usize {
        fn count(nodes: &[DumpNode]) -> usize {
            nodes
                .iter()
                .map(|node| {
                    1 + node
                        .effects
                        .iter()
                        .map(|effect| count(&effect.children))
                        .sum::<usize>()
                })
                .sum()
        }
        count(&self.roots)
    }

    /// Renders the tree as indented text, one node per line.
    pub fn render(&self, show_locations: bool) -> String {
        let mut out = String::new();
        for node in &self.roots {
            render_node(&mut out, node, 0, show_locations);
        }
        out
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("tree dump is JSON serializable")
    }
}

impl fmt::Display for TreeDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

fn capture_chain<W: World>(arena: &Arena<W>, head: Option<TxId>) -> Vec<DumpNode> {
    let mut nodes = Vec::new();
    let mut current = head;
    while let Some(id) = current {
        let node = arena.node(id);
        let effects = node
            .side_effects
            .iter()
            .map(|effect| {
                let effect = arena.effect(*effect);
                DumpEffect {
                    label: effect.label().to_string(),
                    children: capture_chain(arena, effect.head()),
                }
            })
            .collect();
        nodes.push(DumpNode {
            id,
            transaction: node.transaction.name().to_string(),
            target: node.transaction.target().to_string(),
            location: node.location.to_string(),
            cancelled: node.cancelled,
            recorded: node.recorded,
            effects,
        });
        current = node.next;
    }
    nodes
}

fn render_node(out: &mut String, node: &DumpNode, depth: usize, show_locations: bool) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}{} {} {}", node.id, node.transaction, node.target);
    match (node.cancelled, node.recorded) {
        (true, true) => out.push_str(" [cancelled, recorded]"),
        (true, false) => out.push_str(" [cancelled]"),
        (false, true) => out.push_str(" [recorded]"),
        (false, false) => {}
    }
    if show_locations {
        let _ = write!(out, " @ {}", node.location);
    }
    out.push('\n');
    for effect in &node.effects {
        let _ = writeln!(out, "{indent}  {}:", effect.label);
        for child in &effect.children {
            render_node(out, child, depth + 2, show_locations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BlockPos, BlockSnapshot, ContainerId, EntityId, EntitySnapshot, MemoryWorld, Phase,
        SpawnType, TransactionLog,
    };
    use crate::transaction::DeepWalk;
    use insta::assert_snapshot;

    /// Node ids in the order of a forward walk.
    fn walk_order(log: &TransactionLog<MemoryWorld>) -> Vec<TxId> {
        let mut walk = DeepWalk::new(log.head, true);
        std::iter::from_fn(|| walk.next(&log.arena)).collect()
    }

    fn sample() -> TransactionLog<MemoryWorld> {
        let world = MemoryWorld::new();
        let phase = Phase::new("test");
        let mut log = TransactionLog::new();
        let pos = BlockPos::ORIGIN;
        {
            let original = BlockSnapshot::capture(&world, pos);
            let mut change = log.log_block_change(&phase, original, "stone");
            let notification = change.log_notification(pos, pos.offset(1, 0, 0), "stone");
            drop(notification);
            change.log_spawn(
                EntitySnapshot::new(EntityId(5), "xp_orb".to_string()),
                SpawnType::Natural,
            );
        }
        log.log_container_close(ContainerId(1));
        log
    }

    #[test]
    fn render_tree() {
        let log = sample();
        assert_snapshot!(log.dump().render(false), @r"
        tx#0 ChangeBlock (0, 0, 0) [recorded]
          block change:
            tx#1 Notification (1, 0, 0) [recorded]
            tx#2 SpawnObject entity#5
        tx#3 ContainerClose container#1
        ");
    }

    #[test]
    fn display_includes_call_sites() {
        let log = sample();
        let rendered = log.dump().to_string();
        assert!(rendered.lines().all(|line| line.ends_with(':') || line.contains(" @ ")));
        assert!(rendered.contains(file!()));
    }

    #[test]
    fn dump_lists_nodes_in_walk_order() {
        let log = sample();
        let dump = log.dump();
        assert_eq!(dump.len(), 4);
        fn flatten(nodes: &[DumpNode], out: &mut Vec<TxId>) {
            for node in nodes {
                out.push(node.id);
                for effect in &node.effects {
                    flatten(&effect.children, out);
                }
            }
        }
        let mut ids = Vec::new();
        flatten(&dump.roots, &mut ids);
        assert_eq!(ids, walk_order(&log));
    }

    #[test]
    fn empty_dump() {
        let log = TransactionLog::<MemoryWorld>::new();
        assert!(log.dump().is_empty());
        assert_eq!(log.dump().render(true), "");
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_dump() {
        let log = sample();
        let json = log.dump().to_json();
        assert_eq!(json["roots"][0]["transaction"], "ChangeBlock");
        assert_eq!(json["roots"][0]["effects"][0]["label"], "block change");
        assert_eq!(json["roots"][0]["effects"][0]["children"][1]["target"], "entity#5");
        assert_eq!(json["roots"][1]["id"], 3);
    }
}
