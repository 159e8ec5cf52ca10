// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! A listener that records every event it sees in a human readable form. This is mostly useful
//! for tests.

use super::{Listener, ListenerError};
use crate::{Event, World};

/// A listener that records all events and accepts them.
#[derive(Debug, Default)]
pub struct RecordingListener {
    /// A string-representation of each event that the listener has received.
    pub events_seen: Vec<String>,
}

impl RecordingListener {
    pub fn new() -> RecordingListener {
        RecordingListener {
            events_seen: vec![],
        }
    }
}

impl<W: World> Listener<W> for RecordingListener {
    fn on_event(&mut self, event: &mut Event<W>) -> Result<(), ListenerError> {
        let entries: Vec<String> = event
            .entries()
            .iter()
            .map(|entry| entry.payload().to_string())
            .collect();
        let cause = match event.cause().root() {
            Some(root) => root.to_string(),
            None => "nothing".to_string(),
        };
        self.events_seen.push(format!(
            "{} [{}] caused by {cause}",
            event.kind(),
            entries.join(", ")
        ));
        Ok(())
    }
}
