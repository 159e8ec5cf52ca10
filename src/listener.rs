// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Observe and veto synthesized events.
//!
//! A [`Listener`] is handed every event the tracker synthesizes while unwinding a log. It can
//! inspect the event, cancel it as a whole with [`Event::set_cancelled`], or invalidate individual
//! entries to cancel only the transactions behind them.
//!
//! Listeners are expected to be well behaved, but the tracker does not rely on it: a listener that
//! returns an error or panics is logged and its event is treated as not cancelled, so that one
//! broken listener cannot stall the simulation.
//!
//! For a testing-oriented example, see [`RecordingListener`].

use crate::{Event, World};
use std::{any::Any, fmt};

mod recording;
pub use recording::RecordingListener;

/// Observes and optionally cancels events.
///
/// Implemented for closures taking `&mut Event<W>`, and for lists of boxed listeners, which are
/// called in order until one fails.
pub trait Listener<W: World> {
    fn on_event(&mut self, event: &mut Event<W>) -> Result<(), ListenerError>;
}

impl<W, F> Listener<W> for F
where
    W: World,
    F: FnMut(&mut Event<W>) -> Result<(), ListenerError>,
{
    fn on_event(&mut self, event: &mut Event<W>) -> Result<(), ListenerError> {
        self(event)
    }
}

impl<W: World> Listener<W> for Vec<Box<dyn Listener<W>>> {
    fn on_event(&mut self, event: &mut Event<W>) -> Result<(), ListenerError> {
        for listener in self {
            listener.on_event(event)?;
        }
        Ok(())
    }
}

/// A listener that accepts everything.
///
/// Useful when nobody needs to observe the events. Unwinding with it still rolls back
/// transactions that were cancelled by chaining.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyListener;

impl<W: World> Listener<W> for DummyListener {
    fn on_event(&mut self, _event: &mut Event<W>) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// A listener failed while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerError {
    listener: String,
    message: String,
}

impl ListenerError {
    pub fn new(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            message: message.into(),
        }
    }

    /// Builds an error from the payload of a panic caught while `listener` was running.
    pub(crate) fn from_panic(listener: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(listener, message)
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener {} failed: {}", self.listener, self.message)
    }
}

impl std::error::Error for ListenerError {}
