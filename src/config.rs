// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Runtime knobs for the tracker.

/// Runtime configuration shared by [`TransactionLog`](crate::TransactionLog) and
/// [`CauseStack`](crate::CauseStack).
///
/// ```
/// use ticktx::Config;
///
/// let config = Config::default()
///     .with_verbose_frames(true)
///     .with_catch_listener_panics(false);
/// assert!(config.verbose_frames);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Config {
    /// Log the push site of every frame that gets closed out of order.
    pub verbose_frames: bool,

    /// Catch panics raised by listeners while an event is posted.
    ///
    /// A caught panic is logged and the event is treated as not cancelled, so a broken listener
    /// cannot halt the simulation.
    pub catch_listener_panics: bool,

    /// Include the full transaction tree in the error log of a failed listener.
    pub dump_on_listener_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose_frames: false,
            catch_listener_panics: true,
            dump_on_listener_failure: true,
        }
    }
}

impl Config {
    pub fn with_verbose_frames(mut self, verbose: bool) -> Self {
        self.verbose_frames = verbose;
        self
    }

    pub fn with_catch_listener_panics(mut self, catch: bool) -> Self {
        self.catch_listener_panics = catch;
        self
    }

    pub fn with_dump_on_listener_failure(mut self, dump: bool) -> Self {
        self.dump_on_listener_failure = dump;
        self
    }
}
