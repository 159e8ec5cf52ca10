// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::CauseStack;
use std::{
    any::Any,
    fmt,
    ops::{Deref, DerefMut},
    panic::Location,
    rc::Rc,
};

/// Identifies a frame opened with [`CauseStack::push_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Error returned when a frame cannot be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is not on the stack: it was closed already, or it belongs to another stack.
    ///
    /// At this point the identity of the stack is lost and nothing can be restored.
    UnknownFrame(FrameHandle),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::UnknownFrame(handle) => {
                write!(f, "{handle} is not open on this cause stack")
            }
        }
    }
}

impl std::error::Error for FrameError {}

pub(super) struct Frame {
    pub(super) handle: FrameHandle,
    /// Number of causes on the stack when the frame was pushed.
    pub(super) depth: usize,
    /// Context keys written within the frame, with the value each had before.
    pub(super) saved: Vec<(&'static str, Option<Rc<dyn Any>>)>,
    pub(super) pushed_at: &'static Location<'static>,
}

impl CauseStack {
    /// Opens a frame and returns a handle to close it with.
    ///
    /// Prefer [`CauseStack::frame`], which cannot be closed out of order.
    #[track_caller]
    pub fn push_frame(&mut self) -> FrameHandle {
        let handle = FrameHandle(self.next_frame);
        self.next_frame += 1;
        self.frames.push(Frame {
            handle,
            depth: self.entries.len(),
            saved: Vec::new(),
            pushed_at: Location::caller(),
        });
        handle
    }

    /// Closes the frame identified by `handle`, restoring the causes and context it covered.
    ///
    /// Closing a frame that is not the innermost one is a bug in the caller. It is recovered
    /// from by first closing every frame that was opened after it, innermost first, with a
    /// warning (and, with [`Config::verbose_frames`](crate::Config::verbose_frames), the
    /// location each leaked frame was pushed from).
    pub fn pop_frame(&mut self, handle: FrameHandle) -> Result<(), FrameError> {
        let index = self
            .frames
            .iter()
            .rposition(|frame| frame.handle == handle)
            .ok_or(FrameError::UnknownFrame(handle))?;

        let leaked = self.frames.split_off(index + 1);
        if !leaked.is_empty() {
            tracing::warn!(
                frame = %handle,
                leaked = leaked.len(),
                "cause frame closed out of order, closing the frames opened after it first"
            );
        }
        for frame in leaked.into_iter().rev() {
            if self.verbose {
                tracing::warn!(
                    frame = %frame.handle,
                    pushed_at = %frame.pushed_at,
                    "closing leaked cause frame"
                );
            }
            self.close(frame);
        }

        if let Some(frame) = self.frames.pop() {
            self.close(frame);
        }
        Ok(())
    }

    /// Opens a frame that closes itself when dropped.
    ///
    /// The returned guard dereferences to the stack, so causes and context can be pushed
    /// through it, including further nested frames.
    #[track_caller]
    pub fn frame(&mut self) -> StackFrame<'_> {
        let handle = self.push_frame();
        StackFrame {
            stack: self,
            handle,
        }
    }
}

/// A frame on a [`CauseStack`] that closes when dropped.
///
/// See [`CauseStack::frame`].
pub struct StackFrame<'a> {
    stack: &'a mut CauseStack,
    handle: FrameHandle,
}

impl StackFrame<'_> {
    pub fn handle(&self) -> FrameHandle {
        self.handle
    }
}

impl Deref for StackFrame<'_> {
    type Target = CauseStack;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl DerefMut for StackFrame<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.stack.pop_frame(self.handle) {
            tracing::error!(%err, "scoped cause frame was closed behind its back");
        }
    }
}
