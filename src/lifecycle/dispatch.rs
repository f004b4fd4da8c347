//! Marshalling work onto the UI thread
//!
//! Views may only be touched from the thread that drives the terminal loop.
//! Background work hands closures to a [`UiDispatcher`]; the terminal loop
//! drains them once per frame through [`UiQueueReceiver::drain`].

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;

use super::panic_message;

/// A unit of work that must run on the UI thread
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Schedules closures onto the UI-affine thread (fire-and-forget)
pub trait UiDispatcher: Send + Sync {
    fn run_on_ui_thread(&self, job: UiJob);
}

/// Runs every job immediately on the calling thread
///
/// Used for headless runs and tests where the caller already is the UI thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDispatcher;

impl UiDispatcher for ImmediateDispatcher {
    fn run_on_ui_thread(&self, job: UiJob) {
        job();
    }
}

/// Sending half of the UI job queue, cheap to clone
#[derive(Clone)]
pub struct UiQueue {
    sender: mpsc::UnboundedSender<UiJob>,
}

/// Receiving half of the UI job queue, owned by the terminal loop
pub struct UiQueueReceiver {
    receiver: mpsc::UnboundedReceiver<UiJob>,
}

impl UiQueue {
    pub fn new() -> (Self, UiQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, UiQueueReceiver { receiver })
    }
}

impl UiDispatcher for UiQueue {
    fn run_on_ui_thread(&self, job: UiJob) {
        if self.sender.send(job).is_err() {
            // Loop is gone, nothing left to paint on
            log::debug!(target: "roster::ui", "UI queue closed, dropping job");
        }
    }
}

impl UiQueueReceiver {
    /// Run every job queued so far, returning how many ran
    ///
    /// A panicking job is logged and does not stop the remaining jobs.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                log::error!(target: "roster::ui", "UI job panicked: {}", panic_message(payload.as_ref()));
            }
            ran += 1;
        }
        ran
    }
}
