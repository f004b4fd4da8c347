//! Composition root and event entry point

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use super::dispatch::UiDispatcher;
use super::screens::{ScreenCoordinator, ScreenKind, ViewFactory};
use super::shutdown::ShutdownOrchestrator;
use super::tasks::TaskRegistry;
use super::panic_message;

/// Event payload, shaped per event
pub type Payload = Value;

/// Handler bound to an event name
pub type EventHandler<K, F> = Box<dyn Fn(&HandlerContext<K, F>, Payload) -> Result<()> + Send + Sync>;

/// What a handler can reach; cheap to clone into background tasks
pub struct HandlerContext<K: ScreenKind, F: ViewFactory<K>> {
    pub tasks: Arc<TaskRegistry>,
    pub screens: ScreenCoordinator<K, F>,
    pub shutdown: Arc<ShutdownOrchestrator>,
    pub ui: Arc<dyn UiDispatcher>,
}

impl<K: ScreenKind, F: ViewFactory<K>> Clone for HandlerContext<K, F> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
            screens: self.screens.clone(),
            shutdown: Arc::clone(&self.shutdown),
            ui: Arc::clone(&self.ui),
        }
    }
}

/// Owns the task registry, screen coordinator and shutdown orchestrator,
/// and routes named events to handlers
pub struct LifecycleController<K: ScreenKind, F: ViewFactory<K>> {
    context: HandlerContext<K, F>,
    handlers: HashMap<String, EventHandler<K, F>>,
}

impl<K: ScreenKind, F: ViewFactory<K>> LifecycleController<K, F> {
    pub fn new(
        tasks: Arc<TaskRegistry>,
        screens: ScreenCoordinator<K, F>,
        shutdown: Arc<ShutdownOrchestrator>,
        ui: Arc<dyn UiDispatcher>,
    ) -> Self {
        Self {
            context: HandlerContext {
                tasks,
                screens,
                shutdown,
                ui,
            },
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `event`, replacing any previous one
    pub fn on<H>(&mut self, event: impl Into<String>, handler: H) -> &mut Self
    where
        H: Fn(&HandlerContext<K, F>, Payload) -> Result<()> + Send + Sync + 'static,
    {
        let event = event.into();
        if self.handlers.insert(event.clone(), Box::new(handler)).is_some() {
            log::warn!(target: "roster::controller", "Replaced handler for '{}'", event);
        }
        self
    }

    /// Route an event to its handler
    ///
    /// Events are dropped once shutdown has started. Unknown events, handler
    /// errors and handler panics are logged; nothing propagates to the caller.
    pub fn dispatch(&self, event: &str, payload: Payload) {
        if self.context.shutdown.is_started() {
            log::debug!(target: "roster::controller", "Shutdown started, dropping event '{}'", event);
            return;
        }

        let Some(handler) = self.handlers.get(event) else {
            log::warn!(target: "roster::controller", "Unknown event '{}', ignoring", event);
            return;
        };

        log::debug!(target: "roster::controller", "Dispatching '{}'", event);
        match panic::catch_unwind(AssertUnwindSafe(|| handler(&self.context, payload))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::error!(target: "roster::controller", "Handler for '{}' failed: {:#}", event, err);
            }
            Err(payload) => {
                log::error!(
                    target: "roster::controller",
                    "Handler for '{}' panicked: {}",
                    event,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn context(&self) -> &HandlerContext<K, F> {
        &self.context
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.context.tasks
    }

    pub fn screens(&self) -> &ScreenCoordinator<K, F> {
        &self.context.screens
    }

    pub fn shutdown(&self) -> &Arc<ShutdownOrchestrator> {
        &self.context.shutdown
    }
}
