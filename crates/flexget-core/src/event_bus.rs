//! EventBus - named events with ordered synchronous handlers.
//!
//! Handlers registered with [`EventBus::on`] run in registration order each
//! time an event fires; every fired event is also broadcast so that
//! long-running listeners (the daemon, log streamers) can follow along.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Events fired by the manager, tasks and the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlexgetEvent {
    /// Root config keys and formats must be registered now
    ConfigRegister,
    /// A new config was loaded and validated
    ConfigUpdated {
        /// Path the config came from, if any
        path: Option<String>,
    },
    /// A task run started
    TaskStarted {
        /// Task name
        task: String,
        /// Run identifier
        run_id: Uuid,
    },
    /// A task run finished (including aborted runs)
    TaskCompleted {
        /// Task name
        task: String,
        /// Run identifier
        run_id: Uuid,
        /// Abort reason when the task aborted
        aborted: Option<String>,
    },
    /// The scheduler loop started
    SchedulerStarted,
    /// The scheduler loop stopped
    SchedulerStopped {
        /// Jobs still queued when it stopped
        remaining: usize,
    },
}

impl FlexgetEvent {
    /// Dotted event name handlers subscribe to
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigRegister => "config.register",
            Self::ConfigUpdated { .. } => "config.updated",
            Self::TaskStarted { .. } => "task.execute.started",
            Self::TaskCompleted { .. } => "task.execute.completed",
            Self::SchedulerStarted => "scheduler.started",
            Self::SchedulerStopped { .. } => "scheduler.stopped",
        }
    }
}

/// Synchronous event handler
pub type EventHandler = Arc<dyn Fn(&FlexgetEvent) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    event: String,
    name: String,
    handler: EventHandler,
}

/// Event bus with ordered handlers and a broadcast feed
pub struct EventBus {
    handlers: RwLock<Vec<Subscription>>,
    sender: broadcast::Sender<FlexgetEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| format!("{}:{}", s.event, s.name))
            .collect();
        f.debug_struct("EventBus")
            .field("handlers", &handlers)
            .finish()
    }
}

impl EventBus {
    /// Create a new EventBus with the given broadcast capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Register `handler` for the event called `event`
    pub fn on<F>(&self, event: &str, name: &str, handler: F)
    where
        F: Fn(&FlexgetEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        debug!(event, handler = name, "Registering event handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                event: event.to_string(),
                name: name.to_string(),
                handler: Arc::new(handler),
            });
    }

    /// Run every handler of the event in registration order.
    ///
    /// All handlers run even when one fails; the first failure is returned.
    pub fn fire(&self, event: FlexgetEvent) -> Result<()> {
        let handlers: Vec<(String, EventHandler)> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.event == event.name())
            .map(|s| (s.name.clone(), s.handler.clone()))
            .collect();

        let mut first_error = None;
        for (name, handler) in handlers {
            if let Err(e) = handler(&event) {
                error!(event = event.name(), handler = %name, error = %e, "Event handler failed");
                first_error.get_or_insert(Error::Event {
                    event: event.name().to_string(),
                    subscriber: name,
                    message: e.to_string(),
                });
            }
        }

        self.publish(event);
        first_error.map_or(Ok(()), Err)
    }

    /// Follow every fired event
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FlexgetEvent> {
        self.sender.subscribe()
    }

    /// Broadcast without running handlers; returns the receiver count.
    pub fn publish(&self, event: FlexgetEvent) -> usize {
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of handlers registered for `event`
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.event == event)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_handlers_run_in_order() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let seen = seen.clone();
            bus.on("config.register", name, move |_| {
                seen.lock().unwrap().push(name);
                Ok(())
            });
        }
        bus.on("config.updated", "other", |_| Ok(()));

        bus.fire(FlexgetEvent::ConfigRegister).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(bus.handler_count("config.register"), 2);
    }

    #[test]
    fn test_failure_reported_after_all_handlers() {
        let bus = EventBus::default();
        let ran = Arc::new(Mutex::new(0));
        bus.on("config.register", "broken", |_| Err(anyhow::anyhow!("boom")));
        let counter = ran.clone();
        bus.on("config.register", "healthy", move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let err = bus.fire(FlexgetEvent::ConfigRegister).unwrap_err();
        assert_eq!(*ran.lock().unwrap(), 1);
        match err {
            Error::Event {
                event, subscriber, ..
            } => {
                assert_eq!(event, "config.register");
                assert_eq!(subscriber, "broken");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fired_events_are_broadcast() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();
        bus.fire(FlexgetEvent::TaskStarted {
            task: "tv".to_string(),
            run_id,
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            FlexgetEvent::TaskStarted { task, run_id: id } => {
                assert_eq!(task, "tv");
                assert_eq!(id, run_id);
            }
            other => panic!("expected TaskStarted, got: {:?}", other),
        }
    }

    #[test]
    fn test_publish_no_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(FlexgetEvent::SchedulerStarted), 0);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(FlexgetEvent::SchedulerStopped { remaining: 2 }).unwrap();
        assert_eq!(json["type"], "scheduler_stopped");
        assert_eq!(json["remaining"], 2);
    }
}
