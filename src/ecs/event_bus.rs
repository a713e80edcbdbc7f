//! Synchronous publish/subscribe dispatch
//!
//! Handlers run in subscription order on the publisher's call stack. A
//! handler that returns an error or panics is logged and skipped; the
//! remaining handlers still receive the event and the publisher never sees
//! the failure.

use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::core::error::Result;
use crate::ecs::events::Event;
use crate::ecs::state::SimulationState;

pub type Handler = Rc<dyn Fn(&mut SimulationState, &Event) -> Result<()>>;

/// Nested publishes beyond this depth are dropped
pub const MAX_PUBLISH_DEPTH: usize = 32;

#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<AHashMap<String, Vec<Handler>>>,
    depth: Cell<usize>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.borrow();
        let mut topics: Vec<(&str, usize)> = subscribers.iter().map(|(t, h)| (t.as_str(), h.len())).collect();
        topics.sort();
        f.debug_struct("EventBus").field("topics", &topics).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F)
    where
        F: Fn(&mut SimulationState, &Event) -> Result<()> + 'static,
    {
        let topic = topic.into();
        tracing::trace!("Subscribing handler to '{}'", topic);
        self.subscribers
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(Rc::new(handler));
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.borrow().get(topic).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler of its topic; returns how many
    /// handlers completed without error
    pub fn publish(&self, state: &mut SimulationState, event: &Event) -> usize {
        let topic = event.topic();
        // Snapshot so handlers may subscribe while we dispatch
        let handlers: Vec<Handler> = match self.subscribers.borrow().get(topic.as_ref()) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        let depth = self.depth.get();
        if depth >= MAX_PUBLISH_DEPTH {
            tracing::error!(
                "Dropping '{}' event: publish chain exceeded depth {}",
                topic,
                MAX_PUBLISH_DEPTH
            );
            return 0;
        }
        self.depth.set(depth + 1);

        let mut delivered = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(state, event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!("Handler {} for '{}' failed: {}", index, topic, e);
                }
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!("Handler {} for '{}' panicked: {}", index, topic, message);
                }
            }
        }

        self.depth.set(depth);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ArlaError;
    use crate::core::types::EntityId;

    fn custom(topic: &str) -> Event {
        Event::Custom {
            topic: topic.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_delivery_in_subscription_order_despite_failures() {
        let mut state = SimulationState::new(0);
        let bus = state.event_bus();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        bus.subscribe("ping", move |_, _| {
            l.borrow_mut().push(1);
            Err(ArlaError::InvalidAction("boom".into()))
        });
        bus.subscribe("ping", |_, _| panic!("handler panic"));
        let l = Rc::clone(&log);
        bus.subscribe("ping", move |_, _| {
            l.borrow_mut().push(3);
            Ok(())
        });

        let delivered = bus.publish(&mut state, &custom("ping"));
        assert_eq!(delivered, 1);
        assert_eq!(*log.borrow(), vec![1, 3]);
    }

    #[test]
    fn test_handlers_mutate_state_and_republish() {
        let mut state = SimulationState::new(0);
        let bus = state.event_bus();
        bus.subscribe("first", |state, _| {
            state.add_entity(EntityId::new("spawned"))?;
            state.publish(Event::Custom {
                topic: "second".into(),
                payload: serde_json::Value::Null,
            });
            Ok(())
        });
        bus.subscribe("second", |state, _| state.add_entity(EntityId::new("chained")));

        bus.publish(&mut state, &custom("first"));
        assert!(state.has_entity(&EntityId::new("spawned")));
        assert!(state.has_entity(&EntityId::new("chained")));
    }

    #[test]
    fn test_cyclic_publish_terminates() {
        let mut state = SimulationState::new(0);
        let bus = state.event_bus();
        let count = Rc::new(Cell::new(0usize));
        let c = Rc::clone(&count);
        bus.subscribe("loop", move |state, event| {
            c.set(c.get() + 1);
            state.publish(event.clone());
            Ok(())
        });

        bus.publish(&mut state, &custom("loop"));
        assert_eq!(count.get(), MAX_PUBLISH_DEPTH);
    }

    #[test]
    fn test_subscribe_during_dispatch_sees_later_events() {
        let mut state = SimulationState::new(0);
        let bus = state.event_bus();
        let hits = Rc::new(Cell::new(0usize));
        let h = Rc::clone(&hits);
        bus.subscribe("grow", move |state, _| {
            let h = Rc::clone(&h);
            state.event_bus().subscribe("grow", move |_, _| {
                h.set(h.get() + 1);
                Ok(())
            });
            Ok(())
        });

        bus.publish(&mut state, &custom("grow"));
        assert_eq!(hits.get(), 0);
        bus.publish(&mut state, &custom("grow"));
        assert_eq!(hits.get(), 1);
        assert_eq!(bus.subscriber_count("grow"), 3);
    }
}
