// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Bus
//!
//! Dispatch point for `ApplicationEvent`s. Observers fire synchronously in
//! registration order, once per event, on the calling thread. Observer
//! callbacks must not block; long-running reactions belong behind the
//! host's own channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use notelock_domain::events::ApplicationEvent;

/// Observer callback for application events.
pub type EventObserver = Arc<dyn Fn(ApplicationEvent) + Send + Sync>;

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSubscription(u64);

/// Synchronous application event dispatcher.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<(u64, EventObserver)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer; fires in registration order
    pub fn subscribe(&self, observer: EventObserver) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, observer));
        EventSubscription(id)
    }

    /// Removes a previously registered observer
    pub fn unsubscribe(&self, subscription: EventSubscription) {
        self.observers.write().retain(|(id, _)| *id != subscription.0);
    }

    /// Notifies every observer of the event
    pub fn notify(&self, event: ApplicationEvent) {
        // Snapshot under the read lock, release, then fire: observers may
        // subscribe or emit re-entrantly.
        let observers: Vec<EventObserver> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_observers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(Arc::new(move |_| order.lock().push(tag)));
        }
        bus.notify(ApplicationEvent::Launched);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let subscription = {
            let count = Arc::clone(&count);
            bus.subscribe(Arc::new(move |_| *count.lock() += 1))
        };
        bus.notify(ApplicationEvent::WillSync);
        bus.unsubscribe(subscription);
        bus.notify(ApplicationEvent::WillSync);
        assert_eq!(*count.lock(), 1);
    }
}
