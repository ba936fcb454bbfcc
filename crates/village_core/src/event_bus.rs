/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Minimal synchronous pub/sub keyed by event name.
//!
//! Listeners run on the caller's thread, in registration order. A panic in a
//! listener is not caught here and unwinds into whoever called
//! [`EventBus::fire_event`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`EventBus::on`], used to remove that one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<D> = Arc<dyn Fn(&D) + Send + Sync>;

pub struct EventBus<K, D> {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<K, Vec<(ListenerId, Listener<D>)>>>,
}

impl<K, D> EventBus<K, D>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn on<F>(&self, event: K, listener: F) -> ListenerId
    where
        F: Fn(&D) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut g = self.listeners.lock().unwrap();
        g.entry(event).or_default().push((id, Arc::new(listener)));
        id
    }

    /// Removes one listener, or every listener of `event` when `listener` is `None`.
    pub fn off(&self, event: &K, listener: Option<ListenerId>) {
        let mut g = self.listeners.lock().unwrap();
        match listener {
            Some(id) => {
                if let Some(list) = g.get_mut(event) {
                    list.retain(|(lid, _)| *lid != id);
                    if list.is_empty() {
                        g.remove(event);
                    }
                }
            }
            None => {
                g.remove(event);
            }
        }
    }

    /// Invokes the listeners registered for `event` at the time of the call.
    pub fn fire_event(&self, event: &K, data: &D) {
        // Snapshot so listeners may (un)register without deadlocking.
        let snapshot: Vec<Listener<D>> = {
            let g = self.listeners.lock().unwrap();
            match g.get(event) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        for listener in snapshot {
            listener(data);
        }
    }

    pub fn clear_event_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn listener_count(&self, event: &K) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl<K, D> Default for EventBus<K, D>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
