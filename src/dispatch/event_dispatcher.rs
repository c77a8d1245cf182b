// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::session::Session;

/// Outbound event classes a local client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    CoordinationState,
    DragState,
    DragStyle,
    ThumbnailDraw,
}

const EVENT_TYPE_COUNT: usize = 4;

fn event_index(event_type: EventType) -> usize {
    match event_type {
        EventType::CoordinationState => 0,
        EventType::DragState => 1,
        EventType::DragStyle => 2,
        EventType::ThumbnailDraw => 3,
    }
}

struct Entry {
    session: Weak<Session>,
    handle_id: i32,
}

/// Listener registry indexed by event type, marshalling outbound
/// notifications to the client sessions that subscribed to them.
///
/// Entries hold sessions weakly: a session that disconnects without
/// explicitly unsubscribing cannot pin its listener entry forever, matching
/// the "cyclic callback graph" design note — listeners and sessions would
/// otherwise reference each other indefinitely.
pub struct EventDispatcher {
    entries: Mutex<[Vec<Entry>; EVENT_TYPE_COUNT]>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { entries: Mutex::new(std::array::from_fn(|_| Vec::new())) }
    }

    /// Subscribe `session` to `event_type` under `handle_id`. A no-op if
    /// that `(session, handle_id)` pair is already registered. Returns a
    /// token whose `Drop` removes the registration, realizing the
    /// self-deregistering listener contract.
    pub fn add(
        self: &Arc<Self>,
        event_type: EventType,
        session: &Arc<Session>,
        handle_id: i32,
    ) -> ListenerToken {
        let mut entries = self.entries.lock().expect("dispatcher lock poisoned");
        let bucket = &mut entries[event_index(event_type)];
        let already = bucket.iter().any(|e| e.handle_id == handle_id && e.session.ptr_eq(&Arc::downgrade(session)));
        if !already {
            bucket.push(Entry { session: Arc::downgrade(session), handle_id });
        }
        drop(entries);
        ListenerToken {
            dispatcher: Arc::downgrade(self),
            event_type,
            session: Arc::downgrade(session),
            handle_id,
        }
    }

    /// Unsubscribe `(session, handle_id)`. Passing `None` for `handle_id`
    /// drops every registration belonging to that session for this event
    /// type (wildcard removal).
    pub fn remove(&self, event_type: EventType, session: &Arc<Session>, handle_id: Option<i32>) {
        let target = Arc::downgrade(session);
        let mut entries = self.entries.lock().expect("dispatcher lock poisoned");
        let bucket = &mut entries[event_index(event_type)];
        bucket.retain(|e| {
            let same_session = e.session.ptr_eq(&target);
            match handle_id {
                Some(h) => !(same_session && e.handle_id == h),
                None => !same_session,
            }
        });
    }

    /// Send `payload` under `msg_id` to every live subscriber of
    /// `event_type`, in FIFO registration order. A failed send to one
    /// session is logged and does not stop delivery to the rest; this
    /// method never returns an error.
    pub fn emit(&self, event_type: EventType, msg_id: i32, payload: &[u8]) {
        let sessions: Vec<Arc<Session>> = {
            let mut entries = self.entries.lock().expect("dispatcher lock poisoned");
            let bucket = &mut entries[event_index(event_type)];
            bucket.retain(|e| e.session.upgrade().is_some());
            bucket.iter().filter_map(|e| e.session.upgrade()).collect()
        };
        for session in sessions {
            if let Err(e) = session.send_msg(msg_id, payload) {
                warn!(fd = session.fd, error = %e, ?event_type, "event delivery failed");
            }
        }
    }
}

/// Removes its `(event_type, session, handle_id)` registration from the
/// owning dispatcher when dropped. Dropping after the dispatcher itself is
/// gone is a silent no-op.
pub struct ListenerToken {
    dispatcher: Weak<EventDispatcher>,
    event_type: EventType,
    session: Weak<Session>,
    handle_id: i32,
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        let (Some(dispatcher), Some(session)) = (self.dispatcher.upgrade(), self.session.upgrade())
        else {
            return;
        };
        dispatcher.remove(self.event_type, &session, Some(self.handle_id));
    }
}
