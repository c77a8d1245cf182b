// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::{
    coordination::types::{CoordinationEvent, CoordinationMessage, CoordinationState},
    dispatch::{EventDispatcher, EventType, ListenerToken},
    ipc::MessageId,
    session::Session,
};

/// Coordination's event surface to local IPC clients. `Listener`/`Enable`
/// notifications broadcast to every session that registered via
/// [`Self::add_listener`]; `Start`/`Stop`/`State` replies are one-shot and
/// routed only to the pid that issued the matching request, mirroring the
/// original's split between a subscriber list and per-call reply routing.
pub struct EventManager {
    dispatcher: Arc<EventDispatcher>,
    pending: Mutex<Vec<(i32, Weak<Session>)>>,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self { dispatcher: Arc::new(EventDispatcher::new()), pending: Mutex::new(Vec::new()) }
    }

    /// The dispatcher backing `CoordinationState` broadcasts, exposed so a
    /// caller can register/unregister listener tokens through the same
    /// bookkeeping used for the drag dispatcher.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Subscribe `session` to broadcast coordination notifications. Returns
    /// a token whose drop unsubscribes it.
    pub fn add_listener(self: &Arc<Self>, session: &Arc<Session>) -> ListenerToken {
        self.dispatcher.add(EventType::CoordinationState, session, 0)
    }

    /// Record that `pid` (owning `session`) is awaiting a one-shot reply.
    /// Replaces any prior registration for the same pid, matching "one
    /// pending call per client" semantics.
    pub fn register_waiting_client(&self, pid: i32, session: &Arc<Session>) {
        let mut pending = self.pending.lock().expect("event manager lock poisoned");
        pending.retain(|(p, s)| *p != pid && s.upgrade().is_some());
        pending.push((pid, Arc::downgrade(session)));
    }

    fn reply_to_pid(&self, pid: i32, msg_id: i32, event: &CoordinationEvent) {
        let session = {
            let mut pending = self.pending.lock().expect("event manager lock poisoned");
            pending.retain(|(_, s)| s.upgrade().is_some());
            pending.iter().find(|(p, _)| *p == pid).and_then(|(_, s)| s.upgrade())
        };
        let Some(session) = session else {
            warn!(pid, "no waiting client for coordination reply");
            return;
        };
        match serde_json::to_vec(event) {
            Ok(payload) => {
                if let Err(e) = session.send_msg(msg_id, &payload) {
                    warn!(error = %e, pid, "failed to deliver coordination reply");
                }
            },
            Err(e) => warn!(error = %e, "failed to encode coordination event"),
        }
    }

    fn broadcast(&self, msg_id: i32, event: &CoordinationEvent) {
        match serde_json::to_vec(event) {
            Ok(payload) => self.dispatcher.emit(EventType::CoordinationState, msg_id, &payload),
            Err(e) => warn!(error = %e, "failed to encode coordination event"),
        }
    }

    pub fn notify_start(&self, event: CoordinationEvent) {
        self.reply_to_pid(event.pid, MessageId::StartCoordination.as_i32(), &event);
    }

    pub fn notify_stop(&self, event: CoordinationEvent) {
        self.reply_to_pid(event.pid, MessageId::StopCoordination.as_i32(), &event);
    }

    pub fn notify_state(&self, event: CoordinationEvent) {
        self.reply_to_pid(event.pid, MessageId::GetCoordinationState.as_i32(), &event);
    }

    /// Broadcast an unsolicited state transition (peer-initiated start,
    /// soft-bus shutdown) to every subscribed listener.
    pub fn broadcast_state(&self, network_id: &str, state: CoordinationState) {
        let event = CoordinationEvent {
            pid: -1,
            user_data: 0,
            network_id: network_id.to_string(),
            message: match state {
                CoordinationState::Free => CoordinationMessage::SessionClosed,
                CoordinationState::In | CoordinationState::Out => {
                    CoordinationMessage::ActivateSuccess
                },
            }
            .into(),
            state: Some(state.into()),
        };
        self.broadcast(MessageId::RegisterCoordinationMonitor.as_i32(), &event);
    }

    /// Route a negative return code from a lower-level failure to the
    /// waiting client as a generic failure notification.
    pub fn on_error_message(&self, pid: i32, network_id: &str, code: i32) {
        warn!(pid, code, "routing coordination error to waiting client");
        self.reply_to_pid(
            pid,
            MessageId::StartCoordination.as_i32(),
            &CoordinationEvent {
                pid,
                user_data: 0,
                network_id: network_id.to_string(),
                message: CoordinationMessage::CooperationFail.into(),
                state: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::TokenType;

    fn make_session(fd: i32) -> Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Session::new(fd, fd, 0, "test".to_string(), TokenType::Native, tx))
    }

    #[test]
    fn reply_without_a_waiting_client_does_not_panic() {
        let manager = Arc::new(EventManager::new());
        manager.notify_start(CoordinationEvent {
            pid: 42,
            user_data: 0,
            network_id: "peer".to_string(),
            message: CoordinationMessage::CooperationFail.into(),
            state: None,
        });
    }

    #[test]
    fn register_waiting_client_replaces_prior_registration_for_same_pid() {
        let manager = Arc::new(EventManager::new());
        let s1 = make_session(1);
        let s2 = make_session(2);
        manager.register_waiting_client(7, &s1);
        manager.register_waiting_client(7, &s2);
        let pending = manager.pending.lock().expect("poisoned");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].1.upgrade().is_some_and(|s| s.fd == 2));
    }
}
