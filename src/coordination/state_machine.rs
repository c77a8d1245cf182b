// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Mutex as StdMutex, Weak},
    time::Duration,
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::{
    codec::NetPacket,
    coordination::{
        event_manager::EventManager,
        types::{CoordinationEvent, CoordinationMessage, CoordinationState, PeerMessage},
    },
    error::{Result, ServiceError},
    softbus::{SoftbusAdapter, SoftbusObserver},
};

/// `msg_id` carried by every coordination wire message on the soft-bus
/// transport; distinct from any local-IPC [`crate::ipc::MessageId`] since it
/// never crosses the local socket, only the peer-to-peer one.
pub const COORDINATION_WIRE_MSG_ID: i32 = 100;

/// One pending request/response correlation: the task that issued the
/// request blocks on [`Exchange::wait`] until the handler thread that
/// decodes the matching peer reply calls [`Exchange::fulfill`], or the
/// timeout elapses first.
struct Exchange<T> {
    notify: Notify,
    value: StdMutex<Option<T>>,
}

impl<T> Exchange<T> {
    fn new() -> Self {
        Self { notify: Notify::new(), value: StdMutex::new(None) }
    }

    fn fulfill(&self, v: T) {
        *self.value.lock().expect("exchange poisoned") = Some(v);
        self.notify.notify_one();
    }

    async fn wait(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(v) = self.value.lock().expect("exchange poisoned").take() {
                return Some(v);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, self.notify.notified()).await.is_err() {
                return None;
            }
        }
    }
}

/// The per-device negotiation engine for cross-device keyboard/mouse
/// sharing. `FREE -> OUT` is driven locally by [`Self::start_cooperate`];
/// `FREE -> IN` is driven by an inbound [`PeerMessage::StartRequest`]; either
/// side returns to `FREE` via [`Self::stop_input_device_cooperate`] or a
/// peer-initiated [`PeerMessage::StopRequest`].
pub struct CoordinationStateMachine {
    local_network_id: String,
    softbus: Arc<SoftbusAdapter>,
    event_manager: Arc<EventManager>,
    state: Mutex<CoordinationState>,
    active_peer: Mutex<Option<String>>,
    pending_start: DashMap<String, Arc<Exchange<PeerMessage>>>,
    pending_stop: DashMap<String, Arc<Exchange<PeerMessage>>>,
    self_weak: OnceCell<Weak<CoordinationStateMachine>>,
    open_session_timeout: Duration,
    exchange_timeout: Duration,
}

impl CoordinationStateMachine {
    pub fn new(
        local_network_id: String,
        softbus: Arc<SoftbusAdapter>,
        event_manager: Arc<EventManager>,
        open_session_timeout: Duration,
        exchange_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_network_id,
            softbus,
            event_manager,
            state: Mutex::new(CoordinationState::Free),
            active_peer: Mutex::new(None),
            pending_start: DashMap::new(),
            pending_stop: DashMap::new(),
            self_weak: OnceCell::new(),
            open_session_timeout,
            exchange_timeout,
        })
    }

    /// Binds the weak self-reference used to upgrade to an owned `Arc` from
    /// the synchronous [`SoftbusObserver`] callbacks, and registers this
    /// machine as a soft-bus observer. Must be called exactly once, right
    /// after construction, before the `Arc` is shared with anything else.
    pub fn attach_self(self: &Arc<Self>) {
        let _ = self.self_weak.set(Arc::downgrade(self));
        self.softbus.add_observer(Arc::downgrade(self) as Weak<dyn SoftbusObserver>);
    }

    pub async fn state(&self) -> CoordinationState {
        *self.state.lock().await
    }

    /// Request that `remote_network_id` become the sink for this device's
    /// local input. Fails fast if a cooperation session is already active;
    /// otherwise opens the soft-bus session, sends a `StartRequest`, and
    /// waits for the matching `StartResponse`.
    pub async fn start_cooperate(
        self: &Arc<Self>,
        pid: i32,
        user_data: i32,
        remote_network_id: &str,
        start_device_id: i32,
    ) -> Result<()> {
        if remote_network_id.is_empty() || remote_network_id == self.local_network_id {
            self.event_manager.notify_start(CoordinationEvent {
                pid,
                user_data,
                network_id: remote_network_id.to_string(),
                message: CoordinationMessage::CooperationDeviceError.into(),
                state: Some(CoordinationState::Free.into()),
            });
            return Err(ServiceError::InvalidParam("remote networkId is empty or local".into()));
        }
        {
            let state = self.state.lock().await;
            if *state != CoordinationState::Free {
                self.event_manager.notify_start(CoordinationEvent {
                    pid,
                    user_data,
                    network_id: remote_network_id.to_string(),
                    message: CoordinationMessage::CooperationFail.into(),
                    state: Some((*state).into()),
                });
                return Err(ServiceError::Busy("coordination state machine"));
            }
        }

        self.wait_session_opened(remote_network_id).await?;

        let exchange = Arc::new(Exchange::new());
        self.pending_start.insert(remote_network_id.to_string(), Arc::clone(&exchange));

        let send_result = self
            .send_peer_message(
                remote_network_id,
                PeerMessage::StartRequest {
                    origin_network_id: self.local_network_id.clone(),
                    start_device_id,
                },
            )
            .await;
        if let Err(e) = send_result {
            self.pending_start.remove(remote_network_id);
            self.event_manager.notify_start(CoordinationEvent {
                pid,
                user_data,
                network_id: remote_network_id.to_string(),
                message: CoordinationMessage::CooperationFail.into(),
                state: None,
            });
            return Err(e);
        }

        let reply = exchange.wait(self.exchange_timeout).await;
        self.pending_start.remove(remote_network_id);

        match reply {
            Some(PeerMessage::StartResponse { is_success: true, .. }) => {
                *self.state.lock().await = CoordinationState::Out;
                *self.active_peer.lock().await = Some(remote_network_id.to_string());
                self.event_manager.notify_start(CoordinationEvent {
                    pid,
                    user_data,
                    network_id: remote_network_id.to_string(),
                    message: CoordinationMessage::ActivateSuccess.into(),
                    state: Some(CoordinationState::Out.into()),
                });
                Ok(())
            },
            Some(_) => {
                self.event_manager.notify_start(CoordinationEvent {
                    pid,
                    user_data,
                    network_id: remote_network_id.to_string(),
                    message: CoordinationMessage::ActivateFail.into(),
                    state: None,
                });
                Err(ServiceError::Exception("peer rejected cooperation start".into()))
            },
            None => {
                self.event_manager.notify_start(CoordinationEvent {
                    pid,
                    user_data,
                    network_id: remote_network_id.to_string(),
                    message: CoordinationMessage::CooperationFail.into(),
                    state: None,
                });
                Err(ServiceError::TimedOut("coordination start response"))
            },
        }
    }

    /// End the active cooperation session, whichever side initiated it.
    pub async fn stop_input_device_cooperate(
        self: &Arc<Self>,
        pid: i32,
        user_data: i32,
        is_unchained: bool,
    ) -> Result<()> {
        let remote = {
            let active = self.active_peer.lock().await;
            active.clone()
        };
        let Some(remote) = remote else {
            *self.state.lock().await = CoordinationState::Free;
            self.event_manager.notify_stop(CoordinationEvent {
                pid,
                user_data,
                network_id: String::new(),
                message: CoordinationMessage::DeactivateSuccess.into(),
                state: Some(CoordinationState::Free.into()),
            });
            return Ok(());
        };

        let exchange = Arc::new(Exchange::new());
        self.pending_stop.insert(remote.clone(), Arc::clone(&exchange));
        let sent = self.send_peer_message(&remote, PeerMessage::StopRequest { is_unchained }).await;
        if sent.is_err() {
            self.pending_stop.remove(&remote);
        }

        let reply = exchange.wait(self.exchange_timeout).await;
        self.pending_stop.remove(&remote);

        *self.state.lock().await = CoordinationState::Free;
        *self.active_peer.lock().await = None;

        let message = match reply {
            Some(PeerMessage::StopResponse { is_success: true }) => {
                CoordinationMessage::DeactivateSuccess
            },
            _ => CoordinationMessage::DeactivateFail,
        };
        self.event_manager.notify_stop(CoordinationEvent {
            pid,
            user_data,
            network_id: remote,
            message: message.into(),
            state: Some(CoordinationState::Free.into()),
        });
        Ok(())
    }

    /// Called when a local input device backing the active OUT-side
    /// cooperation session comes online. Advertises the device to the peer
    /// currently receiving this device's shared input; a no-op outside OUT
    /// or with no active peer.
    pub async fn on_keyboard_online(self: &Arc<Self>, dhid: &str) {
        if *self.state.lock().await != CoordinationState::Out {
            return;
        }
        let Some(remote) = self.active_peer.lock().await.clone() else { return };
        self.process_start(&remote, dhid).await;
    }

    async fn process_start(&self, remote: &str, dhid: &str) {
        if let Err(e) = self.send_peer_message(remote, PeerMessage::FilterAddedNotification).await {
            warn!(error = %e, remote, dhid, "failed to advertise keyboard-online device");
        }
    }

    async fn wait_session_opened(&self, remote_network_id: &str) -> Result<()> {
        tokio::time::timeout(self.open_session_timeout, self.softbus.open_session(remote_network_id))
            .await
            .map_err(|_| ServiceError::TimedOut("soft-bus session open"))??;
        Ok(())
    }

    async fn send_peer_message(&self, remote_network_id: &str, msg: PeerMessage) -> Result<()> {
        let payload = serde_json::to_vec(&msg)
            .map_err(|e| ServiceError::Exception(format!("encode peer message: {e}")))?;
        let packet = NetPacket::new(COORDINATION_WIRE_MSG_ID, bytes::Bytes::from(payload));
        self.softbus.send_packet(remote_network_id, &packet)
    }

    async fn handle_peer_message(self: Arc<Self>, remote: String, msg: PeerMessage) {
        match msg {
            PeerMessage::StartRequest { start_device_id, .. } => {
                let mut state = self.state.lock().await;
                let accept = *state == CoordinationState::Free;
                if accept {
                    *state = CoordinationState::In;
                }
                drop(state);
                if accept {
                    *self.active_peer.lock().await = Some(remote.clone());
                    self.event_manager.broadcast_state(&remote, CoordinationState::In);
                }
                let response = PeerMessage::StartResponse {
                    is_success: accept,
                    start_dhid: if accept { format!("dhid-{start_device_id}") } else { String::new() },
                    x_percent: 0.5,
                    y_percent: 0.5,
                };
                if let Err(e) = self.send_peer_message(&remote, response).await {
                    warn!(error = %e, remote, "failed to reply to StartRequest");
                }
            },
            PeerMessage::StartResponse { .. } => {
                if let Some(exchange) = self.pending_start.get(&remote) {
                    exchange.fulfill(msg);
                }
            },
            PeerMessage::StopRequest { is_unchained } => {
                *self.state.lock().await = CoordinationState::Free;
                *self.active_peer.lock().await = None;
                self.event_manager.broadcast_state(&remote, CoordinationState::Free);
                if let Err(e) =
                    self.send_peer_message(&remote, PeerMessage::StopResponse { is_success: true }).await
                {
                    warn!(error = %e, remote, "failed to reply to StopRequest");
                }
                debug!(remote, is_unchained, "peer-initiated cooperation stop");
            },
            PeerMessage::StopResponse { .. } => {
                if let Some(exchange) = self.pending_stop.get(&remote) {
                    exchange.fulfill(msg);
                }
            },
            PeerMessage::StartOtherResult { origin_network_id } => {
                debug!(remote, origin_network_id, "start-other-result received");
            },
            PeerMessage::UnchainedNotification { local_network_id, remote_network_id, is_success } => {
                debug!(local_network_id, remote_network_id, is_success, "unchained notification");
            },
            PeerMessage::FilterAddedNotification => {
                debug!(remote, "filter-added notification");
            },
        }
    }

    async fn handle_shutdown(self: Arc<Self>, remote: String) {
        let active = self.active_peer.lock().await.clone();
        if active.as_deref() == Some(remote.as_str()) {
            *self.state.lock().await = CoordinationState::Free;
            *self.active_peer.lock().await = None;
            self.event_manager.broadcast_state(&remote, CoordinationState::Free);
        }
    }
}

impl SoftbusObserver for CoordinationStateMachine {
    fn on_bind(&self, network_id: &str) {
        debug!(network_id, "coordination peer bound");
    }

    fn on_shutdown(&self, network_id: &str) {
        let Some(self_arc) = self.self_weak.get().and_then(Weak::upgrade) else { return };
        let network_id = network_id.to_string();
        tokio::spawn(async move { self_arc.handle_shutdown(network_id).await });
    }

    fn on_packet(&self, network_id: &str, packet: &NetPacket) -> bool {
        if packet.msg_id != COORDINATION_WIRE_MSG_ID {
            return false;
        }
        let Ok(msg) = serde_json::from_slice::<PeerMessage>(&packet.payload) else {
            warn!(network_id, "malformed coordination peer message");
            return true;
        };
        let Some(self_arc) = self.self_weak.get().and_then(Weak::upgrade) else { return true };
        let network_id = network_id.to_string();
        tokio::spawn(async move { self_arc.handle_peer_message(network_id, msg).await });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{codec, softbus::SERVER_SESSION_NAME};

    fn tmp_dir(label: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("intention-coordination-test-{label}-{:?}", std::thread::current().id()))
    }

    #[tokio::test]
    async fn start_cooperate_rejects_when_not_free() {
        let dir = tmp_dir("busy");
        let softbus = SoftbusAdapter::new(&dir);
        let event_manager = Arc::new(EventManager::new());
        let machine = CoordinationStateMachine::new(
            "local-device".to_string(),
            Arc::clone(&softbus),
            event_manager,
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        machine.attach_self();
        *machine.state.lock().await = CoordinationState::Out;

        let err = machine.start_cooperate(1, 0, "remote-device", 0).await.expect_err("should reject");
        assert!(matches!(err, ServiceError::Busy(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn start_cooperate_times_out_when_peer_never_replies() {
        let dir = tmp_dir("timeout");
        let softbus = SoftbusAdapter::new(&dir);
        softbus.enable().await.expect("enable");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let event_manager = Arc::new(EventManager::new());
        let machine = CoordinationStateMachine::new(
            "local-device".to_string(),
            Arc::clone(&softbus),
            event_manager,
            Duration::from_millis(200),
            Duration::from_millis(100),
        );
        machine.attach_self();

        // Connect a silent peer so `open_session` succeeds but nothing ever
        // answers the StartRequest.
        let _peer_stream =
            softbus.connect_for_test(SERVER_SESSION_NAME, "remote-device").await.expect("connect");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = machine
            .start_cooperate(1, 0, "remote-device", 0)
            .await
            .expect_err("should time out");
        assert!(matches!(err, ServiceError::TimedOut(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn start_cooperate_transitions_to_out_on_success_response() {
        let dir = tmp_dir("success");
        let softbus = SoftbusAdapter::new(&dir);
        softbus.enable().await.expect("enable");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let event_manager = Arc::new(EventManager::new());
        let machine = CoordinationStateMachine::new(
            "local-device".to_string(),
            Arc::clone(&softbus),
            event_manager,
            Duration::from_millis(500),
            Duration::from_millis(500),
        );
        machine.attach_self();

        let mut peer_stream =
            softbus.connect_for_test(SERVER_SESSION_NAME, "remote-device").await.expect("connect");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let responder = tokio::spawn(async move {
            let mut header = [0u8; codec::HEADER_LEN];
            peer_stream.read_exact(&mut header).await.expect("read header");
            use zerocopy::FromBytes;
            let size = codec::PackHead::read_from_bytes(&header).expect("parse header").size.get();
            let mut payload = vec![0u8; size as usize];
            peer_stream.read_exact(&mut payload).await.expect("read payload");
            let _request: PeerMessage = serde_json::from_slice(&payload).expect("decode request");

            let response = PeerMessage::StartResponse {
                is_success: true,
                start_dhid: "dhid-0".to_string(),
                x_percent: 0.5,
                y_percent: 0.5,
            };
            let wire =
                codec::encode(COORDINATION_WIRE_MSG_ID, &serde_json::to_vec(&response).unwrap());
            peer_stream.write_all(&wire).await.expect("write response");
        });

        machine.start_cooperate(1, 0, "remote-device", 7).await.expect("start succeeds");
        responder.await.expect("responder task");
        assert_eq!(machine.state().await, CoordinationState::Out);

        let _ = std::fs::remove_dir_all(&dir);
    }

    /// A device coming online while OUT advertises it to the active peer;
    /// the same call while FREE (no active peer) is a no-op.
    #[tokio::test]
    async fn on_keyboard_online_advertises_only_while_out_with_an_active_peer() {
        let dir = tmp_dir("keyboard-online");
        let softbus = SoftbusAdapter::new(&dir);
        softbus.enable().await.expect("enable");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let event_manager = Arc::new(EventManager::new());
        let machine = CoordinationStateMachine::new(
            "local-device".to_string(),
            Arc::clone(&softbus),
            event_manager,
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        machine.attach_self();

        // FREE, no active peer: no-op, nothing to read on any connection.
        machine.on_keyboard_online("dhid-0").await;

        let mut peer_stream =
            softbus.connect_for_test(SERVER_SESSION_NAME, "remote-device").await.expect("connect");
        tokio::time::sleep(Duration::from_millis(20)).await;

        *machine.state.lock().await = CoordinationState::Out;
        *machine.active_peer.lock().await = Some("remote-device".to_string());

        machine.on_keyboard_online("dhid-1").await;

        let mut header = [0u8; codec::HEADER_LEN];
        peer_stream.read_exact(&mut header).await.expect("read advertise header");
        use zerocopy::FromBytes;
        let size = codec::PackHead::read_from_bytes(&header).expect("parse header").size.get();
        let mut payload = vec![0u8; size as usize];
        peer_stream.read_exact(&mut payload).await.expect("read advertise payload");
        let msg: PeerMessage = serde_json::from_slice(&payload).expect("decode advertise message");
        assert!(matches!(msg, PeerMessage::FilterAddedNotification));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
