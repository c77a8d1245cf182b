// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Top-level wiring for every subsystem this crate exposes.
//!
//! Design Note (§9): the original expresses the drag/coordination engines
//! and the soft-bus adapter as process-wide singletons (`COOR_SM`,
//! `DRAG_DATA_MGR`, ...). Here they are fields of one `Services` context
//! constructed once by `main` and passed by `Arc` reference everywhere a
//! global would otherwise be reached for; tests construct a fresh context
//! per case via [`Services::new_for_test`] instead of sharing process state.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    cfg::config::Config,
    codec::NetPacket,
    coordination::{CoordinationStateMachine, EventManager},
    dispatch::{EventDispatcher, EventType, ListenerToken},
    drag::{
        DragStateMachine, LoggingInputInterceptor, LoggingShadowRenderer,
        types::FlatDisplayTopology,
    },
    ipc::dispatch_request,
    session::{LocalSessionServer, Session, TokenType},
    softbus::SoftbusAdapter,
};

/// Every listener a client can register is tracked here so its
/// [`ListenerToken`] lives exactly as long as the registration: one entry
/// per `(session fd, event type, handle id)`, inserted on `Register*` and
/// removed (dropping the token, which deregisters) on the matching
/// `Unregister*` or when the owning session disconnects.
type ListenerKey = (i32, EventType, i32);

/// Owns every subsystem and wires them together: the local IPC session
/// server, the soft-bus adapter, the drag and coordination state machines,
/// and the event dispatcher each of the latter two publish through.
pub struct Services {
    pub config: Config,
    pub local_server: Arc<LocalSessionServer>,
    pub softbus: Arc<SoftbusAdapter>,
    pub drag: Arc<DragStateMachine>,
    pub coordination: Arc<CoordinationStateMachine>,
    pub event_manager: Arc<EventManager>,
    pub drag_dispatcher: Arc<EventDispatcher>,
    listener_tokens: DashMap<ListenerKey, ListenerToken>,
}

impl Services {
    /// Build the production wiring: a `LoggingShadowRenderer`/
    /// `LoggingInputInterceptor` stand in for the out-of-scope renderer and
    /// input subsystem (§1), and the soft-bus adapter binds named sockets
    /// under `config.softbus.base_dir`.
    pub async fn new(config: Config) -> Arc<Self> {
        let local_server = Arc::new(LocalSessionServer::new());
        let softbus = SoftbusAdapter::new(config.softbus.base_dir.clone());
        let drag_dispatcher = Arc::new(EventDispatcher::new());
        let drag = Arc::new(DragStateMachine::with_timeouts(
            Arc::new(LoggingShadowRenderer) as _,
            Arc::new(LoggingInputInterceptor::default()) as _,
            Arc::new(FlatDisplayTopology { default_display_id: 0 }),
            Arc::clone(&drag_dispatcher),
            config.timeouts.stop_drag(),
            config.timeouts.mouse_drag_monitor(),
        ));
        drag.attach_self();

        let event_manager = Arc::new(EventManager::new());
        let coordination = CoordinationStateMachine::new(
            config.runtime.local_network_id.clone(),
            Arc::clone(&softbus),
            Arc::clone(&event_manager),
            config.timeouts.session_open(),
            config.timeouts.exchange(),
        );
        coordination.attach_self();

        let services = Arc::new(Self {
            config,
            local_server,
            softbus,
            drag,
            coordination,
            event_manager,
            drag_dispatcher,
            listener_tokens: DashMap::new(),
        });
        services.wire_session_cleanup().await;
        services.wire_dispatch().await;
        services
    }

    /// A context wired for tests: an in-memory soft-bus base directory
    /// unique to the calling test and otherwise-default config, so parallel
    /// tests never collide on the same named sockets.
    pub async fn new_for_test(base_dir_suffix: &str) -> Arc<Self> {
        let mut config = Config::default();
        config.softbus.base_dir =
            std::env::temp_dir().join(format!("intention-test-{base_dir_suffix}")).to_string_lossy().into_owned();
        Self::new(config).await
    }

    async fn wire_session_cleanup(self: &Arc<Self>) {
        let services = Arc::clone(self);
        self.local_server
            .on_session_deleted(Arc::new(move |session: &Session| {
                services.listener_tokens.retain(|(fd, _, _), _| *fd != session.fd);
            }))
            .await;
    }

    /// Route every decoded packet to [`dispatch_request`] on its own task so
    /// one slow request can't stall the session's reader loop.
    async fn wire_dispatch(self: &Arc<Self>) {
        let services = Arc::clone(self);
        self.local_server
            .set_recv_fun(Arc::new(move |session: Arc<Session>, packet: NetPacket| {
                let services = Arc::clone(&services);
                tokio::spawn(async move { dispatch_request(&services, session, packet).await });
            }))
            .await;
    }

    /// Subscribe `session` to `event_type` under `handle_id`, matching the
    /// `(session, handle_id)` uniqueness the event dispatcher itself
    /// enforces. A no-op if already registered.
    pub fn register_listener(
        &self,
        dispatcher: &Arc<EventDispatcher>,
        event_type: EventType,
        session: &Arc<Session>,
        handle_id: i32,
    ) {
        let key = (session.fd, event_type, handle_id);
        self.listener_tokens
            .entry(key)
            .or_insert_with(|| dispatcher.add(event_type, session, handle_id));
    }

    /// Unsubscribe `(session, handle_id)`, or every handle for `session`
    /// when `handle_id` is `None` (wildcard removal).
    pub fn unregister_listener(
        &self,
        dispatcher: &Arc<EventDispatcher>,
        event_type: EventType,
        session: &Arc<Session>,
        handle_id: Option<i32>,
    ) {
        match handle_id {
            Some(h) => {
                self.listener_tokens.remove(&(session.fd, event_type, h));
            },
            None => {
                self.listener_tokens.retain(|(fd, ty, _), _| !(*fd == session.fd && *ty == event_type));
            },
        }
        dispatcher.remove(event_type, session, handle_id);
    }

    /// Realize `AllocSocketFd`/`AddSocketPairInfo` (§4.3): create a fresh
    /// local session for `program_name`, returning the peer-side raw fd the
    /// out-of-scope IPC gateway hands back to the requesting client process.
    pub async fn alloc_socket_fd(
        &self,
        program_name: String,
        uid: u32,
        pid: i32,
        token_type: TokenType,
    ) -> std::io::Result<std::os::fd::RawFd> {
        self.local_server.add_socket_pair_info(program_name, uid, pid, token_type).await
    }

    pub async fn shutdown(&self) {
        self.softbus.disable().await;
        self.local_server.shutdown().await;
    }
}
