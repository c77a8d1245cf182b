// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request routing: decodes an inbound [`NetPacket`] by its
//! [`MessageId`] and calls into the drag or coordination state machine,
//! the two dispatchers' listener registries, or the soft-bus-backed drag
//! data store, replying on the same session where a reply is due.
//!
//! Marshalling itself — turning a client-visible request struct into wire
//! bytes — is the out-of-scope IPC gateway's job (§1); what's specified
//! here is only the dispatch *contract*: which `MessageId` reaches which
//! subsystem call. Request/response bodies are JSON (`serde_json`), the
//! same encoding already used for the coordination peer protocol (§4.8),
//! except where the original specifies a fixed binary layout (the
//! `DRAG_NOTIFY_RESULT` reply built directly in
//! [`crate::drag::state_machine::DragStateMachine::stop_drag`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    codec::NetPacket,
    coordination::CoordinationEvent,
    dispatch::EventType,
    drag::{DragCursorStyle, DragData, DropResult, ShadowInfo, ShadowOffset, SourceType},
    error::ServiceError,
    ipc::MessageId,
    services::Services,
    session::Session,
};

/// Wire mirror of [`DragData`]; `shadow_pixelmap` and `buffer` travel as
/// plain byte vectors rather than `bytes::Bytes` since `serde_json` has no
/// zero-copy representation for either.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartDragRequest {
    pub shadow_pixelmap: Vec<u8>,
    pub shadow_offset_x: i32,
    pub shadow_offset_y: i32,
    pub buffer: Vec<u8>,
    pub ud_key: String,
    #[serde(default)]
    pub extra_info: String,
    #[serde(default)]
    pub filter_info: String,
    #[serde(default)]
    pub summaries: std::collections::HashMap<String, i64>,
    pub source_type_is_mouse: bool,
    pub drag_num: i32,
    pub pointer_id: i32,
    pub display_id: i32,
    pub display_x: i32,
    pub display_y: i32,
    #[serde(default)]
    pub has_canceled_animation: bool,
    pub main_window: i32,
}

impl From<StartDragRequest> for DragData {
    fn from(r: StartDragRequest) -> Self {
        DragData {
            shadow_pixelmap: bytes::Bytes::from(r.shadow_pixelmap),
            shadow_offset: ShadowOffset { x: r.shadow_offset_x, y: r.shadow_offset_y },
            buffer: r.buffer,
            ud_key: r.ud_key,
            extra_info: r.extra_info,
            filter_info: r.filter_info,
            summaries: r.summaries,
            source_type: if r.source_type_is_mouse { SourceType::Mouse } else { SourceType::Touchscreen },
            drag_num: r.drag_num,
            pointer_id: r.pointer_id,
            display_id: r.display_id,
            display_x: r.display_x,
            display_y: r.display_y,
            has_canceled_animation: r.has_canceled_animation,
            main_window: r.main_window,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopDragRequest {
    pub result: u8,
    pub has_custom_animation: bool,
    pub main_window: i32,
    pub drag_behavior_is_copy: bool,
}

impl TryFrom<StopDragRequest> for DropResult {
    type Error = ServiceError;

    fn try_from(r: StopDragRequest) -> Result<Self, Self::Error> {
        use crate::drag::{DragAction, DragResult};
        let result = match r.result {
            0 => DragResult::Success,
            1 => DragResult::Fail,
            2 => DragResult::Cancel,
            3 => DragResult::Exception,
            other => return Err(ServiceError::InvalidParam(format!("drag result {other}"))),
        };
        Ok(DropResult {
            result,
            has_custom_animation: r.has_custom_animation,
            main_window: r.main_window,
            drag_behavior: if r.drag_behavior_is_copy { DragAction::Copy } else { DragAction::Move },
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateDragStyleRequest {
    pub style: i32,
    pub target_pid: i32,
    pub target_tid: i32,
    pub event_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetDragWindowVisibleRequest {
    pub visible: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateShadowPicRequest {
    pub pixel_map: Vec<u8>,
    pub offset_x: i32,
    pub offset_y: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartCoordinationRequest {
    pub user_data: i32,
    pub remote_network_id: String,
    pub start_device_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopCoordinationRequest {
    pub user_data: i32,
    #[serde(default)]
    pub is_unchained: bool,
}

fn json_payload<T: for<'a> Deserialize<'a>>(packet: &NetPacket) -> Result<T, ServiceError> {
    serde_json::from_slice(&packet.payload)
        .map_err(|e| ServiceError::InvalidParam(format!("malformed request payload: {e}")))
}

fn reply_ok(session: &Arc<Session>, msg_id: i32, body: &impl Serialize) {
    match serde_json::to_vec(body) {
        Ok(payload) => {
            if let Err(e) = session.send_msg(msg_id, &payload) {
                warn!(error = %e, fd = session.fd, msg_id, "failed to deliver reply");
            }
        },
        Err(e) => warn!(error = %e, msg_id, "failed to encode reply"),
    }
}

fn reply_err(session: &Arc<Session>, msg_id: i32, err: &ServiceError) {
    reply_ok(session, msg_id, &serde_json::json!({ "error": err.to_string() }));
}

/// Route one decoded inbound packet from `session` through the subsystem
/// its `msg_id` belongs to. Never panics and never propagates an error out
/// of the reader loop that calls it — per-request failures are reported
/// back to the session (or logged, for fire-and-forget requests) instead.
pub async fn dispatch_request(services: &Arc<Services>, session: Arc<Session>, packet: NetPacket) {
    let Ok(id) = MessageId::try_from(packet.msg_id) else {
        warn!(msg_id = packet.msg_id, "dropping packet with unknown message id");
        return;
    };

    match id {
        MessageId::DevicestatusSubscribe
        | MessageId::DevicestatusUnsubscribe
        | MessageId::DevicestatusGetCache => {
            // The devicestatus subscription subsystem behind these ids is an
            // external collaborator (§1); this server only allocates the id
            // range and reports that it isn't implemented here.
            reply_err(
                &session,
                id.as_i32(),
                &ServiceError::InvalidParam("devicestatus subsystem not hosted by this service".into()),
            );
        },

        MessageId::RegisterCoordinationMonitor => {
            services.register_listener(
                services.event_manager.dispatcher(),
                EventType::CoordinationState,
                &session,
                session.fd,
            );
        },
        MessageId::UnregisterCoordinationMonitor => {
            services.unregister_listener(
                services.event_manager.dispatcher(),
                EventType::CoordinationState,
                &session,
                Some(session.fd),
            );
        },

        MessageId::PrepareCoordination => {
            if let Err(e) = services.softbus.enable().await {
                warn!(error = %e, "soft-bus enable failed during PrepareCoordination");
            }
        },
        MessageId::UnprepareCoordination => {
            services.softbus.disable().await;
        },

        MessageId::StartCoordination => {
            let req: StartCoordinationRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            services.event_manager.register_waiting_client(session.pid, &session);
            let _ = services
                .coordination
                .start_cooperate(session.pid, req.user_data, &req.remote_network_id, req.start_device_id)
                .await;
        },
        MessageId::StopCoordination => {
            let req: StopCoordinationRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            services.event_manager.register_waiting_client(session.pid, &session);
            let _ = services
                .coordination
                .stop_input_device_cooperate(session.pid, req.user_data, req.is_unchained)
                .await;
        },
        MessageId::GetCoordinationState => {
            let state = services.coordination.state().await;
            services.event_manager.register_waiting_client(session.pid, &session);
            services.event_manager.notify_state(CoordinationEvent {
                pid: session.pid,
                user_data: 0,
                network_id: String::new(),
                message: crate::coordination::CoordinationMessage::PrepareSuccess.into(),
                state: Some(state.into()),
            });
        },

        MessageId::UpdatedDragStyle => {
            let req: UpdateDragStyleRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            let style = match DragCursorStyle::try_from(req.style) {
                Ok(s) => s,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            if let Err(e) = services
                .drag
                .update_drag_style(style, req.target_pid, req.target_tid, req.event_id)
                .await
            {
                warn!(error = %e, "update_drag_style rejected");
            }
        },

        MessageId::StartDrag => {
            let req: StartDragRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            if let Err(e) = services.drag.start_drag(req.into(), Arc::clone(&session)).await {
                reply_err(&session, id.as_i32(), &e);
            }
        },
        MessageId::StopDrag => {
            let req: StopDragRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            let drop_result = match DropResult::try_from(req) {
                Ok(d) => d,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            if let Err(e) = services.drag.stop_drag(drop_result).await {
                reply_err(&session, id.as_i32(), &e);
            }
        },
        MessageId::GetDragTargetPid => {
            let pid = services.drag.data_store().target_pid();
            let _ = session.send_msg(id.as_i32(), &pid.to_le_bytes());
        },
        MessageId::GetDragTargetUdkey => {
            let ud_key = services.drag.data_store().data().map(|d| d.ud_key).unwrap_or_default();
            let _ = session.send_msg(id.as_i32(), ud_key.as_bytes());
        },
        MessageId::RegisterDragMonitor => {
            services.register_listener(
                &services.drag_dispatcher,
                EventType::DragState,
                &session,
                session.fd,
            );
            services.register_listener(
                &services.drag_dispatcher,
                EventType::DragStyle,
                &session,
                session.fd,
            );
        },
        MessageId::UnregisterDragMonitor => {
            services.unregister_listener(
                &services.drag_dispatcher,
                EventType::DragState,
                &session,
                Some(session.fd),
            );
            services.unregister_listener(
                &services.drag_dispatcher,
                EventType::DragStyle,
                &session,
                Some(session.fd),
            );
        },
        MessageId::SetDragWindowVisible => {
            let req: SetDragWindowVisibleRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            if let Err(e) = services.drag.set_drag_window_visible(req.visible, req.force).await {
                reply_err(&session, id.as_i32(), &e);
            }
        },
        MessageId::GetShadowOffset => {
            let offset = services.drag.data_store().get_shadow_offset();
            let mut payload = Vec::with_capacity(8);
            payload.extend_from_slice(&offset.x.to_le_bytes());
            payload.extend_from_slice(&offset.y.to_le_bytes());
            let _ = session.send_msg(id.as_i32(), &payload);
        },
        MessageId::UpdateShadowPic => {
            let req: UpdateShadowPicRequest = match json_payload(&packet) {
                Ok(r) => r,
                Err(e) => return reply_err(&session, id.as_i32(), &e),
            };
            let shadow = ShadowInfo {
                pixel_map: bytes::Bytes::from(req.pixel_map),
                offset: ShadowOffset { x: req.offset_x, y: req.offset_y },
            };
            if let Err(e) = services.drag.update_shadow_pic(shadow).await {
                reply_err(&session, id.as_i32(), &e);
            }
        },

        MessageId::AllocSocketFd => {
            // This id is carried on the control channel the out-of-scope
            // gateway already has open to the client; by the time a
            // request reaches here over a `Session` one already exists.
            // Nothing to allocate on an already-open session.
            warn!(fd = session.fd, "AllocSocketFd received on an already-open session; ignoring");
        },
    }
}
