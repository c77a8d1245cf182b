// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logging stand-ins for the two external collaborators the drag state
//! machine depends on but never implements itself: the shadow/SVG renderer
//! and the input-subsystem interceptor (§1 lists both as out of scope,
//! specified here only by their contract with the core).
//!
//! Production wiring with a real renderer or input subsystem would provide
//! its own [`ShadowRenderer`]/[`InputInterceptor`] implementation in its
//! place; these stand-ins let the server run standalone and make every
//! sequencing decision the state machine makes observable via `tracing`.

use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;

use crate::{
    drag::{
        state_machine::{InputInterceptor, ShadowRenderer},
        types::{
            DragCursorStyle, DragData, ExtraData, PointerSourceMask, PreviewStyle, ShadowInfo,
        },
    },
    error::Result,
};

#[derive(Default)]
pub struct LoggingShadowRenderer;

impl ShadowRenderer for LoggingShadowRenderer {
    fn init(&self, data: &DragData) -> Result<()> {
        debug!(ud_key = %data.ud_key, "shadow renderer init");
        Ok(())
    }

    fn draw(&self, display_id: i32, display_x: i32, display_y: i32) -> Result<()> {
        debug!(display_id, display_x, display_y, "shadow renderer draw");
        Ok(())
    }

    fn on_drag_move(&self, display_id: i32, display_x: i32, display_y: i32, action_time: i64) {
        debug!(display_id, display_x, display_y, action_time, "shadow renderer move");
    }

    fn update_drag_style(&self, style: DragCursorStyle) {
        debug!(?style, "shadow renderer style update");
    }

    fn update_shadow_pic(&self, _shadow: ShadowInfo) {
        debug!("shadow renderer shadow pic update");
    }

    fn update_preview_style(&self, _style: PreviewStyle) {
        debug!("shadow renderer preview style update");
    }

    fn update_preview_style_with_animation(&self, _style: PreviewStyle, animation_duration_ms: u32) {
        debug!(animation_duration_ms, "shadow renderer preview style update (animated)");
    }

    fn rotate_drag_window(&self, rotation: i32) {
        debug!(rotation, "shadow renderer rotate");
    }

    fn enter_text_editor_area(&self, enable: bool) {
        debug!(enable, "shadow renderer text editor area");
    }

    fn on_drag_success(&self) {
        debug!("shadow renderer drag success");
    }

    fn on_drag_fail(&self) {
        debug!("shadow renderer drag fail");
    }

    fn destroy_window(&self) {
        debug!("shadow renderer destroy window");
    }

    fn set_drag_window_visible(&self, visible: bool) {
        debug!(visible, "shadow renderer set visible");
    }
}

pub struct LoggingInputInterceptor {
    next_handle: AtomicI32,
}

impl Default for LoggingInputInterceptor {
    fn default() -> Self {
        Self { next_handle: AtomicI32::new(1) }
    }
}

impl InputInterceptor for LoggingInputInterceptor {
    fn register_pointer_interceptor(&self, priority: i32, mask: PointerSourceMask) -> Result<i32> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!(priority, ?mask, handle, "register pointer interceptor");
        Ok(handle)
    }

    fn unregister_pointer_interceptor(&self, handle: i32) {
        debug!(handle, "unregister pointer interceptor");
    }

    fn register_key_monitor(&self) -> Result<i32> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!(handle, "register key monitor");
        Ok(handle)
    }

    fn unregister_key_monitor(&self, handle: i32) {
        debug!(handle, "unregister key monitor");
    }

    fn append_extra_data(&self, data: ExtraData) -> Result<()> {
        debug!(appended = data.appended, "append extra data");
        Ok(())
    }

    fn hide_pointer(&self) -> Result<()> {
        debug!("hide pointer");
        Ok(())
    }

    fn restore_pointer(&self) -> Result<()> {
        debug!("restore pointer");
        Ok(())
    }
}
