// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Result, ServiceError};

bitflags::bitflags! {
    /// Input-source capabilities a pointer interceptor filters on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PointerSourceMask: u8 {
        const POINTER = 0x01;
        const TOUCH = 0x02;
        const TABLET_TOOL = 0x04;
    }
}

impl PointerSourceMask {
    pub fn for_source(source: SourceType) -> Self {
        match source {
            SourceType::Mouse => Self::POINTER,
            SourceType::Touchscreen => Self::TOUCH | Self::TABLET_TOOL,
        }
    }
}

bitflags::bitflags! {
    /// Which fields of a [`PreviewStyle`] a caller is updating.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PreviewType: u8 {
        const FG_COLOR = 0x01;
        const OPACITY = 0x02;
        const RADIUS = 0x04;
        const SCALE = 0x08;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Mouse,
    Touchscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragState {
    Error,
    Start,
    Stop,
    Cancel,
    MotionDragging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragCursorStyle {
    Default = 0,
    Forbidden,
    Copy,
    Move,
}

impl TryFrom<i32> for DragCursorStyle {
    type Error = ServiceError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::Forbidden),
            2 => Ok(Self::Copy),
            3 => Ok(Self::Move),
            other => Err(ServiceError::InvalidParam(format!("drag cursor style {other}"))),
        }
    }
}

/// Post-hoc classification of a successful drop: whether the data was
/// copied into the target or moved out of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragAction {
    Copy,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragResult {
    Success,
    Fail,
    Cancel,
    Exception,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowOffset {
    pub x: i32,
    pub y: i32,
}

/// A shared, reference-counted shadow pixmap plus its rendering offset.
/// May outlive the renderer during teardown, hence the `Bytes` (cheap clone,
/// shared backing storage) rather than an owned `Vec<u8>`.
#[derive(Debug, Clone)]
pub struct ShadowInfo {
    pub pixel_map: Bytes,
    pub offset: ShadowOffset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewStyle {
    pub types: PreviewType,
    pub foreground_color: u32,
    pub opacity: f32,
    pub radius: f32,
    pub scale: f32,
}

impl Default for PreviewStyle {
    fn default() -> Self {
        Self {
            types: PreviewType::empty(),
            foreground_color: 0,
            opacity: 1.0,
            radius: 0.0,
            scale: 1.0,
        }
    }
}

pub const MAX_SUMMARY_ENTRIES: usize = 200;
pub const MAX_BUFFER_LEN: usize = 512;
pub const MAX_UD_KEY_LEN: usize = 100;

/// The payload carried by an in-progress drag. Validated at `start_drag`
/// time: non-empty pixmap, `summaries.len() <= 200`, `ud_key.len() <= 100`.
#[derive(Debug, Clone)]
pub struct DragData {
    pub shadow_pixelmap: Bytes,
    pub shadow_offset: ShadowOffset,
    pub buffer: Vec<u8>,
    pub ud_key: String,
    pub extra_info: String,
    pub filter_info: String,
    pub summaries: HashMap<String, i64>,
    pub source_type: SourceType,
    pub drag_num: i32,
    pub pointer_id: i32,
    pub display_id: i32,
    pub display_x: i32,
    pub display_y: i32,
    pub has_canceled_animation: bool,
    pub main_window: i32,
}

impl DragData {
    pub fn validate(&self) -> Result<()> {
        if self.shadow_pixelmap.is_empty() {
            return Err(ServiceError::InvalidParam("shadow pixelmap is empty".into()));
        }
        if self.summaries.len() > MAX_SUMMARY_ENTRIES {
            return Err(ServiceError::InvalidParam("summaries exceeds 200 entries".into()));
        }
        if self.buffer.len() > MAX_BUFFER_LEN {
            return Err(ServiceError::InvalidParam("buffer exceeds 512 bytes".into()));
        }
        if self.ud_key.len() > MAX_UD_KEY_LEN {
            return Err(ServiceError::InvalidParam("udKey exceeds 100 chars".into()));
        }
        Ok(())
    }
}

/// Parameters of a completed (or aborted) drag, reported by the client that
/// owns the drop target.
#[derive(Debug, Clone, Copy)]
pub struct DropResult {
    pub result: DragResult,
    pub has_custom_animation: bool,
    pub main_window: i32,
    pub drag_behavior: DragAction,
}

/// The extra-data record appended to (or withdrawn from) the external input
/// subsystem while a drag interceptor is registered.
#[derive(Debug, Clone)]
pub struct ExtraData {
    pub buffer: Vec<u8>,
    pub source_type: SourceType,
    pub pointer_id: i32,
    pub appended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    Move,
    PullMove,
    PullUp,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct PointerEvent {
    pub source: SourceType,
    pub action: PointerAction,
    pub display_id: i32,
    pub display_x: i32,
    pub display_y: i32,
    pub action_time: i64,
}

/// Tells the drag state machine how to remap a display id during a
/// cross-screen rotation handoff, without the state machine needing to know
/// how displays are enumerated.
pub trait DisplayTopology: Send + Sync {
    fn is_embedded_display(&self, display_id: i32) -> bool;

    fn default_display_id(&self) -> i32;
}

/// A topology with no embedded displays; every surface folds back onto the
/// default display. Suitable for single-screen test environments.
pub struct FlatDisplayTopology {
    pub default_display_id: i32,
}

impl DisplayTopology for FlatDisplayTopology {
    fn is_embedded_display(&self, _display_id: i32) -> bool {
        false
    }

    fn default_display_id(&self) -> i32 {
        self.default_display_id
    }
}
