// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Cross-device drag-and-drop: a single-owner drag state machine coupled to
//! an external shadow renderer and input-interceptor collaborator.

pub mod data_store;
pub mod state_machine;
pub mod stub;
pub mod types;

pub use data_store::DragDataStore;
pub use state_machine::{DragStateMachine, InputInterceptor, ShadowRenderer};
pub use stub::{LoggingInputInterceptor, LoggingShadowRenderer};
pub use types::{
    DisplayTopology, DragAction, DragCursorStyle, DragData, DragResult, DragState, DropResult,
    ExtraData, PointerAction, PointerEvent, PointerSourceMask, PreviewStyle, PreviewType,
    ShadowInfo, ShadowOffset, SourceType,
};
