// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

use crate::drag::types::{DragCursorStyle, DragData, PreviewStyle, ShadowInfo, ShadowOffset};

struct State {
    data: Option<DragData>,
    style: DragCursorStyle,
    shadow: Option<ShadowInfo>,
    visible: bool,
    target_pid: i32,
    target_tid: i32,
    preview_style: PreviewStyle,
}

impl Default for State {
    fn default() -> Self {
        Self {
            data: None,
            style: DragCursorStyle::Default,
            shadow: None,
            visible: false,
            target_pid: -1,
            target_tid: -1,
            preview_style: PreviewStyle::default(),
        }
    }
}

/// Single-owner container for the active drag. Every accessor takes the
/// same coarse-grained lock; the state this guards is small and mutated
/// one field at a time, so a single `Mutex` is simpler and just as fast as
/// splitting it up, matching the original's single-lock design.
pub struct DragDataStore {
    state: Mutex<State>,
}

impl Default for DragDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DragDataStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    pub fn init(&self, data: DragData) {
        let mut state = self.state.lock().expect("drag data store poisoned");
        state.data = Some(data);
        state.style = DragCursorStyle::Default;
        state.visible = true;
        state.target_pid = -1;
        state.target_tid = -1;
        state.preview_style = PreviewStyle::default();
    }

    pub fn reset(&self) {
        *self.state.lock().expect("drag data store poisoned") = State::default();
    }

    pub fn data(&self) -> Option<DragData> {
        self.state.lock().expect("drag data store poisoned").data.clone()
    }

    pub fn set_style(&self, style: DragCursorStyle) {
        self.state.lock().expect("drag data store poisoned").style = style;
    }

    pub fn get_style(&self) -> DragCursorStyle {
        self.state.lock().expect("drag data store poisoned").style
    }

    pub fn set_shadow(&self, shadow: ShadowInfo) {
        self.state.lock().expect("drag data store poisoned").shadow = Some(shadow);
    }

    pub fn get_shadow_offset(&self) -> ShadowOffset {
        self.state
            .lock()
            .expect("drag data store poisoned")
            .shadow
            .as_ref()
            .map(|s| s.offset)
            .unwrap_or_default()
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.lock().expect("drag data store poisoned").visible = visible;
    }

    pub fn get_visible(&self) -> bool {
        self.state.lock().expect("drag data store poisoned").visible
    }

    pub fn set_target_pid(&self, pid: i32) {
        self.state.lock().expect("drag data store poisoned").target_pid = pid;
    }

    pub fn target_pid(&self) -> i32 {
        self.state.lock().expect("drag data store poisoned").target_pid
    }

    pub fn set_target_tid(&self, tid: i32) {
        self.state.lock().expect("drag data store poisoned").target_tid = tid;
    }

    pub fn target_tid(&self) -> i32 {
        self.state.lock().expect("drag data store poisoned").target_tid
    }

    pub fn set_preview_style(&self, style: PreviewStyle) {
        self.state.lock().expect("drag data store poisoned").preview_style = style;
    }

    pub fn get_preview_style(&self) -> PreviewStyle {
        self.state.lock().expect("drag data store poisoned").preview_style
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::drag::types::SourceType;

    fn sample_data() -> DragData {
        DragData {
            shadow_pixelmap: Bytes::from_static(b"pixels"),
            shadow_offset: ShadowOffset { x: 1, y: 2 },
            buffer: Vec::new(),
            ud_key: "k".to_string(),
            extra_info: String::new(),
            filter_info: String::new(),
            summaries: Default::default(),
            source_type: SourceType::Mouse,
            drag_num: 1,
            pointer_id: 0,
            display_id: 0,
            display_x: 0,
            display_y: 0,
            has_canceled_animation: false,
            main_window: 1,
        }
    }

    #[test]
    fn init_resets_style_and_makes_the_shadow_visible() {
        let store = DragDataStore::new();
        store.set_style(DragCursorStyle::Copy);
        store.init(sample_data());
        assert_eq!(store.get_style(), DragCursorStyle::Default);
        assert!(store.get_visible());
    }

    #[test]
    fn reset_clears_every_field() {
        let store = DragDataStore::new();
        store.init(sample_data());
        store.set_target_pid(42);
        store.reset();
        assert_eq!(store.target_pid(), -1);
        assert!(store.data().is_none());
    }

    #[test]
    fn init_defaults_target_pid_and_tid_to_negative_one() {
        let store = DragDataStore::new();
        store.init(sample_data());
        assert_eq!(store.target_pid(), -1);
        assert_eq!(store.target_tid(), -1);
    }

    #[test]
    fn shadow_offset_defaults_when_unset() {
        let store = DragDataStore::new();
        let offset = store.get_shadow_offset();
        assert_eq!((offset.x, offset.y), (0, 0));
    }
}
