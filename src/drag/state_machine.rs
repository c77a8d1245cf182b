// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering},
};

use once_cell::sync::OnceCell;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    dispatch::{EventDispatcher, EventType},
    drag::{
        data_store::DragDataStore,
        types::{
            DisplayTopology, DragAction, DragCursorStyle, DragData, DragResult, DragState,
            DropResult, ExtraData, PointerAction, PointerEvent, PointerSourceMask, PreviewStyle,
            ShadowInfo, ShadowOffset, SourceType,
        },
    },
    error::{Result, ServiceError},
    ipc::MessageId,
    session::Session,
};

/// Wall-clock duration a drag can sit in the post-pull-up window before the
/// state machine forces an exception stop, matching a client that never
/// reports a drop result.
pub const STOP_DRAG_TIMEOUT_MS: u64 = 3000;

/// Wall-clock duration the pre-drag mouse-drag-monitor window stays armed
/// before it self-disarms, matching a caller that never follows through
/// with `start_drag`.
pub const MOUSE_DRAG_MONITOR_TIMEOUT_MS: u64 = 3000;

/// External collaborator responsible for the visible drag shadow. The state
/// machine never draws anything itself; it only sequences calls into this
/// trait in the right order and rolls them back on failure.
pub trait ShadowRenderer: Send + Sync {
    fn init(&self, data: &DragData) -> Result<()>;

    fn draw(&self, display_id: i32, display_x: i32, display_y: i32) -> Result<()>;

    fn on_drag_move(&self, display_id: i32, display_x: i32, display_y: i32, action_time: i64);

    fn update_drag_style(&self, style: DragCursorStyle);

    fn update_shadow_pic(&self, shadow: ShadowInfo);

    fn update_preview_style(&self, style: PreviewStyle);

    fn update_preview_style_with_animation(&self, style: PreviewStyle, animation_duration_ms: u32);

    fn rotate_drag_window(&self, rotation: i32);

    fn enter_text_editor_area(&self, enable: bool);

    fn on_drag_success(&self);

    fn on_drag_fail(&self);

    fn destroy_window(&self);

    fn set_drag_window_visible(&self, visible: bool);
}

/// External collaborator fronting the input subsystem: pointer interceptor
/// registration, key monitoring, and the extra-data append/withdraw used to
/// mark a pointer stream as "carrying a drag" to other listeners.
pub trait InputInterceptor: Send + Sync {
    fn register_pointer_interceptor(&self, priority: i32, mask: PointerSourceMask) -> Result<i32>;

    fn unregister_pointer_interceptor(&self, handle: i32);

    fn register_key_monitor(&self) -> Result<i32>;

    fn unregister_key_monitor(&self, handle: i32);

    fn append_extra_data(&self, data: ExtraData) -> Result<()>;

    fn hide_pointer(&self) -> Result<()>;

    fn restore_pointer(&self) -> Result<()>;
}

/// One rollback step pushed while `start_drag` acquires resources; drained
/// in reverse on any later failure so partially-acquired state never leaks.
type UndoAction = Box<dyn FnOnce() + Send>;

struct DragHandles {
    pointer: Option<i32>,
    key: Option<i32>,
}

struct MouseDragMonitor {
    last_position: (i32, i32),
    existing_move: bool,
}

/// Owns a single in-progress drag. At most one `Services` context runs one
/// of these; the public contract mirrors the original synchronous API but
/// every entry point takes `&self` and is safe to call concurrently — all
/// mutable state lives behind the async mutex below.
pub struct DragStateMachine {
    renderer: Arc<dyn ShadowRenderer>,
    input: Arc<dyn InputInterceptor>,
    topology: Arc<dyn DisplayTopology>,
    dispatcher: Arc<EventDispatcher>,
    store: DragDataStore,

    state: AsyncMutex<DragState>,
    handles: AsyncMutex<DragHandles>,
    out_session: AsyncMutex<Option<Arc<Session>>>,
    mouse_monitor: AsyncMutex<Option<MouseDragMonitor>>,
    mouse_monitor_timeout: AsyncMutex<Option<CancellationToken>>,
    stop_timeout: AsyncMutex<Option<CancellationToken>>,
    drag_action: AsyncMutex<DragAction>,
    base_style: AsyncMutex<DragCursorStyle>,
    last_notified_action: AsyncMutex<Option<DragAction>>,

    last_event_id: AtomicI32,
    filter_time: AtomicI64,
    is_control_multi_screen_visible: AtomicBool,
    current_source: AtomicI32,

    stop_drag_timeout_dur: tokio::time::Duration,
    mouse_monitor_timeout_dur: tokio::time::Duration,

    /// Set once by [`Self::attach_self`] so the stop-drag timeout task can
    /// call back into `stop_drag` without the caller threading an `Arc`
    /// through every pointer-event callback.
    self_weak: OnceCell<Weak<DragStateMachine>>,
}

const SOURCE_NONE: i32 = -1;
const SOURCE_MOUSE: i32 = 0;
const SOURCE_TOUCH: i32 = 1;

impl DragStateMachine {
    /// Builds a machine using the default 3000 ms stop-drag and
    /// mouse-drag-monitor timeouts (§5). Production wiring should prefer
    /// [`Self::with_timeouts`] so the durations come from `Config`.
    pub fn new(
        renderer: Arc<dyn ShadowRenderer>,
        input: Arc<dyn InputInterceptor>,
        topology: Arc<dyn DisplayTopology>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self::with_timeouts(
            renderer,
            input,
            topology,
            dispatcher,
            tokio::time::Duration::from_millis(STOP_DRAG_TIMEOUT_MS),
            tokio::time::Duration::from_millis(MOUSE_DRAG_MONITOR_TIMEOUT_MS),
        )
    }

    pub fn with_timeouts(
        renderer: Arc<dyn ShadowRenderer>,
        input: Arc<dyn InputInterceptor>,
        topology: Arc<dyn DisplayTopology>,
        dispatcher: Arc<EventDispatcher>,
        stop_drag_timeout_dur: tokio::time::Duration,
        mouse_monitor_timeout_dur: tokio::time::Duration,
    ) -> Self {
        Self {
            renderer,
            input,
            topology,
            dispatcher,
            store: DragDataStore::new(),
            state: AsyncMutex::new(DragState::Stop),
            handles: AsyncMutex::new(DragHandles { pointer: None, key: None }),
            out_session: AsyncMutex::new(None),
            mouse_monitor: AsyncMutex::new(None),
            mouse_monitor_timeout: AsyncMutex::new(None),
            stop_timeout: AsyncMutex::new(None),
            drag_action: AsyncMutex::new(DragAction::Move),
            base_style: AsyncMutex::new(DragCursorStyle::Default),
            last_notified_action: AsyncMutex::new(None),
            last_event_id: AtomicI32::new(i32::MIN),
            filter_time: AtomicI64::new(0),
            is_control_multi_screen_visible: AtomicBool::new(false),
            current_source: AtomicI32::new(SOURCE_NONE),
            stop_drag_timeout_dur,
            mouse_monitor_timeout_dur,
        }
    }

    pub async fn state(&self) -> DragState {
        *self.state.lock().await
    }

    pub fn data_store(&self) -> &DragDataStore {
        &self.store
    }

    /// Binds the weak self-reference the stop-drag timeout task needs to
    /// call back into `stop_drag`. Must be called exactly once, right after
    /// construction, before the `Arc` is shared with anything else.
    pub fn attach_self(self: &Arc<Self>) {
        let _ = self.self_weak.set(Arc::downgrade(self));
    }

    /// Begin a new drag. Fails with [`ServiceError::Busy`] unless the
    /// machine is currently `STOP`; fails with
    /// [`ServiceError::InvalidParam`] if `data` does not pass validation.
    /// Every setup step pushes its rollback onto a guard stack so a later
    /// failure unwinds everything acquired so far, in reverse order.
    pub async fn start_drag(&self, data: DragData, out_session: Arc<Session>) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != DragState::Stop {
            return Err(ServiceError::Busy("start_drag: drag already in progress"));
        }
        data.validate()?;

        let source = data.source_type;
        let display_id = data.display_id;
        let (display_x, display_y) = if source == SourceType::Mouse {
            match self.mouse_monitor.lock().await.as_ref() {
                Some(monitor) if monitor.existing_move => monitor.last_position,
                _ => (data.display_x, data.display_y),
            }
        } else {
            (data.display_x, data.display_y)
        };

        self.store.init(data.clone());
        let mut undo: Vec<UndoAction> = Vec::new();
        let mut pointer_handle = None;
        let mut key_handle = None;

        let result: Result<()> = (|| -> Result<()> {
            let mask = PointerSourceMask::for_source(source);
            let handle = self.input.register_pointer_interceptor(500, mask)?;
            pointer_handle = Some(handle);
            {
                let input = Arc::clone(&self.input);
                undo.push(Box::new(move || input.unregister_pointer_interceptor(handle)));
            }

            let handle = self.input.register_key_monitor()?;
            key_handle = Some(handle);
            {
                let input = Arc::clone(&self.input);
                undo.push(Box::new(move || input.unregister_key_monitor(handle)));
            }

            self.input.append_extra_data(ExtraData {
                buffer: data.buffer.clone(),
                source_type: source,
                pointer_id: data.pointer_id,
                appended: true,
            })?;
            {
                let input = Arc::clone(&self.input);
                let source_type = source;
                let pointer_id = data.pointer_id;
                undo.push(Box::new(move || {
                    let _ = input.append_extra_data(ExtraData {
                        buffer: Vec::new(),
                        source_type,
                        pointer_id,
                        appended: false,
                    });
                }));
            }

            self.renderer.init(&data)?;
            {
                let renderer = Arc::clone(&self.renderer);
                undo.push(Box::new(move || renderer.destroy_window()));
            }
            self.renderer.draw(display_id, display_x, display_y)?;

            if source == SourceType::Mouse {
                self.input.hide_pointer()?;
            }

            Ok(())
        })();

        if let Err(e) = result {
            while let Some(step) = undo.pop() {
                step();
            }
            self.store.reset();
            *state = DragState::Stop;
            return Err(e);
        }

        *self.handles.lock().await = DragHandles { pointer: pointer_handle, key: key_handle };

        self.current_source.store(
            if source == SourceType::Mouse { SOURCE_MOUSE } else { SOURCE_TOUCH },
            Ordering::SeqCst,
        );
        *self.base_style.lock().await = DragCursorStyle::Default;
        *self.drag_action.lock().await = DragAction::Move;
        *self.last_notified_action.lock().await = None;
        *self.out_session.lock().await = Some(out_session);
        if source == SourceType::Mouse {
            // Preserve a position already recorded by an active pre-drag
            // mouse-drag-monitor window; only seed a fresh one if none was armed.
            let mut monitor = self.mouse_monitor.lock().await;
            if monitor.is_none() {
                *monitor =
                    Some(MouseDragMonitor { last_position: (display_x, display_y), existing_move: false });
            }
        } else {
            if let Some(token) = self.mouse_monitor_timeout.lock().await.take() {
                token.cancel();
            }
            *self.mouse_monitor.lock().await = None;
        }

        *state = DragState::Start;
        drop(state);

        self.dispatcher.emit(EventType::DragState, MessageId::RegisterDragMonitor.as_i32(), &[
            DragState::Start as u8,
        ]);
        info!("drag started");
        Ok(())
    }

    /// End the current drag and report `drop_result` to the client that
    /// initiated it. Requires a drag in progress.
    pub async fn stop_drag(&self, drop_result: DropResult) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == DragState::Stop {
            return Err(ServiceError::Busy("stop_drag: no drag in progress"));
        }

        if let Some(token) = self.stop_timeout.lock().await.take() {
            token.cancel();
        }

        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.pointer.take() {
            self.input.unregister_pointer_interceptor(h);
        }
        if let Some(h) = handles.key.take() {
            self.input.unregister_key_monitor(h);
        }
        drop(handles);

        let source = self.current_source.load(Ordering::SeqCst);
        let _ = self.input.append_extra_data(ExtraData {
            buffer: Vec::new(),
            source_type: SourceType::Mouse,
            pointer_id: 0,
            appended: false,
        });
        if source == SOURCE_MOUSE {
            let _ = self.input.restore_pointer();
        }

        match (drop_result.result, drop_result.has_custom_animation) {
            (DragResult::Success, false) => self.renderer.on_drag_success(),
            (DragResult::Success, true) => self.renderer.destroy_window(),
            (DragResult::Fail, false) | (DragResult::Cancel, false) => self.renderer.on_drag_fail(),
            (DragResult::Fail, true) | (DragResult::Cancel, true) => self.renderer.destroy_window(),
            (DragResult::Exception, _) => self.renderer.destroy_window(),
        }

        let behavior = self.compute_drag_behavior(drop_result).await;
        let data = self.store.data();
        if let (Some(session), Some(data)) = (self.out_session.lock().await.take(), data) {
            let mut payload = Vec::with_capacity(20);
            payload.extend_from_slice(&data.display_x.to_le_bytes());
            payload.extend_from_slice(&data.display_y.to_le_bytes());
            payload.push(drop_result.result as u8);
            payload.extend_from_slice(&self.store.target_pid().to_le_bytes());
            payload.push(behavior as u8);
            if let Err(e) = session.send_msg(MessageId::StopDrag.as_i32(), &payload) {
                warn!(error = %e, "failed to notify drag result to owning session");
            }
        }

        self.dispatcher.emit(EventType::DragState, MessageId::RegisterDragMonitor.as_i32(), &[
            DragState::Stop as u8,
        ]);

        self.store.reset();
        self.current_source.store(SOURCE_NONE, Ordering::SeqCst);
        if let Some(token) = self.mouse_monitor_timeout.lock().await.take() {
            token.cancel();
        }
        *self.mouse_monitor.lock().await = None;
        *state = DragState::Stop;
        Ok(())
    }

    async fn compute_drag_behavior(&self, drop_result: DropResult) -> DragAction {
        if drop_result.result != DragResult::Success {
            return drop_result.drag_behavior;
        }
        if self.store.get_style() == DragCursorStyle::Copy {
            return DragAction::Copy;
        }
        if *self.drag_action.lock().await == DragAction::Copy {
            return DragAction::Copy;
        }
        let data_main_window = self.store.data().map(|d| d.main_window);
        match data_main_window {
            Some(main_window) if main_window == drop_result.main_window => DragAction::Move,
            _ => DragAction::Copy,
        }
    }

    /// Apply a style update from `event_id`, dropping it if it is stale
    /// relative to the last accepted `event_id`.
    pub async fn update_drag_style(
        &self,
        style: DragCursorStyle,
        target_pid: i32,
        target_tid: i32,
        event_id: i32,
    ) -> Result<()> {
        let last = self.last_event_id.load(Ordering::SeqCst);
        if event_id < last {
            return Err(ServiceError::Busy("update_drag_style: stale event_id"));
        }
        self.last_event_id.store(event_id, Ordering::SeqCst);

        let pid_changed = self.store.target_pid() != target_pid;
        self.store.set_target_pid(target_pid);
        self.store.set_target_tid(target_tid);

        let unchanged = self.store.get_style() == style;
        if unchanged && !pid_changed {
            return Ok(());
        }

        *self.base_style.lock().await = style;
        self.store.set_style(style);

        let effective = if *self.drag_action.lock().await == DragAction::Copy
            && style == DragCursorStyle::Move
        {
            DragCursorStyle::Copy
        } else {
            style
        };
        self.renderer.update_drag_style(effective);
        self.dispatcher.emit(EventType::DragStyle, MessageId::UpdatedDragStyle.as_i32(), &[
            effective as u8,
        ]);
        Ok(())
    }

    pub async fn update_shadow_pic(&self, shadow: ShadowInfo) -> Result<()> {
        self.require_started().await?;
        self.store.set_shadow(shadow.clone());
        self.renderer.update_shadow_pic(shadow);
        Ok(())
    }

    pub async fn update_preview_style(&self, style: PreviewStyle) -> Result<()> {
        self.require_started().await?;
        if self.store.get_preview_style() == style {
            return Ok(());
        }
        self.store.set_preview_style(style);
        self.renderer.update_preview_style(style);
        Ok(())
    }

    pub async fn update_preview_style_with_animation(
        &self,
        style: PreviewStyle,
        animation_duration_ms: u32,
    ) -> Result<()> {
        self.require_started().await?;
        self.store.set_preview_style(style);
        self.renderer.update_preview_style_with_animation(style, animation_duration_ms);
        Ok(())
    }

    pub async fn rotate_drag_window(&self, rotation: i32) -> Result<()> {
        self.require_started().await?;
        self.renderer.rotate_drag_window(rotation);
        Ok(())
    }

    pub async fn enter_text_editor_area(&self, enable: bool) -> Result<()> {
        self.require_started().await?;
        self.renderer.enter_text_editor_area(enable);
        Ok(())
    }

    /// Change shadow-window visibility. A non-`force` call is rejected
    /// while a multi-screen coordinator owns visibility control.
    pub async fn set_drag_window_visible(&self, visible: bool, force: bool) -> Result<()> {
        self.require_started().await?;
        if !force && self.is_control_multi_screen_visible.load(Ordering::SeqCst) {
            return Err(ServiceError::Busy(
                "set_drag_window_visible: multi-screen coordinator owns visibility",
            ));
        }
        self.store.set_visible(visible);
        self.renderer.set_drag_window_visible(visible);
        Ok(())
    }

    pub fn set_control_multi_screen_visible(&self, controlled: bool) {
        self.is_control_multi_screen_visible.store(controlled, Ordering::SeqCst);
    }

    /// Discard any `PullMove` event whose `action_time` is at or before
    /// `t`, used to drop stale pointer events surviving a rotation or
    /// cross-device handoff.
    pub fn set_pointer_event_filter_time(&self, t: i64) {
        self.filter_time.store(t, Ordering::SeqCst);
    }

    /// Arm or disarm the pre-drag mouse-drag-monitor window. While armed,
    /// mouse `MOVE` events reaching [`Self::on_pointer_event`] update the
    /// recorded last position regardless of the current [`DragState`], so a
    /// later `start_drag` can seed its placement from the most recent mouse
    /// position. The window self-disarms after
    /// [`MOUSE_DRAG_MONITOR_TIMEOUT_MS`] unless disarmed first.
    pub async fn set_mouse_drag_monitor_state(&self, active: bool) {
        if let Some(token) = self.mouse_monitor_timeout.lock().await.take() {
            token.cancel();
        }
        if active {
            *self.mouse_monitor.lock().await =
                Some(MouseDragMonitor { last_position: (0, 0), existing_move: false });
            self.arm_mouse_drag_monitor_timeout().await;
        } else {
            *self.mouse_monitor.lock().await = None;
        }
    }

    async fn arm_mouse_drag_monitor_timeout(&self) {
        let token = CancellationToken::new();
        *self.mouse_monitor_timeout.lock().await = Some(token.clone());
        let child = token.clone();
        let weak = self.self_weak.get().cloned();
        let timeout = self.mouse_monitor_timeout_dur;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if let Some(machine) = weak.and_then(|w| w.upgrade()) {
                        *machine.mouse_monitor.lock().await = None;
                    }
                }
                _ = child.cancelled() => {}
            }
        });
    }

    /// Remap `display_id` for a foldable device: surfaces that are not a
    /// known embedded display fold back onto the topology's default
    /// display.
    pub fn remap_display_for_rotation(&self, display_id: i32) -> i32 {
        if self.topology.is_embedded_display(display_id) {
            display_id
        } else {
            self.topology.default_display_id()
        }
    }

    /// Feed one pointer event through the interceptor pipeline. Mouse
    /// `MOVE` tracking for the pre-drag monitor window runs regardless of
    /// the current drag state; every other action requires `START`.
    pub async fn on_pointer_event(&self, event: PointerEvent) {
        if event.action == PointerAction::Move && event.source == SourceType::Mouse {
            if let Some(monitor) = self.mouse_monitor.lock().await.as_mut() {
                monitor.last_position = (event.display_x, event.display_y);
                monitor.existing_move = true;
            }
            return;
        }

        if *self.state.lock().await != DragState::Start {
            return;
        }

        if event.action == PointerAction::PullMove
            && event.action_time <= self.filter_time.load(Ordering::SeqCst)
        {
            return;
        }

        match event.action {
            PointerAction::PullMove => {
                let display_id = self.remap_display_for_rotation(event.display_id);
                self.renderer.on_drag_move(
                    display_id,
                    event.display_x,
                    event.display_y,
                    event.action_time,
                );
            },
            PointerAction::PullUp => {
                let _ = self.input.hide_pointer();
                self.store.set_visible(true);
                self.arm_stop_drag_timeout().await;
            },
            PointerAction::Move | PointerAction::Other => {},
        }
    }

    async fn arm_stop_drag_timeout(&self) {
        let token = CancellationToken::new();
        *self.stop_timeout.lock().await = Some(token.clone());
        let child = token.clone();
        let weak = self.self_weak.get().cloned();
        let timeout = self.stop_drag_timeout_dur;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!("stop-drag timeout elapsed without a client result; forcing exception stop");
                    if let Some(machine) = weak.and_then(|w| w.upgrade()) {
                        let _ = machine
                            .stop_drag(DropResult {
                                result: DragResult::Exception,
                                has_custom_animation: false,
                                main_window: 0,
                                drag_behavior: DragAction::Move,
                            })
                            .await;
                    }
                }
                _ = child.cancelled() => {}
            }
        });
    }

    /// Feed one Ctrl-key transition through the keyboard pipeline. Ignored
    /// unless the current style is `COPY` or `MOVE`.
    pub async fn on_ctrl_key_event(&self, pressed: bool) {
        if *self.state.lock().await != DragState::Start {
            return;
        }
        let current_style = self.store.get_style();
        if matches!(current_style, DragCursorStyle::Default | DragCursorStyle::Forbidden) {
            return;
        }

        let new_action = if pressed { DragAction::Copy } else { DragAction::Move };
        *self.drag_action.lock().await = new_action;

        let effective_style = if pressed { DragCursorStyle::Copy } else { *self.base_style.lock().await };

        let mut last_notified = self.last_notified_action.lock().await;
        if *last_notified == Some(new_action) {
            return;
        }
        *last_notified = Some(new_action);
        drop(last_notified);

        self.renderer.update_drag_style(effective_style);
        self.dispatcher.emit(EventType::DragStyle, MessageId::UpdatedDragStyle.as_i32(), &[
            effective_style as u8,
        ]);
    }

    async fn require_started(&self) -> Result<()> {
        if *self.state.lock().await != DragState::Start {
            return Err(ServiceError::Busy("drag is not in progress"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::drag::types::FlatDisplayTopology;

    #[derive(Default)]
    struct RecordingRenderer {
        styles: StdMutex<Vec<DragCursorStyle>>,
        successes: StdMutex<u32>,
        fails: StdMutex<u32>,
        destroyed: StdMutex<u32>,
        moves: StdMutex<Vec<i32>>,
        draw_positions: StdMutex<Vec<(i32, i32)>>,
    }

    impl ShadowRenderer for RecordingRenderer {
        fn init(&self, _data: &DragData) -> Result<()> {
            Ok(())
        }

        fn draw(&self, _display_id: i32, display_x: i32, display_y: i32) -> Result<()> {
            self.draw_positions.lock().expect("poisoned").push((display_x, display_y));
            Ok(())
        }

        fn on_drag_move(&self, display_id: i32, _display_x: i32, _display_y: i32, _action_time: i64) {
            self.moves.lock().expect("poisoned").push(display_id);
        }

        fn update_drag_style(&self, style: DragCursorStyle) {
            self.styles.lock().expect("poisoned").push(style);
        }

        fn update_shadow_pic(&self, _shadow: ShadowInfo) {}

        fn update_preview_style(&self, _style: PreviewStyle) {}

        fn update_preview_style_with_animation(&self, _style: PreviewStyle, _animation_duration_ms: u32) {}

        fn rotate_drag_window(&self, _rotation: i32) {}

        fn enter_text_editor_area(&self, _enable: bool) {}

        fn on_drag_success(&self) {
            *self.successes.lock().expect("poisoned") += 1;
        }

        fn on_drag_fail(&self) {
            *self.fails.lock().expect("poisoned") += 1;
        }

        fn destroy_window(&self) {
            *self.destroyed.lock().expect("poisoned") += 1;
        }

        fn set_drag_window_visible(&self, _visible: bool) {}
    }

    #[derive(Default)]
    struct RecordingInput {
        hide_count: StdMutex<u32>,
        restore_count: StdMutex<u32>,
    }

    impl InputInterceptor for RecordingInput {
        fn register_pointer_interceptor(
            &self,
            _priority: i32,
            _mask: PointerSourceMask,
        ) -> Result<i32> {
            Ok(1)
        }

        fn unregister_pointer_interceptor(&self, _handle: i32) {}

        fn register_key_monitor(&self) -> Result<i32> {
            Ok(2)
        }

        fn unregister_key_monitor(&self, _handle: i32) {}

        fn append_extra_data(&self, _data: ExtraData) -> Result<()> {
            Ok(())
        }

        fn hide_pointer(&self) -> Result<()> {
            *self.hide_count.lock().expect("poisoned") += 1;
            Ok(())
        }

        fn restore_pointer(&self) -> Result<()> {
            *self.restore_count.lock().expect("poisoned") += 1;
            Ok(())
        }
    }

    fn sample_data() -> DragData {
        DragData {
            shadow_pixelmap: Bytes::from_static(b"pixels"),
            shadow_offset: ShadowOffset { x: 0, y: 0 },
            buffer: vec![0x01],
            ud_key: "k1".to_string(),
            extra_info: String::new(),
            filter_info: String::new(),
            summaries: Default::default(),
            source_type: SourceType::Mouse,
            drag_num: 1,
            pointer_id: 0,
            display_id: 0,
            display_x: 100,
            display_y: 200,
            has_canceled_animation: false,
            main_window: 7,
        }
    }

    fn make_machine() -> (Arc<DragStateMachine>, Arc<RecordingRenderer>, Arc<RecordingInput>) {
        let renderer = Arc::new(RecordingRenderer::default());
        let input = Arc::new(RecordingInput::default());
        let topology = Arc::new(FlatDisplayTopology { default_display_id: 0 });
        let dispatcher = Arc::new(EventDispatcher::new());
        let machine = Arc::new(DragStateMachine::new(
            Arc::clone(&renderer) as Arc<dyn ShadowRenderer>,
            Arc::clone(&input) as Arc<dyn InputInterceptor>,
            topology,
            dispatcher,
        ));
        machine.attach_self();
        (machine, renderer, input)
    }

    fn make_session(fd: i32) -> Arc<Session> {
        make_session_with_rx(fd).0
    }

    fn make_session_with_rx(fd: i32) -> (Arc<Session>, mpsc::UnboundedReceiver<bytes::Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Session::new(fd, fd, 0, "test".to_string(), crate::session::TokenType::Native, tx)),
            rx,
        )
    }

    /// Decode the single trailing byte of a `DRAG_NOTIFY_RESULT` payload,
    /// which carries the computed `DragAction` behavior.
    fn last_behavior_byte(wire: &[u8]) -> u8 {
        wire[wire.len() - 1]
    }

    /// Decode the `target_pid` field of a `DRAG_NOTIFY_RESULT` payload:
    /// `display_x: i32, display_y: i32, result: u8, target_pid: i32, behavior: u8`.
    fn target_pid_field(wire: &[u8]) -> i32 {
        i32::from_le_bytes(wire[9..13].try_into().expect("4-byte target_pid field"))
    }

    /// A simple successful drag reports `MOVE` when the drop lands back on
    /// the originating window.
    #[tokio::test]
    async fn simple_drag_success_reports_move_behavior() {
        let (machine, renderer, input) = make_machine();
        let (session, mut rx) = make_session_with_rx(1);

        machine.start_drag(sample_data(), Arc::clone(&session)).await.expect("start_drag");
        assert_eq!(machine.state().await, DragState::Start);

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::PullUp,
                display_id: 0,
                display_x: 110,
                display_y: 220,
                action_time: 1,
            })
            .await;
        assert_eq!(*input.hide_count.lock().expect("poisoned"), 1);

        machine
            .stop_drag(DropResult {
                result: DragResult::Success,
                has_custom_animation: false,
                main_window: 7,
                drag_behavior: DragAction::Move,
            })
            .await
            .expect("stop_drag");

        assert_eq!(machine.state().await, DragState::Stop);
        assert_eq!(*renderer.successes.lock().expect("poisoned"), 1);
        assert_eq!(*input.restore_count.lock().expect("poisoned"), 1);

        let wire = rx.try_recv().expect("a DRAG_NOTIFY_RESULT should have been sent");
        assert_eq!(last_behavior_byte(&wire), DragAction::Move as u8);
        assert_eq!(
            target_pid_field(&wire),
            -1,
            "no update_drag_style was ever reported, so target_pid stays at its -1 default"
        );
    }

    #[tokio::test]
    async fn stop_drag_on_stop_state_is_an_error() {
        let (machine, _renderer, _input) = make_machine();
        let err = machine
            .stop_drag(DropResult {
                result: DragResult::Exception,
                has_custom_animation: false,
                main_window: 0,
                drag_behavior: DragAction::Move,
            })
            .await
            .expect_err("stop_drag on STOP must fail");
        assert!(matches!(err, ServiceError::Busy(_)));
    }

    #[tokio::test]
    async fn start_drag_while_started_is_busy() {
        let (machine, _renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), Arc::clone(&session)).await.expect("first start");
        let err = machine
            .start_drag(sample_data(), session)
            .await
            .expect_err("second start must fail");
        assert!(matches!(err, ServiceError::Busy(_)));
    }

    /// Scenario 2: a pull-up with no client-issued `stop_drag` within the
    /// timeout window auto-resolves as EXCEPTION.
    #[tokio::test(start_paused = true)]
    async fn stop_drag_timeout_forces_exception_stop() {
        let (machine, renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::PullUp,
                display_id: 0,
                display_x: 110,
                display_y: 220,
                action_time: 1,
            })
            .await;

        tokio::time::advance(std::time::Duration::from_millis(STOP_DRAG_TIMEOUT_MS + 50)).await;
        tokio::task::yield_now().await;
        // Give the spawned timeout task a chance to run after the clock jump.
        for _ in 0..10 {
            if machine.state().await == DragState::Stop {
                break;
            }
            tokio::time::advance(std::time::Duration::from_millis(10)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(machine.state().await, DragState::Stop);
        assert_eq!(*renderer.destroyed.lock().expect("poisoned"), 1);
    }

    /// Scenario 3: holding Ctrl mid-drag with style MOVE flips to COPY and
    /// back on release.
    #[tokio::test]
    async fn ctrl_modifier_flips_style_to_copy_and_back() {
        let (machine, renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), Arc::clone(&session)).await.expect("start_drag");
        machine.update_drag_style(DragCursorStyle::Move, -1, -1, 1).await.expect("set move style");

        machine.on_ctrl_key_event(true).await;
        assert_eq!(renderer.styles.lock().expect("poisoned").last(), Some(&DragCursorStyle::Copy));

        machine.on_ctrl_key_event(false).await;
        assert_eq!(renderer.styles.lock().expect("poisoned").last(), Some(&DragCursorStyle::Move));
    }

    #[tokio::test]
    async fn ctrl_modifier_is_ignored_while_style_is_default() {
        let (machine, renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        machine.on_ctrl_key_event(true).await;
        assert!(renderer.styles.lock().expect("poisoned").is_empty());
    }

    /// Scenario 4: a style update carrying a stale `event_id` is rejected
    /// and the stored style is unaffected.
    #[tokio::test]
    async fn stale_style_update_is_rejected() {
        let (machine, _renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        machine.update_drag_style(DragCursorStyle::Move, 1, 1, 5).await.expect("accepted");
        let err = machine
            .update_drag_style(DragCursorStyle::Copy, 1, 1, 3)
            .await
            .expect_err("stale update must be rejected");
        assert!(matches!(err, ServiceError::Busy(_)));
        assert_eq!(machine.data_store().get_style(), DragCursorStyle::Move);
    }

    #[tokio::test]
    async fn drag_behavior_is_copy_when_drop_lands_on_a_different_window() {
        let (machine, renderer, _input) = make_machine();
        let (session, mut rx) = make_session_with_rx(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        machine
            .stop_drag(DropResult {
                result: DragResult::Success,
                has_custom_animation: false,
                main_window: 99,
                drag_behavior: DragAction::Move,
            })
            .await
            .expect("stop_drag");

        assert_eq!(*renderer.successes.lock().expect("poisoned"), 1);
        let wire = rx.try_recv().expect("a DRAG_NOTIFY_RESULT should have been sent");
        assert_eq!(last_behavior_byte(&wire), DragAction::Copy as u8);
    }

    struct FoldableTopology;

    impl DisplayTopology for FoldableTopology {
        fn is_embedded_display(&self, display_id: i32) -> bool {
            display_id == 7
        }

        fn default_display_id(&self) -> i32 {
            0
        }
    }

    /// A `PullMove` on a surface that isn't a known embedded display folds
    /// back onto the topology's default display; one on a known embedded
    /// display passes through unchanged.
    #[tokio::test]
    async fn pull_move_remaps_display_id_for_non_embedded_surfaces() {
        let renderer = Arc::new(RecordingRenderer::default());
        let input = Arc::new(RecordingInput::default());
        let dispatcher = Arc::new(EventDispatcher::new());
        let machine = Arc::new(DragStateMachine::new(
            Arc::clone(&renderer) as Arc<dyn ShadowRenderer>,
            Arc::clone(&input) as Arc<dyn InputInterceptor>,
            Arc::new(FoldableTopology),
            dispatcher,
        ));
        machine.attach_self();

        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::PullMove,
                display_id: 42,
                display_x: 1,
                display_y: 1,
                action_time: 1,
            })
            .await;
        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::PullMove,
                display_id: 7,
                display_x: 1,
                display_y: 1,
                action_time: 2,
            })
            .await;

        assert_eq!(*renderer.moves.lock().expect("poisoned"), vec![0, 7]);
    }

    /// A non-force visibility change is rejected while a multi-screen
    /// coordinator owns visibility control; a force change still goes
    /// through.
    #[tokio::test]
    async fn set_drag_window_visible_is_rejected_under_multi_screen_control_unless_forced() {
        let (machine, _renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");
        machine.set_control_multi_screen_visible(true);

        let err = machine
            .set_drag_window_visible(false, false)
            .await
            .expect_err("non-force change must be rejected");
        assert!(matches!(err, ServiceError::Busy(_)));

        machine.set_drag_window_visible(false, true).await.expect("force change succeeds");
    }

    /// A `PullMove` whose `action_time` is at or before the configured
    /// filter time is dropped, used to discard stale moves after a
    /// rotation or cross-device handoff.
    #[tokio::test]
    async fn pull_move_at_or_before_filter_time_is_dropped() {
        let (machine, renderer, _input) = make_machine();
        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");
        machine.set_pointer_event_filter_time(10);

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::PullMove,
                display_id: 0,
                display_x: 1,
                display_y: 1,
                action_time: 10,
            })
            .await;
        assert!(renderer.moves.lock().expect("poisoned").is_empty());

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::PullMove,
                display_id: 0,
                display_x: 1,
                display_y: 1,
                action_time: 11,
            })
            .await;
        assert_eq!(*renderer.moves.lock().expect("poisoned"), vec![0]);
    }

    /// A mouse `MOVE` recorded while the pre-drag monitor window is armed
    /// seeds the shadow's start placement instead of the position passed to
    /// `start_drag`.
    #[tokio::test]
    async fn armed_mouse_monitor_seeds_start_placement() {
        let (machine, renderer, _input) = make_machine();
        machine.set_mouse_drag_monitor_state(true).await;

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::Move,
                display_id: 0,
                display_x: 42,
                display_y: 84,
                action_time: 1,
            })
            .await;

        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        assert_eq!(*renderer.draw_positions.lock().expect("poisoned"), vec![(42, 84)]);
    }

    /// Disarming the monitor before `start_drag` falls back to the position
    /// carried by the drag data, and a `MOVE` while disarmed is ignored.
    #[tokio::test]
    async fn disarmed_mouse_monitor_does_not_seed_placement() {
        let (machine, renderer, _input) = make_machine();
        machine.set_mouse_drag_monitor_state(true).await;
        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::Move,
                display_id: 0,
                display_x: 42,
                display_y: 84,
                action_time: 1,
            })
            .await;
        machine.set_mouse_drag_monitor_state(false).await;

        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::Move,
                display_id: 0,
                display_x: 9,
                display_y: 9,
                action_time: 2,
            })
            .await;

        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        assert_eq!(*renderer.draw_positions.lock().expect("poisoned"), vec![(100, 200)]);
    }

    /// The monitor window self-disarms after its timeout elapses without a
    /// follow-up `start_drag`.
    #[tokio::test(start_paused = true)]
    async fn mouse_monitor_window_self_disarms_after_timeout() {
        let (machine, renderer, _input) = make_machine();
        machine.set_mouse_drag_monitor_state(true).await;
        machine
            .on_pointer_event(PointerEvent {
                source: SourceType::Mouse,
                action: PointerAction::Move,
                display_id: 0,
                display_x: 42,
                display_y: 84,
                action_time: 1,
            })
            .await;

        tokio::time::advance(std::time::Duration::from_millis(MOUSE_DRAG_MONITOR_TIMEOUT_MS + 50))
            .await;
        tokio::task::yield_now().await;

        let session = make_session(1);
        machine.start_drag(sample_data(), session).await.expect("start_drag");

        assert_eq!(*renderer.draw_positions.lock().expect("poisoned"), vec![(100, 200)]);
    }
}
