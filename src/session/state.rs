use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::input::encoder::{Debouncer, StepAccumulator};
use crate::input::{Gesture, NavAction};
use crate::link::DeviceInfo;
use crate::protocol::LinkCapabilities;
use crate::screen::{Frame, ScreenProfile, ScreenSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Disconnected with a reconnect timer running.
    Reconnecting,
}

/// Everything the presentation layer may show. Published whole on every change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub devices: Vec<DeviceInfo>,
    pub selected_device: Option<String>,
    pub connected_device: Option<String>,
    pub phase: LinkPhase,
    pub status: String,
    pub detected_screen_size: Option<ScreenSize>,
    /// Size frames are fetched and decoded at.
    pub screen_size: ScreenSize,
    pub screen_profile: ScreenProfile,
    pub capabilities: LinkCapabilities,
    pub turbo: bool,
    pub frame: Option<Arc<Frame>>,
    /// Bumped for every published frame.
    pub frame_token: u64,
    pub touch_lock: bool,
    pub fine_mode: bool,
    pub auto_reconnect: bool,
    pub last_control: String,
    pub connected_since: Option<Instant>,
}

impl SessionSnapshot {
    pub fn new(profile: ScreenProfile, auto_reconnect: bool) -> Self {
        Self {
            devices: Vec::new(),
            selected_device: None,
            connected_device: None,
            phase: LinkPhase::Disconnected,
            status: "Disconnected".to_string(),
            detected_screen_size: None,
            screen_size: profile.resolve(ScreenSize::default()),
            screen_profile: profile,
            capabilities: LinkCapabilities::default(),
            turbo: false,
            frame: None,
            frame_token: 0,
            touch_lock: false,
            fine_mode: false,
            auto_reconnect,
            last_control: String::new(),
            connected_since: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == LinkPhase::Connected
    }

    pub fn selected(&self) -> Option<&DeviceInfo> {
        let id = self.selected_device.as_ref()?;
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.connected_since.map(|t| t.elapsed())
    }

    /// Drop the link-specific fields after a disconnect.
    pub(crate) fn mark_disconnected(&mut self, phase: LinkPhase, status: String) {
        self.phase = phase;
        self.status = status;
        self.connected_device = None;
        self.connected_since = None;
        self.capabilities = LinkCapabilities::default();
        self.turbo = false;
    }
}

/// Controller bookkeeping that observers never see.
pub(crate) struct LinkRuntime {
    pub error_streak: u32,
    pub backoff: Duration,
    pub hold_until: Option<Instant>,
    pub manual_disconnect: bool,
    pub stream_task: Option<CancellationToken>,
    pub reconnect_task: Option<CancellationToken>,
    pub debouncer: Debouncer<NavAction>,
    pub drag: StepAccumulator,
    pub dial: StepAccumulator,
}

impl LinkRuntime {
    pub fn new(initial_backoff: Duration, debounce: Duration) -> Self {
        Self {
            error_streak: 0,
            backoff: initial_backoff,
            hold_until: None,
            manual_disconnect: false,
            stream_task: None,
            reconnect_task: None,
            debouncer: Debouncer::new(debounce),
            drag: StepAccumulator::new(),
            dial: StepAccumulator::new(),
        }
    }

    pub fn accumulator(&mut self, gesture: Gesture) -> &mut StepAccumulator {
        match gesture {
            Gesture::Drag => &mut self.drag,
            Gesture::Dial => &mut self.dial,
        }
    }

    /// Time left in the input hold window, if any.
    pub fn hold_remaining(&self, now: Instant) -> Option<Duration> {
        let remaining = self.hold_until?.checked_duration_since(now)?;
        (!remaining.is_zero()).then_some(remaining)
    }

    pub fn cancel_stream(&mut self) {
        if let Some(token) = self.stream_task.take() {
            token.cancel();
        }
    }

    pub fn cancel_reconnect(&mut self) {
        if let Some(token) = self.reconnect_task.take() {
            token.cancel();
        }
    }
}
