//! Connection lifecycle, frame streaming and input dispatch for one radio.
//!
//! The controller is cheap to clone; every clone drives the same session.
//! Observers read [`SessionSnapshot`]s from a `watch` channel. Frame polling
//! and input sends share one transport behind a `tokio::sync::Mutex`: input
//! waits for the lock, frame polling only ever `try_lock`s and backs off.

pub mod backoff;
pub mod state;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ms, LinkConfig, SessionConfig};
use crate::input::{text, Gesture, NavAction};
use crate::link::{DeviceInfo, DeviceProvider, LinkError, ShellClient};
use crate::protocol::{Button, LinkCapabilities};
use crate::screen::{ScreenProfile, ScreenSize};

use self::backoff::{connect_retry_delay, next_backoff};
pub use self::state::{LinkPhase, SessionSnapshot};
use self::state::LinkRuntime;

struct Inner {
    config: SessionConfig,
    provider: Arc<dyn DeviceProvider>,
    shell: tokio::sync::Mutex<ShellClient>,
    snapshot: watch::Sender<SessionSnapshot>,
    runtime: Mutex<LinkRuntime>,
    pending_ops: AtomicUsize,
    shutdown: CancellationToken,
}

/// Counts an input op as pending until dropped.
struct PendingOp(Arc<Inner>);

impl Drop for PendingOp {
    fn drop(&mut self) {
        self.0.pending_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(config: SessionConfig, link: LinkConfig, provider: Arc<dyn DeviceProvider>) -> Self {
        let snapshot = SessionSnapshot::new(config.profile, config.auto_reconnect);
        let runtime = LinkRuntime::new(ms(config.reconnect_initial_ms), ms(config.debounce_ms));
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                shell: tokio::sync::Mutex::new(ShellClient::new(link)),
                snapshot: tx,
                runtime: Mutex::new(runtime),
                pending_ops: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    fn runtime(&self) -> MutexGuard<'_, LinkRuntime> {
        self.inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.inner.snapshot.send_modify(f);
    }

    fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.update(|s| s.status = status);
    }

    fn announce(&self, label: impl Into<String>) {
        let label = label.into();
        debug!(control = %label, "control sent");
        self.update(|s| s.last_control = label);
    }

    // ---- devices ----

    /// Re-list devices, keeping the selection when it is still present.
    pub fn refresh_devices(&self) -> Vec<DeviceInfo> {
        let devices = self.inner.provider.list();
        self.update(|s| {
            let keep = s
                .selected_device
                .as_ref()
                .is_some_and(|id| devices.iter().any(|d| &d.id == id));
            if !keep {
                s.selected_device = devices.first().map(|d| d.id.clone());
            }
            if devices.is_empty() && !s.is_connected() {
                s.status = "No USB serial device found".to_string();
            }
            s.devices = devices.clone();
        });
        devices
    }

    /// Refresh and notice a connected radio that went away.
    pub fn poll_devices(&self) {
        let devices = self.refresh_devices();
        let gone = self
            .inner
            .snapshot
            .borrow()
            .connected_device
            .clone()
            .filter(|id| !devices.iter().any(|d| &d.id == id));
        if let Some(id) = gone {
            self.on_device_detached(&id);
        }
    }

    pub fn on_device_detached(&self, id: &str) {
        let connected = self.inner.snapshot.borrow().connected_device.as_deref() == Some(id);
        if !connected {
            return;
        }
        warn!(device = id, "USB device detached");
        self.disconnect_with("USB device detached", false);
        self.refresh_devices();
        self.schedule_reconnect("USB detached");
    }

    pub fn select_device(&self, id: &str) {
        self.update(|s| {
            if s.devices.iter().any(|d| d.id == id) {
                s.selected_device = Some(id.to_string());
            }
        });
    }

    /// Move the selection to the next listed device, wrapping around.
    pub fn select_next_device(&self) {
        self.update(|s| {
            if s.devices.is_empty() {
                return;
            }
            let idx = s
                .selected_device
                .as_ref()
                .and_then(|id| s.devices.iter().position(|d| &d.id == id))
                .map_or(0, |i| (i + 1) % s.devices.len());
            s.selected_device = Some(s.devices[idx].id.clone());
        });
    }

    // ---- lifecycle ----

    /// Start connecting to the selected device. Returns `None` when a
    /// precondition fails (the status says which) or a connect is running.
    pub fn connect(&self) -> Option<JoinHandle<()>> {
        if self.inner.shutdown.is_cancelled() {
            return None;
        }
        let snap = self.snapshot();
        if matches!(snap.phase, LinkPhase::Connecting | LinkPhase::Connected) {
            return None;
        }
        let Some(selected) = snap.selected_device.clone() else {
            self.set_status("Select a USB device first");
            return None;
        };
        let listed = self.refresh_devices();
        let Some(device) = listed.into_iter().find(|d| d.id == selected) else {
            self.set_status("USB device disappeared");
            return None;
        };
        if !device.has_permission {
            self.set_status("Waiting for USB permission...");
            return None;
        }

        // Claim the phase in one update so two callers cannot both start.
        let mut claimed = false;
        self.update(|s| {
            if !matches!(s.phase, LinkPhase::Connecting | LinkPhase::Connected) {
                s.phase = LinkPhase::Connecting;
                s.status = format!("Connecting to {}...", device.title);
                claimed = true;
            }
        });
        if !claimed {
            return None;
        }
        {
            let mut rt = self.runtime();
            rt.manual_disconnect = false;
            rt.cancel_reconnect();
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.run_connect(device).await }))
    }

    async fn run_connect(&self, device: DeviceInfo) {
        let attempts = self.inner.config.connect_attempts.max(1);
        let step = ms(self.inner.config.connect_retry_step_ms);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.runtime().manual_disconnect || self.inner.shutdown.is_cancelled() {
                return;
            }
            if attempt > 1 {
                self.set_status(format!("Connect retry {}/{}...", attempt, attempts));
            }
            info!(device = %device.id, attempt, "connecting");
            match self.handshake(&device).await {
                Ok((detected, capabilities)) => {
                    self.on_connected(&device, detected, capabilities).await;
                    return;
                }
                Err(e) => {
                    warn!(attempt, "connect attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                sleep(connect_retry_delay(step, attempt)).await;
            }
        }

        if self.runtime().manual_disconnect {
            return;
        }
        let status = match &last_error {
            Some(e) if e.is_busy() => {
                "Connect failed: USB busy. Close other SDR apps and retry.".to_string()
            }
            Some(e) => format!("Connect failed: {}", e),
            None => "Connect failed".to_string(),
        };
        self.update(|s| s.mark_disconnected(LinkPhase::Disconnected, status));
        self.schedule_reconnect("Connect failed");
    }

    /// Open the transport and probe it. Leaves the shell closed on failure.
    async fn handshake(
        &self,
        device: &DeviceInfo,
    ) -> Result<(ScreenSize, LinkCapabilities), LinkError> {
        let mut shell = self.inner.shell.lock().await;
        let stream = self.inner.provider.open(device)?;
        shell.open(stream).await?;
        match shell.query_resolution().await {
            Ok(detected) => {
                let capabilities = shell.detect_link_capabilities().await;
                Ok((detected, capabilities))
            }
            Err(e) => {
                shell.close().await;
                Err(e)
            }
        }
    }

    async fn on_connected(
        &self,
        device: &DeviceInfo,
        detected: ScreenSize,
        capabilities: LinkCapabilities,
    ) {
        let cancelled = {
            let mut rt = self.runtime();
            if !rt.manual_disconnect {
                rt.error_streak = 0;
                rt.backoff = ms(self.inner.config.reconnect_initial_ms);
                rt.hold_until = None;
            }
            rt.manual_disconnect
        };
        if cancelled {
            // disconnected while the handshake was running
            self.inner.shell.lock().await.close().await;
            return;
        }

        let turbo = capabilities.turbo_enabled();
        let id = device.id.clone();
        self.update(|s| {
            let size = s.screen_profile.resolve(detected);
            s.phase = LinkPhase::Connected;
            s.connected_device = Some(id);
            s.detected_screen_size = Some(detected);
            s.screen_size = size;
            s.capabilities = capabilities;
            s.turbo = turbo;
            s.frame = None;
            s.connected_since = Some(Instant::now());
            s.status = format!("Connected ({}){}", size, if turbo { " Turbo" } else { "" });
        });
        info!(device = %device.id, %detected, turbo, "connected");
        self.start_streaming();
    }

    /// User-initiated disconnect. Cancels any pending reconnect.
    pub fn disconnect(&self) -> JoinHandle<()> {
        self.disconnect_with("Disconnected", true)
    }

    fn disconnect_with(&self, reason: &str, manual: bool) -> JoinHandle<()> {
        {
            let mut rt = self.runtime();
            if manual {
                rt.manual_disconnect = true;
                rt.cancel_reconnect();
            }
            rt.cancel_stream();
            rt.error_streak = 0;
        }
        info!(manual, "disconnect: {}", reason);
        let reason = reason.to_string();
        self.update(|s| s.mark_disconnected(LinkPhase::Disconnected, reason));

        let this = self.clone();
        tokio::spawn(async move { this.inner.shell.lock().await.close().await })
    }

    /// Stop every task and release the transport.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        {
            let mut rt = self.runtime();
            rt.manual_disconnect = true;
            rt.cancel_reconnect();
            rt.cancel_stream();
        }
        self.inner.shell.lock().await.close().await;
        self.update(|s| s.mark_disconnected(LinkPhase::Disconnected, "Stopped".to_string()));
    }

    /// Arm a reconnect after `trigger`, unless one is already pending, a
    /// connect is running or up, the user disconnected, or auto-reconnect is
    /// off.
    fn schedule_reconnect(&self, trigger: &str) -> Option<JoinHandle<()>> {
        let (auto_reconnect, phase) = {
            let snap = self.inner.snapshot.borrow();
            (snap.auto_reconnect, snap.phase)
        };
        if matches!(phase, LinkPhase::Connecting | LinkPhase::Connected) {
            return None;
        }
        let (delay, token) = {
            let mut rt = self.runtime();
            if rt.manual_disconnect
                || !auto_reconnect
                || rt.reconnect_task.is_some()
                || self.inner.shutdown.is_cancelled()
            {
                return None;
            }
            let token = CancellationToken::new();
            rt.reconnect_task = Some(token.clone());
            (rt.backoff, token)
        };

        info!(delay_ms = delay.as_millis() as u64, "{}; reconnect scheduled", trigger);
        let status = format!("{}. Reconnecting in {:.1}s...", trigger, delay.as_secs_f32());
        self.update(|s| {
            s.phase = LinkPhase::Reconnecting;
            s.status = status;
        });

        let this = self.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }
            {
                let mut rt = this.runtime();
                // cancelled after the timer fired; the slot belongs to someone else
                if token.is_cancelled() || rt.manual_disconnect {
                    return;
                }
                rt.reconnect_task = None;
                rt.backoff = next_backoff(rt.backoff, ms(this.inner.config.reconnect_max_ms));
            }
            this.refresh_devices();
            let mut idle = false;
            this.update(|s| {
                if s.phase == LinkPhase::Reconnecting {
                    s.phase = LinkPhase::Disconnected;
                }
                idle = s.phase == LinkPhase::Disconnected;
            });
            if !idle {
                return;
            }
            if this.connect().is_none() {
                // No usable device yet; keep polling on the backoff schedule.
                this.schedule_reconnect("Waiting for device");
            }
        }))
    }

    // ---- streaming ----

    fn start_streaming(&self) {
        let token = CancellationToken::new();
        {
            let mut rt = self.runtime();
            rt.cancel_stream();
            rt.stream_task = Some(token.clone());
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.stream_loop(&token).await;
            debug!("stream loop ended");
        });
    }

    async fn stream_loop(&self, token: &CancellationToken) {
        let cfg = &self.inner.config;
        let busy = ms(cfg.busy_backoff_ms);

        while !token.is_cancelled() {
            let hold = self.runtime().hold_remaining(Instant::now());
            if let Some(remaining) = hold {
                pause(token, remaining.min(ms(cfg.hold_wait_max_ms))).await;
                continue;
            }
            if self.inner.pending_ops.load(Ordering::SeqCst) > 0 {
                pause(token, busy).await;
                continue;
            }
            let Ok(mut shell) = self.inner.shell.try_lock() else {
                pause(token, busy).await;
                continue;
            };
            let size = self.inner.snapshot.borrow().screen_size;
            let result = shell.fetch_frame(size).await;
            drop(shell);
            if token.is_cancelled() {
                break;
            }

            match result {
                Ok(frame) => {
                    self.runtime().error_streak = 0;
                    let mut turbo = false;
                    self.update(|s| {
                        turbo = s.turbo;
                        // a profile switch mid-fetch makes this frame stale
                        if frame.size() == s.screen_size {
                            s.frame = Some(Arc::new(frame));
                            s.frame_token += 1;
                        }
                    });
                    pause(token, cfg.frame_interval(turbo)).await;
                }
                Err(e) => {
                    if !self.on_stream_error(e, token).await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns whether streaming should continue.
    async fn on_stream_error(&self, err: LinkError, token: &CancellationToken) -> bool {
        let cfg = &self.inner.config;
        let streak = {
            let mut rt = self.runtime();
            rt.error_streak += 1;
            rt.error_streak
        };
        warn!(streak, kind = ?err.kind(), "frame fetch failed: {}", err);

        let snap = self.snapshot();
        if snap.screen_profile != ScreenProfile::Auto {
            let fallback = snap.detected_screen_size.unwrap_or_default();
            info!(%fallback, "falling back to detected screen size");
            self.update(|s| {
                s.screen_profile = ScreenProfile::Auto;
                s.screen_size = fallback;
                s.frame = None;
                s.status = format!("Profile mismatch; fallback to Auto ({})", fallback);
            });
            pause(token, ms(cfg.profile_fallback_pause_ms)).await;
            return true;
        }

        if streak >= cfg.stream_error_threshold {
            warn!(streak, "stream unstable, dropping link");
            {
                let mut rt = self.runtime();
                rt.stream_task = None;
                rt.error_streak = 0;
            }
            self.inner.shell.lock().await.close().await;
            self.update(|s| {
                s.mark_disconnected(
                    LinkPhase::Disconnected,
                    "Stream unstable; reconnecting...".to_string(),
                )
            });
            self.schedule_reconnect("Stream unstable");
            return false;
        }

        self.set_status(format!("Stream error: {}", err));
        pause(token, ms(cfg.stream_error_backoff_ms)).await;
        true
    }

    // ---- settings ----

    pub fn set_profile(&self, profile: ScreenProfile) {
        self.runtime().error_streak = 0;
        self.update(|s| {
            s.screen_profile = profile;
            let base = s.detected_screen_size.unwrap_or(s.screen_size);
            let size = profile.resolve(base);
            if size != s.screen_size {
                s.screen_size = size;
                s.frame = None;
            }
            s.status = format!("Screen profile: {}", profile.label());
        });
    }

    pub fn cycle_profile(&self) {
        let next = self.inner.snapshot.borrow().screen_profile.next();
        self.set_profile(next);
    }

    pub fn set_touch_lock(&self, locked: bool) {
        self.update(|s| s.touch_lock = locked);
    }

    pub fn toggle_fine_mode(&self) {
        self.update(|s| s.fine_mode = !s.fine_mode);
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.update(|s| s.auto_reconnect = enabled);
        if !enabled {
            self.runtime().cancel_reconnect();
        }
    }

    // ---- input ----

    fn accepts_input(&self) -> bool {
        let snap = self.inner.snapshot.borrow();
        snap.is_connected() && !snap.touch_lock
    }

    /// Claim transport priority: open the hold window and count the op as
    /// pending before the send task even starts waiting for the lock.
    fn begin_input(&self) -> PendingOp {
        let turbo = self.inner.snapshot.borrow().turbo;
        let hold = self.inner.config.hold_window(turbo);
        self.runtime().hold_until = Some(Instant::now() + hold);
        self.inner.pending_ops.fetch_add(1, Ordering::SeqCst);
        PendingOp(self.inner.clone())
    }

    /// Directional or OK press, debounced per action.
    pub fn press(&self, action: NavAction) -> Option<JoinHandle<()>> {
        if !self.accepts_input() {
            return None;
        }
        if !self.runtime().debouncer.allow(action, Instant::now()) {
            debug!(?action, "press debounced");
            return None;
        }
        self.send_button(action.button())
    }

    pub fn send_button(&self, button: Button) -> Option<JoinHandle<()>> {
        if !self.accepts_input() {
            return None;
        }
        let pending = self.begin_input();
        let this = self.clone();
        Some(tokio::spawn(async move {
            let _pending = pending;
            let result = this.inner.shell.lock().await.send_button(button.code()).await;
            match result {
                Ok(true) => this.announce(button.label()),
                Ok(false) => this.announce(format!("{} (raw)", button.label())),
                Err(e) => {
                    warn!("button {} failed: {}", button.code(), e);
                    this.set_status(format!("Control command failed (BTN {})", button.code()));
                }
            }
        }))
    }

    /// Tap at screen coordinates; out-of-range values clamp to the screen.
    pub fn touch(&self, x: i64, y: i64) -> Option<JoinHandle<()>> {
        if !self.accepts_input() {
            return None;
        }
        let size = self.inner.snapshot.borrow().screen_size;
        let x = x.clamp(0, size.width() as i64 - 1) as u32;
        let y = y.clamp(0, size.height() as i64 - 1) as u32;

        let pending = self.begin_input();
        let this = self.clone();
        Some(tokio::spawn(async move {
            let _pending = pending;
            let result = this.inner.shell.lock().await.send_touch(x, y).await;
            match result {
                Ok(true) => this.announce(format!("TOUCH {},{}", x, y)),
                Ok(false) => this.announce(format!("TOUCH {},{} (raw)", x, y)),
                Err(e) => {
                    warn!("touch {},{} failed: {}", x, y, e);
                    this.set_status(format!("Control command failed (TOUCH {},{})", x, y));
                }
            }
        }))
    }

    /// Type a frequency through the firmware keyboard, optionally pressing
    /// OK afterwards.
    pub fn send_text(&self, raw: &str, apply_after: bool) -> Option<JoinHandle<()>> {
        if !self.accepts_input() {
            return None;
        }
        let value = text::sanitize(raw);
        if value.is_empty() {
            self.set_status("Enter a frequency first");
            return None;
        }

        let pending = self.begin_input();
        let this = self.clone();
        Some(tokio::spawn(async move {
            let _pending = pending;
            let mut shell = this.inner.shell.lock().await;
            if !shell.send_keyboard_text(&value).await {
                drop(shell);
                this.set_status("Keyboard input not supported by current firmware");
                return;
            }
            let confirmed = if apply_after {
                Some(shell.send_button(Button::Ok.code()).await)
            } else {
                None
            };
            drop(shell);

            this.announce(format!("KBD {}", value));
            if let Some(Err(e)) = confirmed {
                warn!("confirm after keyboard failed: {}", e);
                this.set_status(format!("Control command failed (BTN {})", Button::Ok.code()));
            }
        }))
    }

    pub fn encoder_start(&self, gesture: Gesture) {
        self.runtime().accumulator(gesture).reset();
    }

    /// Feed a drag (pixels) or dial (radians) delta; whole steps become
    /// encoder presses. Positive is clockwise.
    pub fn encoder_move(&self, gesture: Gesture, delta: f32) -> Option<JoinHandle<()>> {
        if !self.accepts_input() {
            return None;
        }
        let cfg = &self.inner.config;
        let fine = self.inner.snapshot.borrow().fine_mode;
        let (step, cap) = match gesture {
            Gesture::Drag => (cfg.drag_step(fine), cfg.drag_max_steps),
            Gesture::Dial => (cfg.dial_step(fine), cfg.dial_max_steps),
        };
        let steps = self.runtime().accumulator(gesture).feed(delta, step, cap);
        if steps == 0 {
            return None;
        }
        self.send_encoder_steps(steps)
    }

    pub fn encoder_end(&self, gesture: Gesture) {
        self.runtime().accumulator(gesture).reset();
    }

    fn send_encoder_steps(&self, steps: i32) -> Option<JoinHandle<()>> {
        let button = if steps > 0 {
            Button::EncoderCw
        } else {
            Button::EncoderCcw
        };
        let spacing = ms(self.inner.config.encoder_step_spacing_ms);
        let pending = self.begin_input();
        let this = self.clone();
        Some(tokio::spawn(async move {
            let _pending = pending;
            let mut shell = this.inner.shell.lock().await;
            for i in 0..steps.unsigned_abs() {
                if i > 0 {
                    sleep(spacing).await;
                }
                if let Err(e) = shell.send_button(button.code()).await {
                    drop(shell);
                    warn!("encoder step failed: {}", e);
                    this.set_status(format!("Control command failed (BTN {})", button.code()));
                    return;
                }
            }
            drop(shell);
            this.announce(format!("ENC {:+}", steps));
        }))
    }
}

/// Sleep for `duration` unless `token` fires first.
async fn pause(token: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::emulator::{DemoDeviceProvider, EmulatorOptions};
    use crate::link::LinkStream;
    use tokio::time::timeout;

    fn link_config() -> LinkConfig {
        LinkConfig {
            settle_ms: 0,
            drain_read_ms: 5,
            read_slice_ms: 20,
            ..LinkConfig::default()
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            connect_retry_step_ms: 5,
            stream_error_backoff_ms: 10,
            profile_fallback_pause_ms: 10,
            ..SessionConfig::default()
        }
    }

    fn demo(options: EmulatorOptions) -> (SessionController, Arc<DemoDeviceProvider>) {
        let provider = Arc::new(DemoDeviceProvider::new(options));
        let controller = SessionController::new(session_config(), link_config(), provider.clone());
        controller.refresh_devices();
        (controller, provider)
    }

    async fn wait_for(
        controller: &SessionController,
        what: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = controller.subscribe();
        let snap = timeout(Duration::from_secs(5), rx.wait_for(|s| what(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("session dropped")
            .clone();
        snap
    }

    async fn connected(options: EmulatorOptions) -> (SessionController, Arc<DemoDeviceProvider>) {
        let (controller, provider) = demo(options);
        controller.connect().unwrap().await.unwrap();
        wait_for(&controller, |s| s.frame_token > 0).await;
        (controller, provider)
    }

    struct FixedProvider {
        devices: Vec<DeviceInfo>,
        open_error: fn() -> LinkError,
    }

    impl DeviceProvider for FixedProvider {
        fn list(&self) -> Vec<DeviceInfo> {
            self.devices.clone()
        }

        fn open(&self, _device: &DeviceInfo) -> Result<Box<dyn LinkStream>, LinkError> {
            Err((self.open_error)())
        }
    }

    /// Demo radio that counts how often the transport was opened.
    struct CountingProvider {
        inner: DemoDeviceProvider,
        opens: AtomicUsize,
    }

    impl DeviceProvider for CountingProvider {
        fn list(&self) -> Vec<DeviceInfo> {
            self.inner.list()
        }

        fn open(&self, device: &DeviceInfo) -> Result<Box<dyn LinkStream>, LinkError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open(device)
        }
    }

    fn device(has_permission: bool) -> DeviceInfo {
        DeviceInfo {
            id: "/dev/ttyACM0".to_string(),
            title: "USB 1d50:6018".to_string(),
            subtitle: "/dev/ttyACM0".to_string(),
            has_permission,
        }
    }

    #[tokio::test]
    async fn test_connect_and_stream() {
        let (controller, _provider) = connected(EmulatorOptions::default()).await;
        let snap = controller.snapshot();
        assert!(snap.is_connected());
        assert_eq!(snap.status, "Connected (240x320) Turbo");
        assert_eq!(snap.detected_screen_size, Some(ScreenSize::H2_PORTRAIT));
        assert!(snap.capabilities.frame_half);
        let frame = snap.frame.clone().unwrap();
        assert_eq!(frame.size(), ScreenSize::H2_PORTRAIT);
        assert!(snap.uptime().is_some());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_standard_link_status() {
        let options = EmulatorOptions {
            linkcaps_supported: false,
            ..EmulatorOptions::default()
        };
        let (controller, _provider) = connected(options).await;
        let snap = controller.snapshot();
        assert_eq!(snap.status, "Connected (240x320)");
        assert!(!snap.turbo);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_streak_schedules_reconnect() {
        let options = EmulatorOptions {
            reject_frames: true,
            ..EmulatorOptions::default()
        };
        let (controller, _provider) = demo(options);
        controller.connect().unwrap().await.unwrap();

        let snap = wait_for(&controller, |s| s.phase == LinkPhase::Reconnecting).await;
        assert_eq!(snap.status, "Stream unstable. Reconnecting in 1.4s...");
        assert!(!snap.is_connected());
        assert!(snap.connected_device.is_none());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_forced_profile_falls_back_to_detected() {
        let mut config = session_config();
        config.profile = ScreenProfile::H2Landscape;
        let provider = Arc::new(DemoDeviceProvider::new(EmulatorOptions::default()));
        let controller = SessionController::new(config, link_config(), provider);
        controller.refresh_devices();
        controller.connect().unwrap().await.unwrap();

        let snap = wait_for(&controller, |s| s.status.starts_with("Profile mismatch")).await;
        assert_eq!(snap.status, "Profile mismatch; fallback to Auto (240x320)");
        assert_eq!(snap.screen_profile, ScreenProfile::Auto);

        let snap = wait_for(&controller, |s| s.frame.is_some()).await;
        assert_eq!(snap.frame.unwrap().size(), ScreenSize::H2_PORTRAIT);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_press_is_sent_and_debounced() {
        let (controller, provider) = connected(EmulatorOptions::default()).await;
        controller.press(NavAction::Down).unwrap().await.unwrap();
        assert!(controller.press(NavAction::Down).is_none());
        assert_eq!(controller.snapshot().last_control, "DOWN");

        let commands = provider.last_handle().unwrap().commands();
        assert!(commands.contains(&"button_fast 3".to_string()));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_touch_is_clamped() {
        let (controller, provider) = connected(EmulatorOptions::default()).await;
        controller.touch(-20, 9999).unwrap().await.unwrap();
        assert_eq!(controller.snapshot().last_control, "TOUCH 0,319");
        let commands = provider.last_handle().unwrap().commands();
        assert!(commands.contains(&"touch_fast 0 319".to_string()));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_keyboard_entry_with_confirm() {
        let (controller, provider) = connected(EmulatorOptions::default()).await;
        controller.send_text("4a3b3.9x2", true).unwrap().await.unwrap();
        let handle = provider.last_handle().unwrap();
        assert_eq!(handle.typed_text(), "433.92");
        assert!(handle.commands().contains(&"button_fast 5".to_string()));
        assert_eq!(controller.snapshot().last_control, "KBD 433.92");

        assert!(controller.send_text("abc", false).is_none());
        assert_eq!(controller.snapshot().status, "Enter a frequency first");
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_drag_becomes_encoder_steps() {
        let (controller, provider) = connected(EmulatorOptions::default()).await;
        controller.encoder_start(Gesture::Drag);
        assert!(controller.encoder_move(Gesture::Drag, 5.0).is_none());
        controller
            .encoder_move(Gesture::Drag, 19.0)
            .unwrap()
            .await
            .unwrap();
        controller.encoder_end(Gesture::Drag);
        assert_eq!(controller.snapshot().last_control, "ENC +3");
        assert_eq!(provider.last_handle().unwrap().encoder_value(), 3);

        controller
            .encoder_move(Gesture::Dial, -0.4)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(controller.snapshot().last_control, "ENC -2");
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_inputs_ignored_when_disconnected_or_locked() {
        let (controller, _provider) = demo(EmulatorOptions::default());
        assert!(controller.press(NavAction::Ok).is_none());
        assert!(controller.touch(1, 1).is_none());

        let controller = connected(EmulatorOptions::default()).await.0;
        controller.set_touch_lock(true);
        assert!(controller.press(NavAction::Ok).is_none());
        assert!(controller.encoder_move(Gesture::Dial, 3.0).is_none());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_disconnect_does_not_reconnect() {
        let (controller, _provider) = connected(EmulatorOptions::default()).await;
        controller.disconnect().await.unwrap();
        let snap = controller.snapshot();
        assert_eq!(snap.phase, LinkPhase::Disconnected);
        assert_eq!(snap.status, "Disconnected");
        assert!(controller.schedule_reconnect("test").is_none());
    }

    #[tokio::test]
    async fn test_user_connect_supersedes_pending_reconnect() {
        let provider = Arc::new(CountingProvider {
            inner: DemoDeviceProvider::new(EmulatorOptions::default()),
            opens: AtomicUsize::new(0),
        });
        let mut config = session_config();
        config.reconnect_initial_ms = 50;
        let link = LinkConfig {
            settle_ms: 300,
            ..link_config()
        };
        let controller = SessionController::new(config, link, provider.clone());
        controller.refresh_devices();
        assert!(controller.schedule_reconnect("USB detached").is_some());
        assert_eq!(controller.snapshot().phase, LinkPhase::Reconnecting);

        let connecting = controller.connect().unwrap();
        // the reconnect timer would have fired by now
        sleep(Duration::from_millis(120)).await;
        assert_eq!(controller.snapshot().phase, LinkPhase::Connecting);
        assert!(controller.connect().is_none());
        assert!(controller.schedule_reconnect("Stream unstable").is_none());

        connecting.await.unwrap();
        assert!(controller.snapshot().is_connected());
        assert_eq!(provider.opens.load(Ordering::SeqCst), 1);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_detach_schedules_reconnect() {
        let (controller, provider) = connected(EmulatorOptions::default()).await;
        provider.set_attached(false);
        controller.poll_devices();

        let snap = controller.snapshot();
        assert_eq!(snap.phase, LinkPhase::Reconnecting);
        assert_eq!(snap.status, "USB detached. Reconnecting in 1.4s...");
        assert!(snap.devices.is_empty());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_preconditions() {
        let provider = Arc::new(FixedProvider {
            devices: Vec::new(),
            open_error: || LinkError::NotOpen,
        });
        let controller = SessionController::new(session_config(), link_config(), provider);
        controller.refresh_devices();
        assert_eq!(controller.snapshot().status, "No USB serial device found");
        assert!(controller.connect().is_none());
        assert_eq!(controller.snapshot().status, "Select a USB device first");

        let provider = Arc::new(FixedProvider {
            devices: vec![device(false)],
            open_error: || LinkError::NotOpen,
        });
        let controller = SessionController::new(session_config(), link_config(), provider);
        controller.refresh_devices();
        assert!(controller.connect().is_none());
        assert_eq!(controller.snapshot().status, "Waiting for USB permission...");
    }

    #[tokio::test]
    async fn test_busy_port_reports_hint() {
        let provider = Arc::new(FixedProvider {
            devices: vec![device(true)],
            open_error: || LinkError::Open("Device or resource busy".to_string()),
        });
        let mut config = session_config();
        config.auto_reconnect = false;
        let controller = SessionController::new(config, link_config(), provider);
        controller.refresh_devices();
        controller.connect().unwrap().await.unwrap();

        let snap = controller.snapshot();
        assert_eq!(snap.phase, LinkPhase::Disconnected);
        assert_eq!(
            snap.status,
            "Connect failed: USB busy. Close other SDR apps and retry."
        );
    }

    #[tokio::test]
    async fn test_connect_failure_schedules_reconnect() {
        let provider = Arc::new(FixedProvider {
            devices: vec![device(true)],
            open_error: || LinkError::PermissionDenied,
        });
        let controller = SessionController::new(session_config(), link_config(), provider);
        controller.refresh_devices();
        controller.connect().unwrap().await.unwrap();

        let snap = controller.snapshot();
        assert_eq!(snap.phase, LinkPhase::Reconnecting);
        assert_eq!(snap.status, "Connect failed. Reconnecting in 1.4s...");
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_profile_cycle_updates_size() {
        let (controller, _provider) = demo(EmulatorOptions::default());
        controller.cycle_profile();
        let snap = controller.snapshot();
        assert_eq!(snap.screen_profile, ScreenProfile::H2Portrait);
        assert_eq!(snap.status, "Screen profile: H2 240x320");
        controller.cycle_profile();
        assert_eq!(controller.snapshot().screen_size, ScreenSize::H2_LANDSCAPE);
    }

    #[tokio::test]
    async fn test_device_selection_wraps() {
        let provider = Arc::new(FixedProvider {
            devices: vec![
                device(true),
                DeviceInfo {
                    id: "/dev/ttyACM1".to_string(),
                    ..device(true)
                },
            ],
            open_error: || LinkError::NotOpen,
        });
        let controller = SessionController::new(session_config(), link_config(), provider);
        controller.refresh_devices();
        assert_eq!(
            controller.snapshot().selected_device.as_deref(),
            Some("/dev/ttyACM0")
        );
        controller.select_next_device();
        controller.select_next_device();
        assert_eq!(
            controller.snapshot().selected_device.as_deref(),
            Some("/dev/ttyACM0")
        );
        controller.select_device("/dev/ttyACM1");
        assert_eq!(
            controller.snapshot().selected_device.as_deref(),
            Some("/dev/ttyACM1")
        );
    }
}
