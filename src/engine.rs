//! ProximityBroadcastEngine: a single control loop owns every piece of radio
//! state. Callers and radio callbacks only ever talk to it through queues.
//!
//! ```text
//! EngineHandle ────── commands ──┐
//! RadioEventSender ── events ────┼─▶ select! ─▶ engine state
//! rotation / retry deadlines ────┘
//! ```
//!
//! Stopping clears both deadlines inside the loop, so a timer armed before a
//! stop can never fire into a stopped engine.

use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::cache::PayloadIdCache;
use crate::calibration::CalibrationGains;
use crate::capability::{with_timeout, Capabilities, ProximityListener, RadioErrorKind};
use crate::codec::build_hello;
use crate::config::EngineConfig;
use crate::connection::ConnectionPool;
use crate::epoch::{EpochWindow, WallClock};
use crate::errors::ProximityError;
use crate::identifiers::IdentifierSource;
use crate::ingest::SampleIngestor;
use crate::rotation::{deadline_after, rotation_action, rotation_delay, RotationAction, SuppressionWindow};
use crate::types::{EphemeralIdentifier, HelloPayload, PeerHandle, ScannedSample};

const COMMAND_QUEUE_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Error,
}

/// Notifications from the radio stack, marshalled into the control loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    AdapterEnabled,
    AdapterDisabled,
    ScanResult(ScannedSample),
    AdvertiseFailed(String),
    ScanFailed(String),
}

enum Command {
    Start { reply: oneshot::Sender<Result<(), ProximityError>> },
    Stop { reply: oneshot::Sender<()> },
    UpdateCalibration(CalibrationGains),
    RestartAdapter { reply: oneshot::Sender<Result<(), ProximityError>> },
    Shutdown { reply: oneshot::Sender<()> },
}

#[derive(Clone, Copy, Debug)]
struct ActiveBroadcast {
    window: EpochWindow,
    revision: u64,
}

pub struct ProximityBroadcastEngine {
    config: EngineConfig,
    caps: Capabilities,
    identifiers: Arc<dyn IdentifierSource>,
    listener: Arc<dyn ProximityListener>,
    clock: Arc<dyn WallClock>,
    ingestor: Arc<SampleIngestor>,
    connections: Arc<ConnectionPool>,
    payload: Arc<RwLock<Option<HelloPayload>>>,
    state: watch::Sender<EngineState>,
    active: Option<ActiveBroadcast>,
    /// Bumped on every calibration update.
    revision: u64,
    rotation_at: Option<Instant>,
    retry_at: Option<Instant>,
    failed_attempts: u32,
    adapter_restarted: bool,
    suppression: SuppressionWindow,
    halted_by_adapter: bool,
}

impl ProximityBroadcastEngine {
    /// Validate `config` and spawn the control loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ProximityError::InvalidConfig` if the configuration is inconsistent.
    pub fn spawn(
        config: EngineConfig,
        caps: Capabilities,
        identifiers: Arc<dyn IdentifierSource>,
        listener: Arc<dyn ProximityListener>,
        clock: Arc<dyn WallClock>,
    ) -> Result<EngineHandle, ProximityError> {
        config.validate()?;

        let cache = Arc::new(PayloadIdCache::from_config(&config.cache));
        let ingestor = Arc::new(SampleIngestor::new(config.calibration.local_gains(), cache));
        let connections = Arc::new(ConnectionPool::new(
            Arc::clone(&caps.connections),
            config.radio.operation_timeout(),
        ));
        let payload = Arc::new(RwLock::new(None));
        let (state_tx, state_rx) = watch::channel(EngineState::Stopped);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(config.radio.event_queue_capacity);

        let engine = Self {
            config,
            caps,
            identifiers,
            listener,
            clock,
            ingestor: Arc::clone(&ingestor),
            connections: Arc::clone(&connections),
            payload: Arc::clone(&payload),
            state: state_tx,
            active: None,
            revision: 0,
            rotation_at: None,
            retry_at: None,
            failed_attempts: 0,
            adapter_restarted: false,
            suppression: SuppressionWindow::default(),
            halted_by_adapter: false,
        };
        tokio::spawn(engine.run(command_rx, event_rx));

        Ok(EngineHandle {
            commands: command_tx,
            events: RadioEventSender { tx: event_tx },
            state: state_rx,
            payload,
            connections,
            ingestor,
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut events: mpsc::Receiver<RadioEvent>) {
        info!("proximity engine control loop started");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                Some(event) = events.recv() => self.handle_radio_event(event).await,
                () = sleep_until_opt(self.rotation_at) => {
                    self.rotation_at = None;
                    self.on_rotation_tick().await;
                }
                () = sleep_until_opt(self.retry_at) => {
                    self.retry_at = None;
                    self.on_retry().await;
                }
            }
        }
        self.stop_broadcast().await;
        info!("proximity engine control loop exited");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Start { reply } => {
                self.halted_by_adapter = false;
                let result = self.start_from_command().await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.halted_by_adapter = false;
                self.stop_broadcast().await;
                let _ = reply.send(());
            }
            Command::UpdateCalibration(gains) => {
                self.ingestor.set_gains(gains);
                self.revision += 1;
                info!(
                    rx_gain = gains.rx_gain,
                    tx_gain = gains.tx_gain,
                    revision = self.revision,
                    "calibration updated"
                );
            }
            Command::RestartAdapter { reply } => {
                let result = self.restart_adapter_on_request().await;
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.stop_broadcast().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::ScanResult(sample) => {
                if self.current_state() != EngineState::Running {
                    trace!(peer = %sample.peer, "scan result while not running dropped");
                    return;
                }
                if let Some(record) = self.ingestor.ingest(&sample) {
                    self.listener.on_proximity_record(record);
                }
            }
            RadioEvent::AdapterDisabled => self.on_adapter_disabled().await,
            RadioEvent::AdapterEnabled => self.on_adapter_enabled().await,
            RadioEvent::AdvertiseFailed(detail) => self.on_radio_failure("advertiser", &detail).await,
            RadioEvent::ScanFailed(detail) => self.on_radio_failure("scanner", &detail).await,
        }
    }

    fn current_state(&self) -> EngineState {
        *self.state.borrow()
    }

    fn set_state(&self, next: EngineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "engine state changed");
        }
    }

    async fn start_from_command(&mut self) -> Result<(), ProximityError> {
        if self.current_state() == EngineState::Running {
            return Ok(());
        }
        self.failed_attempts = 0;
        self.adapter_restarted = false;
        self.retry_at = None;
        self.set_state(EngineState::Starting);
        self.attempt_start().await
    }

    /// One start attempt. Radio failures go through the bounded retry path;
    /// identifier failures are fatal.
    async fn attempt_start(&mut self) -> Result<(), ProximityError> {
        match self.start_broadcast().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_radio_failure() => {
                self.on_start_failure(&err).await;
                Err(err)
            }
            Err(err) => {
                self.fail(RadioErrorKind::IdentifierUnavailable, &err).await;
                Err(err)
            }
        }
    }

    async fn start_broadcast(&mut self) -> Result<(), ProximityError> {
        let (identifier, payload) = self.build_current_payload()?;
        let timeout = self.config.radio.operation_timeout();

        let advertising = with_timeout("advertise start", timeout, self.caps.advertiser.start(payload))
            .await
            .unwrap_or(false);
        if !advertising {
            return Err(ProximityError::RadioStartFailure { component: "advertiser" });
        }

        let filters = self.config.radio.scan_filters();
        let scanning = with_timeout("scan start", timeout, self.caps.scanner.start(&filters))
            .await
            .unwrap_or(false);
        if !scanning {
            self.stop_radios().await;
            return Err(ProximityError::RadioStartFailure { component: "scanner" });
        }

        *self.payload.write() = Some(payload);
        self.active = Some(ActiveBroadcast { window: identifier.window, revision: self.revision });
        self.failed_attempts = 0;
        self.adapter_restarted = false;
        self.schedule_rotation(&identifier.window);
        self.connections.reopen();
        self.set_state(EngineState::Running);
        Ok(())
    }

    /// Payload for the identifier covering now. If that identifier has just
    /// expired, retry once against its successor.
    fn build_current_payload(&self) -> Result<(EphemeralIdentifier, HelloPayload), ProximityError> {
        let key = self.identifiers.key().ok_or(ProximityError::MissingKey)?;
        let now = self.clock.now_ntp_s();
        let identifier = self
            .identifiers
            .current(now)
            .ok_or(ProximityError::IdentifierUnavailable)?;

        match build_hello(&identifier, &key, now) {
            Ok(payload) => Ok((identifier, payload)),
            Err(err) if err.is_out_of_window() => {
                debug!(%err, "identifier outside its window, trying the adjacent one");
                let next = self.identifiers.adjacent(&identifier).ok_or(err)?;
                let payload = build_hello(&next, &key, self.clock.now_ntp_s())?;
                Ok((next, payload))
            }
            Err(err) => Err(err),
        }
    }

    fn schedule_rotation(&mut self, window: &EpochWindow) {
        let delay = rotation_delay(
            window,
            self.clock.now_ntp_s(),
            self.config.rotation.hello_refresh_max_delay_s,
        );
        self.rotation_at = Some(deadline_after(Instant::now(), delay));
        debug!(delay_s = delay.as_secs(), "rotation scheduled");
    }

    async fn on_rotation_tick(&mut self) {
        let Some(active) = self.active else {
            return;
        };

        let evicted = self.ingestor.cache().sweep_expired(std::time::Instant::now());
        if evicted > 0 {
            debug!(evicted, "expired payload cache entries swept");
        }

        let (identifier, payload) = match self.build_current_payload() {
            Ok(built) => built,
            Err(err) => {
                self.fail(RadioErrorKind::IdentifierUnavailable, &err).await;
                return;
            }
        };

        match rotation_action(&active.window, &identifier.window, active.revision, self.revision) {
            RotationAction::Restart => {
                info!(
                    window_start = identifier.window.start_time_s,
                    revision = self.revision,
                    "identifier or calibration changed, restarting broadcast"
                );
                self.restart_broadcast().await;
            }
            RotationAction::Refresh => {
                let timeout = self.config.radio.operation_timeout();
                let updated = with_timeout("advertise update", timeout, self.caps.advertiser.update(payload))
                    .await
                    .unwrap_or(false);
                if updated {
                    *self.payload.write() = Some(payload);
                    debug!(?payload, "hello payload refreshed");
                    self.schedule_rotation(&identifier.window);
                } else {
                    warn!("advertiser rejected refreshed payload");
                    self.restart_broadcast().await;
                }
            }
        }
    }

    async fn restart_broadcast(&mut self) {
        self.set_state(EngineState::Restarting);
        self.rotation_at = None;
        self.active = None;
        self.stop_radios().await;
        if let Err(err) = self.attempt_start().await {
            debug!(%err, "restart attempt failed");
        }
    }

    async fn on_retry(&mut self) {
        if self.current_state() != EngineState::Restarting {
            return;
        }
        if let Err(err) = self.attempt_start().await {
            debug!(%err, "start retry failed");
        }
    }

    async fn on_start_failure(&mut self, err: &ProximityError) {
        self.failed_attempts += 1;
        let max = self.config.radio.max_restart_attempts;

        if self.failed_attempts < max {
            warn!(%err, attempt = self.failed_attempts, max, "radio start failed, retrying");
            self.set_state(EngineState::Restarting);
            self.retry_at = Some(deadline_after(Instant::now(), self.config.radio.restart_backoff()));
            return;
        }

        if self.config.radio.allow_adapter_restart && !self.adapter_restarted {
            warn!(%err, attempts = self.failed_attempts, "radio start keeps failing, restarting adapter");
            self.adapter_restarted = true;
            self.failed_attempts = 0;
            self.set_state(EngineState::Restarting);
            match self.cycle_adapter().await {
                Ok(()) => self.retry_at = Some(Instant::now()),
                Err(restart_err) => self.fail(RadioErrorKind::AdapterRestartFailed, &restart_err).await,
            }
            return;
        }

        self.fail(RadioErrorKind::StartFailure, err).await;
    }

    async fn on_radio_failure(&mut self, component: &'static str, detail: &str) {
        if self.current_state() != EngineState::Running {
            debug!(component, detail, "radio failure while not running ignored");
            return;
        }
        warn!(component, detail, "radio reported failure");
        self.rotation_at = None;
        self.active = None;
        self.stop_radios().await;
        self.on_start_failure(&ProximityError::RadioStartFailure { component }).await;
    }

    async fn on_adapter_disabled(&mut self) {
        if self.suppression.is_active(Instant::now()) {
            warn!("adapter-disabled event suppressed during self-initiated restart");
            return;
        }
        if matches!(self.current_state(), EngineState::Stopped | EngineState::Error) {
            debug!("adapter disabled while idle");
            return;
        }
        let err = ProximityError::AdapterUnavailable;
        warn!(%err, "halting broadcast");
        self.listener.on_radio_error(RadioErrorKind::AdapterUnavailable, &err.to_string());
        self.stop_broadcast().await;
        self.halted_by_adapter = true;
    }

    async fn on_adapter_enabled(&mut self) {
        if !(self.halted_by_adapter && self.config.radio.resume_on_adapter_enabled) {
            return;
        }
        self.halted_by_adapter = false;
        info!("adapter enabled again, resuming broadcast");
        if let Err(err) = self.start_from_command().await {
            debug!(%err, "resume after adapter enable failed");
        }
    }

    async fn restart_adapter_on_request(&mut self) -> Result<(), ProximityError> {
        let was_active = matches!(
            self.current_state(),
            EngineState::Starting | EngineState::Running | EngineState::Restarting
        );
        if was_active {
            self.set_state(EngineState::Restarting);
            self.rotation_at = None;
            self.retry_at = None;
            self.active = None;
            self.stop_radios().await;
        }
        if let Err(err) = self.cycle_adapter().await {
            self.fail(RadioErrorKind::AdapterRestartFailed, &err).await;
            return Err(err);
        }
        if was_active {
            self.failed_attempts = 0;
            return self.attempt_start().await;
        }
        Ok(())
    }

    /// Disable then re-enable the adapter. Adapter-disabled events stay
    /// suppressed for the whole cycle plus the configured grace period.
    async fn cycle_adapter(&mut self) -> Result<(), ProximityError> {
        let adapter = self.config.adapter;
        let budget = adapter
            .poll_interval()
            .saturating_mul(adapter.max_poll_iterations)
            .saturating_mul(2)
            .saturating_add(adapter.suppression_grace());
        self.suppression.arm(Instant::now(), budget);
        info!("restarting bluetooth adapter");

        self.drive_adapter(false).await?;
        self.drive_adapter(true).await?;

        self.suppression.disarm();
        self.suppression.arm(Instant::now(), adapter.suppression_grace());
        info!("bluetooth adapter restarted");
        Ok(())
    }

    async fn drive_adapter(&self, enabled: bool) -> Result<(), ProximityError> {
        let timeout = self.config.radio.operation_timeout();
        let adapter = self.config.adapter;

        let accepted = with_timeout("adapter toggle", timeout, self.caps.adapter.set_enabled(enabled))
            .await
            .unwrap_or(false);
        if !accepted {
            warn!(enabled, "adapter toggle request rejected");
        }

        for iteration in 1..=adapter.max_poll_iterations {
            if with_timeout("adapter poll", timeout, self.caps.adapter.is_enabled()).await == Some(enabled) {
                debug!(enabled, iteration, "adapter reached expected state");
                return Ok(());
            }
            tokio::time::sleep(adapter.poll_interval()).await;
        }
        Err(ProximityError::AdapterRestartFailed { iterations: adapter.max_poll_iterations })
    }

    async fn fail(&mut self, kind: RadioErrorKind, err: &ProximityError) {
        error!(%err, ?kind, "proximity engine failed");
        self.teardown().await;
        self.listener.on_radio_error(kind, &err.to_string());
        self.set_state(EngineState::Error);
    }

    async fn stop_broadcast(&mut self) {
        if self.current_state() == EngineState::Stopped {
            return;
        }
        self.teardown().await;
        self.set_state(EngineState::Stopped);
    }

    async fn teardown(&mut self) {
        // gate the pool first so no refinement opens a connection mid-teardown
        self.connections.close_all().await;
        self.rotation_at = None;
        self.retry_at = None;
        self.active = None;
        *self.payload.write() = None;
        self.stop_radios().await;
    }

    /// Stop advertiser and scanner. Failures are logged and otherwise ignored.
    async fn stop_radios(&self) {
        let timeout = self.config.radio.operation_timeout();
        let advertiser = with_timeout("advertise stop", timeout, self.caps.advertiser.stop()).await;
        if advertiser != Some(true) {
            let err = ProximityError::RadioStopFailure { component: "advertiser" };
            warn!(%err, "stop failure ignored");
        }
        let scanner = with_timeout("scan stop", timeout, self.caps.scanner.stop()).await;
        if scanner != Some(true) {
            let err = ProximityError::RadioStopFailure { component: "scanner" };
            warn!(%err, "stop failure ignored");
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Non-blocking entry point for radio-stack callbacks.
#[derive(Clone, Debug)]
pub struct RadioEventSender {
    tx: mpsc::Sender<RadioEvent>,
}

impl RadioEventSender {
    /// Enqueue `event` without blocking. Returns `false` if the queue is full
    /// or the engine has shut down.
    pub fn send(&self, event: RadioEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("radio event queue full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Cloneable handle to a running [`ProximityBroadcastEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: RadioEventSender,
    state: watch::Receiver<EngineState>,
    payload: Arc<RwLock<Option<HelloPayload>>>,
    connections: Arc<ConnectionPool>,
    ingestor: Arc<SampleIngestor>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ProximityError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ProximityError::EngineClosed)?;
        rx.await.map_err(|_| ProximityError::EngineClosed)
    }

    /// Start advertising and scanning. A radio failure is returned as an
    /// error while the engine keeps retrying in the background.
    ///
    /// # Errors
    ///
    /// Returns the first attempt's failure, or `ProximityError::EngineClosed`.
    pub async fn start(&self) -> Result<(), ProximityError> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Stop everything. Never fails; stop failures are only logged.
    pub async fn stop(&self) {
        if self.request(|reply| Command::Stop { reply }).await.is_err() {
            debug!("stop requested after engine shutdown");
        }
    }

    /// Payload currently being advertised, if any.
    #[must_use]
    pub fn current_payload(&self) -> Option<HelloPayload> {
        *self.payload.read()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// # Errors
    ///
    /// Returns `ProximityError::EngineClosed` if the engine exits first.
    pub async fn wait_for_state(&self, target: EngineState) -> Result<(), ProximityError> {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|state| *state == target).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(ProximityError::EngineClosed)
        }
    }

    #[must_use]
    pub fn radio_events(&self) -> RadioEventSender {
        self.events.clone()
    }

    /// Change ingestion gains. The broadcast restarts on the next rotation tick.
    ///
    /// # Errors
    ///
    /// Returns `ProximityError::EngineClosed` if the engine has shut down.
    pub async fn update_calibration(&self, gains: CalibrationGains) -> Result<(), ProximityError> {
        self.commands
            .send(Command::UpdateCalibration(gains))
            .await
            .map_err(|_| ProximityError::EngineClosed)
    }

    /// Read a peer's RSSI over a connection, calibrated with the current gains.
    ///
    /// # Errors
    ///
    /// Returns `ProximityError::NotRunning` unless the engine is running, or
    /// `ProximityError::ConnectionFailure` if the read fails.
    pub async fn refine_rssi(&self, peer: &PeerHandle, close_after: bool) -> Result<i32, ProximityError> {
        if self.state() != EngineState::Running {
            return Err(ProximityError::NotRunning);
        }
        let raw = self.connections.read_rssi(peer, close_after).await?;
        Ok(self.ingestor.gains().apply(raw))
    }

    /// Disable and re-enable the adapter, restarting the broadcast if it was active.
    ///
    /// # Errors
    ///
    /// Returns `ProximityError::AdapterRestartFailed` if the adapter does not
    /// reach the expected state, or the restarted broadcast's start error.
    pub async fn restart_adapter(&self) -> Result<(), ProximityError> {
        self.request(|reply| Command::RestartAdapter { reply }).await?
    }

    /// Stop the broadcast and end the control loop.
    pub async fn shutdown(&self) {
        if self.request(|reply| Command::Shutdown { reply }).await.is_err() {
            debug!("engine already shut down");
        }
    }
}
