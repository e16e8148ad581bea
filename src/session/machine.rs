//! Chant session state machine
//!
//! A sans-IO core: callers feed [`SessionInput`]s and carry out the returned
//! [`SessionEffect`]s. Nothing here touches the network, the microphone or a
//! clock, which keeps every transition deterministic under test.

use super::metrics::ChantMetrics;
use crate::config::ChantConfig;
use crate::navigation::Route;
use crate::room::{countdown_seconds, RoomSnapshot};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChantPhase {
    WaitingForPeers,
    CountdownArmed,
    PromptFetchPending,
    ReadyToCapture,
    Capturing,
    Evaluating,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Permission {
    Pending,
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionInput {
    /// The room snapshot changed; `now` anchors the countdown
    Room {
        snapshot: RoomSnapshot,
        now: DateTime<Utc>,
    },
    /// One second of countdown elapsed
    Tick,
    PermissionResolved { granted: bool },
    PromptArrived(String),
    /// The capture control was pressed
    Press { menu_selected: bool },
    Release,
    CaptureDeadline,
    Sample(f32),
    RemoteAverage(f64),
    Transcript(String),
    Retry,
    DwellElapsed,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEffect {
    RequestMicPermission,
    FetchPrompt,
    StartCapture,
    StopCapture,
    /// Send a local sample to peers
    ForwardSample(f32),
    ArmCaptureDeadline(Duration),
    Navigate(Route),
}

#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub(crate) volume_threshold: f32,
    pub(crate) capture_duration: Duration,
}

impl SessionSettings {
    pub(crate) fn from_config(config: &ChantConfig) -> Self {
        Self {
            volume_threshold: config.volume_threshold,
            capture_duration: config.capture_duration(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChantSession {
    settings: SessionSettings,
    phase: ChantPhase,
    permission: Permission,
    countdown: Option<u64>,
    metrics: ChantMetrics,
}

impl ChantSession {
    pub(crate) fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            phase: ChantPhase::WaitingForPeers,
            permission: Permission::Pending,
            countdown: None,
            metrics: ChantMetrics::default(),
        }
    }

    pub(crate) fn phase(&self) -> ChantPhase {
        self.phase
    }

    pub(crate) fn permission(&self) -> Permission {
        self.permission
    }

    /// Remaining whole seconds, once armed
    pub(crate) fn countdown(&self) -> Option<u64> {
        self.countdown
    }

    pub(crate) fn metrics(&self) -> &ChantMetrics {
        &self.metrics
    }

    pub(crate) fn is_capturing(&self) -> bool {
        self.phase == ChantPhase::Capturing
    }

    pub(crate) fn handle(&mut self, input: SessionInput) -> Vec<SessionEffect> {
        use SessionInput::*;

        match input {
            Room { snapshot, now } => self.on_room(&snapshot, &now),
            Tick => self.on_tick(),
            PermissionResolved { granted } => self.on_permission(granted),
            PromptArrived(prompt) => {
                self.metrics = self.metrics.with_prompt(prompt);
                Vec::new()
            }
            Press { menu_selected } => self.on_press(menu_selected),
            Release | CaptureDeadline => self.on_capture_end(),
            Sample(value) => {
                if self.phase != ChantPhase::Capturing {
                    return Vec::new();
                }
                self.metrics = self.metrics.with_sample(value);
                vec![SessionEffect::ForwardSample(self.metrics.current_volume)]
            }
            RemoteAverage(average) => {
                self.metrics = self.metrics.with_remote_average(average);
                Vec::new()
            }
            Transcript(text) => {
                self.metrics = self.metrics.with_transcript(text);
                Vec::new()
            }
            Retry if self.phase == ChantPhase::Failure => {
                info!("Retrying chant");
                self.phase = ChantPhase::ReadyToCapture;
                vec![SessionEffect::Navigate(Route::Chanting)]
            }
            DwellElapsed if self.phase == ChantPhase::Success => {
                vec![SessionEffect::Navigate(Route::OrderConfirm)]
            }
            Retry | DwellElapsed => Vec::new(),
        }
    }

    fn on_room(&mut self, snapshot: &RoomSnapshot, now: &DateTime<Utc>) -> Vec<SessionEffect> {
        if self.phase != ChantPhase::WaitingForPeers {
            return Vec::new();
        }
        let Some(start) = snapshot.scheduled_start.as_ref() else {
            return Vec::new();
        };

        let remaining = countdown_seconds(start, now);
        info!(remaining, start = %start, "Room locked, countdown armed");
        self.phase = ChantPhase::CountdownArmed;
        self.countdown = Some(remaining);

        let mut effects = Vec::new();
        if self.permission == Permission::Pending {
            effects.push(SessionEffect::RequestMicPermission);
        }
        effects.push(SessionEffect::FetchPrompt);
        if remaining == 0 {
            effects.extend(self.on_countdown_zero());
        }
        effects
    }

    fn on_tick(&mut self) -> Vec<SessionEffect> {
        if self.phase != ChantPhase::CountdownArmed {
            return Vec::new();
        }
        let remaining = self.countdown.unwrap_or(0).saturating_sub(1);
        self.countdown = Some(remaining);
        if remaining == 0 {
            self.on_countdown_zero()
        } else {
            Vec::new()
        }
    }

    fn on_countdown_zero(&mut self) -> Vec<SessionEffect> {
        if self.permission == Permission::Pending {
            debug!("Countdown finished, waiting for microphone permission");
            self.phase = ChantPhase::PromptFetchPending;
            return Vec::new();
        }
        self.ready()
    }

    fn on_permission(&mut self, granted: bool) -> Vec<SessionEffect> {
        self.permission = if granted {
            Permission::Granted
        } else {
            warn!("Microphone permission denied, continuing without volume");
            Permission::Denied
        };
        if self.phase == ChantPhase::PromptFetchPending {
            self.ready()
        } else {
            Vec::new()
        }
    }

    fn ready(&mut self) -> Vec<SessionEffect> {
        info!(permission = ?self.permission, "Ready to chant");
        self.phase = ChantPhase::ReadyToCapture;
        vec![SessionEffect::Navigate(Route::Chanting)]
    }

    fn on_press(&mut self, menu_selected: bool) -> Vec<SessionEffect> {
        if self.phase != ChantPhase::ReadyToCapture {
            return Vec::new();
        }
        if !menu_selected {
            warn!("Capture requested without a selected menu item");
            return vec![SessionEffect::Navigate(Route::Menu)];
        }

        self.metrics = self.metrics.reset_window();
        self.phase = ChantPhase::Capturing;
        info!(
            duration_secs = self.settings.capture_duration.as_secs(),
            "Capture window opened"
        );
        vec![
            SessionEffect::StartCapture,
            SessionEffect::ArmCaptureDeadline(self.settings.capture_duration),
        ]
    }

    fn on_capture_end(&mut self) -> Vec<SessionEffect> {
        if self.phase != ChantPhase::Capturing {
            return Vec::new();
        }
        self.metrics = self.metrics.released();
        self.phase = ChantPhase::Evaluating;

        let mean = self.metrics.mean_volume();
        let passed = mean >= self.settings.volume_threshold;
        info!(
            mean,
            threshold = self.settings.volume_threshold,
            samples = self.metrics.history.len(),
            passed,
            "Capture window evaluated"
        );

        let route = if passed {
            self.phase = ChantPhase::Success;
            Route::ChantingComplete
        } else {
            self.phase = ChantPhase::Failure;
            Route::ChantingResult
        };
        vec![SessionEffect::StopCapture, SessionEffect::Navigate(route)]
    }
}
