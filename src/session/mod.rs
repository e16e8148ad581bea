//! Chant session: state machine, metrics and capture ownership

mod capture;
mod machine;
mod metrics;

pub(crate) use capture::{CaptureSession, CaptureState};
pub(crate) use machine::{
    ChantPhase, ChantSession, Permission, SessionEffect, SessionInput, SessionSettings,
};
pub(crate) use metrics::ChantMetrics;
