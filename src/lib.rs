//! sigma-shrink: target-size document compression scheduler for the Ryzanstein ecosystem.
//!
//! Decides which optimizations to run, and how hard, to bring a document under
//! a byte target when the savings of most operations are only known after
//! running them:
//! - a deterministic mapper from target percentage to initial settings
//! - a fixed escalation ladder for re-runs that miss the target
//! - risk-tiered potential and least-destructive method selection
//! - an online image budget that escalates quality mid-stream
//!
//! Document parsing and pixel coding are delegated to a [`DocumentService`]
//! and an [`ImageCodec`] supplied by the host.

pub mod budget;
pub mod config;
pub mod error;
pub mod escalation;
pub mod incremental;
pub mod method;
pub mod orchestrator;
pub mod potential;
pub mod protocol;
pub mod services;
pub mod settings;

pub use crate::config::CompressionConfig;
pub use crate::error::{CompressError, ErrorKind};
pub use crate::escalation::{escalate_settings, EscalationTier};
pub use crate::method::{Method, RiskTier};
pub use crate::orchestrator::{AppliedSettings, JobOrchestrator, JobOutcome};
pub use crate::potential::{
    calculate_compression_potential, select_methods, CompressionPotential, MeasurementBoard,
    MethodMeasurement, UncertaintyRange,
};
pub use crate::protocol::{CompressionSession, JobRequest, JobResponse, JobSuccess, ProgressReporter};
pub use crate::services::{DocumentService, ImageCodec, ImageFormat, ImageItem, PixelBuffer, SaveOptions};
pub use crate::settings::{settings_for_target_percent, SettingsVector};
