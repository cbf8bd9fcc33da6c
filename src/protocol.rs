//! Message-based job protocol
//!
//! A [`CompressionSession`] accepts [`JobRequest`]s and streams back zero or
//! more progress messages followed by exactly one terminal response. A success
//! carries per-method measurements that are still pending; each one is then
//! resolved by a separate `measurement` message. Each new submission supersedes
//! the previous one: the older job stops scheduling work and nothing it
//! produces afterwards reaches the host.

use crate::error::{CompressError, ErrorKind};
use crate::method::Method;
use crate::orchestrator::{AppliedSettings, JobOrchestrator, JobOutcome};
use crate::potential::{CompressionPotential, MethodMeasurement};
use crate::services::{DocumentService, ImageCodec};
use crate::settings::SettingsVector;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Desired output size as a percentage of the input.
    pub target_percent: Option<f64>,
    /// Initial settings; replaces the mapped vector when present.
    pub settings: Option<SettingsVector>,
    pub document: Vec<u8>,
}

impl JobRequest {
    pub fn new(document: Vec<u8>) -> Self {
        Self {
            document,
            ..Self::default()
        }
    }

    pub fn with_target(mut self, percent: f64) -> Self {
        self.target_percent = Some(percent);
        self
    }

    pub fn with_settings(mut self, settings: SettingsVector) -> Self {
        self.settings = Some(settings);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSuccess {
    pub original_size: u64,
    pub achieved_size: u64,
    pub target_bytes: Option<u64>,
    pub measurements: Vec<MethodMeasurement>,
    pub potential: CompressionPotential,
    pub settings_trail: Vec<AppliedSettings>,
    pub warning: Option<String>,
    pub document: Vec<u8>,
}

impl From<JobOutcome> for JobSuccess {
    fn from(outcome: JobOutcome) -> Self {
        Self {
            original_size: outcome.original_size,
            achieved_size: outcome.achieved_size,
            target_bytes: outcome.target_bytes,
            measurements: outcome.measurements,
            potential: outcome.potential,
            settings_trail: outcome.trail,
            warning: outcome.warning,
            document: outcome.document,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobResponse {
    Progress {
        stage: String,
        message: String,
        percent: u8,
    },
    Success(Box<JobSuccess>),
    Failure {
        kind: ErrorKind,
        message: String,
    },
    /// Follows a success. `measurement` is absent when the method could not be measured.
    Measurement {
        method: Method,
        measurement: Option<MethodMeasurement>,
        potential: CompressionPotential,
    },
}

impl JobResponse {
    pub fn failure(err: &CompressError) -> Self {
        Self::Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure { .. })
    }

    pub fn to_json(&self) -> Result<String, CompressError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Ownership token for one submission. Stale once a newer request is submitted.
#[derive(Debug, Clone)]
pub struct JobToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl JobToken {
    pub(crate) fn new(generation: u64, current: Arc<AtomicU64>) -> Self {
        Self { generation, current }
    }

    /// A token nothing can supersede.
    pub fn detached() -> Self {
        Self {
            generation: 0,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }

    pub fn check(&self) -> Result<(), CompressError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(CompressError::Cancelled)
        }
    }
}

/// Sends responses for one job, dropping them once the job is superseded.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<JobResponse>>,
    token: JobToken,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<JobResponse>, token: JobToken) -> Self {
        Self { tx: Some(tx), token }
    }

    /// Reporter that discards everything and is never cancelled.
    pub fn silent() -> Self {
        Self {
            tx: None,
            token: JobToken::detached(),
        }
    }

    pub fn token(&self) -> &JobToken {
        &self.token
    }

    pub fn is_live(&self) -> bool {
        self.token.is_live()
    }

    pub fn progress(&self, stage: &str, message: impl Into<String>, percent: u8) {
        self.send(JobResponse::Progress {
            stage: stage.to_string(),
            message: message.into(),
            percent: percent.min(100),
        });
    }

    pub fn measurement(
        &self,
        method: Method,
        measurement: Option<MethodMeasurement>,
        potential: CompressionPotential,
    ) {
        self.send(JobResponse::Measurement {
            method,
            measurement,
            potential,
        });
    }

    pub fn finish(&self, response: JobResponse) {
        debug_assert!(response.is_terminal());
        self.send(response);
    }

    fn send(&self, response: JobResponse) {
        if !self.token.is_live() {
            return;
        }
        if let Some(tx) = &self.tx {
            // A dropped receiver only means the host stopped listening.
            let _ = tx.send(response);
        }
    }
}

/// One logical compression session. Must be used from within a tokio runtime.
pub struct CompressionSession<D, C>
where
    D: DocumentService + 'static,
    C: ImageCodec + 'static,
{
    orchestrator: Arc<JobOrchestrator<D, C>>,
    generation: Arc<AtomicU64>,
}

impl<D, C> CompressionSession<D, C>
where
    D: DocumentService + 'static,
    C: ImageCodec + 'static,
{
    pub fn new(orchestrator: JobOrchestrator<D, C>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a job, superseding any job still running in this session.
    pub fn submit(&self, request: JobRequest) -> mpsc::UnboundedReceiver<JobResponse> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = JobToken::new(generation, Arc::clone(&self.generation));
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx, token);
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(async move {
            match orchestrator.run(&request, &reporter).await {
                Ok(outcome) => {
                    let settings = outcome.settings;
                    let measure = outcome.potential.has_pending;
                    reporter.finish(JobResponse::Success(Box::new(outcome.into())));
                    if measure && reporter.is_live() {
                        if let Err(e) = orchestrator
                            .measure_methods(&request.document, &settings, &reporter)
                            .await
                        {
                            tracing::debug!(generation, error = %e, "measurement stopped");
                        }
                    }
                }
                Err(CompressError::Cancelled) => {
                    tracing::debug!(generation, "job superseded");
                }
                Err(e) => {
                    tracing::warn!(generation, error = %e, "job failed");
                    reporter.finish(JobResponse::failure(&e));
                }
            }
        });

        rx
    }

    /// Invalidate the running job without starting a new one.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_goes_stale() {
        let current = Arc::new(AtomicU64::new(1));
        let token = JobToken {
            generation: 1,
            current: Arc::clone(&current),
        };
        assert!(token.check().is_ok());
        let reporter = ProgressReporter {
            tx: None,
            token: token.clone(),
        };
        assert!(reporter.is_live());
        current.fetch_add(1, Ordering::AcqRel);
        assert!(matches!(token.check(), Err(CompressError::Cancelled)));
        assert!(!reporter.is_live());
    }

    #[tokio::test]
    async fn test_stale_reporter_drops_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let current = Arc::new(AtomicU64::new(5));
        let reporter = ProgressReporter::new(
            tx,
            JobToken {
                generation: 5,
                current: Arc::clone(&current),
            },
        );
        reporter.progress("load", "loading", 3);
        current.store(6, Ordering::Release);
        reporter.progress("load", "ignored", 4);
        drop(reporter);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, JobResponse::Progress { percent: 3, .. }));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_failure_json_shape() {
        let json = JobResponse::failure(&CompressError::EmptyInput).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "failure");
        assert_eq!(value["kind"], "empty_input");
    }

    #[test]
    fn test_progress_percent_capped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        ProgressReporter::new(tx, JobToken::detached()).progress("x", "y", 250);
        match rx.try_recv().unwrap() {
            JobResponse::Progress { percent, .. } => assert_eq!(percent, 100),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_measurement_is_not_terminal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx, JobToken::detached());
        reporter.measurement(Method::CleanMetadata, None, CompressionPotential::default());
        let response = rx.try_recv().unwrap();
        assert!(!response.is_terminal());

        let value: serde_json::Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "measurement");
        assert_eq!(value["method"], "clean_metadata");
        assert!(value["measurement"].is_null());
    }
}
