//! Top-level job control: one pass, then escalation tiers until the target fits
//!
//! ```text
//! Initial ──(no target | fits)──────────────▶ Done
//!    │
//!    └─(over target)─▶ Escalating(1) ─▶ Escalating(2) ─▶ Escalating(3) ─▶ Done
//!                           │                 │
//!                           └──(fits)─────────┴──────────────────────────▶ Done
//! ```
//!
//! The smallest result seen across all passes is kept, not the last one.

use crate::budget::CompressionBudget;
use crate::config::CompressionConfig;
use crate::error::{CompressError, Result};
use crate::escalation::{escalate_settings, EscalationTier};
use crate::incremental::{IncrementalCompressor, ProgressSpan};
use crate::method::{ensure_classification, Method};
use crate::potential::{CompressionPotential, MeasurementBoard, MethodMeasurement};
use crate::protocol::{JobRequest, ProgressReporter};
use crate::services::{DocumentService, ImageCodec, ImageItem, SaveOptions};
use crate::settings::{settings_for_target_percent, target_bytes_for_percent, SettingsVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings used by one pass and what that pass achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedSettings {
    pub tier: EscalationTier,
    pub settings: SettingsVector,
    /// Image quality after in-stream escalation.
    pub final_image_quality: u8,
    pub image_escalations: u32,
    pub achieved_size: u64,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub original_size: u64,
    pub achieved_size: u64,
    pub target_bytes: Option<u64>,
    pub document: Vec<u8>,
    /// Settings of the pass whose result was kept.
    pub settings: SettingsVector,
    pub trail: Vec<AppliedSettings>,
    /// Entries are still pending; see [`JobOrchestrator::measure_methods`].
    pub measurements: Vec<MethodMeasurement>,
    pub potential: CompressionPotential,
    /// Set when a target was requested but not reached.
    pub warning: Option<String>,
}

impl JobOutcome {
    pub fn met_target(&self) -> bool {
        self.target_bytes.map_or(true, |t| self.achieved_size <= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Initial,
    Escalating(EscalationTier),
    Done,
}

struct PassResult {
    document: Vec<u8>,
    applied: AppliedSettings,
}

impl PassResult {
    fn size(&self) -> u64 {
        self.applied.achieved_size
    }
}

pub struct JobOrchestrator<D, C>
where
    D: DocumentService,
    C: ImageCodec + 'static,
{
    documents: D,
    compressor: IncrementalCompressor<C>,
    codec: Arc<C>,
    config: CompressionConfig,
}

impl<D, C> JobOrchestrator<D, C>
where
    D: DocumentService,
    C: ImageCodec + 'static,
{
    pub fn new(documents: D, codec: C, config: CompressionConfig) -> Self {
        ensure_classification();
        let codec = Arc::new(codec);
        Self {
            documents,
            compressor: IncrementalCompressor::new(Arc::clone(&codec), config.batch_width),
            codec,
            config,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Run one job to completion.
    ///
    /// Missing the target is not an error: the best result is returned with a
    /// warning. Only input problems, unavailable services and supersession fail.
    pub async fn run(&self, request: &JobRequest, reporter: &ProgressReporter) -> Result<JobOutcome> {
        let input = &request.document;
        if input.is_empty() {
            return Err(CompressError::EmptyInput);
        }
        if input.len() > self.config.max_input_size {
            return Err(CompressError::InputTooLarge {
                size: input.len(),
                limit: self.config.max_input_size,
            });
        }
        self.check_services().await?;

        let original_size = input.len() as u64;
        let target_bytes = request
            .target_percent
            .map(|p| target_bytes_for_percent(original_size, p));
        let base = match (&request.settings, request.target_percent) {
            (Some(settings), _) => {
                let clean = settings.sanitized();
                if clean != *settings {
                    warn!(requested = settings.quality, used = clean.quality, "settings override quality out of range");
                }
                clean
            }
            (None, Some(p)) => settings_for_target_percent(p),
            (None, None) => SettingsVector::default(),
        };
        info!(original_size, ?target_bytes, quality = base.quality, "starting compression job");

        let max_tier = self.config.escalation_limit();
        let mut trail = Vec::new();
        let mut best: Option<PassResult> = None;
        let mut state = JobState::Initial;

        loop {
            state = match state {
                JobState::Initial => {
                    reporter.progress("compress", "Compressing document", 5);
                    let pass = self
                        .run_pass(input, &base, EscalationTier::Initial, target_bytes, reporter, span(5, 60))
                        .await?;
                    let size = pass.size();
                    keep_smallest(&mut best, pass, &mut trail);
                    match target_bytes {
                        Some(target) if size > target => JobState::Escalating(EscalationTier::Reduced),
                        _ => JobState::Done,
                    }
                }
                JobState::Escalating(tier) => {
                    reporter.token().check()?;
                    let settings = escalate_settings(tier.index(), &base);
                    let start = 60 + (tier.index() as u8 - 1) * 10;
                    reporter.progress(
                        "escalate",
                        format!("Target missed, retrying at tier {}", tier.index()),
                        start,
                    );
                    let pass = self
                        .run_pass(input, &settings, tier, target_bytes, reporter, span(start, start + 10))
                        .await?;
                    let fits = target_bytes.map_or(true, |t| pass.size() <= t);
                    keep_smallest(&mut best, pass, &mut trail);
                    if fits || tier.is_terminal() || tier.index() >= max_tier {
                        JobState::Done
                    } else {
                        JobState::Escalating(tier.next())
                    }
                }
                JobState::Done => break,
            };
        }

        let best = best.ok_or_else(|| CompressError::SaveFailed("no pass completed".into()))?;
        let achieved_size = best.size();
        let warning = match target_bytes {
            Some(target) if achieved_size > target => {
                let msg = format!(
                    "target of {} bytes not reached; best result is {} bytes",
                    target, achieved_size
                );
                warn!("{}", msg);
                Some(msg)
            }
            _ => None,
        };

        let board = if self.config.measure_methods {
            pending_board(original_size, &best.applied.settings)
        } else {
            MeasurementBoard::new(original_size)
        };

        reporter.token().check()?;
        reporter.progress("done", "Compression finished", 100);
        info!(original_size, achieved_size, passes = trail.len(), "compression job finished");

        Ok(JobOutcome {
            original_size,
            achieved_size,
            target_bytes,
            document: best.document,
            settings: best.applied.settings,
            trail,
            measurements: board.measurements(),
            potential: board.potential(),
            warning,
        })
    }

    async fn check_services(&self) -> Result<()> {
        self.documents.health_check().await.map_err(|e| match e {
            CompressError::DocumentServiceUnavailable(_) => e,
            other => CompressError::DocumentServiceUnavailable(other.to_string()),
        })?;
        self.codec.health_check().await.map_err(|e| match e {
            CompressError::CodecUnavailable(_) => e,
            other => CompressError::CodecUnavailable(other.to_string()),
        })
    }

    fn save_options(&self, settings: &SettingsVector) -> SaveOptions {
        SaveOptions {
            use_object_streams: self.config.use_object_streams
                && settings.is_enabled(Method::UseObjectStreams),
        }
    }

    /// Full pipeline at one settings vector: structural methods, the image
    /// stream, then save. Never returns something larger than the input.
    async fn run_pass(
        &self,
        input: &[u8],
        settings: &SettingsVector,
        tier: EscalationTier,
        target_bytes: Option<u64>,
        reporter: &ProgressReporter,
        progress: ProgressSpan,
    ) -> Result<PassResult> {
        let original_size = input.len() as u64;
        let mut handle = self.documents.load(input).await?;

        for method in structural_methods(settings) {
            reporter.token().check()?;
            if let Err(e) = self.documents.apply_method(&mut handle, method, settings).await {
                warn!(%method, error = %e, "structural method failed, skipping");
            }
        }

        let (items, budget) = image_stream(self.documents.images(&handle), original_size, target_bytes);
        let run = self
            .compressor
            .run(items, settings, budget, reporter, progress)
            .await?;

        for (id, encoded) in run.replacements() {
            if let Err(e) = self
                .documents
                .replace_image(&mut handle, id, encoded.data.clone(), encoded.format)
                .await
            {
                warn!(image = id, error = %e, "failed to re-embed image, keeping original");
            }
        }

        reporter.token().check()?;
        let saved = self.documents.save(&handle, self.save_options(settings)).await?;
        let document = if (saved.len() as u64) < original_size {
            saved
        } else {
            debug!(saved = saved.len(), original_size, "pass did not shrink document");
            input.to_vec()
        };

        let applied = AppliedSettings {
            tier,
            settings: *settings,
            final_image_quality: run.final_settings.quality,
            image_escalations: run.budget.current_tier,
            achieved_size: document.len() as u64,
        };
        info!(?tier, size = applied.achieved_size, quality = settings.quality, "pass finished");
        Ok(PassResult { document, applied })
    }

    /// Measure each enabled structural method in isolation against the input.
    ///
    /// Runs after the primary result is out. Every finished entry is reported
    /// through `reporter` together with the potential at that point; methods
    /// whose measurement fails are dropped from the board.
    pub async fn measure_methods(
        &self,
        input: &[u8],
        settings: &SettingsVector,
        reporter: &ProgressReporter,
    ) -> Result<MeasurementBoard> {
        let mut board = pending_board(input.len() as u64, settings);
        let methods: Vec<Method> = structural_methods(settings).collect();

        for method in methods {
            reporter.token().check()?;
            let measured = self.measure_one(input, method, settings).await;
            reporter.token().check()?;
            match measured {
                Ok(size) => {
                    board.record(MethodMeasurement::measured(method, board.original_size(), size))
                }
                Err(e) => {
                    warn!(%method, error = %e, "could not measure method");
                    board.discard(method);
                }
            }
            reporter.measurement(method, board.get(method).cloned(), board.potential());
        }
        debug!(measured = board.measurements().len(), "method measurement finished");
        Ok(board)
    }

    async fn measure_one(&self, input: &[u8], method: Method, settings: &SettingsVector) -> anyhow::Result<u64> {
        let mut handle = self.documents.load(input).await?;
        self.documents.apply_method(&mut handle, method, settings).await?;
        let saved = self.documents.save(&handle, self.save_options(settings)).await?;
        Ok(saved.len() as u64)
    }
}

/// Enabled methods the document model carries out, in table order.
/// Object streams are a save option rather than a mutation.
fn structural_methods(settings: &SettingsVector) -> impl Iterator<Item = Method> + '_ {
    settings
        .methods
        .enabled()
        .filter(|m| !m.is_image_method() && *m != Method::UseObjectStreams)
}

/// Board with one pending entry per structural method of `settings`.
fn pending_board(original_size: u64, settings: &SettingsVector) -> MeasurementBoard {
    let mut board = MeasurementBoard::new(original_size);
    for method in structural_methods(settings) {
        board.mark_pending(method);
    }
    board
}

/// Items the image pipeline can process, and the budget sized for exactly those.
fn image_stream(
    items: Vec<ImageItem>,
    original_size: u64,
    target_bytes: Option<u64>,
) -> (Vec<ImageItem>, CompressionBudget) {
    let items: Vec<ImageItem> = items.into_iter().filter(|i| i.kind().is_some()).collect();
    let baseline: u64 = items.iter().map(|i| i.original_size()).sum();
    let budget = match target_bytes {
        Some(target) => CompressionBudget::new(original_size, target, baseline, items.len()),
        None => CompressionBudget::unlimited(original_size, baseline, items.len()),
    };
    (items, budget)
}

fn keep_smallest(best: &mut Option<PassResult>, pass: PassResult, trail: &mut Vec<AppliedSettings>) {
    trail.push(pass.applied.clone());
    let better = best.as_ref().map_or(true, |b| pass.size() < b.size());
    if better {
        *best = Some(pass);
    }
}

fn span(start: u8, end: u8) -> ProgressSpan {
    ProgressSpan { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ImageFormat;

    fn pass(size: usize) -> PassResult {
        PassResult {
            document: vec![0; size],
            applied: AppliedSettings {
                tier: EscalationTier::Initial,
                settings: SettingsVector::default(),
                final_image_quality: 95,
                image_escalations: 0,
                achieved_size: size as u64,
            },
        }
    }

    #[test]
    fn test_keep_smallest_not_last() {
        let mut best = None;
        let mut trail = Vec::new();
        keep_smallest(&mut best, pass(900), &mut trail);
        keep_smallest(&mut best, pass(700), &mut trail);
        keep_smallest(&mut best, pass(800), &mut trail);
        assert_eq!(best.unwrap().size(), 700);
        assert_eq!(trail.len(), 3);
    }

    #[test]
    fn test_structural_methods_exclude_image_and_save_options() {
        let s = SettingsVector::nuclear();
        let methods: Vec<_> = structural_methods(&s).collect();
        assert!(!methods.contains(&Method::RecompressImages));
        assert!(!methods.contains(&Method::UseObjectStreams));
        assert!(methods.contains(&Method::FlattenForms));
        assert_eq!(methods.len(), Method::COUNT - 5);
    }

    fn image(id: u32, format: ImageFormat, size: usize) -> ImageItem {
        ImageItem {
            id,
            format,
            data: vec![0; size],
            width: 100,
            height: 100,
            has_alpha: false,
            display_size: None,
        }
    }

    #[test]
    fn test_image_stream_ignores_unprocessable_items() {
        let mut items = vec![
            image(1, ImageFormat::Jpeg, 40_000),
            image(2, ImageFormat::Png, 5_000),
        ];
        items.extend((3..9).map(|id| image(id, ImageFormat::Other, 100)));

        let (kept, budget) = image_stream(items, 100_000, Some(90_000));
        assert_eq!(kept.len(), 2);
        assert_eq!(budget.total_images, 2);
        assert_eq!(budget.baseline_size, 45_000);

        let (_, unlimited) = image_stream(vec![image(1, ImageFormat::Other, 10)], 1_000, None);
        assert_eq!(unlimited.total_images, 0);
        assert_eq!(unlimited.baseline_size, 0);
    }

    #[test]
    fn test_pending_board_covers_structural_methods() {
        let s = settings_for_target_percent(50.0);
        let board = pending_board(10_000, &s);
        assert_eq!(board.pending_count(), structural_methods(&s).count());
        assert!(board.get(Method::CleanMetadata).is_some_and(|m| m.pending));
        assert!(board.get(Method::RecompressImages).is_none());
        assert!(board.potential().has_pending);
    }
}
