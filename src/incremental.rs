//! Budget-driven image recompression
//!
//! Items are processed largest first in small concurrent batches. Between
//! batches the control loop compares spending against the budget and lowers
//! quality/resolution before most items are touched, instead of finishing a
//! whole pass and retrying from scratch. Lossless rasters are converted once
//! at the final settings, and if the stream still ends over budget the largest
//! results get one more, harsher re-encode.

use crate::budget::{plan_batch, CompressionBudget, EncodedImage, ItemOutcome, SkipReason};
use crate::error::Result;
use crate::method::Method;
use crate::protocol::ProgressReporter;
use crate::services::{ImageCodec, ImageFormat, ImageItem, ItemKind};
use crate::settings::{clamp_quality, SettingsVector, BASE_RESOLUTION_DPI};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_WIDTH: usize = 4;
const REESCALATION_SHARE: f64 = 0.3;
const REESCALATION_MAX_ITEMS: usize = 10;

/// Percentage range of the overall job that this run reports progress in.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSpan {
    pub start: u8,
    pub end: u8,
}

impl ProgressSpan {
    fn at(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let width = self.end.saturating_sub(self.start) as usize;
        self.start + (width * done / total) as u8
    }
}

#[derive(Debug, Clone)]
pub struct IncrementalRun {
    /// One outcome per input item, in processing order.
    pub outcomes: Vec<ItemOutcome>,
    pub budget: CompressionBudget,
    /// Settings after all in-stream escalation.
    pub final_settings: SettingsVector,
    pub reescalated: usize,
}

impl IncrementalRun {
    pub fn replacements(&self) -> impl Iterator<Item = (u32, &EncodedImage)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|e| (o.id, e)))
    }
}

pub struct IncrementalCompressor<C: ImageCodec + 'static> {
    codec: Arc<C>,
    batch_width: usize,
}

impl<C: ImageCodec + 'static> IncrementalCompressor<C> {
    pub fn new(codec: Arc<C>, batch_width: usize) -> Self {
        Self {
            codec,
            batch_width: batch_width.max(1),
        }
    }

    /// Run the image stream against `budget`.
    ///
    /// Items of unknown format are ignored entirely. Fails only when the job is
    /// superseded; per-item failures are charged at original size.
    pub async fn run(
        &self,
        items: Vec<ImageItem>,
        settings: &SettingsVector,
        mut budget: CompressionBudget,
        reporter: &ProgressReporter,
        span: ProgressSpan,
    ) -> Result<IncrementalRun> {
        let mut reencodable = Vec::new();
        let mut convertible = Vec::new();
        for item in items {
            match item.kind() {
                Some(ItemKind::Reencodable) => reencodable.push(Arc::new(item)),
                Some(ItemKind::Convertible) => convertible.push(Arc::new(item)),
                None => {}
            }
        }
        reencodable.sort_by(|a, b| b.original_size().cmp(&a.original_size()));
        let total = reencodable.len() + convertible.len();

        let mut current = *settings;
        let mut outcomes = Vec::with_capacity(total);

        for batch in reencodable.chunks(self.batch_width) {
            reporter.token().check()?;

            if budget.images_processed > 0 {
                let plan = plan_batch(&budget.snapshot(), &current);
                if plan.steps > 0 {
                    debug!(
                        ratio = plan.ratio,
                        steps = plan.steps,
                        quality = plan.settings.quality,
                        resolution = plan.settings.target_resolution,
                        "escalating image settings mid-stream"
                    );
                }
                budget.apply_plan(&plan);
                current = plan.settings;
            }

            let batch_outcomes = self.process_batch(batch, ItemKind::Reencodable, &current).await;
            reporter.token().check()?;
            for outcome in batch_outcomes {
                budget.record(&outcome);
                outcomes.push(outcome);
            }
            reporter.progress(
                "images",
                format!("Compressed {} of {} images", outcomes.len(), total),
                span.at(outcomes.len(), total),
            );
        }

        for batch in convertible.chunks(self.batch_width) {
            reporter.token().check()?;
            let batch_outcomes = self.process_batch(batch, ItemKind::Convertible, &current).await;
            reporter.token().check()?;
            for outcome in batch_outcomes {
                budget.record(&outcome);
                outcomes.push(outcome);
            }
        }

        let mut reescalated = 0;
        if budget.over_budget() {
            reporter.token().check()?;
            let sources: HashMap<u32, Arc<ImageItem>> =
                reencodable.iter().map(|item| (item.id, Arc::clone(item))).collect();
            reescalated = self
                .reescalate(&mut outcomes, &sources, &current, &mut budget, reporter)
                .await?;
        }

        info!(
            items = total,
            used = budget.image_bytes_so_far,
            budget = budget.image_budget_bytes,
            quality = current.quality,
            reescalated,
            "image stream finished"
        );

        Ok(IncrementalRun {
            outcomes,
            budget,
            final_settings: current,
            reescalated,
        })
    }

    /// Process one batch concurrently; outcomes come back in batch order.
    async fn process_batch(
        &self,
        batch: &[Arc<ImageItem>],
        kind: ItemKind,
        settings: &SettingsVector,
    ) -> Vec<ItemOutcome> {
        let handles: Vec<_> = batch
            .iter()
            .map(|item| {
                let codec = Arc::clone(&self.codec);
                let item = Arc::clone(item);
                let settings = *settings;
                tokio::spawn(async move { compress_item(codec.as_ref(), &item, kind, &settings).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(batch.len());
        for (item, handle) in batch.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(image = item.id, error = %e, "image worker failed");
                    ItemOutcome::skipped(item.id, kind, item.original_size(), SkipReason::WorkerFailed)
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Re-encode the largest results harder until the stream fits. Returns the
    /// number of results replaced.
    ///
    /// Only items the first pass was allowed to touch are candidates: a source
    /// skipped as disabled or too small keeps its original bytes.
    async fn reescalate(
        &self,
        outcomes: &mut [ItemOutcome],
        sources: &HashMap<u32, Arc<ImageItem>>,
        settings: &SettingsVector,
        budget: &mut CompressionBudget,
        reporter: &ProgressReporter,
    ) -> Result<usize> {
        let mut order: Vec<usize> = (0..outcomes.len()).collect();
        order.sort_by(|a, b| outcomes[*b].charged_bytes().cmp(&outcomes[*a].charged_bytes()));
        let take = ((outcomes.len() as f64 * REESCALATION_SHARE).ceil() as usize).min(REESCALATION_MAX_ITEMS);

        let quality = clamp_quality(settings.quality as f64 * 0.5);
        let mut replaced = 0;

        for idx in order.into_iter().take(take) {
            if !budget.over_budget() {
                break;
            }
            let outcome = &mut outcomes[idx];
            if !reencode_eligible(outcome, settings) {
                continue;
            }
            let Some(source) = sources.get(&outcome.id) else {
                continue;
            };

            let max_dimension = Some(source.max_dimension_at(BASE_RESOLUTION_DPI));
            let encoded = encode(self.codec.as_ref(), source, quality, max_dimension).await;
            reporter.token().check()?;
            let Some(data) = encoded else {
                continue;
            };

            let before = outcome.charged_bytes();
            let after = data.len() as u64;
            if after < before {
                debug!(image = outcome.id, before, after, quality, "re-escalated image");
                budget.recharge(before, after);
                outcome.result = Ok(EncodedImage {
                    data,
                    format: ImageFormat::Jpeg,
                });
                replaced += 1;
            }
        }
        Ok(replaced)
    }
}

fn reencode_eligible(outcome: &ItemOutcome, settings: &SettingsVector) -> bool {
    outcome.kind == ItemKind::Reencodable
        && settings.is_enabled(Method::RecompressImages)
        && outcome.original_size >= settings.min_image_bytes as u64
        && !matches!(
            outcome.result,
            Err(SkipReason::Disabled) | Err(SkipReason::TooSmall)
        )
}

async fn compress_item<C: ImageCodec + ?Sized>(
    codec: &C,
    item: &ImageItem,
    kind: ItemKind,
    settings: &SettingsVector,
) -> ItemOutcome {
    let skip = |reason| ItemOutcome::skipped(item.id, kind, item.original_size(), reason);

    let enabled = match kind {
        ItemKind::Reencodable => settings.is_enabled(Method::RecompressImages),
        ItemKind::Convertible => {
            settings.is_enabled(Method::ConvertPngToJpeg)
                && (!item.has_alpha || settings.is_enabled(Method::RemoveAlphaChannels))
        }
    };
    if !enabled {
        return skip(SkipReason::Disabled);
    }
    if item.data.len() < settings.min_image_bytes {
        return skip(SkipReason::TooSmall);
    }

    let Some(pixels) = codec.decode(&item.data, item.format).await else {
        warn!(image = item.id, "failed to decode image");
        return skip(SkipReason::DecodeFailed);
    };
    let max_dimension = settings
        .downsampling_enabled
        .then(|| item.max_dimension_at(settings.target_resolution));
    let Some(data) = codec
        .encode(&pixels, ImageFormat::Jpeg, settings.quality, max_dimension)
        .await
    else {
        warn!(image = item.id, "failed to encode image");
        return skip(SkipReason::EncodeFailed);
    };

    if data.len() as u64 >= item.original_size() {
        return skip(SkipReason::NoSavings);
    }
    ItemOutcome {
        id: item.id,
        kind,
        original_size: item.original_size(),
        result: Ok(EncodedImage {
            data,
            format: ImageFormat::Jpeg,
        }),
    }
}

async fn encode<C: ImageCodec + ?Sized>(
    codec: &C,
    item: &ImageItem,
    quality: u8,
    max_dimension: Option<u32>,
) -> Option<Vec<u8>> {
    let pixels = codec.decode(&item.data, item.format).await?;
    codec.encode(&pixels, ImageFormat::Jpeg, quality, max_dimension).await
}
