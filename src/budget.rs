//! Run-scoped image byte budget and the escalation decisions made from it
//!
//! The budget is owned by a single control loop. Workers never touch it: they
//! return [`ItemOutcome`]s which the loop folds in, in batch order, via
//! [`CompressionBudget::record`]. Escalation decisions are pure functions of a
//! [`BudgetSnapshot`] and the current settings.

use crate::services::{ImageFormat, ItemKind};
use crate::settings::{clamp_quality, SettingsVector, BASE_RESOLUTION_DPI};
use serde::{Deserialize, Serialize};

/// Share of the image allowance actually handed out; the rest covers
/// container overhead from re-embedding.
pub const BUDGET_HEADROOM: f64 = 0.9;
/// Images are never assumed to be more than this share of the document.
pub const MAX_IMAGE_SHARE: f64 = 0.95;
pub const ESCALATION_THRESHOLD: f64 = 1.1;
const DOWNSAMPLE_RATIO: f64 = 1.3;
const REDUCED_RESOLUTION_RATIO: f64 = 1.5;
const BASE_RESOLUTION_RATIO: f64 = 2.0;
const REDUCED_RESOLUTION_DPI: u32 = 96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionBudget {
    pub original_size: u64,
    pub target_bytes: u64,
    /// Combined original size of every image in the stream.
    pub baseline_size: u64,
    /// Bytes assumed to belong to everything that is not an image.
    pub estimated_overhead: u64,
    pub image_budget_bytes: u64,
    pub image_bytes_so_far: u64,
    pub images_processed: usize,
    pub total_images: usize,
    pub escalated: bool,
    pub current_tier: u32,
}

impl CompressionBudget {
    pub fn new(original_size: u64, target_bytes: u64, baseline_size: u64, total_images: usize) -> Self {
        let image_share = if original_size == 0 {
            0.0
        } else {
            (baseline_size as f64 / original_size as f64).min(MAX_IMAGE_SHARE)
        };
        let non_image_estimate = original_size as f64 * (1.0 - image_share);
        let image_budget = ((target_bytes as f64 - non_image_estimate) * BUDGET_HEADROOM).max(0.0);

        Self {
            original_size,
            target_bytes,
            baseline_size,
            estimated_overhead: non_image_estimate.round() as u64,
            image_budget_bytes: image_budget.round() as u64,
            image_bytes_so_far: 0,
            images_processed: 0,
            total_images,
            escalated: false,
            current_tier: 0,
        }
    }

    /// A budget that never triggers escalation, for runs without a target.
    pub fn unlimited(original_size: u64, baseline_size: u64, total_images: usize) -> Self {
        Self {
            original_size,
            target_bytes: u64::MAX,
            baseline_size,
            estimated_overhead: original_size.saturating_sub(baseline_size),
            image_budget_bytes: u64::MAX,
            image_bytes_so_far: 0,
            images_processed: 0,
            total_images,
            escalated: false,
            current_tier: 0,
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            image_budget_bytes: self.image_budget_bytes,
            image_bytes_so_far: self.image_bytes_so_far,
            images_processed: self.images_processed,
            total_images: self.total_images,
            escalated: self.escalated,
        }
    }

    /// Charge one finished item.
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.image_bytes_so_far = self.image_bytes_so_far.saturating_add(outcome.charged_bytes());
        self.images_processed += 1;
    }

    /// Swap an item's charge for a smaller one after re-compression.
    pub fn recharge(&mut self, old_bytes: u64, new_bytes: u64) {
        self.image_bytes_so_far = self
            .image_bytes_so_far
            .saturating_sub(old_bytes)
            .saturating_add(new_bytes);
    }

    pub fn apply_plan(&mut self, plan: &BatchPlan) {
        if plan.steps > 0 {
            self.escalated = true;
            self.current_tier += plan.steps;
        }
    }

    pub fn over_budget(&self) -> bool {
        self.image_bytes_so_far > self.image_budget_bytes
    }
}

/// Immutable view of the budget handed to the escalation check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetSnapshot {
    pub image_budget_bytes: u64,
    pub image_bytes_so_far: u64,
    pub images_processed: usize,
    pub total_images: usize,
    pub escalated: bool,
}

impl BudgetSnapshot {
    /// Average bytes used per processed item over average bytes left per
    /// remaining item. 1.0 before anything has been processed.
    pub fn overshoot_ratio(&self) -> f64 {
        if self.images_processed == 0 {
            return 1.0;
        }
        let avg_used = self.image_bytes_so_far as f64 / self.images_processed as f64;
        let remaining_items = self.total_images.saturating_sub(self.images_processed).max(1);
        let remaining_budget = self.image_budget_bytes as f64 - self.image_bytes_so_far as f64;
        let avg_remaining = remaining_budget / remaining_items as f64;
        avg_used / avg_remaining.max(1.0)
    }
}

/// One escalation step for the given overshoot, or `None` at or below
/// [`ESCALATION_THRESHOLD`].
pub fn escalate_for_overshoot(settings: &SettingsVector, ratio: f64) -> Option<SettingsVector> {
    if ratio <= ESCALATION_THRESHOLD {
        return None;
    }
    let mut next = *settings;
    next.quality = clamp_quality(settings.quality as f64 / ratio);
    if ratio > BASE_RESOLUTION_RATIO {
        next.target_resolution = BASE_RESOLUTION_DPI;
    } else if ratio > REDUCED_RESOLUTION_RATIO {
        next.target_resolution = next.target_resolution.min(REDUCED_RESOLUTION_DPI);
    }
    if ratio > DOWNSAMPLE_RATIO {
        next.downsampling_enabled = true;
    }
    Some(next)
}

/// Settings to use for the next batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPlan {
    pub settings: SettingsVector,
    pub ratio: f64,
    /// Escalation steps applied at this boundary (0..=2).
    pub steps: u32,
}

/// Decide the settings for the next batch from a snapshot taken before it.
///
/// Once the run has escalated the check is made a second time against the
/// same snapshot, so one boundary can compound two steps.
pub fn plan_batch(snapshot: &BudgetSnapshot, settings: &SettingsVector) -> BatchPlan {
    let ratio = snapshot.overshoot_ratio();
    let mut plan = BatchPlan {
        settings: *settings,
        ratio,
        steps: 0,
    };
    let mut escalated = snapshot.escalated;

    if let Some(next) = escalate_for_overshoot(&plan.settings, ratio) {
        plan.settings = next;
        plan.steps += 1;
        escalated = true;
    }
    if escalated {
        if let Some(next) = escalate_for_overshoot(&plan.settings, ratio) {
            plan.settings = next;
            plan.steps += 1;
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooSmall,
    Disabled,
    DecodeFailed,
    EncodeFailed,
    NoSavings,
    WorkerFailed,
}

/// Result of pushing one item through the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub id: u32,
    pub kind: ItemKind,
    pub original_size: u64,
    pub result: Result<EncodedImage, SkipReason>,
}

impl ItemOutcome {
    pub fn skipped(id: u32, kind: ItemKind, original_size: u64, reason: SkipReason) -> Self {
        Self {
            id,
            kind,
            original_size,
            result: Err(reason),
        }
    }

    /// Bytes this item costs against the budget; skipped items cost their original size.
    pub fn charged_bytes(&self) -> u64 {
        match &self.result {
            Ok(encoded) => encoded.data.len() as u64,
            Err(_) => self.original_size,
        }
    }
}
