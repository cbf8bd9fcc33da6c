//! Escalation ladder: progressively more aggressive settings for re-runs

use crate::method::Method;
use crate::settings::{clamp_quality, SettingsVector, BASE_RESOLUTION_DPI};
use serde::{Deserialize, Serialize};

/// One rung of the ladder. Indices above 3 saturate to [`EscalationTier::Nuclear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTier {
    Initial,
    Reduced,
    Aggressive,
    Nuclear,
}

impl EscalationTier {
    pub fn new(tier: u32) -> Self {
        match tier.min(3) {
            0 => Self::Initial,
            1 => Self::Reduced,
            2 => Self::Aggressive,
            _ => Self::Nuclear,
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Nuclear
    }

    pub fn next(self) -> Self {
        Self::new(self.index() + 1)
    }
}

const TIER1_METHODS: &[Method] = &[
    Method::RecompressImages,
    Method::DownsampleImages,
    Method::ConvertPngToJpeg,
    Method::RemoveAlphaChannels,
    Method::RemoveAttachments,
    Method::RemoveAlternateContent,
    Method::RemoveInvisibleText,
    Method::ReduceVectorPrecision,
    Method::RemoveDuplicateResources,
    Method::DeduplicateFonts,
    Method::RemoveUnusedFonts,
    Method::CleanMetadata,
    Method::StripColorProfiles,
    Method::DeduplicateShadings,
];

const TIER2_METHODS: &[Method] = &[
    Method::CompressStreams,
    Method::UseObjectStreams,
    Method::RemoveUnusedObjects,
    Method::RemoveEmptyStreams,
    Method::RemoveThumbnails,
    Method::RemoveJavaScript,
    Method::RemoveStructureTree,
    Method::RemovePieceInfo,
    Method::RemoveBookmarks,
    Method::RemoveNamedDestinations,
    Method::RemoveHiddenLayers,
    Method::RemovePageLabels,
    Method::RemoveArticleThreads,
    Method::FlattenForms,
    Method::FlattenAnnotations,
];

/// Settings for `tier`, derived from `base`.
///
/// Tiers only ever switch methods on. Tier 0 returns `base` unchanged; tier 3
/// and anything above it return the same nuclear vector regardless of `base`.
pub fn escalate_settings(tier: u32, base: &SettingsVector) -> SettingsVector {
    let mut out = *base;
    match EscalationTier::new(tier) {
        EscalationTier::Initial => {}
        EscalationTier::Reduced => {
            out.quality = clamp_quality(base.quality as f64 * 0.5);
            apply_common(&mut out, TIER1_METHODS);
        }
        EscalationTier::Aggressive => {
            out.quality = clamp_quality(base.quality as f64 * 0.3);
            apply_common(&mut out, TIER1_METHODS);
            apply_common(&mut out, TIER2_METHODS);
        }
        EscalationTier::Nuclear => out = SettingsVector::nuclear(),
    }
    out
}

fn apply_common(out: &mut SettingsVector, methods: &[Method]) {
    out.target_resolution = BASE_RESOLUTION_DPI;
    out.downsampling_enabled = true;
    for m in methods {
        out.enable(*m);
    }
}
