//! Optimization methods and their risk classification
//!
//! Every method belongs to exactly one [`RiskTier`]. The tier assignment is an
//! exhaustive `match`, so a new method cannot be added without classifying it;
//! [`ensure_classification`] additionally checks that [`Method::ALL`] lists
//! every method exactly once.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// How much visual or structural fidelity a method may sacrifice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Safe,
    Medium,
    High,
}

impl RiskTier {
    /// Tiers in selection priority order.
    pub const ORDERED: [RiskTier; 3] = [RiskTier::Safe, RiskTier::Medium, RiskTier::High];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    // Lossless container work
    CompressStreams,
    UseObjectStreams,
    RemoveUnusedObjects,
    RemoveDuplicateResources,
    DeduplicateFonts,
    RemoveUnusedFonts,
    CleanMetadata,
    StripColorProfiles,
    DeduplicateShadings,
    RemoveThumbnails,
    RemoveEmptyStreams,
    // Images
    RecompressImages,
    DownsampleImages,
    ConvertPngToJpeg,
    RemoveAlphaChannels,
    // Content that is rarely rendered
    RemoveAttachments,
    RemoveAlternateContent,
    RemoveInvisibleText,
    ReduceVectorPrecision,
    #[serde(rename = "remove_javascript")]
    RemoveJavaScript,
    RemoveStructureTree,
    RemovePieceInfo,
    // Navigation and interactivity
    RemoveBookmarks,
    RemoveNamedDestinations,
    RemoveHiddenLayers,
    RemovePageLabels,
    RemoveArticleThreads,
    FlattenForms,
    FlattenAnnotations,
    ConvertCmykToRgb,
}

impl Method {
    pub const COUNT: usize = 30;

    pub const ALL: [Method; Method::COUNT] = [
        Method::CompressStreams,
        Method::UseObjectStreams,
        Method::RemoveUnusedObjects,
        Method::RemoveDuplicateResources,
        Method::DeduplicateFonts,
        Method::RemoveUnusedFonts,
        Method::CleanMetadata,
        Method::StripColorProfiles,
        Method::DeduplicateShadings,
        Method::RemoveThumbnails,
        Method::RemoveEmptyStreams,
        Method::RecompressImages,
        Method::DownsampleImages,
        Method::ConvertPngToJpeg,
        Method::RemoveAlphaChannels,
        Method::RemoveAttachments,
        Method::RemoveAlternateContent,
        Method::RemoveInvisibleText,
        Method::ReduceVectorPrecision,
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
        Method::ConvertCmykToRgb,
    ];

    pub fn risk_tier(self) -> RiskTier {
        use Method::*;
        match self {
            CompressStreams | UseObjectStreams | RemoveUnusedObjects | RemoveDuplicateResources
            | DeduplicateFonts | RemoveUnusedFonts | CleanMetadata | StripColorProfiles
            | DeduplicateShadings | RemoveThumbnails | RemoveEmptyStreams => RiskTier::Safe,

            RecompressImages | DownsampleImages | ConvertPngToJpeg | RemoveAlphaChannels
            | RemoveAttachments | RemoveAlternateContent | RemoveInvisibleText
            | ReduceVectorPrecision | RemoveJavaScript | RemoveStructureTree | RemovePieceInfo => {
                RiskTier::Medium
            }

            RemoveBookmarks | RemoveNamedDestinations | RemoveHiddenLayers | RemovePageLabels
            | RemoveArticleThreads | FlattenForms | FlattenAnnotations | ConvertCmykToRgb => {
                RiskTier::High
            }
        }
    }

    /// Methods carried out by the image pipeline rather than the document model.
    pub fn is_image_method(self) -> bool {
        matches!(
            self,
            Method::RecompressImages
                | Method::DownsampleImages
                | Method::ConvertPngToJpeg
                | Method::RemoveAlphaChannels
        )
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        use Method::*;
        match self {
            CompressStreams => "compress_streams",
            UseObjectStreams => "use_object_streams",
            RemoveUnusedObjects => "remove_unused_objects",
            RemoveDuplicateResources => "remove_duplicate_resources",
            DeduplicateFonts => "deduplicate_fonts",
            RemoveUnusedFonts => "remove_unused_fonts",
            CleanMetadata => "clean_metadata",
            StripColorProfiles => "strip_color_profiles",
            DeduplicateShadings => "deduplicate_shadings",
            RemoveThumbnails => "remove_thumbnails",
            RemoveEmptyStreams => "remove_empty_streams",
            RecompressImages => "recompress_images",
            DownsampleImages => "downsample_images",
            ConvertPngToJpeg => "convert_png_to_jpeg",
            RemoveAlphaChannels => "remove_alpha_channels",
            RemoveAttachments => "remove_attachments",
            RemoveAlternateContent => "remove_alternate_content",
            RemoveInvisibleText => "remove_invisible_text",
            ReduceVectorPrecision => "reduce_vector_precision",
            RemoveJavaScript => "remove_javascript",
            RemoveStructureTree => "remove_structure_tree",
            RemovePieceInfo => "remove_piece_info",
            RemoveBookmarks => "remove_bookmarks",
            RemoveNamedDestinations => "remove_named_destinations",
            RemoveHiddenLayers => "remove_hidden_layers",
            RemovePageLabels => "remove_page_labels",
            RemoveArticleThreads => "remove_article_threads",
            FlattenForms => "flatten_forms",
            FlattenAnnotations => "flatten_annotations",
            ConvertCmykToRgb => "convert_cmyk_to_rgb",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All methods of one tier, in [`Method::ALL`] order.
pub fn methods_in_tier(tier: RiskTier) -> impl Iterator<Item = Method> {
    Method::ALL.into_iter().filter(move |m| m.risk_tier() == tier)
}

/// Check that [`Method::ALL`] is a total, duplicate-free listing.
pub fn verify_classification() -> Result<(), String> {
    let mut seen = [false; Method::COUNT];
    for (position, method) in Method::ALL.iter().enumerate() {
        let idx = method.index();
        if idx >= Method::COUNT {
            return Err(format!("{} has index {} outside the method table", method, idx));
        }
        if seen[idx] {
            return Err(format!("{} is listed twice", method));
        }
        if idx != position {
            return Err(format!("{} is listed at position {} but has index {}", method, position, idx));
        }
        seen[idx] = true;
    }
    let tiered: usize = RiskTier::ORDERED.iter().map(|t| methods_in_tier(*t).count()).sum();
    if tiered != Method::COUNT {
        return Err(format!("tiers cover {} of {} methods", tiered, Method::COUNT));
    }
    Ok(())
}

/// Runs [`verify_classification`] once per process and panics on failure.
pub fn ensure_classification() {
    static CHECKED: OnceLock<Result<(), String>> = OnceLock::new();
    if let Err(msg) = CHECKED.get_or_init(verify_classification) {
        panic!("method classification table is inconsistent: {}", msg);
    }
}
