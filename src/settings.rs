//! Settings vectors and the target-percentage mapper

use crate::method::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_QUALITY: u8 = 5;
pub const MAX_QUALITY: u8 = 100;
/// Lowest resolution any vector asks for.
pub const BASE_RESOLUTION_DPI: u32 = 72;
pub const DEFAULT_MIN_IMAGE_BYTES: usize = 10 * 1024;
pub const NUCLEAR_MIN_IMAGE_BYTES: usize = 1024;

const MIN_TARGET_PERCENT: f64 = 10.0;
const MAX_TARGET_PERCENT: f64 = 100.0;
const NUCLEAR_PERCENT: f64 = 15.0;
const DOWNSAMPLING_PERCENT: f64 = 80.0;

/// A total Method → bool mapping.
///
/// Serialized as a map keyed by method name; deserialization rejects maps that
/// omit any method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "BTreeMap<Method, bool>", try_from = "BTreeMap<Method, bool>")]
pub struct MethodToggles([bool; Method::COUNT]);

impl MethodToggles {
    pub fn none() -> Self {
        Self([false; Method::COUNT])
    }

    pub fn all() -> Self {
        Self([true; Method::COUNT])
    }

    pub fn get(&self, method: Method) -> bool {
        self.0[method.index()]
    }

    pub fn set(&mut self, method: Method, enabled: bool) {
        self.0[method.index()] = enabled;
    }

    pub fn count_enabled(&self) -> usize {
        self.0.iter().filter(|on| **on).count()
    }

    pub fn enabled(&self) -> impl Iterator<Item = Method> + '_ {
        Method::ALL.into_iter().filter(move |m| self.get(*m))
    }
}

impl From<MethodToggles> for BTreeMap<Method, bool> {
    fn from(toggles: MethodToggles) -> Self {
        Method::ALL.into_iter().map(|m| (m, toggles.get(m))).collect()
    }
}

impl TryFrom<BTreeMap<Method, bool>> for MethodToggles {
    type Error = String;

    fn try_from(map: BTreeMap<Method, bool>) -> Result<Self, Self::Error> {
        let mut toggles = MethodToggles::none();
        for m in Method::ALL {
            let on = map.get(&m).ok_or_else(|| format!("missing method toggle: {}", m))?;
            toggles.set(m, *on);
        }
        Ok(toggles)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettingsVector {
    /// Lossy image quality, 5..=100.
    pub quality: u8,
    /// Target image resolution in DPI.
    pub target_resolution: u32,
    pub downsampling_enabled: bool,
    /// Images smaller than this are left untouched.
    pub min_image_bytes: usize,
    pub methods: MethodToggles,
}

impl SettingsVector {
    pub fn is_enabled(&self, method: Method) -> bool {
        self.methods.get(method)
    }

    pub fn enable(&mut self, method: Method) {
        self.methods.set(method, true);
    }

    pub fn enabled_method_count(&self) -> usize {
        self.methods.count_enabled()
    }

    /// Same vector with quality pulled back into 5..=100.
    pub fn sanitized(mut self) -> Self {
        self.quality = clamp_quality(self.quality as f64);
        self
    }

    /// Every method on, lowest quality and resolution.
    pub fn nuclear() -> Self {
        Self {
            quality: MIN_QUALITY,
            target_resolution: BASE_RESOLUTION_DPI,
            downsampling_enabled: true,
            min_image_bytes: NUCLEAR_MIN_IMAGE_BYTES,
            methods: MethodToggles::all(),
        }
    }
}

impl Default for SettingsVector {
    fn default() -> Self {
        settings_for_target_percent(MAX_TARGET_PERCENT)
    }
}

pub fn clamp_quality(q: f64) -> u8 {
    q.round().clamp(MIN_QUALITY as f64, MAX_QUALITY as f64) as u8
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        return MAX_TARGET_PERCENT;
    }
    percent.clamp(MIN_TARGET_PERCENT, MAX_TARGET_PERCENT)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Highest target percentage at which a method is still switched on.
fn enable_threshold(method: Method) -> f64 {
    use Method::*;
    match method {
        CompressStreams | UseObjectStreams | RemoveUnusedObjects | RemoveEmptyStreams
        | RecompressImages => MAX_TARGET_PERCENT,

        RemoveDuplicateResources | DeduplicateShadings | DeduplicateFonts => 85.0,
        CleanMetadata | StripColorProfiles | RemoveThumbnails => 80.0,
        DownsampleImages => DOWNSAMPLING_PERCENT,
        RemoveUnusedFonts | RemoveJavaScript | RemovePieceInfo => 70.0,
        RemoveStructureTree => 60.0,

        ConvertPngToJpeg | RemoveAlphaChannels | RemoveAttachments | RemoveAlternateContent
        | RemoveInvisibleText | ReduceVectorPrecision => 50.0,

        RemoveBookmarks | RemoveNamedDestinations | RemoveHiddenLayers | RemovePageLabels
        | RemoveArticleThreads | FlattenForms | FlattenAnnotations | ConvertCmykToRgb => 30.0,
    }
}

fn resolution_for_percent(p: f64) -> u32 {
    let dpi = if p <= 40.0 {
        BASE_RESOLUTION_DPI as f64
    } else if p <= 70.0 {
        lerp(72.0, 150.0, (p - 40.0) / 30.0)
    } else {
        lerp(150.0, 300.0, (p - 70.0) / 30.0)
    };
    dpi.round() as u32
}

/// Map a target size, as a percentage of the original, to an initial settings vector.
///
/// Percentages are clamped to 10..=100. The mapping is deterministic and
/// monotone: a smaller percentage never yields a higher quality or fewer
/// enabled methods.
pub fn settings_for_target_percent(percent: f64) -> SettingsVector {
    let p = clamp_percent(percent);
    let quality = clamp_quality(lerp(10.0, 95.0, (p - MIN_TARGET_PERCENT) / 90.0));

    if p <= NUCLEAR_PERCENT {
        return SettingsVector {
            quality: quality.max(MIN_QUALITY),
            ..SettingsVector::nuclear()
        };
    }

    let mut methods = MethodToggles::none();
    for m in Method::ALL {
        methods.set(m, p <= enable_threshold(m));
    }

    SettingsVector {
        quality,
        target_resolution: resolution_for_percent(p),
        downsampling_enabled: p <= DOWNSAMPLING_PERCENT,
        min_image_bytes: DEFAULT_MIN_IMAGE_BYTES,
        methods,
    }
}

/// Byte target for a percentage of `original_size`, using the same clamping
/// as [`settings_for_target_percent`].
pub fn target_bytes_for_percent(original_size: u64, percent: f64) -> u64 {
    (original_size as f64 * clamp_percent(percent) / 100.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_endpoints() {
        assert_eq!(settings_for_target_percent(10.0).quality, 10);
        assert_eq!(settings_for_target_percent(100.0).quality, 95);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(settings_for_target_percent(3.0), settings_for_target_percent(10.0));
        assert_eq!(settings_for_target_percent(250.0), settings_for_target_percent(100.0));
        assert_eq!(settings_for_target_percent(f64::NAN), settings_for_target_percent(100.0));
    }

    #[test]
    fn test_deterministic() {
        for p in [12.0, 37.5, 64.0, 91.0] {
            assert_eq!(settings_for_target_percent(p), settings_for_target_percent(p));
        }
    }

    #[test]
    fn test_monotone_over_range() {
        let mut prev = settings_for_target_percent(10.0);
        for p in 11..=100 {
            let cur = settings_for_target_percent(p as f64);
            assert!(prev.quality <= cur.quality, "quality rose going down at {}", p);
            assert!(
                prev.enabled_method_count() >= cur.enabled_method_count(),
                "method count grew at {}",
                p
            );
            prev = cur;
        }
    }

    #[test]
    fn test_resolution_zones() {
        assert_eq!(settings_for_target_percent(30.0).target_resolution, 72);
        assert_eq!(settings_for_target_percent(40.0).target_resolution, 72);
        assert_eq!(settings_for_target_percent(55.0).target_resolution, 111);
        assert_eq!(settings_for_target_percent(70.0).target_resolution, 150);
        assert_eq!(settings_for_target_percent(100.0).target_resolution, 300);
    }

    #[test]
    fn test_downsampling_threshold() {
        assert!(settings_for_target_percent(80.0).downsampling_enabled);
        assert!(!settings_for_target_percent(81.0).downsampling_enabled);
    }

    #[test]
    fn test_banding() {
        let mid = settings_for_target_percent(50.0);
        assert!(mid.is_enabled(Method::ConvertPngToJpeg));
        assert!(!mid.is_enabled(Method::FlattenForms));

        let light = settings_for_target_percent(51.0);
        assert!(!light.is_enabled(Method::ConvertPngToJpeg));
        assert!(light.is_enabled(Method::CleanMetadata));

        let max = settings_for_target_percent(30.0);
        assert!(max.is_enabled(Method::RemoveBookmarks));
        assert!(max.is_enabled(Method::ConvertCmykToRgb));

        let full = settings_for_target_percent(100.0);
        assert!(full.is_enabled(Method::CompressStreams));
        assert!(!full.is_enabled(Method::RemoveDuplicateResources));
    }

    #[test]
    fn test_nuclear_override() {
        let s = settings_for_target_percent(15.0);
        assert_eq!(s.enabled_method_count(), Method::COUNT);
        assert_eq!(s.target_resolution, 72);
        assert_eq!(s.min_image_bytes, NUCLEAR_MIN_IMAGE_BYTES);
        assert_eq!(s.quality, 15);

        let above = settings_for_target_percent(16.0);
        assert_eq!(above.min_image_bytes, DEFAULT_MIN_IMAGE_BYTES);
    }

    #[test]
    fn test_target_bytes() {
        assert_eq!(target_bytes_for_percent(10_000, 50.0), 5_000);
        assert_eq!(target_bytes_for_percent(10_000, 1.0), 1_000);
    }

    #[test]
    fn test_toggles_serialize_as_total_map() {
        let s = settings_for_target_percent(45.0);
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["methods"].as_object().unwrap().len(), Method::COUNT);
        let back: SettingsVector = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_partial_toggles_rejected() {
        let json = serde_json::json!({
            "quality": 50,
            "target_resolution": 150,
            "downsampling_enabled": true,
            "min_image_bytes": 1024,
            "methods": { "clean_metadata": true }
        });
        assert!(serde_json::from_value::<SettingsVector>(json).is_err());
    }

    #[test]
    fn test_sanitized_clamps_quality() {
        let mut s = settings_for_target_percent(60.0);
        s.quality = 0;
        assert_eq!(s.sanitized().quality, MIN_QUALITY);
        s.quality = 250;
        assert_eq!(s.sanitized().quality, MAX_QUALITY);
        s.quality = 42;
        assert_eq!(s.sanitized(), s);
    }
}
