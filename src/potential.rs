//! Risk-tiered compression potential and least-destructive method selection
//!
//! Both calculations work on [`MethodMeasurement`]s. Pending measurements and
//! measurements with no positive savings never contribute to a total; pending
//! ones are still counted so callers can tell an answer may improve.

use crate::method::{Method, RiskTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncertaintyRange {
    pub min: i64,
    pub max: i64,
}

/// Observed or estimated byte impact of one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMeasurement {
    pub method: Method,
    pub measured_bytes_saved: i64,
    pub resulting_size: u64,
    pub uncertainty_range: Option<UncertaintyRange>,
    pub pending: bool,
}

impl MethodMeasurement {
    pub fn measured(method: Method, original_size: u64, resulting_size: u64) -> Self {
        Self {
            method,
            measured_bytes_saved: original_size as i64 - resulting_size as i64,
            resulting_size,
            uncertainty_range: None,
            pending: false,
        }
    }

    pub fn pending(method: Method, original_size: u64) -> Self {
        Self {
            method,
            measured_bytes_saved: 0,
            resulting_size: original_size,
            uncertainty_range: None,
            pending: true,
        }
    }

    /// Upper end of the uncertainty range when present, else the measured value.
    pub fn effective_savings(&self) -> i64 {
        self.uncertainty_range
            .map(|r| r.max)
            .unwrap_or(self.measured_bytes_saved)
    }

    fn usable_savings(&self) -> Option<u64> {
        if self.pending {
            return None;
        }
        let saved = self.effective_savings();
        (saved > 0).then_some(saved as u64)
    }
}

/// Projected savings and floor sizes when applying every method up to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressionPotential {
    pub safe_savings: u64,
    /// Includes `safe_savings`.
    pub medium_savings: u64,
    /// Includes `medium_savings`.
    pub total_savings: u64,
    pub safe_floor: u64,
    pub medium_floor: u64,
    pub absolute_floor: u64,
    pub has_pending: bool,
    pub pending_count: usize,
}

pub fn calculate_compression_potential(
    original_size: u64,
    measurements: &[MethodMeasurement],
) -> CompressionPotential {
    let mut by_tier = [0u64; 3];
    let mut pending_count = 0;

    for m in measurements {
        if m.pending {
            pending_count += 1;
            continue;
        }
        if let Some(saved) = m.usable_savings() {
            let slot = &mut by_tier[m.method.risk_tier() as usize];
            *slot = slot.saturating_add(saved);
        }
    }

    let safe_savings = by_tier[RiskTier::Safe as usize];
    let medium_savings = safe_savings.saturating_add(by_tier[RiskTier::Medium as usize]);
    let total_savings = medium_savings.saturating_add(by_tier[RiskTier::High as usize]);

    CompressionPotential {
        safe_savings,
        medium_savings,
        total_savings,
        safe_floor: original_size.saturating_sub(safe_savings),
        medium_floor: original_size.saturating_sub(medium_savings),
        absolute_floor: original_size.saturating_sub(total_savings),
        has_pending: pending_count > 0,
        pending_count,
    }
}

/// Pick the least destructive set of measured methods that reaches `target_size`.
///
/// Safe methods are exhausted before any medium one is considered, and medium
/// before high; inside a tier the largest saver goes first. Selection stops the
/// moment the projected size reaches the target. Returns methods in the order
/// they were picked; empty when `original_size` already meets the target.
pub fn select_methods(
    original_size: u64,
    target_size: u64,
    measurements: &[MethodMeasurement],
) -> Vec<Method> {
    let mut selected = Vec::new();
    let mut current = original_size;
    if current <= target_size {
        return selected;
    }

    let mut tiers: [Vec<(Method, u64)>; 3] = Default::default();
    for m in measurements {
        if let Some(saved) = m.usable_savings() {
            tiers[m.method.risk_tier() as usize].push((m.method, saved));
        }
    }

    for tier in RiskTier::ORDERED {
        let candidates = &mut tiers[tier as usize];
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (method, saved) in candidates.iter() {
            selected.push(*method);
            current = current.saturating_sub(*saved);
            if current <= target_size {
                return selected;
            }
        }
    }

    selected
}

/// Latest measurement per method.
///
/// Entries start out pending and are replaced once the measurement lands.
#[derive(Debug, Clone, Default)]
pub struct MeasurementBoard {
    original_size: u64,
    entries: BTreeMap<Method, MethodMeasurement>,
}

impl MeasurementBoard {
    pub fn new(original_size: u64) -> Self {
        Self {
            original_size,
            entries: BTreeMap::new(),
        }
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn mark_pending(&mut self, method: Method) {
        self.entries
            .insert(method, MethodMeasurement::pending(method, self.original_size));
    }

    pub fn record(&mut self, measurement: MethodMeasurement) {
        self.entries.insert(measurement.method, measurement);
    }

    /// Drop an entry whose measurement will never arrive.
    pub fn discard(&mut self, method: Method) {
        self.entries.remove(&method);
    }

    pub fn get(&self, method: Method) -> Option<&MethodMeasurement> {
        self.entries.get(&method)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|m| m.pending).count()
    }

    pub fn measurements(&self) -> Vec<MethodMeasurement> {
        self.entries.values().cloned().collect()
    }

    pub fn potential(&self) -> CompressionPotential {
        calculate_compression_potential(self.original_size, &self.measurements())
    }

    pub fn select(&self, target_size: u64) -> Vec<Method> {
        select_methods(self.original_size, target_size, &self.measurements())
    }
}
