//! Per-client adaptive quality control.
//!
//! Each viewer has a [`ClientQualityProfile`] (JPEG-style quality, frame
//! interval, resolution scale) read by the encoder configuration path.
//! The owner of the stream polls [`QualityController::update`] periodically;
//! at most once per control interval the controller derives a target from
//! the client's throughput and the device's resource pressure, then moves
//! each value one bounded step toward it.
//!
//! ## Target table
//!
//! | throughput | quality | frame interval | scale |
//! |------------|---------|----------------|-------|
//! | ≥ 10 Mbps  | 90      | 33 ms          | 1.0   |
//! | ≥ 5 Mbps   | 80      | 50 ms          | 1.0   |
//! | ≥ 2 Mbps   | 70      | 75 ms          | 0.85  |
//! | ≥ 1 Mbps   | 60      | 100 ms         | 0.75  |
//! | < 1 Mbps   | 50      | 200 ms         | 0.6   |
//!
//! Overall pressure then adjusts the row: HIGH is −10 / +30 ms / −0.1,
//! CRITICAL drops one row first and applies −15 / +60 ms / −0.2. CPU
//! pressure takes a further 3 (HIGH) or 5 (CRITICAL) off quality. Results
//! are clamped to [50, 90], [33, 200] ms and [0.5, 1.0].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::QualityConfig;

pub const MIN_QUALITY: u8 = 50;
pub const MAX_QUALITY: u8 = 90;
pub const MIN_FRAME_INTERVAL_MS: u32 = 33;
pub const MAX_FRAME_INTERVAL_MS: u32 = 200;
pub const MIN_RESOLUTION_SCALE: f32 = 0.5;
pub const MAX_RESOLUTION_SCALE: f32 = 1.0;

const MBPS: u64 = 1_000_000;

/// (min throughput in bit/s, quality, frame interval ms, resolution scale), best first.
const TIERS: [(u64, u8, u32, f32); 5] = [
    (10 * MBPS, 90, 33, 1.0),
    (5 * MBPS, 80, 50, 1.0),
    (2 * MBPS, 70, 75, 0.85),
    (MBPS, 60, 100, 0.75),
    (0, 50, 200, 0.6),
];

/// Resource contention reported by an external performance monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureLevel {
    #[default]
    Normal,
    High,
    Critical,
}

/// Source of per-client throughput estimates.
pub trait BandwidthMonitor {
    /// Measured throughput to `client_id` in bits per second, if known.
    fn throughput_bps(&self, client_id: &str) -> Option<u64>;
}

/// Source of device-wide resource pressure.
pub trait PerformanceMonitor {
    fn overall_pressure(&self) -> PressureLevel;
    fn cpu_pressure(&self) -> PressureLevel;
}

/// Inputs for one control step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySignals {
    pub throughput_bps: u64,
    pub pressure: PressureLevel,
    pub cpu_pressure: PressureLevel,
}

impl QualitySignals {
    pub fn new(throughput_bps: u64) -> Self {
        Self {
            throughput_bps,
            pressure: PressureLevel::Normal,
            cpu_pressure: PressureLevel::Normal,
        }
    }

    pub fn with_pressure(mut self, pressure: PressureLevel) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn with_cpu_pressure(mut self, cpu_pressure: PressureLevel) -> Self {
        self.cpu_pressure = cpu_pressure;
        self
    }

    /// Gather signals for `client_id`. `None` when no throughput estimate exists yet.
    pub fn collect(
        client_id: &str,
        bandwidth: &dyn BandwidthMonitor,
        performance: &dyn PerformanceMonitor,
    ) -> Option<Self> {
        let throughput_bps = bandwidth.throughput_bps(client_id)?;
        Some(Self {
            throughput_bps,
            pressure: performance.overall_pressure(),
            cpu_pressure: performance.cpu_pressure(),
        })
    }
}

/// Encode parameters the controller converges toward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityTarget {
    pub quality: u8,
    pub frame_interval_ms: u32,
    pub resolution_scale: f32,
}

impl QualityTarget {
    /// Compute the clamped target for a set of signals.
    pub fn compute(signals: &QualitySignals) -> Self {
        let mut tier = TIERS
            .iter()
            .position(|(min, ..)| signals.throughput_bps >= *min)
            .unwrap_or(TIERS.len() - 1);
        if signals.pressure == PressureLevel::Critical {
            tier = (tier + 1).min(TIERS.len() - 1);
        }
        let (_, quality, frame_interval, scale) = TIERS[tier];

        let mut quality = i32::from(quality);
        let mut frame_interval = frame_interval as i64;
        let mut scale = scale;

        match signals.pressure {
            PressureLevel::Normal => {}
            PressureLevel::High => {
                quality -= 10;
                frame_interval += 30;
                scale -= 0.1;
            }
            PressureLevel::Critical => {
                quality -= 15;
                frame_interval += 60;
                scale -= 0.2;
            }
        }

        quality -= match signals.cpu_pressure {
            PressureLevel::Normal => 0,
            PressureLevel::High => 3,
            PressureLevel::Critical => 5,
        };

        Self {
            quality: quality.clamp(MIN_QUALITY.into(), MAX_QUALITY.into()) as u8,
            frame_interval_ms: frame_interval
                .clamp(MIN_FRAME_INTERVAL_MS.into(), MAX_FRAME_INTERVAL_MS.into())
                as u32,
            resolution_scale: scale.clamp(MIN_RESOLUTION_SCALE, MAX_RESOLUTION_SCALE),
        }
    }
}

/// Current encode parameters for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientQualityProfile {
    pub client_id: String,
    pub quality: u8,
    pub frame_interval_ms: u32,
    pub resolution_scale: f32,
    /// When false the profile is frozen at its last or operator-set values.
    pub adaptive: bool,
    /// Time of the last automatic adjustment; `None` until the first one.
    pub last_adjustment: Option<Instant>,
}

impl ClientQualityProfile {
    fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            quality: 80,
            frame_interval_ms: 50,
            resolution_scale: 1.0,
            adaptive: true,
            last_adjustment: None,
        }
    }

    /// Frames per second implied by the frame interval.
    pub fn target_fps(&self) -> f32 {
        1000.0 / self.frame_interval_ms.max(1) as f32
    }

    fn step_toward(&mut self, target: &QualityTarget, config: &QualityConfig) {
        self.quality = step_int(
            self.quality.into(),
            target.quality.into(),
            config.quality_step.into(),
        ) as u8;
        self.frame_interval_ms = step_int(
            self.frame_interval_ms.into(),
            target.frame_interval_ms.into(),
            config.frame_interval_step_ms.into(),
        ) as u32;
        self.resolution_scale = step_float(
            self.resolution_scale,
            target.resolution_scale,
            config.resolution_step,
        );
    }
}

fn step_int(current: i64, target: i64, step: i64) -> i64 {
    let delta = target - current;
    if delta.abs() <= step {
        target
    } else {
        current + step * delta.signum()
    }
}

fn step_float(current: f32, target: f32, step: f32) -> f32 {
    let delta = target - current;
    // Snap when within a step; the epsilon absorbs accumulated rounding of repeated 0.1 steps.
    if delta.abs() <= step + 1e-4 {
        target
    } else {
        current + step.copysign(delta)
    }
}

/// Owns every client's [`ClientQualityProfile`].
///
/// The map and each profile are locked separately, and the map lock is
/// released before a profile lock is taken.
pub struct QualityController {
    config: QualityConfig,
    profiles: RwLock<HashMap<String, Arc<Mutex<ClientQualityProfile>>>>,
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    fn entry(&self, client_id: &str) -> Arc<Mutex<ClientQualityProfile>> {
        if let Some(profile) = self.profiles.read().get(client_id) {
            return profile.clone();
        }
        self.profiles
            .write()
            .entry(client_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(client_id, "quality profile created");
                Arc::new(Mutex::new(ClientQualityProfile::new(client_id)))
            })
            .clone()
    }

    /// Current profile for `client_id`, created with defaults if absent.
    pub fn profile(&self, client_id: &str) -> ClientQualityProfile {
        self.entry(client_id).lock().clone()
    }

    /// Run one control step for `client_id` now.
    pub fn update(&self, client_id: &str, signals: &QualitySignals) -> ClientQualityProfile {
        self.update_at(client_id, signals, Instant::now())
    }

    /// Run one control step as of `now`.
    ///
    /// A no-op, returning the unchanged profile, when adaptation is
    /// disabled or the control interval has not elapsed since the last
    /// adjustment.
    pub fn update_at(
        &self,
        client_id: &str,
        signals: &QualitySignals,
        now: Instant,
    ) -> ClientQualityProfile {
        let entry = self.entry(client_id);
        let mut profile = entry.lock();

        if !profile.adaptive {
            return profile.clone();
        }
        if let Some(last) = profile.last_adjustment
            && now.saturating_duration_since(last) < self.config.control_interval()
        {
            return profile.clone();
        }

        let target = QualityTarget::compute(signals);
        let before = (
            profile.quality,
            profile.frame_interval_ms,
            profile.resolution_scale,
        );
        profile.step_toward(&target, &self.config);
        profile.last_adjustment = Some(now);

        if before
            != (
                profile.quality,
                profile.frame_interval_ms,
                profile.resolution_scale,
            )
        {
            tracing::debug!(
                client_id,
                throughput_bps = signals.throughput_bps,
                pressure = ?signals.pressure,
                cpu_pressure = ?signals.cpu_pressure,
                quality = profile.quality,
                frame_interval_ms = profile.frame_interval_ms,
                resolution_scale = profile.resolution_scale,
                "quality adjusted"
            );
        }

        profile.clone()
    }

    /// Poll external monitors and run one control step.
    ///
    /// Returns the unchanged profile when the bandwidth monitor has no
    /// estimate for this client yet.
    pub fn poll(
        &self,
        client_id: &str,
        bandwidth: &dyn BandwidthMonitor,
        performance: &dyn PerformanceMonitor,
    ) -> ClientQualityProfile {
        match QualitySignals::collect(client_id, bandwidth, performance) {
            Some(signals) => self.update(client_id, &signals),
            None => self.profile(client_id),
        }
    }

    /// Operator override: pin quality and frame interval, disabling adaptation.
    pub fn set_fixed(
        &self,
        client_id: &str,
        quality: u8,
        frame_interval_ms: u32,
    ) -> ClientQualityProfile {
        let entry = self.entry(client_id);
        let mut profile = entry.lock();
        profile.quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
        profile.frame_interval_ms =
            frame_interval_ms.clamp(MIN_FRAME_INTERVAL_MS, MAX_FRAME_INTERVAL_MS);
        profile.adaptive = false;
        tracing::info!(
            client_id,
            quality = profile.quality,
            frame_interval_ms = profile.frame_interval_ms,
            "fixed quality set, adaptation disabled"
        );
        profile.clone()
    }

    /// Turn adaptation on or off for `client_id`.
    pub fn set_adaptive(&self, client_id: &str, enabled: bool) -> ClientQualityProfile {
        let entry = self.entry(client_id);
        let mut profile = entry.lock();
        profile.adaptive = enabled;
        if enabled {
            // Re-enabled profiles adjust on the next poll.
            profile.last_adjustment = None;
        }
        tracing::debug!(client_id, enabled, "adaptive mode changed");
        profile.clone()
    }

    /// Drop the profile of a disconnected client.
    pub fn remove(&self, client_id: &str) -> bool {
        let removed = self.profiles.write().remove(client_id).is_some();
        if removed {
            tracing::debug!(client_id, "quality profile removed");
        }
        removed
    }

    /// Snapshot of every profile.
    pub fn profiles(&self) -> Vec<ClientQualityProfile> {
        let entries: Vec<_> = self.profiles.read().values().cloned().collect();
        entries.iter().map(|p| p.lock().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QualityController {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_secs(2);

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn fast_link_normal_pressure_targets_best_tier() {
        let target = QualityTarget::compute(&QualitySignals::new(12 * MBPS));
        assert_eq!(target.quality, 90);
        assert_eq!(target.frame_interval_ms, 33);
        assert!(approx(target.resolution_scale, 1.0));
    }

    #[test]
    fn slow_link_critical_pressure_clamps_to_floor() {
        let signals =
            QualitySignals::new(1_500_000).with_pressure(PressureLevel::Critical);
        let target = QualityTarget::compute(&signals);
        assert_eq!(target.quality, 50);
        assert_eq!(target.frame_interval_ms, 200);
        assert!(approx(target.resolution_scale, 0.5));
    }

    #[test]
    fn tier_boundaries() {
        let q = |bps| QualityTarget::compute(&QualitySignals::new(bps));
        assert_eq!(q(10 * MBPS).quality, 90);
        assert_eq!(q(10 * MBPS - 1).quality, 80);
        assert_eq!(q(5 * MBPS).frame_interval_ms, 50);
        assert!(approx(q(2 * MBPS).resolution_scale, 0.85));
        assert_eq!(q(MBPS).frame_interval_ms, 100);
        assert_eq!(q(999_999).quality, 50);
        assert_eq!(q(0).frame_interval_ms, 200);
    }

    #[test]
    fn high_pressure_adjusts_row() {
        let signals = QualitySignals::new(6 * MBPS).with_pressure(PressureLevel::High);
        let target = QualityTarget::compute(&signals);
        assert_eq!(target.quality, 70);
        assert_eq!(target.frame_interval_ms, 80);
        assert!(approx(target.resolution_scale, 0.9));
    }

    #[test]
    fn cpu_pressure_only_touches_quality() {
        let base = QualityTarget::compute(&QualitySignals::new(12 * MBPS));
        let high = QualityTarget::compute(
            &QualitySignals::new(12 * MBPS).with_cpu_pressure(PressureLevel::High),
        );
        let critical = QualityTarget::compute(
            &QualitySignals::new(12 * MBPS).with_cpu_pressure(PressureLevel::Critical),
        );
        assert_eq!(high.quality, 87);
        assert_eq!(critical.quality, 85);
        assert_eq!(high.frame_interval_ms, base.frame_interval_ms);
        assert!(approx(critical.resolution_scale, base.resolution_scale));
    }

    #[test]
    fn first_update_steps_once_toward_target() {
        let controller = QualityController::default();
        let p = controller.update_at("c1", &QualitySignals::new(500_000), Instant::now());
        assert_eq!(p.quality, 75);
        assert_eq!(p.frame_interval_ms, 70);
        assert!(approx(p.resolution_scale, 0.9));
    }

    #[test]
    fn update_within_interval_is_noop() {
        let controller = QualityController::default();
        let t0 = Instant::now();
        let signals = QualitySignals::new(500_000);
        let first = controller.update_at("c1", &signals, t0);
        let second = controller.update_at("c1", &signals, t0 + Duration::from_millis(500));
        assert_eq!(first, second);
    }

    #[test]
    fn converges_monotonically_without_overshoot() {
        let controller = QualityController::default();
        let signals = QualitySignals::new(0).with_pressure(PressureLevel::High);
        let target = QualityTarget::compute(&signals);
        let t0 = Instant::now();

        let mut prev = controller.profile("c1");
        for i in 0..20u32 {
            let p = controller.update_at("c1", &signals, t0 + INTERVAL * i);
            assert!(p.quality <= prev.quality && p.quality >= target.quality);
            assert!(prev.quality - p.quality <= 5);
            assert!(p.frame_interval_ms >= prev.frame_interval_ms);
            assert!(p.frame_interval_ms <= target.frame_interval_ms);
            assert!(p.frame_interval_ms - prev.frame_interval_ms <= 20);
            assert!(p.resolution_scale <= prev.resolution_scale + 1e-6);
            assert!(p.resolution_scale >= target.resolution_scale - 1e-6);
            prev = p;
        }
        assert_eq!(prev.quality, target.quality);
        assert_eq!(prev.frame_interval_ms, target.frame_interval_ms);
        assert!(approx(prev.resolution_scale, target.resolution_scale));
    }

    #[test]
    fn snaps_when_within_a_step() {
        let controller = QualityController::default();
        // Default profile is 80/50/1.0; the ≥5 Mbps row with CPU HIGH is 77/50/1.0.
        let signals = QualitySignals::new(6 * MBPS).with_cpu_pressure(PressureLevel::High);
        let p = controller.update_at("c1", &signals, Instant::now());
        assert_eq!(p.quality, 77);
        assert_eq!(p.frame_interval_ms, 50);
    }

    #[test]
    fn fixed_override_disables_adaptation() {
        let controller = QualityController::default();
        let p = controller.set_fixed("c1", 120, 10);
        assert_eq!(p.quality, 90);
        assert_eq!(p.frame_interval_ms, 33);
        assert!(!p.adaptive);

        let after = controller.update("c1", &QualitySignals::new(0));
        assert_eq!(after.quality, 90);
        assert_eq!(after.frame_interval_ms, 33);

        let p = controller.set_adaptive("c1", true);
        assert!(p.adaptive);
        let after = controller.update("c1", &QualitySignals::new(0));
        assert_eq!(after.quality, 85);
    }

    #[test]
    fn clients_are_independent() {
        let controller = QualityController::default();
        controller.update("slow", &QualitySignals::new(0));
        let fast = controller.profile("fast");
        assert_eq!(fast.quality, 80);
        assert_eq!(controller.len(), 2);

        assert!(controller.remove("slow"));
        assert!(!controller.remove("slow"));
        assert_eq!(controller.profiles().len(), 1);
    }

    #[test]
    fn target_fps_from_interval() {
        let controller = QualityController::default();
        let p = controller.set_fixed("c1", 80, 40);
        assert!(approx(p.target_fps(), 25.0));
    }

    struct FixedBandwidth(Option<u64>);

    impl BandwidthMonitor for FixedBandwidth {
        fn throughput_bps(&self, _client_id: &str) -> Option<u64> {
            self.0
        }
    }

    struct FixedPressure(PressureLevel, PressureLevel);

    impl PerformanceMonitor for FixedPressure {
        fn overall_pressure(&self) -> PressureLevel {
            self.0
        }
        fn cpu_pressure(&self) -> PressureLevel {
            self.1
        }
    }

    #[test]
    fn poll_reads_monitors() {
        let controller = QualityController::default();
        let perf = FixedPressure(PressureLevel::Normal, PressureLevel::Normal);

        let p = controller.poll("c1", &FixedBandwidth(None), &perf);
        assert!(p.last_adjustment.is_none());

        let p = controller.poll("c1", &FixedBandwidth(Some(20 * MBPS)), &perf);
        assert_eq!(p.quality, 85);
        assert_eq!(p.frame_interval_ms, 33);
        assert!(p.last_adjustment.is_some());
    }
}
