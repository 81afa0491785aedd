//! Engine configuration.
//!
//! Every tunable of the engine lives here with its production default.
//! Configurations deserialize from JSON with missing fields falling back to
//! the defaults, so a file only needs to mention what it overrides.

use crate::error::{CoreError, CoreResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use trafnet_env::EntryId;

/// Closed interval sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max <= self.min {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }

    fn check(&self, name: &str) -> CoreResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(CoreError::config(format!(
                "{} must satisfy min <= max (got {}..{})",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Named spawn densities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityPreset {
    Low,
    Medium,
    Heavy,
}

impl DensityPreset {
    pub fn agent_count(&self) -> usize {
        match self {
            DensityPreset::Low => 120,
            DensityPreset::Medium => 250,
            DensityPreset::Heavy => 500,
        }
    }
}

/// Per-agent dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    /// Range `max_speed` is drawn from at spawn
    pub max_speed_range: ValueRange,

    /// `max_brake` is remapped from `max_speed` onto this range
    pub max_brake_range: ValueRange,

    /// Brake rate used while an emergency stop is held
    pub emergency_brake_range: ValueRange,

    /// How long an emergency stop is held, seconds
    pub emergency_hold_range: ValueRange,

    pub max_accel: f64,

    /// Steering clamp, degrees per second
    pub max_turn_deg: f64,

    /// Speed excess over target that lights the brake lamps
    pub brake_hard_relative_speed: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            max_speed_range: ValueRange::new(10.0, 16.0),
            max_brake_range: ValueRange::new(8.5, 18.0),
            emergency_brake_range: ValueRange::new(17.0, 20.0),
            emergency_hold_range: ValueRange::new(3.0, 10.0),
            max_accel: 3.0,
            max_turn_deg: 75.0,
            brake_hard_relative_speed: 0.2,
        }
    }
}

/// Route following and intersection approach.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivingConfig {
    pub waypoint_threshold: f64,

    /// Targets closer than this and already behind count as reached
    pub waypoint_passed_distance: f64,

    /// Distance to the end of a lane at which the next entry is chosen
    /// and interest is registered (also the turn-signal distance)
    pub register_distance: f64,

    /// Distance to the end of an entry inside which corner speed applies
    pub turn_slow_down_distance: f64,

    pub yellow_light_go_distance: f64,

    /// Minimum dwell at a stop sign, seconds
    pub stop_length_secs: f64,

    /// Window after which a force-collide attempt is resolved, seconds
    pub force_collide_timeout_secs: f64,

    /// Turn angle above which turn signals are set, degrees
    pub signal_angle_deg: f64,
}

impl Default for DrivingConfig {
    fn default() -> Self {
        Self {
            waypoint_threshold: 1.0,
            waypoint_passed_distance: 8.0,
            register_distance: 33.0,
            turn_slow_down_distance: 12.0,
            yellow_light_go_distance: 4.0,
            stop_length_secs: 6.0,
            force_collide_timeout_secs: 5.0,
            signal_angle_deg: 60.0,
        }
    }
}

/// Forward and side probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub front_probe_distance: f64,
    pub side_probe_distance: f64,

    /// Seconds between probe cycles
    pub probe_interval_range: ValueRange,

    /// Minimum probe distance difference before a dodge side is picked
    pub dodge_deadband: f64,

    /// Obstacles slower than this count as stopped
    pub moving_speed_threshold: f64,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            front_probe_distance: 24.0,
            side_probe_distance: 8.0,
            probe_interval_range: ValueRange::new(0.2, 0.25),
            dodge_deadband: 1.25,
            moving_speed_threshold: 0.2,
        }
    }
}

/// Opportunistic lane changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneShiftConfig {
    pub enabled: bool,

    /// Probability per second of trying a shift while eligible
    pub chance_per_second: f64,

    pub min_speed: f64,

    /// No shift starts closer than this to the end of the lane
    pub min_distance_to_end: f64,

    /// How far ahead along the target lane the merge point is placed
    pub advance_range: ValueRange,

    pub large_vehicle_advance_scale: f64,

    pub merge_reached_distance: f64,

    pub timeout_secs: f64,

    pub scan_radius_range: ValueRange,

    /// Neighbours on the target lane with a forward dot below this block the shift
    pub beside_dot_threshold: f64,

    /// A requested merge toward a point is ignored when closer than this
    pub min_merge_request_distance: f64,
}

impl Default for LaneShiftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chance_per_second: 0.035,
            min_speed: 5.0,
            min_distance_to_end: 37.5,
            advance_range: ValueRange::new(10.0, 12.5),
            large_vehicle_advance_scale: 1.5,
            merge_reached_distance: 8.0,
            timeout_secs: 10.0,
            scan_radius_range: ValueRange::new(11.0, 20.0),
            beside_dot_threshold: 0.75,
            min_merge_request_distance: 4.0,
        }
    }
}

/// Axis-aligned circle on the ground plane restricting area spawns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnArea {
    pub center: [f64; 3],
    pub radius: f64,
}

/// Spawning and recycling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Recycle stuck / unreachable / invisible agents automatically
    pub auto_assisting: bool,

    /// Only recycle while no observer can see the agent
    pub silent_assisting: bool,

    /// Never recycle for invisibility alone
    pub respawn_only_stuck: bool,

    /// Respawn recycled agents inside `spawn_area` only
    pub only_respawn_in_spawn_area: bool,

    pub spawn_area: Option<SpawnArea>,

    /// Occupancy radius checked before placing an agent
    pub check_radius: f64,

    pub stuck_secs: f64,
    pub unreachable_secs: f64,
    pub invisible_secs: f64,

    /// Silent placement attempts before falling back to visible placement
    pub silent_retries: usize,

    /// Placement attempts for a definite (must-spawn) request
    pub placement_retries: usize,

    /// Beyond this distance an agent is always eligible for a silent respawn
    pub silent_far_distance: f64,

    /// Beyond this distance an agent is eligible when no observer sees it
    pub silent_hidden_distance: f64,

    /// Rough bounding radius used for visibility tests
    pub vehicle_visibility_radius: f64,

    /// Share of spawned agents flagged as large vehicles
    pub large_vehicle_ratio: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auto_assisting: true,
            silent_assisting: true,
            respawn_only_stuck: false,
            only_respawn_in_spawn_area: false,
            spawn_area: None,
            check_radius: 6.0,
            stuck_secs: 110.0,
            unreachable_secs: 150.0,
            invisible_secs: 120.0,
            silent_retries: 40,
            placement_retries: 100,
            silent_far_distance: 325.0,
            silent_hidden_distance: 90.0,
            vehicle_visibility_radius: 3.0,
            large_vehicle_ratio: 0.1,
        }
    }
}

/// Distance-based level of detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    pub optimize_render: bool,
    pub optimize_physics: bool,
    pub check_interval_secs: f64,
    pub render_distance: f64,
    pub sim_distance: f64,

    /// Minimum logic step for reduced-rate agents, seconds
    pub low_logic_dt: f64,

    /// Minimum physics step for reduced-rate agents, seconds
    pub low_physics_dt: f64,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            optimize_render: true,
            optimize_physics: true,
            check_interval_secs: 1.0,
            render_distance: 250.0,
            sim_distance: 225.0,
            low_logic_dt: 0.2,
            low_physics_dt: 0.1,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Number of agents the engine tries to keep alive
    pub target_density: usize,

    pub dynamics: DynamicsConfig,
    pub driving: DrivingConfig,
    pub perception: PerceptionConfig,
    pub lane_shift: LaneShiftConfig,
    pub lifecycle: LifecycleConfig,
    pub lod: LodConfig,

    /// Routes handed out in spawn order; agents beyond the list route randomly
    pub fixed_routes: Vec<Vec<EntryId>>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            target_density: 50,
            dynamics: DynamicsConfig::default(),
            driving: DrivingConfig::default(),
            perception: PerceptionConfig::default(),
            lane_shift: LaneShiftConfig::default(),
            lifecycle: LifecycleConfig::default(),
            lod: LodConfig::default(),
            fixed_routes: Vec::new(),
        }
    }
}

impl TrafficConfig {
    /// Sets the target density from a preset.
    pub fn with_density(mut self, preset: DensityPreset) -> Self {
        self.target_density = preset.agent_count();
        self
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: TrafficConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks ranges and thresholds for consistency.
    pub fn validate(&self) -> CoreResult<()> {
        let d = &self.dynamics;
        d.max_speed_range.check("dynamics.max_speed_range")?;
        d.max_brake_range.check("dynamics.max_brake_range")?;
        d.emergency_brake_range.check("dynamics.emergency_brake_range")?;
        d.emergency_hold_range.check("dynamics.emergency_hold_range")?;
        self.perception
            .probe_interval_range
            .check("perception.probe_interval_range")?;
        self.lane_shift.advance_range.check("lane_shift.advance_range")?;
        self.lane_shift
            .scan_radius_range
            .check("lane_shift.scan_radius_range")?;

        if d.max_speed_range.min <= 0.0 {
            return Err(CoreError::config("dynamics.max_speed_range must be positive"));
        }
        if d.max_accel <= 0.0 || d.max_turn_deg <= 0.0 {
            return Err(CoreError::config(
                "dynamics.max_accel and dynamics.max_turn_deg must be positive",
            ));
        }
        if self.lod.check_interval_secs <= 0.0
            || self.lod.low_logic_dt <= 0.0
            || self.lod.low_physics_dt <= 0.0
        {
            return Err(CoreError::config("lod intervals must be positive"));
        }
        if self.lifecycle.check_radius < 0.0 {
            return Err(CoreError::config("lifecycle.check_radius must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.lifecycle.large_vehicle_ratio) {
            return Err(CoreError::config("lifecycle.large_vehicle_ratio must be within 0..=1"));
        }
        if self.lifecycle.only_respawn_in_spawn_area && self.lifecycle.spawn_area.is_none() {
            return Err(CoreError::config(
                "lifecycle.only_respawn_in_spawn_area requires lifecycle.spawn_area",
            ));
        }
        if self.fixed_routes.iter().any(|route| route.is_empty()) {
            return Err(CoreError::config("fixed routes must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        TrafficConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = TrafficConfig::from_json_str(
            r#"{ "target_density": 12, "lod": { "render_distance": 100.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.target_density, 12);
        assert_eq!(config.lod.render_distance, 100.0);
        assert_eq!(config.lod.sim_distance, 225.0);
        assert_eq!(config.dynamics.max_speed_range, ValueRange::new(10.0, 16.0));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = TrafficConfig::from_json_str(
            r#"{ "dynamics": { "max_speed_range": { "min": 20.0, "max": 5.0 } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ConfigError(_)));
    }

    #[test]
    fn test_spawn_area_required() {
        let mut config = TrafficConfig::default();
        config.lifecycle.only_respawn_in_spawn_area = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_density_presets() {
        let config = TrafficConfig::default().with_density(DensityPreset::Heavy);
        assert_eq!(config.target_density, 500);
        assert_eq!(DensityPreset::Low.agent_count(), 120);
    }

    #[test]
    fn test_value_range_sample_bounds() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let range = ValueRange::new(3.0, 10.0);
        for _ in 0..100 {
            let v = range.sample(&mut rng);
            assert!((3.0..=10.0).contains(&v));
        }
        assert_eq!(ValueRange::new(2.0, 2.0).sample(&mut rng), 2.0);
    }
}
