//! Distance-based level of detail.
//!
//! Every agent is reclassified once per check interval (with a random phase
//! so the work spreads over frames):
//!
//! | nearest observer      | render             | cadence                 |
//! |-----------------------|--------------------|-------------------------|
//! | `< render_distance`   | visible            | -                       |
//! | `>= render_distance`  | hidden, lights off | -                       |
//! | `< sim_distance`      | -                  | every frame             |
//! | `>= sim_distance`     | -                  | logic 0.2 s, physics 0.1 s |
//!
//! Reduced-rate agents are not skipped: when their gate opens they receive
//! the real time elapsed since the last step.

use crate::config::LodConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which optimisations are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationMode {
    pub render: bool,
    pub physics: bool,
}

impl OptimizationMode {
    pub const FULL: OptimizationMode = OptimizationMode {
        render: true,
        physics: true,
    };
    pub const NONE: OptimizationMode = OptimizationMode {
        render: false,
        physics: false,
    };
}

/// Update cadence of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimRate {
    Normal,
    Low,
}

/// Rate limiter handing out elapsed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceGate {
    last: f64,
    min_dt: f64,
}

impl CadenceGate {
    pub fn new(min_dt: f64) -> Self {
        Self { last: 0.0, min_dt }
    }

    /// Returns the step to integrate this frame, or `None` to skip it.
    pub fn step(&mut self, now: f64, frame_dt: f64, reduced: bool) -> Option<f64> {
        if !reduced || frame_dt >= self.min_dt {
            return Some(frame_dt);
        }
        let elapsed = now - self.last;
        if elapsed < self.min_dt {
            return None;
        }
        self.last = now;
        Some(elapsed)
    }

    pub fn reset(&mut self, now: f64) {
        self.last = now;
    }
}

/// LOD bookkeeping of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct LodState {
    pub in_render_range: bool,
    pub rate: SimRate,
    pub next_check_at: f64,
    pub observer_distance: f64,
    pub logic_gate: CadenceGate,
    pub physics_gate: CadenceGate,
}

impl LodState {
    /// Fresh state: visible, full rate, first check at a random phase.
    pub fn new<R: Rng + ?Sized>(now: f64, config: &LodConfig, rng: &mut R) -> Self {
        let mut logic_gate = CadenceGate::new(config.low_logic_dt);
        let mut physics_gate = CadenceGate::new(config.low_physics_dt);
        logic_gate.reset(now + rng.gen_range(0.0..config.low_logic_dt));
        physics_gate.reset(now + rng.gen_range(0.0..config.low_physics_dt));
        Self {
            in_render_range: true,
            rate: SimRate::Normal,
            next_check_at: now + rng.gen_range(0.0..config.check_interval_secs),
            observer_distance: 0.0,
            logic_gate,
            physics_gate,
        }
    }

    pub fn is_reduced(&self) -> bool {
        self.rate == SimRate::Low
    }

    pub fn headlights_allowed(&self) -> bool {
        self.in_render_range
    }

    fn set_rate(&mut self, rate: SimRate, now: f64) {
        if rate == SimRate::Low && self.rate != SimRate::Low {
            self.logic_gate.reset(now);
            self.physics_gate.reset(now);
        }
        self.rate = rate;
    }
}

/// Applies the LOD policy to agents.
#[derive(Debug, Clone)]
pub struct LodManager {
    mode: OptimizationMode,
    config: LodConfig,
}

impl LodManager {
    pub fn new(config: LodConfig) -> Self {
        Self {
            mode: OptimizationMode {
                render: config.optimize_render,
                physics: config.optimize_physics,
            },
            config,
        }
    }

    pub fn mode(&self) -> OptimizationMode {
        self.mode
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    /// Reclassifies `state` if its check is due. Returns true when it ran.
    pub fn update(&self, state: &mut LodState, now: f64, observer_distance: f64) -> bool {
        if now < state.next_check_at {
            return false;
        }
        state.next_check_at = now + self.config.check_interval_secs;
        self.classify(state, now, observer_distance);
        true
    }

    fn classify(&self, state: &mut LodState, now: f64, distance: f64) {
        state.observer_distance = distance;
        if self.mode.render {
            state.in_render_range = distance < self.config.render_distance;
        }
        if self.mode.physics {
            let rate = if distance < self.config.sim_distance {
                SimRate::Normal
            } else {
                SimRate::Low
            };
            state.set_rate(rate, now);
        }
    }

    /// Switches optimisation mode and re-normalises every agent so none is
    /// left at a stale cadence or visibility.
    pub fn set_mode<'a, R, I>(&mut self, mode: OptimizationMode, states: I, now: f64, rng: &mut R)
    where
        R: Rng + ?Sized,
        I: IntoIterator<Item = &'a mut LodState>,
    {
        self.mode = mode;
        let mut count = 0usize;
        for state in states {
            if !mode.render {
                state.in_render_range = true;
            }
            if !mode.physics {
                state.rate = SimRate::Normal;
            }
            state.logic_gate.reset(now);
            state.physics_gate.reset(now);
            state.next_check_at = now + rng.gen_range(0.0..self.config.check_interval_secs);
            count += 1;
        }
        info!(
            "LOD mode set to render={} physics={} ({} agents re-normalised)",
            mode.render, mode.physics, count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn state(now: f64) -> LodState {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        LodState::new(now, &LodConfig::default(), &mut rng)
    }

    #[test]
    fn test_classification_thresholds() {
        let lod = LodManager::new(LodConfig::default());
        let mut s = state(0.0);
        assert!(lod.update(&mut s, 1.0, 100.0));
        assert!(s.in_render_range);
        assert_eq!(s.rate, SimRate::Normal);

        assert!(lod.update(&mut s, 2.0, 240.0));
        assert!(s.in_render_range);
        assert_eq!(s.rate, SimRate::Low);

        assert!(lod.update(&mut s, 3.0, 300.0));
        assert!(!s.in_render_range);
        assert!(!s.headlights_allowed());
    }

    #[test]
    fn test_check_interval_respected() {
        let lod = LodManager::new(LodConfig::default());
        let mut s = state(0.0);
        assert!(s.next_check_at < 1.0);
        assert!(lod.update(&mut s, 1.0, 100.0));
        assert!(!lod.update(&mut s, 1.5, 400.0));
        assert_eq!(s.rate, SimRate::Normal);
    }

    #[test]
    fn test_cadence_gate_hands_out_elapsed_time() {
        let mut gate = CadenceGate::new(0.2);
        gate.reset(0.0);
        assert_eq!(gate.step(0.05, 0.05, true), None);
        assert_eq!(gate.step(0.15, 0.05, true), None);
        let dt = gate.step(0.25, 0.05, true).unwrap();
        assert!((dt - 0.25).abs() < 1e-12);
        assert_eq!(gate.step(0.30, 0.05, false), Some(0.05));
        // Slow frames are never throttled
        assert_eq!(gate.step(0.31, 0.5, true), Some(0.5));
    }

    #[test]
    fn test_set_mode_renormalises() {
        let mut lod = LodManager::new(LodConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut states = vec![state(0.0), state(0.0)];
        for s in states.iter_mut() {
            lod.update(s, 1.0, 500.0);
            assert_eq!(s.rate, SimRate::Low);
            assert!(!s.in_render_range);
        }

        lod.set_mode(OptimizationMode { render: true, physics: false }, states.iter_mut(), 5.0, &mut rng);
        for s in &states {
            assert_eq!(s.rate, SimRate::Normal);
            assert!(!s.in_render_range, "render optimisation still applies");
            assert!(s.next_check_at >= 5.0 && s.next_check_at < 6.0);
        }

        lod.set_mode(OptimizationMode::NONE, states.iter_mut(), 6.0, &mut rng);
        for s in states.iter_mut() {
            assert!(s.in_render_range);
            lod.update(s, 8.0, 500.0);
            assert!(s.in_render_range);
            assert_eq!(s.rate, SimRate::Normal);
        }
    }
}
