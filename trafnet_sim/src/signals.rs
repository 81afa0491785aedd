//! Traffic light controller for the harness.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use trafnet_env::{LightId, LightState, SignalState};

/// Fixed-time plan: green, then yellow, then red, shifted by `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightCycle {
    pub green: f64,
    pub yellow: f64,
    pub red: f64,
    pub offset: f64,
}

impl LightCycle {
    pub fn period(&self) -> f64 {
        self.green + self.yellow + self.red
    }

    pub fn state_at(&self, now: f64) -> LightState {
        let period = self.period();
        if period <= 0.0 {
            return LightState::Green;
        }
        let t = (now + self.offset).rem_euclid(period);
        if t < self.green {
            LightState::Green
        } else if t < self.green + self.yellow {
            LightState::Yellow
        } else {
            LightState::Red
        }
    }

    /// The complementary phase for the crossing axis.
    pub fn crossing(&self) -> LightCycle {
        LightCycle {
            offset: self.offset + self.green + self.yellow,
            ..*self
        }
    }
}

impl Default for LightCycle {
    fn default() -> Self {
        Self {
            green: 20.0,
            yellow: 3.0,
            red: 23.0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LightPlan {
    Cycle(LightCycle),
    Manual(LightState),
}

/// All lights of a map. Unknown lights read green.
#[derive(Debug, Clone, Default)]
pub struct SignalController {
    plans: HashMap<LightId, LightPlan>,
    now: f64,
}

impl SignalController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plan(&mut self, light: LightId, plan: LightPlan) {
        self.plans.insert(light, plan);
    }

    /// Pins a light to `state` until another plan is set.
    pub fn set_manual(&mut self, light: LightId, state: LightState) {
        self.set_plan(light, LightPlan::Manual(state));
    }

    pub fn advance(&mut self, now: f64) {
        self.now = now;
    }

    pub fn light_count(&self) -> usize {
        self.plans.len()
    }
}

impl SignalState for SignalController {
    fn light_state(&self, light: LightId) -> LightState {
        match self.plans.get(&light) {
            Some(LightPlan::Cycle(cycle)) => cycle.state_at(self.now),
            Some(LightPlan::Manual(state)) => *state,
            None => LightState::Green,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_phases() {
        let cycle = LightCycle {
            green: 10.0,
            yellow: 2.0,
            red: 12.0,
            offset: 0.0,
        };
        assert_eq!(cycle.state_at(0.0), LightState::Green);
        assert_eq!(cycle.state_at(10.5), LightState::Yellow);
        assert_eq!(cycle.state_at(13.0), LightState::Red);
        assert_eq!(cycle.state_at(24.5), LightState::Green);

        // The crossing axis is red while this one is green or yellow
        let cross = cycle.crossing();
        for t in [0.0, 5.0, 11.0] {
            assert_eq!(cross.state_at(t), LightState::Red, "t={}", t);
        }
        assert_eq!(cross.state_at(13.0), LightState::Green);
    }

    #[test]
    fn test_manual_override_and_default() {
        let mut signals = SignalController::new();
        let light = LightId(3);
        assert_eq!(signals.light_state(light), LightState::Green);

        signals.set_plan(light, LightPlan::Cycle(LightCycle::default()));
        signals.advance(21.0);
        assert_eq!(signals.light_state(light), LightState::Yellow);

        signals.set_manual(light, LightState::Red);
        assert_eq!(signals.light_state(light), LightState::Red);
        assert_eq!(signals.light_count(), 1);
    }
}
