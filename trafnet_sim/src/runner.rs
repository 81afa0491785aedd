//! Scenario runner - executes traffic scenarios against the harness.

use crate::error::SimResult;
use crate::exporter::{SimExport, SimFrame};
use crate::maps::SimMap;
use crate::scenarios::{ScenarioId, ScenarioScript};
use crate::world::{SimConfig, SimWorld, TickReport};

use std::time::Duration;
use tracing::{debug, info, warn};
use trafnet_core::{TrafficConfig, TrafficEvent};
use trafnet_env::TrafficContext;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Number of live agents at end
    pub final_agent_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Verdict summary on success
    pub summary: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn setup_failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_agent_count: 0,
            failure_reason: Some(reason),
            summary: None,
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioMetrics {
    pub spawned: u64,
    pub despawned: u64,
    pub respawned: u64,
    pub spawn_failures: u64,
    pub stop_sign_clearances: u64,
    pub lane_shifts: u64,
    pub lane_shift_aborts: u64,
    pub emergency_brakes: u64,
    pub accidents: u64,
    pub breakdowns: u64,

    /// Agent-ticks with speed above the agent's own cap
    pub speed_violations: u64,

    /// Peak live agent count
    pub max_agents: usize,
}

impl ScenarioMetrics {
    fn record(&mut self, report: &TickReport, world: &SimWorld) {
        for event in &report.output.events {
            match event {
                TrafficEvent::Spawned { .. } => self.spawned += 1,
                TrafficEvent::Respawned { .. } => self.respawned += 1,
                TrafficEvent::Despawned { .. } => self.despawned += 1,
                TrafficEvent::SpawnFailed { .. } => self.spawn_failures += 1,
                TrafficEvent::StopSignCleared { .. } => self.stop_sign_clearances += 1,
                TrafficEvent::LaneShiftCompleted { .. } => self.lane_shifts += 1,
                TrafficEvent::LaneShiftAborted { .. } => self.lane_shift_aborts += 1,
                TrafficEvent::EmergencyBrake { .. } => self.emergency_brakes += 1,
                TrafficEvent::Accident { .. } => self.accidents += 1,
                TrafficEvent::Breakdown { .. } => self.breakdowns += 1,
                TrafficEvent::EnteredEntry { .. } | TrafficEvent::LaneShiftStarted { .. } => {}
            }
        }
        self.speed_violations += world
            .engine
            .agents()
            .filter(|a| a.speed > a.max_speed + 1e-6)
            .count() as u64;
        self.max_agents = self.max_agents.max(world.agent_count());
    }
}

/// One scenario in flight: world, script and bookkeeping.
pub struct Session {
    scenario: ScenarioId,
    seed: u64,
    world: SimWorld,
    script: Box<dyn ScenarioScript>,
    metrics: ScenarioMetrics,
    target_ticks: u64,
    done: bool,
}

impl Session {
    /// Advances one tick. Returns `None` once the scenario is over.
    pub fn step(&mut self) -> Option<TickReport> {
        if self.done {
            return None;
        }
        let report = self.world.tick();
        self.script.on_tick(&mut self.world, &report);
        self.metrics.record(&report, &self.world);

        let rate = self.world.config.tick_rate_hz.max(1) as u64;
        if report.tick % rate == 0 {
            debug!(
                "  t={:.1}s | agents={} | events={}",
                report.time,
                self.world.agent_count(),
                report.output.events.len()
            );
        }

        if report.tick >= self.target_ticks || self.script.finished(&self.world) {
            self.done = true;
        }
        Some(report)
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn scenario(&self) -> ScenarioId {
        self.scenario
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Judges the run.
    pub fn finish(self) -> ScenarioResult {
        let verdict = self.script.verdict(&self.world);
        let (mut passed, mut failure_reason, summary) = match verdict {
            Ok(summary) => (true, None, Some(summary)),
            Err(reason) => (false, Some(reason), None),
        };
        if passed && self.metrics.speed_violations > 0 {
            passed = false;
            failure_reason = Some(format!(
                "{} agent-ticks above the speed cap",
                self.metrics.speed_violations
            ));
        }

        if passed {
            info!(
                "✓ {} complete: {}",
                self.scenario.name(),
                summary.as_deref().unwrap_or("")
            );
        } else {
            warn!(
                "✗ {} failed: {}",
                self.scenario.name(),
                failure_reason.as_deref().unwrap_or("unknown")
            );
        }

        ScenarioResult {
            scenario: self.scenario,
            seed: self.seed,
            passed,
            total_ticks: self.world.tick_count(),
            final_time_secs: self.world.time(),
            final_agent_count: self.world.agent_count(),
            failure_reason,
            summary,
            metrics: self.metrics,
        }
    }
}

/// Runs traffic scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Population for free-running scenarios
    num_agents: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Traffic config override (free-running scenarios only)
    traffic: Option<TrafficConfig>,

    /// Network override (free-running scenarios only)
    map: Option<SimMap>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_agents: usize) -> Self {
        Self {
            seed,
            num_agents,
            tick_rate_hz: 30,
            max_duration_secs: 60.0,
            traffic: None,
            map: None,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_traffic(mut self, traffic: TrafficConfig) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn with_map(mut self, map: SimMap) -> Self {
        self.map = Some(map);
        self
    }

    /// Builds and stages a scenario without running it.
    pub fn start(&self, scenario: ScenarioId) -> SimResult<Session> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let mut script = scenario.script(self.num_agents);

        let (map, traffic) = if script.accepts_overrides() {
            let map = self.map.clone().unwrap_or_else(|| script.map());
            let traffic = self.traffic.clone().unwrap_or_else(|| script.traffic());
            (map, traffic)
        } else {
            if self.map.is_some() || self.traffic.is_some() {
                debug!("{} ignores network and config overrides", scenario.name());
            }
            (script.map(), script.traffic())
        };

        let config = SimConfig {
            seed: self.seed,
            num_agents: self.num_agents,
            tick_rate_hz: self.tick_rate_hz,
            max_duration_secs: script.horizon_secs(self.max_duration_secs),
        };
        let target_ticks = config.target_ticks();
        let mut world = SimWorld::new(config, map, traffic)?;
        script.setup(&mut world)?;

        Ok(Session {
            scenario,
            seed: self.seed,
            world,
            script,
            metrics: ScenarioMetrics::default(),
            target_ticks,
            done: target_ticks == 0,
        })
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let mut session = match self.start(scenario) {
            Ok(session) => session,
            Err(e) => return ScenarioResult::setup_failed(scenario, self.seed, e.to_string()),
        };
        while session.step().is_some() {}
        session.finish()
    }

    /// Runs a scenario, sampling a frame every `every` ticks.
    pub fn run_recorded(&self, scenario: ScenarioId, every: u64) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let mut session = match self.start(scenario) {
            Ok(session) => session,
            Err(e) => {
                let result = ScenarioResult::setup_failed(scenario, self.seed, e.to_string());
                export.finalize(false, result.failure_reason.clone());
                return (result, export);
            }
        };

        let every = every.max(1);
        export.add_frame(SimFrame::capture(session.world(), Vec::new()));
        let mut pending = Vec::new();
        while let Some(report) = session.step() {
            pending.extend(report.output.events);
            if report.tick % every == 0 || session.is_done() {
                export.add_frame(SimFrame::capture(session.world(), std::mem::take(&mut pending)));
            }
        }

        let result = session.finish();
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    /// Runs a scenario with each tick paced by `pacer`.
    pub async fn run_paced<C: TrafficContext>(&self, scenario: ScenarioId, pacer: &C) -> ScenarioResult {
        let mut session = match self.start(scenario) {
            Ok(session) => session,
            Err(e) => return ScenarioResult::setup_failed(scenario, self.seed, e.to_string()),
        };
        let dt = Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64);
        while session.step().is_some() {
            pacer.sleep(dt).await;
        }
        session.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::maps;

    #[test]
    fn test_straight_cruise_scenario() {
        let runner = ScenarioRunner::new(42, 1).with_duration(20.0);
        let result = runner.run(ScenarioId::StraightCruise);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_agent_count, 1);
        assert_eq!(result.metrics.speed_violations, 0);
    }

    #[test]
    fn test_dead_end_scenario() {
        let result = ScenarioRunner::new(42, 1).run(ScenarioId::DeadEnd);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.despawned, 1);
        assert_eq!(result.final_agent_count, 0);
    }

    #[test]
    fn test_obstacle_ahead_scenario() {
        let result = ScenarioRunner::new(7, 1).with_duration(10.0).run(ScenarioId::ObstacleAhead);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_stop_sign_fifo_scenario() {
        let result = ScenarioRunner::new(42, 3).run(ScenarioId::StopSignFifo);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.stop_sign_clearances, 3);
        // Ends as soon as the third agent is through
        assert!(result.final_time_secs < 120.0);
    }

    #[test]
    fn test_red_to_green_scenario() {
        let result = ScenarioRunner::new(42, 1).run(ScenarioId::RedToGreen);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_force_collide_scenario() {
        let result = ScenarioRunner::new(42, 2).run(ScenarioId::ForceCollide);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.breakdowns >= 1);
        assert!(result.metrics.emergency_brakes >= 1);
    }

    #[test]
    fn test_give_way_scenario() {
        for seed in [1, 7, 42, 99] {
            let result = ScenarioRunner::new(seed, 2).run(ScenarioId::GiveWay);
            assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
        }
    }

    #[test]
    fn test_lane_shift_scenario() {
        for seed in [1, 7, 42, 99] {
            let result = ScenarioRunner::new(seed, 1).run(ScenarioId::LaneShift);
            assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
            assert_eq!(result.metrics.lane_shifts, 1, "seed {}", seed);
            assert_eq!(result.metrics.lane_shift_aborts, 0, "seed {}", seed);
            // Ends as soon as the merge is done
            assert!(result.final_time_secs < 30.0, "seed {}", seed);
        }
    }

    #[test]
    fn test_recycling_scenario() {
        for seed in [1, 7, 42, 99] {
            let result = ScenarioRunner::new(seed, 8).run(ScenarioId::Recycling);
            assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
            assert!(result.metrics.respawned >= 1, "seed {}", seed);
            assert!(result.metrics.max_agents <= 8, "seed {}", seed);
        }
    }

    #[test]
    fn test_city_stress_short_run() {
        let runner = ScenarioRunner::new(42, 12).with_duration(5.0);
        let result = runner.run(ScenarioId::CityStress);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.total_ticks, 150);
        assert!(result.metrics.spawned >= 1);
        assert!(result.metrics.max_agents <= 12);
    }

    #[test]
    fn test_city_stress_deterministic() {
        let runner1 = ScenarioRunner::new(42, 10).with_duration(4.0);
        let runner2 = ScenarioRunner::new(42, 10).with_duration(4.0);

        let result1 = runner1.run(ScenarioId::CityStress);
        let result2 = runner2.run(ScenarioId::CityStress);

        assert_eq!(result1.metrics, result2.metrics);
        assert_eq!(result1.final_agent_count, result2.final_agent_count);
    }

    #[test]
    fn test_overrides_only_reach_city_stress() {
        let runner = ScenarioRunner::new(42, 4)
            .with_duration(1.0)
            .with_map(maps::two_lane_road(800.0));
        let lane = trafnet_env::EntryId::new(20, 0);

        let session = runner.start(ScenarioId::CityStress).unwrap();
        // Two parallel lanes plus their shared exit
        assert_eq!(session.world().network().entry_count(), 3);
        assert!(session.world().network().entry(lane).is_some());

        // Scripted scenarios keep their own map
        let session = runner.start(ScenarioId::DeadEnd).unwrap();
        assert!(session.world().network().entry(lane).is_none());
        assert_eq!(session.world().engine.config().target_density, 0);
    }

    #[test]
    fn test_recorded_run_samples_frames() {
        let runner = ScenarioRunner::new(42, 1).with_duration(20.0);
        let (result, export) = runner.run_recorded(ScenarioId::StraightCruise, 30);

        assert_eq!(export.passed, result.passed);
        // Initial frame plus one per simulated second
        assert_eq!(export.frames.len() as u64, 1 + result.total_ticks / 30);
        assert!(export.frames.iter().all(|f| f.agents.len() == 1));
    }

    #[tokio::test]
    async fn test_paced_run_on_virtual_clock() {
        let runner = ScenarioRunner::new(42, 4).with_duration(2.0);
        let pacer = SimContext::new(0);
        let result = runner.run_paced(ScenarioId::CityStress, &pacer).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!((pacer.now_secs() - 2.0).abs() < 1e-6);
    }
}
