//! Intersection admission control.
//!
//! Agents register interest in the entry they are about to use. Each
//! registration bumps the entry's interest counter; on stop-controlled
//! intersections the agent is also appended to the intersection's FIFO stop
//! queue. Give-way entries check the counters of their targets, stop signs
//! check the queue head, lights check the signal collaborator.
//!
//! Admission is advisory: several agents may be admitted into the same
//! connector at once and collision avoidance inside the box is left to
//! perception.
//!
//! # Locking
//!
//! Counters and the queue of one intersection are guarded by a single
//! `Mutex`, so registrations from agents updated in parallel serialize per
//! intersection. Plain lanes only carry a counter and use an atomic.

use crate::config::TrafficConfig;
use crate::road_network::RoadNetwork;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use trafnet_env::{EntryId, IntersectionId, LightState, SignalState, VehicleUid};

/// Where an approaching agent stands with respect to the next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArbiterPhase {
    /// No connector ahead, or not evaluated yet
    Approaching,
    /// Dwelling at a stop sign or waiting to reach the queue head
    StopWait,
    /// A give-way target has registered interest
    GiveWayWait,
    /// Held by a red or yellow light
    LightWait,
    Admitted,
}

/// Outcome of [`IntersectionArbiter::deregister_interest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deregistration {
    /// The agent was the queue head and has been dequeued
    Dequeued,
    /// The agent was queued behind others and has been removed
    RemovedFromQueue,
    /// Only the interest counter changed
    CounterOnly,
    /// The entry is unknown
    Unknown,
}

#[derive(Debug, Default)]
struct IntersectionState {
    registered: HashMap<EntryId, u32>,
    stop_queue: VecDeque<VehicleUid>,
}

/// Progress through a stop sign.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum StopSignProgress {
    #[default]
    NotReached,
    /// Minimum dwell runs until the deadline (engine seconds)
    Dwelling { deadline: f64 },
    /// Dwell done and the agent reached the queue head
    Cleared,
}

/// Per-agent view of the pending intersection, owned by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproachState {
    pub has_stop_target: bool,
    pub has_give_way_target: bool,
    pub stop_target: Vector3<f64>,
    pub stop_sign: StopSignProgress,

    /// The current stop target was set by a light
    pub held_by_light: bool,
}

impl Default for ApproachState {
    fn default() -> Self {
        Self {
            has_stop_target: false,
            has_give_way_target: false,
            stop_target: Vector3::zeros(),
            stop_sign: StopSignProgress::NotReached,
            held_by_light: false,
        }
    }
}

impl ApproachState {
    pub fn holding(&self) -> bool {
        self.has_stop_target || self.has_give_way_target
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn phase(&self) -> ArbiterPhase {
        if self.has_give_way_target {
            ArbiterPhase::GiveWayWait
        } else if self.has_stop_target && self.held_by_light {
            ArbiterPhase::LightWait
        } else if self.has_stop_target {
            ArbiterPhase::StopWait
        } else {
            ArbiterPhase::Admitted
        }
    }
}

/// Inputs of one arbitration step.
#[derive(Debug, Clone, Copy)]
pub struct ApproachQuery {
    pub uid: VehicleUid,
    pub next_entry: EntryId,
    pub now: f64,
    pub nose: Vector3<f64>,

    /// The agent's current steering target
    pub current_target: Vector3<f64>,

    /// First waypoint of the next entry
    pub next_target: Vector3<f64>,
}

/// Interest counters and stop queues for the whole network.
#[derive(Debug)]
pub struct IntersectionArbiter {
    network: Arc<RoadNetwork>,
    intersections: HashMap<IntersectionId, Mutex<IntersectionState>>,
    lanes: HashMap<EntryId, AtomicU32>,
}

impl IntersectionArbiter {
    pub fn new(network: Arc<RoadNetwork>) -> Self {
        let intersections = network
            .intersections()
            .filter(|ix| !network.connectors_of(ix.id).is_empty())
            .map(|ix| (ix.id, Mutex::new(IntersectionState::default())))
            .collect();
        let lanes = network
            .lane_entries()
            .iter()
            .map(|id| (*id, AtomicU32::new(0)))
            .collect();
        Self {
            network,
            intersections,
            lanes,
        }
    }

    fn lock(&self, ix: IntersectionId) -> Option<MutexGuard<'_, IntersectionState>> {
        self.intersections
            .get(&ix)
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Declares that `uid` is about to use `entry`. Returns false for unknown entries.
    pub fn register_interest(&self, entry: EntryId, uid: VehicleUid) -> bool {
        let Some(e) = self.network.entry(entry) else {
            return false;
        };
        match e.intersection {
            Some(ix) => {
                let stop_sign = self.network.is_stop_controlled(entry);
                let Some(mut state) = self.lock(ix) else {
                    return false;
                };
                *state.registered.entry(entry).or_insert(0) += 1;
                if stop_sign && !state.stop_queue.contains(&uid) {
                    state.stop_queue.push_back(uid);
                }
                true
            }
            None => match self.lanes.get(&entry) {
                Some(counter) => {
                    counter.fetch_add(1, Ordering::AcqRel);
                    true
                }
                None => false,
            },
        }
    }

    /// Releases a registration made by `uid` on `entry`.
    pub fn deregister_interest(&self, entry: EntryId, uid: VehicleUid) -> Deregistration {
        let Some(e) = self.network.entry(entry) else {
            return Deregistration::Unknown;
        };
        match e.intersection {
            Some(ix) => {
                let Some(mut state) = self.lock(ix) else {
                    return Deregistration::Unknown;
                };
                if let Some(count) = state.registered.get_mut(&entry) {
                    *count = count.saturating_sub(1);
                }
                if state.stop_queue.front() == Some(&uid) {
                    state.stop_queue.pop_front();
                    Deregistration::Dequeued
                } else if let Some(pos) = state.stop_queue.iter().position(|q| *q == uid) {
                    state.stop_queue.remove(pos);
                    Deregistration::RemovedFromQueue
                } else {
                    Deregistration::CounterOnly
                }
            }
            None => match self.lanes.get(&entry) {
                Some(counter) => {
                    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                        Some(c.saturating_sub(1))
                    });
                    Deregistration::CounterOnly
                }
                None => Deregistration::Unknown,
            },
        }
    }

    pub fn registered_count(&self, entry: EntryId) -> u32 {
        let Some(e) = self.network.entry(entry) else {
            return 0;
        };
        match e.intersection {
            Some(ix) => self
                .lock(ix)
                .and_then(|s| s.registered.get(&entry).copied())
                .unwrap_or(0),
            None => self
                .lanes
                .get(&entry)
                .map(|c| c.load(Ordering::Acquire))
                .unwrap_or(0),
        }
    }

    /// Whether `uid` heads the stop queue of `entry`'s intersection.
    pub fn is_queue_head(&self, entry: EntryId, uid: VehicleUid) -> bool {
        self.network
            .entry(entry)
            .and_then(|e| e.intersection)
            .and_then(|ix| self.lock(ix))
            .map(|s| s.stop_queue.front() == Some(&uid))
            .unwrap_or(false)
    }

    /// Snapshot of a stop queue, head first.
    pub fn stop_queue(&self, intersection: IntersectionId) -> Vec<VehicleUid> {
        self.lock(intersection)
            .map(|s| s.stop_queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True when any give-way target of `entry` has registered interest.
    pub fn must_give_way(&self, entry: EntryId) -> bool {
        self.network
            .entry(entry)
            .map(|e| e.give_way_to.iter().any(|t| self.registered_count(*t) > 0))
            .unwrap_or(false)
    }

    /// Clears every counter and queue (network reload, mass respawn).
    pub fn reset_all(&self) {
        for m in self.intersections.values() {
            let mut state = m.lock().unwrap_or_else(PoisonError::into_inner);
            state.registered.clear();
            state.stop_queue.clear();
        }
        for counter in self.lanes.values() {
            counter.store(0, Ordering::Release);
        }
        debug!("Arbiter reset: all interest released");
    }

    /// Applies the stop-sign, give-way and light rules, in that order, for
    /// the entry the agent is about to take.
    pub fn evaluate(
        &self,
        query: &ApproachQuery,
        approach: &mut ApproachState,
        signals: &dyn SignalState,
        config: &TrafficConfig,
    ) -> ArbiterPhase {
        let Some(next) = self.network.entry(query.next_entry) else {
            return ArbiterPhase::Approaching;
        };

        if next.is_intersection() && self.network.is_stop_controlled(query.next_entry) {
            match approach.stop_sign {
                StopSignProgress::NotReached => {
                    approach.has_stop_target = true;
                    approach.held_by_light = false;
                    approach.stop_target = query.next_target;
                    approach.stop_sign = StopSignProgress::Dwelling {
                        deadline: query.now + config.driving.stop_length_secs,
                    };
                }
                StopSignProgress::Dwelling { deadline } => {
                    if query.now > deadline && self.is_queue_head(query.next_entry, query.uid) {
                        approach.has_give_way_target = false;
                        approach.has_stop_target = false;
                        approach.stop_sign = StopSignProgress::Cleared;
                    }
                }
                StopSignProgress::Cleared => {}
            }
        }

        if next.is_intersection() && !self.network.is_stop_controlled(query.next_entry) {
            if self.must_give_way(query.next_entry) {
                approach.has_give_way_target = true;
                approach.stop_target = query.current_target;
            } else {
                approach.has_give_way_target = false;
            }
        }

        if !approach.has_give_way_target {
            if let Some(light) = next.light {
                let state = signals.light_state(light);
                match state {
                    LightState::Red if !approach.has_stop_target => {
                        approach.has_stop_target = true;
                        approach.held_by_light = true;
                        approach.stop_target = query.next_target;
                    }
                    LightState::Green if approach.has_stop_target => {
                        approach.has_stop_target = false;
                        approach.held_by_light = false;
                    }
                    LightState::Yellow if !approach.has_stop_target => {
                        let go_distance = config.driving.yellow_light_go_distance
                            * (config.dynamics.max_speed_range.max / 11.0);
                        if (query.next_target - query.nose).norm() > go_distance {
                            approach.has_stop_target = true;
                            approach.held_by_light = true;
                            approach.stop_target = query.next_target;
                        }
                    }
                    _ => {}
                }
            }
        }

        approach.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_network::NetworkDescription;
    use proptest::prelude::*;
    use std::cell::Cell;

    struct FixedLight(Cell<LightState>);

    impl SignalState for FixedLight {
        fn light_state(&self, _light: trafnet_env::LightId) -> LightState {
            self.0.get()
        }
    }

    fn v(x: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, 0.0, z)
    }

    /// Four-way: stop-sign box 1000 and a signalled, give-way box 2000.
    fn network() -> Arc<RoadNetwork> {
        let mut desc = NetworkDescription::new();
        let stop = desc.add_intersection(1000, true);
        let free = desc.add_intersection(2000, false);
        desc.add_lane(EntryId::new(1, 0), &[v(0.0, 0.0), v(0.0, 40.0)]);
        desc.add_connector(EntryId::new(1000, 0), stop, &[v(0.0, 40.0), v(0.0, 50.0)]);
        desc.add_connector(EntryId::new(1000, 1), stop, &[v(-5.0, 45.0), v(5.0, 45.0)]);
        desc.add_connector(EntryId::new(2000, 0), free, &[v(100.0, 40.0), v(100.0, 50.0)])
            .give_way_to = vec![EntryId::new(2000, 1)];
        desc.add_connector(EntryId::new(2000, 1), free, &[v(95.0, 45.0), v(105.0, 45.0)])
            .light = Some(trafnet_env::LightId(1));
        desc.add_connector(EntryId::new(2000, 2), free, &[v(100.0, 50.0), v(100.0, 40.0)])
            .light = Some(trafnet_env::LightId(2));
        Arc::new(RoadNetwork::from_description(desc).unwrap())
    }

    fn uid(n: u64) -> VehicleUid {
        VehicleUid::from_seed(n)
    }

    fn query(uid: VehicleUid, entry: EntryId, now: f64) -> ApproachQuery {
        ApproachQuery {
            uid,
            next_entry: entry,
            now,
            nose: v(0.0, 30.0),
            current_target: v(0.0, 40.0),
            next_target: v(0.0, 40.0),
        }
    }

    #[test]
    fn test_register_enqueues_on_stop_sign() {
        let arb = IntersectionArbiter::new(network());
        let entry = EntryId::new(1000, 0);
        assert!(arb.register_interest(entry, uid(1)));
        assert!(arb.register_interest(EntryId::new(1000, 1), uid(2)));
        assert_eq!(arb.registered_count(entry), 1);
        assert_eq!(arb.stop_queue(IntersectionId(1000)), vec![uid(1), uid(2)]);
        assert!(arb.is_queue_head(EntryId::new(1000, 1), uid(1)));
        assert!(!arb.is_queue_head(entry, uid(2)));
    }

    #[test]
    fn test_deregister_outcomes() {
        let arb = IntersectionArbiter::new(network());
        let entry = EntryId::new(1000, 0);
        for n in 1..=3 {
            arb.register_interest(entry, uid(n));
        }
        assert_eq!(arb.deregister_interest(entry, uid(2)), Deregistration::RemovedFromQueue);
        assert_eq!(arb.stop_queue(IntersectionId(1000)), vec![uid(1), uid(3)]);
        assert_eq!(arb.deregister_interest(entry, uid(1)), Deregistration::Dequeued);
        assert_eq!(arb.deregister_interest(entry, uid(9)), Deregistration::CounterOnly);
        assert_eq!(arb.registered_count(entry), 0);
        assert_eq!(
            arb.deregister_interest(EntryId::new(77, 0), uid(1)),
            Deregistration::Unknown
        );
    }

    #[test]
    fn test_lane_counter_saturates() {
        let arb = IntersectionArbiter::new(network());
        let lane = EntryId::new(1, 0);
        arb.register_interest(lane, uid(1));
        assert_eq!(arb.registered_count(lane), 1);
        arb.deregister_interest(lane, uid(1));
        arb.deregister_interest(lane, uid(1));
        assert_eq!(arb.registered_count(lane), 0);
    }

    #[test]
    fn test_stop_sign_dwell_then_head() {
        let arb = IntersectionArbiter::new(network());
        let config = TrafficConfig::default();
        let lights = FixedLight(Cell::new(LightState::Green));
        let entry = EntryId::new(1000, 0);
        arb.register_interest(entry, uid(1));
        arb.register_interest(entry, uid(2));

        let mut a = ApproachState::default();
        let mut b = ApproachState::default();
        assert_eq!(arb.evaluate(&query(uid(1), entry, 0.0), &mut a, &lights, &config), ArbiterPhase::StopWait);
        assert_eq!(arb.evaluate(&query(uid(2), entry, 0.0), &mut b, &lights, &config), ArbiterPhase::StopWait);

        // Dwell not elapsed
        arb.evaluate(&query(uid(1), entry, 5.0), &mut a, &lights, &config);
        assert!(a.has_stop_target);

        arb.evaluate(&query(uid(1), entry, 6.5), &mut a, &lights, &config);
        arb.evaluate(&query(uid(2), entry, 6.5), &mut b, &lights, &config);
        assert!(!a.has_stop_target);
        assert_eq!(a.stop_sign, StopSignProgress::Cleared);
        assert!(b.has_stop_target, "second in queue keeps waiting");

        arb.deregister_interest(entry, uid(1));
        arb.evaluate(&query(uid(2), entry, 6.6), &mut b, &lights, &config);
        assert!(!b.has_stop_target);
    }

    #[test]
    fn test_give_way_blocks_while_target_registered() {
        let arb = IntersectionArbiter::new(network());
        let config = TrafficConfig::default();
        let lights = FixedLight(Cell::new(LightState::Green));
        let entry = EntryId::new(2000, 0);
        let mut a = ApproachState::default();

        assert_eq!(arb.evaluate(&query(uid(1), entry, 0.0), &mut a, &lights, &config), ArbiterPhase::Admitted);

        arb.register_interest(EntryId::new(2000, 1), uid(2));
        assert!(arb.must_give_way(entry));
        assert_eq!(arb.evaluate(&query(uid(1), entry, 0.1), &mut a, &lights, &config), ArbiterPhase::GiveWayWait);
        assert_eq!(a.stop_target, v(0.0, 40.0));

        arb.deregister_interest(EntryId::new(2000, 1), uid(2));
        assert_eq!(arb.evaluate(&query(uid(1), entry, 0.2), &mut a, &lights, &config), ArbiterPhase::Admitted);
    }

    #[test]
    fn test_light_rules() {
        let arb = IntersectionArbiter::new(network());
        let config = TrafficConfig::default();
        let lights = FixedLight(Cell::new(LightState::Red));
        let entry = EntryId::new(2000, 2);
        let mut a = ApproachState::default();

        assert_eq!(arb.evaluate(&query(uid(1), entry, 0.0), &mut a, &lights, &config), ArbiterPhase::LightWait);
        assert!(a.has_stop_target);

        lights.0.set(LightState::Green);
        arb.evaluate(&query(uid(1), entry, 0.1), &mut a, &lights, &config);
        assert!(!a.has_stop_target);

        // Yellow far away: stop. Threshold is 4 * 16 / 11 ~= 5.8
        lights.0.set(LightState::Yellow);
        arb.evaluate(&query(uid(1), entry, 0.2), &mut a, &lights, &config);
        assert!(a.has_stop_target);

        // Yellow when already close: keep going
        let mut close = ApproachState::default();
        let mut q = query(uid(2), entry, 0.3);
        q.nose = v(0.0, 37.0);
        arb.evaluate(&q, &mut close, &lights, &config);
        assert!(!close.has_stop_target);
    }

    #[test]
    fn test_reset_all() {
        let arb = IntersectionArbiter::new(network());
        arb.register_interest(EntryId::new(1000, 0), uid(1));
        arb.register_interest(EntryId::new(1, 0), uid(1));
        arb.reset_all();
        assert_eq!(arb.registered_count(EntryId::new(1000, 0)), 0);
        assert_eq!(arb.registered_count(EntryId::new(1, 0)), 0);
        assert!(arb.stop_queue(IntersectionId(1000)).is_empty());
    }

    #[test]
    fn test_arbiter_is_sync() {
        fn assert_sync<T: Sync + Send>() {}
        assert_sync::<IntersectionArbiter>();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u64),
        /// Release the current queue head
        ReleaseHead,
        /// Remove an arbitrary queued agent (agent removal)
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..40).prop_map(Op::Register),
            Just(Op::ReleaseHead),
            (0usize..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn test_stop_queue_is_fifo(ops in prop::collection::vec(op(), 1..80)) {
            let arb = IntersectionArbiter::new(network());
            let entry = EntryId::new(1000, 0);
            let mut model: VecDeque<VehicleUid> = VecDeque::new();
            let mut enqueued = Vec::new();
            let mut cleared = Vec::new();

            for op in ops {
                match op {
                    Op::Register(n) => {
                        let id = uid(n);
                        if !enqueued.contains(&id) {
                            arb.register_interest(entry, id);
                            model.push_back(id);
                            enqueued.push(id);
                        }
                    }
                    Op::ReleaseHead => {
                        if let Some(&head) = model.front() {
                            let heads: Vec<_> = model
                                .iter()
                                .filter(|id| arb.is_queue_head(entry, **id))
                                .collect();
                            prop_assert_eq!(heads.len(), 1);
                            prop_assert_eq!(arb.deregister_interest(entry, head), Deregistration::Dequeued);
                            model.pop_front();
                            cleared.push(head);
                        }
                    }
                    Op::Remove(i) => {
                        if i < model.len() && i > 0 {
                            let id = model[i];
                            prop_assert_eq!(arb.deregister_interest(entry, id), Deregistration::RemovedFromQueue);
                            model.remove(i);
                        }
                    }
                }
                prop_assert_eq!(arb.stop_queue(IntersectionId(1000)), model.iter().copied().collect::<Vec<_>>());
            }

            let expected: Vec<_> = enqueued
                .into_iter()
                .filter(|id| cleared.contains(id))
                .collect();
            prop_assert_eq!(cleared, expected);
        }
    }
}
