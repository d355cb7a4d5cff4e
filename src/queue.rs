// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Registry partitioning tracked vehicles into disjoint life-cycle states.
use anyhow::{bail, Result};
use hashbrown::{HashMap, HashSet};
use log::{debug, warn};

use crate::network::VehicleId;
use crate::units::Time;
use crate::vehicle::ControlledVehicle;

/// Life-cycle state of a tracked vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleState {
    /// Driving in the simulation, awaiting its next ETA estimation.
    Running,
    /// Part of the current scheduling batch, awaiting a route.
    Scheduled,
    /// Left the simulation. Terminal.
    Arrived,
    /// No further controlled-region work. Terminal.
    Discarded,
}

/// Holds every tracked vehicle, partitioned into disjoint state sets.
///
/// Invariant: a tracked id is a member of exactly one of the four sets at any observation
/// point between steps. Arrived and discarded vehicles stay addressable for statistics.
#[derive(Debug, Default)]
pub struct VehicleQueue {
    pub vehicles: HashMap<VehicleId, ControlledVehicle>,
    /// Vehicles currently running in the simulation.
    pub running: HashSet<VehicleId>,
    /// Vehicles currently considered for planning.
    pub scheduled: HashSet<VehicleId>,
    /// Vehicles which already left the simulation.
    pub arrived: HashSet<VehicleId>,
    /// Vehicles removed from routing.
    pub discarded: HashSet<VehicleId>,
}

impl VehicleQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of a tracked vehicle, `None` if the id is unknown.
    pub fn state_of(&self, id: VehicleId) -> Option<VehicleState> {
        if !self.vehicles.contains_key(&id) {
            return None;
        }
        if self.running.contains(&id) {
            Some(VehicleState::Running)
        } else if self.scheduled.contains(&id) {
            Some(VehicleState::Scheduled)
        } else if self.arrived.contains(&id) {
            Some(VehicleState::Arrived)
        } else if self.discarded.contains(&id) {
            Some(VehicleState::Discarded)
        } else {
            None
        }
    }

    /// Adds a vehicle with state running; fails if the id is already tracked.
    pub fn add_vehicle(&mut self, vehicle: ControlledVehicle) -> Result<()> {
        if self.vehicles.contains_key(&vehicle.id) {
            bail!("Vehicle {} is already tracked", vehicle.id);
        }
        debug!(
            "Tracking vehicle {} with {} segments",
            vehicle.id,
            vehicle.route.segments().len()
        );
        self.running.insert(vehicle.id);
        self.vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    /// Marks the given vehicles as arrived.
    ///
    /// Ids which were never tracked are ignored. Returns `(arrived, missed)` counts: a
    /// vehicle arriving while running or scheduled was missed by the planning pipeline,
    /// which is a scheduling-quality signal, not an error. An arrival from any other state
    /// is a consistency bug and fails.
    pub fn set_arrival(&mut self, ids: &[VehicleId], time: Time) -> Result<(usize, usize)> {
        let mut arrived = 0;
        let mut missed = 0;
        for id in ids {
            if !self.vehicles.contains_key(id) {
                // Vehicle does not visit any region, it was never considered.
                continue;
            }
            arrived += 1;
            match self.state_of(*id) {
                Some(VehicleState::Running) => {
                    warn!("Vehicle {id} arrived at destination but was never scheduled");
                    self.running.remove(id);
                    missed += 1;
                }
                Some(VehicleState::Scheduled) => {
                    warn!("Vehicle {id} left the simulation while scheduled");
                    self.scheduled.remove(id);
                    missed += 1;
                }
                Some(VehicleState::Discarded) => {
                    self.discarded.remove(id);
                }
                state => bail!("Vehicle {id} arrived from impossible state {state:?}"),
            }
            self.vehicles.get_mut(id).unwrap().arrival_time = Some(time);
            self.arrived.insert(*id);
        }
        Ok((arrived, missed))
    }

    /// Moves a running vehicle into the scheduled batch.
    pub fn schedule(&mut self, id: VehicleId) {
        debug_assert!(self.running.contains(&id));
        self.running.remove(&id);
        self.scheduled.insert(id);
    }

    /// Returns a scheduled or running vehicle to the running set.
    pub fn resume(&mut self, id: VehicleId) {
        self.scheduled.remove(&id);
        self.running.insert(id);
    }

    /// Removes a vehicle from routing; it keeps its current path to completion.
    pub fn discard(&mut self, id: VehicleId) {
        self.running.remove(&id);
        self.scheduled.remove(&id);
        self.discarded.insert(id);
    }
}
