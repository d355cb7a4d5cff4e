// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Interface to the simulation engine that actually moves the vehicles.
use crate::network::{OriginalEdgeId, VehicleId};
use crate::units::{Length, Time};

/// Position of a vehicle along its current lane, used to fraction the first edge of an ETA.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LanePosition {
    /// Distance already traveled along the lane.
    pub position: Length,
    /// Total length of the lane.
    pub lane_length: Length,
    /// `true` when the lane belongs to the edge the route index points at; internal
    /// (junction) lanes report `false` and the whole edge is still ahead.
    pub on_route_edge: bool,
}

impl LanePosition {
    /// Returns the fraction of the current edge still to be traveled.
    pub fn remaining_fraction(&self) -> f64 {
        if !self.on_route_edge {
            return 1.0;
        }
        (1.0 - self.position / self.lane_length).clamp(0.0, 1.0)
    }
}

/// The per-tick surface of the simulation engine.
///
/// The scheduler is called once per tick and reads vehicle positions and live travel times
/// through this trait; the only mutation it performs is overwriting a vehicle's route after
/// a successful splice.
pub trait SimulationDriver {
    /// Current simulation time.
    fn time(&self) -> Time;

    /// Ids of the vehicles that departed this tick.
    fn departed(&self) -> Vec<VehicleId>;

    /// Ids of the vehicles that arrived (left the simulation) this tick.
    fn arrived(&self) -> Vec<VehicleId>;

    /// The full static edge path of a vehicle.
    fn static_route(&self, vehicle: VehicleId) -> Vec<OriginalEdgeId>;

    /// Index of the edge the vehicle currently drives on, within its route.
    fn route_index(&self, vehicle: VehicleId) -> usize;

    /// Position of the vehicle along its current lane.
    fn lane_position(&self, vehicle: VehicleId) -> LanePosition;

    /// Live measured travel time of an edge.
    fn edge_travel_time(&self, edge: OriginalEdgeId) -> Option<Time>;

    /// Travel time predicted by a vehicle's dynamic-rerouting device, when such a device is
    /// present and reporting.
    fn rerouting_prediction(&self, vehicle: VehicleId, edge: OriginalEdgeId) -> Option<Time>;

    /// Overwrites a vehicle's route from its current index onward.
    fn set_route(&mut self, vehicle: VehicleId, edges: &[OriginalEdgeId]);
}
