// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Per-vehicle segmented route model.
//!
//! A tracked vehicle's path is split into [Segment]s, one per controlled-region crossing,
//! each spanning one edge before the region entry through one edge after the region exit.
//! Those two boundary edges are the anchors of any replacement route: a plan must enter and
//! leave the network at the same points as the original slice.
use anyhow::{bail, Result};
use log::debug;

use crate::network::{OriginalEdgeId, Region, RegionIndex, RouteGraph, VehicleId};
use crate::routing::BackendKind;
use crate::units::Time;

/// An ETA value together with the time it was computed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Eta {
    /// Predicted time to reach the segment's region.
    pub value: Time,
    /// Simulation time at which the prediction was made.
    pub computed_at: Time,
}

/// The portion of a vehicle's path crossing one controlled region.
#[derive(Clone, Debug)]
pub struct Segment {
    /// Start index (inclusive) into the vehicle's edge list: the edge before the region.
    start: usize,
    /// End index (exclusive): one past the edge after the region.
    end: usize,
    /// Controlled region crossed by the segment, if any.
    region: Option<RegionIndex>,
    /// Replacement edges produced by a routing backend, recorded on splice.
    routed_segment: Option<Vec<OriginalEdgeId>>,
    /// Which backend produced the replacement.
    routed_by: Option<BackendKind>,
    /// Latest ETA estimate for the segment.
    pub eta: Option<Eta>,
    /// Set when a returned plan was deferred; the retry must target the boundary exactly.
    pub rescheduled: bool,
}

impl Segment {
    /// Creates a new Segment spanning `start..end` (end exclusive).
    pub fn new(start: usize, end: usize, region: Option<RegionIndex>) -> Self {
        assert!(start < end, "Segment indices must satisfy start < end");
        Segment {
            start,
            end,
            region,
            routed_segment: None,
            routed_by: None,
            eta: None,
            rescheduled: false,
        }
    }

    /// Returns the `(start, end)` indices of the segment (end exclusive).
    pub fn indexes(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Returns the region crossed by the segment.
    pub fn region(&self) -> Option<RegionIndex> {
        self.region
    }

    /// Returns the index of the first edge inside the region (one past the entry anchor).
    pub fn region_entry_index(&self) -> usize {
        self.start + 1
    }

    /// Returns the backend that last replaced the segment, if any.
    pub fn routed_by(&self) -> Option<BackendKind> {
        self.routed_by
    }

    /// Returns the last-applied replacement edges, if any.
    pub fn routed_segment(&self) -> Option<&[OriginalEdgeId]> {
        self.routed_segment.as_deref()
    }
}

/// A vehicle's full edge list together with its ordered [Segment]s.
#[derive(Clone, Debug)]
pub struct ControlledRoute {
    /// Edges of the route, dynamically updated on splice.
    edges: Vec<OriginalEdgeId>,
    segments: Vec<Segment>,
    /// Index of the segment currently being worked on.
    current: usize,
}

impl ControlledRoute {
    /// Creates a new ControlledRoute; `segments` must be ordered and lie within `edges`.
    pub fn new(edges: Vec<OriginalEdgeId>, segments: Vec<Segment>) -> Self {
        debug_assert!(segments.iter().all(|s| s.end <= edges.len()));
        ControlledRoute {
            edges,
            segments,
            current: 0,
        }
    }

    /// Returns the full edge list of the route.
    pub fn edges(&self) -> &[OriginalEdgeId] {
        &self.edges
    }

    /// Returns the current segment.
    pub fn current_segment(&self) -> &Segment {
        &self.segments[self.current]
    }

    /// Returns a mutable reference to the current segment.
    pub fn current_segment_mut(&mut self) -> &mut Segment {
        &mut self.segments[self.current]
    }

    /// Returns the segments of the route.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the edges forming the given segment.
    pub fn segment_edges(&self, segment: &Segment) -> &[OriginalEdgeId] {
        &self.edges[segment.start..segment.end]
    }

    /// Returns the next segment (from the current one on) lying in a controlled region.
    pub fn get_next_region_segment(&self) -> Option<&Segment> {
        self.segments[self.current..]
            .iter()
            .find(|s| s.region.is_some())
    }

    /// Replaces the current segment's edges with `new_edges`.
    ///
    /// The first and last edge of `new_edges` must equal the segment's current boundary
    /// edges. On success the replacement is spliced into the route's edge list and the
    /// indices of every later segment are shifted so their slices remain valid.
    pub fn update_current_segment(
        &mut self,
        new_edges: Vec<OriginalEdgeId>,
        routed_by: BackendKind,
    ) -> Result<()> {
        let segment = &self.segments[self.current];
        let original = self.segment_edges(segment);
        if new_edges.first() != original.first() || new_edges.last() != original.last() {
            bail!(
                "Replacement segment does not match the boundary edges of the original ({:?} -> {:?})",
                original.first(),
                original.last()
            );
        }
        let (start, end) = (segment.start, segment.end);
        let size_diff = new_edges.len() as isize - (end - start) as isize;
        let segment = &mut self.segments[self.current];
        segment.routed_segment = Some(new_edges.clone());
        segment.routed_by = Some(routed_by);
        self.edges.splice(start..end, new_edges);
        if size_diff != 0 {
            self.segments[self.current].end = (end as isize + size_diff) as usize;
            for seg in &mut self.segments[self.current + 1..] {
                seg.start = (seg.start as isize + size_diff) as usize;
                seg.end = (seg.end as isize + size_diff) as usize;
            }
        }
        Ok(())
    }

    /// Advances to the next segment; returns `false` when already on the last one.
    pub fn switch_segment(&mut self) -> bool {
        if self.current + 1 >= self.segments.len() {
            return false;
        }
        self.current += 1;
        true
    }
}

/// A vehicle tracked for controlled-region rerouting.
#[derive(Clone, Debug)]
pub struct ControlledVehicle {
    /// Identifier of the vehicle.
    pub id: VehicleId,
    /// Segmented route of the vehicle.
    pub route: ControlledRoute,
    /// Time the vehicle entered the network.
    pub depart_time: Time,
    /// Time the vehicle left the network, once it has.
    pub arrival_time: Option<Time>,
}

impl ControlledVehicle {
    /// Creates a new ControlledVehicle.
    pub fn new(id: VehicleId, route: ControlledRoute, depart_time: Time) -> Self {
        ControlledVehicle {
            id,
            route,
            depart_time,
            arrival_time: None,
        }
    }

    /// Advances to the next segment; returns `false` when on the last one.
    pub fn switch_segment(&mut self) -> bool {
        self.route.switch_segment()
    }
}

/// Detects the controlled-region crossings of a static path.
///
/// A prefix already inside a region is skipped: there is no edge before it to anchor a
/// segment. Each remaining region entry yields a [Segment] from one edge before the entry
/// through one edge after the exit; a crossing that runs past the end of the path (no exit
/// anchor) is dropped. Returns `None` when the path does not lie on the network.
pub fn detect_segments(
    graph: &RouteGraph,
    regions: &[Region],
    path: &[OriginalEdgeId],
) -> Option<Vec<Segment>> {
    let edges = graph.resolve_edges(path)?;
    let region_of = |edge| {
        regions
            .iter()
            .position(|r| r.contains(edge))
            .map(RegionIndex::new)
    };
    let mut segments = Vec::new();
    let mut i = 0;
    while i < edges.len() {
        let Some(region) = region_of(edges[i]) else {
            i += 1;
            continue;
        };
        let in_region = |edge| region_of(edge) == Some(region);
        if i == 0 {
            // The vehicle starts inside the region; skip to the first edge outside it.
            while i < edges.len() && in_region(edges[i]) {
                i += 1;
            }
            continue;
        }
        // Walk to the first edge after the region.
        let mut j = i;
        while j < edges.len() && in_region(edges[j]) {
            j += 1;
        }
        if j == edges.len() {
            debug!("Path ends inside a region, crossing has no exit anchor");
            break;
        }
        segments.push(Segment::new(i - 1, j + 1, Some(region)));
        // The exit edge may itself enter another region.
        i = j;
    }
    Some(segments)
}
