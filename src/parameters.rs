// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Typed parameters controlling the rerouting engine.
//!
//! All parameter structs are deserializable and validated once, at
//! construction of the component that owns them.
use std::path::PathBuf;

use anyhow::{bail, Result};
use serde_derive::{Deserialize, Serialize};

use crate::clustering::ClusteringParameters;
use crate::units::Time;

const fn default_reserve() -> usize {
    1
}

fn default_min_eta() -> Time {
    Time(3.0)
}

const fn default_cache_size() -> usize {
    2000
}

const fn default_stretch() -> f64 {
    1.3
}

const fn default_max_routes() -> usize {
    3000
}

const fn default_processes() -> usize {
    2
}

fn default_timeout() -> Time {
    Time(9.0)
}

const fn default_is_true() -> bool {
    true
}

/// Parameters of the [Scheduler](crate::scheduler::Scheduler) state machine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchedulerParameters {
    /// Lower ETA bound (seconds): a vehicle closer than this is too close to plan usefully.
    pub low: Time,
    /// Middle ETA bound (seconds), used when deciding whether a returned plan can still be
    /// applied to a vehicle that has not yet entered the reserve edges.
    pub mid: Time,
    /// Upper ETA bound (seconds): a vehicle farther than this is re-estimated next round.
    pub high: Time,
    /// Number of edges before the region boundary at which planning is attempted early.
    #[serde(default = "default_reserve")]
    pub reserve: usize,
}

impl SchedulerParameters {
    /// Checks the scheduling-window thresholds.
    ///
    /// An inverted or collapsed window is a configuration error that would silently disable
    /// scheduling, so it is fatal.
    pub fn validate(&self) -> Result<()> {
        if !(self.low < self.mid && self.mid < self.high) {
            bail!(
                "Scheduling thresholds must satisfy low < mid < high, got ({}, {}, {})",
                self.low,
                self.mid,
                self.high
            );
        }
        if !(self.low.is_valid() && self.mid.is_valid() && self.high.is_valid()) {
            bail!("Scheduling thresholds must be finite and non-negative");
        }
        Ok(())
    }
}

/// Parameters of the [NetworkBuilder](crate::builder::NetworkBuilder).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BuilderParameters {
    /// Maximum number of cached sub-graphs; inserts beyond this are rejected.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Stretch factor over the shortest-path cost when enumerating alternative routes.
    #[serde(default = "default_stretch")]
    pub stretch: f64,
    /// Maximum number of alternative routes to enumerate per (entry, exit) pair.
    #[serde(default = "default_max_routes")]
    pub max_routes: usize,
    /// Minimum ETA for a vehicle to be worth replanning at all; closer vehicles only
    /// contribute to capacity accounting.
    #[serde(default = "default_min_eta")]
    pub min_eta: Time,
    /// Similarity-clustering step reducing the candidate set; `None` disables it.
    #[serde(default)]
    pub clustering: Option<ClusteringParameters>,
}

impl Default for BuilderParameters {
    fn default() -> Self {
        BuilderParameters {
            cache_size: default_cache_size(),
            stretch: default_stretch(),
            max_routes: default_max_routes(),
            min_eta: default_min_eta(),
            clustering: None,
        }
    }
}

impl BuilderParameters {
    pub fn validate(&self) -> Result<()> {
        if self.stretch < 1.0 {
            bail!("Stretch factor must be at least 1.0, got {}", self.stretch);
        }
        if self.max_routes < 2 {
            bail!("At least 2 alternative routes are required, got {}", self.max_routes);
        }
        if let Some(clustering) = &self.clustering {
            clustering.validate()?;
        }
        Ok(())
    }
}

/// Configuration of the external planner invoked by the centralized backend.
///
/// Passed by reference into [Dso](crate::routing::dso::Dso); there is no process-wide planner
/// registry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Planner executable.
    pub command: String,
    /// Argument template; the placeholders `{domain}`, `{problem}` and `{result}` are
    /// substituted per invocation.
    pub args: Vec<String>,
    /// Path to the planning-domain file handed to every invocation.
    pub domain_file: PathBuf,
    /// Directory where problem and result files are written.
    pub work_dir: PathBuf,
    /// Wall-clock budget per invocation; the process is killed past it.
    #[serde(default = "default_timeout")]
    pub timeout: Time,
    /// Maximum number of concurrent planner invocations.
    #[serde(default = "default_processes")]
    pub processes: usize,
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            bail!("Planner command cannot be empty");
        }
        if self.timeout < Time(1.0) {
            bail!("Planner timeout has to be at least 1 second, got {}", self.timeout);
        }
        if self.processes == 0 {
            bail!("At least one planner process is required");
        }
        Ok(())
    }
}

/// Top-level parameters of the rerouting engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RerouteParameters {
    pub scheduler: SchedulerParameters,
    #[serde(default)]
    pub builder: BuilderParameters,
    /// If `true`, departed and scheduled vehicles are routed with the decentralized backend.
    #[serde(default = "default_is_true")]
    pub use_duo: bool,
    /// Planner configuration for the centralized backend; `None` disables it.
    #[serde(default)]
    pub planner: Option<PlannerConfig>,
}

impl RerouteParameters {
    /// Validates all parameters at once.
    ///
    /// A configuration with no routing backend at all is fatal: the engine would track
    /// vehicles without ever producing a route.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.builder.validate()?;
        if let Some(planner) = &self.planner {
            planner.validate()?;
        }
        if !self.use_duo && self.planner.is_none() {
            bail!("No routing backend configured: enable DUO or configure a planner");
        }
        Ok(())
    }
}
