// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Bounded-parallel dispatch of planning problems to the external planner.
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::parameters::PlannerConfig;

/// One planner invocation: a problem file in, result files out.
#[derive(Clone, Debug)]
pub struct PlannerCall {
    /// Path of the problem file handed to the planner.
    pub problem_file: PathBuf,
    /// Path prefix under which the planner writes its ranked result files.
    pub result_base: PathBuf,
}

/// Runs one planner invocation per call, at most `processes` of them concurrently.
///
/// Each invocation is bounded by the configured wall-clock timeout and forcibly
/// terminated past it; a timeout or failure yields `false` for that call and is never
/// retried within the window.
pub fn dispatch(config: &PlannerConfig, calls: &[PlannerCall]) -> Vec<bool> {
    if calls.is_empty() {
        return Vec::new();
    }
    info!(
        "Planning {} problems with at most {} concurrent planner calls, timeout {}s",
        calls.len(),
        config.processes,
        config.timeout
    );
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.processes)
        .build()
    {
        Ok(pool) => pool,
        Err(error) => {
            warn!("Failed to build the planner worker pool: {error}");
            return vec![false; calls.len()];
        }
    };
    pool.install(|| calls.par_iter().map(|call| run_planner(config, call)).collect())
}

/// Substitutes the `{domain}`, `{problem}` and `{result}` placeholders of one argument.
fn substitute(template: &str, call: &PlannerCall, domain: &Path) -> String {
    template
        .replace("{domain}", &domain.to_string_lossy())
        .replace("{problem}", &call.problem_file.to_string_lossy())
        .replace("{result}", &call.result_base.to_string_lossy())
}

/// Runs a single planner invocation to completion or timeout.
fn run_planner(config: &PlannerConfig, call: &PlannerCall) -> bool {
    let args: Vec<String> = config
        .args
        .iter()
        .map(|a| substitute(a, call, &config.domain_file))
        .collect();
    debug!("Calling planner: {} {}", config.command, args.join(" "));
    let child = Command::new(&config.command)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(error) => {
            warn!("Failed to spawn planner for {:?}: {error}", call.problem_file);
            return false;
        }
    };
    let deadline = Instant::now() + Duration::from_secs_f64(config.timeout.0);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.success(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(
                        "Planner timed out after {}s on {:?}, killing it",
                        config.timeout,
                        call.problem_file
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return false;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(error) => {
                warn!("Failed to wait for planner on {:?}: {error}", call.problem_file);
                let _ = child.kill();
                return false;
            }
        }
    }
}
