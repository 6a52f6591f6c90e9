// src/realtime.rs
//!
//! Dedicated stepping thread.
//!
//! Owns the [`World`] while running and steps it either on a fixed wall-clock
//! period or as fast as possible. Publication happens inside `World::step`,
//! so a streaming server attached to the world's channel sees every step.
//! With the `high_priority` feature the thread asks the OS for maximum
//! priority before its first step.

use crate::clock::Pacer;
use crate::context::{ensure, OptionContext};
use crate::error::{Error, Result};
use crate::world::World;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pacing {
    /// One step per period; overruns are logged and the schedule catches up.
    Fixed,
    /// Step back to back.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepLoopConfig {
    pub period_ms: u64,
    pub pacing: Pacing,
    /// Stop on its own after this many steps.
    pub max_steps: Option<u64>,
}

impl Default for StepLoopConfig {
    fn default() -> Self {
        Self { period_ms: 1, pacing: Pacing::Fixed, max_steps: None }
    }
}

impl StepLoopConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.pacing == Pacing::BestEffort || self.period_ms > 0,
            "fixed pacing needs a positive period"
        );
        Ok(())
    }
}

pub struct StepLoop {
    stop: Arc<AtomicBool>,
    steps: Arc<AtomicU64>,
    handle: Option<JoinHandle<Result<World>>>,
}

impl StepLoop {
    /// Move `world` onto a new stepping thread.
    pub fn spawn(world: World, config: StepLoopConfig) -> Result<Self> {
        config.validate()?;
        let stop = Arc::new(AtomicBool::new(false));
        let steps = Arc::new(AtomicU64::new(0));

        let handle = {
            let stop = Arc::clone(&stop);
            let steps = Arc::clone(&steps);
            thread::Builder::new()
                .name("world-step".into())
                .spawn(move || run(world, config, &stop, &steps))?
        };

        Ok(Self { stop, steps, handle: Some(handle) })
    }

    /// Steps completed by this loop so far.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the thread to stop after its current step and take the world back.
    pub fn stop(mut self) -> Result<World> {
        self.stop.store(true, Ordering::Release);
        self.join_inner()
    }

    /// Wait for a loop bounded by `max_steps` to finish on its own.
    pub fn join(mut self) -> Result<World> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<World> {
        let handle = self.handle.take().context("step loop already joined")?;
        handle.join().map_err(|_| Error::msg("step thread panicked"))?
    }
}

impl Drop for StepLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(mut world: World, config: StepLoopConfig, stop: &AtomicBool, steps: &AtomicU64) -> Result<World> {
    #[cfg(feature = "high_priority")]
    {
        match thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max) {
            Ok(()) => info!("step thread priority raised to Max"),
            Err(e) => warn!(error = ?e, "could not raise step thread priority"),
        }
    }

    let period = Duration::from_millis(config.period_ms);
    let mut pacer = Pacer::new(period);
    info!(period_ms = config.period_ms, pacing = ?config.pacing, "step loop started");

    while !stop.load(Ordering::Acquire) {
        if config.max_steps.is_some_and(|max| steps.load(Ordering::Relaxed) >= max) {
            break;
        }
        if let Err(e) = world.step() {
            warn!(error = %e, step = world.step_count(), "step failed; stopping loop");
            return Err(e);
        }
        steps.fetch_add(1, Ordering::AcqRel);

        match config.pacing {
            Pacing::Fixed => {
                if let Some(late) = pacer.wait() {
                    warn!(
                        late_ms = late.as_secs_f64() * 1000.0,
                        step_ms = world.metrics().last_step_time_ms,
                        "step overran its period"
                    );
                }
            }
            Pacing::BestEffort => {}
        }
    }

    debug!(steps = steps.load(Ordering::Acquire), "step loop stopped");
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use crate::snapshot::{SnapshotChannel, Wait};
    use crate::world::WorldConfig;

    fn resting_world() -> World {
        let mut world = World::new(WorldConfig::default()).unwrap();
        world.add_ground(0.0);
        world.add_sphere("ball", 0.5, 1.0, Vec3::new(0.0, 0.0, 0.49)).unwrap();
        world
    }

    #[test]
    fn bounded_loop_runs_exactly_max_steps() {
        let config = StepLoopConfig { pacing: Pacing::BestEffort, max_steps: Some(25), ..Default::default() };
        let running = StepLoop::spawn(resting_world(), config).unwrap();
        let world = running.join().unwrap();
        assert_eq!(world.step_count(), 25);
        assert!((world.time() - 0.025).abs() < 1e-12);
    }

    #[test]
    fn stop_returns_the_world_and_publishes_along_the_way() {
        let mut world = resting_world();
        let channel = Arc::new(SnapshotChannel::new());
        world.attach_publisher(Arc::clone(&channel));

        let running = StepLoop::spawn(world, StepLoopConfig::default()).unwrap();
        let first = match channel.wait_newer(0, Duration::from_secs(5)) {
            Wait::Snapshot(snapshot) => snapshot,
            other => panic!("no snapshot published: {other:?}"),
        };
        assert!(first.step >= 1);
        assert!(!running.is_finished());

        let world = running.stop().unwrap();
        assert!(world.step_count() >= first.step);
        assert_eq!(channel.latest().step, world.step_count());
    }

    #[test]
    fn second_join_reports_missing_thread() {
        let config = StepLoopConfig { pacing: Pacing::BestEffort, max_steps: Some(1), ..Default::default() };
        let mut running = StepLoop::spawn(resting_world(), config).unwrap();
        assert_eq!(running.join_inner().unwrap().step_count(), 1);
        let err = running.join_inner().unwrap_err();
        assert!(err.to_string().contains("already joined"));
        assert!(running.is_finished());
    }

    #[test]
    fn fixed_pacing_requires_a_period() {
        let config = StepLoopConfig { period_ms: 0, ..Default::default() };
        assert!(config.validate().unwrap_err().is_config());
        let best_effort = StepLoopConfig { period_ms: 0, pacing: Pacing::BestEffort, max_steps: Some(1) };
        assert!(best_effort.validate().is_ok());
    }
}
