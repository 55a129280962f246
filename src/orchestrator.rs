//! Worker threads
//!
//! Every phase (calibration, corrective warmup, each trial) runs on fresh scoped threads,
//! one per configured thread, each owning one workload context for the duration of the
//! phase. Threads are joined before the phase returns.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::capabilities::{DEFAULT_COUNTERS, HardwareCapabilities, ProgrammableCounter};
use crate::config::{MeasureFlags, RunConfiguration};
use crate::error::{MeasureError, MeasureResult};
use crate::session::Session;
use crate::util::cpu::{pin_current_thread, pinned_cpu};

/// A micro-benchmark with a normal and an extreme variant
///
/// Each worker thread gets its own context from `init`, which lives for the whole run
/// and is handed back to `cleanup` at the end.
pub trait Workload: Sync {
	type Context: Send;

	/// Iterations per thread of one trial, before the multiplier is applied
	fn baseline_iterations(&self) -> u64;

	/// Programmable counters sampled while this workload runs
	fn counters(&self) -> &'static [ProgrammableCounter] {
		DEFAULT_COUNTERS
	}

	fn init(&self, config: &RunConfiguration) -> Option<Self::Context>;

	/// Runs `iterations` rounds of the regular kernel and returns a checksum
	fn normal(&self, context: &mut Self::Context, iterations: u64) -> u64;

	/// Runs `iterations` rounds of the heavily unrolled kernel and returns a checksum
	fn extreme(&self, context: &mut Self::Context, iterations: u64) -> u64;

	fn cleanup(&self, context: Self::Context) -> bool;
}

/// Which variant of the workload a phase runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
	Normal,
	Extreme,
}

impl Kernel {
	pub const ALL: [Kernel; 2] = [Kernel::Normal, Kernel::Extreme];

	pub fn run<W: Workload>(self, workload: &W, context: &mut W::Context, iterations: u64) -> u64 {
		match self {
			Kernel::Normal => workload.normal(context, iterations),
			Kernel::Extreme => workload.extreme(context, iterations),
		}
	}

	/// Name used in the phase banners
	pub fn description(self) -> &'static str {
		match self {
			Kernel::Normal => "normal version",
			Kernel::Extreme => "extreme unrolled version",
		}
	}
}

/// Everything one worker thread needs
#[derive(Debug)]
pub struct WorkerTask<'a, C> {
	pub index: usize,
	pub kernel: Kernel,
	pub iterations: u64,
	/// Wrap the kernel in a session of its own
	pub measure: bool,
	pub cpu: Option<usize>,
	pub context: &'a mut C,
}

/// What a worker thread hands back when joined
#[derive(Debug)]
pub struct WorkerResult {
	pub index: usize,
	/// The worker's stopped session, when it measured itself
	pub session: Option<Session>,
	pub checksum: u64,
}

#[derive(Debug)]
pub struct PhaseOutcome {
	/// Wall time from the first spawn to the last join
	pub elapsed: Duration,
	/// Results of the workers that joined cleanly, in thread order
	pub results: Vec<WorkerResult>,
}

pub struct Orchestrator<'w, W: Workload> {
	workload: &'w W,
	caps: Option<Arc<HardwareCapabilities>>,
	force_affinity: bool,
	cpus_available: usize,
	contexts: Vec<W::Context>,
}

impl<'w, W: Workload> Orchestrator<'w, W> {
	/// Pre-warms every hook once, then creates one context per worker thread
	///
	/// A context that fails to initialize is fatal.
	pub fn new(
		workload: &'w W,
		config: &RunConfiguration,
		caps: Option<Arc<HardwareCapabilities>>,
		cpus_available: usize,
	) -> MeasureResult<Self> {
		match workload.init(config) {
			Some(mut context) => {
				workload.normal(&mut context, 0);
				workload.extreme(&mut context, 0);
				if !workload.cleanup(context) {
					log::warn!("Benchmark cleanup hook failed during pre-warmup");
				}
			},
			None => log::warn!("Benchmark initialization hook failed during pre-warmup"),
		}

		let mut contexts = Vec::with_capacity(config.threads);
		for index in 0..config.threads {
			match workload.init(config) {
				Some(context) => contexts.push(context),
				None => {
					log::error!("Benchmark initialization hook function failed for thread {}!", index);
					for context in contexts {
						workload.cleanup(context);
					}
					return Err(MeasureError::WorkloadInit(index));
				},
			}
		}

		Ok(Self {
			workload,
			caps,
			force_affinity: config.force_affinity,
			cpus_available,
			contexts,
		})
	}

	/// Runs `kernel` on every worker thread and joins them
	///
	/// `iterations` holds the count of each thread. With `measure` every worker wraps the
	/// kernel in its own session (energy disabled) and returns it stopped. Failing to
	/// spawn a thread is fatal; a worker that panics is logged and left out of the results.
	pub fn run_phase(&mut self, kernel: Kernel, iterations: &[u64], measure: bool) -> MeasureResult<PhaseOutcome> {
		let workload = self.workload;
		let caps = if measure { self.caps.clone() } else { None };
		let force_affinity = self.force_affinity;
		let cpus_available = self.cpus_available;

		let started = Instant::now();
		let results = thread::scope(|scope| -> MeasureResult<Vec<WorkerResult>> {
			let mut handles = Vec::with_capacity(self.contexts.len());

			for (index, (context, &iterations)) in self.contexts.iter_mut().zip(iterations).enumerate() {
				let task = WorkerTask {
					index,
					kernel,
					iterations,
					measure,
					cpu: force_affinity.then(|| pinned_cpu(index, cpus_available)),
					context,
				};
				let caps = caps.clone();

				let handle = thread::Builder::new()
					.name(format!("worker-{}", index))
					.spawn_scoped(scope, move || run_worker(workload, caps, task))
					.map_err(|source| {
						log::error!("Spawning worker thread {} failed: {}", index, source);
						MeasureError::ThreadSpawn { index, source }
					})?;
				handles.push((index, handle));
			}

			let mut results = Vec::with_capacity(handles.len());
			for (index, handle) in handles {
				match handle.join() {
					Ok(result) => results.push(result),
					Err(_) => log::warn!("Joining worker thread {} failed, its results are missing", index),
				}
			}
			Ok(results)
		})?;

		Ok(PhaseOutcome {
			elapsed: started.elapsed(),
			results,
		})
	}

	/// Hands every context back to the workload's cleanup hook
	pub fn finish(self) -> bool {
		let mut clean = true;
		for (index, context) in self.contexts.into_iter().enumerate() {
			if !self.workload.cleanup(context) {
				log::warn!("Benchmark cleanup hook failed for thread {}", index);
				clean = false;
			}
		}
		clean
	}
}

fn run_worker<W: Workload>(
	workload: &W,
	caps: Option<Arc<HardwareCapabilities>>,
	task: WorkerTask<'_, W::Context>,
) -> WorkerResult {
	if let Some(cpu) = task.cpu {
		if let Err(e) = pin_current_thread(cpu) {
			log::warn!("Pinning worker thread {} to CPU {} failed: {}", task.index, cpu, e);
		}
	}

	let mut session = match caps.filter(|_| task.measure) {
		Some(caps) => match Session::init_thread(caps, MeasureFlags::NO_ENERGY) {
			Ok(session) => Some(session),
			Err(e) => {
				log::warn!("Measuring worker thread {} failed: {}", task.index, e);
				None
			},
		},
		None => None,
	};

	if let Some(session) = session.as_mut() {
		if let Err(e) = session.start(MeasureFlags::NO_ENERGY) {
			log::warn!("Starting the session of worker thread {} failed: {}", task.index, e);
		}
	}

	let checksum = task.kernel.run(workload, task.context, task.iterations);

	if let Some(session) = session.as_mut() {
		if let Err(e) = session.stop(MeasureFlags::NO_ENERGY) {
			log::warn!("Stopping the session of worker thread {} failed: {}", task.index, e);
		}
	}

	WorkerResult {
		index: task.index,
		session,
		checksum,
	}
}
