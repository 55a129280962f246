//! Warmup calibration
//!
//! One timed run with the baseline iteration count, then a single linearly extrapolated
//! run that fills the rest of the target duration. There is no convergence loop.

use std::io::Write;
use std::time::{Duration, Instant};

use crate::error::MeasureResult;

/// Result of a completed warmup
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupOutcome {
	pub calibration_iterations: u64,
	pub calibration: Duration,
	/// Per-thread iterations of the corrective run, if one was needed
	pub corrective_iterations: Option<u64>,
	pub total: Duration,
}

/// Factor the iteration count is scaled by for the corrective run
pub fn scale_factor(target_secs: f64, measured_secs: f64) -> f64 {
	(target_secs - measured_secs) / measured_secs
}

/// Iterations that make the corrective run fill the remaining target duration
///
/// `None` when the calibration run alone already reached the target, or took no
/// measurable time.
pub fn corrective_iterations(baseline: u64, target_secs: f64, measured_secs: f64) -> Option<u64> {
	if measured_secs <= 0.0 {
		return None;
	}
	let scale = scale_factor(target_secs, measured_secs);
	(scale > 0.0).then(|| (baseline as f64 * scale) as u64)
}

/// Warms the machine up for about `target_secs`
///
/// `run` executes the workload once on every thread, with the given per-thread
/// iteration counts, and returns once all threads are joined. Progress lines are written
/// to `progress`. A target of zero or less skips the warmup.
pub fn calibrate<F>(
	threads: usize,
	baseline: u64,
	target_secs: f64,
	progress: &mut dyn Write,
	mut run: F,
) -> MeasureResult<Option<WarmupOutcome>>
where
	F: FnMut(&[u64]) -> MeasureResult<()>,
{
	if target_secs <= 0.0 {
		return Ok(None);
	}

	writeln!(progress, "Running warmup for estimated {} seconds.", target_secs)?;
	progress.flush()?;

	let warmup_start = Instant::now();
	run(&vec![baseline; threads])?;
	let calibration = warmup_start.elapsed();

	writeln!(
		progress,
		"Warmup calibration of {} iterations completed in {:.6} seconds.",
		baseline,
		calibration.as_secs_f64()
	)?;
	progress.flush()?;

	let corrective = corrective_iterations(baseline, target_secs, calibration.as_secs_f64());
	match corrective {
		Some(iterations) => run(&vec![iterations; threads])?,
		None => log::debug!("Calibration run reached the warmup target, skipping the corrective run"),
	}

	let total = warmup_start.elapsed();
	writeln!(progress, "Warmup complete in {:.6} seconds.", total.as_secs_f64())?;
	progress.flush()?;

	Ok(Some(WarmupOutcome {
		calibration_iterations: baseline,
		calibration,
		corrective_iterations: corrective,
		total,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io;
	use std::thread;

	#[test]
	fn corrective_count_extrapolates_linearly() {
		assert_eq!(corrective_iterations(1000, 10.0, 2.0), Some(4000));
		assert_eq!(corrective_iterations(500, 3.0, 1.5), Some(500));
	}

	#[test]
	fn no_corrective_run_once_target_reached() {
		assert_eq!(corrective_iterations(1000, 2.0, 2.0), None);
		assert_eq!(corrective_iterations(1000, 1.0, 3.0), None);
		assert_eq!(corrective_iterations(1000, 1.0, 0.0), None);
	}

	#[test]
	fn disabled_warmup_never_runs() {
		for target in [0.0, -5.0] {
			let mut runs = 0;
			let outcome = calibrate(2, 100, target, &mut io::sink(), |_| {
				runs += 1;
				Ok(())
			})
			.expect("calibrate");
			assert!(outcome.is_none());
			assert_eq!(runs, 0);
		}
	}

	#[test]
	fn short_calibration_triggers_one_corrective_run() {
		let mut calls: Vec<Vec<u64>> = Vec::new();
		let mut progress = Vec::new();
		let outcome = calibrate(3, 10, 2.0, &mut progress, |counts| {
			calls.push(counts.to_vec());
			if calls.len() == 1 {
				thread::sleep(Duration::from_millis(20));
			}
			Ok(())
		})
		.expect("calibrate")
		.expect("warmup ran");

		assert_eq!(calls.len(), 2);
		assert_eq!(calls[0], vec![10; 3]);
		let corrective = outcome.corrective_iterations.expect("corrective run");
		assert!(corrective > 10 && corrective <= 990);
		assert_eq!(calls[1], vec![corrective; 3]);

		let text = String::from_utf8(progress).expect("utf-8");
		assert!(text.starts_with("Running warmup for estimated 2 seconds.\n"));
		assert!(text.contains("Warmup calibration of 10 iterations completed in"));
	}

	#[test]
	fn long_calibration_skips_the_corrective_run() {
		let mut runs = 0;
		let outcome = calibrate(1, 10, 0.001, &mut io::sink(), |_| {
			runs += 1;
			thread::sleep(Duration::from_millis(5));
			Ok(())
		})
		.expect("calibrate")
		.expect("warmup ran");

		assert_eq!(runs, 1);
		assert!(outcome.corrective_iterations.is_none());
	}
}
