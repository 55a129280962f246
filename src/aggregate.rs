use std::io::Write;

use crate::constants::CSV_HEADER;
use crate::error::MeasureResult;
use crate::orchestrator::{Kernel, WorkerResult};
use crate::report::Report;
use crate::session::{EnergyDomain, PerfCounter, Session};

/// Folds the performance counters of every measured worker into `parent`
///
/// Worker sessions are cleaned up whether or not they could be combined. Returns how
/// many were combined.
pub fn aggregate_into(parent: &mut Session, results: Vec<WorkerResult>) -> usize {
	let mut combined = 0;
	for result in results {
		let Some(session) = result.session else {
			continue;
		};
		match parent.combine(&session) {
			Ok(()) => combined += 1,
			Err(e) => log::error!("Dropping the counters of worker thread {}: {}", result.index, e),
		}
		session.cleanup();
	}
	combined
}

/// Per-trial values kept for the CSV summary
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrialMetrics {
	pub elapsed_secs: f64,
	/// Events per second of the first programmable counter
	pub primary_rate: f64,
	/// Events per second of the second programmable counter
	pub secondary_rate: f64,
	pub package_watts: f64,
	pub pp0_watts: f64,
	/// Package temperature at the end of the trial
	pub package_temperature: f64,
}

impl TrialMetrics {
	pub fn from_report(report: &Report) -> Self {
		Self {
			elapsed_secs: report.elapsed_secs,
			primary_rate: report.rate(PerfCounter::Programmable(0)).unwrap_or_default(),
			secondary_rate: report.rate(PerfCounter::Programmable(1)).unwrap_or_default(),
			package_watts: report.watts(EnergyDomain::Package).unwrap_or_default(),
			pp0_watts: report.watts(EnergyDomain::Pp0).unwrap_or_default(),
			package_temperature: report.package_temperature_end().unwrap_or_default(),
		}
	}

	fn csv_fields(&self) -> [String; 6] {
		[
			format!("{:.6}", self.elapsed_secs),
			format!("{:.0}", self.primary_rate),
			format!("{:.0}", self.secondary_rate),
			format!("{:.6}", self.package_watts),
			format!("{:.6}", self.pp0_watts),
			format!("{:.0}", self.package_temperature),
		]
	}
}

/// Fixed-size buffers holding the metrics of every trial of both kernels
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSummary {
	threads: usize,
	normal: Vec<TrialMetrics>,
	extreme: Vec<TrialMetrics>,
}

impl TrialSummary {
	pub fn new(threads: usize, repeat: usize) -> Self {
		Self {
			threads,
			normal: vec![TrialMetrics::default(); repeat],
			extreme: vec![TrialMetrics::default(); repeat],
		}
	}

	pub fn record(&mut self, kernel: Kernel, trial: usize, metrics: TrialMetrics) {
		let buffer = match kernel {
			Kernel::Normal => &mut self.normal,
			Kernel::Extreme => &mut self.extreme,
		};
		let recorded = buffer.len();
		match buffer.get_mut(trial) {
			Some(slot) => *slot = metrics,
			None => log::warn!("Trial {} is beyond the {} recorded trials", trial, recorded),
		}
	}

	pub fn trials(&self, kernel: Kernel) -> &[TrialMetrics] {
		match kernel {
			Kernel::Normal => &self.normal,
			Kernel::Extreme => &self.extreme,
		}
	}

	/// Writes one CSV row per trial, normal and extreme side by side
	///
	/// Trials of a kernel that did not run are all zeros.
	pub fn write_csv_rows(&self, out: &mut dyn Write) -> MeasureResult<()> {
		let mut writer = csv::Writer::from_writer(out);
		for (normal, extreme) in self.normal.iter().zip(&self.extreme) {
			let mut row = Vec::with_capacity(CSV_HEADER.len());
			row.push(self.threads.to_string());
			row.extend(normal.csv_fields());
			row.extend(extreme.csv_fields());
			writer.write_record(&row)?;
		}
		writer.flush()?;
		Ok(())
	}
}

pub fn write_csv_header(out: &mut dyn Write) -> MeasureResult<()> {
	let mut writer = csv::Writer::from_writer(out);
	writer.write_record(CSV_HEADER)?;
	writer.flush()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::capabilities::{DEFAULT_COUNTERS, HardwareCapabilities, init_process};
	use crate::config::MeasureFlags;
	use crate::telemetry::mock::{self, MockTelemetry};
	use std::sync::Arc;

	#[test]
	fn aggregation_skips_unmeasured_and_mismatched_workers() {
		let caps = Arc::new(init_process(&MockTelemetry::default(), MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init"));
		let reduced = Arc::new(
			init_process(
				&MockTelemetry::default().with_known_events(&[]),
				MeasureFlags::NONE,
				DEFAULT_COUNTERS,
			)
			.expect("init"),
		);

		let measured = |caps: &Arc<HardwareCapabilities>, ticks: u64| {
			let mut session = Session::init_thread(Arc::clone(caps), MeasureFlags::NO_ENERGY).expect("session");
			session.start(MeasureFlags::NONE).expect("start");
			mock::tick(ticks);
			session.stop(MeasureFlags::NONE).expect("stop");
			session
		};

		let mut parent = measured(&caps, 0);
		let results = vec![
			WorkerResult {
				index: 0,
				session: Some(measured(&caps, 7)),
				checksum: 0,
			},
			WorkerResult {
				index: 1,
				session: None,
				checksum: 0,
			},
			WorkerResult {
				index: 2,
				session: Some(measured(&reduced, 100)),
				checksum: 0,
			},
			WorkerResult {
				index: 3,
				session: Some(measured(&caps, 5)),
				checksum: 0,
			},
		];

		assert_eq!(aggregate_into(&mut parent, results), 2);
		assert_eq!(parent.counter_value(PerfCounter::Programmable(0)), Some(12));
	}

	#[test]
	fn missing_first_counter_leaves_its_column_empty() {
		let source = MockTelemetry::default().with_known_events(&["IDQ:MITE_UOPS", "IDQ:DSB_UOPS", "IDQ:MS_UOPS"]);
		let caps = Arc::new(init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init"));
		let mut session = Session::init_thread(caps, MeasureFlags::NO_ENERGY).expect("session");
		session.start(MeasureFlags::NONE).expect("start");
		mock::tick(1000);
		session.stop(MeasureFlags::NONE).expect("stop");
		let report = session.report(MeasureFlags::NO_PRINT, &mut Vec::new()).expect("report");

		let metrics = TrialMetrics::from_report(&report);
		assert_eq!(metrics.primary_rate, 0.0);
		assert_eq!(Some(metrics.secondary_rate), report.rate(PerfCounter::Programmable(1)));
		assert!(metrics.secondary_rate > 0.0);
	}

	#[test]
	fn csv_header_and_rows() {
		let mut summary = TrialSummary::new(2, 2);
		summary.record(
			Kernel::Normal,
			0,
			TrialMetrics {
				elapsed_secs: 1.5,
				primary_rate: 1234.6,
				secondary_rate: 10.0,
				package_watts: 20.25,
				pp0_watts: 12.5,
				package_temperature: 61.0,
			},
		);
		summary.record(
			Kernel::Extreme,
			1,
			TrialMetrics {
				elapsed_secs: 0.25,
				..TrialMetrics::default()
			},
		);
		summary.record(Kernel::Extreme, 5, TrialMetrics::default());

		let mut out = Vec::new();
		write_csv_header(&mut out).expect("header");
		summary.write_csv_rows(&mut out).expect("rows");
		let text = String::from_utf8(out).expect("utf-8");
		let lines: Vec<&str> = text.lines().collect();

		assert_eq!(lines.len(), 3);
		assert_eq!(lines[0], CSV_HEADER.join(","));
		assert_eq!(
			lines[1],
			"2,1.500000,1235,10,20.250000,12.500000,61,0.000000,0,0,0.000000,0.000000,0"
		);
		assert_eq!(
			lines[2],
			"2,0.000000,0,0,0.000000,0.000000,0,0.250000,0,0,0.000000,0.000000,0"
		);
	}
}
