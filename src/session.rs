//! Measurement sessions
//!
//! A [`Session`] owns the event sets and raw counter buffers of one measurement: the
//! process-level aggregate, or one worker thread. It moves through
//! init → start → stop → (combine) → report → cleanup.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use crate::capabilities::{HardwareCapabilities, Thermals};
use crate::config::MeasureFlags;
use crate::error::{MeasureError, MeasureResult};
use crate::report::Report;
use crate::telemetry::{EventCode, EventSet};
use crate::util::{read_tsc, zeroed_buffer};

/// RAPL energy domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnergyDomain {
	/// Whole package
	Package,
	/// Cores
	Pp0,
	/// Uncore, usually the integrated GPU
	Pp1,
	Dram,
}

impl EnergyDomain {
	pub const ALL: [EnergyDomain; 4] = [
		EnergyDomain::Package,
		EnergyDomain::Pp0,
		EnergyDomain::Pp1,
		EnergyDomain::Dram,
	];

	pub fn label(self) -> &'static str {
		match self {
			EnergyDomain::Package => "PKG",
			EnergyDomain::Pp0 => "PP0",
			EnergyDomain::Pp1 => "PP1",
			EnergyDomain::Dram => "DRAM",
		}
	}

	/// Classifies an energy counter by its name, e.g. `rapl:::PP0_ENERGY:PACKAGE0`
	pub fn classify(event_name: &str) -> Option<Self> {
		if event_name.contains("PACKAGE_ENERGY:") {
			Some(EnergyDomain::Package)
		} else if event_name.contains("PP0_ENERGY:") {
			Some(EnergyDomain::Pp0)
		} else if event_name.contains("PP1_ENERGY:") {
			Some(EnergyDomain::Pp1)
		} else if event_name.contains("DRAM_ENERGY:") {
			Some(EnergyDomain::Dram)
		} else {
			None
		}
	}
}

impl fmt::Display for EnergyDomain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// Performance counters a session may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PerfCounter {
	Cycles,
	Instructions,
	/// Programmable counter, by position in the workload's counter list
	Programmable(usize),
}

/// Timing and thermal state latched at start or stop
#[derive(Debug, Clone)]
pub struct Snapshot {
	pub time: Instant,
	pub tsc: u64,
	pub thermals: Thermals,
}

impl Snapshot {
	fn take(caps: &HardwareCapabilities) -> Self {
		// Thermal reads first so the clocks bracket the counters as tightly as possible
		let thermals = caps.read_thermals();
		Self {
			time: Instant::now(),
			tsc: read_tsc(),
			thermals,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Idle,
	Counting { energy: bool, perf: bool },
	Stopped,
}

pub struct Session {
	caps: Arc<HardwareCapabilities>,
	energy_set: Option<Box<dyn EventSet>>,
	perf_set: Option<Box<dyn EventSet>>,
	energy_values: Vec<u64>,
	perf_values: Vec<u64>,
	energy_slots: BTreeMap<EnergyDomain, usize>,
	perf_slots: BTreeMap<PerfCounter, usize>,
	perf_labels: BTreeMap<PerfCounter, &'static str>,
	begin: Option<Snapshot>,
	end: Option<Snapshot>,
	state: State,
	previous: Option<Report>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("energy_slots", &self.energy_slots)
			.field("perf_slots", &self.perf_slots)
			.field("energy_values", &self.energy_values)
			.field("perf_values", &self.perf_values)
			.field("state", &self.state)
			.finish_non_exhaustive()
	}
}

impl Session {
	/// Initializes a session on the calling thread
	///
	/// Builds the energy event set (unless energy is disabled by `flags` or unavailable)
	/// and the performance event set. Counters that fail to register are skipped with a
	/// warning and get no slot.
	pub fn init_thread(caps: Arc<HardwareCapabilities>, flags: MeasureFlags) -> MeasureResult<Self> {
		caps.register_thread()?;

		let mut energy_set = None;
		let mut energy_slots = BTreeMap::new();
		if !flags.no_energy && !caps.energy_events().is_empty() {
			let mut set = caps.create_event_set()?;
			for event in caps.energy_events() {
				log::debug!("Adding {} to event set.", event.name);
				match caps.add_event(set.as_mut(), event.code) {
					Ok(()) => {
						energy_slots.insert(event.domain, set.len() - 1);
					},
					Err(e) => log::warn!("Could not add energy event {}: {}", event.name, e),
				}
			}
			if set.is_empty() {
				log::warn!("Could not register any RAPL events, energy is disabled for this session.");
			} else {
				energy_set = Some(set);
			}
		}

		let mut perf_set = caps.create_event_set()?;
		let mut perf_slots = BTreeMap::new();
		let mut perf_labels = BTreeMap::new();

		let fixed = [
			(PerfCounter::Cycles, EventCode::TotalCycles, "Cycles elapsed:", "total cycles"),
			(
				PerfCounter::Instructions,
				EventCode::TotalInstructions,
				"Instructions retired:",
				"instructions retired",
			),
		];
		let programmable = caps.programmable_counters().iter().map(|resolved| {
			(
				PerfCounter::Programmable(resolved.position),
				resolved.code,
				resolved.counter.label,
				resolved.counter.name,
			)
		});

		for (counter, code, label, name) in fixed.into_iter().chain(programmable) {
			match caps.add_event(perf_set.as_mut(), code) {
				Ok(()) => {
					perf_slots.insert(counter, perf_set.len() - 1);
					perf_labels.insert(counter, label);
				},
				Err(e) => log::warn!("Could not add {} to the performance event set: {}", name, e),
			}
		}

		let energy_values = zeroed_buffer(energy_set.as_ref().map_or(0, |set| set.len()));
		let perf_values = zeroed_buffer(perf_set.len());

		let mut session = Self {
			caps,
			energy_set,
			perf_set: Some(perf_set),
			energy_values,
			perf_values,
			energy_slots,
			perf_slots,
			perf_labels,
			begin: None,
			end: None,
			state: State::Idle,
			previous: None,
		};

		// Empty start/stop so the first real measurement doesn't pay for lazy setup
		session.start(flags)?;
		session.stop(flags)?;
		session.state = State::Idle;

		Ok(session)
	}

	/// Latches the begin snapshot and starts counting
	///
	/// A set that fails to start is a warning; only the sets that did start are stopped.
	pub fn start(&mut self, flags: MeasureFlags) -> MeasureResult<()> {
		if matches!(self.state, State::Counting { .. }) {
			return Err(MeasureError::AlreadyStarted);
		}

		self.begin = Some(Snapshot::take(&self.caps));

		let mut energy = false;
		if let Some(set) = self.energy_set.as_mut().filter(|_| !flags.no_energy) {
			match set.start() {
				Ok(()) => energy = true,
				Err(e) => log::warn!("Starting the energy events failed: {}", e),
			}
		}

		let mut perf = false;
		if let Some(set) = self.perf_set.as_mut() {
			match set.start() {
				Ok(()) => perf = true,
				Err(e) => log::warn!("Starting the performance events failed: {}", e),
			}
		}

		self.state = State::Counting { energy, perf };
		Ok(())
	}

	/// Latches the end snapshot, stops the sets that started and reads their values
	pub fn stop(&mut self, _flags: MeasureFlags) -> MeasureResult<()> {
		let State::Counting { energy, perf } = self.state else {
			return Err(MeasureError::NotStarted);
		};

		self.end = Some(Snapshot::take(&self.caps));

		if energy {
			if let Some(set) = self.energy_set.as_mut() {
				if let Err(e) = set.stop(&mut self.energy_values) {
					log::warn!("Stopping the energy events failed: {}", e);
				}
			}
		}
		if perf {
			if let Some(set) = self.perf_set.as_mut() {
				if let Err(e) = set.stop(&mut self.perf_values) {
					log::warn!("Stopping the performance events failed: {}", e);
				}
			}
		}

		self.state = State::Stopped;
		Ok(())
	}

	/// Adds the performance counter values of `other` to this session
	///
	/// Both sessions must hold the same number of performance counters; otherwise
	/// neither is modified. Energy and thermals are never combined.
	pub fn combine(&mut self, other: &Session) -> MeasureResult<()> {
		if self.perf_values.len() != other.perf_values.len() {
			log::error!(
				"Event sets don't contain the same number of events ({} vs {})!",
				self.perf_values.len(),
				other.perf_values.len()
			);
			return Err(MeasureError::CounterCountMismatch {
				ours: self.perf_values.len(),
				theirs: other.perf_values.len(),
			});
		}
		if other.is_counting() {
			return Err(MeasureError::NotStopped);
		}

		for (ours, theirs) in self.perf_values.iter_mut().zip(&other.perf_values) {
			*ours = ours.wrapping_add(*theirs);
		}
		Ok(())
	}

	/// Computes the derived metrics of the last start/stop and prints them to `out`
	///
	/// Power deltas are taken against the previous report of this session. With
	/// `flags.no_print` nothing is written but the report is still computed and kept.
	pub fn report(&mut self, flags: MeasureFlags, out: &mut dyn Write) -> MeasureResult<Report> {
		let (Some(begin), Some(end)) = (self.begin.as_ref(), self.end.as_ref()) else {
			return Err(MeasureError::NotStopped);
		};
		if self.state != State::Stopped {
			return Err(MeasureError::NotStopped);
		}

		let energy = self
			.energy_slots
			.iter()
			.map(|(&domain, &slot)| (domain, self.energy_values[slot]));
		let counters = self.perf_slots.iter().map(|(&counter, &slot)| {
			let label = self.perf_labels.get(&counter).copied().unwrap_or("");
			(counter, label, self.perf_values[slot])
		});

		let report = Report::new(begin, end, energy, counters, self.previous.as_ref());
		if !flags.no_print {
			report.render(self.caps.report(), out)?;
			out.flush()?;
		}

		self.previous = Some(report.clone());
		Ok(report)
	}

	/// Releases the event sets and buffers
	pub fn cleanup(mut self) {
		for mut set in [self.energy_set.take(), self.perf_set.take()].into_iter().flatten() {
			if let Err(e) = set.cleanup() {
				log::warn!("Cleaning up an event set failed: {}", e);
			}
		}
	}

	pub fn have_energy(&self) -> bool {
		!self.energy_slots.is_empty()
	}

	pub fn is_counting(&self) -> bool {
		matches!(self.state, State::Counting { .. })
	}

	pub fn perf_values(&self) -> &[u64] {
		&self.perf_values
	}

	pub fn perf_slot(&self, counter: PerfCounter) -> Option<usize> {
		self.perf_slots.get(&counter).copied()
	}

	pub fn energy_slot(&self, domain: EnergyDomain) -> Option<usize> {
		self.energy_slots.get(&domain).copied()
	}

	/// The value of `counter` read at the last stop
	pub fn counter_value(&self, counter: PerfCounter) -> Option<u64> {
		self.perf_slot(counter).map(|slot| self.perf_values[slot])
	}

	pub fn previous_report(&self) -> Option<&Report> {
		self.previous.as_ref()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::capabilities::{DEFAULT_COUNTERS, init_process};
	use crate::telemetry::mock::{self, MockTelemetry};
	use std::thread;
	use std::time::Duration;

	fn capabilities(source: &MockTelemetry) -> Arc<HardwareCapabilities> {
		Arc::new(init_process(source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init"))
	}

	fn measured(caps: &Arc<HardwareCapabilities>, ticks: u64) -> Session {
		let mut session = Session::init_thread(Arc::clone(caps), MeasureFlags::NO_ENERGY).expect("session");
		session.start(MeasureFlags::NONE).expect("start");
		mock::tick(ticks);
		session.stop(MeasureFlags::NONE).expect("stop");
		session
	}

	#[test]
	fn slots_follow_registration_order() {
		let caps = capabilities(&MockTelemetry::default());
		let session = Session::init_thread(caps, MeasureFlags::NONE).expect("session");

		assert_eq!(session.perf_slot(PerfCounter::Cycles), Some(0));
		assert_eq!(session.perf_slot(PerfCounter::Instructions), Some(1));
		assert_eq!(session.perf_slot(PerfCounter::Programmable(3)), Some(5));
		assert_eq!(session.energy_slot(EnergyDomain::Pp0), Some(1));
		assert_eq!(session.energy_slot(EnergyDomain::Pp1), None);
		assert!(session.have_energy());
		session.cleanup();
	}

	#[test]
	fn programmable_counters_keep_their_list_position() {
		let source = MockTelemetry::default().with_known_events(&["IDQ:MITE_UOPS", "IDQ:DSB_UOPS", "IDQ:MS_UOPS"]);
		let caps = capabilities(&source);
		let mut session = measured(&caps, 1000);

		assert_eq!(session.perf_slot(PerfCounter::Programmable(0)), None);
		assert_eq!(session.perf_slot(PerfCounter::Programmable(1)), Some(2));
		assert_eq!(session.counter_value(PerfCounter::Programmable(3)), Some(1000));

		let report = session.report(MeasureFlags::NO_PRINT, &mut Vec::new()).expect("report");
		let mite = report
			.counters
			.iter()
			.find(|c| c.counter == PerfCounter::Programmable(1))
			.expect("MITE counter");
		assert_eq!(mite.label, "MITE uops:");
		assert_eq!(report.rate(PerfCounter::Programmable(0)), None);
	}

	#[test]
	fn rejected_counter_is_skipped_with_the_rest_registered() {
		let source = MockTelemetry::default().with_rejected_events(&["IDQ:DSB_UOPS"]);
		let caps = capabilities(&source);
		let session = measured(&caps, 10);

		assert_eq!(session.perf_values().len(), 5);
		assert_eq!(session.perf_slot(PerfCounter::Programmable(1)), Some(3));
		assert_eq!(session.perf_slot(PerfCounter::Programmable(2)), None);
		assert_eq!(session.perf_slot(PerfCounter::Programmable(3)), Some(4));
		assert_eq!(session.counter_value(PerfCounter::Programmable(3)), Some(10));
		assert_eq!(session.counter_value(PerfCounter::Cycles), Some(40));
	}

	#[test]
	fn combine_sums_element_wise() {
		let caps = capabilities(&MockTelemetry::default());
		let mut parent = measured(&caps, 0);
		let workers: Vec<Session> = [10, 20, 30].into_iter().map(|t| measured(&caps, t)).collect();

		for worker in workers.iter().rev() {
			parent.combine(worker).expect("combine");
		}

		assert_eq!(parent.counter_value(PerfCounter::Programmable(0)), Some(60));
		assert_eq!(parent.counter_value(PerfCounter::Cycles), Some(240));
		assert_eq!(parent.counter_value(PerfCounter::Instructions), Some(120));
	}

	#[test]
	fn combine_mismatch_leaves_both_untouched() {
		let full = capabilities(&MockTelemetry::default());
		let reduced = capabilities(&MockTelemetry::default().with_known_events(&["UOPS_ISSUED:ANY"]));

		let mut parent = measured(&full, 5);
		let other = measured(&reduced, 7);
		let before = (parent.perf_values().to_vec(), other.perf_values().to_vec());

		assert!(matches!(
			parent.combine(&other),
			Err(MeasureError::CounterCountMismatch { ours: 6, theirs: 3 })
		));
		assert_eq!(before, (parent.perf_values().to_vec(), other.perf_values().to_vec()));
	}

	#[test]
	fn lifecycle_violations_are_errors() {
		let caps = capabilities(&MockTelemetry::default());
		let mut session = Session::init_thread(caps, MeasureFlags::NONE).expect("session");
		let mut sink = Vec::new();

		assert!(matches!(session.stop(MeasureFlags::NONE), Err(MeasureError::NotStarted)));
		assert!(matches!(session.report(MeasureFlags::NONE, &mut sink), Err(MeasureError::NotStopped)));

		session.start(MeasureFlags::NONE).expect("start");
		assert!(matches!(session.start(MeasureFlags::NONE), Err(MeasureError::AlreadyStarted)));
		assert!(matches!(session.report(MeasureFlags::NONE, &mut sink), Err(MeasureError::NotStopped)));
		session.stop(MeasureFlags::NONE).expect("stop");
		assert!(session.report(MeasureFlags::NONE, &mut sink).is_ok());
	}

	#[test]
	fn second_report_deltas_use_the_first() {
		let caps = capabilities(&MockTelemetry::default());
		let mut session = Session::init_thread(caps, MeasureFlags::NONE).expect("session");
		let mut out = Vec::new();

		session.start(MeasureFlags::NONE).expect("start");
		thread::sleep(Duration::from_millis(5));
		session.stop(MeasureFlags::NONE).expect("stop");
		let first = session.report(MeasureFlags::NONE, &mut out).expect("first report");
		assert!(first.energy.iter().all(|reading| reading.delta_watts.is_none()));

		session.start(MeasureFlags::NONE).expect("start");
		thread::sleep(Duration::from_millis(5));
		session.stop(MeasureFlags::NONE).expect("stop");
		let second = session.report(MeasureFlags::NONE, &mut out).expect("second report");

		for reading in &second.energy {
			let before = first.watts(reading.domain).expect("domain in first report");
			let delta = reading.delta_watts.expect("delta against the first report");
			assert!((delta - (reading.watts - before)).abs() < 1e-9);
		}
		assert!(String::from_utf8_lossy(&out).contains("[delta"));
	}

	#[test]
	fn disabled_energy_prints_no_energy_lines() {
		for (source, flags) in [
			(MockTelemetry::default(), MeasureFlags::NO_ENERGY),
			(MockTelemetry::unprivileged(), MeasureFlags::NONE),
		] {
			let caps = capabilities(&source);
			let mut session = Session::init_thread(caps, flags).expect("session");
			assert!(!session.have_energy());

			session.start(flags).expect("start");
			session.stop(flags).expect("stop");
			let mut out = Vec::new();
			let report = session.report(flags, &mut out).expect("report");

			assert!(report.energy.is_empty());
			assert!(!String::from_utf8_lossy(&out).contains("energy consumed"));
		}
	}

	#[test]
	fn no_print_still_computes() {
		let caps = capabilities(&MockTelemetry::default());
		let mut session = measured(&caps, 1000);
		let mut out = Vec::new();
		let report = session.report(MeasureFlags::NO_PRINT, &mut out).expect("report");

		assert!(out.is_empty());
		assert!(report.elapsed_secs > 0.0);
		assert!(session.previous_report().is_some());
	}

	#[test]
	fn registration_is_serialized() {
		let source = MockTelemetry::default();
		let caps = capabilities(&source);

		thread::scope(|scope| {
			for _ in 0..4 {
				let caps = Arc::clone(&caps);
				scope.spawn(move || Session::init_thread(caps, MeasureFlags::NONE).expect("session").cleanup());
			}
		});

		assert_eq!(source.overlapping_registrations(), 0);
		assert_eq!(source.registered_threads(), 5);
	}
}
