//! Process-wide hardware capabilities
//!
//! [`init_process`] probes the telemetry source once, before any worker thread exists, and
//! returns the [`HardwareCapabilities`] every session borrows from: the counter subsystem,
//! the open per-core register files, the resolved programmable counter codes and TjMax.

use std::sync::{Mutex, PoisonError};

use crate::config::MeasureFlags;
use crate::constants::*;
use crate::error::{MeasureError, MeasureResult};
use crate::session::EnergyDomain;
use crate::telemetry::{CounterSubsystem, DataType, EventCode, EventSet, RegisterFile, TelemetrySource};
use crate::util::msr::{decode_temperature, decode_tjmax, decode_voltage};

const ENERGY_COMPONENT: &str = "rapl";

/// A named programmable performance event and the label it is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammableCounter {
	pub name: &'static str,
	pub label: &'static str,
}

/// Instruction decode queue counters
pub const DEFAULT_COUNTERS: &[ProgrammableCounter] = &[
	ProgrammableCounter {
		name: "UOPS_ISSUED:ANY",
		label: "Uops issued:",
	},
	ProgrammableCounter {
		name: "IDQ:MITE_UOPS",
		label: "MITE uops:",
	},
	ProgrammableCounter {
		name: "IDQ:DSB_UOPS",
		label: "DSB uops:",
	},
	ProgrammableCounter {
		name: "IDQ:MS_UOPS",
		label: "MS uops:",
	},
];

/// At most this many programmable counters are registered
pub const MAX_PROGRAMMABLE_COUNTERS: usize = 4;

/// What the hardware could provide at process initialization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityReport {
	pub privileged: bool,
	/// Why energy counters are unavailable, if they are
	pub energy_unavailable: Option<String>,
	/// Energy domains the counter subsystem exposes
	pub energy_domains: Vec<EnergyDomain>,
	/// Programmable counters whose codes resolved, by name
	pub counters: Vec<&'static str>,
	/// Programmable counters that were skipped, by name
	pub missing_counters: Vec<&'static str>,
	/// Cores with an open register file
	pub register_cores: Vec<usize>,
	pub tjmax: u32,
}

impl CapabilityReport {
	pub fn has_energy(&self) -> bool {
		self.energy_unavailable.is_none() && !self.energy_domains.is_empty()
	}

	pub fn has_thermals(&self) -> bool {
		!self.register_cores.is_empty()
	}
}

/// Temperature and voltage of one core at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreThermals {
	pub core: usize,
	pub temperature: Option<f64>,
	pub voltage: Option<f64>,
}

/// Temperatures and voltages of every monitored core
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thermals {
	pub package_temperature: Option<f64>,
	pub cores: Vec<CoreThermals>,
}

/// An energy counter found in the energy component
#[derive(Debug, Clone)]
pub struct EnergyEvent {
	pub domain: EnergyDomain,
	pub code: EventCode,
	pub name: String,
}

/// A programmable counter whose code resolved
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCounter {
	/// Index in the workload's counter list, resolved or not
	pub position: usize,
	pub counter: ProgrammableCounter,
	pub code: EventCode,
}

pub struct HardwareCapabilities {
	counters: Box<dyn CounterSubsystem>,
	/// Serializes event set creation and event registration
	registration: Mutex<()>,
	register_files: Vec<Box<dyn RegisterFile>>,
	programmable: Vec<ResolvedCounter>,
	energy_events: Vec<EnergyEvent>,
	tjmax: u32,
	cpus_available: usize,
	report: CapabilityReport,
}

/// Initializes the hardware capabilities of the process
///
/// Must run once, before any worker thread. Missing privileges and unresolvable counters
/// are logged and leave the corresponding capability out; only a counter subsystem that
/// cannot be initialized at all is an error.
pub fn init_process(
	source: &dyn TelemetrySource,
	flags: MeasureFlags,
	counters: &[ProgrammableCounter],
) -> MeasureResult<HardwareCapabilities> {
	let subsystem = source
		.init_counters()
		.map_err(|e| MeasureError::CounterSubsystem(e.to_string()))?;
	subsystem
		.register_thread()
		.map_err(|e| MeasureError::CounterSubsystem(e.to_string()))?;

	let privileged = source.is_privileged();
	let mut report = CapabilityReport {
		privileged,
		..CapabilityReport::default()
	};

	// Programmable counters
	let mut programmable = Vec::new();
	for (position, counter) in counters.iter().take(MAX_PROGRAMMABLE_COUNTERS).enumerate() {
		match subsystem.resolve_event_code(counter.name) {
			Some(code) => {
				programmable.push(ResolvedCounter {
					position,
					counter: *counter,
					code,
				});
				report.counters.push(counter.name);
			},
			None => {
				log::warn!("No such event found \"{}\"!", counter.name);
				report.missing_counters.push(counter.name);
			},
		}
	}

	// Register files and TjMax
	let mut register_files = Vec::new();
	let mut tjmax = DEFAULT_TJMAX;
	if privileged {
		for core in 0..MONITORED_CORES.min(source.cpus_available()) {
			match source.open_register_file(core) {
				Ok(file) => register_files.push(file),
				Err(e) => log::warn!("Cannot open register file of core {}: {}", core, e),
			}
		}

		if let Some(core0) = register_files.iter().find(|f| f.core() == 0) {
			match core0.read_register(MSR_IA32_TEMPERATURE_TARGET) {
				Ok(target) if decode_tjmax(target) > 0 => tjmax = decode_tjmax(target),
				Ok(_) => log::warn!("TjMax reads as 0, using the default value of {}", DEFAULT_TJMAX),
				Err(e) => log::warn!(
					"Failed to read MSR_IA32_TEMPERATURE_TARGET ({}), using the default value of {} for TjMax",
					e,
					DEFAULT_TJMAX
				),
			}
		}
	} else {
		log::warn!("Not running as root, some functionality will be disabled.");
	}
	report.register_cores = register_files.iter().map(|f| f.core()).collect();
	report.tjmax = tjmax;

	// Energy counters
	let energy_events = if flags.no_energy {
		report.energy_unavailable = Some("disabled by flag".to_string());
		Vec::new()
	} else if !privileged {
		report.energy_unavailable = Some("not running as root".to_string());
		Vec::new()
	} else {
		match find_energy_events(subsystem.as_ref()) {
			Ok(events) => events,
			Err(reason) => {
				log::warn!("{}", reason);
				report.energy_unavailable = Some(reason);
				Vec::new()
			},
		}
	};
	report.energy_domains = energy_events.iter().map(|e| e.domain).collect();

	log::debug!("Hardware capabilities: {:?}", report);

	Ok(HardwareCapabilities {
		counters: subsystem,
		registration: Mutex::new(()),
		register_files,
		programmable,
		energy_events,
		tjmax,
		cpus_available: source.cpus_available(),
		report,
	})
}

/// Lists the 64-bit unsigned counters of the energy component, classified by domain
fn find_energy_events(subsystem: &dyn CounterSubsystem) -> Result<Vec<EnergyEvent>, String> {
	let component = subsystem
		.components()
		.into_iter()
		.find(|c| c.name.contains(ENERGY_COMPONENT))
		.ok_or_else(|| "No RAPL component found in the counter subsystem.".to_string())?;

	if let Some(reason) = component.disabled_reason {
		return Err(format!("RAPL component disabled: {}.", reason));
	}

	let mut events = Vec::new();
	for info in subsystem.component_events(component.id) {
		if info.data_type != DataType::Uint64 {
			continue;
		}
		let Some(domain) = EnergyDomain::classify(&info.name) else {
			continue;
		};
		// First counter of a domain wins
		if events.iter().any(|e: &EnergyEvent| e.domain == domain) {
			continue;
		}
		log::debug!("Found energy event {} ({})", info.name, domain.label());
		events.push(EnergyEvent {
			domain,
			code: info.code,
			name: info.name,
		});
	}

	if events.is_empty() {
		return Err("Could not find any RAPL events.".to_string());
	}
	Ok(events)
}

impl HardwareCapabilities {
	pub fn report(&self) -> &CapabilityReport {
		&self.report
	}

	pub fn tjmax(&self) -> u32 {
		self.tjmax
	}

	pub fn cpus_available(&self) -> usize {
		self.cpus_available
	}

	pub fn programmable_counters(&self) -> &[ResolvedCounter] {
		&self.programmable
	}

	pub fn energy_events(&self) -> &[EnergyEvent] {
		&self.energy_events
	}

	pub fn register_thread(&self) -> MeasureResult<()> {
		self.counters.register_thread()?;
		Ok(())
	}

	/// Creates an empty event set, holding the registration lock
	pub fn create_event_set(&self) -> MeasureResult<Box<dyn EventSet>> {
		let _guard = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
		Ok(self.counters.create_event_set()?)
	}

	/// Adds one event to `set`, holding the registration lock
	pub fn add_event(&self, set: &mut dyn EventSet, code: EventCode) -> MeasureResult<()> {
		let _guard = self.registration.lock().unwrap_or_else(PoisonError::into_inner);
		set.add_event(code)?;
		Ok(())
	}

	/// Samples package and per-core temperature and voltage from the open register files
	///
	/// Reads are positioned reads and take no lock. Failed reads are logged and left empty.
	pub fn read_thermals(&self) -> Thermals {
		let mut thermals = Thermals::default();

		// Package status is only read through core 0
		if let Some(core0) = self.register_files.iter().find(|f| f.core() == 0) {
			thermals.package_temperature = self.read_decoded(core0.as_ref(), MSR_IA32_PACKAGE_THERM_STATUS, |v| {
				decode_temperature(v, self.tjmax)
			});
		}

		for file in &self.register_files {
			thermals.cores.push(CoreThermals {
				core: file.core(),
				temperature: self.read_decoded(file.as_ref(), MSR_IA32_THERM_STATUS, |v| {
					decode_temperature(v, self.tjmax)
				}),
				voltage: self.read_decoded(file.as_ref(), MSR_PERF_STATUS, decode_voltage),
			});
		}
		thermals
	}

	fn read_decoded(&self, file: &dyn RegisterFile, offset: u32, decode: impl Fn(u64) -> f64) -> Option<f64> {
		match file.read_register(offset) {
			Ok(value) => Some(decode(value)),
			Err(e) => {
				log::warn!("Failed to read MSR offset 0x{:04x} of core {}: {}", offset, file.core(), e);
				None
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::telemetry::mock::MockTelemetry;

	#[test]
	fn privileged_mock_has_everything() {
		let source = MockTelemetry::default();
		let caps = init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init");
		let report = caps.report();

		assert!(report.has_energy());
		assert_eq!(
			report.energy_domains,
			vec![EnergyDomain::Package, EnergyDomain::Pp0, EnergyDomain::Dram]
		);
		assert_eq!(report.counters.len(), 4);
		assert_eq!(report.register_cores, vec![0, 1, 2, 3]);
		assert_eq!(caps.tjmax(), 95);
	}

	#[test]
	fn unprivileged_degrades_without_failing() {
		let source = MockTelemetry::unprivileged();
		let caps = init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init");
		let report = caps.report();

		assert!(!report.has_energy());
		assert!(!report.has_thermals());
		assert_eq!(caps.tjmax(), DEFAULT_TJMAX);
		assert!(caps.read_thermals().package_temperature.is_none());
	}

	#[test]
	fn unresolvable_counters_are_skipped() {
		let source = MockTelemetry::default().with_known_events(&["UOPS_ISSUED:ANY", "IDQ:DSB_UOPS"]);
		let caps = init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init");
		assert_eq!(caps.report().counters, vec!["UOPS_ISSUED:ANY", "IDQ:DSB_UOPS"]);
		assert_eq!(caps.report().missing_counters, vec!["IDQ:MITE_UOPS", "IDQ:MS_UOPS"]);

		let positions: Vec<usize> = caps.programmable_counters().iter().map(|c| c.position).collect();
		assert_eq!(positions, vec![0, 2]);
	}

	#[test]
	fn register_files_open_independently() {
		let source = MockTelemetry::default().without_register_file(1);
		let caps = init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init");
		assert_eq!(caps.report().register_cores, vec![0, 2, 3]);
		assert_eq!(caps.tjmax(), 95);

		let thermals = caps.read_thermals();
		assert_eq!(thermals.package_temperature, Some(60.0));
		let cores: Vec<usize> = thermals.cores.iter().map(|c| c.core).collect();
		assert_eq!(cores, vec![0, 2, 3]);
	}

	#[test]
	fn package_temperature_needs_core_zero() {
		let source = MockTelemetry::default().without_register_file(0);
		let caps = init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init");
		assert_eq!(caps.report().register_cores, vec![1, 2, 3]);
		assert_eq!(caps.tjmax(), DEFAULT_TJMAX);

		let thermals = caps.read_thermals();
		assert_eq!(thermals.package_temperature, None);
		assert_eq!(thermals.cores.len(), 3);
		// 100 - 40
		assert_eq!(thermals.cores[0].temperature, Some(60.0));
	}

	#[test]
	fn broken_counter_subsystem_is_an_error() {
		let source = MockTelemetry::default().without_counters();
		assert!(matches!(
			init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS),
			Err(MeasureError::CounterSubsystem(_))
		));
	}

	#[test]
	fn thermals_are_decoded_against_tjmax() {
		let source = MockTelemetry::default();
		let caps = init_process(&source, MeasureFlags::NONE, DEFAULT_COUNTERS).expect("init");
		let thermals = caps.read_thermals();

		assert_eq!(thermals.package_temperature, Some(60.0));
		assert_eq!(thermals.cores.len(), 4);
		assert_eq!(thermals.cores[2].temperature, Some(55.0));
		assert_eq!(thermals.cores[0].voltage, Some(1.0));
	}

	#[test]
	fn energy_flag_disables_energy() {
		let source = MockTelemetry::default();
		let caps = init_process(&source, MeasureFlags::NO_ENERGY, DEFAULT_COUNTERS).expect("init");
		assert!(caps.energy_events().is_empty());
		assert!(!caps.report().has_energy());
	}
}
