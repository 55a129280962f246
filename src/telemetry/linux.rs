use std::path::Path;
use std::sync::Arc;
use std::{fs, io};

use perf_event::events::{Hardware, Raw};
use perf_event::{Builder, Counter, Group};

use crate::cpu_type::CpuType;
use crate::telemetry::rapl::{RaplComponent, RaplEvent};
use crate::telemetry::{
	ComponentInfo, CounterSubsystem, EventCode, EventInfo, EventSet, RegisterFile, TelemetrySource,
};
use crate::util::cpu::{cpus_available, running_as_root};
use crate::util::msr::{MsrFile, read_msr};

const PERF_COMPONENT: usize = 0;
const RAPL_COMPONENT: usize = 1;

const PERF_PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";
const CPU_EVENTS_DIR: &str = "/sys/bus/event_source/devices/cpu/events";

/// Raw encodings of the named Intel core events (Haswell and newer)
const INTEL_NAMED_EVENTS: &[(&str, u64)] = &[
	("UOPS_ISSUED:ANY", 0x010E),
	("UOPS_RETIRED:ALL", 0x01C2),
	("UOPS_EXECUTED:CORE", 0x02B1),
	("IDQ:MITE_UOPS", 0x0479),
	("IDQ:DSB_UOPS", 0x0879),
	("IDQ:MS_UOPS", 0x3079),
	("IDQ_UOPS_NOT_DELIVERED:CORE", 0x019C),
];

/// Telemetry backed by `/dev/cpu/*/msr` and `perf_event_open`
#[derive(Debug, Clone)]
pub struct LinuxTelemetry {
	cpu_type: CpuType,
	privileged: bool,
}

impl LinuxTelemetry {
	pub fn new() -> Self {
		Self {
			cpu_type: CpuType::detect(),
			privileged: running_as_root(),
		}
	}
}

impl Default for LinuxTelemetry {
	fn default() -> Self {
		Self::new()
	}
}

impl TelemetrySource for LinuxTelemetry {
	fn is_privileged(&self) -> bool {
		self.privileged
	}

	fn cpus_available(&self) -> usize {
		cpus_available()
	}

	fn init_counters(&self) -> io::Result<Box<dyn CounterSubsystem>> {
		if !Path::new(PERF_PARANOID_PATH).exists() {
			return Err(io::Error::new(
				io::ErrorKind::Unsupported,
				"perf events are not supported by this kernel",
			));
		}

		Ok(Box::new(LinuxCounters {
			cpu_type: self.cpu_type,
			rapl: Arc::new(RaplComponent::probe(self.cpu_type, self.privileged)),
		}))
	}

	fn open_register_file(&self, core: usize) -> io::Result<Box<dyn RegisterFile>> {
		if !self.cpu_type.has_intel_thermal_msrs() {
			return Err(io::Error::new(
				io::ErrorKind::Unsupported,
				format!("thermal MSRs not supported on {:?} CPUs", self.cpu_type),
			));
		}
		Ok(Box::new(MsrFile::open(core)?))
	}
}

impl RegisterFile for MsrFile {
	fn core(&self) -> usize {
		self.cpu()
	}

	fn read_register(&self, offset: u32) -> io::Result<u64> {
		self.read(offset)
	}
}

/// Counter subsystem made of the CPU's perf PMU and the RAPL registers
struct LinuxCounters {
	cpu_type: CpuType,
	rapl: Arc<RaplComponent>,
}

impl CounterSubsystem for LinuxCounters {
	fn register_thread(&self) -> io::Result<()> {
		// perf counters built on a thread observe that thread, nothing to register
		Ok(())
	}

	fn components(&self) -> Vec<ComponentInfo> {
		vec![
			ComponentInfo {
				id: PERF_COMPONENT,
				name: "perf_event".to_string(),
				disabled_reason: None,
			},
			ComponentInfo {
				id: RAPL_COMPONENT,
				name: "rapl".to_string(),
				disabled_reason: self.rapl.disabled_reason.clone(),
			},
		]
	}

	fn component_events(&self, component: usize) -> Vec<EventInfo> {
		if component != RAPL_COMPONENT {
			return Vec::new();
		}

		self.rapl
			.events
			.iter()
			.enumerate()
			.map(|(event, rapl_event)| EventInfo {
				code: EventCode::Native {
					component: RAPL_COMPONENT,
					event,
				},
				name: format!("rapl:::{}", rapl_event.name),
				data_type: rapl_event.data_type,
			})
			.collect()
	}

	fn resolve_event_code(&self, name: &str) -> Option<EventCode> {
		if self.cpu_type == CpuType::Intel {
			if let Some(&(_, config)) = INTEL_NAMED_EVENTS.iter().find(|(known, _)| *known == name) {
				return Some(EventCode::Raw(config));
			}
		}

		// Fall back to the kernel's alias for the event, e.g. "cpu-cycles"
		let alias = Path::new(CPU_EVENTS_DIR).join(name.to_lowercase());
		let spec = fs::read_to_string(alias).ok()?;
		parse_event_spec(spec.trim()).map(EventCode::Raw)
	}

	fn create_event_set(&self) -> io::Result<Box<dyn EventSet>> {
		Ok(Box::new(LinuxEventSet {
			rapl: Arc::clone(&self.rapl),
			group: None,
			slots: Vec::new(),
		}))
	}
}

enum Slot {
	Perf(Counter),
	Rapl { event: RaplEvent, begin: u64 },
}

/// Perf counters of a set share one group and are enabled, disabled and read together.
/// RAPL slots are read from the MSRs right around the group.
struct LinuxEventSet {
	rapl: Arc<RaplComponent>,
	/// Created with the first perf counter
	group: Option<Group>,
	slots: Vec<Slot>,
}

impl LinuxEventSet {
	fn add_to_group(&mut self, builder: &Builder) -> io::Result<Counter> {
		let mut group = match self.group.take() {
			Some(group) => group,
			None => Group::new()?,
		};
		let counter = group.add(builder);
		self.group = Some(group);
		counter
	}
}

impl EventSet for LinuxEventSet {
	fn add_event(&mut self, code: EventCode) -> io::Result<()> {
		let slot = match code {
			EventCode::TotalCycles => Slot::Perf(self.add_to_group(&Builder::new(Hardware::CPU_CYCLES))?),
			EventCode::TotalInstructions => Slot::Perf(self.add_to_group(&Builder::new(Hardware::INSTRUCTIONS))?),
			EventCode::Raw(config) => Slot::Perf(self.add_to_group(&Builder::new(Raw::new(config)))?),
			EventCode::Native {
				component: RAPL_COMPONENT,
				event,
			} => {
				let rapl_event = self.rapl.events.get(event).cloned().ok_or_else(|| {
					io::Error::new(io::ErrorKind::NotFound, format!("no RAPL event with index {}", event))
				})?;
				// Make sure the register is readable before accepting it
				let begin = read_msr(rapl_event.msr, rapl_event.cpu)?;
				Slot::Rapl {
					event: rapl_event,
					begin,
				}
			},
			EventCode::Native { component, .. } => {
				return Err(io::Error::new(
					io::ErrorKind::NotFound,
					format!("unknown component {}", component),
				));
			},
		};

		self.slots.push(slot);
		Ok(())
	}

	fn len(&self) -> usize {
		self.slots.len()
	}

	fn start(&mut self) -> io::Result<()> {
		if self.slots.is_empty() {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "event set is empty"));
		}

		for slot in &mut self.slots {
			if let Slot::Rapl { event, begin } = slot {
				*begin = read_msr(event.msr, event.cpu)?;
			}
		}
		if let Some(group) = self.group.as_mut() {
			group.reset()?;
			group.enable()?;
		}
		Ok(())
	}

	fn stop(&mut self, values: &mut [u64]) -> io::Result<()> {
		if values.len() != self.slots.len() {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("{} value slots for {} events", values.len(), self.slots.len()),
			));
		}

		let counts = match self.group.as_mut() {
			Some(group) => {
				group.disable()?;
				let counts = group.read()?;
				if counts.time_enabled() != counts.time_running() {
					log::debug!(
						"Performance counters were multiplexed (enabled {:?}, running {:?})",
						counts.time_enabled(),
						counts.time_running()
					);
				}
				Some(counts)
			},
			None => None,
		};

		let energy_unit = self.rapl.energy_unit;
		for (slot, value) in self.slots.iter_mut().zip(values.iter_mut()) {
			*value = match slot {
				Slot::Perf(counter) => counts
					.as_ref()
					.and_then(|counts| counts.get(counter))
					.map_or(0, |entry| entry.value()),
				Slot::Rapl { event, begin } => {
					let end = read_msr(event.msr, event.cpu)?;
					event.value(*begin, end, energy_unit)
				},
			};
		}
		Ok(())
	}

	fn cleanup(&mut self) -> io::Result<()> {
		self.slots.clear();
		self.group = None;
		Ok(())
	}
}

/// Parses a sysfs event alias such as `event=0x0e,umask=0x01,inv,cmask=1`
/// into a raw `perf_event_attr.config` value
pub fn parse_event_spec(spec: &str) -> Option<u64> {
	let mut config = 0u64;

	for term in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
		let (key, value) = match term.split_once('=') {
			Some((key, value)) => (key, parse_number(value)?),
			None => (term, 1),
		};

		config |= match key {
			"event" => (value & 0xFF) | ((value >> 8) & 0xF) << 32,
			"umask" => (value & 0xFF) << 8,
			"edge" => (value & 0x1) << 18,
			"any" => (value & 0x1) << 21,
			"inv" => (value & 0x1) << 23,
			"cmask" => (value & 0xFF) << 24,
			_ => return None,
		};
	}

	Some(config)
}

fn parse_number(value: &str) -> Option<u64> {
	match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
		Some(hex) => u64::from_str_radix(hex, 16).ok(),
		None => value.parse().ok(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_spec_event_and_umask() {
		assert_eq!(parse_event_spec("event=0x0e,umask=0x01"), Some(0x010E));
		assert_eq!(parse_event_spec("event=0x79,umask=0x30"), Some(0x3079));
	}

	#[test]
	fn event_spec_flags_and_cmask() {
		assert_eq!(
			parse_event_spec("event=0x9c,umask=0x01,inv,cmask=4"),
			Some(0x019C | 1 << 23 | 4 << 24)
		);
		assert_eq!(parse_event_spec("event=0x3c"), Some(0x3C));
	}

	#[test]
	fn event_spec_rejects_unknown_terms() {
		assert_eq!(parse_event_spec("event=0x3c,period=1000"), None);
		assert_eq!(parse_event_spec("event=zz"), None);
	}

	#[test]
	fn named_events_are_unique() {
		for (i, (name, _)) in INTEL_NAMED_EVENTS.iter().enumerate() {
			assert!(INTEL_NAMED_EVENTS[i + 1..].iter().all(|(other, _)| other != name));
		}
	}

	#[test]
	fn components_report_disabled_rapl() {
		let counters = LinuxCounters {
			cpu_type: CpuType::Unsupported,
			rapl: Arc::new(RaplComponent::probe(CpuType::Unsupported, false)),
		};
		let components = counters.components();
		let rapl = components.iter().find(|c| c.name.contains("rapl")).expect("rapl component");
		assert!(rapl.disabled_reason.is_some());
		assert!(counters.component_events(rapl.id).is_empty());
	}
}
