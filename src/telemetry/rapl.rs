use std::fmt::Debug;
use std::io;

use crate::constants::*;
use crate::cpu_type::CpuType;
use crate::telemetry::DataType;
use crate::util::msr::read_msr;
use crate::util::rapl_energy_nj;

/// How the raw register value of a RAPL event is turned into a counter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaplKind {
	/// Energy status counter, reported in nanojoules
	Energy,
	/// Energy status counter, reported in raw hardware units
	RawCount,
	/// Static register value (e.g. thermal design power), read at stop
	Fixed,
}

/// One RAPL register exposed as an event
#[derive(Debug, Clone)]
pub struct RaplEvent {
	pub name: &'static str,
	pub msr: u32,
	pub cpu: usize,
	pub kind: RaplKind,
	pub data_type: DataType,
}

impl RaplEvent {
	const fn energy(name: &'static str, msr: u32) -> Self {
		Self {
			name,
			msr,
			cpu: 0,
			kind: RaplKind::Energy,
			data_type: DataType::Uint64,
		}
	}

	/// Turns a begin/end register pair into the counter value
	pub fn value(&self, begin: u64, end: u64, energy_unit: u64) -> u64 {
		match self.kind {
			RaplKind::Energy => rapl_energy_nj(begin, end, energy_unit),
			RaplKind::RawCount => end.wrapping_sub(begin) & RAPL_COUNTER_MASK,
			RaplKind::Fixed => end & 0x7FFF,
		}
	}
}

/// Vendor-specific layout of the RAPL registers
pub trait EnergyMapper: Debug + Send + Sync {
	/// Returns the CPU type (Intel, AMD, etc.)
	fn cpu_type(&self) -> CpuType;

	/// Address of the MSR holding the energy status unit
	fn energy_unit_msr(&self) -> u32;

	/// All RAPL registers this vendor may expose
	fn events(&self) -> Vec<RaplEvent>;

	/// Gets the energy unit value from MSRs
	fn energy_unit(&self) -> io::Result<u64> {
		let unit_msr = read_msr(self.energy_unit_msr(), 0)?;
		Ok((unit_msr >> 8) & 0x1F)
	}
}

/// Intel RAPL: package, both power planes and DRAM
#[derive(Debug, Clone)]
pub struct IntelEnergyMapper;

impl EnergyMapper for IntelEnergyMapper {
	fn cpu_type(&self) -> CpuType {
		CpuType::Intel
	}

	fn energy_unit_msr(&self) -> u32 {
		INTEL_POWER_UNIT_MSR
	}

	fn events(&self) -> Vec<RaplEvent> {
		vec![
			RaplEvent {
				name: "THERMAL_SPEC:PACKAGE0",
				msr: INTEL_PKG_POWER_INFO_MSR,
				cpu: 0,
				kind: RaplKind::Fixed,
				data_type: DataType::Float64,
			},
			RaplEvent {
				name: "PACKAGE_ENERGY_CNT:PACKAGE0",
				msr: INTEL_PKG_ENERGY_MSR,
				cpu: 0,
				kind: RaplKind::RawCount,
				data_type: DataType::Uint64,
			},
			RaplEvent::energy("PACKAGE_ENERGY:PACKAGE0", INTEL_PKG_ENERGY_MSR),
			RaplEvent::energy("DRAM_ENERGY:PACKAGE0", INTEL_DRAM_ENERGY_MSR),
			RaplEvent::energy("PP0_ENERGY:PACKAGE0", INTEL_PP0_ENERGY_MSR),
			RaplEvent::energy("PP1_ENERGY:PACKAGE0", INTEL_PP1_ENERGY_MSR),
		]
	}
}

/// AMD RAPL: package and the energy of core 0
#[derive(Debug, Clone)]
pub struct AmdEnergyMapper;

impl EnergyMapper for AmdEnergyMapper {
	fn cpu_type(&self) -> CpuType {
		CpuType::Amd
	}

	fn energy_unit_msr(&self) -> u32 {
		AMD_ENERGY_UNIT_MSR
	}

	fn events(&self) -> Vec<RaplEvent> {
		vec![
			RaplEvent::energy("PACKAGE_ENERGY:PACKAGE0", AMD_ENERGY_PKG_MSR),
			RaplEvent::energy("PP0_ENERGY:PACKAGE0", AMD_ENERGY_CORE_MSR),
		]
	}
}

/// Factory function to create the appropriate mapper based on CPU type
pub fn create_energy_mapper(cpu_type: CpuType) -> Option<Box<dyn EnergyMapper>> {
	match cpu_type {
		CpuType::Intel => Some(Box::new(IntelEnergyMapper)),
		CpuType::Amd => Some(Box::new(AmdEnergyMapper)),
		CpuType::Unsupported => None,
	}
}

/// The RAPL component as seen by the counter subsystem
#[derive(Debug)]
pub struct RaplComponent {
	pub events: Vec<RaplEvent>,
	pub energy_unit: u64,
	pub disabled_reason: Option<String>,
}

impl RaplComponent {
	/// Probes which RAPL registers are readable on this machine
	pub fn probe(cpu_type: CpuType, privileged: bool) -> Self {
		let disabled = |reason: String| Self {
			events: Vec::new(),
			energy_unit: 0,
			disabled_reason: Some(reason),
		};

		if !privileged {
			return disabled("not running as root".to_string());
		}

		let Some(mapper) = create_energy_mapper(cpu_type) else {
			return disabled(format!("no RAPL support for {:?} CPUs", cpu_type));
		};

		let energy_unit = match mapper.energy_unit() {
			Ok(unit) => unit,
			Err(e) => return disabled(format!("cannot read energy unit MSR: {}", e)),
		};

		// Domains the package doesn't implement fail to read and are left out
		let events: Vec<RaplEvent> = mapper
			.events()
			.into_iter()
			.filter(|event| read_msr(event.msr, event.cpu).is_ok())
			.collect();

		log::debug!(
			"RAPL on {:?}: energy unit 2^-{} J, {} readable events",
			mapper.cpu_type(),
			energy_unit,
			events.len()
		);

		Self {
			events,
			energy_unit,
			disabled_reason: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn energy_events_report_nanojoules() {
		let event = RaplEvent::energy("PACKAGE_ENERGY:PACKAGE0", INTEL_PKG_ENERGY_MSR);
		assert_eq!(event.value(10, 10 + (1 << 16), 16), 1_000_000_000);
	}

	#[test]
	fn raw_count_wraps_at_32_bits() {
		let event = RaplEvent {
			name: "PACKAGE_ENERGY_CNT:PACKAGE0",
			msr: INTEL_PKG_ENERGY_MSR,
			cpu: 0,
			kind: RaplKind::RawCount,
			data_type: DataType::Uint64,
		};
		assert_eq!(event.value(0xFFFF_FFFE, 3, 14), 5);
	}

	#[test]
	fn vendors_map_to_register_layouts() {
		let intel = create_energy_mapper(CpuType::Intel).expect("intel mapper");
		assert_eq!(intel.energy_unit_msr(), INTEL_POWER_UNIT_MSR);
		assert!(intel.events().iter().any(|e| e.name.starts_with("DRAM_ENERGY:")));

		let amd = create_energy_mapper(CpuType::Amd).expect("amd mapper");
		assert_eq!(amd.cpu_type(), CpuType::Amd);
		assert_eq!(amd.events().len(), 2);

		assert!(create_energy_mapper(CpuType::Unsupported).is_none());
	}

	#[test]
	fn unprivileged_probe_is_disabled() {
		let rapl = RaplComponent::probe(CpuType::Intel, false);
		assert!(rapl.events.is_empty());
		assert!(rapl.disabled_reason.is_some());
	}
}
