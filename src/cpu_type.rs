use std::fs;

/// Represents CPU manufacturer types that can be detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuType {
	/// Intel CPU architecture
	Intel,
	/// AMD CPU architecture
	Amd,
	/// Any other CPU architecture not explicitly supported
	Unsupported,
}

impl CpuType {
	/// Detects the CPU manufacturer by reading /proc/cpuinfo
	pub fn detect() -> Self {
		let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
		Self::from_cpuinfo(&cpuinfo)
	}

	pub fn from_cpuinfo(cpuinfo: &str) -> Self {
		if cpuinfo.contains("GenuineIntel") {
			CpuType::Intel
		} else if cpuinfo.contains("AuthenticAMD") {
			CpuType::Amd
		} else {
			CpuType::Unsupported
		}
	}

	/// Whether the thermal and voltage MSRs follow Intel's layout
	pub fn has_intel_thermal_msrs(self) -> bool {
		self == CpuType::Intel
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vendor_from_cpuinfo() {
		assert_eq!(CpuType::from_cpuinfo("vendor_id\t: GenuineIntel\n"), CpuType::Intel);
		assert_eq!(CpuType::from_cpuinfo("vendor_id\t: AuthenticAMD\n"), CpuType::Amd);
		assert_eq!(CpuType::from_cpuinfo("CPU implementer\t: 0x41\n"), CpuType::Unsupported);
	}
}
