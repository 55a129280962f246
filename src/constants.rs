// Intel thermal and voltage MSR addresses
pub const MSR_PERF_STATUS: u32 = 0x198;
pub const MSR_IA32_THERM_STATUS: u32 = 0x19C;
pub const MSR_IA32_TEMPERATURE_TARGET: u32 = 0x1A2;
pub const MSR_IA32_PACKAGE_THERM_STATUS: u32 = 0x1B1;

// Intel RAPL MSR addresses
pub const INTEL_POWER_UNIT_MSR: u32 = 0x606;
pub const INTEL_PKG_ENERGY_MSR: u32 = 0x611;
pub const INTEL_PKG_POWER_INFO_MSR: u32 = 0x614;
pub const INTEL_DRAM_ENERGY_MSR: u32 = 0x619;
pub const INTEL_PP0_ENERGY_MSR: u32 = 0x639;
pub const INTEL_PP1_ENERGY_MSR: u32 = 0x641;

// AMD RAPL MSR addresses
pub const AMD_ENERGY_UNIT_MSR: u32 = 0xC001_0299;
pub const AMD_ENERGY_CORE_MSR: u32 = 0xC001_029A;
pub const AMD_ENERGY_PKG_MSR: u32 = 0xC001_029B;

/// Critical temperature used when TjMax cannot be read from the hardware
pub const DEFAULT_TJMAX: u32 = 100;

/// Number of cores whose register files are opened for temperature and voltage reads
pub const MONITORED_CORES: usize = 4;

/// Voltage resolution of MSR_PERF_STATUS, 1 / 2^13 volts
pub const VOLTAGE_UNITS: f64 = 0.000_122_070_312_5;

/// Energy values delivered by the counter subsystem are nanojoules
pub const NANOJOULES_PER_JOULE: f64 = 1e9;

/// RAPL energy status counters are 32 bits wide
pub const RAPL_COUNTER_MASK: u64 = 0xFFFF_FFFF;

// Run defaults
pub const DEFAULT_WARMUP_SECS: i64 = 120;
pub const DATA_SEED: u64 = 0xdead_beef;

/// Column header of the repeated-trial CSV summary
pub const CSV_HEADER: [&str; 13] = [
	"num_threads",
	"time_elapsed_normal",
	"uops_issued_normal",
	"idq_mite_normal",
	"pkg_power_normal",
	"pp0_power_normal",
	"pkg_temp_normal",
	"time_elapsed_extreme",
	"uops_issued_extreme",
	"idq_mite_extreme",
	"pkg_power_extreme",
	"pp0_power_extreme",
	"pkg_temp_extreme",
];

pub const SEPARATOR: &str = "========================================================================";
