use msru::{Accessor, Msr};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::constants::VOLTAGE_UNITS;

/// Reads a value from a Model-Specific Register (MSR)
///
/// Opens the device node for every call, which is fine for one-shot reads such as the
/// energy unit or TjMax. Hot paths should hold an [`MsrFile`] instead.
///
/// # Arguments
///
/// * `msr_address` - The address of the MSR to read
/// * `cpu_id` - The CPU ID to read the MSR from
pub fn read_msr(msr_address: u32, cpu_id: usize) -> io::Result<u64> {
	Msr::new(msr_address, cpu_id as u16)
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
		.read()
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// An open `/dev/cpu/N/msr` device
///
/// Reads are positioned (`pread`), so one file can be shared by any number of threads.
#[derive(Debug)]
pub struct MsrFile {
	cpu: usize,
	file: File,
}

impl MsrFile {
	pub fn open(cpu: usize) -> io::Result<Self> {
		let path = format!("/dev/cpu/{}/msr", cpu);
		let file = File::open(&path).map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path, e)))?;
		Ok(Self { cpu, file })
	}

	pub fn cpu(&self) -> usize {
		self.cpu
	}

	pub fn read(&self, msr_address: u32) -> io::Result<u64> {
		let mut buf = [0u8; 8];
		self.file.read_exact_at(&mut buf, u64::from(msr_address))?;
		Ok(u64::from_ne_bytes(buf))
	}
}

/// Extracts TjMax (bits 16..23) from MSR_IA32_TEMPERATURE_TARGET
pub const fn decode_tjmax(temperature_target: u64) -> u32 {
	((temperature_target >> 16) & 0xFF) as u32
}

/// Converts a thermal status register into degrees Celsius
///
/// The digital readout (bits 16..22) counts degrees below TjMax.
pub fn decode_temperature(therm_status: u64, tjmax: u32) -> f64 {
	f64::from(tjmax) - ((therm_status >> 16) & 0x7F) as f64
}

/// Converts MSR_PERF_STATUS into the current core voltage
pub fn decode_voltage(perf_status: u64) -> f64 {
	((perf_status >> 32) & 0xFFFF) as f64 * VOLTAGE_UNITS
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tjmax_is_bits_16_to_23() {
		assert_eq!(decode_tjmax(0x0064_0000), 100);
		assert_eq!(decode_tjmax(0xFF5F_1234), 0x5F);
	}

	#[test]
	fn temperature_counts_down_from_tjmax() {
		// readout of 35 degrees below a TjMax of 100
		let status = 35u64 << 16 | 0x8000_0000;
		assert_eq!(decode_temperature(status, 100), 65.0);
		assert_eq!(decode_temperature(0, 90), 90.0);
	}

	#[test]
	fn voltage_uses_13_bit_fraction() {
		let status = (8192u64 << 32) | 0x1234;
		assert!((decode_voltage(status) - 1.0).abs() < 1e-12);
	}
}
