pub mod cpu;
pub mod msr;

use crate::constants::RAPL_COUNTER_MASK;

/// Converts two raw RAPL energy status readings into nanojoules
///
/// # Arguments
///
/// * `energy_start` - Starting energy reading
/// * `energy_end` - Ending energy reading
/// * `energy_unit` - Energy status unit from the power unit MSR (power of 2)
///
/// # Returns
///
/// Energy consumed between the two readings, in nanojoules
pub const fn rapl_energy_nj(energy_start: u64, energy_end: u64, energy_unit: u64) -> u64 {
	// The status register is 32 bits wide and wraps around
	let energy_difference = energy_end.wrapping_sub(energy_start) & RAPL_COUNTER_MASK;

	(energy_difference * 1_000_000_000) >> energy_unit
}

/// Reads the time stamp counter, or 0 on targets without one
#[inline]
pub fn read_tsc() -> u64 {
	#[cfg(target_arch = "x86_64")]
	{
		// SAFETY: rdtsc has no preconditions on x86_64
		unsafe { core::arch::x86_64::_rdtsc() }
	}
	#[cfg(not(target_arch = "x86_64"))]
	{
		0
	}
}

/// Allocates a zero-filled counter buffer
///
/// Measurement buffers are assumed to always be obtainable. Carrying on with a missing
/// buffer would silently produce zeroed results, so allocation failure ends the process.
pub fn zeroed_buffer(len: usize) -> Vec<u64> {
	let mut buffer = Vec::new();
	if let Err(e) = buffer.try_reserve_exact(len) {
		log::error!("Allocation of {} counter slots failed: {}", len, e);
		std::process::exit(libc::EXIT_FAILURE);
	}
	buffer.resize(len, 0);
	buffer
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn energy_in_nanojoules() {
		// 2^14 units of 1/2^14 joules is one joule
		assert_eq!(rapl_energy_nj(0, 1 << 14, 14), 1_000_000_000);
		assert_eq!(rapl_energy_nj(100, 100, 14), 0);
	}

	#[test]
	fn energy_handles_wrap_around() {
		let start = 0xFFFF_FFF0;
		let end = 0x10;
		assert_eq!(rapl_energy_nj(start, end, 0), 0x20 * 1_000_000_000);
	}

	#[test]
	fn zeroed_buffer_is_zeroed() {
		let buffer = zeroed_buffer(6);
		assert_eq!(buffer, vec![0; 6]);
	}
}
