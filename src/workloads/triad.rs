use std::hint::black_box;

use crate::config::RunConfiguration;
use crate::orchestrator::Workload;

/// 2 arrays * 65536 elements * 8 bytes = 1 MB, inside one 2 MB L3 slice
const ARRAY_SIZE: usize = 65536;
const SCALAR: f64 = 3.0;

/// Triad reduction over two L3-resident arrays
#[derive(Debug, Clone, Copy, Default)]
pub struct L3Triad;

impl L3Triad {
	pub const NTIMES: u64 = 20_000;
}

#[derive(Debug, Clone)]
pub struct TriadData {
	a: Vec<f64>,
	b: Vec<f64>,
	scalar: f64,
}

impl TriadData {
	pub fn zeroed() -> Self {
		Self {
			a: vec![0.0; ARRAY_SIZE],
			b: vec![0.0; ARRAY_SIZE],
			scalar: SCALAR,
		}
	}
}

impl Workload for L3Triad {
	type Context = TriadData;

	fn baseline_iterations(&self) -> u64 {
		Self::NTIMES
	}

	fn init(&self, _config: &RunConfiguration) -> Option<TriadData> {
		Some(TriadData::zeroed())
	}

	fn normal(&self, data: &mut TriadData, iterations: u64) -> u64 {
		let (a, b, scalar) = (&data.a[..ARRAY_SIZE], &data.b[..ARRAY_SIZE], black_box(data.scalar));
		let mut magic = 0.0f64;
		for _ in 0..iterations {
			let mut j = 0;
			while j < ARRAY_SIZE {
				unroll!(128, {
					magic += a[j] + scalar * b[j];
					j += 1;
				});
			}
		}
		magic.to_bits()
	}

	fn extreme(&self, data: &mut TriadData, iterations: u64) -> u64 {
		let (a, b, scalar) = (&data.a[..ARRAY_SIZE], &data.b[..ARRAY_SIZE], black_box(data.scalar));
		let mut magic = 0.0f64;
		for _ in 0..iterations {
			let mut j = 0;
			while j < ARRAY_SIZE {
				unroll!(1024, {
					magic += a[j] + scalar * b[j];
					j += 1;
				});
			}
		}
		magic.to_bits()
	}

	fn cleanup(&self, _data: TriadData) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn triad_sums_over_both_arrays() {
		let mut data = TriadData {
			a: vec![1.0; ARRAY_SIZE],
			b: vec![0.5; ARRAY_SIZE],
			scalar: SCALAR,
		};
		let expected = (ARRAY_SIZE as f64 * 2.5).to_bits();
		assert_eq!(L3Triad.normal(&mut data, 1), expected);
		assert_eq!(L3Triad.extreme(&mut data, 1), expected);
	}
}
