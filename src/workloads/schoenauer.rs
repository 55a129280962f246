use std::hint::black_box;

use rand::Rng;

use crate::config::RunConfiguration;
use crate::orchestrator::Workload;
use crate::workloads::data_rng;

/// 3 arrays * 1024 elements * 8 bytes = 24 kB, inside a 32 kB L1 data cache
const ARRAY_SIZE: usize = 1024;

/// Schönauer triad reduction over three L1-resident arrays
#[derive(Debug, Clone, Copy, Default)]
pub struct L1Schoenauer;

impl L1Schoenauer {
	pub const NTIMES: u64 = 1_213_000;
}

#[derive(Debug, Clone)]
pub struct SchoenauerData {
	a: Vec<f64>,
	b: Vec<f64>,
	c: Vec<f64>,
}

impl SchoenauerData {
	/// Random values: full 64-bit integers when `wide`, else 31-bit ones stored through `f32`
	pub fn random(wide: bool) -> Self {
		let mut rng = data_rng();
		let mut fill = || -> Vec<f64> {
			(0..ARRAY_SIZE)
				.map(|_| {
					if wide {
						rng.random::<u64>() as f64
					} else {
						(rng.random::<u32>() >> 1) as f32 as f64
					}
				})
				.collect()
		};
		let a = fill();
		let b = fill();
		let c = fill();
		Self { a, b, c }
	}
}

impl Workload for L1Schoenauer {
	type Context = SchoenauerData;

	fn baseline_iterations(&self) -> u64 {
		Self::NTIMES
	}

	fn init(&self, config: &RunConfiguration) -> Option<SchoenauerData> {
		Some(SchoenauerData::random(config.wide_numbers))
	}

	fn normal(&self, data: &mut SchoenauerData, iterations: u64) -> u64 {
		let (a, b, c) = (&data.a[..ARRAY_SIZE], &data.b[..ARRAY_SIZE], &data.c[..ARRAY_SIZE]);
		let mut sum = black_box(0.0f64);
		for _ in 0..iterations {
			let mut j = 0;
			while j < ARRAY_SIZE {
				unroll!(128, {
					sum += a[j] + b[j] * c[j];
					j += 1;
				});
			}
		}
		sum.to_bits()
	}

	fn extreme(&self, data: &mut SchoenauerData, iterations: u64) -> u64 {
		let (a, b, c) = (&data.a[..ARRAY_SIZE], &data.b[..ARRAY_SIZE], &data.c[..ARRAY_SIZE]);
		let mut sum = black_box(0.0f64);
		for _ in 0..iterations {
			let mut j = 0;
			while j < ARRAY_SIZE {
				unroll!(256, {
					sum += a[j] + b[j] * c[j];
					j += 1;
				});
			}
		}
		sum.to_bits()
	}

	fn cleanup(&self, _data: SchoenauerData) -> bool {
		true
	}
}
