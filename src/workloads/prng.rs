use std::hint::black_box;

use crate::config::RunConfiguration;
use crate::orchestrator::Workload;

const INNER_LOOP: u64 = 2048;

/// Two interleaved linear congruential generators
#[derive(Debug, Clone, Copy, Default)]
pub struct PrngMulti2;

impl PrngMulti2 {
	pub const NTIMES: u64 = 454_000;
}

macro_rules! lcg2_round {
	($magic:ident, $magic2:ident, $j:ident) => {{
		$magic = $magic.wrapping_mul(1_103_515_245).wrapping_add(12_345);
		$magic2 = $magic2.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
		$j += 1;
	}};
}

impl Workload for PrngMulti2 {
	type Context = ();

	fn baseline_iterations(&self) -> u64 {
		Self::NTIMES
	}

	fn init(&self, _config: &RunConfiguration) -> Option<()> {
		Some(())
	}

	fn normal(&self, _context: &mut (), iterations: u64) -> u64 {
		let (mut magic, mut magic2) = black_box((0u64, 0u64));
		for _ in 0..iterations {
			let mut j = 0;
			while j < INNER_LOOP {
				unroll!(128, { lcg2_round!(magic, magic2, j) });
			}
		}
		magic.wrapping_add(magic2)
	}

	fn extreme(&self, _context: &mut (), iterations: u64) -> u64 {
		let (mut magic, mut magic2) = black_box((0u64, 0u64));
		for _ in 0..iterations {
			let mut j = 0;
			while j < INNER_LOOP {
				unroll!(1024, { lcg2_round!(magic, magic2, j) });
			}
		}
		magic.wrapping_add(magic2)
	}

	fn cleanup(&self, _context: ()) -> bool {
		true
	}
}

/// Three interleaved linear congruential generators
#[derive(Debug, Clone, Copy, Default)]
pub struct PrngMulti3c;

impl PrngMulti3c {
	pub const NTIMES: u64 = 400_000;
}

macro_rules! lcg3_round {
	($magic:ident, $magic2:ident, $magic3:ident, $j:ident) => {{
		$magic = $magic.wrapping_mul(1_103_515_245).wrapping_add(12_345);
		$magic2 = $magic2.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
		$magic3 = $magic3.wrapping_mul(214_013).wrapping_add(2_531_011);
		$j += 1;
	}};
}

impl Workload for PrngMulti3c {
	type Context = ();

	fn baseline_iterations(&self) -> u64 {
		Self::NTIMES
	}

	fn init(&self, _config: &RunConfiguration) -> Option<()> {
		Some(())
	}

	fn normal(&self, _context: &mut (), iterations: u64) -> u64 {
		let (mut magic, mut magic2, mut magic3) = black_box((0u64, 0u64, 0u64));
		for _ in 0..iterations {
			let mut j = 0;
			while j < INNER_LOOP {
				unroll!(128, { lcg3_round!(magic, magic2, magic3, j) });
			}
		}
		magic.wrapping_add(magic2).wrapping_add(magic3)
	}

	fn extreme(&self, _context: &mut (), iterations: u64) -> u64 {
		let (mut magic, mut magic2, mut magic3) = black_box((0u64, 0u64, 0u64));
		for _ in 0..iterations {
			let mut j = 0;
			while j < INNER_LOOP {
				unroll!(1024, { lcg3_round!(magic, magic2, magic3, j) });
			}
		}
		magic.wrapping_add(magic2).wrapping_add(magic3)
	}

	fn cleanup(&self, _context: ()) -> bool {
		true
	}
}
