use std::hint::black_box;

use crate::config::RunConfiguration;
use crate::orchestrator::Workload;

const INNER_LOOP: u64 = 2048;

/// Single-precision multiply-accumulate of two registers
#[derive(Debug, Clone, Copy, Default)]
pub struct Float32Scale;

impl Float32Scale {
	pub const NTIMES: u64 = 606_000;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleOperands {
	pub a: f32,
	pub scalar: f32,
}

impl Workload for Float32Scale {
	type Context = ScaleOperands;

	fn baseline_iterations(&self) -> u64 {
		Self::NTIMES
	}

	fn init(&self, _config: &RunConfiguration) -> Option<ScaleOperands> {
		Some(ScaleOperands { a: 5.0, scalar: 3.0 })
	}

	fn normal(&self, operands: &mut ScaleOperands, iterations: u64) -> u64 {
		let (a, scalar) = black_box((operands.a, operands.scalar));
		let mut sum = 0.0f32;
		for _ in 0..iterations {
			let mut j = 0;
			while j < INNER_LOOP {
				unroll!(512, {
					sum += scalar * a;
					j += 1;
				});
			}
		}
		u64::from(sum.to_bits())
	}

	fn extreme(&self, operands: &mut ScaleOperands, iterations: u64) -> u64 {
		let (a, scalar) = black_box((operands.a, operands.scalar));
		let mut sum = 0.0f32;
		for _ in 0..iterations {
			let mut j = 0;
			while j < INNER_LOOP {
				unroll!(1024, {
					sum += scalar * a;
					j += 1;
				});
			}
		}
		u64::from(sum.to_bits())
	}

	fn cleanup(&self, _operands: ScaleOperands) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn one_pass_accumulates_inner_loop_products() {
		let mut operands = ScaleOperands { a: 0.5, scalar: 2.0 };
		let expected = u64::from((INNER_LOOP as f32).to_bits());
		assert_eq!(Float32Scale.normal(&mut operands, 1), expected);
		assert_eq!(Float32Scale.extreme(&mut operands, 1), expected);
	}
}
