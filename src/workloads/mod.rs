//! Bundled micro-benchmarks
//!
//! Every kernel runs `ntimes` passes over an inner loop of fixed length. The normal and
//! extreme variants do the same arithmetic but unroll the inner loop to a different
//! depth, which changes how much of the instruction stream the decoders have to handle.

/// Pastes `$body` the given number of times (a power of two up to 1024)
macro_rules! unroll {
	(1, $body:block) => {
		$body
	};
	(2, $body:block) => {
		unroll!(1, $body);
		unroll!(1, $body);
	};
	(4, $body:block) => {
		unroll!(2, $body);
		unroll!(2, $body);
	};
	(8, $body:block) => {
		unroll!(4, $body);
		unroll!(4, $body);
	};
	(16, $body:block) => {
		unroll!(8, $body);
		unroll!(8, $body);
	};
	(32, $body:block) => {
		unroll!(16, $body);
		unroll!(16, $body);
	};
	(64, $body:block) => {
		unroll!(32, $body);
		unroll!(32, $body);
	};
	(128, $body:block) => {
		unroll!(64, $body);
		unroll!(64, $body);
	};
	(256, $body:block) => {
		unroll!(128, $body);
		unroll!(128, $body);
	};
	(512, $body:block) => {
		unroll!(256, $body);
		unroll!(256, $body);
	};
	(1024, $body:block) => {
		unroll!(512, $body);
		unroll!(512, $body);
	};
}

pub mod prng;
pub mod scale;
pub mod schoenauer;
pub mod triad;

pub use prng::{PrngMulti2, PrngMulti3c};
pub use scale::Float32Scale;
pub use schoenauer::L1Schoenauer;
pub use triad::L3Triad;

use rand::SeedableRng;
use rand::rngs::StdRng;

/// Random number generator every workload fills its data from
pub fn data_rng() -> StdRng {
	StdRng::seed_from_u64(crate::constants::DATA_SEED)
}
