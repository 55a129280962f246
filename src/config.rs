use clap::Parser;

use crate::constants::DEFAULT_WARMUP_SECS;
use crate::error::{MeasureError, MeasureResult};
use crate::orchestrator::Kernel;

/// Command line of every benchmark binary
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Runs a micro-benchmark across threads while sampling performance and energy counters")]
pub struct Cli {
	/// Pin worker thread i to CPU i mod <available CPUs>
	#[arg(short = 'a')]
	pub force_affinity: bool,

	/// Use 64-bit integers or double-precision floating point data
	#[arg(short = 'b')]
	pub wide_numbers: bool,

	/// Measure timing, performance and power consumption
	#[arg(short = 'm')]
	pub measure: bool,

	/// Multiply the iteration count of the benchmark
	#[arg(short = 'n', value_name = "MULTIPLIER", default_value_t = 1)]
	pub multiplier: u64,

	/// Only run one phase: 0 = warmups, 1 = warmup before normal, 2 = normal,
	/// 3 = warmup before extreme, 4 = extreme
	#[arg(short = 'p', value_name = "PHASE")]
	pub phase: Option<u8>,

	/// Number of trials per phase
	#[arg(short = 'r', value_name = "COUNT", default_value_t = 1)]
	pub repeat: usize,

	/// Number of worker threads
	#[arg(short = 't', value_name = "COUNT", default_value_t = 1)]
	pub threads: usize,

	/// Target warmup duration in seconds, 0 or less disables warmup
	#[arg(short = 'w', value_name = "SECONDS", default_value_t = DEFAULT_WARMUP_SECS, allow_negative_numbers = true)]
	pub warmup: i64,
}

impl Cli {
	/// Validates the parsed arguments into a run configuration
	pub fn into_config(self) -> MeasureResult<RunConfiguration> {
		if self.threads == 0 {
			return Err(MeasureError::Config("thread count must be at least 1".to_string()));
		}
		if self.repeat == 0 {
			return Err(MeasureError::Config("repeat count must be at least 1".to_string()));
		}
		if self.multiplier == 0 {
			return Err(MeasureError::Config("multiplier must be at least 1".to_string()));
		}

		let phases = match self.phase {
			None => PhaseSelection::All,
			Some(0) => PhaseSelection::Only(Phase::Warmups),
			Some(1) => PhaseSelection::Only(Phase::Warmup(Kernel::Normal)),
			Some(2) => PhaseSelection::Only(Phase::Trials(Kernel::Normal)),
			Some(3) => PhaseSelection::Only(Phase::Warmup(Kernel::Extreme)),
			Some(4) => PhaseSelection::Only(Phase::Trials(Kernel::Extreme)),
			Some(other) => return Err(MeasureError::Config(format!("unknown phase {}, expected 0-4", other))),
		};

		Ok(RunConfiguration {
			threads: self.threads,
			repeat: self.repeat,
			multiplier: self.multiplier,
			force_affinity: self.force_affinity,
			wide_numbers: self.wide_numbers,
			measure: self.measure,
			quiet: self.repeat > 1,
			phases,
			warmup_secs: self.warmup as f64,
		})
	}
}

/// One selectable part of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Both warmups, no trials
	Warmups,
	Warmup(Kernel),
	Trials(Kernel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSelection {
	All,
	Only(Phase),
}

impl PhaseSelection {
	pub fn runs_warmup(self, kernel: Kernel) -> bool {
		match self {
			PhaseSelection::All | PhaseSelection::Only(Phase::Warmups) => true,
			PhaseSelection::Only(Phase::Warmup(k)) => k == kernel,
			PhaseSelection::Only(Phase::Trials(_)) => false,
		}
	}

	pub fn runs_trials(self, kernel: Kernel) -> bool {
		match self {
			PhaseSelection::All => true,
			PhaseSelection::Only(Phase::Trials(k)) => k == kernel,
			PhaseSelection::Only(_) => false,
		}
	}
}

/// Immutable settings of one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
	pub threads: usize,
	pub repeat: usize,
	pub multiplier: u64,
	pub force_affinity: bool,
	pub wide_numbers: bool,
	pub measure: bool,
	/// Suppresses reports and banners, implied by repeat > 1
	pub quiet: bool,
	pub phases: PhaseSelection,
	pub warmup_secs: f64,
}

impl Default for RunConfiguration {
	fn default() -> Self {
		Self {
			threads: 1,
			repeat: 1,
			multiplier: 1,
			force_affinity: false,
			wide_numbers: false,
			measure: false,
			quiet: false,
			phases: PhaseSelection::All,
			warmup_secs: DEFAULT_WARMUP_SECS as f64,
		}
	}
}

impl RunConfiguration {
	/// Iterations each worker runs per trial
	pub fn iterations(&self, baseline: u64) -> u64 {
		baseline.saturating_mul(self.multiplier)
	}

	pub fn measure_flags(&self) -> MeasureFlags {
		if self.quiet { MeasureFlags::NO_PRINT } else { MeasureFlags::NONE }
	}
}

/// Options for session initialization and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasureFlags {
	/// Compute the report but don't print it
	pub no_print: bool,
	/// Don't count energy, even when it is available
	pub no_energy: bool,
}

impl MeasureFlags {
	pub const NONE: Self = Self {
		no_print: false,
		no_energy: false,
	};
	pub const NO_PRINT: Self = Self {
		no_print: true,
		no_energy: false,
	};
	pub const NO_ENERGY: Self = Self {
		no_print: false,
		no_energy: true,
	};
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> MeasureResult<RunConfiguration> {
		let argv = std::iter::once("idq-bench").chain(args.iter().copied());
		Cli::try_parse_from(argv).expect("valid arguments").into_config()
	}

	#[test]
	fn defaults() {
		let config = parse(&[]).expect("config");
		assert_eq!(config, RunConfiguration::default());
		assert_eq!(config.warmup_secs, 120.0);
		assert!(!config.quiet);
	}

	#[test]
	fn short_flags() {
		let config = parse(&["-a", "-b", "-m", "-n", "3", "-p", "2", "-r", "4", "-t", "8", "-w", "5"]).expect("config");
		assert!(config.force_affinity && config.wide_numbers && config.measure);
		assert_eq!(config.multiplier, 3);
		assert_eq!(config.phases, PhaseSelection::Only(Phase::Trials(Kernel::Normal)));
		assert_eq!(config.repeat, 4);
		assert!(config.quiet);
		assert_eq!(config.threads, 8);
		assert_eq!(config.warmup_secs, 5.0);
		assert_eq!(config.iterations(1000), 3000);
	}

	#[test]
	fn negative_warmup_is_accepted() {
		let config = parse(&["-w", "-1"]).expect("config");
		assert_eq!(config.warmup_secs, -1.0);
	}

	#[test]
	fn invalid_values_are_rejected() {
		assert!(parse(&["-t", "0"]).is_err());
		assert!(parse(&["-r", "0"]).is_err());
		assert!(parse(&["-p", "5"]).is_err());
		assert!(Cli::try_parse_from(["idq-bench", "-x"]).is_err());
	}

	#[test]
	fn phase_selection() {
		let warmups = PhaseSelection::Only(Phase::Warmups);
		assert!(warmups.runs_warmup(Kernel::Normal) && warmups.runs_warmup(Kernel::Extreme));
		assert!(!warmups.runs_trials(Kernel::Normal));

		let extreme_warmup = PhaseSelection::Only(Phase::Warmup(Kernel::Extreme));
		assert!(!extreme_warmup.runs_warmup(Kernel::Normal));
		assert!(extreme_warmup.runs_warmup(Kernel::Extreme));

		assert!(PhaseSelection::All.runs_trials(Kernel::Extreme));
	}
}
