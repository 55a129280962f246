pub mod aggregate;
pub mod calibrate;
pub mod capabilities;
pub mod config;
pub mod constants;
pub mod cpu_type;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod telemetry;
pub mod util;
pub mod workloads;

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};

use crate::aggregate::{TrialMetrics, TrialSummary, aggregate_into, write_csv_header};
use crate::calibrate::calibrate;
use crate::capabilities::init_process;
use crate::config::{Cli, RunConfiguration};
use crate::constants::SEPARATOR;
use crate::orchestrator::{Kernel, Orchestrator, Workload};
use crate::session::Session;
use crate::telemetry::TelemetrySource;
use crate::telemetry::linux::LinuxTelemetry;

pub use crate::error::{MeasureError, MeasureResult};

/// Runs `workload` as configured and writes reports and the CSV summary to `out`
///
/// Phases run strictly in order: warmup and trials of the normal kernel, then warmup
/// and trials of the extreme kernel, each gated by the phase selection. When measuring,
/// the process-level session brackets every trial and the workers' counters are folded
/// into it before reporting.
pub fn run<W: Workload>(
	config: &RunConfiguration,
	workload: &W,
	source: &dyn TelemetrySource,
	out: &mut dyn Write,
) -> MeasureResult<TrialSummary> {
	let flags = config.measure_flags();

	let mut caps = None;
	let mut parent = None;
	if config.measure {
		match init_process(source, flags, workload.counters()) {
			Ok(initialized) => caps = Some(Arc::new(initialized)),
			Err(e) => log::warn!("{}, disabling measurements.", e),
		}
		if let Some(caps) = &caps {
			match Session::init_thread(Arc::clone(caps), flags) {
				Ok(session) => parent = Some(session),
				Err(e) => log::warn!("Initializing the measurement session failed ({}), disabling measurements.", e),
			}
		}
	}
	let measure = parent.is_some();
	let cpus_available = caps.as_ref().map_or_else(|| source.cpus_available(), |caps| caps.cpus_available());

	let mut orchestrator = Orchestrator::new(workload, config, caps.filter(|_| measure), cpus_available)?;

	if config.repeat > 1 {
		write_csv_header(out)?;
	}

	let mut summary = TrialSummary::new(config.threads, config.repeat);
	let iterations = config.iterations(workload.baseline_iterations());
	let counts = vec![iterations; config.threads];
	let mut sink = io::sink();

	for kernel in Kernel::ALL {
		if config.phases.runs_warmup(kernel) {
			if kernel == Kernel::Extreme && !config.quiet {
				write!(out, "\n{}\n\n", SEPARATOR)?;
			}
			let progress: &mut dyn Write = if config.quiet { &mut sink } else { &mut *out };
			let warmup = calibrate(config.threads, iterations, config.warmup_secs, progress, |per_thread| {
				orchestrator.run_phase(kernel, per_thread, false).map(|_| ())
			})?;
			if let Some(warmup) = warmup {
				log::debug!(
					"Warmup before the {}: {} iterations took {:?}, corrective run of {:?} iterations, {:?} in total",
					kernel.description(),
					warmup.calibration_iterations,
					warmup.calibration,
					warmup.corrective_iterations,
					warmup.total
				);
			}
		}

		if !config.phases.runs_trials(kernel) {
			continue;
		}

		for trial in 0..config.repeat {
			if !config.quiet {
				write!(out, "\n{}\n\n", SEPARATOR)?;
				writeln!(out, "Running {} iterations of {}", iterations, kernel.description())?;
				out.flush()?;
			}

			if let Some(parent) = parent.as_mut() {
				parent.start(flags)?;
			}

			let outcome = orchestrator.run_phase(kernel, &counts, measure)?;

			match parent.as_mut() {
				Some(parent) => {
					parent.stop(flags)?;
					aggregate_into(parent, outcome.results);
					let report = parent.report(flags, out)?;
					summary.record(kernel, trial, TrialMetrics::from_report(&report));
				},
				None => log::info!(
					"Trial {} of the {} finished in {:.6} seconds",
					trial,
					kernel.description(),
					outcome.elapsed.as_secs_f64()
				),
			}
		}
	}

	if config.repeat > 1 {
		summary.write_csv_rows(out)?;
	}

	if !orchestrator.finish() {
		log::warn!("Not every benchmark context was cleaned up");
	}
	if let Some(parent) = parent {
		parent.cleanup();
	}

	Ok(summary)
}

/// Entry point of every benchmark binary
///
/// Parses the command line, runs `workload` against the hardware and maps the outcome
/// to an exit code. Usage errors exit through clap with status 2.
pub fn run_cli<W: Workload>(workload: &W) -> ExitCode {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

	let config = match Cli::parse().into_config() {
		Ok(config) => config,
		Err(e) => Cli::command()
			.error(clap::error::ErrorKind::ValueValidation, e)
			.exit(),
	};

	let source = LinuxTelemetry::new();
	let mut stdout = io::stdout().lock();

	match run(&config, workload, &source, &mut stdout) {
		Ok(_) => ExitCode::SUCCESS,
		Err(e) => {
			log::error!("{}", e);
			ExitCode::FAILURE
		},
	}
}
