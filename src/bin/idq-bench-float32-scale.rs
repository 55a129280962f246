use std::process::ExitCode;

use idq_bench::workloads::Float32Scale;

fn main() -> ExitCode {
	idq_bench::run_cli(&Float32Scale)
}
