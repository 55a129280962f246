use std::process::ExitCode;

use idq_bench::workloads::L3Triad;

fn main() -> ExitCode {
	idq_bench::run_cli(&L3Triad)
}
