use std::process::ExitCode;

use idq_bench::workloads::L1Schoenauer;

fn main() -> ExitCode {
	idq_bench::run_cli(&L1Schoenauer)
}
