use std::process::ExitCode;

use idq_bench::workloads::PrngMulti2;

fn main() -> ExitCode {
	idq_bench::run_cli(&PrngMulti2)
}
