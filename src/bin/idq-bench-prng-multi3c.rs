use std::process::ExitCode;

use idq_bench::workloads::PrngMulti3c;

fn main() -> ExitCode {
	idq_bench::run_cli(&PrngMulti3c)
}
