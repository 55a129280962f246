use std::process::Command;

fn idq_bench(args: &[&str]) -> std::process::Output {
	Command::new(env!("CARGO_BIN_EXE_idq-bench"))
		.args(args)
		.output()
		.expect("failed to run idq-bench")
}

#[test]
fn unknown_flag_is_a_usage_error() {
	let output = idq_bench(&["-x"]);
	assert!(!output.status.success());
	assert!(output.stdout.is_empty());
	assert!(!output.stderr.is_empty());
}

#[test]
fn out_of_range_values_are_usage_errors() {
	let cases: [&[&str]; 4] = [&["-p", "9"], &["-t", "0"], &["-r", "0"], &["-n", "0"]];
	for args in cases {
		let output = idq_bench(args);
		assert_eq!(output.status.code(), Some(2), "{:?}", args);
		assert!(output.stdout.is_empty(), "{:?}", args);
	}
}

#[test]
fn help_lists_the_short_flags() {
	let output = idq_bench(&["--help"]);
	assert!(output.status.success());
	let help = String::from_utf8_lossy(&output.stdout);
	for flag in ["-a", "-b", "-m", "-n", "-p", "-r", "-t", "-w"] {
		assert!(help.contains(flag), "missing {}", flag);
	}
}
