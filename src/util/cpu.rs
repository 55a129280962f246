use std::io;

/// Number of logical CPUs available to this process
pub fn cpus_available() -> usize {
	num_cpus::get().max(1)
}

/// CPU a worker thread is pinned to when affinity is forced
pub fn pinned_cpu(thread_index: usize, cpus_available: usize) -> usize {
	thread_index % cpus_available.max(1)
}

/// Pins the calling thread to a single CPU
pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
	// SAFETY: cpuset is zeroed before use and lives on the stack for the whole call
	let result = unsafe {
		let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
		libc::CPU_ZERO(&mut cpuset);
		libc::CPU_SET(cpu, &mut cpuset);

		libc::pthread_setaffinity_np(libc::pthread_self(), std::mem::size_of::<libc::cpu_set_t>(), &cpuset)
	};

	if result != 0 {
		return Err(io::Error::from_raw_os_error(result));
	}
	Ok(())
}

/// Whether the process runs with root privileges
pub fn running_as_root() -> bool {
	// SAFETY: geteuid cannot fail
	unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pinning_wraps_around_available_cpus() {
		assert_eq!(pinned_cpu(0, 4), 0);
		assert_eq!(pinned_cpu(5, 4), 1);
		assert_eq!(pinned_cpu(3, 0), 0);
	}

	#[test]
	fn at_least_one_cpu() {
		assert!(cpus_available() >= 1);
	}
}
