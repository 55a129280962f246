//! Hardware telemetry sources
//!
//! The harness talks to the hardware through two narrow contracts: per-core register
//! files (temperature and voltage MSRs) and a process-wide counter subsystem that hands
//! out event sets. [`linux`] implements them on top of `/dev/cpu/*/msr` and
//! `perf_event_open`, [`mock`] implements them in memory.

pub mod linux;
pub mod mock;
pub mod rapl;

use std::fmt::Debug;
use std::io;

/// Identifies one countable event inside the counter subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
	/// Total core cycles
	TotalCycles,
	/// Total instructions retired
	TotalInstructions,
	/// Raw, model-specific event encoding
	Raw(u64),
	/// Event exposed by a non-CPU component, such as the RAPL energy counters
	Native { component: usize, event: usize },
}

/// Value type reported by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
	Uint64,
	Int64,
	Float64,
}

/// A component of the counter subsystem
#[derive(Debug, Clone)]
pub struct ComponentInfo {
	pub id: usize,
	pub name: String,
	/// Why the component cannot be used, if it is disabled
	pub disabled_reason: Option<String>,
}

/// An event exposed by a component
#[derive(Debug, Clone)]
pub struct EventInfo {
	pub code: EventCode,
	pub name: String,
	pub data_type: DataType,
}

/// A group of counters that are started and stopped together
pub trait EventSet: Send {
	/// Adds an event to the set. Fails if the event cannot be counted.
	fn add_event(&mut self, code: EventCode) -> io::Result<()>;

	/// Number of events in the set
	fn len(&self) -> usize;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Resets and starts all counters in the set
	fn start(&mut self) -> io::Result<()>;

	/// Stops all counters and writes their values, in insertion order, into `values`
	fn stop(&mut self, values: &mut [u64]) -> io::Result<()>;

	/// Releases the counters held by the set
	fn cleanup(&mut self) -> io::Result<()>;
}

/// The process-wide counter subsystem
///
/// Event set creation and event registration are not safe to call concurrently.
/// [`HardwareCapabilities`](crate::capabilities::HardwareCapabilities) serializes them.
pub trait CounterSubsystem: Send + Sync {
	/// Registers the calling thread with the subsystem
	fn register_thread(&self) -> io::Result<()>;

	fn components(&self) -> Vec<ComponentInfo>;

	fn component_events(&self, component: usize) -> Vec<EventInfo>;

	/// Looks up the code of a named event
	fn resolve_event_code(&self, name: &str) -> Option<EventCode>;

	fn create_event_set(&self) -> io::Result<Box<dyn EventSet>>;
}

/// A per-core register file
pub trait RegisterFile: Send + Sync + Debug {
	fn core(&self) -> usize;

	/// Reads the 64-bit register at `offset`. Safe to call from several threads at once.
	fn read_register(&self, offset: u32) -> io::Result<u64>;
}

/// Entry point into a hardware telemetry backend
pub trait TelemetrySource {
	/// Whether the process may read energy, temperature and voltage registers
	fn is_privileged(&self) -> bool;

	fn cpus_available(&self) -> usize;

	/// Initializes the counter subsystem. Fails only if no counting is possible at all.
	fn init_counters(&self) -> io::Result<Box<dyn CounterSubsystem>>;

	fn open_register_file(&self, core: usize) -> io::Result<Box<dyn RegisterFile>>;
}
