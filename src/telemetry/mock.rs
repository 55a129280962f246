//! In-memory telemetry for exercising the harness without hardware access.
//!
//! Performance events count "ticks" reported by the workload through [`tick`], per thread.
//! Energy events integrate a fixed wattage over the time the event set was running.

use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::telemetry::{
	ComponentInfo, CounterSubsystem, DataType, EventCode, EventInfo, EventSet, RegisterFile, TelemetrySource,
};

const RAPL_COMPONENT: usize = 1;
const RAW_CODE_BASE: u64 = 0x1000;

thread_local! {
	static TICKS: Cell<u64> = const { Cell::new(0) };
}

/// Records `n` units of work on the calling thread
pub fn tick(n: u64) {
	TICKS.with(|ticks| ticks.set(ticks.get().wrapping_add(n)));
}

fn ticks() -> u64 {
	TICKS.with(Cell::get)
}

/// Mock telemetry source
///
/// Start from [`MockTelemetry::default`] (privileged, four cores, three energy domains,
/// the instruction decode queue events) and take capabilities away with the `with_*` and
/// `without_*` methods.
#[derive(Debug, Clone)]
pub struct MockTelemetry {
	pub privileged: bool,
	pub cpus: usize,
	/// Wattage integrated by the energy domains that exist, by event name
	pub energy_domains: Vec<(&'static str, f64)>,
	/// Event names `resolve_event_code` knows about
	pub known_events: Vec<&'static str>,
	/// Known events that nonetheless fail to register
	pub rejected_events: Vec<&'static str>,
	/// Makes `init_counters` fail
	pub counters_unavailable: bool,
	/// Register values returned by every core, by MSR offset
	pub registers: HashMap<u32, u64>,
	/// Cores whose register file cannot be opened
	pub missing_register_files: Vec<usize>,
	shared: Arc<MockShared>,
}

#[derive(Debug, Default)]
struct MockShared {
	registering: AtomicBool,
	overlapping_registrations: AtomicUsize,
	registered_threads: AtomicUsize,
}

impl Default for MockTelemetry {
	fn default() -> Self {
		let mut registers = HashMap::new();
		registers.insert(MSR_IA32_TEMPERATURE_TARGET, 95 << 16);
		registers.insert(MSR_IA32_THERM_STATUS, 40 << 16);
		registers.insert(MSR_IA32_PACKAGE_THERM_STATUS, 35 << 16);
		registers.insert(MSR_PERF_STATUS, 8192 << 32);

		Self {
			privileged: true,
			cpus: 4,
			energy_domains: vec![
				("PACKAGE_ENERGY:PACKAGE0", 20.0),
				("PP0_ENERGY:PACKAGE0", 12.0),
				("DRAM_ENERGY:PACKAGE0", 3.0),
			],
			known_events: vec!["UOPS_ISSUED:ANY", "IDQ:MITE_UOPS", "IDQ:DSB_UOPS", "IDQ:MS_UOPS"],
			rejected_events: Vec::new(),
			counters_unavailable: false,
			registers,
			missing_register_files: Vec::new(),
			shared: Arc::default(),
		}
	}
}

impl MockTelemetry {
	/// A source that behaves like an unprivileged process
	pub fn unprivileged() -> Self {
		Self {
			privileged: false,
			..Self::default()
		}
	}

	/// Only `events` resolve to event codes
	pub fn with_known_events(mut self, events: &[&'static str]) -> Self {
		self.known_events = events.to_vec();
		self
	}

	/// `events` resolve but fail to register
	pub fn with_rejected_events(mut self, events: &[&'static str]) -> Self {
		self.rejected_events = events.to_vec();
		self
	}

	/// The counter subsystem fails to initialize
	pub fn without_counters(mut self) -> Self {
		self.counters_unavailable = true;
		self
	}

	/// Opening the register file of `core` fails
	pub fn without_register_file(mut self, core: usize) -> Self {
		self.missing_register_files.push(core);
		self
	}

	/// How many times two threads were inside event registration at the same time
	pub fn overlapping_registrations(&self) -> usize {
		self.shared.overlapping_registrations.load(Ordering::SeqCst)
	}

	pub fn registered_threads(&self) -> usize {
		self.shared.registered_threads.load(Ordering::SeqCst)
	}

	fn raw_code(&self, name: &str) -> Option<u64> {
		self.known_events
			.iter()
			.position(|known| *known == name)
			.map(|i| RAW_CODE_BASE + i as u64)
	}
}

impl TelemetrySource for MockTelemetry {
	fn is_privileged(&self) -> bool {
		self.privileged
	}

	fn cpus_available(&self) -> usize {
		self.cpus
	}

	fn init_counters(&self) -> io::Result<Box<dyn CounterSubsystem>> {
		if self.counters_unavailable {
			return Err(io::Error::new(io::ErrorKind::Unsupported, "mock counters disabled"));
		}

		let rejected = self.rejected_events.iter().filter_map(|name| self.raw_code(name)).collect();
		Ok(Box::new(MockCounters {
			source: self.clone(),
			rejected,
		}))
	}

	fn open_register_file(&self, core: usize) -> io::Result<Box<dyn RegisterFile>> {
		if !self.privileged {
			return Err(io::Error::from(io::ErrorKind::PermissionDenied));
		}
		if self.missing_register_files.contains(&core) {
			return Err(io::Error::new(io::ErrorKind::NotFound, format!("no register file for core {}", core)));
		}
		Ok(Box::new(MockRegisterFile {
			core,
			registers: self.registers.clone(),
		}))
	}
}

#[derive(Debug)]
struct MockRegisterFile {
	core: usize,
	registers: HashMap<u32, u64>,
}

impl RegisterFile for MockRegisterFile {
	fn core(&self) -> usize {
		self.core
	}

	fn read_register(&self, offset: u32) -> io::Result<u64> {
		self.registers
			.get(&offset)
			.copied()
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no register 0x{:x}", offset)))
	}
}

struct MockCounters {
	source: MockTelemetry,
	rejected: Vec<u64>,
}

impl MockCounters {
	/// Flags concurrent registration calls, which the caller is required to serialize
	fn registration_section(&self) {
		let shared = &self.source.shared;
		if shared.registering.swap(true, Ordering::SeqCst) {
			shared.overlapping_registrations.fetch_add(1, Ordering::SeqCst);
		}
		thread::sleep(Duration::from_micros(200));
		shared.registering.store(false, Ordering::SeqCst);
	}
}

impl CounterSubsystem for MockCounters {
	fn register_thread(&self) -> io::Result<()> {
		self.source.shared.registered_threads.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn components(&self) -> Vec<ComponentInfo> {
		vec![
			ComponentInfo {
				id: 0,
				name: "perf_event".to_string(),
				disabled_reason: None,
			},
			ComponentInfo {
				id: RAPL_COMPONENT,
				name: "rapl".to_string(),
				disabled_reason: (!self.source.privileged).then(|| "not running as root".to_string()),
			},
		]
	}

	fn component_events(&self, component: usize) -> Vec<EventInfo> {
		if component != RAPL_COMPONENT {
			return Vec::new();
		}

		let mut events = vec![EventInfo {
			code: EventCode::Native {
				component,
				event: usize::MAX,
			},
			name: "rapl:::THERMAL_SPEC:PACKAGE0".to_string(),
			data_type: DataType::Float64,
		}];
		events.extend(self.source.energy_domains.iter().enumerate().map(|(event, (name, _))| {
			EventInfo {
				code: EventCode::Native { component, event },
				name: format!("rapl:::{}", name),
				data_type: DataType::Uint64,
			}
		}));
		events
	}

	fn resolve_event_code(&self, name: &str) -> Option<EventCode> {
		self.source.raw_code(name).map(EventCode::Raw)
	}

	fn create_event_set(&self) -> io::Result<Box<dyn EventSet>> {
		self.registration_section();
		Ok(Box::new(MockEventSet {
			counters: MockCounters {
				source: self.source.clone(),
				rejected: self.rejected.clone(),
			},
			events: Vec::new(),
			started: None,
		}))
	}
}

#[derive(Debug, Clone, Copy)]
enum MockEvent {
	Ticks { scale: u64, begin: u64 },
	Energy { watts: f64 },
}

struct MockEventSet {
	counters: MockCounters,
	events: Vec<MockEvent>,
	started: Option<Instant>,
}

impl EventSet for MockEventSet {
	fn add_event(&mut self, code: EventCode) -> io::Result<()> {
		self.counters.registration_section();

		let event = match code {
			EventCode::TotalCycles => MockEvent::Ticks { scale: 4, begin: 0 },
			EventCode::TotalInstructions => MockEvent::Ticks { scale: 2, begin: 0 },
			EventCode::Raw(raw) if self.counters.rejected.contains(&raw) => {
				return Err(io::Error::new(io::ErrorKind::ResourceBusy, "no free counter"));
			},
			EventCode::Raw(_) => MockEvent::Ticks { scale: 1, begin: 0 },
			EventCode::Native { event, .. } => {
				let (_, watts) = self
					.counters
					.source
					.energy_domains
					.get(event)
					.ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
				MockEvent::Energy { watts: *watts }
			},
		};
		self.events.push(event);
		Ok(())
	}

	fn len(&self) -> usize {
		self.events.len()
	}

	fn start(&mut self) -> io::Result<()> {
		if self.events.is_empty() {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "event set is empty"));
		}
		let now = ticks();
		for event in &mut self.events {
			if let MockEvent::Ticks { begin, .. } = event {
				*begin = now;
			}
		}
		self.started = Some(Instant::now());
		Ok(())
	}

	fn stop(&mut self, values: &mut [u64]) -> io::Result<()> {
		let started = self
			.started
			.take()
			.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "event set not started"))?;
		let elapsed_ns = started.elapsed().as_nanos() as f64;
		let now = ticks();

		for (event, value) in self.events.iter().zip(values.iter_mut()) {
			*value = match *event {
				MockEvent::Ticks { scale, begin } => now.wrapping_sub(begin) * scale,
				// W * ns = nJ
				MockEvent::Energy { watts } => (watts * elapsed_ns) as u64,
			};
		}
		Ok(())
	}

	fn cleanup(&mut self) -> io::Result<()> {
		self.events.clear();
		Ok(())
	}
}
