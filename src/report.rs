use std::io::{self, Write};

use crate::capabilities::{CapabilityReport, Thermals};
use crate::constants::NANOJOULES_PER_JOULE;
use crate::session::{EnergyDomain, PerfCounter, Snapshot};

/// Energy consumed in one domain during a measurement
#[derive(Debug, Clone, PartialEq)]
pub struct DomainReading {
	pub domain: EnergyDomain,
	pub joules: f64,
	pub watts: f64,
	/// Change against the previous report of the same session, when that one had power
	pub delta_watts: Option<f64>,
}

/// One performance counter value and its rate
#[derive(Debug, Clone, PartialEq)]
pub struct CounterReading {
	pub counter: PerfCounter,
	pub label: &'static str,
	pub value: u64,
	/// Events per second
	pub per_second: f64,
}

/// Derived metrics of one start/stop interval
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
	pub elapsed_secs: f64,
	pub tsc_elapsed: u64,
	pub tsc_ghz: f64,
	pub energy: Vec<DomainReading>,
	pub counters: Vec<CounterReading>,
	pub thermals_begin: Thermals,
	pub thermals_end: Thermals,
}

impl Report {
	pub fn new(
		begin: &Snapshot,
		end: &Snapshot,
		energy: impl IntoIterator<Item = (EnergyDomain, u64)>,
		counters: impl IntoIterator<Item = (PerfCounter, &'static str, u64)>,
		previous: Option<&Report>,
	) -> Self {
		let elapsed_secs = end.time.duration_since(begin.time).as_secs_f64();
		let tsc_elapsed = end.tsc.wrapping_sub(begin.tsc);
		let per_second = |value: f64| if elapsed_secs > 0.0 { value / elapsed_secs } else { 0.0 };

		let energy = energy
			.into_iter()
			.map(|(domain, raw)| {
				let joules = raw as f64 / NANOJOULES_PER_JOULE;
				let watts = per_second(joules);
				let delta_watts = previous
					.and_then(|p| p.watts(domain))
					.filter(|&before| before != 0.0)
					.map(|before| watts - before);
				DomainReading {
					domain,
					joules,
					watts,
					delta_watts,
				}
			})
			.collect();

		let counters = counters
			.into_iter()
			.map(|(counter, label, value)| CounterReading {
				counter,
				label,
				value,
				per_second: per_second(value as f64),
			})
			.collect();

		Self {
			elapsed_secs,
			tsc_elapsed,
			tsc_ghz: per_second(tsc_elapsed as f64) * 1e-9,
			energy,
			counters,
			thermals_begin: begin.thermals.clone(),
			thermals_end: end.thermals.clone(),
		}
	}

	/// Average power of `domain`, if the session counted it
	pub fn watts(&self, domain: EnergyDomain) -> Option<f64> {
		self.energy.iter().find(|r| r.domain == domain).map(|r| r.watts)
	}

	/// Events per second of `counter`, if the session counted it
	pub fn rate(&self, counter: PerfCounter) -> Option<f64> {
		self.counters.iter().find(|r| r.counter == counter).map(|r| r.per_second)
	}

	pub fn package_temperature_end(&self) -> Option<f64> {
		self.thermals_end.package_temperature
	}

	/// Writes the human-readable report
	///
	/// Energy lines are only written when `capabilities` reports energy, temperature and
	/// voltage lines only when it reports open register files.
	pub fn render(&self, capabilities: &CapabilityReport, out: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "Time elapsed: {:12.6} seconds", self.elapsed_secs)?;
		writeln!(out, "TSC elapsed:  {:12}\t({:12.3} GHz)", self.tsc_elapsed, self.tsc_ghz)?;

		if capabilities.has_energy() && !self.energy.is_empty() {
			writeln!(out)?;
			for reading in &self.energy {
				let name = format!("{} energy consumed:", reading.domain.label());
				write!(
					out,
					"{:<22}{:12.6} joules\t({:12.3} watts)",
					name, reading.joules, reading.watts
				)?;
				match reading.delta_watts {
					Some(delta) => writeln!(out, "\t[delta {:+12.3} watts]", delta)?,
					None => writeln!(out)?,
				}
			}
		}

		if capabilities.has_thermals() {
			self.render_thermals(out)?;
		} else {
			writeln!(out)?;
		}

		for reading in &self.counters {
			writeln!(
				out,
				"{:<26}{:12}\t({:12.3} M/sec)",
				reading.label,
				reading.value,
				reading.per_second * 1e-6
			)?;
		}

		Ok(())
	}

	fn render_thermals(&self, out: &mut dyn Write) -> io::Result<()> {
		let (begin, end) = (&self.thermals_begin, &self.thermals_end);

		if let (Some(before), Some(after)) = (begin.package_temperature, end.package_temperature) {
			writeln!(out)?;
			writeln!(out, "Temp PKG:   {:.0}  -->  {:.0}", before, after)?;
		}
		for (b, e) in begin.cores.iter().zip(&end.cores) {
			if let (Some(before), Some(after)) = (b.temperature, e.temperature) {
				writeln!(out, "Temp CORE{}: {:.0}  -->  {:.0}", b.core, before, after)?;
			}
		}

		let mut first_voltage = true;
		for (b, e) in begin.cores.iter().zip(&end.cores) {
			if let (Some(before), Some(after)) = (b.voltage, e.voltage) {
				if first_voltage {
					writeln!(out)?;
					first_voltage = false;
				}
				writeln!(out, "Voltage CORE{}: {:.4}  -->  {:.4}", b.core, before, after)?;
			}
		}

		writeln!(out)
	}
}
