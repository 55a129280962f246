use std::io;

/// Errors surfaced by the measurement harness
///
/// Degraded hardware capabilities are never reported through this type; they are logged
/// as warnings and reflected in the [`CapabilityReport`](crate::capabilities::CapabilityReport).
#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
	#[error("counter subsystem unavailable: {0}")]
	CounterSubsystem(String),

	#[error("event sets don't contain the same number of events ({ours} vs {theirs})")]
	CounterCountMismatch { ours: usize, theirs: usize },

	#[error("session is already counting")]
	AlreadyStarted,

	#[error("session is not counting")]
	NotStarted,

	#[error("session has not been stopped")]
	NotStopped,

	#[error("benchmark initialization hook failed for thread {0}")]
	WorkloadInit(usize),

	#[error("failed to spawn worker thread {index}: {source}")]
	ThreadSpawn {
		index: usize,
		#[source]
		source: io::Error,
	},

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Csv(#[from] csv::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}

pub type MeasureResult<T> = Result<T, MeasureError>;
