//! Errors reported by the harness.

/// Ways a benchmark run can fail.
///
/// All of these are detected either before the timed loop starts or
/// immediately after it ends: the loop itself never branches on error state.
/// A failed run produces no partial result.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The cycle counter cannot be accessed from this process.
    #[error("cycle counter unavailable: {0}")]
    UnsupportedPlatform(String),

    /// The end sample was smaller than the start sample.
    #[error("counter wrapped during sampling (start={start}, end={end})")]
    CounterOverflow { start: u64, end: u64 },

    /// The benchmark configuration cannot be run or encoded.
    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    /// Another run in this process already holds the hardware counter.
    #[error("cycle counter is already held by another run")]
    CounterBusy,

    /// An operation was called in the wrong order.
    #[error("cannot {op} while the counter is {state}")]
    OutOfSequence { op: &'static str, state: &'static str },
}

impl HarnessError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
