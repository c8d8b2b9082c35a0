//! Cycle counting through the Linux `perf` subsystem.

use perf_event::{ Builder, Counter };
use perf_event::events::Hardware;

use crate::counter::CycleCounter;
use crate::error::{ HarnessError, Result };

/// The `perf` hardware cycles event for the calling thread.
///
/// Useful when the kernel doesn't allow direct userspace access to the
/// PMU. Each read is a system call, but reads only happen outside the
/// timed loop.
pub struct PerfCycles {
    ctr: Option<Counter>,
}
impl PerfCycles {
    pub fn new() -> Self { Self { ctr: None } }
}
impl CycleCounter for PerfCycles {
    fn enable(&mut self) -> Result<()> {
        let mut ctr = Builder::new()
            .kind(Hardware::CPU_CYCLES)
            .build()
            .map_err(|e| HarnessError::unsupported(
                format!("perf cycles event: {}", e)
            ))?;
        ctr.reset().map_err(|e| HarnessError::unsupported(e.to_string()))?;
        ctr.enable().map_err(|e| HarnessError::unsupported(e.to_string()))?;
        tracing::debug!("perf cycles event enabled");
        self.ctr = Some(ctr);
        Ok(())
    }

    fn read(&mut self) -> Result<u64> {
        let ctr = self.ctr.as_mut().ok_or_else(|| {
            HarnessError::OutOfSequence { op: "read perf counter", state: "uninitialized" }
        })?;
        ctr.read().map_err(|e| HarnessError::unsupported(e.to_string()))
    }
}
impl Drop for PerfCycles {
    fn drop(&mut self) {
        if let Some(ctr) = self.ctr.as_mut() {
            let _ = ctr.disable();
        }
    }
}
