//! The Arm PMU cycle counter, `PMCCNTR_EL0`.
//!
//! Configuring the PMU from EL0 only works if the kernel has set
//! `PMUSERENR_EL0.EN`, typically with a small kernel module. Reading the
//! counter needs only `.CR`, which is what `kernel.perf_user_access=1`
//! grants. A denied access traps and the process dies with `SIGILL`.

use crate::counter::{ CycleCounter, InlineCounter };
use crate::error::{ HarnessError, Result };
use crate::harness::CounterLease;

/// `PMCR_EL0` bits.
#[allow(dead_code)]
mod pmcr {
    /// Enable all counters
    pub const E: u64  = 1 << 0;
    /// Reset the cycle counter to zero
    pub const C: u64  = 1 << 2;
    /// Count every 64th cycle
    pub const D: u64  = 1 << 3;
    /// Cycle counter overflows at 64 bits instead of 32
    pub const LC: u64 = 1 << 6;
}

/// `PMCNTENSET_EL0.C`: enable the cycle counter.
#[allow(dead_code)]
const PMCNTENSET_C: u64 = 1 << 31;

#[cfg(target_arch = "aarch64")]
mod regs {
    use core::arch::asm;

    /// Read `PMCCNTR_EL0` after all prior instructions complete.
    #[inline(always)]
    pub fn pmccntr() -> u64 {
        let val: u64;
        unsafe {
            asm!("isb", "mrs {}, pmccntr_el0", out(reg) val, options(nostack));
        }
        val
    }

    /// Clear, widen and start the cycle counter.
    pub fn start() {
        unsafe {
            asm!("msr pmcntenset_el0, {}", in(reg) super::PMCNTENSET_C,
                options(nostack));
            let mut val: u64;
            asm!("mrs {}, pmcr_el0", out(reg) val, options(nomem, nostack));
            val |= super::pmcr::E | super::pmcr::C | super::pmcr::LC;
            val &= !super::pmcr::D;
            asm!("msr pmcr_el0, {}", in(reg) val, options(nostack));
            asm!("isb", options(nostack));
        }
    }
}

/// `PMCCNTR_EL0` on the current core.
///
/// The counter is per-core: callers should pin themselves (see
/// [crate::HarnessConfig::pinned_core]) or the two samples may come from
/// different cores.
#[derive(Debug, Default)]
pub struct Pmccntr {
    lease: Option<CounterLease>,
}
impl Pmccntr {
    pub fn new() -> Self { Self { lease: None } }

    /// Run everything [CycleCounter::enable] executes in a child process.
    #[cfg(target_arch = "aarch64")]
    fn check_user_access() -> Result<()> {
        run_in_child("configuring PMCCNTR_EL0", || {
            regs::start();
            let _ = regs::pmccntr();
        })
    }
}

/// Run `f` in a forked child.
///
/// A trap only kills the child; the parent turns it into
/// [HarnessError::UnsupportedPlatform].
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
fn run_in_child(what: &str, f: impl FnOnce()) -> Result<()> {
    use nix::sys::wait::{ waitpid, WaitStatus };
    use nix::unistd::{ fork, ForkResult };

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            f();
            unsafe { nix::libc::_exit(0) }
        },
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => Ok(()),
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                Err(HarnessError::unsupported(format!(
                    "{} from userspace raised {}; PMUSERENR_EL0.EN must be \
                    set by the kernel", what, sig
                )))
            },
            Ok(status) => Err(HarnessError::unsupported(
                format!("PMU access check ended with {:?}", status)
            )),
            Err(e) => Err(HarnessError::unsupported(
                format!("waitpid: {}", e)
            )),
        },
        Err(e) => Err(HarnessError::unsupported(format!("fork: {}", e))),
    }
}

impl CycleCounter for Pmccntr {
    #[cfg(target_arch = "aarch64")]
    fn enable(&mut self) -> Result<()> {
        if self.lease.is_none() {
            Self::check_user_access()?;
            self.lease = Some(CounterLease::acquire()?);
        }
        regs::start();
        tracing::debug!("PMCCNTR_EL0 reset and enabled");
        Ok(())
    }

    #[cfg(target_arch = "aarch64")]
    fn read(&mut self) -> Result<u64> {
        if self.lease.is_none() {
            return Err(HarnessError::OutOfSequence {
                op: "read PMCCNTR_EL0", state: "uninitialized"
            });
        }
        Ok(regs::pmccntr())
    }

    fn inline_read(&self) -> Option<InlineCounter> {
        Some(InlineCounter::Pmccntr)
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn enable(&mut self) -> Result<()> {
        Err(HarnessError::unsupported("PMCCNTR_EL0 only exists on aarch64"))
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn read(&mut self) -> Result<u64> {
        Err(HarnessError::unsupported("PMCCNTR_EL0 only exists on aarch64"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_before_enable_fails() {
        let mut ctr = Pmccntr::new();
        assert!(ctr.read().is_err());
    }

    #[test]
    fn trap_in_child_is_unsupported() {
        use nix::sys::signal::{ raise, Signal };
        let res = run_in_child("raising SIGILL", || {
            let _ = raise(Signal::SIGILL);
        });
        assert!(matches!(res, Err(HarnessError::UnsupportedPlatform(_))));
        assert!(run_in_child("nothing", || {}).is_ok());
    }

    #[test]
    fn readable_inline() {
        assert_eq!(Pmccntr::new().inline_read(), Some(InlineCounter::Pmccntr));
    }

    #[cfg(not(target_arch = "aarch64"))]
    #[test]
    fn unsupported_off_aarch64() {
        let mut ctr = Pmccntr::new();
        assert!(matches!(ctr.enable(), Err(HarnessError::UnsupportedPlatform(_))));
    }
}
