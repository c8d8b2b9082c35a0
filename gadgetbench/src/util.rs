//! Inspecting and controlling the environment of the current process.

use std::io::ErrorKind;

use crate::error::{ HarnessError, Result };

/// Utilities for inspecting and controlling the state of the current process.
pub struct GadgetEnv;
impl GadgetEnv {
    const ISOLATED_PATH: &'static str =
        "/sys/devices/system/cpu/isolated";
    const NOHZ_PATH: &'static str =
        "/sys/devices/system/cpu/nohz_full";
    const PARANOID_PATH: &'static str =
        "/proc/sys/kernel/perf_event_paranoid";
    const USER_ACCESS_PATH: &'static str =
        "/proc/sys/kernel/perf_user_access";

    fn read_trimmed(path: &str) -> std::result::Result<String, ErrorKind> {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| e.kind())
    }

    /// Return a string describing a CPU list, or "disabled" if it's empty.
    fn cpu_list(path: &str) -> std::result::Result<String, ErrorKind> {
        Self::read_trimmed(path).map(|s| match s.as_str() {
            "" => "disabled".to_string(),
            _ => s,
        })
    }

    /// Return the number of online cores.
    pub fn online_cores() -> Option<usize> {
        nix::unistd::sysconf(nix::unistd::SysconfVar::_NPROCESSORS_ONLN)
            .ok()
            .flatten()
            .map(|n| n as usize)
    }

    /// Return a string describing the set of isolated cores.
    pub fn sysfs_isolated() -> std::result::Result<String, ErrorKind> {
        Self::cpu_list(Self::ISOLATED_PATH)
    }

    /// Return a string describing the set of 'nohz_full' cores.
    pub fn sysfs_nohz() -> std::result::Result<String, ErrorKind> {
        Self::cpu_list(Self::NOHZ_PATH)
    }

    /// Return a string describing the cpufreq scaling strategy for a
    /// particular core.
    pub fn sysfs_cpufreq_governor(n: usize)
        -> std::result::Result<String, ErrorKind>
    {
        Self::read_trimmed(&format!(
            "/sys/devices/system/cpu/cpu{}/cpufreq/scaling_governor", n
        ))
    }

    /// Return the value of `kernel.perf_event_paranoid`.
    pub fn procfs_perf_event_paranoid() -> std::result::Result<i32, ErrorKind> {
        Self::read_trimmed(Self::PARANOID_PATH)?
            .parse()
            .map_err(|_| ErrorKind::InvalidData)
    }

    /// Returns true if `kernel.perf_user_access` allows userspace reads of
    /// the PMU (arm64 only).
    pub fn procfs_perf_user_access() -> std::result::Result<bool, ErrorKind> {
        match Self::read_trimmed(Self::USER_ACCESS_PATH)?.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(ErrorKind::InvalidData),
        }
    }
}

impl GadgetEnv {
    /// Pin to a particular core.
    pub fn pin_to_core(core: usize) -> Result<()> {
        let this_pid = nix::unistd::Pid::from_raw(0);
        let mut cpuset = nix::sched::CpuSet::new();
        cpuset.set(core).map_err(|e| HarnessError::invalid(
            format!("core {} is out of range: {}", core, e)
        ))?;
        nix::sched::sched_setaffinity(this_pid, &cpuset).map_err(|errno| {
            HarnessError::invalid(format!(
                "couldn't pin to core {}: {}", core, errno.desc()
            ))
        })
    }
}
