//! Real-time scheduling helpers (Linux SCHED_FIFO and mlockall).

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
mod linux {
    use super::RtLock;
    use libc::{MCL_CURRENT, MCL_FUTURE, SCHED_FIFO, mlockall};

    /// CAP_SYS_NICE bit in the capability masks of /proc/self/status.
    const CAP_SYS_NICE: u64 = 1 << 23;

    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn memlock_limit_hint() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        // SAFETY: getrlimit writes a full rlimit on success.
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        // SAFETY: rc == 0 above.
        let cur = unsafe { rlim.assume_init() }.rlim_cur;
        Some(if cur == libc::RLIM_INFINITY {
            "memlock limit: unlimited".to_string()
        } else {
            format!("memlock limit: {} KiB", cur / 1024)
        })
    }

    fn lock(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall takes only flags.
        if unsafe { mlockall(flags) } != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(super) fn apply_mem_lock(mode: RtLock) -> eyre::Result<()> {
        let err = match mode {
            RtLock::None => return Ok(()),
            RtLock::Current => match lock(MCL_CURRENT) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            },
            RtLock::All => match lock(MCL_CURRENT | MCL_FUTURE) {
                Ok(()) => return Ok(()),
                // locking future pages is the part that usually hits the limit
                Err(e) if is_retryable(&e) && lock(MCL_CURRENT).is_ok() => {
                    tracing::warn!(error = %e, "mlockall(current|future) failed; locked current pages only");
                    return Ok(());
                }
                Err(e) => e,
            },
        };
        let mut msg = format!("mlockall failed: {err}");
        if is_retryable(&err) {
            if let Some(h) = memlock_limit_hint() {
                msg.push_str(&format!("; {h}"));
            }
            msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
        }
        Err(eyre::eyre!(msg))
    }

    fn has_sys_nice() -> bool {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return true;
        };
        status
            .lines()
            .filter(|l| l.starts_with("CapEff:"))
            .filter_map(|l| l.split_whitespace().nth(1))
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .any(|caps| caps & CAP_SYS_NICE != 0)
    }

    pub(super) fn apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        // SAFETY: geteuid has no preconditions.
        let euid = unsafe { libc::geteuid() };
        if euid != 0 && !has_sys_nice() {
            eyre::bail!(
                "insufficient privileges for SCHED_FIFO (uid {euid}); run as root or \
                 'sudo setcap cap_sys_nice=ep /path/to/plate'"
            );
        }
        // SAFETY: plain queries.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(SCHED_FIFO),
                libc::sched_get_priority_max(SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let wanted = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param {
            sched_priority: wanted,
        };
        // SAFETY: param outlives the call; pid 0 is this process.
        if unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) } != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(wanted)
    }
}

/// Apply real-time settings once per process. Failures are warnings.
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| apply(prio, lock));
}

#[cfg(target_os = "linux")]
fn apply(prio: Option<i32>, lock: RtLock) {
    match linux::apply_mem_lock(lock) {
        Ok(()) => tracing::info!(mode = ?lock, "rt: memory lock applied"),
        Err(e) => tracing::warn!(error = %e, "rt: memory lock not applied"),
    }
    match linux::apply_fifo_priority(prio) {
        Ok(p) => tracing::info!(priority = p, "rt: SCHED_FIFO enabled"),
        Err(e) => tracing::warn!(error = %e, "rt: SCHED_FIFO not applied"),
    }
}

#[cfg(not(target_os = "linux"))]
fn apply(prio: Option<i32>, lock: RtLock) {
    tracing::warn!(?prio, mode = ?lock, "rt: real-time mode is only supported on Linux");
}
