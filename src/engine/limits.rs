//! Kernel resource limits for the child process.
//!
//! Applied between fork and exec, so every limit is in force before the
//! first untrusted instruction runs. Only async-signal-safe libc calls are
//! made here; the pre-exec context allows nothing else.

use std::io;

use crate::config::types::ResourceLimits;

#[cfg(target_env = "gnu")]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(target_env = "gnu"))]
type RlimitResource = libc::c_int;

fn set_limit(resource: RlimitResource, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    // SAFETY: setrlimit is async-signal-safe and limit outlives the call
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Apply the full limit set to the calling process. Called from the child
/// side of fork, before exec.
pub fn apply_child_limits(limits: &ResourceLimits) -> io::Result<()> {
    set_limit(libc::RLIMIT_AS, limits.max_memory_bytes)?;
    set_limit(libc::RLIMIT_CPU, limits.max_cpu_seconds)?;
    set_limit(libc::RLIMIT_FSIZE, limits.max_file_size_bytes)?;
    set_limit(libc::RLIMIT_NPROC, limits.max_process_count as u64)?;
    // no core dumps of untrusted address space
    set_limit(libc::RLIMIT_CORE, 0)?;
    Ok(())
}

/// Put the calling process in its own session and process group, so a
/// timeout kill reaches everything it managed to spawn.
pub fn detach_session() -> io::Result<()> {
    // SAFETY: setsid takes no arguments and is async-signal-safe
    let rc = unsafe { libc::setsid() };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
