use anyhow::Result;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

pub fn pid_alive(pid: u32) -> bool {
    if cfg!(windows) {
        // The advisory lock is the real liveness signal on Windows.
        true
    } else {
        let Ok(status) = Command::new("kill").arg("-0").arg(pid.to_string()).status() else {
            return false;
        };
        status.success()
    }
}

/// Wait for `child`, killing it once `timeout_secs` elapse.
pub fn wait_with_optional_timeout(child: &mut Child, timeout_secs: Option<u64>) -> Result<ExitStatus> {
    let Some(timeout_secs) = timeout_secs else {
        return Ok(child.wait()?);
    };
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= Duration::from_secs(timeout_secs) {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("command timed out after {}s", timeout_secs);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn timeout_kills_slow_children() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let err = wait_with_optional_timeout(&mut child, Some(0)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn no_timeout_waits_for_exit() {
        let mut child = Command::new("true").spawn().unwrap();
        assert!(wait_with_optional_timeout(&mut child, None).unwrap().success());
    }
}
