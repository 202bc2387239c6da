//! Bounded execution of helper programs (jcmd and the dump tools).

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ProcwatchError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run `program` with `args` and return its stdout.
///
/// The child is killed once `timeout` elapses. A missing program maps to
/// `PlatformUnavailable`; a non-zero exit is reported the same way unless
/// the program still printed something, which `lsof` does when some of
/// its lookups fail.
pub fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ProcwatchError::platform_unavailable(format!("cannot run {}: {}", program, e)))?;

    // Drain stdout concurrently so a chatty child never blocks on a full pipe
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProcwatchError::runtime(format!("{} has no stdout pipe", program)))?;
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            log::debug!("{} exceeded {:?}, killed", program, timeout);
            return Err(ProcwatchError::timeout(
                format!("{} {}", program, args.join(" ")),
                timeout.as_millis() as u64,
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let bytes = reader
        .join()
        .map_err(|_| ProcwatchError::runtime(format!("reader thread for {} panicked", program)))?;
    let output = String::from_utf8_lossy(&bytes).into_owned();

    if !status.success() && output.trim().is_empty() {
        return Err(ProcwatchError::platform_unavailable(format!(
            "{} exited with {}",
            program, status
        )));
    }

    Ok(output)
}
