use crate::error::AttemptError;
use std::collections::BTreeSet;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Process groups of tools currently running, so a forced stop can reach them.
static ACTIVE: Mutex<BTreeSet<u32>> = Mutex::new(BTreeSet::new());

fn active() -> MutexGuard<'static, BTreeSet<u32>> {
    ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registered for the lifetime of one child.
struct ActiveGroup(u32);

impl ActiveGroup {
    fn register(pid: u32) -> Self {
        active().insert(pid);
        Self(pid)
    }
}

impl Drop for ActiveGroup {
    fn drop(&mut self) {
        active().remove(&self.0);
    }
}

/// Kills every tool process group still running. Each interrupted step then
/// ends as a tool error.
pub fn kill_active_groups() {
    let groups: Vec<u32> = active().iter().copied().collect();
    for pid in groups {
        warn!("killing tool process group {pid}");
        kill_group(pid);
    }
}

pub fn active_group_count() -> usize {
    active().len()
}

/// Raw result of a bounded subprocess run.
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// One subprocess step, already classified.
#[derive(Debug, Clone)]
pub struct Step {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr_excerpt: String,
    pub error: Option<AttemptError>,
}

/// Spawns `cmd` as the leader of its own process group and waits for it,
/// killing the whole group once `timeout` elapses.
pub fn run_bounded(cmd: &mut Command, timeout: Duration) -> std::io::Result<Finished> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    isolate(cmd);

    let mut child = cmd.spawn()?;
    let _active = ActiveGroup::register(child.id());

    // Drain pipes while waiting so a chatty tool can't block on a full buffer.
    let stdout_thread = drain(child.stdout.take());
    let stderr_thread = drain(child.stderr.take());

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() > timeout {
            warn!(
                "process {:?} timed out after {:?}; killing process group",
                cmd.get_program(),
                timeout
            );
            timed_out = true;
            terminate(&mut child);
            break child.wait()?;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    Ok(Finished {
        status,
        stdout: join_drain(stdout_thread, "stdout"),
        stderr: join_drain(stderr_thread, "stderr"),
        timed_out,
    })
}

/// Runs one tool step and maps every failure mode onto an [`AttemptError`].
/// Never returns an error past this boundary.
pub fn invoke(tool: &str, cmd: &mut Command, timeout: Duration, excerpt_bytes: usize) -> Step {
    let exe = cmd.get_program().to_string_lossy().into_owned();
    debug!(tool, exe = %exe, args = ?cmd.get_args().collect::<Vec<_>>(), "invoke");

    let finished = match run_bounded(cmd, timeout) {
        Ok(f) => f,
        Err(err) => {
            return Step {
                exit_code: None,
                stdout: String::new(),
                stderr_excerpt: String::new(),
                error: Some(AttemptError::ToolInvocation {
                    tool: tool.to_string(),
                    exe,
                    detail: err.to_string(),
                }),
            };
        }
    };

    let exit_code = finished.status.code();
    let error = if finished.timed_out {
        Some(AttemptError::Timeout {
            tool: tool.to_string(),
            timeout,
        })
    } else if !finished.status.success() {
        Some(AttemptError::ToolExit {
            tool: tool.to_string(),
            code: exit_code,
        })
    } else {
        None
    };

    Step {
        exit_code,
        stdout: String::from_utf8_lossy(&finished.stdout).into_owned(),
        stderr_excerpt: excerpt(&finished.stderr, excerpt_bytes),
        error,
    }
}

/// Last `max` bytes of `raw`, lossily decoded and trimmed.
pub fn excerpt(raw: &[u8], max: usize) -> String {
    let start = raw.len().saturating_sub(max);
    String::from_utf8_lossy(&raw[start..]).trim().to_string()
}

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

fn terminate(child: &mut Child) {
    kill_group(child.id());
    // Already gone when the group kill worked.
    if let Err(err) = child.kill() {
        debug!("kill {} failed: {err}", child.id());
    }
}

/// The child leads its own group, so its pid is the group id.
#[cfg(unix)]
fn kill_group(pid: u32) {
    let group = format!("-{pid}");
    let killed = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = killed {
        warn!("kill process group {group} failed: {err}");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            r.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_drain(handle: JoinHandle<std::io::Result<Vec<u8>>>, which: &str) -> Vec<u8> {
    match handle.join() {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            warn!("reading {which} failed: {err}");
            Vec::new()
        }
        Err(_) => {
            warn!("{which} reader thread panicked");
            Vec::new()
        }
    }
}
