//! Worker lifecycle — the pause/stop flag machine behind a pipeline run.
//!
//! A job runs on a single background thread. Pause/Resume/Stop arrive from
//! outside (Ctrl-C handler, another thread). Suspension is active polling
//! with short sleeps; cancellation is cooperative and only observed at
//! stage boundaries via `checkpoint()`. External processes that are already
//! running when a stop arrives are terminated explicitly (SIGTERM, then
//! SIGKILL after a grace window) rather than interrupted.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PAUSE_POLL: Duration = Duration::from_millis(100);
const CHILD_POLL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle states of a job.
///
/// Idle → Running → {Paused ⇄ Running} → Finished | Stopped | Errored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Paused,
    Finished,
    Stopped,
    Errored,
}

/// Returned by [`WorkerHandle::checkpoint`] once a stop has been requested.
#[derive(Debug, thiserror::Error)]
#[error("job stopped before completion")]
pub struct Interrupted;

struct Flags {
    state: WorkerState,
    paused: bool,
    stop_requested: bool,
}

struct Shared {
    flags: Mutex<Flags>,
    children: Mutex<Vec<Arc<Mutex<Child>>>>,
}

/// Cloneable handle shared between the worker thread and its controller.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl Default for WorkerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                flags: Mutex::new(Flags {
                    state: WorkerState::Idle,
                    paused: false,
                    stop_requested: false,
                }),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.flags.lock().unwrap().state
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.flags.lock().unwrap().stop_requested
    }

    fn set_state(&self, state: WorkerState) {
        self.shared.flags.lock().unwrap().state = state;
    }

    pub fn start(&self) {
        self.set_state(WorkerState::Running);
    }

    pub fn pause(&self) {
        let mut flags = self.shared.flags.lock().unwrap();
        if flags.state == WorkerState::Running {
            flags.paused = true;
            flags.state = WorkerState::Paused;
            log::info!("[WORKER] Paused");
        }
    }

    pub fn resume(&self) {
        let mut flags = self.shared.flags.lock().unwrap();
        if flags.state == WorkerState::Paused {
            flags.paused = false;
            flags.state = WorkerState::Running;
            log::info!("[WORKER] Resumed");
        }
    }

    /// Request a graceful stop. Clears the paused flag so a paused job can
    /// wind down, then terminates every tracked child process.
    pub fn stop(&self) {
        {
            let mut flags = self.shared.flags.lock().unwrap();
            flags.stop_requested = true;
            flags.paused = false;
        }
        let children: Vec<_> = self.shared.children.lock().unwrap().drain(..).collect();
        if !children.is_empty() {
            log::info!(
                "[WORKER] Stop requested — terminating {} tracked process(es)",
                children.len()
            );
        }
        for child in &children {
            terminate_child(child);
        }
    }

    /// Stage-boundary check. Blocks with short sleeps while paused and
    /// returns `Err(Interrupted)` once a stop has been requested, including
    /// while waiting out a pause.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        loop {
            {
                let flags = self.shared.flags.lock().unwrap();
                if flags.stop_requested {
                    return Err(Interrupted);
                }
                if !flags.paused {
                    return Ok(());
                }
            }
            std::thread::sleep(PAUSE_POLL);
        }
    }

    /// Spawn `cmd` with piped output, register the child so `stop()` can
    /// terminate it, and wait for it by polling so a stop takes effect
    /// promptly. Stdout/stderr are drained on reader threads to avoid
    /// pipe-buffer stalls.
    pub fn run_tracked(&self, cmd: &mut Command) -> std::io::Result<std::process::Output> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || drain(stdout));
        let stderr_reader = std::thread::spawn(move || drain(stderr));

        let slot = Arc::new(Mutex::new(child));
        self.shared.children.lock().unwrap().push(Arc::clone(&slot));

        let status = loop {
            let polled = slot.lock().unwrap().try_wait()?;
            match polled {
                Some(status) => break status,
                None => std::thread::sleep(CHILD_POLL),
            }
        };

        self.shared
            .children
            .lock()
            .unwrap()
            .retain(|c| !Arc::ptr_eq(c, &slot));

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        Ok(std::process::Output {
            status,
            stdout,
            stderr,
        })
    }

    /// Drive a job closure through the lifecycle: Running on entry, then
    /// Finished, Stopped or Errored depending on how it returns. A stop
    /// that surfaced as [`Interrupted`] (or as a failure caused by a killed
    /// child) counts as Stopped, not as an error.
    pub fn run_job<F>(&self, job: F) -> anyhow::Result<()>
    where
        F: FnOnce(&WorkerHandle) -> anyhow::Result<()>,
    {
        self.start();
        match job(self) {
            Ok(()) => {
                self.set_state(WorkerState::Finished);
                Ok(())
            }
            Err(err) if err.is::<Interrupted>() || self.stop_requested() => {
                log::warn!("[WORKER] Job stopped before completion");
                self.set_state(WorkerState::Stopped);
                Ok(())
            }
            Err(err) => {
                self.set_state(WorkerState::Errored);
                Err(err)
            }
        }
    }
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// Terminate-then-kill: SIGTERM first, then SIGKILL once the grace window
/// runs out.
fn terminate_child(slot: &Arc<Mutex<Child>>) {
    let mut child = slot.lock().unwrap();
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            log::error!("[WORKER] Failed to poll child {}: {}", child.id(), err);
            return;
        }
    }

    let pid = child.id();
    #[cfg(unix)]
    {
        // std has no terminate(); /bin/kill sends SIGTERM by default.
        let _ = Command::new("kill").arg(pid.to_string()).status();
    }

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            log::info!("[WORKER] Child {} exited after SIGTERM", pid);
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if let Err(err) = child.kill() {
        log::warn!("[WORKER] Failed to kill child {}: {}", pid, err);
    }
    let _ = child.wait();
    log::info!("[WORKER] Child {} killed after grace window", pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_transitions_to_running() {
        let handle = WorkerHandle::new();
        assert_eq!(handle.state(), WorkerState::Idle);
        handle.start();
        assert_eq!(handle.state(), WorkerState::Running);
    }

    #[test]
    fn pause_and_resume_flip_state() {
        let handle = WorkerHandle::new();
        handle.start();
        handle.pause();
        assert_eq!(handle.state(), WorkerState::Paused);
        handle.resume();
        assert_eq!(handle.state(), WorkerState::Running);
    }

    #[test]
    fn pause_outside_running_is_ignored() {
        let handle = WorkerHandle::new();
        handle.pause();
        assert_eq!(handle.state(), WorkerState::Idle);
    }

    #[test]
    fn checkpoint_fails_after_stop() {
        let handle = WorkerHandle::new();
        handle.start();
        assert!(handle.checkpoint().is_ok());
        handle.stop();
        assert!(handle.checkpoint().is_err());
    }

    #[test]
    fn run_job_maps_outcomes() {
        let handle = WorkerHandle::new();
        handle.run_job(|_| Ok(())).unwrap();
        assert_eq!(handle.state(), WorkerState::Finished);

        let handle = WorkerHandle::new();
        let err = handle
            .run_job(|_| Err(anyhow::anyhow!("boom")))
            .unwrap_err();
        assert_eq!(handle.state(), WorkerState::Errored);
        assert_eq!(err.to_string(), "boom");

        let handle = WorkerHandle::new();
        handle
            .run_job(|w| {
                w.stop();
                w.checkpoint()?;
                Ok(())
            })
            .unwrap();
        assert_eq!(handle.state(), WorkerState::Stopped);
    }
}
