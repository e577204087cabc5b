//! One probe invocation per trial.
//!
//! The probe is executed directly from an argument vector, optionally behind an
//! elevation program such as `sudo`. Its stdout and stderr share a single pipe so the
//! captured text keeps the order in which the probe wrote it. Each probe leads its own
//! process group, a timeout takes down everything it started.

use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{geteuid, pipe2, Pid};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Elevation, HarnessConfig};
use crate::HarnessError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Time left to the elevation program to forward SIGTERM before it gets SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn the probe: {0}")]
    Spawn(io::Error),
    #[error("probe exited with status {0}")]
    ExitCode(i32),
    #[error("probe killed by signal {0}")]
    Signal(i32),
    #[error("probe did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("i/o error while running the probe: {0}")]
    Io(io::Error),
}

impl From<nix::Error> for ProcessError {
    fn from(value: nix::Error) -> Self {
        ProcessError::Io(value.into())
    }
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Exited,
    Failed(ProcessError),
}

#[derive(Debug)]
pub struct Trial {
    pub index: usize,
    /// Combined stdout and stderr, empty when the probe failed.
    pub output: String,
    pub outcome: ProcessOutcome,
}

impl Trial {
    pub fn failed(index: usize, error: ProcessError) -> Self {
        Trial {
            index,
            output: String::new(),
            outcome: ProcessOutcome::Failed(error),
        }
    }

    pub fn completed(&self) -> bool {
        matches!(self.outcome, ProcessOutcome::Exited)
    }
}

/// Something able to run one trial. Implementations must tolerate concurrent calls
/// when trials are spread over several threads.
pub trait TrialRunner: Sync {
    fn run_trial(&self, index: usize) -> Trial;
}

fn locate(program: &Path) -> Option<PathBuf> {
    if program.is_absolute() || program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[derive(Debug)]
pub struct CommandProbe {
    argv: Vec<OsString>,
    timeout: Option<Duration>,
}

impl CommandProbe {
    /// Checks that the probe can be started at all. Failing here aborts the run before
    /// the first trial.
    pub fn new(config: &HarnessConfig) -> Result<Self, HarnessError> {
        let probe = locate(&config.probe)
            .ok_or_else(|| HarnessError::ProbeNotFound(config.probe.clone()))?;
        if !is_executable(&probe) {
            return Err(HarnessError::ProbeNotExecutable(probe));
        }

        let elevation = match &config.elevation {
            Elevation::Command { .. } if geteuid().is_root() => {
                info!("already running as root, the probe is started without elevation");
                Elevation::None
            }
            Elevation::Command { program, args } => {
                let program = locate(program)
                    .ok_or_else(|| HarnessError::ElevationNotFound(program.clone()))?;
                Elevation::Command {
                    program,
                    args: args.clone(),
                }
            }
            Elevation::None => Elevation::None,
        };

        let argv = elevation.argv(&probe, &config.probe_args);
        info!(command = ?argv, elevation = %elevation, "probe command line");
        Ok(CommandProbe {
            argv,
            timeout: config.timeout,
        })
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    fn execute(&self) -> Result<String, ProcessError> {
        // Close-on-exec so that probes spawned by other jobs do not hold our write end.
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC)?;
        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer.try_clone().map_err(ProcessError::Io)?))
            .stderr(Stdio::from(writer));
        let spawned = command.spawn();
        // The command owns the parent's copies of the write end, the reader only sees
        // EOF once they are closed.
        drop(command);
        let mut child = spawned.map_err(ProcessError::Spawn)?;
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut output = Vec::new();
            let result = File::from(reader).read_to_end(&mut output).map(|_| output);
            let _ = sender.send(result);
        });

        let status = self.wait(&mut child, deadline)?;
        if !status.success() {
            return Err(match (status.code(), status.signal()) {
                (Some(code), _) => ProcessError::ExitCode(code),
                (None, Some(signal)) => ProcessError::Signal(signal),
                (None, None) => ProcessError::ExitCode(-1),
            });
        }

        // Descendants left in the group may still hold the write end after the probe
        // exited, the deadline covers them too.
        let received = match deadline {
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => {
                receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
        };
        let output = match received {
            Ok(result) => result.map_err(ProcessError::Io)?,
            Err(RecvTimeoutError::Timeout) => {
                terminate(&mut child);
                return Err(self.timed_out());
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ProcessError::Io(io::Error::other("output reader vanished")));
            }
        };
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    fn wait(
        &self,
        child: &mut Child,
        deadline: Option<Instant>,
    ) -> Result<ExitStatus, ProcessError> {
        let Some(deadline) = deadline else {
            return child.wait().map_err(ProcessError::Io);
        };
        loop {
            if let Some(status) = child.try_wait().map_err(ProcessError::Io)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                terminate(child);
                return Err(self.timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn timed_out(&self) -> ProcessError {
        ProcessError::TimedOut(self.timeout.unwrap_or_default())
    }
}

/// Stops the whole process group of the probe. SIGTERM first, `sudo` forwards it to
/// the probe, SIGKILL would not be.
fn terminate(child: &mut Child) {
    let group = Pid::from_raw(child.id() as i32);
    match killpg(group, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = child.id(), error = %e, "failed to send SIGTERM to the probe"),
    }
    let grace = Instant::now() + KILL_GRACE;
    while Instant::now() < grace {
        if let Ok(Some(_)) = child.try_wait() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    // Whatever survived the grace period, the group leader included.
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = child.id(), error = %e, "failed to send SIGKILL to the probe"),
    }
    let _ = child.wait();
}

impl TrialRunner for CommandProbe {
    fn run_trial(&self, index: usize) -> Trial {
        match self.execute() {
            Ok(output) => Trial {
                index,
                output,
                outcome: ProcessOutcome::Exited,
            },
            Err(e) => {
                debug!(trial = index, error = %e, "probe invocation failed");
                Trial::failed(index, e)
            }
        }
    }
}
