use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::HarnessError;

/// Ways per LLC set on the machines the probe was written for.
pub const DEFAULT_ASSOCIATIVITY: u32 = 16;
pub const DEFAULT_TRIALS: usize = 500;
pub const DEFAULT_PROBE: &str = "./ev_sets";
/// The probe prints "Reduction was successfull".
pub const DEFAULT_SUCCESS_MARKER: &str = "successfull";
pub const DEFAULT_ELEVATION: &str = "sudo";

/// How the probe gets its privileges.
///
/// The probe reads physical addresses to report the set and slice, which needs root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    None,
    Command { program: PathBuf, args: Vec<String> },
}

impl Elevation {
    pub fn sudo() -> Self {
        Elevation::Command {
            program: PathBuf::from(DEFAULT_ELEVATION),
            args: Vec::new(),
        }
    }

    /// Full argument vector for one probe invocation, program first.
    pub fn argv(&self, probe: &Path, probe_args: &[String]) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(probe_args.len() + 2);
        if let Elevation::Command { program, args } = self {
            argv.push(program.clone().into_os_string());
            argv.extend(args.iter().map(OsString::from));
        }
        argv.push(probe.as_os_str().to_owned());
        argv.extend(probe_args.iter().map(OsString::from));
        argv
    }
}

impl Default for Elevation {
    fn default() -> Self {
        Elevation::sudo()
    }
}

impl Display for Elevation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Elevation::None => write!(f, "none"),
            Elevation::Command { program, args } => {
                write!(f, "{}", program.display())?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub probe: PathBuf,
    pub probe_args: Vec<String>,
    pub associativity: u32,
    pub trials: usize,
    pub jobs: usize,
    pub timeout: Option<Duration>,
    pub elevation: Elevation,
    pub success_marker: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            probe: PathBuf::from(DEFAULT_PROBE),
            probe_args: Vec::new(),
            associativity: DEFAULT_ASSOCIATIVITY,
            trials: DEFAULT_TRIALS,
            jobs: 1,
            timeout: None,
            elevation: Elevation::default(),
            success_marker: String::from(DEFAULT_SUCCESS_MARKER),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.trials == 0 {
            return Err(HarnessError::InvalidConfig(String::from(
                "the trial budget must be at least 1",
            )));
        }
        if self.jobs == 0 {
            return Err(HarnessError::InvalidConfig(String::from(
                "at least one job is needed to run trials",
            )));
        }
        if self.success_marker.is_empty() {
            return Err(HarnessError::InvalidConfig(String::from(
                "the success marker cannot be empty",
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(HarnessError::InvalidConfig(String::from(
                "a zero timeout would fail every trial",
            )));
        }
        Ok(())
    }
}
