//! Service control executables and restart post-actions

use crate::error::Error;
use crate::process;
use crate::service::{ControlSpec, Service};
use declarative::{ApplyContext, PostAction};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of an executable search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    /// False when `path` is the fallback
    pub found: bool,
}

/// Candidate locations, in search order
///
/// Every `PATH` entry is tried with each name before the fixed locations.
pub fn candidates(names: &[&str], env_path: &str, fixed: &[&str]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::env::split_paths(env_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .collect();
    out.extend(fixed.iter().map(PathBuf::from));
    out
}

/// First candidate passing `is_executable`, else the fallback
pub fn resolve_executable(
    candidates: &[PathBuf],
    fallback: &Path,
    is_executable: impl Fn(&Path) -> bool,
) -> Resolved {
    match candidates.iter().find(|p| is_executable(p.as_path())) {
        Some(path) => Resolved {
            path: path.clone(),
            found: true,
        },
        None => Resolved {
            path: fallback.to_path_buf(),
            found: false,
        },
    }
}

/// Locate a service's control executable
pub fn control_executable(
    service: &str,
    spec: &ControlSpec,
    env_path: &str,
    is_executable: impl Fn(&Path) -> bool,
) -> PathBuf {
    let found = resolve_executable(
        &candidates(spec.names, env_path, spec.fixed),
        Path::new(spec.fallback),
        is_executable,
    );
    if !found.found {
        log::warn!(
            "{}",
            Error::ServiceUnavailable {
                service: service.to_string(),
                fallback: found.path.clone(),
            }
        );
    }
    found.path
}

/// Check the file exists and has an execute bit set
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Shell command that reloads a service, if it has one
pub fn restart_command(service: &Service, env_path: &str) -> Option<String> {
    let spec = service.control.as_ref()?;
    let exe = control_executable(service.id, spec, env_path, is_executable);
    let line = format!("{} {}", exe.display(), spec.action);
    Some(if spec.sudo {
        format!("sudo {}", line)
    } else {
        line
    })
}

/// Reload a service once all of a target's artifacts are written
#[derive(Debug, Clone)]
pub struct RestartService {
    pub service: String,
    pub command: String,
    pub timeout: Duration,
}

impl PostAction for RestartService {
    fn id(&self) -> String {
        format!("restart:{}", self.service)
    }

    fn description(&self) -> String {
        format!("Restart {} ({})", self.service, self.command)
    }

    fn run(&self, _ctx: &ApplyContext) -> anyhow::Result<()> {
        log::info!("Restarting {}: {}", self.service, self.command);
        let out = process::run_shell(&self.command, &[], None, self.timeout)?;
        process::check(&out)
    }
}
