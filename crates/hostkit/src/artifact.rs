//! Configuration artifacts: generation and atomic writes
//!
//! Generation runs `default data -> extension hook -> merge -> render` for
//! one descriptor in one scope. Writing goes through a temporary file in the
//! destination directory which is renamed into place once its mode is set,
//! so readers never observe a partial file.

use crate::configuration::Configuration;
use crate::error::{Error, Result};
use crate::hooks::ExtensionHookBus;
use crate::merge::is_empty;
use crate::record::{ArtifactRecord, digest};
use crate::render::Renderer;
use crate::scope::Scope;
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};
use serde_yaml::Value;
use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// A rendered configuration file, ready to be written
#[derive(Debug, Clone)]
pub struct ConfigurationArtifact {
    pub id: &'static str,
    pub description: &'static str,
    pub path: PathBuf,
    pub mode: u32,
    pub group: String,
    /// Data after extension hooks
    pub data: Value,
    pub content: String,
    /// Contributor failures, already logged
    pub hook_warnings: Vec<String>,
}

impl ConfigurationArtifact {
    pub fn digest(&self) -> String {
        digest(&self.content)
    }

    pub fn record(&self) -> ArtifactRecord {
        ArtifactRecord {
            id: self.id.to_string(),
            path: self.path.clone(),
            mode: self.mode,
            digest: self.digest(),
        }
    }
}

/// Runs the generation pipeline
#[derive(Clone)]
pub struct Generator {
    hooks: Arc<ExtensionHookBus>,
    renderer: Arc<dyn Renderer>,
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Generator {
    pub fn new(hooks: Arc<ExtensionHookBus>, renderer: Arc<dyn Renderer>) -> Self {
        Self { hooks, renderer }
    }

    /// Produce the artifact a descriptor yields in a scope
    ///
    /// Emptiness is judged on the data after the hook has run, whatever the
    /// merge policy: empty defaults that no contributor fills yield empty
    /// content and the template is not rendered.
    pub fn process(&self, descriptor: &dyn Configuration, scope: &Scope) -> Result<ConfigurationArtifact> {
        let mut data = descriptor.default_data(scope)?;

        let mut hook_warnings = Vec::new();
        if let Some(hook) = descriptor.hook() {
            let report = self.hooks.apply(hook, scope.uri(), &mut data);
            hook_warnings.extend(report.errors.iter().map(ToString::to_string));
        }

        let content = if is_empty(&data) {
            String::new()
        } else {
            self.renderer.render(descriptor.template(), &data)?
        };

        Ok(ConfigurationArtifact {
            id: descriptor.id(),
            description: descriptor.description(),
            path: descriptor.target_path(scope)?,
            mode: descriptor.mode(),
            group: scope.web_group()?.to_string(),
            data,
            content,
            hook_warnings,
        })
    }
}

/// What a write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Modified,
    Unchanged,
}

/// Write an artifact atomically, applying mode then group
///
/// A group that cannot be applied is reported through `warn`; every other
/// failure is a `WriteError`.
pub fn write_artifact(artifact: &ConfigurationArtifact, warn: impl Fn(String)) -> Result<WriteOutcome> {
    let path = &artifact.path;
    let existing = fs::metadata(path).ok();

    if let Some(meta) = &existing
        && meta.permissions().mode() & 0o7777 == artifact.mode
        && fs::read_to_string(path).is_ok_and(|c| c == artifact.content)
    {
        if let Err(e) = apply_group(path, &artifact.group) {
            warn(format!("{}: could not set group '{}': {}", path.display(), artifact.group, e));
        }
        return Ok(WriteOutcome::Unchanged);
    }

    let dir = path
        .parent()
        .ok_or_else(|| Error::write(path, io::Error::other("path has no parent directory")))?;
    fs::create_dir_all(dir).map_err(|e| Error::write(path, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::write(path, e))?;
    tmp.write_all(artifact.content.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::write(path, e))?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(artifact.mode))
        .map_err(|e| Error::write(path, e))?;
    if let Err(e) = apply_group(tmp.path(), &artifact.group) {
        warn(format!("{}: could not set group '{}': {}", path.display(), artifact.group, e));
    }
    tmp.persist(path).map_err(|e| Error::write(path, e.error))?;

    log::debug!("wrote {} ({:04o})", path.display(), artifact.mode);
    Ok(if existing.is_some() {
        WriteOutcome::Modified
    } else {
        WriteOutcome::Created
    })
}

fn apply_group(path: &Path, group: &str) -> io::Result<()> {
    let gid = group_id(group)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such group"))?;
    std::os::unix::fs::chown(path, None, Some(gid))
}

/// Resolve a group name (or numeric id) to a gid
fn group_id(group: &str) -> Option<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Some(gid);
    }
    let name = CString::new(group).ok()?;
    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        // SAFETY: zeroed is a valid bit pattern for the plain C struct
        let mut entry: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        // SAFETY: all pointers are valid for the duration of the call and
        // buf.len() is the real size of buf
        let rc = unsafe {
            libc::getgrnam_r(
                name.as_ptr(),
                &mut entry,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < 1 << 20 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        return Some(entry.gr_gid);
    }
}

/// Mode and digest, as compared by diffs
fn state_details(mode: u32, content_digest: &str) -> ResourceState {
    ResourceState::Present {
        details: Some(format!("{:04o} {}", mode, content_digest)),
    }
}

struct Inner {
    target: String,
    descriptor: &'static dyn Configuration,
    scope: Arc<Scope>,
    generator: Generator,
    generated: OnceLock<Result<ConfigurationArtifact>>,
    written: OnceLock<ArtifactRecord>,
}

/// One configuration file of one target, as an executor resource
///
/// Generation is lazy and happens at most once. Cloning shares the generated
/// artifact, so the caller can keep a handle after handing a clone to a plan.
#[derive(Clone)]
pub struct ArtifactResource {
    inner: Arc<Inner>,
}

impl fmt::Debug for ArtifactResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactResource")
            .field("target", &self.inner.target)
            .field("descriptor", &self.inner.descriptor.id())
            .finish()
    }
}

impl ArtifactResource {
    pub fn new(
        target: impl Into<String>,
        descriptor: &'static dyn Configuration,
        scope: Arc<Scope>,
        generator: Generator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target: target.into(),
                descriptor,
                scope,
                generator,
                generated: OnceLock::new(),
                written: OnceLock::new(),
            }),
        }
    }

    pub fn descriptor(&self) -> &'static dyn Configuration {
        self.inner.descriptor
    }

    /// The generated artifact, or why generation failed
    pub fn artifact(&self) -> &Result<ConfigurationArtifact> {
        self.inner.generated.get_or_init(|| {
            self.inner
                .generator
                .process(self.inner.descriptor, &self.inner.scope)
        })
    }

    /// Record of the file, once it is known to be on disk
    pub fn written(&self) -> Option<&ArtifactRecord> {
        self.inner.written.get()
    }
}

impl Resource for ArtifactResource {
    fn id(&self) -> String {
        self.inner.descriptor.id().to_string()
    }

    fn description(&self) -> String {
        match self.artifact() {
            Ok(a) => format!("{} at {}", a.description, a.path.display()),
            Err(_) => self.inner.descriptor.description().to_string(),
        }
    }

    fn resource_type(&self) -> &'static str {
        "config"
    }

    fn current_state(&self) -> anyhow::Result<ResourceState> {
        let artifact = match self.artifact() {
            Ok(a) => a,
            Err(e) => anyhow::bail!("{}", e),
        };
        match fs::read_to_string(&artifact.path) {
            Ok(content) => {
                let mode = fs::metadata(&artifact.path)?.permissions().mode() & 0o7777;
                Ok(state_details(mode, &digest(&content)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ResourceState::Absent),
            Err(e) => Err(e.into()),
        }
    }

    fn desired_state(&self) -> ResourceState {
        match self.artifact() {
            Ok(a) => state_details(a.mode, &a.digest()),
            Err(_) => ResourceState::Unknown,
        }
    }

    fn apply(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
        let artifact = match self.artifact() {
            Ok(a) => a,
            Err(e) => {
                return Ok(ApplyResult::Failed {
                    error: e.to_string(),
                });
            }
        };
        for w in &artifact.hook_warnings {
            ctx.warn(w.clone());
        }

        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "dry run".into(),
            });
        }

        let outcome = write_artifact(artifact, |w| ctx.warn(w))?;
        let _ = self.inner.written.set(artifact.record());
        Ok(match outcome {
            WriteOutcome::Created => ApplyResult::Created,
            WriteOutcome::Modified => ApplyResult::Modified,
            WriteOutcome::Unchanged => ApplyResult::NoChange,
        })
    }

    fn lock_path(&self) -> Option<PathBuf> {
        self.artifact().as_ref().ok().map(|a| a.path.clone())
    }
}
