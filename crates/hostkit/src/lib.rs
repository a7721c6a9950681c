//! Hosting contexts and their generated configuration
//!
//! The hosting topology is a graph of [`Context`]s: servers, platforms on
//! servers, and sites on platforms. Each context binds capabilities to
//! services; each service declares the configuration files it needs per
//! context type. Verifying a context regenerates those files (with extension
//! hooks given a chance to alter the data first), writes them atomically and
//! reloads the affected services.
//!
//! # Example
//!
//! ```ignore
//! use hostkit::{ContextStore, ServiceRegistry, VerifyOrchestrator, VerifyOptions};
//!
//! let store = ContextStore::new("/var/aegir/config");
//! let registry = ServiceRegistry::builtin();
//! let orchestrator = VerifyOrchestrator::new(&store, &registry, generator);
//! let report = orchestrator.verify(&[], &VerifyOptions::default(), &NoProgress, &cancel)?;
//! ```

pub mod artifact;
pub mod configuration;
pub mod context;
pub mod error;
pub mod executable;
pub mod hooks;
pub mod merge;
pub mod process;
pub mod record;
pub mod render;
pub mod scope;
pub mod service;
pub mod store;
pub mod verify;

pub use artifact::{ArtifactResource, ConfigurationArtifact, Generator, WriteOutcome, write_artifact};
pub use configuration::{Configuration, DEFAULT_MODE};
pub use context::{Context, ContextDocument, ContextKind, ContextType, Platform, Server, Site};
pub use error::{Error, ErrorKind, Result};
pub use executable::{RestartService, resolve_executable};
pub use hooks::{CommandContributor, Contribution, Contributor, ExtensionHookBus, MergePolicy};
pub use record::{ArtifactRecord, FailureRecord, VerificationRecord, VerifyState};
pub use render::{Renderer, TemplateRenderer};
pub use scope::Scope;
pub use service::{Capability, Service, ServiceBinding, ServiceRegistry};
pub use store::ContextStore;
pub use verify::{
    ArtifactChange, DeclaredArtifact, Drift, TargetOutcome, TargetStatus, VerifyOptions,
    VerifyOrchestrator, VerifyReport,
};
