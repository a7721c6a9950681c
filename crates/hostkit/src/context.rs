//! Hosting topology contexts
//!
//! A context is a named node in the hosting graph: a Server, a Platform
//! hosted on a server, or a Site running on a platform. Parents are referenced
//! by name only, so deleting a parent never deletes its children; a dangling
//! reference is detected when the child's scope is resolved.
//!
//! Variants are a closed set. Construction from a persisted document always
//! goes through [`construct`], which looks the type name up in a fixed
//! registry and rejects anything else with `UnknownContextType`.

use crate::error::{Error, Result};
use crate::record::VerificationRecord;
use crate::service::ServiceBinding;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Context names never contain dots, so `<type>.<name>` always splits in two
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Dot-separated host labels; site files are placed under a directory named after the uri
static URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$")
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

pub const DEFAULT_WEB_GROUP: &str = "www-data";
pub const DEFAULT_SCRIPT_USER: &str = "aegir";
pub const DEFAULT_REMOTE_HOST: &str = "localhost";

/// Context variant discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Server,
    Platform,
    Site,
}

impl ContextType {
    pub const ALL: [ContextType; 3] = [Self::Server, Self::Platform, Self::Site];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Platform => "platform",
            Self::Site => "site",
        }
    }

    /// Look a type name up in the constructor registry
    pub fn from_name(name: &str) -> Result<Self> {
        CONSTRUCTORS
            .iter()
            .find(|(t, _)| t.as_str() == name)
            .map(|(t, _)| *t)
            .ok_or_else(|| Error::UnknownContextType {
                context_type: name.to_string(),
            })
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server: hosts platforms and owns the service bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub remote_host: String,
    /// Group that generated configuration files are owned by
    pub web_group: String,
    pub script_user: String,
    /// Where server-level service configuration is written
    pub config_dir: PathBuf,
}

impl Server {
    pub fn new(name: &str) -> Self {
        Self {
            remote_host: DEFAULT_REMOTE_HOST.to_string(),
            web_group: DEFAULT_WEB_GROUP.to_string(),
            script_user: DEFAULT_SCRIPT_USER.to_string(),
            config_dir: default_config_dir(name),
        }
    }
}

/// A platform: a code base on a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Name of the hosting server
    pub server: String,
    /// Filesystem root of the code base
    pub root: PathBuf,
}

/// A site: one installation on a platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    /// Name of the platform the site runs on
    pub platform: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    Server(Server),
    Platform(Platform),
    Site(Site),
}

/// A node of the hosting topology
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub name: String,
    pub kind: ContextKind,
    /// Capability (`http`, `db`) to service binding
    pub services: BTreeMap<String, ServiceBinding>,
    /// Free-form configuration not covered by the typed fields
    pub configuration: BTreeMap<String, Value>,
    pub verification: Option<VerificationRecord>,
}

impl Context {
    /// Create a context, validating its name and site uri
    pub fn new(name: impl Into<String>, kind: ContextKind) -> Result<Self> {
        let context = Self {
            name: name.into(),
            kind,
            services: BTreeMap::new(),
            configuration: BTreeMap::new(),
            verification: None,
        };
        context.validate()?;
        Ok(context)
    }

    /// Re-check the fields that end up in paths, after in-place edits
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if let ContextKind::Site(site) = &self.kind {
            validate_uri(&self.name, &site.uri)?;
        }
        Ok(())
    }

    pub fn server(name: &str) -> Result<Self> {
        Self::new(name, ContextKind::Server(Server::new(name)))
    }

    pub fn platform(name: &str, server: &str, root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            name,
            ContextKind::Platform(Platform {
                server: server.to_string(),
                root: root.into(),
            }),
        )
    }

    pub fn site(name: &str, platform: &str, uri: &str) -> Result<Self> {
        Self::new(
            name,
            ContextKind::Site(Site {
                platform: platform.to_string(),
                uri: uri.to_string(),
            }),
        )
    }

    pub fn context_type(&self) -> ContextType {
        match self.kind {
            ContextKind::Server(_) => ContextType::Server,
            ContextKind::Platform(_) => ContextType::Platform,
            ContextKind::Site(_) => ContextType::Site,
        }
    }

    /// Registry identifier, `<type>.<name>`
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.context_type(), self.name)
    }

    /// Canonical identifier handed to extension hooks
    pub fn uri(&self) -> &str {
        match &self.kind {
            ContextKind::Site(site) => &site.uri,
            _ => &self.name,
        }
    }

    /// Name of the owning context, if this variant has one
    pub fn parent(&self) -> Option<&str> {
        match &self.kind {
            ContextKind::Server(_) => None,
            ContextKind::Platform(p) => Some(&p.server),
            ContextKind::Site(s) => Some(&s.platform),
        }
    }

    pub fn as_server(&self) -> Option<&Server> {
        match &self.kind {
            ContextKind::Server(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_platform(&self) -> Option<&Platform> {
        match &self.kind {
            ContextKind::Platform(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_site(&self) -> Option<&Site> {
        match &self.kind {
            ContextKind::Site(s) => Some(s),
            _ => None,
        }
    }

    /// Same definition, ignoring the last verification record
    pub fn same_definition(&self, other: &Context) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.services == other.services
            && self.configuration == other.configuration
    }

    /// Serializable form of this context
    pub fn to_document(&self) -> ContextDocument {
        let mut doc = ContextDocument {
            name: self.name.clone(),
            context_type: self.context_type().as_str().to_string(),
            services: self.services.clone(),
            configuration: self.configuration.clone(),
            verification: self.verification.clone(),
            ..Default::default()
        };
        match &self.kind {
            ContextKind::Server(s) => {
                doc.remote_host = Some(s.remote_host.clone());
                doc.web_group = Some(s.web_group.clone());
                doc.script_user = Some(s.script_user.clone());
                doc.config_dir = Some(s.config_dir.clone());
            }
            ContextKind::Platform(p) => {
                doc.server = Some(p.server.clone());
                doc.root = Some(p.root.clone());
            }
            ContextKind::Site(s) => {
                doc.platform = Some(s.platform.clone());
                doc.uri = Some(s.uri.clone());
            }
        }
        doc
    }
}

/// On-disk shape of a context definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextDocument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub context_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceBinding>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationRecord>,
}

type Constructor = fn(&str, ContextDocument) -> Result<ContextKind>;

/// The closed set of context variants
const CONSTRUCTORS: [(ContextType, Constructor); 3] = [
    (ContextType::Server, construct_server),
    (ContextType::Platform, construct_platform),
    (ContextType::Site, construct_site),
];

/// Build a context of the named type from its document
pub fn construct(type_name: &str, name: &str, doc: ContextDocument) -> Result<Context> {
    let (_, constructor) = CONSTRUCTORS
        .iter()
        .find(|(t, _)| t.as_str() == type_name)
        .ok_or_else(|| Error::UnknownContextType {
            context_type: type_name.to_string(),
        })?;

    if !doc.name.is_empty() && doc.name != name {
        log::warn!(
            "{}.{}: document names itself '{}', using the registry name",
            type_name,
            name,
            doc.name
        );
    }
    if !doc.context_type.is_empty() && doc.context_type != type_name {
        log::warn!(
            "{}.{}: document declares type '{}', using the registry type",
            type_name,
            name,
            doc.context_type
        );
    }

    let services = doc.services.clone();
    let configuration = doc.configuration.clone();
    let verification = doc.verification.clone();
    let kind = constructor(name, doc)?;

    let mut context = Context::new(name, kind)?;
    context.services = services;
    context.configuration = configuration;
    context.verification = verification;
    Ok(context)
}

fn construct_server(name: &str, doc: ContextDocument) -> Result<ContextKind> {
    Ok(ContextKind::Server(Server {
        remote_host: doc
            .remote_host
            .unwrap_or_else(|| DEFAULT_REMOTE_HOST.to_string()),
        web_group: doc.web_group.unwrap_or_else(|| DEFAULT_WEB_GROUP.to_string()),
        script_user: doc
            .script_user
            .unwrap_or_else(|| DEFAULT_SCRIPT_USER.to_string()),
        config_dir: doc.config_dir.unwrap_or_else(|| default_config_dir(name)),
    }))
}

fn construct_platform(name: &str, doc: ContextDocument) -> Result<ContextKind> {
    let server = doc
        .server
        .ok_or_else(|| Error::invalid(name, "platform requires a 'server'"))?;
    let root = doc
        .root
        .ok_or_else(|| Error::invalid(name, "platform requires a 'root'"))?;
    Ok(ContextKind::Platform(Platform { server, root }))
}

fn construct_site(name: &str, doc: ContextDocument) -> Result<ContextKind> {
    let platform = doc
        .platform
        .ok_or_else(|| Error::invalid(name, "site requires a 'platform'"))?;
    Ok(ContextKind::Site(Site {
        platform,
        uri: doc.uri.unwrap_or_else(|| name.to_string()),
    }))
}

fn default_config_dir(server: &str) -> PathBuf {
    PathBuf::from(format!("/var/aegir/config/server_{}", server))
}

/// Check that a name can be used in a `<type>.<name>` identifier
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid(
            name,
            "names may only contain letters, digits, '_' and '-'",
        ))
    }
}

/// Check that a site uri is a plain host name
pub fn validate_uri(name: &str, uri: &str) -> Result<()> {
    if URI_PATTERN.is_match(uri) {
        Ok(())
    } else {
        Err(Error::invalid(
            name,
            format!("uri '{}' is not a host name", uri),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_type_registry_is_closed() {
        assert_eq!(ContextType::from_name("site").unwrap(), ContextType::Site);
        let err = ContextType::from_name("Server").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownContextType);
        let err = ContextType::from_name("database").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownContextType);
    }

    #[test]
    fn test_construct_server_applies_defaults() {
        let ctx = construct("server", "web1", ContextDocument::default()).unwrap();
        let server = ctx.as_server().unwrap();
        assert_eq!(server.web_group, DEFAULT_WEB_GROUP);
        assert_eq!(
            server.config_dir,
            PathBuf::from("/var/aegir/config/server_web1")
        );
        assert_eq!(ctx.uri(), "web1");
        assert_eq!(ctx.parent(), None);
    }

    #[test]
    fn test_construct_platform_requires_parent() {
        let doc = ContextDocument {
            root: Some(PathBuf::from("/var/aegir/platforms/d10")),
            ..Default::default()
        };
        let err = construct("platform", "d10", doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }

    #[test]
    fn test_site_uri_defaults_to_name() {
        let doc = ContextDocument {
            platform: Some("d10".into()),
            ..Default::default()
        };
        let ctx = construct("site", "example", doc).unwrap();
        assert_eq!(ctx.uri(), "example");
        assert_eq!(ctx.parent(), Some("d10"));
        assert_eq!(ctx.identifier(), "site.example");
    }

    #[test]
    fn test_site_uri_must_be_a_host_name() {
        for uri in ["../escape", "a/b", "/etc", "..", "example..com", ".hidden", ""] {
            let err = Context::site("x", "d10", uri).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidDefinition, "{uri}");
        }
        assert!(Context::site("x", "d10", "www.example.com").is_ok());
        assert!(Context::site("my_site", "d10", "my_site").is_ok());

        let doc = ContextDocument {
            platform: Some("d10".into()),
            uri: Some("../../etc".into()),
            ..Default::default()
        };
        let err = construct("site", "example", doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);

        let mut site = Context::site("x", "d10", "x.test").unwrap();
        if let ContextKind::Site(s) = &mut site.kind {
            s.uri = "x.test/../..".into();
        }
        assert!(site.validate().is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = construct("cluster", "c1", ContextDocument::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownContextType);
    }

    #[test]
    fn test_names_cannot_contain_dots() {
        assert!(validate_name("example_com").is_ok());
        assert!(validate_name("example.com").is_err());
        assert!(validate_name("").is_err());
        assert!(Context::site("example.com", "d10", "example.com").is_err());
    }

    #[test]
    fn test_document_roundtrip() {
        let mut ctx = Context::site("example", "d10", "example.com").unwrap();
        ctx.services
            .insert("http".into(), ServiceBinding::new("apache"));
        ctx.configuration
            .insert("profile".into(), Value::from("standard"));

        let doc = ctx.to_document();
        let yaml = serde_yaml::to_string(&doc).unwrap();
        let parsed: ContextDocument = serde_yaml::from_str(&yaml).unwrap();
        let back = construct("site", "example", parsed).unwrap();
        assert_eq!(back, ctx);
    }
}
