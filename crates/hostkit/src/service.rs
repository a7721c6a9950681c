//! Service bindings and the service registry
//!
//! A context binds capabilities (`http`, `db`) to service subtypes
//! (`apache`, `mysql`). The registry knows, for each service, which
//! configuration descriptors apply to each context type and how the service
//! is reloaded once its files change.

use crate::configuration::{
    ApachePlatformConfig, ApacheServerConfig, ApacheVhostConfig, Configuration,
    DrupalServicesConfig, MysqlClientConfig,
};
use crate::context::ContextType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A capability a server can provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Http,
    Db,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Db => "db",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "db" => Some(Self::Db),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability's chosen service plus its properties
///
/// Persisted as `{type: apache, port: 8080, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    #[serde(rename = "type")]
    pub subtype: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl ServiceBinding {
    pub fn new(subtype: impl Into<String>) -> Self {
        Self {
            subtype: subtype.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// String form of a scalar property
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// How a service is reloaded after its configuration changes
#[derive(Debug)]
pub struct ControlSpec {
    /// Executable names searched for on PATH, in order
    pub names: &'static [&'static str],
    /// Well-known absolute locations, searched after PATH
    pub fixed: &'static [&'static str],
    /// Used when nothing was found
    pub fallback: &'static str,
    /// Argument passed to the control executable
    pub action: &'static str,
    /// Run the control executable through sudo
    pub sudo: bool,
}

/// A service known to the registry
#[derive(Debug)]
pub struct Service {
    pub id: &'static str,
    pub name: &'static str,
    pub capability: Capability,
    server: &'static [&'static dyn Configuration],
    platform: &'static [&'static dyn Configuration],
    site: &'static [&'static dyn Configuration],
    pub control: Option<ControlSpec>,
}

impl Service {
    /// Configuration descriptors for a context type, in generation order
    pub fn configurations(&self, context_type: ContextType) -> &'static [&'static dyn Configuration] {
        match context_type {
            ContextType::Server => self.server,
            ContextType::Platform => self.platform,
            ContextType::Site => self.site,
        }
    }
}

static APACHE: Service = Service {
    id: "apache",
    name: "Apache",
    capability: Capability::Http,
    server: &[&ApacheServerConfig],
    platform: &[&ApachePlatformConfig],
    site: &[&ApacheVhostConfig, &DrupalServicesConfig],
    control: Some(ControlSpec {
        names: &["apache2ctl", "apachectl"],
        fixed: &[
            "/usr/local/sbin/apachectl",
            "/usr/sbin/apache2ctl",
            "/usr/apache2/2.2/bin/apachectl",
        ],
        fallback: "/usr/sbin/apachectl",
        action: "graceful",
        sudo: true,
    }),
};

static MYSQL: Service = Service {
    id: "mysql",
    name: "MySQL",
    capability: Capability::Db,
    server: &[&MysqlClientConfig],
    platform: &[],
    site: &[],
    control: None,
};

/// Known services, keyed by subtype
#[derive(Debug)]
pub struct ServiceRegistry {
    services: Vec<&'static Service>,
}

impl ServiceRegistry {
    /// Registry of the built-in services
    pub fn builtin() -> Self {
        Self {
            services: vec![&APACHE, &MYSQL],
        }
    }

    pub fn get(&self, subtype: &str) -> Option<&'static Service> {
        self.services.iter().copied().find(|s| s.id == subtype)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Service> + '_ {
        self.services.iter().copied()
    }

    /// Services providing a capability
    pub fn for_capability(&self, capability: Capability) -> impl Iterator<Item = &'static Service> + '_ {
        self.iter().filter(move |s| s.capability == capability)
    }

    /// Resolve a binding, checking the service provides the capability
    pub fn resolve(&self, capability: &str, binding: &ServiceBinding) -> Result<&'static Service> {
        let unknown = || Error::UnknownService {
            capability: capability.to_string(),
            subtype: binding.subtype.clone(),
        };
        let cap = Capability::parse(capability).ok_or_else(unknown)?;
        self.get(&binding.subtype)
            .filter(|s| s.capability == cap)
            .ok_or_else(unknown)
    }

    /// Descriptors a service contributes for a context type
    ///
    /// Unknown services contribute nothing.
    pub fn configurations_for(
        &self,
        subtype: &str,
        context_type: ContextType,
    ) -> &'static [&'static dyn Configuration] {
        self.get(subtype)
            .map(|s| s.configurations(context_type))
            .unwrap_or(&[])
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_binding_yaml_shape() {
        let binding = ServiceBinding::new("apache").with_property("port", 8080);
        let yaml = serde_yaml::to_string(&binding).unwrap();
        assert!(yaml.contains("type: apache"));
        assert!(yaml.contains("port: 8080"));

        let back: ServiceBinding = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, binding);
        assert_eq!(back.property_str("port").as_deref(), Some("8080"));
    }

    #[test]
    fn test_site_configurations_are_ordered() {
        let registry = ServiceRegistry::builtin();
        let ids: Vec<_> = registry
            .configurations_for("apache", ContextType::Site)
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(ids, vec!["apache.vhost", "drupal.services"]);
        assert!(registry
            .configurations_for("mysql", ContextType::Site)
            .is_empty());
        assert!(registry
            .configurations_for("nginx", ContextType::Server)
            .is_empty());
    }

    #[test]
    fn test_resolve_checks_capability() {
        let registry = ServiceRegistry::builtin();
        assert!(registry
            .resolve("http", &ServiceBinding::new("apache"))
            .is_ok());

        let err = registry
            .resolve("db", &ServiceBinding::new("apache"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownService);

        let err = registry
            .resolve("http", &ServiceBinding::new("nginx"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownService);
    }
}
