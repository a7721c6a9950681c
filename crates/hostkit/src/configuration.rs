//! Configuration descriptors
//!
//! A descriptor knows where one configuration file lives, what data it is
//! rendered from and which extension hook may alter that data. Descriptors
//! are stateless; everything context-specific comes in through the
//! [`Scope`].

use crate::error::Result;
use crate::scope::Scope;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::PathBuf;

/// Default permission bits of generated files
pub const DEFAULT_MODE: u32 = 0o440;

const DEFAULT_HTTP_PORT: u64 = 80;
const DEFAULT_DB_PORT: u64 = 3306;

pub trait Configuration: Send + Sync + fmt::Debug {
    /// Stable id, `<service>.<file>`
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Template used to render the merged data
    fn template(&self) -> &'static str;

    /// Extension hook fired with the default data, if any
    fn hook(&self) -> Option<&'static str> {
        None
    }

    fn mode(&self) -> u32 {
        DEFAULT_MODE
    }

    /// Data before extensions have had their say
    fn default_data(&self, scope: &Scope) -> Result<Value>;

    /// Absolute destination of the rendered file
    fn target_path(&self, scope: &Scope) -> Result<PathBuf>;
}

/// Build a mapping from string keys
fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
    let mut mapping = Mapping::new();
    for (k, v) in entries {
        mapping.insert(Value::from(k), v);
    }
    Value::Mapping(mapping)
}

fn path_value(path: &std::path::Path) -> Value {
    Value::from(path.display().to_string())
}

fn http_port(scope: &Scope) -> Value {
    scope
        .binding("http")
        .and_then(|b| b.property("port").cloned())
        .unwrap_or_else(|| Value::from(DEFAULT_HTTP_PORT))
}

fn apache_dir(scope: &Scope) -> Result<PathBuf> {
    Ok(scope.server_fields()?.config_dir.join("apache"))
}

#[derive(Debug)]
pub struct ApacheServerConfig;

impl Configuration for ApacheServerConfig {
    fn id(&self) -> &'static str {
        "apache.server"
    }

    fn description(&self) -> &'static str {
        "Apache server configuration"
    }

    fn template(&self) -> &'static str {
        "apache_server"
    }

    fn hook(&self) -> Option<&'static str> {
        Some("provision_apache_server_config")
    }

    fn default_data(&self, scope: &Scope) -> Result<Value> {
        let server = scope.server_fields()?;
        let apache = apache_dir(scope)?;
        Ok(map([
            (
                "server",
                map([
                    ("name", Value::from(scope.server.name.as_str())),
                    ("remote_host", Value::from(server.remote_host.as_str())),
                    ("web_group", Value::from(server.web_group.as_str())),
                    ("script_user", Value::from(server.script_user.as_str())),
                ]),
            ),
            (
                "http",
                map([
                    ("port", http_port(scope)),
                    ("platform_dir", path_value(&apache.join("platform.d"))),
                    ("vhost_dir", path_value(&apache.join("vhost.d"))),
                ]),
            ),
        ]))
    }

    fn target_path(&self, scope: &Scope) -> Result<PathBuf> {
        Ok(scope.server_fields()?.config_dir.join("apache.conf"))
    }
}

#[derive(Debug)]
pub struct ApachePlatformConfig;

impl Configuration for ApachePlatformConfig {
    fn id(&self) -> &'static str {
        "apache.platform"
    }

    fn description(&self) -> &'static str {
        "Apache platform configuration"
    }

    fn template(&self) -> &'static str {
        "apache_platform"
    }

    fn hook(&self) -> Option<&'static str> {
        Some("provision_apache_dir_config")
    }

    fn default_data(&self, scope: &Scope) -> Result<Value> {
        let platform = scope.platform_fields()?;
        Ok(map([
            (
                "platform",
                map([
                    ("name", Value::from(scope.target.name.as_str())),
                    ("root", path_value(&platform.root)),
                ]),
            ),
            ("server", map([("script_user", Value::from(scope.server_fields()?.script_user.as_str()))])),
        ]))
    }

    fn target_path(&self, scope: &Scope) -> Result<PathBuf> {
        Ok(apache_dir(scope)?
            .join("platform.d")
            .join(format!("{}.conf", scope.target.name)))
    }
}

#[derive(Debug)]
pub struct ApacheVhostConfig;

impl Configuration for ApacheVhostConfig {
    fn id(&self) -> &'static str {
        "apache.vhost"
    }

    fn description(&self) -> &'static str {
        "Apache virtual host"
    }

    fn template(&self) -> &'static str {
        "apache_vhost"
    }

    fn hook(&self) -> Option<&'static str> {
        Some("provision_apache_vhost_config")
    }

    fn default_data(&self, scope: &Scope) -> Result<Value> {
        let platform = scope.platform_fields()?;
        Ok(map([
            (
                "site",
                map([
                    ("name", Value::from(scope.target.name.as_str())),
                    ("uri", Value::from(scope.uri())),
                    ("path", path_value(&scope.site_path()?)),
                ]),
            ),
            ("platform", map([("root", path_value(&platform.root))])),
            ("http", map([("port", http_port(scope))])),
        ]))
    }

    fn target_path(&self, scope: &Scope) -> Result<PathBuf> {
        Ok(apache_dir(scope)?.join("vhost.d").join(scope.uri()))
    }
}

/// Drupal `services.yml` for a site
///
/// Written into the site directory itself, so it is the one artifact whose
/// location depends on the platform root rather than the server.
#[derive(Debug)]
pub struct DrupalServicesConfig;

impl Configuration for DrupalServicesConfig {
    fn id(&self) -> &'static str {
        "drupal.services"
    }

    fn description(&self) -> &'static str {
        "Drupal services.yml"
    }

    fn template(&self) -> &'static str {
        "drupal_services"
    }

    fn hook(&self) -> Option<&'static str> {
        Some("provision_drupal_services")
    }

    fn default_data(&self, _scope: &Scope) -> Result<Value> {
        let contexts = [
            "languages:language_interface",
            "theme",
            "user.permissions",
            "url.path",
        ];
        Ok(map([(
            "parameters",
            map([(
                "renderer.config",
                map([
                    (
                        "required_cache_contexts",
                        Value::Sequence(contexts.iter().map(|c| Value::from(*c)).collect()),
                    ),
                    (
                        "auto_placeholder_conditions",
                        map([
                            ("max-age", Value::from(0)),
                            (
                                "contexts",
                                Value::Sequence(vec![Value::from("session"), Value::from("user")]),
                            ),
                            ("tags", Value::Sequence(Vec::new())),
                        ]),
                    ),
                ]),
            )]),
        )]))
    }

    fn target_path(&self, scope: &Scope) -> Result<PathBuf> {
        Ok(scope.site_path()?.join("services.yml"))
    }
}

#[derive(Debug)]
pub struct MysqlClientConfig;

impl Configuration for MysqlClientConfig {
    fn id(&self) -> &'static str {
        "mysql.client"
    }

    fn description(&self) -> &'static str {
        "MySQL client defaults"
    }

    fn template(&self) -> &'static str {
        "mysql_client"
    }

    fn hook(&self) -> Option<&'static str> {
        Some("provision_mysql_client_config")
    }

    fn default_data(&self, scope: &Scope) -> Result<Value> {
        let binding = scope.binding("db");
        let port = binding
            .and_then(|b| b.property("port").cloned())
            .unwrap_or_else(|| Value::from(DEFAULT_DB_PORT));
        let host = binding
            .and_then(|b| b.property_str("host"))
            .unwrap_or_else(|| scope.server_fields().map(|s| s.remote_host.clone()).unwrap_or_default());
        let user = binding
            .and_then(|b| b.property_str("user"))
            .unwrap_or_else(|| "root".to_string());
        Ok(map([(
            "db",
            map([
                ("host", Value::from(host)),
                ("port", port),
                ("user", Value::from(user)),
            ]),
        )]))
    }

    fn target_path(&self, scope: &Scope) -> Result<PathBuf> {
        Ok(scope
            .server_fields()?
            .config_dir
            .join("mysql")
            .join("client.cnf"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::service::ServiceBinding;
    use std::collections::BTreeMap;

    fn site_scope() -> Scope {
        let mut server = Context::server("web1").unwrap();
        server
            .services
            .insert("http".into(), ServiceBinding::new("apache"));
        let platform = Context::platform("d10", "web1", "/srv/d10").unwrap();
        let site = Context::site("example", "d10", "example.com").unwrap();
        let contexts: BTreeMap<_, _> = [server, platform, site.clone()]
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Scope::resolve(&contexts, &site).unwrap()
    }

    #[test]
    fn test_drupal_services_path_and_defaults() {
        let scope = site_scope();
        let config = DrupalServicesConfig;
        assert_eq!(
            config.target_path(&scope).unwrap(),
            PathBuf::from("/srv/d10/sites/example.com/services.yml")
        );
        assert_eq!(config.mode(), 0o440);

        let data = config.default_data(&scope).unwrap();
        let renderer = &data["parameters"]["renderer.config"];
        assert_eq!(renderer["auto_placeholder_conditions"]["max-age"], Value::from(0));
        assert_eq!(
            renderer["required_cache_contexts"][0],
            Value::from("languages:language_interface")
        );
    }

    #[test]
    fn test_vhost_is_named_after_uri() {
        let scope = site_scope();
        assert_eq!(
            ApacheVhostConfig.target_path(&scope).unwrap(),
            PathBuf::from("/var/aegir/config/server_web1/apache/vhost.d/example.com")
        );
        let data = ApacheVhostConfig.default_data(&scope).unwrap();
        assert_eq!(data["http"]["port"], Value::from(80));
    }
}
