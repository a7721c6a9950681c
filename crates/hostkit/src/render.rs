//! Template rendering
//!
//! Text templates use `{{ dotted.key }}` placeholders looked up in the merged
//! data. A placeholder naming a missing or non-scalar value is an error: a
//! half-rendered configuration file is worse than none.

use crate::error::{Error, Result};
use serde_yaml::Value;

/// Turns merged data into file content
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, data: &Value) -> Result<String>;
}

enum Template {
    Text(&'static str),
    /// The data itself, dumped as YAML
    Yaml,
}

const APACHE_SERVER: &str = "\
# Apache configuration for server {{ server.name }} ({{ server.remote_host }})
# Generated by provision; changes will be overwritten.

Listen {{ http.port }}

IncludeOptional {{ http.platform_dir }}/*.conf
IncludeOptional {{ http.vhost_dir }}/*
";

const APACHE_PLATFORM: &str = "\
# Platform {{ platform.name }}
<Directory {{ platform.root }}>
  Options FollowSymLinks
  AllowOverride All
  Require all granted
</Directory>
";

const APACHE_VHOST: &str = "\
<VirtualHost *:{{ http.port }}>
  ServerName {{ site.uri }}
  DocumentRoot {{ platform.root }}

  SetEnv db_name {{ site.name }}

  <Directory {{ site.path }}/files>
    Options None
    SetHandler This_is_a_Drupal_security_line_do_not_remove
  </Directory>
</VirtualHost>
";

const MYSQL_CLIENT: &str = "\
[client]
host={{ db.host }}
port={{ db.port }}
user={{ db.user }}
";

const TEMPLATES: &[(&str, Template)] = &[
    ("apache_server", Template::Text(APACHE_SERVER)),
    ("apache_platform", Template::Text(APACHE_PLATFORM)),
    ("apache_vhost", Template::Text(APACHE_VHOST)),
    ("drupal_services", Template::Yaml),
    ("mysql_client", Template::Text(MYSQL_CLIENT)),
];

/// Renderer for the built-in templates
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

impl Renderer for TemplateRenderer {
    fn render(&self, template: &str, data: &Value) -> Result<String> {
        let (_, kind) = TEMPLATES
            .iter()
            .find(|(id, _)| *id == template)
            .ok_or_else(|| Error::render(template, "unknown template"))?;

        match kind {
            Template::Yaml => serde_yaml::to_string(data).map_err(|e| Error::render(template, e)),
            Template::Text(text) => substitute(template, text, data),
        }
    }
}

fn substitute(template: &str, text: &str, data: &Value) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::render(template, "unterminated placeholder"))?;
        let key = after[..end].trim();
        out.push_str(&scalar(template, key, lookup(data, key))?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Walk a dotted path, preferring a literal key with dots when present
fn lookup<'a>(data: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(v) = data.get(key) {
        return Some(v);
    }
    let (head, tail) = key.split_once('.')?;
    lookup(data.get(head)?, tail)
}

fn scalar(template: &str, key: &str, value: Option<&Value>) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| scalar(template, key, Some(item)))
            .collect::<Result<Vec<_>>>()
            .map(|parts| parts.join(" ")),
        Some(_) => Err(Error::render(template, format!("'{}' is not a scalar", key))),
        None => Err(Error::render(template, format!("missing key '{}'", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_substitutes_dotted_keys() {
        let data = yaml("db: {host: localhost, port: 3306, user: aegir}");
        let out = TemplateRenderer.render("mysql_client", &data).unwrap();
        assert_eq!(out, "[client]\nhost=localhost\nport=3306\nuser=aegir\n");
    }

    #[test]
    fn test_missing_key_is_render_error() {
        let err = TemplateRenderer
            .render("mysql_client", &yaml("db: {host: localhost}"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RenderError);
        assert!(err.to_string().contains("db.port"));
    }

    #[test]
    fn test_yaml_template_dumps_data() {
        let data = yaml("parameters: {renderer.config: {auto_placeholder_conditions: {max-age: 0}}}");
        let out = TemplateRenderer.render("drupal_services", &data).unwrap();
        let back: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_literal_dotted_key_wins() {
        let data = yaml("renderer.config: x\nrenderer: {config: y}");
        assert_eq!(lookup(&data, "renderer.config"), Some(&Value::from("x")));
    }

    #[test]
    fn test_unknown_template() {
        let err = TemplateRenderer.render("nginx_vhost", &Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RenderError);
    }
}
