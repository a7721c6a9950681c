//! On-disk context registry
//!
//! One YAML file per context at `<config_path>/provision/<type>.<name>.yml`.
//! The file name is authoritative for both type and name.

use crate::context::{Context, ContextDocument, ContextType, construct};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "yml";

#[derive(Debug, Clone)]
pub struct ContextStore {
    root: PathBuf,
}

impl ContextStore {
    /// Store rooted at `<config_path>/provision`
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            root: config_path.as_ref().join("provision"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical file of a context
    pub fn path_for(&self, context_type: ContextType, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}.{}", context_type, name, EXTENSION))
    }

    /// Load every context whose file name ends in `<pattern>.yml`
    ///
    /// Entries are read in file-name order. A name claimed by two types keeps
    /// the first and logs the second.
    pub fn discover(&self, pattern: Option<&str>) -> Result<BTreeMap<String, Context>> {
        let mut contexts = BTreeMap::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(contexts),
            Err(e) => return Err(Error::io(&self.root, e)),
        };

        let suffix = format!("{}.{}", pattern.unwrap_or_default(), EXTENSION);
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&suffix) && !n.starts_with('.'))
            })
            .collect();
        paths.sort();

        for path in paths {
            let context = self.read(&path)?;
            if let Some(existing) = contexts.get(&context.name) {
                log::warn!(
                    "{} duplicates the name of {}, ignoring it",
                    context.identifier(),
                    existing.identifier()
                );
                continue;
            }
            contexts.insert(context.name.clone(), context);
        }
        Ok(contexts)
    }

    fn read(&self, path: &Path) -> Result<Context> {
        let identifier = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let (type_name, name) = split_identifier(identifier)?;

        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let doc: ContextDocument = if raw.trim().is_empty() {
            ContextDocument::default()
        } else {
            serde_yaml::from_str(&raw).map_err(|source| Error::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };
        construct(type_name, name, doc)
    }

    /// Load one context by name, whatever its type
    pub fn load(&self, name: &str) -> Result<Context> {
        self.discover(Some(name))?
            .remove(name)
            .ok_or_else(|| Error::ContextNotFound {
                name: name.to_string(),
            })
    }

    /// Every context, failing if there are none at all
    pub fn all(&self) -> Result<BTreeMap<String, Context>> {
        let contexts = self.discover(None)?;
        if contexts.is_empty() {
            return Err(Error::NoContextsFound);
        }
        Ok(contexts)
    }

    /// Server contexts only
    ///
    /// An empty registry is `NoContextsFound`; a registry with no servers
    /// is an empty map.
    pub fn all_servers(&self) -> Result<BTreeMap<String, Context>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|(_, c)| c.context_type() == ContextType::Server)
            .collect())
    }

    /// Labels for picking a server, `"<name>: <subtype>"`
    ///
    /// With a capability, servers without a binding for it are omitted.
    /// Without one, every server is listed with all of its bindings.
    pub fn server_options(&self, capability: Option<&str>) -> Result<BTreeMap<String, String>> {
        let servers = self.all_servers()?;
        Ok(servers
            .into_values()
            .filter_map(|server| {
                let label = match capability {
                    Some(cap) => server.services.get(cap)?.subtype.clone(),
                    None if server.services.is_empty() => return Some((server.name.clone(), server.name)),
                    None => server
                        .services
                        .values()
                        .map(|b| b.subtype.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                };
                Some((server.name.clone(), format!("{}: {}", server.name, label)))
            })
            .collect())
    }

    /// Persist a context, replacing any previous definition
    pub fn save(&self, context: &Context) -> Result<PathBuf> {
        context.validate()?;
        let path = self.path_for(context.context_type(), &context.name);
        let yaml = serde_yaml::to_string(&context.to_document()).map_err(|source| Error::Yaml {
            path: path.clone(),
            source,
        })?;

        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|e| Error::io(&path, e))?;
        tmp.write_all(yaml.as_bytes())
            .map_err(|e| Error::io(&path, e))?;
        tmp.persist(&path).map_err(|e| Error::io(&path, e.error))?;

        log::debug!("saved {}", path.display());
        Ok(path)
    }

    /// Whether the stored definition matches `context`, ignoring verification
    pub fn is_saved(&self, context: &Context) -> bool {
        let path = self.path_for(context.context_type(), &context.name);
        path.is_file()
            && self
                .read(&path)
                .is_ok_and(|stored| stored.same_definition(context))
    }

    /// Names of contexts that reference `name` as their parent
    pub fn dependents(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .discover(None)?
            .into_values()
            .filter(|c| c.parent() == Some(name))
            .map(|c| c.name)
            .collect())
    }

    /// Delete a context definition; refused while others depend on it
    pub fn remove(&self, name: &str) -> Result<PathBuf> {
        let context = self.load(name)?;
        let dependents = self.dependents(name)?;
        if !dependents.is_empty() {
            return Err(Error::HasDependents {
                name: name.to_string(),
                dependents,
            });
        }
        let path = self.path_for(context.context_type(), name);
        fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }
}

/// Split `<type>.<name>`, rejecting anything without exactly one dot
fn split_identifier(identifier: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = identifier.split('.').collect();
    match parts.as_slice() {
        [type_name, name] if !type_name.is_empty() && !name.is_empty() => Ok((type_name, name)),
        _ => Err(Error::parse(
            identifier,
            format!("expected <type>.<name>, found {} segment(s)", parts.len()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use crate::error::ErrorKind;
    use crate::service::ServiceBinding;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContextStore) {
        let tmp = TempDir::new().unwrap();
        let store = ContextStore::new(tmp.path());
        (tmp, store)
    }

    fn write_raw(store: &ContextStore, file: &str, content: &str) {
        fs::create_dir_all(store.root()).unwrap();
        fs::write(store.root().join(file), content).unwrap();
    }

    fn seed(store: &ContextStore) {
        let mut web1 = Context::server("web1").unwrap();
        web1.services
            .insert("http".into(), ServiceBinding::new("apache"));
        web1.services
            .insert("db".into(), ServiceBinding::new("mysql"));
        store.save(&web1).unwrap();

        let mut db1 = Context::server("db1").unwrap();
        db1.services
            .insert("db".into(), ServiceBinding::new("mysql"));
        store.save(&db1).unwrap();

        store
            .save(&Context::platform("d10", "web1", "/srv/d10").unwrap())
            .unwrap();
        store
            .save(&Context::site("example", "d10", "example.com").unwrap())
            .unwrap();
    }

    #[test]
    fn test_discover_keys_by_name() {
        let (_tmp, store) = store();
        seed(&store);

        let all = store.discover(None).unwrap();
        let names: Vec<_> = all.keys().cloned().collect();
        assert_eq!(names, vec!["d10", "db1", "example", "web1"]);
        assert_eq!(all["example"].context_type(), ContextType::Site);
        assert_eq!(all["d10"].context_type(), ContextType::Platform);
    }

    #[test]
    fn test_discover_with_pattern() {
        let (_tmp, store) = store();
        seed(&store);
        let found = store.discover(Some("example")).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("example"));
    }

    #[test]
    fn test_malformed_identifier_is_parse_error() {
        let (_tmp, store) = store();
        write_raw(&store, "site.example.com.yml", "platform: d10\n");
        let err = store.discover(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);

        let (_tmp, store) = self::store();
        write_raw(&store, "example.yml", "");
        let err = store.discover(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_unknown_type_fails_discovery() {
        let (_tmp, store) = store();
        write_raw(&store, "cluster.c1.yml", "");
        let err = store.discover(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownContextType);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_tmp, store) = store();
        seed(&store);
        let err = store.load("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextNotFound);
        assert_eq!(err.to_string(), "Context not found with name: nope");
    }

    #[test]
    fn test_empty_registry_vs_no_servers() {
        let (_tmp, store) = store();
        let err = store.all_servers().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoContextsFound);

        store
            .save(&Context::platform("d10", "web1", "/srv/d10").unwrap())
            .unwrap();
        assert!(store.all_servers().unwrap().is_empty());
    }

    #[test]
    fn test_server_options_omit_servers_without_service() {
        let (_tmp, store) = store();
        seed(&store);

        let http = store.server_options(Some("http")).unwrap();
        assert_eq!(http.len(), 1);
        assert_eq!(http["web1"], "web1: apache");

        let db = store.server_options(Some("db")).unwrap();
        assert_eq!(db["db1"], "db1: mysql");
        assert_eq!(db["web1"], "web1: mysql");

        let all = store.server_options(None).unwrap();
        assert_eq!(all["web1"], "web1: mysql, apache");
    }

    #[test]
    fn test_save_is_idempotent_and_loads_back() {
        let (_tmp, store) = store();
        let mut site = Context::site("example", "d10", "example.com").unwrap();
        site.configuration
            .insert("profile".into(), serde_yaml::Value::from("standard"));

        let first = store.save(&site).unwrap();
        let content = fs::read_to_string(&first).unwrap();
        let second = store.save(&site).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second).unwrap(), content);

        assert_eq!(store.load("example").unwrap(), site);
        assert!(store.is_saved(&site));

        site.configuration
            .insert("profile".into(), serde_yaml::Value::from("minimal"));
        assert!(!store.is_saved(&site));
    }

    #[test]
    fn test_save_rejects_edited_uri() {
        let (_tmp, store) = store();
        let mut site = Context::site("example", "d10", "example.com").unwrap();
        if let ContextKind::Site(s) = &mut site.kind {
            s.uri = "../../outside".into();
        }
        let err = store.save(&site).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        assert!(!store.root().join("site.example.yml").exists());
    }

    #[test]
    fn test_remove_refuses_with_dependents() {
        let (_tmp, store) = store();
        seed(&store);

        let err = store.remove("d10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HasDependents);

        store.remove("example").unwrap();
        store.remove("d10").unwrap();
        assert_eq!(
            store.load("d10").unwrap_err().kind(),
            ErrorKind::ContextNotFound
        );
    }

    #[test]
    fn test_removed_parent_is_detectable() {
        let (_tmp, store) = store();
        seed(&store);
        fs::remove_file(store.path_for(ContextType::Platform, "d10")).unwrap();

        let site = store.load("example").unwrap();
        let err = store.load(site.parent().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextNotFound);
    }
}
