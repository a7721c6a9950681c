//! Extension hooks
//!
//! Before a configuration file is rendered, its default data is offered to
//! every registered [`Contributor`] under the descriptor's hook name.
//! Contributors run in registration order. A failing contributor is logged
//! and ignored; it never fails the artifact.

use crate::error::Error;
use crate::merge::{is_empty, merge_contribution};
use crate::process;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a contributor returned for one hook invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    Empty,
    Tree(Value),
}

impl Contribution {
    /// Normalise an empty tree to `Empty`
    pub fn from_value(value: Value) -> Self {
        if is_empty(&value) {
            Self::Empty
        } else {
            Self::Tree(value)
        }
    }
}

/// An extension that can contribute to configuration data
pub trait Contributor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Return data to merge into the hook's tree
    fn contribute(&self, _hook: &str, _uri: &str, _data: &Value) -> anyhow::Result<Contribution> {
        Ok(Contribution::Empty)
    }

    /// Mutate the tree directly; only used under [`MergePolicy::Mutate`]
    ///
    /// Returns whether the tree was touched.
    fn alter(&self, _hook: &str, _uri: &str, _data: &mut Value) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// How contributions are combined with the default data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// The last non-empty contribution replaces the data wholesale
    Replace,
    /// Contributions are deep-merged in registration order
    #[default]
    Deep,
    /// Contributors receive the tree by mutable reference
    Mutate,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Deep => "deep",
            Self::Mutate => "mutate",
        })
    }
}

/// One contributor's answer to a hook
#[derive(Debug)]
pub struct ContributorResult {
    pub contributor: String,
    pub result: Result<Contribution, Error>,
}

/// Summary of applying a hook to a data tree
#[derive(Debug, Default)]
pub struct HookReport {
    /// Contributors whose data was applied
    pub applied: Vec<String>,
    /// Contributor failures, isolated from the artifact
    pub errors: Vec<Error>,
}

/// Registry of contributors plus the merge policy
#[derive(Debug, Default, Clone)]
pub struct ExtensionHookBus {
    contributors: Vec<Arc<dyn Contributor>>,
    policy: MergePolicy,
}

impl ExtensionHookBus {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            contributors: Vec::new(),
            policy,
        }
    }

    pub fn register(&mut self, contributor: Arc<dyn Contributor>) {
        self.contributors.push(contributor);
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.contributors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributors.is_empty()
    }

    /// Ask every contributor, in registration order
    pub fn invoke(&self, hook: &str, uri: &str, data: &Value) -> Vec<ContributorResult> {
        self.contributors
            .iter()
            .map(|c| ContributorResult {
                contributor: c.name().to_string(),
                result: c
                    .contribute(hook, uri, data)
                    .map_err(|e| hook_error(c.name(), hook, &e)),
            })
            .collect()
    }

    /// Fire `hook` and fold the contributions into `data`
    pub fn apply(&self, hook: &str, uri: &str, data: &mut Value) -> HookReport {
        let mut report = HookReport::default();

        if self.policy == MergePolicy::Mutate {
            for c in &self.contributors {
                match c.alter(hook, uri, data) {
                    Ok(true) => report.applied.push(c.name().to_string()),
                    Ok(false) => {}
                    Err(e) => report.errors.push(hook_error(c.name(), hook, &e)),
                }
            }
        } else {
            for answer in self.invoke(hook, uri, data) {
                match answer.result {
                    Ok(Contribution::Empty) => {}
                    Ok(Contribution::Tree(tree)) => {
                        let applied = match self.policy {
                            MergePolicy::Replace => {
                                *data = tree;
                                true
                            }
                            _ => merge_contribution(data, tree),
                        };
                        if applied {
                            report.applied.push(answer.contributor);
                        }
                    }
                    Err(e) => report.errors.push(e),
                }
            }
        }

        for e in &report.errors {
            log::warn!("{}", e);
        }
        report
    }
}

fn hook_error(contributor: &str, hook: &str, err: &anyhow::Error) -> Error {
    Error::ExtensionHook {
        contributor: contributor.to_string(),
        hook: hook.to_string(),
        message: format!("{:#}", err),
    }
}

/// A contributor backed by an external command
///
/// The command runs through `sh -c` with the data as JSON on stdin and
/// `PROVISION_HOOK` / `PROVISION_URI` in its environment. Its stdout is
/// parsed as YAML (JSON is valid YAML); blank output contributes nothing.
/// Under [`MergePolicy::Mutate`] the printed tree is the altered data and
/// replaces it.
#[derive(Debug, Clone)]
pub struct CommandContributor {
    pub name: String,
    /// Only this hook is answered
    pub hook: String,
    pub command: String,
    pub timeout: Duration,
}

impl Contributor for CommandContributor {
    fn name(&self) -> &str {
        &self.name
    }

    fn contribute(&self, hook: &str, uri: &str, data: &Value) -> anyhow::Result<Contribution> {
        if hook != self.hook {
            return Ok(Contribution::Empty);
        }
        self.run(hook, uri, data).map(Contribution::from_value)
    }

    fn alter(&self, hook: &str, uri: &str, data: &mut Value) -> anyhow::Result<bool> {
        if hook != self.hook {
            return Ok(false);
        }
        let altered = self.run(hook, uri, data)?;
        if is_empty(&altered) {
            return Ok(false);
        }
        *data = altered;
        Ok(true)
    }
}

impl CommandContributor {
    /// Run the command over `data`; blank output is `Null`
    fn run(&self, hook: &str, uri: &str, data: &Value) -> anyhow::Result<Value> {
        let input = serde_json::to_vec(data).context("Failed to encode hook data")?;
        let out = process::run_shell(
            &self.command,
            &[("PROVISION_HOOK", hook), ("PROVISION_URI", uri)],
            Some(&input),
            self.timeout,
        )?;
        process::check(&out)?;

        if out.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_yaml::from_str(&out.stdout).context("Hook output is not valid YAML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[derive(Debug)]
    struct Fixed(&'static str, &'static str);

    impl Contributor for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn contribute(&self, _hook: &str, _uri: &str, _data: &Value) -> anyhow::Result<Contribution> {
            Ok(Contribution::from_value(yaml(self.1)))
        }

        fn alter(&self, _hook: &str, _uri: &str, data: &mut Value) -> anyhow::Result<bool> {
            data["altered_by"] = Value::from(self.0);
            Ok(true)
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl Contributor for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn contribute(&self, _hook: &str, _uri: &str, _data: &Value) -> anyhow::Result<Contribution> {
            anyhow::bail!("database unreachable")
        }
    }

    fn bus(policy: MergePolicy, contributors: Vec<Arc<dyn Contributor>>) -> ExtensionHookBus {
        let mut bus = ExtensionHookBus::new(policy);
        for c in contributors {
            bus.register(c);
        }
        bus
    }

    #[test]
    fn test_invoke_preserves_registration_order() {
        let bus = bus(
            MergePolicy::Deep,
            vec![Arc::new(Fixed("a", "x: 1")), Arc::new(Broken), Arc::new(Fixed("c", "{}"))],
        );
        let results = bus.invoke("h", "example.com", &Value::Null);
        let names: Vec<_> = results.iter().map(|r| r.contributor.as_str()).collect();
        assert_eq!(names, vec!["a", "broken", "c"]);
        assert!(results[1].result.is_err());
        assert_eq!(results[2].result.as_ref().unwrap(), &Contribution::Empty);
    }

    #[test]
    fn test_deep_merge_policy() {
        let bus = bus(
            MergePolicy::Deep,
            vec![Arc::new(Fixed("a", "p: {a: 10}")), Arc::new(Fixed("b", "p: {c: 3}"))],
        );
        let mut data = yaml("p: {a: 1, b: 2}");
        let report = bus.apply("h", "u", &mut data);
        assert_eq!(data, yaml("p: {a: 10, b: 2, c: 3}"));
        assert_eq!(report.applied, vec!["a", "b"]);
    }

    #[test]
    fn test_failing_contributor_is_isolated() {
        let bus = bus(
            MergePolicy::Deep,
            vec![Arc::new(Broken), Arc::new(Fixed("ok", "extra: true"))],
        );
        let mut data = yaml("base: 1");
        let report = bus.apply("provision_drupal_services", "example.com", &mut data);
        assert_eq!(data, yaml("base: 1\nextra: true"));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind(), ErrorKind::ExtensionHookError);
    }

    #[test]
    fn test_replace_policy_takes_last_tree() {
        let bus = bus(
            MergePolicy::Replace,
            vec![Arc::new(Fixed("a", "x: 1")), Arc::new(Fixed("b", "y: 2"))],
        );
        let mut data = yaml("z: 0");
        bus.apply("h", "u", &mut data);
        assert_eq!(data, yaml("y: 2"));
    }

    #[test]
    fn test_mutate_policy_uses_alter() {
        let bus = bus(MergePolicy::Mutate, vec![Arc::new(Fixed("a", "x: 1"))]);
        let mut data = yaml("z: 0");
        bus.apply("h", "u", &mut data);
        assert_eq!(data, yaml("z: 0\naltered_by: a"));
    }

    #[test]
    fn test_command_contributor() {
        let contributor = CommandContributor {
            name: "cache".into(),
            hook: "provision_drupal_services".into(),
            command: "cat >/dev/null; echo \"uri: $PROVISION_URI\"".into(),
            timeout: Duration::from_secs(5),
        };
        let out = contributor
            .contribute("provision_drupal_services", "example.com", &yaml("a: 1"))
            .unwrap();
        assert_eq!(out, Contribution::Tree(yaml("uri: example.com")));

        let other = contributor
            .contribute("provision_apache_vhost_config", "example.com", &Value::Null)
            .unwrap();
        assert_eq!(other, Contribution::Empty);
    }

    #[test]
    fn test_mutate_policy_runs_command_contributors() {
        let bus = bus(
            MergePolicy::Mutate,
            vec![
                Arc::new(CommandContributor {
                    name: "redis".into(),
                    hook: "h".into(),
                    command: "cat >/dev/null; printf 'base: 1\\nextra: 1\\n'".into(),
                    timeout: Duration::from_secs(5),
                }),
                Arc::new(CommandContributor {
                    name: "elsewhere".into(),
                    hook: "other".into(),
                    command: "echo 'wiped: true'".into(),
                    timeout: Duration::from_secs(5),
                }),
            ],
        );
        let mut data = yaml("base: 1");
        let report = bus.apply("h", "example.com", &mut data);
        assert_eq!(data, yaml("base: 1\nextra: 1"));
        assert_eq!(report.applied, vec!["redis"]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_command_contributor_blank_output_is_empty() {
        let contributor = CommandContributor {
            name: "quiet".into(),
            hook: "h".into(),
            command: "cat >/dev/null".into(),
            timeout: Duration::from_secs(5),
        };
        let out = contributor.contribute("h", "u", &yaml("a: 1")).unwrap();
        assert_eq!(out, Contribution::Empty);
    }
}
