//! Scope resolution: a target plus the contexts above it
//!
//! Every configuration descriptor is evaluated against a [`Scope`], which
//! carries the target, its platform (for sites and platforms) and its
//! hosting server, together with the effective service bindings.

use crate::context::{Context, ContextType, Platform, Server, Site};
use crate::error::{Error, Result};
use crate::service::ServiceBinding;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Scope {
    pub target: Context,
    pub platform: Option<Context>,
    pub server: Context,
    /// Server bindings overridden by platform then site bindings
    pub bindings: BTreeMap<String, ServiceBinding>,
}

impl Scope {
    /// Resolve the chain of parents of `target` among `contexts`
    pub fn resolve(contexts: &BTreeMap<String, Context>, target: &Context) -> Result<Self> {
        let lookup = |name: &str, expected: ContextType| -> Result<Context> {
            let ctx = contexts.get(name).ok_or_else(|| Error::ContextNotFound {
                name: name.to_string(),
            })?;
            if ctx.context_type() != expected {
                return Err(Error::invalid(
                    &target.name,
                    format!("'{}' is a {}, expected a {}", name, ctx.context_type(), expected),
                ));
            }
            Ok(ctx.clone())
        };

        let (platform, server) = match target.context_type() {
            ContextType::Server => (None, target.clone()),
            ContextType::Platform => {
                let parent = target.parent().unwrap_or_default();
                (Some(target.clone()), lookup(parent, ContextType::Server)?)
            }
            ContextType::Site => {
                let platform = lookup(target.parent().unwrap_or_default(), ContextType::Platform)?;
                let server = lookup(platform.parent().unwrap_or_default(), ContextType::Server)?;
                (Some(platform), server)
            }
        };

        let mut bindings = server.services.clone();
        if let Some(platform) = &platform
            && platform.name != server.name
        {
            bindings.extend(platform.services.clone());
        }
        if target.context_type() == ContextType::Site {
            bindings.extend(target.services.clone());
        }

        Ok(Self {
            target: target.clone(),
            platform,
            server,
            bindings,
        })
    }

    pub fn context_type(&self) -> ContextType {
        self.target.context_type()
    }

    /// Hosting server fields
    pub fn server_fields(&self) -> Result<&Server> {
        self.server
            .as_server()
            .ok_or_else(|| Error::invalid(&self.server.name, "not a server"))
    }

    pub fn platform_fields(&self) -> Result<&Platform> {
        self.platform
            .as_ref()
            .and_then(Context::as_platform)
            .ok_or_else(|| Error::invalid(&self.target.name, "no platform in scope"))
    }

    pub fn site_fields(&self) -> Result<&Site> {
        self.target
            .as_site()
            .ok_or_else(|| Error::invalid(&self.target.name, "not a site"))
    }

    pub fn uri(&self) -> &str {
        self.target.uri()
    }

    /// Group generated files are owned by
    pub fn web_group(&self) -> Result<&str> {
        Ok(&self.server_fields()?.web_group)
    }

    pub fn binding(&self, capability: &str) -> Option<&ServiceBinding> {
        self.bindings.get(capability)
    }

    /// `<platform root>/sites/<uri>` for a site
    pub fn site_path(&self) -> Result<PathBuf> {
        let site = self.site_fields()?;
        Ok(self.platform_fields()?.root.join("sites").join(&site.uri))
    }
}
