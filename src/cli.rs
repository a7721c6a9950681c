use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "provision")]
#[command(version)]
#[command(about = "Provision hosting servers, platforms and sites", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Context to act on (repeatable)
    #[arg(short = 't', long = "target", global = true)]
    pub targets: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update a context definition
    Save(SaveArgs),

    /// Regenerate and write the configuration of the targets
    Verify(VerifyArgs),

    /// Show declared configuration and the last verification
    Status(StatusArgs),

    /// Manage service bindings
    #[command(subcommand)]
    Services(ServicesCommand),

    /// Delete context definitions
    Remove {
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ContextTypeArg {
    Server,
    Platform,
    Site,
}

impl From<ContextTypeArg> for hostkit::ContextType {
    fn from(arg: ContextTypeArg) -> Self {
        match arg {
            ContextTypeArg::Server => Self::Server,
            ContextTypeArg::Platform => Self::Platform,
            ContextTypeArg::Site => Self::Site,
        }
    }
}

#[derive(Args)]
pub struct SaveArgs {
    /// Context type (asked for when missing)
    #[arg(long = "type", value_enum)]
    pub context_type: Option<ContextTypeArg>,

    /// Hosting server (platforms)
    #[arg(long)]
    pub server: Option<String>,

    /// Platform the site runs on (sites)
    #[arg(long)]
    pub platform: Option<String>,

    /// Code base root (platforms)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Site URI, defaults to the name (sites)
    #[arg(long)]
    pub uri: Option<String>,

    /// Host name (servers)
    #[arg(long)]
    pub remote_host: Option<String>,

    /// Group owning generated files (servers)
    #[arg(long)]
    pub web_group: Option<String>,

    /// User that runs provisioning scripts (servers)
    #[arg(long)]
    pub script_user: Option<String>,

    /// Where service configuration is written (servers)
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Service binding, e.g. `http=apache` (repeatable)
    #[arg(long = "service", value_name = "CAPABILITY=SUBTYPE")]
    pub services: Vec<String>,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Targets verified in parallel (defaults to the configured value)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Show what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Stop starting new targets after the first failure
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ServicesCommand {
    /// List known services, or the bindings of the targets
    List,

    /// Bind a capability of the target to a service
    Add {
        /// Capability: http or db
        capability: String,

        /// Service subtype, e.g. apache
        subtype: String,

        /// Binding property, e.g. `port=8080` (repeatable)
        #[arg(short, long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
    },

    /// Remove a capability binding from the target
    Remove {
        /// Capability: http or db
        capability: String,
    },
}

/// Split `key=value`
pub fn parse_pair(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some((key, value.trim()))
}
