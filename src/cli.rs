//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::format::OutputFormat;

/// Plan/apply for Jenkins jobs
///
/// jjm renders your Jenkins Job Builder definitions, compares them with the
/// jobs live on a Jenkins server and shows what would change. Nothing on the
/// server changes until you run 'apply' and confirm.
///
/// QUICK START:
///
///   # Point jjm at your server (or pass --url)
///   printf '[jenkins]\nurl = "https://jenkins.example.com"\n' > jjm.toml
///   jjm login
///
///   jjm check          # do the definitions render?
///   jjm plan           # what would change?
///   jjm apply          # make it so (asks first)
///
/// Jobs that exist only on the server show up as deletes. Run 'jjm import'
/// to pull them into local definitions instead.
#[derive(Parser, Debug)]
#[command(name = "jjm")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'jjm <command> --help' for more information on a specific command.")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options accepted by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Run as if jjm was started in DIR
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Jenkins URL (overrides jenkins.url in jjm.toml)
    #[arg(long, global = true, env = "JJM_URL", value_name = "URL")]
    pub url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render definitions and validate them locally
    ///
    /// Never contacts the server.
    Check(CheckArgs),

    /// Show the changes apply would make
    ///
    /// Exits 0 whenever a plan was computed, even with pending changes,
    /// unless --detailed-exitcode is given.
    Plan(PlanArgs),

    /// Apply the plan to the server
    ///
    /// Shows the plan and asks for confirmation before changing anything.
    /// One job failing does not stop the others; the exit code is non-zero
    /// if any job failed.
    Apply(ApplyArgs),

    /// Save jobs that exist only on the server as local raw definitions
    ///
    /// Each job's config is written to <name>.xml and referenced from
    /// raw_xml_jobs.yaml. Existing files are never overwritten.
    Import(ImportArgs),

    /// Store credentials for the configured server
    ///
    /// Prompts for a username and API token, checks them against the server
    /// and saves them in the per-user credentials file.
    Login,
}

/// `--target` job selection.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Only consider jobs whose name matches GLOB (repeatable)
    #[arg(long = "target", short = 't', value_name = "GLOB")]
    pub targets: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PlanArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output format: text, json or yaml
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Show one line instead of the full config for creates and deletes
    #[arg(long)]
    pub summarize: bool,

    /// Exit 2 when changes are pending
    #[arg(long)]
    pub detailed_exitcode: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Do not ask for confirmation
    #[arg(short = 'y', long, visible_alias = "auto-approve")]
    pub yes: bool,

    /// Leave jobs that exist only on the server in place
    #[arg(long)]
    pub skip_deletes: bool,

    /// Maximum concurrent server calls (overrides jenkins.concurrency)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Show one line instead of the full config for creates and deletes
    #[arg(long)]
    pub summarize: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ImportArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}
