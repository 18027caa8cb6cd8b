//! CLI surface for tfsync.
//!
//! Thin handlers over the library: argument parsing and rendering live
//! here, behavior lives in the components. Exit codes: 0 ok, 1 invalid
//! arguments or failed preconditions, 2 exception, 3 lock not acquired.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::{Error, Result};

mod commands;
mod render;

// =============================================================================
// Entry + global options
// =============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "tfsync",
    version,
    about = "Bidirectional TFVC <-> git synchronization engine",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Workspace directory (default: current directory).
    #[arg(long, global = true, value_name = "PATH")]
    pub workspace_root: Option<PathBuf>,

    /// Workspace name: the unit of mutual exclusion across agents
    /// (default: the workspace directory's name).
    #[arg(long, global = true, value_name = "NAME")]
    pub workspace_name: Option<String>,

    /// Machine-readable JSON output.
    #[arg(
        long,
        global = true,
        default_value_t = false,
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub json: bool,

    /// Errors only.
    #[arg(
        short = 'q',
        long,
        global = true,
        default_value_t = false,
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub quiet: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a sync: fetch from TFVC, merge, check in, push.
    Sync(SyncArgs),

    /// Prepare a workspace: remote descriptor, notes refspecs, gitignore seed.
    #[command(name = "init-workspace")]
    InitWorkspace(InitArgs),

    /// Show lock state and remote watermarks.
    Status,

    /// Remove the workspace lock regardless of owner.
    #[command(name = "force-unlock")]
    ForceUnlock,

    /// Re-derive missing bindings from legacy commit-message trailers.
    #[command(name = "repair-notes")]
    RepairNotes(RepairArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only fetch TFVC changesets into git.
    #[arg(long, conflicts_with = "to_tfvc")]
    pub from_tfvc: bool,

    /// Only replay git commits onto TFVC.
    #[arg(long)]
    pub to_tfvc: bool,

    /// Narrate every step without mutating git, TFVC, or the remote.
    #[arg(long)]
    pub dry_run: bool,

    /// TFVC remote id.
    #[arg(long, default_value = "default", value_name = "ID")]
    pub remote: String,

    /// Seconds to wait for the workspace lock.
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub lock_timeout: u64,

    /// Seconds after which a lock counts as abandoned.
    #[arg(long, value_name = "SECONDS", default_value_t = 7200)]
    pub max_lock_age: u64,

    /// Skip locking entirely. Dangerous with more than one agent.
    #[arg(long)]
    pub no_lock: bool,

    /// Evict any existing lock before acquiring.
    #[arg(long)]
    pub force_unlock: bool,

    /// Explicit lock file path.
    #[arg(long, value_name = "PATH")]
    pub lock_file: Option<PathBuf>,

    /// Check everything in as this TFVC account.
    #[arg(long, value_name = "ACCOUNT")]
    pub author: Option<String>,

    /// Map git identities to TFVC accounts (`Name <email> = DOMAIN\account`).
    #[arg(long, value_name = "PATH")]
    pub authors_file: Option<PathBuf>,

    /// Check merge commits in as plain content when the merged branch has
    /// no binding.
    #[arg(long)]
    pub ignore_merge: bool,

    /// Rebase onto the TFVC ref automatically when the server advanced.
    #[arg(long)]
    pub auto_rebase: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// TFVC remote id.
    #[arg(long, default_value = "default", value_name = "ID")]
    pub remote: String,

    /// TFVC collection URL.
    #[arg(long, value_name = "URL")]
    pub tfs_url: String,

    /// Server repository path (starts with `$/`).
    #[arg(long, value_name = "PATH")]
    pub tfs_path: String,

    /// Former collection URLs this remote also answers to.
    #[arg(long, value_name = "URL")]
    pub legacy_url: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Bind this changeset id manually (requires --commit).
    #[arg(long, value_name = "ID", requires = "commit")]
    pub changeset: Option<u64>,

    /// Commit to bind the changeset to.
    #[arg(long, value_name = "SHA", requires = "changeset")]
    pub commit: Option<String>,

    /// TFVC remote the manual binding belongs to.
    #[arg(long, default_value = "default", value_name = "ID")]
    pub remote: String,
}

/// Parse arguments, exiting 0 for help/version and 1 for invalid arguments.
pub fn parse_or_exit<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

/// Resolved global options shared by all command handlers.
pub(crate) struct Ctx {
    pub workspace_root: PathBuf,
    pub workspace_name: String,
    pub json: bool,
    pub quiet: bool,
}

impl Ctx {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let workspace_root = match &cli.workspace_root {
            Some(root) => root.clone(),
            None => std::env::current_dir()
                .map_err(|e| Error::InvalidArguments(format!("cannot resolve cwd: {e}")))?,
        };
        let workspace_name = cli
            .workspace_name
            .clone()
            .or_else(|| {
                workspace_root
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "default".to_string());
        Ok(Self {
            workspace_root,
            workspace_name,
            json: cli.json,
            quiet: cli.quiet,
        })
    }
}

/// Dispatch and map the outcome to an exit code.
pub fn run(cli: Cli) -> i32 {
    let ctx = match Ctx::from_cli(&cli) {
        Ok(ctx) => ctx,
        Err(err) => {
            render::print_error(&err);
            return err.exit_code();
        }
    };

    let result = match cli.command {
        Commands::Sync(args) => commands::sync::handle(&ctx, args),
        Commands::InitWorkspace(args) => commands::init::handle(&ctx, args),
        Commands::Status => commands::status::handle(&ctx),
        Commands::ForceUnlock => commands::unlock::handle(&ctx),
        Commands::RepairNotes(args) => commands::repair::handle(&ctx, args),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            render::print_error(&err);
            err.exit_code()
        }
    }
}

pub(crate) fn lock_options_from(args: &SyncArgs) -> crate::sync::LockOptions {
    crate::sync::LockOptions {
        timeout: Duration::from_secs(args.lock_timeout),
        max_lock_age: Duration::from_secs(args.max_lock_age),
        no_lock: args.no_lock,
        force_unlock: args.force_unlock,
        lock_file: args.lock_file.clone(),
    }
}
