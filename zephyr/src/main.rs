//! Zephyr - Entry Point
//!
//! Deploys the current repository to a configured application server:
//! reconcile the local branch, lock the remote project, run the maintenance
//! steps the diff calls for.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error};

use zephyr::app::options::{DeployOptions, SshOptions};
use zephyr::app::run::run;
use zephyr::console;
use zephyr::deploy::orchestrator::ResumePolicy;
use zephyr::logs::{init_logging, LogLevel, LogOptions};
use zephyr::storage::layout::ProjectLayout;
use zephyr::storage::settings::Settings;
use zephyr::utils::version_info;

#[derive(Parser, Debug)]
#[command(name = "zephyr", version, about = "Diff-driven deployments over SSH")]
struct Cli {
    /// App to deploy, by server name
    #[arg(short, long)]
    server: Option<String>,

    /// Repository root containing .zephyr/settings.json
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Log level (overrides the settings file)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Emit diagnostics as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Also write diagnostics to a file in this directory
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,

    /// Never prompt; every question takes its default answer
    #[arg(long)]
    non_interactive: bool,

    /// Commit message for staged changes
    #[arg(short = 'm', long)]
    commit_message: Option<String>,

    /// Only reconcile the local repository and run local checks
    #[arg(long)]
    precheck_only: bool,

    /// Resume a pending deployment without asking
    #[arg(long, conflicts_with = "discard_pending")]
    resume: bool,

    /// Discard a pending deployment without asking
    #[arg(long)]
    discard_pending: bool,

    /// SSH connect timeout in seconds
    #[arg(long, default_value_t = 15)]
    connect_timeout: u32,

    /// Print build information as JSON and exit
    #[arg(long)]
    build_info: bool,
}

impl Cli {
    fn resume_policy(&self) -> ResumePolicy {
        if self.resume {
            ResumePolicy::Always
        } else if self.discard_pending {
            ResumePolicy::Never
        } else {
            ResumePolicy::Ask
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.build_info {
        return match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    match deploy(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            console::failure(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn deploy(cli: Cli) -> anyhow::Result<()> {
    let layout = ProjectLayout::new(&cli.root);
    let settings = Settings::load(&layout.settings_file())
        .await
        .context("Unable to read settings file")?;

    let log_options = LogOptions {
        log_level: cli.log_level.unwrap_or(settings.log_level),
        json_format: cli.json_logs,
        diagnostics_dir: cli.diagnostics_dir.clone(),
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    debug!("zephyr {:?}", version_info());

    let options = DeployOptions {
        root_dir: cli.root.clone(),
        server: cli.server.clone(),
        non_interactive: cli.non_interactive,
        commit_message: cli.commit_message.clone(),
        precheck_only: cli.precheck_only,
        resume_policy: cli.resume_policy(),
        ssh: SshOptions {
            connect_timeout_secs: cli.connect_timeout,
        },
    };

    if run(&settings, options).await?.is_none() {
        console::success("Precheck passed");
    }
    Ok(())
}
