//! Wires the real capabilities into the orchestrator

use tracing::info;

use crate::app::options::DeployOptions;
use crate::deploy::command::SystemCommandRunner;
use crate::deploy::orchestrator::{DeployReport, Orchestrator};
use crate::errors::ZephyrError;
use crate::prompt::interactive::InteractivePrompter;
use crate::prompt::{NonInteractivePrompter, Prompter};
use crate::ssh::openssh::OpenSshConnector;
use crate::storage::settings::Settings;

/// Run one deployment. Returns `None` when only the precheck was requested.
pub async fn run(settings: &Settings, options: DeployOptions) -> Result<Option<DeployReport>, ZephyrError> {
    let layout = options.layout();
    let app = settings.select_app(options.server.as_deref())?;
    let target = app.to_target();

    let runner = SystemCommandRunner;
    let connector = OpenSshConnector {
        connect_timeout_secs: options.ssh.connect_timeout_secs,
    };
    let prompter: Box<dyn Prompter> = if options.non_interactive {
        Box::new(NonInteractivePrompter::new(options.commit_message.clone()))
    } else {
        Box::new(InteractivePrompter)
    };

    let orchestrator = Orchestrator::new(
        &runner,
        &connector,
        prompter.as_ref(),
        layout,
        options.orchestrator_options(settings),
    );

    if options.precheck_only {
        info!("Running precheck only for {}", target.server_name);
        orchestrator.precheck(&target).await?;
        return Ok(None);
    }

    orchestrator.deploy(&target).await.map(Some)
}
