use std::sync::Arc;

use anyhow::Result;

mod cmd;
mod common;
mod endpoint;
mod greeting;
mod init;
mod policy;
mod responder;
mod splice;
mod start;

/// How `run()` stopped — used by the binary entrypoint to pick the
/// process exit code.
pub enum ExitOutcome {
    Clean,
    Interrupted,
}

pub async fn run() -> Result<ExitOutcome> {
    let shutdown = init::shutdown::init()?;
    let args = init::cmd::init()?;

    let port = args.port.expect("port has a default").get();
    let config_path = args.config.expect("config path has a default");
    let block_page = args.block_page.expect("block page path has a default");
    let limit_page = args.limit_page.expect("limit page path has a default");

    let policy = init::config::ProxyConfig::load(config_path.as_path())?.into_policy_table();
    let bodies = init::config::ResponseBodies::load(block_page.as_path(), limit_page.as_path())?;

    let app = Arc::new(start::AppState {
        policy,
        ledger: policy::Ledger::new(),
        bodies,
    });

    start::serve(port, app, &shutdown).await?;

    let outcome = if shutdown.was_interrupted() {
        ExitOutcome::Interrupted
    } else {
        ExitOutcome::Clean
    };
    log::info!("Shutdown complete.");
    Ok(outcome)
}
