use clap::Parser;
use tracing::{error, info};

use wikivault_lib::config::{Cli, Command};
use wikivault_lib::scheduler::CancellationFlag;
use wikivault_lib::{build_wiki_client, logging, run_export};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref(), &cli.log_format);

    let exit_code = match cli.command {
        Command::Export(args) => run(args).await,
    };

    std::process::exit(exit_code);
}

async fn run(args: wikivault_lib::config::ExportArgs) -> i32 {
    info!(space = %args.space, base_url = %args.base_url, "starting export");

    let client = match build_wiki_client(&args) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to configure wiki client");
            return e.exit_code();
        }
    };

    let cancellation = CancellationFlag::new();
    let cancel_for_signal = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal, draining in-flight work");
            cancel_for_signal.trigger();
        }
    });

    // The initial seed is the space's root page, or an explicit `--root-id`
    // override; discovery resolves the rest. Resuming a prior run bypasses
    // this entirely.
    let seed_id = args
        .root_id
        .clone()
        .unwrap_or_else(|| format!("space-root:{}", args.space));
    let seed_pages = vec![(seed_id, args.space.clone())];

    match run_export(&args, client, seed_pages, cancellation).await {
        Ok(summary) => {
            info!(
                completed = summary.metrics.completed,
                failed = summary.metrics.failed,
                outcome = ?summary.outcome,
                "export finished"
            );
            0
        }
        Err(e) => {
            error!(error = %e, "export failed");
            e.exit_code()
        }
    }
}
