use clap::Parser;
use tracing::{error, info, Level};

use wallet::{
    cli::{init_state, run_command, Cli, Commands},
    configuration::{AppState, State},
    error::Error,
    handler::{scheduler, send_notification},
    model::Actions,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let result = app_main().await;

    if let Err(err) = &result {
        error!("{}", err);
    }

    result
}

async fn app_main() -> Result<(), Error> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_max_level({
            #[cfg(debug_assertions)]
            {
                Level::DEBUG
            }

            #[cfg(not(debug_assertions))]
            {
                Level::INFO
            }
        })
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let app_state = init_state().await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(app_state).await,
        Commands::Migrate => {
            info!("Migrations applied");
            Ok(())
        },
        command => run_command(&app_state, command).await,
    }
}

async fn serve(app_state: AppState<State>) -> Result<(), Error> {
    info!(
        "Wallet engine started, scheduler {}",
        if app_state.config.enable_scheduler {
            "enabled"
        } else {
            "disabled"
        }
    );

    let jobs = async {
        tokio::try_join!(
            send_notification::notification_task(app_state.clone()),
            scheduler::start_task(app_state.clone(), Actions::RewardAction),
            scheduler::start_task(
                app_state.clone(),
                Actions::ReconciliationAction
            ),
        )
    };

    tokio::select! {
        result = jobs => {
            result?;
        },
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        },
    }

    Ok(())
}
