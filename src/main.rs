use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use spotdrain::config::{Args, Config};
use spotdrain::events::DatadogClient;
use spotdrain::metadata::ImdsClient;
use spotdrain::scheduler::{NomadClient, NomadTls};
use spotdrain::shutdown::{SignalListener, StopSignal};
use spotdrain::{lifecycle, telemetry, Controller, ControllerSettings, ExitStatus, Outcome};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    telemetry::init_logging(args.log_format);

    info!("Starting spotdrain v{}", env!("CARGO_PKG_VERSION"));

    let status = match run(args).await {
        Ok(outcome) => {
            info!("{}. Exiting ...", outcome.describe());
            ExitStatus::from(outcome)
        }
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitStatus::Fatal
        }
    };

    std::process::exit(status.code());
}

async fn run(args: Args) -> anyhow::Result<Outcome> {
    let config = Config::from_args(args)?;

    if config.dd_env.is_none() {
        warn!("Datadog env not found. Event will not have env tag");
    }

    let metadata = ImdsClient::new(config.imds_endpoint.clone(), config.http_timeout)
        .context("creating instance metadata client")?;
    let scheduler = NomadClient::new(
        config.nomad_addr.clone(),
        config.nomad_token.clone(),
        config.http_timeout,
        NomadTls {
            ca_cert: config.nomad_ca_cert.as_deref(),
            skip_verify: config.nomad_skip_verify,
        },
    )
    .context("creating Nomad client")?;
    let events = DatadogClient::new(
        config.datadog_url(),
        config.dd_api_key.clone(),
        config.dd_app_key.clone(),
        config.http_timeout,
    )
    .context("creating Datadog client")?;

    let stop = StopSignal::new();
    SignalListener::install()
        .context("installing signal handlers")?
        .spawn(stop.clone());

    let controller = Controller::new(
        Arc::new(metadata),
        Arc::new(scheduler),
        Arc::new(events),
        ControllerSettings {
            poll_interval: config.poll_interval,
            env: config.dd_env.clone(),
        },
    );

    let outcome = lifecycle::supervise(&controller, &stop, config.shutdown_grace).await?;
    Ok(outcome)
}
