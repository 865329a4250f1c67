#[macro_use]
extern crate tracing;

use anyhow::Result;
use clap::Parser;
use dripper::run_loop::describe;
use dripper::{config, Args, Dispatcher};

fn init_log() {
    use std::env;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "dripper=info,util=info");
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_log();

    let args = Args::parse();

    let (targets, sources) = args.load()?;
    info!("Loaded {} targets", targets.len());
    info!("Available sources: {}", describe(&sources));

    let client = args.client();
    if args.insecure {
        warn!("TLS certificate validation is DISABLED (--insecure)");
    }
    config::probe(&client, &sources)?;

    let mut dispatcher = Dispatcher::new(targets, sources, client, args.rng())?
        .with_interval(args.interval());

    if let Some(period) = args.refresh_period() {
        let interface = args.interface.clone();
        dispatcher = dispatcher.with_refresh(
            period,
            Box::new(move || util::sources_for(interface.as_deref())),
        );
    }

    tokio::select! {
        _ = dispatcher.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received; shutting down"),
    }

    Ok(())
}
