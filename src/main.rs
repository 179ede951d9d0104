use anyhow::{Context, Result};
use tokio::io::{self, BufReader};

use polyomino_env::{
    cli::{CliOptions, Command, cli_options_from_args},
    client,
    config::Config,
    listener,
    logging::init_tracing,
    transport::{BroadcastPort, RequestPort, ZmqBroadcastChannel, ZmqRequestChannel},
};

#[tokio::main]
async fn main() -> Result<()> {
    let options = cli_options_from_args()?;
    let mut config = Config::load_or_default(options.config_path.as_deref())
        .context("failed to load config")?;
    options.apply_overrides(&mut config);

    let logging = init_tracing(&config.logging, options.verbose)?;
    tracing::info!(
        target: "main",
        run_id = %logging.run_id(),
        command = ?options.command,
        host = %config.connection.host,
        "polyomino_env_started"
    );

    match options.command {
        Command::Listen => run_listen(&config, &options).await,
        Command::Play => run_play(&config, &options).await,
    }
}

async fn run_listen(config: &Config, options: &CliOptions) -> Result<()> {
    let connection = &config.connection;
    let endpoint = connection.state_endpoint();
    let mut broadcast = ZmqBroadcastChannel::connect(
        endpoint.clone(),
        &connection.topic_filter,
        connection.receive_timeout(),
    )
    .await
    .with_context(|| format!("failed to subscribe to {endpoint}"))?;
    eprintln!("listening on {endpoint}");

    let silence = config.listener.silence_timeout();
    let mut stdout = io::stdout();
    tokio::select! {
        summary = listener::listen(&mut broadcast, silence, options.verbose, &mut stdout) => {
            let summary = summary?;
            eprintln!(
                "no message received for {:.1} seconds, shutting down ({} received, {} malformed)",
                silence.as_secs_f64(),
                summary.received,
                summary.malformed
            );
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted by user, shutting down");
        }
    }

    broadcast.close().await?;
    Ok(())
}

async fn run_play(config: &Config, options: &CliOptions) -> Result<()> {
    let connection = &config.connection;
    let endpoint = connection.action_endpoint();
    let mut request = ZmqRequestChannel::connect(endpoint.clone(), connection.receive_timeout())
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    eprintln!("sending actions to {endpoint}");

    let input = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    tokio::select! {
        summary = client::play(&mut request, input, &mut stdout, options.verbose) => {
            let summary = summary?;
            eprintln!(
                "session ended: {} sent, {} rejected, {} timed out",
                summary.sent, summary.rejected, summary.timed_out
            );
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted by user, shutting down");
        }
    }

    request.close().await?;
    Ok(())
}
