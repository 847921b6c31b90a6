mod client;
mod commands;
mod config;
mod constants;
mod content_index;
mod data_structures;
mod error;
mod macros;
mod protocol;
mod server;
mod shutdown;
mod transcoding;

#[cfg(test)]
mod test_util;

use anyhow::Result;
use commands::{App, Command, USAGE};
use content_index::ContentIndex;
use server::Server;
use std::sync::Arc;
use tokio::io::{stdin, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::select;
use tokio::signal::ctrl_c;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::Config::new();

    let index_location = match &config.index {
        Some(location) => location.clone(),
        None => ContentIndex::default_location()?,
    };
    let index = Arc::new(ContentIndex::load(&index_location).await?);
    info!(location = ?index_location, entries = index.len().await, "content index loaded");

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let server = Server::bind(config.listen, index.clone()).await?;
    let server_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        server.serve(server_rx).await;
    });

    let app = App::new(config, index, shutdown_rx);
    let mut shutdown_tx = Some(shutdown_tx);
    let mut drained = None;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin()).lines();

    stdout.write_all(format!("{USAGE}\n> ").as_bytes()).await?;
    stdout.flush().await?;

    loop {
        let line = select! {
            line = lines.next_line() => line?,
            _ = ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = app.execute(Command::parse(&line));
        tokio::pin!(command);

        // ctrl-c stops seeding, a running download keeps the pieces in
        // flight and takes no new ones
        let outcome = select! {
            outcome = &mut command => outcome,
            _ = ctrl_c() => {
                warn!("interrupted");
                drained = shutdown_tx.take().map(shutdown::Sender::send);
                command.await
            }
        };

        match outcome {
            Ok(Some(output)) if output.is_empty() => (),
            Ok(Some(output)) => stdout.write_all(format!("{output}\n").as_bytes()).await?,
            Ok(None) => break,
            Err(e) => error!("{e:#}"),
        }

        if drained.is_some() {
            break;
        }

        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    info!("shutting down");
    drop(app);

    if let Some(shutdown_tx) = shutdown_tx {
        drained = Some(shutdown_tx.send());
    }
    if let Some(drained) = drained {
        drained.wait().await;
    }

    Ok(())
}
