use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use jausbridge::MAX_IN_FLIGHT;
use jausbridge::bridge::{self, TrafficLog};
use jausbridge::cli::Cli;
use jausbridge::codec::Codec;
use jausbridge::config::{ConfigFile, setup_logging};
use jausbridge::schema::SchemaRegistry;
use jausbridge::transport::UdpTransport;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let cli = Cli::parse();
    let config = ConfigFile::try_as_cowcell(cli.config.as_ref())?;

    // the CLI wins over the config file
    let mut write_txn = config.write().await;
    if let Some(port) = cli.ws_port {
        write_txn.ws_port = port;
    }
    if let Some(uri) = &cli.iop_uri {
        write_txn.iop_uri = uri.clone();
    }
    if let Some(dir) = &cli.schemes {
        write_txn.schema_dir = dir.clone();
    }
    if !cli.log_messages.is_empty() {
        write_txn.log_messages = cli.log_messages.clone();
    }
    write_txn.commit().await;

    let _logger_handle = setup_logging(config.read().await, cli.debug).await?;
    let config_read = config.read().await;
    info!("Starting jausbridge: {}", *config_read);

    let schema_dir = shellexpand::tilde(&config_read.schema_dir).into_owned();
    let registry = SchemaRegistry::load(Path::new(&schema_dir)).map_err(std::io::Error::from)?;
    let codec = Arc::new(Codec::new(Arc::new(registry)));

    let (iop_host, iop_port) = config_read.iop_endpoint().map_err(std::io::Error::from)?;
    let udp = UdpTransport::bind(
        &config_read.udp_interface,
        config_read.udp_port(),
        Some((iop_host, iop_port)),
        config_read.queue_length,
    )
    .await
    .map_err(std::io::Error::from)?;

    let (router_tx, router_rx) = mpsc::channel(MAX_IN_FLIGHT);
    let (broadcast_tx, _) = broadcast::channel(MAX_IN_FLIGHT);
    let cancel = CancellationToken::new();

    let _udp_tasks = udp.spawn(router_tx);
    let traffic_log = TrafficLog::new(config_read.log_messages.clone());
    let _router_task = tokio::spawn(bridge::route_udp_messages(
        Arc::clone(&codec),
        router_rx,
        broadcast_tx.clone(),
        traffic_log,
    ));
    let ws_task = tokio::spawn(bridge::ws_server(
        config.read().await,
        codec,
        Arc::clone(&udp),
        broadcast_tx,
        cancel.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("caught keyboard interrupt, exiting");
        }
        finished = ws_task => {
            udp.close();
            // a failed WebSocket bind exits nonzero
            return match finished {
                Ok(result) => result,
                Err(error) => Err(std::io::Error::other(error)),
            };
        }
    }

    cancel.cancel();
    udp.close();
    println!("  ... server stopped");
    Ok(())
}
