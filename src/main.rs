use anyhow::{Context, bail};
use remote_cache::cluster::client::RemoteCacheClient;
use remote_cache::cluster::peer::PeerAuxiliary;
use remote_cache::config::{DEFAULT_REGISTRY_PORT, ServerAttributes};
use remote_cache::directory::manager::ServerManager;
use remote_cache::directory::service::{HttpServiceDirectory, ServiceDirectory};
use remote_cache::directory::types::ServerState;
use remote_cache::storage::memory::MemoryCacheManager;
use remote_cache::storage::region::Auxiliary;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

enum Mode {
    Serve,
    Shutdown,
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_file: Option<PathBuf> = None;
    let mut host = String::from("localhost");
    let mut port = DEFAULT_REGISTRY_PORT;
    let mut overrides: Vec<(String, String)> = vec![];
    let mut mode = Mode::Serve;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_file = Some(PathBuf::from(value_of(&args, i)?));
                i += 2;
            }
            "--host" => {
                host = value_of(&args, i)?.to_string();
                i += 2;
            }
            "--port" => {
                port = value_of(&args, i)?
                    .parse()
                    .context("--port expects a port number")?;
                i += 2;
            }
            "--set" => {
                let setting = value_of(&args, i)?;
                let (key, value) = setting
                    .split_once('=')
                    .with_context(|| format!("--set expects key=value, got [{}]", setting))?;
                overrides.push((key.trim().to_string(), value.trim().to_string()));
                i += 2;
            }
            "--shutdown" => {
                mode = Mode::Shutdown;
                i += 1;
            }
            "--stats" => {
                mode = Mode::Stats;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                return Ok(());
            }
            other => {
                print_usage(&args[0]);
                bail!("Unknown argument [{}]", other);
            }
        }
    }

    let mut attributes = match &config_file {
        Some(path) => ServerAttributes::from_file(path)?,
        None => ServerAttributes::default(),
    };
    for (key, value) in &overrides {
        attributes.apply_property(key, value)?;
    }

    match mode {
        Mode::Shutdown => {
            let client = locate_server(&host, port, &attributes).await?;
            tracing::info!("Sending shutdown request to {}", client.base_url());
            client.shutdown(&host, port).await?;
            tracing::info!("Server was shut down");
            Ok(())
        }
        Mode::Stats => {
            let client = locate_server(&host, port, &attributes).await?;
            println!("{}", client.stats().await?);
            Ok(())
        }
        Mode::Serve => serve(host, port, attributes).await,
    }
}

async fn serve(host: String, port: u16, attributes: ServerAttributes) -> anyhow::Result<()> {
    // 1. Cluster peers:
    let mut auxiliaries: Vec<Arc<dyn Auxiliary>> = vec![];
    if !attributes.cluster_peers.is_empty() {
        if attributes.service_port == 0 {
            bail!("servicePort must be set when clusterPeers are configured");
        }

        let local_url = format!("http://{}:{}", host, attributes.service_port);
        let http_client = attributes.http_client()?;
        for peer in &attributes.cluster_peers {
            tracing::info!("Cluster peer: {}", peer);
            auxiliaries.push(Arc::new(PeerAuxiliary::new(
                RemoteCacheClient::new(peer.as_str(), http_client.clone()),
                &local_url,
                Some(host.clone()),
            )));
        }
    }

    // 2. Storage:
    let cache_manager = MemoryCacheManager::with_auxiliaries(auxiliaries);

    // 3. Server and directory:
    let manager = ServerManager::new();
    manager
        .startup(&host, port, attributes, cache_manager)
        .await?;

    tracing::info!("Press Ctrl+C to shutdown");

    // 4. Wait for Ctrl+C or a remote shutdown request:
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Ctrl+C received, shutting down");
                manager.shutdown(&host, port).await?;
                break;
            }
            _ = interval.tick() => {
                if manager.state().await == ServerState::Stopped {
                    tracing::info!("Server stopped by remote request");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn locate_server(
    host: &str,
    port: u16,
    attributes: &ServerAttributes,
) -> anyhow::Result<RemoteCacheClient> {
    let http_client = attributes.http_client()?;
    let directory = HttpServiceDirectory::new(host, port, http_client.clone());
    let endpoint = directory
        .lookup(&attributes.remote_service_name)
        .await
        .with_context(|| {
            format!(
                "Could not find [{}] in the directory at {}:{}",
                attributes.remote_service_name, host, port
            )
        })?;
    Ok(RemoteCacheClient::new(endpoint.url, http_client))
}

fn value_of(args: &[String], i: usize) -> anyhow::Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} expects a value", args[i]))
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} [--config <file>] [--host <host>] [--port <directory port>] [--set key=value]... [--shutdown | --stats]",
        program
    );
    eprintln!("Example: {} --config server.json --port 1099", program);
    eprintln!("Example: {} --set servicePort=8100 --set localClusterConsistency=true", program);
    eprintln!("Example: {} --port 1099 --shutdown", program);
}
