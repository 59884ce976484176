use std::sync::Arc;

use anyhow::Context;
use beam_client::commands::{self, Command, HELP};
use beam_client::{BeamNode, NodeConfig};
use beam_net::{spawn_mesh, MeshConfig, MeshTransport};
use beam_store::{Database, FileSecretStore, IdentityStore, SecretStore};
use libp2p::Multiaddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,beam_client=debug,beam_net=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let config = NodeConfig::from_env();
    info!(data_dir = %config.data_dir.display(), port = config.listen_port, "Starting Beam node");
    if config.secret_passphrase.is_empty() {
        warn!("BEAM_SECRET_PASSPHRASE is not set, secrets are protected by an empty passphrase");
    }

    let secrets: Arc<dyn SecretStore> = Arc::new(
        FileSecretStore::open(&config.secrets_dir(), &config.secret_passphrase)
            .context("Failed to open secret store")?,
    );
    let (identity, status) = IdentityStore::open(secrets.clone());
    let database = Database::open_in(&config.data_dir).context("Failed to open database")?;

    let mesh_config = MeshConfig {
        listen_port: config.listen_port,
        ..MeshConfig::default()
    };
    let (mesh, transport_events) = spawn_mesh(&identity.current(), mesh_config).await?;
    let transport: Arc<dyn MeshTransport> = Arc::new(mesh.clone());

    let (node, mut node_events) =
        BeamNode::new(config, identity, status, secrets, database, transport);
    info!(beam_id = %node.beam_id(), "Node ready");

    tokio::spawn(node.clone().run(transport_events));

    // node events go to stdout as JSON lines
    tokio::spawn(async move {
        while let Some(event) = node_events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(error = %e, "Failed to encode node event"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Dial(addr) => match addr.parse::<Multiaddr>() {
                Ok(addr) => {
                    if let Err(e) = mesh.dial(addr).await {
                        println!("{}", serde_json::json!({ "error": e.to_string() }));
                    }
                }
                Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
            },
            Command::Rekey => {
                let output = commands::execute(&node, Command::Rekey).await?;
                warn!("Identity replaced; restart the node so the mesh uses the new key");
                println!("{output}");
            }
            command => match commands::execute(&node, command).await {
                Ok(output) => println!("{output}"),
                Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
            },
        }
    }

    info!("Shutting down");
    mesh.shutdown().await;
    Ok(())
}
