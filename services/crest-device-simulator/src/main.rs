use anyhow::{bail, Context};
use crest_core::{logging, SimulatorConfig};
use crest_engine::{CoapTransport, EngineConfig, ProtocolEngine};
use crest_psk::{PskRepository, PskService, PskStore};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = SimulatorConfig::load(config_path.as_deref())
        .context("failed to load simulator configuration")?;

    logging::init_with_format(config.log_format);
    info!(
        uri = %config.uri,
        identity = %config.psk_identity,
        sleep_ms = config.sleep_duration_ms,
        produce_valid_cbor = config.produce_valid_cbor,
        database = %config.database_path.display(),
        "Simulator starting"
    );

    let repository = PskRepository::open(&config.database_path)
        .with_context(|| format!("failed to open key table {}", config.database_path.display()))?;
    let store = PskStore::new(config.psk_identity.clone(), config.psk_key.clone());
    let mut keys = PskService::new(repository, store.clone());
    let active = keys
        .provision(&config.psk_key, &config.psk_secret)
        .context("failed to provision pre-shared key")?;

    for row in keys.revisions()? {
        info!(revision = row.revision, status = %row.status, "Key table entry");
    }
    info!(revision = active.revision, "Using active pre-shared key");

    let transport = CoapTransport::new(&config.uri, store, config.request_timeout())
        .context("failed to configure transport")?;

    let mut engine = ProtocolEngine::new(transport, keys, EngineConfig::from(&config));
    engine.run().await;
    Ok(())
}

/// `--config <path>` is optional; without it the built-in defaults apply.
fn parse_config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            match args_iter.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config was provided without a path"),
            }
        }
    }
    Ok(None)
}
