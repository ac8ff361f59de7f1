//! PMOStream : moteur de diffusion MPEG-TS
//!
//! Hôte du cœur coopératif : parse la configuration JSON, installe les
//! handlers de signaux, construit le pipeline (fichier → jitter →
//! playout → HLS) et fait tourner la boucle. Un reload démonte tout et
//! reconstruit depuis le même fichier de configuration.

mod config;
mod engine;
mod source;

use config::AppConfig;
use engine::Engine;
use pmoloop::{LoopExit, signal};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("PMOStream {}", env!("CARGO_PKG_VERSION"));
        eprintln!("Usage: pmostream config.json");
        std::process::exit(1);
    };
    let config_path = Path::new(&config_path).to_path_buf();

    signal::install();

    loop {
        signal::reset();

        let config = AppConfig::load(&config_path)?;
        let mut engine = Engine::build(config)?;

        match engine.run() {
            LoopExit::Reload => {
                engine.shutdown();
                info!("reload");
            }
            LoopExit::Shutdown => {
                engine.shutdown();
                info!("exit");
                break;
            }
        }
    }

    Ok(())
}
