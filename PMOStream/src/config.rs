//! Configuration de l'hôte
//!
//! L'hôte parse un fichier JSON et remet des bundles typés au cœur :
//! le cœur lui-même ne lit ni disque ni configuration.

use pmohls::HlsConfig;
use pmoloop::MaintenanceSettings;
use pmots::nodes::jitter::JitterConfig;
use pmots::nodes::playout::PlayoutConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Source d'entrée : fichier TS lu par la boucle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Fichier TS à rejouer (obligatoire).
    pub path: PathBuf,
    /// Paquets lus par itération de boucle.
    pub packets_per_tick: usize,
    /// Reboucle sur le fichier en fin de flux.
    #[serde(rename = "loop")]
    pub loop_input: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            packets_per_tick: 64,
            loop_input: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub jitter: Option<JitterConfig>,
    pub playout: Option<PlayoutConfig>,
    pub hls: Option<HlsConfig>,
    pub maintenance: Option<MaintenanceSettings>,
    /// Période du journal de stats, en secondes. 0 = désactivé.
    pub stats_interval_s: u32,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&raw)?;
        if config.stats_interval_s == 0 {
            config.stats_interval_s = 10;
        }
        if config.input.packets_per_tick == 0 {
            config.input.packets_per_tick = 64;
        }
        Ok(config)
    }
}
