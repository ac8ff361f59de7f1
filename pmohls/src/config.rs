//! Configuration du segmenteur HLS
//!
//! Bundle typé construit par l'hôte. Seul `path` est obligatoire ;
//! tout le reste a une valeur par défaut raisonnable et les bornes
//! sont réappliquées par [`HlsConfig::normalized`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mode de nommage des fichiers de segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentNaming {
    /// `{prefix}_{seq:08}.{ext}`
    #[default]
    Sequence,
    /// `{prefix}_{hash:08x}.{ext}`, hash CRC-32 de l'horloge murale ou
    /// du dernier PCR vu.
    Pcr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Répertoire de sortie (obligatoire). Créé récursivement.
    pub path: PathBuf,
    pub playlist_name: String,
    pub segment_prefix: String,
    /// Préfixe d'URL des segments dans la playlist. Sans lui, les noms
    /// bruts sont émis.
    pub base_url: Option<String>,
    pub ts_extension: String,
    /// Durée cible d'un segment en secondes (≥ 1).
    pub target_duration_s: u32,
    /// Nombre de segments listés dans la playlist (≥ 1).
    pub window: usize,
    /// Nombre de segments conservés sur disque (≥ window).
    pub cleanup: usize,
    /// Durées comptées à l'horloge murale (sinon au PCR).
    pub use_wall: bool,
    /// Arrondit les durées EXTINF à la seconde supérieure.
    pub round_duration: bool,
    /// `false` : filtrage PID par PAT/PMT, les PID de données sont
    /// écartés.
    pub pass_data: bool,
    pub naming: SegmentNaming,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            playlist_name: "index.m3u8".to_string(),
            segment_prefix: "segment".to_string(),
            base_url: None,
            ts_extension: "ts".to_string(),
            target_duration_s: 6,
            window: 5,
            cleanup: 10,
            use_wall: true,
            round_duration: false,
            pass_data: true,
            naming: SegmentNaming::Sequence,
        }
    }
}

impl HlsConfig {
    /// Réapplique bornes et valeurs de repli.
    pub fn normalized(mut self) -> Self {
        let ext = self.ts_extension.trim_start_matches('.');
        self.ts_extension = if ext.is_empty() {
            "ts".to_string()
        } else {
            ext.to_string()
        };

        if self.target_duration_s < 1 {
            self.target_duration_s = 6;
        }
        if self.window < 1 {
            self.window = 5;
        }
        if self.cleanup < self.window {
            self.cleanup = self.window * 2;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HlsConfig::default();
        assert_eq!(config.playlist_name, "index.m3u8");
        assert_eq!(config.segment_prefix, "segment");
        assert_eq!(config.ts_extension, "ts");
        assert_eq!(config.target_duration_s, 6);
        assert_eq!(config.window, 5);
        assert_eq!(config.cleanup, 10);
        assert!(config.use_wall);
        assert!(config.pass_data);
        assert_eq!(config.naming, SegmentNaming::Sequence);
    }

    #[test]
    fn normalization_strips_dot_and_enforces_bounds() {
        let config = HlsConfig {
            ts_extension: ".m2ts".to_string(),
            target_duration_s: 0,
            window: 0,
            cleanup: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.ts_extension, "m2ts");
        assert_eq!(config.target_duration_s, 6);
        assert_eq!(config.window, 5);
        assert_eq!(config.cleanup, 10);
    }

    #[test]
    fn cleanup_below_window_falls_back_to_double() {
        let config = HlsConfig {
            window: 8,
            cleanup: 3,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.cleanup, 16);
    }
}
