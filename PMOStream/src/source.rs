//! Source fichier : rejoue un fichier TS dans le pipeline
//!
//! Implémentation hôte du contrat [`EventSource`] : à chaque itération
//! de boucle, un lot borné de paquets est lu et poussé dans l'arbre.
//! La couche I/O reste ainsi hors du cœur, qui ne voit que `on_ts`.

use crate::config::InputConfig;
use pmoloop::{EventSource, TimerCore};
use pmompegts::{SYNC_BYTE, TS_PACKET_SIZE, TsPacket};
use pmots::pipeline::SharedStage;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::{info, warn};

pub struct TsFileSource {
    config: InputConfig,
    file: File,
    head: SharedStage,
    exhausted: bool,
}

impl TsFileSource {
    pub fn open(config: InputConfig, head: SharedStage) -> anyhow::Result<Self> {
        if config.path.as_os_str().is_empty() {
            anyhow::bail!("input: option 'path' is required");
        }
        let file = File::open(&config.path)?;
        info!(path = %config.path.display(), "input file opened");
        Ok(Self {
            config,
            file,
            head,
            exhausted: false,
        })
    }

    /// Lit un paquet, en se resynchronisant sur 0x47 si besoin.
    fn read_packet(&mut self) -> Option<TsPacket> {
        let mut packet = [0u8; TS_PACKET_SIZE];
        loop {
            if self.file.read_exact(&mut packet).is_err() {
                return None;
            }
            if packet[0] == SYNC_BYTE {
                return Some(packet);
            }

            // Perte de synchronisation : repart un octet après le
            // début de la lecture ratée et cherche le prochain 0x47.
            warn!("input out of sync, resyncing");
            if self
                .file
                .seek(SeekFrom::Current(-(TS_PACKET_SIZE as i64 - 1)))
                .is_err()
            {
                return None;
            }
            let mut byte = [0u8; 1];
            loop {
                if self.file.read_exact(&mut byte).is_err() {
                    return None;
                }
                if byte[0] == SYNC_BYTE {
                    if self.file.seek(SeekFrom::Current(-1)).is_err() {
                        return None;
                    }
                    break;
                }
            }
        }
    }
}

impl EventSource for TsFileSource {
    fn tick(&mut self, _timers: &mut TimerCore) -> bool {
        if self.exhausted {
            return false;
        }

        let mut delivered = 0usize;
        while delivered < self.config.packets_per_tick {
            match self.read_packet() {
                Some(packet) => {
                    self.head.borrow_mut().on_ts(&packet);
                    delivered += 1;
                }
                None if self.config.loop_input => {
                    if self.file.seek(SeekFrom::Start(0)).is_err() {
                        self.exhausted = true;
                        break;
                    }
                }
                None => {
                    info!("input exhausted");
                    self.exhausted = true;
                    break;
                }
            }
        }
        delivered > 0
    }
}
