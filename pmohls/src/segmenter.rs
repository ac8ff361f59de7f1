//! Segmenteur HLS : découpe un flux TS en fichiers bornés en durée
//!
//! Sink du pipeline : chaque paquet est ajouté au segment ouvert, la
//! durée est comptée à l'horloge murale ou au fil des PCR, et le
//! segment se termine dès que la durée cible est atteinte. À chaque
//! segment terminé la playlist est réécrite et les fichiers au-delà du
//! seuil `cleanup` sont supprimés.
//!
//! Les échecs d'ouverture ou d'écriture sont journalisés et le
//! pipeline continue : le paquet courant est perdu, l'ouverture
//! suivante retente.

use crate::config::{HlsConfig, SegmentNaming};
use crate::error::{Error, Result};
use crate::playlist::{self, SegmentRecord};
use pmoloop::Clock;
use pmompegts::{
    NULL_PID, PacketType, PsiAssembler, TsPacket, crc32_ieee, has_pcr, pcr, pcr_block_us,
    pes_type,
};
use pmots::pipeline::TsStage;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, info, warn};

struct OpenSegment {
    file: File,
    name: String,
    packets: u64,
}

/// Sink segmenteur.
pub struct HlsSink {
    config: HlsConfig,
    clock: Rc<dyn Clock>,

    segment_target_us: u64,
    segment_elapsed_us: u64,

    has_pcr: bool,
    pcr_last: u64,
    wall_last: u64,

    seq: i64,
    segment: Option<OpenSegment>,
    discontinuity_pending: bool,

    playlist_target: u32,
    segments: VecDeque<SegmentRecord>,

    pat: Option<PsiAssembler>,
    pmt: Option<PsiAssembler>,
    pmt_pid: u16,
    pid_types: Vec<PacketType>,
}

impl HlsSink {
    /// Construit le sink. `path` manquant ou répertoire impossible à
    /// créer sont fatals (avant que la boucle tourne).
    pub fn build(config: HlsConfig, clock: Rc<dyn Clock>) -> Result<Rc<RefCell<Self>>> {
        let config = config.normalized();
        if config.path.as_os_str().is_empty() {
            return Err(Error::MissingPath);
        }

        create_output_dir(&config.path)?;

        let pass_data = config.pass_data;
        let segment_target_us = u64::from(config.target_duration_s) * 1_000_000;
        let playlist_target = config.target_duration_s;

        let mut sink = Self {
            config,
            clock,
            segment_target_us,
            segment_elapsed_us: 0,
            has_pcr: false,
            pcr_last: 0,
            wall_last: 0,
            seq: -1,
            segment: None,
            discontinuity_pending: false,
            playlist_target,
            segments: VecDeque::new(),
            pat: None,
            pmt: None,
            pmt_pid: 0,
            pid_types: vec![PacketType::None; pmompegts::MAX_PID],
        };

        if !pass_data {
            sink.pat = Some(PsiAssembler::new(0));
            sink.reset_pid_types();
        }

        info!(
            path = %sink.config.path.display(),
            target_duration_s = sink.config.target_duration_s,
            window = sink.config.window,
            "hls output ready"
        );
        Ok(Rc::new(RefCell::new(sink)))
    }

    /// Segments actuellement tenus (du plus ancien au plus récent).
    pub fn segments(&self) -> &VecDeque<SegmentRecord> {
        &self.segments
    }

    pub fn playlist_target(&self) -> u32 {
        self.playlist_target
    }

    /// Marque une rupture de flux : le segment en cours est terminé
    /// (ou jeté s'il est vide), le suivi PCR repart de zéro et le
    /// prochain segment terminé portera `#EXT-X-DISCONTINUITY`.
    pub fn discontinuity(&mut self) {
        match self.segment.as_ref().map(|seg| seg.packets > 0) {
            Some(true) => self.finish_segment(),
            Some(false) => self.discard_open_segment(),
            None => {}
        }

        self.segment_elapsed_us = 0;
        self.has_pcr = false;
        self.pcr_last = 0;
        self.wall_last = 0;
        self.discontinuity_pending = true;
        debug!("discontinuity marked");
    }

    fn reset_pid_types(&mut self) {
        self.pid_types.fill(PacketType::None);
        self.pid_types[0] = PacketType::Pat;
        if self.pmt_pid != 0 {
            self.pid_types[usize::from(self.pmt_pid)] = PacketType::Pmt;
        }
    }

    /// Démultiplexage PAT/PMT en mode `pass_data = false`. Une table
    /// n'est adoptée que si son CRC change et se revalide.
    fn ingest_psi(&mut self, packet: &TsPacket) {
        let pid = pmompegts::pid(packet);

        if pid == 0 {
            if let Some(mut pat) = self.pat.take() {
                let last_crc = pat.last_crc;
                let mut adopted: Option<(u32, u16)> = None;
                pat.mux(packet, |section| {
                    if section.table_id() != 0x00 {
                        return;
                    }
                    let crc = section.declared_crc();
                    if crc == last_crc || crc != section.computed_crc() {
                        return;
                    }
                    let mut pmt_pid = 0u16;
                    for item in section.pat_items() {
                        if item.pnr == 0 {
                            continue;
                        }
                        if item.pid != 0 && item.pid < NULL_PID {
                            pmt_pid = item.pid;
                            break;
                        }
                    }
                    adopted = Some((crc, pmt_pid));
                });
                if let Some((crc, pmt_pid)) = adopted {
                    pat.last_crc = crc;
                    if pmt_pid != 0 && pmt_pid != self.pmt_pid {
                        debug!(pmt_pid, "pmt pid adopted from pat");
                        self.pmt_pid = pmt_pid;
                        self.pmt = Some(PsiAssembler::new(pmt_pid));
                        self.reset_pid_types();
                    }
                }
                self.pat = Some(pat);
            }
        }

        if pid != 0 && pid == self.pmt_pid {
            if let Some(mut pmt) = self.pmt.take() {
                let last_crc = pmt.last_crc;
                let mut adopted_crc: Option<u32> = None;
                let mut classified: Vec<(u16, PacketType)> = Vec::new();
                pmt.mux(packet, |section| {
                    if section.table_id() != 0x02 {
                        return;
                    }
                    let crc = section.declared_crc();
                    if crc == last_crc || crc != section.computed_crc() {
                        return;
                    }
                    adopted_crc = Some(crc);
                    classified.clear();
                    for item in section.pmt_items() {
                        if item.pid >= NULL_PID {
                            continue;
                        }
                        let mut kind = pes_type(item.stream_type);
                        if item.stream_type == 0x06 {
                            for (tag, _payload) in item.descriptors() {
                                match tag {
                                    0x59 => kind = PacketType::Sub,
                                    0x6A => kind = PacketType::Audio,
                                    _ => {}
                                }
                            }
                        }
                        classified.push((item.pid, kind));
                    }
                });
                if let Some(crc) = adopted_crc {
                    pmt.last_crc = crc;
                    self.reset_pid_types();
                    for (pid, kind) in classified {
                        self.pid_types[usize::from(pid)] = kind;
                    }
                    debug!("pmt adopted, pid classification refreshed");
                }
                self.pmt = Some(pmt);
            }
        }
    }

    fn segment_name(&self) -> String {
        match self.config.naming {
            SegmentNaming::Sequence => format!(
                "{}_{:08}.{}",
                self.config.segment_prefix, self.seq, self.config.ts_extension
            ),
            SegmentNaming::Pcr => {
                let seed = if self.config.use_wall {
                    self.clock.now_us()
                } else {
                    self.pcr_last
                };
                let hash = crc32_ieee(&seed.to_le_bytes());
                format!(
                    "{}_{:08x}.{}",
                    self.config.segment_prefix, hash, self.config.ts_extension
                )
            }
        }
    }

    fn open_segment(&mut self) {
        self.seq += 1;
        let name = self.segment_name();
        let path = self.config.path.join(&name);

        match File::create(&path) {
            Ok(file) => {
                self.segment = Some(OpenSegment {
                    file,
                    name,
                    packets: 0,
                });
                self.segment_elapsed_us = 0;
                self.wall_last = self.clock.now_us();
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to open segment");
                self.segment = None;
            }
        }
    }

    /// Ferme et jette un segment ouvert sans paquet.
    fn discard_open_segment(&mut self) {
        if let Some(seg) = self.segment.take() {
            drop(seg.file);
            let path = self.config.path.join(&seg.name);
            if let Err(error) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), %error, "failed to unlink empty segment");
            }
            self.segment_elapsed_us = 0;
        }
    }

    fn finish_segment(&mut self) {
        let Some(seg) = self.segment.take() else {
            self.segment_elapsed_us = 0;
            return;
        };

        if seg.packets == 0 {
            self.segment = Some(seg);
            self.discard_open_segment();
            return;
        }
        drop(seg.file);

        let mut duration = self.segment_elapsed_us as f64 / 1_000_000.0;
        if self.config.round_duration {
            duration = duration.ceil();
        }

        let record = SegmentRecord {
            seq: self.seq,
            duration_sec: duration,
            name: seg.name,
            discontinuity: self.discontinuity_pending,
        };
        self.discontinuity_pending = false;

        let duration_ceil = (duration.ceil() as u32).max(1);
        if duration_ceil > self.playlist_target {
            self.playlist_target = duration_ceil;
        }

        debug!(seq = record.seq, duration, name = %record.name, "segment finished");
        self.segments.push_back(record);

        self.cleanup_segments();
        self.write_playlist();

        self.segment_elapsed_us = 0;
        self.wall_last = self.clock.now_us();
    }

    fn cleanup_segments(&mut self) {
        while self.segments.len() > self.config.cleanup {
            let Some(record) = self.segments.pop_front() else {
                return;
            };
            let path = self.config.path.join(&record.name);
            if let Err(error) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), %error, "failed to unlink expired segment");
            }
        }
    }

    fn write_playlist(&self) {
        if self.segments.is_empty() {
            return;
        }

        let content = playlist::render(
            &self.segments,
            self.config.window,
            self.playlist_target,
            self.config.base_url.as_deref(),
        );

        let path = self.config.path.join(&self.config.playlist_name);
        if let Err(error) = std::fs::write(&path, content) {
            warn!(path = %path.display(), %error, "failed to write playlist");
        }
    }
}

impl TsStage for HlsSink {
    fn on_ts(&mut self, packet: &TsPacket) {
        let pid = pmompegts::pid(packet);

        if !self.config.pass_data {
            self.ingest_psi(packet);
            if self.pid_types[usize::from(pid)] == PacketType::Data {
                return;
            }
        }

        if self.segment.is_none() {
            self.open_segment();
        }
        let Some(seg) = self.segment.as_mut() else {
            return;
        };

        if let Err(error) = seg.file.write_all(packet) {
            warn!(%error, "failed to append to segment");
            return;
        }
        seg.packets += 1;

        let mut delta_us = 0u64;
        if self.config.use_wall {
            let now = self.clock.now_us();
            if self.wall_last == 0 {
                self.wall_last = now;
            }
            if now > self.wall_last {
                delta_us = now - self.wall_last;
            }
            self.wall_last = now;
        } else if has_pcr(packet) {
            let sample = pcr(packet);
            if !self.has_pcr {
                self.pcr_last = sample;
                self.has_pcr = true;
            } else {
                delta_us = pcr_block_us(&mut self.pcr_last, sample);
            }
        }

        self.segment_elapsed_us += delta_us;

        if self.segment_elapsed_us >= self.segment_target_us {
            self.finish_segment();
            self.open_segment();
        }
    }

    fn close(&mut self) {
        self.finish_segment();
    }
}

impl Drop for HlsSink {
    fn drop(&mut self) {
        self.finish_segment();
    }
}

#[cfg(unix)]
fn create_output_dir(path: &PathBuf) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_output_dir(path: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}
