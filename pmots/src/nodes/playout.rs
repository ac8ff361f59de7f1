//! Playout pacer : sortie à débit régulé avec bourrage NULL
//!
//! Le stage accumule un crédit de paquets proportionnel au temps écoulé
//! et au débit cible, puis émet autant de paquets entiers que le crédit
//! le permet. Quand le tampon est vide (ou en phase de pré-remplissage)
//! et que le bourrage est actif, des paquets NULL maintiennent la
//! continuité du transport.
//!
//! Le débit cible vient soit de la configuration (CBR), soit d'une
//! moyenne mobile exponentielle du débit d'entrée (auto), bornée entre
//! 100 kbit/s et 200 Mbit/s.

use crate::pipeline::{Downstream, SharedStage, TsStage};
use crate::ring::PacketRing;
use pmoloop::{Clock, TimerCore, TimerHandle};
use pmompegts::{TS_PACKET_SIZE, TsPacket, fill_null};
use serde::{Deserialize, Deserializer, Serialize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Garde-fou : nombre maximal de paquets émis par tick, pour qu'un
/// réveil en retard ne monopolise pas la boucle.
const MAX_SEND_PER_TICK: u32 = 5000;

/// Fenêtre de mesure des débits instantanés.
const RATE_WINDOW_US: u64 = 1_000_000;

/// Mode de sélection du débit cible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayoutMode {
    #[default]
    Auto,
    Cbr,
}

/// Configuration du pacer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    pub mode: PlayoutMode,
    /// Débit cible en bit/s, mode CBR uniquement. CBR sans cible
    /// retombe en auto.
    pub target_bps: u64,
    /// Estimation initiale du débit en mode auto, avant la première
    /// fenêtre de mesure.
    pub assumed_bps: u64,
    /// Période du tick d'émission, bornée à 2..=200 ms.
    pub tick_ms: u32,
    /// Bourrage NULL sur famine. Accepte un booléen ou un nombre
    /// (0 = désactivé).
    #[serde(deserialize_with = "bool_or_number")]
    pub null_stuffing: bool,
    /// Tant que le remplissage est sous ce seuil, seuls des NULL
    /// sortent (pré-remplissage).
    pub min_fill_ms: u32,
    /// Repère de remplissage, rapporté dans les stats uniquement.
    pub target_fill_ms: u32,
    /// Plafond indicatif, rapporté aux couches externes uniquement.
    pub max_fill_ms: u32,
    pub max_buffer_bytes: usize,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            mode: PlayoutMode::Auto,
            target_bps: 0,
            assumed_bps: 6_000_000,
            tick_ms: 10,
            null_stuffing: true,
            min_fill_ms: 0,
            target_fill_ms: 0,
            max_fill_ms: 60_000,
            max_buffer_bytes: 16 * 1024 * 1024,
        }
    }
}

impl PlayoutConfig {
    fn normalized(mut self) -> Self {
        self.tick_ms = self.tick_ms.clamp(2, 200);
        if self.mode == PlayoutMode::Cbr && self.target_bps == 0 {
            self.mode = PlayoutMode::Auto;
        }
        self.max_buffer_bytes = self.max_buffer_bytes.max(TS_PACKET_SIZE * 64);
        self
    }

    fn capacity(&self) -> usize {
        (self.max_buffer_bytes / TS_PACKET_SIZE).max(64)
    }
}

fn bool_or_number<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Number(value) => value != 0.0,
    })
}

/// Moyenne mobile exponentielle sur fenêtre glissante de 1 s.
///
/// Les octets sont accumulés sur au moins une seconde de temps réel
/// pour qu'une livraison en rafale ne fabrique pas un débit fantôme.
#[derive(Debug, Default)]
struct BitrateWindow {
    ema_bps: f64,
    window_start_us: u64,
    window_bytes: u64,
}

impl BitrateWindow {
    fn update(&mut self, now: u64, bytes: u64) {
        if self.window_start_us == 0 {
            self.window_start_us = now;
            self.window_bytes = bytes;
            return;
        }

        self.window_bytes += bytes;
        let delta = now - self.window_start_us;
        if delta < RATE_WINDOW_US {
            return;
        }

        let inst_bps = self.window_bytes as f64 * 8.0 * 1_000_000.0 / delta as f64;
        if inst_bps > 1000.0 {
            self.ema_bps = if self.ema_bps <= 0.0 {
                inst_bps
            } else {
                self.ema_bps * 0.8 + inst_bps * 0.2
            };
        }

        self.window_start_us = now;
        self.window_bytes = 0;
    }
}

/// Stats exposées aux opérateurs. Noms de champs stables.
#[derive(Debug, Clone, Serialize)]
pub struct PlayoutStats {
    pub playout_enabled: bool,
    pub target_kbps: u64,
    pub current_kbps: f64,
    pub buffer_fill_ms: u64,
    pub buffer_target_ms: u64,
    pub buffer_bytes: u64,
    pub null_packets_total: u64,
    pub underruns_total: u64,
    pub underrun_ms_total: u64,
    pub drops_total: u64,
}

/// Stage d'émission régulée.
pub struct PlayoutStage {
    config: PlayoutConfig,
    clock: Rc<dyn Clock>,
    ring: PacketRing,
    downstream: Downstream,
    timer: Option<TimerHandle>,

    last_tick_us: u64,
    pkt_credit: f64,

    in_rate: BitrateWindow,
    out_rate: BitrateWindow,

    null_packets_total: u64,
    underruns_total: u64,
    underrun_ms_total: u64,
    drops_total: u64,

    in_underrun: bool,
    underrun_start_us: u64,
    null_cc: u8,
}

impl PlayoutStage {
    /// Construit le stage et enregistre son timer d'émission.
    pub fn build(
        config: PlayoutConfig,
        clock: Rc<dyn Clock>,
        timers: &mut TimerCore,
    ) -> Rc<RefCell<Self>> {
        let config = config.normalized();
        let capacity = config.capacity();
        let tick_ms = config.tick_ms;

        let stage = Rc::new(RefCell::new(Self {
            config,
            clock,
            ring: PacketRing::with_capacity(capacity),
            downstream: Downstream::new(),
            timer: None,
            last_tick_us: 0,
            pkt_credit: 0.0,
            in_rate: BitrateWindow::default(),
            out_rate: BitrateWindow::default(),
            null_packets_total: 0,
            underruns_total: 0,
            underrun_ms_total: 0,
            drops_total: 0,
            in_underrun: false,
            underrun_start_us: 0,
            null_cc: 0,
        }));

        let weak: Weak<RefCell<Self>> = Rc::downgrade(&stage);
        let handle = timers.schedule_periodic(tick_ms, move |_| {
            if let Some(this) = weak.upgrade() {
                this.borrow_mut().flush();
            }
        });
        stage.borrow_mut().timer = Some(handle);
        debug!(tick_ms, capacity, "playout pacer enabled");

        stage
    }

    /// Attache un enfant aval.
    pub fn attach(&mut self, child: SharedStage) {
        self.downstream.attach(child);
    }

    /// Annule le timer d'émission. À appeler au teardown du stage.
    pub fn stop(&mut self, timers: &mut TimerCore) {
        if let Some(handle) = self.timer.take() {
            timers.cancel(handle);
        }
    }

    fn target_bps(&self) -> u64 {
        let bps = if self.config.mode == PlayoutMode::Cbr && self.config.target_bps > 0 {
            self.config.target_bps
        } else if self.in_rate.ema_bps > 0.0 {
            self.in_rate.ema_bps as u64
        } else {
            self.config.assumed_bps
        };
        bps.clamp(100_000, 200_000_000)
    }

    fn buffer_fill_ms(&self, target_bps: u64) -> u64 {
        if self.ring.is_empty() || target_bps == 0 {
            return 0;
        }
        self.ring.bytes() * 8 * 1000 / target_bps
    }

    /// Émet un paquet (réel ou NULL). Retourne `false` quand il n'y a
    /// rien à émettre et que le bourrage est désactivé : le tick
    /// s'arrête là sans consommer le crédit.
    fn send_one(&mut self, now: u64, target_bps: u64) -> bool {
        // Pré-remplissage : tant que la réserve est sous min_fill_ms,
        // on ne sert que des NULL pour garder le transport continu.
        let fill_ms = self.buffer_fill_ms(target_bps);
        let prebuffer =
            self.config.min_fill_ms > 0 && fill_ms < u64::from(self.config.min_fill_ms);

        if !prebuffer {
            if let Some((packet, _)) = self.ring.pop_front() {
                self.downstream.send(&packet);
                self.out_rate.update(now, TS_PACKET_SIZE as u64);

                if self.in_underrun && self.underrun_start_us > 0 {
                    let delta = now.saturating_sub(self.underrun_start_us);
                    self.underrun_ms_total += delta / 1000;
                    self.in_underrun = false;
                    self.underrun_start_us = 0;
                }
                return true;
            }
        }

        if !self.config.null_stuffing {
            return false;
        }

        let mut packet = [0u8; TS_PACKET_SIZE];
        fill_null(&mut packet, self.null_cc);
        self.null_cc = (self.null_cc + 1) & 0x0F;

        self.downstream.send(&packet);
        self.out_rate.update(now, TS_PACKET_SIZE as u64);

        self.null_packets_total += 1;
        if !self.in_underrun {
            self.underruns_total += 1;
            self.in_underrun = true;
            self.underrun_start_us = now;
        }
        true
    }

    /// Tick d'émission : convertit le temps écoulé en crédit de
    /// paquets, puis émet tant que le crédit atteint un paquet entier.
    pub fn flush(&mut self) {
        let now = self.clock.now_us();
        let target_bps = self.target_bps();

        if self.last_tick_us == 0 {
            // Premier tick : on arme l'horloge sans émettre.
            self.last_tick_us = now;
            return;
        }

        let delta_us = now.saturating_sub(self.last_tick_us);
        self.last_tick_us = now;

        let pkts =
            delta_us as f64 * target_bps as f64 / 1_000_000.0 / 8.0 / TS_PACKET_SIZE as f64;
        if pkts > 0.0 {
            self.pkt_credit += pkts;
        }

        let mut sent = 0u32;
        while self.pkt_credit >= 1.0 && sent < MAX_SEND_PER_TICK {
            if !self.send_one(now, target_bps) {
                break;
            }
            self.pkt_credit -= 1.0;
            sent += 1;
        }
    }

    pub fn stats(&self) -> PlayoutStats {
        let now = self.clock.now_us();
        let target_bps = self.target_bps();

        let mut underrun_ms = self.underrun_ms_total;
        if self.in_underrun && self.underrun_start_us > 0 && now > self.underrun_start_us {
            underrun_ms += (now - self.underrun_start_us) / 1000;
        }

        PlayoutStats {
            playout_enabled: true,
            target_kbps: target_bps / 1000,
            current_kbps: self.out_rate.ema_bps / 1000.0,
            buffer_fill_ms: self.buffer_fill_ms(target_bps),
            buffer_target_ms: u64::from(self.config.target_fill_ms),
            buffer_bytes: self.ring.bytes(),
            null_packets_total: self.null_packets_total,
            underruns_total: self.underruns_total,
            underrun_ms_total: underrun_ms,
            drops_total: self.drops_total,
        }
    }
}

impl TsStage for PlayoutStage {
    fn on_ts(&mut self, packet: &TsPacket) {
        let now = self.clock.now_us();
        self.in_rate.update(now, TS_PACKET_SIZE as u64);

        if self.ring.is_full() {
            self.ring.drop_front();
            self.drops_total += 1;
        }
        self.ring.push(packet, now);

        // Rattrapage immédiat : réduit la latence des livraisons en
        // rafale sans attendre le prochain tick.
        self.flush();
    }

    fn close(&mut self) {
        self.downstream.close_all();
    }
}
