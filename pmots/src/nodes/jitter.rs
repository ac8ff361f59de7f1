//! Jitter buffer : retard fixe sur horloge murale
//!
//! Chaque paquet est horodaté à l'entrée et retenu tant que
//! `now - ingress < jitter_ms`. La sortie préserve strictement l'ordre
//! d'arrivée. Un timer périodique de 20 ms draine le tampon même quand
//! l'entrée se tait ; l'entrée déclenche aussi un drainage
//! opportuniste.
//!
//! Avec `jitter_ms == 0` le stage est un passe-plat sans tampon.

use crate::pipeline::{Downstream, SharedStage, TsStage};
use crate::ring::PacketRing;
use pmoloop::{Clock, TimerCore, TimerHandle};
use pmompegts::{TS_PACKET_SIZE, TsPacket};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Période du timer de drainage.
const FLUSH_INTERVAL_MS: u32 = 20;

/// Configuration du jitter buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Retard cible en millisecondes. 0 = passe-plat.
    pub jitter_ms: u32,
    /// Mémoire maximale du tampon en octets.
    pub max_buffer_bytes: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            jitter_ms: 0,
            max_buffer_bytes: 4 * 1024 * 1024,
        }
    }
}

impl JitterConfig {
    fn capacity(&self) -> usize {
        (self.max_buffer_bytes / TS_PACKET_SIZE).max(64)
    }
}

/// Stats exposées aux opérateurs. Noms de champs stables.
#[derive(Debug, Clone, Serialize)]
pub struct JitterStats {
    pub buffer_fill_ms: u64,
    pub buffer_target_ms: u64,
    pub buffer_underruns_total: u64,
}

/// Stage de retard fixe.
pub struct JitterStage {
    config: JitterConfig,
    clock: Rc<dyn Clock>,
    ring: Option<PacketRing>,
    in_underrun: bool,
    sent_any: bool,
    underruns_total: u64,
    drops_total: u64,
    downstream: Downstream,
    timer: Option<TimerHandle>,
}

impl JitterStage {
    /// Construit le stage et enregistre son timer de drainage.
    pub fn build(
        config: JitterConfig,
        clock: Rc<dyn Clock>,
        timers: &mut TimerCore,
    ) -> Rc<RefCell<Self>> {
        let buffered = config.jitter_ms > 0;
        let ring = buffered.then(|| PacketRing::with_capacity(config.capacity()));

        let stage = Rc::new(RefCell::new(Self {
            config,
            clock,
            ring,
            in_underrun: false,
            sent_any: false,
            underruns_total: 0,
            drops_total: 0,
            downstream: Downstream::new(),
            timer: None,
        }));

        if buffered {
            let weak: Weak<RefCell<Self>> = Rc::downgrade(&stage);
            let handle = timers.schedule_periodic(FLUSH_INTERVAL_MS, move |_| {
                if let Some(this) = weak.upgrade() {
                    this.borrow_mut().flush();
                }
            });
            stage.borrow_mut().timer = Some(handle);
            debug!(
                jitter_ms = stage.borrow().config.jitter_ms,
                capacity = stage.borrow().ring.as_ref().map(|r| r.capacity()),
                "jitter buffer enabled"
            );
        }

        stage
    }

    /// Attache un enfant aval.
    pub fn attach(&mut self, child: SharedStage) {
        self.downstream.attach(child);
    }

    /// Annule le timer de drainage. À appeler au teardown du stage.
    pub fn stop(&mut self, timers: &mut TimerCore) {
        if let Some(handle) = self.timer.take() {
            timers.cancel(handle);
        }
    }

    /// Relâche tous les paquets dont le retard cible est atteint.
    pub fn flush(&mut self) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };

        let now = self.clock.now_us();
        let target_us = u64::from(self.config.jitter_ms) * 1000;

        while let Some(ts) = ring.front_timestamp() {
            if now < ts || now - ts < target_us {
                break;
            }
            let Some((packet, _)) = ring.pop_front() else {
                break;
            };
            self.downstream.send(&packet);
            self.sent_any = true;
        }

        if ring.is_empty() {
            if !self.in_underrun && self.sent_any {
                self.underruns_total += 1;
                self.in_underrun = true;
            }
        } else {
            self.in_underrun = false;
        }
    }

    pub fn stats(&self) -> JitterStats {
        let mut fill_ms = 0;
        if let Some(ring) = &self.ring {
            if let Some(ts) = ring.front_timestamp() {
                let now = self.clock.now_us();
                if now > ts {
                    fill_ms = (now - ts) / 1000;
                }
            }
        }
        JitterStats {
            buffer_fill_ms: fill_ms,
            buffer_target_ms: u64::from(self.config.jitter_ms),
            buffer_underruns_total: self.underruns_total,
        }
    }

    pub fn drops_total(&self) -> u64 {
        self.drops_total
    }
}

impl TsStage for JitterStage {
    fn on_ts(&mut self, packet: &TsPacket) {
        let now = self.clock.now_us();
        match self.ring.as_mut() {
            None => {
                self.downstream.send(packet);
                return;
            }
            Some(ring) => {
                if ring.is_full() {
                    ring.drop_front();
                    self.drops_total += 1;
                }
                ring.push(packet, now);
            }
        }
        self.flush();
    }

    fn close(&mut self) {
        self.downstream.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CallbackSink;
    use pmoloop::ManualClock;
    use pmompegts::null_packet;

    fn capture() -> (SharedStage, Rc<RefCell<Vec<TsPacket>>>) {
        let log: Rc<RefCell<Vec<TsPacket>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let log = log.clone();
            CallbackSink::shared(move |pkt: &TsPacket| log.borrow_mut().push(*pkt))
        };
        (sink, log)
    }

    fn marked(marker: u8) -> TsPacket {
        let mut pkt = null_packet(0);
        pkt[4] = marker;
        pkt
    }

    #[test]
    fn passthrough_when_delay_is_zero() {
        let clock = Rc::new(ManualClock::new(0));
        let mut timers = TimerCore::new(clock.clone());
        let stage = JitterStage::build(JitterConfig::default(), clock, &mut timers);

        let (sink, log) = capture();
        stage.borrow_mut().attach(sink);
        assert!(timers.is_empty());

        stage.borrow_mut().on_ts(&marked(1));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn holds_packets_until_delay_elapses() {
        let clock = Rc::new(ManualClock::new(0));
        let mut timers = TimerCore::new(clock.clone());
        let config = JitterConfig {
            jitter_ms: 200,
            ..Default::default()
        };
        let stage = JitterStage::build(config, clock.clone(), &mut timers);

        let (sink, log) = capture();
        stage.borrow_mut().attach(sink);

        // Cinq paquets espacés de 1 ms.
        for i in 0..5u8 {
            stage.borrow_mut().on_ts(&marked(i));
            clock.advance_ms(1);
        }

        // t = 150 ms : rien ne sort.
        clock.set_us(150_000);
        timers.tick();
        assert!(log.borrow().is_empty());

        // t = 250 ms : tout est sorti, dans l'ordre.
        clock.set_us(250_000);
        timers.tick();
        let markers: Vec<u8> = log.borrow().iter().map(|p| p[4]).collect();
        assert_eq!(markers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn overflow_drops_oldest_first() {
        let clock = Rc::new(ManualClock::new(0));
        let mut timers = TimerCore::new(clock.clone());
        let config = JitterConfig {
            jitter_ms: 1000,
            max_buffer_bytes: 1, // capacité plancher : 64 slots
        };
        let stage = JitterStage::build(config, clock.clone(), &mut timers);

        let (sink, log) = capture();
        stage.borrow_mut().attach(sink);

        for i in 0..70u8 {
            stage.borrow_mut().on_ts(&marked(i));
        }
        assert_eq!(stage.borrow().drops_total(), 6);

        clock.advance_ms(1000);
        stage.borrow_mut().flush();
        let first = log.borrow()[0][4];
        assert_eq!(first, 6);
        assert_eq!(log.borrow().len(), 64);
    }

    #[test]
    fn underrun_counted_once_per_drain() {
        let clock = Rc::new(ManualClock::new(0));
        let mut timers = TimerCore::new(clock.clone());
        let config = JitterConfig {
            jitter_ms: 10,
            ..Default::default()
        };
        let stage = JitterStage::build(config, clock.clone(), &mut timers);

        let (sink, _log) = capture();
        stage.borrow_mut().attach(sink);

        // Aucun envoi encore : vider ne compte pas comme famine.
        stage.borrow_mut().flush();
        assert_eq!(stage.borrow().stats().buffer_underruns_total, 0);

        stage.borrow_mut().on_ts(&marked(0));
        clock.advance_ms(10);
        stage.borrow_mut().flush();
        assert_eq!(stage.borrow().stats().buffer_underruns_total, 1);

        // Toujours vide : pas de double comptage.
        clock.advance_ms(20);
        stage.borrow_mut().flush();
        assert_eq!(stage.borrow().stats().buffer_underruns_total, 1);

        // Reprise puis nouvelle famine : nouvel incrément.
        stage.borrow_mut().on_ts(&marked(1));
        clock.advance_ms(10);
        stage.borrow_mut().flush();
        assert_eq!(stage.borrow().stats().buffer_underruns_total, 2);
    }

    #[test]
    fn stats_report_fill_and_target() {
        let clock = Rc::new(ManualClock::new(0));
        let mut timers = TimerCore::new(clock.clone());
        let config = JitterConfig {
            jitter_ms: 500,
            ..Default::default()
        };
        let stage = JitterStage::build(config, clock.clone(), &mut timers);

        stage.borrow_mut().on_ts(&marked(0));
        clock.advance_ms(120);
        let stats = stage.borrow().stats();
        assert_eq!(stats.buffer_fill_ms, 120);
        assert_eq!(stats.buffer_target_ms, 500);
    }

    #[test]
    fn stop_cancels_the_flush_timer() {
        let clock = Rc::new(ManualClock::new(0));
        let mut timers = TimerCore::new(clock.clone());
        let config = JitterConfig {
            jitter_ms: 100,
            ..Default::default()
        };
        let stage = JitterStage::build(config, clock, &mut timers);
        assert_eq!(timers.len(), 1);
        stage.borrow_mut().stop(&mut timers);
        assert!(timers.is_empty());
    }
}
