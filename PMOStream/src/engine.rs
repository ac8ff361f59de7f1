//! Construction et démontage du pipeline
//!
//! L'engine assemble les stages feuille d'abord (sink HLS, pacer,
//! jitter), branche la source fichier sur la boucle et pose le timer
//! de stats. Le démontage se fait en ordre inverse de construction :
//! timers annulés, puis fermeture en cascade depuis la tête.

use crate::config::AppConfig;
use crate::source::TsFileSource;
use anyhow::Context;
use pmohls::HlsSink;
use pmoloop::{
    EventLoop, LoopExit, MaintenanceHooks, MaintenanceSettings, MonotonicClock, TimerHandle,
};
use pmots::nodes::jitter::JitterStage;
use pmots::nodes::playout::PlayoutStage;
use pmots::pipeline::{CallbackSink, SharedStage};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

/// Hooks de maintenance de l'hôte : réglages venus du fichier de
/// configuration ; SIGHUP marque une rupture dans la sortie HLS.
struct HostMaintenance {
    settings: MaintenanceSettings,
    hls: Option<Rc<RefCell<HlsSink>>>,
}

impl MaintenanceHooks for HostMaintenance {
    fn settings(&self) -> MaintenanceSettings {
        self.settings
    }

    fn on_sighup(&mut self) {
        info!("SIGHUP received");
        if let Some(hls) = &self.hls {
            hls.borrow_mut().discontinuity();
        }
    }
}

pub struct Engine {
    evloop: EventLoop,
    jitter: Option<Rc<RefCell<JitterStage>>>,
    playout: Option<Rc<RefCell<PlayoutStage>>>,
    head: SharedStage,
    stats_timer: Option<TimerHandle>,
}

impl Engine {
    pub fn build(config: AppConfig) -> anyhow::Result<Self> {
        let clock = Rc::new(MonotonicClock::new());
        let mut evloop = EventLoop::new(clock.clone());

        // ========== Stages, de la feuille vers la tête ==========

        let hls = match config.hls {
            Some(hls_config) => Some(HlsSink::build(hls_config, clock.clone()).context("hls")?),
            None => None,
        };

        let mut head: SharedStage = match &hls {
            Some(sink) => sink.clone(),
            None => CallbackSink::shared(|_pkt| {}),
        };

        let playout = match config.playout {
            Some(playout_config) => {
                let stage = PlayoutStage::build(playout_config, clock.clone(), evloop.timers_mut());
                stage.borrow_mut().attach(head.clone());
                head = stage.clone();
                Some(stage)
            }
            None => None,
        };

        let jitter = match config.jitter {
            Some(jitter_config) => {
                let stage = JitterStage::build(jitter_config, clock.clone(), evloop.timers_mut());
                stage.borrow_mut().attach(head.clone());
                head = stage.clone();
                Some(stage)
            }
            None => None,
        };

        // ========== Source et services de la boucle ==========

        let source = TsFileSource::open(config.input, head.clone()).context("input")?;
        evloop.add_source(Box::new(source));

        evloop.set_maintenance(Box::new(HostMaintenance {
            settings: config.maintenance.unwrap_or_default(),
            hls: hls.clone(),
        }));

        let stats_timer = if config.stats_interval_s > 0 {
            let jitter_ref = jitter.clone();
            let playout_ref = playout.clone();
            let handle = evloop.timers_mut().schedule_periodic(
                config.stats_interval_s * 1000,
                move |_| {
                    if let Some(stage) = &jitter_ref {
                        if let Ok(table) = serde_json::to_string(&stage.borrow().stats()) {
                            info!(jitter = %table, "stats");
                        }
                    }
                    if let Some(stage) = &playout_ref {
                        if let Ok(table) = serde_json::to_string(&stage.borrow().stats()) {
                            info!(playout = %table, "stats");
                        }
                    }
                },
            );
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            evloop,
            jitter,
            playout,
            head,
            stats_timer,
        })
    }

    pub fn run(&mut self) -> LoopExit {
        self.evloop.run()
    }

    /// Démontage en ordre inverse de construction : timers d'abord,
    /// puis fermeture en cascade depuis la tête (le sink HLS termine
    /// son segment ouvert).
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.stats_timer.take() {
            self.evloop.timers_mut().cancel(handle);
        }
        if let Some(stage) = &self.jitter {
            stage.borrow_mut().stop(self.evloop.timers_mut());
        }
        if let Some(stage) = &self.playout {
            stage.borrow_mut().stop(self.evloop.timers_mut());
        }
        self.head.borrow_mut().close();
    }
}
