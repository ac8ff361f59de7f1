//! Boucle d'évènements coopérative
//!
//! Une itération de boucle, dans l'ordre :
//! 1. Marquer la boucle oisive
//! 2. Tick des sources d'évènements (I/O externe, non bloquant)
//! 3. Drainage des timers échus
//! 4. Drainage de la mailbox inter-threads
//! 5. Drapeau SIGHUP → hook applicatif
//! 6. Cadence de maintenance (relecture des réglages toutes les 2 s,
//!    pas incrémental, collecte complète quand la boucle est oisive)
//! 7. Arrêt/reload demandés ? Sinon, sommeil de 1 ms si oisive
//!
//! La boucle ne possède aucun état partagé : tout callback s'exécute
//! jusqu'au bout sur le thread de la boucle.

use crate::clock::Clock;
use crate::signal;
use crate::timer::TimerCore;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

/// Sommeil d'une itération oisive.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Période de relecture des réglages de maintenance.
const TUNE_REFRESH_US: u64 = 2_000_000;

/// Raison de sortie de [`EventLoop::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Arrêt propre du processus.
    Shutdown,
    /// Teardown complet puis reconstruction par l'hôte.
    Reload,
}

/// Source d'évènements externe (couche I/O de l'hôte).
///
/// `tick` draine les évènements prêts sans bloquer et retourne `true`
/// si au moins un callback a tourné (la boucle n'est alors pas oisive).
pub trait EventSource {
    fn tick(&mut self, timers: &mut TimerCore) -> bool;
}

/// Job posté depuis un autre thread, exécuté sur le thread de la boucle.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// File de messages inter-threads, drainée une fois par itération.
pub struct Mailbox {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Retourne un expéditeur clonable, utilisable depuis n'importe
    /// quel thread.
    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            tx: self.tx.clone(),
        }
    }

    /// Exécute tous les jobs actuellement en file. Retourne leur nombre.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            count += 1;
        }
        count
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Expéditeur vers la mailbox de la boucle.
#[derive(Clone)]
pub struct MailboxSender {
    tx: Sender<Job>,
}

impl MailboxSender {
    /// Poste un job. Retourne `false` si la boucle a disparu.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

/// Réglages de cadence de maintenance, fournis par l'hôte.
///
/// Les valeurs hors bornes sont ramenées dans les plages :
/// collecte complète 100..=60000 ms, pas 50..=10000 ms,
/// unités 0..=10000.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub full_collect_interval_ms: u32,
    pub step_interval_ms: u32,
    pub step_units: u32,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            full_collect_interval_ms: 1000,
            step_interval_ms: 250,
            step_units: 0,
        }
    }
}

impl MaintenanceSettings {
    pub fn clamped(self) -> Self {
        Self {
            full_collect_interval_ms: self.full_collect_interval_ms.clamp(100, 60_000),
            step_interval_ms: self.step_interval_ms.clamp(50, 10_000),
            step_units: self.step_units.min(10_000),
        }
    }
}

/// Hooks de maintenance de l'hôte (l'interface de l'hôte de scripts).
///
/// `step` est un compactage incrémental (caches, arènes) ; `full_collect`
/// est un lâcher best-effort des caches longue durée, déclenché
/// seulement quand la boucle est oisive.
pub trait MaintenanceHooks {
    fn settings(&self) -> MaintenanceSettings {
        MaintenanceSettings::default()
    }

    fn step(&mut self, _units: u32) {}

    fn full_collect(&mut self) {}

    /// Appelé quand SIGHUP a été observé entre deux itérations.
    fn on_sighup(&mut self) {}
}

/// Implémentation neutre, utilisée par défaut.
pub struct NoopMaintenance;

impl MaintenanceHooks for NoopMaintenance {}

/// Résultat d'une itération de boucle.
#[derive(Debug, Clone, Copy)]
pub struct LoopTurn {
    /// Aucune source, timer, message ni hook n'a tourné.
    pub idle: bool,
    /// Arrêt ou reload demandé pendant l'itération.
    pub exit: Option<LoopExit>,
}

/// Ordonnanceur coopératif mono-thread.
pub struct EventLoop {
    clock: Rc<dyn Clock>,
    timers: TimerCore,
    sources: Vec<Box<dyn EventSource>>,
    mailbox: Mailbox,
    hooks: Box<dyn MaintenanceHooks>,
    settings: MaintenanceSettings,
    tune_at_us: u64,
    step_at_us: u64,
    full_at_us: u64,
}

impl EventLoop {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let now = clock.now_us();
        Self {
            timers: TimerCore::new(clock.clone()),
            clock,
            sources: Vec::new(),
            mailbox: Mailbox::new(),
            hooks: Box::new(NoopMaintenance),
            settings: MaintenanceSettings::default(),
            tune_at_us: now,
            step_at_us: now,
            full_at_us: now,
        }
    }

    /// Enregistre une source d'évènements ; tickée à chaque itération
    /// dans l'ordre d'enregistrement.
    pub fn add_source(&mut self, source: Box<dyn EventSource>) {
        self.sources.push(source);
    }

    /// Remplace les hooks de maintenance.
    pub fn set_maintenance(&mut self, hooks: Box<dyn MaintenanceHooks>) {
        self.hooks = hooks;
    }

    pub fn timers_mut(&mut self) -> &mut TimerCore {
        &mut self.timers
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    pub fn mailbox_sender(&self) -> MailboxSender {
        self.mailbox.sender()
    }

    /// Une itération de boucle, sans le sommeil d'oisiveté.
    pub fn run_once(&mut self) -> LoopTurn {
        let mut idle = true;

        for source in &mut self.sources {
            if source.tick(&mut self.timers) {
                idle = false;
            }
        }

        if self.timers.tick() > 0 {
            idle = false;
        }

        if self.mailbox.drain() > 0 {
            idle = false;
        }

        if signal::take_sighup() {
            debug!("SIGHUP observed, invoking hook");
            self.hooks.on_sighup();
            idle = false;
        }

        let now = self.clock.now_us();
        if now.saturating_sub(self.tune_at_us) >= TUNE_REFRESH_US {
            self.tune_at_us = now;
            self.settings = self.hooks.settings().clamped();
        }

        if self.settings.step_units > 0
            && now.saturating_sub(self.step_at_us)
                >= u64::from(self.settings.step_interval_ms) * 1000
        {
            self.step_at_us = now;
            self.hooks.step(self.settings.step_units);
        }

        if idle
            && now.saturating_sub(self.full_at_us)
                >= u64::from(self.settings.full_collect_interval_ms) * 1000
        {
            self.full_at_us = now;
            self.hooks.full_collect();
        }

        let exit = if signal::exit_requested() {
            Some(LoopExit::Shutdown)
        } else if signal::take_reload() {
            Some(LoopExit::Reload)
        } else {
            None
        };

        LoopTurn { idle, exit }
    }

    /// Fait tourner la boucle jusqu'à une demande d'arrêt ou de reload.
    pub fn run(&mut self) -> LoopExit {
        info!("event loop started");
        loop {
            let turn = self.run_once();
            if let Some(exit) = turn.exit {
                info!(?exit, "event loop stopped");
                return exit;
            }
            if turn.idle {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::{Cell, RefCell};

    struct CountingSource {
        remaining: u32,
    }

    impl EventSource for CountingSource {
        fn tick(&mut self, _timers: &mut TimerCore) -> bool {
            if self.remaining > 0 {
                self.remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[test]
    fn idle_when_nothing_ran() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock);
        let turn = evloop.run_once();
        assert!(turn.idle);
        assert!(turn.exit.is_none());
    }

    #[test]
    fn source_activity_clears_idle() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock);
        evloop.add_source(Box::new(CountingSource { remaining: 1 }));

        assert!(!evloop.run_once().idle);
        assert!(evloop.run_once().idle);
    }

    #[test]
    fn mailbox_jobs_run_on_loop_thread() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock);

        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let sender = evloop.mailbox_sender();
        let flag = ran.clone();
        let handle = std::thread::spawn(move || {
            sender.post(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));
        });
        handle.join().unwrap();

        let turn = evloop.run_once();
        assert!(!turn.idle);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    struct RecordingHooks {
        steps: Rc<Cell<u32>>,
        collects: Rc<Cell<u32>>,
        hups: Rc<Cell<u32>>,
        settings: MaintenanceSettings,
    }

    impl MaintenanceHooks for RecordingHooks {
        fn settings(&self) -> MaintenanceSettings {
            self.settings
        }

        fn step(&mut self, _units: u32) {
            self.steps.set(self.steps.get() + 1);
        }

        fn full_collect(&mut self) {
            self.collects.set(self.collects.get() + 1);
        }

        fn on_sighup(&mut self) {
            self.hups.set(self.hups.get() + 1);
        }
    }

    #[test]
    fn maintenance_cadence_follows_settings() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock.clone());

        let steps = Rc::new(Cell::new(0));
        let collects = Rc::new(Cell::new(0));
        evloop.set_maintenance(Box::new(RecordingHooks {
            steps: steps.clone(),
            collects: collects.clone(),
            hups: Rc::new(Cell::new(0)),
            settings: MaintenanceSettings {
                full_collect_interval_ms: 100,
                step_interval_ms: 50,
                step_units: 4,
            },
        }));

        // Première relecture des réglages à 2 s ; les échéances de pas
        // et de collecte, parties du démarrage, sont alors largement
        // dépassées : les deux hooks tirent dans la même itération
        // (la boucle est oisive).
        clock.advance_ms(2000);
        evloop.run_once();
        assert_eq!(steps.get(), 1);
        assert_eq!(collects.get(), 1);

        // 60 ms plus tard : le pas (50 ms) est dû, la collecte
        // (100 ms) pas encore.
        clock.advance_ms(60);
        evloop.run_once();
        assert_eq!(steps.get(), 2);
        assert_eq!(collects.get(), 1);

        // 110 ms depuis la dernière collecte : elle repart.
        clock.advance_ms(50);
        evloop.run_once();
        assert_eq!(collects.get(), 2);
    }

    #[test]
    fn sighup_flag_invokes_hook_once() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock);

        let hups = Rc::new(Cell::new(0));
        evloop.set_maintenance(Box::new(RecordingHooks {
            steps: Rc::new(Cell::new(0)),
            collects: Rc::new(Cell::new(0)),
            hups: hups.clone(),
            settings: MaintenanceSettings::default(),
        }));

        signal::raise_sighup();
        let turn = evloop.run_once();
        assert!(!turn.idle);
        assert_eq!(hups.get(), 1);

        // Drapeau consommé : pas de second appel.
        evloop.run_once();
        assert_eq!(hups.get(), 1);
    }

    #[test]
    fn settings_are_clamped() {
        let raw = MaintenanceSettings {
            full_collect_interval_ms: 1,
            step_interval_ms: 99_999,
            step_units: 50_000,
        };
        let clamped = raw.clamped();
        assert_eq!(clamped.full_collect_interval_ms, 100);
        assert_eq!(clamped.step_interval_ms, 10_000);
        assert_eq!(clamped.step_units, 10_000);
    }

    #[test]
    fn exit_request_stops_the_loop() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock);

        signal::request_exit();
        let turn = evloop.run_once();
        assert_eq!(turn.exit, Some(LoopExit::Shutdown));
        signal::reset();
    }

    #[test]
    fn reload_request_is_consumed() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock);

        signal::request_reload();
        assert_eq!(evloop.run_once().exit, Some(LoopExit::Reload));
        assert!(evloop.run_once().exit.is_none());
    }

    #[test]
    fn timer_callbacks_clear_idle() {
        let _guard = signal::test_guard();
        signal::reset();
        let clock = Rc::new(ManualClock::new(0));
        let mut evloop = EventLoop::new(clock.clone());

        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = log.clone();
        evloop
            .timers_mut()
            .schedule_once(5, move |_| seen.borrow_mut().push(()));

        clock.advance_ms(5);
        let turn = evloop.run_once();
        assert!(!turn.idle);
        assert_eq!(log.borrow().len(), 1);
    }
}
