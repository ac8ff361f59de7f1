//! Horloge monotone en microsecondes
//!
//! Toutes les échéances du cœur (timers, jitter, pacer, segmenteur)
//! sont exprimées en microsecondes depuis le démarrage du processus.
//! L'horloge est injectée via le trait [`Clock`] : l'implémentation
//! réelle est [`MonotonicClock`], les tests utilisent [`ManualClock`]
//! pour avancer le temps explicitement.

use once_cell::sync::Lazy;
use std::cell::Cell;
use std::time::Instant;

/// Ancre partagée : toutes les instances de [`MonotonicClock`] du
/// processus mesurent le temps depuis le même instant.
static PROCESS_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Horloge en microsecondes, monotone au sein d'un processus.
pub trait Clock {
    /// Retourne le temps courant en microsecondes. Ne décroît jamais.
    fn now_us(&self) -> u64;
}

/// Horloge réelle basée sur [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Self {
        // Force l'initialisation de l'ancre dès la première horloge.
        let _ = *PROCESS_ANCHOR;
        Self
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        PROCESS_ANCHOR.elapsed().as_micros() as u64
    }
}

/// Horloge pilotée manuellement, pour les tests et la simulation.
///
/// # Exemple
///
/// ```
/// use pmoloop::{Clock, ManualClock};
///
/// let clock = ManualClock::new(0);
/// clock.advance_ms(20);
/// assert_eq!(clock.now_us(), 20_000);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    us: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            us: Cell::new(start_us),
        }
    }

    /// Avance l'horloge de `delta` microsecondes.
    pub fn advance_us(&self, delta: u64) {
        self.us.set(self.us.get() + delta);
    }

    /// Avance l'horloge de `delta` millisecondes.
    pub fn advance_ms(&self, delta: u64) {
        self.advance_us(delta * 1000);
    }

    /// Positionne l'horloge. Les retours en arrière sont ignorés :
    /// la monotonie est garantie par construction.
    pub fn set_us(&self, value: u64) {
        if value > self.us.get() {
            self.us.set(value);
        }
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.us.get()
    }
}
