//! pmoloop : boucle d'évènements coopérative mono-thread
//!
//! Ce crate fournit le substrat d'ordonnancement de PMOStream :
//! - Une horloge monotone en microsecondes ([`Clock`])
//! - Un cœur de timers en tas binaire min ([`TimerCore`])
//! - Une boucle d'évènements coopérative ([`EventLoop`]) qui compose
//!   sources d'I/O, timers, messages inter-threads et maintenance
//! - Des drapeaux de signaux POSIX observés entre deux itérations
//!
//! # Modèle d'exécution
//!
//! Tout tourne sur un seul thread : les callbacks s'exécutent jusqu'au
//! bout avant le suivant, sans préemption. Le seul point de suspension
//! est le sommeil de 1 ms quand la boucle est oisive. Les threads
//! externes ne communiquent qu'à travers la [`Mailbox`], drainée une
//! fois par itération.
//!
//! # Exemple
//!
//! ```
//! use pmoloop::{Clock, EventLoop, ManualClock};
//! use std::rc::Rc;
//!
//! let clock = Rc::new(ManualClock::new(0));
//! let mut evloop = EventLoop::new(clock.clone());
//!
//! let fired = Rc::new(std::cell::Cell::new(false));
//! let flag = fired.clone();
//! evloop
//!     .timers_mut()
//!     .schedule_once(10, move |_| flag.set(true));
//!
//! clock.advance_ms(10);
//! evloop.run_once();
//! assert!(fired.get());
//! ```

pub mod clock;
pub mod event_loop;
pub mod signal;
pub mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use event_loop::{
    EventLoop, EventSource, LoopExit, Mailbox, MailboxSender, MaintenanceHooks,
    MaintenanceSettings, NoopMaintenance,
};
pub use timer::{TimerCore, TimerHandle};
