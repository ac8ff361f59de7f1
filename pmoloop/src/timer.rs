//! Cœur de timers : tas binaire min sur horloge microseconde
//!
//! Les timers sont alloués dans une arène (slab avec free-list) et
//! référencés depuis un tas binaire par index de slot. Un
//! [`TimerHandle`] porte un compteur de génération : annuler un handle
//! périmé est un no-op, jamais un use-after-free.
//!
//! # Protocole d'annulation pendant un callback
//!
//! Pendant l'exécution d'un callback, le slot du timer est marqué
//! `in_callback`. Une annulation à ce moment efface le callback et
//! positionne `free_after_callback` : le slot n'est libéré qu'au
//! retour du callback. Un timer périodique peut donc s'annuler
//! lui-même sans danger.
//!
//! # Exemple
//!
//! ```
//! use pmoloop::{ManualClock, TimerCore};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let clock = Rc::new(ManualClock::new(0));
//! let mut timers = TimerCore::new(clock.clone());
//!
//! let count = Rc::new(Cell::new(0u32));
//! let seen = count.clone();
//! timers.schedule_periodic(10, move |_| seen.set(seen.get() + 1));
//!
//! clock.advance_ms(10);
//! timers.tick();
//! clock.advance_ms(10);
//! timers.tick();
//! assert_eq!(count.get(), 2);
//! ```

use crate::clock::Clock;
use std::rc::Rc;

/// Callback d'un timer. Reçoit le cœur pour pouvoir programmer ou
/// annuler d'autres timers depuis le callback.
pub type TimerCallback = Box<dyn FnMut(&mut TimerCore)>;

/// Référence stable vers un timer programmé.
///
/// Le handle reste valide après expiration ou annulation : il devient
/// simplement inerte (la génération du slot ne correspond plus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    slot: usize,
    generation: u64,
}

struct TimerEntry {
    generation: u64,
    occupied: bool,
    interval_us: u64,
    next_shot_us: u64,
    heap_index: usize,
    active: bool,
    in_callback: bool,
    free_after_callback: bool,
    callback: Option<TimerCallback>,
}

impl TimerEntry {
    fn vacant() -> Self {
        Self {
            generation: 0,
            occupied: false,
            interval_us: 0,
            next_shot_us: 0,
            heap_index: 0,
            active: false,
            in_callback: false,
            free_after_callback: false,
            callback: None,
        }
    }
}

/// File de priorité des timers du processus.
pub struct TimerCore {
    clock: Rc<dyn Clock>,
    entries: Vec<TimerEntry>,
    free: Vec<usize>,
    heap: Vec<usize>,
    next_due: u64,
    in_tick: bool,
}

impl TimerCore {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
            free: Vec::new(),
            heap: Vec::new(),
            next_due: 0,
            in_tick: false,
        }
    }

    /// Programme un timer périodique. Premier déclenchement dans
    /// `interval_ms`, puis tous les `interval_ms` après chaque tir.
    pub fn schedule_periodic(
        &mut self,
        interval_ms: u32,
        callback: impl FnMut(&mut TimerCore) + 'static,
    ) -> TimerHandle {
        let interval_us = u64::from(interval_ms) * 1000;
        self.schedule(interval_us, interval_us, Box::new(callback))
    }

    /// Programme un timer à déclenchement unique. Le slot est libéré
    /// après le tir.
    pub fn schedule_once(
        &mut self,
        delay_ms: u32,
        callback: impl FnMut(&mut TimerCore) + 'static,
    ) -> TimerHandle {
        let delay_us = u64::from(delay_ms) * 1000;
        self.schedule(delay_us, 0, Box::new(callback))
    }

    fn schedule(&mut self, delay_us: u64, interval_us: u64, callback: TimerCallback) -> TimerHandle {
        let slot = self.alloc_slot();
        let entry = &mut self.entries[slot];
        entry.interval_us = interval_us;
        entry.next_shot_us = self.clock.now_us() + delay_us;
        entry.callback = Some(callback);

        let handle = TimerHandle {
            slot,
            generation: entry.generation,
        };
        self.heap_push(slot);
        handle
    }

    /// Annule un timer. Handle périmé ou déjà annulé : no-op.
    ///
    /// Si le timer est en train d'exécuter son propre callback, le
    /// callback est effacé et la libération différée au retour.
    pub fn cancel(&mut self, handle: TimerHandle) {
        let Some(entry) = self.entries.get_mut(handle.slot) else {
            return;
        };
        if !entry.occupied || entry.generation != handle.generation {
            return;
        }

        entry.callback = None;
        if entry.active {
            let index = entry.heap_index;
            self.heap_remove_at(index);
        }

        let entry = &mut self.entries[handle.slot];
        if entry.in_callback {
            entry.free_after_callback = true;
            return;
        }
        self.release_slot(handle.slot);
    }

    /// Draine les timers échus. Retourne le nombre de callbacks tirés
    /// (pour la détection d'oisiveté de la boucle).
    ///
    /// Un callback programmé avec une échéance déjà passée est tiré
    /// dans le même tick. L'appel depuis un callback est un no-op.
    pub fn tick(&mut self) -> usize {
        if self.in_tick {
            return 0;
        }

        let cur = self.clock.now_us();
        if self.next_due != 0 && cur < self.next_due {
            return 0;
        }

        self.in_tick = true;
        let mut fired = 0usize;

        while let Some(&root) = self.heap.first() {
            let now = self.clock.now_us();
            if now < self.entries[root].next_shot_us {
                break;
            }

            let Some(slot) = self.heap_remove_at(0) else {
                continue;
            };

            let Some(mut callback) = self.entries[slot].callback.take() else {
                self.release_slot(slot);
                continue;
            };

            self.entries[slot].in_callback = true;

            if self.entries[slot].interval_us == 0 {
                // Tir unique.
                callback(self);
                fired += 1;
                self.entries[slot].in_callback = false;
                self.release_slot(slot);
                continue;
            }

            // Périodique : la prochaine échéance se compte depuis le tir
            // effectif, pas depuis la programmation initiale.
            self.entries[slot].next_shot_us = now + self.entries[slot].interval_us;
            callback(self);
            fired += 1;

            let entry = &mut self.entries[slot];
            entry.in_callback = false;
            if entry.free_after_callback {
                // Annulé pendant son propre callback : libérer maintenant.
                self.release_slot(slot);
            } else {
                self.entries[slot].callback = Some(callback);
                self.heap_push(slot);
            }
        }

        self.in_tick = false;
        fired
    }

    /// Nombre de timers actifs dans le tas.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Prochaine échéance en microsecondes, 0 si aucun timer.
    pub fn next_due_us(&self) -> u64 {
        self.next_due
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    // ── Arène ───────────────────────────────────────────────────────

    fn alloc_slot(&mut self) -> usize {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.entries[slot];
            entry.occupied = true;
            entry.in_callback = false;
            entry.free_after_callback = false;
            slot
        } else {
            let mut entry = TimerEntry::vacant();
            entry.occupied = true;
            self.entries.push(entry);
            self.entries.len() - 1
        }
    }

    fn release_slot(&mut self, slot: usize) {
        let entry = &mut self.entries[slot];
        entry.occupied = false;
        entry.generation += 1;
        entry.callback = None;
        entry.active = false;
        entry.in_callback = false;
        entry.free_after_callback = false;
        self.free.push(slot);
    }

    // ── Tas binaire min sur next_shot_us ────────────────────────────

    fn update_next_due(&mut self) {
        self.next_due = match self.heap.first() {
            Some(&slot) => self.entries[slot].next_shot_us,
            None => 0,
        };
    }

    fn shot(&self, heap_index: usize) -> u64 {
        self.entries[self.heap[heap_index]].next_shot_us
    }

    fn heap_swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        let slot_a = self.heap[a];
        let slot_b = self.heap[b];
        self.entries[slot_a].heap_index = a;
        self.entries[slot_b].heap_index = b;
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.shot(parent) <= self.shot(index) {
                break;
            }
            self.heap_swap(parent, index);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = index * 2 + 1;
            let right = left + 1;
            let mut next = index;

            if left < self.heap.len() && self.shot(left) < self.shot(next) {
                next = left;
            }
            if right < self.heap.len() && self.shot(right) < self.shot(next) {
                next = right;
            }
            if next == index {
                break;
            }
            self.heap_swap(index, next);
            index = next;
        }
    }

    fn heap_push(&mut self, slot: usize) {
        let index = self.heap.len();
        self.entries[slot].heap_index = index;
        self.entries[slot].active = true;
        self.heap.push(slot);
        self.sift_up(index);
        self.update_next_due();
    }

    fn heap_remove_at(&mut self, index: usize) -> Option<usize> {
        if index >= self.heap.len() {
            return None;
        }

        let removed = self.heap[index];
        let last = self.heap.len() - 1;

        if index != last {
            self.heap[index] = self.heap[last];
            let moved = self.heap[index];
            self.entries[moved].heap_index = index;
        }
        self.heap.pop();

        if index < self.heap.len() {
            if index > 0 && self.shot(index) < self.shot((index - 1) / 2) {
                self.sift_up(index);
            } else {
                self.sift_down(index);
            }
        }

        let entry = &mut self.entries[removed];
        entry.heap_index = 0;
        entry.active = false;
        self.update_next_due();
        Some(removed)
    }
}
