//! Scénarios d'intégration du cœur de timers et de la boucle.

use pmoloop::{Clock, EventLoop, ManualClock, TimerCore, TimerHandle};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn mixed_timer_set_fires_each_exactly_once_in_deadline_order() {
    let clock = Rc::new(ManualClock::new(1_000));
    let mut timers = TimerCore::new(clock.clone());

    let log: Rc<RefCell<Vec<(u64, u64)>>> = Rc::new(RefCell::new(Vec::new()));
    let delays = [40u32, 15, 90, 15, 60, 5];
    for (id, delay) in delays.iter().enumerate() {
        let sink = log.clone();
        let observer = clock.clone();
        timers.schedule_once(*delay, move |_| {
            sink.borrow_mut().push((id as u64, observer.now_us()));
        });
    }

    clock.advance_ms(90);
    let fired = timers.tick();
    assert_eq!(fired, delays.len());

    let log = log.borrow();
    assert_eq!(log.len(), delays.len());

    // Chaque timer a tiré exactement une fois.
    let mut ids_seen: Vec<u64> = log.iter().map(|(id, _)| *id).collect();
    ids_seen.sort_unstable();
    assert_eq!(ids_seen, vec![0, 1, 2, 3, 4, 5]);

    // Échéances non décroissantes dans l'ordre de tir ; l'ordre entre
    // les deux timers à 15 ms (égalité d'échéance) reste libre.
    let fired_delays: Vec<u32> = log.iter().map(|(id, _)| delays[*id as usize]).collect();
    assert!(fired_delays.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn cancel_during_fire_suppresses_the_sibling() {
    // A(10 ms) annule B(10 ms) depuis son callback : à t=11 ms seul A
    // a tiré, B ne tirera jamais.
    let clock = Rc::new(ManualClock::new(0));
    let mut timers = TimerCore::new(clock.clone());

    let a_fired = Rc::new(Cell::new(false));
    let b_fired = Rc::new(Cell::new(false));
    let b_handle: Rc<Cell<Option<TimerHandle>>> = Rc::new(Cell::new(None));

    let a_seen = a_fired.clone();
    let target = b_handle.clone();
    timers.schedule_once(10, move |core| {
        a_seen.set(true);
        if let Some(handle) = target.get() {
            core.cancel(handle);
        }
    });

    let b_seen = b_fired.clone();
    let handle = timers.schedule_once(10, move |_| b_seen.set(true));
    b_handle.set(Some(handle));

    clock.advance_ms(11);
    timers.tick();
    assert!(a_fired.get());
    assert!(!b_fired.get());
    assert!(timers.is_empty());

    clock.advance_ms(100);
    assert_eq!(timers.tick(), 0);
    assert!(!b_fired.get());
}

#[test]
fn periodic_drift_only_accumulates_when_tick_is_late() {
    let clock = Rc::new(ManualClock::new(0));
    let mut timers = TimerCore::new(clock.clone());

    let shots = Rc::new(RefCell::new(Vec::new()));
    let sink = shots.clone();
    let observer = clock.clone();
    timers.schedule_periodic(100, move |_| {
        sink.borrow_mut().push(observer.now_us());
    });

    // Tick ponctuel.
    clock.advance_ms(100);
    timers.tick();
    // Tick en retard de 30 ms : la période repart du tir effectif.
    clock.advance_ms(130);
    timers.tick();
    // Retour à un tick ponctuel relatif au tir précédent.
    clock.advance_ms(100);
    timers.tick();

    assert_eq!(*shots.borrow(), vec![100_000, 230_000, 330_000]);
}

#[test]
fn loop_composes_sources_and_timers() {
    struct PulseSource {
        remaining: u32,
        pulses: Rc<Cell<u32>>,
    }

    impl pmoloop::EventSource for PulseSource {
        fn tick(&mut self, _timers: &mut TimerCore) -> bool {
            if self.remaining == 0 {
                return false;
            }
            self.remaining -= 1;
            self.pulses.set(self.pulses.get() + 1);
            true
        }
    }

    let clock = Rc::new(ManualClock::new(0));
    let mut evloop = EventLoop::new(clock.clone());

    let pulses = Rc::new(Cell::new(0));
    evloop.add_source(Box::new(PulseSource {
        remaining: 3,
        pulses: pulses.clone(),
    }));

    let timer_fired = Rc::new(Cell::new(0));
    let seen = timer_fired.clone();
    evloop
        .timers_mut()
        .schedule_periodic(10, move |_| seen.set(seen.get() + 1));

    for _ in 0..5 {
        clock.advance_ms(10);
        evloop.run_once();
    }

    assert_eq!(pulses.get(), 3);
    assert_eq!(timer_fired.get(), 5);
}
