//! Arbre de stages et fan-out aval
//!
//! Un stage implémente [`TsStage`] : il reçoit chaque paquet via
//! `on_ts` et pousse vers ses enfants à travers son [`Downstream`].
//! Le parent possède ses enfants (Rc fort) ; les envois se font en
//! ordre d'enregistrement, de façon synchrone. Pas de cycle : les
//! pipelines sont des arbres.

use pmompegts::TsPacket;
use std::cell::RefCell;
use std::rc::Rc;

/// Stage du pipeline : filtre, tampon ou sink.
///
/// `close` est le teardown, idempotent : il ferme les ressources du
/// stage (fichiers, tampons) et se propage aux enfants.
pub trait TsStage {
    fn on_ts(&mut self, packet: &TsPacket);

    fn close(&mut self) {}
}

/// Référence partagée vers un stage.
pub type SharedStage = Rc<RefCell<dyn TsStage>>;

/// Liste des enfants d'un stage.
///
/// Équivalent synchrone d'un fan-out multi-abonnés : tous les enfants
/// reçoivent le même paquet, dans l'ordre d'attachement.
#[derive(Default)]
pub struct Downstream {
    children: Vec<SharedStage>,
}

impl Downstream {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// Attache un enfant en queue de liste.
    pub fn attach(&mut self, child: SharedStage) {
        self.children.push(child);
    }

    /// Détache un enfant (comparaison par identité de pointeur).
    pub fn detach(&mut self, child: &SharedStage) {
        self.children.retain(|c| !Rc::ptr_eq(c, child));
    }

    /// Pousse `packet` vers chaque enfant, en ordre d'enregistrement.
    pub fn send(&self, packet: &TsPacket) {
        for child in &self.children {
            child.borrow_mut().on_ts(packet);
        }
    }

    /// Propage le teardown à tous les enfants.
    pub fn close_all(&self) {
        for child in &self.children {
            child.borrow_mut().close();
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Feuille générique : remet chaque paquet à un callback d'envoi.
///
/// C'est le point de sortie abstrait du cœur : l'hôte y branche son
/// émission réseau, les tests y branchent une capture.
pub struct CallbackSink {
    callback: Box<dyn FnMut(&TsPacket)>,
}

impl CallbackSink {
    pub fn new(callback: impl FnMut(&TsPacket) + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Variante directement partageable, prête à attacher.
    pub fn shared(callback: impl FnMut(&TsPacket) + 'static) -> SharedStage {
        Rc::new(RefCell::new(Self::new(callback)))
    }
}

impl TsStage for CallbackSink {
    fn on_ts(&mut self, packet: &TsPacket) {
        (self.callback)(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmompegts::null_packet;

    struct Tagger {
        tag: u8,
        downstream: Downstream,
    }

    impl TsStage for Tagger {
        fn on_ts(&mut self, packet: &TsPacket) {
            let mut out = *packet;
            out[187] = self.tag;
            self.downstream.send(&out);
        }
    }

    #[test]
    fn send_reaches_children_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fanout = Downstream::new();
        for id in 0..3u8 {
            let sink = log.clone();
            fanout.attach(CallbackSink::shared(move |_pkt: &TsPacket| {
                sink.borrow_mut().push(id);
            }));
        }

        fanout.send(&null_packet(0));
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn detach_removes_only_that_child() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fanout = Downstream::new();

        let keep = {
            let sink = log.clone();
            CallbackSink::shared(move |_pkt: &TsPacket| sink.borrow_mut().push("keep"))
        };
        let drop_me = {
            let sink = log.clone();
            CallbackSink::shared(move |_pkt: &TsPacket| sink.borrow_mut().push("drop"))
        };

        fanout.attach(keep);
        fanout.attach(drop_me.clone());
        fanout.detach(&drop_me);

        fanout.send(&null_packet(0));
        assert_eq!(*log.borrow(), vec!["keep"]);
    }

    #[test]
    fn packets_traverse_depth_first() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let leaf = {
            let sink = log.clone();
            CallbackSink::shared(move |pkt: &TsPacket| sink.borrow_mut().push(pkt[187]))
        };

        let mut middle = Tagger {
            tag: 9,
            downstream: Downstream::new(),
        };
        middle.downstream.attach(leaf);

        let mut root = Downstream::new();
        root.attach(Rc::new(RefCell::new(middle)));
        root.send(&null_packet(0));

        assert_eq!(*log.borrow(), vec![9]);
    }
}
