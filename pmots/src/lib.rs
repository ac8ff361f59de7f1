//! pmots : pipeline de flux MPEG-TS
//!
//! Un pipeline est un arbre de stages possédés du parent vers les
//! enfants. Chaque paquet de 188 octets traverse l'arbre en profondeur
//! d'abord, de façon synchrone, sur le thread de la boucle : aucun
//! stage ne met en file sauf s'il est lui-même un tampon (jitter,
//! playout).
//!
//! # Stages fournis
//!
//! - [`nodes::jitter::JitterStage`] : retarde le flux d'un délai fixe
//! - [`nodes::playout::PlayoutStage`] : lisse la sortie à un débit
//!   cible, avec bourrage NULL sur famine
//! - [`pipeline::CallbackSink`] : feuille générique (callback d'envoi)
//!
//! # Exemple
//!
//! ```
//! use pmots::pipeline::{CallbackSink, Downstream};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let seen = Rc::new(RefCell::new(0u32));
//! let sink = {
//!     let seen = seen.clone();
//!     CallbackSink::shared(move |_pkt| *seen.borrow_mut() += 1)
//! };
//!
//! let mut fanout = Downstream::new();
//! fanout.attach(sink);
//! fanout.send(&pmompegts::null_packet(0));
//! assert_eq!(*seen.borrow(), 1);
//! ```

pub mod nodes;
pub mod pipeline;
pub mod ring;

pub use pipeline::{CallbackSink, Downstream, SharedStage, TsStage};
pub use ring::PacketRing;
