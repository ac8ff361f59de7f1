//! Stages tampon du pipeline TS
//!
//! Les deux stages à anneau : le jitter buffer (retard fixe) et le
//! playout pacer (débit de sortie régulé). Chacun enregistre un timer
//! périodique sur le cœur de timers et relâche ses paquets depuis le
//! callback.

pub mod jitter;
pub mod playout;

pub use jitter::{JitterConfig, JitterStage, JitterStats};
pub use playout::{PlayoutConfig, PlayoutMode, PlayoutStage, PlayoutStats};
