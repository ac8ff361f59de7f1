//! pmohls : sortie HLS d'un flux MPEG-TS
//!
//! Le sink [`HlsSink`] découpe son entrée en fichiers TS bornés en
//! durée et maintient une playlist M3U8 glissante. La durée est
//! comptée à l'horloge murale ou au fil des PCR, au choix de la
//! configuration ; un appel externe à [`HlsSink::discontinuity`]
//! marque proprement une rupture du flux.
//!
//! # Arborescence produite
//!
//! ```text
//! {path}/
//!   index.m3u8
//!   segment_00000000.ts
//!   segment_00000001.ts
//!   …
//! ```
//!
//! # Exemple
//!
//! ```no_run
//! use pmohls::{HlsConfig, HlsSink};
//! use pmoloop::MonotonicClock;
//! use std::rc::Rc;
//!
//! # fn main() -> pmohls::Result<()> {
//! let config = HlsConfig {
//!     path: "/var/lib/stream/hls".into(),
//!     target_duration_s: 6,
//!     ..Default::default()
//! };
//! let sink = HlsSink::build(config, Rc::new(MonotonicClock::new()))?;
//! # let _ = sink;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod playlist;
pub mod segmenter;

pub use config::{HlsConfig, SegmentNaming};
pub use error::{Error, Result};
pub use playlist::SegmentRecord;
pub use segmenter::HlsSink;
