//! pmompegts : primitives MPEG transport-stream
//!
//! Parsing de paquets TS de 188 octets, extraction de PCR, synthèse de
//! paquets NULL et assemblage de sections PSI (PAT/PMT) pour le
//! démultiplexage. Aucune I/O : le crate ne travaille que sur des
//! tampons de 188 octets déjà reçus.
//!
//! # Exemple
//!
//! ```
//! use pmompegts::{null_packet, pid, NULL_PID};
//!
//! let pkt = null_packet(3);
//! assert_eq!(pid(&pkt), NULL_PID);
//! ```

pub mod crc;
pub mod packet;
pub mod pcr;
pub mod psi;

pub use crc::{crc32_ieee, crc32_mpeg};
pub use packet::{
    MAX_PID, NULL_PID, SYNC_BYTE, TS_PACKET_SIZE, TsPacket, continuity_counter, fill_null,
    has_adaptation, has_payload, is_null, is_payload_start, is_sync, null_packet, payload,
    pid,
};
pub use pcr::{PCR_HZ, PCR_MAX, has_pcr, pcr, pcr_block_us};
pub use psi::{PacketType, PatItem, PmtItem, PsiAssembler, PsiSection, pes_type};
