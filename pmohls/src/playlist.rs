//! Playlist M3U8 glissante
//!
//! La playlist liste les `window` segments les plus récents ;
//! `#EXT-X-TARGETDURATION` part de la durée cible configurée et ne
//! fait que croître pendant la vie du processus.

use std::collections::VecDeque;
use std::fmt::Write as _;

/// Segment terminé, tel que listé dans la playlist.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub seq: i64,
    pub duration_sec: f64,
    pub name: String,
    pub discontinuity: bool,
}

/// Compose le contenu M3U8 : en-tête puis la tranche des `window`
/// segments les plus récents.
pub fn render(
    records: &VecDeque<SegmentRecord>,
    window: usize,
    playlist_target: u32,
    base_url: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{playlist_target}");

    let skip = records.len().saturating_sub(window);
    let mut media_seq_written = false;

    for record in records.iter().skip(skip) {
        if !media_seq_written {
            let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", record.seq);
            media_seq_written = true;
        }
        if record.discontinuity {
            out.push_str("#EXT-X-DISCONTINUITY\n");
        }
        let _ = writeln!(out, "#EXTINF:{:.3},", record.duration_sec);
        match base_url {
            Some(base) if !base.is_empty() => {
                if base.ends_with('/') {
                    let _ = writeln!(out, "{base}{}", record.name);
                } else {
                    let _ = writeln!(out, "{base}/{}", record.name);
                }
            }
            _ => {
                let _ = writeln!(out, "{}", record.name);
            }
        }
    }

    out
}
