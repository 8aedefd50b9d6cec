//! ICY in-band metadata handling (§4.3, §6 "ICY metadata").
//!
//! Shoutcast-style streams interleave a periodic metadata block into the
//! audio byte stream when the server advertises `icy-metaint: N`: after
//! every N audio bytes, one length byte `B` is followed by `16 * B` bytes
//! of ASCII metadata (`0` means no metadata this period). Ported from
//! `original_source/decodergenericnetworksource.cpp`'s metadata stripper.

/// Strips ICY metadata out of a raw byte stream, in place, as bytes arrive
/// from the network in arbitrary-sized chunks. Tracks how many audio bytes
/// have been seen since the last metadata block so chunk boundaries never
/// need to align with the `metaint` period.
pub struct IcyStripper {
    metaint: u64,
    audio_bytes_since_block: u64,
    /// `None` outside a metadata block; `Some(remaining, buf)` while one is
    /// being accumulated (its length isn't known until the header byte is
    /// consumed, and a single network chunk may split the block).
    pending_metadata: Option<PendingMetadata>,
    stream_offset: u64,
    last_title: Option<String>,
}

struct PendingMetadata {
    remaining: usize,
    buf: Vec<u8>,
}

impl IcyStripper {
    /// `metaint == 0` disables metadata parsing entirely: the raw stream
    /// passes through unchanged (§8 boundary behavior).
    pub fn new(metaint: u64) -> Self {
        Self {
            metaint,
            audio_bytes_since_block: 0,
            pending_metadata: None,
            stream_offset: 0,
            last_title: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.metaint > 0
    }

    /// Feed one network chunk; returns the audio bytes with metadata
    /// stripped, plus any `StreamTitle` discovered in this call along with
    /// the stream byte offset it was discovered at.
    pub fn process(&mut self, chunk: &[u8]) -> (Vec<u8>, Option<(u64, String)>) {
        if !self.is_active() {
            self.stream_offset += chunk.len() as u64;
            return (chunk.to_vec(), None);
        }

        let mut audio = Vec::with_capacity(chunk.len());
        let mut title_found = None;
        let mut i = 0;

        while i < chunk.len() {
            if let Some(pending) = &mut self.pending_metadata {
                let take = pending.remaining.min(chunk.len() - i);
                pending.buf.extend_from_slice(&chunk[i..i + take]);
                pending.remaining -= take;
                i += take;
                if pending.remaining == 0 {
                    let block = self.pending_metadata.take().unwrap();
                    if let Some(title) = parse_stream_title(&block.buf) {
                        self.last_title = Some(title.clone());
                        title_found = Some((self.stream_offset, title));
                    }
                    self.audio_bytes_since_block = 0;
                }
                continue;
            }

            if self.audio_bytes_since_block == self.metaint {
                let length_byte = chunk[i] as usize;
                i += 1;
                let byte_len = length_byte * 16;
                if byte_len == 0 {
                    self.audio_bytes_since_block = 0;
                } else {
                    self.pending_metadata = Some(PendingMetadata {
                        remaining: byte_len,
                        buf: Vec::with_capacity(byte_len),
                    });
                }
                continue;
            }

            let take = (self.metaint - self.audio_bytes_since_block)
                .min((chunk.len() - i) as u64) as usize;
            audio.extend_from_slice(&chunk[i..i + take]);
            self.audio_bytes_since_block += take as u64;
            self.stream_offset += take as u64;
            i += take;
        }

        (audio, title_found)
    }

    pub fn last_title(&self) -> Option<&str> {
        self.last_title.as_deref()
    }
}

/// Parse `StreamTitle='...';` out of a raw metadata block (§4.3/§6).
fn parse_stream_title(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let key = "StreamTitle='";
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest.find("';")?;
    Some(rest[..end].to_string())
}
