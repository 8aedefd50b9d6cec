//! HTTP(+ICY) network byte source (§4.3, §6 "ICY metadata").
//!
//! `reqwest` streams the response body on the tokio runtime while the
//! decoder thread calls the synchronous `ByteSource::read`; a
//! mutex/condvar-guarded queue bridges the two, the same shape the
//! decoder's output side uses to bridge the cpal callback to the async
//! world (`audio/output.rs`'s `Arc<Mutex<...>>` pattern), just inverted.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::error::{EngineError, Result, SourceError};
use crate::source::icy::IcyStripper;
use crate::source::ByteSource;

/// §4.3: connect must complete within this window or the source is
/// considered unreachable.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(7_500);
/// §4.3: the source must reach its first ready buffer within this window.
pub const PRECACHE_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_REDIRECTS: usize = 12;

struct State {
    buffer: VecDeque<u8>,
    eof: bool,
    error: Option<EngineError>,
    /// Set once the TCP connection is established (§4.3 `NetworkStarting`).
    connecting: bool,
    /// Set once the first bytes have arrived (§4.3 `NetworkReady`).
    ready: bool,
    last_title: Option<(u64, String)>,
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

/// Network byte source. Construct with `spawn`, which starts the background
/// fetch task immediately; `read` blocks the calling (decode) thread until
/// enough bytes have arrived, EOF, or a fatal error is recorded.
pub struct NetworkByteSource {
    shared: Arc<Shared>,
    underrun_wait_cap: Duration,
}

impl NetworkByteSource {
    /// Starts fetching `url` in the background on `handle`. `icy_metadata`
    /// requests the `Icy-MetaData: 1` header so compliant servers interleave
    /// `StreamTitle` metadata (§6).
    pub fn spawn(
        url: String,
        handle: &tokio::runtime::Handle,
        underrun_wait_cap: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                eof: false,
                error: None,
                connecting: true,
                ready: false,
                last_title: None,
            }),
            condvar: Condvar::new(),
        });

        let task_shared = Arc::clone(&shared);
        handle.spawn(async move {
            if let Err(e) = fetch_loop(url, Arc::clone(&task_shared)).await {
                let mut state = task_shared.state.lock().unwrap();
                state.error = Some(e);
                state.eof = true;
                task_shared.condvar.notify_all();
            }
        });

        Self {
            shared,
            underrun_wait_cap,
        }
    }

    /// A cloneable handle to this source's readiness/title signals, taken
    /// before the source itself is type-erased into `Box<dyn ByteSource>`
    /// and handed to the decoder (§4.3 `NetworkStarting`/`NetworkReady`, §6
    /// ICY `StreamTitle`) — the pipeline thread polls it directly rather
    /// than through the `ByteSource` trait object.
    pub fn monitor(&self) -> NetworkSourceMonitor {
        NetworkSourceMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Readiness/title signals for one network byte source, independent of the
/// `ByteSource` trait object it's bridged into.
#[derive(Clone)]
pub struct NetworkSourceMonitor {
    shared: Arc<Shared>,
}

impl NetworkSourceMonitor {
    /// `true` while the connection is still being established (for
    /// `NetworkStarting`).
    pub fn is_connecting(&self) -> bool {
        self.shared.state.lock().unwrap().connecting
    }

    /// `true` once the first bytes have arrived (for `NetworkReady`).
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().unwrap().ready
    }

    /// Drains the most recently parsed ICY title, if any arrived since the
    /// last call.
    pub fn take_title(&self) -> Option<(u64, String)> {
        self.shared.state.lock().unwrap().last_title.take()
    }
}

async fn fetch_loop(url: String, shared: Arc<Shared>) -> Result<()> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| EngineError::NetworkFatal(format!("client build failed: {e}")))?;

    let response = client
        .get(&url)
        .header("Icy-MetaData", "1")
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                EngineError::Source(SourceError::ConnectTimeout(CONNECT_TIMEOUT))
            } else if e.is_redirect() {
                EngineError::Source(SourceError::TooManyRedirects(MAX_REDIRECTS as u32))
            } else {
                EngineError::NetworkFatal(format!("{e}"))
            }
        })?;

    if !response.status().is_success() {
        return Err(EngineError::Source(SourceError::ServerRefused(
            response.status().to_string(),
        )));
    }

    let metaint: u64 = response
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    {
        let mut state = shared.state.lock().unwrap();
        state.connecting = false;
        shared.condvar.notify_all();
    }

    let mut stripper = IcyStripper::new(metaint);
    let mut stream = response.bytes_stream();
    let started = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| EngineError::NetworkTransient(format!("{e}")))?;
        let (audio, title) = stripper.process(&chunk);

        let mut state = shared.state.lock().unwrap();
        state.buffer.extend(audio);
        if !state.ready && !state.buffer.is_empty() {
            state.ready = true;
        }
        if let Some(title) = title {
            state.last_title = Some(title);
        }
        shared.condvar.notify_all();
        drop(state);

        if started.elapsed() > PRECACHE_TIMEOUT && !shared.state.lock().unwrap().ready {
            return Err(EngineError::Source(SourceError::PreCacheTimeout(
                PRECACHE_TIMEOUT,
            )));
        }
    }

    let mut state = shared.state.lock().unwrap();
    state.eof = true;
    shared.condvar.notify_all();
    debug!(url, "network source reached end of stream");
    Ok(())
}

impl ByteSource for NetworkByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(err) = state.error.take() {
                return Err(err);
            }
            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.buffer.pop_front().unwrap();
                }
                return Ok(n);
            }
            if state.eof {
                return Ok(0);
            }

            let (next_state, timeout_result) = self
                .shared
                .condvar
                .wait_timeout(state, self.underrun_wait_cap)
                .unwrap();
            state = next_state;
            if timeout_result.timed_out() && state.buffer.is_empty() && !state.eof {
                warn!("network source stalled past underrun wait cap");
                return Err(EngineError::Source(SourceError::StalledUnderrun(
                    self.underrun_wait_cap,
                )));
            }
        }
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _position: u64) -> Result<()> {
        Err(EngineError::InternalInvariantBroken(
            "network sources are not seekable".into(),
        ))
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_with(bytes: &[u8], eof: bool) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(State {
                buffer: bytes.iter().copied().collect(),
                eof,
                error: None,
                connecting: false,
                ready: true,
                last_title: None,
            }),
            condvar: Condvar::new(),
        })
    }

    #[test]
    fn read_drains_buffered_bytes() {
        let shared = shared_with(b"hello", false);
        let mut source = NetworkByteSource {
            shared,
            underrun_wait_cap: Duration::from_millis(50),
        };
        let mut buf = [0u8; 5];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_returns_zero_at_eof_with_empty_buffer() {
        let shared = shared_with(b"", true);
        let mut source = NetworkByteSource {
            shared,
            underrun_wait_cap: Duration::from_millis(50),
        };
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn read_times_out_as_stalled_underrun_when_nothing_arrives() {
        let shared = shared_with(b"", false);
        let mut source = NetworkByteSource {
            shared,
            underrun_wait_cap: Duration::from_millis(20),
        };
        let mut buf = [0u8; 4];
        let err = source.read(&mut buf).unwrap_err();
        assert!(matches!(err, EngineError::Source(SourceError::StalledUnderrun(_))));
    }

    #[test]
    fn network_source_is_not_seekable() {
        let shared = shared_with(b"x", true);
        let mut source = NetworkByteSource {
            shared,
            underrun_wait_cap: Duration::from_millis(20),
        };
        assert!(!source.is_seekable());
        assert!(source.seek(0).is_err());
    }
}
