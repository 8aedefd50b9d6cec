//! Byte source stage (§4.3): the first link in a Track's pipeline, handing
//! raw bytes to the decoder. Two concrete sources ship here: local files and
//! HTTP(+ICY) network streams, matching §6's "Source plugin" role.

pub mod icy;
pub mod local;
pub mod network;

pub use local::{LocalByteSource, LocalDirectorySource};
pub use network::{NetworkByteSource, NetworkSourceMonitor};

use crate::error::Result;

/// Non-seekable-aware byte source consumed by the decoder's symphonia
/// `MediaSource` adapter. `read` blocks the calling (decode) thread until
/// bytes are available, EOF is reached, or a fatal error occurs — matching
/// symphonia's synchronous `Read` contract.
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes; returns the number of bytes read, `0`
    /// at end of stream. Blocks on network sources while waiting for more
    /// data to arrive (§4.3 "local_source_grace"/underrun wait semantics).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// `true` if `seek` is meaningful for this source (local files only).
    fn is_seekable(&self) -> bool;

    fn seek(&mut self, position: u64) -> Result<()>;

    /// Total byte length if known up front (local files); `None` for
    /// streams of unknown/unbounded length (§4.3 network source).
    fn byte_len(&self) -> Option<u64>;
}
