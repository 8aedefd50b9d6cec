//! Local file byte source (§4.3), plus the one concrete "local-file source"
//! playlist plugin (§1, §6 `SourcePlugin`) this engine ships so `main.rs`
//! has a real collaborator to hand the Coordinator without a catalog crate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result, SourceError};
use crate::model::track_descriptor::TrackDescriptor;
use crate::plugin::{PlaylistMode, SourcePlugin};
use crate::source::ByteSource;

/// File extensions this engine's decoder can plausibly handle, used only to
/// filter a directory scan — the actual accept/reject decision still lives
/// with symphonia's own format probe inside `TrackDecoder::new` (§4.3).
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "wav", "m4a", "aac"];

/// Walks a root directory once at startup and hands its files out as
/// descriptors in filesystem order, looping back to the start once
/// exhausted. This is the "local-file source" §4.1's scheduling policy
/// grants startup priority to, not a full catalog/library integration
/// (explicitly out of scope, SPEC_FULL.md §1).
pub struct LocalDirectorySource {
    plugin_id: String,
    state: Mutex<LocalDirectoryState>,
}

struct LocalDirectoryState {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl LocalDirectorySource {
    pub fn scan(root: impl AsRef<Path>) -> Self {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root.as_ref())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| AUDIO_EXTENSIONS.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext)))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        debug!(count = files.len(), root = %root.as_ref().display(), "scanned local directory source");
        Self {
            plugin_id: "local".to_string(),
            state: Mutex::new(LocalDirectoryState { files, cursor: 0 }),
        }
    }

    fn next_descriptor(&self) -> Option<TrackDescriptor> {
        let mut state = self.state.lock();
        if state.files.is_empty() {
            return None;
        }
        let path = state.files[state.cursor % state.files.len()].clone();
        state.cursor = state.cursor.wrapping_add(1);
        let title = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
        let mut descriptor = TrackDescriptor::new(path.display().to_string(), &self.plugin_id, false);
        descriptor.title = title;
        Some(descriptor)
    }
}

#[async_trait]
impl SourcePlugin for LocalDirectorySource {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn priority(&self) -> i32 {
        0
    }

    fn is_ready(&self) -> bool {
        !self.state.lock().files.is_empty()
    }

    async fn get_playlist(&self, count: usize, _mode: PlaylistMode) -> Result<Vec<TrackDescriptor>> {
        Ok((0..count).filter_map(|_| self.next_descriptor()).collect())
    }

    async fn get_replacement(&self) -> Result<Option<TrackDescriptor>> {
        Ok(self.next_descriptor())
    }

    fn unable_to_start(&self, url: &str) {
        debug!(url, "local source: unable to start");
    }

    fn cast_finished_early(&self, _url: &str, _played_s: u64) {}

    fn done(&self, url: &str) {
        debug!(url, "local source: track done");
    }
}

pub struct LocalByteSource {
    file: File,
    len: u64,
}

impl LocalByteSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            EngineError::Source(SourceError::FileNotFound(format!(
                "{}: {e}",
                path.display()
            )))
        })?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self { file, len })
    }
}

impl ByteSource for LocalByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_full_file_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let mut source = LocalByteSource::open(tmp.path()).unwrap();
        assert_eq!(source.byte_len(), Some(11));
        let mut buf = [0u8; 11];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn seek_repositions_read_cursor() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut source = LocalByteSource::open(tmp.path()).unwrap();
        source.seek(5).unwrap();
        let mut buf = [0u8; 5];
        source.read(&mut buf).unwrap();
        assert_eq!(&buf, b"56789");
    }

    #[test]
    fn open_nonexistent_path_errors() {
        assert!(LocalByteSource::open("/nonexistent/path/does-not-exist.mp3").is_err());
    }

    #[tokio::test]
    async fn directory_source_finds_audio_files_and_ignores_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("b.flac"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let source = LocalDirectorySource::scan(dir.path());
        assert!(source.is_ready());
        let playlist = source.get_playlist(2, PlaylistMode::Normal).await.unwrap();
        assert_eq!(playlist.len(), 2);
        assert!(playlist.iter().all(|d| d.url.ends_with(".mp3") || d.url.ends_with(".flac")));
    }

    #[tokio::test]
    async fn directory_source_loops_once_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("only.mp3"), b"x").unwrap();

        let source = LocalDirectorySource::scan(dir.path());
        let first = source.get_replacement().await.unwrap().unwrap();
        let second = source.get_replacement().await.unwrap().unwrap();
        assert_eq!(first.url, second.url);
    }

    #[tokio::test]
    async fn empty_directory_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalDirectorySource::scan(dir.path());
        assert!(!source.is_ready());
        assert!(source.get_replacement().await.unwrap().is_none());
    }
}
