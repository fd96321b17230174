//! Where pixels come from and where encoded bytes go.
//!
//! A load reads from a file, an in-memory buffer, or a seekable stream
//! ([`LoadInput`]); a save writes to a file, a growable buffer, or any
//! writer ([`SaveTarget`]).

use crate::error::ForeignError;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Which of the three I/O variants a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoKind {
    File,
    Buffer,
    Stream,
}

impl IoKind {
    /// Operation-name suffix for this kind on the given side.
    pub const fn suffix(self, load: bool) -> &'static str {
        match (self, load) {
            (IoKind::File, _) => "",
            (IoKind::Buffer, _) => "_buffer",
            (IoKind::Stream, true) => "_source",
            (IoKind::Stream, false) => "_target",
        }
    }
}

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A shared, seekable byte stream.
///
/// Clones share the underlying reader and its position.
#[derive(Clone)]
pub struct Source {
    reader: Arc<Mutex<Box<dyn ReadSeek>>>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Source")
    }
}

impl Source {
    pub fn new(reader: impl Read + Seek + Send + 'static) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ReadSeek>> {
        // a panic while reading leaves the position undefined, which every
        // caller handles by seeking first
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seek back to offset zero.
    pub fn rewind(&self) -> io::Result<()> {
        self.lock().seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Up to `n` bytes from the start, leaving the stream rewound.
    pub fn sniff(&self, n: usize) -> io::Result<Vec<u8>> {
        let mut reader = self.lock();
        reader.seek(SeekFrom::Start(0))?;
        let mut head = Vec::with_capacity(n);
        reader.by_ref().take(n as u64).read_to_end(&mut head)?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(head)
    }

    /// The whole stream from offset zero.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.lock();
        reader.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Current read position.
    pub fn position(&self) -> io::Result<u64> {
        self.lock().stream_position()
    }
}

/// Input to a load.
#[derive(Debug, Clone)]
pub enum LoadInput {
    File(PathBuf),
    Buffer(Arc<[u8]>),
    Source(Source),
}

impl LoadInput {
    pub fn kind(&self) -> IoKind {
        match self {
            LoadInput::File(_) => IoKind::File,
            LoadInput::Buffer(_) => IoKind::Buffer,
            LoadInput::Source(_) => IoKind::Stream,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            LoadInput::File(p) => Some(p),
            _ => None,
        }
    }

    /// Up to `n` leading bytes. Streams are left rewound.
    pub fn sniff(&self, n: usize) -> Result<Vec<u8>, ForeignError> {
        match self {
            LoadInput::File(path) => {
                let mut head = Vec::with_capacity(n);
                File::open(path)?.take(n as u64).read_to_end(&mut head)?;
                Ok(head)
            }
            LoadInput::Buffer(bytes) => Ok(bytes[..n.min(bytes.len())].to_vec()),
            LoadInput::Source(source) => Ok(source.sniff(n)?),
        }
    }

    /// Every byte of the input.
    pub fn read_all(&self) -> Result<Arc<[u8]>, ForeignError> {
        match self {
            LoadInput::File(path) => Ok(std::fs::read(path)?.into()),
            LoadInput::Buffer(bytes) => Ok(Arc::clone(bytes)),
            LoadInput::Source(source) => Ok(source.read_all()?.into()),
        }
    }

    /// Short human-readable name for log and error messages.
    pub fn describe(&self) -> String {
        match self {
            LoadInput::File(path) => path.display().to_string(),
            LoadInput::Buffer(bytes) => format!("memory buffer ({} bytes)", bytes.len()),
            LoadInput::Source(_) => "stream".to_string(),
        }
    }
}

/// Output of a save.
pub enum SaveTarget {
    File(PathBuf),
    Buffer(Vec<u8>),
    Stream(Box<dyn Write + Send>),
}

impl fmt::Debug for SaveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveTarget::File(p) => f.debug_tuple("File").field(p).finish(),
            SaveTarget::Buffer(b) => write!(f, "Buffer({} bytes)", b.len()),
            SaveTarget::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl SaveTarget {
    pub fn kind(&self) -> IoKind {
        match self {
            SaveTarget::File(_) => IoKind::File,
            SaveTarget::Buffer(_) => IoKind::Buffer,
            SaveTarget::Stream(_) => IoKind::Stream,
        }
    }

    /// Write a complete encoded image.
    pub fn write_encoded(&mut self, bytes: &[u8]) -> Result<(), ForeignError> {
        match self {
            SaveTarget::File(path) => std::fs::write(path, bytes)?,
            SaveTarget::Buffer(buffer) => buffer.extend_from_slice(bytes),
            SaveTarget::Stream(writer) => {
                writer.write_all(bytes)?;
                writer.flush()?;
            }
        }
        Ok(())
    }

    /// The buffer, for buffer targets.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            SaveTarget::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_leaves_stream_at_start() {
        let source = Source::from_bytes(b"NIMGxxxx".to_vec());
        assert_eq!(source.sniff(4).unwrap(), b"NIMG");
        assert_eq!(source.position().unwrap(), 0);
    }

    #[test]
    fn short_buffer_sniff_returns_what_there_is() {
        let input = LoadInput::Buffer(Arc::from(&b"ab"[..]));
        assert_eq!(input.sniff(8).unwrap(), b"ab");
    }

    #[test]
    fn file_sniff_reads_head() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"hello world").unwrap();
        let input = LoadInput::File(tmp.path().to_path_buf());
        assert_eq!(input.sniff(5).unwrap(), b"hello");
    }

    #[test]
    fn buffer_target_accumulates() {
        let mut target = SaveTarget::Buffer(Vec::new());
        target.write_encoded(b"abc").unwrap();
        assert_eq!(target.into_buffer().unwrap(), b"abc");
    }

    #[test]
    fn operation_suffixes() {
        assert_eq!(IoKind::Stream.suffix(true), "_source");
        assert_eq!(IoKind::Stream.suffix(false), "_target");
        assert_eq!(IoKind::Buffer.suffix(false), "_buffer");
        assert_eq!(IoKind::File.suffix(true), "");
    }
}
