//! Content stream handles
//!
//! A [`ContentStream`] is a shared handle to the bytes of a pending upload.
//! Clones refer to the same underlying source, so a stream can be matched by
//! identity across the buckets of a sync run and disposed exactly once.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// The bytes behind a content stream
#[derive(Debug)]
pub enum StreamSource {
    Memory(Vec<u8>),
    File(File),
}

impl StreamSource {
    /// Reads the whole source into memory
    pub fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self {
            StreamSource::Memory(bytes) => Ok(bytes),
            StreamSource::File(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

struct StreamInner {
    id: Uuid,
    source: Mutex<Option<StreamSource>>,
}

/// Shared, disposable handle to upload content
#[derive(Clone)]
pub struct ContentStream {
    inner: Arc<StreamInner>,
}

impl ContentStream {
    pub fn new(source: StreamSource) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                source: Mutex::new(Some(source)),
            }),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(StreamSource::Memory(bytes))
    }

    pub fn from_file(file: File) -> Self {
        Self::new(StreamSource::File(file))
    }

    /// Identity shared by every clone of this handle
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// True when both handles refer to the same stream
    pub fn ptr_eq(&self, other: &ContentStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Releases the underlying source. Idempotent.
    pub fn dispose(&self) {
        let mut guard = self
            .inner
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Takes ownership of the source, leaving the handle disposed
    pub fn take(&self) -> Option<StreamSource> {
        self.inner
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
