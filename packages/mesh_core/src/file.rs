//! Splitting files into mesh-sized chunks and putting them back together.

use std::collections::HashMap;

use crate::error::{MeshError, Result};
use crate::message::FileChunkPayload;

/// Fixed chunk size, well under common data-channel message limits.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Split `data` into chunk payloads. An empty file yields one empty chunk.
pub fn chunk_file(name: &str, mime: &str, data: &[u8]) -> Vec<FileChunkPayload> {
    let total = data.len().div_ceil(CHUNK_SIZE).max(1);
    (0..total)
        .map(|i| {
            let start = i * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(data.len());
            FileChunkPayload {
                name: name.to_string(),
                mime: mime.to_string(),
                size: data.len() as u64,
                chunk: i as u32,
                total: total as u32,
                data: data[start..end].to_vec(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransferKey {
    from: String,
    name: String,
    size: u64,
    total: u32,
}

struct Partial {
    mime: String,
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
}

/// A fully reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub from: String,
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

/// Collects chunks per `(from, name, size, total)` until a file is complete.
#[derive(Default)]
pub struct FileAssembler {
    partial: HashMap<TransferKey, Partial>,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transfers still waiting for chunks.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Add one chunk. Returns the file once its last missing chunk arrives.
    pub fn accept(&mut self, from: &str, chunk: FileChunkPayload) -> Result<Option<ReceivedFile>> {
        if chunk.total == 0 || chunk.chunk >= chunk.total {
            return Err(MeshError::Validation(format!(
                "chunk {} out of range (total {})",
                chunk.chunk, chunk.total
            )));
        }
        let max_size = chunk.total as u64 * CHUNK_SIZE as u64;
        if chunk.size > max_size || chunk.data.len() > CHUNK_SIZE {
            return Err(MeshError::Validation(format!(
                "declared size {} inconsistent with {} chunks",
                chunk.size, chunk.total
            )));
        }

        let key = TransferKey {
            from: from.to_string(),
            name: chunk.name.clone(),
            size: chunk.size,
            total: chunk.total,
        };
        let partial = self.partial.entry(key.clone()).or_insert_with(|| Partial {
            mime: chunk.mime.clone(),
            chunks: vec![None; chunk.total as usize],
            received: 0,
        });
        let slot = &mut partial.chunks[chunk.chunk as usize];
        if slot.is_none() {
            partial.received += 1;
        }
        *slot = Some(chunk.data);

        if partial.received < chunk.total {
            return Ok(None);
        }

        let Some(done) = self.partial.remove(&key) else {
            return Ok(None);
        };
        let data: Vec<u8> = done.chunks.into_iter().flatten().flatten().collect();
        if data.len() as u64 != key.size {
            return Err(MeshError::Validation(format!(
                "reassembled {} bytes, expected {}",
                data.len(),
                key.size
            )));
        }
        Ok(Some(ReceivedFile {
            from: key.from,
            name: key.name,
            mime: done.mime,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn chunks_cover_file() {
        let data = sample(40_000);
        let chunks = chunk_file("sample.bin", "application/octet-stream", &data);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.total == 3 && c.size == 40_000));
        assert_eq!(chunks[0].data.len(), CHUNK_SIZE);
        assert_eq!(chunks[2].data.len(), 40_000 - 2 * CHUNK_SIZE);
    }

    #[test]
    fn empty_file_is_one_chunk() {
        let chunks = chunk_file("empty", "text/plain", &[]);
        assert_eq!(chunks.len(), 1);
        let mut asm = FileAssembler::new();
        let file = asm.accept("A", chunks[0].clone()).unwrap().unwrap();
        assert!(file.data.is_empty());
    }

    #[test]
    fn reassembles_out_of_order() {
        let data = sample(40_000);
        let mut chunks = chunk_file("sample.bin", "application/octet-stream", &data);
        chunks.reverse();
        let mut asm = FileAssembler::new();
        let mut done = None;
        for c in chunks {
            if let Some(f) = asm.accept("A", c).unwrap() {
                done = Some(f);
            }
        }
        let file = done.unwrap();
        assert_eq!(file.data, data);
        assert_eq!(file.name, "sample.bin");
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn duplicate_chunk_does_not_complete_early() {
        let data = sample(CHUNK_SIZE + 10);
        let chunks = chunk_file("f", "x/y", &data);
        let mut asm = FileAssembler::new();
        assert!(asm.accept("A", chunks[0].clone()).unwrap().is_none());
        assert!(asm.accept("A", chunks[0].clone()).unwrap().is_none());
        assert!(asm.accept("A", chunks[1].clone()).unwrap().is_some());
    }

    #[test]
    fn senders_kept_apart() {
        let data = sample(CHUNK_SIZE + 1);
        let chunks = chunk_file("f", "x/y", &data);
        let mut asm = FileAssembler::new();
        asm.accept("A", chunks[0].clone()).unwrap();
        assert!(asm.accept("B", chunks[1].clone()).unwrap().is_none());
        assert_eq!(asm.pending(), 2);
    }

    #[test]
    fn rejects_out_of_range_and_inconsistent_size() {
        let mut asm = FileAssembler::new();
        let mut c = chunk_file("f", "x/y", b"abc").remove(0);
        c.chunk = 1;
        assert!(asm.accept("A", c.clone()).is_err());
        c.chunk = 0;
        c.size = CHUNK_SIZE as u64 * 2;
        assert!(asm.accept("A", c).is_err());
    }
}
