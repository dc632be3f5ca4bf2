// On-disk layout of embedding and index directories
use geoknn_core::{Error, HnswParams, IndexKind, Metric, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const INDEX_FORMAT_VERSION: u32 = 1;

pub const METADATA_FILE: &str = "metadata.json";
pub const GRAPH_FILE: &str = "graph.bin";

pub const CHUNK_EXTENSION: &str = ".emb";
pub const COMPRESSED_CHUNK_EXTENSION: &str = ".emb.gz";

/// Contents of `metadata.json` in an index directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub kind: IndexKind,
    pub metric: Metric,
    pub dimension: usize,
    pub count: usize,
    #[serde(default)]
    pub params: HnswParams,
    /// Hex sha256 of the graph file
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl IndexMetadata {
    pub fn check_version(&self) -> Result<()> {
        if self.format_version != INDEX_FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "unsupported index format version {} (expected {})",
                self.format_version, INDEX_FORMAT_VERSION
            )));
        }
        Ok(())
    }
}

/// One embedding chunk file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub dimension: u32,
    pub records: Vec<(u64, Vec<f32>)>,
}

impl EmbeddingChunk {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension as u32,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, id: u64, vector: Vec<f32>) {
        self.records.push((id, vector));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Chunk files end in `.emb` or `.emb.gz`; names starting with `_` or `.`
/// are scratch files and never read
pub fn is_chunk_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('_') || name.starts_with('.') {
        return false;
    }
    name.ends_with(CHUNK_EXTENSION) || name.ends_with(COMPRESSED_CHUNK_EXTENSION)
}

pub fn is_compressed(path: &Path) -> bool {
    path.to_str()
        .map(|p| p.ends_with(COMPRESSED_CHUNK_EXTENSION))
        .unwrap_or(false)
}

pub fn checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_chunk_file_names() {
        assert!(is_chunk_file(&PathBuf::from("/data/FR/part-000.emb")));
        assert!(is_chunk_file(&PathBuf::from("part-001.emb.gz")));
        assert!(!is_chunk_file(&PathBuf::from("_SUCCESS")));
        assert!(!is_chunk_file(&PathBuf::from("_tmp.emb")));
        assert!(!is_chunk_file(&PathBuf::from(".part-000.emb.crc")));
        assert!(!is_chunk_file(&PathBuf::from(".hidden.emb")));
        assert!(!is_chunk_file(&PathBuf::from("notes.txt")));

        assert!(is_compressed(&PathBuf::from("a.emb.gz")));
        assert!(!is_compressed(&PathBuf::from("a.emb")));
    }

    #[test]
    fn test_metadata_json_defaults() {
        let json = r#"{
            "format_version": 1,
            "kind": "flat",
            "metric": "euclidean",
            "dimension": 3,
            "count": 2,
            "checksum": "abc"
        }"#;
        let meta: IndexMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.kind, IndexKind::Flat);
        assert_eq!(meta.metric, Metric::Euclidean);
        assert_eq!(meta.params, HnswParams::default());
        assert!(meta.check_version().is_ok());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let meta = IndexMetadata {
            format_version: 99,
            kind: IndexKind::Hnsw,
            metric: Metric::Cosine,
            dimension: 4,
            count: 0,
            params: HnswParams::default(),
            checksum: String::new(),
            created_at: None,
        };
        assert!(matches!(meta.check_version(), Err(Error::IndexCorrupt(_))));
    }

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum(b"geoknn"), checksum(b"geoknn"));
        assert_ne!(checksum(b"geoknn"), checksum(b"geoknm"));
        assert_eq!(checksum(b"").len(), 64);
    }
}
