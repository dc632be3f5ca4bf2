// Atomic writers for embedding chunks and index directories
use crate::format::{self, EmbeddingChunk, IndexMetadata, GRAPH_FILE, INDEX_FORMAT_VERSION, METADATA_FILE};
use atomicwrites::{AllowOverwrite, AtomicFile};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use geoknn_core::{EmbeddingStore, Error, HnswParams, IndexKind, Metric, Result, SimilarityIndex};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkCompression {
    #[default]
    None,
    Gzip,
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    AtomicFile::new(path, AllowOverwrite)
        .write(|f| f.write_all(bytes))
        .map_err(|e| match e {
            atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => e,
        })?;
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

pub fn write_chunk(path: &Path, chunk: &EmbeddingChunk, compression: ChunkCompression) -> Result<()> {
    let encoded = encode(chunk)?;
    let bytes = match compression {
        ChunkCompression::None => encoded,
        ChunkCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(encoded.len() / 2), Compression::default());
            encoder.write_all(&encoded)?;
            encoder.finish()?
        }
    };
    atomic_write(path, &bytes)
}

/// Write a whole store as `part-NNNNN.emb[.gz]` chunks of at most
/// `chunk_size` records. Returns the number of chunks written.
pub fn write_embeddings(
    dir: &Path,
    store: &EmbeddingStore,
    chunk_size: usize,
    compression: ChunkCompression,
) -> Result<usize> {
    fs::create_dir_all(dir)?;
    let chunk_size = chunk_size.max(1);
    let extension = match compression {
        ChunkCompression::None => format::CHUNK_EXTENSION,
        ChunkCompression::Gzip => format::COMPRESSED_CHUNK_EXTENSION,
    };

    let ids = store.ids();
    let mut written = 0;
    for (n, part) in ids.chunks(chunk_size).enumerate() {
        let mut chunk = EmbeddingChunk::new(store.dimension());
        for &id in part {
            if let Some(v) = store.get(id) {
                chunk.push(id, v.to_vec());
            }
        }
        write_chunk(&dir.join(format!("part-{:05}{}", n, extension)), &chunk, compression)?;
        written += 1;
    }
    tracing::info!(dir = %dir.display(), chunks = written, documents = ids.len(), "wrote embeddings");
    Ok(written)
}

/// Persist an index as `graph.bin` plus `metadata.json`.
///
/// The graph is written first, so a reader never sees metadata whose
/// checksum points at a graph that is not there yet.
pub fn write_index(dir: &Path, index: &SimilarityIndex) -> Result<IndexMetadata> {
    fs::create_dir_all(dir)?;
    let (bytes, params) = match index {
        SimilarityIndex::Flat(flat) => (encode(&flat.ids())?, HnswParams::default()),
        SimilarityIndex::Hnsw(hnsw) => (encode(hnsw.graph())?, *hnsw.params()),
    };
    atomic_write(&dir.join(GRAPH_FILE), &bytes)?;

    let metadata = IndexMetadata {
        format_version: INDEX_FORMAT_VERSION,
        kind: index.kind(),
        metric: index.metric(),
        dimension: index.dimension(),
        count: index.len(),
        params,
        checksum: format::checksum(&bytes),
        created_at: Some(Utc::now().to_rfc3339()),
    };
    let json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    atomic_write(&dir.join(METADATA_FILE), &json)?;

    tracing::info!(
        dir = %dir.display(),
        kind = ?metadata.kind,
        documents = metadata.count,
        "wrote index"
    );
    Ok(metadata)
}

/// Build an index over every document of `store` and persist it
pub fn build_index_dir(
    dir: &Path,
    store: &EmbeddingStore,
    kind: IndexKind,
    metric: Metric,
    params: HnswParams,
) -> Result<IndexMetadata> {
    let index = SimilarityIndex::build(store, &store.ids(), kind, metric, params)?;
    write_index(dir, &index)
}
