// Loading of embedding and index directories into memory
use crate::format::{self, EmbeddingChunk, IndexMetadata, GRAPH_FILE, METADATA_FILE};
use flate2::read::GzDecoder;
use geoknn_core::{
    EmbeddingStore, EmbeddingStoreBuilder, Error, FlatIndex, HnswGraph, HnswIndex, IndexKind, Result,
    SimilarityIndex,
};
use rayon::prelude::*;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Chunk files of an embedding directory, sorted by name
pub fn list_chunks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut chunks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && format::is_chunk_file(&path) {
            chunks.push(path);
        } else {
            tracing::debug!(path = %path.display(), "skipping non-chunk entry");
        }
    }
    chunks.sort();
    Ok(chunks)
}

/// Read and decode one chunk file
pub fn read_chunk(path: &Path) -> Result<EmbeddingChunk> {
    let raw = fs::read(path)?;
    let bytes = if format::is_compressed(path) {
        let mut decoded = Vec::with_capacity(raw.len() * 2);
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| Error::IndexCorrupt(format!("{}: bad gzip stream: {}", path.display(), e)))?;
        decoded
    } else {
        raw
    };
    bincode::deserialize(&bytes)
        .map_err(|e| Error::IndexCorrupt(format!("{}: undecodable chunk: {}", path.display(), e)))
}

/// Load every chunk of an embedding directory into one store.
///
/// Chunks are decoded in parallel and inserted in file name order, so the
/// resulting store does not depend on scheduling.
pub fn load_embeddings(dir: &Path) -> Result<EmbeddingStore> {
    let started = Instant::now();
    let paths = list_chunks(dir)?;
    if paths.is_empty() {
        return Err(Error::IndexCorrupt(format!(
            "no embedding chunks in {}",
            dir.display()
        )));
    }

    let chunks = paths
        .par_iter()
        .map(|path| read_chunk(path).map(|chunk| (path, chunk)))
        .collect::<Result<Vec<_>>>()?;

    let dim = chunks[0].1.dimension as usize;
    let total: usize = chunks.iter().map(|(_, c)| c.len()).sum();
    let mut builder = EmbeddingStoreBuilder::with_capacity(dim, total)?;
    for (path, chunk) in &chunks {
        if chunk.dimension as usize != dim {
            return Err(Error::dimension_mismatch(path.display(), dim, chunk.dimension as usize));
        }
        for (id, vector) in &chunk.records {
            builder.insert(*id, vector)?;
        }
        tracing::debug!(path = %path.display(), records = chunk.len(), "loaded embedding chunk");
    }

    let store = builder.build();
    tracing::info!(
        dir = %dir.display(),
        chunks = chunks.len(),
        documents = store.len(),
        dim,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded embeddings"
    );
    Ok(store)
}

pub fn read_metadata(dir: &Path) -> Result<IndexMetadata> {
    let path = dir.join(METADATA_FILE);
    let data = fs::read(&path)?;
    let metadata: IndexMetadata = serde_json::from_slice(&data)
        .map_err(|e| Error::IndexCorrupt(format!("{}: {}", path.display(), e)))?;
    metadata.check_version()?;
    Ok(metadata)
}

/// Load an index directory against an already loaded embedding store.
///
/// Every indexed id must have a vector in `store` with the dimension
/// recorded in the metadata. `ef_search` overrides the stored search width.
pub fn load_index(dir: &Path, store: &EmbeddingStore, ef_search: Option<usize>) -> Result<SimilarityIndex> {
    let started = Instant::now();
    let metadata = read_metadata(dir)?;
    if metadata.dimension != store.dimension() {
        return Err(Error::dimension_mismatch(
            "index metadata vs embeddings",
            store.dimension(),
            metadata.dimension,
        ));
    }

    let graph_path = dir.join(GRAPH_FILE);
    let bytes = fs::read(&graph_path)?;
    let actual = format::checksum(&bytes);
    if actual != metadata.checksum {
        return Err(Error::IndexCorrupt(format!(
            "{}: checksum mismatch (expected {}, got {})",
            graph_path.display(),
            metadata.checksum,
            actual
        )));
    }
    let undecodable = |e: bincode::Error| Error::IndexCorrupt(format!("{}: {}", graph_path.display(), e));

    let index = match metadata.kind {
        IndexKind::Flat => {
            let ids: Vec<u64> = bincode::deserialize(&bytes).map_err(undecodable)?;
            check_count(&metadata, ids.len())?;
            SimilarityIndex::Flat(FlatIndex::build(store, &ids, metadata.metric)?)
        }
        IndexKind::Hnsw => {
            let graph: HnswGraph = bincode::deserialize(&bytes).map_err(undecodable)?;
            check_count(&metadata, graph.len())?;
            let mut index = HnswIndex::from_graph(graph, store, metadata.metric, metadata.params)?;
            if let Some(ef) = ef_search {
                index.set_ef_search(ef);
            }
            SimilarityIndex::Hnsw(index)
        }
    };

    tracing::info!(
        dir = %dir.display(),
        kind = ?metadata.kind,
        metric = %metadata.metric,
        documents = index.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded index"
    );
    Ok(index)
}

fn check_count(metadata: &IndexMetadata, actual: usize) -> Result<()> {
    if metadata.count != actual {
        return Err(Error::IndexCorrupt(format!(
            "metadata lists {} documents, graph holds {}",
            metadata.count, actual
        )));
    }
    Ok(())
}
