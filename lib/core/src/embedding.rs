use crate::{Error, Result};
use ahash::AHashMap;
use rayon::prelude::*;

/// Per-country map from document id to a fixed-dimension embedding.
///
/// Vectors live in one contiguous buffer indexed by slot; the id map only
/// stores slot numbers. The store is immutable once built.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    dim: usize,
    data: Vec<f32>,
    ids: Vec<u64>,
    slots: AHashMap<u64, u32>,
}

impl EmbeddingStore {
    pub fn builder(dim: usize) -> Result<EmbeddingStoreBuilder> {
        EmbeddingStoreBuilder::new(dim)
    }

    /// Build a store from `(id, vector)` records in one go
    pub fn from_records<I, V>(dim: usize, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, V)>,
        V: AsRef<[f32]>,
    {
        let mut builder = EmbeddingStoreBuilder::new(dim)?;
        for (id, vector) in records {
            builder.insert(id, vector.as_ref())?;
        }
        Ok(builder.build())
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        self.slots.contains_key(&id)
    }

    #[inline]
    pub fn get(&self, id: u64) -> Option<&[f32]> {
        self.slots.get(&id).map(|&slot| self.vector_at(slot as usize))
    }

    #[inline]
    fn vector_at(&self, slot: usize) -> &[f32] {
        let start = slot * self.dim;
        &self.data[start..start + self.dim]
    }

    /// All document ids, ascending
    pub fn ids(&self) -> Vec<u64> {
        let mut ids = self.ids.clone();
        ids.par_sort_unstable();
        ids
    }

    /// Iterate `(id, vector)` in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[f32])> + '_ {
        self.ids
            .iter()
            .enumerate()
            .map(move |(slot, &id)| (id, self.vector_at(slot)))
    }

    /// Ids of `wanted` that have no vector in this store
    pub fn missing(&self, wanted: &[u64]) -> Vec<u64> {
        wanted
            .par_iter()
            .filter(|id| !self.contains(**id))
            .copied()
            .collect()
    }
}

/// Incremental, validating constructor for [`EmbeddingStore`]
#[derive(Debug)]
pub struct EmbeddingStoreBuilder {
    dim: usize,
    data: Vec<f32>,
    ids: Vec<u64>,
    slots: AHashMap<u64, u32>,
}

impl EmbeddingStoreBuilder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::IndexCorrupt("embedding dimension must be positive".into()));
        }
        Ok(Self {
            dim,
            data: Vec::new(),
            ids: Vec::new(),
            slots: AHashMap::new(),
        })
    }

    pub fn with_capacity(dim: usize, capacity: usize) -> Result<Self> {
        let mut builder = Self::new(dim)?;
        builder.data.reserve(capacity * dim);
        builder.ids.reserve(capacity);
        builder.slots.reserve(capacity);
        Ok(builder)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Add a record.
    ///
    /// Rejects a wrong dimension, non-finite components, and a duplicate id
    /// whose vector differs from the one already stored. An exact duplicate
    /// is accepted and ignored.
    pub fn insert(&mut self, id: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::dimension_mismatch(
                format!("embedding {}", id),
                self.dim,
                vector.len(),
            ));
        }
        if !crate::vector::is_finite(vector) {
            return Err(Error::IndexCorrupt(format!(
                "embedding {} has non-finite components",
                id
            )));
        }

        if let Some(&slot) = self.slots.get(&id) {
            let start = slot as usize * self.dim;
            if self.data[start..start + self.dim] == *vector {
                return Ok(());
            }
            return Err(Error::IndexCorrupt(format!(
                "duplicate embedding {} with conflicting vector",
                id
            )));
        }

        let slot = u32::try_from(self.ids.len())
            .map_err(|_| Error::IndexCorrupt("too many embeddings for one store".into()))?;
        self.data.extend_from_slice(vector);
        self.ids.push(id);
        self.slots.insert(id, slot);
        Ok(())
    }

    pub fn build(self) -> EmbeddingStore {
        EmbeddingStore {
            dim: self.dim,
            data: self.data,
            ids: self.ids,
            slots: self.slots,
        }
    }
}
