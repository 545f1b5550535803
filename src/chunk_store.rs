//! Chunk store: reads objects and decoded chunks through an [ObjectStore].

use crate::dataset::Variable;
use crate::error::ExplorerError;
use crate::metrics::{CHUNK_CACHE_LOOKUPS, OBJECT_FETCHES};
use crate::object_store::ObjectStore;
use crate::resource_manager::ResourceManager;

use bytes::Bytes;
use cached::{Cached, SizedCache};
use ndarray::{ArrayD, Slice};
use serde::de::DeserializeOwned;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

type ChunkCache = SizedCache<String, Arc<ArrayD<f64>>>;

/// Chunk store.
///
/// Wraps an [ObjectStore] with connection limits from the [ResourceManager] and an in-memory LRU
/// cache of decoded chunks keyed by object key. The cache is the only mutable state shared between
/// materialisations.
pub struct ChunkStore {
    store: Arc<dyn ObjectStore>,
    resource_manager: Arc<ResourceManager>,
    cache: Option<Mutex<ChunkCache>>,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("store", &self.store)
            .field("resource_manager", &self.resource_manager)
            .field("cache_enabled", &self.cache.is_some())
            .finish()
    }
}

impl ChunkStore {
    /// Initialize the chunk store.
    ///
    /// # Arguments
    ///
    /// * `store`: Object store holding the hierarchy
    /// * `resource_manager`: Limits on concurrent connections
    /// * `cache_capacity`: Maximum number of decoded chunks to cache, or 0 to disable caching
    pub fn new(
        store: Arc<dyn ObjectStore>,
        resource_manager: Arc<ResourceManager>,
        cache_capacity: usize,
    ) -> Self {
        let cache = (cache_capacity > 0).then(|| Mutex::new(SizedCache::with_size(cache_capacity)));
        Self {
            store,
            resource_manager,
            cache,
        }
    }

    pub fn describe(&self) -> String {
        self.store.describe()
    }

    pub fn resource_manager(&self) -> &Arc<ResourceManager> {
        &self.resource_manager
    }

    /// Returns an object from the store, or `None` if it does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_object(&self, key: &str) -> Result<Option<Bytes>, ExplorerError> {
        let _conn_permits = self.resource_manager.connection().await?;
        let data = self.store.get(key).await?;
        let outcome = if data.is_some() { "found" } else { "absent" };
        OBJECT_FETCHES.with_label_values(&[outcome]).inc();
        Ok(data)
    }

    /// Returns a JSON document from the store, or `None` if it does not exist.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ExplorerError> {
        match self.get_object(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Returns one decoded chunk of a variable.
    ///
    /// Absent chunks are filled with the variable's fill value.
    pub async fn get_chunk(
        &self,
        variable: &Variable,
        index: &[usize],
    ) -> Result<Arc<ArrayD<f64>>, ExplorerError> {
        let key = variable.chunk_key(index);
        if let Some(chunk) = self.cache_get(&key)? {
            CHUNK_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            return Ok(chunk);
        }
        if self.cache.is_some() {
            CHUNK_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
        }
        let chunk = match self.get_object(&key).await? {
            Some(data) => variable.decoder().decode(&data)?,
            None => variable.decoder().fill()?,
        };
        let chunk = Arc::new(chunk);
        self.cache_set(key, chunk.clone())?;
        Ok(chunk)
    }

    /// Reads a hyper-rectangular region of a variable, fetching the overlapping chunks
    /// concurrently.
    ///
    /// # Arguments
    ///
    /// * `variable`: Variable to read
    /// * `region`: Index range along each dimension of the variable
    #[tracing::instrument(level = "debug", skip(self, variable), fields(variable = %variable.name))]
    pub async fn read_region(
        self: &Arc<Self>,
        variable: &Arc<Variable>,
        region: &[Range<usize>],
    ) -> Result<ArrayD<f64>, ExplorerError> {
        let shape: Vec<usize> = region.iter().map(|range| range.len()).collect();
        let mut result = ArrayD::from_elem(shape, f64::NAN);
        if result.is_empty() {
            return Ok(result);
        }
        let chunk_shape = variable.decoder().chunk_shape().to_vec();
        let chunk_ranges: Vec<Range<usize>> = region
            .iter()
            .zip(&chunk_shape)
            .map(|(range, size)| range.start / size..(range.end - 1) / size + 1)
            .collect();

        let mut tasks = JoinSet::new();
        for index in chunk_indices(&chunk_ranges) {
            let store = self.clone();
            let variable = variable.clone();
            tasks.spawn(async move {
                let chunk = store.get_chunk(&variable, &index).await?;
                Ok::<_, ExplorerError>((index, chunk))
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let (index, chunk) = joined??;
            let mut target = Vec::with_capacity(index.len());
            let mut source = Vec::with_capacity(index.len());
            for ((range, size), i) in region.iter().zip(&chunk_shape).zip(&index) {
                let chunk_start = i * size;
                let start = range.start.max(chunk_start);
                let end = range.end.min(chunk_start + size);
                target.push(start - range.start..end - range.start);
                source.push(start - chunk_start..end - chunk_start);
            }
            result
                .slice_each_axis_mut(|axis| Slice::from(target[axis.axis.index()].clone()))
                .assign(
                    &chunk.slice_each_axis(|axis| Slice::from(source[axis.axis.index()].clone())),
                );
        }
        Ok(result)
    }

    fn cache_get(&self, key: &str) -> Result<Option<Arc<ArrayD<f64>>>, ExplorerError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let mut cache = cache.lock().map_err(|err| ExplorerError::CacheError {
            error: err.to_string(),
        })?;
        Ok(cache.cache_get(key).cloned())
    }

    fn cache_set(&self, key: String, chunk: Arc<ArrayD<f64>>) -> Result<(), ExplorerError> {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().map_err(|err| ExplorerError::CacheError {
                error: err.to_string(),
            })?;
            cache.cache_set(key, chunk);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn cached_chunks(&self) -> usize {
        self.cache
            .as_ref()
            .map(|cache| cache.lock().unwrap().cache_size())
            .unwrap_or(0)
    }
}

/// Returns every chunk index in the cartesian product of the per-dimension ranges.
fn chunk_indices(ranges: &[Range<usize>]) -> Vec<Vec<usize>> {
    ranges.iter().fold(vec![vec![]], |indices, range| {
        indices
            .into_iter()
            .flat_map(|prefix| {
                range.clone().map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect()
    })
}
