//! Array access - main API for reading and writing chunked arrays

use crate::attributes::Attributes;
use crate::codec::CodecChain;
use crate::error::{Result, ZarrError};
use crate::io::{ensure_writable, Store};
use crate::layout::{copy_region, ChunkGrid, ChunkIntersection, Region};
use crate::metadata::ArrayMetadata;
use crate::types::{DataType, Element};
use crate::utils::{
    bytes_to_elements, elements_to_bytes, format_bytes, meta_key, node_name, normalize_path,
    validate_prefix,
};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Concurrent existence checks when counting stored chunks
const CHUNK_SCAN_CONCURRENCY: usize = 32;

type ChunkLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive hold on one chunk key.
///
/// Dropping the guard releases the chunk and removes its entry from the lock
/// map once no other task holds or waits on it.
struct ChunkGuard {
    key: String,
    locks: ChunkLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChunkGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Handle to an array node.
///
/// Clones share metadata and the per-chunk write locks, so concurrent
/// region writes through any clone never interleave inside one chunk.
#[derive(Debug, Clone)]
pub struct Array {
    store: Arc<dyn Store>,
    path: String,
    metadata: Arc<RwLock<ArrayMetadata>>,
    chain: Arc<CodecChain>,
    grid: ChunkGrid,
    /// One element of fill value, little-endian
    fill_value: Arc<Vec<u8>>,
    chunk_locks: ChunkLocks,
}

impl Array {
    /// Create a new array node at `path` and write its metadata
    #[tracing::instrument(skip(store, metadata))]
    pub async fn create(
        store: Arc<dyn Store>,
        path: &str,
        metadata: ArrayMetadata,
    ) -> Result<Self> {
        let path = normalize_path(path);
        validate_prefix(&path)?;
        metadata.validate()?;

        let key = meta_key(&path);
        ensure_writable(store.mode(), &key)?;
        if store.exists(&key).await? {
            return Err(ZarrError::HierarchyConflict(format!(
                "{}: a node already exists",
                key
            )));
        }

        store.set(&key, &metadata.to_json()?).await?;
        debug!(key = %key, shape = ?metadata.shape, "created array");

        Self::from_metadata(store, path, metadata)
    }

    /// Open an existing array node
    #[tracing::instrument(skip(store))]
    pub async fn open(store: Arc<dyn Store>, path: &str) -> Result<Self> {
        let path = normalize_path(path);
        validate_prefix(&path)?;

        let key = meta_key(&path);
        let bytes = store.get_required(&key).await?;
        let metadata = ArrayMetadata::from_json(&bytes, &key)?;

        Self::from_metadata(store, path, metadata)
    }

    /// Build a handle around already validated metadata
    pub(crate) fn from_metadata(
        store: Arc<dyn Store>,
        path: String,
        metadata: ArrayMetadata,
    ) -> Result<Self> {
        let grid = metadata.chunk_grid()?;
        let chain = metadata.codec_chain()?;
        let fill_value = metadata.fill_bytes()?;

        Ok(Self {
            store,
            path,
            metadata: Arc::new(RwLock::new(metadata)),
            chain: Arc::new(chain),
            grid,
            fill_value: Arc::new(fill_value),
            chunk_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Path of this node within the store (`""` for the root)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last component of the path
    pub fn name(&self) -> &str {
        node_name(&self.path)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Get the array metadata
    pub fn metadata(&self) -> ArrayMetadata {
        self.metadata.read().clone()
    }

    pub fn attributes(&self) -> Attributes {
        self.metadata.read().attributes.clone()
    }

    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }

    pub fn chunk_shape(&self) -> &[usize] {
        self.grid.chunk_shape()
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn data_type(&self) -> DataType {
        self.metadata.read().data_type
    }

    /// Store key of the chunk at `coords`
    pub fn chunk_key(&self, coords: &[usize]) -> String {
        self.metadata.read().chunk_key(&self.path, coords)
    }

    fn element_size(&self) -> usize {
        self.data_type().size_in_bytes()
    }

    fn chunk_byte_len(&self) -> usize {
        self.grid.chunk_num_elements() * self.element_size()
    }

    /// A decoded chunk holding only fill values
    fn fill_chunk(&self) -> Vec<u8> {
        self.fill_value.repeat(self.grid.chunk_num_elements())
    }

    async fn lock_chunk(&self, key: &str) -> ChunkGuard {
        let lock = {
            let mut locks = self.chunk_locks.lock();
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        ChunkGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.chunk_locks),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Fetch and decode a chunk; a missing chunk decodes to fill values
    async fn load_chunk(&self, key: &str) -> Result<Vec<u8>> {
        match self.store.get(key).await? {
            Some(encoded) => {
                debug!(key = %key, encoded_len = encoded.len(), "chunk hit");
                self.chain
                    .decode(&encoded, self.chunk_byte_len())
                    .map_err(|e| match e {
                        ZarrError::Codec(msg) => ZarrError::Codec(format!("{}: {}", key, msg)),
                        other => other,
                    })
            }
            None => {
                debug!(key = %key, "chunk miss, using fill value");
                Ok(self.fill_chunk())
            }
        }
    }

    async fn save_chunk(&self, key: &str, decoded: &[u8]) -> Result<()> {
        let encoded = self.chain.encode(decoded, self.chunk_byte_len())?;
        debug!(key = %key, encoded_len = encoded.len(), "storing chunk");
        self.store.set(key, &encoded).await
    }

    /// Read a region as dense little-endian element bytes in row-major order
    #[tracing::instrument(skip(self), fields(path = %self.path))]
    pub async fn read_region(&self, region: &Region) -> Result<Vec<u8>> {
        self.grid.check_region(region)?;

        let element_size = self.element_size();
        let region_shape = region.shape();
        let mut out = vec![0u8; region.num_elements() * element_size];
        if region.is_empty() {
            return Ok(out);
        }

        let intersections = self.grid.intersections(region);

        // Read all chunks concurrently
        let chunks = try_join_all(
            intersections
                .iter()
                .map(|intersection| self.load_chunk_at(&intersection.coords)),
        )
        .await?;

        for (intersection, chunk) in intersections.iter().zip(&chunks) {
            let origin = self.grid.chunk_origin(&intersection.coords);
            copy_region(
                chunk,
                self.grid.chunk_shape(),
                &intersection.region.offset_from(&origin),
                &mut out,
                &region_shape,
                &intersection.region.offset_from(region.start()),
                &intersection.region.shape(),
                element_size,
            );
        }

        Ok(out)
    }

    async fn load_chunk_at(&self, coords: &[usize]) -> Result<Vec<u8>> {
        self.load_chunk(&self.chunk_key(coords)).await
    }

    /// Write dense little-endian element bytes into a region.
    ///
    /// Every touched chunk is read, patched and re-encoded under its chunk
    /// lock; chunks are processed concurrently.
    #[tracing::instrument(skip(self, data), fields(path = %self.path))]
    pub async fn write_region(&self, region: &Region, data: &[u8]) -> Result<()> {
        self.grid.check_region(region)?;

        let expected = region.num_elements() * self.element_size();
        if data.len() != expected {
            return Err(ZarrError::Shape(format!(
                "{}: region needs {} bytes, got {}",
                self.path,
                expected,
                data.len()
            )));
        }
        if region.is_empty() {
            return Ok(());
        }
        ensure_writable(self.store.mode(), &meta_key(&self.path))?;

        let intersections = self.grid.intersections(region);
        try_join_all(
            intersections
                .iter()
                .map(|intersection| self.write_intersection(region, data, intersection)),
        )
        .await?;

        Ok(())
    }

    async fn write_intersection(
        &self,
        region: &Region,
        data: &[u8],
        intersection: &ChunkIntersection,
    ) -> Result<()> {
        let key = self.chunk_key(&intersection.coords);
        let _guard = self.lock_chunk(&key).await;

        let chunk_region = self.grid.chunk_region(&intersection.coords);
        let covers_chunk = intersection.region == chunk_region
            && chunk_region.shape().as_slice() == self.grid.chunk_shape();
        let mut chunk = if covers_chunk {
            vec![0u8; self.chunk_byte_len()]
        } else {
            self.load_chunk(&key).await?
        };

        let origin = self.grid.chunk_origin(&intersection.coords);
        copy_region(
            data,
            &region.shape(),
            &intersection.region.offset_from(region.start()),
            &mut chunk,
            self.grid.chunk_shape(),
            &intersection.region.offset_from(&origin),
            &intersection.region.shape(),
            self.element_size(),
        );

        self.save_chunk(&key, &chunk).await
    }

    /// Read a region as typed elements
    pub async fn read_region_elements<T: Element>(&self, region: &Region) -> Result<Vec<T>> {
        self.data_type().check_element::<T>()?;
        bytes_to_elements(&self.read_region(region).await?)
    }

    /// Write typed elements into a region
    pub async fn write_region_elements<T: Element>(
        &self,
        region: &Region,
        data: &[T],
    ) -> Result<()> {
        self.data_type().check_element::<T>()?;
        self.write_region(region, &elements_to_bytes(data)).await
    }

    /// Read a region into an n-dimensional array
    pub async fn read_ndarray<T: Element>(&self, region: &Region) -> Result<ArrayD<T>> {
        let elements = self.read_region_elements::<T>(region).await?;
        ArrayD::from_shape_vec(IxDyn(&region.shape()), elements)
            .map_err(|e| ZarrError::Shape(format!("{}: {}", self.path, e)))
    }

    /// Write an n-dimensional array with its first element at `start`
    pub async fn write_ndarray<T: Element>(
        &self,
        start: &[usize],
        data: ArrayViewD<'_, T>,
    ) -> Result<()> {
        let region = Region::with_shape(start.to_vec(), data.shape())?;
        let elements: Vec<T> = data.iter().copied().collect();
        self.write_region_elements(&region, &elements).await
    }

    /// Store a whole decoded chunk (padding included)
    #[tracing::instrument(skip(self, data), fields(path = %self.path))]
    pub async fn store_chunk(&self, coords: &[usize], data: &[u8]) -> Result<()> {
        self.grid.check_chunk_coords(coords)?;
        if data.len() != self.chunk_byte_len() {
            return Err(ZarrError::Shape(format!(
                "{}: chunk {:?} needs {} bytes, got {}",
                self.path,
                coords,
                self.chunk_byte_len(),
                data.len()
            )));
        }

        let key = self.chunk_key(coords);
        ensure_writable(self.store.mode(), &key)?;
        let _guard = self.lock_chunk(&key).await;
        self.save_chunk(&key, data).await
    }

    /// Retrieve a whole decoded chunk; a chunk never written is all fill value
    pub async fn retrieve_chunk(&self, coords: &[usize]) -> Result<Vec<u8>> {
        self.grid.check_chunk_coords(coords)?;
        self.load_chunk_at(coords).await
    }

    /// Delete a chunk so it reads back as fill value
    pub async fn erase_chunk(&self, coords: &[usize]) -> Result<()> {
        self.grid.check_chunk_coords(coords)?;
        let key = self.chunk_key(coords);
        let _guard = self.lock_chunk(&key).await;
        self.store.delete(&key).await
    }

    pub async fn store_chunk_elements<T: Element>(
        &self,
        coords: &[usize],
        data: &[T],
    ) -> Result<()> {
        self.data_type().check_element::<T>()?;
        self.store_chunk(coords, &elements_to_bytes(data)).await
    }

    pub async fn retrieve_chunk_elements<T: Element>(&self, coords: &[usize]) -> Result<Vec<T>> {
        self.data_type().check_element::<T>()?;
        bytes_to_elements(&self.retrieve_chunk(coords).await?)
    }

    /// Replace the attributes and rewrite the metadata document
    pub async fn set_attributes(&self, attributes: Attributes) -> Result<()> {
        let mut metadata = self.metadata();
        metadata.attributes = attributes;

        let key = meta_key(&self.path);
        self.store.set(&key, &metadata.to_json()?).await?;
        *self.metadata.write() = metadata;
        Ok(())
    }

    /// Number of chunks present in the store
    pub async fn stored_chunk_count(&self) -> Result<usize> {
        let keys: Vec<String> = (0..self.grid.total_chunks())
            .map(|index| self.chunk_key(&self.grid.chunk_index_to_coords(index)))
            .collect();

        stream::iter(keys)
            .map(|key| async move { self.store.exists(&key).await })
            .buffer_unordered(CHUNK_SCAN_CONCURRENCY)
            .try_fold(0, |count, exists| async move { Ok(count + usize::from(exists)) })
            .await
    }

    /// Get statistics about the array
    pub async fn info(&self) -> Result<ArrayInfo> {
        let metadata = self.metadata();

        Ok(ArrayInfo {
            path: self.path.clone(),
            shape: metadata.shape.clone(),
            chunk_shape: metadata.chunk_shape().to_vec(),
            data_type: metadata.data_type,
            total_chunks: self.grid.total_chunks(),
            stored_chunks: self.stored_chunk_count().await?,
            uncompressed_size: self.grid.num_elements() * metadata.data_type.size_in_bytes(),
            codecs: metadata.codecs.iter().map(|codec| codec.name.clone()).collect(),
        })
    }
}

/// Array statistics
#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub path: String,
    pub shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
    pub data_type: DataType,
    pub total_chunks: usize,
    pub stored_chunks: usize,
    pub uncompressed_size: usize,
    pub codecs: Vec<String>,
}

impl ArrayInfo {
    pub fn summary(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        format!(
            "{}D array {}: shape {:?}, chunks {:?}, {}/{} chunks stored, \
             {} uncompressed ({}, codecs [{}])",
            self.shape.len(),
            path,
            self.shape,
            self.chunk_shape,
            self.stored_chunks,
            self.total_chunks,
            format_bytes(self.uncompressed_size),
            self.data_type,
            self.codecs.join(", "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecDescriptor, CompressionLevel, Endian};
    use crate::io::{FileSystemStore, MemoryStore, OpenMode};
    use tempfile::TempDir;

    fn memory_store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    fn float_metadata() -> ArrayMetadata {
        ArrayMetadata::new(vec![100, 100], vec![10, 10], DataType::Float32, 0.0)
    }

    #[tokio::test]
    async fn test_create_and_open_array() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> =
            Arc::new(FileSystemStore::open(temp_dir.path(), OpenMode::Create).await.unwrap());

        let metadata = float_metadata().with_codecs(vec![
            CodecDescriptor::bytes(Endian::Little),
            CodecDescriptor::gzip(CompressionLevel::default()),
        ]);
        Array::create(Arc::clone(&store), "temperature", metadata.clone())
            .await
            .unwrap();

        let array = Array::open(store, "temperature").await.unwrap();
        assert_eq!(array.metadata(), metadata);
        assert_eq!(array.name(), "temperature");
        assert_eq!(array.shape(), &[100, 100]);

        let info = array.info().await.unwrap();
        assert_eq!(info.total_chunks, 100);
        assert_eq!(info.stored_chunks, 0);
        assert!(info.summary().contains("2D array temperature"));
    }

    #[tokio::test]
    async fn test_create_conflict_and_missing() {
        let store = memory_store();
        Array::create(Arc::clone(&store), "a", float_metadata()).await.unwrap();
        assert!(matches!(
            Array::create(Arc::clone(&store), "a", float_metadata()).await,
            Err(ZarrError::HierarchyConflict(_))
        ));
        assert!(matches!(
            Array::open(Arc::clone(&store), "missing").await,
            Err(ZarrError::KeyNotFound(_))
        ));
        assert!(matches!(
            Array::create(store, "b", ArrayMetadata::new(vec![4], vec![8], DataType::Int8, 0))
                .await,
            Err(ZarrError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn test_unwritten_region_reads_fill() {
        let store = memory_store();
        let metadata = ArrayMetadata::new(vec![20, 20], vec![10, 10], DataType::Int32, -7);
        let array = Array::create(store, "a", metadata).await.unwrap();

        let region = Region::new(vec![5, 5], vec![15, 15]).unwrap();
        let values: Vec<i32> = array.read_region_elements(&region).await.unwrap();
        assert_eq!(values, vec![-7; 100]);
    }

    #[tokio::test]
    async fn test_region_spanning_chunks() {
        let store = memory_store();
        let metadata = ArrayMetadata::new(vec![30, 30], vec![10, 10], DataType::UInt16, 0);
        let array = Array::create(Arc::clone(&store), "a", metadata).await.unwrap();

        let region = Region::new(vec![5, 8], vec![25, 12]).unwrap();
        let data: Vec<u16> = (0..80).collect();
        array.write_region_elements(&region, &data).await.unwrap();

        let back: Vec<u16> = array.read_region_elements(&region).await.unwrap();
        assert_eq!(back, data);

        // Neighbouring elements keep the fill value
        let wider = Region::new(vec![5, 7], vec![6, 13]).unwrap();
        let row: Vec<u16> = array.read_region_elements(&wider).await.unwrap();
        assert_eq!(row, vec![0, 0, 1, 2, 3, 0]);

        assert_eq!(array.stored_chunk_count().await.unwrap(), 6);
        assert!(store.exists("a/c/0/0").await.unwrap());
        assert!(!store.exists("a/c/2/2").await.unwrap());
    }

    #[tokio::test]
    async fn test_region_validation() {
        let array = Array::create(memory_store(), "a", float_metadata()).await.unwrap();

        let outside = Region::new(vec![0, 0], vec![101, 10]).unwrap();
        assert!(matches!(
            array.read_region(&outside).await,
            Err(ZarrError::OutOfBounds(_))
        ));

        let region = Region::new(vec![0, 0], vec![2, 2]).unwrap();
        assert!(matches!(
            array.write_region(&region, &[0u8; 3]).await,
            Err(ZarrError::Shape(_))
        ));
        assert!(matches!(
            array.read_region_elements::<f64>(&region).await,
            Err(ZarrError::Dtype(_))
        ));

        let empty = Region::new(vec![3, 3], vec![3, 9]).unwrap();
        array.write_region(&empty, &[]).await.unwrap();
        assert!(array.read_region(&empty).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_whole_chunk_operations() {
        let metadata = ArrayMetadata::new(vec![15, 4], vec![10, 4], DataType::Int16, 9);
        let array = Array::create(memory_store(), "a", metadata).await.unwrap();

        assert_eq!(
            array.retrieve_chunk_elements::<i16>(&[1, 0]).await.unwrap(),
            vec![9; 40]
        );

        let chunk: Vec<i16> = (0..40).collect();
        array.store_chunk_elements(&[1, 0], &chunk).await.unwrap();
        assert_eq!(array.retrieve_chunk_elements::<i16>(&[1, 0]).await.unwrap(), chunk);

        // Only the first 5 rows of chunk (1, 0) lie inside the array
        let tail: Vec<i16> = array
            .read_region_elements(&Region::new(vec![10, 0], vec![15, 4]).unwrap())
            .await
            .unwrap();
        assert_eq!(tail, (0..20).collect::<Vec<i16>>());

        array.erase_chunk(&[1, 0]).await.unwrap();
        assert_eq!(
            array.retrieve_chunk_elements::<i16>(&[1, 0]).await.unwrap(),
            vec![9; 40]
        );

        assert!(matches!(
            array.retrieve_chunk(&[2, 0]).await,
            Err(ZarrError::OutOfBounds(_))
        ));
        assert!(matches!(
            array.store_chunk(&[0, 0], &[0u8; 4]).await,
            Err(ZarrError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn test_ndarray_access() {
        let metadata = ArrayMetadata::new(vec![6, 8], vec![4, 4], DataType::Float64, f64::NAN);
        let array = Array::create(memory_store(), "a", metadata).await.unwrap();

        let block = ndarray::Array2::from_shape_fn((3, 5), |(i, j)| (i * 10 + j) as f64);
        array.write_ndarray(&[2, 1], block.view().into_dyn()).await.unwrap();

        let back = array
            .read_ndarray::<f64>(&Region::with_shape(vec![2, 1], &[3, 5]).unwrap())
            .await
            .unwrap();
        assert_eq!(back, block.into_dyn());

        let corner = array
            .read_ndarray::<f64>(&Region::new(vec![0, 0], vec![1, 1]).unwrap())
            .await
            .unwrap();
        assert!(corner.iter().all(|value| value.is_nan()));
    }

    #[tokio::test]
    async fn test_read_only_store_rejects_writes() {
        let store = MemoryStore::new();
        let array = Array::create(Arc::new(store.clone()), "a", float_metadata())
            .await
            .unwrap();
        array
            .write_region_elements(&Region::full(&[100, 100]), &vec![1.0f32; 10_000])
            .await
            .unwrap();

        let reader = Array::open(Arc::new(store.read_only()), "a").await.unwrap();
        let values: Vec<f32> = reader
            .read_region_elements(&Region::new(vec![99, 99], vec![100, 100]).unwrap())
            .await
            .unwrap();
        assert_eq!(values, vec![1.0]);
        assert!(matches!(
            reader
                .write_region_elements(&Region::new(vec![0, 0], vec![1, 1]).unwrap(), &[2.0f32])
                .await,
            Err(ZarrError::StoreCapability(_))
        ));
    }

    #[tokio::test]
    async fn test_set_attributes() {
        let store = memory_store();
        let array = Array::create(Arc::clone(&store), "a", float_metadata()).await.unwrap();

        let attributes = Attributes::from([("units".to_string(), "K".into())]);
        array.set_attributes(attributes.clone()).await.unwrap();

        let reopened = Array::open(store, "a").await.unwrap();
        assert_eq!(reopened.attributes(), attributes);
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_chunk() {
        let array = Array::create(
            memory_store(),
            "a",
            ArrayMetadata::new(vec![8], vec![8], DataType::UInt8, 0),
        )
        .await
        .unwrap();

        let writers = (0..8u8).map(|i| {
            let array = array.clone();
            tokio::spawn(async move {
                let region = Region::new(vec![i as usize], vec![i as usize + 1]).unwrap();
                array.write_region_elements(&region, &[i + 1]).await
            })
        });
        for result in try_join_all(writers).await.unwrap() {
            result.unwrap();
        }

        let values: Vec<u8> = array.read_region_elements(&Region::full(&[8])).await.unwrap();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(array.chunk_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_locks_released_after_writes() {
        let array = Array::create(
            memory_store(),
            "a",
            ArrayMetadata::new(vec![100, 100], vec![10, 10], DataType::UInt8, 0),
        )
        .await
        .unwrap();

        array
            .write_region_elements(&Region::full(&[100, 100]), &[1u8; 10_000])
            .await
            .unwrap();
        array.store_chunk_elements(&[0, 0], &[2u8; 100]).await.unwrap();
        array.erase_chunk(&[9, 9]).await.unwrap();

        assert!(array.chunk_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_stored_metadata_fails_closed() {
        let store = memory_store();
        let huge = usize::MAX / 2;
        let mut value = serde_json::to_value(float_metadata()).unwrap();
        value["shape"] = serde_json::json!([huge, 4]);
        value["chunk_grid"]["configuration"]["chunk_shape"] = serde_json::json!([huge, 4]);
        store
            .set("a/zarr.json", &serde_json::to_vec(&value).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            Array::open(store, "a").await,
            Err(ZarrError::Metadata(msg)) if msg.contains("a/zarr.json")
        ));
    }

    #[tokio::test]
    async fn test_corrupt_chunk_is_codec_error() {
        for codecs in [
            vec![
                CodecDescriptor::bytes(Endian::Little),
                CodecDescriptor::gzip(CompressionLevel::default()),
            ],
            vec![CodecDescriptor::bytes(Endian::Little), CodecDescriptor::crc32c()],
        ] {
            let store = memory_store();
            let metadata = float_metadata().with_codecs(codecs);
            let array = Array::create(Arc::clone(&store), "a", metadata).await.unwrap();
            store.set("a/c/0/0", b"not a chunk").await.unwrap();

            let region = Region::new(vec![0, 0], vec![2, 2]).unwrap();
            assert!(matches!(
                array.read_region(&region).await,
                Err(ZarrError::Codec(msg)) if msg.contains("a/c/0/0")
            ));
            assert!(matches!(
                array.write_region_elements(&region, &[1.0f32; 4]).await,
                Err(ZarrError::Codec(msg)) if msg.contains("a/c/0/0")
            ));

            // The corrupt payload is left as it was
            assert_eq!(
                store.get("a/c/0/0").await.unwrap().unwrap().as_ref(),
                b"not a chunk"
            );
        }
    }
}
