//! Chunk grid layout - how an array is divided into chunks, and the
//! element-space / chunk-space translation of regions

use crate::error::{Result, ZarrError};

/// A rectangular region of element indices, `start` inclusive, `stop` exclusive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    start: Vec<usize>,
    stop: Vec<usize>,
}

impl Region {
    /// Create a region from per-dimension start and stop
    pub fn new(start: Vec<usize>, stop: Vec<usize>) -> Result<Self> {
        if start.len() != stop.len() {
            return Err(ZarrError::Shape(format!(
                "region start has {} dimensions, stop has {}",
                start.len(),
                stop.len()
            )));
        }
        if let Some(dim) = (0..start.len()).find(|&dim| start[dim] > stop[dim]) {
            return Err(ZarrError::OutOfBounds(format!(
                "region start {} exceeds stop {} in dimension {}",
                start[dim], stop[dim], dim
            )));
        }
        Ok(Self { start, stop })
    }

    /// Region starting at `start` with extent `shape`
    pub fn with_shape(start: Vec<usize>, shape: &[usize]) -> Result<Self> {
        if start.len() != shape.len() {
            return Err(ZarrError::Shape(format!(
                "region start has {} dimensions, shape has {}",
                start.len(),
                shape.len()
            )));
        }
        let stop = start.iter().zip(shape).map(|(s, n)| s + n).collect();
        Ok(Self { start, stop })
    }

    /// The region covering a whole array of `shape`
    pub fn full(shape: &[usize]) -> Self {
        Self {
            start: vec![0; shape.len()],
            stop: shape.to_vec(),
        }
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn stop(&self) -> &[usize] {
        &self.stop
    }

    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    /// Extent in each dimension
    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(start, stop)| stop - start)
            .collect()
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }

    /// This region clipped to an array of `shape`
    pub fn clipped(&self, shape: &[usize]) -> Self {
        let stop: Vec<usize> = self
            .stop
            .iter()
            .zip(shape)
            .map(|(stop, dim)| (*stop).min(*dim))
            .collect();
        let start = self
            .start
            .iter()
            .zip(&stop)
            .map(|(start, stop)| (*start).min(*stop))
            .collect();
        Self { start, stop }
    }

    /// Overlap of two regions of equal arity
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let start: Vec<usize> = self
            .start
            .iter()
            .zip(&other.start)
            .map(|(a, b)| *a.max(b))
            .collect();
        let stop: Vec<usize> = self
            .stop
            .iter()
            .zip(&other.stop)
            .map(|(a, b)| *a.min(b))
            .collect();
        if start.iter().zip(&stop).any(|(start, stop)| start >= stop) {
            None
        } else {
            Some(Region { start, stop })
        }
    }

    /// Start of this region relative to `origin`
    pub fn offset_from(&self, origin: &[usize]) -> Vec<usize> {
        self.start
            .iter()
            .zip(origin)
            .map(|(start, origin)| start - origin)
            .collect()
    }
}

/// A chunk touched by a region, with the part of the region it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIntersection {
    /// Chunk grid coordinates
    pub coords: Vec<usize>,
    /// Overlap in array element space
    pub region: Region,
}

/// Regular grid of equally shaped chunks over an array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    shape: Vec<usize>,
    chunk_shape: Vec<usize>,
}

impl ChunkGrid {
    /// Create a grid, validating arity and dimension sizes
    pub fn new(shape: Vec<usize>, chunk_shape: Vec<usize>) -> Result<Self> {
        if shape.is_empty() {
            return Err(ZarrError::Shape("shape must have at least one dimension".to_string()));
        }
        if shape.len() != chunk_shape.len() {
            return Err(ZarrError::Shape(format!(
                "shape {:?} and chunk shape {:?} differ in arity",
                shape, chunk_shape
            )));
        }
        if shape.contains(&0) {
            return Err(ZarrError::Shape(format!(
                "shape {:?} has a zero dimension",
                shape
            )));
        }
        if chunk_shape.contains(&0) {
            return Err(ZarrError::Shape(format!(
                "chunk shape {:?} has a zero dimension",
                chunk_shape
            )));
        }
        if let Some(dim) = (0..shape.len()).find(|&dim| chunk_shape[dim] > shape[dim]) {
            return Err(ZarrError::Shape(format!(
                "chunk shape {:?} exceeds shape {:?} in dimension {}",
                chunk_shape, shape, dim
            )));
        }
        // Chunk and grid sizes are bounded by the element count
        if checked_product(&shape).is_none() {
            return Err(ZarrError::Shape(format!(
                "shape {:?} has more elements than fit in usize",
                shape
            )));
        }
        Ok(Self { shape, chunk_shape })
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    /// Elements in the whole array
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Elements in one (padded) chunk
    pub fn chunk_num_elements(&self) -> usize {
        self.chunk_shape.iter().product()
    }

    /// Get the number of chunks in each dimension
    pub fn grid_shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(dim, chunk)| dim.div_ceil(*chunk))
            .collect()
    }

    /// Get the total number of chunks
    pub fn total_chunks(&self) -> usize {
        self.grid_shape().iter().product()
    }

    /// Convert a row-major chunk index to chunk coordinates
    pub fn chunk_index_to_coords(&self, index: usize) -> Vec<usize> {
        let grid_shape = self.grid_shape();
        let mut coords = vec![0; self.ndim()];
        let mut remaining = index;

        for (i, coord) in coords.iter_mut().enumerate() {
            let stride: usize = grid_shape.iter().skip(i + 1).product();
            *coord = remaining / stride;
            remaining %= stride;
        }

        coords
    }

    /// Convert chunk coordinates to a row-major chunk index
    pub fn chunk_coords_to_index(&self, coords: &[usize]) -> usize {
        let grid_shape = self.grid_shape();
        coords
            .iter()
            .enumerate()
            .map(|(i, coord)| coord * grid_shape.iter().skip(i + 1).product::<usize>())
            .sum()
    }

    /// Coordinates of the chunk holding an element
    pub fn chunk_of(&self, element: &[usize]) -> Vec<usize> {
        element
            .iter()
            .zip(&self.chunk_shape)
            .map(|(index, chunk)| index / chunk)
            .collect()
    }

    /// Validate chunk coordinates against the grid
    pub fn check_chunk_coords(&self, coords: &[usize]) -> Result<()> {
        let grid_shape = self.grid_shape();
        if coords.len() != grid_shape.len()
            || coords.iter().zip(&grid_shape).any(|(coord, count)| coord >= count)
        {
            return Err(ZarrError::OutOfBounds(format!(
                "chunk {:?} outside chunk grid {:?}",
                coords, grid_shape
            )));
        }
        Ok(())
    }

    /// Element region of a chunk, trimmed to the array shape
    pub fn chunk_region(&self, coords: &[usize]) -> Region {
        let (start, stop) = coords
            .iter()
            .enumerate()
            .map(|(i, coord)| {
                let start = coord * self.chunk_shape[i];
                let stop = (start + self.chunk_shape[i]).min(self.shape[i]);
                (start, stop)
            })
            .unzip();
        Region { start, stop }
    }

    /// Origin of a chunk in element space
    pub fn chunk_origin(&self, coords: &[usize]) -> Vec<usize> {
        coords
            .iter()
            .zip(&self.chunk_shape)
            .map(|(coord, chunk)| coord * chunk)
            .collect()
    }

    /// Fail unless `region` has the array's arity and lies within its shape
    pub fn check_region(&self, region: &Region) -> Result<()> {
        if region.ndim() != self.ndim() {
            return Err(ZarrError::Shape(format!(
                "region has {} dimensions, array has {}",
                region.ndim(),
                self.ndim()
            )));
        }
        if region.stop.iter().zip(&self.shape).any(|(stop, dim)| stop > dim) {
            return Err(ZarrError::OutOfBounds(format!(
                "region {:?}..{:?} outside shape {:?}",
                region.start, region.stop, self.shape
            )));
        }
        Ok(())
    }

    /// Coordinates of every chunk intersecting `region`, in row-major order
    pub fn chunks_in_region(&self, region: &Region) -> Vec<Vec<usize>> {
        if region.is_empty() {
            return Vec::new();
        }

        let min_chunk = self.chunk_of(&region.start);
        let max_chunk: Vec<usize> = region
            .stop
            .iter()
            .zip(&self.chunk_shape)
            .map(|(stop, chunk)| (stop - 1) / chunk + 1)
            .collect();

        let mut chunks = Vec::new();
        iterate_range(&min_chunk, &max_chunk, &mut |coords| chunks.push(coords.to_vec()));
        chunks
    }

    /// Every chunk intersecting `region` with the sub-region it covers
    pub fn intersections(&self, region: &Region) -> Vec<ChunkIntersection> {
        self.chunks_in_region(region)
            .into_iter()
            .filter_map(|coords| {
                let overlap = self.chunk_region(&coords).intersect(region)?;
                Some(ChunkIntersection {
                    coords,
                    region: overlap,
                })
            })
            .collect()
    }
}

/// Visit every index in `start..stop` in row-major order
fn iterate_range<F>(start: &[usize], stop: &[usize], callback: &mut F)
where
    F: FnMut(&[usize]),
{
    if start.iter().zip(stop).any(|(start, stop)| start >= stop) {
        return;
    }
    if start.is_empty() {
        callback(&[]);
        return;
    }

    let mut coords = start.to_vec();
    loop {
        callback(&coords);

        // Increment coordinates
        let mut dim = coords.len() - 1;
        loop {
            coords[dim] += 1;
            if coords[dim] < stop[dim] {
                break;
            }
            coords[dim] = start[dim];
            if dim == 0 {
                return;
            }
            dim -= 1;
        }
    }
}

/// Row-major element strides of a buffer of `shape`
fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }
    strides
}

/// Copy a block of `extent` elements between two dense row-major buffers.
///
/// `src_offset` and `dst_offset` locate the block inside buffers of
/// `src_shape` and `dst_shape`. The last dimension is copied as one run.
#[allow(clippy::too_many_arguments)]
pub fn copy_region(
    src: &[u8],
    src_shape: &[usize],
    src_offset: &[usize],
    dst: &mut [u8],
    dst_shape: &[usize],
    dst_offset: &[usize],
    extent: &[usize],
    element_size: usize,
) {
    let ndim = extent.len();
    if ndim == 0 || extent.contains(&0) {
        return;
    }

    let src_strides = strides(src_shape);
    let dst_strides = strides(dst_shape);
    let run = extent[ndim - 1] * element_size;
    let outer_start = vec![0; ndim - 1];

    iterate_range(&outer_start, &extent[..ndim - 1], &mut |outer| {
        let mut src_index = src_offset[ndim - 1];
        let mut dst_index = dst_offset[ndim - 1];
        for dim in 0..ndim - 1 {
            src_index += (src_offset[dim] + outer[dim]) * src_strides[dim];
            dst_index += (dst_offset[dim] + outer[dim]) * dst_strides[dim];
        }
        let src_byte = src_index * element_size;
        let dst_byte = dst_index * element_size;
        dst[dst_byte..dst_byte + run].copy_from_slice(&src[src_byte..src_byte + run]);
    });
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
}
