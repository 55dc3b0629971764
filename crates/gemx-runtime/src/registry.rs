//! Matrix buffer registry.
//!
//! Binds host [`Matrix`] identities to device regions on one engine. A
//! matrix has at most one live buffer per engine; registering it again hands
//! back the existing [`BufferHandle`] without touching device memory.

use std::collections::HashMap;

use gemx_common::{
    BufferHandle, ElementType, EngineId, GemxError, Matrix, MatrixId, Result, Shape,
};
use tracing::debug;

use crate::memory::{DeviceArena, Region};

/// A live device buffer and its contents.
#[derive(Debug)]
pub struct DeviceBuffer {
    handle: BufferHandle,
    matrix: MatrixId,
    shape: Shape,
    element_type: ElementType,
    region: Region,
    bytes: Vec<u8>,
}

impl DeviceBuffer {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn matrix(&self) -> MatrixId {
        self.matrix
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Device contents; exactly the matrix byte footprint (alignment
    /// padding is not materialised).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the contents as `i16` elements.
    pub fn read_i16(&self) -> Result<Vec<i16>> {
        self.expect_type(ElementType::I16)?;
        Ok(bytemuck::pod_collect_to_vec(&self.bytes))
    }

    /// Decode the contents as `i32` elements.
    pub fn read_i32(&self) -> Result<Vec<i32>> {
        self.expect_type(ElementType::I32)?;
        Ok(bytemuck::pod_collect_to_vec(&self.bytes))
    }

    /// Overwrite the contents with `i16` elements.
    pub fn write_i16(&mut self, values: &[i16]) -> Result<()> {
        self.expect_type(ElementType::I16)?;
        let src: &[u8] = bytemuck::cast_slice(values);
        if src.len() != self.bytes.len() {
            return Err(GemxError::InvalidMatrix(format!(
                "{} holds {} elements, got {}",
                self.handle,
                self.shape.len(),
                values.len()
            )));
        }
        self.bytes.copy_from_slice(src);
        Ok(())
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn expect_type(&self, expected: ElementType) -> Result<()> {
        if self.element_type != expected {
            return Err(GemxError::InvalidMatrix(format!(
                "{} holds {} elements, not {expected}",
                self.handle, self.element_type
            )));
        }
        Ok(())
    }
}

/// Snapshot of registry usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub live_buffers: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub peak_bytes: usize,
    pub capacity: usize,
}

/// Per-engine registry of device buffers.
#[derive(Debug)]
pub struct BufferRegistry {
    engine: EngineId,
    arena: DeviceArena,
    next_slot: u64,
    by_matrix: HashMap<MatrixId, u64>,
    buffers: HashMap<u64, DeviceBuffer>,
}

impl BufferRegistry {
    pub fn new(engine: EngineId, capacity: usize, alignment: usize) -> Self {
        Self {
            engine,
            arena: DeviceArena::new(capacity, alignment),
            next_slot: 1,
            by_matrix: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// Bind `matrix` to a device region, allocating one if needed.
    ///
    /// Idempotent per matrix identity. On [`GemxError::CapacityExceeded`]
    /// nothing is allocated and existing buffers are unaffected.
    pub fn register(&mut self, matrix: &Matrix) -> Result<BufferHandle> {
        if let Some(handle) = self.lookup(matrix.id()) {
            return Ok(handle);
        }

        let requested = self.arena.align_up(matrix.byte_len());
        let region = self.arena.allocate(requested).ok_or(GemxError::CapacityExceeded {
            engine: self.engine,
            requested,
            available: self.arena.free_bytes(),
            capacity: self.arena.capacity(),
        })?;

        let slot = self.next_slot;
        self.next_slot += 1;
        let handle = BufferHandle::new(self.engine, slot);
        self.by_matrix.insert(matrix.id(), slot);
        self.buffers.insert(
            slot,
            DeviceBuffer {
                handle,
                matrix: matrix.id(),
                shape: matrix.shape(),
                element_type: matrix.element_type(),
                region,
                bytes: vec![0u8; matrix.byte_len()],
            },
        );

        debug!(
            %handle,
            matrix = %matrix.id(),
            shape = %matrix.shape(),
            offset = region.offset,
            size = region.size,
            "registered device buffer"
        );
        Ok(handle)
    }

    /// Handle currently bound to `matrix`, if any.
    pub fn lookup(&self, matrix: MatrixId) -> Option<BufferHandle> {
        self.by_matrix.get(&matrix).map(|&slot| BufferHandle::new(self.engine, slot))
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.get(handle).is_ok()
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&DeviceBuffer> {
        if handle.engine() != self.engine {
            return Err(GemxError::InvalidHandle(handle));
        }
        self.buffers.get(&handle.slot()).ok_or(GemxError::InvalidHandle(handle))
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> Result<&mut DeviceBuffer> {
        if handle.engine() != self.engine {
            return Err(GemxError::InvalidHandle(handle));
        }
        self.buffers.get_mut(&handle.slot()).ok_or(GemxError::InvalidHandle(handle))
    }

    /// Copy host contents of `matrix` into its device buffer.
    pub fn transfer_in(&mut self, handle: BufferHandle, matrix: &Matrix) -> Result<()> {
        let buffer = self.bound_buffer_mut(handle, matrix.id())?;
        buffer.bytes.copy_from_slice(matrix.as_bytes());
        debug!(%handle, bytes = matrix.byte_len(), "host -> device");
        Ok(())
    }

    /// Copy device contents back into `matrix`, overwriting it in place.
    pub fn transfer_out(&self, handle: BufferHandle, matrix: &mut Matrix) -> Result<()> {
        let buffer = self.get(handle)?;
        if buffer.matrix != matrix.id() {
            return Err(GemxError::HandleMatrixMismatch {
                handle,
                bound: buffer.matrix,
                given: matrix.id(),
            });
        }
        matrix.copy_from_bytes(&buffer.bytes)?;
        debug!(%handle, bytes = buffer.bytes.len(), "device -> host");
        Ok(())
    }

    /// Free the buffer behind `handle`; later use of the handle fails with
    /// [`GemxError::InvalidHandle`].
    pub fn release(&mut self, handle: BufferHandle) -> Result<()> {
        self.get(handle)?;
        let buffer = self.buffers.remove(&handle.slot()).ok_or(GemxError::InvalidHandle(handle))?;
        self.by_matrix.remove(&buffer.matrix);
        self.arena.free(buffer.region);
        debug!(%handle, size = buffer.region.size, "released device buffer");
        Ok(())
    }

    /// Release every buffer.
    pub fn release_all(&mut self) {
        let regions: Vec<Region> = self.buffers.drain().map(|(_, b)| b.region).collect();
        for region in regions {
            self.arena.free(region);
        }
        self.by_matrix.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_buffers: self.buffers.len(),
            used_bytes: self.arena.used_bytes(),
            free_bytes: self.arena.free_bytes(),
            peak_bytes: self.arena.peak_bytes(),
            capacity: self.arena.capacity(),
        }
    }

    fn bound_buffer_mut(
        &mut self,
        handle: BufferHandle,
        matrix: MatrixId,
    ) -> Result<&mut DeviceBuffer> {
        let buffer = self.get_mut(handle)?;
        if buffer.matrix != matrix {
            return Err(GemxError::HandleMatrixMismatch {
                handle,
                bound: buffer.matrix,
                given: matrix,
            });
        }
        Ok(buffer)
    }
}
