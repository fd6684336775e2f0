//! Acquisition buffer pool.
//!
//! The pool is homogeneous: every buffer has the payload size the device
//! reported when the pool was allocated. Reallocation revokes whatever the
//! device says is announced, not what this manager remembers announcing, so
//! buffers announced behind its back are cleaned up as well.

use tracing::{debug, warn};

use crate::error::{CameraError, Result};
use crate::traits::{nodes, BufferHandle, DataStream, NodeMap};

/// Fixed-size pool of buffers announced to a data stream.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<BufferHandle>,
    payload_size: usize,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffers: Vec::new(),
            payload_size: 0,
        }
    }

    /// Handles of the current generation, in announcement order.
    pub fn buffers(&self) -> &[BufferHandle] {
        &self.buffers
    }

    /// Number of buffers in the current generation.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are allocated.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Size of each buffer in bytes.
    pub const fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Whether the pool must be reallocated before buffers are queued.
    ///
    /// True when nothing is allocated or the device's current `PayloadSize`
    /// differs from the size this generation was announced with.
    pub fn is_stale<N>(&self, node_map: &N) -> Result<bool>
    where
        N: NodeMap + ?Sized,
    {
        if self.buffers.is_empty() {
            return Ok(true);
        }
        let payload = node_map.get(nodes::PAYLOAD_SIZE)?;
        Ok(usize::try_from(payload).map_or(true, |size| size != self.payload_size))
    }

    /// Revoke every announced buffer, then announce a fresh generation.
    ///
    /// The new generation has the device's minimum buffer count, each buffer
    /// sized to the current `PayloadSize`. Nothing is announced if any
    /// revocation failed.
    pub fn allocate<N, S>(&mut self, node_map: &N, stream: &mut S) -> Result<()>
    where
        N: NodeMap + ?Sized,
        S: DataStream + ?Sized,
    {
        self.release_all(stream)?;

        let payload = node_map.get(nodes::PAYLOAD_SIZE)?;
        let payload_size = usize::try_from(payload).map_err(|_| {
            CameraError::Device(format!("invalid payload size {payload}"))
        })?;
        let buffer_amount = stream.min_announced_buffers()?;

        for _ in 0..buffer_amount {
            let handle = stream.announce_buffer(payload_size)?;
            self.buffers.push(handle);
        }
        // Only a complete generation counts as sized; a partial one stays stale.
        self.payload_size = payload_size;

        debug!(
            count = buffer_amount,
            payload_size, "allocated acquisition buffers"
        );
        Ok(())
    }

    /// Revoke every buffer the device lists as announced.
    ///
    /// Revocation continues past individual failures; the first failure is
    /// returned once every buffer has been attempted.
    pub fn release_all<S>(&mut self, stream: &mut S) -> Result<()>
    where
        S: DataStream + ?Sized,
    {
        let announced = stream.announced_buffers()?;
        let mut first_error = None;

        for handle in announced {
            if let Err(err) = stream.revoke_buffer(handle) {
                warn!(%handle, error = %err, "failed to revoke buffer");
                first_error.get_or_insert(err);
            }
        }
        self.buffers.clear();
        self.payload_size = 0;

        first_error.map_or(Ok(()), Err)
    }

    /// Queue every buffer of the current generation.
    pub fn queue_all<S>(&self, stream: &mut S) -> Result<()>
    where
        S: DataStream + ?Sized,
    {
        for &handle in &self.buffers {
            stream.queue_buffer(handle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDevice;
    use crate::traits::{DeviceHandle, PixelFormat};

    #[test]
    fn test_allocate_announces_min_buffers() {
        let mut device = SimDevice::builder().min_buffers(4).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();

        pool.allocate(device.nodes(), &mut stream).expect("allocate");

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.payload_size(), PixelFormat::Mono8.payload_size(640, 480));
        assert_eq!(stream.announced_buffers().expect("announced").len(), 4);
    }

    #[test]
    fn test_reallocate_replaces_previous_generation() {
        let mut device = SimDevice::builder().min_buffers(3).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();

        pool.allocate(device.nodes(), &mut stream).expect("first allocate");
        let first: Vec<_> = pool.buffers().to_vec();

        device.control().set_min_buffers(5);
        pool.allocate(device.nodes(), &mut stream).expect("second allocate");

        let announced = stream.announced_buffers().expect("announced");
        assert_eq!(announced.len(), 5);
        assert!(first.iter().all(|handle| !announced.contains(handle)));
    }

    #[test]
    fn test_allocate_revokes_untracked_buffers() {
        let mut device = SimDevice::builder().min_buffers(2).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();

        pool.allocate(device.nodes(), &mut stream).expect("allocate");
        let ghost = stream.announce_buffer(16).expect("announce");

        pool.allocate(device.nodes(), &mut stream).expect("reallocate");
        let announced = stream.announced_buffers().expect("announced");
        assert_eq!(announced.len(), 2);
        assert!(!announced.contains(&ghost));
    }

    #[test]
    fn test_failed_revoke_blocks_allocation() {
        let mut device = SimDevice::builder().min_buffers(3).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();

        pool.allocate(device.nodes(), &mut stream).expect("allocate");
        let stuck = pool.buffers()[0];
        stream.queue_buffer(stuck).expect("queue");

        let result = pool.allocate(device.nodes(), &mut stream);
        assert!(matches!(result, Err(CameraError::BufferInUse(handle)) if handle == stuck));
        // The other two were still revoked, and nothing new was announced.
        assert_eq!(stream.announced_buffers().expect("announced"), vec![stuck]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_goes_stale_on_geometry_change() {
        let mut device = SimDevice::builder().resolution(32, 16).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();
        assert!(pool.is_stale(device.nodes()).expect("empty pool"));

        pool.allocate(device.nodes(), &mut stream).expect("allocate");
        assert!(!pool.is_stale(device.nodes()).expect("fresh pool"));

        device.nodes_mut().set(nodes::WIDTH, 64).expect("set width");
        assert!(pool.is_stale(device.nodes()).expect("wider frame"));
    }

    #[test]
    fn test_failed_announcement_leaves_pool_stale() {
        let mut device = SimDevice::builder().min_buffers(3).build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();

        device.control().fail_next_announcements(1);
        assert!(matches!(
            pool.allocate(device.nodes(), &mut stream),
            Err(CameraError::Device(_))
        ));
        assert!(pool.is_stale(device.nodes()).expect("stale"));

        pool.allocate(device.nodes(), &mut stream).expect("retry");
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let mut device = SimDevice::builder().build();
        let mut stream = device.open_data_stream().expect("open stream");
        let mut pool = BufferPool::new();

        pool.release_all(&mut stream).expect("release empty");
        pool.allocate(device.nodes(), &mut stream).expect("allocate");
        pool.release_all(&mut stream).expect("release");
        pool.release_all(&mut stream).expect("release again");

        assert!(pool.is_empty());
        assert!(stream.announced_buffers().expect("announced").is_empty());
    }
}
