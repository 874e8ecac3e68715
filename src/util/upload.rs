//! Staged GPU resource uploads.
//!
//! The [`ResourceUploader`] owns a private frame graph with a single frame in flight and
//! batches host-to-device copies into it. Every upload gets a freshly created
//! shared-storage, write-combined staging buffer; when the bytes staged since the last
//! flush would exceed the budget, the pending batch is flushed synchronously first, so
//! the budget bounds peak staging memory rather than failing uploads.

use anyhow::Result;
use ash::vk;

use crate::core::context::Context;
use crate::core::error::Error;
use crate::graph::record::BlitCommandEncoder;
use crate::graph::FrameGraph;
use crate::resource::buffer::{Buffer, SliceAccess};
use crate::resource::descriptor::{BufferDescriptor, MemoryType, TextureRegion};
use crate::resource::texture::Texture;

/// Default staging byte budget between two flushes: 128 MiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: vk::DeviceSize = 128 * 1024 * 1024;

/// Batches host-to-device copies under a byte budget.
pub struct ResourceUploader {
    context: Context,
    graph: FrameGraph,
    max_upload_size: vk::DeviceSize,
    enqueued_bytes: vk::DeviceSize,
}

impl ResourceUploader {
    pub fn new(context: &Context) -> Self {
        Self::with_budget(context, DEFAULT_MAX_UPLOAD_SIZE)
    }

    pub fn with_budget(context: &Context, max_upload_size: vk::DeviceSize) -> Self {
        assert!(max_upload_size > 0, "the uploader needs a non-zero byte budget");
        ResourceUploader {
            context: context.clone(),
            // One frame in flight: a flush fully retires before the next batch records.
            graph: FrameGraph::new(context, 1),
            max_upload_size,
            enqueued_bytes: 0,
        }
    }

    /// Bytes staged since the last flush.
    pub fn enqueued_bytes(&self) -> vk::DeviceSize {
        self.enqueued_bytes
    }

    pub fn max_upload_size(&self) -> vk::DeviceSize {
        self.max_upload_size
    }

    /// Append an upload pass carrying a staging buffer of `len` bytes. `record` receives
    /// the staging buffer and a blit encoder to record the device-side copy; fill the
    /// staging buffer with
    /// [`with_deferred_slice`](crate::resource::buffer::Buffer::with_deferred_slice).
    ///
    /// Flushes the pending batch first when `len` would overflow the budget. A single
    /// upload larger than the whole budget can never be staged and fails.
    pub fn add_upload_pass(
        &mut self,
        len: vk::DeviceSize,
        record: impl FnOnce(&Buffer, &mut BlitCommandEncoder<'_>),
    ) -> Result<()> {
        if len > self.max_upload_size {
            return Err(Error::UploadTooLarge {
                requested: len,
                budget: self.max_upload_size,
            }
            .into());
        }
        if self.enqueued_bytes + len > self.max_upload_size {
            self.flush()?;
        }

        let staging = Buffer::new(
            &self.context,
            BufferDescriptor::new(len, MemoryType::CpuToGpu)
                .with_usage(vk::BufferUsageFlags::TRANSFER_SRC),
        );
        self.graph
            .add_blit_pass("upload", |encoder| record(&staging, encoder));
        self.enqueued_bytes += len;
        Ok(())
    }

    /// Submit the pending batch and reset the byte counter. A flush with nothing staged
    /// is a no-op.
    pub fn flush(&mut self) -> Result<()> {
        if self.graph.pass_count() == 0 {
            self.enqueued_bytes = 0;
            return Ok(());
        }
        trace!("Flushing {} bytes of staged uploads", self.enqueued_bytes);
        self.graph.execute()?;
        self.enqueued_bytes = 0;
        Ok(())
    }

    /// Upload `data` into `dst` at `offset`. Host-visible targets are written directly
    /// and `on_complete` runs immediately; otherwise the copy is staged and
    /// `on_complete` runs when the batch completes on the GPU.
    pub fn upload_to_buffer(
        &mut self,
        dst: &Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let len = data.len() as vk::DeviceSize;
        if dst.descriptor().memory_type.is_host_visible()
            && self.context.backend().is_materialised(dst.handle())
        {
            let mut slice = dst.slice(offset..offset + len, SliceAccess::Write)?;
            slice.as_bytes_mut().copy_from_slice(data);
            drop(slice);
            on_complete();
            return Ok(());
        }

        let bytes = data.to_vec();
        self.add_upload_pass(len, |staging, encoder| {
            staging.with_deferred_slice(0..len, move |mapped| mapped.copy_from_slice(&bytes));
            encoder.copy_buffer(staging, 0, dst, offset, len);
        })?;
        self.graph.add_completion_callback(on_complete);
        Ok(())
    }

    /// Upload `data` into a region of `dst` through a staging buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_to_texture(
        &mut self,
        dst: &Texture,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        bytes_per_row: u32,
        bytes_per_image: u32,
        data: &[u8],
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let len = data.len() as vk::DeviceSize;
        let bytes = data.to_vec();
        self.add_upload_pass(len, |staging, encoder| {
            staging.with_deferred_slice(0..len, move |mapped| mapped.copy_from_slice(&bytes));
            encoder.copy_buffer_to_texture(
                staging,
                0,
                bytes_per_row,
                bytes_per_image,
                dst,
                region,
                mip_level,
                array_slice,
            );
        })?;
        self.graph.add_completion_callback(on_complete);
        Ok(())
    }
}
