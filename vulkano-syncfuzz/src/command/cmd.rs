// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Barriers and buffer writes recorded into the tested command buffer.

use super::context::{PrepareContext, SubmitContext, VerifyContext};
use crate::{
    device::{
        BufferMemoryBarrier, DependencyInfo, DeviceError, DeviceSize, ImageMemoryBarrier,
        MemoryBarrier,
    },
    log::TestLog,
    random::random_bytes,
    reference::ReferenceImage,
    sync::BarrierMasks,
};
use ash::vk;

/// The largest amount of data that a single buffer update can write.
pub const UPDATE_BLOCK_SIZE: usize = 65536;

/// Which resource a [`PipelineBarrier`] applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierKind {
    Global,
    Buffer,
    /// An image barrier that keeps the image in `layout`.
    Image { layout: vk::ImageLayout },
}

/// A pipeline barrier that doesn't change any image layout.
#[derive(Debug)]
pub struct PipelineBarrier {
    kind: BarrierKind,
    masks: BarrierMasks,
}

impl PipelineBarrier {
    #[inline]
    pub fn new(kind: BarrierKind, masks: BarrierMasks) -> Self {
        PipelineBarrier { kind, masks }
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        let kind = match self.kind {
            BarrierKind::Global => "Global",
            BarrierKind::Buffer => "Buffer",
            BarrierKind::Image { .. } => "Image",
        };

        log.message(format!(
            "{index}:PipelineBarrier {kind} pipeline barrier, srcStages: {:?}, srcAccesses: {:?}, \
            dstStages: {:?}, dstAccesses: {:?}",
            self.masks.src_stages,
            self.masks.src_accesses,
            self.masks.dst_stages,
            self.masks.dst_accesses,
        ));
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let BarrierMasks {
            src_stages,
            src_accesses: src_access,
            dst_stages,
            dst_accesses: dst_access,
        } = self.masks;
        let mut dependency_info = DependencyInfo {
            src_stages,
            dst_stages,
            ..Default::default()
        };

        match self.kind {
            BarrierKind::Global => dependency_info.memory_barriers.push(MemoryBarrier {
                src_access,
                dst_access,
            }),
            BarrierKind::Buffer => dependency_info.buffer_barriers.push(BufferMemoryBarrier {
                src_access,
                dst_access,
                buffer: context.buffer()?.id(),
            }),
            BarrierKind::Image { layout } => {
                dependency_info.image_barriers.push(ImageMemoryBarrier {
                    src_access,
                    dst_access,
                    old_layout: layout,
                    new_layout: layout,
                    image: context.image()?.id(),
                })
            }
        }

        context.builder().pipeline_barrier(dependency_info);

        Ok(())
    }
}

/// An image barrier that moves the tested image to another layout.
#[derive(Debug)]
pub struct ImageTransition {
    src_layout: vk::ImageLayout,
    dst_layout: vk::ImageLayout,
    masks: BarrierMasks,
    extent: [u32; 2],
    image_memory_size: DeviceSize,
}

impl ImageTransition {
    #[inline]
    pub fn new(
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
        masks: BarrierMasks,
    ) -> Self {
        ImageTransition {
            src_layout,
            dst_layout,
            masks,
            extent: [0, 0],
            image_memory_size: 0,
        }
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageTransition Image transition pipeline barrier, srcStages: {:?}, \
            srcAccesses: {:?}, dstStages: {:?}, dstAccesses: {:?}, srcLayout: {:?}, \
            dstLayout: {:?}",
            self.masks.src_stages,
            self.masks.src_accesses,
            self.masks.dst_stages,
            self.masks.dst_accesses,
            self.src_layout,
            self.dst_layout,
        ));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = context.image_extent();
        self.image_memory_size = context.image_memory_size();

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let image = context.image()?.id();

        context.builder().image_barrier(
            self.masks.src_stages,
            self.masks.dst_stages,
            ImageMemoryBarrier {
                src_access: self.masks.src_accesses,
                dst_access: self.masks.dst_accesses,
                old_layout: self.src_layout,
                new_layout: self.dst_layout,
                image,
            },
        );

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        // The layout change may rewrite the memory in an implementation-defined way.
        context
            .reference_mut()
            .set_undefined(0, self.image_memory_size as usize);

        // Leaving the undefined layout discards the contents, and the state machine doesn't
        // allow reads until the image is written again, so the stale expectation is dropped.
        if self.src_layout == vk::ImageLayout::UNDEFINED {
            let [width, height] = self.extent;
            context.set_reference_image(ReferenceImage::new(width, height));
        }
    }
}

/// Fills the tested buffer with a repeated 32-bit value.
#[derive(Debug)]
pub struct FillBuffer {
    value: u32,
    size: DeviceSize,
}

impl FillBuffer {
    #[inline]
    pub fn new(value: u32) -> Self {
        FillBuffer { value, size: 0 }
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:FillBuffer Fill value: {}", self.value));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.size = context.buffer_size() & !3;

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let buffer = context.buffer()?.id();
        context
            .builder()
            .fill_buffer(buffer, 0, self.size, self.value);

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let bytes = self.value.to_le_bytes();
        let reference = context.reference_mut();

        for pos in 0..self.size as usize {
            reference.set(pos, bytes[pos % 4]);
        }
    }
}

/// Writes generated data to the tested buffer with buffer updates, one block at a time.
#[derive(Debug)]
pub struct UpdateBuffer {
    seed: u32,
    size: DeviceSize,
}

impl UpdateBuffer {
    #[inline]
    pub fn new(seed: u32) -> Self {
        UpdateBuffer { seed, size: 0 }
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:UpdateBuffer Update buffer, seed: {}", self.seed));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.size = context.buffer_size();

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let buffer = context.buffer()?.id();
        let data = random_bytes(self.seed, self.size as usize);
        let builder = context.builder();

        for (block, chunk) in data.chunks(UPDATE_BLOCK_SIZE).enumerate() {
            let offset = (block * UPDATE_BLOCK_SIZE) as DeviceSize;
            builder.update_buffer(buffer, offset, chunk);
        }

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let data = random_bytes(self.seed, self.size as usize);
        context.reference_mut().set_data(0, &data);
    }
}
