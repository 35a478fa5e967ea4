// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Transfers between the tested buffer or image and scratch objects.
//!
//! Commands named `*To*` read the tested object into a scratch object that is checked against
//! the reference during verification. Commands named `*From*` overwrite the tested object with
//! data generated from their seed, which then becomes the new reference.

use super::context::{BoundBuffer, BoundImage, PrepareContext, SubmitContext, VerifyContext};
use crate::{
    device::{DeviceError, DeviceSize},
    log::TestLog,
    memory::find_image_size_wxhx4,
    random::random_bytes,
    reference::ReferenceImage,
    state::BlitScale,
};
use ash::vk;

/// Returns the size in bytes of an RGBA8 image of `extent`.
#[inline]
fn rgba8_size([width, height]: [u32; 2]) -> usize {
    4 * width as usize * height as usize
}

/// Returns the extent of an image with exactly as many bytes as the tested buffer.
fn buffer_image_extent(context: &PrepareContext<'_>) -> Result<[u32; 2], DeviceError> {
    find_image_size_wxhx4(context.buffer_size()).ok_or(DeviceError::FormatNotSupported)
}

fn scratch_buffer(buffer: &Option<BoundBuffer>) -> Result<&BoundBuffer, DeviceError> {
    buffer.as_ref().ok_or(DeviceError::InvalidHandle)
}

fn scratch_image(image: &Option<BoundImage>) -> Result<&BoundImage, DeviceError> {
    image.as_ref().ok_or(DeviceError::InvalidHandle)
}

/// Copies the tested buffer into a host-visible buffer.
#[derive(Debug, Default)]
pub struct BufferCopyToBuffer {
    size: DeviceSize,
    dst: Option<BoundBuffer>,
}

impl BufferCopyToBuffer {
    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:BufferCopyToBuffer Allocate destination buffer for buffer to buffer copy.",
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:BufferCopyToBuffer Copy buffer to another buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.size = context.buffer_size();
        self.dst = Some(context.context().create_bound_buffer(
            self.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = context.buffer()?.id();
        let dst = scratch_buffer(&self.dst)?.buffer.id();
        context.builder().copy_buffer(src, dst, self.size);

        Ok(())
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        let data = context
            .context()
            .read_buffer(scratch_buffer(&self.dst)?)?;

        if let Some(mismatch) = context.reference().first_mismatch(&data) {
            context.fail(mismatch.describe(index, "BufferCopyToBuffer"));
        }

        Ok(())
    }
}

/// Copies generated data into the tested buffer from another buffer.
#[derive(Debug)]
pub struct BufferCopyFromBuffer {
    seed: u32,
    size: DeviceSize,
    src: Option<BoundBuffer>,
}

impl BufferCopyFromBuffer {
    #[inline]
    pub fn new(seed: u32) -> Self {
        BufferCopyFromBuffer {
            seed,
            size: 0,
            src: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:BufferCopyFromBuffer Allocate source buffer for buffer to buffer copy. \
            Seed: {}",
            self.seed,
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:BufferCopyFromBuffer Copy buffer data from another buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.size = context.buffer_size();
        let data = random_bytes(self.seed, self.size as usize);
        self.src = Some(context.context().create_upload_buffer(&data)?);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = scratch_buffer(&self.src)?.buffer.id();
        let dst = context.buffer()?.id();
        context.builder().copy_buffer(src, dst, self.size);

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let data = random_bytes(self.seed, self.size as usize);
        context.reference_mut().set_data(0, &data);
    }
}

/// Copies the tested buffer into an image whose byte size equals the buffer size.
#[derive(Debug, Default)]
pub struct BufferCopyToImage {
    extent: [u32; 2],
    dst: Option<BoundImage>,
}

impl BufferCopyToImage {
    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:BufferCopyToImage Allocate destination image for buffer to image copy.",
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:BufferCopyToImage Copy buffer to image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = buffer_image_extent(context)?;

        let dst = context.context().create_bound_image(
            self.extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        context.context().prepare_destination_image(&dst.image)?;
        self.dst = Some(dst);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = context.buffer()?.id();
        let dst = scratch_image(&self.dst)?.image.id();
        context.builder().copy_buffer_to_image(
            src,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            self.extent,
        );

        Ok(())
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        let data = context.context().read_image(
            &scratch_image(&self.dst)?.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        )?;

        if let Some(mismatch) = context.reference().first_mismatch(&data) {
            context.fail(mismatch.describe(index, "BufferCopyToImage"));
        }

        Ok(())
    }
}

/// Copies a generated image into the tested buffer.
#[derive(Debug)]
pub struct BufferCopyFromImage {
    seed: u32,
    extent: [u32; 2],
    src: Option<BoundImage>,
}

impl BufferCopyFromImage {
    #[inline]
    pub fn new(seed: u32) -> Self {
        BufferCopyFromImage {
            seed,
            extent: [0, 0],
            src: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:BufferCopyFromImage Allocate source image for image to buffer copy. \
            Seed: {}",
            self.seed,
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:BufferCopyFromImage Copy buffer data from image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = buffer_image_extent(context)?;

        let src = context.context().create_bound_image(
            self.extent,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let data = random_bytes(self.seed, rgba8_size(self.extent));
        context.context().prepare_source_image(&src.image, &data)?;
        self.src = Some(src);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = scratch_image(&self.src)?.image.id();
        let dst = context.buffer()?.id();
        context.builder().copy_image_to_buffer(
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            self.extent,
        );

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let data = random_bytes(self.seed, rgba8_size(self.extent));
        context.reference_mut().set_data(0, &data);
    }
}

/// Copies the tested image into a host-visible buffer.
#[derive(Debug)]
pub struct ImageCopyToBuffer {
    layout: vk::ImageLayout,
    extent: [u32; 2],
    dst: Option<BoundBuffer>,
}

impl ImageCopyToBuffer {
    /// `layout` is the layout that the tested image is in when the copy executes.
    #[inline]
    pub fn new(layout: vk::ImageLayout) -> Self {
        ImageCopyToBuffer {
            layout,
            extent: [0, 0],
            dst: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageCopyToBuffer Allocate destination buffer for image to buffer copy.",
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:ImageCopyToBuffer Copy image to buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = context.image_extent();
        self.dst = Some(context.context().create_bound_buffer(
            rgba8_size(self.extent) as DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = context.image()?.id();
        let dst = scratch_buffer(&self.dst)?.buffer.id();
        context
            .builder()
            .copy_image_to_buffer(src, self.layout, dst, self.extent);

        Ok(())
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        let data = context
            .context()
            .read_buffer(scratch_buffer(&self.dst)?)?;
        let expected = context.reference_image().clone();
        context.check_image(
            &expected,
            &format!("{index}:ImageCopyToBuffer"),
            &data,
            format!("{index}:ImageCopyToBuffer Image comparison failed"),
        );

        Ok(())
    }
}

/// Copies generated data into the tested image from a buffer.
#[derive(Debug)]
pub struct ImageCopyFromBuffer {
    seed: u32,
    layout: vk::ImageLayout,
    extent: [u32; 2],
    image_memory_size: DeviceSize,
    src: Option<BoundBuffer>,
}

impl ImageCopyFromBuffer {
    #[inline]
    pub fn new(seed: u32, layout: vk::ImageLayout) -> Self {
        ImageCopyFromBuffer {
            seed,
            layout,
            extent: [0, 0],
            image_memory_size: 0,
            src: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageCopyFromBuffer Allocate source buffer for buffer to image copy. \
            Seed: {}",
            self.seed,
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:ImageCopyFromBuffer Copy image data from buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = context.image_extent();
        self.image_memory_size = context.image_memory_size();

        let data = random_bytes(self.seed, rgba8_size(self.extent));
        self.src = Some(context.context().create_upload_buffer(&data)?);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = scratch_buffer(&self.src)?.buffer.id();
        let dst = context.image()?.id();
        context
            .builder()
            .copy_buffer_to_image(src, dst, self.layout, self.extent);

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let [width, height] = self.extent;
        context
            .reference_mut()
            .set_undefined(0, self.image_memory_size as usize);
        context.set_reference_image(ReferenceImage::from_seed(width, height, self.seed));
    }
}

/// Copies the tested image into another image.
#[derive(Debug)]
pub struct ImageCopyToImage {
    layout: vk::ImageLayout,
    extent: [u32; 2],
    dst: Option<BoundImage>,
}

impl ImageCopyToImage {
    #[inline]
    pub fn new(layout: vk::ImageLayout) -> Self {
        ImageCopyToImage {
            layout,
            extent: [0, 0],
            dst: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageCopyToImage Allocate destination image for image to image copy.",
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:ImageCopyToImage Copy image to another image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = context.image_extent();

        let dst = context.context().create_bound_image(
            self.extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        context.context().prepare_destination_image(&dst.image)?;
        self.dst = Some(dst);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = context.image()?.id();
        let dst = scratch_image(&self.dst)?.image.id();
        context.builder().copy_image(
            src,
            self.layout,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            self.extent,
        );

        Ok(())
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        let data = context.context().read_image(
            &scratch_image(&self.dst)?.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        )?;
        let expected = context.reference_image().clone();
        context.check_image(
            &expected,
            &format!("{index}:ImageCopyToImage"),
            &data,
            format!("{index}:ImageCopyToImage Image comparison failed"),
        );

        Ok(())
    }
}

/// Copies a generated image into the tested image.
#[derive(Debug)]
pub struct ImageCopyFromImage {
    seed: u32,
    layout: vk::ImageLayout,
    extent: [u32; 2],
    image_memory_size: DeviceSize,
    src: Option<BoundImage>,
}

impl ImageCopyFromImage {
    #[inline]
    pub fn new(seed: u32, layout: vk::ImageLayout) -> Self {
        ImageCopyFromImage {
            seed,
            layout,
            extent: [0, 0],
            image_memory_size: 0,
            src: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageCopyFromImage Allocate source image for image to image copy. Seed: {}",
            self.seed,
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:ImageCopyFromImage Copy image data from another image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.extent = context.image_extent();
        self.image_memory_size = context.image_memory_size();

        let src = context.context().create_bound_image(
            self.extent,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let data = random_bytes(self.seed, rgba8_size(self.extent));
        context.context().prepare_source_image(&src.image, &data)?;
        self.src = Some(src);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = scratch_image(&self.src)?.image.id();
        let dst = context.image()?.id();
        context.builder().copy_image(
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            self.layout,
            self.extent,
        );

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let [width, height] = self.extent;
        context
            .reference_mut()
            .set_undefined(0, self.image_memory_size as usize);
        context.set_reference_image(ReferenceImage::from_seed(width, height, self.seed));
    }
}

/// Blits the tested image into another image of the same or twice the extent.
#[derive(Debug)]
pub struct ImageBlitToImage {
    scale: BlitScale,
    layout: vk::ImageLayout,
    src_extent: [u32; 2],
    dst_extent: [u32; 2],
    dst: Option<BoundImage>,
}

impl ImageBlitToImage {
    #[inline]
    pub fn new(scale: BlitScale, layout: vk::ImageLayout) -> Self {
        ImageBlitToImage {
            scale,
            layout,
            src_extent: [0, 0],
            dst_extent: [0, 0],
            dst: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageBlitToImage Allocate destination image for image to image blit.",
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageBlitToImage Blit image to another image{}",
            match self.scale {
                BlitScale::Same => "",
                BlitScale::Double => " scale 2x",
            },
        ));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        let [width, height] = context.image_extent();
        self.src_extent = [width, height];
        self.dst_extent = match self.scale {
            BlitScale::Same => [width, height],
            BlitScale::Double => [2 * width, 2 * height],
        };

        let dst = context.context().create_bound_image(
            self.dst_extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        context.context().prepare_destination_image(&dst.image)?;
        self.dst = Some(dst);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = context.image()?.id();
        let dst = scratch_image(&self.dst)?.image.id();
        context.builder().blit_image(
            src,
            self.layout,
            self.src_extent,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            self.dst_extent,
        );

        Ok(())
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        let data = context.context().read_image(
            &scratch_image(&self.dst)?.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        )?;
        let [width, height] = self.dst_extent;
        let expected = context.reference_image().blit_nearest(width, height);
        context.check_image(
            &expected,
            &format!("{index}:ImageBlitToImage"),
            &data,
            format!("{index}:ImageBlitToImage Image comparison failed"),
        );

        Ok(())
    }
}

/// Blits a generated image of the same or half the extent into the tested image.
#[derive(Debug)]
pub struct ImageBlitFromImage {
    scale: BlitScale,
    seed: u32,
    layout: vk::ImageLayout,
    src_extent: [u32; 2],
    dst_extent: [u32; 2],
    image_memory_size: DeviceSize,
    src: Option<BoundImage>,
}

impl ImageBlitFromImage {
    #[inline]
    pub fn new(scale: BlitScale, seed: u32, layout: vk::ImageLayout) -> Self {
        ImageBlitFromImage {
            scale,
            seed,
            layout,
            src_extent: [0, 0],
            dst_extent: [0, 0],
            image_memory_size: 0,
            src: None,
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageBlitFromImage Allocate source image for image to image blit. Seed: {}",
            self.seed,
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:ImageBlitFromImage Blit from another image{}",
            match self.scale {
                BlitScale::Same => "",
                BlitScale::Double => " scale 2x",
            },
        ));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        let [width, height] = context.image_extent();
        self.dst_extent = [width, height];
        self.src_extent = match self.scale {
            BlitScale::Same => [width, height],
            BlitScale::Double => [(width / 2).max(1), (height / 2).max(1)],
        };
        self.image_memory_size = context.image_memory_size();

        let src = context.context().create_bound_image(
            self.src_extent,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        let data = random_bytes(self.seed, rgba8_size(self.src_extent));
        context.context().prepare_source_image(&src.image, &data)?;
        self.src = Some(src);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let src = scratch_image(&self.src)?.image.id();
        let dst = context.image()?.id();
        context.builder().blit_image(
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            self.src_extent,
            dst,
            self.layout,
            self.dst_extent,
        );

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let [src_width, src_height] = self.src_extent;
        let [width, height] = self.dst_extent;
        let source = ReferenceImage::from_seed(src_width, src_height, self.seed);

        context
            .reference_mut()
            .set_undefined(0, self.image_memory_size as usize);
        context.set_reference_image(source.blit_nearest(width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_sizes() {
        assert_eq!(rgba8_size([0, 0]), 0);
        assert_eq!(rgba8_size([1, 256]), 1024);
        assert_eq!(rgba8_size([512, 512]), 1 << 20);
    }
}
