// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! What a command can see and do in each phase of a test.
//!
//! Every phase gets its own context type, and each one only exposes what the phase is allowed to
//! touch. Preparing owns the tested buffer or image, submitting can only record into the tested
//! command buffer, and verifying can only record into command buffers of its own.

use crate::{
    device::{
        Buffer, BufferCreateInfo, BufferMemoryBarrier, Device, DeviceError, DeviceMemory,
        DeviceSize, Image, ImageCreateInfo, ImageMemoryBarrier, MemoryRequirements,
        RecordingCommandBuffer,
    },
    log::TestLog,
    memory::Memory,
    reference::{ReferenceImage, ReferenceMemory},
    run::ResultCollector,
    usage::Usage,
};
use ash::vk;
use std::sync::Arc;

/// The device, the tested memory and the configuration of the test.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    device: &'a Arc<dyn Device>,
    memory: &'a Memory,
    usage: Usage,
    sharing_mode: vk::SharingMode,
}

impl<'a> Context<'a> {
    #[inline]
    pub fn new(
        device: &'a Arc<dyn Device>,
        memory: &'a Memory,
        usage: Usage,
        sharing_mode: vk::SharingMode,
    ) -> Self {
        Context {
            device,
            memory,
            usage,
            sharing_mode,
        }
    }

    #[inline]
    pub fn device(&self) -> &'a Arc<dyn Device> {
        self.device
    }

    /// Returns the tested memory.
    #[inline]
    pub fn memory(&self) -> &'a Memory {
        self.memory
    }

    #[inline]
    pub fn usage(&self) -> Usage {
        self.usage
    }

    #[inline]
    pub fn sharing_mode(&self) -> vk::SharingMode {
        self.sharing_mode
    }

    #[inline]
    pub fn queue_flags(&self) -> vk::QueueFlags {
        self.device.queue_flags()
    }

    /// Returns the first memory type allowed by `requirements` that has all of
    /// `property_flags`.
    fn find_memory_type(
        &self,
        requirements: &MemoryRequirements,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, DeviceError> {
        (0u32..)
            .zip(self.device.memory_types())
            .find(|(index, memory_type)| {
                requirements.allows_memory_type(*index)
                    && memory_type.property_flags.contains(property_flags)
            })
            .map(|(index, _)| index)
            .ok_or(DeviceError::UnsupportedUsage)
    }

    /// Creates a scratch buffer with memory of its own.
    pub fn create_bound_buffer(
        &self,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
        property_flags: vk::MemoryPropertyFlags,
    ) -> Result<BoundBuffer, DeviceError> {
        let buffer = Buffer::new(
            self.device.clone(),
            &BufferCreateInfo {
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
            },
        )?;
        let requirements = buffer.memory_requirements()?;
        let memory_type_index = self.find_memory_type(&requirements, property_flags)?;
        let memory =
            DeviceMemory::allocate(self.device.clone(), requirements.size, memory_type_index)?;
        buffer.bind_memory(&memory, 0)?;

        Ok(BoundBuffer { buffer, memory })
    }

    /// Creates a scratch RGBA8 image with memory of its own. The image starts in the undefined
    /// layout.
    pub fn create_bound_image(
        &self,
        extent: [u32; 2],
        usage: vk::ImageUsageFlags,
    ) -> Result<BoundImage, DeviceError> {
        let image = Image::new(self.device.clone(), &ImageCreateInfo::rgba8(extent, usage))?;
        let requirements = image.memory_requirements()?;
        let memory_type_index =
            self.find_memory_type(&requirements, vk::MemoryPropertyFlags::empty())?;
        let memory =
            DeviceMemory::allocate(self.device.clone(), requirements.size, memory_type_index)?;
        image.bind_memory(&memory, 0)?;

        Ok(BoundImage { image, memory })
    }

    /// Submits the recorded commands and waits for the queue to become idle.
    pub fn queue_run(&self, builder: RecordingCommandBuffer) -> Result<(), DeviceError> {
        self.device.queue_submit(&builder.end())?;
        self.device.queue_wait_idle()
    }

    /// Creates a host-visible buffer holding `data`, to be used as a transfer source.
    pub fn create_upload_buffer(&self, data: &[u8]) -> Result<BoundBuffer, DeviceError> {
        let upload = self.create_bound_buffer(
            data.len() as DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;
        upload.write(data)?;

        Ok(upload)
    }

    /// Moves a freshly created image to the transfer destination layout.
    pub fn prepare_destination_image(&self, image: &Image) -> Result<(), DeviceError> {
        let mut builder = RecordingCommandBuffer::new();
        builder.image_barrier(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            ImageMemoryBarrier {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                image: image.id(),
            },
        );

        self.queue_run(builder)
    }

    /// Fills a freshly created image with `data` and leaves it in the transfer source layout.
    pub fn prepare_source_image(&self, image: &Image, data: &[u8]) -> Result<(), DeviceError> {
        let upload = self.create_upload_buffer(data)?;
        let mut builder = RecordingCommandBuffer::new();
        builder
            .image_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                ImageMemoryBarrier {
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::TRANSFER_WRITE,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    image: image.id(),
                },
            )
            .copy_buffer_to_image(
                upload.buffer.id(),
                image.id(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                image.extent(),
            )
            .image_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                ImageMemoryBarrier {
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::TRANSFER_READ,
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image: image.id(),
                },
            );

        self.queue_run(builder)
    }

    /// Makes transfer writes to `buffer` visible to the host and reads its contents.
    pub fn read_buffer(&self, buffer: &BoundBuffer) -> Result<Vec<u8>, DeviceError> {
        let mut builder = RecordingCommandBuffer::new();
        builder.buffer_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            BufferMemoryBarrier {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::HOST_READ,
                buffer: buffer.buffer.id(),
            },
        );
        self.queue_run(builder)?;

        buffer.read()
    }

    /// Copies the contents of `image` to the host. `layout`, `src_stages` and `src_access`
    /// describe the last write to the image.
    pub fn read_image(
        &self,
        image: &Image,
        layout: vk::ImageLayout,
        src_stages: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
    ) -> Result<Vec<u8>, DeviceError> {
        let [width, height] = image.extent();
        let readback = self.create_bound_buffer(
            4 * DeviceSize::from(width) * DeviceSize::from(height),
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        let mut builder = RecordingCommandBuffer::new();
        builder
            .image_barrier(
                src_stages,
                vk::PipelineStageFlags::TRANSFER,
                ImageMemoryBarrier {
                    src_access,
                    dst_access: vk::AccessFlags::TRANSFER_READ,
                    old_layout: layout,
                    new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image: image.id(),
                },
            )
            .copy_image_to_buffer(
                image.id(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback.buffer.id(),
                image.extent(),
            );
        self.queue_run(builder)?;

        self.read_buffer(&readback)
    }
}

/// A scratch buffer together with its memory.
#[derive(Debug)]
pub struct BoundBuffer {
    // Declared before the memory so that it is destroyed first.
    pub buffer: Buffer,
    pub memory: DeviceMemory,
}

impl BoundBuffer {
    /// Writes `data` at the start of the buffer through a temporary mapping.
    pub fn write(&self, data: &[u8]) -> Result<(), DeviceError> {
        self.memory.map()?;
        let result = self
            .memory
            .write(0, data)
            .and_then(|()| self.memory.flush());
        self.memory.unmap()?;

        result
    }

    /// Reads the whole buffer through a temporary mapping.
    pub fn read(&self) -> Result<Vec<u8>, DeviceError> {
        let mut data = vec![0; self.buffer.size() as usize];

        self.memory.map()?;
        let result = self
            .memory
            .invalidate()
            .and_then(|()| self.memory.read(0, &mut data));
        self.memory.unmap()?;

        result.map(|()| data)
    }
}

/// A scratch image together with its memory.
#[derive(Debug)]
pub struct BoundImage {
    pub image: Image,
    pub memory: DeviceMemory,
}

/// The context of the prepare phase. It owns the tested buffer or image while it exists.
#[derive(Debug)]
pub struct PrepareContext<'a> {
    context: Context<'a>,
    buffer: Option<Buffer>,
    image: Option<Image>,
    image_memory_size: DeviceSize,
}

impl<'a> PrepareContext<'a> {
    #[inline]
    pub fn new(context: Context<'a>) -> Self {
        PrepareContext {
            context,
            buffer: None,
            image: None,
            image_memory_size: 0,
        }
    }

    #[inline]
    pub fn context(&self) -> &Context<'a> {
        &self.context
    }

    #[inline]
    pub fn memory(&self) -> &'a Memory {
        self.context.memory
    }

    /// Returns the tested buffer.
    #[inline]
    pub fn buffer(&self) -> Result<&Buffer, DeviceError> {
        self.buffer.as_ref().ok_or(DeviceError::InvalidHandle)
    }

    /// Returns the size of the tested buffer, or zero if there is none.
    #[inline]
    pub fn buffer_size(&self) -> DeviceSize {
        self.buffer.as_ref().map_or(0, Buffer::size)
    }

    #[inline]
    pub fn set_buffer(&mut self, buffer: Buffer) {
        debug_assert!(self.buffer.is_none() && self.image.is_none());
        self.buffer = Some(buffer);
    }

    /// Takes the tested buffer, to be destroyed when the test executes.
    #[inline]
    pub fn release_buffer(&mut self) -> Result<Buffer, DeviceError> {
        self.buffer.take().ok_or(DeviceError::InvalidHandle)
    }

    /// Returns the tested image.
    #[inline]
    pub fn image(&self) -> Result<&Image, DeviceError> {
        self.image.as_ref().ok_or(DeviceError::InvalidHandle)
    }

    /// Returns the extent of the tested image, or zero if there is none.
    #[inline]
    pub fn image_extent(&self) -> [u32; 2] {
        self.image.as_ref().map_or([0, 0], Image::extent)
    }

    /// Returns the size of the memory that the tested image requires.
    #[inline]
    pub fn image_memory_size(&self) -> DeviceSize {
        self.image_memory_size
    }

    #[inline]
    pub fn set_image(&mut self, image: Image, memory_size: DeviceSize) {
        debug_assert!(self.buffer.is_none() && self.image.is_none());
        self.image = Some(image);
        self.image_memory_size = memory_size;
    }

    /// Takes the tested image, to be destroyed when the test executes.
    #[inline]
    pub fn release_image(&mut self) -> Result<Image, DeviceError> {
        self.image_memory_size = 0;
        self.image.take().ok_or(DeviceError::InvalidHandle)
    }
}

/// The context of the execute phase.
#[derive(Debug)]
pub struct ExecuteContext<'a> {
    context: Context<'a>,
    mapped: bool,
}

impl<'a> ExecuteContext<'a> {
    #[inline]
    pub fn new(context: Context<'a>) -> Self {
        ExecuteContext {
            context,
            mapped: false,
        }
    }

    #[inline]
    pub fn context(&self) -> &Context<'a> {
        &self.context
    }

    /// Returns the tested memory object.
    #[inline]
    pub fn memory(&self) -> &'a DeviceMemory {
        self.context.memory.memory()
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    #[inline]
    pub fn set_mapped(&mut self, mapped: bool) {
        self.mapped = mapped;
    }
}

/// The context of recording the tested command buffer.
#[derive(Debug)]
pub struct SubmitContext<'p, 'a> {
    prepare: &'p PrepareContext<'a>,
    builder: &'p mut RecordingCommandBuffer,
}

impl<'p, 'a> SubmitContext<'p, 'a> {
    #[inline]
    pub fn new(prepare: &'p PrepareContext<'a>, builder: &'p mut RecordingCommandBuffer) -> Self {
        SubmitContext { prepare, builder }
    }

    #[inline]
    pub fn prepare(&self) -> &PrepareContext<'a> {
        self.prepare
    }

    #[inline]
    pub fn buffer(&self) -> Result<&'p Buffer, DeviceError> {
        self.prepare.buffer()
    }

    #[inline]
    pub fn buffer_size(&self) -> DeviceSize {
        self.prepare.buffer_size()
    }

    #[inline]
    pub fn image(&self) -> Result<&'p Image, DeviceError> {
        self.prepare.image()
    }

    /// Returns the tested command buffer.
    #[inline]
    pub fn builder(&mut self) -> &mut RecordingCommandBuffer {
        self.builder
    }
}

/// The context of the verify phase.
#[derive(Debug)]
pub struct VerifyContext<'a> {
    context: Context<'a>,
    log: &'a mut TestLog,
    results: &'a mut ResultCollector,
    reference: ReferenceMemory,
    reference_image: ReferenceImage,
}

impl<'a> VerifyContext<'a> {
    pub fn new(
        context: Context<'a>,
        log: &'a mut TestLog,
        results: &'a mut ResultCollector,
    ) -> Self {
        let reference = ReferenceMemory::new(context.memory.info().host_size());

        VerifyContext {
            context,
            log,
            results,
            reference,
            reference_image: ReferenceImage::new(0, 0),
        }
    }

    #[inline]
    pub fn context(&self) -> &Context<'a> {
        &self.context
    }

    #[inline]
    pub fn log(&mut self) -> &mut TestLog {
        self.log
    }

    /// Runs `f` with the log redirected into a new section named `name`.
    pub fn section<R>(&mut self, name: impl Into<String>, f: impl FnOnce(&mut Self) -> R) -> R {
        let name = name.into();
        let span = tracing::info_span!("section", name = %name);
        let _enter = span.enter();

        let outer = std::mem::take(&mut *self.log);
        let ret = f(self);
        let inner = std::mem::replace(&mut *self.log, outer);
        self.log.push_section(name, inner);

        ret
    }

    /// Records a failure and continues.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.log.message(message.clone());
        self.results.fail(message);
    }

    /// Returns the expected contents of the tested memory.
    #[inline]
    pub fn reference(&self) -> &ReferenceMemory {
        &self.reference
    }

    #[inline]
    pub fn reference_mut(&mut self) -> &mut ReferenceMemory {
        &mut self.reference
    }

    /// Returns the expected contents of the tested image.
    #[inline]
    pub fn reference_image(&self) -> &ReferenceImage {
        &self.reference_image
    }

    #[inline]
    pub fn set_reference_image(&mut self, image: ReferenceImage) {
        self.reference_image = image;
    }

    /// Compares image data with `expected`, recording a failure with `message` on mismatch.
    pub fn check_image(
        &mut self,
        expected: &ReferenceImage,
        name: &str,
        actual: &[u8],
        message: impl Into<String>,
    ) {
        if !expected.compare(self.log, name, actual) {
            self.results.fail(message);
        }
    }

    /// Consumes the context and returns the final reference memory.
    #[inline]
    pub fn into_reference(self) -> ReferenceMemory {
        self.reference
    }
}

/// The prepare context inside of a render pass.
#[derive(Debug)]
pub struct PrepareRenderPassContext<'p, 'a> {
    prepare: &'p mut PrepareContext<'a>,
    target: &'p Image,
}

impl<'p, 'a> PrepareRenderPassContext<'p, 'a> {
    #[inline]
    pub fn new(prepare: &'p mut PrepareContext<'a>, target: &'p Image) -> Self {
        PrepareRenderPassContext { prepare, target }
    }

    #[inline]
    pub fn prepare(&mut self) -> &mut PrepareContext<'a> {
        self.prepare
    }

    #[inline]
    pub fn target_extent(&self) -> [u32; 2] {
        self.target.extent()
    }
}

/// The verify context inside of a render pass.
#[derive(Debug)]
pub struct VerifyRenderPassContext<'v, 'a> {
    verify: &'v mut VerifyContext<'a>,
    reference_target: &'v mut ReferenceImage,
}

impl<'v, 'a> VerifyRenderPassContext<'v, 'a> {
    #[inline]
    pub fn new(
        verify: &'v mut VerifyContext<'a>,
        reference_target: &'v mut ReferenceImage,
    ) -> Self {
        VerifyRenderPassContext {
            verify,
            reference_target,
        }
    }

    #[inline]
    pub fn verify(&mut self) -> &mut VerifyContext<'a> {
        self.verify
    }

    #[inline]
    pub fn reference(&self) -> &ReferenceMemory {
        &self.verify.reference
    }

    /// Returns the expected contents of the render target.
    #[inline]
    pub fn reference_target(&mut self) -> &mut ReferenceImage {
        self.reference_target
    }
}
