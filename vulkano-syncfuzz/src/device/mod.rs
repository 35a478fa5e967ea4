// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The device that the tests run against.
//!
//! The [`Device`] trait is the narrow set of entry points the tests need: memory allocation and
//! host mapping, buffer and image objects, two point-list pipelines, and a single queue that
//! executes recorded [`CommandBuffer`]s. Objects are owned through the RAII wrappers in this
//! module, which destroy the device object when dropped.
//!
//! [`SoftDevice`] implements the trait in software.

pub use self::soft::{Defects, SoftDevice, SoftDeviceCreateInfo};
use ash::vk;
use smallvec::SmallVec;
use std::{
    error::Error,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};

mod soft;

pub type DeviceSize = u64;

/// The format of every image the tests create.
pub const IMAGE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// The largest width or height of an image.
pub const MAX_IMAGE_DIMENSION: u32 = 4096;

/// The extent of the render pass target.
pub const RENDER_TARGET_EXTENT: [u32; 2] = [256, 256];

/// Source of the vertex shader used to draw a vertex buffer as points.
pub const VERTEX_BUFFER_SHADER: &str = "\
#version 310 es
layout(location = 0) in highp vec2 a_position;
void main (void) {
    gl_PointSize = 1.0;
    gl_Position = vec4(1.998 * a_position - vec2(0.999), 0.0, 1.0);
}
";

/// Source of the vertex shader used to draw an index buffer as points.
pub const INDEX_BUFFER_SHADER: &str = "\
#version 310 es
void main (void) {
    gl_PointSize = 1.0;
    highp vec2 pos = vec2(gl_VertexIndex % 256, gl_VertexIndex / 256) / vec2(255.0);
    gl_Position = vec4(1.998 * pos - vec2(0.999), 0.0, 1.0);
}
";

/// Source of the fragment shader shared by both pipelines.
pub const RENDER_WHITE_SHADER: &str = "\
#version 310 es
layout(location = 0) out highp vec4 o_color;
void main (void) {
    o_color = vec4(1.0);
}
";

/// A device that the tests can run against.
pub trait Device: Send + Sync {
    fn memory_types(&self) -> &[MemoryType];

    fn memory_heaps(&self) -> &[MemoryHeap];

    /// Returns the capabilities of the queue that work is submitted to.
    fn queue_flags(&self) -> vk::QueueFlags;

    fn allocate_memory(
        &self,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<Id<DeviceMemory>, DeviceError>;

    fn free_memory(&self, memory: Id<DeviceMemory>);

    /// Maps the whole memory object for host access.
    fn map_memory(&self, memory: Id<DeviceMemory>) -> Result<(), DeviceError>;

    fn unmap_memory(&self, memory: Id<DeviceMemory>) -> Result<(), DeviceError>;

    /// Makes host writes to the range available to the device.
    fn flush_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<(), DeviceError>;

    /// Makes device writes to the range visible to the host.
    fn invalidate_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<(), DeviceError>;

    /// Reads from mapped memory, as the host would through the mapped pointer.
    fn read_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        data: &mut [u8],
    ) -> Result<(), DeviceError>;

    /// Writes to mapped memory, as the host would through the mapped pointer.
    fn write_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    fn create_buffer(&self, create_info: &BufferCreateInfo) -> Result<Id<Buffer>, DeviceError>;

    fn destroy_buffer(&self, buffer: Id<Buffer>);

    fn buffer_memory_requirements(
        &self,
        buffer: Id<Buffer>,
    ) -> Result<MemoryRequirements, DeviceError>;

    fn bind_buffer_memory(
        &self,
        buffer: Id<Buffer>,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
    ) -> Result<(), DeviceError>;

    fn create_image(&self, create_info: &ImageCreateInfo) -> Result<Id<Image>, DeviceError>;

    fn destroy_image(&self, image: Id<Image>);

    fn image_memory_requirements(&self, image: Id<Image>)
        -> Result<MemoryRequirements, DeviceError>;

    fn bind_image_memory(
        &self,
        image: Id<Image>,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
    ) -> Result<(), DeviceError>;

    /// Creates a pipeline that draws points into a [`RENDER_TARGET_EXTENT`] color target.
    fn create_graphics_pipeline(
        &self,
        create_info: &PointPipelineCreateInfo,
    ) -> Result<Id<Pipeline>, DeviceError>;

    fn destroy_pipeline(&self, pipeline: Id<Pipeline>);

    /// Submits a command buffer. Execution may start at any point until the queue is waited on.
    fn queue_submit(&self, command_buffer: &CommandBuffer) -> Result<(), DeviceError>;

    fn queue_wait_idle(&self) -> Result<(), DeviceError>;

    fn device_wait_idle(&self) -> Result<(), DeviceError>;
}

/// An error returned by a [`Device`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceError {
    OutOfHostMemory,
    OutOfDeviceMemory,
    MemoryMapFailed,
    NotMapped,
    InvalidHandle,
    LayoutMismatch {
        expected: vk::ImageLayout,
        actual: vk::ImageLayout,
    },
    OutOfBounds,
    FormatNotSupported,
    UnsupportedUsage,
}

impl Error for DeviceError {}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfHostMemory => "a host memory allocation has failed",
            Self::OutOfDeviceMemory => "a device memory allocation has failed",
            Self::MemoryMapFailed => "mapping of a memory object has failed",
            Self::NotMapped => "the memory object is not mapped",
            Self::InvalidHandle => "the object does not exist or has been destroyed",
            Self::LayoutMismatch { expected, actual } => {
                return write!(
                    f,
                    "the image was expected to be in the {expected:?} layout, but is in the \
                    {actual:?} layout",
                );
            }
            Self::OutOfBounds => "the access is outside of the bounds of the object",
            Self::FormatNotSupported => "the requested format or extent is not supported",
            Self::UnsupportedUsage => {
                "the object was not created with a usage that allows the operation"
            }
        };

        f.write_str(msg)
    }
}

/// The typed handle of a device object.
pub struct Id<T> {
    raw: u64,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Id {
            raw,
            marker: PhantomData,
        }
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.raw
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.raw).finish()
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub property_flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryHeap {
    pub size: DeviceSize,
    pub flags: vk::MemoryHeapFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: DeviceSize,
    pub alignment: DeviceSize,
    pub memory_type_bits: u32,
}

impl MemoryRequirements {
    /// Returns whether memory of the given type may be bound.
    #[inline]
    pub fn allows_memory_type(&self, memory_type_index: u32) -> bool {
        memory_type_index < 32 && self.memory_type_bits & (1 << memory_type_index) != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub size: DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageCreateInfo {
    pub extent: [u32; 2],
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
}

impl ImageCreateInfo {
    /// Returns the create info of an RGBA8 image.
    #[inline]
    pub fn rgba8(extent: [u32; 2], usage: vk::ImageUsageFlags) -> Self {
        ImageCreateInfo {
            extent,
            format: IMAGE_FORMAT,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
        }
    }
}

/// Which vertex program a point pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointProgram {
    /// Each vertex is an R8G8 UNORM position read from the bound vertex buffer.
    VertexBuffer,
    /// Each vertex position is derived from a 16-bit index read from the bound index buffer.
    IndexBuffer,
}

impl PointProgram {
    /// Returns the source of the vertex shader.
    #[inline]
    pub fn vertex_shader(self) -> &'static str {
        match self {
            PointProgram::VertexBuffer => VERTEX_BUFFER_SHADER,
            PointProgram::IndexBuffer => INDEX_BUFFER_SHADER,
        }
    }

    #[inline]
    pub fn fragment_shader(self) -> &'static str {
        RENDER_WHITE_SHADER
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointPipelineCreateInfo {
    pub program: PointProgram,
}

/// A device memory allocation.
#[derive(Debug)]
pub struct DeviceMemory {
    device: Arc<dyn Device>,
    id: Id<DeviceMemory>,
    size: DeviceSize,
    memory_type_index: u32,
}

impl DeviceMemory {
    pub fn allocate(
        device: Arc<dyn Device>,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<Self, DeviceError> {
        let id = device.allocate_memory(size, memory_type_index)?;

        Ok(DeviceMemory {
            device,
            id,
            size,
            memory_type_index,
        })
    }

    #[inline]
    pub fn id(&self) -> Id<DeviceMemory> {
        self.id
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    #[inline]
    pub fn map(&self) -> Result<(), DeviceError> {
        self.device.map_memory(self.id)
    }

    #[inline]
    pub fn unmap(&self) -> Result<(), DeviceError> {
        self.device.unmap_memory(self.id)
    }

    /// Flushes the whole memory object.
    #[inline]
    pub fn flush(&self) -> Result<(), DeviceError> {
        self.device.flush_mapped_memory(self.id, 0, self.size)
    }

    /// Invalidates the whole memory object.
    #[inline]
    pub fn invalidate(&self) -> Result<(), DeviceError> {
        self.device.invalidate_mapped_memory(self.id, 0, self.size)
    }

    #[inline]
    pub fn read(&self, offset: DeviceSize, data: &mut [u8]) -> Result<(), DeviceError> {
        self.device.read_mapped_memory(self.id, offset, data)
    }

    #[inline]
    pub fn write(&self, offset: DeviceSize, data: &[u8]) -> Result<(), DeviceError> {
        self.device.write_mapped_memory(self.id, offset, data)
    }
}

impl Drop for DeviceMemory {
    #[inline]
    fn drop(&mut self) {
        self.device.free_memory(self.id);
    }
}

/// A buffer object.
#[derive(Debug)]
pub struct Buffer {
    device: Arc<dyn Device>,
    id: Id<Buffer>,
    size: DeviceSize,
}

impl Buffer {
    pub fn new(
        device: Arc<dyn Device>,
        create_info: &BufferCreateInfo,
    ) -> Result<Self, DeviceError> {
        let id = device.create_buffer(create_info)?;

        Ok(Buffer {
            device,
            id,
            size: create_info.size,
        })
    }

    #[inline]
    pub fn id(&self) -> Id<Buffer> {
        self.id
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn memory_requirements(&self) -> Result<MemoryRequirements, DeviceError> {
        self.device.buffer_memory_requirements(self.id)
    }

    #[inline]
    pub fn bind_memory(
        &self,
        memory: &DeviceMemory,
        offset: DeviceSize,
    ) -> Result<(), DeviceError> {
        self.device.bind_buffer_memory(self.id, memory.id(), offset)
    }
}

impl Drop for Buffer {
    #[inline]
    fn drop(&mut self) {
        self.device.destroy_buffer(self.id);
    }
}

/// A 2D image object.
#[derive(Debug)]
pub struct Image {
    device: Arc<dyn Device>,
    id: Id<Image>,
    extent: [u32; 2],
}

impl Image {
    pub fn new(
        device: Arc<dyn Device>,
        create_info: &ImageCreateInfo,
    ) -> Result<Self, DeviceError> {
        let id = device.create_image(create_info)?;

        Ok(Image {
            device,
            id,
            extent: create_info.extent,
        })
    }

    #[inline]
    pub fn id(&self) -> Id<Image> {
        self.id
    }

    #[inline]
    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }

    #[inline]
    pub fn memory_requirements(&self) -> Result<MemoryRequirements, DeviceError> {
        self.device.image_memory_requirements(self.id)
    }

    #[inline]
    pub fn bind_memory(
        &self,
        memory: &DeviceMemory,
        offset: DeviceSize,
    ) -> Result<(), DeviceError> {
        self.device.bind_image_memory(self.id, memory.id(), offset)
    }
}

impl Drop for Image {
    #[inline]
    fn drop(&mut self) {
        self.device.destroy_image(self.id);
    }
}

/// A point-list graphics pipeline.
#[derive(Debug)]
pub struct Pipeline {
    device: Arc<dyn Device>,
    id: Id<Pipeline>,
    program: PointProgram,
}

impl Pipeline {
    pub fn new(
        device: Arc<dyn Device>,
        create_info: &PointPipelineCreateInfo,
    ) -> Result<Self, DeviceError> {
        let id = device.create_graphics_pipeline(create_info)?;

        Ok(Pipeline {
            device,
            id,
            program: create_info.program,
        })
    }

    #[inline]
    pub fn id(&self) -> Id<Pipeline> {
        self.id
    }

    #[inline]
    pub fn program(&self) -> PointProgram {
        self.program
    }
}

impl Drop for Pipeline {
    #[inline]
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.id);
    }
}

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("memory_types", &self.memory_types())
            .field("queue_flags", &self.queue_flags())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferMemoryBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub buffer: Id<Buffer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageMemoryBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: Id<Image>,
}

/// The parameters of a pipeline barrier command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyInfo {
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub memory_barriers: SmallVec<[MemoryBarrier; 1]>,
    pub buffer_barriers: SmallVec<[BufferMemoryBarrier; 1]>,
    pub image_barriers: SmallVec<[ImageMemoryBarrier; 1]>,
}

/// A command recorded into a [`CommandBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    PipelineBarrier(DependencyInfo),
    FillBuffer {
        buffer: Id<Buffer>,
        offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    },
    UpdateBuffer {
        buffer: Id<Buffer>,
        offset: DeviceSize,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: Id<Buffer>,
        dst: Id<Buffer>,
        size: DeviceSize,
    },
    CopyBufferToImage {
        src: Id<Buffer>,
        dst: Id<Image>,
        dst_layout: vk::ImageLayout,
        extent: [u32; 2],
    },
    CopyImageToBuffer {
        src: Id<Image>,
        src_layout: vk::ImageLayout,
        dst: Id<Buffer>,
        extent: [u32; 2],
    },
    CopyImage {
        src: Id<Image>,
        src_layout: vk::ImageLayout,
        dst: Id<Image>,
        dst_layout: vk::ImageLayout,
        extent: [u32; 2],
    },
    BlitImage {
        src: Id<Image>,
        src_layout: vk::ImageLayout,
        src_extent: [u32; 2],
        dst: Id<Image>,
        dst_layout: vk::ImageLayout,
        dst_extent: [u32; 2],
        filter: vk::Filter,
    },
    BeginRenderPass {
        target: Id<Image>,
        extent: [u32; 2],
        clear_value: [f32; 4],
    },
    BindPipeline(Id<Pipeline>),
    BindVertexBuffer(Id<Buffer>),
    BindIndexBuffer {
        buffer: Id<Buffer>,
        index_type: vk::IndexType,
    },
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
    },
    EndRenderPass,
}

/// A command buffer that has finished recording.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandBuffer {
    commands: Vec<DeviceCommand>,
}

impl CommandBuffer {
    #[inline]
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A command buffer in the recording state.
#[derive(Debug, Default)]
pub struct RecordingCommandBuffer {
    commands: Vec<DeviceCommand>,
}

impl RecordingCommandBuffer {
    #[inline]
    pub fn new() -> Self {
        RecordingCommandBuffer::default()
    }

    /// Finishes recording.
    #[inline]
    pub fn end(self) -> CommandBuffer {
        CommandBuffer {
            commands: self.commands,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// # Commands to synchronize resource accesses
impl RecordingCommandBuffer {
    pub fn pipeline_barrier(&mut self, dependency_info: DependencyInfo) -> &mut Self {
        self.commands
            .push(DeviceCommand::PipelineBarrier(dependency_info));

        self
    }

    /// Records a barrier with a single global memory barrier.
    pub fn memory_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stages: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) -> &mut Self {
        self.pipeline_barrier(DependencyInfo {
            src_stages,
            dst_stages,
            memory_barriers: [MemoryBarrier {
                src_access,
                dst_access,
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        })
    }

    /// Records a barrier with a single buffer memory barrier.
    pub fn buffer_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        barrier: BufferMemoryBarrier,
    ) -> &mut Self {
        self.pipeline_barrier(DependencyInfo {
            src_stages,
            dst_stages,
            buffer_barriers: [barrier].into_iter().collect(),
            ..Default::default()
        })
    }

    /// Records a barrier with a single image memory barrier.
    pub fn image_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        barrier: ImageMemoryBarrier,
    ) -> &mut Self {
        self.pipeline_barrier(DependencyInfo {
            src_stages,
            dst_stages,
            image_barriers: [barrier].into_iter().collect(),
            ..Default::default()
        })
    }
}

/// # Commands to transfer data
impl RecordingCommandBuffer {
    /// Fills `size` bytes starting at `offset` with repeated copies of `data`.
    pub fn fill_buffer(
        &mut self,
        buffer: Id<Buffer>,
        offset: DeviceSize,
        size: DeviceSize,
        data: u32,
    ) -> &mut Self {
        self.commands.push(DeviceCommand::FillBuffer {
            buffer,
            offset,
            size,
            data,
        });

        self
    }

    pub fn update_buffer(
        &mut self,
        buffer: Id<Buffer>,
        offset: DeviceSize,
        data: &[u8],
    ) -> &mut Self {
        self.commands.push(DeviceCommand::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });

        self
    }

    pub fn copy_buffer(&mut self, src: Id<Buffer>, dst: Id<Buffer>, size: DeviceSize) -> &mut Self {
        self.commands
            .push(DeviceCommand::CopyBuffer { src, dst, size });

        self
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: Id<Buffer>,
        dst: Id<Image>,
        dst_layout: vk::ImageLayout,
        extent: [u32; 2],
    ) -> &mut Self {
        self.commands.push(DeviceCommand::CopyBufferToImage {
            src,
            dst,
            dst_layout,
            extent,
        });

        self
    }

    pub fn copy_image_to_buffer(
        &mut self,
        src: Id<Image>,
        src_layout: vk::ImageLayout,
        dst: Id<Buffer>,
        extent: [u32; 2],
    ) -> &mut Self {
        self.commands.push(DeviceCommand::CopyImageToBuffer {
            src,
            src_layout,
            dst,
            extent,
        });

        self
    }

    pub fn copy_image(
        &mut self,
        src: Id<Image>,
        src_layout: vk::ImageLayout,
        dst: Id<Image>,
        dst_layout: vk::ImageLayout,
        extent: [u32; 2],
    ) -> &mut Self {
        self.commands.push(DeviceCommand::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            extent,
        });

        self
    }

    /// Blits the whole of `src` onto the whole of `dst` with nearest filtering.
    pub fn blit_image(
        &mut self,
        src: Id<Image>,
        src_layout: vk::ImageLayout,
        src_extent: [u32; 2],
        dst: Id<Image>,
        dst_layout: vk::ImageLayout,
        dst_extent: [u32; 2],
    ) -> &mut Self {
        self.commands.push(DeviceCommand::BlitImage {
            src,
            src_layout,
            src_extent,
            dst,
            dst_layout,
            dst_extent,
            filter: vk::Filter::NEAREST,
        });

        self
    }
}

/// # Commands to render
impl RecordingCommandBuffer {
    /// Begins a render pass that clears `target` and leaves it in the color attachment layout.
    pub fn begin_render_pass(
        &mut self,
        target: Id<Image>,
        extent: [u32; 2],
        clear_value: [f32; 4],
    ) -> &mut Self {
        self.commands.push(DeviceCommand::BeginRenderPass {
            target,
            extent,
            clear_value,
        });

        self
    }

    pub fn end_render_pass(&mut self) -> &mut Self {
        self.commands.push(DeviceCommand::EndRenderPass);

        self
    }

    pub fn bind_pipeline(&mut self, pipeline: Id<Pipeline>) -> &mut Self {
        self.commands.push(DeviceCommand::BindPipeline(pipeline));

        self
    }

    pub fn bind_vertex_buffer(&mut self, buffer: Id<Buffer>) -> &mut Self {
        self.commands.push(DeviceCommand::BindVertexBuffer(buffer));

        self
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: Id<Buffer>,
        index_type: vk::IndexType,
    ) -> &mut Self {
        self.commands.push(DeviceCommand::BindIndexBuffer { buffer, index_type });

        self
    }

    pub fn draw(&mut self, vertex_count: u32) -> &mut Self {
        self.commands.push(DeviceCommand::Draw { vertex_count });

        self
    }

    pub fn draw_indexed(&mut self, index_count: u32) -> &mut Self {
        self.commands
            .push(DeviceCommand::DrawIndexed { index_count });

        self
    }
}
