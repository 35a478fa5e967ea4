// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A device implemented in software.
//!
//! [`SoftDevice`] models the parts of a Vulkan implementation that the tests observe:
//!
//! - Non-coherent memory has a host cache. Host writes stay in it until they are flushed, and
//!   host reads are served from it until it is invalidated.
//! - Submitted command buffers don't execute until the host waits for the queue or the device.
//! - Images track their layout. Transfers validate it, and transitions from the undefined
//!   layout discard the contents.
//! - Draws rasterize one-pixel points with the same math as the point pipelines' shaders.

use super::{
    Buffer, BufferCreateInfo, CommandBuffer, DependencyInfo, Device, DeviceCommand, DeviceError,
    DeviceMemory, DeviceSize, Id, Image, ImageCreateInfo, MemoryHeap, MemoryRequirements,
    MemoryType, Pipeline, PointPipelineCreateInfo, PointProgram, IMAGE_FORMAT,
    MAX_IMAGE_DIMENSION,
};
use ash::vk;
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{fmt, ops::Range};

const BUFFER_ALIGNMENT: DeviceSize = 64;
const IMAGE_ALIGNMENT: DeviceSize = 256;
const MAX_UPDATE_SIZE: usize = 65536;

/// Misbehavior that a [`SoftDevice`] can be configured with, to check that the tests notice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Defects {
    /// Fill commands complete without writing anything.
    pub ignore_fill_buffer: bool,
    /// Invalidating mapped memory leaves stale bytes in the host cache.
    pub ignore_invalidate: bool,
    /// Pipeline barriers don't write back device writes to buffers. The writes stay in a
    /// device cache until the command buffer finishes executing, so later commands of the same
    /// command buffer read stale data.
    ///
    /// Without this defect, device writes land immediately and commands execute in order, so
    /// a missing barrier between two device commands goes unnoticed.
    pub ignore_barriers: bool,
}

/// Parameters to create a [`SoftDevice`].
#[derive(Clone, Debug)]
pub struct SoftDeviceCreateInfo {
    /// The memory types, in the order they are reported.
    ///
    /// The default value is a device-local type, a host-coherent type and a host-cached type
    /// that is not coherent.
    pub memory_types: Vec<MemoryType>,

    /// The default value is a 256 MiB device-local heap followed by a 256 MiB host heap.
    pub memory_heaps: Vec<MemoryHeap>,

    /// The default value is `GRAPHICS | COMPUTE | TRANSFER`.
    pub queue_flags: vk::QueueFlags,

    /// The default value is no defects.
    pub defects: Defects,
}

impl Default for SoftDeviceCreateInfo {
    fn default() -> Self {
        SoftDeviceCreateInfo {
            memory_types: vec![
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
                MemoryType {
                    property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_CACHED,
                    heap_index: 1,
                },
            ],
            memory_heaps: vec![
                MemoryHeap {
                    size: 256 << 20,
                    flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
                },
                MemoryHeap {
                    size: 256 << 20,
                    flags: vk::MemoryHeapFlags::empty(),
                },
            ],
            queue_flags: vk::QueueFlags::GRAPHICS
                | vk::QueueFlags::COMPUTE
                | vk::QueueFlags::TRANSFER,
            defects: Defects::default(),
        }
    }
}

/// A [`Device`] implemented in software.
pub struct SoftDevice {
    memory_types: Vec<MemoryType>,
    memory_heaps: Vec<MemoryHeap>,
    queue_flags: vk::QueueFlags,
    defects: Defects,
    state: Mutex<SoftState>,
}

#[derive(Default)]
struct SoftState {
    next_id: u64,
    memories: HashMap<u64, MemoryObject>,
    buffers: HashMap<u64, BufferObject>,
    images: HashMap<u64, ImageObject>,
    pipelines: HashMap<u64, PointProgram>,
    pending: Vec<CommandBuffer>,
    /// Buffer writes of the executing command buffer that no barrier has written back.
    deferred_writes: Option<Vec<DeferredWrite>>,
}

struct DeferredWrite {
    memory: u64,
    start: usize,
    data: Vec<u8>,
}

struct MemoryObject {
    memory_type_index: u32,
    data: Vec<u8>,
    mapped: bool,
    host_cache: Option<HostCache>,
}

/// The host's view of non-coherent memory.
struct HostCache {
    data: Vec<u8>,
    cached: Vec<bool>,
    dirty: Vec<bool>,
}

#[derive(Clone, Copy)]
struct Binding {
    memory: u64,
    offset: usize,
}

struct BufferObject {
    size: DeviceSize,
    usage: vk::BufferUsageFlags,
    binding: Option<Binding>,
}

struct ImageObject {
    extent: [u32; 2],
    usage: vk::ImageUsageFlags,
    binding: Option<Binding>,
    layout: vk::ImageLayout,
    pixels: Vec<[u8; 4]>,
}

/// State that commands of one command buffer share.
#[derive(Default)]
struct Bindings {
    render_target: Option<Id<Image>>,
    program: Option<PointProgram>,
    vertex_buffer: Option<Id<Buffer>>,
    index_buffer: Option<Id<Buffer>>,
}

impl SoftDevice {
    pub fn new(create_info: SoftDeviceCreateInfo) -> Self {
        let SoftDeviceCreateInfo {
            memory_types,
            memory_heaps,
            queue_flags,
            defects,
        } = create_info;

        SoftDevice {
            memory_types,
            memory_heaps,
            queue_flags,
            defects,
            state: Mutex::new(SoftState::default()),
        }
    }

    #[inline]
    pub fn defects(&self) -> Defects {
        self.defects
    }

    /// Returns the number of command buffers submitted but not yet executed.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the number of live memory, buffer, image and pipeline objects.
    pub fn object_count(&self) -> usize {
        let state = self.state.lock();

        state.memories.len() + state.buffers.len() + state.images.len() + state.pipelines.len()
    }

    fn all_memory_type_bits(&self) -> u32 {
        match self.memory_types.len() {
            32.. => u32::MAX,
            len => (1 << len) - 1,
        }
    }

    fn execute_pending(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);

        for (i, command_buffer) in pending.iter().enumerate() {
            tracing::trace!(
                submission = i,
                commands = command_buffer.commands().len(),
                "executing command buffer"
            );

            state
                .execute(command_buffer, self.defects)
                .inspect_err(|err| tracing::trace!(submission = i, %err, "execution failed"))?;
        }

        Ok(())
    }
}

impl fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftDevice")
            .field("memory_types", &self.memory_types)
            .field("memory_heaps", &self.memory_heaps)
            .field("queue_flags", &self.queue_flags)
            .field("defects", &self.defects)
            .finish_non_exhaustive()
    }
}

impl Device for SoftDevice {
    fn memory_types(&self) -> &[MemoryType] {
        &self.memory_types
    }

    fn memory_heaps(&self) -> &[MemoryHeap] {
        &self.memory_heaps
    }

    fn queue_flags(&self) -> vk::QueueFlags {
        self.queue_flags
    }

    fn allocate_memory(
        &self,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<Id<DeviceMemory>, DeviceError> {
        let memory_type = self
            .memory_types
            .get(memory_type_index as usize)
            .ok_or(DeviceError::InvalidHandle)?;
        let heap = self
            .memory_heaps
            .get(memory_type.heap_index as usize)
            .ok_or(DeviceError::InvalidHandle)?;

        if size == 0 {
            return Err(DeviceError::OutOfBounds);
        }

        if size > heap.size {
            return Err(DeviceError::OutOfDeviceMemory);
        }

        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfHostMemory)?;
        let host_cache = (memory_type
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
            && !memory_type
                .property_flags
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT))
        .then(|| HostCache {
            data: vec![0; len],
            cached: vec![false; len],
            dirty: vec![false; len],
        });

        let mut state = self.state.lock();
        let id = state.next_id();
        state.memories.insert(
            id,
            MemoryObject {
                memory_type_index,
                data: vec![0; len],
                mapped: false,
                host_cache,
            },
        );

        Ok(Id::from_raw(id))
    }

    fn free_memory(&self, memory: Id<DeviceMemory>) {
        self.state.lock().memories.remove(&memory.as_raw());
    }

    fn map_memory(&self, memory: Id<DeviceMemory>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let object = state.memory_mut(memory.as_raw())?;
        let property_flags = self.memory_types[object.memory_type_index as usize].property_flags;

        if !property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) || object.mapped {
            return Err(DeviceError::MemoryMapFailed);
        }

        object.mapped = true;

        Ok(())
    }

    fn unmap_memory(&self, memory: Id<DeviceMemory>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let object = state.memory_mut(memory.as_raw())?;

        if !object.mapped {
            return Err(DeviceError::NotMapped);
        }

        object.mapped = false;

        Ok(())
    }

    fn flush_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let object = state.memory_mut(memory.as_raw())?;
        let range = object.mapped_range(offset, size)?;

        if let Some(cache) = &mut object.host_cache {
            for pos in range {
                if cache.dirty[pos] {
                    object.data[pos] = cache.data[pos];
                    cache.dirty[pos] = false;
                }
            }
        }

        Ok(())
    }

    fn invalidate_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let object = state.memory_mut(memory.as_raw())?;
        let range = object.mapped_range(offset, size)?;

        if self.defects.ignore_invalidate {
            return Ok(());
        }

        if let Some(cache) = &mut object.host_cache {
            cache.cached[range.clone()].fill(false);
            cache.dirty[range].fill(false);
        }

        Ok(())
    }

    fn read_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        data: &mut [u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let object = state.memory_mut(memory.as_raw())?;
        let range = object.host_range(offset, data.len())?;

        match &mut object.host_cache {
            None => data.copy_from_slice(&object.data[range]),
            Some(cache) => {
                for (out, pos) in data.iter_mut().zip(range) {
                    if !cache.cached[pos] {
                        cache.data[pos] = object.data[pos];
                        cache.cached[pos] = true;
                    }

                    *out = cache.data[pos];
                }
            }
        }

        Ok(())
    }

    fn write_mapped_memory(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let object = state.memory_mut(memory.as_raw())?;
        let range = object.host_range(offset, data.len())?;

        match &mut object.host_cache {
            None => object.data[range].copy_from_slice(data),
            Some(cache) => {
                cache.data[range.clone()].copy_from_slice(data);
                cache.cached[range.clone()].fill(true);
                cache.dirty[range].fill(true);
            }
        }

        Ok(())
    }

    fn create_buffer(&self, create_info: &BufferCreateInfo) -> Result<Id<Buffer>, DeviceError> {
        if create_info.size == 0 {
            return Err(DeviceError::OutOfBounds);
        }

        let mut state = self.state.lock();
        let id = state.next_id();
        state.buffers.insert(
            id,
            BufferObject {
                size: create_info.size,
                usage: create_info.usage,
                binding: None,
            },
        );

        Ok(Id::from_raw(id))
    }

    fn destroy_buffer(&self, buffer: Id<Buffer>) {
        self.state.lock().buffers.remove(&buffer.as_raw());
    }

    fn buffer_memory_requirements(
        &self,
        buffer: Id<Buffer>,
    ) -> Result<MemoryRequirements, DeviceError> {
        let state = self.state.lock();
        let object = state
            .buffers
            .get(&buffer.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;

        Ok(MemoryRequirements {
            size: object.size.next_multiple_of(BUFFER_ALIGNMENT),
            alignment: BUFFER_ALIGNMENT,
            memory_type_bits: self.all_memory_type_bits(),
        })
    }

    fn bind_buffer_memory(
        &self,
        buffer: Id<Buffer>,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
    ) -> Result<(), DeviceError> {
        let requirements = self.buffer_memory_requirements(buffer)?;
        let mut state = self.state.lock();
        let binding = state.check_binding(memory, offset, &requirements)?;
        let object = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;

        if object.binding.is_some() {
            return Err(DeviceError::InvalidHandle);
        }

        object.binding = Some(binding);

        Ok(())
    }

    fn create_image(&self, create_info: &ImageCreateInfo) -> Result<Id<Image>, DeviceError> {
        let [width, height] = create_info.extent;

        if create_info.format != IMAGE_FORMAT
            || !(1..=MAX_IMAGE_DIMENSION).contains(&width)
            || !(1..=MAX_IMAGE_DIMENSION).contains(&height)
        {
            return Err(DeviceError::FormatNotSupported);
        }

        let mut state = self.state.lock();
        let id = state.next_id();
        state.images.insert(
            id,
            ImageObject {
                extent: create_info.extent,
                usage: create_info.usage,
                binding: None,
                layout: vk::ImageLayout::UNDEFINED,
                pixels: Vec::new(),
            },
        );

        Ok(Id::from_raw(id))
    }

    fn destroy_image(&self, image: Id<Image>) {
        self.state.lock().images.remove(&image.as_raw());
    }

    fn image_memory_requirements(
        &self,
        image: Id<Image>,
    ) -> Result<MemoryRequirements, DeviceError> {
        let state = self.state.lock();
        let object = state
            .images
            .get(&image.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;
        let [width, height] = object.extent;

        Ok(MemoryRequirements {
            size: (u64::from(width) * u64::from(height) * 4).next_multiple_of(IMAGE_ALIGNMENT),
            alignment: IMAGE_ALIGNMENT,
            memory_type_bits: self.all_memory_type_bits(),
        })
    }

    fn bind_image_memory(
        &self,
        image: Id<Image>,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
    ) -> Result<(), DeviceError> {
        let requirements = self.image_memory_requirements(image)?;
        let mut state = self.state.lock();
        let binding = state.check_binding(memory, offset, &requirements)?;
        let object = state
            .images
            .get_mut(&image.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;

        if object.binding.is_some() {
            return Err(DeviceError::InvalidHandle);
        }

        let [width, height] = object.extent;
        object.binding = Some(binding);
        object.pixels = vec![[0; 4]; width as usize * height as usize];
        object.scramble();

        Ok(())
    }

    fn create_graphics_pipeline(
        &self,
        create_info: &PointPipelineCreateInfo,
    ) -> Result<Id<Pipeline>, DeviceError> {
        if !self.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return Err(DeviceError::UnsupportedUsage);
        }

        let mut state = self.state.lock();
        let id = state.next_id();
        state.pipelines.insert(id, create_info.program);

        Ok(Id::from_raw(id))
    }

    fn destroy_pipeline(&self, pipeline: Id<Pipeline>) {
        self.state.lock().pipelines.remove(&pipeline.as_raw());
    }

    fn queue_submit(&self, command_buffer: &CommandBuffer) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        tracing::trace!(
            commands = command_buffer.commands().len(),
            pending = state.pending.len(),
            "command buffer submitted"
        );
        state.pending.push(command_buffer.clone());

        Ok(())
    }

    fn queue_wait_idle(&self) -> Result<(), DeviceError> {
        self.execute_pending()
    }

    fn device_wait_idle(&self) -> Result<(), DeviceError> {
        self.execute_pending()
    }
}

impl SoftState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;

        self.next_id
    }

    fn memory_mut(&mut self, memory: u64) -> Result<&mut MemoryObject, DeviceError> {
        self.memories
            .get_mut(&memory)
            .ok_or(DeviceError::InvalidHandle)
    }

    fn check_binding(
        &self,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
        requirements: &MemoryRequirements,
    ) -> Result<Binding, DeviceError> {
        let object = self
            .memories
            .get(&memory.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;

        if !requirements.allows_memory_type(object.memory_type_index) {
            return Err(DeviceError::UnsupportedUsage);
        }

        if offset % requirements.alignment != 0
            || offset.saturating_add(requirements.size) > object.data.len() as DeviceSize
        {
            return Err(DeviceError::OutOfBounds);
        }

        Ok(Binding {
            memory: memory.as_raw(),
            offset: offset as usize,
        })
    }

    /// Returns the memory and the byte range within it that a buffer access touches.
    fn buffer_range(
        &self,
        buffer: Id<Buffer>,
        usage: vk::BufferUsageFlags,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<(u64, Range<usize>), DeviceError> {
        let object = self
            .buffers
            .get(&buffer.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;
        let binding = object.binding.ok_or(DeviceError::InvalidHandle)?;

        if !object.usage.contains(usage) {
            return Err(DeviceError::UnsupportedUsage);
        }

        if offset.saturating_add(size) > object.size {
            return Err(DeviceError::OutOfBounds);
        }

        if !self.memories.contains_key(&binding.memory) {
            return Err(DeviceError::InvalidHandle);
        }

        let start = binding.offset + offset as usize;

        Ok((binding.memory, start..start + size as usize))
    }

    fn read_buffer(
        &self,
        buffer: Id<Buffer>,
        usage: vk::BufferUsageFlags,
        size: DeviceSize,
    ) -> Result<Vec<u8>, DeviceError> {
        let (memory, range) = self.buffer_range(buffer, usage, 0, size)?;

        Ok(self.memories[&memory].data[range].to_vec())
    }

    fn write_buffer(
        &mut self,
        buffer: Id<Buffer>,
        usage: vk::BufferUsageFlags,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let (memory, range) = self.buffer_range(buffer, usage, offset, data.len() as DeviceSize)?;

        if let Some(writes) = &mut self.deferred_writes {
            writes.push(DeferredWrite {
                memory,
                start: range.start,
                data: data.to_vec(),
            });

            return Ok(());
        }

        self.memory_mut(memory)?.data[range].copy_from_slice(data);

        Ok(())
    }

    fn image_mut(&mut self, image: Id<Image>) -> Result<&mut ImageObject, DeviceError> {
        let object = self
            .images
            .get_mut(&image.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;
        let binding = object.binding.ok_or(DeviceError::InvalidHandle)?;

        if !self.memories.contains_key(&binding.memory) {
            return Err(DeviceError::InvalidHandle);
        }

        Ok(object)
    }

    /// Returns an image used by a transfer command, after checking that it is in `layout`, and
    /// that `layout` is either the general layout or `optimal_layout`.
    fn transfer_image(
        &mut self,
        image: Id<Image>,
        layout: vk::ImageLayout,
        optimal_layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
    ) -> Result<&mut ImageObject, DeviceError> {
        let object = self.image_mut(image)?;

        if !object.usage.contains(usage) {
            return Err(DeviceError::UnsupportedUsage);
        }

        if layout != vk::ImageLayout::GENERAL && layout != optimal_layout {
            return Err(DeviceError::LayoutMismatch {
                expected: optimal_layout,
                actual: layout,
            });
        }

        if object.layout != layout {
            return Err(DeviceError::LayoutMismatch {
                expected: layout,
                actual: object.layout,
            });
        }

        Ok(object)
    }

    fn execute(
        &mut self,
        command_buffer: &CommandBuffer,
        defects: Defects,
    ) -> Result<(), DeviceError> {
        let mut bindings = Bindings::default();

        if defects.ignore_barriers {
            self.deferred_writes = Some(Vec::new());
        }

        let result = command_buffer
            .commands()
            .iter()
            .try_for_each(|command| self.execute_command(command, &mut bindings, defects));

        for write in self.deferred_writes.take().into_iter().flatten() {
            if let Some(memory) = self.memories.get_mut(&write.memory) {
                memory.data[write.start..write.start + write.data.len()]
                    .copy_from_slice(&write.data);
            }
        }

        result
    }

    fn execute_command(
        &mut self,
        command: &DeviceCommand,
        bindings: &mut Bindings,
        defects: Defects,
    ) -> Result<(), DeviceError> {
        match command {
            DeviceCommand::PipelineBarrier(dependency_info) => {
                self.pipeline_barrier(dependency_info)
            }
            &DeviceCommand::FillBuffer {
                buffer,
                offset,
                size,
                data,
            } => {
                if size % 4 != 0 {
                    return Err(DeviceError::OutOfBounds);
                }

                if defects.ignore_fill_buffer {
                    return Ok(());
                }

                let bytes: Vec<u8> = data
                    .to_le_bytes()
                    .into_iter()
                    .cycle()
                    .take(size as usize)
                    .collect();

                self.write_buffer(buffer, vk::BufferUsageFlags::TRANSFER_DST, offset, &bytes)
            }
            DeviceCommand::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                if data.len() > MAX_UPDATE_SIZE || data.len() % 4 != 0 {
                    return Err(DeviceError::OutOfBounds);
                }

                self.write_buffer(*buffer, vk::BufferUsageFlags::TRANSFER_DST, *offset, data)
            }
            &DeviceCommand::CopyBuffer { src, dst, size } => {
                let data = self.read_buffer(src, vk::BufferUsageFlags::TRANSFER_SRC, size)?;

                self.write_buffer(dst, vk::BufferUsageFlags::TRANSFER_DST, 0, &data)
            }
            &DeviceCommand::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                extent,
            } => {
                let data =
                    self.read_buffer(src, vk::BufferUsageFlags::TRANSFER_SRC, texel_bytes(extent))?;
                let image = self.transfer_image(
                    dst,
                    dst_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageUsageFlags::TRANSFER_DST,
                )?;

                image.write_region(extent, bytemuck::cast_slice(&data))
            }
            &DeviceCommand::CopyImageToBuffer {
                src,
                src_layout,
                dst,
                extent,
            } => {
                let image = self.transfer_image(
                    src,
                    src_layout,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageUsageFlags::TRANSFER_SRC,
                )?;
                let pixels = image.read_region(extent)?;

                self.write_buffer(
                    dst,
                    vk::BufferUsageFlags::TRANSFER_DST,
                    0,
                    bytemuck::cast_slice(&pixels),
                )
            }
            &DeviceCommand::CopyImage {
                src,
                src_layout,
                dst,
                dst_layout,
                extent,
            } => {
                let pixels = self
                    .transfer_image(
                        src,
                        src_layout,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageUsageFlags::TRANSFER_SRC,
                    )?
                    .read_region(extent)?;

                self.transfer_image(
                    dst,
                    dst_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageUsageFlags::TRANSFER_DST,
                )?
                .write_region(extent, &pixels)
            }
            &DeviceCommand::BlitImage {
                src,
                src_layout,
                src_extent,
                dst,
                dst_layout,
                dst_extent,
                filter,
            } => {
                if filter != vk::Filter::NEAREST {
                    return Err(DeviceError::FormatNotSupported);
                }

                let src_pixels = self
                    .transfer_image(
                        src,
                        src_layout,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageUsageFlags::TRANSFER_SRC,
                    )?
                    .read_region(src_extent)?;
                let dst_pixels = blit_nearest(&src_pixels, src_extent, dst_extent);

                self.transfer_image(
                    dst,
                    dst_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageUsageFlags::TRANSFER_DST,
                )?
                .write_region(dst_extent, &dst_pixels)
            }
            &DeviceCommand::BeginRenderPass {
                target,
                extent,
                clear_value,
            } => {
                if bindings.render_target.is_some() {
                    return Err(DeviceError::InvalidHandle);
                }

                let image = self.image_mut(target)?;

                if !image
                    .usage
                    .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                {
                    return Err(DeviceError::UnsupportedUsage);
                }

                if image.extent != extent {
                    return Err(DeviceError::OutOfBounds);
                }

                let color = clear_value.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                image.pixels.fill(color);
                image.layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
                bindings.render_target = Some(target);

                Ok(())
            }
            DeviceCommand::EndRenderPass => match bindings.render_target.take() {
                Some(_) => Ok(()),
                None => Err(DeviceError::InvalidHandle),
            },
            &DeviceCommand::BindPipeline(pipeline) => {
                let program = self
                    .pipelines
                    .get(&pipeline.as_raw())
                    .ok_or(DeviceError::InvalidHandle)?;
                bindings.program = Some(*program);

                Ok(())
            }
            &DeviceCommand::BindVertexBuffer(buffer) => {
                self.buffer_range(buffer, vk::BufferUsageFlags::VERTEX_BUFFER, 0, 0)?;
                bindings.vertex_buffer = Some(buffer);

                Ok(())
            }
            &DeviceCommand::BindIndexBuffer { buffer, index_type } => {
                if index_type != vk::IndexType::UINT16 {
                    return Err(DeviceError::FormatNotSupported);
                }

                self.buffer_range(buffer, vk::BufferUsageFlags::INDEX_BUFFER, 0, 0)?;
                bindings.index_buffer = Some(buffer);

                Ok(())
            }
            &DeviceCommand::Draw { vertex_count } => {
                if bindings.program != Some(PointProgram::VertexBuffer) {
                    return Err(DeviceError::UnsupportedUsage);
                }

                let buffer = bindings.vertex_buffer.ok_or(DeviceError::InvalidHandle)?;
                let data = self.read_buffer(
                    buffer,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    2 * DeviceSize::from(vertex_count),
                )?;
                let points = data.chunks_exact(2).map(|position| {
                    [
                        f32::from(position[0]) / 255.0,
                        f32::from(position[1]) / 255.0,
                    ]
                });

                self.draw_points(bindings, points)
            }
            &DeviceCommand::DrawIndexed { index_count } => {
                if bindings.program != Some(PointProgram::IndexBuffer) {
                    return Err(DeviceError::UnsupportedUsage);
                }

                let buffer = bindings.index_buffer.ok_or(DeviceError::InvalidHandle)?;
                let data = self.read_buffer(
                    buffer,
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    2 * DeviceSize::from(index_count),
                )?;
                let points = data.chunks_exact(2).map(|index| {
                    let index = u16::from_le_bytes([index[0], index[1]]);

                    [
                        f32::from(index % 256) / 255.0,
                        f32::from(index / 256) / 255.0,
                    ]
                });

                self.draw_points(bindings, points)
            }
        }
    }

    fn pipeline_barrier(&mut self, dependency_info: &DependencyInfo) -> Result<(), DeviceError> {
        for barrier in &dependency_info.buffer_barriers {
            if !self.buffers.contains_key(&barrier.buffer.as_raw()) {
                return Err(DeviceError::InvalidHandle);
            }
        }

        for barrier in &dependency_info.image_barriers {
            let image = self.image_mut(barrier.image)?;

            if barrier.old_layout != vk::ImageLayout::UNDEFINED
                && barrier.old_layout != image.layout
            {
                return Err(DeviceError::LayoutMismatch {
                    expected: barrier.old_layout,
                    actual: image.layout,
                });
            }

            if barrier.old_layout != barrier.new_layout {
                if barrier.old_layout == vk::ImageLayout::UNDEFINED {
                    image.scramble();
                }

                image.layout = barrier.new_layout;
            }
        }

        Ok(())
    }

    fn draw_points(
        &mut self,
        bindings: &Bindings,
        points: impl Iterator<Item = [f32; 2]>,
    ) -> Result<(), DeviceError> {
        let target = bindings.render_target.ok_or(DeviceError::InvalidHandle)?;
        let image = self.image_mut(target)?;
        let [width, height] = image.extent;

        for [x, y] in points {
            let x = rasterize(x, width);
            let y = rasterize(y, height);

            if let (Some(x), Some(y)) = (x, y) {
                image.pixels[(y * width + x) as usize] = [255; 4];
            }
        }

        Ok(())
    }
}

impl MemoryObject {
    /// Returns the range of a host access through the mapping.
    fn host_range(&self, offset: DeviceSize, len: usize) -> Result<Range<usize>, DeviceError> {
        if !self.mapped {
            return Err(DeviceError::NotMapped);
        }

        let start = usize::try_from(offset).map_err(|_| DeviceError::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(DeviceError::OutOfBounds)?;

        if end > self.data.len() {
            return Err(DeviceError::OutOfBounds);
        }

        Ok(start..end)
    }

    /// Returns the range of a flush or invalidate, clamped to the end of the memory.
    fn mapped_range(
        &self,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<Range<usize>, DeviceError> {
        if !self.mapped {
            return Err(DeviceError::NotMapped);
        }

        let len = self.data.len() as DeviceSize;
        let start = offset.min(len);
        let end = offset.saturating_add(size).min(len);

        Ok(start as usize..end as usize)
    }
}

impl ImageObject {
    /// Replaces the contents with garbage.
    fn scramble(&mut self) {
        for (i, pixel) in self.pixels.iter_mut().enumerate() {
            *pixel = (i as u32).wrapping_mul(0x9e37_79b1).to_le_bytes();
        }
    }

    fn check_region(&self, extent: [u32; 2]) -> Result<(), DeviceError> {
        if extent[0] > self.extent[0] || extent[1] > self.extent[1] {
            Err(DeviceError::OutOfBounds)
        } else {
            Ok(())
        }
    }

    fn read_region(&self, extent: [u32; 2]) -> Result<Vec<[u8; 4]>, DeviceError> {
        self.check_region(extent)?;

        let stride = self.extent[0] as usize;
        let [width, height] = extent.map(|x| x as usize);

        Ok((0..height)
            .flat_map(|y| &self.pixels[y * stride..y * stride + width])
            .copied()
            .collect())
    }

    fn write_region(&mut self, extent: [u32; 2], pixels: &[[u8; 4]]) -> Result<(), DeviceError> {
        self.check_region(extent)?;

        let stride = self.extent[0] as usize;
        let [width, height] = extent.map(|x| x as usize);

        if pixels.len() != width * height {
            return Err(DeviceError::OutOfBounds);
        }

        for (y, row) in pixels.chunks_exact(width.max(1)).take(height).enumerate() {
            self.pixels[y * stride..y * stride + width].copy_from_slice(row);
        }

        Ok(())
    }
}

fn texel_bytes(extent: [u32; 2]) -> DeviceSize {
    u64::from(extent[0]) * u64::from(extent[1]) * 4
}

/// Samples the source at the center of every destination pixel.
fn blit_nearest(src: &[[u8; 4]], src_extent: [u32; 2], dst_extent: [u32; 2]) -> Vec<[u8; 4]> {
    let mut dst = Vec::with_capacity(dst_extent[0] as usize * dst_extent[1] as usize);

    for y in 0..dst_extent[1] {
        let src_y = pixel_center(y, src_extent[1], dst_extent[1]);

        for x in 0..dst_extent[0] {
            let src_x = pixel_center(x, src_extent[0], dst_extent[0]);
            dst.push(src[(src_y * src_extent[0] + src_x) as usize]);
        }
    }

    dst
}

/// Maps destination pixel `dst` to the source pixel under its center, in exact arithmetic.
fn pixel_center(dst: u32, src_len: u32, dst_len: u32) -> u32 {
    let src = (2 * u64::from(dst) + 1) * u64::from(src_len) / (2 * u64::from(dst_len));

    (src as u32).min(src_len - 1)
}

/// Runs a normalized position through the point vertex shaders and the viewport transform, and
/// returns the pixel that the point covers.
fn rasterize(position: f32, extent: u32) -> Option<u32> {
    let ndc = 1.998 * position - 0.999;
    let window = (ndc + 1.0) * 0.5 * extent as f32;

    (window >= 0.0 && window < extent as f32).then(|| window as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ImageMemoryBarrier, RecordingCommandBuffer, RENDER_TARGET_EXTENT};
    use std::sync::Arc;

    fn device_with(defects: Defects) -> Arc<SoftDevice> {
        Arc::new(SoftDevice::new(SoftDeviceCreateInfo {
            defects,
            ..Default::default()
        }))
    }

    fn bound_buffer(
        device: &Arc<SoftDevice>,
        memory: &DeviceMemory,
        usage: vk::BufferUsageFlags,
    ) -> Buffer {
        let buffer = Buffer::new(
            device.clone(),
            &BufferCreateInfo {
                size: memory.size(),
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
            },
        )
        .unwrap();
        buffer.bind_memory(memory, 0).unwrap();

        buffer
    }

    fn submit_and_wait(device: &SoftDevice, builder: RecordingCommandBuffer) {
        device.queue_submit(&builder.end()).unwrap();
        device.queue_wait_idle().unwrap();
    }

    #[test]
    fn non_coherent_writes_need_flush() {
        let device = device_with(Defects::default());
        let memory = DeviceMemory::allocate(device.clone(), 256, 2).unwrap();
        let buffer = bound_buffer(&device, &memory, vk::BufferUsageFlags::TRANSFER_SRC);
        let readback = DeviceMemory::allocate(device.clone(), 256, 1).unwrap();
        let dst = bound_buffer(&device, &readback, vk::BufferUsageFlags::TRANSFER_DST);

        memory.map().unwrap();
        memory.write(0, &[7; 256]).unwrap();

        let copy = || {
            let mut builder = RecordingCommandBuffer::new();
            builder.copy_buffer(buffer.id(), dst.id(), 256);
            submit_and_wait(&device, builder);

            let mut data = [0; 256];
            readback.map().unwrap();
            readback.read(0, &mut data).unwrap();
            readback.unmap().unwrap();

            data
        };

        assert_eq!(copy(), [0; 256]);

        memory.flush().unwrap();
        assert_eq!(copy(), [7; 256]);
    }

    #[test]
    fn device_writes_need_invalidate() {
        for ignore_invalidate in [false, true] {
            let device = device_with(Defects {
                ignore_invalidate,
                ..Default::default()
            });
            let memory = DeviceMemory::allocate(device.clone(), 64, 2).unwrap();
            let buffer = bound_buffer(&device, &memory, vk::BufferUsageFlags::TRANSFER_DST);
            let mut data = [0xff; 64];

            memory.map().unwrap();
            memory.read(0, &mut data).unwrap();
            assert_eq!(data, [0; 64]);

            let mut builder = RecordingCommandBuffer::new();
            builder.fill_buffer(buffer.id(), 0, 64, 0x04030201);
            device.queue_submit(&builder.end()).unwrap();
            assert_eq!(device.pending_submissions(), 1);
            device.device_wait_idle().unwrap();
            assert_eq!(device.pending_submissions(), 0);

            memory.read(0, &mut data).unwrap();
            assert_eq!(data, [0; 64]);

            memory.invalidate().unwrap();
            memory.read(0, &mut data).unwrap();

            if ignore_invalidate {
                assert_eq!(data, [0; 64]);
            } else {
                assert_eq!(data[..8], [1, 2, 3, 4, 1, 2, 3, 4]);
            }
        }
    }

    #[test]
    fn ignored_barriers_leave_stale_buffer_data() {
        for ignore_barriers in [false, true] {
            let device = device_with(Defects {
                ignore_barriers,
                ..Default::default()
            });
            let memory = DeviceMemory::allocate(device.clone(), 256, 1).unwrap();
            let buffer = bound_buffer(
                &device,
                &memory,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            );
            let readback = DeviceMemory::allocate(device.clone(), 256, 1).unwrap();
            let dst = bound_buffer(&device, &readback, vk::BufferUsageFlags::TRANSFER_DST);

            let mut builder = RecordingCommandBuffer::new();
            builder
                .fill_buffer(buffer.id(), 0, 256, 0x0101_0101)
                .memory_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::TRANSFER_READ,
                )
                .copy_buffer(buffer.id(), dst.id(), 256);
            submit_and_wait(&device, builder);

            let mut filled = [0; 256];
            memory.map().unwrap();
            memory.read(0, &mut filled).unwrap();
            // The fill itself is written back once the command buffer finishes.
            assert_eq!(filled, [1; 256]);

            let mut copied = [0xff; 256];
            readback.map().unwrap();
            readback.read(0, &mut copied).unwrap();

            if ignore_barriers {
                assert_eq!(copied, [0; 256]);
            } else {
                assert_eq!(copied, [1; 256]);
            }
        }
    }

    #[test]
    fn mapping_rules() {
        let device = device_with(Defects::default());
        let local = DeviceMemory::allocate(device.clone(), 64, 0).unwrap();
        assert_eq!(local.map(), Err(DeviceError::MemoryMapFailed));

        let memory = DeviceMemory::allocate(device.clone(), 64, 1).unwrap();
        assert_eq!(memory.write(0, &[1]), Err(DeviceError::NotMapped));
        memory.map().unwrap();
        assert_eq!(memory.map(), Err(DeviceError::MemoryMapFailed));
        assert_eq!(memory.write(60, &[0; 8]), Err(DeviceError::OutOfBounds));
        memory.unmap().unwrap();
        assert_eq!(memory.unmap(), Err(DeviceError::NotMapped));

        assert_eq!(
            device.allocate_memory(1 << 40, 0),
            Err(DeviceError::OutOfDeviceMemory),
        );
    }

    #[test]
    fn transfers_validate_layouts() {
        let device = device_with(Defects::default());
        let memory = DeviceMemory::allocate(device.clone(), 1024, 0).unwrap();
        let image = Image::new(
            device.clone(),
            &ImageCreateInfo::rgba8(
                [8, 8],
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )
        .unwrap();
        image.bind_memory(&memory, 0).unwrap();

        let buffer_memory = DeviceMemory::allocate(device.clone(), 256, 1).unwrap();
        let buffer = bound_buffer(&device, &buffer_memory, vk::BufferUsageFlags::TRANSFER_SRC);

        let mut builder = RecordingCommandBuffer::new();
        builder.copy_buffer_to_image(
            buffer.id(),
            image.id(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            [8, 8],
        );
        device.queue_submit(&builder.end()).unwrap();
        assert_eq!(
            device.queue_wait_idle(),
            Err(DeviceError::LayoutMismatch {
                expected: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                actual: vk::ImageLayout::UNDEFINED,
            }),
        );

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
                buffer.id(),
                image.id(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                [8, 8],
            );
        submit_and_wait(&device, builder);

        // The image doesn't have color attachment usage.
        let mut builder = RecordingCommandBuffer::new();
        builder
            .begin_render_pass(image.id(), [8, 8], [0.0; 4])
            .end_render_pass();
        device.queue_submit(&builder.end()).unwrap();
        assert_eq!(device.queue_wait_idle(), Err(DeviceError::UnsupportedUsage));
    }

    #[test]
    fn points_land_on_their_pixel() {
        for v in 0..=255u8 {
            let position = f32::from(v) / 255.0;
            assert_eq!(rasterize(position, 256), Some(u32::from(v)));
        }
    }

    #[test]
    fn vertex_draws_paint_pixels() {
        let device = device_with(Defects::default());
        let memory = DeviceMemory::allocate(device.clone(), 64, 1).unwrap();
        let vertices = bound_buffer(&device, &memory, vk::BufferUsageFlags::VERTEX_BUFFER);
        memory.map().unwrap();
        memory.write(0, &[3, 5, 255, 0]).unwrap();

        let target_memory = DeviceMemory::allocate(device.clone(), 256 * 256 * 4, 0).unwrap();
        let target = Image::new(
            device.clone(),
            &ImageCreateInfo::rgba8(
                RENDER_TARGET_EXTENT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
        )
        .unwrap();
        target.bind_memory(&target_memory, 0).unwrap();
        let pipeline = Pipeline::new(
            device.clone(),
            &PointPipelineCreateInfo {
                program: PointProgram::VertexBuffer,
            },
        )
        .unwrap();

        let mut builder = RecordingCommandBuffer::new();
        builder
            .begin_render_pass(target.id(), RENDER_TARGET_EXTENT, [0.0, 0.0, 0.0, 1.0])
            .bind_pipeline(pipeline.id())
            .bind_vertex_buffer(vertices.id())
            .draw(2)
            .end_render_pass();
        submit_and_wait(&device, builder);

        let mut state = device.state.lock();
        let image = state.image_mut(target.id()).unwrap();
        assert_eq!(image.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(image.pixels[5 * 256 + 3], [255; 4]);
        assert_eq!(image.pixels[255], [255; 4]);
        assert_eq!(image.pixels[0], [0, 0, 0, 255]);
    }

    #[test]
    fn blits_sample_pixel_centers() {
        let src = [[1; 4], [2; 4], [3; 4], [4; 4]];

        assert_eq!(
            blit_nearest(&src, [2, 2], [4, 2]),
            [[1; 4], [1; 4], [2; 4], [2; 4], [3; 4], [3; 4], [4; 4], [4; 4]],
        );
        assert_eq!(blit_nearest(&src, [2, 2], [1, 1]), [[4; 4]]);
    }

    #[test]
    fn objects_are_destroyed_on_drop() {
        let device = device_with(Defects::default());

        {
            let memory = DeviceMemory::allocate(device.clone(), 128, 0).unwrap();
            let _buffer = bound_buffer(&device, &memory, vk::BufferUsageFlags::TRANSFER_SRC);
            assert_eq!(device.object_count(), 2);
        }

        assert_eq!(device.object_count(), 0);
    }
}
