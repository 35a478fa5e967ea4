// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The operation state machine.
//!
//! [`State`] tracks where execution currently is (on the host, inside a command buffer or inside
//! a render pass), which objects exist, what the host knows about the memory and what the
//! [`CacheState`] allows. [`State::available_ops`] lists every operation that is legal next and
//! [`State::apply_op`] performs one of them.
//!
//! Random parameters of an operation are never drawn from a generator shared with other
//! operations. Every operation gets its own seed, and [`OpParams::draw`] turns it into the
//! parameters. The state machine and the command built for the operation both use the result,
//! so they can't get out of sync.

use crate::{
    cache::CacheState,
    memory::MemoryInfo,
    sync::{Access, BarrierMasks, PipelineStage},
    usage::Usage,
};
use ash::vk;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Where the generated operations are currently recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Host,
    CommandBuffer,
    RenderPass,
}

/// A single step of a generated test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Map,
    Unmap,
    Flush,
    Invalidate,
    MapRead,
    MapWrite,
    MapModify,

    CreateBuffer,
    DestroyBuffer,
    BindBufferMemory,

    CreateImage,
    DestroyImage,
    BindImageMemory,

    QueueWaitIdle,
    DeviceWaitIdle,

    CommandBufferBegin,
    CommandBufferEnd,

    PipelineBarrierGlobal,
    PipelineBarrierBuffer,
    PipelineBarrierImage,

    BufferFill,
    BufferUpdate,
    BufferCopyToBuffer,
    BufferCopyFromBuffer,
    BufferCopyToImage,
    BufferCopyFromImage,

    ImageTransitionLayout,
    ImageCopyToBuffer,
    ImageCopyFromBuffer,
    ImageCopyToImage,
    ImageCopyFromImage,
    ImageBlitToImage,
    ImageBlitFromImage,

    RenderPassBegin,
    RenderPassEnd,
    RenderVertexBuffer,
    RenderIndexBuffer,
}

/// The scale of an image blit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlitScale {
    /// Source and destination have the same extent.
    Same,
    /// The destination is twice as large as the source in both dimensions.
    Double,
}

/// Random parameters of a single operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpParams {
    None,
    /// A fill value or the seed of generated data.
    Value(u32),
    Blit {
        scale: BlitScale,
        seed: u32,
    },
    Transition {
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
        masks: BarrierMasks,
    },
    Barrier(BarrierMasks),
}

const LAYOUTS: [vk::ImageLayout; 7] = [
    vk::ImageLayout::GENERAL,
    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
];

impl OpParams {
    /// Derives the parameters of `op` from `seed`, given the state before the operation.
    pub fn draw(op: Op, seed: u64, state: &State, usage: Usage) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        match op {
            Op::MapRead
            | Op::MapWrite
            | Op::MapModify
            | Op::BufferFill
            | Op::BufferUpdate
            | Op::BufferCopyFromBuffer
            | Op::BufferCopyFromImage
            | Op::ImageCopyFromBuffer
            | Op::ImageCopyFromImage => OpParams::Value(rng.r#gen()),
            Op::ImageBlitToImage | Op::ImageBlitFromImage => {
                let scale = if rng.r#gen() {
                    BlitScale::Double
                } else {
                    BlitScale::Same
                };

                OpParams::Blit {
                    scale,
                    seed: rng.r#gen(),
                }
            }
            Op::ImageTransitionLayout => {
                let src_layout = if rng.r#gen::<f32>() < 0.9 {
                    state.image_layout
                } else {
                    vk::ImageLayout::UNDEFINED
                };
                let dst_layout = random_next_layout(&mut rng, usage, src_layout);

                let dirty = state.cache.full_barrier();
                let allowed_stages = state.cache.allowed_stages();
                let mut dst_stages =
                    allowed_stages & vk::PipelineStageFlags::from_raw(rng.r#gen());
                let dst_accesses =
                    state.cache.allowed_accesses() & vk::AccessFlags::from_raw(rng.r#gen());

                if dst_stages.is_empty() {
                    dst_stages = allowed_stages;
                }

                let src_stages = if dirty.src_stages.is_empty() {
                    dst_stages
                } else {
                    dirty.src_stages
                };

                OpParams::Transition {
                    src_layout,
                    dst_layout,
                    masks: BarrierMasks {
                        src_stages,
                        src_accesses: dirty.src_accesses,
                        dst_stages,
                        dst_accesses,
                    },
                }
            }
            Op::PipelineBarrierGlobal | Op::PipelineBarrierBuffer | Op::PipelineBarrierImage => {
                let dirty = state.cache.full_barrier();
                let mut masks = BarrierMasks {
                    src_stages: dirty.src_stages & vk::PipelineStageFlags::from_raw(rng.r#gen()),
                    src_accesses: dirty.src_accesses & vk::AccessFlags::from_raw(rng.r#gen()),
                    dst_stages: dirty.dst_stages & vk::PipelineStageFlags::from_raw(rng.r#gen()),
                    dst_accesses: dirty.dst_accesses & vk::AccessFlags::from_raw(rng.r#gen()),
                };

                if masks.src_stages.is_empty() {
                    masks.src_stages = dirty.src_stages;
                }

                if masks.dst_stages.is_empty() {
                    masks.dst_stages = dirty.dst_stages;
                }

                if masks.src_stages.is_empty() {
                    masks.src_stages = masks.dst_stages;
                }

                OpParams::Barrier(masks)
            }
            _ => OpParams::None,
        }
    }

    /// Returns the random value, or zero if the operation has none.
    #[inline]
    pub fn value(&self) -> u32 {
        match *self {
            OpParams::Value(value) => value,
            OpParams::Blit { seed, .. } => seed,
            _ => 0,
        }
    }
}

/// Chooses a layout supported by `usage` other than `previous`.
fn random_next_layout(
    rng: &mut ChaCha8Rng,
    usage: Usage,
    previous: vk::ImageLayout,
) -> vk::ImageLayout {
    let candidates = || {
        LAYOUTS
            .into_iter()
            .filter(move |&layout| usage.supports_layout(layout) && layout != previous)
    };
    let count = candidates().count() as u64;

    if count == 0 {
        // Only possible when the usage supports nothing but the general layout.
        return vk::ImageLayout::GENERAL;
    }

    let index = rng.r#gen::<u64>() % count;

    candidates()
        .nth(index as usize)
        .unwrap_or(vk::ImageLayout::GENERAL)
}

/// The state of a generated test between two operations.
#[derive(Clone, Debug)]
pub struct State {
    stage: Stage,
    cache: CacheState,

    mapped: bool,
    host_invalidated: bool,
    host_flushed: bool,
    memory_defined: bool,

    has_buffer: bool,
    has_bound_buffer_memory: bool,

    has_image: bool,
    has_bound_image_memory: bool,
    image_layout: vk::ImageLayout,
    image_defined: bool,

    queue_idle: bool,
    device_idle: bool,
    command_buffer_is_empty: bool,
}

impl State {
    /// Creates the state at the start of a test using memory as described by `usage`.
    pub fn new(usage: Usage) -> Self {
        State {
            stage: Stage::Host,
            cache: CacheState::new(usage.stage_mask(), usage.access_mask()),
            mapped: false,
            host_invalidated: true,
            host_flushed: true,
            memory_defined: false,
            has_buffer: false,
            has_bound_buffer_memory: false,
            has_image: false,
            has_bound_image_memory: false,
            image_layout: vk::ImageLayout::UNDEFINED,
            image_defined: false,
            queue_idle: true,
            device_idle: true,
            command_buffer_is_empty: true,
        }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    pub fn cache(&self) -> &CacheState {
        &self.cache
    }

    #[inline]
    pub fn image_layout(&self) -> vk::ImageLayout {
        self.image_layout
    }

    #[inline]
    pub fn has_buffer(&self) -> bool {
        self.has_buffer
    }

    #[inline]
    pub fn has_image(&self) -> bool {
        self.has_image
    }

    #[inline]
    pub fn is_queue_idle(&self) -> bool {
        self.queue_idle
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Returns every operation that may be performed next.
    pub fn available_ops(&self, usage: Usage, memory: &MemoryInfo) -> Vec<Op> {
        let mut ops = Vec::new();

        match self.stage {
            Stage::Host => self.available_host_ops(usage, memory, &mut ops),
            Stage::CommandBuffer => self.available_command_buffer_ops(usage, &mut ops),
            Stage::RenderPass => self.available_render_pass_ops(usage, &mut ops),
        }

        ops
    }

    fn available_host_ops(&self, usage: Usage, memory: &MemoryInfo, ops: &mut Vec<Op>) {
        let host_read = usage.intersects(Usage::HOST_READ);
        let host_write = usage.intersects(Usage::HOST_WRITE);
        let read_valid = || self.cache.is_valid(PipelineStage::Host, Access::HostRead);
        let write_valid = || self.cache.is_valid(PipelineStage::Host, Access::HostWrite);

        if host_read || host_write {
            if self.mapped {
                ops.push(Op::Unmap);

                if !self.host_flushed {
                    ops.push(Op::Flush);
                }

                if !self.host_invalidated
                    && self.queue_idle
                    && (!host_read || read_valid())
                    && (!host_write || write_valid())
                {
                    ops.push(Op::Invalidate);
                }

                let can_access = self.host_invalidated && self.queue_idle;

                if host_read
                    && host_write
                    && self.memory_defined
                    && can_access
                    && write_valid()
                    && read_valid()
                {
                    ops.push(Op::MapModify);
                }

                if host_read && self.memory_defined && can_access && read_valid() {
                    ops.push(Op::MapRead);
                }

                if host_write && can_access && write_valid() {
                    ops.push(Op::MapWrite);
                }
            } else {
                ops.push(Op::Map);
            }
        }

        // Objects are only destroyed once they have been bound, and a buffer and an image never
        // exist at the same time.
        if self.has_bound_buffer_memory && self.queue_idle {
            ops.push(Op::DestroyBuffer);
        } else if self.has_buffer {
            if !self.has_bound_buffer_memory {
                ops.push(Op::BindBufferMemory);
            }
        } else if !self.has_image && memory.supports_buffers() {
            ops.push(Op::CreateBuffer);
        }

        if self.has_bound_image_memory && self.queue_idle {
            ops.push(Op::DestroyImage);
        } else if self.has_image {
            if !self.has_bound_image_memory {
                ops.push(Op::BindImageMemory);
            }
        } else if !self.has_buffer && memory.supports_images() {
            ops.push(Op::CreateImage);
        }

        if self.host_flushed
            && (self.memory_defined
                || usage.supports_device_buffer_writes()
                || self.image_defined
                || usage.supports_device_image_writes())
            && (self.has_bound_buffer_memory || self.has_bound_image_memory)
            && !(usage.stage_mask() & !vk::PipelineStageFlags::HOST).is_empty()
        {
            ops.push(Op::CommandBufferBegin);
        }

        if !self.device_idle {
            ops.push(Op::DeviceWaitIdle);
        }

        if !self.queue_idle {
            ops.push(Op::QueueWaitIdle);
        }
    }

    fn available_command_buffer_ops(&self, usage: Usage, ops: &mut Vec<Op>) {
        let transfer_write_valid = || {
            usage.intersects(Usage::TRANSFER_DST)
                && self
                    .cache
                    .is_valid(PipelineStage::Transfer, Access::TransferWrite)
        };
        let transfer_read_valid = || {
            usage.intersects(Usage::TRANSFER_SRC)
                && self
                    .cache
                    .is_valid(PipelineStage::Transfer, Access::TransferRead)
        };

        if !self.cache.is_clean() {
            ops.push(Op::PipelineBarrierGlobal);

            if self.has_image {
                ops.push(Op::PipelineBarrierImage);
            }

            if self.has_buffer {
                ops.push(Op::PipelineBarrierBuffer);
            }
        }

        if self.has_bound_buffer_memory {
            if transfer_write_valid() {
                ops.extend([
                    Op::BufferFill,
                    Op::BufferUpdate,
                    Op::BufferCopyFromBuffer,
                    Op::BufferCopyFromImage,
                ]);
            }

            if self.memory_defined && transfer_read_valid() {
                ops.extend([Op::BufferCopyToBuffer, Op::BufferCopyToImage]);
            }
        }

        if self.has_bound_image_memory {
            ops.push(Op::ImageTransitionLayout);

            if matches!(
                self.image_layout,
                vk::ImageLayout::GENERAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ) && transfer_write_valid()
            {
                ops.extend([
                    Op::ImageCopyFromBuffer,
                    Op::ImageCopyFromImage,
                    Op::ImageBlitFromImage,
                ]);
            }

            if matches!(
                self.image_layout,
                vk::ImageLayout::GENERAL | vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ) && self.image_defined
                && transfer_read_valid()
            {
                ops.extend([
                    Op::ImageCopyToBuffer,
                    Op::ImageCopyToImage,
                    Op::ImageBlitToImage,
                ]);
            }
        }

        if (usage.intersects(Usage::VERTEX_BUFFER)
            && self
                .cache
                .is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead))
            || (usage.intersects(Usage::INDEX_BUFFER)
                && self
                    .cache
                    .is_valid(PipelineStage::VertexInput, Access::IndexRead))
        {
            ops.push(Op::RenderPassBegin);
        }

        // This depends on everything above and must stay last.
        if ops.is_empty() || !self.command_buffer_is_empty {
            ops.push(Op::CommandBufferEnd);
        }
    }

    fn available_render_pass_ops(&self, usage: Usage, ops: &mut Vec<Op>) {
        let can_draw = self.memory_defined && self.has_bound_buffer_memory;

        if usage.intersects(Usage::VERTEX_BUFFER)
            && can_draw
            && self
                .cache
                .is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead)
        {
            ops.push(Op::RenderVertexBuffer);
        }

        if usage.intersects(Usage::INDEX_BUFFER)
            && can_draw
            && self
                .cache
                .is_valid(PipelineStage::VertexInput, Access::IndexRead)
        {
            ops.push(Op::RenderIndexBuffer);
        }

        ops.push(Op::RenderPassEnd);
    }

    /// Performs `op`, with random parameters derived from `seed`.
    ///
    /// # Panics
    ///
    /// - Panics if `op` is not legal in the current state.
    pub fn apply_op(&mut self, usage: Usage, memory: &MemoryInfo, op: Op, seed: u64) {
        let params = OpParams::draw(op, seed, self, usage);
        self.apply_params(memory, op, &params);
    }

    /// Performs `op` with parameters that were drawn for it in the current state.
    ///
    /// # Panics
    ///
    /// - Panics if `op` is not legal in the current state.
    pub fn apply_params(&mut self, memory: &MemoryInfo, op: Op, params: &OpParams) {
        let coherent = memory.is_host_coherent();

        match op {
            Op::Map => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.mapped);
                self.mapped = true;
            }
            Op::Unmap => {
                self.assert_stage(op, Stage::Host);
                assert!(self.mapped);
                self.mapped = false;
            }
            Op::Flush => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.host_flushed);
                self.host_flushed = true;
            }
            Op::Invalidate => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.host_invalidated);
                self.host_invalidated = true;
            }
            Op::MapRead => {
                self.assert_stage(op, Stage::Host);
                assert!(self.mapped && self.host_invalidated);
            }
            Op::MapWrite => {
                self.assert_stage(op, Stage::Host);
                assert!(self.mapped);

                if !coherent {
                    self.host_flushed = false;
                }

                // The whole memory is overwritten, including any image bound to it.
                self.memory_defined = true;
                self.image_defined = false;
                self.image_layout = vk::ImageLayout::UNDEFINED;
            }
            Op::MapModify => {
                self.assert_stage(op, Stage::Host);
                assert!(self.mapped && self.host_invalidated);

                if !coherent {
                    self.host_flushed = false;
                }
            }
            Op::CreateBuffer => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.has_buffer && !self.has_image);
                self.has_buffer = true;
            }
            Op::DestroyBuffer => {
                self.assert_stage(op, Stage::Host);
                assert!(self.has_buffer && self.has_bound_buffer_memory);
                self.has_buffer = false;
                self.has_bound_buffer_memory = false;
            }
            Op::BindBufferMemory => {
                self.assert_stage(op, Stage::Host);
                assert!(self.has_buffer && !self.has_bound_buffer_memory);
                self.has_bound_buffer_memory = true;
            }
            Op::CreateImage => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.has_image && !self.has_buffer);
                self.has_image = true;
            }
            Op::DestroyImage => {
                self.assert_stage(op, Stage::Host);
                assert!(self.has_image && self.has_bound_image_memory);
                self.has_image = false;
                self.has_bound_image_memory = false;
                self.image_layout = vk::ImageLayout::UNDEFINED;
                self.image_defined = false;
            }
            Op::BindImageMemory => {
                self.assert_stage(op, Stage::Host);
                assert!(self.has_image && !self.has_bound_image_memory);
                self.has_bound_image_memory = true;
            }
            Op::QueueWaitIdle => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.queue_idle);
                self.queue_idle = true;
                self.cache.wait_for_idle();
            }
            Op::DeviceWaitIdle => {
                self.assert_stage(op, Stage::Host);
                assert!(!self.device_idle);
                self.queue_idle = true;
                self.device_idle = true;
                self.cache.wait_for_idle();
            }
            Op::CommandBufferBegin => {
                self.assert_stage(op, Stage::Host);
                self.stage = Stage::CommandBuffer;
                self.command_buffer_is_empty = true;
                self.cache.submit_command_buffer();
            }
            Op::CommandBufferEnd => {
                self.assert_stage(op, Stage::CommandBuffer);
                self.stage = Stage::Host;
                self.queue_idle = false;
                self.device_idle = false;
            }
            Op::BufferFill
            | Op::BufferUpdate
            | Op::BufferCopyFromBuffer
            | Op::BufferCopyFromImage => {
                self.assert_stage(op, Stage::CommandBuffer);
                assert!(self.has_bound_buffer_memory);

                if !coherent {
                    self.host_invalidated = false;
                }

                self.command_buffer_is_empty = false;
                self.memory_defined = true;
                self.image_defined = false;
                self.image_layout = vk::ImageLayout::UNDEFINED;
                self.cache
                    .perform(PipelineStage::Transfer, Access::TransferWrite);
            }
            Op::BufferCopyToBuffer | Op::BufferCopyToImage => {
                self.assert_stage(op, Stage::CommandBuffer);
                assert!(self.has_bound_buffer_memory && self.memory_defined);
                self.command_buffer_is_empty = false;
                self.cache
                    .perform(PipelineStage::Transfer, Access::TransferRead);
            }
            Op::ImageCopyFromBuffer | Op::ImageCopyFromImage | Op::ImageBlitFromImage => {
                self.assert_stage(op, Stage::CommandBuffer);
                assert!(self.has_bound_image_memory);

                if !coherent {
                    self.host_invalidated = false;
                }

                self.command_buffer_is_empty = false;
                self.memory_defined = false;
                self.image_defined = true;
                self.cache
                    .perform(PipelineStage::Transfer, Access::TransferWrite);
            }
            Op::ImageCopyToBuffer | Op::ImageCopyToImage | Op::ImageBlitToImage => {
                self.assert_stage(op, Stage::CommandBuffer);
                assert!(self.has_bound_image_memory && self.image_defined);
                self.command_buffer_is_empty = false;
                self.cache
                    .perform(PipelineStage::Transfer, Access::TransferRead);
            }
            Op::ImageTransitionLayout => {
                self.assert_stage(op, Stage::CommandBuffer);
                assert!(self.has_image && self.has_bound_image_memory);

                let &OpParams::Transition {
                    src_layout,
                    dst_layout,
                    masks,
                } = params
                else {
                    panic!("{op:?} requires transition parameters, got {params:?}");
                };

                if src_layout == vk::ImageLayout::UNDEFINED {
                    self.image_defined = false;
                }

                self.command_buffer_is_empty = false;
                self.image_layout = dst_layout;
                self.memory_defined = false;
                self.cache.image_layout_barrier(&masks);
            }
            Op::PipelineBarrierGlobal | Op::PipelineBarrierBuffer | Op::PipelineBarrierImage => {
                self.assert_stage(op, Stage::CommandBuffer);

                let &OpParams::Barrier(masks) = params else {
                    panic!("{op:?} requires barrier parameters, got {params:?}");
                };

                self.command_buffer_is_empty = false;
                self.cache.barrier(&masks);
            }
            Op::RenderPassBegin => {
                self.assert_stage(op, Stage::CommandBuffer);
                self.stage = Stage::RenderPass;
            }
            Op::RenderPassEnd => {
                self.assert_stage(op, Stage::RenderPass);
                self.stage = Stage::CommandBuffer;
            }
            Op::RenderVertexBuffer => {
                self.assert_stage(op, Stage::RenderPass);
                self.cache
                    .perform(PipelineStage::VertexInput, Access::VertexAttributeRead);
            }
            Op::RenderIndexBuffer => {
                self.assert_stage(op, Stage::RenderPass);
                self.cache
                    .perform(PipelineStage::VertexInput, Access::IndexRead);
            }
        }
    }

    fn assert_stage(&self, op: Op, stage: Stage) {
        assert_eq!(
            self.stage, stage,
            "{op:?} can only be performed in the {stage:?} stage",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryType;
    use proptest::prelude::*;

    fn memory(property_flags: vk::MemoryPropertyFlags) -> MemoryInfo {
        MemoryInfo {
            size: 1024,
            memory_type_index: 0,
            memory_type: MemoryType {
                property_flags,
                heap_index: 0,
            },
            max_buffer_size: 1024,
            max_image_extent: [16, 16],
        }
    }

    fn non_coherent() -> MemoryInfo {
        memory(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED)
    }

    fn walk(state: &mut State, usage: Usage, memory: &MemoryInfo, ops: &[Op]) {
        for (i, &op) in ops.iter().enumerate() {
            assert!(
                state.available_ops(usage, memory).contains(&op),
                "{op:?} is not available",
            );
            state.apply_op(usage, memory, op, i as u64);
        }
    }

    #[test]
    fn initial_host_ops() {
        let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST;
        let state = State::new(usage);

        assert_eq!(
            state.available_ops(usage, &non_coherent()),
            [Op::Map, Op::CreateBuffer, Op::CreateImage],
        );
    }

    #[test]
    fn non_coherent_writes_need_flush() {
        let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST;
        let memory = non_coherent();
        let mut state = State::new(usage);

        walk(
            &mut state,
            usage,
            &memory,
            &[Op::CreateBuffer, Op::BindBufferMemory, Op::Map, Op::MapWrite],
        );

        let ops = state.available_ops(usage, &memory);
        assert!(ops.contains(&Op::Flush));
        assert!(!ops.contains(&Op::CommandBufferBegin));

        walk(&mut state, usage, &memory, &[Op::Flush, Op::CommandBufferBegin]);

        let ops = state.available_ops(usage, &memory);
        assert!(ops.contains(&Op::BufferFill));
        assert!(ops.contains(&Op::BufferUpdate));
        // Nothing has been recorded yet, so the command buffer can't end.
        assert!(!ops.contains(&Op::CommandBufferEnd));
    }

    #[test]
    fn device_writes_need_wait_and_invalidate() {
        let usage = Usage::HOST_READ | Usage::HOST_WRITE | Usage::TRANSFER_DST;
        let memory = non_coherent();
        let mut state = State::new(usage);

        walk(
            &mut state,
            usage,
            &memory,
            &[
                Op::CreateBuffer,
                Op::BindBufferMemory,
                Op::CommandBufferBegin,
                Op::BufferFill,
                Op::CommandBufferEnd,
                Op::Map,
            ],
        );

        let ops = state.available_ops(usage, &memory);
        assert!(!ops.contains(&Op::MapRead));
        assert!(!ops.contains(&Op::Invalidate));
        assert!(!ops.contains(&Op::DestroyBuffer));

        walk(&mut state, usage, &memory, &[Op::QueueWaitIdle]);

        // The transfer write is available but the host can't see it without a barrier.
        let ops = state.available_ops(usage, &memory);
        assert!(!ops.contains(&Op::Invalidate));
        assert!(ops.contains(&Op::DestroyBuffer));
        assert!(!state.cache().is_valid(PipelineStage::Host, Access::HostRead));
    }

    #[test]
    fn image_copies_follow_layout() {
        let usage = Usage::TRANSFER_SRC | Usage::TRANSFER_DST;
        let memory = memory(vk::MemoryPropertyFlags::DEVICE_LOCAL);
        let mut state = State::new(usage);

        walk(
            &mut state,
            usage,
            &memory,
            &[Op::CreateImage, Op::BindImageMemory, Op::CommandBufferBegin],
        );

        let ops = state.available_ops(usage, &memory);
        assert!(ops.contains(&Op::ImageTransitionLayout));
        assert!(!ops.contains(&Op::ImageCopyFromBuffer));

        // Find a seed that transitions into the general layout.
        let seed = (0..)
            .find(|&seed| {
                matches!(
                    OpParams::draw(Op::ImageTransitionLayout, seed, &state, usage),
                    OpParams::Transition {
                        dst_layout: vk::ImageLayout::GENERAL,
                        ..
                    },
                )
            })
            .unwrap();
        state.apply_op(usage, &memory, Op::ImageTransitionLayout, seed);
        assert_eq!(state.image_layout(), vk::ImageLayout::GENERAL);

        // Writes depend on what the transition made visible, reads on the image being defined.
        let ops = state.available_ops(usage, &memory);
        assert_eq!(
            ops.contains(&Op::ImageCopyFromBuffer),
            state
                .cache()
                .is_valid(PipelineStage::Transfer, Access::TransferWrite),
        );
        assert!(!ops.contains(&Op::ImageCopyToBuffer));
        assert!(ops.contains(&Op::CommandBufferEnd));
    }

    #[test]
    fn params_are_deterministic() {
        let usage = Usage::TRANSFER_SRC | Usage::TRANSFER_DST;
        let state = State::new(usage);

        for seed in 0..16 {
            assert_eq!(
                OpParams::draw(Op::BufferFill, seed, &state, usage),
                OpParams::draw(Op::BufferFill, seed, &state, usage),
            );
        }

        assert_ne!(
            OpParams::draw(Op::BufferFill, 1, &state, usage),
            OpParams::draw(Op::BufferFill, 2, &state, usage),
        );
    }

    #[test]
    fn next_layout_differs_from_previous() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let usage = Usage::TRANSFER_SRC | Usage::TRANSFER_DST;

        for _ in 0..64 {
            let layout = random_next_layout(&mut rng, usage, vk::ImageLayout::GENERAL);
            assert!(matches!(
                layout,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ));
        }
    }

    fn usages() -> impl Strategy<Value = Usage> {
        prop::sample::select(vec![
            Usage::HOST_READ | Usage::HOST_WRITE,
            Usage::HOST_WRITE | Usage::TRANSFER_SRC,
            Usage::TRANSFER_DST | Usage::HOST_READ,
            Usage::TRANSFER_DST | Usage::VERTEX_BUFFER,
            Usage::TRANSFER_DST | Usage::INDEX_BUFFER,
            Usage::HOST
                | Usage::TRANSFER_SRC
                | Usage::TRANSFER_DST
                | Usage::VERTEX_BUFFER
                | Usage::INDEX_BUFFER,
            Usage::TRANSFER_SRC | Usage::TRANSFER_DST | Usage::VERTEX_BUFFER,
            Usage::all(),
        ])
    }

    fn memories() -> impl Strategy<Value = MemoryInfo> {
        prop::sample::select(vec![
            memory(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            memory(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
            non_coherent(),
        ])
    }

    proptest! {
        #[test]
        fn random_walks_stay_consistent(
            usage in usages(),
            memory in memories(),
            choices in prop::collection::vec(any::<u32>(), 1..400),
        ) {
            let mut state = State::new(usage);

            for (i, choice) in choices.into_iter().enumerate() {
                let ops = state.available_ops(usage, &memory);
                prop_assert!(!ops.is_empty());

                let op = ops[choice as usize % ops.len()];
                let seed = i as u64;

                // Every reachable state can be cleaned by its full barrier.
                let mut cache = state.cache().clone();
                cache.barrier(&cache.full_barrier());
                prop_assert!(cache.is_clean());

                if op == Op::ImageTransitionLayout {
                    let OpParams::Transition { masks, .. } =
                        OpParams::draw(op, seed, &state, usage)
                    else {
                        unreachable!();
                    };
                    prop_assert!(state.cache().is_layout_barrier_sufficient(&masks));
                }

                state.apply_op(usage, &memory, op, seed);
            }
        }

        #[test]
        fn idle_wait_validates_device_stages(
            usage in usages(),
            choices in prop::collection::vec(any::<u32>(), 1..200),
        ) {
            let memory = non_coherent();
            let mut state = State::new(usage);

            for (i, choice) in choices.into_iter().enumerate() {
                let ops = state.available_ops(usage, &memory);
                let op = ops[choice as usize % ops.len()];
                state.apply_op(usage, &memory, op, i as u64);
            }

            let mut cache = state.cache().clone();
            cache.wait_for_idle();

            let device_stages = cache.allowed_stages() & !vk::PipelineStageFlags::HOST;

            for stage in PipelineStage::iter(device_stages) {
                for access in Access::iter(cache.allowed_accesses()) {
                    prop_assert!(cache.is_valid(stage, access), "{:?} {:?}", stage, access);
                }
            }
        }
    }
}
