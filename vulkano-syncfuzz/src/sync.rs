// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Dense enumerations of pipeline stages and access types.
//!
//! The cache model indexes fixed-size tables by stage, so every stage and access that it reasons
//! about is one of the values listed here. Vulkan flag masks are translated at the boundary.

use ash::vk;

dense_flags! {
    /// A single pipeline stage that the cache model tracks.
    PipelineStage: PipelineStageFlags;

    TopOfPipe = TOP_OF_PIPE,
    BottomOfPipe = BOTTOM_OF_PIPE,
    DrawIndirect = DRAW_INDIRECT,
    VertexInput = VERTEX_INPUT,
    VertexShader = VERTEX_SHADER,
    TessellationControlShader = TESSELLATION_CONTROL_SHADER,
    TessellationEvaluationShader = TESSELLATION_EVALUATION_SHADER,
    GeometryShader = GEOMETRY_SHADER,
    FragmentShader = FRAGMENT_SHADER,
    EarlyFragmentTests = EARLY_FRAGMENT_TESTS,
    LateFragmentTests = LATE_FRAGMENT_TESTS,
    ColorAttachmentOutput = COLOR_ATTACHMENT_OUTPUT,
    ComputeShader = COMPUTE_SHADER,
    Transfer = TRANSFER,
    /// Host access to mapped memory, as a pseudo-stage.
    Host = HOST,
}

dense_flags! {
    /// A single memory access type that the cache model tracks.
    Access: AccessFlags;

    IndirectCommandRead = INDIRECT_COMMAND_READ,
    IndexRead = INDEX_READ,
    VertexAttributeRead = VERTEX_ATTRIBUTE_READ,
    UniformRead = UNIFORM_READ,
    InputAttachmentRead = INPUT_ATTACHMENT_READ,
    ShaderRead = SHADER_READ,
    ShaderWrite = SHADER_WRITE,
    ColorAttachmentRead = COLOR_ATTACHMENT_READ,
    ColorAttachmentWrite = COLOR_ATTACHMENT_WRITE,
    DepthStencilAttachmentRead = DEPTH_STENCIL_ATTACHMENT_READ,
    DepthStencilAttachmentWrite = DEPTH_STENCIL_ATTACHMENT_WRITE,
    TransferRead = TRANSFER_READ,
    TransferWrite = TRANSFER_WRITE,
    HostRead = HOST_READ,
    HostWrite = HOST_WRITE,
    MemoryRead = MEMORY_READ,
    MemoryWrite = MEMORY_WRITE,
}

/// Every access type that writes memory.
pub const WRITE_ACCESSES: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::SHADER_WRITE.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags::HOST_WRITE.as_raw()
        | vk::AccessFlags::MEMORY_WRITE.as_raw(),
);

/// Every access type that only reads memory.
pub const READ_ACCESSES: vk::AccessFlags =
    vk::AccessFlags::from_raw(Access::ALL_FLAGS.as_raw() & !WRITE_ACCESSES.as_raw());

impl Access {
    /// Returns whether the access writes memory.
    #[inline]
    pub const fn is_write(self) -> bool {
        WRITE_ACCESSES.as_raw() & self.flag().as_raw() != 0
    }
}

/// Stage and access masks of one pipeline barrier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_stages: vk::PipelineStageFlags,
    pub src_accesses: vk::AccessFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub dst_accesses: vk::AccessFlags,
}

impl BarrierMasks {
    /// Returns whether the barrier has neither stages nor accesses.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.src_stages.is_empty()
            && self.src_accesses.is_empty()
            && self.dst_stages.is_empty()
            && self.dst_accesses.is_empty()
    }
}
