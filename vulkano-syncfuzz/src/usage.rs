// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Resource usages and the pipeline stages, access types and object usage flags they imply.

use ash::vk;
use std::fmt;

usage_flags! {
    /// The ways a test may use its memory object.
    ///
    /// A usage is fixed for the duration of a test case and decides which pipeline stages and
    /// access types are reachable at all.
    Usage(u32);

    /// Mapped host reads.
    HOST_READ = 1 << 0 => {
        name: "host_read",
        stages: [HOST],
        accesses: [HOST_READ],
        buffer_usage: [],
        image_usage: [],
    },

    /// Mapped host writes.
    HOST_WRITE = 1 << 1 => {
        name: "host_write",
        stages: [HOST],
        accesses: [HOST_WRITE],
        buffer_usage: [],
        image_usage: [],
    },

    /// Source of copy and blit commands.
    TRANSFER_SRC = 1 << 2 => {
        name: "transfer_src",
        stages: [TRANSFER],
        accesses: [TRANSFER_READ],
        buffer_usage: [TRANSFER_SRC],
        image_usage: [TRANSFER_SRC],
    },

    /// Destination of copy, blit, fill and update commands.
    TRANSFER_DST = 1 << 3 => {
        name: "transfer_dst",
        stages: [TRANSFER],
        accesses: [TRANSFER_WRITE],
        buffer_usage: [TRANSFER_DST],
        image_usage: [TRANSFER_DST],
    },

    INDEX_BUFFER = 1 << 4 => {
        name: "index_buffer",
        stages: [VERTEX_INPUT],
        accesses: [INDEX_READ],
        buffer_usage: [INDEX_BUFFER],
        image_usage: [],
    },

    VERTEX_BUFFER = 1 << 5 => {
        name: "vertex_buffer",
        stages: [VERTEX_INPUT],
        accesses: [VERTEX_ATTRIBUTE_READ],
        buffer_usage: [VERTEX_BUFFER],
        image_usage: [],
    },

    UNIFORM_BUFFER = 1 << 6 => {
        name: "uniform_buffer",
        stages: [
            VERTEX_SHADER,
            TESSELLATION_CONTROL_SHADER,
            TESSELLATION_EVALUATION_SHADER,
            GEOMETRY_SHADER,
            FRAGMENT_SHADER,
            COMPUTE_SHADER,
        ],
        accesses: [UNIFORM_READ],
        buffer_usage: [UNIFORM_BUFFER],
        image_usage: [],
    },

    STORAGE_BUFFER = 1 << 7 => {
        name: "storage_buffer",
        stages: [
            VERTEX_SHADER,
            TESSELLATION_CONTROL_SHADER,
            TESSELLATION_EVALUATION_SHADER,
            GEOMETRY_SHADER,
            FRAGMENT_SHADER,
            COMPUTE_SHADER,
        ],
        accesses: [SHADER_READ, SHADER_WRITE],
        buffer_usage: [STORAGE_BUFFER],
        image_usage: [],
    },

    UNIFORM_TEXEL_BUFFER = 1 << 8 => {
        name: "uniform_texel_buffer",
        stages: [
            VERTEX_SHADER,
            TESSELLATION_CONTROL_SHADER,
            TESSELLATION_EVALUATION_SHADER,
            GEOMETRY_SHADER,
            FRAGMENT_SHADER,
            COMPUTE_SHADER,
        ],
        accesses: [UNIFORM_READ],
        buffer_usage: [UNIFORM_TEXEL_BUFFER],
        image_usage: [],
    },

    STORAGE_TEXEL_BUFFER = 1 << 9 => {
        name: "storage_texel_buffer",
        stages: [
            VERTEX_SHADER,
            TESSELLATION_CONTROL_SHADER,
            TESSELLATION_EVALUATION_SHADER,
            GEOMETRY_SHADER,
            FRAGMENT_SHADER,
            COMPUTE_SHADER,
        ],
        accesses: [SHADER_READ, SHADER_WRITE],
        buffer_usage: [STORAGE_TEXEL_BUFFER],
        image_usage: [],
    },

    INDIRECT_BUFFER = 1 << 10 => {
        name: "indirect_buffer",
        stages: [DRAW_INDIRECT],
        accesses: [INDIRECT_COMMAND_READ],
        buffer_usage: [INDIRECT_BUFFER],
        image_usage: [],
    },

    TEXTURE_SAMPLED = 1 << 11 => {
        name: "sampled_texture",
        stages: [
            VERTEX_SHADER,
            TESSELLATION_CONTROL_SHADER,
            TESSELLATION_EVALUATION_SHADER,
            GEOMETRY_SHADER,
            FRAGMENT_SHADER,
            COMPUTE_SHADER,
        ],
        accesses: [SHADER_READ, SHADER_WRITE],
        buffer_usage: [],
        image_usage: [SAMPLED],
    },

    TEXTURE_STORAGE = 1 << 12 => {
        name: "texture_storage",
        stages: [
            VERTEX_SHADER,
            TESSELLATION_CONTROL_SHADER,
            TESSELLATION_EVALUATION_SHADER,
            GEOMETRY_SHADER,
            FRAGMENT_SHADER,
            COMPUTE_SHADER,
        ],
        accesses: [SHADER_READ, SHADER_WRITE],
        buffer_usage: [],
        image_usage: [STORAGE],
    },

    COLOR_ATTACHMENT = 1 << 13 => {
        name: "color_attachment",
        stages: [COLOR_ATTACHMENT_OUTPUT],
        accesses: [COLOR_ATTACHMENT_READ, COLOR_ATTACHMENT_WRITE],
        buffer_usage: [],
        image_usage: [COLOR_ATTACHMENT],
    },

    INPUT_ATTACHMENT = 1 << 14 => {
        name: "input_attachment",
        stages: [FRAGMENT_SHADER],
        accesses: [INPUT_ATTACHMENT_READ],
        buffer_usage: [],
        image_usage: [INPUT_ATTACHMENT],
    },

    DEPTH_STENCIL_ATTACHMENT = 1 << 15 => {
        name: "depth_stencil_attachment",
        stages: [EARLY_FRAGMENT_TESTS, LATE_FRAGMENT_TESTS],
        accesses: [DEPTH_STENCIL_ATTACHMENT_READ, DEPTH_STENCIL_ATTACHMENT_WRITE],
        buffer_usage: [],
        image_usage: [DEPTH_STENCIL_ATTACHMENT],
    },
}

impl Usage {
    /// Host reads and writes.
    pub const HOST: Self = Self::HOST_READ.union(Self::HOST_WRITE);

    /// Returns whether `self` includes mapped host access.
    #[inline]
    pub const fn has_host_access(self) -> bool {
        self.intersects(Self::HOST)
    }

    /// Returns whether the device can write to a buffer used as described by `self`.
    #[inline]
    pub const fn supports_device_buffer_writes(self) -> bool {
        self.intersects(
            Self::TRANSFER_DST
                .union(Self::STORAGE_BUFFER)
                .union(Self::STORAGE_TEXEL_BUFFER),
        )
    }

    /// Returns whether the device can write to an image used as described by `self`.
    #[inline]
    pub const fn supports_device_image_writes(self) -> bool {
        self.intersects(
            Self::TRANSFER_DST
                .union(Self::TEXTURE_STORAGE)
                .union(Self::COLOR_ATTACHMENT),
        )
    }

    /// Returns whether an image used as described by `self` may be in `layout`.
    pub fn supports_layout(self, layout: vk::ImageLayout) -> bool {
        match layout {
            vk::ImageLayout::GENERAL | vk::ImageLayout::PREINITIALIZED => true,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => self.intersects(Self::COLOR_ATTACHMENT),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
                self.intersects(Self::DEPTH_STENCIL_ATTACHMENT)
            }
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => self.intersects(Self::TEXTURE_SAMPLED),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => self.intersects(Self::TRANSFER_SRC),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => self.intersects(Self::TRANSFER_DST),
            _ => false,
        }
    }
}

/// Formats the usage as a test case name, for example `host_write_transfer_src`.
impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.names().enumerate() {
            if i != 0 {
                f.write_str("_")?;
            }

            f.write_str(name)?;
        }

        Ok(())
    }
}
