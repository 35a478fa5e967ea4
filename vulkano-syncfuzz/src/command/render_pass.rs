// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Render passes that consume the tested buffer as vertex or index data.

use super::{
    context::{
        BoundImage, PrepareContext, PrepareRenderPassContext, SubmitContext, VerifyContext,
        VerifyRenderPassContext,
    },
    RenderPassCommand,
};
use crate::{
    device::{
        DeviceError, DeviceSize, Pipeline, PointPipelineCreateInfo, PointProgram,
        RENDER_TARGET_EXTENT,
    },
    log::TestLog,
    reference::ReferenceImage,
};
use ash::vk;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const CLEAR_PIXEL: [u8; 4] = [0, 0, 0, 255];
const POINT_PIXEL: [u8; 4] = [255; 4];

/// Records a render pass into a fresh render target, with the nested commands inside of it.
#[derive(Debug)]
pub struct SubmitRenderPass {
    commands: Vec<RenderPassCommand>,
    target: Option<BoundImage>,
}

impl SubmitRenderPass {
    #[inline]
    pub fn new(commands: Vec<RenderPassCommand>) -> Self {
        SubmitRenderPass {
            commands,
            target: None,
        }
    }

    #[inline]
    pub fn commands(&self) -> &[RenderPassCommand] {
        &self.commands
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.section(format!("{index}:SubmitRenderPass"), |log| {
            log.message("Create render target.");

            for (index, command) in self.commands.iter().enumerate() {
                command.log_prepare(log, index);
            }
        });
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.section(format!("{index}:SubmitRenderPass"), |log| {
            log.message("Begin render pass.");

            for (index, command) in self.commands.iter().enumerate() {
                command.log_submit(log, index);
            }

            log.message("End render pass.");
        });
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        let target = context.context().create_bound_image(
            RENDER_TARGET_EXTENT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;

        let mut render_pass_context = PrepareRenderPassContext::new(context, &target.image);

        for command in &mut self.commands {
            command.prepare(&mut render_pass_context)?;
        }

        self.target = Some(target);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let target = self
            .target
            .as_ref()
            .ok_or(DeviceError::InvalidHandle)?
            .image
            .id();

        context
            .builder()
            .begin_render_pass(target, RENDER_TARGET_EXTENT, CLEAR_COLOR);

        for command in &mut self.commands {
            command.submit(context)?;
        }

        context.builder().end_render_pass();

        Ok(())
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        let target = self.target.as_ref().ok_or(DeviceError::InvalidHandle)?;
        let [width, height] = RENDER_TARGET_EXTENT;
        let mut reference_target = ReferenceImage::filled(width, height, CLEAR_PIXEL);

        let name = format!("{index}:SubmitRenderPass");

        context.section(name, |context| -> Result<_, DeviceError> {
            let mut render_pass_context =
                VerifyRenderPassContext::new(context, &mut reference_target);

            for (index, command) in self.commands.iter_mut().enumerate() {
                command.verify(&mut render_pass_context, index);
            }

            let data = context.context().read_image(
                &target.image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )?;
            context.check_image(
                &reference_target,
                &format!("{index}:SubmitRenderPass"),
                &data,
                format!("{index}:SubmitRenderPass Image comparison failed"),
            );

            Ok(())
        })
    }
}

/// Draws one point per two bytes of the tested buffer, reading it either as an R8G8 vertex
/// buffer or as a 16-bit index buffer.
#[derive(Debug)]
pub struct RenderBuffer {
    program: PointProgram,
    buffer_size: DeviceSize,
    pipeline: Option<Pipeline>,
}

impl RenderBuffer {
    #[inline]
    pub fn new(program: PointProgram) -> Self {
        RenderBuffer {
            program,
            buffer_size: 0,
            pipeline: None,
        }
    }

    #[inline]
    pub fn program(&self) -> PointProgram {
        self.program
    }

    fn buffer_kind(&self) -> &'static str {
        match self.program {
            PointProgram::VertexBuffer => "vertex",
            PointProgram::IndexBuffer => "index",
        }
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:RenderBuffer Create pipeline for render buffer as {} buffer.",
            self.buffer_kind(),
        ));
    }

    pub(super) fn log_submit(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:RenderBuffer Render using buffer as {} buffer.",
            self.buffer_kind(),
        ));
    }

    pub(super) fn prepare(
        &mut self,
        context: &mut PrepareRenderPassContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let prepare = context.prepare();
        self.buffer_size = prepare.buffer_size();
        self.pipeline = Some(Pipeline::new(
            prepare.context().device().clone(),
            &PointPipelineCreateInfo {
                program: self.program,
            },
        )?);

        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        context: &mut SubmitContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(DeviceError::InvalidHandle)?
            .id();
        let buffer = context.buffer()?.id();
        let count = (self.buffer_size / 2) as u32;
        let builder = context.builder();
        builder.bind_pipeline(pipeline);

        match self.program {
            PointProgram::VertexBuffer => {
                builder.bind_vertex_buffer(buffer).draw(count);
            }
            PointProgram::IndexBuffer => {
                builder
                    .bind_index_buffer(buffer, vk::IndexType::UINT16)
                    .draw_indexed(count);
            }
        }

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyRenderPassContext<'_, '_>, index: usize) {
        // Both programs map the low byte of a point to x and the high byte to y.
        for point in 0..(self.buffer_size / 2) as usize {
            let x = context.reference().get(2 * point);
            let y = context.reference().get(2 * point + 1);

            match (x, y) {
                (Some(x), Some(y)) => {
                    context
                        .reference_target()
                        .set_pixel(x.into(), y.into(), POINT_PIXEL);
                }
                _ => {
                    context.verify().fail(format!(
                        "{index}:RenderBuffer Point {point} is drawn from undefined data",
                    ));

                    return;
                }
            }
        }
    }
}
