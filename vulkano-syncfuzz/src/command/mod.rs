// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The commands that a generated test is made of.
//!
//! A test runs in three phases, each of which walks the whole command list in order:
//!
//! 1. Preparing creates the objects that the commands need and records command buffers. The
//!    tested buffer or image is created here too, so that executing only has to touch the
//!    memory and the queue.
//! 2. Executing performs the host operations and submits the recorded command buffers.
//! 3. Verifying replays every command against a [`ReferenceMemory`] and checks everything that
//!    was read back against it.
//!
//! Commands exist at three levels, mirroring where they are recorded: [`Command`] on the host,
//! [`CmdCommand`] inside a command buffer and [`RenderPassCommand`] inside a render pass.
//!
//! [`ReferenceMemory`]: crate::reference::ReferenceMemory

pub use self::{
    cmd::{BarrierKind, FillBuffer, ImageTransition, PipelineBarrier, UpdateBuffer},
    copy::{
        BufferCopyFromBuffer, BufferCopyFromImage, BufferCopyToBuffer, BufferCopyToImage,
        ImageBlitFromImage, ImageBlitToImage, ImageCopyFromBuffer, ImageCopyFromImage,
        ImageCopyToBuffer, ImageCopyToImage,
    },
    host::{
        BindBufferMemory, BindImageMemory, CreateBuffer, CreateImage, DestroyBuffer,
        DestroyImage, DeviceWaitIdle, Flush, HostMemoryAccess, Invalidate, Map,
        QueueWaitIdle, SubmitCommandBuffer, Unmap,
    },
    render_pass::{RenderBuffer, SubmitRenderPass},
};
use self::context::{
    ExecuteContext, PrepareContext, PrepareRenderPassContext, SubmitContext, VerifyContext,
    VerifyRenderPassContext,
};
use crate::{device::DeviceError, log::TestLog};

mod cmd;
pub mod context;
mod copy;
mod host;
mod render_pass;

/// A command performed by the host.
#[derive(Debug)]
pub enum Command {
    Map(Map),
    Unmap(Unmap),
    Flush(Flush),
    Invalidate(Invalidate),
    HostMemoryAccess(HostMemoryAccess),
    CreateBuffer(CreateBuffer),
    DestroyBuffer(DestroyBuffer),
    BindBufferMemory(BindBufferMemory),
    CreateImage(CreateImage),
    DestroyImage(DestroyImage),
    BindImageMemory(BindImageMemory),
    QueueWaitIdle(QueueWaitIdle),
    DeviceWaitIdle(DeviceWaitIdle),
    SubmitCommandBuffer(SubmitCommandBuffer),
}

impl Command {
    /// Returns the name of the command, as used in the log.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Map(_) => "Map",
            Command::Unmap(_) => "Unmap",
            Command::Flush(_) => "Flush",
            Command::Invalidate(_) => "Invalidate",
            Command::HostMemoryAccess(_) => "HostMemoryAccess",
            Command::CreateBuffer(_) => "CreateBuffer",
            Command::DestroyBuffer(_) => "DestroyBuffer",
            Command::BindBufferMemory(_) => "BindBufferMemory",
            Command::CreateImage(_) => "CreateImage",
            Command::DestroyImage(_) => "DestroyImage",
            Command::BindImageMemory(_) => "BindImageMemory",
            Command::QueueWaitIdle(_) => "QueueWaitIdle",
            Command::DeviceWaitIdle(_) => "DeviceWaitIdle",
            Command::SubmitCommandBuffer(_) => "SubmitCommandBuffer",
        }
    }

    /// Logs what preparing the command does.
    pub fn log_prepare(&self, log: &mut TestLog, index: usize) {
        match self {
            Command::CreateBuffer(c) => c.log_prepare(log, index),
            Command::BindBufferMemory(c) => c.log_prepare(log, index),
            Command::CreateImage(c) => c.log_prepare(log, index),
            Command::BindImageMemory(c) => c.log_prepare(log, index),
            Command::SubmitCommandBuffer(c) => c.log_prepare(log, index),
            Command::Map(_)
            | Command::Unmap(_)
            | Command::Flush(_)
            | Command::Invalidate(_)
            | Command::HostMemoryAccess(_)
            | Command::DestroyBuffer(_)
            | Command::DestroyImage(_)
            | Command::QueueWaitIdle(_)
            | Command::DeviceWaitIdle(_) => {}
        }
    }

    /// Logs what executing the command does.
    pub fn log_execute(&self, log: &mut TestLog, index: usize) {
        match self {
            Command::Map(c) => c.log_execute(log, index),
            Command::Unmap(c) => c.log_execute(log, index),
            Command::Flush(c) => c.log_execute(log, index),
            Command::Invalidate(c) => c.log_execute(log, index),
            Command::HostMemoryAccess(c) => c.log_execute(log, index),
            Command::DestroyBuffer(c) => c.log_execute(log, index),
            Command::DestroyImage(c) => c.log_execute(log, index),
            Command::QueueWaitIdle(c) => c.log_execute(log, index),
            Command::DeviceWaitIdle(c) => c.log_execute(log, index),
            Command::SubmitCommandBuffer(c) => c.log_execute(log, index),
            Command::CreateBuffer(_)
            | Command::BindBufferMemory(_)
            | Command::CreateImage(_)
            | Command::BindImageMemory(_) => {}
        }
    }

    pub fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        match self {
            Command::CreateBuffer(c) => c.prepare(context),
            Command::DestroyBuffer(c) => c.prepare(context),
            Command::BindBufferMemory(c) => c.prepare(context),
            Command::CreateImage(c) => c.prepare(context),
            Command::DestroyImage(c) => c.prepare(context),
            Command::BindImageMemory(c) => c.prepare(context),
            Command::SubmitCommandBuffer(c) => c.prepare(context),
            Command::Map(_)
            | Command::Unmap(_)
            | Command::Flush(_)
            | Command::Invalidate(_)
            | Command::HostMemoryAccess(_)
            | Command::QueueWaitIdle(_)
            | Command::DeviceWaitIdle(_) => Ok(()),
        }
    }

    pub fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        match self {
            Command::Map(c) => c.execute(context),
            Command::Unmap(c) => c.execute(context),
            Command::Flush(c) => c.execute(context),
            Command::Invalidate(c) => c.execute(context),
            Command::HostMemoryAccess(c) => c.execute(context),
            Command::DestroyBuffer(c) => c.execute(context),
            Command::DestroyImage(c) => c.execute(context),
            Command::QueueWaitIdle(c) => c.execute(context),
            Command::DeviceWaitIdle(c) => c.execute(context),
            Command::SubmitCommandBuffer(c) => c.execute(context),
            Command::CreateBuffer(_)
            | Command::BindBufferMemory(_)
            | Command::CreateImage(_)
            | Command::BindImageMemory(_) => Ok(()),
        }
    }

    /// Updates the reference with the effects of the command and checks anything it read.
    ///
    /// Mismatches are recorded in the context. An error is only returned if reading back from
    /// the device failed.
    pub fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        match self {
            Command::HostMemoryAccess(c) => c.verify(context, index),
            Command::CreateImage(c) => c.verify(context),
            Command::SubmitCommandBuffer(c) => return c.verify(context, index),
            Command::Map(_)
            | Command::Unmap(_)
            | Command::Flush(_)
            | Command::Invalidate(_)
            | Command::CreateBuffer(_)
            | Command::DestroyBuffer(_)
            | Command::BindBufferMemory(_)
            | Command::DestroyImage(_)
            | Command::BindImageMemory(_)
            | Command::QueueWaitIdle(_)
            | Command::DeviceWaitIdle(_) => {}
        }

        Ok(())
    }
}

/// A command recorded into a command buffer.
#[derive(Debug)]
pub enum CmdCommand {
    PipelineBarrier(PipelineBarrier),
    ImageTransition(ImageTransition),
    FillBuffer(FillBuffer),
    UpdateBuffer(UpdateBuffer),
    BufferCopyToBuffer(BufferCopyToBuffer),
    BufferCopyFromBuffer(BufferCopyFromBuffer),
    BufferCopyToImage(BufferCopyToImage),
    BufferCopyFromImage(BufferCopyFromImage),
    ImageCopyToBuffer(ImageCopyToBuffer),
    ImageCopyFromBuffer(ImageCopyFromBuffer),
    ImageCopyToImage(ImageCopyToImage),
    ImageCopyFromImage(ImageCopyFromImage),
    ImageBlitToImage(ImageBlitToImage),
    ImageBlitFromImage(ImageBlitFromImage),
    SubmitRenderPass(SubmitRenderPass),
}

impl CmdCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CmdCommand::PipelineBarrier(_) => "PipelineBarrier",
            CmdCommand::ImageTransition(_) => "ImageTransition",
            CmdCommand::FillBuffer(_) => "FillBuffer",
            CmdCommand::UpdateBuffer(_) => "UpdateBuffer",
            CmdCommand::BufferCopyToBuffer(_) => "BufferCopyToBuffer",
            CmdCommand::BufferCopyFromBuffer(_) => "BufferCopyFromBuffer",
            CmdCommand::BufferCopyToImage(_) => "BufferCopyToImage",
            CmdCommand::BufferCopyFromImage(_) => "BufferCopyFromImage",
            CmdCommand::ImageCopyToBuffer(_) => "ImageCopyToBuffer",
            CmdCommand::ImageCopyFromBuffer(_) => "ImageCopyFromBuffer",
            CmdCommand::ImageCopyToImage(_) => "ImageCopyToImage",
            CmdCommand::ImageCopyFromImage(_) => "ImageCopyFromImage",
            CmdCommand::ImageBlitToImage(_) => "ImageBlitToImage",
            CmdCommand::ImageBlitFromImage(_) => "ImageBlitFromImage",
            CmdCommand::SubmitRenderPass(_) => "SubmitRenderPass",
        }
    }

    pub fn log_prepare(&self, log: &mut TestLog, index: usize) {
        match self {
            CmdCommand::BufferCopyToBuffer(c) => c.log_prepare(log, index),
            CmdCommand::BufferCopyFromBuffer(c) => c.log_prepare(log, index),
            CmdCommand::BufferCopyToImage(c) => c.log_prepare(log, index),
            CmdCommand::BufferCopyFromImage(c) => c.log_prepare(log, index),
            CmdCommand::ImageCopyToBuffer(c) => c.log_prepare(log, index),
            CmdCommand::ImageCopyFromBuffer(c) => c.log_prepare(log, index),
            CmdCommand::ImageCopyToImage(c) => c.log_prepare(log, index),
            CmdCommand::ImageCopyFromImage(c) => c.log_prepare(log, index),
            CmdCommand::ImageBlitToImage(c) => c.log_prepare(log, index),
            CmdCommand::ImageBlitFromImage(c) => c.log_prepare(log, index),
            CmdCommand::SubmitRenderPass(c) => c.log_prepare(log, index),
            CmdCommand::PipelineBarrier(_)
            | CmdCommand::ImageTransition(_)
            | CmdCommand::FillBuffer(_)
            | CmdCommand::UpdateBuffer(_) => {}
        }
    }

    /// Logs what recording the command does.
    pub fn log_submit(&self, log: &mut TestLog, index: usize) {
        match self {
            CmdCommand::PipelineBarrier(c) => c.log_submit(log, index),
            CmdCommand::ImageTransition(c) => c.log_submit(log, index),
            CmdCommand::FillBuffer(c) => c.log_submit(log, index),
            CmdCommand::UpdateBuffer(c) => c.log_submit(log, index),
            CmdCommand::BufferCopyToBuffer(c) => c.log_submit(log, index),
            CmdCommand::BufferCopyFromBuffer(c) => c.log_submit(log, index),
            CmdCommand::BufferCopyToImage(c) => c.log_submit(log, index),
            CmdCommand::BufferCopyFromImage(c) => c.log_submit(log, index),
            CmdCommand::ImageCopyToBuffer(c) => c.log_submit(log, index),
            CmdCommand::ImageCopyFromBuffer(c) => c.log_submit(log, index),
            CmdCommand::ImageCopyToImage(c) => c.log_submit(log, index),
            CmdCommand::ImageCopyFromImage(c) => c.log_submit(log, index),
            CmdCommand::ImageBlitToImage(c) => c.log_submit(log, index),
            CmdCommand::ImageBlitFromImage(c) => c.log_submit(log, index),
            CmdCommand::SubmitRenderPass(c) => c.log_submit(log, index),
        }
    }

    pub fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        match self {
            CmdCommand::ImageTransition(c) => c.prepare(context),
            CmdCommand::FillBuffer(c) => c.prepare(context),
            CmdCommand::UpdateBuffer(c) => c.prepare(context),
            CmdCommand::BufferCopyToBuffer(c) => c.prepare(context),
            CmdCommand::BufferCopyFromBuffer(c) => c.prepare(context),
            CmdCommand::BufferCopyToImage(c) => c.prepare(context),
            CmdCommand::BufferCopyFromImage(c) => c.prepare(context),
            CmdCommand::ImageCopyToBuffer(c) => c.prepare(context),
            CmdCommand::ImageCopyFromBuffer(c) => c.prepare(context),
            CmdCommand::ImageCopyToImage(c) => c.prepare(context),
            CmdCommand::ImageCopyFromImage(c) => c.prepare(context),
            CmdCommand::ImageBlitToImage(c) => c.prepare(context),
            CmdCommand::ImageBlitFromImage(c) => c.prepare(context),
            CmdCommand::SubmitRenderPass(c) => c.prepare(context),
            CmdCommand::PipelineBarrier(_) => Ok(()),
        }
    }

    /// Records the command into the tested command buffer.
    pub fn submit(&mut self, context: &mut SubmitContext<'_, '_>) -> Result<(), DeviceError> {
        match self {
            CmdCommand::PipelineBarrier(c) => c.submit(context),
            CmdCommand::ImageTransition(c) => c.submit(context),
            CmdCommand::FillBuffer(c) => c.submit(context),
            CmdCommand::UpdateBuffer(c) => c.submit(context),
            CmdCommand::BufferCopyToBuffer(c) => c.submit(context),
            CmdCommand::BufferCopyFromBuffer(c) => c.submit(context),
            CmdCommand::BufferCopyToImage(c) => c.submit(context),
            CmdCommand::BufferCopyFromImage(c) => c.submit(context),
            CmdCommand::ImageCopyToBuffer(c) => c.submit(context),
            CmdCommand::ImageCopyFromBuffer(c) => c.submit(context),
            CmdCommand::ImageCopyToImage(c) => c.submit(context),
            CmdCommand::ImageCopyFromImage(c) => c.submit(context),
            CmdCommand::ImageBlitToImage(c) => c.submit(context),
            CmdCommand::ImageBlitFromImage(c) => c.submit(context),
            CmdCommand::SubmitRenderPass(c) => c.submit(context),
        }
    }

    pub fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        match self {
            CmdCommand::ImageTransition(c) => c.verify(context),
            CmdCommand::FillBuffer(c) => c.verify(context),
            CmdCommand::UpdateBuffer(c) => c.verify(context),
            CmdCommand::BufferCopyFromBuffer(c) => c.verify(context),
            CmdCommand::BufferCopyFromImage(c) => c.verify(context),
            CmdCommand::ImageCopyFromBuffer(c) => c.verify(context),
            CmdCommand::ImageCopyFromImage(c) => c.verify(context),
            CmdCommand::ImageBlitFromImage(c) => c.verify(context),
            CmdCommand::BufferCopyToBuffer(c) => return c.verify(context, index),
            CmdCommand::BufferCopyToImage(c) => return c.verify(context, index),
            CmdCommand::ImageCopyToBuffer(c) => return c.verify(context, index),
            CmdCommand::ImageCopyToImage(c) => return c.verify(context, index),
            CmdCommand::ImageBlitToImage(c) => return c.verify(context, index),
            CmdCommand::SubmitRenderPass(c) => return c.verify(context, index),
            CmdCommand::PipelineBarrier(_) => {}
        }

        Ok(())
    }
}

/// A command recorded inside of a render pass.
#[derive(Debug)]
pub enum RenderPassCommand {
    RenderBuffer(RenderBuffer),
}

impl RenderPassCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RenderPassCommand::RenderBuffer(_) => "RenderBuffer",
        }
    }

    pub fn log_prepare(&self, log: &mut TestLog, index: usize) {
        match self {
            RenderPassCommand::RenderBuffer(c) => c.log_prepare(log, index),
        }
    }

    pub fn log_submit(&self, log: &mut TestLog, index: usize) {
        match self {
            RenderPassCommand::RenderBuffer(c) => c.log_submit(log, index),
        }
    }

    pub fn prepare(
        &mut self,
        context: &mut PrepareRenderPassContext<'_, '_>,
    ) -> Result<(), DeviceError> {
        match self {
            RenderPassCommand::RenderBuffer(c) => c.prepare(context),
        }
    }

    pub fn submit(&mut self, context: &mut SubmitContext<'_, '_>) -> Result<(), DeviceError> {
        match self {
            RenderPassCommand::RenderBuffer(c) => c.submit(context),
        }
    }

    pub fn verify(&mut self, context: &mut VerifyRenderPassContext<'_, '_>, index: usize) {
        match self {
            RenderPassCommand::RenderBuffer(c) => c.verify(context, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{context::Context, *};
    use crate::{
        device::{Defects, Device, PointProgram, SoftDevice, SoftDeviceCreateInfo},
        log::LogEntry,
        memory::Memory,
        run::ResultCollector,
        state::BlitScale,
        sync::BarrierMasks,
        usage::Usage,
    };
    use ash::vk;
    use std::sync::Arc;

    fn device() -> Arc<dyn Device> {
        Arc::new(SoftDevice::new(SoftDeviceCreateInfo::default()))
    }

    /// Runs all three phases and returns the collected failures and the final reference.
    fn run(
        device: &Arc<dyn Device>,
        memory: &Memory,
        usage: Usage,
        commands: &mut [Command],
    ) -> (Vec<String>, Vec<Option<u8>>) {
        let context = Context::new(device, memory, usage, vk::SharingMode::EXCLUSIVE);

        let mut prepare_context = PrepareContext::new(context);
        for command in commands.iter_mut() {
            command.prepare(&mut prepare_context).unwrap();
        }

        let mut execute_context = ExecuteContext::new(context);
        for command in commands.iter_mut() {
            command.execute(&mut execute_context).unwrap();
        }
        device.device_wait_idle().unwrap();

        let mut log = TestLog::new();
        let mut results = ResultCollector::new();
        let mut verify_context = VerifyContext::new(context, &mut log, &mut results);
        for (index, command) in commands.iter_mut().enumerate() {
            command.verify(&mut verify_context, index).unwrap();
        }
        let reference = verify_context.into_reference();
        let reference = (0..reference.len()).map(|pos| reference.get(pos)).collect();

        (results.failures().to_vec(), reference)
    }

    fn submit(commands: Vec<CmdCommand>) -> Command {
        Command::SubmitCommandBuffer(SubmitCommandBuffer::new(commands))
    }

    fn barrier(masks: BarrierMasks) -> CmdCommand {
        CmdCommand::PipelineBarrier(PipelineBarrier::new(BarrierKind::Global, masks))
    }

    fn host_to_transfer() -> BarrierMasks {
        BarrierMasks {
            src_stages: vk::PipelineStageFlags::HOST,
            src_accesses: vk::AccessFlags::HOST_WRITE,
            dst_stages: vk::PipelineStageFlags::TRANSFER,
            dst_accesses: vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE,
        }
    }

    fn transfer_to_transfer() -> BarrierMasks {
        BarrierMasks {
            src_stages: vk::PipelineStageFlags::TRANSFER,
            src_accesses: vk::AccessFlags::TRANSFER_WRITE,
            dst_stages: vk::PipelineStageFlags::TRANSFER,
            dst_accesses: vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE,
        }
    }

    fn buffer_commands() -> Vec<Command> {
        vec![
            Command::CreateBuffer(CreateBuffer),
            Command::BindBufferMemory(BindBufferMemory),
        ]
    }

    #[test]
    fn host_write_then_fill() {
        let device = device();
        let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST;
        let memory = Memory::new(&device, 1024, 1, 1024, [0, 0]).unwrap();

        let mut commands = buffer_commands();
        commands.extend([
            Command::Map(Map),
            Command::HostMemoryAccess(HostMemoryAccess::new(false, true, 17)),
            Command::Unmap(Unmap),
            submit(vec![
                barrier(host_to_transfer()),
                CmdCommand::FillBuffer(FillBuffer::new(0xdead_beef)),
            ]),
            Command::QueueWaitIdle(QueueWaitIdle),
        ]);

        let (failures, reference) = run(&device, &memory, usage, &mut commands);

        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(
            &reference[..4],
            &[Some(0xef), Some(0xbe), Some(0xad), Some(0xde)],
        );
        assert!(reference.iter().all(Option::is_some));
    }

    #[test]
    fn buffer_round_trips_through_copies() {
        let device = device();
        let usage = Usage::TRANSFER_SRC | Usage::TRANSFER_DST;
        let memory = Memory::new(&device, 8192, 0, 8192, [0, 0]).unwrap();

        let mut commands = buffer_commands();
        commands.extend([
            submit(vec![
                CmdCommand::UpdateBuffer(UpdateBuffer::new(3)),
                barrier(transfer_to_transfer()),
                CmdCommand::BufferCopyToBuffer(BufferCopyToBuffer::default()),
                CmdCommand::BufferCopyToImage(BufferCopyToImage::default()),
                barrier(transfer_to_transfer()),
                CmdCommand::BufferCopyFromImage(BufferCopyFromImage::new(4)),
                barrier(transfer_to_transfer()),
                CmdCommand::BufferCopyToBuffer(BufferCopyToBuffer::default()),
                barrier(transfer_to_transfer()),
                CmdCommand::BufferCopyFromBuffer(BufferCopyFromBuffer::new(5)),
                barrier(transfer_to_transfer()),
                CmdCommand::BufferCopyToImage(BufferCopyToImage::default()),
            ]),
            Command::QueueWaitIdle(QueueWaitIdle),
        ]);

        let (failures, reference) = run(&device, &memory, usage, &mut commands);

        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(
            reference.iter().map(|b| b.unwrap()).collect::<Vec<_>>(),
            crate::random::random_bytes(5, 8192),
        );
    }

    #[test]
    fn image_round_trips_through_copies_and_blits() {
        let device = device();
        let usage = Usage::TRANSFER_SRC | Usage::TRANSFER_DST;
        let memory = Memory::new(&device, 4096, 0, 0, [32, 32]).unwrap();
        let general = vk::ImageLayout::GENERAL;
        let to_general = |src_layout| {
            CmdCommand::ImageTransition(ImageTransition::new(
                src_layout,
                general,
                transfer_to_transfer(),
            ))
        };

        let mut commands = vec![
            Command::CreateImage(CreateImage::default()),
            Command::BindImageMemory(BindImageMemory),
            submit(vec![
                to_general(vk::ImageLayout::UNDEFINED),
                CmdCommand::ImageCopyFromBuffer(ImageCopyFromBuffer::new(7, general)),
                barrier(transfer_to_transfer()),
                CmdCommand::ImageCopyToBuffer(ImageCopyToBuffer::new(general)),
                CmdCommand::ImageCopyToImage(ImageCopyToImage::new(general)),
                CmdCommand::ImageBlitToImage(ImageBlitToImage::new(BlitScale::Double, general)),
                barrier(transfer_to_transfer()),
                CmdCommand::ImageCopyFromImage(ImageCopyFromImage::new(8, general)),
                barrier(transfer_to_transfer()),
                CmdCommand::ImageBlitToImage(ImageBlitToImage::new(BlitScale::Same, general)),
                barrier(transfer_to_transfer()),
                CmdCommand::ImageBlitFromImage(ImageBlitFromImage::new(
                    BlitScale::Double,
                    9,
                    general,
                )),
                barrier(transfer_to_transfer()),
                CmdCommand::ImageCopyToBuffer(ImageCopyToBuffer::new(general)),
            ]),
            Command::QueueWaitIdle(QueueWaitIdle),
        ];

        let (failures, reference) = run(&device, &memory, usage, &mut commands);

        assert!(failures.is_empty(), "{failures:?}");
        // Image contents are opaque, so the memory behind them is never defined.
        assert!(reference.iter().all(Option::is_none));
    }

    #[test]
    fn render_pass_draws_vertex_and_index_buffers() {
        let device = device();
        let usage = Usage::TRANSFER_DST | Usage::VERTEX_BUFFER | Usage::INDEX_BUFFER;
        let memory = Memory::new(&device, 1024, 0, 1024, [0, 0]).unwrap();

        let mut commands = buffer_commands();
        commands.extend([
            submit(vec![
                CmdCommand::UpdateBuffer(UpdateBuffer::new(21)),
                barrier(BarrierMasks {
                    src_stages: vk::PipelineStageFlags::TRANSFER,
                    src_accesses: vk::AccessFlags::TRANSFER_WRITE,
                    dst_stages: vk::PipelineStageFlags::VERTEX_INPUT,
                    dst_accesses: vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                        | vk::AccessFlags::INDEX_READ,
                }),
                CmdCommand::SubmitRenderPass(SubmitRenderPass::new(vec![
                    RenderPassCommand::RenderBuffer(RenderBuffer::new(
                        PointProgram::VertexBuffer,
                    )),
                    RenderPassCommand::RenderBuffer(RenderBuffer::new(PointProgram::IndexBuffer)),
                ])),
            ]),
            Command::QueueWaitIdle(QueueWaitIdle),
        ]);

        let (failures, _) = run(&device, &memory, usage, &mut commands);

        assert!(failures.is_empty(), "{failures:?}");
    }

    #[test]
    fn ignored_fill_is_caught() {
        let device: Arc<dyn Device> = Arc::new(SoftDevice::new(SoftDeviceCreateInfo {
            defects: Defects {
                ignore_fill_buffer: true,
                ..Default::default()
            },
            ..Default::default()
        }));
        let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST | Usage::TRANSFER_SRC;
        let memory = Memory::new(&device, 1024, 1, 1024, [0, 0]).unwrap();

        let mut commands = buffer_commands();
        commands.extend([
            Command::Map(Map),
            Command::HostMemoryAccess(HostMemoryAccess::new(false, true, 1)),
            submit(vec![
                barrier(host_to_transfer()),
                CmdCommand::FillBuffer(FillBuffer::new(0)),
                barrier(transfer_to_transfer()),
                CmdCommand::BufferCopyToBuffer(BufferCopyToBuffer::default()),
            ]),
            Command::QueueWaitIdle(QueueWaitIdle),
            Command::Unmap(Unmap),
        ]);

        let (failures, _) = run(&device, &memory, usage, &mut commands);

        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("3:BufferCopyToBuffer"), "{failures:?}");
    }

    #[test]
    fn log_lines_are_indexed() {
        let command = submit(vec![
            CmdCommand::FillBuffer(FillBuffer::new(5)),
            CmdCommand::UpdateBuffer(UpdateBuffer::new(6)),
        ]);
        let mut log = TestLog::new();
        command.log_execute(&mut log, 4);

        let section = log.find_section("4:SubmitCommandBuffer").unwrap();
        assert_eq!(
            section,
            &[
                LogEntry::Message("0:FillBuffer Fill value: 5".to_owned()),
                LogEntry::Message("1:UpdateBuffer Update buffer, seed: 6".to_owned()),
            ],
        );
        assert_eq!(command.name(), "SubmitCommandBuffer");
    }
}
