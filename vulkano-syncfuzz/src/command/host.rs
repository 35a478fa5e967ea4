// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Commands performed by the host.

use super::{
    context::{ExecuteContext, PrepareContext, SubmitContext, VerifyContext},
    CmdCommand,
};
use crate::{
    device::{
        Buffer, BufferCreateInfo, CommandBuffer, DeviceError, Image, ImageCreateInfo,
        RecordingCommandBuffer,
    },
    log::TestLog,
    random::random_bytes,
    reference::ReferenceImage,
};

#[derive(Debug, Default)]
pub struct Map;

impl Map {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:Map Map memory"));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        context.memory().map()?;
        context.set_mapped(true);

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Unmap;

impl Unmap {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:Unmap Unmap memory"));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        context.memory().unmap()?;
        context.set_mapped(false);

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Flush;

impl Flush {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:Flush Flush mapped memory"));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        context.memory().flush()
    }
}

#[derive(Debug, Default)]
pub struct Invalidate;

impl Invalidate {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:Invalidate Invalidate mapped memory"));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        context.memory().invalidate()
    }
}

/// Reads, writes or modifies the whole mapped memory.
///
/// Written bytes are generated from the seed. A modification XORs every byte with a generated
/// mask.
#[derive(Debug)]
pub struct HostMemoryAccess {
    read: bool,
    write: bool,
    seed: u32,
    read_data: Vec<u8>,
}

impl HostMemoryAccess {
    /// # Panics
    ///
    /// - Panics if neither `read` nor `write` is set.
    pub fn new(read: bool, write: bool, seed: u32) -> Self {
        assert!(read || write, "host memory access without read or write");

        HostMemoryAccess {
            read,
            write,
            seed,
            read_data: Vec::new(),
        }
    }

    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!(
            "{index}:HostMemoryAccess Host memory access:{}{}, seed: {}",
            if self.read { " read" } else { "" },
            if self.write { " write" } else { "" },
            self.seed,
        ));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        let memory = context.memory();
        let size = memory.size() as usize;

        if self.read {
            self.read_data = vec![0; size];
            memory.read(0, &mut self.read_data)?;
        }

        if self.write {
            let mut data = random_bytes(self.seed, size);

            if self.read {
                for (byte, &value) in data.iter_mut().zip(&self.read_data) {
                    *byte ^= value;
                }
            }

            memory.write(0, &data)?;
        }

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>, index: usize) {
        let random = random_bytes(self.seed, context.reference().len());

        if self.read {
            if let Some(mismatch) = context.reference().first_mismatch(&self.read_data) {
                context.fail(mismatch.describe(index, "HostMemoryAccess"));
            }
        }

        let reference = context.reference_mut();

        match (self.read, self.write) {
            (true, true) => {
                for (pos, &mask) in random.iter().enumerate() {
                    if let Some(value) = reference.get(pos) {
                        reference.set(pos, value ^ mask);
                    }
                }
            }
            (false, true) => reference.set_data(0, &random),
            _ => {}
        }
    }
}

/// Creates the tested buffer, as large as the memory allows.
#[derive(Debug, Default)]
pub struct CreateBuffer;

impl CreateBuffer {
    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:CreateBuffer Create buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        let create_info = BufferCreateInfo {
            size: context.memory().info().max_buffer_size,
            usage: context.context().usage().buffer_usage(),
            sharing_mode: context.context().sharing_mode(),
        };
        tracing::debug!(?create_info, "creating the tested buffer");

        let buffer = Buffer::new(context.context().device().clone(), &create_info)?;
        context.set_buffer(buffer);

        Ok(())
    }
}

/// Destroys the tested buffer.
#[derive(Debug, Default)]
pub struct DestroyBuffer {
    buffer: Option<Buffer>,
}

impl DestroyBuffer {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:DestroyBuffer Destroy buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.buffer = Some(context.release_buffer()?);

        Ok(())
    }

    pub(super) fn execute(&mut self, _context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        let buffer = self.buffer.take().ok_or(DeviceError::InvalidHandle)?;
        drop(buffer);

        Ok(())
    }
}

/// Binds the tested buffer to the start of the tested memory.
#[derive(Debug, Default)]
pub struct BindBufferMemory;

impl BindBufferMemory {
    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:BindBufferMemory Bind memory to buffer"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        context.buffer()?.bind_memory(context.memory().memory(), 0)
    }
}

/// Creates the tested image, as large as the memory allows.
#[derive(Debug, Default)]
pub struct CreateImage {
    extent: [u32; 2],
}

impl CreateImage {
    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:CreateImage Create image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        let create_info = ImageCreateInfo {
            sharing_mode: context.context().sharing_mode(),
            ..ImageCreateInfo::rgba8(
                context.memory().info().max_image_extent,
                context.context().usage().image_usage(),
            )
        };
        tracing::debug!(?create_info, "creating the tested image");

        let image = Image::new(context.context().device().clone(), &create_info)?;
        let requirements = image.memory_requirements()?;
        self.extent = image.extent();
        context.set_image(image, requirements.size);

        Ok(())
    }

    pub(super) fn verify(&mut self, context: &mut VerifyContext<'_>) {
        let [width, height] = self.extent;
        context.set_reference_image(ReferenceImage::new(width, height));
    }
}

/// Destroys the tested image.
#[derive(Debug, Default)]
pub struct DestroyImage {
    image: Option<Image>,
}

impl DestroyImage {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:DestroyImage Destroy image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        self.image = Some(context.release_image()?);

        Ok(())
    }

    pub(super) fn execute(&mut self, _context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        let image = self.image.take().ok_or(DeviceError::InvalidHandle)?;
        drop(image);

        Ok(())
    }
}

/// Binds the tested image to the start of the tested memory.
#[derive(Debug, Default)]
pub struct BindImageMemory;

impl BindImageMemory {
    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:BindImageMemory Bind memory to image"));
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        context.image()?.bind_memory(context.memory().memory(), 0)
    }
}

#[derive(Debug, Default)]
pub struct QueueWaitIdle;

impl QueueWaitIdle {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:QueueWaitIdle Queue wait idle"));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        context.context().device().queue_wait_idle()
    }
}

#[derive(Debug, Default)]
pub struct DeviceWaitIdle;

impl DeviceWaitIdle {
    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.message(format!("{index}:DeviceWaitIdle Device wait idle"));
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        context.context().device().device_wait_idle()
    }
}

/// Records the nested commands into a command buffer while preparing, and submits it when
/// executed.
#[derive(Debug)]
pub struct SubmitCommandBuffer {
    commands: Vec<CmdCommand>,
    command_buffer: Option<CommandBuffer>,
}

impl SubmitCommandBuffer {
    #[inline]
    pub fn new(commands: Vec<CmdCommand>) -> Self {
        SubmitCommandBuffer {
            commands,
            command_buffer: None,
        }
    }

    #[inline]
    pub fn commands(&self) -> &[CmdCommand] {
        &self.commands
    }

    pub(super) fn log_prepare(&self, log: &mut TestLog, index: usize) {
        log.section(format!("{index}:SubmitCommandBuffer"), |log| {
            for (index, command) in self.commands.iter().enumerate() {
                command.log_prepare(log, index);
            }
        });
    }

    pub(super) fn log_execute(&self, log: &mut TestLog, index: usize) {
        log.section(format!("{index}:SubmitCommandBuffer"), |log| {
            for (index, command) in self.commands.iter().enumerate() {
                command.log_submit(log, index);
            }
        });
    }

    pub(super) fn prepare(&mut self, context: &mut PrepareContext<'_>) -> Result<(), DeviceError> {
        for command in &mut self.commands {
            command.prepare(context)?;
        }

        let mut builder = RecordingCommandBuffer::new();
        let mut submit_context = SubmitContext::new(context, &mut builder);

        for command in &mut self.commands {
            command.submit(&mut submit_context)?;
        }

        self.command_buffer = Some(builder.end());

        Ok(())
    }

    pub(super) fn execute(&mut self, context: &mut ExecuteContext<'_>) -> Result<(), DeviceError> {
        let command_buffer = self
            .command_buffer
            .as_ref()
            .ok_or(DeviceError::InvalidHandle)?;

        context.context().device().queue_submit(command_buffer)
    }

    pub(super) fn verify(
        &mut self,
        context: &mut VerifyContext<'_>,
        index: usize,
    ) -> Result<(), DeviceError> {
        context.section(format!("{index}:SubmitCommandBuffer"), |context| {
            self.commands
                .iter_mut()
                .enumerate()
                .try_for_each(|(index, command)| command.verify(context, index))
        })
    }
}
