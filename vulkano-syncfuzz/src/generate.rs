// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Generation of random command sequences.
//!
//! The generator walks the operation state machine: at every step it asks the [`State`] which
//! operations are legal, picks one, builds the command for it and applies it to the state.
//! Entering a command buffer or a render pass recurses into the next level, which returns when
//! its end operation is chosen.
//!
//! Picking operations and drawing their parameters use separate random streams. Operations are
//! picked by a ChaCha generator seeded once per test, while the parameters of every operation
//! come from a seed of its own, so a sequence can be rebuilt from the settings alone.

use crate::{
    command::{
        BarrierKind, BindBufferMemory, BindImageMemory, BufferCopyFromBuffer,
        BufferCopyFromImage, BufferCopyToBuffer, BufferCopyToImage, CmdCommand, Command,
        CreateBuffer, CreateImage, DestroyBuffer, DestroyImage, DeviceWaitIdle, FillBuffer, Flush,
        HostMemoryAccess, ImageBlitFromImage, ImageBlitToImage, ImageCopyFromBuffer,
        ImageCopyFromImage, ImageCopyToBuffer, ImageCopyToImage, ImageTransition, Invalidate, Map,
        PipelineBarrier, QueueWaitIdle, RenderBuffer, RenderPassCommand, SubmitCommandBuffer,
        SubmitRenderPass, Unmap, UpdateBuffer,
    },
    device::PointProgram,
    memory::{Memory, MemoryInfo},
    random::SeedSequence,
    state::{Op, OpParams, State},
    sync::BarrierMasks,
    usage::Usage,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Mixed into the base seed for the generator that picks operations.
const OP_CHOICE_SEED_MASK: u64 = 12930809;

/// Parameters of a generated sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenerateSettings {
    /// The number of operations to generate, not counting forced ends and cleanup.
    ///
    /// The default value is `100`.
    pub op_count: usize,

    /// The seed that the whole sequence is derived from.
    ///
    /// The default value is `2830980989`.
    pub seed: u64,
}

impl Default for GenerateSettings {
    #[inline]
    fn default() -> Self {
        GenerateSettings {
            op_count: 100,
            seed: 2830980989,
        }
    }
}

/// Generates a random command sequence for memory used as described by `usage`.
///
/// The sequence ends with all work waited for and the tested buffer or image destroyed.
pub fn create_commands(usage: Usage, memory: &Memory, settings: &GenerateSettings) -> Vec<Command> {
    let mut generator = Generator::new(usage, memory.info(), settings);
    let mut commands = Vec::with_capacity(settings.op_count);

    while let Some(op) = generator.next_op() {
        if op == Op::CommandBufferBegin {
            generator.apply(op, &OpParams::None);
            commands.push(Command::SubmitCommandBuffer(generator.create_cmd_commands()));
        } else {
            let params = generator.draw_params(op);
            commands.push(host_command(op, &params));
            generator.apply(op, &params);
        }
    }

    let state = &generator.state;

    if !state.is_queue_idle() {
        commands.push(Command::QueueWaitIdle(QueueWaitIdle));
    }

    if state.has_buffer() {
        commands.push(Command::DestroyBuffer(DestroyBuffer::default()));
    }

    if state.has_image() {
        commands.push(Command::DestroyImage(DestroyImage::default()));
    }

    tracing::debug!(
        usage = %usage,
        seed = settings.seed,
        command_count = commands.len(),
        "generated commands"
    );

    commands
}

struct Generator<'a> {
    usage: Usage,
    memory: &'a MemoryInfo,
    state: State,
    op_rng: ChaCha8Rng,
    seeds: SeedSequence,
    remaining: usize,
}

impl<'a> Generator<'a> {
    fn new(usage: Usage, memory: &'a MemoryInfo, settings: &GenerateSettings) -> Self {
        Generator {
            usage,
            memory,
            state: State::new(usage),
            op_rng: ChaCha8Rng::seed_from_u64(settings.seed ^ OP_CHOICE_SEED_MASK),
            seeds: SeedSequence::new(settings.seed),
            remaining: settings.op_count,
        }
    }

    /// Picks the next operation, or returns `None` once the operation budget is used up.
    fn next_op(&mut self) -> Option<Op> {
        if self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;

        let ops = self.state.available_ops(self.usage, self.memory);
        assert!(!ops.is_empty(), "no operation is available in {:?}", self.state);

        Some(ops[self.op_rng.gen_range(0..ops.len())])
    }

    /// Draws the parameters of `op` from a fresh seed, given the state before the operation.
    fn draw_params(&mut self, op: Op) -> OpParams {
        OpParams::draw(op, self.seeds.next_seed(), &self.state, self.usage)
    }

    fn apply(&mut self, op: Op, params: &OpParams) {
        self.state.apply_params(self.memory, op, params);
    }

    fn create_cmd_commands(&mut self) -> SubmitCommandBuffer {
        let mut commands = Vec::new();

        while let Some(op) = self.next_op() {
            match op {
                Op::CommandBufferEnd => break,
                Op::RenderPassBegin => {
                    self.apply(op, &OpParams::None);
                    let render_pass = self.create_render_pass_commands();
                    commands.push(CmdCommand::SubmitRenderPass(render_pass));
                }
                _ => {
                    let params = self.draw_params(op);
                    commands.push(cmd_command(op, &params, &self.state));
                    self.apply(op, &params);
                }
            }
        }

        self.apply(Op::CommandBufferEnd, &OpParams::None);

        SubmitCommandBuffer::new(commands)
    }

    fn create_render_pass_commands(&mut self) -> SubmitRenderPass {
        let mut commands = Vec::new();

        while let Some(op) = self.next_op() {
            if op == Op::RenderPassEnd {
                break;
            }

            let params = self.draw_params(op);
            commands.push(render_pass_command(op));
            self.apply(op, &params);
        }

        self.apply(Op::RenderPassEnd, &OpParams::None);

        SubmitRenderPass::new(commands)
    }
}

fn host_command(op: Op, params: &OpParams) -> Command {
    match op {
        Op::Map => Command::Map(Map),
        Op::Unmap => Command::Unmap(Unmap),
        Op::Flush => Command::Flush(Flush),
        Op::Invalidate => Command::Invalidate(Invalidate),
        Op::MapRead => {
            Command::HostMemoryAccess(HostMemoryAccess::new(true, false, params.value()))
        }
        Op::MapWrite => {
            Command::HostMemoryAccess(HostMemoryAccess::new(false, true, params.value()))
        }
        Op::MapModify => {
            Command::HostMemoryAccess(HostMemoryAccess::new(true, true, params.value()))
        }
        Op::CreateBuffer => Command::CreateBuffer(CreateBuffer),
        Op::DestroyBuffer => Command::DestroyBuffer(DestroyBuffer::default()),
        Op::BindBufferMemory => Command::BindBufferMemory(BindBufferMemory),
        Op::CreateImage => Command::CreateImage(CreateImage::default()),
        Op::DestroyImage => Command::DestroyImage(DestroyImage::default()),
        Op::BindImageMemory => Command::BindImageMemory(BindImageMemory),
        Op::QueueWaitIdle => Command::QueueWaitIdle(QueueWaitIdle),
        Op::DeviceWaitIdle => Command::DeviceWaitIdle(DeviceWaitIdle),
        _ => unreachable!("{op:?} is not a host operation"),
    }
}

fn barrier_masks(op: Op, params: &OpParams) -> BarrierMasks {
    match *params {
        OpParams::Barrier(masks) => masks,
        _ => unreachable!("{op:?} was drawn without barrier masks"),
    }
}

/// Builds the command for `op`. `state` is the state before the operation.
fn cmd_command(op: Op, params: &OpParams, state: &State) -> CmdCommand {
    let layout = state.image_layout();
    let value = params.value();

    match op {
        Op::PipelineBarrierGlobal => CmdCommand::PipelineBarrier(PipelineBarrier::new(
            BarrierKind::Global,
            barrier_masks(op, params),
        )),
        Op::PipelineBarrierBuffer => CmdCommand::PipelineBarrier(PipelineBarrier::new(
            BarrierKind::Buffer,
            barrier_masks(op, params),
        )),
        Op::PipelineBarrierImage => CmdCommand::PipelineBarrier(PipelineBarrier::new(
            BarrierKind::Image { layout },
            barrier_masks(op, params),
        )),
        Op::BufferFill => CmdCommand::FillBuffer(FillBuffer::new(value)),
        Op::BufferUpdate => CmdCommand::UpdateBuffer(UpdateBuffer::new(value)),
        Op::BufferCopyToBuffer => CmdCommand::BufferCopyToBuffer(BufferCopyToBuffer::default()),
        Op::BufferCopyFromBuffer => {
            CmdCommand::BufferCopyFromBuffer(BufferCopyFromBuffer::new(value))
        }
        Op::BufferCopyToImage => CmdCommand::BufferCopyToImage(BufferCopyToImage::default()),
        Op::BufferCopyFromImage => CmdCommand::BufferCopyFromImage(BufferCopyFromImage::new(value)),
        Op::ImageTransitionLayout => match *params {
            OpParams::Transition {
                src_layout,
                dst_layout,
                masks,
            } => CmdCommand::ImageTransition(ImageTransition::new(src_layout, dst_layout, masks)),
            _ => unreachable!("{op:?} was drawn without layouts"),
        },
        Op::ImageCopyToBuffer => CmdCommand::ImageCopyToBuffer(ImageCopyToBuffer::new(layout)),
        Op::ImageCopyFromBuffer => {
            CmdCommand::ImageCopyFromBuffer(ImageCopyFromBuffer::new(value, layout))
        }
        Op::ImageCopyToImage => CmdCommand::ImageCopyToImage(ImageCopyToImage::new(layout)),
        Op::ImageCopyFromImage => {
            CmdCommand::ImageCopyFromImage(ImageCopyFromImage::new(value, layout))
        }
        Op::ImageBlitToImage | Op::ImageBlitFromImage => {
            let OpParams::Blit { scale, seed } = *params else {
                unreachable!("{op:?} was drawn without a scale");
            };

            if op == Op::ImageBlitToImage {
                CmdCommand::ImageBlitToImage(ImageBlitToImage::new(scale, layout))
            } else {
                CmdCommand::ImageBlitFromImage(ImageBlitFromImage::new(scale, seed, layout))
            }
        }
        _ => unreachable!("{op:?} is not a command buffer operation"),
    }
}

fn render_pass_command(op: Op) -> RenderPassCommand {
    match op {
        Op::RenderVertexBuffer => {
            RenderPassCommand::RenderBuffer(RenderBuffer::new(PointProgram::VertexBuffer))
        }
        Op::RenderIndexBuffer => {
            RenderPassCommand::RenderBuffer(RenderBuffer::new(PointProgram::IndexBuffer))
        }
        _ => unreachable!("{op:?} is not a render pass operation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, SoftDevice, SoftDeviceCreateInfo};
    use std::sync::Arc;

    fn memory(size: u64, memory_type_index: u32, buffer: bool) -> Memory {
        let device: Arc<dyn Device> = Arc::new(SoftDevice::new(SoftDeviceCreateInfo::default()));
        let (max_buffer_size, max_image_extent) = if buffer {
            (size, [0, 0])
        } else {
            (0, [16, (size / 64) as u32])
        };

        Memory::new(&device, size, memory_type_index, max_buffer_size, max_image_extent).unwrap()
    }

    fn summary(commands: &[Command]) -> Vec<String> {
        fn cmd_summary(command: &CmdCommand) -> String {
            match command {
                CmdCommand::SubmitRenderPass(render_pass) => format!(
                    "SubmitRenderPass{:?}",
                    render_pass
                        .commands()
                        .iter()
                        .map(RenderPassCommand::name)
                        .collect::<Vec<_>>(),
                ),
                _ => command.name().to_owned(),
            }
        }

        commands
            .iter()
            .map(|command| match command {
                Command::SubmitCommandBuffer(submit) => format!(
                    "SubmitCommandBuffer{:?}",
                    submit.commands().iter().map(cmd_summary).collect::<Vec<_>>(),
                ),
                _ => command.name().to_owned(),
            })
            .collect()
    }

    #[test]
    fn same_settings_same_sequence() {
        let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST | Usage::TRANSFER_SRC;
        let memory = memory(1024, 1, true);
        let settings = GenerateSettings::default();

        let a = create_commands(usage, &memory, &settings);
        let b = create_commands(usage, &memory, &settings);
        assert_eq!(summary(&a), summary(&b));
        assert_eq!(format!("{a:?}"), format!("{b:?}"));

        let c = create_commands(
            usage,
            &memory,
            &GenerateSettings {
                seed: 1,
                ..settings
            },
        );
        assert_ne!(format!("{a:?}"), format!("{c:?}"));
    }

    #[test]
    fn sequences_end_clean() {
        for (usage, buffer) in [
            (Usage::HOST_WRITE | Usage::HOST_READ, true),
            (Usage::HOST_WRITE | Usage::TRANSFER_DST | Usage::VERTEX_BUFFER, true),
            (Usage::TRANSFER_SRC | Usage::TRANSFER_DST, false),
        ] {
            for seed in 0..16 {
                let memory = memory(4096, 1, buffer);
                let settings = GenerateSettings { op_count: 60, seed };
                let commands = create_commands(usage, &memory, &settings);

                let creates = commands
                    .iter()
                    .filter(|c| matches!(c, Command::CreateBuffer(_) | Command::CreateImage(_)))
                    .count();
                let destroys = commands
                    .iter()
                    .filter(|c| matches!(c, Command::DestroyBuffer(_) | Command::DestroyImage(_)))
                    .count();
                assert_eq!(creates, destroys, "{:?}", summary(&commands));

                // Every command buffer ends up submitted and waited for.
                let last_submit = commands
                    .iter()
                    .rposition(|c| matches!(c, Command::SubmitCommandBuffer(_)));
                let last_wait = commands.iter().rposition(|c| {
                    matches!(c, Command::QueueWaitIdle(_) | Command::DeviceWaitIdle(_))
                });
                assert!(last_submit <= last_wait, "{:?}", summary(&commands));
            }
        }
    }

    #[test]
    fn op_budget_is_respected() {
        let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST;
        let memory = memory(1024, 1, true);

        fn count(commands: &[Command]) -> usize {
            commands
                .iter()
                .map(|command| match command {
                    Command::SubmitCommandBuffer(submit) => {
                        1 + submit
                            .commands()
                            .iter()
                            .map(|command| match command {
                                CmdCommand::SubmitRenderPass(render_pass) => {
                                    1 + render_pass.commands().len()
                                }
                                _ => 1,
                            })
                            .sum::<usize>()
                    }
                    _ => 1,
                })
                .sum()
        }

        let commands = create_commands(
            usage,
            &memory,
            &GenerateSettings {
                op_count: 10,
                seed: 7,
            },
        );
        // Cleanup adds at most a wait and a destroy.
        assert!(count(&commands) <= 12, "{:?}", summary(&commands));

        assert!(create_commands(
            usage,
            &memory,
            &GenerateSettings {
                op_count: 0,
                seed: 7,
            },
        )
        .is_empty());
    }
}
