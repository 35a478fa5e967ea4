// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Runs generated tests against the software device.

use ash::vk;
use std::sync::Arc;
use vulkano_syncfuzz::{
    command::{
        context::Context, BarrierKind, BindBufferMemory, CmdCommand, Command, CreateBuffer,
        FillBuffer, Flush, HostMemoryAccess, Invalidate, Map, PipelineBarrier, QueueWaitIdle,
        SubmitCommandBuffer, Unmap,
    },
    create_commands,
    device::{Defects, Device, SoftDevice, SoftDeviceCreateInfo},
    memory::Memory,
    random::random_bytes,
    sync::BarrierMasks,
    test_cases, test_commands, GenerateSettings, MemoryTestInstance, ResultCollector,
    TestConfig, TestLog, TestStatus, Usage,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

fn soft_device(defects: Defects) -> Arc<dyn Device> {
    Arc::new(SoftDevice::new(SoftDeviceCreateInfo {
        defects,
        ..Default::default()
    }))
}

fn run(device: Arc<dyn Device>, config: TestConfig, settings: GenerateSettings) -> TestStatus {
    let mut instance = MemoryTestInstance::new(device, config, settings);
    let status = instance.run();

    if let TestStatus::Fail(_) = status {
        eprintln!("{:#?}", instance.log());
    }

    status
}

fn submit(commands: Vec<CmdCommand>) -> Command {
    Command::SubmitCommandBuffer(SubmitCommandBuffer::new(commands))
}

fn barrier(
    src_stages: vk::PipelineStageFlags,
    src_accesses: vk::AccessFlags,
    dst_stages: vk::PipelineStageFlags,
    dst_accesses: vk::AccessFlags,
) -> CmdCommand {
    CmdCommand::PipelineBarrier(PipelineBarrier::new(
        BarrierKind::Buffer,
        BarrierMasks {
            src_stages,
            src_accesses,
            dst_stages,
            dst_accesses,
        },
    ))
}

#[test]
fn generated_sequences_pass() {
    init_tracing();

    for case in test_cases()
        .into_iter()
        .filter(|case| case.config.size <= 64 * 1024)
    {
        let status = run(
            soft_device(Defects::default()),
            case.config,
            GenerateSettings::default(),
        );

        assert_eq!(
            status,
            TestStatus::Pass,
            "{}.{} failed",
            case.group,
            case.name,
        );
    }
}

#[test]
fn largest_size_with_every_usage() {
    init_tracing();

    let case = test_cases()
        .into_iter()
        .find(|case| case.group == "all" && case.config.size == 1024 * 1024)
        .unwrap();
    let settings = GenerateSettings {
        op_count: 40,
        seed: 7,
    };

    assert_eq!(
        run(soft_device(Defects::default()), case.config, settings),
        TestStatus::Pass,
    );
}

#[test]
fn other_seeds_pass() {
    init_tracing();

    let config = TestConfig {
        usage: Usage::HOST_READ | Usage::HOST_WRITE | Usage::TRANSFER_SRC | Usage::TRANSFER_DST,
        size: 4096,
        sharing: vk::SharingMode::EXCLUSIVE,
    };

    for seed in 0..16 {
        let settings = GenerateSettings { op_count: 60, seed };

        assert_eq!(
            run(soft_device(Defects::default()), config, settings),
            TestStatus::Pass,
            "seed {seed} failed",
        );
    }
}

#[test]
fn same_seed_replays_the_same_test() {
    init_tracing();

    let config = TestConfig {
        usage: Usage::HOST_WRITE | Usage::TRANSFER_DST | Usage::VERTEX_BUFFER,
        size: 8192,
        sharing: vk::SharingMode::EXCLUSIVE,
    };
    let settings = GenerateSettings {
        op_count: 50,
        seed: 99,
    };

    let device = soft_device(Defects::default());
    let memory = Memory::new(&device, 8192, 1, 8192, [0, 0]).unwrap();
    let first = create_commands(config.usage, &memory, &settings);
    let second = create_commands(config.usage, &memory, &settings);
    assert_eq!(format!("{first:?}"), format!("{second:?}"));

    let mut first = MemoryTestInstance::new(soft_device(Defects::default()), config, settings);
    let mut second = MemoryTestInstance::new(soft_device(Defects::default()), config, settings);
    assert_eq!(first.run(), second.run());
    assert_eq!(first.log(), second.log());
}

#[test]
fn host_write_then_fill() {
    init_tracing();

    let device = soft_device(Defects::default());
    let usage = Usage::HOST_WRITE | Usage::TRANSFER_DST;
    let memory = Memory::new(&device, 1024, 1, 1024, [0, 0]).unwrap();
    let context = Context::new(&device, &memory, usage, vk::SharingMode::EXCLUSIVE);

    let mut commands = vec![
        Command::CreateBuffer(CreateBuffer),
        Command::BindBufferMemory(BindBufferMemory),
        Command::Map(Map),
        Command::HostMemoryAccess(HostMemoryAccess::new(false, true, 1)),
        Command::Unmap(Unmap),
        submit(vec![
            barrier(
                vk::PipelineStageFlags::HOST,
                vk::AccessFlags::HOST_WRITE,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            CmdCommand::FillBuffer(FillBuffer::new(0x0403_0201)),
        ]),
        Command::QueueWaitIdle(QueueWaitIdle),
    ];

    let mut log = TestLog::new();
    let mut results = ResultCollector::new();
    let reference = test_commands(&mut log, &mut results, context, &mut commands).unwrap();

    assert!(results.is_ok(), "{:?}", results.failures());
    assert!(log.contains_message("Begin verify"));
    assert_eq!(reference.len(), 1024);
    assert!((0..1024).all(|pos| reference.get(pos) == Some(pos as u8 % 4 + 1)));
}

#[test]
fn fill_keeps_the_unaligned_tail() {
    init_tracing();

    let device = soft_device(Defects::default());
    let usage = Usage::HOST_READ | Usage::HOST_WRITE | Usage::TRANSFER_DST;
    // Fills cover whole words only, so the last two bytes of the buffer keep the host data.
    let memory = Memory::new(&device, 1024, 1, 1022, [0, 0]).unwrap();
    let context = Context::new(&device, &memory, usage, vk::SharingMode::EXCLUSIVE);

    let mut commands = vec![
        Command::CreateBuffer(CreateBuffer),
        Command::BindBufferMemory(BindBufferMemory),
        Command::Map(Map),
        Command::HostMemoryAccess(HostMemoryAccess::new(false, true, 1)),
        submit(vec![
            barrier(
                vk::PipelineStageFlags::HOST,
                vk::AccessFlags::HOST_WRITE,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            CmdCommand::FillBuffer(FillBuffer::new(0x0403_0201)),
            barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::HOST,
                vk::AccessFlags::HOST_READ,
            ),
        ]),
        Command::QueueWaitIdle(QueueWaitIdle),
        Command::HostMemoryAccess(HostMemoryAccess::new(true, false, 2)),
        Command::Unmap(Unmap),
    ];

    let mut log = TestLog::new();
    let mut results = ResultCollector::new();
    let reference = test_commands(&mut log, &mut results, context, &mut commands).unwrap();

    assert!(results.is_ok(), "{:?}", results.failures());

    let host_data = random_bytes(1, 1022);
    assert!((0..1020).all(|pos| reference.get(pos) == Some(pos as u8 % 4 + 1)));
    assert_eq!(reference.get(1020), Some(host_data[1020]));
    assert_eq!(reference.get(1021), Some(host_data[1021]));
}

#[test]
fn ignored_invalidate_is_caught() {
    init_tracing();

    for ignore_invalidate in [false, true] {
        let device = soft_device(Defects {
            ignore_invalidate,
            ..Default::default()
        });
        let usage = Usage::HOST_READ | Usage::HOST_WRITE | Usage::TRANSFER_DST;
        // The host-cached memory type, which isn't coherent.
        let memory = Memory::new(&device, 1024, 2, 1024, [0, 0]).unwrap();
        let context = Context::new(&device, &memory, usage, vk::SharingMode::EXCLUSIVE);

        let mut commands = vec![
            Command::CreateBuffer(CreateBuffer),
            Command::BindBufferMemory(BindBufferMemory),
            Command::Map(Map),
            Command::HostMemoryAccess(HostMemoryAccess::new(false, true, 1)),
            Command::Flush(Flush),
            submit(vec![
                barrier(
                    vk::PipelineStageFlags::HOST,
                    vk::AccessFlags::HOST_WRITE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
                CmdCommand::FillBuffer(FillBuffer::new(0x0403_0201)),
                barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::PipelineStageFlags::HOST,
                    vk::AccessFlags::HOST_READ,
                ),
            ]),
            Command::QueueWaitIdle(QueueWaitIdle),
            Command::Invalidate(Invalidate),
            Command::HostMemoryAccess(HostMemoryAccess::new(true, false, 2)),
            Command::Unmap(Unmap),
        ];

        let mut log = TestLog::new();
        let mut results = ResultCollector::new();
        test_commands(&mut log, &mut results, context, &mut commands).unwrap();

        if ignore_invalidate {
            assert_eq!(results.failures().len(), 1, "{:?}", results.failures());
            assert!(results.failures()[0].starts_with("8:HostMemoryAccess"));
        } else {
            assert!(results.is_ok(), "{:?}", results.failures());
        }
    }
}

#[test]
fn ignored_fills_fail_generated_tests() {
    init_tracing();

    let config = TestConfig {
        usage: Usage::HOST_READ | Usage::TRANSFER_DST,
        size: 1024,
        sharing: vk::SharingMode::EXCLUSIVE,
    };
    let defects = Defects {
        ignore_fill_buffer: true,
        ..Default::default()
    };

    // A generated test only notices if a fill is followed by a read, so try a few seeds.
    let failed = (0..32).any(|seed| {
        let settings = GenerateSettings {
            op_count: 100,
            seed,
        };

        matches!(run(soft_device(defects), config, settings), TestStatus::Fail(_))
    });

    assert!(failed);
}

#[test]
fn ignored_barriers_fail_generated_tests() {
    init_tracing();

    let config = TestConfig {
        usage: Usage::TRANSFER_SRC | Usage::TRANSFER_DST,
        size: 1024,
        sharing: vk::SharingMode::EXCLUSIVE,
    };
    let defects = Defects {
        ignore_barriers: true,
        ..Default::default()
    };

    // Only a device write followed by a device read in the same command buffer is affected.
    let failed = (0..32).any(|seed| {
        let settings = GenerateSettings {
            op_count: 100,
            seed,
        };

        matches!(run(soft_device(defects), config, settings), TestStatus::Fail(_))
    });

    assert!(failed);
}
