// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Running generated tests against a device, one memory type at a time.

use crate::{
    command::{
        context::{Context, ExecuteContext, PrepareContext, VerifyContext},
        Command,
    },
    device::{Device, DeviceError, DeviceSize},
    generate::{create_commands, GenerateSettings},
    log::TestLog,
    memory::{find_max_buffer_size, find_max_rgba8_image_size, round_buffer_size_to_wxhx4, Memory},
    reference::ReferenceMemory,
    usage::Usage,
};
use ash::vk;
use std::{error::Error, fmt, sync::Arc};

/// The sizes of memory that every usage group is tested with.
pub const TEST_SIZES: [DeviceSize; 4] = [1024, 8 * 1024, 64 * 1024, 1024 * 1024];

/// The configuration of one test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestConfig {
    /// How the memory is used.
    pub usage: Usage,

    /// The size of the tested memory allocation.
    pub size: DeviceSize,

    #[cfg_attr(feature = "serde", serde(with = "sharing_mode_serde"))]
    pub sharing: vk::SharingMode,
}

#[cfg(feature = "serde")]
mod sharing_mode_serde {
    use ash::vk;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S: Serializer>(
        sharing: &vk::SharingMode,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(sharing.as_raw())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<vk::SharingMode, D::Error> {
        i32::deserialize(deserializer).map(vk::SharingMode::from_raw)
    }
}

/// A named test case of the test matrix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    /// The name of the usage group, for example `host_write_transfer_src` or `all`.
    pub group: String,
    /// The name of the case within the group, which is the memory size.
    pub name: String,
    pub config: TestConfig,
}

/// Returns the whole test matrix: every written usage combined with every read usage, then
/// all usages together, with and without host access, each at every size of [`TEST_SIZES`].
pub fn test_cases() -> Vec<TestCase> {
    const WRITE_USAGES: [Usage; 2] = [Usage::HOST_WRITE, Usage::TRANSFER_DST];
    const READ_USAGES: [Usage; 4] = [
        Usage::HOST_READ,
        Usage::TRANSFER_SRC,
        Usage::VERTEX_BUFFER,
        Usage::INDEX_BUFFER,
    ];

    let all = WRITE_USAGES
        .into_iter()
        .chain(READ_USAGES)
        .fold(Usage::empty(), |all, usage| all | usage);
    let all_device = all.difference(Usage::HOST_READ | Usage::HOST_WRITE);

    let groups = WRITE_USAGES
        .into_iter()
        .flat_map(|write| READ_USAGES.into_iter().map(move |read| write | read))
        .map(|usage| (usage.to_string(), usage))
        .chain([
            ("all".to_owned(), all),
            ("all_device".to_owned(), all_device),
        ]);

    groups
        .flat_map(|(group, usage)| {
            TEST_SIZES.into_iter().map(move |size| TestCase {
                group: group.clone(),
                name: size.to_string(),
                config: TestConfig {
                    usage,
                    size,
                    sharing: vk::SharingMode::EXCLUSIVE,
                },
            })
        })
        .collect()
}

/// The outcome of a test, or of one step of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    /// Holds the first failure.
    Fail(String),
    /// More steps remain.
    Incomplete,
    NotSupported(String),
}

/// Accumulates failures without stopping the test.
#[derive(Debug, Default)]
pub struct ResultCollector {
    failures: Vec<String>,
}

impl ResultCollector {
    #[inline]
    pub fn new() -> Self {
        ResultCollector::default()
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "test failure");
        self.failures.push(message);
    }

    #[inline]
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns `Pass`, or `Fail` with the first failure.
    pub fn status(&self) -> TestStatus {
        match self.failures.first() {
            None => TestStatus::Pass,
            Some(message) => TestStatus::Fail(message.clone()),
        }
    }
}

/// The part of a test run that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Allocate,
    Prepare,
    Execute,
    Verify,
}

/// A device error that stopped a test run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunError {
    pub phase: RunPhase,
    /// The index and name of the failing top-level command, if a command failed.
    pub command: Option<(usize, &'static str)>,
    pub error: DeviceError,
}

impl RunError {
    fn command(phase: RunPhase, index: usize, command: &Command, error: DeviceError) -> Self {
        RunError {
            phase,
            command: Some((index, command.name())),
            error,
        }
    }

    /// Returns the description of the failure without its cause.
    pub fn summary(&self) -> String {
        let what = match self.phase {
            RunPhase::Allocate => "failed to allocate the tested memory",
            RunPhase::Prepare => "failed to prepare for execution",
            RunPhase::Execute => "failed to execute",
            RunPhase::Verify => "failed verification",
        };

        match self.command {
            Some((index, name)) => format!("{index}:{name} {what}"),
            None => what.to_owned(),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.summary(), self.error)
    }
}

/// Prepares, executes and verifies `commands`, and returns the final reference memory.
///
/// Mismatches found while verifying are recorded in `results` and don't stop the run. Device
/// errors are recorded as well, and then returned.
pub fn test_commands(
    log: &mut TestLog,
    results: &mut ResultCollector,
    context: Context<'_>,
    commands: &mut [Command],
) -> Result<ReferenceMemory, RunError> {
    log.section("LogPrepare", |log| {
        for (index, command) in commands.iter().enumerate() {
            command.log_prepare(log, index);
        }
    });

    log.section("LogExecute", |log| {
        for (index, command) in commands.iter().enumerate() {
            command.log_execute(log, index);
        }
    });

    // Holds the tested buffer or image, which must outlive the submitted work.
    let prepare_context = log.section("Prepare", |log| -> Result<_, RunError> {
        let mut prepare_context = PrepareContext::new(context);
        log.message("Begin prepare");

        for (index, command) in commands.iter_mut().enumerate() {
            command.prepare(&mut prepare_context).map_err(|error| {
                record(results, RunError::command(RunPhase::Prepare, index, command, error))
            })?;
        }

        Ok(prepare_context)
    })?;

    log.section("Execute", |log| -> Result<_, RunError> {
        let mut execute_context = ExecuteContext::new(context);
        log.message("Begin execution");

        for (index, command) in commands.iter_mut().enumerate() {
            let _span = tracing::debug_span!("execute", index, name = command.name()).entered();

            command.execute(&mut execute_context).map_err(|error| {
                record(results, RunError::command(RunPhase::Execute, index, command, error))
            })?;
        }

        context.device().device_wait_idle().map_err(|error| {
            record(
                results,
                RunError {
                    phase: RunPhase::Execute,
                    command: None,
                    error,
                },
            )
        })
    })?;

    drop(prepare_context);

    log.section("Verify", |log| {
        let mut verify_context = VerifyContext::new(context, log, results);
        verify_context.log().message("Begin verify");

        for (index, command) in commands.iter_mut().enumerate() {
            if let Err(error) = command.verify(&mut verify_context, index) {
                let error = RunError::command(RunPhase::Verify, index, command, error);
                verify_context.fail(error.summary());

                return Err(error);
            }
        }

        Ok(verify_context.into_reference())
    })
}

fn record(results: &mut ResultCollector, error: RunError) -> RunError {
    results.fail(error.summary());

    error
}

/// Runs one test case on every memory type of a device.
#[derive(Debug)]
pub struct MemoryTestInstance {
    device: Arc<dyn Device>,
    config: TestConfig,
    settings: GenerateSettings,
    memory_type_index: u32,
    log: TestLog,
    results: ResultCollector,
}

impl MemoryTestInstance {
    pub fn new(device: Arc<dyn Device>, config: TestConfig, settings: GenerateSettings) -> Self {
        let mut log = TestLog::new();

        log.section("TestCaseInfo", |log| {
            log.message(format!("Buffer size: {}", config.size));
            log.message(format!("Sharing: {:?}", config.sharing));
            log.message(format!("Access: {:?}", config.usage));
        });

        log.section("MemoryProperties", |log| {
            for (index, heap) in device.memory_heaps().iter().enumerate() {
                log.section(format!("Heap{index}"), |log| {
                    log.message(format!("Size: {}", heap.size));
                    log.message(format!("Flags: {:?}", heap.flags));
                });
            }

            for (index, memory_type) in device.memory_types().iter().enumerate() {
                log.section(format!("Type{index}"), |log| {
                    log.message(format!("Properties: {:?}", memory_type.property_flags));
                    log.message(format!("Heap: {}", memory_type.heap_index));
                });
            }
        });

        MemoryTestInstance {
            device,
            config,
            settings,
            memory_type_index: 0,
            log,
            results: ResultCollector::new(),
        }
    }

    #[inline]
    pub fn log(&self) -> &TestLog {
        &self.log
    }

    #[inline]
    pub fn results(&self) -> &ResultCollector {
        &self.results
    }

    /// Tests the next memory type. Returns [`TestStatus::Incomplete`] until every memory type
    /// has been tested, and then the overall result.
    pub fn iterate(&mut self) -> TestStatus {
        let usage = self.config.usage;

        if usage.intersects(Usage::VERTEX_BUFFER | Usage::INDEX_BUFFER)
            && !self.device.queue_flags().contains(vk::QueueFlags::GRAPHICS)
        {
            return TestStatus::NotSupported(
                "vertex and index buffer usage requires a graphics queue".to_owned(),
            );
        }

        let memory_type_index = self.memory_type_index;

        if memory_type_index as usize >= self.device.memory_types().len() {
            return self.results.status();
        }

        let _span = tracing::info_span!("memory_type", index = memory_type_index).entered();
        let device = &self.device;
        let config = &self.config;
        let settings = &self.settings;
        let results = &mut self.results;

        self.log
            .section(format!("MemoryType{memory_type_index}"), |log| {
                test_memory_type(device, config, settings, memory_type_index, log, results)
            });

        self.memory_type_index += 1;

        TestStatus::Incomplete
    }

    /// Calls [`iterate`](Self::iterate) until it returns a final status.
    pub fn run(&mut self) -> TestStatus {
        loop {
            match self.iterate() {
                TestStatus::Incomplete => {}
                status => return status,
            }
        }
    }
}

fn test_memory_type(
    device: &Arc<dyn Device>,
    config: &TestConfig,
    settings: &GenerateSettings,
    memory_type_index: u32,
    log: &mut TestLog,
    results: &mut ResultCollector,
) {
    let usage = config.usage;
    let host_usage = usage.intersects(Usage::HOST_READ | Usage::HOST_WRITE);
    let memory_type = device.memory_types()[memory_type_index as usize];

    if host_usage
        && !memory_type
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    {
        log.message("Memory type not supported");

        return;
    }

    let buffer_usage = usage.buffer_usage();
    let image_usage = usage.image_usage();
    let max_buffer_size = if buffer_usage.is_empty() {
        0
    } else {
        round_buffer_size_to_wxhx4(find_max_buffer_size(
            device,
            buffer_usage,
            config.sharing,
            config.size,
            memory_type_index,
        ))
    };
    let max_image_extent = if image_usage.is_empty() {
        [0, 0]
    } else {
        find_max_rgba8_image_size(
            device,
            image_usage,
            config.sharing,
            config.size,
            memory_type_index,
        )
    };

    log.message(format!("Max buffer size: {max_buffer_size}"));
    log.message(format!(
        "Max RGBA8 image size: {}x{}",
        max_image_extent[0], max_image_extent[1],
    ));

    if max_buffer_size == 0 && max_image_extent[0] == 0 && !host_usage {
        log.message("Skipping memory type. None of the usages are supported.");

        return;
    }

    let memory = match Memory::new(
        device,
        config.size,
        memory_type_index,
        max_buffer_size,
        max_image_extent,
    ) {
        Ok(memory) => memory,
        Err(error) => {
            let error = RunError {
                phase: RunPhase::Allocate,
                command: None,
                error,
            };
            results.fail(format!("Failed, got exception: {error}"));

            return;
        }
    };

    log.message("Create commands");
    let mut commands = create_commands(usage, &memory, settings);
    let context = Context::new(device, &memory, usage, config.sharing);

    if let Err(error) = test_commands(log, results, context, &mut commands) {
        results.fail(format!("Failed, got exception: {error}"));

        // Work may still be queued that uses the objects about to be destroyed.
        if let Err(error) = device.device_wait_idle() {
            tracing::warn!(%error, "failed to wait for the device after a failed run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{SoftDevice, SoftDeviceCreateInfo},
        log::LogEntry,
    };

    fn device(create_info: SoftDeviceCreateInfo) -> Arc<dyn Device> {
        Arc::new(SoftDevice::new(create_info))
    }

    fn config(usage: Usage, size: DeviceSize) -> TestConfig {
        TestConfig {
            usage,
            size,
            sharing: vk::SharingMode::EXCLUSIVE,
        }
    }

    #[test]
    fn matrix_has_every_group_and_size() {
        let cases = test_cases();
        assert_eq!(cases.len(), 40);

        let groups: Vec<_> = cases
            .chunks(TEST_SIZES.len())
            .map(|chunk| chunk[0].group.as_str())
            .collect();
        assert_eq!(
            groups,
            [
                "host_read_host_write",
                "host_write_transfer_src",
                "host_write_vertex_buffer",
                "host_write_index_buffer",
                "host_read_transfer_dst",
                "transfer_src_transfer_dst",
                "transfer_dst_vertex_buffer",
                "transfer_dst_index_buffer",
                "all",
                "all_device",
            ],
        );

        let names: Vec<_> = cases[..4].iter().map(|case| case.name.as_str()).collect();
        assert_eq!(names, ["1024", "8192", "65536", "1048576"]);

        let all_device = &cases.last().unwrap().config;
        assert!(!all_device
            .usage
            .intersects(Usage::HOST_READ | Usage::HOST_WRITE));
        assert!(all_device.usage.contains(Usage::VERTEX_BUFFER | Usage::TRANSFER_SRC));
        assert!(cases
            .iter()
            .all(|case| case.config.sharing == vk::SharingMode::EXCLUSIVE));
    }

    #[test]
    fn collector_reports_first_failure() {
        let mut results = ResultCollector::new();
        assert_eq!(results.status(), TestStatus::Pass);

        results.fail("first");
        results.fail("second");
        assert!(!results.is_ok());
        assert_eq!(results.failures().len(), 2);
        assert_eq!(results.status(), TestStatus::Fail("first".to_owned()));
    }

    #[test]
    fn run_error_names_the_command() {
        let error = RunError {
            phase: RunPhase::Execute,
            command: Some((3, "SubmitCommandBuffer")),
            error: DeviceError::InvalidHandle,
        };
        assert_eq!(error.summary(), "3:SubmitCommandBuffer failed to execute");
        assert!(error.to_string().starts_with("3:SubmitCommandBuffer failed to execute: "));
        assert!(error.source().is_some());
    }

    #[test]
    fn vertex_usage_needs_graphics_queue() {
        let device = device(SoftDeviceCreateInfo {
            queue_flags: vk::QueueFlags::TRANSFER,
            ..Default::default()
        });
        let mut instance = MemoryTestInstance::new(
            device,
            config(Usage::TRANSFER_DST | Usage::VERTEX_BUFFER, 1024),
            GenerateSettings::default(),
        );

        assert!(matches!(instance.iterate(), TestStatus::NotSupported(_)));
    }

    #[test]
    fn iterates_once_per_memory_type() {
        let device = device(SoftDeviceCreateInfo::default());
        let memory_type_count = device.memory_types().len();
        let mut instance = MemoryTestInstance::new(
            device,
            config(Usage::HOST_WRITE | Usage::TRANSFER_DST, 1024),
            GenerateSettings {
                op_count: 30,
                ..Default::default()
            },
        );

        for _ in 0..memory_type_count {
            assert_eq!(instance.iterate(), TestStatus::Incomplete);
        }

        assert_eq!(instance.iterate(), TestStatus::Pass);
        assert!(instance.results().is_ok());

        let log = instance.log();
        assert!(log.find_section("TestCaseInfo").is_some());
        assert!(log.find_section("MemoryProperties").is_some());

        // The first memory type isn't host visible.
        let first = log.find_section("MemoryType0").unwrap();
        assert!(first
            .iter()
            .any(|entry| *entry == LogEntry::Message("Memory type not supported".to_owned())));
        assert!(log.contains_message("Begin verify"));
    }

    #[test]
    fn device_usage_runs_on_device_local_memory() {
        let device = device(SoftDeviceCreateInfo::default());
        let mut instance = MemoryTestInstance::new(
            device,
            config(Usage::TRANSFER_SRC | Usage::TRANSFER_DST, 8192),
            GenerateSettings {
                op_count: 40,
                ..Default::default()
            },
        );

        assert_eq!(instance.run(), TestStatus::Pass);
        assert!(instance.log().contains_message("Max buffer size: 8192"));
    }
}
