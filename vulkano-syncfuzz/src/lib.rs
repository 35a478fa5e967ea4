// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Randomized tests of pipeline barriers and memory visibility.
//!
//! A test picks a [`Usage`] for one allocation of device memory, and then generates a long
//! random but valid sequence of operations on it: host writes and reads through a mapping,
//! flushes and invalidates, transfers, blits, render passes that read the memory as vertex or
//! index data, and the pipeline barriers that make the results of one operation visible to the
//! next. Every generated command is run in three phases:
//!
//! - **Prepare** creates the objects the command needs, such as scratch buffers or pipelines.
//! - **Execute** records and submits the work to the device.
//! - **Verify** replays the command against a byte-exact reference model of the memory, and
//!   compares whatever the command read back from the device with the model.
//!
//! A barrier that an implementation doesn't honor shows up as a mismatch between the two.
//!
//! # Running a test
//!
//! The [`MemoryTestInstance`] runs one [`TestConfig`] on every memory type of a [`Device`]:
//!
//! ```
//! use std::sync::Arc;
//! use vulkano_syncfuzz::{
//!     device::{Device, SoftDevice, SoftDeviceCreateInfo},
//!     GenerateSettings, MemoryTestInstance, TestConfig, TestStatus, Usage,
//! };
//!
//! let device: Arc<dyn Device> = Arc::new(SoftDevice::new(SoftDeviceCreateInfo::default()));
//! let config = TestConfig {
//!     usage: Usage::HOST_WRITE | Usage::TRANSFER_DST,
//!     size: 1024,
//!     sharing: ash::vk::SharingMode::EXCLUSIVE,
//! };
//! let mut instance = MemoryTestInstance::new(device, config, GenerateSettings::default());
//!
//! assert_eq!(instance.run(), TestStatus::Pass);
//! ```
//!
//! The whole matrix of configurations is returned by [`test_cases`].
//!
//! # Devices
//!
//! Tests only talk to the [`Device`] trait. The crate ships [`SoftDevice`](device::SoftDevice),
//! a software implementation that defers submitted work until the queue is waited on, and that
//! can be told to misbehave through [`Defects`](device::Defects) to check that the tests catch
//! it.

#[macro_use]
mod macros;

pub mod cache;
pub mod command;
pub mod device;
pub mod generate;
pub mod log;
pub mod memory;
pub mod random;
pub mod reference;
pub mod run;
pub mod state;
pub mod sync;
pub mod usage;

pub use crate::{
    generate::{create_commands, GenerateSettings},
    log::{LogEntry, TestLog},
    run::{
        test_cases, test_commands, MemoryTestInstance, ResultCollector, RunError, RunPhase,
        TestCase, TestConfig, TestStatus,
    },
    state::{Op, State},
    usage::Usage,
};
