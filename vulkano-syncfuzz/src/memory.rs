// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The tested memory object and probing of what fits into it.

use crate::device::{
    Buffer, BufferCreateInfo, Device, DeviceError, DeviceMemory, DeviceSize, Image,
    ImageCreateInfo, MemoryType, MAX_IMAGE_DIMENSION,
};
use ash::vk;
use std::sync::Arc;

/// Properties of the tested memory, as known to the state machine and the generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryInfo {
    pub size: DeviceSize,
    pub memory_type_index: u32,
    pub memory_type: MemoryType,
    /// The size of buffers created in the memory, or zero if buffers are not supported.
    pub max_buffer_size: DeviceSize,
    /// The extent of images created in the memory, or zero if images are not supported.
    pub max_image_extent: [u32; 2],
}

impl MemoryInfo {
    #[inline]
    pub fn supports_buffers(&self) -> bool {
        self.max_buffer_size > 0
    }

    #[inline]
    pub fn supports_images(&self) -> bool {
        self.max_image_extent[0] > 0
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.memory_type
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    #[inline]
    pub fn is_host_coherent(&self) -> bool {
        self.memory_type
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Returns the size of the memory in bytes, as a host size.
    #[inline]
    pub fn host_size(&self) -> usize {
        self.size as usize
    }
}

/// The tested memory allocation.
#[derive(Debug)]
pub struct Memory {
    info: MemoryInfo,
    memory: DeviceMemory,
}

impl Memory {
    /// Allocates `size` bytes of the memory type.
    pub fn new(
        device: &Arc<dyn Device>,
        size: DeviceSize,
        memory_type_index: u32,
        max_buffer_size: DeviceSize,
        max_image_extent: [u32; 2],
    ) -> Result<Self, DeviceError> {
        let memory_type = *device
            .memory_types()
            .get(memory_type_index as usize)
            .ok_or(DeviceError::InvalidHandle)?;
        let memory = DeviceMemory::allocate(device.clone(), size, memory_type_index)?;

        Ok(Memory {
            info: MemoryInfo {
                size,
                memory_type_index,
                memory_type,
                max_buffer_size,
                max_image_extent,
            },
            memory,
        })
    }

    #[inline]
    pub fn info(&self) -> &MemoryInfo {
        &self.info
    }

    #[inline]
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.info.size
    }
}

/// Returns whether a buffer of `size` bytes fits into `memory_size` bytes of the memory type.
/// Failure to create the buffer counts as not fitting.
fn buffer_fits(
    device: &Arc<dyn Device>,
    size: DeviceSize,
    usage: vk::BufferUsageFlags,
    sharing_mode: vk::SharingMode,
    memory_size: DeviceSize,
    memory_type_index: u32,
    exact: bool,
) -> bool {
    let create_info = BufferCreateInfo {
        size,
        usage,
        sharing_mode,
    };

    match Buffer::new(device.clone(), &create_info).and_then(|b| b.memory_requirements()) {
        Ok(requirements) => {
            let size_fits = if exact {
                requirements.size == memory_size
            } else {
                requirements.size <= memory_size
            };

            size_fits && requirements.allows_memory_type(memory_type_index)
        }
        Err(err) => {
            tracing::trace!(size, %err, "buffer probe failed");

            false
        }
    }
}

/// Finds the largest buffer that fits into `memory_size` bytes of the memory type.
pub fn find_max_buffer_size(
    device: &Arc<dyn Device>,
    usage: vk::BufferUsageFlags,
    sharing_mode: vk::SharingMode,
    memory_size: DeviceSize,
    memory_type_index: u32,
) -> DeviceSize {
    let fits = |size, exact| {
        buffer_fits(
            device,
            size,
            usage,
            sharing_mode,
            memory_size,
            memory_type_index,
            exact,
        )
    };

    if memory_size > 0 && fits(memory_size, true) {
        return memory_size;
    }

    let mut last_success = 0;
    let mut current_size = memory_size / 2;
    let mut step_size = memory_size / 4;

    while current_size > 0 {
        if fits(current_size, false) {
            last_success = current_size;
            current_size += step_size;
        } else {
            current_size -= step_size;
        }

        if step_size == 0 {
            break;
        }

        step_size /= 2;
    }

    last_success
}

/// Rounds `size` down to the largest `W * H * 4` where `1 <= W, H < 4096`.
pub fn round_buffer_size_to_wxhx4(size: DeviceSize) -> DeviceSize {
    let max_dimension = DeviceSize::from(MAX_IMAGE_DIMENSION) - 1;
    let texel_count = size / 4;
    let mut best = 0;

    for w in 1..=max_dimension.min(texel_count) {
        let h = (texel_count / w).min(max_dimension);
        best = best.max(w * h);

        if best == texel_count {
            break;
        }
    }

    best * 4
}

/// Finds the extent of an RGBA8 image of exactly `size` bytes, with both dimensions below 4096.
pub fn find_image_size_wxhx4(size: DeviceSize) -> Option<[u32; 2]> {
    debug_assert_eq!(size % 4, 0);

    let max_dimension = DeviceSize::from(MAX_IMAGE_DIMENSION);
    let texel_count = size / 4;

    (1..max_dimension.min(texel_count + 1))
        .find(|&w| texel_count % w == 0 && texel_count / w < max_dimension)
        .map(|w| [w as u32, (texel_count / w) as u32])
}

/// Finds a large RGBA8 image that fits into `memory_size` bytes of the memory type, searching
/// from a square-ish extent.
pub fn find_max_rgba8_image_size(
    device: &Arc<dyn Device>,
    usage: vk::ImageUsageFlags,
    sharing_mode: vk::SharingMode,
    memory_size: DeviceSize,
    memory_type_index: u32,
) -> [u32; 2] {
    let texel_count = memory_size / 4;

    if texel_count == 0 {
        return [0, 0];
    }

    let width = ((texel_count as f64).sqrt() as i64).max(1);
    let height = texel_count as i64 / width;
    let mut current = [width.max(height), width.min(height)];
    let mut last_success = [0, 0];
    let mut step_size = current[0] / 2;

    while current[0] > 0 && current[1] > 0 {
        let extent = [current[0] as u32, current[1] as u32];
        let create_info = ImageCreateInfo {
            sharing_mode,
            ..ImageCreateInfo::rgba8(extent, usage)
        };
        let fits = match Image::new(device.clone(), &create_info)
            .and_then(|image| image.memory_requirements())
        {
            Ok(requirements) => {
                requirements.size <= memory_size
                    && requirements.allows_memory_type(memory_type_index)
            }
            Err(err) => {
                tracing::trace!(?extent, %err, "image probe failed");

                false
            }
        };

        if fits {
            last_success = extent;
            current[0] += step_size;
            current[1] += step_size;
        } else {
            current[0] -= step_size;
            current[1] -= step_size;
        }

        if step_size == 0 {
            break;
        }

        step_size /= 2;
    }

    last_success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SoftDevice, SoftDeviceCreateInfo};

    fn device() -> Arc<dyn Device> {
        Arc::new(SoftDevice::new(SoftDeviceCreateInfo::default()))
    }

    #[test]
    fn rounding_to_image_sizes() {
        assert_eq!(round_buffer_size_to_wxhx4(1024), 1024);
        assert_eq!(round_buffer_size_to_wxhx4(1023), 1020);
        assert_eq!(round_buffer_size_to_wxhx4(3), 0);
        assert_eq!(round_buffer_size_to_wxhx4(1 << 20), 1 << 20);

        // 4096 * 4096 texels need a dimension of 4096, which is not allowed.
        let size = round_buffer_size_to_wxhx4(4096 * 4096 * 4);
        assert!(size < 4096 * 4096 * 4);
        assert!(find_image_size_wxhx4(size).is_some());
    }

    #[test]
    fn exact_image_sizes() {
        assert_eq!(find_image_size_wxhx4(1024), Some([1, 256]));
        assert_eq!(find_image_size_wxhx4(4), Some([1, 1]));

        let [w, h] = find_image_size_wxhx4(1 << 20).unwrap();
        assert_eq!(u64::from(w) * u64::from(h) * 4, 1 << 20);
        assert!(w < 4096 && h < 4096);

        // A prime number of texels above the dimension limit has no such extent.
        assert_eq!(find_image_size_wxhx4(4099 * 4), None);
    }

    #[test]
    fn buffer_probe_finds_whole_memory() {
        let device = device();

        for memory_type_index in 0..3 {
            assert_eq!(
                find_max_buffer_size(
                    &device,
                    vk::BufferUsageFlags::TRANSFER_DST,
                    vk::SharingMode::EXCLUSIVE,
                    1024,
                    memory_type_index,
                ),
                1024,
            );
        }

        // Requirements are padded to 64 bytes, so the whole memory doesn't fit exactly.
        let size = find_max_buffer_size(
            &device,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::SharingMode::EXCLUSIVE,
            1000,
            0,
        );
        assert!(size > 0 && size <= 1000);
        assert!(size.next_multiple_of(64) <= 1000);
    }

    #[test]
    fn image_probe_fits_memory() {
        let device = device();
        let [w, h] = find_max_rgba8_image_size(
            &device,
            vk::ImageUsageFlags::TRANSFER_SRC,
            vk::SharingMode::EXCLUSIVE,
            65536,
            0,
        );

        assert!(w > 0 && h > 0);
        assert!(u64::from(w) * u64::from(h) * 4 <= 65536);

        assert_eq!(
            find_max_rgba8_image_size(
                &device,
                vk::ImageUsageFlags::TRANSFER_SRC,
                vk::SharingMode::EXCLUSIVE,
                3,
                0,
            ),
            [0, 0],
        );
    }

    #[test]
    fn memory_reports_its_type() {
        let device = device();
        let memory = Memory::new(&device, 1024, 2, 1024, [0, 0]).unwrap();

        assert!(memory.info().is_host_visible());
        assert!(!memory.info().is_host_coherent());
        assert!(memory.info().supports_buffers());
        assert!(!memory.info().supports_images());
        assert_eq!(memory.memory().size(), 1024);

        assert!(matches!(
            Memory::new(&device, 1024, 7, 0, [0, 0]),
            Err(DeviceError::InvalidHandle),
        ));
    }
}
