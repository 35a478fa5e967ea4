// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A model of memory availability and visibility between pipeline stages.
//!
//! The model answers a single question: can an access of some type be performed at some stage
//! right now, without racing any earlier write and without reading through a stale cache? It is
//! tracked per destination stage:
//!
//! - which access types are not yet visible to the stage,
//! - which source stages haven't yet completed before the stage,
//! - for every source stage, which writes performed there aren't yet available to the stage,
//! - whether the most recent image layout transition isn't yet available to the stage.
//!
//! Every simulated access, barrier, layout transition, submission and idle wait updates these
//! tables incrementally.

use crate::sync::{Access, BarrierMasks, PipelineStage, WRITE_ACCESSES};
use ash::vk;

const STAGE_COUNT: usize = PipelineStage::COUNT;

/// Availability and visibility state of one memory object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheState {
    allowed_stages: vk::PipelineStageFlags,
    allowed_accesses: vk::AccessFlags,

    // Indexed by the destination stage.
    invisible: [vk::AccessFlags; STAGE_COUNT],
    incomplete: [vk::PipelineStageFlags; STAGE_COUNT],
    layout_pending: [bool; STAGE_COUNT],

    // Indexed by the destination stage and then by the source stage.
    unavailable: [[vk::AccessFlags; STAGE_COUNT]; STAGE_COUNT],
}

impl CacheState {
    /// Creates a clean state.
    ///
    /// # Panics
    ///
    /// - Panics if `allowed_stages` contains a stage that is not a [`PipelineStage`].
    /// - Panics if `allowed_accesses` contains an access that is not an [`Access`].
    pub fn new(allowed_stages: vk::PipelineStageFlags, allowed_accesses: vk::AccessFlags) -> Self {
        assert!(
            PipelineStage::ALL_FLAGS.contains(allowed_stages),
            "unknown pipeline stages in {allowed_stages:?}",
        );
        assert!(
            Access::ALL_FLAGS.contains(allowed_accesses),
            "unknown access types in {allowed_accesses:?}",
        );

        CacheState {
            allowed_stages,
            allowed_accesses,
            invisible: [vk::AccessFlags::empty(); STAGE_COUNT],
            incomplete: [vk::PipelineStageFlags::empty(); STAGE_COUNT],
            layout_pending: [false; STAGE_COUNT],
            unavailable: [[vk::AccessFlags::empty(); STAGE_COUNT]; STAGE_COUNT],
        }
    }

    /// Returns the stages that may be used with this state.
    #[inline]
    pub fn allowed_stages(&self) -> vk::PipelineStageFlags {
        self.allowed_stages
    }

    /// Returns the access types that may be used with this state.
    #[inline]
    pub fn allowed_accesses(&self) -> vk::AccessFlags {
        self.allowed_accesses
    }

    /// Returns whether `access` can be performed at `stage` without a hazard.
    ///
    /// A read requires every earlier write to be available and visible at `stage`. A write
    /// additionally requires every earlier operation to have completed before `stage`.
    pub fn is_valid(&self, stage: PipelineStage, access: Access) -> bool {
        self.assert_allowed(stage.flag(), access.flag());

        let dst = stage.index();

        if self.layout_pending[dst] {
            return false;
        }

        if self.invisible[dst].intersects(access.flag()) {
            return false;
        }

        if access.is_write() && !self.incomplete[dst].is_empty() {
            return false;
        }

        true
    }

    /// Records that `access` was performed at `stage`.
    pub fn perform(&mut self, stage: PipelineStage, access: Access) {
        self.assert_allowed(stage.flag(), access.flag());

        for dst in PipelineStage::iter(self.allowed_stages) {
            let dst = dst.index();

            self.incomplete[dst] |= stage.flag();

            if access.is_write() {
                self.invisible[dst] |= self.allowed_accesses;
                self.unavailable[dst][stage.index()] |= access.flag();
            }
        }
    }

    /// Records a pipeline barrier.
    pub fn barrier(&mut self, masks: &BarrierMasks) {
        self.assert_allowed(masks.src_stages, masks.src_accesses);
        self.assert_allowed(masks.dst_stages, masks.dst_accesses);

        let BarrierMasks {
            src_stages,
            src_accesses,
            dst_stages,
            dst_accesses,
        } = *masks;

        // Guarantees that already hold at a source stage also hold at every destination stage
        // once the barrier has executed. These must be read from the state before the barrier.
        let old_incomplete = self.incomplete;
        let old_layout_pending = self.layout_pending;
        let old_unavailable = self.unavailable;

        for src in PipelineStage::iter(src_stages) {
            let src = src.index();

            for dst in PipelineStage::iter(dst_stages) {
                let dst = dst.index();

                self.incomplete[dst] &= old_incomplete[src];
                self.layout_pending[dst] &= old_layout_pending[src];

                for shared in PipelineStage::iter(self.allowed_stages) {
                    let shared = shared.index();
                    self.unavailable[dst][shared] &= old_unavailable[src][shared];
                }
            }
        }

        for dst in PipelineStage::iter(dst_stages) {
            let dst = dst.index();

            self.incomplete[dst] &= !src_stages;

            for src in PipelineStage::iter(src_stages) {
                self.unavailable[dst][src.index()] &= !src_accesses;
            }

            // Visibility can only be established once every write is available.
            if self.unavailable[dst].iter().all(|access| access.is_empty()) {
                self.invisible[dst] &= !dst_accesses;
            }
        }
    }

    /// Records an image memory barrier that transitions the image to a new layout.
    ///
    /// A layout transition reads and writes the whole image, so the state afterwards doesn't
    /// depend on what was pending before it, except that the barrier must have made everything
    /// available first.
    pub fn image_layout_barrier(&mut self, masks: &BarrierMasks) {
        self.assert_allowed(masks.src_stages, masks.src_accesses);
        self.assert_allowed(masks.dst_stages, masks.dst_accesses);
        debug_assert!(self.is_layout_barrier_sufficient(masks));

        for dst in PipelineStage::iter(self.allowed_stages) {
            let index = dst.index();

            self.incomplete[index] = self.allowed_stages & !dst.flag();
            self.invisible[index] = self.allowed_accesses & !masks.dst_accesses;
            self.layout_pending[index] = !masks.dst_stages.contains(dst.flag());
            self.unavailable[index] = [vk::AccessFlags::empty(); STAGE_COUNT];
        }
    }

    /// Returns whether a layout transition with the source masks of `masks` waits for every
    /// allowed stage and leaves at least one write available.
    pub fn is_layout_barrier_sufficient(&self, masks: &BarrierMasks) -> bool {
        let mut completed = masks.src_stages;

        for src in PipelineStage::iter(masks.src_stages) {
            completed |= !self.incomplete[src.index()];
        }

        if !completed.contains(self.allowed_stages) {
            return false;
        }

        let allowed_writes = self.allowed_accesses & WRITE_ACCESSES;

        if allowed_writes.is_empty() || masks.src_accesses.intersects(WRITE_ACCESSES) {
            return true;
        }

        PipelineStage::iter(self.allowed_stages).any(|dst| {
            PipelineStage::iter(self.allowed_stages)
                .any(|src| self.unavailable[dst.index()][src.index()] != allowed_writes)
        })
    }

    /// Records the implicit guarantees of submitting a command buffer: host writes made before
    /// the submission are visible to every command in it.
    pub fn submit_command_buffer(&mut self) {
        let host_accesses = vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE;

        self.barrier(&BarrierMasks {
            src_stages: self.allowed_stages & vk::PipelineStageFlags::HOST,
            src_accesses: self.allowed_accesses & host_accesses,
            dst_stages: self.allowed_stages,
            dst_accesses: self.allowed_accesses,
        });
    }

    /// Records waiting for the queue or device to become idle: every device operation has
    /// completed and every device write is available and visible to the device.
    pub fn wait_for_idle(&mut self) {
        self.barrier(&BarrierMasks {
            src_stages: self.allowed_stages,
            src_accesses: self.allowed_accesses & WRITE_ACCESSES,
            dst_stages: self.allowed_stages,
            dst_accesses: vk::AccessFlags::empty(),
        });

        self.barrier(&BarrierMasks {
            src_stages: self.allowed_stages,
            src_accesses: vk::AccessFlags::empty(),
            dst_stages: self.allowed_stages & !vk::PipelineStageFlags::HOST,
            dst_accesses: self.allowed_accesses,
        });
    }

    /// Returns the barrier that makes the state clean. Empty masks mean that no barrier is
    /// needed.
    pub fn full_barrier(&self) -> BarrierMasks {
        let mut masks = BarrierMasks::default();

        for dst in PipelineStage::iter(self.allowed_stages) {
            let dst_index = dst.index();

            if !self.incomplete[dst_index].is_empty() {
                masks.dst_stages |= dst.flag();
                masks.src_stages |= self.incomplete[dst_index];
            }

            if !self.invisible[dst_index].is_empty() {
                masks.dst_stages |= dst.flag();
                masks.dst_accesses |= self.invisible[dst_index];
            }

            for src in PipelineStage::iter(self.allowed_stages) {
                let src_index = src.index();
                let unavailable = self.unavailable[dst_index][src_index];

                if !unavailable.is_empty() {
                    masks.dst_stages |= dst.flag();
                    masks.src_stages |= src.flag();
                    masks.src_accesses |= unavailable;
                }

                if self.layout_pending[dst_index] && !self.layout_pending[src_index] {
                    masks.dst_stages |= dst.flag();
                    masks.src_stages |= src.flag();
                }
            }
        }

        masks
    }

    /// Returns whether nothing is pending anywhere.
    pub fn is_clean(&self) -> bool {
        self.invisible.iter().all(|access| access.is_empty())
            && self.incomplete.iter().all(|stages| stages.is_empty())
            && self.layout_pending.iter().all(|&pending| !pending)
            && self
                .unavailable
                .iter()
                .flatten()
                .all(|access| access.is_empty())
    }

    fn assert_allowed(&self, stages: vk::PipelineStageFlags, accesses: vk::AccessFlags) {
        assert!(
            self.allowed_stages.contains(stages),
            "pipeline stages {stages:?} are outside of the allowed stages {:?}",
            self.allowed_stages,
        );
        assert!(
            self.allowed_accesses.contains(accesses),
            "access types {accesses:?} are outside of the allowed access types {:?}",
            self.allowed_accesses,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: vk::PipelineStageFlags = vk::PipelineStageFlags::HOST;
    const TRANSFER: vk::PipelineStageFlags = vk::PipelineStageFlags::TRANSFER;
    const VERTEX_INPUT: vk::PipelineStageFlags = vk::PipelineStageFlags::VERTEX_INPUT;

    fn transfer_and_host() -> CacheState {
        CacheState::new(
            HOST | TRANSFER | VERTEX_INPUT,
            vk::AccessFlags::HOST_READ
                | vk::AccessFlags::HOST_WRITE
                | vk::AccessFlags::TRANSFER_READ
                | vk::AccessFlags::TRANSFER_WRITE
                | vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        )
    }

    fn barrier(
        src_stages: vk::PipelineStageFlags,
        src_accesses: vk::AccessFlags,
        dst_stages: vk::PipelineStageFlags,
        dst_accesses: vk::AccessFlags,
    ) -> BarrierMasks {
        BarrierMasks {
            src_stages,
            src_accesses,
            dst_stages,
            dst_accesses,
        }
    }

    #[test]
    fn write_hides_memory_until_barrier() {
        let mut cache = transfer_and_host();
        assert!(cache.is_clean());
        assert!(cache.is_valid(PipelineStage::Transfer, Access::TransferRead));

        cache.perform(PipelineStage::Transfer, Access::TransferWrite);
        assert!(!cache.is_valid(PipelineStage::Transfer, Access::TransferRead));
        assert!(!cache.is_valid(PipelineStage::Transfer, Access::TransferWrite));
        assert!(!cache.is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead));

        cache.barrier(&barrier(
            TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            VERTEX_INPUT,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ));
        assert!(cache.is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead));
        assert!(!cache.is_valid(PipelineStage::Transfer, Access::TransferRead));
    }

    #[test]
    fn reads_only_block_later_writes() {
        let mut cache = transfer_and_host();

        cache.perform(PipelineStage::Transfer, Access::TransferRead);
        assert!(cache.is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead));
        assert!(!cache.is_valid(PipelineStage::Transfer, Access::TransferWrite));

        let masks = cache.full_barrier();
        assert_eq!(masks.src_stages, TRANSFER);
        assert!(masks.src_accesses.is_empty());

        cache.barrier(&masks);
        assert!(cache.is_clean());
        assert!(cache.is_valid(PipelineStage::Transfer, Access::TransferWrite));
    }

    #[test]
    fn full_barrier_cleans_state() {
        let mut cache = transfer_and_host();

        cache.perform(PipelineStage::Host, Access::HostWrite);
        cache.submit_command_buffer();
        cache.perform(PipelineStage::Transfer, Access::TransferWrite);
        cache.perform(PipelineStage::VertexInput, Access::VertexAttributeRead);

        let masks = cache.full_barrier();
        assert!(masks.src_stages.contains(TRANSFER | VERTEX_INPUT));
        assert!(masks.src_accesses.contains(vk::AccessFlags::TRANSFER_WRITE));

        cache.barrier(&masks);
        assert!(cache.is_clean());
        assert!(cache.full_barrier().is_empty());
    }

    #[test]
    fn wait_for_idle_makes_device_stages_valid() {
        let mut cache = transfer_and_host();

        cache.perform(PipelineStage::Transfer, Access::TransferWrite);
        cache.perform(PipelineStage::VertexInput, Access::VertexAttributeRead);
        cache.wait_for_idle();

        for stage in [PipelineStage::Transfer, PipelineStage::VertexInput] {
            for access in Access::iter(cache.allowed_accesses()) {
                assert!(cache.is_valid(stage, access), "{stage:?} {access:?}");
            }
        }

        // The host still needs a barrier to see device writes.
        assert!(!cache.is_valid(PipelineStage::Host, Access::HostRead));
        cache.barrier(&barrier(
            TRANSFER,
            vk::AccessFlags::empty(),
            HOST,
            vk::AccessFlags::HOST_READ,
        ));
        assert!(cache.is_valid(PipelineStage::Host, Access::HostRead));
    }

    #[test]
    fn submission_makes_host_writes_visible() {
        let mut cache = transfer_and_host();

        cache.perform(PipelineStage::Host, Access::HostWrite);
        assert!(!cache.is_valid(PipelineStage::Transfer, Access::TransferRead));

        cache.submit_command_buffer();
        assert!(cache.is_valid(PipelineStage::Transfer, Access::TransferRead));
        assert!(cache.is_valid(PipelineStage::Transfer, Access::TransferWrite));
    }

    #[test]
    fn chained_barriers_match_direct_barrier() {
        let write = vk::AccessFlags::TRANSFER_WRITE;
        let read = vk::AccessFlags::VERTEX_ATTRIBUTE_READ;

        let mut chained = transfer_and_host();
        chained.perform(PipelineStage::Transfer, Access::TransferWrite);
        let mut direct = chained.clone();
        let mut skipped = chained.clone();

        chained.barrier(&barrier(TRANSFER, write, HOST, read));
        chained.barrier(&barrier(HOST, write, VERTEX_INPUT, read));
        direct.barrier(&barrier(TRANSFER, write, VERTEX_INPUT, read));
        // Without the first barrier nothing carries over from the transfer stage.
        skipped.barrier(&barrier(HOST, write, VERTEX_INPUT, read));

        for access in Access::iter(chained.allowed_accesses()) {
            assert_eq!(
                chained.is_valid(PipelineStage::VertexInput, access),
                direct.is_valid(PipelineStage::VertexInput, access),
                "{access:?}",
            );
        }

        assert!(direct.is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead));
        assert!(!skipped.is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead));
    }

    #[test]
    fn layout_transition_must_be_waited_on() {
        let mut cache = transfer_and_host();

        cache.perform(PipelineStage::Transfer, Access::TransferWrite);
        let mut masks = cache.full_barrier();
        masks.dst_stages = TRANSFER;
        masks.dst_accesses = vk::AccessFlags::TRANSFER_READ;
        assert!(cache.is_layout_barrier_sufficient(&masks));

        cache.image_layout_barrier(&masks);
        assert!(cache.is_valid(PipelineStage::Transfer, Access::TransferRead));
        assert!(!cache.is_valid(PipelineStage::Transfer, Access::TransferWrite));
        assert!(!cache.is_valid(PipelineStage::VertexInput, Access::VertexAttributeRead));

        let masks = cache.full_barrier();
        assert!(masks.src_stages.contains(TRANSFER));
        cache.barrier(&masks);
        assert!(cache.is_clean());
    }

    #[test]
    #[should_panic(expected = "outside of the allowed stages")]
    fn disallowed_stage_panics() {
        let cache = CacheState::new(TRANSFER, vk::AccessFlags::TRANSFER_READ);
        cache.is_valid(PipelineStage::Host, Access::TransferRead);
    }
}
