// SPDX-License-Identifier: CEPL-1.0
//! Frame slots and the per-image fence table.
//!
//! A slot is reused every `N` frames. Before reuse its fence must have
//! signaled, which bounds how far the CPU can run ahead of the GPU.

use std::time::Duration;

use tracing::trace;

use crate::backend::GpuDevice;
use crate::error::{RenderError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing outstanding; the fence is unsignaled and may be submitted.
    Idle,
    /// Work submitted, fence not yet observed signaled.
    Submitted,
    /// Fence observed signaled but not yet reset.
    Complete,
}

/// Identifies one submission. Complete once its slot has moved on to a newer
/// serial or its fence has signaled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubmissionRef {
    pub slot: usize,
    pub serial: u64,
}

pub struct FrameSlot<D: GpuDevice> {
    pub fence: D::Fence,
    pub image_acquired: D::Semaphore,
    pub render_finished: D::Semaphore,
    state: SlotState,
    serial: u64,
}

impl<D: GpuDevice> FrameSlot<D> {
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Serial of the latest submission; 0 before the first.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    fn create(device: &D) -> Result<Self> {
        let fence = device.create_fence()?;
        let image_acquired = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_fence(fence);
                return Err(e);
            }
        };
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_acquired);
                device.destroy_fence(fence);
                return Err(e);
            }
        };
        Ok(Self {
            fence,
            image_acquired,
            render_finished,
            state: SlotState::Idle,
            serial: 0,
        })
    }

    fn destroy(self, device: &D) {
        device.destroy_semaphore(self.render_finished);
        device.destroy_semaphore(self.image_acquired);
        device.destroy_fence(self.fence);
    }
}

/// Fixed ring of frame slots.
pub struct FrameSynchronizer<D: GpuDevice> {
    slots: Vec<FrameSlot<D>>,
    frame_counter: u64,
    timeout: Duration,
}

impl<D: GpuDevice> FrameSynchronizer<D> {
    pub fn new(device: &D, frames_in_flight: usize, timeout: Duration) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match FrameSlot::create(device) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        slot.destroy(device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            slots,
            frame_counter: 0,
            timeout,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames started so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn slot(&self, index: usize) -> &FrameSlot<D> {
        &self.slots[index]
    }

    /// Takes the next slot in ring order, blocking until its previous
    /// submission has finished.
    pub fn acquire_slot(&mut self, device: &D) -> Result<usize> {
        let index = (self.frame_counter % self.slots.len() as u64) as usize;
        self.frame_counter += 1;
        self.wait_until_slot_free(device, index)?;
        Ok(index)
    }

    /// Leaves the slot `Idle` with an unsignaled fence.
    pub fn wait_until_slot_free(&mut self, device: &D, index: usize) -> Result<()> {
        let timeout = self.timeout;
        let slot = &mut self.slots[index];
        match slot.state {
            SlotState::Idle => return Ok(()),
            SlotState::Submitted => {
                trace!("waiting on slot {index} (serial {})", slot.serial);
                if !device.wait_fence(&slot.fence, timeout)? {
                    return Err(RenderError::Timeout {
                        waiting_for: "frame fence",
                        after: timeout,
                    });
                }
            }
            SlotState::Complete => {}
        }
        device.reset_fence(&slot.fence)?;
        slot.state = SlotState::Idle;
        Ok(())
    }

    /// Records that the slot's fence was handed to a submission.
    pub fn mark_submitted(&mut self, index: usize) -> SubmissionRef {
        let slot = &mut self.slots[index];
        debug_assert_eq!(slot.state, SlotState::Idle, "slot {index} reused while busy");
        slot.serial += 1;
        slot.state = SlotState::Submitted;
        SubmissionRef {
            slot: index,
            serial: slot.serial,
        }
    }

    /// Non-blocking `Submitted -> Complete` transition.
    pub fn poll(&mut self, device: &D, index: usize) -> Result<SlotState> {
        let slot = &mut self.slots[index];
        if slot.state == SlotState::Submitted && device.fence_signaled(&slot.fence)? {
            slot.state = SlotState::Complete;
        }
        Ok(slot.state)
    }

    pub fn is_complete(&self, device: &D, submission: SubmissionRef) -> Result<bool> {
        let slot = &self.slots[submission.slot];
        if submission.serial < slot.serial || slot.state != SlotState::Submitted {
            return Ok(true);
        }
        device.fence_signaled(&slot.fence)
    }

    /// Blocks until `submission` has finished.
    pub fn wait_for(&mut self, device: &D, submission: SubmissionRef) -> Result<()> {
        if self.is_complete(device, submission)? {
            return Ok(());
        }
        self.wait_until_slot_free(device, submission.slot)
    }

    /// Submissions not yet known to be finished.
    pub fn in_flight(&mut self, device: &D) -> Result<Vec<SubmissionRef>> {
        let mut refs = Vec::new();
        for index in 0..self.slots.len() {
            if self.poll(device, index)? == SlotState::Submitted {
                refs.push(SubmissionRef {
                    slot: index,
                    serial: self.slots[index].serial,
                });
            }
        }
        Ok(refs)
    }

    pub fn wait_idle(&mut self, device: &D) -> Result<()> {
        for index in 0..self.slots.len() {
            self.wait_until_slot_free(device, index)?;
        }
        Ok(())
    }

    /// Releases every slot. Callers wait for the device first.
    pub fn destroy(&mut self, device: &D) {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
    }
}

/// Which submission last rendered into each chain image.
#[derive(Clone, Debug, Default)]
pub struct ImageFences {
    entries: Vec<Option<SubmissionRef>>,
}

impl ImageFences {
    pub fn new(image_count: usize) -> Self {
        Self {
            entries: vec![None; image_count],
        }
    }

    /// Forgets every binding; used when the chain is replaced.
    pub fn reset(&mut self, image_count: usize) {
        self.entries.clear();
        self.entries.resize(image_count, None);
    }

    pub fn get(&self, image: u32) -> Option<SubmissionRef> {
        self.entries.get(image as usize).copied().flatten()
    }

    pub fn bind(&mut self, image: u32, submission: SubmissionRef) {
        let image = image as usize;
        if image >= self.entries.len() {
            self.entries.resize(image + 1, None);
        }
        self.entries[image] = Some(submission);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
