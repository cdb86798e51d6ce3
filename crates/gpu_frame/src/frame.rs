//! Per-frame synchronization state machine
//!
//! Drives the classic multi-buffered frame loop: acquire an image with a
//! per-slot semaphore, wait out any frame still rendering into that image,
//! submit with the slot's fence, present, then block on the fence and step
//! the ring. `frame_count` slots pipeline CPU recording ahead of GPU
//! execution; slots may overlap on the GPU, which is the point.
//!
//! Two index spaces are in play and must not be confused:
//!
//! - the frame slot (`current_frame`), a ring position in `[0, frame_count)`
//!   selecting which semaphores, fence and command buffer this frame uses;
//! - the image index (`frame_index`), chosen by the presentation engine at
//!   acquire time, indexing the swapchain's image array.
//!
//! The two counts are independent. A back-reference table maps each image
//! slot to the fence of the frame that last rendered into it, so an image
//! handed back early by the presentation engine is never overwritten while
//! a previous frame still draws to it.

use crate::error::{RenderError, RenderResult};
use crate::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use crate::sync::{Fence, Semaphore, FENCE_TIMEOUT_NS};
use ash::{vk, Device};

/// Transient frame outcome flags, cleared on every ring step
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStatus {
    /// An image was acquired (and, later, presented) this frame
    pub success: bool,
    /// The surface no longer matches exactly; recreate when convenient
    pub suboptimal: bool,
    /// The surface changed; the frame must be skipped and the swapchain
    /// recreated before the next acquire
    pub out_of_date: bool,
}

impl FrameStatus {
    /// Whether the caller must run the swapchain recreate path
    pub fn needs_recreate(&self) -> bool {
        self.suboptimal || self.out_of_date
    }
}

/// Pure bookkeeping core of the frame ring
///
/// Owns no native objects, so the ordering rules it encodes can be tested
/// without a device. Fence handles stored here are non-owning copies.
#[derive(Debug)]
pub(crate) struct FrameClock {
    frame_count: usize,
    current_frame: usize,
    frame_index: u32,
    images_in_flight: Vec<vk::Fence>,
    status: FrameStatus,
}

impl FrameClock {
    pub(crate) fn new(frame_count: usize, image_count: usize) -> Self {
        debug_assert!(frame_count > 0);
        Self {
            frame_count,
            current_frame: 0,
            frame_index: 0,
            images_in_flight: vec![vk::Fence::null(); image_count],
            status: FrameStatus::default(),
        }
    }

    /// Fold an acquisition result into the status flags
    ///
    /// An out-of-date result leaves `frame_index` untouched: no image was
    /// handed out, so the previous value must not be trusted or updated.
    pub(crate) fn record_acquire(&mut self, outcome: AcquireOutcome) {
        match outcome {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                self.frame_index = image_index;
                self.status.success = true;
                self.status.suboptimal |= suboptimal;
            }
            AcquireOutcome::OutOfDate => {
                self.status.out_of_date = true;
            }
        }
    }

    /// Fold a presentation result into the status flags
    pub(crate) fn record_present(&mut self, outcome: PresentOutcome) {
        match outcome {
            PresentOutcome::Presented { suboptimal } => {
                self.status.success = true;
                self.status.suboptimal |= suboptimal;
            }
            PresentOutcome::OutOfDate => {
                self.status.out_of_date = true;
            }
        }
    }

    /// Install `frame_fence` as the fence guarding the acquired image
    ///
    /// Returns the fence of the frame that previously rendered into this
    /// image, or a null handle if the image slot was never used.
    pub(crate) fn claim_image(&mut self, frame_fence: vk::Fence) -> vk::Fence {
        let slot = self.frame_index as usize;
        debug_assert!(slot < self.images_in_flight.len());
        std::mem::replace(&mut self.images_in_flight[slot], frame_fence)
    }

    /// Step the ring and clear the transient flags
    pub(crate) fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frame_count;
        self.status = FrameStatus::default();
    }

    /// Rebuild the image back-reference table after a swapchain recreate
    pub(crate) fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![vk::Fence::null(); image_count];
    }

    pub(crate) fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub(crate) fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub(crate) fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    pub(crate) fn status(&self) -> FrameStatus {
        self.status
    }
}

/// Synchronization objects and ring state for multi-buffered rendering
pub struct FrameContext {
    device: Device,
    clock: FrameClock,
    frame_available: Vec<Semaphore>,
    render_finished: Vec<Semaphore>,
    in_flight: Vec<Fence>,
}

impl FrameContext {
    /// Create `frame_count` slots of semaphores and signaled fences
    pub fn new(device: Device, frame_count: usize, image_count: usize) -> RenderResult<Self> {
        let mut frame_available = Vec::with_capacity(frame_count);
        let mut render_finished = Vec::with_capacity(frame_count);
        let mut in_flight = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frame_available.push(Semaphore::new(device.clone())?);
            render_finished.push(Semaphore::new(device.clone())?);
            // Signaled so the first wait on a fresh slot does not block
            in_flight.push(Fence::new(device.clone(), true)?);
        }

        log::debug!(
            "Created frame context: {} slots, {} swapchain images",
            frame_count,
            image_count
        );

        Ok(Self {
            device,
            clock: FrameClock::new(frame_count, image_count),
            frame_available,
            render_finished,
            in_flight,
        })
    }

    /// Acquire the next swapchain image for the current frame slot
    ///
    /// On an out-of-date surface the status flag is set and the acquired
    /// image index is left alone; the caller must recreate the swapchain
    /// and skip the frame.
    pub fn acquire_next_frame(&mut self, swapchain: &Swapchain) -> RenderResult<FrameStatus> {
        let semaphore = self.frame_available[self.clock.current_frame()].handle();
        let outcome = swapchain.acquire_next_image(semaphore)?;
        self.clock.record_acquire(outcome);
        Ok(self.clock.status())
    }

    /// Wait until the acquired image is free of earlier frames, then claim it
    pub fn wait_for_image(&mut self) -> RenderResult<()> {
        let frame_fence = self.in_flight[self.clock.current_frame()].handle();
        let previous = self.clock.claim_image(frame_fence);
        if previous != vk::Fence::null() {
            unsafe {
                self.device
                    .wait_for_fences(&[previous], true, FENCE_TIMEOUT_NS)
                    .map_err(RenderError::Api)?;
            }
        }
        Ok(())
    }

    /// Submit recorded commands for the current slot to the graphics queue
    ///
    /// The slot's fence is reset on the CPU immediately before submission,
    /// never earlier: resetting it while the GPU still owes a signal would
    /// deadlock the next wait.
    pub fn submit(
        &mut self,
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
    ) -> RenderResult<()> {
        let current = self.clock.current_frame();
        self.in_flight[current].reset()?;

        let wait_semaphores = [self.frame_available[current].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [self.render_finished[current].handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(
                    queue,
                    &[submit_info.build()],
                    self.in_flight[current].handle(),
                )
                .map_err(RenderError::Api)?;
        }
        Ok(())
    }

    /// Present the acquired image, waiting on the render-finished semaphore
    pub fn present(&mut self, swapchain: &Swapchain, queue: vk::Queue) -> RenderResult<FrameStatus> {
        let current = self.clock.current_frame();
        let outcome = swapchain.present(
            queue,
            self.clock.frame_index(),
            self.render_finished[current].handle(),
        )?;
        self.clock.record_present(outcome);
        Ok(self.clock.status())
    }

    /// Block until the current slot's submission finishes on the GPU
    ///
    /// This is the throttle that bounds in-flight frames to `frame_count`.
    pub fn wait_current_fence(&self) -> RenderResult<()> {
        self.in_flight[self.clock.current_frame()].wait(FENCE_TIMEOUT_NS)
    }

    /// Step to the next frame slot and clear the transient flags
    pub fn next_frame(&mut self) {
        self.clock.advance();
    }

    /// Rebuild the per-image fence table after a swapchain recreate
    pub fn reset_images(&mut self, image_count: usize) {
        self.clock.reset_images(image_count);
    }

    /// Ring position of the frame being recorded
    pub fn current_frame(&self) -> usize {
        self.clock.current_frame()
    }

    /// Swapchain image index acquired for this frame
    pub fn frame_index(&self) -> u32 {
        self.clock.frame_index()
    }

    /// Ring depth
    pub fn frame_count(&self) -> usize {
        self.clock.frame_count()
    }

    /// Flags accumulated since the last ring step
    pub fn status(&self) -> FrameStatus {
        self.clock.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    #[test]
    fn test_ring_returns_to_start() {
        for frame_count in 1..=3 {
            let mut clock = FrameClock::new(frame_count, 2);
            for start in 0..frame_count {
                assert_eq!(clock.current_frame(), start);
                for _ in 0..frame_count {
                    clock.advance();
                }
                assert_eq!(clock.current_frame(), start);
            }
        }
    }

    #[test]
    fn test_image_table_matches_image_count() {
        let mut clock = FrameClock::new(3, 2);
        assert_eq!(clock.image_count(), 2);
        clock.reset_images(4);
        assert_eq!(clock.image_count(), 4);
        clock.reset_images(2);
        assert_eq!(clock.image_count(), 2);
    }

    #[test]
    fn test_acquire_success_sets_index_and_flag() {
        let mut clock = FrameClock::new(2, 3);
        clock.record_acquire(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: false,
        });
        assert_eq!(clock.frame_index(), 2);
        assert!(clock.status().success);
        assert!(!clock.status().suboptimal);
        assert!(!clock.status().needs_recreate());
    }

    #[test]
    fn test_out_of_date_acquire_leaves_index_untouched() {
        let mut clock = FrameClock::new(3, 2);
        clock.record_acquire(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: false,
        });
        clock.advance();
        clock.record_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(clock.frame_index(), 1);
        assert!(clock.status().out_of_date);
        assert!(!clock.status().success);
        assert!(clock.status().needs_recreate());
    }

    #[test]
    fn test_suboptimal_acquire_is_usable_but_flagged() {
        let mut clock = FrameClock::new(2, 2);
        clock.record_acquire(AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: true,
        });
        assert!(clock.status().success);
        assert!(clock.status().suboptimal);
        assert!(clock.status().needs_recreate());
    }

    #[test]
    fn test_claim_image_returns_previous_fence() {
        let mut clock = FrameClock::new(2, 2);
        clock.record_acquire(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: false,
        });
        // First use of the image slot: nothing to wait for
        assert_eq!(clock.claim_image(fence(10)), vk::Fence::null());
        // Second frame lands on the same image: the old fence comes back
        assert_eq!(clock.claim_image(fence(20)), fence(10));
    }

    #[test]
    fn test_reset_images_forgets_fences() {
        let mut clock = FrameClock::new(2, 2);
        clock.record_acquire(AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: false,
        });
        clock.claim_image(fence(7));
        clock.reset_images(2);
        assert_eq!(clock.claim_image(fence(8)), vk::Fence::null());
    }

    #[test]
    fn test_advance_clears_transient_flags() {
        let mut clock = FrameClock::new(2, 2);
        clock.record_acquire(AcquireOutcome::Acquired {
            image_index: 0,
            suboptimal: true,
        });
        clock.record_present(PresentOutcome::OutOfDate);
        clock.advance();
        assert_eq!(clock.status(), FrameStatus::default());
    }

    #[test]
    fn test_present_outcome_mapping() {
        let mut clock = FrameClock::new(2, 2);
        clock.record_present(PresentOutcome::Presented { suboptimal: true });
        assert!(clock.status().success);
        assert!(clock.status().suboptimal);
    }
}
