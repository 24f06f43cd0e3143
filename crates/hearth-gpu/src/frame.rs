//! Per-frame acquire → record → submit → present protocol.
//!
//! [`FrameScheduler`] owns only the protocol bookkeeping; the Vulkan calls
//! live behind [`FrameBackend`], implemented by the application's render
//! context in production and by mock devices in tests. Ordering is enforced
//! by the fence/semaphore chain, not by CPU-side locks: with a single frame
//! slot the CPU never gets more than one frame ahead of the GPU.

use crate::error::Result;
use crate::swapchain::PresentOutcome;

/// The primitive operations one frame needs from the device.
///
/// `slot` indexes the frame-sync set (`frame number % slots`); `image_index`
/// is the swapchain image the acquire returned.
pub trait FrameBackend {
    /// Block until the slot's in-flight fence signals.
    fn wait_fence(&mut self, slot: usize) -> Result<()>;
    /// Reset the slot's in-flight fence.
    fn reset_fence(&mut self, slot: usize) -> Result<()>;
    /// Acquire the next swapchain image, signaling the slot's
    /// image-available semaphore. `SwapchainStale` means nothing was
    /// acquired.
    fn acquire_image(&mut self, slot: usize) -> Result<u32>;
    /// Reset and begin the command buffer for the image.
    fn begin_commands(&mut self, image_index: u32) -> Result<()>;
    /// End the image's command buffer and submit it: wait on
    /// image-available at color-attachment output, signal render-finished,
    /// fence the slot.
    fn submit_commands(&mut self, slot: usize, image_index: u32) -> Result<()>;
    /// Present the image, waiting on the slot's render-finished semaphore.
    fn present_image(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
}

/// Handle for a frame between `begin_frame` and `end_frame`.
#[derive(Debug, Clone, Copy)]
pub struct FrameToken {
    pub slot: usize,
    pub image_index: u32,
    pub frame_number: u64,
}

/// Drives the per-frame fence/semaphore protocol.
pub struct FrameScheduler {
    slots: usize,
    current_slot: usize,
    frame_number: u64,
    recording: bool,
}

impl FrameScheduler {
    /// Create a scheduler with the given number of frame slots.
    ///
    /// One slot gives the one-frame-in-flight model: `begin_frame` blocks
    /// until the GPU finished the previous frame. Two or three slots trade
    /// memory and latency for throughput.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight >= 1, "at least one frame slot is required");
        Self {
            slots: frames_in_flight,
            current_slot: 0,
            frame_number: 0,
            recording: false,
        }
    }

    /// Number of frame slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Frames completed so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Wait out the previous use of this slot, acquire an image, and start
    /// recording its command buffer.
    ///
    /// The fence is reset only after a successful acquire: a stale acquire
    /// leaves it signaled, so the retried `begin_frame` after recreation
    /// does not deadlock.
    pub fn begin_frame(&mut self, backend: &mut impl FrameBackend) -> Result<FrameToken> {
        assert!(!self.recording, "begin_frame called twice without end_frame");

        let slot = self.current_slot;
        backend.wait_fence(slot)?;

        let image_index = backend.acquire_image(slot)?;
        backend.reset_fence(slot)?;

        backend.begin_commands(image_index)?;
        self.recording = true;

        Ok(FrameToken {
            slot,
            image_index,
            frame_number: self.frame_number,
        })
    }

    /// Submit the recorded commands and present the image.
    ///
    /// A [`PresentOutcome::Stale`] result still counts as a completed frame;
    /// the caller recreates the swapchain before the next one.
    pub fn end_frame(
        &mut self,
        backend: &mut impl FrameBackend,
        token: FrameToken,
    ) -> Result<PresentOutcome> {
        assert!(self.recording, "end_frame called without begin_frame");
        assert_eq!(token.slot, self.current_slot, "frame token out of order");

        backend.submit_commands(token.slot, token.image_index)?;
        let outcome = backend.present_image(token.slot, token.image_index)?;

        self.recording = false;
        self.current_slot = (self.current_slot + 1) % self.slots;
        self.frame_number += 1;

        Ok(outcome)
    }

    /// Abandon a frame after a failed `end_frame`, releasing the recording
    /// state so the loop can recreate and continue.
    pub fn abort_frame(&mut self) {
        self.recording = false;
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;

    /// Mock device that checks the protocol the way a driver would.
    ///
    /// Command buffers are per swapchain image; re-recording a buffer whose
    /// submission has not been waited out is the bug the fence discipline
    /// exists to prevent, and the mock fails the test if it happens.
    struct MockGpu {
        image_count: u32,
        slot_count: usize,
        /// Fence state per slot; starts signaled.
        fence_signaled: Vec<bool>,
        /// Slot whose submission each image's command buffer belongs to,
        /// while that submission has not been fence-waited.
        in_flight: Vec<Option<usize>>,
        next_image: u32,
        /// Force the next acquire to report out-of-date.
        stale_acquires: u32,
        acquires: u32,
        submits: u32,
        presents: u32,
        fence_waits: u32,
        fence_resets: u32,
    }

    impl MockGpu {
        fn new(image_count: u32, slot_count: usize) -> Self {
            Self {
                image_count,
                slot_count,
                fence_signaled: vec![true; slot_count],
                in_flight: vec![None; image_count as usize],
                next_image: 0,
                stale_acquires: 0,
                acquires: 0,
                submits: 0,
                presents: 0,
                fence_waits: 0,
                fence_resets: 0,
            }
        }
    }

    impl FrameBackend for MockGpu {
        fn wait_fence(&mut self, slot: usize) -> Result<()> {
            assert!(slot < self.slot_count);
            self.fence_waits += 1;
            // Waiting completes the slot's outstanding submission
            for owner in &mut self.in_flight {
                if *owner == Some(slot) {
                    *owner = None;
                }
            }
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> Result<()> {
            assert!(
                self.fence_signaled[slot],
                "fence reset while unsignaled: a submission would deadlock"
            );
            self.fence_resets += 1;
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> Result<u32> {
            if self.stale_acquires > 0 {
                self.stale_acquires -= 1;
                return Err(GpuError::SwapchainStale);
            }
            self.acquires += 1;
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(image)
        }

        fn begin_commands(&mut self, image_index: u32) -> Result<()> {
            assert!(
                self.in_flight[image_index as usize].is_none(),
                "recording into command buffer {image_index} while the GPU may still read it"
            );
            Ok(())
        }

        fn submit_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
            assert!(
                !self.fence_signaled[slot],
                "submission with a signaled fence: wait/reset discipline broken"
            );
            self.submits += 1;
            self.in_flight[image_index as usize] = Some(slot);
            Ok(())
        }

        fn present_image(&mut self, _slot: usize, _image_index: u32) -> Result<PresentOutcome> {
            self.presents += 1;
            Ok(PresentOutcome::Presented)
        }
    }

    #[test]
    fn thousand_frames_never_rerecord_in_flight_buffers() {
        let mut gpu = MockGpu::new(3, 1);
        let mut scheduler = FrameScheduler::new(1);

        for _ in 0..1000 {
            let token = scheduler.begin_frame(&mut gpu).unwrap();
            let outcome = scheduler.end_frame(&mut gpu, token).unwrap();
            assert_eq!(outcome, PresentOutcome::Presented);
        }

        assert_eq!(scheduler.frame_number(), 1000);
        assert_eq!(gpu.acquires, 1000);
        assert_eq!(gpu.submits, 1000);
        assert_eq!(gpu.presents, 1000);
    }

    #[test]
    fn thousand_frames_with_three_slots() {
        let mut gpu = MockGpu::new(3, 3);
        let mut scheduler = FrameScheduler::new(3);

        for _ in 0..1000 {
            let token = scheduler.begin_frame(&mut gpu).unwrap();
            scheduler.end_frame(&mut gpu, token).unwrap();
        }
        assert_eq!(gpu.submits, 1000);
    }

    #[test]
    fn two_frame_scenario_counts_and_fence_toggles() {
        let mut gpu = MockGpu::new(3, 1);
        let mut scheduler = FrameScheduler::new(1);

        for expected_image in [0, 1] {
            let token = scheduler.begin_frame(&mut gpu).unwrap();
            assert_eq!(token.image_index, expected_image);
            scheduler.end_frame(&mut gpu, token).unwrap();
        }

        assert_eq!(gpu.acquires, 2);
        assert_eq!(gpu.submits, 2);
        assert_eq!(gpu.presents, 2);
        // Fence toggled reset -> signaled -> reset twice
        assert_eq!(gpu.fence_resets, 2);
        assert_eq!(gpu.fence_waits, 2);
    }

    #[test]
    fn stale_acquire_leaves_fence_signaled_for_retry() {
        let mut gpu = MockGpu::new(2, 1);
        gpu.stale_acquires = 1;
        let mut scheduler = FrameScheduler::new(1);

        let err = scheduler.begin_frame(&mut gpu).unwrap_err();
        assert!(err.is_swapchain_stale());
        assert!(gpu.fence_signaled[0], "stale acquire must not eat the fence");
        assert_eq!(gpu.fence_resets, 0);

        // After "recreation" the next frame proceeds normally
        let token = scheduler.begin_frame(&mut gpu).unwrap();
        scheduler.end_frame(&mut gpu, token).unwrap();
        assert_eq!(gpu.submits, 1);
    }

    #[test]
    fn begin_and_end_must_alternate() {
        let mut gpu = MockGpu::new(2, 1);
        let mut scheduler = FrameScheduler::new(1);

        let token = scheduler.begin_frame(&mut gpu).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut gpu2 = MockGpu::new(2, 1);
            scheduler.begin_frame(&mut gpu2).unwrap();
        }));
        assert!(result.is_err(), "double begin_frame must panic");

        scheduler.end_frame(&mut gpu, token).unwrap();
    }

    #[test]
    fn slots_advance_round_robin() {
        let mut gpu = MockGpu::new(4, 2);
        let mut scheduler = FrameScheduler::new(2);

        let first = scheduler.begin_frame(&mut gpu).unwrap();
        assert_eq!(first.slot, 0);
        scheduler.end_frame(&mut gpu, first).unwrap();

        let second = scheduler.begin_frame(&mut gpu).unwrap();
        assert_eq!(second.slot, 1);
        scheduler.end_frame(&mut gpu, second).unwrap();

        let third = scheduler.begin_frame(&mut gpu).unwrap();
        assert_eq!(third.slot, 0);
        scheduler.end_frame(&mut gpu, third).unwrap();
    }
}
