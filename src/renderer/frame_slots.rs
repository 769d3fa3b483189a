// Frames in flight
//
// One slot per swapchain image. Each slot owns the semaphores and fences that
// fence off its command buffers, plus the primary graphics and compute buffers
// re-recorded every time the slot comes around.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;

use crate::error::GpuResult;
use crate::gpu::{AcquireOutcome, GpuContext, QueueKind, Scoped};

/// What the last submission into a slot will signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignal {
    pub semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Sync primitives and primary buffers of one frame in flight.
pub struct FrameSlot {
    acquire: Scoped<vk::Semaphore>,
    render_finished: Scoped<vk::Semaphore>,
    compute_finished: Scoped<vk::Semaphore>,
    drawing_fence: Scoped<vk::Fence>,
    compute_fence: Scoped<vk::Fence>,
    // Freeing a pool frees the primaries allocated from it
    graphics_pool: Scoped<vk::CommandPool>,
    compute_pool: Scoped<vk::CommandPool>,
    graphics_primary: vk::CommandBuffer,
    compute_primary: vk::CommandBuffer,
    pending: Option<PendingSignal>,
}

impl FrameSlot {
    fn new(gpu: &Arc<dyn GpuContext>) -> GpuResult<Self> {
        let graphics_pool = Scoped::new(gpu, gpu.create_command_pool(QueueKind::Graphics)?);
        let compute_pool = Scoped::new(gpu, gpu.create_command_pool(QueueKind::Compute)?);
        let graphics_primary =
            gpu.allocate_command_buffers(graphics_pool.get(), vk::CommandBufferLevel::PRIMARY, 1)?[0];
        let compute_primary =
            gpu.allocate_command_buffers(compute_pool.get(), vk::CommandBufferLevel::PRIMARY, 1)?[0];

        Ok(Self {
            acquire: Scoped::new(gpu, gpu.create_semaphore()?),
            render_finished: Scoped::new(gpu, gpu.create_semaphore()?),
            compute_finished: Scoped::new(gpu, gpu.create_semaphore()?),
            // Signaled so the first wait on a fresh slot returns at once
            drawing_fence: Scoped::new(gpu, gpu.create_fence(true)?),
            compute_fence: Scoped::new(gpu, gpu.create_fence(true)?),
            graphics_pool,
            compute_pool,
            graphics_primary,
            compute_primary,
            pending: None,
        })
    }

    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire.get()
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.get()
    }

    pub fn compute_finished(&self) -> vk::Semaphore {
        self.compute_finished.get()
    }

    pub fn drawing_fence(&self) -> vk::Fence {
        self.drawing_fence.get()
    }

    pub fn compute_fence(&self) -> vk::Fence {
        self.compute_fence.get()
    }

    pub fn graphics_primary(&self) -> vk::CommandBuffer {
        self.graphics_primary
    }

    pub fn compute_primary(&self) -> vk::CommandBuffer {
        self.compute_primary
    }
}

/// The N slots plus the spare semaphore used for the next acquire.
pub struct FrameSlotSet {
    gpu: Arc<dyn GpuContext>,
    slots: Vec<FrameSlot>,
    spare_acquire: Scoped<vk::Semaphore>,
    slow_wait: Duration,
}

impl FrameSlotSet {
    /// Creates `count` slots, all idle.
    pub fn new(gpu: &Arc<dyn GpuContext>, count: usize, slow_wait: Duration) -> GpuResult<Self> {
        let slots = (0..count)
            .map(|_| FrameSlot::new(gpu))
            .collect::<GpuResult<Vec<_>>>()?;
        log::debug!("Created {} frame slots", count);
        Ok(Self {
            gpu: Arc::clone(gpu),
            slots,
            spare_acquire: Scoped::new(gpu, gpu.create_semaphore()?),
            slow_wait,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// Asks for the next image. The slot is the image index.
    ///
    /// Acquisition signals the spare semaphore, which then trades places with
    /// the slot's own: the slot's previous semaphore was consumed by its last
    /// submission and becomes the spare once that slot's fences are waited.
    pub fn acquire(&mut self) -> GpuResult<Option<(usize, vk::Semaphore)>> {
        match self.gpu.acquire_next_image(self.spare_acquire.get())? {
            AcquireOutcome::Stale => Ok(None),
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal at acquire");
                }
                let slot = index as usize;
                debug_assert!(slot < self.slots.len(), "image index outside slot range");
                std::mem::swap(&mut self.spare_acquire, &mut self.slots[slot].acquire);
                Ok(Some((slot, self.slots[slot].acquire.get())))
            }
        }
    }

    /// Blocks until the slot's previous work finished, then resets its fences
    /// and command pools for re-recording.
    pub fn wait_and_reset(&mut self, index: usize) -> GpuResult<()> {
        let slot = &mut self.slots[index];
        let fences = [slot.drawing_fence.get(), slot.compute_fence.get()];

        let started = Instant::now();
        self.gpu.wait_for_fences(&fences)?;
        let waited = started.elapsed();
        if waited > self.slow_wait {
            log::warn!("Frame slot {} fence wait took {:?}", index, waited);
        }

        self.gpu.reset_command_pool(slot.graphics_pool.get())?;
        self.gpu.reset_command_pool(slot.compute_pool.get())?;
        // Fences go last: the caller owes a submission once they are unsignaled
        self.gpu.reset_fences(&fences)?;
        slot.pending = None;
        Ok(())
    }

    /// Remembers what the slot's graphics submission signals.
    pub fn signal_on_submit(&mut self, index: usize, semaphores: &[vk::Semaphore], fence: vk::Fence) {
        self.slots[index].pending = Some(PendingSignal {
            semaphores: semaphores.to_vec(),
            fence,
        });
    }

    /// Semaphores the present of this slot has to wait on.
    pub fn take_present_wait(&mut self, index: usize) -> Vec<vk::Semaphore> {
        self.slots[index]
            .pending
            .take()
            .map(|p| p.semaphores)
            .unwrap_or_default()
    }

    pub fn pending(&self, index: usize) -> Option<&PendingSignal> {
        self.slots[index].pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Completion, HeadlessContext};
    use crate::gpu::Submission;

    fn headless(completion: Completion) -> (Arc<HeadlessContext>, Arc<dyn GpuContext>) {
        let headless = Arc::new(HeadlessContext::new(
            vk::Extent2D {
                width: 320,
                height: 240,
            },
            2,
            completion,
        ));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        gpu.create_swapchain(vk::Extent2D {
            width: 320,
            height: 240,
        })
        .unwrap();
        (headless, gpu)
    }

    #[test]
    fn acquire_rotates_semaphores() {
        let (_headless, gpu) = headless(Completion::Immediate);
        let mut slots = FrameSlotSet::new(&gpu, 2, Duration::from_secs(1)).unwrap();

        let (first, sem_a) = slots.acquire().unwrap().unwrap();
        let (second, sem_b) = slots.acquire().unwrap().unwrap();
        assert_eq!((first, second), (0, 1));
        assert_ne!(sem_a, sem_b);

        // Slot 0 again: gets the semaphore that was spare, not the one it held.
        let (third, sem_c) = slots.acquire().unwrap().unwrap();
        assert_eq!(third, 0);
        assert_ne!(sem_c, sem_a);
    }

    #[test]
    fn wait_and_reset_blocks_on_pending_work() {
        let (headless, gpu) = headless(Completion::Manual);
        let mut slots = FrameSlotSet::new(&gpu, 2, Duration::from_secs(1)).unwrap();

        slots.wait_and_reset(0).unwrap();
        let slot = slots.slot(0);
        gpu.submit(
            QueueKind::Graphics,
            &Submission {
                command_buffers: &[],
                wait: &[],
                signal: &[],
                fence: slot.drawing_fence(),
            },
        )
        .unwrap();
        gpu.submit(
            QueueKind::Compute,
            &Submission {
                command_buffers: &[],
                wait: &[],
                signal: &[],
                fence: slot.compute_fence(),
            },
        )
        .unwrap();
        assert!(!headless.is_signaled(slot.drawing_fence()));

        let completer = {
            let headless = Arc::clone(&headless);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                headless.complete_all();
            })
        };
        slots.wait_and_reset(0).unwrap();
        completer.join().unwrap();

        // Reset after the wait: both fences are unsignaled again
        assert!(!headless.is_signaled(slots.slot(0).drawing_fence()));
        assert!(!headless.is_signaled(slots.slot(0).compute_fence()));
        assert!(headless.violations().is_empty());
    }

    #[test]
    fn stale_surface_is_not_an_error() {
        let (headless, gpu) = headless(Completion::Immediate);
        let mut slots = FrameSlotSet::new(&gpu, 2, Duration::from_secs(1)).unwrap();
        headless.invalidate_surface();
        assert!(slots.acquire().unwrap().is_none());
    }

    #[test]
    fn dropping_the_set_releases_everything() {
        let (headless, gpu) = headless(Completion::Immediate);
        let slots = FrameSlotSet::new(&gpu, 3, Duration::from_secs(1)).unwrap();
        let fence = slots.slot(2).drawing_fence();
        assert!(headless.is_live(fence));
        drop(slots);
        assert!(!headless.is_live(fence));
        assert!(headless.violations().is_empty());
    }

    #[test]
    fn pending_signal_feeds_present() {
        let (_headless, gpu) = headless(Completion::Immediate);
        let mut slots = FrameSlotSet::new(&gpu, 2, Duration::from_secs(1)).unwrap();
        let done = slots.slot(1).render_finished();
        let fence = slots.slot(1).drawing_fence();
        slots.signal_on_submit(1, &[done], fence);
        assert_eq!(slots.pending(1).map(|p| p.fence), Some(fence));
        assert_eq!(slots.take_present_wait(1), vec![done]);
        assert!(slots.take_present_wait(1).is_empty());
    }
}
