// Secondary recording workers
//
// Thread 0 is the driver; threads 1..=T are OS threads that each own their
// command pools outright. A frame hands every worker at most one task through
// its mailbox, records whatever is left over on the driver thread, then joins.
// Failures come back as values and raise a shared flag. A panic inside a task
// is caught on the worker and reported the same way.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ash::vk;
use parking_lot::{Condvar, Mutex};

use super::passes::{record_task, FrameSnapshot, RecordContext, RecordTask};
use crate::error::{GpuError, GpuResult};
use crate::gpu::{GpuContext, QueueKind, Scoped};

/// Command pools of one recording thread, one per frame slot.
///
/// A slot's pool is reset the first time it is used in a new frame. The
/// driver has already waited on that slot's fences by then, so every buffer
/// from the pool has finished executing.
pub struct ThreadRecorder {
    gpu: Arc<dyn GpuContext>,
    slots: Vec<SlotPool>,
}

struct SlotPool {
    pool: Scoped<vk::CommandPool>,
    buffers: Vec<vk::CommandBuffer>,
    cursor: usize,
    frame: Option<u64>,
}

impl ThreadRecorder {
    pub fn new(gpu: &Arc<dyn GpuContext>) -> Self {
        Self {
            gpu: Arc::clone(gpu),
            slots: Vec::new(),
        }
    }

    /// Next free secondary buffer for `slot` in `frame`.
    pub fn next_buffer(&mut self, slot: usize, frame: u64) -> GpuResult<vk::CommandBuffer> {
        while self.slots.len() <= slot {
            let pool = self.gpu.create_command_pool(QueueKind::Graphics)?;
            self.slots.push(SlotPool {
                pool: Scoped::new(&self.gpu, pool),
                buffers: Vec::new(),
                cursor: 0,
                frame: None,
            });
        }

        let entry = &mut self.slots[slot];
        if entry.frame != Some(frame) {
            self.gpu.reset_command_pool(entry.pool.get())?;
            entry.cursor = 0;
            entry.frame = Some(frame);
        }
        if entry.cursor == entry.buffers.len() {
            let fresh = self.gpu.allocate_command_buffers(
                entry.pool.get(),
                vk::CommandBufferLevel::SECONDARY,
                1,
            )?;
            entry.buffers.extend(fresh);
        }
        let buffer = entry.buffers[entry.cursor];
        entry.cursor += 1;
        Ok(buffer)
    }

    /// Records one task into a fresh buffer.
    pub fn record(
        &mut self,
        ctx: &RecordContext,
        snapshot: &FrameSnapshot,
        thread: usize,
        task: RecordTask,
    ) -> GpuResult<vk::CommandBuffer> {
        let buffer = self.next_buffer(snapshot.slot, snapshot.frame)?;
        record_task(ctx, snapshot, thread, task, buffer)?;
        Ok(buffer)
    }
}

struct Job {
    task: RecordTask,
    snapshot: Arc<FrameSnapshot>,
}

#[derive(Default)]
struct MailboxState {
    job: Option<Job>,
    result: Option<GpuResult<vk::CommandBuffer>>,
    shutdown: bool,
}

#[derive(Default)]
struct Mailbox {
    state: Mutex<MailboxState>,
    changed: Condvar,
}

struct Worker {
    mailbox: Arc<Mailbox>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed pool of recording threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    local: ThreadRecorder,
    ctx: Arc<RecordContext>,
    failed: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `count` workers with thread ids 1..=count.
    pub fn new(ctx: &Arc<RecordContext>, count: usize) -> GpuResult<Self> {
        let failed = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            let thread = index + 1;
            let mailbox = Arc::new(Mailbox::default());
            let handle = {
                let mailbox = Arc::clone(&mailbox);
                let ctx = Arc::clone(ctx);
                let failed = Arc::clone(&failed);
                std::thread::Builder::new()
                    .name(format!("record-{thread}"))
                    .spawn(move || worker_loop(thread, &ctx, &mailbox, &failed))
                    .map_err(|e| GpuError::Init(format!("spawning recording worker {thread}: {e}")))?
            };
            workers.push(Worker {
                mailbox,
                handle: Some(handle),
            });
        }

        log::info!("Started {} recording workers", count);
        Ok(Self {
            workers,
            local: ThreadRecorder::new(&ctx.gpu),
            ctx: Arc::clone(ctx),
            failed,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Records `tasks` in parallel and returns their buffers in task order.
    ///
    /// Task `i < T` goes to worker `i + 1`; the rest are recorded here on the
    /// driver thread. Blocks until every worker is done.
    pub fn record_frame(
        &mut self,
        snapshot: &Arc<FrameSnapshot>,
        tasks: &[RecordTask],
    ) -> GpuResult<Vec<vk::CommandBuffer>> {
        self.failed.store(false, Ordering::SeqCst);
        let dispatched = tasks.len().min(self.workers.len());

        for (worker, &task) in self.workers.iter().zip(tasks) {
            let mut state = worker.mailbox.state.lock();
            debug_assert!(state.job.is_none() && state.result.is_none());
            state.job = Some(Job {
                task,
                snapshot: Arc::clone(snapshot),
            });
            worker.mailbox.changed.notify_one();
        }

        let mut buffers = vec![vk::CommandBuffer::null(); tasks.len()];
        let mut first_error = None;

        for (i, &task) in tasks.iter().enumerate().skip(dispatched) {
            match self.local.record(&self.ctx, snapshot, 0, task) {
                Ok(buffer) => buffers[i] = buffer,
                Err(e) => {
                    self.failed.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(e);
                    break;
                }
            }
        }

        // Join: every dispatched worker reports back, even after a failure
        for (i, worker) in self.workers.iter().take(dispatched).enumerate() {
            let mut state = worker.mailbox.state.lock();
            while state.result.is_none() {
                worker.mailbox.changed.wait(&mut state);
            }
            match state.result.take() {
                Some(Ok(buffer)) => buffers[i] = buffer,
                Some(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                None => {}
            }
        }

        if self.failed.load(Ordering::SeqCst) {
            let err = first_error
                .unwrap_or_else(|| GpuError::Init("recording worker failed without a cause".into()));
            log::error!("Secondary recording failed: {}", err);
            return Err(err);
        }
        Ok(buffers)
    }
}

fn worker_loop(thread: usize, ctx: &RecordContext, mailbox: &Mailbox, failed: &AtomicBool) {
    let mut recorder = ThreadRecorder::new(&ctx.gpu);
    loop {
        let job = {
            let mut state = mailbox.state.lock();
            loop {
                if state.shutdown {
                    log::debug!("Recording worker {} exiting", thread);
                    return;
                }
                if let Some(job) = state.job.take() {
                    break job;
                }
                mailbox.changed.wait(&mut state);
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            recorder.record(ctx, &job.snapshot, thread, job.task)
        }))
        .unwrap_or_else(|_| {
            Err(GpuError::Init(format!(
                "recording worker {} panicked on {:?}",
                thread, job.task
            )))
        });
        if let Err(e) = &result {
            log::error!("Worker {} failed recording {:?}: {}", thread, job.task, e);
            failed.store(true, Ordering::SeqCst);
        }

        let mut state = mailbox.state.lock();
        state.result = Some(result);
        mailbox.changed.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.mailbox.state.lock().shutdown = true;
            worker.mailbox.changed.notify_all();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::error!("Recording worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Completion, HeadlessContext};

    #[test]
    fn buffers_are_reused_after_the_slot_comes_back() {
        let headless = Arc::new(HeadlessContext::new(
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            2,
            Completion::Immediate,
        ));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        let mut recorder = ThreadRecorder::new(&gpu);

        let a = recorder.next_buffer(0, 0).unwrap();
        let b = recorder.next_buffer(0, 0).unwrap();
        assert_ne!(a, b);
        let other_slot = recorder.next_buffer(1, 1).unwrap();
        assert_ne!(other_slot, a);

        // Slot 0 again two frames later: same buffers, pool reset first
        assert_eq!(recorder.next_buffer(0, 2).unwrap(), a);
        assert_eq!(recorder.next_buffer(0, 2).unwrap(), b);
        assert_eq!(headless.stats().command_buffers_allocated, 3);
    }
}
