// Descriptor set cache
//
// Sets are created lazily per (thread, pipeline, set index[, object]) from the
// calling thread's own descriptor pool and reused on every later frame. Each
// entry remembers the binding target it was written against; asking for the
// same key with a different target retires the old set and builds a new one.
// Retired sets go back to their pool once no frame in flight can use them.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::pipelines::PipelineId;
use crate::error::GpuResult;
use crate::gpu::{DescriptorWrite, GpuContext, Scoped};

/// Identity of what a set's bindings point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingTarget {
    /// Size-dependent attachments of one surface generation.
    Surface { generation: u64 },
    /// Scene uniforms plus the light buffer as laid out by one restructure.
    LightBuffer { generation: u64 },
    /// A material or bone snapshot, identified by its resource handles.
    Object { primary: u64, secondary: u64 },
}

impl BindingTarget {
    pub fn is_surface(&self) -> bool {
        matches!(self, BindingTarget::Surface { .. })
    }

    pub fn is_light_buffer(&self) -> bool {
        matches!(self, BindingTarget::LightBuffer { .. })
    }
}

/// Cache key. `object` distinguishes per-draw sets (materials, bones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetKey {
    pub thread: usize,
    pub pipeline: PipelineId,
    pub set: u32,
    pub object: Option<u64>,
}

impl SetKey {
    pub fn shared(thread: usize, pipeline: PipelineId, set: u32) -> Self {
        Self {
            thread,
            pipeline,
            set,
            object: None,
        }
    }

    pub fn object(thread: usize, pipeline: PipelineId, set: u32, object: u64) -> Self {
        Self {
            thread,
            pipeline,
            set,
            object: Some(object),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    set: vk::DescriptorSet,
    target: BindingTarget,
}

struct Partition {
    pool: Scoped<vk::DescriptorPool>,
    entries: HashMap<SetKey, Entry>,
    /// (frame retired, set)
    retired: Vec<(u64, vk::DescriptorSet)>,
}

/// Per-thread memo of descriptor sets.
pub struct DescriptorSetCache {
    gpu: Arc<dyn GpuContext>,
    partitions: Vec<Mutex<Partition>>,
    allocations: Mutex<usize>,
}

const POOL_TYPES: [vk::DescriptorType; 5] = [
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

impl DescriptorSetCache {
    /// One partition (and descriptor pool) per recording thread, driver included.
    pub fn new(gpu: &Arc<dyn GpuContext>, threads: usize, sets_per_thread: u32) -> GpuResult<Self> {
        let sizes: Vec<vk::DescriptorPoolSize> = POOL_TYPES
            .iter()
            .map(|&ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: sets_per_thread * 4,
            })
            .collect();

        let partitions = (0..threads)
            .map(|_| {
                let pool = gpu.create_descriptor_pool(sets_per_thread, &sizes)?;
                Ok(Mutex::new(Partition {
                    pool: Scoped::new(gpu, pool),
                    entries: HashMap::new(),
                    retired: Vec::new(),
                }))
            })
            .collect::<GpuResult<Vec<_>>>()?;

        Ok(Self {
            gpu: Arc::clone(gpu),
            partitions,
            allocations: Mutex::new(0),
        })
    }

    /// Returns the cached set for `key`, creating and binding it on a miss.
    ///
    /// `bind` produces the writes for a freshly allocated set and only runs on
    /// a miss. `frame` stamps a set replaced because its target changed.
    pub fn get_or_create<F>(
        &self,
        key: SetKey,
        target: BindingTarget,
        layout: vk::DescriptorSetLayout,
        frame: u64,
        bind: F,
    ) -> GpuResult<vk::DescriptorSet>
    where
        F: FnOnce() -> Vec<DescriptorWrite>,
    {
        debug_assert!(key.thread < self.partitions.len(), "no partition for thread {}", key.thread);
        let mut partition = self.partitions[key.thread].lock();

        if let Some(entry) = partition.entries.get(&key).copied() {
            if entry.target == target {
                return Ok(entry.set);
            }
            log::debug!(
                "Descriptor set {:?} rebinding {:?} -> {:?}",
                key,
                entry.target,
                target
            );
            partition.entries.remove(&key);
            partition.retired.push((frame, entry.set));
        }

        let set = self.gpu.allocate_descriptor_set(partition.pool.get(), layout)?;
        self.gpu.write_descriptors(set, &bind());
        partition.entries.insert(key, Entry { set, target });
        *self.allocations.lock() += 1;
        Ok(set)
    }

    /// Retires every entry whose target matches `stale`.
    pub fn invalidate_where<P>(&self, frame: u64, stale: P) -> usize
    where
        P: Fn(&BindingTarget) -> bool,
    {
        let mut count = 0;
        for partition in &self.partitions {
            let mut partition = partition.lock();
            let Partition {
                entries, retired, ..
            } = &mut *partition;
            entries.retain(|_, entry| {
                if stale(&entry.target) {
                    retired.push((frame, entry.set));
                    count += 1;
                    false
                } else {
                    true
                }
            });
        }
        if count > 0 {
            log::debug!("Retired {} stale descriptor sets", count);
        }
        count
    }

    /// Frees sets retired at least `frames_in_flight` frames before `frame`.
    pub fn collect(&self, frame: u64, frames_in_flight: u64) -> GpuResult<usize> {
        let mut freed = 0;
        for partition in &self.partitions {
            let mut partition = partition.lock();
            let (ready, waiting): (Vec<_>, Vec<_>) = partition
                .retired
                .drain(..)
                .partition(|(retired_at, _)| retired_at + frames_in_flight <= frame);
            partition.retired = waiting;
            if !ready.is_empty() {
                let sets: Vec<vk::DescriptorSet> = ready.into_iter().map(|(_, set)| set).collect();
                self.gpu.free_descriptor_sets(partition.pool.get(), &sets)?;
                freed += sets.len();
            }
        }
        Ok(freed)
    }

    /// Sets allocated since creation, including replacements.
    pub fn allocations(&self) -> usize {
        *self.allocations.lock()
    }

    /// Live entries across all threads.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retired(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().retired.len()).sum()
    }

    pub fn threads(&self) -> usize {
        self.partitions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Completion, HeadlessContext};
    use std::cell::Cell;

    fn setup() -> (Arc<HeadlessContext>, Arc<dyn GpuContext>, vk::DescriptorSetLayout) {
        let headless = Arc::new(HeadlessContext::new(
            vk::Extent2D {
                width: 64,
                height: 64,
            },
            2,
            Completion::Immediate,
        ));
        let gpu: Arc<dyn GpuContext> = headless.clone();
        let layout = gpu.create_descriptor_set_layout(&[]).unwrap();
        (headless, gpu, layout)
    }

    #[test]
    fn hit_does_not_allocate_or_rebind() {
        let (headless, gpu, layout) = setup();
        let cache = DescriptorSetCache::new(&gpu, 2, 8).unwrap();
        let key = SetKey::shared(1, PipelineId::LightingStenciled, 0);
        let target = BindingTarget::LightBuffer { generation: 1 };
        let binds = Cell::new(0);

        let first = cache
            .get_or_create(key, target, layout, 0, || {
                binds.set(binds.get() + 1);
                Vec::new()
            })
            .unwrap();
        let second = cache
            .get_or_create(key, target, layout, 1, || {
                binds.set(binds.get() + 1);
                Vec::new()
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(binds.get(), 1);
        assert_eq!(cache.allocations(), 1);
        assert_eq!(headless.stats().descriptor_sets_allocated, 1);
    }

    #[test]
    fn key_never_serves_two_targets() {
        let (_headless, gpu, layout) = setup();
        let cache = DescriptorSetCache::new(&gpu, 1, 8).unwrap();
        let key = SetKey::shared(0, PipelineId::Composite, 0);

        let old = cache
            .get_or_create(key, BindingTarget::Surface { generation: 1 }, layout, 3, Vec::new)
            .unwrap();
        let new = cache
            .get_or_create(key, BindingTarget::Surface { generation: 2 }, layout, 4, Vec::new)
            .unwrap();

        assert_ne!(old, new);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.retired(), 1);
        assert_eq!(cache.allocations(), 2);
    }

    #[test]
    fn threads_get_their_own_sets() {
        let (_headless, gpu, layout) = setup();
        let cache = DescriptorSetCache::new(&gpu, 3, 8).unwrap();
        let target = BindingTarget::LightBuffer { generation: 0 };
        let sets: Vec<_> = (0..3)
            .map(|thread| {
                cache
                    .get_or_create(
                        SetKey::shared(thread, PipelineId::GBufferStatic, 0),
                        target,
                        layout,
                        0,
                        Vec::new,
                    )
                    .unwrap()
            })
            .collect();
        assert_ne!(sets[0], sets[1]);
        assert_ne!(sets[1], sets[2]);
    }

    #[test]
    fn retired_sets_wait_for_frames_in_flight() {
        let (headless, gpu, layout) = setup();
        let cache = DescriptorSetCache::new(&gpu, 1, 8).unwrap();
        let set = cache
            .get_or_create(
                SetKey::shared(0, PipelineId::LightingUnmasked, 0),
                BindingTarget::LightBuffer { generation: 0 },
                layout,
                0,
                Vec::new,
            )
            .unwrap();

        assert_eq!(cache.invalidate_where(10, BindingTarget::is_light_buffer), 1);
        assert_eq!(cache.collect(11, 2).unwrap(), 0);
        assert!(headless.is_live(set));
        assert_eq!(cache.collect(12, 2).unwrap(), 1);
        assert!(!headless.is_live(set));
        assert!(cache.is_empty());
    }

    #[test]
    fn exhausted_pool_reports_exhaustion() {
        let (_headless, gpu, layout) = setup();
        let cache = DescriptorSetCache::new(&gpu, 1, 1).unwrap();
        let target = BindingTarget::Object {
            primary: 1,
            secondary: 2,
        };
        cache
            .get_or_create(SetKey::object(0, PipelineId::GBufferStatic, 1, 1), target, layout, 0, Vec::new)
            .unwrap();
        let err = cache
            .get_or_create(SetKey::object(0, PipelineId::GBufferStatic, 1, 2), target, layout, 0, Vec::new)
            .unwrap_err();
        assert!(err.is_exhaustion());
    }
}
