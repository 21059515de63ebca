//! Parallel recording of per-frame command buffers.
//!
//! [`RecordSchedule`] splits registered drawables into one bucket per worker
//! (round robin, fixed once assigned). Each bucket is tied to the worker
//! command pool with the same index, so a drawable is always recorded on the
//! thread that owns the pool its secondary command buffer came from.
//! [`FrameRecorder`] adds the primary command buffer around it.
//!
//! # Recording a frame
//!
//! ```text
//! primary: begin -> begin render pass (secondary contents)
//! workers: drawable.record(ctx) for every drawable in their bucket
//! barrier
//! primary: execute secondaries (registration order) -> end render pass -> end
//! ```
//!
//! Every drawable owns exactly one secondary command buffer, so recording an
//! image invalidates whatever primary was recorded for the previous one.

use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use parking_lot::Mutex;
use tessera_core::{RendererConfig, WorkerPool};
use tessera_rhi::command::{self, CommandBuffer};
use tessera_rhi::device::Device;
use tessera_rhi::packer::ResourcePacker;
use tracing::{debug, error, info};

use crate::drawable::{Drawable, RecordContext, SharedDrawable};
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameTargets;

/// Splits `0..count` into `buckets` round-robin buckets: item `i` goes to
/// bucket `i % buckets`. Buckets may be empty.
pub fn partition_round_robin(count: usize, buckets: usize) -> Vec<Vec<usize>> {
    let mut partition = vec![Vec::new(); buckets];
    if buckets == 0 {
        return partition;
    }
    for i in 0..count {
        partition[i % buckets].push(i);
    }
    partition
}

// =============================================================================
// RecordSchedule
// =============================================================================

/// Drawables, their worker buckets and the pool that records them.
///
/// The schedule must be prepared again after any change to the drawables or
/// the bucket count; recording from a stale preparation would run drawables on
/// workers that do not own their command pools.
pub struct RecordSchedule {
    pool: WorkerPool,
    drawables: Vec<SharedDrawable>,
    buckets: Vec<Vec<usize>>,
    /// Bucket count the drawables were last prepared for.
    prepared_for: Option<usize>,
}

impl RecordSchedule {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            drawables: Vec::new(),
            buckets: Vec::new(),
            prepared_for: None,
        }
    }

    #[inline]
    pub fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[inline]
    pub fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    /// Current partition; bucket `b` is recorded on worker `b`.
    #[inline]
    pub fn buckets(&self) -> &[Vec<usize>] {
        &self.buckets
    }

    /// Whether the drawables are prepared for the current partition.
    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared_for.is_some_and(|count| count == self.buckets.len())
    }

    /// Appends drawables in order. Invalidates any previous preparation.
    pub fn register_drawables<I>(&mut self, drawables: I)
    where
        I: IntoIterator<Item = SharedDrawable>,
    {
        let before = self.drawables.len();
        self.drawables.extend(drawables);
        self.prepared_for = None;
        debug!(
            "Registered {} drawable(s) ({} total)",
            self.drawables.len() - before,
            self.drawables.len()
        );
    }

    /// Partitions the registered drawables across `worker_count` buckets.
    /// Invalidates any previous preparation.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] unless
    /// `1 <= worker_count <= pool.worker_count()`.
    pub fn assign_workers(&mut self, worker_count: usize) -> RenderResult<()> {
        if worker_count == 0 || worker_count > self.pool.worker_count() {
            return Err(RenderError::Recorder(format!(
                "Cannot assign {} bucket(s) to a pool of {} worker(s)",
                worker_count,
                self.pool.worker_count()
            )));
        }

        self.buckets = partition_round_robin(self.drawables.len(), worker_count);
        self.prepared_for = None;
        debug!(
            "Assigned {} drawable(s) to {} worker(s): {:?}",
            self.drawables.len(),
            worker_count,
            self.buckets.iter().map(Vec::len).collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Runs `setup(bucket, drawable)` for every drawable in bucket order on
    /// the calling thread, then marks the schedule prepared.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] if workers are not assigned, or the
    /// first error from `setup`. The schedule stays unprepared on error.
    pub fn prepare_with<F>(&mut self, mut setup: F) -> RenderResult<()>
    where
        F: FnMut(usize, &mut dyn Drawable) -> RenderResult<()>,
    {
        self.check_assignment()?;
        self.prepared_for = None;

        for (bucket, indices) in self.buckets.iter().enumerate() {
            for &i in indices {
                let mut drawable = self.drawables[i].lock();
                setup(bucket, &mut *drawable)?;
            }
        }

        self.prepared_for = Some(self.buckets.len());
        Ok(())
    }

    /// Records every drawable on its bucket's worker and waits for all of
    /// them. Returns the secondary command buffers in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] if the schedule is not prepared for
    /// the current partition, the first error raised by a drawable, or a
    /// panicked recording job.
    pub fn record_secondaries(&self, ctx: &RecordContext) -> RenderResult<Vec<vk::CommandBuffer>> {
        self.check_assignment()?;
        if !self.is_prepared() {
            return Err(RenderError::Recorder(
                "Drawables are not prepared for the current worker assignment".to_string(),
            ));
        }

        let errors: Arc<Mutex<Vec<RenderError>>> = Arc::new(Mutex::new(Vec::new()));
        for (worker, indices) in self.buckets.iter().enumerate() {
            for &i in indices {
                let drawable = self.drawables[i].clone();
                let errors = errors.clone();
                let ctx = *ctx;
                self.pool.submit(worker, move || {
                    let mut drawable = drawable.lock();
                    if let Err(e) = drawable.record(&ctx) {
                        error!("Failed to record '{}': {}", drawable.name(), e);
                        errors.lock().push(e);
                    }
                });
            }
        }
        self.pool.barrier()?;

        let mut errors = std::mem::take(&mut *errors.lock());
        if !errors.is_empty() {
            error!("{} drawable(s) failed to record", errors.len());
            return Err(errors.swap_remove(0));
        }

        Ok(self
            .drawables
            .iter()
            .map(|d| d.lock().command_buffer())
            .collect())
    }

    fn check_assignment(&self) -> RenderResult<()> {
        let assigned: usize = self.buckets.iter().map(Vec::len).sum();
        if self.buckets.is_empty() || assigned != self.drawables.len() {
            return Err(RenderError::Recorder(format!(
                "{} of {} drawable(s) assigned; call assign_workers after registering",
                assigned,
                self.drawables.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// FrameRecorder
// =============================================================================

/// Records primary command buffers from drawables in parallel.
pub struct FrameRecorder {
    device: Arc<Device>,
    schedule: RecordSchedule,
    clear_values: [vk::ClearValue; 2],
}

impl FrameRecorder {
    /// Creates a recorder with `config.worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be started.
    pub fn new(device: Arc<Device>, config: &RendererConfig) -> RenderResult<Self> {
        Ok(Self::with_pool(
            device,
            WorkerPool::from_config(config)?,
            config,
        ))
    }

    /// Creates a recorder driving an existing pool.
    pub fn with_pool(device: Arc<Device>, pool: WorkerPool, config: &RendererConfig) -> Self {
        info!(
            "Frame recorder created with {} worker(s)",
            pool.worker_count()
        );

        Self {
            device,
            schedule: RecordSchedule::new(pool),
            clear_values: command::clear_values(config.clear_color, config.clear_depth),
        }
    }

    #[inline]
    pub fn worker_pool(&self) -> &WorkerPool {
        self.schedule.worker_pool()
    }

    #[inline]
    pub fn schedule(&self) -> &RecordSchedule {
        &self.schedule
    }

    #[inline]
    pub fn drawable_count(&self) -> usize {
        self.schedule.drawable_count()
    }

    #[inline]
    pub fn buckets(&self) -> &[Vec<usize>] {
        self.schedule.buckets()
    }

    /// See [`RecordSchedule::register_drawables`].
    pub fn register_drawables<I>(&mut self, drawables: I)
    where
        I: IntoIterator<Item = SharedDrawable>,
    {
        self.schedule.register_drawables(drawables);
    }

    /// See [`RecordSchedule::assign_workers`].
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] for an out-of-range worker count.
    pub fn assign_workers(&mut self, worker_count: usize) -> RenderResult<()> {
        self.schedule.assign_workers(worker_count)
    }

    /// Gives every drawable its bucket's command pool, allocates its
    /// secondary command buffer and uploads its buffers.
    ///
    /// Must be called again after [`assign_workers`](Self::assign_workers) or
    /// [`register_drawables`](Self::register_drawables).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] if workers are not assigned or the
    /// packer has fewer command pools than buckets, or any allocation or
    /// upload error.
    pub fn prepare(&mut self, packer: &mut ResourcePacker) -> RenderResult<()> {
        let bucket_count = self.schedule.buckets().len();
        if packer.command_pool_count() < bucket_count {
            return Err(RenderError::Recorder(format!(
                "Packer has {} command pool(s) for {} bucket(s)",
                packer.command_pool_count(),
                bucket_count
            )));
        }

        self.schedule.prepare_with(|bucket, drawable| {
            let (pool_handle, command_buffer) = {
                let pool = packer.command_pool(bucket).ok_or_else(|| {
                    RenderError::Recorder(format!("Missing command pool {}", bucket))
                })?;
                let buffers = pool.allocate_secondary_command_buffers(1)?;
                let command_buffer = buffers.first().copied().ok_or_else(|| {
                    RenderError::Recorder(format!("Pool {} returned no command buffer", bucket))
                })?;
                (pool.handle(), command_buffer)
            };

            drawable.set_command_pool(pool_handle);
            drawable.set_command_buffer(command_buffer);
            drawable.create_buffers(packer)
        })?;

        info!(
            "Prepared {} drawable(s) across {} bucket(s)",
            self.schedule.drawable_count(),
            bucket_count
        );
        Ok(())
    }

    /// Records the primary command buffer of every swapchain image in turn.
    ///
    /// Drawables re-record their single secondary buffer for each image, so
    /// once this returns only the last primary is still submittable. To
    /// present, record with [`record_image`](Self::record_image) for each
    /// acquired image instead, as [`FrameLoop`](crate::FrameLoop) does.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] if the counts differ, or the first
    /// recording error.
    pub fn record(
        &self,
        targets: &FrameTargets,
        primaries: &[vk::CommandBuffer],
        view_projection: Mat4,
    ) -> RenderResult<()> {
        if primaries.len() != targets.image_count() {
            return Err(RenderError::Recorder(format!(
                "{} primary command buffer(s) for {} framebuffer(s)",
                primaries.len(),
                targets.image_count()
            )));
        }

        for (image_index, &primary) in primaries.iter().enumerate() {
            self.record_image(targets, image_index, primary, view_projection)?;
        }
        Ok(())
    }

    /// Records the primary command buffer for a single swapchain image.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Recorder`] if the drawables are not prepared for
    /// the current assignment, the first error raised by a drawable, a
    /// panicked recording job, or any Vulkan error on the primary buffer.
    pub fn record_image(
        &self,
        targets: &FrameTargets,
        image_index: usize,
        primary: vk::CommandBuffer,
        view_projection: Mat4,
    ) -> RenderResult<()> {
        let framebuffer = targets.framebuffer(image_index).ok_or_else(|| {
            RenderError::Recorder(format!(
                "No framebuffer for image {} of {}",
                image_index,
                targets.image_count()
            ))
        })?;
        if !self.schedule.is_prepared() {
            return Err(RenderError::Recorder(
                "Drawables are not prepared for the current worker assignment".to_string(),
            ));
        }

        let ctx = RecordContext {
            render_pass: targets.render_pass,
            subpass: 0,
            framebuffer,
            extent: targets.extent,
            view_projection,
        };

        let cmd = CommandBuffer::from_handle(self.device.clone(), primary);
        cmd.reset()?;
        cmd.begin_reusable()?;
        cmd.begin_render_pass(
            targets.render_pass,
            framebuffer,
            targets.extent,
            &self.clear_values,
        );

        let secondaries = self.schedule.record_secondaries(&ctx).inspect_err(|e| {
            error!("Recording image {} failed: {}", image_index, e);
        })?;
        if !secondaries.is_empty() {
            cmd.execute_commands(&secondaries);
        }

        cmd.end_render_pass();
        cmd.end()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::thread;

    fn sizes(partition: &[Vec<usize>]) -> Vec<usize> {
        partition.iter().map(Vec::len).collect()
    }

    /// Drawable that notes where and how often it was recorded.
    struct TestDrawable {
        name: String,
        /// Raw handle written into `command_buffer` by `record`.
        handle: u64,
        fail: bool,
        pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
        recorded_on: Option<String>,
        record_count: usize,
    }

    impl TestDrawable {
        fn new(handle: u64) -> Self {
            Self {
                name: format!("drawable-{handle}"),
                handle,
                fail: false,
                pool: vk::CommandPool::null(),
                command_buffer: vk::CommandBuffer::null(),
                recorded_on: None,
                record_count: 0,
            }
        }

        fn failing(handle: u64) -> Self {
            Self {
                fail: true,
                ..Self::new(handle)
            }
        }
    }

    impl Drawable for TestDrawable {
        fn name(&self) -> &str {
            &self.name
        }

        fn create_buffers(&mut self, _packer: &mut ResourcePacker) -> RenderResult<()> {
            Ok(())
        }

        fn record(&mut self, _ctx: &RecordContext) -> RenderResult<()> {
            self.recorded_on = thread::current().name().map(str::to_owned);
            self.record_count += 1;
            if self.fail {
                return Err(RenderError::Recorder(format!("{} refused", self.name)));
            }
            self.command_buffer = vk::CommandBuffer::from_raw(self.handle);
            Ok(())
        }

        fn set_command_pool(&mut self, pool: vk::CommandPool) {
            self.pool = pool;
        }

        fn set_command_buffer(&mut self, command_buffer: vk::CommandBuffer) {
            self.command_buffer = command_buffer;
        }

        fn command_buffer(&self) -> vk::CommandBuffer {
            self.command_buffer
        }
    }

    fn context() -> RecordContext {
        RecordContext {
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            framebuffer: vk::Framebuffer::null(),
            extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            view_projection: Mat4::IDENTITY,
        }
    }

    /// Registers `drawables` with a fresh schedule of `workers` workers.
    fn build_schedule(
        workers: usize,
        drawables: Vec<TestDrawable>,
    ) -> (RecordSchedule, Vec<Arc<Mutex<TestDrawable>>>) {
        let mut schedule = RecordSchedule::new(WorkerPool::new(workers).unwrap());
        let handles: Vec<Arc<Mutex<TestDrawable>>> =
            drawables.into_iter().map(|d| Arc::new(Mutex::new(d))).collect();
        schedule.register_drawables(handles.iter().map(|d| d.clone() as SharedDrawable));
        (schedule, handles)
    }

    fn test_drawables(count: u64) -> Vec<TestDrawable> {
        (1..=count).map(TestDrawable::new).collect()
    }

    /// Gives each drawable a pool handle of `bucket + 1`.
    fn assign_pools(bucket: usize, drawable: &mut dyn Drawable) -> RenderResult<()> {
        drawable.set_command_pool(vk::CommandPool::from_raw(bucket as u64 + 1));
        Ok(())
    }

    #[test]
    fn test_round_robin_balance() {
        let partition = partition_round_robin(10, 4);
        assert_eq!(sizes(&partition), vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_round_robin_assignment() {
        let partition = partition_round_robin(8, 3);
        assert_eq!(
            partition,
            vec![vec![0, 3, 6], vec![1, 4, 7], vec![2, 5]]
        );
    }

    #[test]
    fn test_round_robin_is_deterministic() {
        assert_eq!(partition_round_robin(17, 5), partition_round_robin(17, 5));
    }

    #[test]
    fn test_round_robin_empty_buckets() {
        let partition = partition_round_robin(2, 4);
        assert_eq!(partition, vec![vec![0], vec![1], vec![], vec![]]);

        assert_eq!(partition_round_robin(0, 3), vec![Vec::<usize>::new(); 3]);
        assert!(partition_round_robin(5, 0).is_empty());
    }

    #[test]
    fn test_round_robin_covers_every_index_once() {
        let partition = partition_round_robin(23, 6);
        let mut all: Vec<usize> = partition.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn test_secondaries_recorded_on_bucket_worker_in_registration_order() {
        let (mut schedule, drawables) = build_schedule(3, test_drawables(8));
        schedule.assign_workers(3).unwrap();
        schedule.prepare_with(assign_pools).unwrap();

        let secondaries = schedule.record_secondaries(&context()).unwrap();
        let raw: Vec<u64> = secondaries.iter().map(|cb| cb.as_raw()).collect();
        assert_eq!(raw, (1..=8).collect::<Vec<_>>());

        for (i, drawable) in drawables.iter().enumerate() {
            let drawable = drawable.lock();
            let worker = i % 3;
            assert_eq!(
                drawable.recorded_on.as_deref(),
                Some(format!("tessera-worker-{worker}").as_str())
            );
            assert_eq!(drawable.pool.as_raw(), worker as u64 + 1);
            assert_eq!(drawable.record_count, 1);
        }
    }

    #[test]
    fn test_fewer_drawables_than_workers() {
        let (mut schedule, drawables) = build_schedule(4, test_drawables(2));
        schedule.assign_workers(4).unwrap();
        assert_eq!(sizes(schedule.buckets()), vec![1, 1, 0, 0]);
        schedule.prepare_with(assign_pools).unwrap();

        let secondaries = schedule.record_secondaries(&context()).unwrap();
        assert_eq!(secondaries.len(), 2);
        assert_eq!(
            drawables[1].lock().recorded_on.as_deref(),
            Some("tessera-worker-1")
        );
    }

    #[test]
    fn test_no_drawables_records_nothing() {
        let (mut schedule, _) = build_schedule(2, Vec::new());
        schedule.assign_workers(2).unwrap();
        schedule.prepare_with(assign_pools).unwrap();
        assert!(schedule.record_secondaries(&context()).unwrap().is_empty());
    }

    #[test]
    fn test_each_recording_reuses_the_same_secondary() {
        let (mut schedule, drawables) = build_schedule(2, test_drawables(3));
        schedule.assign_workers(2).unwrap();
        schedule.prepare_with(assign_pools).unwrap();

        let first = schedule.record_secondaries(&context()).unwrap();
        let second = schedule.record_secondaries(&context()).unwrap();
        assert_eq!(first, second);
        assert!(drawables.iter().all(|d| d.lock().record_count == 2));
    }

    #[test]
    fn test_record_before_prepare_rejected() {
        let (mut schedule, drawables) = build_schedule(2, test_drawables(3));
        schedule.assign_workers(2).unwrap();

        assert!(matches!(
            schedule.record_secondaries(&context()),
            Err(RenderError::Recorder(_))
        ));
        assert!(drawables.iter().all(|d| d.lock().record_count == 0));
    }

    #[test]
    fn test_reassign_after_prepare_requires_prepare() {
        let (mut schedule, drawables) = build_schedule(4, test_drawables(4));
        schedule.assign_workers(4).unwrap();
        schedule.prepare_with(assign_pools).unwrap();
        assert!(schedule.is_prepared());

        schedule.assign_workers(2).unwrap();
        assert!(!schedule.is_prepared());
        assert!(matches!(
            schedule.record_secondaries(&context()),
            Err(RenderError::Recorder(_))
        ));
        assert!(drawables.iter().all(|d| d.lock().record_count == 0));

        schedule.prepare_with(assign_pools).unwrap();
        schedule.record_secondaries(&context()).unwrap();
        let drawable = drawables[3].lock();
        assert_eq!(drawable.recorded_on.as_deref(), Some("tessera-worker-1"));
        assert_eq!(drawable.pool.as_raw(), 2);
    }

    #[test]
    fn test_register_after_prepare_requires_assignment_and_prepare() {
        let (mut schedule, _) = build_schedule(2, test_drawables(2));
        schedule.assign_workers(2).unwrap();
        schedule.prepare_with(assign_pools).unwrap();

        schedule.register_drawables([crate::drawable::shared(TestDrawable::new(9))]);
        assert!(!schedule.is_prepared());
        assert!(schedule.record_secondaries(&context()).is_err());
        assert!(schedule.prepare_with(assign_pools).is_err());
    }

    #[test]
    fn test_failed_prepare_leaves_schedule_unprepared() {
        let (mut schedule, _) = build_schedule(2, test_drawables(2));
        schedule.assign_workers(2).unwrap();

        let result = schedule.prepare_with(|bucket, _| {
            if bucket == 1 {
                Err(RenderError::Recorder("no pool".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert!(!schedule.is_prepared());
    }

    #[test]
    fn test_recording_error_reported_after_all_jobs_ran() {
        let mut drawables = test_drawables(4);
        drawables[2] = TestDrawable::failing(3);
        let (mut schedule, drawables) = build_schedule(2, drawables);
        schedule.assign_workers(2).unwrap();
        schedule.prepare_with(assign_pools).unwrap();

        assert!(matches!(
            schedule.record_secondaries(&context()),
            Err(RenderError::Recorder(_))
        ));
        assert!(drawables.iter().all(|d| d.lock().record_count == 1));
    }

    #[test]
    fn test_assign_workers_range() {
        let (mut schedule, _) = build_schedule(2, test_drawables(3));
        assert!(schedule.assign_workers(0).is_err());
        assert!(schedule.assign_workers(3).is_err());
        assert!(schedule.assign_workers(1).is_ok());
        assert_eq!(schedule.buckets(), &[vec![0, 1, 2]]);
    }
}
