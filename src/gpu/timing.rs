/// Per-dispatch timing telemetry
///
/// - `cpu_time`: encoding and submission on the host
/// - `gpu_time`: submission until the queue reported the work done
/// - `kernel_time`: timestamp delta around the compute pass when the device
///   supports timestamp queries, otherwise `gpu_time`
///
/// Timings resolve asynchronously. `PendingTimings::try_resolve` polls
/// without blocking; `wait` blocks and is reserved for benchmarking.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::GpuContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBufferTimings {
    pub kernel_time: Duration,
    pub gpu_time: Duration,
    pub cpu_time: Duration,
}

/// Begin/end timestamp pair written around a compute pass
pub struct TimestampQueries {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    period_ns: f32,
}

const TIMESTAMP_COUNT: u32 = 2;
const TIMESTAMP_BYTES: u64 = TIMESTAMP_COUNT as u64 * std::mem::size_of::<u64>() as u64;

impl TimestampQueries {
    /// `None` when the device was created without timestamp support
    pub fn new(ctx: &GpuContext) -> Option<Self> {
        if !ctx.supports_timestamps() {
            return None;
        }

        let device = ctx.device();
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Dispatch Timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: TIMESTAMP_COUNT,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Resolve Buffer"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Some(Self {
            query_set,
            resolve_buffer,
            period_ns: ctx.queue().get_timestamp_period(),
        })
    }

    pub fn compute_pass_writes(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    /// Encode the resolve and a copy into a fresh mappable buffer
    pub fn resolve(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder) -> TimestampReadback {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Readback Buffer"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.resolve_query_set(&self.query_set, 0..TIMESTAMP_COUNT, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, &buffer, 0, TIMESTAMP_BYTES);

        TimestampReadback {
            buffer,
            period_ns: self.period_ns,
        }
    }
}

/// Mappable copy of one resolved timestamp pair
pub struct TimestampReadback {
    buffer: wgpu::Buffer,
    period_ns: f32,
}

#[derive(Debug, Default)]
struct Completion {
    finished_at: Option<Instant>,
    mapped: Option<Result<(), wgpu::BufferAsyncError>>,
}

/// Timings of a submitted command buffer that may still be executing
pub struct PendingTimings {
    submitted_at: Instant,
    cpu_time: Duration,
    completion: Arc<Mutex<Completion>>,
    timestamps: Option<TimestampReadback>,
    resolved: Option<Option<CommandBufferTimings>>,
}

/// Polls `wait` makes before giving up on a lost device
const WAIT_ATTEMPTS: usize = 8;

impl PendingTimings {
    /// Register completion callbacks for the most recent submission.
    /// Call right after `Queue::submit`.
    pub fn track(
        queue: &wgpu::Queue,
        submitted_at: Instant,
        cpu_time: Duration,
        timestamps: Option<TimestampReadback>,
    ) -> Self {
        let completion = Arc::new(Mutex::new(Completion::default()));

        let finished = Arc::clone(&completion);
        queue.on_submitted_work_done(move || {
            if let Ok(mut state) = finished.lock() {
                state.finished_at = Some(Instant::now());
            }
        });

        if let Some(readback) = &timestamps {
            let mapped = Arc::clone(&completion);
            readback.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                if let Ok(mut state) = mapped.lock() {
                    state.mapped = Some(result);
                }
            });
        }

        Self {
            submitted_at,
            cpu_time,
            completion,
            timestamps,
            resolved: None,
        }
    }

    /// Timings if the GPU has finished, without blocking.
    ///
    /// `Some(None)` means the work finished but the timestamp readback failed.
    pub fn try_resolve(&mut self) -> Option<Option<CommandBufferTimings>> {
        if self.resolved.is_none() {
            self.resolved = self.resolve_once();
        }
        self.resolved
    }

    fn resolve_once(&self) -> Option<Option<CommandBufferTimings>> {
        let state = self.completion.lock().ok()?;
        let finished_at = state.finished_at?;
        let gpu_time = finished_at.saturating_duration_since(self.submitted_at);

        let kernel_time = match (&self.timestamps, &state.mapped) {
            (None, _) => gpu_time,
            (Some(_), None) => return None,
            (Some(_), Some(Err(e))) => {
                log::warn!("⚠️  Timestamp readback failed: {}", e);
                return Some(None);
            }
            (Some(readback), Some(Ok(()))) => read_kernel_time(readback).unwrap_or(gpu_time),
        };

        Some(Some(CommandBufferTimings {
            kernel_time,
            gpu_time,
            cpu_time: self.cpu_time,
        }))
    }

    /// Block until the timings are available
    pub fn wait(mut self, device: &wgpu::Device) -> Option<CommandBufferTimings> {
        for _ in 0..WAIT_ATTEMPTS {
            device.poll(wgpu::Maintain::Wait);
            if let Some(result) = self.try_resolve() {
                return result;
            }
        }
        log::warn!("⚠️  Gave up waiting for dispatch timings");
        None
    }
}

fn read_kernel_time(readback: &TimestampReadback) -> Option<Duration> {
    let ticks: Vec<u64> = {
        let view = readback.buffer.slice(..).get_mapped_range();
        view.chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect()
    };
    readback.buffer.unmap();

    let elapsed = ticks.get(1)?.saturating_sub(*ticks.first()?);
    if elapsed == 0 {
        return None;
    }
    Some(Duration::from_nanos((elapsed as f64 * readback.period_ns as f64) as u64))
}
