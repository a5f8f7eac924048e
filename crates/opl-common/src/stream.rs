//! Buffer ring and playback thread.
//!
//! A fixed set of PCM buffers moves between a free list and a ready queue.
//! The playback thread takes a free buffer, fills it through a
//! [`SampleClock`] and queues it; the consumer pops ready buffers and hands
//! them back with [`BufferRing::recycle`]. Nothing is allocated after the
//! ring is built.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use opl::RegisterSink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::driver::MusicDriver;
use crate::error::PlaybackError;
use crate::sample_clock::SampleClock;

/// Producer sleep when no free buffer is available (microseconds).
pub const BUFFER_BACKOFF_MICROS: u64 = 500;

/// Streaming configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per buffer
    pub buffer_frames: usize,
    /// Buffers in the ring
    pub buffer_count: usize,
    /// Interleaved stereo output
    pub stereo: bool,
}

impl StreamConfig {
    /// Small buffers for interactive use.
    /// 4 × 256 frames ≈ 23ms @ 44.1kHz
    pub fn low_latency(sample_rate: u32) -> Self {
        StreamConfig {
            sample_rate,
            buffer_frames: 256,
            buffer_count: 4,
            stereo: false,
        }
    }

    /// Interleaved channels per frame.
    pub fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// Samples held by one buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer_frames * self.channels()
    }

    /// Latency of a full ring in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_frames * self.buffer_count) as f32 / self.sample_rate as f32 * 1000.0
    }

    /// Check the configuration for usable values.
    pub fn validate(&self) -> Result<(), PlaybackError> {
        if self.sample_rate == 0 {
            return Err(PlaybackError::ConfigError("sample rate must be non-zero".into()));
        }
        if self.buffer_frames == 0 || self.buffer_frames % 4 != 0 {
            return Err(PlaybackError::ConfigError(format!(
                "buffer size {} is not a positive multiple of 4 frames",
                self.buffer_frames
            )));
        }
        if self.buffer_count < 2 {
            return Err(PlaybackError::ConfigError(format!(
                "need at least 2 buffers, got {}",
                self.buffer_count
            )));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            sample_rate: opl::DEFAULT_SAMPLE_RATE,
            buffer_frames: 1024,
            buffer_count: 4,
            stereo: false,
        }
    }
}

/// One PCM buffer of the ring
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Vec<i16>,
    len: usize,
}

impl PcmBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity],
            len: 0,
        }
    }

    /// Valid samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.len]
    }

    /// Number of valid samples.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Samples the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Whole backing storage, for filling.
    pub fn storage_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Mark how many samples of the storage are valid.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.samples.len());
    }
}

/// Ring health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Consumer requests that found no ready buffer
    pub stall_count: usize,
    /// Buffers queued by the producer
    pub buffers_produced: usize,
    /// Samples queued by the producer
    pub samples_produced: usize,
}

/// Fixed set of buffers shared between producer and consumer
pub struct BufferRing {
    free: Mutex<VecDeque<PcmBuffer>>,
    ready: Mutex<VecDeque<PcmBuffer>>,
    finished: AtomicBool,
    stalls: AtomicUsize,
    buffers_produced: AtomicUsize,
    samples_produced: AtomicUsize,
}

impl BufferRing {
    /// Build a ring of `config.buffer_count` buffers.
    pub fn new(config: &StreamConfig) -> Self {
        let free = (0..config.buffer_count)
            .map(|_| PcmBuffer::new(config.buffer_len()))
            .collect();
        Self {
            free: Mutex::new(free),
            ready: Mutex::new(VecDeque::with_capacity(config.buffer_count)),
            finished: AtomicBool::new(false),
            stalls: AtomicUsize::new(0),
            buffers_produced: AtomicUsize::new(0),
            samples_produced: AtomicUsize::new(0),
        }
    }

    /// Take a free buffer for filling.
    pub fn acquire(&self) -> Option<PcmBuffer> {
        self.free.lock().pop_front()
    }

    /// Queue a filled buffer for the consumer.
    pub fn submit(&self, buffer: PcmBuffer) {
        self.buffers_produced.fetch_add(1, Ordering::Relaxed);
        self.samples_produced.fetch_add(buffer.len(), Ordering::Relaxed);
        self.ready.lock().push_back(buffer);
    }

    /// Pop the oldest ready buffer.
    ///
    /// `Ok(None)` means the song has ended and everything was drained. An
    /// empty queue before that is a [`PlaybackError::PlaybackStall`].
    pub fn pop_ready(&self) -> Result<Option<PcmBuffer>, PlaybackError> {
        if let Some(buffer) = self.ready.lock().pop_front() {
            return Ok(Some(buffer));
        }
        if self.finished.load(Ordering::Acquire) {
            // The producer may have queued a last buffer before finishing
            return Ok(self.ready.lock().pop_front());
        }
        let stalls = self.stalls.fetch_add(1, Ordering::Relaxed) + 1;
        log::trace!("buffer ring underrun ({stalls} so far)");
        Err(PlaybackError::PlaybackStall)
    }

    /// Return a drained buffer to the free list.
    pub fn recycle(&self, mut buffer: PcmBuffer) {
        buffer.set_len(0);
        self.free.lock().push_back(buffer);
    }

    /// Mark the stream as complete.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Whether the producer has finished.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Buffers waiting for the consumer.
    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> RingStats {
        RingStats {
            stall_count: self.stalls.load(Ordering::Relaxed),
            buffers_produced: self.buffers_produced.load(Ordering::Relaxed),
            samples_produced: self.samples_produced.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running playback thread
///
/// Dropping the handle stops and joins the thread.
pub struct PlaybackThread {
    ring: Arc<BufferRing>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<(), PlaybackError>>>,
}

impl PlaybackThread {
    /// Move `clock` to a new thread that keeps `ring` filled.
    pub fn spawn<D, S>(clock: SampleClock<D, S>, config: StreamConfig) -> Result<Self, PlaybackError>
    where
        D: MusicDriver + 'static,
        S: RegisterSink + 'static,
    {
        config.validate()?;
        if clock.channels() != config.channels() {
            return Err(PlaybackError::ConfigError(format!(
                "sink renders {} channel(s), stream expects {}",
                clock.channels(),
                config.channels()
            )));
        }

        let ring = Arc::new(BufferRing::new(&config));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("opl-playback".into())
            .spawn({
                let ring = Arc::clone(&ring);
                let stop = Arc::clone(&stop);
                move || produce(clock, &ring, &stop)
            })
            .map_err(|e| PlaybackError::Spawn(e.to_string()))?;

        log::debug!(
            "playback thread started: {} × {} frames, {:.1}ms",
            config.buffer_count,
            config.buffer_frames,
            config.latency_ms()
        );

        Ok(Self {
            ring,
            stop,
            handle: Some(handle),
        })
    }

    /// Shared ring the consumer drains.
    pub fn ring(&self) -> Arc<BufferRing> {
        Arc::clone(&self.ring)
    }

    /// Ask the thread to stop after the current buffer.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the thread and return the error that ended it, if any.
    pub fn join(mut self) -> Result<(), PlaybackError> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<(), PlaybackError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PlaybackError::DeviceError("playback thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for PlaybackThread {
    fn drop(&mut self) {
        self.stop();
        if let Err(err) = self.join_inner() {
            log::warn!("playback thread ended with error: {err}");
        }
    }
}

fn produce<D: MusicDriver, S: RegisterSink>(
    mut clock: SampleClock<D, S>,
    ring: &BufferRing,
    stop: &AtomicBool,
) -> Result<(), PlaybackError> {
    let result = loop {
        if stop.load(Ordering::Acquire) {
            log::debug!("playback thread stopped");
            break Ok(());
        }

        let Some(mut buffer) = ring.acquire() else {
            std::thread::sleep(Duration::from_micros(BUFFER_BACKOFF_MICROS));
            continue;
        };

        let capacity = buffer.capacity();
        match clock.fill(buffer.storage_mut()) {
            Ok(written) => {
                buffer.set_len(written);
                if written > 0 {
                    ring.submit(buffer);
                } else {
                    ring.recycle(buffer);
                }
                if written < capacity {
                    log::debug!("song ended after {} ticks", clock.ticks());
                    break Ok(());
                }
            }
            Err(err) => {
                ring.recycle(buffer);
                break Err(err);
            }
        }
    };
    ring.finish();
    result
}
