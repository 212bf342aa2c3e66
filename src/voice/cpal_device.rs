//! CPAL output backend.
//!
//! Each voice owns one CPAL output stream. `cpal::Stream` is not `Send`, so
//! the stream lives on a small host thread for the voice's lifetime and the
//! voice talks to its render callback through atomics and a lock-free queue.
//!
//! Submitted buffers are decoded, remapped to the device's channel count,
//! and resampled to the device rate on the submitting thread, so the render
//! callback only interpolates for pitch.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio::sync::oneshot;

use crate::format::{decode_to_f32, f32_to_i16, lerp, remap_channels, resample_interleaved};
use crate::voice::{OutputDevice, SubmitBuffer, VoiceBackend, VoiceNotifier};
use crate::{AudioFormat, PlaybackError};

/// Buffers a voice accepts before `submit` reports `QueueFull`.
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Lists the names of available output devices.
pub fn list_output_devices() -> Result<Vec<String>, PlaybackError> {
    let host = cpal::default_host();
    let devices = host.output_devices().map_err(PlaybackError::backend)?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Gets the name of the default output device, if any.
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

/// An output device opened through CPAL.
///
/// Voice creation waits on a blocking handshake with the voice's output
/// thread, so it must not run on an async runtime thread.
#[must_use]
pub struct CpalDevice {
    device: Device,
    queue_capacity: usize,
}

impl CpalDevice {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns `NoOutputDevice` if no default output device is configured.
    pub fn open_default() -> Result<Self, PlaybackError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(PlaybackError::NoOutputDevice)?;

        Ok(Self {
            device,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        })
    }

    /// Opens a specific output device by name.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no device with the given name exists.
    pub fn open_by_name(name: &str) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let devices = host.output_devices().map_err(PlaybackError::backend)?;

        for device in devices {
            if let Ok(device_name) = device.name() {
                if device_name == name {
                    return Ok(Self {
                        device,
                        queue_capacity: DEFAULT_QUEUE_CAPACITY,
                    });
                }
            }
        }

        Err(PlaybackError::DeviceNotFound {
            name: name.to_string(),
        })
    }

    /// Sets how many buffers each voice may hold before submissions fail.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Returns the device's native output format (sample rate, channels).
    pub fn native_config(&self) -> Result<(u32, u16), PlaybackError> {
        let config = self
            .device
            .default_output_config()
            .map_err(PlaybackError::backend)?;
        Ok((config.sample_rate().0, config.channels()))
    }
}

impl OutputDevice for CpalDevice {
    fn create_voice(
        &self,
        format: AudioFormat,
        notifier: VoiceNotifier,
    ) -> Result<Box<dyn VoiceBackend>, PlaybackError> {
        if !format.is_playable() {
            return Err(PlaybackError::UnsupportedFormat {
                format: format.to_string(),
            });
        }
        Ok(Box::new(CpalVoice::spawn(
            self.device.clone(),
            format,
            notifier,
            self.queue_capacity,
        )?))
    }

    fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }
}

/// State shared between a voice and its render callback.
struct VoiceControl {
    running: AtomicBool,
    volume: AtomicU32,
    ratio: AtomicU32,
    /// Buffers submitted before the current value were flushed.
    flush_epoch: AtomicU64,
    exit_loop: AtomicBool,
    queued: AtomicUsize,
}

impl VoiceControl {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
            ratio: AtomicU32::new(1.0f32.to_bits()),
            flush_epoch: AtomicU64::new(0),
            exit_loop: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
        }
    }
}

/// A submitted buffer, converted to the device layout.
struct PendingBuffer {
    /// Interleaved f32 frames at the device rate and channel count.
    frames: Vec<f32>,
    tag: u64,
    epoch: u64,
    repeats_left: Option<u32>,
}

struct CpalVoice {
    format: AudioFormat,
    device_rate: u32,
    device_channels: u16,
    producer: HeapProd<PendingBuffer>,
    control: Arc<VoiceControl>,
    capacity: usize,
    shutdown: Option<oneshot::Sender<()>>,
    host: Option<JoinHandle<()>>,
}

impl CpalVoice {
    fn spawn(
        device: Device,
        format: AudioFormat,
        notifier: VoiceNotifier,
        capacity: usize,
    ) -> Result<Self, PlaybackError> {
        let supported = device
            .default_output_config()
            .map_err(PlaybackError::backend)?;
        let sample_format = supported.sample_format();
        let config: CpalStreamConfig = supported.into();
        let device_rate = config.sample_rate.0;
        let device_channels = config.channels;

        let (producer, consumer) = HeapRb::<PendingBuffer>::new(capacity).split();
        let control = Arc::new(VoiceControl::new());
        let voice = notifier.voice();
        let render = RenderState {
            consumer,
            current: None,
            cursor: 0.0,
            control: Arc::clone(&control),
            notifier,
            channels: usize::from(device_channels),
            scratch: Vec::new(),
        };

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), PlaybackError>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let host = std::thread::Builder::new()
            .name(format!("cpal-output-{}", voice.as_u64()))
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, render) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(PlaybackError::backend(err)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until the voice is dropped; dropping the stream stops it.
                let _ = shutdown_rx.blocking_recv();
                drop(stream);
            })
            .map_err(PlaybackError::WorkerSpawn)?;

        let ready = ready_rx
            .blocking_recv()
            .map_err(|_| PlaybackError::backend("output thread exited during setup"));
        if let Err(err) = ready.and_then(|r| r) {
            let _ = host.join();
            return Err(err);
        }

        tracing::debug!(
            %voice,
            %format,
            device_rate,
            device_channels,
            ?sample_format,
            "cpal output voice opened"
        );

        Ok(Self {
            format,
            device_rate,
            device_channels,
            producer,
            control,
            capacity,
            shutdown: Some(shutdown_tx),
            host: Some(host),
        })
    }
}

impl VoiceBackend for CpalVoice {
    fn submit(&mut self, buffer: SubmitBuffer) -> Result<(), PlaybackError> {
        if self.control.queued.load(Ordering::Acquire) >= self.capacity {
            return Err(PlaybackError::QueueFull {
                capacity: self.capacity,
            });
        }

        let samples = decode_to_f32(&self.format, &buffer.data);
        let samples = remap_channels(&samples, self.format.channels, self.device_channels);
        let frames = resample_interleaved(
            &samples,
            usize::from(self.device_channels),
            self.format.sample_rate,
            self.device_rate,
        );

        // Count first so the callback can never finish the buffer before it
        // is counted.
        self.control.queued.fetch_add(1, Ordering::AcqRel);
        let pending = PendingBuffer {
            frames,
            tag: buffer.tag,
            epoch: self.control.flush_epoch.load(Ordering::Acquire),
            repeats_left: buffer.loops.repeats(),
        };
        if self.producer.try_push(pending).is_err() {
            decrement(&self.control.queued);
            return Err(PlaybackError::QueueFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        self.control.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        self.control.running.store(false, Ordering::Release);
    }

    fn flush(&mut self) {
        self.control.exit_loop.store(false, Ordering::Release);
        self.control.flush_epoch.fetch_add(1, Ordering::AcqRel);
        self.control.queued.store(0, Ordering::Release);
    }

    fn exit_loop(&mut self) {
        self.control.exit_loop.store(true, Ordering::Release);
    }

    fn set_volume(&mut self, volume: f32) {
        self.control.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn set_frequency_ratio(&mut self, ratio: f32) {
        self.control.ratio.store(ratio.to_bits(), Ordering::Relaxed);
    }

    fn queued_buffer_count(&self) -> usize {
        self.control.queued.load(Ordering::Acquire)
    }
}

impl Drop for CpalVoice {
    fn drop(&mut self) {
        self.control.running.store(false, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(host) = self.host.take() {
            if host.join().is_err() {
                tracing::warn!("cpal output thread panicked");
            }
        }
    }
}

fn decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

fn build_stream(
    device: &Device,
    config: &CpalStreamConfig,
    sample_format: SampleFormat,
    mut render: RenderState,
) -> Result<Stream, PlaybackError> {
    let on_error = |err: cpal::StreamError| tracing::error!("Audio output stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render.render(data),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| render.render_i16(data),
            on_error,
            None,
        ),
        format => {
            return Err(PlaybackError::UnsupportedFormat {
                format: format!("{format:?}"),
            });
        }
    };

    stream.map_err(PlaybackError::backend)
}

/// Everything the render callback owns.
struct RenderState {
    consumer: HeapCons<PendingBuffer>,
    current: Option<PendingBuffer>,
    /// Fractional frame position in `current`.
    cursor: f64,
    control: Arc<VoiceControl>,
    notifier: VoiceNotifier,
    channels: usize,
    scratch: Vec<f32>,
}

impl RenderState {
    fn render(&mut self, out: &mut [f32]) {
        if !self.control.running.load(Ordering::Acquire) {
            out.fill(0.0);
            return;
        }

        let volume = f32::from_bits(self.control.volume.load(Ordering::Relaxed));
        let ratio = f64::from(f32::from_bits(self.control.ratio.load(Ordering::Relaxed)));
        let flush = self.control.flush_epoch.load(Ordering::Acquire);
        let channels = self.channels;

        for frame in out.chunks_mut(channels) {
            if !self.ensure_current(flush) {
                frame.fill(0.0);
                continue;
            }
            let Some(buffer) = self.current.as_ref() else {
                frame.fill(0.0);
                continue;
            };

            let frame_count = buffer.frames.len() / channels;
            let index = (self.cursor as usize).min(frame_count - 1);
            let next = (index + 1).min(frame_count - 1);
            let t = self.cursor.fract() as f32;
            for (c, sample) in frame.iter_mut().enumerate() {
                let a = buffer.frames[index * channels + c];
                let b = buffer.frames[next * channels + c];
                *sample = lerp(a, b, t) * volume;
            }

            self.cursor += ratio;
            if self.cursor >= frame_count as f64 {
                self.finish_pass(flush);
            }
        }
    }

    fn render_i16(&mut self, out: &mut [i16]) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(out.len(), 0.0);
        self.render(&mut scratch);
        for (dst, &src) in out.iter_mut().zip(scratch.iter()) {
            *dst = f32_to_i16(src);
        }
        self.scratch = scratch;
    }

    /// Makes sure a live buffer is playing. Returns false if none is queued.
    fn ensure_current(&mut self, flush: u64) -> bool {
        if let Some(buffer) = &self.current {
            if buffer.epoch >= flush {
                return true;
            }
            self.current = None;
        }

        while let Some(buffer) = self.consumer.try_pop() {
            if buffer.epoch < flush {
                continue;
            }
            self.notifier.buffer_started(buffer.tag);
            if buffer.frames.len() < self.channels {
                self.end(&buffer, flush);
                continue;
            }
            self.cursor = 0.0;
            self.current = Some(buffer);
            return true;
        }
        false
    }

    fn finish_pass(&mut self, flush: u64) {
        let exit = self.control.exit_loop.swap(false, Ordering::AcqRel);
        let Some(buffer) = self.current.as_mut() else {
            return;
        };
        if exit {
            buffer.repeats_left = Some(0);
        }

        let repeats_left = buffer.repeats_left;
        match repeats_left {
            Some(0) => {
                if let Some(buffer) = self.current.take() {
                    self.end(&buffer, flush);
                }
            }
            Some(n) => {
                buffer.repeats_left = Some(n - 1);
                self.cursor = 0.0;
            }
            None => self.cursor = 0.0,
        }
    }

    fn end(&self, buffer: &PendingBuffer, flush: u64) {
        if buffer.epoch == flush {
            decrement(&self.control.queued);
        }
        self.notifier.buffer_ended(buffer.tag);
    }
}
