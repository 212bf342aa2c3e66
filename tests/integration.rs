//! Integration tests for stream-playback.
//!
//! Everything here runs on [`MockDevice`], which only plays when told to.
//! Tests that need real audio hardware live next to the CPAL backend and
//! are marked `#[ignore]`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use stream_playback::{
    AudioFormat, AudioStream, BufferProvider, Clip, MemoryProvider, MockDevice, PlaybackEvent,
    PlaybackState, Produced, ProviderError, VoicePool,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

/// Pool on a mock device, recording every event.
fn mock_pool(slot_size: usize) -> (VoicePool, MockDevice, Arc<Mutex<Vec<PlaybackEvent>>>) {
    init_tracing();
    let device = MockDevice::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let pool = VoicePool::builder()
        .device(device.clone())
        .slot_size(slot_size)
        .slot_count(4)
        .on_event(move |e| sink.lock().push(e))
        .build()
        .unwrap();
    (pool, device, events)
}

/// One round: let the worker settle, move the hardware one step, apply
/// the resulting events.
fn step(pool: &VoicePool, device: &MockDevice) {
    pool.wait_for_worker().unwrap();
    device.advance_all();
    pool.pump();
}

fn run_until(pool: &VoicePool, device: &MockDevice, max_steps: usize, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..max_steps {
        if done() {
            return true;
        }
        step(pool, device);
    }
    done()
}

fn count_events(events: &Mutex<Vec<PlaybackEvent>>, pred: impl Fn(&PlaybackEvent) -> bool) -> usize {
    events.lock().iter().filter(|e| pred(e)).count()
}

#[test]
fn test_finite_stream_plays_to_end_once() {
    let (pool, device, events) = mock_pool(65536);
    let data = pattern(200_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));

    stream.play().unwrap();
    pool.wait_for_worker().unwrap();
    assert_eq!(stream.stats().lead, 3);

    assert!(run_until(&pool, &device, 200, || stream.is_ended()));
    for _ in 0..10 {
        step(&pool, &device);
    }

    assert_eq!(stream.current_position(), 200_000);
    assert_eq!(stream.state(), PlaybackState::Ended);
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamEnded { .. })),
        1
    );

    let voice = device.voices()[0].clone();
    assert_eq!(voice.played_bytes(), data);
    assert!(voice.max_queued() <= 3);
    assert!(!voice.is_running());
}

#[test]
fn test_looping_stream_wraps() {
    let (pool, device, events) = mock_pool(65536);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(10_000)));
    stream.set_looping(true);
    stream.play().unwrap();

    let mut max_lead = 0;
    let wrapped = run_until(&pool, &device, 100, || {
        max_lead = max_lead.max(stream.stats().lead);
        stream.stats().rewinds >= 3
    });
    assert!(wrapped);

    let stats = stream.stats();
    assert_eq!(stats.rewinds, 3);
    assert_eq!(stats.bytes_played, 30_000);
    assert!(max_lead <= 3);
    assert!(!stream.is_ended());
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamRewound { .. })),
        3
    );
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamEnded { .. })),
        0
    );

    // Every pass plays the whole provider.
    let played = device.voices()[0].played_bytes();
    assert_eq!(&played[..10_000], &played[10_000..20_000]);
}

#[test]
fn test_pause_and_resume_lose_nothing() {
    let (pool, device, _events) = mock_pool(4096);
    let data = pattern(100_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));

    stream.play().unwrap();
    for round in 0..20 {
        for _ in 0..3 {
            step(&pool, &device);
        }
        if round % 2 == 0 {
            stream.pause();
            assert_eq!(stream.state(), PlaybackState::Paused);
            let before = stream.current_position();
            step(&pool, &device);
            assert_eq!(stream.current_position(), before);
        } else {
            stream.play().unwrap();
        }
    }
    stream.play().unwrap();

    assert!(run_until(&pool, &device, 500, || stream.is_ended()));
    assert_eq!(device.voices()[0].played_bytes(), data);
}

/// Pumps once after letting the hardware cross a buffer boundary, so a
/// buffer-end and the next buffer-start arrive in the same batch.
fn burst(pool: &VoicePool, device: &MockDevice) {
    pool.wait_for_worker().unwrap();
    device.advance_burst(2);
    pool.pump();
}

fn cycled(data: &[u8], len: usize) -> Vec<u8> {
    data.iter().copied().cycle().take(len).collect()
}

#[test]
fn test_loop_wraps_when_end_and_start_arrive_together() {
    let (pool, device, events) = mock_pool(65536);
    let data = pattern(150_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));
    stream.set_looping(true);
    stream.play().unwrap();

    assert!(run_until(&pool, &device, 20, || stream.stats().slots_started >= 2));
    // End of the second slot and start of the last one land together; the
    // refill then finds the provider exhausted with the ring caught up.
    burst(&pool, &device);

    assert!(run_until(&pool, &device, 100, || stream.stats().rewinds >= 2));
    assert!(stream.is_playing());
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamRewound { .. })),
        2
    );

    let played = device.voices()[0].played_bytes();
    assert!(played.len() > data.len());
    assert_eq!(played, cycled(&data, played.len()));
}

#[test]
fn test_position_never_decreases() {
    let (pool, device, events) = mock_pool(16384);
    let data = pattern(200_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));
    stream.play().unwrap();

    let mut last = 0;
    for i in 0..400 {
        if stream.is_ended() {
            break;
        }
        if i % 3 == 0 {
            burst(&pool, &device);
        } else {
            step(&pool, &device);
        }
        let position = stream.current_position();
        assert!(position >= last, "position went back from {last} to {position}");
        last = position;
    }

    assert!(stream.is_ended());
    assert_eq!(stream.current_position(), 200_000);
    assert_eq!(device.voices()[0].played_bytes(), data);
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamEnded { .. })),
        1
    );
}

#[test]
fn test_pause_then_play_immediately() {
    let (pool, device, events) = mock_pool(4096);
    let data = pattern(100_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));

    stream.play().unwrap();
    // No worker settling in between: the fill queued by play may still be
    // pending when pause runs.
    stream.pause();
    stream.play().unwrap();

    for _ in 0..30 {
        step(&pool, &device);
        stream.pause();
        assert_eq!(stream.state(), PlaybackState::Paused);
        stream.play().unwrap();
        assert!(stream.is_playing() || stream.is_ended());
    }

    assert!(run_until(&pool, &device, 500, || stream.is_ended()));
    assert_eq!(device.voices()[0].played_bytes(), data);
    assert_eq!(stream.current_position(), 100_000);
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamEnded { .. })),
        1
    );
}

#[test]
fn test_looping_never_resubmits_unstarted_slots() {
    let (pool, device, _events) = mock_pool(65536);
    let data = pattern(150_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));
    stream.set_looping(true);
    stream.play().unwrap();

    for i in 0..300 {
        if i % 4 == 1 {
            burst(&pool, &device);
        } else {
            step(&pool, &device);
        }
        pool.wait_for_worker().unwrap();
        let stats = stream.stats();
        assert!(stats.lead <= 3);
        assert_eq!(stats.slots_submitted - stats.slots_started, stats.lead as u64);
        assert!(device.voices()[0].queued() <= 3);
    }

    let stats = stream.stats();
    assert!(stats.rewinds >= 3, "only {} rewinds", stats.rewinds);
    let played = device.voices()[0].played_bytes();
    assert_eq!(played, cycled(&data, played.len()));
}

/// Provider that blocks in `produce_next` until released.
struct GatedProvider {
    inner: MemoryProvider,
    gate: Arc<(Mutex<bool>, Condvar)>,
    entered: Arc<AtomicBool>,
}

impl BufferProvider for GatedProvider {
    fn produce_next(&mut self, out: &mut [u8]) -> Produced {
        self.entered.store(true, Ordering::SeqCst);
        let (open, cvar) = &*self.gate;
        let mut open = open.lock();
        while !*open {
            cvar.wait(&mut open);
        }
        self.inner.produce_next(out)
    }

    fn rewind(&mut self) {
        self.inner.rewind();
    }

    fn total_size(&self) -> u64 {
        self.inner.total_size()
    }

    fn current_position(&self) -> u64 {
        self.inner.current_position()
    }

    fn seek(&mut self, position: u64) -> Result<(), ProviderError> {
        self.inner.seek(position)
    }

    fn format(&self) -> AudioFormat {
        self.inner.format()
    }
}

#[test]
fn test_pause_waits_for_in_flight_fill() {
    let (pool, device, _events) = mock_pool(1024);
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let entered = Arc::new(AtomicBool::new(false));
    let stream = AudioStream::new(
        &pool,
        GatedProvider {
            inner: MemoryProvider::new(AudioFormat::default(), pattern(8192)),
            gate: Arc::clone(&gate),
            entered: Arc::clone(&entered),
        },
    );

    stream.play().unwrap();
    while !entered.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }

    let paused = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            stream.pause();
            paused.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!paused.load(Ordering::SeqCst), "pause returned while a fill was running");

        let (open, cvar) = &*gate;
        *open.lock() = true;
        cvar.notify_all();
    });

    assert!(paused.load(Ordering::SeqCst));
    assert_eq!(stream.state(), PlaybackState::Paused);

    // The in-flight fill completed; no further fills were chained.
    let voice = device.voices()[0].clone();
    assert_eq!(voice.submissions(), 1);
    assert!(!voice.is_running());
    pool.wait_for_worker().unwrap();
    assert_eq!(voice.submissions(), 1);
}

#[test]
fn test_seek_clamps_and_aligns() {
    let (pool, device, _events) = mock_pool(256);
    let data = pattern(1000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));
    stream.prepare().unwrap();

    stream.set_current_position(5000);
    assert_eq!(stream.current_position(), 1000);
    assert_eq!(stream.state(), PlaybackState::Ended);

    stream.set_current_position(503);
    assert_eq!(stream.current_position(), 500);
    assert_eq!(stream.state(), PlaybackState::Paused);

    stream.play().unwrap();
    assert!(run_until(&pool, &device, 100, || stream.is_ended()));
    assert_eq!(device.voices()[0].played_bytes(), &data[500..]);
}

#[test]
fn test_seek_while_playing_resumes() {
    let (pool, device, _events) = mock_pool(256);
    let data = pattern(4096);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data));
    stream.play().unwrap();
    step(&pool, &device);

    stream.set_current_position(2048);
    assert_eq!(stream.current_position(), 2048);
    assert!(stream.is_playing());

    pool.wait_for_worker().unwrap();
    assert_eq!(stream.stats().lead, 3);
    assert!(run_until(&pool, &device, 100, || stream.is_ended()));
    assert_eq!(stream.current_position(), 4096);
}

/// Provider whose seeks always fail.
struct UnseekableProvider(MemoryProvider);

impl BufferProvider for UnseekableProvider {
    fn produce_next(&mut self, out: &mut [u8]) -> Produced {
        self.0.produce_next(out)
    }

    fn rewind(&mut self) {
        self.0.rewind();
    }

    fn total_size(&self) -> u64 {
        self.0.total_size()
    }

    fn current_position(&self) -> u64 {
        self.0.current_position()
    }

    fn seek(&mut self, _position: u64) -> Result<(), ProviderError> {
        Err(ProviderError::seek_failed("not seekable"))
    }

    fn format(&self) -> AudioFormat {
        self.0.format()
    }
}

#[test]
fn test_seek_failure_resets_provider() {
    let (pool, device, events) = mock_pool(256);
    let stream = AudioStream::new(
        &pool,
        UnseekableProvider(MemoryProvider::new(AudioFormat::default(), pattern(2048))),
    );
    stream.play().unwrap();
    for _ in 0..4 {
        step(&pool, &device);
    }
    assert!(stream.current_position() > 0);

    stream.set_current_position(1024);
    assert_eq!(stream.current_position(), 0);
    assert!(stream.is_playing());
    assert_eq!(
        count_events(&events, |e| matches!(
            e,
            PlaybackEvent::SeekFailed { position: 1024, .. }
        )),
        1
    );

    assert!(run_until(&pool, &device, 100, || stream.is_ended()));
}

#[test]
fn test_submit_failure_skips_slot() {
    let (pool, device, events) = mock_pool(4096);
    let data = pattern(10_000);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), data.clone()));

    device.fail_submissions(true);
    stream.play().unwrap();
    pool.wait_for_worker().unwrap();

    let stats = stream.stats();
    assert_eq!(stats.submit_failures, 1);
    assert_eq!(stats.lead, 0);
    assert_eq!(stats.slots_started, 0);
    assert_eq!(stream.current_position(), 0);
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::SubmitFailed { .. })),
        1
    );

    device.fail_submissions(false);
    stream.pause();
    stream.play().unwrap();
    assert!(run_until(&pool, &device, 100, || stream.is_ended()));
    assert_eq!(device.voices()[0].played_bytes(), &data[4096..]);
    // Only audible bytes count toward the position.
    assert_eq!(stream.current_position(), 10_000 - 4096);
}

#[test]
fn test_empty_stream_ends() {
    let (pool, device, events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), Vec::new()));
    stream.play().unwrap();

    assert!(run_until(&pool, &device, 10, || stream.is_ended()));
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::StreamEnded { .. })),
        1
    );
}

#[test]
fn test_empty_looping_stream_stays_silent() {
    let (pool, device, _events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), Vec::new()));
    stream.set_looping(true);
    stream.play().unwrap();

    for _ in 0..10 {
        step(&pool, &device);
    }
    assert!(stream.is_playing());
    assert_eq!(stream.stats().rewinds, 0);
    assert!(device.voices()[0].played_bytes().is_empty());
}

#[test]
fn test_short_reads_fill_small_slots() {
    let (pool, device, _events) = mock_pool(1024);
    let data = pattern(3000);
    let provider = MemoryProvider::new(AudioFormat::default(), data.clone()).with_chunk_limit(100);
    let stream = AudioStream::new(&pool, provider);
    stream.play().unwrap();

    assert!(run_until(&pool, &device, 200, || stream.is_ended()));
    assert_eq!(device.voices()[0].played_bytes(), data);
    assert_eq!(stream.stats().slots_submitted, 30);
}

#[test]
fn test_provider_swap_with_new_format_rebinds() {
    let (pool, device, events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(4096)));
    stream.prepare().unwrap();
    let first = stream.voice_id().unwrap();

    let mono = AudioFormat::pcm(22050, 1, 16);
    stream.set_provider(MemoryProvider::silence(mono, Duration::from_millis(100)));
    assert_eq!(stream.format(), mono);
    assert_eq!(stream.state(), PlaybackState::Unprepared);
    assert_eq!(stream.total_size(), 4410);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::FormatChanged { .. })),
        1
    );

    stream.play().unwrap();
    let second = stream.voice_id().unwrap();
    assert_ne!(first, second);
    assert_eq!(device.voice_count(), 2);
    assert!(run_until(&pool, &device, 50, || stream.is_ended()));
}

#[test]
fn test_provider_swap_with_same_format_keeps_voice() {
    let (pool, device, events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(8192)));
    stream.play().unwrap();
    step(&pool, &device);
    stream.pause();
    let voice = stream.voice_id().unwrap();

    let data = pattern(2048);
    stream.set_provider(MemoryProvider::new(AudioFormat::default(), data.clone()));
    assert_eq!(stream.voice_id(), Some(voice));
    assert_eq!(stream.current_position(), 0);
    assert_eq!(stream.stats().lead, 0);
    assert_eq!(
        count_events(&events, |e| matches!(e, PlaybackEvent::FormatChanged { .. })),
        0
    );

    let handle = device.voice(voice).unwrap();
    let before = handle.played_bytes().len();
    stream.play().unwrap();
    assert!(run_until(&pool, &device, 50, || stream.is_ended()));
    assert_eq!(&handle.played_bytes()[before..], &data[..]);
}

#[test]
fn test_with_provider_then_refresh() {
    let (pool, _device, _events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(4096)));

    stream.with_provider(|provider| provider.seek(2048)).unwrap();
    assert_eq!(stream.current_position(), 0);
    stream.did_set_provider();
    assert_eq!(stream.current_position(), 2048);
}

#[test]
#[should_panic(expected = "paused")]
fn test_provider_swap_while_playing_panics() {
    let (pool, _device, _events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(4096)));
    stream.play().unwrap();
    stream.set_provider(MemoryProvider::new(AudioFormat::default(), pattern(16)));
}

#[test]
fn test_streams_share_one_worker() {
    let (pool, device, _events) = mock_pool(2048);
    let a_data = pattern(20_000);
    let b_format = AudioFormat::pcm(22050, 1, 16);
    let a = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), a_data.clone()));
    let b = AudioStream::new(&pool, MemoryProvider::silence(b_format, Duration::from_millis(500)));

    a.play().unwrap();
    b.play().unwrap();
    assert_eq!(pool.active_count(), 2);

    assert!(run_until(&pool, &device, 500, || a.is_ended() && b.is_ended()));
    let a_voice = device.voice(a.voice_id().unwrap()).unwrap();
    assert_eq!(a_voice.played_bytes(), a_data);
}

#[test]
fn test_clip_from_provider_loops() {
    let (pool, device, _events) = mock_pool(1024);
    let mut provider = MemoryProvider::new(AudioFormat::default(), pattern(64)).with_chunk_limit(10);
    let clip = Clip::from_provider(&mut provider);
    assert_eq!(clip.len(), 64);

    let voice = pool.play_loop(&clip, 1.0, 1.0, 3).unwrap();
    while device.advance_all() > 0 {}
    pool.pump();

    assert!(!voice.is_active());
    let played = device.voice(voice.id()).unwrap().played_bytes();
    assert_eq!(played.len(), 192);
    assert_eq!(&played[128..], clip.data());
}

#[test]
fn test_dropping_stream_releases_voice_for_reuse() {
    let (pool, device, _events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(8192)));
    stream.play().unwrap();
    step(&pool, &device);
    let voice = stream.voice_id().unwrap();
    drop(stream);

    assert_eq!(pool.idle_count(), 1);
    let clip = Clip::new(AudioFormat::default(), pattern(32));
    let reused = pool.play_one_shot(&clip, 1.0, 1.0).unwrap();
    assert_eq!(reused.id(), voice);

    // Events from the dropped stream's buffers must not end the clip early.
    pool.pump();
    assert!(reused.is_active());
}

#[test]
fn test_shutdown_with_playing_stream() {
    let (pool, device, _events) = mock_pool(1024);
    let stream = AudioStream::new(&pool, MemoryProvider::new(AudioFormat::default(), pattern(8192)));
    stream.play().unwrap();
    step(&pool, &device);

    pool.shutdown();
    assert_eq!(pool.active_count(), 0);
    assert_eq!(stream.state(), PlaybackState::Unprepared);
    assert!(stream.play().is_err());
}
