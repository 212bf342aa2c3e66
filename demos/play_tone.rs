//! Streaming tone example.
//!
//! Streams a looping sine tone through the default output device, seeks
//! around in it, then plays a short one-shot clip over the top.
//!
//! Run with: cargo run --example play_tone
//!
//! Set `RUST_LOG=stream_playback=debug` to watch fills and wraps.

use std::time::{Duration, Instant};

use stream_playback::{
    list_output_devices, AudioFormat, AudioStream, Clip, CpalDevice, MemoryProvider, VoicePool,
};

/// Pumps hardware events for `duration`, printing the stream position.
fn run_for(pool: &VoicePool, stream: &AudioStream, duration: Duration) {
    let deadline = Instant::now() + duration;
    let mut last_print = Instant::now();
    while Instant::now() < deadline {
        pool.pump();
        if last_print.elapsed() >= Duration::from_millis(250) {
            println!(
                "  {:>6.3}s / {:.3}s",
                stream.current_time().as_secs_f64(),
                stream.total_duration().as_secs_f64()
            );
            last_print = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Output devices: {:?}", list_output_devices()?);

    let pool = VoicePool::builder()
        .device(CpalDevice::open_default()?)
        .slot_size(16 * 1024)
        .on_event(|e| println!("event: {e:?}"))
        .build()?;
    println!("Playing on {}", pool.device_name());

    let format = AudioFormat::pcm(44100, 2, 16);
    let stream = AudioStream::new(
        &pool,
        MemoryProvider::sine(format, 220.0, Duration::from_millis(750)),
    );
    stream.set_looping(true);
    stream.set_volume(0.3);
    stream.play()?;
    run_for(&pool, &stream, Duration::from_secs(2));

    // Up a fifth, then jump back into the middle of the tone.
    stream.set_pitch(1.5);
    stream.set_current_time(Duration::from_millis(300));
    run_for(&pool, &stream, Duration::from_secs(2));

    let blip = Clip::new(
        format,
        MemoryProvider::sine(format, 880.0, Duration::from_millis(150)).data().to_vec(),
    );
    pool.play_one_shot(&blip, 1.0, 0.5)?;
    run_for(&pool, &stream, Duration::from_secs(1));

    stream.stop();
    println!("Stats: {:?}", stream.stats());

    drop(stream);
    pool.shutdown();
    Ok(())
}
