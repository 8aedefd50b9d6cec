//! End-to-end decode pipeline test: a real WAV fixture through
//! `LocalByteSource` -> `TrackDecoder` -> Pre-DSP -> DSP, driven the same
//! way `pipeline::run_pipeline` drives it, verifying the events a Track's
//! pipeline actually emits rather than any single stage in isolation.

use std::time::Duration;

use uuid::Uuid;
use waver::events::TrackEvent;
use waver::pipeline::{self, PipelineCommand};
use waver::source::LocalByteSource;

/// Writes a short sine-wave stereo WAV fixture and returns its path, kept
/// alive via the returned `NamedTempFile` guard.
fn sine_wave_wav(seconds: f64, sample_rate: u32) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
    let frame_count = (seconds * sample_rate as f64) as usize;
    for n in 0..frame_count {
        let t = n as f64 / sample_rate as f64;
        let sample = (2.0 * std::f64::consts::PI * 440.0 * t).sin();
        let amplitude = (sample * i16::MAX as f64 * 0.5) as i16;
        writer.write_sample(amplitude).unwrap();
        writer.write_sample(amplitude).unwrap();
    }
    writer.finalize().unwrap();
    file.as_file().sync_all().unwrap();
    file
}

#[test]
fn decodes_a_real_wav_file_end_to_end() {
    let fixture = sine_wave_wav(1.0, 44_100);
    let source = LocalByteSource::open(fixture.path()).unwrap();
    let track_id = Uuid::new_v4();
    let handle = pipeline::spawn(
        track_id,
        fixture.path().display().to_string(),
        Box::new(source),
        pipeline::CACHE_BUFFER_COUNT,
        None,
    );

    let mut total_frames = 0u64;
    let mut saw_replaygain_target = false;
    let mut saw_decoder_finished = false;
    let mut saw_finished = false;

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while std::time::Instant::now() < deadline {
        match handle.events.try_recv() {
            Ok(TrackEvent::BufferReady { buffer, .. }) => {
                total_frames += buffer.frame_count() as u64;
            }
            Ok(TrackEvent::PreDsp(_, waver::predsp::PreDspMessage::ReplayGainTarget { .. })) => {
                saw_replaygain_target = true;
            }
            Ok(TrackEvent::DecoderFinished { .. }) => saw_decoder_finished = true,
            Ok(TrackEvent::Finished { .. }) => {
                saw_finished = true;
                break;
            }
            Ok(TrackEvent::Error { error, .. }) => panic!("unexpected pipeline error: {error}"),
            Ok(_) => {}
            Err(_) => {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    assert!(saw_decoder_finished, "decoder should reach end of stream");
    assert!(saw_finished, "pipeline should emit a terminal Finished event");
    assert!(saw_replaygain_target, "pre-dsp should surface a ReplayGain target for a non-silent track");

    // ~1s at 44.1kHz; allow slack for resampler window rounding at the tail.
    assert!(
        total_frames > 43_000 && total_frames < 45_200,
        "expected roughly 44100 decoded frames, got {total_frames}"
    );

    let _ = handle.commands.send(PipelineCommand::Stop);
}

#[test]
fn silent_track_still_completes_with_near_zero_replaygain_swing() {
    let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    {
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        for _ in 0..44_100 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    file.as_file().sync_all().unwrap();

    let source = LocalByteSource::open(file.path()).unwrap();
    let track_id = Uuid::new_v4();
    let handle = pipeline::spawn(
        track_id,
        file.path().display().to_string(),
        Box::new(source),
        pipeline::CACHE_BUFFER_COUNT,
        None,
    );

    let mut finished = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while std::time::Instant::now() < deadline {
        match handle.events.try_recv() {
            Ok(TrackEvent::Finished { .. }) => {
                finished = true;
                break;
            }
            Ok(TrackEvent::Error { error, .. }) => panic!("unexpected pipeline error: {error}"),
            _ => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    assert!(finished, "silent track should still reach a terminal Finished event");
}
