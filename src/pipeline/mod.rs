//! Track pipeline (§4.2): wires Source -> Decoder -> Pre-DSP -> DSP for one
//! track, running the decode side on a blocking thread (decode is
//! synchronous I/O + CPU work) and publishing [`TrackEvent`]s to the
//! Coordinator over an unbounded channel, per §9's "typed events over
//! bounded channels" redesign.
//!
//! Decoder, Pre-DSP, and DSP all run sequentially on one dedicated thread
//! per track rather than as three separate tokio tasks: each is
//! compute-bound and non-blocking once it has a buffer (§5), so chaining
//! them in-process avoids three extra channel hops for no parallelism
//! gain. Output remains a separate stage, owned by the Coordinator, which
//! is where real concurrency between two tracks' pipelines during
//! crossfade actually matters.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::decoder::TrackDecoder;
use crate::dsp::Equalizer;
use crate::error::Severity;
use crate::events::{StageKind, TrackEvent};
use crate::model::audio_buffer::AudioBuffer;
use crate::model::track::TrackStatus;
use crate::predsp::stage::PreDspStage;
use crate::source::{ByteSource, NetworkSourceMonitor};

/// §4.2 "For initial prefill, up to CACHE_BUFFER_COUNT buffers are routed
/// directly to the DSP chain". Beyond this many buffers outstanding (sent
/// but not yet acknowledged via `PipelineCommand::BufferDone`), the decode
/// thread blocks — this is the "synchronizer queue" that throttles decode
/// to real time. The default, also used by tests; the live value comes from
/// `EngineConfig::cache_buffer_count` and is passed into `spawn`.
pub const CACHE_BUFFER_COUNT: usize = 3;

/// How long the decode thread blocks on a single wait for a `BufferDone`
/// ack before re-checking for `Stop`/`Interrupt` (keeps shutdown prompt).
const SYNCHRONIZER_POLL: Duration = Duration::from_millis(20);

/// Commands accepted by a running track pipeline (§4.2 state machine).
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    Play,
    Pause,
    Resume,
    /// Interrupt at `position_ms` into the track, optionally with a fadeout
    /// (§4.4 "interrupt" transition decision).
    Interrupt { position_ms: u64, with_fadeout: bool },
    /// Acknowledges that the Output stage finished with one buffer,
    /// releasing one slot in the synchronizer queue (§4.2 point 3).
    BufferDone,
    Stop,
}

/// Handle the Coordinator holds for a running track pipeline. Dropping this
/// does not stop the pipeline — send `PipelineCommand::Stop` explicitly.
pub struct TrackPipelineHandle {
    pub track_id: Uuid,
    pub commands: SyncSender<PipelineCommand>,
    pub events: UnboundedReceiver<TrackEvent>,
}

/// Spawns the decode + analysis pipeline for one track on a dedicated OS
/// thread (symphonia decode is blocking), returning a handle for commands
/// and events.
pub fn spawn(
    track_id: Uuid,
    url: String,
    source: Box<dyn ByteSource>,
    cache_buffer_count: usize,
    network: Option<NetworkSourceMonitor>,
) -> TrackPipelineHandle {
    let (command_tx, command_rx) = sync_channel::<PipelineCommand>(8);
    let (event_tx, event_rx) = unbounded_channel::<TrackEvent>();

    std::thread::Builder::new()
        .name(format!("decode-{track_id}"))
        .spawn(move || {
            run_pipeline(track_id, url, source, command_rx, event_tx, cache_buffer_count, network)
        })
        .expect("failed to spawn decode thread");

    TrackPipelineHandle {
        track_id,
        commands: command_tx,
        events: event_rx,
    }
}

/// Outcome of waiting for synchronizer clearance.
enum WaitOutcome {
    Cleared,
    Stopped,
}

fn run_pipeline(
    track_id: Uuid,
    url: String,
    source: Box<dyn ByteSource>,
    commands: Receiver<PipelineCommand>,
    events: UnboundedSender<TrackEvent>,
    cache_buffer_count: usize,
    network: Option<NetworkSourceMonitor>,
) {
    // §4.3 NetworkStarting/NetworkReady and §6 ICY StreamTitle: polled from
    // the monitor taken off the source before it was boxed, since nothing
    // else here has a concrete enough type to ask for them.
    let mut network_starting_sent = false;
    let mut network_ready_sent = false;

    let mut decoder = match TrackDecoder::new(&url, source) {
        Ok(d) => d,
        Err(e) => {
            let _ = events.send(TrackEvent::Error {
                track_id,
                stage: StageKind::Decoder,
                error: Arc::new(e),
                severity: Severity::Fatal,
            });
            return;
        }
    };

    let format = decoder.format();
    let mut predsp = PreDspStage::new();
    let mut equalizer = Equalizer::new(format.sample_rate, crate::dsp::FLAT_GAINS, 0.0);
    let mut status = TrackStatus::Decoding;
    let mut buffers_in_flight: usize = 0;
    let mut buffers_emitted: usize = 0;

    'decode: loop {
        match drain_commands(&commands, &mut status, &mut buffers_in_flight) {
            Some(Action::Stop) => {
                debug!(%track_id, "pipeline received stop command");
                return;
            }
            Some(Action::Interrupt { position_ms, with_fadeout }) => {
                debug!(%track_id, position_ms, with_fadeout, "pipeline interrupted");
                for msg in predsp.finalize() {
                    let _ = events.send(TrackEvent::PreDsp(track_id, msg));
                }
                let _ = events.send(TrackEvent::Finished { track_id });
                return;
            }
            Some(Action::Disconnected) => return,
            None => {}
        }

        if status == TrackStatus::Paused {
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }

        if let Some(monitor) = network.as_ref() {
            let connecting = monitor.is_connecting();
            if connecting != network_starting_sent {
                network_starting_sent = connecting;
                let _ = events.send(TrackEvent::NetworkStarting { track_id, on: connecting });
            }
            if !network_ready_sent && monitor.is_ready() {
                network_ready_sent = true;
                let _ = events.send(TrackEvent::NetworkReady { track_id });
            }
            if let Some((stream_offset, title)) = monitor.take_title() {
                let _ = events.send(TrackEvent::CastTitle { track_id, stream_offset, title });
            }
        }

        // §4.2 point 3: the first CACHE_BUFFER_COUNT buffers go straight
        // through for prompt startup; after that, wait for a BufferDone
        // ack before decoding further so decode never runs unboundedly far
        // ahead of playback.
        if buffers_emitted >= cache_buffer_count && buffers_in_flight >= cache_buffer_count {
            match wait_for_clearance(&commands, &mut status, &mut buffers_in_flight, cache_buffer_count) {
                WaitOutcome::Stopped => return,
                WaitOutcome::Cleared => {}
            }
            continue 'decode;
        }

        let buffer = match decoder.decode_next() {
            Ok(Some(buf)) => buf,
            Ok(None) => {
                for msg in predsp.finalize() {
                    let _ = events.send(TrackEvent::PreDsp(track_id, msg));
                }
                let _ = events.send(TrackEvent::DecoderFinished { track_id });
                let _ = events.send(TrackEvent::Finished { track_id });
                return;
            }
            Err(e) => {
                warn!(%track_id, error = %e, "decode error");
                let severity = e.severity();
                let recovery = e.recovery_action();
                let _ = events.send(TrackEvent::Error {
                    track_id,
                    stage: StageKind::Decoder,
                    error: Arc::new(e),
                    severity,
                });
                if matches!(severity, Severity::Fatal) {
                    debug!(%track_id, ?recovery, "fatal decode error, ending pipeline");
                    return;
                }
                continue;
            }
        };

        for msg in predsp.analyze(&buffer) {
            // The ReplayGain target is consumed right here, in the same
            // thread as the Equalizer it feeds (§4.5's "typed plugin-to-
            // plugin message" is local to this pipeline, not a Coordinator
            // round trip); every other Pre-DSP message is the Coordinator's
            // concern (fade/transition requests), so it still goes out.
            if let crate::predsp::PreDspMessage::ReplayGainTarget { db } = msg {
                equalizer.set_target_replay_gain(db);
            }
            let _ = events.send(TrackEvent::PreDsp(track_id, msg));
        }

        // §4.5: ReplayGain/EQ correction runs here; the fade renderer
        // itself runs downstream in the Output stage, where pause/resume
        // fades and transition fades are applied against live playback
        // position. The buffer handed onward is the EQ-corrected one, not
        // the decoder's raw output.
        let mut data = buffer.data.clone();
        equalizer.process(&mut data, &buffer.format);
        let corrected = Arc::new(AudioBuffer::new(buffer.format, buffer.start_time_us, data));

        if events
            .send(TrackEvent::BufferReady { track_id, buffer: corrected })
            .is_err()
        {
            return;
        }
        buffers_emitted += 1;
        buffers_in_flight += 1;
    }
}

enum Action {
    Stop,
    Interrupt { position_ms: u64, with_fadeout: bool },
    Disconnected,
}

/// Drain every command currently queued without blocking, applying status
/// transitions and `BufferDone` decrements, and returning a terminal action
/// if one was seen.
fn drain_commands(
    commands: &Receiver<PipelineCommand>,
    status: &mut TrackStatus,
    buffers_in_flight: &mut usize,
) -> Option<Action> {
    loop {
        match commands.try_recv() {
            Ok(PipelineCommand::Stop) => return Some(Action::Stop),
            Ok(PipelineCommand::Pause) => *status = TrackStatus::Paused,
            Ok(PipelineCommand::Resume) | Ok(PipelineCommand::Play) => *status = TrackStatus::Playing,
            Ok(PipelineCommand::Interrupt { position_ms, with_fadeout }) => {
                return Some(Action::Interrupt { position_ms, with_fadeout })
            }
            Ok(PipelineCommand::BufferDone) => {
                *buffers_in_flight = buffers_in_flight.saturating_sub(1);
            }
            Err(std::sync::mpsc::TryRecvError::Empty) => return None,
            Err(std::sync::mpsc::TryRecvError::Disconnected) => return Some(Action::Disconnected),
        }
    }
}

/// Block (in short polling increments, so `Stop`/`Interrupt` stay prompt)
/// until the synchronizer queue has a free slot.
fn wait_for_clearance(
    commands: &Receiver<PipelineCommand>,
    status: &mut TrackStatus,
    buffers_in_flight: &mut usize,
    cache_buffer_count: usize,
) -> WaitOutcome {
    loop {
        match commands.recv_timeout(SYNCHRONIZER_POLL) {
            Ok(PipelineCommand::Stop) => return WaitOutcome::Stopped,
            Ok(PipelineCommand::Interrupt { .. }) => return WaitOutcome::Stopped,
            Ok(PipelineCommand::Pause) => *status = TrackStatus::Paused,
            Ok(PipelineCommand::Resume) | Ok(PipelineCommand::Play) => *status = TrackStatus::Playing,
            Ok(PipelineCommand::BufferDone) => {
                *buffers_in_flight = buffers_in_flight.saturating_sub(1);
                if *buffers_in_flight < cache_buffer_count {
                    return WaitOutcome::Cleared;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if *buffers_in_flight < cache_buffer_count {
                    return WaitOutcome::Cleared;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return WaitOutcome::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A byte source that never produces a valid stream, used to exercise
    /// the "decoder error before playback started" path (§4.2 failure
    /// policy) without needing a real audio file.
    struct EmptySource;
    impl crate::source::ByteSource for EmptySource {
        fn read(&mut self, _buf: &mut [u8]) -> crate::error::Result<usize> {
            Ok(0)
        }
        fn is_seekable(&self) -> bool {
            false
        }
        fn seek(&mut self, _position: u64) -> crate::error::Result<()> {
            Ok(())
        }
        fn byte_len(&self) -> Option<u64> {
            Some(0)
        }
    }

    #[test]
    fn empty_source_emits_fatal_decoder_error() {
        let handle = spawn(Uuid::new_v4(), "empty.mp3".into(), Box::new(EmptySource), CACHE_BUFFER_COUNT, None);
        let mut events = handle.events;
        let event = events.blocking_recv().expect("an event should arrive");
        assert!(matches!(event, TrackEvent::Error { stage: StageKind::Decoder, .. }));
    }

    #[test]
    fn stop_command_ends_the_thread_without_finished_event() {
        let handle = spawn(Uuid::new_v4(), "empty.mp3".into(), Box::new(EmptySource), CACHE_BUFFER_COUNT, None);
        // Stopping immediately races the thread's own error path; either
        // outcome (an Error, or a closed channel with nothing buffered) is
        // acceptable — the key property is that it terminates promptly
        // rather than hanging.
        let _ = handle.commands.send(PipelineCommand::Stop);
        let mut events = handle.events;
        let _ = events.blocking_recv();
    }
}
