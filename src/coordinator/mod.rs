//! Playback Coordinator (§4.1): owns the playlist queue, the current and
//! (during crossfade) previous tracks, and drives the single supervisory
//! scheduling loop the rest of the engine answers to (§5 "one supervisory
//! thread").
//!
//! Grounded on `wkmp-ap/src/playback/engine/{core,playback,queue,chains}.rs`
//! and `wkmp-ap/src/playback/pipeline/dual.rs`'s actor shape: a
//! `tokio::select!` loop over a command channel, per-track event channels,
//! and a periodic tick, owning exactly the mutable state the scheduling
//! policy needs and nothing more (§9 "explicit EngineConfig" / "typed
//! events over bounded channels" redesigns already established by
//! `events.rs` and `pipeline/mod.rs`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decoder::resampler::TARGET_SAMPLE_RATE;
use crate::dsp::FadeRenderer;
use crate::error::{RecoveryAction, Result, Severity};
use crate::events::{CoordinatorCommand, CoordinatorEvent, StageKind, TrackEvent};
use crate::model::{
    FadeDirection, FadeInRequest, FadeState, InfoUpdate, PlaylistQueue, Track, TrackDescriptor,
    TrackStatus,
};
use crate::model::audio_buffer::AudioBuffer;
use crate::output::{resume_with_fade, OutputSink};
use crate::pipeline::{self, PipelineCommand, TrackPipelineHandle};
use crate::plugin::{PlaylistMode, SourcePlugin};
use crate::predsp::PreDspMessage;
use crate::source::{ByteSource, LocalByteSource, NetworkByteSource, NetworkSourceMonitor};

/// §4.1: "interrupt always gives the departing track a fade-out" — the
/// fixed fade-out length used both for a Pre-DSP-detected interrupt and for
/// `remove_tracks` closing over the currently-playing track.
const INTERRUPT_FADE_OUT_SECONDS: f64 = 4.0;
/// Fast fade used when the user explicitly skips, so the cut is audible as
/// deliberate rather than a full 4 s interrupt fade.
const SKIP_FADE_OUT_SECONDS: f64 = 0.3;
/// How many stereo frames the output pump tries to move per tick.
const PUMP_CHUNK_FRAMES: usize = 2048;
/// §4.1/§5 scheduling loop cadence.
const PUMP_INTERVAL: Duration = Duration::from_millis(20);
/// §4.6: position notifications at ~100 ms cadence.
const POSITION_INTERVAL: Duration = Duration::from_millis(100);

/// Which of the Coordinator's two live pipeline slots an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Current,
    Previous,
}

/// One decoded buffer queued for the output pump, with a cursor tracking
/// how many of its frames have already been drained.
struct PendingBuffer {
    samples: Vec<f32>,
    cursor: usize,
}

impl PendingBuffer {
    fn remaining_frames(&self) -> usize {
        self.samples.len() / 2 - self.cursor
    }
}

/// A running track pipeline plus the Coordinator-side mixing/lifecycle
/// state layered on top of it. Not the same thing as [`Track`]: this also
/// owns the pending PCM queue and the handle to the decode thread.
struct ActivePipeline {
    track: Track,
    handle: TrackPipelineHandle,
    pending: VecDeque<PendingBuffer>,
    /// Set once `DecoderFinished`/`Finished` arrive from the pipeline.
    /// Per `pipeline::run_pipeline`, these fire together at decoder EOF,
    /// which is *decode complete*, not *playback complete* — true
    /// completion is this flag plus an empty `pending` queue.
    decoder_done: bool,
    /// Set when the Coordinator itself forced an early stop (interrupt
    /// threshold crossed, `remove_tracks`); once the armed fade-out
    /// finishes, the track is torn down regardless of `decoder_done`.
    force_finish_after_fade: bool,
    /// When the pending queue last had data, for the output-underrun timer
    /// (§4.2 "wait 5s; if no progress, emit fatal error").
    underrun_since: Option<Instant>,
}

impl ActivePipeline {
    fn new(track: Track, handle: TrackPipelineHandle) -> Self {
        Self {
            track,
            handle,
            pending: VecDeque::new(),
            decoder_done: false,
            force_finish_after_fade: false,
            underrun_since: None,
        }
    }

    fn pending_frames(&self) -> usize {
        self.pending.iter().map(PendingBuffer::remaining_frames).sum()
    }
}

/// Handle returned alongside a [`Coordinator`]: the commands sender feeds
/// it (from the IPC listener or anywhere else in-process) and the events
/// receiver carries its outbound notifications (§6).
pub struct CoordinatorHandle {
    pub commands: UnboundedSender<CoordinatorCommand>,
    pub events: UnboundedReceiver<CoordinatorEvent>,
}

/// The Playback Coordinator (§4.1). Generic over the output sink so tests
/// can run the full scheduling loop against [`crate::output::NullOutputSink`]
/// without a real audio device.
pub struct Coordinator<S: OutputSink> {
    config: EngineConfig,
    queue: PlaylistQueue,
    current: Option<ActivePipeline>,
    previous: Option<ActivePipeline>,
    sources: Vec<Arc<dyn SourcePlugin>>,
    output: S,
    commands: UnboundedReceiver<CoordinatorCommand>,
    commands_tx: UnboundedSender<CoordinatorCommand>,
    events_out: UnboundedSender<CoordinatorEvent>,
    tokio_handle: tokio::runtime::Handle,
    started_at: Instant,
    round_robin_cursor: usize,
    consecutive_empty_plays: u32,
    consecutive_unable_to_start: u32,
    give_up: bool,
    pending_track_info: Option<Uuid>,
}

impl<S: OutputSink> Coordinator<S> {
    pub fn new(
        config: EngineConfig,
        sources: Vec<Arc<dyn SourcePlugin>>,
        output: S,
        tokio_handle: tokio::runtime::Handle,
    ) -> (Self, CoordinatorHandle) {
        let (commands_tx, commands_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();
        let coordinator = Self {
            config,
            queue: PlaylistQueue::new(),
            current: None,
            previous: None,
            sources,
            output,
            commands: commands_rx,
            commands_tx: commands_tx.clone(),
            events_out: events_tx,
            tokio_handle,
            started_at: Instant::now(),
            round_robin_cursor: 0,
            consecutive_empty_plays: 0,
            consecutive_unable_to_start: 0,
            give_up: false,
            pending_track_info: None,
        };
        (coordinator, CoordinatorHandle { commands: commands_tx, events: events_rx })
    }

    /// Runs the supervisory loop until every [`CoordinatorCommand`] sender
    /// (the returned [`CoordinatorHandle`] plus this Coordinator's own
    /// internal clone) is dropped.
    pub async fn run(mut self) {
        let mut pump = interval(PUMP_INTERVAL);
        let mut position_tick = interval(POSITION_INTERVAL);
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                Some(event) = recv_from(&mut self.current) => {
                    self.handle_track_event(Slot::Current, event);
                }
                Some(event) = recv_from(&mut self.previous) => {
                    self.handle_track_event(Slot::Previous, event);
                }
                _ = pump.tick() => self.pump_output(),
                _ = position_tick.tick() => self.publish_position(),
            }
        }
    }

    // ---- public operations (§4.1) -----------------------------------

    fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::Enqueue(descriptors) => self.enqueue_tracks(descriptors, true),
            CoordinatorCommand::DeliverPlaylist { descriptors } => self.enqueue_tracks(descriptors, false),
            CoordinatorCommand::DeliverReplacement { descriptor } => {
                if let Some(d) = descriptor {
                    self.queue.insert_replacement_at_front(Track::new(d));
                }
            }
            CoordinatorCommand::SkipNext => self.skip_next(),
            CoordinatorCommand::Pause => self.pause(),
            CoordinatorCommand::Resume => self.resume(),
            CoordinatorCommand::RequestPlaylistMore { min_count } => self.request_playlist_more(min_count),
            CoordinatorCommand::RemoveTracks { url_prefix } => self.remove_tracks(&url_prefix),
            CoordinatorCommand::ReportUnableToStart { track_id } => self.report_unable_to_start(track_id),
            CoordinatorCommand::ReportCastEndedEarly { track_id, seconds_played } => {
                self.report_cast_ended_early(track_id, seconds_played)
            }
        }
    }

    fn enqueue_tracks(&mut self, descriptors: Vec<TrackDescriptor>, manually: bool) {
        for mut descriptor in descriptors {
            if manually {
                descriptor.manually_added = true;
                // §4.1(a): a manual enqueue is evidence the engine is alive
                // and accepting tracks, so it resets both give-up counters.
                self.consecutive_empty_plays = 0;
                self.consecutive_unable_to_start = 0;
                self.give_up = false;
            }
            self.queue.append(Track::new(descriptor));
        }
        self.start_next_if_possible();
    }

    fn skip_next(&mut self) {
        if self.current.is_none() && self.queue.is_empty() {
            return;
        }
        // §4.1 scenario 5: any crossfade already in progress is torn down
        // immediately, but current itself is interrupted with a fast
        // fade-out rather than a hard stop, demoted into the previous slot
        // to finish fading while the queued next track starts at once with
        // no fade-in of its own.
        if let Some(ap) = self.previous.take() {
            let _ = ap.handle.commands.send(PipelineCommand::Stop);
            self.finalize_track_completion(ap);
        }

        if let Some(cur) = self.current.as_mut() {
            cur.track.replaceable = false;
            cur.track.fade = FadeState::fade_out(SKIP_FADE_OUT_SECONDS);
            cur.force_finish_after_fade = true;
            let _ = cur.handle.commands.send(PipelineCommand::Interrupt {
                position_ms: cur.track.played_duration_ms,
                with_fadeout: true,
            });
        }

        if let Some(mut next_track) = self.queue.pop_front() {
            next_track.fade_in_request = FadeInRequest::none();
            self.previous = self.current.take();
            self.start_track_as_current(next_track);
        }

        if self.queue.len() < 2 && !self.give_up {
            self.request_playlist_more(2);
        }
    }

    fn pause(&mut self) {
        self.output.pause();
        // A crossfade in progress is abandoned on pause; resuming always
        // resumes into a single current track with its own fade-in.
        if let Some(ap) = self.previous.take() {
            let _ = ap.handle.commands.send(PipelineCommand::Stop);
        }
        let _ = self.events_out.send(CoordinatorEvent::Paused);
    }

    fn resume(&mut self) {
        if let Some(cur) = self.current.as_mut() {
            resume_with_fade(&mut self.output, &mut cur.track.fade);
        } else {
            self.output.resume();
        }
        let _ = self.events_out.send(CoordinatorEvent::Resumed);
    }

    fn remove_tracks(&mut self, url_prefix: &str) {
        self.queue.remove_matching(|t| t.descriptor.url.starts_with(url_prefix));
        let current_matches = self
            .current
            .as_ref()
            .map(|ap| ap.track.descriptor.url.starts_with(url_prefix))
            .unwrap_or(false);
        if current_matches {
            self.interrupt_current(INTERRUPT_FADE_OUT_SECONDS);
        }
    }

    fn report_unable_to_start(&mut self, track_id: Uuid) {
        let track = self
            .current
            .as_ref()
            .filter(|ap| ap.track.id == track_id)
            .or_else(|| self.previous.as_ref().filter(|ap| ap.track.id == track_id))
            .map(|ap| ap.track.clone());
        if let Some(track) = track {
            self.note_unable_to_start(&track);
        }
    }

    fn report_cast_ended_early(&mut self, track_id: Uuid, seconds_played: u64) {
        if self.current.as_ref().map(|ap| ap.track.id) != Some(track_id) {
            return;
        }
        let Some(ap) = self.current.take() else { return };
        let mut track = ap.track;
        track.played_duration_ms = seconds_played * 1000;
        let _ = ap.handle.commands.send(PipelineCommand::Stop);
        if let Some(src) = self.source_for(&track.source_plugin_id) {
            src.cast_finished_early(&track.descriptor.url, seconds_played);
        }
        self.finalize_track_completion(ActivePipeline {
            track,
            handle: ap.handle,
            pending: ap.pending,
            decoder_done: true,
            force_finish_after_fade: false,
            underrun_since: None,
        });
        self.start_next_if_possible();
    }

    // ---- track lifecycle ---------------------------------------------

    fn start_next_if_possible(&mut self) {
        if self.current.is_some() {
            return;
        }
        if let Some(track) = self.queue.pop_front() {
            self.start_track_as_current(track);
        }
        if self.queue.len() < 2 && !self.give_up {
            self.request_playlist_more(2);
        }
    }

    fn start_track_as_current(&mut self, mut track: Track) {
        match self.open_byte_source(&track.descriptor) {
            Ok((source, network)) => {
                let handle = pipeline::spawn(
                    track.id,
                    track.descriptor.url.clone(),
                    source,
                    self.config.cache_buffer_count,
                    network,
                );
                track.status = TrackStatus::Playing;
                if track.fade_in_request.enabled {
                    track.fade = FadeState::fade_in(track.fade_in_request.length_ms as f64 / 1000.0);
                }
                let defer_info = track.fade_in_request.enabled;
                let track_id = track.id;
                let descriptor = track.descriptor.clone();
                self.current = Some(ActivePipeline::new(track, handle));
                if defer_info {
                    // §4.1: a track that's fading in publishes its TrackInfo
                    // at the fade's midpoint rather than at the instant it
                    // starts, so UI metadata updates land roughly when the
                    // track becomes audibly dominant.
                    self.pending_track_info = Some(track_id);
                } else {
                    let _ = self.events_out.send(CoordinatorEvent::TrackInfo(descriptor));
                }
            }
            Err(e) => {
                warn!(error = %e, url = %track.descriptor.url, "failed to open byte source");
                if let Some(src) = self.source_for(&track.source_plugin_id) {
                    src.unable_to_start(&track.descriptor.url);
                }
                if track.descriptor.manually_added {
                    self.consecutive_unable_to_start = 0;
                } else {
                    self.consecutive_unable_to_start += 1;
                }
                self.start_next_if_possible();
            }
        }
    }

    /// §4.1 rule 3: the outgoing current is demoted to previous and its
    /// requested next-track fade-in is handed to whatever starts next.
    fn promote_current_to_previous_and_start_next(&mut self) {
        let Some(old_current) = self.current.take() else { return };
        let next_fade = old_current.track.next_track_fade_in_request;
        self.previous = Some(old_current);
        if let Some(mut next_track) = self.queue.pop_front() {
            if next_fade.enabled {
                next_track.fade_in_request = next_fade;
            }
            self.start_track_as_current(next_track);
        }
        if self.queue.len() < 2 && !self.give_up {
            self.request_playlist_more(2);
        }
    }

    fn finalize_track_completion(&mut self, ap: ActivePipeline) {
        let track = ap.track;
        let _ = ap.handle.commands.send(PipelineCommand::Stop);

        if track.played_duration_ms == 0 {
            self.consecutive_empty_plays += 1;
            if self.consecutive_empty_plays >= self.config.give_up_after_n_empty_plays {
                if !self.give_up {
                    warn!(
                        after = self.config.give_up_after_n_empty_plays,
                        "giving up on automatic playlist requests"
                    );
                }
                self.give_up = true;
            }
        } else {
            self.consecutive_empty_plays = 0;
            self.give_up = false;
        }

        if track.decoded_duration_ms == 0 {
            self.note_unable_to_start(&track);
        }

        if track.qualifies_for_replacement(
            self.config.replacement_min_played_ms,
            self.config.replacement_min_cast_played_s,
        ) {
            self.request_replacement(&track);
        }

        if let Some(src) = self.source_for(&track.source_plugin_id) {
            src.done(&track.descriptor.url);
        }
    }

    fn note_unable_to_start(&mut self, track: &Track) {
        if let Some(src) = self.source_for(&track.source_plugin_id) {
            src.unable_to_start(&track.descriptor.url);
        }
        if track.descriptor.manually_added {
            self.consecutive_unable_to_start = 0;
        } else {
            self.consecutive_unable_to_start += 1;
        }
    }

    fn interrupt_current(&mut self, fade_seconds: f64) {
        if let Some(cur) = self.current.as_mut() {
            if cur.track.fade.direction != FadeDirection::Out {
                cur.track.fade = FadeState::fade_out(fade_seconds);
            }
            cur.force_finish_after_fade = true;
            let _ = cur.handle.commands.send(PipelineCommand::Interrupt {
                position_ms: cur.track.played_duration_ms,
                with_fadeout: true,
            });
        }
    }

    // ---- source interaction (async work, routed back via commands) ---

    fn source_for(&self, plugin_id: &str) -> Option<Arc<dyn SourcePlugin>> {
        self.sources.iter().find(|s| s.plugin_id() == plugin_id).cloned()
    }

    /// §4.1 scheduling policy: prefer the local source for
    /// `local_source_grace` after startup, then round-robin across ready
    /// sources ordered by priority.
    fn pick_source_for_playlist(&mut self) -> Option<Arc<dyn SourcePlugin>> {
        let mut ready: Vec<&Arc<dyn SourcePlugin>> = self.sources.iter().filter(|s| s.is_ready()).collect();
        if ready.is_empty() {
            return None;
        }
        if self.started_at.elapsed() < self.config.local_source_grace {
            if let Some(local) = ready.iter().find(|s| s.plugin_id() == "local") {
                return Some(Arc::clone(local));
            }
        }
        ready.sort_by_key(|s| s.priority());
        let idx = self.round_robin_cursor % ready.len();
        self.round_robin_cursor = self.round_robin_cursor.wrapping_add(1);
        Some(Arc::clone(ready[idx]))
    }

    fn request_playlist_more(&mut self, min_count: usize) {
        if self.give_up {
            return;
        }
        let Some(src) = self.pick_source_for_playlist() else { return };
        let tx = self.commands_tx.clone();
        self.tokio_handle.spawn(async move {
            match src.get_playlist(min_count, PlaylistMode::Normal).await {
                Ok(descriptors) => {
                    let _ = tx.send(CoordinatorCommand::DeliverPlaylist { descriptors });
                }
                Err(e) => warn!(error = %e, "get_playlist failed"),
            }
        });
    }

    fn request_replacement(&mut self, track: &Track) {
        let Some(src) = self.source_for(&track.source_plugin_id) else { return };
        let tx = self.commands_tx.clone();
        self.tokio_handle.spawn(async move {
            match src.get_replacement().await {
                Ok(descriptor) => {
                    let _ = tx.send(CoordinatorCommand::DeliverReplacement { descriptor });
                }
                Err(e) => warn!(error = %e, "get_replacement failed"),
            }
        });
    }

    fn open_byte_source(
        &self,
        descriptor: &TrackDescriptor,
    ) -> Result<(Box<dyn ByteSource>, Option<NetworkSourceMonitor>)> {
        if descriptor.url.starts_with("http://") || descriptor.url.starts_with("https://") {
            let source = NetworkByteSource::spawn(
                descriptor.url.clone(),
                &self.tokio_handle,
                self.config.underrun_wait_cap,
            );
            let monitor = source.monitor();
            Ok((Box::new(source), Some(monitor)))
        } else {
            Ok((Box::new(LocalByteSource::open(&descriptor.url)?), None))
        }
    }

    // ---- track pipeline events ----------------------------------------

    fn handle_track_event(&mut self, slot: Slot, event: TrackEvent) {
        match event {
            TrackEvent::BufferReady { buffer, .. } => self.on_buffer_ready(slot, buffer),
            TrackEvent::BufferDone { .. } => {}
            TrackEvent::DecoderFinished { .. } => self.mark_decoder_done(slot),
            TrackEvent::Finished { .. } => self.mark_decoder_done(slot),
            TrackEvent::NetworkStarting { .. } | TrackEvent::NetworkReady { .. } => {}
            TrackEvent::CastTitle { stream_offset, title, .. } => {
                self.on_cast_title(slot, stream_offset, title)
            }
            TrackEvent::PreDsp(_, msg) => self.on_predsp_message(slot, msg),
            TrackEvent::PositionChanged { .. } => {}
            TrackEvent::BufferUnderrun { .. } => {}
            TrackEvent::AboutToFinish { .. } => {}
            TrackEvent::Error { stage, error, severity, .. } => {
                self.on_pipeline_error(slot, stage, error, severity)
            }
        }
    }

    fn on_buffer_ready(&mut self, slot: Slot, buffer: Arc<AudioBuffer>) {
        let ap = self.slot_mut(slot);
        let Some(ap) = ap else { return };
        ap.track.decoded_duration_ms = buffer.end_time_us() / 1000;
        let mut data = buffer.data.clone();
        FadeRenderer::render(&mut ap.track.fade, &mut data, &buffer.format);
        ap.pending.push_back(PendingBuffer { samples: bytes_to_f32(&data), cursor: 0 });
        ap.underrun_since = None;
    }

    fn mark_decoder_done(&mut self, slot: Slot) {
        if let Some(ap) = self.slot_mut(slot) {
            ap.decoder_done = true;
        }
    }

    fn on_cast_title(&mut self, slot: Slot, _stream_offset: u64, title: String) {
        let Some(ap) = self.slot_mut(slot) else { return };
        ap.track.descriptor.apply_info_update(InfoUpdate::Performer(title));
        let _ = self.events_out.send(CoordinatorEvent::TrackInfo(ap.track.descriptor.clone()));
    }

    fn on_predsp_message(&mut self, slot: Slot, msg: PreDspMessage) {
        if let PreDspMessage::RequestAboutToFinishSendForPreviousTrack { position_before_end_ms } = msg {
            // This one message applies to whichever track is *previous*
            // regardless of which slot's analyzer produced it (§4.4): the
            // new current's own analysis can retroactively move the
            // departing track's about-to-finish point.
            if let Some(prev) = self.previous.as_mut() {
                prev.track.about_to_finish_position_ms = position_before_end_ms;
            }
            return;
        }

        let Some(ap) = self.slot_mut(slot) else { return };
        match msg {
            PreDspMessage::ReplayGainTarget { .. } => {
                // Already applied to the Equalizer inside the pipeline
                // thread itself; nothing for the Coordinator to do.
            }
            PreDspMessage::RequestFadeIn { length_ms } => {
                if ap.track.fade.direction == FadeDirection::None && ap.track.played_duration_ms < length_ms {
                    ap.track.fade = FadeState::fade_in(length_ms as f64 / 1000.0);
                }
            }
            PreDspMessage::RequestFadeInForNextTrack { length_ms } => {
                ap.track.next_track_fade_in_request = FadeInRequest::of(length_ms);
            }
            PreDspMessage::RequestInterrupt { position_ms, .. } => {
                ap.track.interrupt_position_ms = position_ms;
            }
            PreDspMessage::RequestAboutToFinishSend { position_ms } => {
                ap.track.about_to_finish_position_ms = position_ms;
            }
            PreDspMessage::RequestAboutToFinishSendForPreviousTrack { .. } => unreachable!("handled above"),
        }
    }

    fn on_pipeline_error(&mut self, slot: Slot, stage: StageKind, error: Arc<crate::error::EngineError>, severity: Severity) {
        warn!(?stage, %error, ?severity, "pipeline stage error");
        let _ = self.events_out.send(CoordinatorEvent::Error {
            message: error.to_string(),
            fatal: severity == Severity::Fatal,
        });
        if severity == Severity::NonFatal {
            return;
        }
        match slot {
            Slot::Previous => {
                if let Some(ap) = self.previous.take() {
                    let _ = ap.handle.commands.send(PipelineCommand::Stop);
                }
            }
            Slot::Current => {
                if let Some(ap) = self.current.take() {
                    let _ = ap.handle.commands.send(PipelineCommand::Stop);
                    if matches!(error.recovery_action(), RecoveryAction::Halt) {
                        self.output.pause();
                    }
                    self.finalize_track_completion(ap);
                }
                self.start_next_if_possible();
            }
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> Option<&mut ActivePipeline> {
        match slot {
            Slot::Current => self.current.as_mut(),
            Slot::Previous => self.previous.as_mut(),
        }
    }

    // ---- output pump (§4.2 transport, §4.6, §4.7) ----------------------

    fn pump_output(&mut self) {
        let vacant = self.output.vacant_frames().min(PUMP_CHUNK_FRAMES);
        if vacant == 0 {
            self.check_transitions();
            return;
        }

        let current_samples = drain_pending(&mut self.current, vacant);
        let previous_samples = drain_pending(&mut self.previous, vacant);

        let frames = (current_samples.len() / 2).max(previous_samples.len() / 2);
        if frames > 0 {
            let mut mixed = vec![0.0f32; frames * 2];
            mixed[..current_samples.len()].copy_from_slice(&current_samples);
            for (i, s) in previous_samples.iter().enumerate() {
                mixed[i] = (mixed[i] + *s).clamp(-1.0, 1.0);
            }
            self.output.push_frames(&mixed);
        }

        let current_frames = current_samples.len() / 2;
        let previous_frames = previous_samples.len() / 2;
        if let Some(cur) = self.current.as_mut() {
            cur.track.played_duration_ms += frames_to_ms(current_frames, TARGET_SAMPLE_RATE);
            if current_frames == 0 && !cur.decoder_done {
                if cur.underrun_since.is_none() {
                    cur.underrun_since = Some(Instant::now());
                }
            } else {
                cur.underrun_since = None;
            }
        }
        if let Some(prev) = self.previous.as_mut() {
            prev.track.played_duration_ms += frames_to_ms(previous_frames, TARGET_SAMPLE_RATE);
        }

        self.check_transitions();
    }

    fn check_transitions(&mut self) {
        if let Some(cur) = &self.current {
            if cur.force_finish_after_fade && cur.track.fade.is_done() {
                if let Some(ap) = self.current.take() {
                    let _ = ap.handle.commands.send(PipelineCommand::Stop);
                    self.finalize_track_completion(ap);
                }
                self.start_next_if_possible();
                self.settle_pending_track_info();
                return;
            }
            if let Some(since) = cur.underrun_since {
                if since.elapsed() >= self.config.underrun_wait_cap {
                    warn!(cap = ?self.config.underrun_wait_cap, "output underrun exceeded wait cap, aborting track");
                    if let Some(ap) = self.current.take() {
                        let _ = ap.handle.commands.send(PipelineCommand::Stop);
                        self.finalize_track_completion(ap);
                    }
                    self.start_next_if_possible();
                    self.settle_pending_track_info();
                    return;
                }
            }
        }

        if let Some(cur) = &self.current {
            if cur.decoder_done && cur.pending_frames() == 0 {
                if let Some(ap) = self.current.take() {
                    self.finalize_track_completion(ap);
                }
                self.start_next_if_possible();
            } else if !cur.track.about_to_finish_fired
                && cur.track.about_to_finish_position_ms > 0
                && cur.track.played_duration_ms >= cur.track.about_to_finish_position_ms
                && self.previous.is_none()
            {
                if let Some(cur) = self.current.as_mut() {
                    cur.track.about_to_finish_fired = true;
                }
                self.promote_current_to_previous_and_start_next();
            } else if cur.track.interrupt_position_ms > 0
                && cur.track.fade.direction == FadeDirection::None
                && cur.track.played_duration_ms >= cur.track.interrupt_position_ms
            {
                self.interrupt_current(INTERRUPT_FADE_OUT_SECONDS);
            }
        }

        if let Some(prev) = &self.previous {
            if prev.decoder_done && prev.pending_frames() == 0 {
                if let Some(ap) = self.previous.take() {
                    self.finalize_track_completion(ap);
                }
            }
        }

        self.settle_pending_track_info();
    }

    fn settle_pending_track_info(&mut self) {
        let Some(id) = self.pending_track_info else { return };
        match &self.current {
            Some(cur) if cur.track.id == id => {
                if cur.track.fade.percent >= 50 {
                    let _ = self.events_out.send(CoordinatorEvent::TrackInfo(cur.track.descriptor.clone()));
                    self.pending_track_info = None;
                }
            }
            _ => self.pending_track_info = None,
        }
    }

    fn publish_position(&mut self) {
        if let Some(cur) = &self.current {
            let _ = self.events_out.send(CoordinatorEvent::Position {
                track_id: cur.track.id,
                position_us: cur.track.played_duration_ms * 1000,
            });
        }
    }
}

async fn recv_from(slot: &mut Option<ActivePipeline>) -> Option<TrackEvent> {
    match slot {
        Some(ap) => ap.handle.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Drain up to `max_frames` stereo frames from a slot's pending buffer
/// queue, acknowledging each fully-consumed buffer with exactly one
/// `PipelineCommand::BufferDone` (§4.2 point 3's synchronizer queue ack).
fn drain_pending(slot: &mut Option<ActivePipeline>, max_frames: usize) -> Vec<f32> {
    let Some(ap) = slot else { return Vec::new() };
    let mut out = Vec::with_capacity(max_frames * 2);
    let mut frames_left = max_frames;
    while frames_left > 0 {
        let Some(front) = ap.pending.front_mut() else { break };
        let available = front.remaining_frames();
        if available == 0 {
            ap.pending.pop_front();
            let _ = ap.handle.commands.send(PipelineCommand::BufferDone);
            continue;
        }
        let take = available.min(frames_left);
        let start = front.cursor * 2;
        let end = start + take * 2;
        out.extend_from_slice(&front.samples[start..end]);
        front.cursor += take;
        frames_left -= take;
        if front.remaining_frames() == 0 {
            ap.pending.pop_front();
            let _ = ap.handle.commands.send(PipelineCommand::BufferDone);
        }
    }
    out
}

fn bytes_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4).map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn frames_to_ms(frames: usize, sample_rate: u32) -> u64 {
    (frames as u64 * 1000) / sample_rate.max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::pcm_format::{PcmFormat, SampleType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
    use crate::output::NullOutputSink;

    fn fake_handle(track_id: Uuid) -> (TrackPipelineHandle, SyncSender<PipelineCommand>, Receiver<PipelineCommand>, UnboundedSender<TrackEvent>) {
        let (command_tx, command_rx) = sync_channel::<PipelineCommand>(16);
        let (event_tx, event_rx) = unbounded_channel::<TrackEvent>();
        let handle = TrackPipelineHandle { track_id, commands: command_tx.clone(), events: event_rx };
        (handle, command_tx, command_rx, event_tx)
    }

    fn test_coordinator(sources: Vec<Arc<dyn SourcePlugin>>) -> (Coordinator<NullOutputSink>, CoordinatorHandle) {
        Coordinator::new(
            EngineConfig::default(),
            sources,
            NullOutputSink::new(TARGET_SAMPLE_RATE),
            tokio::runtime::Handle::current(),
        )
    }

    fn track(url: &str) -> Track {
        Track::new(TrackDescriptor::new(url, "mock", false))
    }

    struct MockSource {
        id: &'static str,
        replacement: std::sync::Mutex<Option<TrackDescriptor>>,
        unable_calls: AtomicUsize,
    }

    impl MockSource {
        fn new(id: &'static str) -> Self {
            Self { id, replacement: std::sync::Mutex::new(None), unable_calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl SourcePlugin for MockSource {
        fn plugin_id(&self) -> &str {
            self.id
        }
        fn priority(&self) -> i32 {
            0
        }
        fn is_ready(&self) -> bool {
            true
        }
        async fn get_playlist(&self, _count: usize, _mode: PlaylistMode) -> Result<Vec<TrackDescriptor>> {
            Ok(Vec::new())
        }
        async fn get_replacement(&self) -> Result<Option<TrackDescriptor>> {
            Ok(self.replacement.lock().unwrap().clone())
        }
        fn unable_to_start(&self, _url: &str) {
            self.unable_calls.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn cast_finished_early(&self, _url: &str, _played_s: u64) {}
        fn done(&self, _url: &str) {}
    }

    fn pcm_buffer(seconds: f64, value: f32) -> Arc<AudioBuffer> {
        let frames = (TARGET_SAMPLE_RATE as f64 * seconds) as usize;
        let mut data = Vec::with_capacity(frames * 8);
        for _ in 0..frames {
            data.extend_from_slice(&value.to_ne_bytes());
            data.extend_from_slice(&value.to_ne_bytes());
        }
        Arc::new(AudioBuffer::new(PcmFormat::new(TARGET_SAMPLE_RATE, 2, SampleType::F32), 0, data))
    }

    #[tokio::test]
    async fn drain_pending_acks_exactly_once_per_fully_consumed_buffer() {
        let (handle, _ptx, prx, _etx) = fake_handle(Uuid::new_v4());
        let mut ap = Some(ActivePipeline::new(track("a"), handle));
        ap.as_mut().unwrap().pending.push_back(PendingBuffer { samples: vec![0.1, 0.2, 0.3, 0.4], cursor: 0 });
        ap.as_mut().unwrap().pending.push_back(PendingBuffer { samples: vec![0.5, 0.6], cursor: 0 });

        let out = drain_pending(&mut ap, 10);
        assert_eq!(out.len(), 6);
        assert!(matches!(prx.try_recv(), Ok(PipelineCommand::BufferDone)));
        assert!(matches!(prx.try_recv(), Ok(PipelineCommand::BufferDone)));
        assert!(prx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drain_pending_respects_max_frames_and_leaves_a_cursor() {
        let (handle, _ptx, prx, _etx) = fake_handle(Uuid::new_v4());
        let mut ap = Some(ActivePipeline::new(track("a"), handle));
        ap.as_mut().unwrap().pending.push_back(PendingBuffer { samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], cursor: 0 });

        let out = drain_pending(&mut ap, 2);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
        assert!(prx.try_recv().is_err(), "buffer not fully drained yet, no ack expected");
        assert_eq!(ap.unwrap().pending_frames(), 1);
    }

    #[tokio::test]
    async fn give_up_rule_trips_after_n_consecutive_empty_plays() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        for _ in 0..4 {
            let (handle, _ptx, _prx, _etx) = fake_handle(Uuid::new_v4());
            let ap = ActivePipeline::new(track("a"), handle);
            coordinator.finalize_track_completion(ap);
        }
        assert!(coordinator.give_up);
        assert_eq!(coordinator.consecutive_empty_plays, 4);
    }

    #[tokio::test]
    async fn a_track_that_actually_played_resets_the_give_up_counter() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        coordinator.consecutive_empty_plays = 3;
        let (handle, _ptx, _prx, _etx) = fake_handle(Uuid::new_v4());
        let mut t = track("a");
        t.played_duration_ms = 5000;
        t.decoded_duration_ms = 5000;
        coordinator.finalize_track_completion(ActivePipeline::new(t, handle));
        assert_eq!(coordinator.consecutive_empty_plays, 0);
        assert!(!coordinator.give_up);
    }

    #[tokio::test]
    async fn replacement_is_requested_for_a_short_file_play() {
        let source = Arc::new(MockSource::new("mock"));
        *source.replacement.lock().unwrap() = Some(TrackDescriptor::new("mock://b", "mock", false));
        let (mut coordinator, _handle) = test_coordinator(vec![source.clone() as Arc<dyn SourcePlugin>]);

        let (handle, _ptx, _prx, _etx) = fake_handle(Uuid::new_v4());
        let mut t = track("mock://a");
        t.played_duration_ms = 200; // below replacement_min_played_ms (1000)
        t.decoded_duration_ms = 200;
        coordinator.finalize_track_completion(ActivePipeline::new(t, handle));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let delivered = coordinator.commands.try_recv();
        assert!(matches!(delivered, Ok(CoordinatorCommand::DeliverReplacement { descriptor: Some(_) })));
    }

    #[tokio::test]
    async fn about_to_finish_promotes_current_to_previous() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        coordinator.queue.append(track("next"));

        let (handle, _ptx, _prx, _etx) = fake_handle(Uuid::new_v4());
        let mut t = track("current");
        t.about_to_finish_position_ms = 1000;
        t.played_duration_ms = 1500;
        let id = t.id;
        coordinator.current = Some(ActivePipeline::new(t, handle));

        coordinator.check_transitions();

        assert!(coordinator.previous.is_some());
        assert_eq!(coordinator.previous.as_ref().unwrap().track.id, id);
    }

    #[tokio::test]
    async fn previous_is_destroyed_once_fully_drained() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        let (handle, _ptx, prx, _etx) = fake_handle(Uuid::new_v4());
        let mut ap = ActivePipeline::new(track("previous"), handle);
        ap.decoder_done = true;
        coordinator.previous = Some(ap);

        coordinator.check_transitions();

        assert!(coordinator.previous.is_none());
        assert!(matches!(prx.try_recv(), Ok(PipelineCommand::Stop)));
    }

    #[tokio::test]
    async fn interrupt_threshold_arms_a_fade_out_and_forces_finish_on_completion() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        let (handle, _ptx, prx, _etx) = fake_handle(Uuid::new_v4());
        let mut t = track("a");
        t.interrupt_position_ms = 1000;
        t.played_duration_ms = 1000;
        coordinator.current = Some(ActivePipeline::new(t, handle));

        coordinator.check_transitions();
        assert!(matches!(prx.try_recv(), Ok(PipelineCommand::Interrupt { .. })));
        assert_eq!(coordinator.current.as_ref().unwrap().track.fade.direction, FadeDirection::Out);
        assert!(coordinator.current.as_ref().unwrap().force_finish_after_fade);

        // Drive the fade to completion directly (percent reaches 0 on Out).
        coordinator.current.as_mut().unwrap().track.fade.percent = 0;
        coordinator.check_transitions();
        assert!(coordinator.current.is_none());
    }

    #[tokio::test]
    async fn skip_arms_a_fast_fade_on_current_and_destroys_previous_immediately() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        coordinator.queue.append(track("next"));

        let (cur_handle, _cptx, cprx, _cetx) = fake_handle(Uuid::new_v4());
        let (prev_handle, _pptx, pprx, _petx) = fake_handle(Uuid::new_v4());
        coordinator.current = Some(ActivePipeline::new(track("current"), cur_handle));
        coordinator.previous = Some(ActivePipeline::new(track("previous"), prev_handle));

        coordinator.skip_next();

        // The previous slot's old occupant is torn down immediately...
        assert!(matches!(pprx.try_recv(), Ok(PipelineCommand::Stop)));
        // ...but current is interrupted with a fast fade-out rather than
        // stopped outright, and demoted into the now-vacant previous slot.
        assert!(matches!(cprx.try_recv(), Ok(PipelineCommand::Interrupt { .. })));
        let demoted = coordinator.previous.as_ref().expect("current should be demoted to previous");
        assert_eq!(demoted.track.descriptor.url, "current");
        assert_eq!(demoted.track.fade.direction, FadeDirection::Out);
        assert_eq!(demoted.track.fade.seconds, SKIP_FADE_OUT_SECONDS);
        assert!(demoted.force_finish_after_fade);
        assert!(!demoted.track.replaceable);
    }

    #[tokio::test]
    async fn on_buffer_ready_enqueues_faded_samples() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        let (handle, _ptx, _prx, _etx) = fake_handle(Uuid::new_v4());
        let mut t = track("a");
        t.fade = FadeState::fade_in(1.0);
        coordinator.current = Some(ActivePipeline::new(t, handle));

        coordinator.on_buffer_ready(Slot::Current, pcm_buffer(0.01, 1.0));

        let ap = coordinator.current.as_ref().unwrap();
        assert_eq!(ap.pending.len(), 1);
        // Fading in from 0%, the very first frame must be attenuated well
        // below the raw 1.0 input.
        assert!(ap.pending.front().unwrap().samples[0] < 0.5);
    }

    #[tokio::test]
    async fn replay_gain_target_does_not_touch_fade_state() {
        let (mut coordinator, _handle) = test_coordinator(Vec::new());
        let (handle, _ptx, _prx, _etx) = fake_handle(Uuid::new_v4());
        coordinator.current = Some(ActivePipeline::new(track("a"), handle));
        coordinator.on_predsp_message(Slot::Current, PreDspMessage::ReplayGainTarget { db: -6.0 });
        assert_eq!(coordinator.current.as_ref().unwrap().track.fade.direction, FadeDirection::None);
    }
}
