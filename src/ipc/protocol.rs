//! Wire protocol (§6): messages are UTF-8 `tag` or `tag:json`, terminated by
//! the ASCII record separator byte `0x1E`. Parsing and serialization live
//! here, kept separate from `server`'s connection handling so both can be
//! unit-tested without a socket.

use serde_json::Value;
use uuid::Uuid;

use crate::events::{CoordinatorCommand, CoordinatorEvent};
use crate::model::track_descriptor::TrackDescriptor;

/// Byte that terminates every message on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// A parsed inbound message, not yet resolved into a `CoordinatorCommand`
/// (some tags are answered directly by the listener rather than routed
/// through the Coordinator, e.g. `are_you_alive`).
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    AreYouAlive,
    Pause,
    Resume,
    Next,
    RequestPlaylist,
    RequestTrackInfo,
    RequestPosition,
    Quit,
    RequestCollectionList,
    PluginUi(Option<Value>),
    PluginUiResults(Option<Value>),
    TrackAction(Option<Value>),
    RequestDiagnostics,
    Search(Option<Value>),
    OpenTracks(Option<Value>),
    OpenTracksSelected(Option<Value>),
    /// A bare tag that parses as a URL: §6 treats this as "enqueue this
    /// track" rather than an error, so a client can queue a file by typing
    /// its path/URL as the whole message.
    EnqueueUrl(String),
    /// Recognized tag, malformed JSON payload.
    Malformed { tag: String },
    /// Tag not in the known set and not URL-shaped.
    Unknown { tag: String },
}

/// Split a tag/tag:json message (already stripped of its trailing `0x1E`)
/// into its tag and optional raw JSON text.
fn split_tag(message: &str) -> (&str, Option<&str>) {
    match message.split_once(':') {
        Some((tag, rest)) => (tag, Some(rest)),
        None => (message, None),
    }
}

fn parse_payload(tag: &str, payload: Option<&str>) -> Result<Option<Value>, ()> {
    match payload {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw).map(Some).map_err(|_| {
            tracing::debug!(tag, "malformed JSON payload");
        }),
    }
}

/// A message is treated as an implicit enqueue if it looks like a URL or an
/// absolute/relative filesystem path — the "unknown tags that parse as URLs
/// enqueue a track" rule (§6).
fn looks_like_url(message: &str) -> bool {
    message.contains("://") || message.starts_with('/') || message.starts_with("./")
}

pub fn parse_request(message: &str) -> Request {
    let message = message.trim();
    let (tag, payload) = split_tag(message);
    match tag {
        "are_you_alive" => Request::AreYouAlive,
        "pause" => Request::Pause,
        "resume" => Request::Resume,
        "next" => Request::Next,
        "playlist" => Request::RequestPlaylist,
        "track_info" => Request::RequestTrackInfo,
        "position" => Request::RequestPosition,
        "quit" => Request::Quit,
        "collection_list" => Request::RequestCollectionList,
        "diagnostics" => Request::RequestDiagnostics,
        "plugin_ui" => match parse_payload(tag, payload) {
            Ok(v) => Request::PluginUi(v),
            Err(()) => Request::Malformed { tag: tag.to_string() },
        },
        "plugin_ui_results" => match parse_payload(tag, payload) {
            Ok(v) => Request::PluginUiResults(v),
            Err(()) => Request::Malformed { tag: tag.to_string() },
        },
        "track_action" => match parse_payload(tag, payload) {
            Ok(v) => Request::TrackAction(v),
            Err(()) => Request::Malformed { tag: tag.to_string() },
        },
        "search" => match parse_payload(tag, payload) {
            Ok(v) => Request::Search(v),
            Err(()) => Request::Malformed { tag: tag.to_string() },
        },
        "open_tracks" => match parse_payload(tag, payload) {
            Ok(v) => Request::OpenTracks(v),
            Err(()) => Request::Malformed { tag: tag.to_string() },
        },
        "open_tracks_selected" => match parse_payload(tag, payload) {
            Ok(v) => Request::OpenTracksSelected(v),
            Err(()) => Request::Malformed { tag: tag.to_string() },
        },
        other if looks_like_url(other) && payload.is_none() => {
            Request::EnqueueUrl(other.to_string())
        }
        other => Request::Unknown { tag: other.to_string() },
    }
}

/// Turn a parsed `Request` into the `CoordinatorCommand` it maps to, if any.
/// Requests answered directly by the listener (`AreYouAlive`, `Quit`) or
/// that carry no Coordinator-side behavior yet (plugin UI round trips) have
/// no command and are handled by the caller.
pub fn request_to_command(request: &Request) -> Option<CoordinatorCommand> {
    match request {
        Request::Pause => Some(CoordinatorCommand::Pause),
        Request::Resume => Some(CoordinatorCommand::Resume),
        Request::Next => Some(CoordinatorCommand::SkipNext),
        Request::EnqueueUrl(url) => Some(CoordinatorCommand::Enqueue(vec![
            TrackDescriptor::new(url.clone(), "ipc", false).manually(),
        ])),
        _ => None,
    }
}

/// Encode an outbound event as a `tag` or `tag:json` wire message, without
/// the trailing record separator (the caller appends it once per write).
pub fn encode_event(event: &CoordinatorEvent) -> String {
    match event {
        CoordinatorEvent::TrackInfo(descriptor) => {
            format!("track_info:{}", serde_json::to_string(descriptor).unwrap_or_default())
        }
        CoordinatorEvent::Position { track_id, position_us } => {
            format!(
                "position:{}",
                serde_json::json!({ "track_id": track_id, "position_us": position_us })
            )
        }
        CoordinatorEvent::Paused => "paused".to_string(),
        CoordinatorEvent::Resumed => "resumed".to_string(),
        CoordinatorEvent::RequestRemoveTracks => "request_remove_tracks".to_string(),
        CoordinatorEvent::Error { message, fatal } => {
            format!("error:{}", serde_json::json!({ "message": message, "fatal": fatal }))
        }
    }
}

/// Build the immediate reply to an `are_you_alive` probe (§6).
pub fn im_alive(track_id: Option<Uuid>) -> String {
    match track_id {
        Some(id) => format!("im_alive:{}", serde_json::json!({ "track_id": id })),
        None => "im_alive".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_tags() {
        assert_eq!(parse_request("are_you_alive"), Request::AreYouAlive);
        assert_eq!(parse_request("pause"), Request::Pause);
        assert_eq!(parse_request("next"), Request::Next);
        assert_eq!(parse_request("quit"), Request::Quit);
    }

    #[test]
    fn parses_tag_with_json_payload() {
        match parse_request(r#"search:{"query":"miles davis"}"#) {
            Request::Search(Some(v)) => assert_eq!(v["query"], "miles davis"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn malformed_json_payload_is_flagged() {
        assert_eq!(
            parse_request("search:{not json}"),
            Request::Malformed { tag: "search".to_string() }
        );
    }

    #[test]
    fn url_shaped_unknown_tag_enqueues() {
        assert_eq!(
            parse_request("https://example.com/stream.mp3"),
            Request::EnqueueUrl("https://example.com/stream.mp3".to_string())
        );
        assert_eq!(
            parse_request("/home/user/music/track.flac"),
            Request::EnqueueUrl("/home/user/music/track.flac".to_string())
        );
    }

    #[test]
    fn unrecognized_non_url_tag_is_unknown() {
        assert_eq!(
            parse_request("frobnicate"),
            Request::Unknown { tag: "frobnicate".to_string() }
        );
    }

    #[test]
    fn enqueue_request_becomes_manually_added_command() {
        let request = Request::EnqueueUrl("/music/a.mp3".to_string());
        match request_to_command(&request) {
            Some(CoordinatorCommand::Enqueue(descriptors)) => {
                assert_eq!(descriptors.len(), 1);
                assert!(descriptors[0].manually_added);
                assert_eq!(descriptors[0].url, "/music/a.mp3");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn encodes_track_info_event_as_tag_json() {
        let descriptor = TrackDescriptor::new("a.mp3", "local", false);
        let wire = encode_event(&CoordinatorEvent::TrackInfo(descriptor));
        assert!(wire.starts_with("track_info:"));
    }

    #[test]
    fn encodes_bare_tag_events_without_payload() {
        assert_eq!(encode_event(&CoordinatorEvent::Paused), "paused");
        assert_eq!(encode_event(&CoordinatorEvent::Resumed), "resumed");
    }
}
