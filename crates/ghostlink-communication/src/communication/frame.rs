//! Inbound frame decoding and classification
//!
//! The daemon is not strict about JSON: it emits bare `NaN` tokens and
//! embedded line breaks. Text is laundered before parsing, and every decoded
//! frame is sorted into one of the four routes the transport knows about.

use ghostlink_core::data::frame::status;
use ghostlink_core::{Frame, StatusFrame};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn nan_token() -> &'static Regex {
    static NAN_TOKEN: OnceLock<Regex> = OnceLock::new();
    NAN_TOKEN.get_or_init(|| Regex::new(r"\bNaN\b").expect("invalid regex pattern"))
}

/// Replace bare `NaN` tokens with `null` and drop CR/LF
pub fn sanitize(text: &str) -> String {
    let laundered = nan_token().replace_all(text, "null");
    laundered.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Decode one text message.
///
/// A JSON object with a string `status` becomes [`Frame::Status`]; anything
/// else is kept as sanitized [`Frame::Text`].
pub fn decode_text(text: &str) -> Frame {
    let clean = sanitize(text);
    match serde_json::from_str::<Value>(&clean) {
        Ok(value) => match StatusFrame::from_value(value) {
            Some(frame) => Frame::Status(frame),
            None => Frame::Text(clean),
        },
        Err(_) => Frame::Text(clean),
    }
}

/// Route chosen for an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// `status: error`
    Error(StatusFrame),
    /// `status: fatal`
    Fatal(StatusFrame),
    /// Heartbeat response, dropped
    Pong,
    /// Everything else, binary frames included
    Message(Frame),
}

/// Sort a decoded frame by its status
pub fn classify(frame: Frame) -> Classified {
    match frame {
        Frame::Status(payload) => match payload.status() {
            status::ERROR => Classified::Error(payload),
            status::FATAL => Classified::Fatal(payload),
            status::PONG => Classified::Pong,
            _ => Classified::Message(Frame::Status(payload)),
        },
        other => Classified::Message(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nan_is_laundered() {
        let frame = decode_text(r#"{"status":"position","x":NaN,"label":"NaNo"}"#);
        let status = frame.as_status().unwrap();
        assert_eq!(status.get("x"), Some(&Value::Null));
        assert_eq!(status.str_field("label"), Some("NaNo"));
    }

    #[test]
    fn test_line_breaks_are_stripped() {
        let frame = decode_text("{\"status\":\r\n\"ok\"}\n");
        assert!(frame.is_status("ok"));
        assert_eq!(sanitize("a\r\nb\rc\n"), "abc");
    }

    #[test]
    fn test_non_status_text_is_opaque() {
        assert_eq!(decode_text("hello"), Frame::Text("hello".into()));
        assert_eq!(decode_text("[1,2]"), Frame::Text("[1,2]".into()));
        assert_eq!(
            decode_text(r#"{"status":1}"#),
            Frame::Text(r#"{"status":1}"#.into())
        );
    }

    #[test]
    fn test_classify_routes() {
        let frame = |value| Frame::Status(StatusFrame::from_value(value).unwrap());

        assert!(matches!(
            classify(frame(json!({"status": "error", "error": "BAD_PARAMS"}))),
            Classified::Error(_)
        ));
        assert!(matches!(
            classify(frame(json!({"status": "fatal"}))),
            Classified::Fatal(_)
        ));
        assert_eq!(classify(frame(json!({"status": "pong"}))), Classified::Pong);
        assert!(matches!(
            classify(frame(json!({"status": "continue"}))),
            Classified::Message(_)
        ));
        assert_eq!(
            classify(Frame::Binary(vec![1, 2])),
            Classified::Message(Frame::Binary(vec![1, 2]))
        );
    }
}
