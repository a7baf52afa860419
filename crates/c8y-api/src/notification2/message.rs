//! Notification frame decoding.
//!
//! The server pushes UTF-8 text frames made of newline-separated header
//! lines (message id, source, action, optional extras), an empty
//! separator line, and the JSON body.

use serde::de::DeserializeOwned;

use super::ack::AckHandle;
use crate::error::Error;

/// A decoded notification.
///
/// Cloning is cheap enough for fan-out; clones share the same
/// acknowledgment slot, so a message is acknowledged at most once no
/// matter which clone calls [`ack`](Self::ack).
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    source: String,
    action: String,
    headers: Vec<String>,
    body: String,
    raw: String,
    ack: Option<AckHandle>,
}

impl Message {
    /// Parse a raw frame.
    ///
    /// Without an empty separator line the last line is taken as the body,
    /// which then requires at least four lines.
    ///
    /// A separator always ends the header, and the header needs id, source
    /// and action. `"id\nsource\n\n{}"` is therefore rejected rather than
    /// read as a two-line header with the last line as the body.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let lines: Vec<&str> = raw
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();

        let (header, body) = match lines.iter().position(|line| line.is_empty()) {
            Some(sep) => (&lines[..sep], lines[sep + 1..].join("\n")),
            None if lines.len() >= 4 => {
                let (last, header) = lines.split_last().ok_or_else(|| Error::Protocol {
                    reason: "empty frame".into(),
                })?;
                (header, (*last).to_owned())
            }
            None => {
                return Err(Error::Protocol {
                    reason: format!("expected at least 4 lines, got {}", lines.len()),
                });
            }
        };

        let [id, source, action, extra @ ..] = header else {
            return Err(Error::Protocol {
                reason: format!("expected at least 3 header lines, got {}", header.len()),
            });
        };

        let id = id.trim();
        if id.is_empty() {
            return Err(Error::Protocol {
                reason: "empty message id".into(),
            });
        }

        Ok(Self {
            id: id.to_owned(),
            source: (*source).to_owned(),
            action: (*action).to_owned(),
            headers: extra.iter().map(|h| (*h).to_owned()).collect(),
            body,
            raw: raw.to_owned(),
            ack: None,
        })
    }

    pub(crate) fn with_ack(mut self, ack: AckHandle) -> Self {
        self.ack = Some(ack);
        self
    }

    pub(crate) fn ack_handle(&self) -> Option<&AckHandle> {
        self.ack.as_ref()
    }

    /// Server-assigned message id; doubles as the acknowledgment token.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resource path the notification refers to, e.g. `/t12345/managedobjects/4711`.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `CREATE`, `UPDATE`, `DELETE`, ...
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Header lines after the action, if any.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// The raw body text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The complete frame as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_str(&self.body).map_err(|e| Error::Deserialization {
            message: format!("notification body of {}: {e}", self.id),
            body: self.body.clone(),
        })
    }

    /// Acknowledge this message.
    ///
    /// Best-effort: if the connection that delivered the message is gone,
    /// a warning is logged and the server will redeliver. Repeated calls
    /// are no-ops.
    pub fn ack(&self) {
        match &self.ack {
            Some(handle) => handle.ack(),
            None => tracing::debug!(id = %self.id, "message has no channel, ack ignored"),
        }
    }

    /// Whether an acknowledgment has been issued for this message.
    pub fn is_acked(&self) -> bool {
        self.ack.as_ref().is_some_and(AckHandle::is_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_with_separator() {
        let raw = "msg-1\n/t1/managedobjects/42\nUPDATE\n\n{\"id\":\"42\",\"name\":\"pump\"}";
        let msg = Message::parse(raw).expect("valid frame");

        assert_eq!(msg.id(), "msg-1");
        assert_eq!(msg.source(), "/t1/managedobjects/42");
        assert_eq!(msg.action(), "UPDATE");
        assert!(msg.headers().is_empty());
        assert_eq!(msg.body(), r#"{"id":"42","name":"pump"}"#);
        assert_eq!(msg.raw(), raw);
    }

    #[test]
    fn parse_frame_with_extra_headers_and_crlf() {
        let raw = "msg-2\r\n/t1/alarms/7\r\nCREATE\r\nx-tag: a\r\n\r\n{\"id\":\"7\"}";
        let msg = Message::parse(raw).expect("valid frame");

        assert_eq!(msg.id(), "msg-2");
        assert_eq!(msg.action(), "CREATE");
        assert_eq!(msg.headers(), ["x-tag: a".to_owned()]);
        assert_eq!(msg.body(), r#"{"id":"7"}"#);
    }

    #[test]
    fn parse_multiline_body() {
        let raw = "m\n/t1/events/1\nCREATE\n\n{\n  \"id\": \"1\"\n}";
        let msg = Message::parse(raw).expect("valid frame");
        let value: serde_json::Value = msg.json().expect("json body");
        assert_eq!(value["id"], "1");
    }

    #[test]
    fn parse_frame_without_separator_uses_last_line() {
        let raw = "m\n/t1/events/1\nCREATE\n{\"id\":\"1\"}";
        let msg = Message::parse(raw).expect("valid frame");
        assert_eq!(msg.body(), r#"{"id":"1"}"#);
        assert!(msg.headers().is_empty());
    }

    #[test]
    fn parse_delete_with_empty_body() {
        let msg = Message::parse("m\n/t1/managedobjects/9\nDELETE\n\n").expect("valid frame");
        assert_eq!(msg.action(), "DELETE");
        assert_eq!(msg.body(), "");
    }

    #[test]
    fn reject_short_frames() {
        for raw in ["", "only-id", "id\nsource\n{}", "id\nsource\n\n{}"] {
            let err = Message::parse(raw).expect_err(raw);
            assert!(matches!(err, Error::Protocol { .. }), "{raw:?} -> {err:?}");
        }
    }

    #[test]
    fn separator_after_two_header_lines_is_rejected() {
        let err = Message::parse("id\nsource\n\n{}").expect_err("header too short");
        let Error::Protocol { reason } = err else {
            panic!("expected protocol error, got {err:?}");
        };
        assert_eq!(reason, "expected at least 3 header lines, got 2");
    }

    #[test]
    fn reject_empty_message_id() {
        let err = Message::parse("  \n/t1/events/1\nCREATE\n\n{}").expect_err("empty id");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn invalid_json_body_is_deserialization_error() {
        let msg = Message::parse("m\n/s\nCREATE\n\nnot json").expect("valid frame");
        let err = msg.json::<serde_json::Value>().expect_err("bad json");
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn ack_without_channel_is_noop() {
        let msg = Message::parse("m\n/s\nCREATE\n\n{}").expect("valid frame");
        msg.ack();
        assert!(!msg.is_acked());
    }
}
