use bytes::Bytes;

/// One unit written to the outbound text-event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent once, right after the broker subscription is in place
    Open,
    /// A validated envelope, as the original broker payload text
    Data(String),
    Heartbeat,
    /// Last frame after a terminal envelope
    Close,
}

impl Frame {
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Open => Bytes::from_static(b"event: open\ndata: connected\n\n"),
            Self::Heartbeat => Bytes::from_static(b": heartbeat\n\n"),
            Self::Close => Bytes::from_static(b"event: close\ndata: stream-ended\n\n"),
            Self::Data(payload) => {
                let mut out = String::with_capacity(payload.len() + 8);
                // CRLF, lone CR and LF all end a field line on the wire
                for line in payload.replace("\r\n", "\n").split(|c| c == '\r' || c == '\n') {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                Bytes::from(out)
            }
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Data(_) => "data",
            Self::Heartbeat => "heartbeat",
            Self::Close => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frames() {
        assert_eq!(Frame::Open.encode(), "event: open\ndata: connected\n\n");
        assert_eq!(Frame::Heartbeat.encode(), ": heartbeat\n\n");
        assert_eq!(Frame::Close.encode(), "event: close\ndata: stream-ended\n\n");
    }

    #[test]
    fn test_data_frame() {
        let payload = r#"{"type":"token","threadId":"t1","content":"Hi","ts":1}"#;
        assert_eq!(
            Frame::Data(payload.to_string()).encode(),
            format!("data: {payload}\n\n")
        );
    }

    #[test]
    fn test_multiline_payload_gets_one_field_per_line() {
        let frame = Frame::Data("{\n  \"a\": 1\r\n}".to_string());
        assert_eq!(frame.encode(), "data: {\ndata:   \"a\": 1\ndata: }\n\n");
    }

    #[test]
    fn test_lone_carriage_return_starts_a_new_field() {
        let frame = Frame::Data("{\"type\":\"token\",\r\"threadId\":\"t1\"}".to_string());
        assert_eq!(
            frame.encode(),
            "data: {\"type\":\"token\",\ndata: \"threadId\":\"t1\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_encoded_frames_parse_as_text_events() {
        use eventsource_stream::Eventsource;
        use futures::StreamExt;

        let payload = "{\"type\":\"token\",\r\"threadId\":\"t1\",\r\n\"content\":\"Hi\",\n\"ts\":1}";
        let wire = [Frame::Open, Frame::Data(payload.to_string()), Frame::Heartbeat, Frame::Close]
            .iter()
            .map(|frame| Ok::<_, std::convert::Infallible>(frame.encode()))
            .collect::<Vec<_>>();

        let events: Vec<_> = futures::stream::iter(wire)
            .eventsource()
            .map(|event| event.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "open");
        assert_eq!(events[1].event, "message");
        let envelope = livetail_core::Envelope::decode(&events[1].data).unwrap();
        assert_eq!(envelope, livetail_core::Envelope::decode(payload).unwrap());
        assert_eq!(events[2].event, "close");
        assert_eq!(events[2].data, "stream-ended");
    }
}
