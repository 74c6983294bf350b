// Server-Sent-Events fallback transport.
//
// One-way event stream for receives, paired with HTTP POSTs for sends.
// Used where the WebSocket path is blocked (restrictive proxies); frame
// payloads are identical to the WebSocket transport.

use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use futures_util::{Stream, StreamExt};
use tracing::warn;

use huddle_common::protocol::ws::WsMessage;

use super::Transport;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// SSE transport: `open` attaches to a `text/event-stream` endpoint,
/// `send` POSTs frames to the paired events endpoint.
pub struct SseTransport {
    client: reqwest::Client,
    send_url: String,
    stream: Option<ByteStream>,
    buf: String,
}

impl SseTransport {
    /// `send_url` is where client -> server frames are POSTed.
    pub fn new(send_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            send_url: send_url.into(),
            stream: None,
            buf: String::new(),
        }
    }
}

impl Transport for SseTransport {
    async fn open(&mut self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .header("accept", "text/event-stream")
            .send()
            .await
            .with_context(|| format!("sse connect to {url}"))?
            .error_for_status()
            .context("sse stream rejected")?;
        self.stream = Some(Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec()))));
        self.buf.clear();
        Ok(())
    }

    async fn send(&mut self, msg: &WsMessage) -> Result<()> {
        self.client
            .post(&self.send_url)
            .json(msg)
            .send()
            .await
            .context("sse send")?
            .error_for_status()
            .context("sse send rejected")?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<WsMessage>> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("transport not open"))?;
        loop {
            while let Some(data) = take_event(&mut self.buf) {
                match serde_json::from_str(&data) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        warn!(error = %e, "skipping malformed sse event");
                    }
                }
            }
            match stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(anyhow!(e)).context("sse receive"),
                Some(Ok(chunk)) => {
                    self.buf.push_str(&String::from_utf8_lossy(&chunk));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.buf.clear();
    }
}

/// Pop the next complete SSE event from the buffer, returning the joined
/// `data:` payload. Comment and field lines other than `data` are dropped.
fn take_event(buf: &mut String) -> Option<String> {
    loop {
        let (end, sep_len) = find_event_boundary(buf)?;
        let raw: String = buf.drain(..end + sep_len).collect();
        let data: Vec<&str> = raw
            .lines()
            .filter_map(|line| {
                let line = line.strip_suffix('\r').unwrap_or(line);
                line.strip_prefix("data:").map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            })
            .collect();
        if !data.is_empty() {
            return Some(data.join("\n"));
        }
        // Heartbeat comment or retry hint; keep scanning.
    }
}

/// Locate the blank line that terminates an event, for both LF and CRLF
/// framing. Returns (offset, separator length).
fn find_event_boundary(buf: &str) -> Option<(usize, usize)> {
    let lf = buf.find("\n\n").map(|i| (i, 2));
    let crlf = buf.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::take_event;

    #[test]
    fn take_event_extracts_single_data_line() {
        let mut buf = "data: {\"a\":1}\n\nrest".to_string();
        assert_eq!(take_event(&mut buf).as_deref(), Some("{\"a\":1}"));
        assert_eq!(buf, "rest");
    }

    #[test]
    fn take_event_joins_multi_line_data() {
        let mut buf = "data: line1\ndata: line2\n\n".to_string();
        assert_eq!(take_event(&mut buf).as_deref(), Some("line1\nline2"));
    }

    #[test]
    fn take_event_skips_comment_events() {
        let mut buf = ": keep-alive\n\ndata: x\n\n".to_string();
        assert_eq!(take_event(&mut buf).as_deref(), Some("x"));
    }

    #[test]
    fn take_event_waits_for_complete_event() {
        let mut buf = "data: partial".to_string();
        assert_eq!(take_event(&mut buf), None);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn take_event_handles_crlf_framing() {
        let mut buf = "data: x\r\n\r\ndata: y\n\n".to_string();
        assert_eq!(take_event(&mut buf).as_deref(), Some("x"));
        assert_eq!(take_event(&mut buf).as_deref(), Some("y"));
    }
}
