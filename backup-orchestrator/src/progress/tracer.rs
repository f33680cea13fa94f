//! Line-oriented stream of progress updates.

use super::record::TraceState;
use super::ProgressState;
use bytes::BytesMut;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

/// Longest log line kept; longer lines are dropped and tracing resumes at
/// the next newline.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Splits tool output on `\n` without ever failing on content.
///
/// Bytes that are not UTF-8 are replaced, and overlong lines are discarded
/// inside the decoder, so only a failed read can end the frame stream.
#[derive(Debug)]
struct LogLineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl LogLineCodec {
    fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

impl Decoder for LogLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let from = self.next_index.min(buf.len());
            let newline = buf[from..].iter().position(|b| *b == b'\n');
            match newline {
                Some(offset) => {
                    let end = from + offset;
                    let line = buf.split_to(end + 1);
                    self.next_index = 0;

                    if self.discarding || end > self.max_length {
                        self.discarding = false;
                        tracing::debug!("dropping overlong tool output line");
                        continue;
                    }
                    return Ok(Some(decode_line(&line[..end])));
                }
                None if self.discarding || buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    buf.clear();
                    return Ok(None);
                }
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(decode_line(&line)))
    }
}

/// Live stream of [`ProgressState`] updates read from a tool's stdout.
///
/// Unstructured lines are skipped. The stream ends when the reader reaches
/// end-of-stream or fails.
pub struct ProgressTracer<R> {
    lines: FramedRead<R, LogLineCodec>,
    state: TraceState,
    done: bool,
}

impl<R> ProgressTracer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: FramedRead::new(reader, LogLineCodec::new(MAX_LINE_LENGTH)),
            state: TraceState::default(),
            done: false,
        }
    }

    /// Give back the reader, e.g. to keep draining it after the stream ended.
    pub fn into_inner(self) -> R {
        self.lines.into_inner()
    }
}

impl<R> Stream for ProgressTracer<R>
where
    R: AsyncRead + Unpin,
{
    type Item = ProgressState;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    if let Some(update) = this.state.observe(&line) {
                        return Poll::Ready(Some(update));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!("tool output stream failed: {}", e);
                    this.done = true;
                }
                Poll::Ready(None) => {
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStatus;
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let input = concat!(
            r#"{"level":"INFO","message":"backup","step":"Full Backup","progress":"12%"}"#,
            "\n",
            "{\"level\": \"INFO\", this is not json\n",
            r#"{"level":"ERROR","message":"failed to backup","error":"context canceled"}"#,
            "\n",
        );

        let updates: Vec<_> = ProgressTracer::new(input.as_bytes()).collect().await;

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].phase, "Full Backup");
        assert_eq!(updates[0].percent, Some(12.0));
        assert_eq!(updates[0].status, ProgressStatus::Running);
        assert_eq!(
            updates[1].status,
            ProgressStatus::Failed("failed to backup: context canceled".to_string())
        );
    }

    #[tokio::test]
    async fn test_reads_live_duplex_stream() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut tracer = ProgressTracer::new(reader);

        writer
            .write_all(b"{\"level\":\"info\",\"step\":\"Checksum\",\"progress\":50}\n")
            .await
            .unwrap();
        let first = tracer.next().await.unwrap();
        assert_eq!(first.phase, "Checksum");
        assert_eq!(first.percent, Some(50.0));

        writer.write_all(b"plain text\n").await.unwrap();
        writer
            .write_all(b"{\"level\":\"info\",\"step\":\"Checksum\",\"progress\":100}\n")
            .await
            .unwrap();
        assert_eq!(tracer.next().await.unwrap().percent, Some(100.0));

        drop(writer);
        assert!(tracer.next().await.is_none());
        assert!(tracer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let input = r#"{"level":"info","step":"Restore","progress":"99%"}"#;
        let updates: Vec<_> = ProgressTracer::new(input.as_bytes()).collect().await;
        assert_eq!(updates.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_end_stream() {
        let mut input = Vec::new();
        input.extend_from_slice(b"{\"level\":\"info\",\"step\":\"Backup\",\"progress\":10}\n");
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"level\":\"info\",\"step\":\"Backup\",\"progress\":90}\r\n");

        let updates: Vec<_> = ProgressTracer::new(&input[..]).collect().await;

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].percent, Some(90.0));
    }

    #[tokio::test]
    async fn test_overlong_line_is_dropped() {
        let mut input = vec![b'x'; MAX_LINE_LENGTH + 10];
        input.push(b'\n');
        input.extend_from_slice(b"{\"level\":\"info\",\"step\":\"Backup\",\"progress\":40}\n");

        let updates: Vec<_> = ProgressTracer::new(&input[..]).collect().await;

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].percent, Some(40.0));
    }

    #[test]
    fn test_codec_discards_across_reads() {
        let mut codec = LogLineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"abc\nok\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("ok".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
