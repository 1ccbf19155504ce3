//! ICY stream client.
//!
//! Shoutcast-style servers interleave the audio byte stream with in-band
//! metadata: every `icy-metaint` audio bytes comes one length byte (x16)
//! followed by that many metadata bytes. This client strips the framing,
//! hands the voice driver a clean audio stream, and surfaces decoded
//! titles as events. The stream itself carries no read timeout; a silent
//! but open connection persists until the handle terminates it.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::LazyLock;

use bytes::Bytes;
use futures::StreamExt;
use regex::Regex;
use symphonia::core::io::MediaSource;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::StationError;

const AUDIO_CHANNEL_BOUND: usize = 32;

static STREAM_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"StreamTitle='(.*?)';").expect("valid regex"));

/// Snapshot of the `icy-*` response headers captured at connect time.
#[derive(Debug, Clone, Default)]
pub struct IcyHeaders {
    /// Audio bytes between two metadata blocks; 0 when the server sends
    /// no in-band metadata.
    pub metaint: usize,
    /// Station name, the display fallback before any title arrives.
    pub name: Option<String>,
    /// Advertised genre.
    pub genre: Option<String>,
}

/// One decoded in-band metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcyMetadata {
    pub title: Option<String>,
}

/// A live ICY connection: header snapshot, clean audio, title events, and
/// the handle that tears the transport down.
pub struct IcyConnection {
    pub headers: IcyHeaders,
    pub audio: IcyAudio,
    pub metadata: mpsc::UnboundedReceiver<IcyMetadata>,
    pub handle: StreamHandle,
}

/// Forcibly terminates the underlying transport when asked. Aborting the
/// demux task drops the HTTP response and closes its socket.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    abort: AbortHandle,
}

impl StreamHandle {
    pub(crate) fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    pub fn shutdown(&self) {
        self.abort.abort();
    }
}

/// Opens a streaming connection to a resolved stream URL.
pub async fn connect(
    http: &reqwest::Client,
    stream_url: &str,
) -> Result<IcyConnection, StationError> {
    let response = http
        .get(stream_url)
        .header("Icy-MetaData", "1")
        .send()
        .await?
        .error_for_status()?;

    let headers = parse_icy_headers(response.headers());
    debug!("🎧 Connected to {stream_url}: {headers:?}");

    let (audio_tx, audio_rx) = flume::bounded::<Bytes>(AUDIO_CHANNEL_BOUND);
    let (metadata_tx, metadata_rx) = mpsc::unbounded_channel();

    let metaint = headers.metaint;
    let demux = tokio::spawn(demux_stream(response, metaint, audio_tx, metadata_tx));

    Ok(IcyConnection {
        headers,
        audio: IcyAudio::new(audio_rx),
        metadata: metadata_rx,
        handle: StreamHandle::new(demux.abort_handle()),
    })
}

/// Splits the response body into audio chunks and metadata events until
/// the remote closes, the consumer goes away, or the task is aborted.
async fn demux_stream(
    response: reqwest::Response,
    metaint: usize,
    audio_tx: flume::Sender<Bytes>,
    metadata_tx: mpsc::UnboundedSender<IcyMetadata>,
) {
    let mut body = response.bytes_stream();
    let mut demuxer = IcyDemuxer::new(metaint);

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("🎧 Stream read failed: {e}");
                break;
            }
        };

        let frame = demuxer.feed(&chunk);
        if !frame.audio.is_empty() && audio_tx.send_async(Bytes::from(frame.audio)).await.is_err() {
            break; // consumer dropped the audio stream
        }
        for block in frame.metadata {
            let metadata = parse_metadata(&block);
            debug!("🎶 Metadata: {metadata:?}");
            if metadata_tx.send(metadata).is_err() {
                break;
            }
        }
    }
}

fn parse_icy_headers(headers: &reqwest::header::HeaderMap) -> IcyHeaders {
    let text = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    IcyHeaders {
        metaint: headers
            .get("icy-metaint")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0),
        name: text("icy-name"),
        genre: text("icy-genre"),
    }
}

/// Decodes one metadata block. Blocks look like
/// `StreamTitle='Song A - Artist B';StreamUrl='';` padded with NULs.
fn parse_metadata(block: &[u8]) -> IcyMetadata {
    let text = String::from_utf8_lossy(block);
    let title = STREAM_TITLE
        .captures(text.trim_end_matches('\0'))
        .and_then(|captures| captures.get(1))
        .map(|title| title.as_str().to_owned());

    IcyMetadata { title }
}

/// Incremental splitter for the ICY framing. Chunk boundaries may fall
/// anywhere, including inside a metadata block.
struct IcyDemuxer {
    metaint: usize,
    state: DemuxState,
}

enum DemuxState {
    /// Passing audio through until the next length byte.
    Audio { until_meta: usize },
    /// The next byte is a metadata length (x16).
    Length,
    /// Collecting a metadata block.
    Metadata { remaining: usize, block: Vec<u8> },
}

/// Demuxed output for one input chunk.
#[derive(Default)]
struct DemuxFrame {
    audio: Vec<u8>,
    metadata: Vec<Vec<u8>>,
}

impl IcyDemuxer {
    fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: DemuxState::Audio {
                until_meta: metaint,
            },
        }
    }

    fn feed(&mut self, mut input: &[u8]) -> DemuxFrame {
        let mut frame = DemuxFrame {
            audio: Vec::with_capacity(input.len()),
            ..DemuxFrame::default()
        };

        while !input.is_empty() {
            match &mut self.state {
                DemuxState::Audio { until_meta } => {
                    if self.metaint == 0 {
                        // No metadata negotiated: everything is audio.
                        frame.audio.extend_from_slice(input);
                        break;
                    }
                    let take = (*until_meta).min(input.len());
                    frame.audio.extend_from_slice(&input[..take]);
                    *until_meta -= take;
                    input = &input[take..];
                    if *until_meta == 0 {
                        self.state = DemuxState::Length;
                    }
                }
                DemuxState::Length => {
                    let length = input[0] as usize * 16;
                    input = &input[1..];
                    self.state = if length == 0 {
                        DemuxState::Audio {
                            until_meta: self.metaint,
                        }
                    } else {
                        DemuxState::Metadata {
                            remaining: length,
                            block: Vec::with_capacity(length),
                        }
                    };
                }
                DemuxState::Metadata { remaining, block } => {
                    let take = (*remaining).min(input.len());
                    block.extend_from_slice(&input[..take]);
                    *remaining -= take;
                    input = &input[take..];
                    if *remaining == 0 {
                        frame.metadata.push(std::mem::take(block));
                        self.state = DemuxState::Audio {
                            until_meta: self.metaint,
                        };
                    }
                }
            }
        }

        frame
    }
}

/// Blocking reader over the demuxed audio bytes, consumed by the voice
/// driver on its own decode thread.
pub struct IcyAudio {
    receiver: flume::Receiver<Bytes>,
    current: Bytes,
    position: usize,
}

impl IcyAudio {
    pub(crate) fn new(receiver: flume::Receiver<Bytes>) -> Self {
        Self {
            receiver,
            current: Bytes::new(),
            position: 0,
        }
    }
}

impl Read for IcyAudio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.position >= self.current.len() {
            match self.receiver.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.position = 0;
                }
                // Sender gone: transport closed or cancelled. End of stream.
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.position);
        buf[..n].copy_from_slice(&self.current[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl Seek for IcyAudio {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live stream is not seekable",
        ))
    }
}

impl MediaSource for IcyAudio {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metadata_block(text: &str) -> Vec<u8> {
        // Length byte counts 16-byte units; pad the block with NULs.
        let padded_len = text.len().div_ceil(16) * 16;
        let mut block = Vec::with_capacity(1 + padded_len);
        block.push((padded_len / 16) as u8);
        block.extend_from_slice(text.as_bytes());
        block.resize(1 + padded_len, 0);
        block
    }

    #[test]
    fn demux_strips_metadata_and_emits_title() {
        let metaint = 8;
        let mut wire = Vec::new();
        wire.extend_from_slice(&[1u8; 8]);
        let block = metadata_block("StreamTitle='Song A - Artist B';");
        wire.extend_from_slice(&block);
        wire.extend_from_slice(&[2u8; 8]);

        let mut demuxer = IcyDemuxer::new(metaint);
        let frame = demuxer.feed(&wire);

        // Audio length equals total bytes minus the framing bytes.
        assert_eq!(frame.audio.len(), wire.len() - block.len());
        assert_eq!(&frame.audio[..8], &[1u8; 8]);
        assert_eq!(&frame.audio[8..], &[2u8; 8]);

        assert_eq!(frame.metadata.len(), 1);
        let metadata = parse_metadata(&frame.metadata[0]);
        assert_eq!(metadata.title.as_deref(), Some("Song A - Artist B"));
    }

    #[test]
    fn demux_handles_chunk_boundaries_inside_framing() {
        let metaint = 4;
        let mut wire = Vec::new();
        wire.extend_from_slice(&[9u8; 4]);
        wire.extend_from_slice(&metadata_block("StreamTitle='X';"));
        wire.extend_from_slice(&[7u8; 4]);

        // Feed one byte at a time.
        let mut demuxer = IcyDemuxer::new(metaint);
        let mut audio = Vec::new();
        let mut blocks = Vec::new();
        for byte in &wire {
            let frame = demuxer.feed(std::slice::from_ref(byte));
            audio.extend(frame.audio);
            blocks.extend(frame.metadata);
        }

        assert_eq!(audio, vec![9, 9, 9, 9, 7, 7, 7, 7]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(parse_metadata(&blocks[0]).title.as_deref(), Some("X"));
    }

    #[test]
    fn demux_zero_length_block_is_skipped() {
        let metaint = 2;
        let wire = [5u8, 5, 0, 6, 6]; // audio, zero-length marker, audio

        let mut demuxer = IcyDemuxer::new(metaint);
        let frame = demuxer.feed(&wire);

        assert_eq!(frame.audio, vec![5, 5, 6, 6]);
        assert!(frame.metadata.is_empty());
    }

    #[test]
    fn demux_without_metaint_passes_everything_through() {
        let mut demuxer = IcyDemuxer::new(0);
        let frame = demuxer.feed(&[1, 2, 3, 0, 4]);
        assert_eq!(frame.audio, vec![1, 2, 3, 0, 4]);
        assert!(frame.metadata.is_empty());
    }

    #[test]
    fn parse_metadata_ignores_other_keys() {
        let block = b"StreamTitle='A';StreamUrl='http://x.example/';\0\0";
        assert_eq!(parse_metadata(block).title.as_deref(), Some("A"));

        let block = b"StreamUrl='http://x.example/';\0";
        assert_eq!(parse_metadata(block).title, None);
    }

    #[test]
    fn parse_metadata_empty_title() {
        let block = b"StreamTitle='';\0";
        assert_eq!(parse_metadata(block).title.as_deref(), Some(""));
    }

    #[test]
    fn icy_headers_parse_with_fallbacks() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("icy-metaint", "16000".parse().unwrap());
        headers.insert("icy-name", "Test FM".parse().unwrap());
        headers.insert("icy-genre", "Jazz".parse().unwrap());

        let parsed = parse_icy_headers(&headers);
        assert_eq!(parsed.metaint, 16000);
        assert_eq!(parsed.name.as_deref(), Some("Test FM"));
        assert_eq!(parsed.genre.as_deref(), Some("Jazz"));

        let parsed = parse_icy_headers(&reqwest::header::HeaderMap::new());
        assert_eq!(parsed.metaint, 0);
        assert_eq!(parsed.name, None);
    }

    #[test]
    fn audio_reader_serves_chunks_then_eof() {
        let (tx, rx) = flume::bounded(4);
        let mut audio = IcyAudio::new(rx);

        tx.send(Bytes::from_static(&[1, 2, 3])).unwrap();
        tx.send(Bytes::from_static(&[4, 5])).unwrap();
        drop(tx);

        let mut buf = [0u8; 2];
        assert_eq!(audio.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(audio.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
        assert_eq!(audio.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [4, 5]);

        // Sender dropped: clean end of stream.
        assert_eq!(audio.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn audio_reader_is_not_seekable() {
        let (_tx, rx) = flume::bounded::<Bytes>(1);
        let mut audio = IcyAudio::new(rx);
        assert!(!audio.is_seekable());
        assert_eq!(audio.byte_len(), None);
        assert!(audio.seek(SeekFrom::Start(0)).is_err());
    }

    #[tokio::test]
    async fn stream_handle_aborts_demux_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = StreamHandle::new(task.abort_handle());
        handle.shutdown();
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
