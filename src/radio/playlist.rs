//! Playlist resolution: station source URL to playable stream URL.
//!
//! Stations publish an M3U-style redirect (one URL per line) pointing at a
//! PLS playlist whose `FileN=` entries carry the actual stream URLs. Both
//! hops are validated by content type and bounded by a fixed timeout so a
//! hung playlist server cannot stall a join indefinitely.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::error::StationError;

/// Per-fetch budget for playlist hops. The audio stream itself has no
/// read timeout; only resolution is bounded.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const MIME_M3U: &str = "audio/x-mpegurl";
const MIME_PLS: &str = "audio/x-scpls";

static PLS_FILE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^File\d+=(.+)$").expect("valid regex"));

/// Resolves a station source URL through the redirect and playlist hops,
/// returning the first playable stream URL.
pub async fn resolve(http: &reqwest::Client, source_url: &str) -> Result<String, StationError> {
    let redirect = fetch_text(http, source_url, MIME_M3U).await?;
    let next_hop = first_entry(&redirect)
        .ok_or_else(|| StationError::resolution("empty redirect body"))?;

    let playlist = fetch_text(http, next_hop, MIME_PLS).await?;
    let stream_url = pls_stream_url(&playlist)
        .ok_or_else(|| StationError::resolution("No entries in playlist"))?;

    Ok(stream_url.to_owned())
}

/// Fetches `url` as text, requiring HTTP 200 and a content type matching
/// `expected`, within [`FETCH_TIMEOUT`].
async fn fetch_text(
    http: &reqwest::Client,
    url: &str,
    expected: &str,
) -> Result<String, StationError> {
    let fetch = async {
        let response = http.get(url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(StationError::resolution(format!(
                "request failed (status code: {})",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type_matches(&content_type, expected) {
            return Err(StationError::resolution(format!(
                "invalid content type: expected '{expected}', got '{content_type}'"
            )));
        }

        Ok(response.text().await?)
    };

    tokio::time::timeout(FETCH_TIMEOUT, fetch)
        .await
        .map_err(|_| StationError::Timeout(FETCH_TIMEOUT))?
}

fn content_type_matches(actual: &str, expected: &str) -> bool {
    actual
        .trim_start()
        .to_ascii_lowercase()
        .starts_with(expected)
}

/// First non-empty line of an M3U-style redirect body.
fn first_entry(body: &str) -> Option<&str> {
    body.lines().map(str::trim).find(|line| !line.is_empty())
}

/// First `FileN=` entry of a PLS playlist body.
fn pls_stream_url(body: &str) -> Option<&str> {
    PLS_FILE_ENTRY
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|entry| entry.as_str().trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves one canned HTTP response on a fresh local port and returns
    /// the URL to request it at.
    async fn serve_once(status: &str, content_type: &str, body: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn resolves_redirect_then_pls_entry() {
        let pls_url = serve_once(
            "200 OK",
            "audio/x-scpls",
            "[playlist]\nNumberOfEntries=1\nFile1=http://stream.example/audio.mp3\nTitle1=Test\n",
        )
        .await;
        let redirect_url = serve_once("200 OK", "audio/x-mpegurl", &format!("{pls_url}\n")).await;

        let resolved = resolve(&reqwest::Client::new(), &redirect_url)
            .await
            .expect("resolution succeeds");
        assert_eq!(resolved, "http://stream.example/audio.mp3");
    }

    #[tokio::test]
    async fn playlist_without_file_entries_fails() {
        let pls_url = serve_once("200 OK", "audio/x-scpls", "[playlist]\nNumberOfEntries=0\n").await;
        let redirect_url = serve_once("200 OK", "audio/x-mpegurl", &format!("{pls_url}\n")).await;

        let err = resolve(&reqwest::Client::new(), &redirect_url)
            .await
            .expect_err("no entries");
        assert!(matches!(err, StationError::Resolution(ref msg) if msg == "No entries in playlist"));
    }

    #[tokio::test]
    async fn wrong_redirect_content_type_fails_before_second_hop() {
        let redirect_url = serve_once("200 OK", "text/html", "<html></html>").await;

        let err = resolve(&reqwest::Client::new(), &redirect_url)
            .await
            .expect_err("content type mismatch");
        assert!(
            matches!(err, StationError::Resolution(ref msg) if msg.contains("audio/x-mpegurl")),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn non_200_status_fails() {
        let redirect_url = serve_once("503 Service Unavailable", "audio/x-mpegurl", "").await;

        let err = resolve(&reqwest::Client::new(), &redirect_url)
            .await
            .expect_err("bad status");
        assert!(matches!(err, StationError::Resolution(ref msg) if msg.contains("503")));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        // Accept the connection and hold it open without ever responding;
        // paused time auto-advances to the fetch deadline.
        tokio::spawn(async move {
            let _socket = listener.accept().await;
            std::future::pending::<()>().await
        });

        let err = resolve(&reqwest::Client::new(), &format!("http://{addr}/"))
            .await
            .expect_err("hung server");
        assert!(
            matches!(err, StationError::Timeout(budget) if budget == FETCH_TIMEOUT),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn content_type_match_ignores_parameters_and_case() {
        assert!(content_type_matches("audio/x-mpegurl", "audio/x-mpegurl"));
        assert!(content_type_matches(
            "Audio/X-MPEGURL; charset=utf-8",
            "audio/x-mpegurl"
        ));
        assert!(!content_type_matches("text/html", "audio/x-mpegurl"));
        assert!(!content_type_matches("", "audio/x-mpegurl"));
    }

    #[test]
    fn first_entry_skips_blank_lines() {
        assert_eq!(
            first_entry("\n  \nhttp://a.example/pls\nhttp://b.example/pls\n"),
            Some("http://a.example/pls")
        );
        assert_eq!(first_entry("\n \n"), None);
    }

    #[test]
    fn pls_entry_takes_first_match() {
        let body = "[playlist]\nFile1=http://one.example/a.mp3\nFile2=http://two.example/b.mp3\n";
        assert_eq!(pls_stream_url(body), Some("http://one.example/a.mp3"));
        assert_eq!(pls_stream_url("Title1=no files here\n"), None);
    }

    #[test]
    fn pls_entry_requires_digit_suffix() {
        assert_eq!(pls_stream_url("File=http://no.example/a.mp3\n"), None);
        assert_eq!(
            pls_stream_url("File10=http://ten.example/a.mp3\n"),
            Some("http://ten.example/a.mp3")
        );
    }
}
