//! HTTP download functionality
//!
//! Downloads large files as concurrent byte-range segments. Each segment is
//! written to its own `.part<N>` file next to the destination, and an
//! existing part's length is where that segment resumes, so an interrupted
//! download never re-transfers completed bytes. Once every segment is
//! complete the parts are concatenated and moved into place in one rename.
//!
//! Servers that ignore range requests get a single whole-file transfer that
//! restarts from zero on retry.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::defaults;
use crate::error::DownloadError;

/// Progress callback type for download progress reporting
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

type ProgressFn<'a> = Option<&'a (dyn Fn(u64, u64) + Send + Sync)>;

/// Download result containing file path and metadata
#[derive(Debug)]
pub struct DownloadResult {
    /// Path to the downloaded file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// SHA256 checksum of the downloaded content
    pub checksum: String,
    /// Bytes already present from an earlier, interrupted attempt
    pub resumed_bytes: u64,
}

/// Inclusive byte range fetched as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Position of the segment, also its part file suffix
    pub index: usize,
    /// First byte
    pub start: u64,
    /// Last byte (inclusive)
    pub end: u64,
}

impl Segment {
    fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split `total` bytes into at most `count` contiguous segments
pub fn plan_segments(total: u64, count: usize) -> Vec<Segment> {
    if total == 0 {
        return Vec::new();
    }

    let count = (count.max(1) as u64).min(total);
    let base = total / count;
    let remainder = total % count;

    let mut start = 0;
    (0..count)
        .map(|i| {
            let len = base + u64::from(i < remainder);
            let segment = Segment {
                index: i as usize,
                start,
                end: start + len - 1,
            };
            start += len;
            segment
        })
        .collect()
}

/// Total length from a `Content-Range: bytes a-b/total` header value
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value
        .strip_prefix("bytes ")?
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}

/// Path of the part file holding segment `index` of `dest`
pub fn part_path(dest: &Path, index: usize) -> PathBuf {
    with_suffix(dest, &format!(".part{index}"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(path: &Path, e: &std::io::Error) -> DownloadError {
    DownloadError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    }
}

fn network_error(url: &str, error: impl ToString) -> DownloadError {
    DownloadError::NetworkError {
        url: url.to_string(),
        error: error.to_string(),
    }
}

/// Client errors are final; anything else may clear up on retry
fn status_error(url: &str, status: StatusCode) -> DownloadError {
    if status.is_client_error() {
        DownloadError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        network_error(url, format!("HTTP {status}"))
    }
}

/// What the server told us about the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteSize {
    /// Range requests honored; total size known
    Ranged(u64),
    /// Whole-file transfer only
    Whole(Option<u64>),
}

/// Shared progress counter for one download
struct Progress<'a> {
    downloaded: AtomicU64,
    total: u64,
    callback: ProgressFn<'a>,
}

impl Progress<'_> {
    fn add(&self, bytes: u64) {
        let now = self.downloaded.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(cb) = self.callback {
            cb(now, self.total);
        }
    }

    fn reset(&self) {
        self.downloaded.store(0, Ordering::SeqCst);
    }
}

/// Download manager for fetching files with retry and segmented transfer
#[derive(Debug, Clone)]
pub struct DownloadManager {
    /// HTTP client
    client: reqwest::Client,
    /// Maximum attempts per request
    max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds)
    base_delay_ms: u64,
    /// Number of concurrent segments
    segments: usize,
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new() -> Self {
        Self::with_config(
            defaults::MAX_DOWNLOAD_RETRIES,
            defaults::DOWNLOAD_BACKOFF_BASE_MS,
        )
    }

    /// Create a download manager with custom retry settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(defaults::DOWNLOAD_TIMEOUT_SECS))
                .connect_timeout(Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            max_retries: max_retries.max(1),
            base_delay_ms,
            segments: defaults::DOWNLOAD_SEGMENTS,
        }
    }

    /// Use `segments` concurrent segments
    #[must_use]
    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = segments.max(1);
        self
    }

    /// Download `url` to `dest`, resuming any segments left by earlier runs
    ///
    /// # Arguments
    /// * `url` - URL to download from
    /// * `dest` - Destination path
    /// * `progress` - Optional progress callback (`bytes_downloaded`, `total_bytes`)
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadResult, DownloadError> {
        if dest.exists() {
            let size = tokio::fs::metadata(dest)
                .await
                .map_err(|e| io_error(dest, &e))?
                .len();
            return Ok(DownloadResult {
                path: dest.to_path_buf(),
                size,
                checksum: file_checksum(dest).await?,
                resumed_bytes: size,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }

        let remote = self.retry(url, || self.remote_size(url)).await?;
        tracing::debug!("Remote size for {url}: {remote:?}");

        match remote {
            RemoteSize::Ranged(total) => {
                self.download_ranged(url, dest, total, progress.as_deref())
                    .await
            }
            RemoteSize::Whole(total) => {
                self.download_whole(url, dest, total, progress.as_deref())
                    .await
            }
        }
    }

    async fn download_ranged(
        &self,
        url: &str,
        dest: &Path,
        total: u64,
        callback: ProgressFn<'_>,
    ) -> Result<DownloadResult, DownloadError> {
        let segments = plan_segments(total, self.segments);

        let mut resumed_bytes = 0;
        for segment in &segments {
            if let Ok(meta) = tokio::fs::metadata(part_path(dest, segment.index)).await {
                resumed_bytes += meta.len().min(segment.len());
            }
        }
        if resumed_bytes > 0 {
            tracing::info!("Resuming {url}: {resumed_bytes} of {total} bytes present");
        }

        let progress = Progress {
            downloaded: AtomicU64::new(resumed_bytes),
            total,
            callback,
        };

        let results = futures::future::join_all(
            segments
                .iter()
                .map(|segment| self.fetch_segment(url, dest, segment, &progress)),
        )
        .await;

        // Completed parts stay on disk for the next attempt
        for result in results {
            result?;
        }

        let parts: Vec<PathBuf> = segments.iter().map(|s| part_path(dest, s.index)).collect();
        let (size, checksum) = assemble(dest, &parts, Some(total)).await?;

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            size,
            checksum,
            resumed_bytes,
        })
    }

    async fn download_whole(
        &self,
        url: &str,
        dest: &Path,
        total: Option<u64>,
        callback: ProgressFn<'_>,
    ) -> Result<DownloadResult, DownloadError> {
        tracing::debug!("{url} does not support range requests; downloading in one piece");

        let part = part_path(dest, 0);
        let progress = Progress {
            downloaded: AtomicU64::new(0),
            total: total.unwrap_or(0),
            callback,
        };

        self.retry(url, || self.fetch_whole_once(url, &part, &progress))
            .await?;

        let (size, checksum) = assemble(dest, &[part], total).await?;

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            size,
            checksum,
            resumed_bytes: 0,
        })
    }

    /// Run `op` with bounded retries and exponential backoff
    async fn retry<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.base_delay_ms))
            .with_max_interval(Duration::from_millis(defaults::DOWNLOAD_BACKOFF_MAX_MS))
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let max_retries = self.max_retries;

        backoff::future::retry(policy, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if !is_transient(&e) {
                        backoff::Error::permanent(e)
                    } else if attempt >= max_retries {
                        backoff::Error::permanent(DownloadError::MaxRetriesExceeded {
                            url: url.to_string(),
                            retries: attempt,
                            error: e.to_string(),
                        })
                    } else {
                        tracing::warn!("Attempt {attempt}/{max_retries} failed: {e}");
                        backoff::Error::transient(e)
                    }
                })
            }
        })
        .await
    }

    /// Discover the size and range support with a one-byte range request
    async fn remote_size(&self, url: &str) -> Result<RemoteSize, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
                .map(RemoteSize::Ranged)
                .ok_or_else(|| DownloadError::RangeError {
                    url: url.to_string(),
                    error: "missing or invalid Content-Range".to_string(),
                }),
            status if status.is_success() => Ok(RemoteSize::Whole(response.content_length())),
            status => Err(status_error(url, status)),
        }
    }

    async fn fetch_segment(
        &self,
        url: &str,
        dest: &Path,
        segment: &Segment,
        progress: &Progress<'_>,
    ) -> Result<(), DownloadError> {
        let part = part_path(dest, segment.index);
        self.retry(url, || self.fetch_segment_once(url, &part, segment, progress))
            .await
    }

    async fn fetch_segment_once(
        &self,
        url: &str,
        part: &Path,
        segment: &Segment,
        progress: &Progress<'_>,
    ) -> Result<(), DownloadError> {
        let expected = segment.len();
        let mut have = match tokio::fs::metadata(part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if have == expected {
            return Ok(());
        }
        if have > expected {
            tracing::debug!("Discarding oversized part {}", part.display());
            tokio::fs::remove_file(part)
                .await
                .map_err(|e| io_error(part, &e))?;
            have = 0;
        }

        let start = segment.start + have;
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{}", segment.end))
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            status if status.is_success() => {
                return Err(DownloadError::RangeError {
                    url: url.to_string(),
                    error: format!("expected 206 for segment {}, got {status}", segment.index),
                })
            }
            status => return Err(status_error(url, status)),
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(part)
            .await
            .map_err(|e| io_error(part, &e))?;

        let mut written = have;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network_error(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error(part, &e))?;
            written += chunk.len() as u64;
            progress.add(chunk.len() as u64);
        }

        file.flush().await.map_err(|e| io_error(part, &e))?;

        if written == expected {
            Ok(())
        } else {
            Err(network_error(
                url,
                format!(
                    "segment {} ended after {written} of {expected} bytes",
                    segment.index
                ),
            ))
        }
    }

    async fn fetch_whole_once(
        &self,
        url: &str,
        part: &Path,
        progress: &Progress<'_>,
    ) -> Result<(), DownloadError> {
        progress.reset();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        if !response.status().is_success() {
            return Err(status_error(url, response.status()));
        }

        let mut file = File::create(part)
            .await
            .map_err(|e| io_error(part, &e))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network_error(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error(part, &e))?;
            progress.add(chunk.len() as u64);
        }

        file.flush().await.map_err(|e| io_error(part, &e))
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_transient(error: &DownloadError) -> bool {
    matches!(error, DownloadError::NetworkError { .. })
}

/// Concatenate `parts` into `dest`, returning its size and checksum
async fn assemble(
    dest: &Path,
    parts: &[PathBuf],
    expected: Option<u64>,
) -> Result<(u64, String), DownloadError> {
    let assembling = with_suffix(dest, ".assembling");
    let mut out = File::create(&assembling)
        .await
        .map_err(|e| io_error(&assembling, &e))?;

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    let mut buf = vec![0u8; 1 << 20];

    for part in parts {
        let mut input = File::open(part).await.map_err(|e| io_error(part, &e))?;
        loop {
            let n = input.read(&mut buf).await.map_err(|e| io_error(part, &e))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .await
                .map_err(|e| io_error(&assembling, &e))?;
            hasher.update(&buf[..n]);
            size += n as u64;
        }
    }

    out.flush().await.map_err(|e| io_error(&assembling, &e))?;
    drop(out);

    if let Some(expected) = expected {
        if size != expected {
            let _ = tokio::fs::remove_file(&assembling).await;
            return Err(DownloadError::SizeMismatch {
                path: dest.to_path_buf(),
                expected,
                actual: size,
            });
        }
    }

    tokio::fs::rename(&assembling, dest)
        .await
        .map_err(|e| io_error(dest, &e))?;

    for part in parts {
        if let Err(e) = tokio::fs::remove_file(part).await {
            tracing::debug!("Could not remove {}: {e}", part.display());
        }
    }

    Ok((size, hex::encode(hasher.finalize())))
}

/// SHA256 checksum of a file, streamed
pub async fn file_checksum(path: &Path) -> Result<String, DownloadError> {
    let mut file = File::open(path).await.map_err(|e| io_error(path, &e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];

    loop {
        let n = file.read(&mut buf).await.map_err(|e| io_error(path, &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Serves `body`, honoring single `bytes=a-b` range requests
    struct RangeResponder {
        body: Vec<u8>,
    }

    impl Respond for RangeResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let total = self.body.len();
            let range = request
                .headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("bytes="))
                .and_then(|v| v.split_once('-'))
                .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));

            match range {
                Some((start, end)) => {
                    let end = end.min(total - 1);
                    ResponseTemplate::new(206)
                        .insert_header("Content-Range", format!("bytes {start}-{end}/{total}"))
                        .set_body_bytes(self.body[start..=end].to_vec())
                }
                None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
            }
        }
    }

    fn sample_body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn range_server(body: &[u8]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kdk.dmg"))
            .respond_with(RangeResponder {
                body: body.to_vec(),
            })
            .mount(&server)
            .await;
        server
    }

    fn compute_checksum(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    async fn requested_ranges(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| r.headers.get("range"))
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }

    // ============================================
    // Unit Tests - Segment planning
    // ============================================

    #[test]
    fn test_plan_segments_even_split() {
        let segments = plan_segments(100, 4);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], Segment { index: 0, start: 0, end: 24 });
        assert_eq!(segments[3], Segment { index: 3, start: 75, end: 99 });
    }

    #[test]
    fn test_plan_segments_more_segments_than_bytes() {
        let segments = plan_segments(3, 8);
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn test_plan_segments_empty() {
        assert!(plan_segments(0, 4).is_empty());
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("items 0-0/5"), None);
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/cache/kdk.dmg"), 3),
            PathBuf::from("/cache/kdk.dmg.part3")
        );
    }

    #[test]
    fn test_compute_checksum() {
        assert_eq!(
            compute_checksum(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    // ============================================
    // Async Tests - Download functionality
    // ============================================

    #[tokio::test]
    async fn test_segmented_download() {
        let body = sample_body(10_000);
        let server = range_server(&body).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");

        let manager = DownloadManager::with_config(3, 10).with_segments(4);
        let result = manager
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(result.size, 10_000);
        assert_eq!(result.checksum, compute_checksum(&body));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        for i in 0..4 {
            assert!(!part_path(&dest, i).exists());
        }
    }

    #[tokio::test]
    async fn test_resume_skips_completed_bytes() {
        let body = sample_body(65_536);
        let server = range_server(&body).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");

        // Segment 0 interrupted after 5000 bytes, segment 2 fully received
        std::fs::write(part_path(&dest, 0), &body[..5000]).unwrap();
        std::fs::write(part_path(&dest, 2), &body[32_768..49_152]).unwrap();

        let manager = DownloadManager::with_config(3, 10).with_segments(4);
        let result = manager
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(result.resumed_bytes, 5000 + 16_384);
        assert_eq!(std::fs::read(&dest).unwrap(), body);

        let ranges = requested_ranges(&server).await;
        assert!(ranges.contains(&"bytes=5000-16383".to_string()));
        assert!(ranges.contains(&"bytes=16384-32767".to_string()));
        assert!(ranges.contains(&"bytes=49152-65535".to_string()));
        assert!(!ranges.contains(&"bytes=0-16383".to_string()));
        assert!(!ranges.contains(&"bytes=32768-49151".to_string()));
    }

    #[tokio::test]
    async fn test_resumed_download_is_byte_identical() {
        let body = sample_body(40_000);
        let server = range_server(&body).await;
        let temp = TempDir::new().unwrap();
        let url = format!("{}/kdk.dmg", server.uri());
        let manager = DownloadManager::with_config(3, 10).with_segments(5);

        let clean = manager
            .download(&url, &temp.path().join("clean.dmg"), None)
            .await
            .unwrap();

        let resumed_dest = temp.path().join("resumed.dmg");
        std::fs::write(part_path(&resumed_dest, 1), &body[8000..8100]).unwrap();
        std::fs::write(part_path(&resumed_dest, 4), &body[32_000..40_000]).unwrap();
        let resumed = manager.download(&url, &resumed_dest, None).await.unwrap();

        assert_eq!(clean.checksum, resumed.checksum);
        assert_eq!(file_checksum(&resumed_dest).await.unwrap(), clean.checksum);
    }

    #[tokio::test]
    async fn test_download_without_range_support() {
        let server = MockServer::start().await;
        let body = sample_body(2048);
        Mock::given(method("GET"))
            .and(path("/kdk.dmg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");
        let manager = DownloadManager::with_config(3, 10);

        let result = manager
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(result.size, 2048);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_with_progress_callback() {
        let body = sample_body(4096);
        let server = range_server(&body).await;
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");

        let last = std::sync::Arc::new(AtomicU64::new(0));
        let last_clone = last.clone();
        let progress: ProgressCallback = Box::new(move |downloaded, total| {
            assert_eq!(total, 4096);
            last_clone.fetch_max(downloaded, Ordering::SeqCst);
        });

        DownloadManager::with_config(3, 10)
            .with_segments(2)
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, Some(progress))
            .await
            .unwrap();

        assert_eq!(last.load(Ordering::SeqCst), 4096);
    }

    #[tokio::test]
    async fn test_download_retry_on_failure() {
        let server = MockServer::start().await;
        let body = sample_body(1000);

        // First two requests fail, then the range responder takes over
        Mock::given(method("GET"))
            .and(path("/kdk.dmg"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/kdk.dmg"))
            .respond_with(RangeResponder { body: body.clone() })
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");
        let result = DownloadManager::with_config(3, 10)
            .with_segments(2)
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await;

        assert!(result.is_ok(), "download should recover: {result:?}");
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_max_retries_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kdk.dmg"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");
        let result = DownloadManager::with_config(3, 10)
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await;

        match result {
            Err(DownloadError::MaxRetriesExceeded { retries, .. }) => assert_eq!(retries, 3),
            other => panic!("Expected MaxRetriesExceeded, got: {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_existing_destination_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");
        std::fs::write(&dest, b"already here").unwrap();

        let result = DownloadManager::new()
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await
            .unwrap();

        assert_eq!(result.checksum, compute_checksum(b"already here"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kdk.dmg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("kdk.dmg");
        let result = DownloadManager::with_config(5, 10)
            .download(&format!("{}/kdk.dmg", server.uri()), &dest, None)
            .await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus, got: {other:?}"),
        }
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Segments are contiguous, non-empty and cover every byte exactly once
        #[test]
        fn prop_segments_cover_range(total in 1u64..10_000_000, count in 1usize..32) {
            let segments = plan_segments(total, count);

            prop_assert!(!segments.is_empty());
            prop_assert!(segments.len() <= count);
            prop_assert_eq!(segments[0].start, 0);
            prop_assert_eq!(segments.last().unwrap().end, total - 1);
            prop_assert_eq!(segments.iter().map(Segment::len).sum::<u64>(), total);
            for pair in segments.windows(2) {
                prop_assert_eq!(pair[0].end + 1, pair[1].start);
            }
        }
    }
}
