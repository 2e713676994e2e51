use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::models::TransferProgress;
use crate::state::{Shared, SharedState};

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server answered with status {0}")]
    HttpStatus(u16),
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("destination {0:?} is outside the download root")]
    InvalidDestination(PathBuf),
    #[error("download cancelled")]
    Cancelled,
    #[error("failed to install downloaded file: {0}")]
    Install(std::io::Error),
}

/// Where an executor reports how far a transfer got.
///
/// Each update takes the manager's state lock briefly. Positions never move
/// backwards and the size is fixed once reported.
pub struct ProgressSink {
    shared: Shared,
}

impl ProgressSink {
    pub(crate) fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// A sink not attached to any manager, for driving an executor directly.
    pub fn standalone() -> Self {
        let mut state = SharedState::default();
        state.progress = TransferProgress::STARTED;
        Self::new(Arc::new(Mutex::new(state)))
    }

    pub fn set_size(&self, size: u64) {
        let mut state = self.shared.lock();
        if state.progress.size.is_none() {
            state.progress.size = Some(size);
        }
    }

    pub fn set_position(&self, position: u64) {
        let mut state = self.shared.lock();
        let current = state.progress.position.unwrap_or(0);
        state.progress.position = Some(current.max(position));
    }

    pub fn current(&self) -> TransferProgress {
        self.shared.lock().progress
    }
}

/// Performs one transfer of `source` into `temp_path`.
///
/// Implementations must watch `cancel` and return
/// [`DownloadError::Cancelled`] promptly once it fires. On any error the
/// temporary file may hold partial data; the caller removes it.
#[async_trait]
pub trait TransferExecutor: Send + Sync + 'static {
    async fn download(
        &self,
        source: &str,
        temp_path: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError>;
}

/// Streams a URL to disk with reqwest.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new(config: &HttpConfig) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl TransferExecutor for HttpExecutor {
    async fn download(
        &self,
        source: &str,
        temp_path: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let url = reqwest::Url::parse(source)
            .map_err(|_| DownloadError::InvalidSource(source.to_string()))?;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url).send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }
        if let Some(size) = response.content_length() {
            progress.set_size(size);
        }

        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(temp_path).await?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let bytes = chunk?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            progress.set_position(written);
        }

        file.flush().await?;
        file.sync_all().await?;
        tracing::debug!(source, bytes = written, "transfer finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor() -> HttpExecutor {
        HttpExecutor::new(&HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_sink_position_never_goes_back() {
        let sink = ProgressSink::standalone();
        sink.set_size(100);
        sink.set_position(40);
        sink.set_position(10);
        sink.set_size(999);
        assert_eq!(
            sink.current(),
            TransferProgress {
                size: Some(100),
                position: Some(40)
            }
        );
    }

    #[tokio::test]
    async fn test_http_download_writes_body_and_reports_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/maps/alps.xcm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("sub/alps.xcm.odm-part");
        let sink = ProgressSink::standalone();
        let url = format!("{}/maps/alps.xcm", server.uri());

        executor()
            .download(&url, &temp, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&temp).unwrap(), body);
        let progress = sink.current();
        assert_eq!(progress.size, Some(body.len() as u64));
        assert_eq!(progress.position, Some(body.len() as u64));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = executor()
            .download(
                &format!("{}/missing", server.uri()),
                &dir.path().join("missing.odm-part"),
                &ProgressSink::standalone(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DownloadError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_invalid_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = executor()
            .download(
                "not a url",
                &dir.path().join("x.odm-part"),
                &ProgressSink::standalone(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DownloadError::InvalidSource(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 16])
                    .set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = executor()
            .download(
                &format!("{}/slow", server.uri()),
                &dir.path().join("slow.odm-part"),
                &ProgressSink::standalone(),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
