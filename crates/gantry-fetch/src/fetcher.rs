use std::future::Future;
use std::path::Path;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use gantry_fs::TempPath;
use gantry_progress::{Progress, ProgressChannel};
use gantry_verify::{ContentHash, Hasher, Sha256Hasher};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, Result};
use crate::http::{BoxStream, HttpClient, HttpResponse};
use crate::validation::{is_success, is_textual_content_type};

/// Size of each buffer written to disk and handed to the hasher.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Buffers that may wait for the hasher before the writer is held back.
const HASH_QUEUE_DEPTH: usize = 4;

/// Downloads one resource at a time through an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct Fetcher<C> {
    client:       C,
    idle_timeout: Option<Duration>,
}

impl<C: HttpClient> Fetcher<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            idle_timeout: None,
        }
    }

    /// Fail with [`FetchError::Timeout`] when no body data arrives for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn client(&self) -> &C { &self.client }

    /// Download `url` into `dest`, returning the SHA-256 of the bytes written.
    ///
    /// `progress` receives the download source and a byte count after every
    /// buffer; its total is set only when the response declares a length.
    /// The channel's step is not changed here.
    ///
    /// On any error `dest` does not exist when this returns.
    pub async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        expected: Option<&ContentHash>,
        progress: &ProgressChannel,
        cancel: &CancellationToken,
    ) -> Result<ContentHash> {
        if cancel.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        progress.set_download_source(url.host_str().map(str::to_owned), Some(url.to_string()));

        let response = until_canceled(cancel, self.client.get(url.as_str()))
            .await?
            .map_err(|e| network(url, e))?;
        check_response(url, &response)?;

        let total = response.content_length;
        progress.set_progress(Progress::counting(0, total));
        debug!(%url, dest = %dest.display(), ?total, "download started");

        let guard = TempPath::new(dest);
        let file = File::create(dest).await.map_err(|source| FetchError::Write {
            path: dest.to_path_buf(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(HASH_QUEUE_DEPTH);
        let hasher = spawn_hasher(rx);

        let written = self
            .write_body(url, dest, file, response, tx, progress, cancel)
            .await?;

        let actual = until_canceled(cancel, hasher)
            .await?
            .map_err(|e| FetchError::Task(e.to_string()))?;

        if let Some(expected) = expected.filter(|expected| **expected != actual) {
            warn!(%url, %expected, %actual, "downloaded bytes do not match expected hash");
            return Err(FetchError::HashMismatch {
                url: url.to_string(),
                expected: *expected,
                actual,
            });
        }

        guard.keep();
        debug!(%url, bytes = written, hash = %actual, "download finished");
        Ok(actual)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_body(
        &self,
        url: &Url,
        dest: &Path,
        mut file: File,
        response: HttpResponse<C::Error>,
        tx: mpsc::Sender<Bytes>,
        progress: &ProgressChannel,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let total = response.content_length;
        let mut body = response.body;
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        let mut written = 0u64;

        loop {
            let next = until_canceled(cancel, self.next_chunk(url, &mut body)).await??;
            let finished = next.is_none();
            if let Some(chunk) = next {
                buffer.extend_from_slice(&chunk);
            }

            while buffer.len() >= CHUNK_SIZE || (finished && !buffer.is_empty()) {
                let take = buffer.len().min(CHUNK_SIZE);
                let block = buffer.split_to(take).freeze();

                // Queue for hashing first so the digest of this block is
                // computed while its write is in flight.
                until_canceled(cancel, tx.send(block.clone()))
                    .await?
                    .map_err(|_| FetchError::Task("hasher stopped early".to_owned()))?;
                until_canceled(cancel, file.write_all(&block))
                    .await?
                    .map_err(|source| write_error(dest, source))?;

                written += block.len() as u64;
                progress.set_progress(Progress::counting(written, total));
            }

            if finished {
                break;
            }
        }

        until_canceled(cancel, file.flush())
            .await?
            .map_err(|source| write_error(dest, source))?;

        match total {
            Some(declared) if written < declared => {
                return Err(FetchError::Truncated {
                    url: url.to_string(),
                    received: written,
                    declared,
                });
            }
            Some(declared) if written > declared => {
                return Err(FetchError::Oversized {
                    url: url.to_string(),
                    received: written,
                    declared,
                });
            }
            _ => {}
        }
        Ok(written)
    }

    async fn next_chunk(
        &self,
        url: &Url,
        body: &mut BoxStream<'static, std::result::Result<Bytes, C::Error>>,
    ) -> Result<Option<Bytes>> {
        let next = match self.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, body.next())
                .await
                .map_err(|_| FetchError::Timeout {
                    url:     url.to_string(),
                    seconds: timeout.as_secs(),
                })?,
            None => body.next().await,
        };
        next.transpose().map_err(|e| network(url, e))
    }
}

fn check_response<E>(url: &Url, response: &HttpResponse<E>) -> Result<()> {
    if !is_success(response.status) {
        return Err(FetchError::Http {
            url:    url.to_string(),
            status: response.status,
        });
    }
    if let Some(content_type) = response
        .content_type
        .as_deref()
        .filter(|content_type| is_textual_content_type(content_type))
    {
        return Err(FetchError::UnexpectedContentType {
            url:          url.to_string(),
            content_type: content_type.to_owned(),
        });
    }
    Ok(())
}

/// Hash buffers on a blocking thread until the sender is dropped.
fn spawn_hasher(mut rx: mpsc::Receiver<Bytes>) -> JoinHandle<ContentHash> {
    tokio::task::spawn_blocking(move || {
        let mut hasher = Sha256Hasher::new();
        while let Some(block) = rx.blocking_recv() {
            hasher.update(&block);
        }
        hasher.finalize()
    })
}

/// Race `fut` against cancellation; cancellation wins ties.
async fn until_canceled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Canceled),
        out = fut => Ok(out),
    }
}

fn network(url: &Url, err: impl std::error::Error) -> FetchError {
    FetchError::Network {
        url:     url.to_string(),
        message: err.to_string(),
    }
}

fn write_error(dest: &Path, source: std::io::Error) -> FetchError {
    FetchError::Write {
        path: dest.to_path_buf(),
        source,
    }
}
