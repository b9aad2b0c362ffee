use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::{StreamExt, stream};

use crate::http::{HttpClient, HttpResponse};

/// Error produced by [`MemoryClient`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MemoryError(pub String);

/// A canned response served by [`MemoryClient`].
#[derive(Debug, Clone)]
pub struct MemoryResponse {
    status:         u16,
    content_type:   Option<String>,
    content_length: Option<u64>,
    body:           Bytes,
    chunk_size:     usize,
    stall_after:    Option<usize>,
    fail_times:     u32,
}

impl MemoryResponse {
    /// `200 OK`, `application/octet-stream`, with a declared length.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status:         200,
            content_type:   Some("application/octet-stream".to_owned()),
            content_length: Some(body.len() as u64),
            body,
            chunk_size:     1024,
            stall_after:    None,
            fail_times:     0,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Omit `Content-Length`, as a chunked response would.
    pub fn without_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    /// Declare `length` as `Content-Length` whatever the body holds.
    pub fn declared_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    /// Size of the chunks the body is split into.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Deliver `bytes` of the body, then never yield again.
    pub fn stall_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }

    /// Fail the first `times` requests with a connection error.
    pub fn fail_times(mut self, times: u32) -> Self {
        self.fail_times = times;
        self
    }
}

#[derive(Debug, Default)]
struct Route {
    response: Option<MemoryResponse>,
    requests: usize,
}

/// In-memory [`HttpClient`] serving canned responses by exact URL.
///
/// Unknown URLs answer `404`. Clones share routes and request counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    routes: Arc<Mutex<HashMap<String, Route>>>,
}

impl MemoryClient {
    pub fn new() -> Self { Self::default() }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<Bytes>) -> &Self {
        self.respond(url, MemoryResponse::ok(body))
    }

    pub fn respond(&self, url: impl Into<String>, response: MemoryResponse) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.into())
            .or_default()
            .response = Some(response);
        self
    }

    /// Number of GETs issued for `url` so far.
    pub fn requests(&self, url: &str) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map_or(0, |route| route.requests)
    }

    fn next_response(&self, url: &str) -> Result<Option<MemoryResponse>, MemoryError> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes.entry(url.to_owned()).or_default();
        route.requests += 1;

        match route.response.as_mut() {
            Some(response) if response.fail_times > 0 => {
                response.fail_times -= 1;
                Err(MemoryError(format!("connection reset by {url}")))
            }
            Some(response) => Ok(Some(response.clone())),
            None => Ok(None),
        }
    }
}

impl HttpClient for MemoryClient {
    type Error = MemoryError;

    async fn get(&self, url: &str) -> Result<HttpResponse<MemoryError>, MemoryError> {
        let Some(response) = self.next_response(url)? else {
            return Ok(HttpResponse {
                status:         404,
                content_type:   Some("text/html".to_owned()),
                content_length: None,
                body:           stream::empty().boxed(),
            });
        };

        let served = response
            .stall_after
            .map_or(response.body.len(), |n| n.min(response.body.len()));
        let chunks: Vec<Result<Bytes, MemoryError>> = (0..served)
            .step_by(response.chunk_size)
            .map(|start| Ok(response.body.slice(start..(start + response.chunk_size).min(served))))
            .collect();

        let body = if response.stall_after.is_some() {
            stream::iter(chunks).chain(stream::pending()).boxed()
        } else {
            stream::iter(chunks).boxed()
        };

        Ok(HttpResponse {
            status: response.status,
            content_type: response.content_type,
            content_length: response.content_length,
            body,
        })
    }
}
