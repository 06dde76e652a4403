//! The background I/O executor.
//!
//! Readers never touch the network themselves. They post typed [`IoRequest`]s to an
//! [`IoExecutor`], whose worker task runs each request concurrently against a
//! [`ByteRangeFetcher`] and, for plain files, an optional [`HierarchyBackend`]. Responses
//! come back in any order and are matched to their callers by request id.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::HierarchyBackend,
    byte_range::ByteRange,
    config::ReaderConfig,
    data::ArrayData,
    fetch::ByteRangeFetcher,
    model::{DatasetDescriptor, GroupNode},
};

/// Identifies a request and its response.
pub type RequestId = u64;

/// Advisory cancellation of a read.
///
/// Canceling does not abort requests already handed to the executor. It stops callers
/// from waiting for them and from issuing further requests.
#[derive(Debug, Clone, Default)]
pub struct Canceler {
    token: CancellationToken,
}

impl Canceler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`Canceler::cancel`] has been called.
    pub async fn canceled(&self) {
        self.token.cancelled().await;
    }
}

/// A request to the background executor.
#[derive(Debug, Clone)]
pub enum IoRequest {
    FetchBytes {
        request_id: RequestId,
        url: String,
        range: Option<ByteRange>,
    },
    GetGroup {
        request_id: RequestId,
        url: String,
        path: String,
        chunk_size: u64,
    },
    GetDataset {
        request_id: RequestId,
        url: String,
        path: String,
        chunk_size: u64,
    },
    GetDatasetData {
        request_id: RequestId,
        url: String,
        path: String,
        slice: Option<Vec<Range<u64>>>,
    },
}

impl IoRequest {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::FetchBytes { request_id, .. }
            | Self::GetGroup { request_id, .. }
            | Self::GetDataset { request_id, .. }
            | Self::GetDatasetData { request_id, .. } => *request_id,
        }
    }
}

/// The response to an [`IoRequest`] of the same variant.
#[derive(Debug)]
pub enum IoResponse {
    FetchBytes {
        request_id: RequestId,
        result: crate::Result<Bytes>,
    },
    GetGroup {
        request_id: RequestId,
        result: crate::Result<Option<GroupNode>>,
    },
    GetDataset {
        request_id: RequestId,
        result: crate::Result<Option<DatasetDescriptor>>,
    },
    GetDatasetData {
        request_id: RequestId,
        result: crate::Result<Option<ArrayData>>,
    },
}

impl IoResponse {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::FetchBytes { request_id, .. }
            | Self::GetGroup { request_id, .. }
            | Self::GetDataset { request_id, .. }
            | Self::GetDatasetData { request_id, .. } => *request_id,
        }
    }
}

/// Counters of an [`IoExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoStats {
    /// Requests posted since the executor was spawned.
    pub issued: u64,
    /// Requests still waiting for a response.
    pub pending: usize,
}

type Listeners = Arc<Mutex<HashMap<RequestId, oneshot::Sender<IoResponse>>>>;

/// Removes the listener of a request when its caller stops waiting.
struct ListenerGuard<'a> {
    listeners: &'a Listeners,
    request_id: RequestId,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.listeners.lock().remove(&self.request_id);
    }
}

/// Handle to the background executor. Clones share the same worker.
#[derive(Debug, Clone)]
pub struct IoExecutor {
    requests: mpsc::UnboundedSender<IoRequest>,
    listeners: Listeners,
    next_request_id: Arc<AtomicU64>,
    timeout: Duration,
    has_backend: bool,
}

impl IoExecutor {
    /// Start the worker and dispatcher tasks on the current tokio runtime.
    ///
    /// The tasks stop once every handle has been dropped and in-flight requests have finished.
    /// Without a `backend`, requests about plain files fail with
    /// [`Error::Unsupported`](crate::Error::Unsupported).
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn spawn(
        fetcher: Arc<dyn ByteRangeFetcher>,
        backend: Option<Arc<dyn HierarchyBackend>>,
        config: &ReaderConfig,
    ) -> Self {
        let has_backend = backend.is_some();
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (response_sender, response_receiver) = mpsc::unbounded_channel();
        let listeners = Listeners::default();
        tokio::spawn(run_worker(
            request_receiver,
            response_sender,
            fetcher,
            backend,
        ));
        tokio::spawn(run_dispatcher(response_receiver, listeners.clone()));
        Self {
            requests: request_sender,
            listeners,
            next_request_id: Arc::new(AtomicU64::new(0)),
            timeout: config.request_timeout(),
            has_backend,
        }
    }

    /// Whether plain files can be read, see [`IoExecutor::spawn`].
    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.has_backend
    }

    #[must_use]
    pub fn stats(&self) -> IoStats {
        IoStats {
            issued: self.next_request_id.load(Ordering::Relaxed),
            pending: self.listeners.lock().len(),
        }
    }

    /// Post a request and wait for its response.
    ///
    /// # Errors
    /// Returns [`Error::Canceled`](crate::Error::Canceled) if `canceler` fires before the
    /// response arrives, and [`Error::Timeout`](crate::Error::Timeout) if no response arrives
    /// within the configured timeout. In both cases a late response is discarded.
    pub async fn request(
        &self,
        request: impl FnOnce(RequestId) -> IoRequest,
        canceler: Option<&Canceler>,
    ) -> crate::Result<IoResponse> {
        if canceler.is_some_and(Canceler::is_canceled) {
            return Err(crate::Error::Canceled);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.listeners.lock().insert(request_id, sender);
        let _listener = ListenerGuard {
            listeners: &self.listeners,
            request_id,
        };
        let request = request(request_id);
        log::debug!("request {request_id} posted: {request:?}");
        self.requests
            .send(request)
            .map_err(|_| crate::Error::general("the io executor has shut down"))?;

        let response = tokio::time::timeout(self.timeout, async {
            receiver
                .await
                .map_err(|_| crate::Error::general("the io executor dropped the request"))
        });
        let response = match canceler {
            Some(canceler) => tokio::select! {
                response = response => response,
                () = canceler.canceled() => {
                    log::debug!("request {request_id} canceled");
                    return Err(crate::Error::Canceled);
                }
            },
            None => response.await,
        };
        match response {
            Ok(response) => response,
            Err(_) => {
                log::warn!("request {request_id} timed out after {:?}", self.timeout);
                Err(crate::Error::Timeout {
                    request_id,
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Fetch `range` of `url`, or all of it.
    ///
    /// # Errors
    /// See [`IoExecutor::request`] and [`ByteRangeFetcher::fetch`].
    pub async fn fetch_bytes(
        &self,
        url: &str,
        range: Option<ByteRange>,
        canceler: Option<&Canceler>,
    ) -> crate::Result<Bytes> {
        let response = self
            .request(
                |request_id| IoRequest::FetchBytes {
                    request_id,
                    url: url.to_string(),
                    range,
                },
                canceler,
            )
            .await?;
        match response {
            IoResponse::FetchBytes { result, .. } => result,
            other => Err(unexpected(&other)),
        }
    }

    /// # Errors
    /// See [`IoExecutor::request`] and [`HierarchyBackend::get_group`].
    pub async fn get_group(
        &self,
        url: &str,
        path: &str,
        chunk_size: u64,
        canceler: Option<&Canceler>,
    ) -> crate::Result<Option<GroupNode>> {
        let response = self
            .request(
                |request_id| IoRequest::GetGroup {
                    request_id,
                    url: url.to_string(),
                    path: path.to_string(),
                    chunk_size,
                },
                canceler,
            )
            .await?;
        match response {
            IoResponse::GetGroup { result, .. } => result,
            other => Err(unexpected(&other)),
        }
    }

    /// # Errors
    /// See [`IoExecutor::request`] and [`HierarchyBackend::get_dataset`].
    pub async fn get_dataset(
        &self,
        url: &str,
        path: &str,
        chunk_size: u64,
        canceler: Option<&Canceler>,
    ) -> crate::Result<Option<DatasetDescriptor>> {
        let response = self
            .request(
                |request_id| IoRequest::GetDataset {
                    request_id,
                    url: url.to_string(),
                    path: path.to_string(),
                    chunk_size,
                },
                canceler,
            )
            .await?;
        match response {
            IoResponse::GetDataset { result, .. } => result,
            other => Err(unexpected(&other)),
        }
    }

    /// # Errors
    /// See [`IoExecutor::request`] and [`HierarchyBackend::get_dataset_data`].
    pub async fn get_dataset_data(
        &self,
        url: &str,
        path: &str,
        slice: Option<Vec<Range<u64>>>,
        canceler: Option<&Canceler>,
    ) -> crate::Result<Option<ArrayData>> {
        let response = self
            .request(
                |request_id| IoRequest::GetDatasetData {
                    request_id,
                    url: url.to_string(),
                    path: path.to_string(),
                    slice,
                },
                canceler,
            )
            .await?;
        match response {
            IoResponse::GetDatasetData { result, .. } => result,
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &IoResponse) -> crate::Error {
    crate::Error::general(format!(
        "unexpected response to request {}",
        response.request_id()
    ))
}

async fn run_worker(
    mut requests: mpsc::UnboundedReceiver<IoRequest>,
    responses: mpsc::UnboundedSender<IoResponse>,
    fetcher: Arc<dyn ByteRangeFetcher>,
    backend: Option<Arc<dyn HierarchyBackend>>,
) {
    while let Some(request) = requests.recv().await {
        let responses = responses.clone();
        let fetcher = fetcher.clone();
        let backend = backend.clone();
        tokio::spawn(async move {
            let response = handle(request, fetcher.as_ref(), backend.as_deref()).await;
            // the dispatcher only stops once every sender is gone
            let _ = responses.send(response);
        });
    }
    log::debug!("io worker stopped");
}

async fn handle(
    request: IoRequest,
    fetcher: &dyn ByteRangeFetcher,
    backend: Option<&dyn HierarchyBackend>,
) -> IoResponse {
    match request {
        IoRequest::FetchBytes {
            request_id,
            url,
            range,
        } => IoResponse::FetchBytes {
            request_id,
            result: fetcher.fetch(&url, range).await,
        },
        IoRequest::GetGroup {
            request_id,
            url,
            path,
            chunk_size,
        } => IoResponse::GetGroup {
            request_id,
            result: match backend {
                Some(backend) => backend.get_group(&url, &path, chunk_size).await,
                None => Err(no_backend()),
            },
        },
        IoRequest::GetDataset {
            request_id,
            url,
            path,
            chunk_size,
        } => IoResponse::GetDataset {
            request_id,
            result: match backend {
                Some(backend) => backend.get_dataset(&url, &path, chunk_size).await,
                None => Err(no_backend()),
            },
        },
        IoRequest::GetDatasetData {
            request_id,
            url,
            path,
            slice,
        } => IoResponse::GetDatasetData {
            request_id,
            result: match backend {
                Some(backend) => backend.get_dataset_data(&url, &path, slice.as_deref()).await,
                None => Err(no_backend()),
            },
        },
    }
}

fn no_backend() -> crate::Error {
    crate::Error::Unsupported("no hierarchy backend is configured for plain files".into())
}

async fn run_dispatcher(mut responses: mpsc::UnboundedReceiver<IoResponse>, listeners: Listeners) {
    while let Some(response) = responses.recv().await {
        let request_id = response.request_id();
        let listener = listeners.lock().remove(&request_id);
        match listener {
            Some(listener) => {
                log::debug!("request {request_id} completed");
                // the caller may have stopped waiting in the meantime
                let _ = listener.send(response);
            }
            None => log::debug!("discarding late response to request {request_id}"),
        }
    }
}
