//! 集成测试公共工具：进程内 Range 文件服务器、静态远端与事件记录器

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use cloud_mirror_rust::{
    downloader::{AggregateStats, DownloaderConfig, DownloaderContext},
    remote::{RemoteEntry, RemoteFolder},
    DownloadEvent, DownloadLink, DownloadStatus, DownloadStore, EventSink, Item, RemoteClient,
    TreeWalker,
};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 探测请求使用的 Range
pub const PROBE_RANGE: &str = "bytes=0-1";

const STREAM_CHUNK: usize = 64 * 1024;

/// 确定性的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// 不走系统代理的客户端
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn fast_config(chunk_size: u64, workers: usize) -> DownloaderConfig {
    DownloaderConfig {
        chunk_size,
        workers,
        max_retries: 3,
        retry_backoff: Duration::from_millis(10),
        progress_interval: Duration::from_millis(50),
        read_timeout: Duration::from_secs(5),
        verify_checksum: true,
        stall: None,
    }
}

pub fn downloader_context(
    store: Arc<DownloadStore>,
    remote: Arc<dyn RemoteClient>,
    events: Arc<dyn EventSink>,
) -> DownloaderContext {
    DownloaderContext {
        client: test_client(),
        store,
        remote,
        events,
        aggregate: Arc::new(AggregateStats::new()),
    }
}

/// 服务器行为开关
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub supports_range: bool,
    /// 要求的 Bearer token
    pub token: Option<String>,
    /// 所有请求都返回该状态码
    pub fixed_status: Option<u16>,
    /// 分片请求（带 Range 且不是探测请求）返回该状态码
    pub fragment_status: Option<u16>,
    /// 前 N 个分片请求返回 503
    pub fail_fragment_requests: usize,
    /// 每发送 64KB 之前的等待时间
    pub chunk_delay: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            supports_range: true,
            token: None,
            fixed_status: None,
            fragment_status: None,
            fail_fragment_requests: 0,
            chunk_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub method: String,
    pub name: String,
    pub range: Option<String>,
    pub authorization: Option<String>,
}

impl RequestRecord {
    pub fn is_fragment_request(&self) -> bool {
        self.method == "GET" && self.range.as_deref().map_or(false, |r| r != PROBE_RANGE)
    }
}

struct ServerState {
    files: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    options: RwLock<ServerOptions>,
    fragment_failures: AtomicUsize,
    requests: Mutex<Vec<RequestRecord>>,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        let state = Arc::new(ServerState {
            files: RwLock::new(HashMap::new()),
            fragment_failures: AtomicUsize::new(0),
            options: RwLock::new(options),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/files/:name", get(serve).head(serve))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn put_file(&self, name: &str, data: Vec<u8>) {
        self.state.files.write().insert(name.to_string(), Arc::new(data));
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{}", self.addr, name)
    }

    pub fn set_options(&self, options: ServerOptions) {
        *self.state.options.write() = options;
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.state.requests.lock().clone()
    }

    pub fn fragment_requests(&self, name: &str) -> Vec<RequestRecord> {
        self.requests()
            .into_iter()
            .filter(|r| r.name == name && r.is_fragment_request())
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.requests.lock().clear();
    }
}

fn status_response(status: u16) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .body(Body::empty())
        .unwrap()
}

/// 解析 `bytes=a-b`，返回半开区间
fn parse_range(range: &str, len: u64) -> Option<(u64, u64)> {
    let spec = range.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() { len.saturating_sub(1) } else { end.parse().ok()? };
    if start >= len || end < start {
        return None;
    }
    Some((start, end.min(len - 1) + 1))
}

async fn serve(
    State(state): State<Arc<ServerState>>,
    method: Method,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let record = RequestRecord {
        method: method.to_string(),
        name: name.clone(),
        range: range.clone(),
        authorization: authorization.clone(),
    };
    let is_fragment = record.is_fragment_request();
    state.requests.lock().push(record);

    let options = state.options.read().clone();
    if let Some(status) = options.fixed_status {
        return status_response(status);
    }
    if let Some(token) = &options.token {
        if authorization.as_deref() != Some(format!("Bearer {}", token).as_str()) {
            return status_response(401);
        }
    }
    let Some(data) = state.files.read().get(&name).cloned() else {
        return status_response(404);
    };
    if is_fragment {
        if let Some(status) = options.fragment_status {
            return status_response(status);
        }
        if state.fragment_failures.fetch_add(1, Ordering::SeqCst) < options.fail_fragment_requests {
            return status_response(503);
        }
    }

    let len = data.len() as u64;
    let (status, start, end) = match range.as_deref() {
        Some(range) if options.supports_range => match parse_range(range, len) {
            Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
            None => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", len))
                    .body(Body::empty())
                    .unwrap();
            }
        },
        _ => (StatusCode::OK, 0, len),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, end - start);
    if options.supports_range {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end - 1, len),
        );
    }
    if method == Method::HEAD {
        return builder.body(Body::empty()).unwrap();
    }

    let delay = options.chunk_delay;
    let offsets: Vec<(usize, usize)> = (start as usize..end as usize)
        .step_by(STREAM_CHUNK)
        .map(|s| (s, (s + STREAM_CHUNK).min(end as usize)))
        .collect();
    let stream = futures::stream::iter(offsets).then(move |(s, e)| {
        let data = data.clone();
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, std::io::Error>(Bytes::copy_from_slice(&data[s..e]))
        }
    });
    builder.body(Body::from_stream(stream)).unwrap()
}

/// 事件记录器
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DownloadEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events.lock().clone()
    }

    /// 某个文件经历的状态（按发布顺序）
    pub fn item_statuses(&self, item_id: &str) -> Vec<DownloadStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::ItemStatusChanged { item_id: id, new_status, .. } if id == item_id => {
                    Some(*new_status)
                }
                _ => None,
            })
            .collect()
    }

    pub fn group_statuses(&self, group_id: &str) -> Vec<DownloadStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::GroupStatusChanged { group_id: id, new_status, .. } if id == group_id => {
                    Some(*new_status)
                }
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: DownloadEvent) {
        self.events.lock().push(event);
    }
}

/// 固定的远端：按文件ID返回预设链接，按文件夹ID返回预设目录
#[derive(Default)]
pub struct StaticRemote {
    /// 链接队列，多于一个时每次解析弹出队首
    links: Mutex<HashMap<String, VecDeque<DownloadLink>>>,
    folders: Mutex<HashMap<String, RemoteFolder>>,
    resolves: AtomicUsize,
}

impl StaticRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(self, file_id: &str, link: DownloadLink) -> Self {
        self.links
            .lock()
            .entry(file_id.to_string())
            .or_default()
            .push_back(link);
        self
    }

    pub fn with_folder(self, folder: RemoteFolder) -> Self {
        self.folders.lock().insert(folder.id.clone(), folder);
        self
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for StaticRemote {
    async fn resolve_download_link(&self, item: &Item) -> anyhow::Result<DownloadLink> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let mut links = self.links.lock();
        let queue = links
            .get_mut(&item.id)
            .ok_or_else(|| anyhow!("remote unavailable: {}", item.id))?;
        if queue.len() > 1 {
            return queue.pop_front().ok_or_else(|| anyhow!("no link"));
        }
        queue.front().cloned().ok_or_else(|| anyhow!("no link"))
    }
}

#[async_trait]
impl TreeWalker for StaticRemote {
    async fn walk(&self, folder_id: &str) -> anyhow::Result<RemoteFolder> {
        self.folders
            .lock()
            .get(folder_id)
            .cloned()
            .ok_or_else(|| anyhow!("folder not found: {}", folder_id))
    }
}

pub fn entry(file_id: &str, name: &str, relative_path: &str, size: u64) -> RemoteEntry {
    RemoteEntry {
        file_id: file_id.to_string(),
        name: name.to_string(),
        relative_path: relative_path.to_string(),
        size,
        crc32: None,
    }
}

/// 轮询直到条件成立
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
