//! Request router for dispatching REST calls to their handlers.
//!
//! This module provides the [`ApiRouter`] that owns the storage, the shared
//! transfer buffer and the gateway settings, resolves each request's
//! (method, path) pair to a [`Route`] and runs the matching handler to
//! completion. CORS headers are attached to every response.

use protocol::{
    BatchUploadResult, DeviceInfoResponse, FileWritten, ListResponse, MultipartDecoder,
    PathResult, StorageInfo, WifiInfo,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::files::{
    create_dir_all, receive_batch, receive_file, remove_dir_all, send_file, DirectoryBrowser,
    ProtectedPaths, Storage, StoragePath, StorageUsage, TransferBuffer,
};
use crate::network::{Method, NetworkStatusHandle, RequestHandler, Transport};
use crate::response::{apply_cors, send_error, send_json, GatewayError};

/// Result type for handlers. Errors are only returned before the response starts.
pub type HandlerResult = Result<(), GatewayError>;

/// Paths served under `/api`.
const API_PATHS: &[&str] = &[
    "/api/info",
    "/api/list",
    "/api/file",
    "/api/mkdir",
    "/api/rmdir",
    "/api/upload-batch",
];

/// A resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Preflight,
    Info,
    List,
    Download,
    Upload,
    DeleteFile,
    Mkdir,
    Rmdir,
    UploadBatch,
}

/// Match a request to its route.
pub fn resolve(method: Method, path: &str) -> Result<Route, GatewayError> {
    if method == Method::Options && (path == "/api" || path.starts_with("/api/")) {
        return Ok(Route::Preflight);
    }

    let route = match (path, method) {
        ("/api/info", Method::Get) => Route::Info,
        ("/api/list", Method::Get) => Route::List,
        ("/api/file", Method::Get) => Route::Download,
        ("/api/file", Method::Post) => Route::Upload,
        ("/api/file", Method::Delete) => Route::DeleteFile,
        ("/api/mkdir", Method::Post) => Route::Mkdir,
        ("/api/rmdir", Method::Delete) => Route::Rmdir,
        ("/api/upload-batch", Method::Post) => Route::UploadBatch,
        (path, method) if API_PATHS.contains(&path) => {
            return Err(GatewayError::MethodNotAllowed(format!(
                "Method {} not allowed for {}",
                method, path
            )));
        }
        _ => return Err(GatewayError::not_found("Not found")),
    };
    Ok(route)
}

/// Settings the handlers need from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Model name reported by the info endpoint.
    pub device_name: String,
    /// Client-visible mount point name, protected from removal.
    pub mount_name: String,
    /// Transfer buffer size in bytes.
    pub buffer_size: usize,
    /// Consecutive body read timeouts tolerated (0 = unlimited).
    pub max_read_retries: u32,
    /// Whether listings include dot-files.
    pub show_hidden: bool,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_name: config.device.name.clone(),
            mount_name: config.storage.mount_name.clone(),
            buffer_size: config.server.buffer_size,
            max_read_retries: config.server.max_read_retries,
            show_hidden: config.storage.show_hidden,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Dispatches requests to handlers.
pub struct ApiRouter<S: Storage> {
    storage: S,
    buffer: TransferBuffer,
    settings: GatewaySettings,
    protected: ProtectedPaths,
    network: NetworkStatusHandle,
}

impl<S: Storage> ApiRouter<S> {
    pub fn new(storage: S, settings: GatewaySettings, network: NetworkStatusHandle) -> Self {
        Self {
            buffer: TransferBuffer::new(settings.buffer_size),
            protected: ProtectedPaths::new(&settings.mount_name),
            storage,
            settings,
            network,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn network(&self) -> &NetworkStatusHandle {
        &self.network
    }

    /// Serve one request to completion.
    pub async fn handle<T: Transport>(&mut self, transport: &mut T) {
        apply_cors(transport);

        let method = transport.method();
        let path = transport.path().to_string();
        info!(method = %method, path = %path, "Request");

        let result = match resolve(method, &path) {
            Ok(route) => self.dispatch(route, transport).await,
            Err(e) => Err(e),
        };

        if let Err(err) = result {
            debug!(method = %method, path = %path, error = %err, "Request failed");
            if let Err(e) = send_error(transport, &err).await {
                warn!(error = %e, "Failed to send error response");
            }
        }
    }

    async fn dispatch<T: Transport>(&mut self, route: Route, transport: &mut T) -> HandlerResult {
        match route {
            Route::Preflight => self.handle_preflight(transport).await,
            Route::Info => self.handle_info(transport).await,
            Route::List => self.handle_list(transport).await,
            Route::Download => self.handle_download(transport).await,
            Route::Upload => self.handle_upload(transport).await,
            Route::DeleteFile => self.handle_delete_file(transport).await,
            Route::Mkdir => self.handle_mkdir(transport).await,
            Route::Rmdir => self.handle_rmdir(transport).await,
            Route::UploadBatch => self.handle_upload_batch(transport).await,
        }
    }

    async fn handle_preflight<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        transport.set_status(200);
        send_ok(transport.send(&[]).await);
        Ok(())
    }

    async fn handle_info<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let usage = self.storage.usage().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read storage usage");
            StorageUsage::default()
        });
        let status = self.network.snapshot();
        let ip = status
            .ip
            .or_else(|| transport.local_ip())
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let body = DeviceInfoResponse {
            device: self.settings.device_name.clone(),
            ip,
            wifi: WifiInfo {
                ssid: status.ssid.unwrap_or_else(|| "unknown".to_string()),
                rssi: status.rssi,
            },
            storage: StorageInfo::from_usage(usage.total, usage.free),
        };
        send_ok(send_json(transport, 200, &body).await);
        Ok(())
    }

    async fn handle_list<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let raw = transport
            .query_param("path")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let path = StoragePath::parse(&raw)?;

        let items = DirectoryBrowser::new(&self.storage)
            .include_hidden(self.settings.show_hidden)
            .list(&path)?;
        debug!(path = %path, count = items.len(), "Listed directory");
        send_ok(send_json(transport, 200, &ListResponse { path: raw, items }).await);
        Ok(())
    }

    async fn handle_download<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let (_, path) = required_path(transport)?;
        send_file(&self.storage, transport, &mut self.buffer, &path).await?;
        Ok(())
    }

    async fn handle_upload<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let (raw, path) = required_path(transport)?;
        if path.is_root() {
            return Err(GatewayError::bad_request("Path must name a file"));
        }
        let size = receive_file(
            &self.storage,
            transport,
            &mut self.buffer,
            &path,
            self.settings.max_read_retries,
        )
        .await?;
        send_ok(send_json(transport, 200, &FileWritten::new(raw, size)).await);
        Ok(())
    }

    async fn handle_delete_file<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let (raw, path) = required_path(transport)?;
        if self.protected.contains(&path) {
            return Err(GatewayError::bad_request("Cannot delete root directory"));
        }

        let meta = self
            .storage
            .stat(&path)
            .map_err(|e| GatewayError::from_io(e, "File not found", "Failed to delete"))?;
        let removed = if meta.is_dir() {
            self.storage.remove_dir(&path)
        } else {
            self.storage.remove_file(&path)
        };
        removed.map_err(|e| GatewayError::storage("Failed to delete", e))?;

        info!(path = %path, "Deleted");
        send_ok(send_json(transport, 200, &PathResult::new(raw)).await);
        Ok(())
    }

    async fn handle_mkdir<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let (raw, path) = required_path(transport)?;
        create_dir_all(&self.storage, &path)
            .map_err(|e| GatewayError::storage("Failed to create directory", e))?;

        info!(path = %path, "Directory ready");
        send_ok(send_json(transport, 200, &PathResult::new(raw)).await);
        Ok(())
    }

    async fn handle_rmdir<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let (raw, path) = required_path(transport)?;
        if self.protected.contains(&path) {
            return Err(GatewayError::bad_request("Cannot delete root directory"));
        }

        let meta = self.storage.stat(&path).map_err(|e| {
            GatewayError::from_io(e, "Directory not found", "Failed to delete directory")
        })?;
        if !meta.is_dir() {
            return Err(GatewayError::bad_request("Path is not a directory"));
        }

        let report = remove_dir_all(&self.storage, &path, &self.protected)?;
        if !report.is_complete() {
            return Err(GatewayError::IncompleteRemoval {
                failures: report.failures,
            });
        }

        info!(
            path = %path,
            files = report.files_removed,
            dirs = report.dirs_removed,
            "Directory removed"
        );
        send_ok(send_json(transport, 200, &PathResult::new(raw)).await);
        Ok(())
    }

    async fn handle_upload_batch<T: Transport>(&mut self, transport: &mut T) -> HandlerResult {
        let raw_dir = transport
            .query_param("dir")
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let dir = StoragePath::parse(&raw_dir)?;

        let content_type = transport
            .header("Content-Type")
            .ok_or_else(|| GatewayError::bad_request("Content-Type header required"))?;
        let decoder = MultipartDecoder::from_content_type(content_type)?;

        let outcome = receive_batch(
            &self.storage,
            transport,
            &mut self.buffer,
            &dir,
            decoder,
            self.settings.max_read_retries,
        )
        .await;

        let body = BatchUploadResult::new(outcome.files, outcome.skipped);
        send_ok(send_json(transport, 200, &body).await);
        Ok(())
    }
}

/// The required, validated `path` query parameter, with its raw form.
fn required_path<T: Transport>(transport: &T) -> Result<(String, StoragePath), GatewayError> {
    let raw = transport
        .query_param("path")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| GatewayError::bad_request("Path parameter required"))?;
    let path = StoragePath::parse(&raw)?;
    Ok((raw, path))
}

impl<S: Storage> RequestHandler for ApiRouter<S> {
    async fn respond<T: Transport>(&mut self, transport: &mut T) {
        self.handle(transport).await
    }
}

/// Log a failed success response; nothing else can be done once it fails.
fn send_ok(result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to send response");
    }
}
