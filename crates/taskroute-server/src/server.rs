//! HTTP server for the demo endpoints
//!
//! One hyper HTTP/1 connection task per client, all on the runtime the
//! server was built in. Work placement is the dispatcher's job; this module
//! only routes, spools uploads and renders JSON.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use taskroute::{Dispatcher, DispatcherConfig, PoolConfig, ProcessPoolConfig};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::cors::CorsLayer;
use crate::handlers::{AppState, Endpoint};
use crate::upload::{Upload, filename_from_query};
use crate::{Result, ServerError};

/// Builder for the demo server
pub struct DemoServerBuilder {
    config: ServerConfig,
}

impl DemoServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the directory uploads are spooled to
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    /// Set how long the artificial calculation takes
    pub fn calculation_delay(mut self, delay: Duration) -> Self {
        self.config.calculation_delay = delay;
        self
    }

    /// Set the URLs hit by the fan-out endpoints
    pub fn fanout_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fanout_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-request timeout of the fan-out
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Size the thread pool shared by thread and background tasks
    pub fn thread_pool(mut self, pool: PoolConfig) -> Self {
        self.config.dispatcher.thread_pool = pool;
        self
    }

    /// Enable the process pool behind `/read_file+separate_process`
    pub fn process_pool(mut self, pool: ProcessPoolConfig) -> Self {
        self.config.dispatcher.process_pool = Some(pool);
        self
    }

    pub fn dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.config.dispatcher = config;
        self
    }

    /// Build the server and its dispatcher on the current tokio runtime
    pub fn build(self) -> Result<DemoServer> {
        let dispatcher = Dispatcher::new(self.config.dispatcher.clone())?;
        let config = Arc::new(self.config);
        let state = AppState::new(Arc::clone(&config), dispatcher)?;
        Ok(DemoServer {
            config,
            state: Arc::new(state),
        })
    }
}

impl Default for DemoServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The demo HTTP server
#[derive(Clone)]
pub struct DemoServer {
    config: Arc<ServerConfig>,
    state: Arc<AppState>,
}

impl DemoServer {
    pub fn builder() -> DemoServerBuilder {
        DemoServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.state.dispatcher()
    }

    /// Bind the configured address and serve until an accept error
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Demo server listening on {}", listener.local_addr()?);
        info!("Uploads spooled to {}", self.config.upload_dir.display());

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("New connection from {}", peer_addr);

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle_request(req, Arc::clone(&state)));

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }

    /// Stop the dispatcher: drain queued work and stop worker processes
    pub fn shutdown(&self) {
        self.state.dispatcher().shutdown();
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("Handling {} {}", method, path);

    let mut response = match route(req, &state).await {
        Ok(response) => response,
        Err(err) => {
            let status = err.status_code();
            if status.is_server_error() {
                error!(method = %method, path = %path, error = %err, "Request failed");
            } else {
                warn!(method = %method, path = %path, error = %err, "Request rejected");
            }
            error_response(status, &err.to_string())
        }
    };

    if state.config().enable_cors {
        CorsLayer::apply_cors_headers(response.headers_mut());
    }
    Ok(response)
}

async fn route(req: Request<Incoming>, state: &AppState) -> Result<Response<Full<Bytes>>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => Ok(empty_response(StatusCode::NO_CONTENT)),
        (&Method::GET, "/") => json_response(StatusCode::OK, &"Hello async world"),
        (&Method::GET, "/stats") => json_response(StatusCode::OK, &state.dispatcher().stats()),
        (_, path) => match Endpoint::from_path(path) {
            Some(endpoint) if method == Method::POST => {
                let filename = filename_from_query(req.uri().query())?;
                let body = read_body(req.into_body(), state.config().max_body_size).await?;
                let upload = Upload::spool(&state.config().upload_dir, &filename, &body).await?;
                let report = state.handle(endpoint, &upload).await?;
                json_response(StatusCode::OK, &report)
            }
            Some(_) => Ok(error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed",
            )),
            None => Ok(error_response(StatusCode::NOT_FOUND, "Not Found")),
        },
    }
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes> {
    let collected = Limited::new(body, limit).collect().await.map_err(|e| {
        if e.is::<LengthLimitError>() {
            ServerError::BodyTooLarge { limit }
        } else {
            ServerError::InvalidRequest(format!("failed to read request body: {e}"))
        }
    })?;
    Ok(collected.to_bytes())
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Full<Bytes>>> {
    let body = serde_json::to_vec(body)?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
