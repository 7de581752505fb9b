//! Upload endpoints. Every handler reads the uploaded file and pairs the read
//! with a calculation or an outbound fan-out, placing each piece on the
//! execution context its name advertises.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use taskroute::{Dispatcher, Task};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::upload::Upload;
use crate::workload::{self, name_length};
use crate::Result;

/// The upload endpoints, one per strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Async read gathered with a blocking calculation on the scheduler.
    ProcessBlock,
    /// Blocking read then blocking calculation, together on a pool thread.
    ProcessBlockSync,
    /// Async read; the calculation runs in the background and is not awaited.
    ProcessInBackground,
    /// Async read gathered with the calculation in a worker process.
    SeparateProcess,
    /// Async read gathered with a concurrent async fan-out.
    RequestsNoBlock,
    /// Async read gathered with a sequential blocking fan-out on a pool thread.
    RequestsSync,
    /// Blocking read on a pool thread.
    ReadFileSync,
    /// Blocking read inline on the scheduler.
    ReadFilePseudoAsync,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::ProcessBlock,
        Endpoint::ProcessBlockSync,
        Endpoint::ProcessInBackground,
        Endpoint::SeparateProcess,
        Endpoint::RequestsNoBlock,
        Endpoint::RequestsSync,
        Endpoint::ReadFileSync,
        Endpoint::ReadFilePseudoAsync,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::ProcessBlock => "/read_file+process_block",
            Endpoint::ProcessBlockSync => "/read_file+process_block_sync",
            Endpoint::ProcessInBackground => "/read_file+process_in_background",
            Endpoint::SeparateProcess => "/read_file+separate_process",
            Endpoint::RequestsNoBlock => "/read_file+requests_no_block",
            Endpoint::RequestsSync => "/read_file+requests_sync",
            Endpoint::ReadFileSync => "/read_file_sync",
            Endpoint::ReadFilePseudoAsync => "/read_file_pseudo_async",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.path() == path)
    }
}

/// JSON body returned by every upload endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub filename: String,
    pub contents: String,
    /// Bytes read from the spooled upload.
    pub bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<Value>,
    /// Seconds spent on the outbound fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<f64>,
    /// Seconds from the start of the handler to the response.
    pub took: f64,
}

impl FileReport {
    fn new(upload: &Upload, bytes: usize, started: Instant) -> Self {
        Self {
            filename: upload.filename().to_string(),
            contents: "done".to_string(),
            bytes,
            calculation: None,
            requests: None,
            took: started.elapsed().as_secs_f64(),
        }
    }

    fn with_calculation(mut self, calculation: Value) -> Self {
        self.calculation = Some(calculation);
        self
    }

    fn with_requests(mut self, requests: f64) -> Self {
        self.requests = Some(requests);
        self
    }
}

/// What the pool thread hands back from `/read_file+process_block_sync`.
#[derive(Deserialize)]
struct SyncOutcome {
    bytes: usize,
    calculation: Value,
}

/// Shared state behind every connection.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, dispatcher: Dispatcher) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            dispatcher,
            client,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run `endpoint` against a spooled upload.
    pub async fn handle(&self, endpoint: Endpoint, upload: &Upload) -> Result<FileReport> {
        let started = Instant::now();
        let report = match endpoint {
            Endpoint::ProcessBlock => self.read_and_block(upload, started).await?,
            Endpoint::ProcessBlockSync => self.read_and_calculate_sync(upload, started).await?,
            Endpoint::ProcessInBackground => self.read_and_calculate_later(upload, started).await?,
            Endpoint::SeparateProcess => self.read_and_calculate_in_process(upload, started).await?,
            Endpoint::RequestsNoBlock => self.read_and_fan_out(upload, started).await?,
            Endpoint::RequestsSync => self.read_and_fan_out_blocking(upload, started).await?,
            Endpoint::ReadFileSync => self.read_on_thread(upload, started).await?,
            Endpoint::ReadFilePseudoAsync => self.read_inline(upload, started)?,
        };
        info!(
            endpoint = endpoint.path(),
            filename = %report.filename,
            took = report.took,
            "Upload handled"
        );
        Ok(report)
    }

    async fn read_and_block(&self, upload: &Upload, started: Instant) -> Result<FileReport> {
        let name = upload.filename().to_string();
        let delay = self.config.calculation_delay;
        // Never awaits, so nothing else on the scheduler runs until it returns.
        let calculation = self.dispatcher.submit(Task::cooperative(move || async move {
            Ok(json!(name_length(&name, delay)))
        }))?;

        let (bytes, calculation) =
            tokio::join!(workload::read_file(upload.path()), calculation.join());
        Ok(FileReport::new(upload, bytes?, started).with_calculation(calculation?))
    }

    async fn read_and_calculate_sync(&self, upload: &Upload, started: Instant) -> Result<FileReport> {
        let path = upload.path().to_path_buf();
        let name = upload.filename().to_string();
        let delay = self.config.calculation_delay;
        let output = self
            .dispatcher
            .submit(Task::thread(move || {
                let bytes = workload::read_file_sync(&path)?;
                let calculation = name_length(&name, delay);
                Ok(json!({ "bytes": bytes, "calculation": calculation }))
            }))?
            .join()
            .await?;

        let SyncOutcome { bytes, calculation } = serde_json::from_value(output)?;
        Ok(FileReport::new(upload, bytes, started).with_calculation(calculation))
    }

    async fn read_and_calculate_later(&self, upload: &Upload, started: Instant) -> Result<FileReport> {
        let bytes = workload::read_file(upload.path()).await?;

        let name = upload.filename().to_string();
        let delay = self.config.calculation_delay;
        let ack = self.dispatcher.submit(Task::background(move || {
            Ok(json!(name_length(&name, delay)))
        }))?;
        debug!(task_id = %ack.id(), "Calculation handed to background");

        Ok(FileReport::new(upload, bytes, started))
    }

    async fn read_and_calculate_in_process(
        &self,
        upload: &Upload,
        started: Instant,
    ) -> Result<FileReport> {
        let calculation = self.dispatcher.submit(Task::process(
            "name_length",
            json!({
                "name": upload.filename(),
                "delay_ms": self.config.calculation_delay.as_millis() as u64,
            }),
        ))?;

        let (bytes, calculation) =
            tokio::join!(workload::read_file(upload.path()), calculation.join());
        Ok(FileReport::new(upload, bytes?, started).with_calculation(calculation?))
    }

    async fn read_and_fan_out(&self, upload: &Upload, started: Instant) -> Result<FileReport> {
        let client = self.client.clone();
        let urls = self.config.fanout_urls.clone();
        let timeout = self.config.request_timeout;
        let requests = self.dispatcher.submit(Task::cooperative(move || async move {
            Ok(json!(workload::fanout(&client, &urls, timeout).await))
        }))?;

        let (bytes, requests) = tokio::join!(workload::read_file(upload.path()), requests.join());
        let requests: f64 = serde_json::from_value(requests?)?;
        Ok(FileReport::new(upload, bytes?, started).with_requests(requests))
    }

    async fn read_and_fan_out_blocking(
        &self,
        upload: &Upload,
        started: Instant,
    ) -> Result<FileReport> {
        let urls = self.config.fanout_urls.clone();
        let timeout = self.config.request_timeout;
        let requests = self.dispatcher.submit(Task::thread(move || {
            Ok(json!(workload::fanout_blocking(&urls, timeout)?))
        }))?;

        let (bytes, requests) = tokio::join!(workload::read_file(upload.path()), requests.join());
        let requests: f64 = serde_json::from_value(requests?)?;
        Ok(FileReport::new(upload, bytes?, started).with_requests(requests))
    }

    async fn read_on_thread(&self, upload: &Upload, started: Instant) -> Result<FileReport> {
        let path = upload.path().to_path_buf();
        let bytes = self
            .dispatcher
            .submit(Task::thread(move || Ok(json!(workload::read_file_sync(&path)?))))?
            .join()
            .await?;

        let bytes: usize = serde_json::from_value(bytes)?;
        Ok(FileReport::new(upload, bytes, started).with_calculation(json!(1)))
    }

    fn read_inline(&self, upload: &Upload, started: Instant) -> Result<FileReport> {
        // Blocking read on the scheduler thread, despite the async route.
        let bytes = workload::read_file_sync(upload.path())?;
        Ok(FileReport::new(upload, bytes, started).with_calculation(json!(1)))
    }
}
