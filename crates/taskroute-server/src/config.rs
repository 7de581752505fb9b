//! Demo server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use taskroute::DispatcherConfig;

/// Sites hit by the fan-out endpoints unless configured otherwise.
pub const DEFAULT_FANOUT_URLS: [&str; 9] = [
    "https://reddit.com",
    "https://google.com",
    "https://ru.wikipedia.org/",
    "https://www.youtube.com/",
    "https://www.facebook.com/",
    "https://www.instagram.com/",
    "https://www.twitch.tv/",
    "https://www.yahoo.com/",
    "https://www.amazon.com/",
];

/// Configuration for the demo server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Where uploads are spooled while a request is handled
    pub upload_dir: PathBuf,
    /// Artificial duration of the "calculation"
    pub calculation_delay: Duration,
    /// Targets of the fan-out endpoints
    pub fanout_urls: Vec<String>,
    /// Timeout for each outbound fan-out request
    pub request_timeout: Duration,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Pools behind the dispatcher
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8001)),
            upload_dir: std::env::temp_dir().join("taskroute-uploads"),
            calculation_delay: Duration::from_secs(6),
            fanout_urls: DEFAULT_FANOUT_URLS.iter().map(|u| u.to_string()).collect(),
            request_timeout: Duration::from_secs(10),
            enable_cors: true,
            max_body_size: 16 * 1024 * 1024, // 16MB
            dispatcher: DispatcherConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address.port(), 8001);
        assert_eq!(config.calculation_delay, Duration::from_secs(6));
        assert_eq!(config.fanout_urls.len(), 9);
        assert_eq!(config.fanout_urls[0], "https://reddit.com");
        assert!(config.enable_cors);
        assert!(config.dispatcher.process_pool.is_none());
    }
}
