use clap::Parser;
use lib_common::configs::settings::{
    AlertSettings, BackupSettings, CollectionMapping, ConnectionSettings, MonitorSettings,
    ProviderSettings, Settings, SinkSettings, SourceSettings, StreamSettings, SyncSettings,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// CLI/env/file configuration for the sync server. Scalar values can be set
/// anywhere; structured values (collection mappings, providers, alert
/// channels) come from the JSON config file.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "TickBridge synchronization and monitoring server", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "SYNC_PORT", help = "Port for the WebSocket push channel and monitoring API.")]
    pub port: Option<u16>,

    #[clap(long, env = "SYNC_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SYNC_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SYNC_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SYNC_DATA_DIR", help = "Directory for the monitoring store and watermarks.")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, env = "SOURCE_URL", help = "Base URL of the time-series store query endpoint.")]
    pub source_url: Option<String>,

    #[clap(long, env = "SOURCE_USERNAME", help = "Basic-auth username for the time-series store.")]
    pub source_username: Option<String>,

    #[clap(long, env = "SOURCE_PASSWORD", help = "Basic-auth password for the time-series store.")]
    pub source_password: Option<String>,

    #[clap(long, env = "SINK_URL", help = "Base URL of the record store API.")]
    pub sink_url: Option<String>,

    #[clap(long, env = "SINK_ADMIN_IDENTITY", help = "Admin identity for record store authentication.")]
    pub sink_admin_identity: Option<String>,

    #[clap(long, env = "SINK_ADMIN_PASSWORD", help = "Admin password for record store authentication.")]
    pub sink_admin_password: Option<String>,

    #[clap(long, env = "SYNC_POLL_INTERVAL_SECONDS", help = "Live provider polling interval in seconds.")]
    pub poll_interval_seconds: Option<u64>,

    #[clap(long, env = "SYNC_INTERVAL_SECONDS", help = "Incremental sync interval in seconds.")]
    pub sync_interval_seconds: Option<u64>,

    #[clap(long, env = "SYNC_LIVENESS_INTERVAL_SECONDS", help = "Liveness health probe interval in seconds.")]
    pub liveness_interval_seconds: Option<u64>,

    #[clap(long, env = "SYNC_CYCLE_INTERVAL_SECONDS", help = "Full monitoring cycle interval in seconds.")]
    pub cycle_interval_seconds: Option<u64>,

    #[clap(long, env = "SYNC_PAGE_SIZE", help = "Rows fetched per source page during sync.")]
    pub page_size: Option<usize>,

    #[clap(long, env = "SYNC_MAX_RETRIES", help = "Retries after the first attempt for a failing batch.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "SYNC_QUALITY_FLOOR", help = "Integrity quality floor triggering warning alerts.")]
    pub quality_floor: Option<f64>,

    #[clap(long, env = "SYNC_BACKUP_DIR", help = "Directory receiving backup archives.")]
    pub backup_dir: Option<PathBuf>,

    // Structured sections, only settable through the config file.
    #[clap(skip)]
    pub mappings: Option<Vec<CollectionMapping>>,
    #[clap(skip)]
    pub providers: Option<Vec<ProviderSettings>>,
    #[clap(skip)]
    pub alerts: Option<AlertSettings>,
    #[clap(skip)]
    pub connection: Option<ConnectionSettings>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            data_dir: other.data_dir.or(self.data_dir),
            source_url: other.source_url.or(self.source_url),
            source_username: other.source_username.or(self.source_username),
            source_password: other.source_password.or(self.source_password),
            sink_url: other.sink_url.or(self.sink_url),
            sink_admin_identity: other.sink_admin_identity.or(self.sink_admin_identity),
            sink_admin_password: other.sink_admin_password.or(self.sink_admin_password),
            poll_interval_seconds: other.poll_interval_seconds.or(self.poll_interval_seconds),
            sync_interval_seconds: other.sync_interval_seconds.or(self.sync_interval_seconds),
            liveness_interval_seconds: other
                .liveness_interval_seconds
                .or(self.liveness_interval_seconds),
            cycle_interval_seconds: other.cycle_interval_seconds.or(self.cycle_interval_seconds),
            page_size: other.page_size.or(self.page_size),
            max_retries: other.max_retries.or(self.max_retries),
            quality_floor: other.quality_floor.or(self.quality_floor),
            backup_dir: other.backup_dir.or(self.backup_dir),
            mappings: other.mappings.or(self.mappings),
            providers: other.providers.or(self.providers),
            alerts: other.alerts.or(self.alerts),
            connection: other.connection.or(self.connection),
        }
    }

    /// Converts the merged config into validated [`Settings`]. Missing
    /// required values are fatal: the server refuses to start.
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        let source_url = self
            .source_url
            .ok_or_else(|| anyhow::anyhow!("missing required configuration value: sourceUrl"))?;
        let sink_url = self
            .sink_url
            .ok_or_else(|| anyhow::anyhow!("missing required configuration value: sinkUrl"))?;
        let admin_identity = self.sink_admin_identity.ok_or_else(|| {
            anyhow::anyhow!("missing required configuration value: sinkAdminIdentity")
        })?;
        let admin_password = self.sink_admin_password.ok_or_else(|| {
            anyhow::anyhow!("missing required configuration value: sinkAdminPassword")
        })?;

        let mut sync = SyncSettings {
            mappings: self.mappings.unwrap_or_default(),
            ..SyncSettings::default()
        };
        if let Some(v) = self.page_size {
            sync.page_size = v;
        }
        if let Some(v) = self.max_retries {
            sync.max_retries = v;
        }
        if let Some(v) = self.sync_interval_seconds {
            sync.interval_secs = v;
        }

        let mut stream = StreamSettings {
            providers: self.providers.unwrap_or_default(),
            ..StreamSettings::default()
        };
        if let Some(v) = self.poll_interval_seconds {
            stream.poll_interval_secs = v;
        }

        let mut monitor = MonitorSettings::default();
        if let Some(v) = self.liveness_interval_seconds {
            monitor.liveness_interval_secs = v;
        }
        if let Some(v) = self.cycle_interval_seconds {
            monitor.cycle_interval_secs = v;
        }
        if let Some(v) = self.quality_floor {
            monitor.quality_floor = v;
        }

        let mut backup = BackupSettings::default();
        if let Some(dir) = self.backup_dir {
            backup.dir = dir;
        }

        let settings = Settings {
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("./data")),
            source: SourceSettings {
                base_url: source_url,
                username: self.source_username,
                password: self.source_password,
            },
            sink: SinkSettings { base_url: sink_url, admin_identity, admin_password },
            connection: self.connection.unwrap_or_default(),
            sync,
            stream,
            monitor,
            alerts: self.alerts.unwrap_or_default(),
            backup,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Server-only knobs that never reach the library settings.
pub struct ServerOptions {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
}

/// Loads configuration: defaults, then the JSON config file (if present),
/// then environment variables and CLI arguments.
pub fn load_config() -> (Config, ServerOptions) {
    let default_config = Config {
        port: Some(9100),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ..Default::default()
    };

    // Parse CLI early to honor a --config-path override for the file step.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_sync.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => {
                    current_config = current_config.merge(file_config);
                }
                Err(err) => {
                    eprintln!(
                        "Failed to parse config file {}: {}. Falling back to other sources.",
                        config_file_path.display(),
                        err
                    );
                }
            },
            Err(err) => {
                eprintln!(
                    "Failed to read config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    err
                );
            }
        }
    }

    // Environment variables and CLI arguments win over the file.
    current_config = current_config.merge(cli_args);

    let options = ServerOptions {
        port: current_config.port.unwrap_or(9100),
        log_dir: current_config
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./logs")),
        log_level: current_config
            .log_level
            .clone()
            .unwrap_or_else(|| "info".to_string()),
    };
    (current_config, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config {
            source_url: Some("http://localhost:9000/".into()),
            sink_url: Some("http://localhost:8090/api/".into()),
            sink_admin_identity: Some("admin@example.com".into()),
            sink_admin_password: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn minimal_config_becomes_valid_settings() {
        let settings = minimal().into_settings().unwrap();
        assert_eq!(settings.sync.page_size, 1000);
        assert_eq!(settings.monitor.quality_floor, 0.95);
    }

    #[test]
    fn missing_source_url_refuses_to_start() {
        let mut config = minimal();
        config.source_url = None;
        let err = config.into_settings().unwrap_err();
        assert!(err.to_string().contains("sourceUrl"));
    }

    #[test]
    fn file_values_lose_to_cli_overrides() {
        let from_file = Config { page_size: Some(200), ..minimal() };
        let from_cli = Config { page_size: Some(50), ..Default::default() };
        let merged = from_file.merge(from_cli);
        assert_eq!(merged.page_size, Some(50));
        // Untouched values survive the merge.
        assert_eq!(merged.source_url.as_deref(), Some("http://localhost:9000/"));
    }

    #[test]
    fn structured_sections_parse_from_json() {
        let raw = serde_json::json!({
            "sourceUrl": "http://localhost:9000/",
            "mappings": [{"table": "stock_ticks", "collection": "ticks"}],
            "providers": [{"name": "gpw", "url": "http://localhost:7000/ticks", "collection": "live_ticks"}]
        });
        let config: Config = serde_json::from_value(raw).unwrap();
        assert_eq!(config.mappings.as_ref().unwrap().len(), 1);
        assert_eq!(config.providers.as_ref().unwrap()[0].name, "gpw");
    }
}
