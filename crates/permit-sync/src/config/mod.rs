pub mod profiles;

use secrecy::SecretString;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub use profiles::{
    AddressProfile, PaymentCard, ProfileError, PurchaseProfiles, PurchaseRequest, VehicleProfile,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub publish: PublishTarget,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");

        let data_dir = PathBuf::from(var_or("PERMIT_DATA_DIR", "data"));
        let archive_dir = env::var("PERMIT_ARCHIVE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("archive"));
        let storage = StorageConfig {
            download_dir: PathBuf::from(var_or("PERMIT_DOWNLOAD_DIR", ".")),
            profile_dir: PathBuf::from(var_or("PERMIT_PROFILE_DIR", ".")),
            archive_dir,
            data_dir,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            storage,
            publish: PublishTarget::from_env(),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Log filter and formatting controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Local directories the pipeline reads from and writes to.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Holds `permit.json`, `history.json` and the pending-publish marker.
    pub data_dir: PathBuf,
    /// Searched for freshly downloaded permit receipts.
    pub download_dir: PathBuf,
    /// Receives receipts once their record has been published.
    pub archive_dir: PathBuf,
    /// Holds the vehicle, payment card and address JSON files.
    pub profile_dir: PathBuf,
}

/// Coordinates of the file the display firmware fetches from GitHub.
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
    pub token: SecretString,
}

impl GitHubSettings {
    pub fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.path.trim_start_matches('/')
        )
    }

    /// Public, unauthenticated location readers fetch the published record from.
    pub fn public_url(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            self.owner,
            self.repo,
            self.branch,
            self.path.trim_start_matches('/')
        )
    }
}

/// Where the current record is pushed after it has been stored.
#[derive(Debug, Clone)]
pub enum PublishTarget {
    GitHub(GitHubSettings),
    Directory(PathBuf),
    Disabled,
}

impl PublishTarget {
    fn from_env() -> Self {
        if let Some(token) = env::var("GITHUB_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            return Self::GitHub(GitHubSettings {
                api_base: var_or("PERMIT_GITHUB_API", "https://api.github.com"),
                owner: var_or("PERMIT_GITHUB_OWNER", "VisTechProjects"),
                repo: var_or("PERMIT_GITHUB_REPO", "parking_pass_display"),
                branch: var_or("PERMIT_GITHUB_BRANCH", "permit"),
                path: var_or("PERMIT_GITHUB_PATH", "permit.json"),
                token: SecretString::from(token),
            });
        }

        match env::var("PERMIT_PUBLISH_DIR") {
            Ok(dir) if !dir.trim().is_empty() => Self::Directory(PathBuf::from(dir)),
            _ => Self::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
