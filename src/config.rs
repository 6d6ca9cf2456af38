//! CLI arguments and service configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_UPLOAD_DIR: &str = "audio/uploads";
pub const DEFAULT_API_PREFIX: &str = "/thingx/api";
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 1024 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "audio-depot", version = VERSION_INFO, about = "Audio recording upload service")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "UPLOAD_DIR",
        default_value = DEFAULT_UPLOAD_DIR,
        help = "Directory where uploaded recordings are stored"
    )]
    pub upload_dir: String,
    #[arg(
        long,
        env = "PUBLIC_BASE_URL",
        help = "Absolute base URL used for file links (e.g. https://api.example.com)"
    )]
    pub public_base_url: Option<String>,
    #[arg(
        long,
        env = "DEPOT_API_PREFIX",
        default_value = DEFAULT_API_PREFIX,
        help = "Path prefix for all API routes"
    )]
    pub api_prefix: String,
    #[arg(
        short = 'b',
        long,
        env = "DEPOT_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "DEPOT_HTTP_PORT",
        default_value_t = 8000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(long, env = "DEPOT_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "DEPOT_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub max_upload_size: usize,
}

/// 启动时解析一次、之后只读的服务配置。
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub upload_dir: PathBuf,
    pub public_base_url: Option<String>,
    pub api_prefix: String,
}

impl Args {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            upload_dir: PathBuf::from(&self.upload_dir),
            public_base_url: self
                .public_base_url
                .as_deref()
                .map(|url| url.trim().trim_end_matches('/'))
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            api_prefix: normalize_prefix(&self.api_prefix),
        }
    }
}

/// 统一为 `/a/b` 形式；空串表示挂载在根路径。
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
