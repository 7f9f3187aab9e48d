use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use alumnet_chat::ThreadStrategy;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Server settings, read from `ALUMNET_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub thread_strategy: ThreadStrategy,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("ALUMNET_HOST", "0.0.0.0");
        let port: u16 = var("ALUMNET_PORT", "3000")
            .parse()
            .context("ALUMNET_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let thread_strategy: ThreadStrategy = var("ALUMNET_THREAD_STRATEGY", "lazy")
            .parse()
            .map_err(|e| anyhow!("ALUMNET_THREAD_STRATEGY: {}", e))?;

        let max_upload_bytes: usize = match lookup("ALUMNET_MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse()
                .context("ALUMNET_MAX_UPLOAD_BYTES must be a byte count")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            jwt_secret: var("ALUMNET_JWT_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("ALUMNET_DB_PATH", "alumnet.db")),
            addr,
            upload_dir: PathBuf::from(var("ALUMNET_UPLOAD_DIR", "./uploads")),
            public_url: var("ALUMNET_PUBLIC_URL", "http://localhost:3000"),
            thread_strategy,
            max_upload_bytes,
        })
    }
}
