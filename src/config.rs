use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub ws_path: String,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub poll_interval_ms: u64,
    pub max_block_range: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let rpc_url = lookup("RPC_URL")
            .or_else(|| lookup("PULSECHAIN_RPC_URL"))
            .ok_or_else(|| ServerError::Config("RPC_URL is not defined".to_string()))?;

        Ok(Config {
            server: ServerConfig {
                port: parse("PORT", &var("PORT", "3001"))?,
                ws_path: var("WS_PATH", "ws").trim_matches('/').to_string(),
                cors_origins: var("CORS_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            chain: ChainConfig {
                rpc_url,
                poll_interval_ms: parse("POLL_INTERVAL_MS", &var("POLL_INTERVAL_MS", "2000"))?,
                max_block_range: parse("MAX_BLOCK_RANGE", &var("MAX_BLOCK_RANGE", "500"))?,
            },
            health: HealthConfig {
                path: var("HEALTH_PATH", "/health"),
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ServerError::Config("Port must be valid".to_string()));
        }

        if !is_path_segment(&self.server.ws_path) {
            return Err(ServerError::Config(format!(
                "WS_PATH must be a single path segment, got '{}'",
                self.server.ws_path
            )));
        }

        if !is_path_segment(self.health.path.trim_start_matches('/')) {
            return Err(ServerError::Config(format!(
                "HEALTH_PATH must be a single path segment, got '{}'",
                self.health.path
            )));
        }

        if let Some(origin) = self
            .server
            .cors_origins
            .iter()
            .find(|o| o.as_str() != "*" && !o.contains("://"))
        {
            return Err(ServerError::Config(format!(
                "CORS origin '{}' must include a scheme",
                origin
            )));
        }

        if self.chain.rpc_url.trim().is_empty() {
            return Err(ServerError::Config("RPC URL must not be empty".to_string()));
        }

        if self.chain.poll_interval_ms == 0 {
            return Err(ServerError::Config(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.chain.max_block_range == 0 {
            return Err(ServerError::Config(
                "Max block range must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn mask_rpc_url(&self) -> String {
        let url = &self.chain.rpc_url;
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
            }
            _ => url.clone(),
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.server.cors_origins.iter().any(|o| o == "*")
    }
}

fn is_path_segment(path: &str) -> bool {
    !path.is_empty() && !path.contains('/')
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ServerError::Config(format!("Invalid value for {}: {}", key, e)))
}
