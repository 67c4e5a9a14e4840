use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server settings, read from `GLIMMER_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub cors_origin: String,
    pub session_ttl_hours: u64,
    pub secure_cookies: bool,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let max_upload_mb: usize = get("GLIMMER_MAX_UPLOAD_MB", "10")
            .parse()
            .context("GLIMMER_MAX_UPLOAD_MB must be a whole number")?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .context("GLIMMER_MAX_UPLOAD_MB is too large")?;

        Ok(Self {
            host: get("GLIMMER_HOST", "0.0.0.0"),
            port: get("GLIMMER_PORT", "5555")
                .parse()
                .context("GLIMMER_PORT must be a port number")?,
            db_path: get("GLIMMER_DB_PATH", "glimmer.db").into(),
            upload_dir: get("GLIMMER_UPLOAD_DIR", "./static/uploads").into(),
            cors_origin: get("GLIMMER_CORS_ORIGIN", "http://localhost:3000"),
            session_ttl_hours: get("GLIMMER_SESSION_TTL_HOURS", "720")
                .parse()
                .context("GLIMMER_SESSION_TTL_HOURS must be a whole number")?,
            secure_cookies: get("GLIMMER_SECURE_COOKIES", "false")
                .parse()
                .context("GLIMMER_SECURE_COOKIES must be true or false")?,
            max_upload_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 5555);
        assert_eq!(cfg.db_path, PathBuf::from("glimmer.db"));
        assert_eq!(cfg.cors_origin, "http://localhost:3000");
        assert_eq!(cfg.session_ttl_hours, 720);
        assert!(!cfg.secure_cookies);
        assert_eq!(cfg.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("GLIMMER_PORT", "8080"),
            ("GLIMMER_SECURE_COOKIES", "true"),
            ("GLIMMER_UPLOAD_DIR", "/var/glimmer/uploads"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.secure_cookies);
        assert_eq!(cfg.upload_dir, PathBuf::from("/var/glimmer/uploads"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(config(&[("GLIMMER_PORT", "http")]).is_err());
        assert!(config(&[("GLIMMER_SESSION_TTL_HOURS", "-1")]).is_err());
        assert!(config(&[("GLIMMER_SECURE_COOKIES", "yes")]).is_err());
    }

    #[test]
    fn oversized_upload_limit_is_an_error() {
        let huge = usize::MAX.to_string();
        assert!(config(&[("GLIMMER_MAX_UPLOAD_MB", huge.as_str())]).is_err());
        assert_eq!(
            config(&[("GLIMMER_MAX_UPLOAD_MB", "25")]).unwrap().max_upload_bytes,
            25 * 1024 * 1024
        );
    }
}
