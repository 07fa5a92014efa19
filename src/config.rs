//! Store configuration (spec §8, "config"), read once at process start from
//! the environment the same way the teacher's `Config::from_env` builds its
//! settings: required/optional env-var helpers, path resolution relative to
//! a base directory, and an `ENV_LOCK`-guarded test module since env vars are
//! process-global state.

use anyhow::{anyhow, Context, Result};
use std::{
    env,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory the store lives under; the versioned `v<N>/` and
    /// `saved`/`p<pid>` leaf directories are resolved relative to this
    /// (spec §4.1).
    pub store_root: PathBuf,

    /// Opens the store read-only: skips the pid-scoped workdir claim and
    /// opens `saved/` directly without renaming it (spec §4.1).
    pub readonly: bool,

    /// Initial LMDB memory map size in bytes, doubled on `MapFull` up to
    /// `max_map_growths` times (spec §6).
    pub initial_map_size: usize,
    pub max_map_growths: u32,

    /// Visibility mode (spec §4.8): when `explicit_output_mode` is false,
    /// visibility is governed by registered main files; when true, by
    /// registered unit output paths instead. The two modes are mutually
    /// exclusive for a given store.
    pub explicit_output_mode: bool,

    /// Watches `watch_roots` for file-system changes and re-checks affected
    /// units automatically (spec §4.6).
    pub watch_mode: bool,
    pub watch_debounce_ms: u64,
    pub watch_roots: Vec<PathBuf>,

    /// Number of units imported per `ArtifactRepository::register_unit`
    /// batch before yielding back to the ingest queue's scheduler.
    pub ingest_batch_size: usize,

    pub metrics_enabled: bool,
    pub metrics_port: u16,

    /// Port the JSON/HTTP client API listens on (spec §6, "Client API").
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_root_raw = required_env("STORE_ROOT")?;
        let store_root = canonicalize_dir(Path::new(&store_root_raw))
            .with_context(|| format!("Invalid STORE_ROOT: {store_root_raw}"))?;

        let readonly = optional_env("READONLY")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(false);

        let initial_map_size = optional_env("INITIAL_MAP_SIZE_BYTES")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(64 * 1024 * 1024);

        let max_map_growths = optional_env("MAX_MAP_GROWTHS")
            .as_deref()
            .map(parse_u32)
            .transpose()?
            .unwrap_or(6);

        let explicit_output_mode = optional_env("EXPLICIT_OUTPUT_MODE")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(false);

        let watch_mode = optional_env("WATCH_MODE")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(true);

        let watch_debounce_ms = optional_env("WATCH_DEBOUNCE_MS")
            .as_deref()
            .map(parse_u64)
            .transpose()?
            .unwrap_or(250);

        let mut watch_roots = vec![store_root.clone()];
        if let Some(roots_raw) = optional_env("WATCH_ROOTS") {
            for raw in parse_csv(&roots_raw) {
                let dir = canonicalize_dir(Path::new(&raw))
                    .with_context(|| format!("Invalid WATCH_ROOTS entry: {raw}"))?;
                if !watch_roots.contains(&dir) {
                    watch_roots.push(dir);
                }
            }
        }

        let ingest_batch_size = optional_env("INGEST_BATCH_SIZE")
            .as_deref()
            .map(parse_usize)
            .transpose()?
            .unwrap_or(10);

        let metrics_enabled = optional_env("METRICS_ENABLED")
            .as_deref()
            .map(parse_bool)
            .transpose()?
            .unwrap_or(true);

        let metrics_port = optional_env("METRICS_PORT")
            .as_deref()
            .map(parse_u16)
            .transpose()?
            .unwrap_or(9090);

        let api_port = optional_env("CLIENT_API_PORT")
            .as_deref()
            .map(parse_u16)
            .transpose()?
            .unwrap_or(8080);

        Ok(Self {
            store_root,
            readonly,
            initial_map_size,
            max_map_growths,
            explicit_output_mode,
            watch_mode,
            watch_debounce_ms,
            watch_roots,
            ingest_batch_size,
            metrics_enabled,
            metrics_port,
            api_port,
        })
    }

    pub fn normalize_path_to_store_root(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.store_root.join(path)
        }
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("Missing required env var: {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|v| {
        let v = v.trim().to_string();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

fn canonicalize_dir(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .context("Failed to get current_dir")?
            .join(path)
    };
    let meta = std::fs::metadata(&path)
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    if !meta.is_dir() {
        return Err(anyhow!("Expected directory, got file: {}", path.display()));
    }
    path.canonicalize()
        .with_context(|| format!("Failed to canonicalize: {}", path.display()))
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_usize(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_u32(value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| anyhow!("Invalid integer '{value}': {err}"))
}

fn parse_u16(value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|err| anyhow!("Invalid port '{value}': {err}"))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => Err(anyhow!("Invalid boolean '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn tmp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "indexstore-config-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn clear_env() {
        for k in [
            "STORE_ROOT",
            "READONLY",
            "INITIAL_MAP_SIZE_BYTES",
            "MAX_MAP_GROWTHS",
            "EXPLICIT_OUTPUT_MODE",
            "WATCH_MODE",
            "WATCH_DEBOUNCE_MS",
            "WATCH_ROOTS",
            "INGEST_BATCH_SIZE",
            "METRICS_ENABLED",
            "METRICS_PORT",
        ] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn from_env_requires_store_root() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let err = Config::from_env().unwrap_err().to_string();
        assert!(err.contains("STORE_ROOT"));
    }

    #[test]
    fn from_env_applies_defaults() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let base = tmp_dir();
        std::env::set_var("STORE_ROOT", base.to_string_lossy().to_string());

        let cfg = Config::from_env().unwrap();
        assert!(!cfg.readonly);
        assert_eq!(cfg.initial_map_size, 64 * 1024 * 1024);
        assert_eq!(cfg.max_map_growths, 6);
        assert!(!cfg.explicit_output_mode);
        assert!(cfg.watch_mode);
        assert_eq!(cfg.watch_debounce_ms, 250);
        assert_eq!(cfg.watch_roots, vec![cfg.store_root.clone()]);
        assert_eq!(cfg.ingest_batch_size, 10);
        assert!(cfg.metrics_enabled);
        assert_eq!(cfg.metrics_port, 9090);
        assert_eq!(cfg.api_port, 8080);
    }

    #[test]
    fn watch_roots_parses_and_dedupes() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let base = tmp_dir();
        let extra = tmp_dir();
        std::env::set_var("STORE_ROOT", base.to_string_lossy().to_string());
        std::env::set_var(
            "WATCH_ROOTS",
            format!(
                "  {} , {} , {} ",
                extra.to_string_lossy(),
                extra.to_string_lossy(),
                base.to_string_lossy()
            ),
        );

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.watch_roots.len(), 2);
        let extra_c = extra.canonicalize().unwrap_or(extra);
        assert!(cfg.watch_roots.contains(&cfg.store_root));
        assert!(cfg.watch_roots.contains(&extra_c));
    }

    #[test]
    fn bool_parsing_accepts_multiple_spellings() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let base = tmp_dir();
        std::env::set_var("STORE_ROOT", base.to_string_lossy().to_string());
        std::env::set_var("READONLY", "yes");
        std::env::set_var("EXPLICIT_OUTPUT_MODE", "1");
        let cfg = Config::from_env().unwrap();
        assert!(cfg.readonly);
        assert!(cfg.explicit_output_mode);
    }

    #[test]
    fn invalid_map_growths_is_rejected() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let base = tmp_dir();
        std::env::set_var("STORE_ROOT", base.to_string_lossy().to_string());
        std::env::set_var("MAX_MAP_GROWTHS", "not-a-number");
        assert!(Config::from_env().is_err());
    }
}
