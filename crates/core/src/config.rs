//! Renderer configuration.
//!
//! [`RendererConfig`] holds the few knobs the frame-construction core exposes.
//! Values start from [`Default`] and can be overridden through environment
//! variables with [`RendererConfig::from_env`].
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TESSERA_WORKERS` | [`worker_count`](RendererConfig::worker_count) |
//! | `TESSERA_SHADER_DIR` | [`shader_dir`](RendererConfig::shader_dir) |
//! | `TESSERA_MAX_ANISOTROPY` | [`max_anisotropy`](RendererConfig::max_anisotropy) |

use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::worker_pool::default_worker_count;

/// Environment variable overriding the worker thread count.
pub const ENV_WORKERS: &str = "TESSERA_WORKERS";
/// Environment variable overriding the shader directory.
pub const ENV_SHADER_DIR: &str = "TESSERA_SHADER_DIR";
/// Environment variable overriding the sampler anisotropy.
pub const ENV_MAX_ANISOTROPY: &str = "TESSERA_MAX_ANISOTROPY";

/// Configuration for the recording and upload core.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Number of recording worker threads, and of worker command pools the
    /// packer creates.
    pub worker_count: usize,
    /// Directory holding the compiled `material*.spv` shader pairs.
    pub shader_dir: PathBuf,
    /// Clear colour for the colour attachment, RGBA.
    pub clear_color: [f32; 4],
    /// Clear value for the depth attachment.
    pub clear_depth: f32,
    /// Requested sampler anisotropy. Values `<= 1.0` disable anisotropic filtering.
    pub max_anisotropy: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            shader_dir: PathBuf::from("shaders"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            max_anisotropy: 16.0,
        }
    }
}

impl RendererConfig {
    /// Builds a configuration from defaults plus `TESSERA_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed, or
    /// if the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from an arbitrary key lookup, then validates.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.worker_count = value.trim().parse().map_err(|e| {
                Error::Config(format!("{ENV_WORKERS}={value:?} is not a thread count: {e}"))
            })?;
            debug!("Worker count overridden to {}", self.worker_count);
        }

        if let Some(value) = lookup(ENV_SHADER_DIR) {
            self.shader_dir = PathBuf::from(value);
            debug!("Shader directory overridden to {:?}", self.shader_dir);
        }

        if let Some(value) = lookup(ENV_MAX_ANISOTROPY) {
            self.max_anisotropy = value.trim().parse().map_err(|e| {
                Error::Config(format!(
                    "{ENV_MAX_ANISOTROPY}={value:?} is not a number: {e}"
                ))
            })?;
        }

        self.validate()
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero worker count, an empty shader
    /// directory, a non-finite clear value or a negative/non-finite anisotropy.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.shader_dir.as_os_str().is_empty() {
            return Err(Error::Config("shader_dir must not be empty".to_string()));
        }
        if !self.clear_color.iter().all(|c| c.is_finite()) || !self.clear_depth.is_finite() {
            return Err(Error::Config("clear values must be finite".to_string()));
        }
        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(Error::Config(format!(
                "clear_depth {} is outside [0, 1]",
                self.clear_depth
            )));
        }
        if !self.max_anisotropy.is_finite() || self.max_anisotropy < 0.0 {
            return Err(Error::Config(format!(
                "max_anisotropy {} must be a non-negative number",
                self.max_anisotropy
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_count >= 1);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.clear_depth, 1.0);
        assert_eq!(config.max_anisotropy, 16.0);
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = RendererConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_WORKERS, "3"),
                (ENV_SHADER_DIR, "assets/spv"),
                (ENV_MAX_ANISOTROPY, "1"),
            ]))
            .unwrap();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.shader_dir, PathBuf::from("assets/spv"));
        assert_eq!(config.max_anisotropy, 1.0);
    }

    #[test]
    fn test_no_overrides_keeps_defaults() {
        let mut config = RendererConfig::default();
        config.apply_overrides(lookup(&[])).unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_unparsable_worker_count() {
        let mut config = RendererConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_WORKERS, "many")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = RendererConfig::default();
        assert!(config.apply_overrides(lookup(&[(ENV_WORKERS, "0")])).is_err());
    }

    #[test]
    fn test_invalid_clear_depth() {
        let config = RendererConfig {
            clear_depth: 2.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_anisotropy() {
        let config = RendererConfig {
            max_anisotropy: -4.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
