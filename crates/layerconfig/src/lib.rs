use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Texture units available to a layer.
pub const MAX_CHANNELS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerConfig {
    pub version: u32,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_interval: Option<Duration>,
    /// Defaults: a number or an array of 1-4 numbers. Shapes are checked by
    /// the engine.
    #[serde(default)]
    pub uniforms: BTreeMap<String, serde_json::Value>,
    /// Keyed by sampler name; texture units follow name order.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    /// Directory relative paths resolve against; set by [`LayerConfig::load`].
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Slippy-map template with `{s}`, `{x}`, `{y}`, `{-y}` and `{z}`.
    Xyz {
        url: String,
        #[serde(default)]
        subdomains: Vec<String>,
    },
    Wms(WmsChannel),
    /// One image file used for every tile.
    Image { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WmsChannel {
    pub url: String,
    #[serde(default)]
    pub layers: String,
    #[serde(default)]
    pub styles: String,
    #[serde(default = "default_wms_format")]
    pub format: String,
    #[serde(default)]
    pub transparent: bool,
    #[serde(default = "default_wms_version")]
    pub version: String,
    #[serde(default = "default_wms_srs")]
    pub srs: String,
    /// Vendor parameters such as `filter`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_tile_size() -> u32 {
    256
}

fn default_wms_format() -> String {
    "image/jpeg".to_string()
}

fn default_wms_version() -> String {
    "1.1.1".to_string()
}

fn default_wms_srs() -> String {
    "EPSG:3857".to_string()
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of milliseconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v / 1000.0)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl LayerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: LayerConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a config file; relative paths in it resolve
    /// against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = read(path)?;
        let mut config = Self::from_toml_str(&input)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Vertex and fragment shader sources.
    pub fn read_shaders(&self) -> Result<(String, String), ConfigError> {
        let vertex = read(&self.resolve_path(&self.vertex_shader))?;
        let fragment = read(&self.resolve_path(&self.fragment_shader))?;
        Ok((vertex, fragment))
    }

    /// Channels in texture-unit order.
    pub fn ordered_channels(&self) -> impl Iterator<Item = (&str, &ChannelConfig)> {
        self.channels.iter().map(|(name, channel)| (name.as_str(), channel))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if !self.tile_size.is_power_of_two() || !(64..=4096).contains(&self.tile_size) {
            return Err(ConfigError::Invalid(format!(
                "tile_size {} must be a power of two between 64 and 4096",
                self.tile_size
            )));
        }

        if self.vertex_shader.as_os_str().is_empty() || self.fragment_shader.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "vertex_shader and fragment_shader must both be set".into(),
            ));
        }

        if let Some(interval) = self.frame_interval {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(
                    "frame_interval must be greater than zero".into(),
                ));
            }
        }

        if self.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::Invalid(format!(
                "{} channels configured; at most {MAX_CHANNELS} are supported",
                self.channels.len()
            )));
        }

        for (name, channel) in &self.channels {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("channel name may not be empty".into()));
            }
            match channel {
                ChannelConfig::Xyz { url, .. } | ChannelConfig::Wms(WmsChannel { url, .. }) => {
                    if url.trim().is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "channel '{name}' must have a url"
                        )));
                    }
                }
                ChannelConfig::Image { path } => {
                    if path.as_os_str().is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "channel '{name}' must have a path"
                        )));
                    }
                }
            }
        }

        for extension in &self.extensions {
            if extension.trim().is_empty() {
                return Err(ConfigError::Invalid("extension names may not be empty".into()));
            }
        }

        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
