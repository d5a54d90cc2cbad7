use std::fmt;
use std::time::Duration;

use camrender::{BufferSize, CameraIdentity, CapturePacing, PipelineOptions, DEFAULT_THREAD_NAME};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "camview.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSetting {
    Front,
    #[default]
    Back,
}

impl From<CameraSetting> for CameraIdentity {
    fn from(setting: CameraSetting) -> Self {
        match setting {
            CameraSetting::Front => CameraIdentity::Front,
            CameraSetting::Back => CameraIdentity::Back,
        }
    }
}

impl From<CameraIdentity> for CameraSetting {
    fn from(identity: CameraIdentity) -> Self {
        match identity {
            CameraIdentity::Front => CameraSetting::Front,
            CameraIdentity::Back => CameraSetting::Back,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub version: u32,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub camera: CameraSetting,
    /// Zero keeps the hardware repeating request; anything else paces
    /// single captures in software.
    #[serde(default)]
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RenderConfig {
    #[serde(default = "default_gl_version")]
    pub gl_version: u32,
    #[serde(default)]
    pub max_draw_fps: u32,
    #[serde(
        default = "default_report_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub fps_report_interval: Duration,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            camera: CameraSetting::default(),
            fps: 0,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            gl_version: default_gl_version(),
            max_draw_fps: 0,
            fps_report_interval: default_report_interval(),
            thread_name: default_thread_name(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            capture: CaptureConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

fn default_width() -> u32 {
    camrender::DEFAULT_CAPTURE_SIZE.width
}

fn default_height() -> u32 {
    camrender::DEFAULT_CAPTURE_SIZE.height
}

fn default_gl_version() -> u32 {
    3
}

fn default_report_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_thread_name() -> String {
    DEFAULT_THREAD_NAME.to_string()
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() || v.is_infinite() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PipelineConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture size {}x{} must be non-zero",
                self.capture.width, self.capture.height
            )));
        }

        if !matches!(self.render.gl_version, 2 | 3) {
            return Err(ConfigError::Invalid(format!(
                "gl_version {} is not supported; expected 2 or 3",
                self.render.gl_version
            )));
        }

        if self.render.fps_report_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "fps_report_interval must be greater than zero".into(),
            ));
        }

        if self.render.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }

        Ok(())
    }

    pub fn capture_size(&self) -> BufferSize {
        BufferSize::new(self.capture.width, self.capture.height)
    }

    pub fn pacing(&self) -> CapturePacing {
        CapturePacing::from_fps(self.capture.fps)
    }

    /// Pipeline options for this config. Camera permission is left to the
    /// caller.
    pub fn to_pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            thread_name: self.render.thread_name.clone(),
            identity: self.capture.camera.into(),
            capture_size: self.capture_size(),
            pacing: self.pacing(),
            gl_version: self.render.gl_version,
            max_draw_fps: self.render.max_draw_fps,
            fps_report_interval: self.render.fps_report_interval,
            ..PipelineOptions::default()
        }
    }
}
