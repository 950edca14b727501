use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// DEFAULT SERVICE SETTINGS
// ============================================================================

/// Default OpenAI API base (transcription and speech synthesis)
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default transcription model for the OpenAI flavor
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Default Azure deployment name for the Whisper model
pub const DEFAULT_AZURE_DEPLOYMENT: &str = "whisper";

/// Default Azure OpenAI API version
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// Transcription language hint
pub const DEFAULT_TRANSCRIPTION_LANGUAGE: &str = "en";

/// Client-side timeout for a transcription request
pub const DEFAULT_TRANSCRIPTION_TIMEOUT_SECS: f64 = 30.0;

/// Default speech synthesis model and voice
pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_TTS_VOICE: &str = "alloy";

/// Client-side timeout for a speech synthesis request
pub const DEFAULT_SYNTHESIS_TIMEOUT_SECS: f64 = 30.0;

/// Client-side timeout for a chat request
pub const DEFAULT_CHAT_TIMEOUT_SECS: f64 = 60.0;

// ============================================================================
// STORAGE
// ============================================================================

/// Directory name under the platform data dir
pub const APP_DIR_NAME: &str = "voicechat-widget";

/// Optional settings file inside the data dir
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Storage key for the persisted conversation
pub const CHAT_STORAGE_KEY: &str = "mas_chat_messages";

/// Storage key for the persisted display mode
pub const DISPLAY_MODE_STORAGE_KEY: &str = "mas_display_mode";

// ============================================================================

fn seconds_to_duration_or(seconds: f64, fallback: Duration) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return fallback;
    }
    Duration::from_secs_f64(seconds)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn trim_trailing_slash(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// How the chat panel is laid out.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    #[default]
    Popup,
    FullScreen,
}

impl DisplayMode {
    pub fn toggled(self) -> Self {
        match self {
            DisplayMode::Popup => DisplayMode::FullScreen,
            DisplayMode::FullScreen => DisplayMode::Popup,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Popup => "popup",
            DisplayMode::FullScreen => "full-screen",
        }
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "popup" => Ok(DisplayMode::Popup),
            "full-screen" | "fullscreen" => Ok(DisplayMode::FullScreen),
            other => Err(format!("Unknown display mode '{}'", other)),
        }
    }
}

/// Which flavor of OpenAI-compatible speech-to-text endpoint to call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeechFlavor {
    #[default]
    OpenAi,
    Azure,
}

/// Speech-to-text service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechToTextSettings {
    pub flavor: SpeechFlavor,
    /// API base (OpenAI) or resource endpoint (Azure)
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Azure deployment name
    pub deployment: String,
    /// Azure API version query parameter
    pub api_version: String,
    pub model: String,
    pub language: String,
    pub timeout_seconds: f64,
}

impl Default for SpeechToTextSettings {
    fn default() -> Self {
        Self {
            flavor: SpeechFlavor::OpenAi,
            endpoint: None,
            api_key: None,
            deployment: DEFAULT_AZURE_DEPLOYMENT.to_string(),
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            model: DEFAULT_STT_MODEL.to_string(),
            language: DEFAULT_TRANSCRIPTION_LANGUAGE.to_string(),
            timeout_seconds: DEFAULT_TRANSCRIPTION_TIMEOUT_SECS,
        }
    }
}

impl SpeechToTextSettings {
    /// Check that an endpoint and a credential are available.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transcription_url()?;
        self.require_api_key()?;
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        non_blank(self.api_key.as_deref()).ok_or(ConfigError::missing("speech-to-text API key"))
    }

    /// Full URL of the transcription endpoint.
    pub fn transcription_url(&self) -> Result<String, ConfigError> {
        match self.flavor {
            SpeechFlavor::OpenAi => {
                let base = non_blank(self.endpoint.as_deref()).unwrap_or(DEFAULT_OPENAI_BASE_URL);
                Ok(format!("{}/audio/transcriptions", trim_trailing_slash(base)))
            }
            SpeechFlavor::Azure => {
                let endpoint = non_blank(self.endpoint.as_deref())
                    .ok_or(ConfigError::missing("Azure OpenAI endpoint"))?;
                let deployment = non_blank(Some(&self.deployment))
                    .ok_or(ConfigError::missing("Azure OpenAI deployment"))?;
                let api_version = non_blank(Some(&self.api_version))
                    .ok_or(ConfigError::missing("Azure OpenAI API version"))?;
                Ok(format!(
                    "{}/openai/deployments/{}/audio/transcriptions?api-version={}",
                    trim_trailing_slash(endpoint),
                    deployment,
                    api_version
                ))
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        seconds_to_duration_or(
            self.timeout_seconds,
            Duration::from_secs_f64(DEFAULT_TRANSCRIPTION_TIMEOUT_SECS),
        )
    }
}

/// Text-to-speech service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextToSpeechSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub timeout_seconds: f64,
}

impl Default for TextToSpeechSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: DEFAULT_TTS_MODEL.to_string(),
            voice: DEFAULT_TTS_VOICE.to_string(),
            timeout_seconds: DEFAULT_SYNTHESIS_TIMEOUT_SECS,
        }
    }
}

impl TextToSpeechSettings {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        non_blank(self.api_key.as_deref()).ok_or(ConfigError::missing("text-to-speech API key"))
    }

    pub fn speech_url(&self) -> String {
        let base = non_blank(self.base_url.as_deref()).unwrap_or(DEFAULT_OPENAI_BASE_URL);
        format!("{}/audio/speech", trim_trailing_slash(base))
    }

    pub fn timeout(&self) -> Duration {
        seconds_to_duration_or(
            self.timeout_seconds,
            Duration::from_secs_f64(DEFAULT_SYNTHESIS_TIMEOUT_SECS),
        )
    }
}

/// Errors loading a settings file
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// All widget settings, resolved from defaults, settings file and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WidgetSettings {
    /// Base URL of the chatbot API (`{base}/chat`)
    pub api_base_url: Option<String>,
    /// Optional bearer token for the chatbot API
    pub chat_api_key: Option<String>,
    pub chat_timeout_seconds: Option<f64>,
    pub stt: SpeechToTextSettings,
    pub tts: TextToSpeechSettings,
    /// Display mode used when nothing has been persisted yet
    pub display_mode: DisplayMode,
    pub data_dir: Option<PathBuf>,
}

impl WidgetSettings {
    /// Resolve settings in order: defaults, settings file, build-time values, environment.
    ///
    /// An explicit `settings_file` must exist and parse; the implicit one in the
    /// data dir is optional and a broken one is logged and ignored. `data_dir`
    /// (from the command line) wins over `VOICECHAT_DATA_DIR`, which wins over
    /// the platform default, both for locating the implicit file and for storage.
    pub fn load(settings_file: Option<&Path>, data_dir: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with(settings_file, data_dir, |key| std::env::var(key).ok())
    }

    fn load_with(
        settings_file: Option<&Path>,
        data_dir: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let mut settings = match settings_file {
            Some(path) => Self::read_file(path)?,
            None => {
                let dir = match data_dir {
                    Some(dir) => dir.to_path_buf(),
                    None => non_blank(env("VOICECHAT_DATA_DIR").as_deref())
                        .map(PathBuf::from)
                        .unwrap_or_else(default_data_dir),
                };
                let implicit = dir.join(SETTINGS_FILE_NAME);
                if implicit.exists() {
                    Self::read_file(&implicit).unwrap_or_else(|e| {
                        log::warn!("Ignoring settings file: {}", e);
                        Self::default()
                    })
                } else {
                    Self::default()
                }
            }
        };

        settings.apply_overrides(|key| build_time_value(key).map(str::to_string));
        settings.apply_overrides(&env);
        if let Some(dir) = data_dir {
            settings.data_dir = Some(dir.to_path_buf());
        }
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `KEY=value` overrides. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && v != "undefined")
        };

        if let Some(v) = get("API_BASE_URL") {
            self.api_base_url = Some(v);
        }
        if let Some(v) = get("CHAT_API_KEY") {
            self.chat_api_key = Some(v);
        }

        // Azure first: its presence switches the transcription flavor.
        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.stt.flavor = SpeechFlavor::Azure;
            self.stt.endpoint = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
            self.stt.api_version = v;
        }
        if let Some(v) = get("AZURE_OPENAI_WHISPER_DEPLOYMENT") {
            self.stt.deployment = v;
        }
        if self.stt.flavor == SpeechFlavor::Azure {
            if let Some(v) = get("AZURE_OPENAI_API_KEY") {
                self.stt.api_key = Some(v);
            }
        }

        if let Some(v) = get("OPENAI_API_KEY") {
            if self.stt.flavor == SpeechFlavor::OpenAi {
                self.stt.api_key = Some(v.clone());
            }
            self.tts.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            if self.stt.flavor == SpeechFlavor::OpenAi {
                self.stt.endpoint = Some(v.clone());
            }
            self.tts.base_url = Some(v);
        }

        if let Some(v) = get("VOICECHAT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("VOICECHAT_DISPLAY_MODE") {
            match v.parse() {
                Ok(mode) => self.display_mode = mode,
                Err(e) => log::warn!("{}", e),
            }
        }
    }

    pub fn require_api_base_url(&self) -> Result<&str, ConfigError> {
        non_blank(self.api_base_url.as_deref())
            .map(trim_trailing_slash)
            .ok_or(ConfigError::missing("API base URL"))
    }

    pub fn chat_timeout(&self) -> Duration {
        let fallback = Duration::from_secs_f64(DEFAULT_CHAT_TIMEOUT_SECS);
        self.chat_timeout_seconds
            .map(|s| seconds_to_duration_or(s, fallback))
            .unwrap_or(fallback)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR_NAME)))
}

/// Values injected at compile time (`KEY=... cargo build`).
fn build_time_value(key: &str) -> Option<&'static str> {
    match key {
        "API_BASE_URL" => option_env!("API_BASE_URL"),
        "CHAT_API_KEY" => option_env!("CHAT_API_KEY"),
        "OPENAI_API_KEY" => option_env!("OPENAI_API_KEY"),
        "OPENAI_BASE_URL" => option_env!("OPENAI_BASE_URL"),
        "AZURE_OPENAI_ENDPOINT" => option_env!("AZURE_OPENAI_ENDPOINT"),
        "AZURE_OPENAI_API_KEY" => option_env!("AZURE_OPENAI_API_KEY"),
        "AZURE_OPENAI_API_VERSION" => option_env!("AZURE_OPENAI_API_VERSION"),
        "AZURE_OPENAI_WHISPER_DEPLOYMENT" => option_env!("AZURE_OPENAI_WHISPER_DEPLOYMENT"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_unconfigured() {
        let settings = WidgetSettings::default();
        assert!(settings.require_api_base_url().is_err());
        assert!(settings.stt.validate().is_err());
        assert!(settings.tts.require_api_key().is_err());
        assert_eq!(settings.display_mode, DisplayMode::Popup);
        assert_eq!(settings.stt.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_openai_key_configures_both_speech_services() {
        let mut settings = WidgetSettings::default();
        settings.apply_overrides(lookup_from(&[
            ("API_BASE_URL", "https://bot.example.com/"),
            ("OPENAI_API_KEY", "sk-test"),
        ]));

        assert_eq!(settings.require_api_base_url().unwrap(), "https://bot.example.com");
        assert!(settings.stt.validate().is_ok());
        assert_eq!(
            settings.stt.transcription_url().unwrap(),
            "https://api.openai.com/v1/audio/transcriptions"
        );
        assert_eq!(settings.tts.require_api_key().unwrap(), "sk-test");
        assert_eq!(settings.tts.speech_url(), "https://api.openai.com/v1/audio/speech");
    }

    #[test]
    fn test_azure_endpoint_switches_flavor() {
        let mut settings = WidgetSettings::default();
        settings.apply_overrides(lookup_from(&[
            ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "az-key"),
            ("OPENAI_API_KEY", "sk-test"),
        ]));

        assert_eq!(settings.stt.flavor, SpeechFlavor::Azure);
        assert_eq!(settings.stt.require_api_key().unwrap(), "az-key");
        assert_eq!(
            settings.stt.transcription_url().unwrap(),
            "https://res.openai.azure.com/openai/deployments/whisper/audio/transcriptions?api-version=2024-06-01"
        );
        assert_eq!(settings.tts.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_blank_values_are_absent() {
        let mut settings = WidgetSettings::default();
        settings.apply_overrides(lookup_from(&[
            ("API_BASE_URL", "   "),
            ("OPENAI_API_KEY", "undefined"),
        ]));
        assert_eq!(
            settings.require_api_base_url().unwrap_err(),
            ConfigError::missing("API base URL")
        );
        assert!(settings.stt.validate().is_err());
    }

    #[test]
    fn test_azure_without_endpoint_is_config_error() {
        let settings = WidgetSettings {
            stt: SpeechToTextSettings {
                flavor: SpeechFlavor::Azure,
                api_key: Some("k".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            settings.stt.validate().unwrap_err(),
            ConfigError::missing("Azure OpenAI endpoint")
        );
    }

    #[test]
    fn test_display_mode_round_trip_strings() {
        assert_eq!("full-screen".parse::<DisplayMode>().unwrap(), DisplayMode::FullScreen);
        assert_eq!(DisplayMode::FullScreen.toggled(), DisplayMode::Popup);
        assert_eq!(DisplayMode::Popup.as_str(), "popup");
        assert!("sideways".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn test_settings_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"api_base_url":"http://localhost:8000","display_mode":"full-screen","tts":{"voice":"nova"}}"#,
        )
        .unwrap();

        let settings = WidgetSettings::read_file(&path).unwrap();
        assert_eq!(settings.api_base_url.as_deref(), Some("http://localhost:8000"));
        assert_eq!(settings.display_mode, DisplayMode::FullScreen);
        assert_eq!(settings.tts.voice, "nova");
        assert_eq!(settings.tts.model, DEFAULT_TTS_MODEL);
    }

    #[test]
    fn test_implicit_settings_file_follows_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{"api_base_url":"http://localhost:9000","tts":{"timeout_seconds":5}}"#,
        )
        .unwrap();

        let settings = WidgetSettings::load_with(None, Some(dir.path()), |_| None).unwrap();
        assert_eq!(settings.api_base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(settings.tts.timeout(), Duration::from_secs(5));
        assert_eq!(settings.data_dir(), dir.path());

        let from_env = dir.path().to_string_lossy().to_string();
        let settings = WidgetSettings::load_with(None, None, move |key| {
            (key == "VOICECHAT_DATA_DIR").then(|| from_env.clone())
        })
        .unwrap();
        assert_eq!(settings.api_base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(settings.data_dir(), dir.path());
    }

    #[test]
    fn test_invalid_settings_timeout_falls_back() {
        let settings = WidgetSettings {
            chat_timeout_seconds: Some(-1.0),
            ..Default::default()
        };
        assert_eq!(settings.chat_timeout(), Duration::from_secs(60));
    }
}
