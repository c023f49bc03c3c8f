use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Environment fallback prefix: `XRITRX_RADIO_SAMPLE_RATE=...` maps to
/// `radio.sample_rate` (the first underscore after the prefix becomes the
/// section separator).
const ENV_PREFIX: &str = "XRITRX_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found and no {ENV_PREFIX}* environment variables set")]
    NotFound,
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConf {
    pub sample_rate: f64,
    pub frequency: f64,
    pub gain: f64,
    pub driver: String,
    pub address: String,
    pub device_index: usize,
    pub sample_type: String,
}

impl Default for RadioConf {
    fn default() -> Self {
        Self {
            sample_rate: 2_400_000.0,
            frequency: 1_694_100_000.0,
            gain: 30.0,
            driver: String::new(),
            address: String::new(),
            device_index: 0,
            sample_type: "complex64".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XritConf {
    pub symbol_rate: f64,
    pub rrc_alpha: f64,
    pub rrc_taps: usize,
    pub lowpass_transition_width: f64,
    pub decimation_factor: usize,
    pub pll_alpha: f32,
    pub chunk_size: usize,
    pub do_fft: bool,
}

impl Default for XritConf {
    fn default() -> Self {
        Self {
            symbol_rate: 927_000.0,
            rrc_alpha: 0.3,
            rrc_taps: 31,
            lowpass_transition_width: 200_000.0,
            decimation_factor: 1,
            pll_alpha: 0.001,
            chunk_size: 65536,
            do_fft: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgcConf {
    pub rate: f32,
    pub reference: f32,
    pub gain: f32,
    pub max_gain: f32,
}

impl Default for AgcConf {
    fn default() -> Self {
        Self {
            rate: 0.01,
            reference: 0.5,
            gain: 1.0,
            max_gain: 4000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockRecoveryConf {
    pub mu: f32,
    pub alpha: f32,
    pub omega_limit: f32,
}

impl Default for ClockRecoveryConf {
    fn default() -> Self {
        Self {
            mu: 0.5,
            alpha: 0.0037,
            omega_limit: 0.005,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViterbiConf {
    pub max_errors: u32,
}

impl Default for ViterbiConf {
    fn default() -> Self {
        Self { max_errors: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XritFrameConf {
    pub frame_size: usize,
    pub last_frame_size: usize,
}

impl Default for XritFrameConf {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            last_frame_size: 64,
        }
    }
}

/// Top-level configuration. Unknown sections (e.g. `[tui]`) are accepted
/// and ignored so one config file can serve the whole deployment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub radio: RadioConf,
    pub xrit: XritConf,
    pub agc: AgcConf,
    pub clockrecovery: ClockRecoveryConf,
    pub viterbi: ViterbiConf,
    pub xritframe: XritFrameConf,
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/xritrx/config.toml")];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(PathBuf::from(home).join(".config/xritrx/config.toml"));
    }
    paths.push(PathBuf::from("./config.toml"));
    paths
}

/// Load configuration: first existing file in the lookup order wins, with
/// environment variables as the fallback when no file exists.
pub fn load() -> Result<Config, ConfigError> {
    for path in candidate_paths() {
        if path.exists() {
            log::info!("found config file: {}", path.display());
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            return Ok(toml::from_str(&text)?);
        }
    }

    log::warn!("config file not found, trying environment variables");
    from_env(std::env::vars())
}

/// Build a config from `XRITRX_*` variables. Only the first underscore
/// splits section from key, matching the file's two-level layout.
fn from_env(vars: impl Iterator<Item = (String, String)>) -> Result<Config, ConfigError> {
    let mut root = toml::Table::new();
    let mut found = false;

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let lower = rest.to_lowercase();
        let Some((section, field)) = lower.split_once('_') else {
            continue;
        };
        found = true;
        log::debug!("config env var: {}.{}={}", section, field, value);

        let parsed = parse_scalar(&value);
        root.entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .map(|table| table.insert(field.to_string(), parsed));
    }

    if !found {
        return Err(ConfigError::NotFound);
    }
    Ok(toml::Value::Table(root).try_into()?)
}

/// Env values carry no type information; guess in the same order toml
/// would: integer, float, bool, string.
fn parse_scalar(value: &str) -> toml::Value {
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return toml::Value::Float(f);
    }
    if let Ok(b) = value.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    toml::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_file_parses() {
        let text = r#"
            [radio]
            sample_rate = 2400000.0
            frequency = 1694100000.0
            gain = 32
            driver = "rtlsdr"
            sample_type = "complex64"

            [xrit]
            symbol_rate = 927000.0
            rrc_alpha = 0.3
            rrc_taps = 63
            decimation_factor = 2
            chunk_size = 131072

            [clockrecovery]
            mu = 0.5
            alpha = 0.0037
            omega_limit = 0.005

            [xritframe]
            frame_size = 1024
            last_frame_size = 64

            [tui]
            refresh_ms = 500
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.radio.driver, "rtlsdr");
        assert_eq!(config.xrit.rrc_taps, 63);
        assert_eq!(config.xrit.decimation_factor, 2);
        assert_eq!(config.xritframe.frame_size, 1024);
        // Defaults fill unlisted keys
        assert_eq!(config.viterbi.max_errors, 500);
    }

    #[test]
    fn test_env_fallback_mapping() {
        let vars = vec![
            ("XRITRX_RADIO_SAMPLE_RATE".to_string(), "2000000".to_string()),
            ("XRITRX_XRIT_SYMBOL_RATE".to_string(), "927000.0".to_string()),
            ("XRITRX_XRIT_DO_FFT".to_string(), "true".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = from_env(vars.into_iter()).unwrap();
        assert_eq!(config.radio.sample_rate, 2_000_000.0);
        assert_eq!(config.xrit.symbol_rate, 927_000.0);
        assert!(config.xrit.do_fft);
        // Untouched sections keep defaults
        assert_eq!(config.xritframe.last_frame_size, 64);
    }

    #[test]
    fn test_env_fallback_requires_at_least_one_var() {
        let vars = vec![("HOME".to_string(), "/root".to_string())];
        assert!(matches!(
            from_env(vars.into_iter()),
            Err(ConfigError::NotFound)
        ));
    }
}
