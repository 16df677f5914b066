//! Config-entry data, as stored by the host after setup.

use serde::{Deserialize, Deserializer};

use crate::client::{CloudClientBuilder, Grant};
use crate::types::Region;
use crate::{Error, Result};

pub const DEFAULT_SETPOINT_CODE: &str = "temp_set";
pub const DEFAULT_CURRENT_TEMP_CODE: &str = "temp_current";
pub const DEFAULT_POWER_CODE: &str = "Power";
pub const DEFAULT_MODE_CODE: &str = "Mode";

const PRECISIONS: &[f64] = &[0.1, 0.5, 1.0];

/// Credentials and device binding.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_region")]
    pub region: String,
    pub access_id: String,
    pub access_secret: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub device_id: String,
}

impl CloudConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("access_id", &self.access_id),
            ("access_secret", &self.access_secret),
            ("device_id", &self.device_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{key} is required")));
            }
        }
        Ok(())
    }

    pub fn client_builder(&self) -> CloudClientBuilder {
        let mut builder = CloudClientBuilder::new(&self.access_id, &self.access_secret)
            .region(Region::from_code(&self.region));
        if let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            builder = builder.endpoint(endpoint);
        }
        if let Some(code) = self.user_code.as_deref().filter(|c| !c.is_empty()) {
            builder = builder.grant(Grant::UserCode(code.to_string()));
        }
        builder
    }
}

/// Data-point mapping and display overrides for the climate entity.
///
/// Absent codes take the usual thermostat defaults; an explicit empty
/// string disables an optional code.
#[derive(Debug, Clone, Deserialize)]
pub struct ClimateConfig {
    #[serde(default = "default_setpoint_code", deserialize_with = "required_code")]
    pub setpoint_code: String,
    #[serde(
        rename = "curtemp_code",
        default = "default_current_temp_code",
        deserialize_with = "optional_code"
    )]
    pub current_temp_code: Option<String>,
    #[serde(default = "default_power_code", deserialize_with = "optional_code")]
    pub power_code: Option<String>,
    #[serde(default = "default_mode_code", deserialize_with = "optional_code")]
    pub mode_code: Option<String>,
    #[serde(default)]
    pub min_temp: Option<f64>,
    #[serde(default)]
    pub max_temp: Option<f64>,
    #[serde(default)]
    pub precision: Option<f64>,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            setpoint_code: default_setpoint_code(),
            current_temp_code: default_current_temp_code(),
            power_code: default_power_code(),
            mode_code: default_mode_code(),
            min_temp: None,
            max_temp: None,
            precision: None,
        }
    }
}

impl ClimateConfig {
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min_temp, self.max_temp)
            && min >= max
        {
            return Err(Error::InvalidConfig(format!(
                "min_temp {min} must be below max_temp {max}"
            )));
        }
        if let Some(p) = self.precision
            && !PRECISIONS.iter().any(|allowed| (allowed - p).abs() < 1e-9)
        {
            return Err(Error::InvalidConfig(format!("unsupported precision {p}")));
        }
        Ok(())
    }
}

/// The flat entry mapping holding both halves.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    #[serde(flatten)]
    pub cloud: CloudConfig,
    #[serde(flatten)]
    pub climate: ClimateConfig,
}

impl EntryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let entry: EntryConfig = serde_json::from_str(json)?;
        entry.cloud.validate()?;
        entry.climate.validate()?;
        Ok(entry)
    }
}

fn default_region() -> String {
    Region::default().code().to_string()
}

fn default_setpoint_code() -> String {
    DEFAULT_SETPOINT_CODE.to_string()
}

fn default_current_temp_code() -> Option<String> {
    Some(DEFAULT_CURRENT_TEMP_CODE.to_string())
}

fn default_power_code() -> Option<String> {
    Some(DEFAULT_POWER_CODE.to_string())
}

fn default_mode_code() -> Option<String> {
    Some(DEFAULT_MODE_CODE.to_string())
}

fn required_code<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let code = Option::<String>::deserialize(d)?.unwrap_or_default();
    if code.trim().is_empty() {
        Ok(default_setpoint_code())
    } else {
        Ok(code)
    }
}

fn optional_code<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(d)?.filter(|c| !c.trim().is_empty()))
}
