use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Cloud data centre. Each maps to a fixed OpenAPI origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    Us,
    Eu,
    India,
    China,
}

impl Region {
    /// Unknown codes fall back to `Us`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "eu" => Region::Eu,
            "in" => Region::India,
            "cn" => Region::China,
            _ => Region::Us,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::India => "in",
            Region::China => "cn",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Region::Us => "https://openapi.tuyaus.com",
            Region::Eu => "https://openapi.tuyaeu.com",
            Region::India => "https://openapi.tuyain.com",
            Region::China => "https://openapi.tuyacn.com",
        }
    }
}

/// Value of a single data point as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DpValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DpValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DpValue::Integer(i) => Some(*i as f64),
            DpValue::Float(f) => Some(*f),
            DpValue::Text(s) => s.trim().parse().ok(),
            DpValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DpValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for DpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpValue::Bool(b) => write!(f, "{b}"),
            DpValue::Integer(i) => write!(f, "{i}"),
            DpValue::Float(v) => write!(f, "{v}"),
            DpValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for DpValue {
    fn from(b: bool) -> Self {
        DpValue::Bool(b)
    }
}

impl From<i64> for DpValue {
    fn from(i: i64) -> Self {
        DpValue::Integer(i)
    }
}

impl From<i32> for DpValue {
    fn from(i: i32) -> Self {
        DpValue::Integer(i64::from(i))
    }
}

impl From<f64> for DpValue {
    fn from(f: f64) -> Self {
        DpValue::Float(f)
    }
}

impl From<&str> for DpValue {
    fn from(s: &str) -> Self {
        DpValue::Text(s.to_string())
    }
}

/// Code -> value, replaced wholesale on every successful poll.
pub type StatusSnapshot = BTreeMap<String, DpValue>;

/// Code -> declared type and constraints.
pub type CapabilityMap = BTreeMap<String, Capability>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpType {
    Integer,
    Float,
    Boolean,
    Enum,
    Raw,
}

impl DpType {
    pub fn from_tuya_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "value" => DpType::Integer,
            "float" => DpType::Float,
            "bool" | "boolean" => DpType::Boolean,
            "enum" => DpType::Enum,
            _ => DpType::Raw,
        }
    }
}

/// Decimal shift between the device's raw integer grid and the physical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale(pub u32);

impl Default for Scale {
    fn default() -> Self {
        Scale(1)
    }
}

impl Scale {
    pub fn factor(&self) -> f64 {
        10f64.powi(self.0 as i32)
    }

    pub fn decode(&self, raw: f64) -> f64 {
        raw / self.factor()
    }

    pub fn encode(&self, value: f64) -> i64 {
        (value * self.factor()).round() as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericRange {
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub scale: Scale,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraints {
    Numeric(NumericRange),
    Enum(Vec<String>),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub dp_type: DpType,
    pub constraints: Constraints,
    /// Listed among the device's functions (commandable), not only its status.
    pub writable: bool,
}

impl Capability {
    pub fn scale(&self) -> Option<Scale> {
        match &self.constraints {
            Constraints::Numeric(range) => Some(range.scale),
            _ => None,
        }
    }

    pub fn enum_range(&self) -> &[String] {
        match &self.constraints {
            Constraints::Enum(range) => range,
            _ => &[],
        }
    }
}

/// A single `{code, value}` write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub code: String,
    pub value: DpValue,
}

impl Command {
    pub fn new(code: impl Into<String>, value: impl Into<DpValue>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    Heat,
    Auto,
}

impl HvacMode {
    /// Mode enum token written to the device's mode data point.
    pub fn as_mode_token(&self) -> &'static str {
        match self {
            HvacMode::Off => "Holiday",
            HvacMode::Heat => "Manual",
            HvacMode::Auto => "Program",
        }
    }

    /// Interprets the mode data point when power is on. Anything that is not
    /// a program mode means manual heating on these thermostats.
    pub fn from_mode_token(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "program" | "tempprog" => HvacMode::Auto,
            _ => HvacMode::Heat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HvacAction {
    Off,
    Heating,
    #[default]
    Idle,
}

/// Events emitted by the coordinator when a poll changes state.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DataPointChanged {
        code: String,
        old: Option<DpValue>,
        new: Option<DpValue>,
    },
    AvailabilityChanged {
        available: bool,
    },
}
