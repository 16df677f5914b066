use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{Command, DeviceInfo, Region};

pub const TOKEN_PATH: &str = "/v1.0/token";
pub const DEFAULT_DEVICE_API: &str = "/v1.0/iot-03/devices";
pub const ASSOCIATED_DEVICES_PATH: &str = "/v1.0/iot-01/associated-users/devices";

/// Application codes meaning the access token is invalid or expired.
pub const DEFAULT_TOKEN_INVALID_CODES: &[&str] = &["1004", "1010", "1011"];

/// An explicit origin wins over the region table.
pub fn resolve_endpoint(region: Region, explicit: Option<&str>) -> String {
    match explicit {
        Some(origin) if !origin.trim().is_empty() => origin.trim().trim_end_matches('/').to_string(),
        _ => region.endpoint().to_string(),
    }
}

pub fn status_path(api: &str, device_id: &str) -> String {
    format!("{api}/{device_id}/status")
}

pub fn specification_path(api: &str, device_id: &str) -> String {
    format!("{api}/{device_id}/specifications")
}

pub fn functions_path(api: &str, device_id: &str) -> String {
    format!("{api}/{device_id}/functions")
}

pub fn commands_path(api: &str, device_id: &str) -> String {
    format!("{api}/{device_id}/commands")
}

pub fn user_devices_path(user_id: &str) -> String {
    format!("/v1.0/users/{user_id}/devices")
}

pub fn sorted_query(query: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Path plus `?k=v&...` in key order, as it appears in the string-to-sign.
pub fn canonical_path(path: &str, sorted: &[(String, String)]) -> String {
    if sorted.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}?{}", query.join("&"))
}

pub fn commands_body(commands: &[Command]) -> Value {
    json!({ "commands": commands })
}

/// Outer `{success, result, code, msg, t}` wrapper of every response.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl Envelope {
    /// The vendor sends `code` as a number or a string depending on the endpoint.
    pub fn code(&self) -> String {
        match &self.code {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    pub fn message(&self) -> String {
        self.msg.clone().unwrap_or_default()
    }
}

pub fn parse_envelope(body: &str) -> serde_json::Result<Envelope> {
    serde_json::from_str(body)
}

#[derive(Debug, Deserialize)]
pub struct TokenResult {
    pub access_token: String,
    #[serde(default)]
    pub expire_time: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// Shape in which a list-valued `result` was delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ListShape {
    /// `result: [...]`
    Bare(Vec<Value>),
    /// `result: {list: [...]}`, also `{devices: [...]}`
    Wrapped(Vec<Value>),
    /// Anything else, including `null`.
    Empty,
}

impl ListShape {
    pub fn detect(result: &Value) -> Self {
        match result {
            Value::Array(items) => ListShape::Bare(items.clone()),
            Value::Object(map) => match map.get("list").or_else(|| map.get("devices")) {
                Some(Value::Array(items)) => ListShape::Wrapped(items.clone()),
                _ => ListShape::Empty,
            },
            _ => ListShape::Empty,
        }
    }

    pub fn into_items(self) -> Vec<Value> {
        match self {
            ListShape::Bare(items) | ListShape::Wrapped(items) => items,
            ListShape::Empty => Vec::new(),
        }
    }
}

pub fn parse_device_list(result: &Value) -> Vec<DeviceInfo> {
    ListShape::detect(result)
        .into_items()
        .iter()
        .filter_map(|d| {
            let id = d
                .get("id")
                .or_else(|| d.get("device_id"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())?;
            Some(DeviceInfo {
                id: id.to_string(),
                name: d.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                category: d.get("category").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                online: d.get("online").and_then(|v| v.as_bool()).unwrap_or(false),
            })
        })
        .collect()
}
