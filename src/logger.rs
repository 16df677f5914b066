use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::diff_snapshots;
use crate::normalize::normalize_status;
use crate::types::StatusSnapshot;

const REDACTED: &str = "<redacted>";
const SECRET_KEYS: &[&str] = &["access_token", "refresh_token"];
/// Query parameters that carry credentials, such as the user-code grant.
const SECRET_QUERY_KEYS: &[&str] = &["code"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    /// Status lists are logged in full once per path, then as changed codes only.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_status: HashMap<String, StatusSnapshot>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_status: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body.map(redact),
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, device_id: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "device": device_id,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, path: &str, status: u16, body: &Value) {
        let status_list = match (&self.mode, body.get("result")) {
            (MessageLogMode::Diffed, Some(Value::Array(items))) => Some(normalize_status(items)),
            _ => None,
        };

        let Some(current) = status_list else {
            let entry = json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "resp",
                "path": path,
                "status": status,
                "body": redact(body),
            });
            self.write_line(&entry);
            return;
        };

        let entry = match self.previous_status.get(path) {
            None => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "resp",
                "path": path,
                "status": status,
                "full": true,
                "body": redact(body),
            }),
            Some(previous) => {
                let changes: Vec<Value> = diff_snapshots(previous, &current)
                    .into_iter()
                    .map(|c| json!({ "code": c.code, "old": c.old, "new": c.new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "resp",
                    "path": path,
                    "status": status,
                    "changes": changes,
                })
            }
        };
        self.write_line(&entry);
        self.previous_status.insert(path.to_string(), current);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

/// Canonical path with credential-bearing query values replaced.
pub(crate) fn redact_path(path: &str) -> String {
    let Some((base, query)) = path.split_once('?') else {
        return path.to_string();
    };
    let pairs: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if SECRET_QUERY_KEYS.contains(&key) => format!("{key}={REDACTED}"),
            _ => pair.to_string(),
        })
        .collect();
    format!("{base}?{}", pairs.join("&"))
}

fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if SECRET_KEYS.contains(&k.as_str()) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn user_code_is_redacted_from_paths() {
        assert_eq!(
            redact_path("/v1.0/token?code=abc123&grant_type=2"),
            "/v1.0/token?code=<redacted>&grant_type=2"
        );
        assert_eq!(redact_path("/v1.0/token?grant_type=1"), "/v1.0/token?grant_type=1");
        assert_eq!(redact_path("/v1.0/iot-03/devices/d/status"), "/v1.0/iot-03/devices/d/status");
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request("GET", "/v1.0/token?grant_type=1", None);

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "GET");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn token_response_is_redacted() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        let body = json!({
            "success": true,
            "result": {"access_token": "secret-token", "refresh_token": "r", "expire_time": 7200}
        });
        logger.log_response("/v1.0/token", 200, &body);

        let raw = std::fs::read_to_string(path).unwrap();
        assert!(!raw.contains("secret-token"));
        let lines = read_lines(path);
        assert_eq!(lines[0]["body"]["result"]["access_token"], REDACTED);
        assert_eq!(lines[0]["body"]["result"]["expire_time"], 7200);
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let body1 = json!({"success": true, "result": [{"code": "temp_current", "value": 201}]});
        let body2 = json!({"success": true, "result": [{"code": "temp_current", "value": 203}]});
        logger.log_response("/status", 200, &body1);
        logger.log_response("/status", 200, &body2);
        logger.log_response("/status", 200, &body2);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["full"], true);
        assert_eq!(lines[1]["changes"][0]["code"], "temp_current");
        assert_eq!(lines[1]["changes"][0]["new"], 203);
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn log_command_captures_device() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_command("send_command", "dev1", &json!({"commands": []}));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "cmd");
        assert_eq!(lines[0]["device"], "dev1");
    }
}
