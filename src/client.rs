use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, trace};

use crate::logger::{redact_path, MessageLogMode, MessageLogger};
use crate::protocol::{
    canonical_path, commands_body, commands_path, functions_path, parse_device_list, resolve_endpoint,
    sorted_query, specification_path, status_path, user_devices_path, Envelope, ListShape, TokenResult,
    ASSOCIATED_DEVICES_PATH, DEFAULT_DEVICE_API, DEFAULT_TOKEN_INVALID_CODES, TOKEN_PATH,
};
use crate::sign::{sign, SignInput, SIGN_METHOD};
use crate::types::{Command, DeviceInfo, Region};
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A token this close to its expiry is treated as already expired.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// How the access token is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Grant {
    /// `grant_type=1`, project-level token.
    #[default]
    Project,
    /// `grant_type=2&code=...`, bound to an app user.
    UserCode(String),
}

#[derive(Default)]
struct SessionToken {
    value: String,
    expires_at: Option<Instant>,
    uid: Option<String>,
}

impl SessionToken {
    fn is_usable(&self) -> bool {
        !self.value.is_empty() && self.expires_at.is_none_or(|at| Instant::now() < at)
    }

    fn clear(&mut self) {
        *self = SessionToken::default();
    }
}

pub struct CloudClientBuilder {
    client_id: String,
    secret: String,
    region: Region,
    endpoint: Option<String>,
    grant: Grant,
    timeout: Duration,
    token_invalid_codes: Vec<String>,
    device_api: String,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
    nonce: bool,
}

impl CloudClientBuilder {
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
            region: Region::default(),
            endpoint: None,
            grant: Grant::Project,
            timeout: DEFAULT_TIMEOUT,
            token_invalid_codes: DEFAULT_TOKEN_INVALID_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            device_api: DEFAULT_DEVICE_API.to_string(),
            log_mode: None,
            log_path: None,
            nonce: false,
        }
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Explicit origin, overrides the region table.
    pub fn endpoint(mut self, origin: impl Into<String>) -> Self {
        self.endpoint = Some(origin.into());
        self
    }

    pub fn grant(mut self, grant: Grant) -> Self {
        self.grant = grant;
        self
    }

    pub fn user_code(self, code: impl Into<String>) -> Self {
        self.grant(Grant::UserCode(code.into()))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the set of application codes that trigger a token refresh.
    pub fn token_invalid_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.token_invalid_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Device API prefix, e.g. `/v1.0/iot-03/devices` or `/v1.0/devices`.
    pub fn device_api(mut self, prefix: impl Into<String>) -> Self {
        self.device_api = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    /// Send a random `nonce` header and include it in the signature.
    pub fn nonce(mut self, enabled: bool) -> Self {
        self.nonce = enabled;
        self
    }

    pub fn build(self) -> Result<CloudClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        Ok(CloudClient {
            http,
            endpoint: resolve_endpoint(self.region, self.endpoint.as_deref()),
            client_id: self.client_id,
            secret: self.secret,
            grant: self.grant,
            token: SessionToken::default(),
            token_invalid_codes: self.token_invalid_codes.into_iter().collect(),
            device_api: self.device_api,
            logger,
            nonce: self.nonce,
        })
    }
}

/// Signed client for one set of cloud credentials.
///
/// Owns the session token. Every call goes through [`CloudClient::request`],
/// which acquires a token on first use and re-authenticates at most once
/// when the cloud reports the token as invalid.
pub struct CloudClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    secret: String,
    grant: Grant,
    token: SessionToken,
    token_invalid_codes: HashSet<String>,
    device_api: String,
    logger: Option<MessageLogger>,
    nonce: bool,
}

impl fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudClient")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("has_token", &self.has_token())
            .finish_non_exhaustive()
    }
}

impl CloudClient {
    pub fn builder(client_id: impl Into<String>, secret: impl Into<String>) -> CloudClientBuilder {
        CloudClientBuilder::new(client_id, secret)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn has_token(&self) -> bool {
        self.token.is_usable()
    }

    /// User id bound to the current token, if the cloud returned one.
    pub fn uid(&self) -> Option<&str> {
        self.token.uid.as_deref()
    }

    pub fn invalidate_token(&mut self) {
        self.token.clear();
    }

    /// Whether `err` is an application error the cloud uses for a stale token.
    pub fn is_token_invalid(&self, err: &Error) -> bool {
        matches!(err, Error::Application { code, .. } if self.token_invalid_codes.contains(code))
    }

    pub async fn acquire_token(&mut self) -> Result<()> {
        self.token.clear();
        let query = match &self.grant {
            Grant::Project => vec![("grant_type", "1".to_string())],
            Grant::UserCode(code) => vec![("grant_type", "2".to_string()), ("code", code.clone())],
        };
        debug!(endpoint = %self.endpoint, "acquiring access token");

        let result = match self.send_signed(&Method::GET, TOKEN_PATH, &query, None).await {
            Ok(result) => result,
            Err(Error::Application { code, msg }) => return Err(Error::Auth { code, msg }),
            Err(Error::Http { status }) => {
                return Err(Error::Auth {
                    code: "http".to_string(),
                    msg: format!("HTTP {status}"),
                });
            }
            Err(e) => return Err(e),
        };

        let granted: TokenResult = serde_json::from_value(result)?;
        if granted.access_token.is_empty() {
            return Err(Error::Auth {
                code: "empty".to_string(),
                msg: "no access_token in token result".to_string(),
            });
        }

        // A lifetime past what `Instant` can represent is treated as no expiry.
        let expires_at = granted.expire_time.and_then(|secs| {
            let mut lifetime = Duration::from_secs(secs);
            if lifetime > TOKEN_EXPIRY_MARGIN * 2 {
                lifetime -= TOKEN_EXPIRY_MARGIN;
            }
            Instant::now().checked_add(lifetime)
        });
        self.token = SessionToken {
            value: granted.access_token,
            expires_at,
            uid: granted.uid,
        };
        debug!(expires_in = ?granted.expire_time, "access token acquired");
        Ok(())
    }

    /// One signed call, with a single re-authenticate-and-resend when the
    /// response carries a token-invalid code. Other failures are returned as is.
    pub async fn request(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        if !self.has_token() {
            self.acquire_token().await?;
        }

        match self.send_signed(&method, path, query, body).await {
            Err(e) if self.is_token_invalid(&e) => {
                debug!(code = e.upstream_code(), path, "token rejected, re-authenticating");
                self.invalidate_token();
                if let Err(auth) = self.acquire_token().await {
                    debug!(error = %auth, "re-authentication failed");
                    return Err(e);
                }
                self.send_signed(&method, path, query, body).await
            }
            other => other,
        }
    }

    pub async fn get_status(&mut self, device_id: &str) -> Result<Vec<Value>> {
        let path = status_path(&self.device_api, device_id);
        let result = self.request(Method::GET, &path, &[], None).await?;
        match ListShape::detect(&result) {
            // Not a list in any known shape: let serde describe the mismatch.
            ListShape::Empty => Ok(serde_json::from_value(result)?),
            shape => Ok(shape.into_items()),
        }
    }

    pub async fn get_specification(&mut self, device_id: &str) -> Result<Value> {
        let path = specification_path(&self.device_api, device_id);
        self.request(Method::GET, &path, &[], None).await
    }

    pub async fn get_functions(&mut self, device_id: &str) -> Result<Value> {
        let path = functions_path(&self.device_api, device_id);
        self.request(Method::GET, &path, &[], None).await
    }

    pub async fn send_command(&mut self, device_id: &str, commands: &[Command]) -> Result<()> {
        let path = commands_path(&self.device_api, device_id);
        let body = commands_body(commands);
        if let Some(ref mut logger) = self.logger {
            logger.log_command("send_command", device_id, &body);
        }
        self.request(Method::POST, &path, &[], Some(&body)).await?;
        Ok(())
    }

    /// Devices of a linked app account. Without a user id the
    /// associated-users listing is used.
    pub async fn list_devices(&mut self, user_id: Option<&str>) -> Result<Vec<DeviceInfo>> {
        let result = match user_id.filter(|u| !u.is_empty()) {
            Some(uid) => {
                let path = user_devices_path(uid);
                self.request(Method::GET, &path, &[], None).await?
            }
            None => {
                let query = [("page_no", "1".to_string()), ("page_size", "100".to_string())];
                self.request(Method::GET, ASSOCIATED_DEVICES_PATH, &query, None)
                    .await?
            }
        };
        Ok(parse_device_list(&result))
    }

    async fn send_signed(
        &mut self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let body_str = match body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };
        let sorted = sorted_query(query);
        let canonical = canonical_path(path, &sorted);
        let timestamp = Utc::now().timestamp_millis().to_string();
        let nonce = if self.nonce {
            uuid::Uuid::new_v4().to_string()
        } else {
            String::new()
        };

        let signature = sign(
            &SignInput {
                method: method.as_str(),
                path: &canonical,
                body: &body_str,
                timestamp: &timestamp,
                client_id: &self.client_id,
                token: &self.token.value,
                nonce: &nonce,
                signed_headers: &[],
            },
            &self.secret,
        );

        let url = format!("{}{}", self.endpoint, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .query(&sorted)
            .header("t", &timestamp)
            .header("client_id", &self.client_id)
            .header("sign_method", SIGN_METHOD)
            .header("sign", signature);
        if !self.token.value.is_empty() {
            req = req.header("access_token", &self.token.value);
        }
        if !nonce.is_empty() {
            req = req.header("nonce", &nonce);
        }
        if body.is_some() {
            req = req.header(CONTENT_TYPE, "application/json").body(body_str);
        }

        let logged_path = redact_path(&canonical);
        trace!(method = %method, path = %logged_path, "signed request");
        if let Some(ref mut logger) = self.logger {
            logger.log_request(method.as_str(), &logged_path, body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), path = %logged_path, "request failed");
            return Err(Error::Http {
                status: status.as_u16(),
            });
        }

        let text = resp.text().await?;
        let raw: Value = serde_json::from_str(&text)?;
        if let Some(ref mut logger) = self.logger {
            logger.log_response(&logged_path, status.as_u16(), &raw);
        }

        let envelope: Envelope = serde_json::from_value(raw)?;
        if !envelope.success {
            return Err(Error::Application {
                code: envelope.code(),
                msg: envelope.message(),
            });
        }
        Ok(envelope.result)
    }
}
