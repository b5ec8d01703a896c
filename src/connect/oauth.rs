// src/connect/oauth.rs

//! OAuth grant flows (authorization code with PKCE, device code, client
//! credentials) over blocking HTTP.
//!
//! Request *preparation* raises [`OAuthError`] when an input is missing. The
//! HTTP calls themselves never raise: a transport or status failure is logged
//! and reported as an empty [`JsonMap`], which callers must check for.

use crate::connect::secrets::SecretSource;
use crate::constants::{
    DEFAULT_CLIENT_SECRET_ENV, DEFAULT_CONTENT_TYPE, DEFAULT_POLL_INTERVAL_SECS, K_TYPE,
    SLOW_DOWN_INCREMENT_SECS,
};
use crate::models::{ConfigTree, ConfigTreeExt, JsonMap, OAuthGrant, QualifiedKey};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use lazy_static::lazy_static;
use oauth2::{CsrfToken, PkceCodeChallenge, PkceCodeVerifier};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

lazy_static! {
    /// `{tenant_id}`-style placeholders in endpoint URLs.
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{.*?\}").unwrap();
}

pub const K_AUTH_CODE: &str = "auth_code";
pub const K_CODE: &str = "code";
pub const K_STATE: &str = "state";
pub const K_CODE_VERIFIER: &str = "code_verifier";
pub const K_DEVICE_CODE: &str = "device_code";
pub const K_ACCESS_TOKEN: &str = "access_token";
pub const K_REFRESH_TOKEN: &str = "refresh_token";
pub const K_AUTHORIZE_URL: &str = "authorize_url";

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("OAuth connect '{key}' has unknown grant type '{found}'.")]
    UnknownGrant { key: String, found: String },
    #[error("Missing required parameter '{name}'.")]
    MissingParam { name: String },
    #[error("Environment variable '{var}' holding the client secret is not set.")]
    MissingSecret { var: String },
    #[error("'{operation}' is not part of the {grant} flow.")]
    NotSupported { grant: String, operation: String },
    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Could not decode '{token_type}': {source}")]
    TokenDecode {
        token_type: String,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

pub type OAuthResult<T> = Result<T, OAuthError>;

/// The settings of one `[app_connects.oauth_connects.<name>]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthSettings {
    pub grant: OAuthGrant,
    pub content_type: String,
    pub auth_request_url: String,
    pub auth_response_fields: Vec<String>,
    pub auth_response_type: String,
    pub auth_response_errors: Vec<String>,
    pub tenant_id: String,
    pub client_id: String,
    pub scope: String,
    pub grant_token_request_url: String,
    pub grant_type: String,
    pub grant_token_response_fields: Vec<String>,
    pub client_secret_env: String,
    pub verify_signature: bool,
    /// Names the variable holding the key used to verify token signatures.
    pub signing_key_env: Option<String>,
    pub redirect_uri: String,
    pub code_challenge_method: String,
    pub auth_response_mode: String,
}

impl OAuthSettings {
    /// # Errors
    /// Returns `UnknownGrant` if `type` is not a supported flow.
    pub fn from_params(key: &QualifiedKey, params: &ConfigTree) -> OAuthResult<Self> {
        let raw_type = params.get_str(K_TYPE).unwrap_or(OAuthGrant::AuthCode.as_str());
        let grant = OAuthGrant::from_name(raw_type).ok_or_else(|| OAuthError::UnknownGrant {
            key: key.to_string(),
            found: raw_type.to_string(),
        })?;
        let text = |k: &str, default: &str| params.get_str(k).unwrap_or(default).to_string();
        let list = |k: &str, default: &[&str]| {
            if params.contains_key(k) {
                params.get_string_list(k)
            } else {
                default.iter().map(|s| s.to_string()).collect()
            }
        };

        Ok(Self {
            grant,
            content_type: text("content_type", DEFAULT_CONTENT_TYPE),
            auth_request_url: text("auth_request_url", ""),
            auth_response_fields: list("auth_response_fields", &[]),
            auth_response_type: text("auth_response_type", K_CODE),
            auth_response_errors: list("auth_response_errors", &["error", "error_description"]),
            tenant_id: text("tenant_id", ""),
            client_id: text("client_id", ""),
            scope: text("scope", ""),
            grant_token_request_url: text("grant_token_request_url", ""),
            grant_type: text("grant_type", grant.default_grant_type()),
            grant_token_response_fields: list("grant_token_response_fields", &[K_ACCESS_TOKEN]),
            client_secret_env: text("client_secret_env", DEFAULT_CLIENT_SECRET_ENV),
            verify_signature: params.get_bool("verify_signature").unwrap_or(false),
            signing_key_env: params.get_str("signing_key_env").map(str::to_string),
            redirect_uri: text("redirect_uri", ""),
            code_challenge_method: text("code_challenge_method", "S256"),
            auth_response_mode: text("auth_response_mode", "query"),
        })
    }

    /// Substitutes the tenant id into every `{...}` placeholder of `url`.
    pub fn with_tenant(&self, url: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(url, regex::NoExpand(&self.tenant_id))
            .into_owned()
    }
}

/// A PKCE verifier and its `S256` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        Self {
            code_challenge: challenge.as_str().to_string(),
            code_verifier: verifier.secret().clone(),
        }
    }

    pub fn from_verifier(code_verifier: String) -> Self {
        let verifier = PkceCodeVerifier::new(code_verifier);
        let challenge = PkceCodeChallenge::from_code_verifier_sha256(&verifier);
        Self {
            code_challenge: challenge.as_str().to_string(),
            code_verifier: verifier.secret().clone(),
        }
    }
}

/// A prepared authorization step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthorizeRequest {
    pub url: String,
    pub form: Vec<(String, String)>,
    /// Set for the authorization-code flow; the verifier must be kept for the grant.
    pub pkce: Option<PkcePair>,
    /// Anti-forgery value echoed back on the redirect.
    pub state: Option<String>,
}

/// A prepared token-endpoint call.
#[derive(Clone, PartialEq, Default)]
pub struct GrantRequest {
    pub url: String,
    pub form: Vec<(String, String)>,
}

impl std::fmt::Debug for GrantRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let form: Vec<(&str, &str)> = self
            .form
            .iter()
            .map(|(k, v)| (k.as_str(), if is_secret_field(k) { "***" } else { v.as_str() }))
            .collect();
        f.debug_struct("GrantRequest")
            .field("url", &self.url)
            .field("form", &form)
            .finish()
    }
}

fn is_secret_field(name: &str) -> bool {
    matches!(
        name,
        "client_secret" | "code" | "code_verifier" | "device_code" | "refresh_token"
    )
}

/// Token material handed to user-session creation: raw tokens plus their
/// decoded claims under `decoded_<type>`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenContext {
    values: JsonMap,
}

impl TokenContext {
    pub fn new(values: JsonMap) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &JsonMap {
        &self.values
    }

    pub fn access_token(&self) -> Option<&str> {
        self.values.get(K_ACCESS_TOKEN).and_then(Value::as_str)
    }

    /// A claim of the decoded access token.
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.values
            .get(&format!("decoded_{}", K_ACCESS_TOKEN))
            .and_then(|claims| claims.get(name))
            .and_then(Value::as_str)
    }

    /// The signed-in user, upper-cased as Snowflake login names are.
    pub fn user_principal(&self) -> Option<String> {
        self.claim("upn")
            .or_else(|| self.claim("preferred_username"))
            .map(str::to_uppercase)
    }
}

impl From<JsonMap> for TokenContext {
    fn from(values: JsonMap) -> Self {
        Self::new(values)
    }
}

/// One configured OAuth flow.
#[derive(Debug, Clone)]
pub struct OAuthConnect {
    key: QualifiedKey,
    settings: OAuthSettings,
    secrets: Arc<dyn SecretSource>,
    http: Client,
}

impl OAuthConnect {
    /// # Errors
    /// Returns `UnknownGrant` for an unsupported `type`.
    pub fn new(key: QualifiedKey, params: &ConfigTree, secrets: Arc<dyn SecretSource>) -> OAuthResult<Self> {
        let settings = OAuthSettings::from_params(&key, params)?;
        log::debug!("OAuth connect '{}' set up for the {} flow.", key, settings.grant);
        Ok(Self {
            key,
            settings,
            secrets,
            http: Client::new(),
        })
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    pub fn grant(&self) -> OAuthGrant {
        self.settings.grant
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    // --- Authorization ---

    /// Builds the first leg of the flow.
    ///
    /// * Authorization code: a browser URL carrying a fresh PKCE challenge.
    /// * Device code: the device-authorization endpoint and its form.
    /// * Client credentials: nothing to authorize; an empty request.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the authorize URL cannot be parsed.
    pub fn prepare_authorize_request(&self) -> OAuthResult<AuthorizeRequest> {
        let s = &self.settings;
        match s.grant {
            OAuthGrant::AuthCode => {
                let pkce = PkcePair::generate();
                let state = CsrfToken::new_random();
                let base = s.with_tenant(&s.auth_request_url);
                let url = url::Url::parse_with_params(
                    &base,
                    &[
                        ("client_id", s.client_id.as_str()),
                        ("response_type", s.auth_response_type.as_str()),
                        ("redirect_uri", s.redirect_uri.as_str()),
                        ("response_mode", s.auth_response_mode.as_str()),
                        ("scope", s.scope.as_str()),
                        ("code_challenge", pkce.code_challenge.as_str()),
                        ("code_challenge_method", s.code_challenge_method.as_str()),
                        (K_STATE, state.secret().as_str()),
                    ],
                )
                .map_err(|source| OAuthError::InvalidUrl { url: base, source })?;
                Ok(AuthorizeRequest {
                    url: url.into(),
                    form: Vec::new(),
                    pkce: Some(pkce),
                    state: Some(state.secret().clone()),
                })
            }
            OAuthGrant::DeviceCode => Ok(AuthorizeRequest {
                url: s.with_tenant(&s.auth_request_url),
                form: vec![
                    ("client_id".into(), s.client_id.clone()),
                    ("scope".into(), s.scope.clone()),
                ],
                pkce: None,
                state: None,
            }),
            OAuthGrant::ClientCredentials => Ok(AuthorizeRequest::default()),
        }
    }

    /// Performs the first leg.
    ///
    /// The authorization-code flow makes no call: it returns `authorize_url`
    /// (and the PKCE verifier) for the host to redirect the user to. The
    /// device-code flow posts to the device endpoint and returns its JSON.
    pub fn authorize_request(&self, request: &AuthorizeRequest) -> JsonMap {
        match self.settings.grant {
            OAuthGrant::AuthCode => {
                let mut out = JsonMap::new();
                out.insert(K_AUTHORIZE_URL.into(), Value::String(request.url.clone()));
                if let Some(pkce) = &request.pkce {
                    out.insert(K_CODE_VERIFIER.into(), Value::String(pkce.code_verifier.clone()));
                }
                if let Some(state) = &request.state {
                    out.insert(K_STATE.into(), Value::String(state.clone()));
                }
                out
            }
            OAuthGrant::DeviceCode => self.post_form("authorize_request", &request.url, &request.form),
            OAuthGrant::ClientCredentials => JsonMap::new(),
        }
    }

    /// Interprets what came back from the first leg.
    ///
    /// * Authorization code: `response` holds the redirect's query parameters;
    ///   an error field yields an empty map, otherwise `auth_code` and `state`.
    /// * Device code: shows the user instructions, then polls the token
    ///   endpoint until the user signs in or the code expires. Returns the
    ///   device response merged with the tokens, or an empty map on failure.
    /// * Client credentials: passes `response` through.
    pub fn process_authorize_response(&self, response: &JsonMap) -> JsonMap {
        if self.has_error(response, "process_authorize_response") {
            return JsonMap::new();
        }
        match self.settings.grant {
            OAuthGrant::AuthCode => {
                let Some(code) = response.get(K_CODE).and_then(Value::as_str) else {
                    log::error!("OAuth '{}': redirect carries no authorization code.", self.key);
                    return JsonMap::new();
                };
                let mut out = JsonMap::new();
                out.insert(K_AUTH_CODE.into(), Value::String(code.to_string()));
                if let Some(state) = response.get(K_STATE) {
                    out.insert(K_STATE.into(), state.clone());
                }
                out
            }
            OAuthGrant::DeviceCode => self.poll_device_authorization(response),
            OAuthGrant::ClientCredentials => response.clone(),
        }
    }

    // --- Token grant ---

    /// Builds the token request from the context gathered so far.
    ///
    /// # Errors
    /// * `MissingParam` if the authorization code, verifier or device code is absent.
    /// * `MissingSecret` if the client secret variable is unset (auth code, client credentials).
    pub fn prepare_grant_request(&self, ctx: &JsonMap) -> OAuthResult<GrantRequest> {
        let s = &self.settings;
        let url = s.with_tenant(&s.grant_token_request_url);
        let form = match s.grant {
            OAuthGrant::AuthCode => {
                let code = required(ctx, K_AUTH_CODE)?;
                let verifier = required(ctx, K_CODE_VERIFIER)?;
                vec![
                    ("client_id".into(), s.client_id.clone()),
                    ("client_secret".into(), self.client_secret()?),
                    ("scope".into(), s.scope.clone()),
                    ("grant_type".into(), s.grant_type.clone()),
                    (K_CODE.into(), code),
                    ("redirect_uri".into(), s.redirect_uri.clone()),
                    (K_CODE_VERIFIER.into(), verifier),
                    (K_STATE.into(), "loggedin".into()),
                ]
            }
            OAuthGrant::DeviceCode => vec![
                ("client_id".into(), s.client_id.clone()),
                ("scope".into(), s.scope.clone()),
                ("grant_type".into(), s.grant_type.clone()),
                (K_DEVICE_CODE.into(), required(ctx, K_DEVICE_CODE)?),
            ],
            OAuthGrant::ClientCredentials => vec![
                ("client_id".into(), s.client_id.clone()),
                ("client_secret".into(), self.client_secret()?),
                ("scope".into(), s.scope.clone()),
                ("grant_type".into(), s.grant_type.clone()),
            ],
        };
        let request = GrantRequest { url, form };
        log::debug!("OAuth '{}' grant request prepared: {:?}", self.key, request);
        Ok(request)
    }

    /// Posts a prepared token request. Failures yield an empty map.
    pub fn grant_request(&self, request: &GrantRequest) -> JsonMap {
        self.post_form("grant_request", &request.url, &request.form)
    }

    /// Keeps the configured response fields of a token response and decodes
    /// any JWTs among them. An error response, or a token that fails to
    /// decode, yields an empty map.
    pub fn process_grant_response(&self, response: &JsonMap) -> JsonMap {
        if response.is_empty() || self.has_error(response, "process_grant_response") {
            return JsonMap::new();
        }
        let fields = &self.settings.grant_token_response_fields;
        let mut out: JsonMap = response
            .iter()
            .filter(|(k, _)| fields.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let token_types: Vec<String> = fields.iter().filter(|f| f.ends_with("_token")).cloned().collect();
        match self.decode_token(response, &token_types) {
            Ok(decoded) => {
                out.extend(decoded);
                out
            }
            Err(e) => {
                log::error!("OAuth '{}': {}", self.key, e);
                JsonMap::new()
            }
        }
    }

    // --- Refresh ---

    /// Builds a refresh request from a context holding `refresh_token`.
    ///
    /// # Errors
    /// * `NotSupported` for client credentials, which re-grant instead.
    /// * `MissingParam` without a refresh token.
    /// * `MissingSecret` if the auth-code flow has no client secret.
    pub fn prepare_token_refresh(&self, ctx: &JsonMap) -> OAuthResult<GrantRequest> {
        let s = &self.settings;
        let mut form = vec![
            ("client_id".into(), s.client_id.clone()),
            ("scope".into(), s.scope.clone()),
            ("grant_type".into(), K_REFRESH_TOKEN.to_string()),
        ];
        match s.grant {
            OAuthGrant::ClientCredentials => {
                return Err(OAuthError::NotSupported {
                    grant: s.grant.to_string(),
                    operation: "prepare_token_refresh".into(),
                });
            }
            OAuthGrant::AuthCode => {
                form.push((K_REFRESH_TOKEN.into(), required(ctx, K_REFRESH_TOKEN)?));
                form.push(("client_secret".into(), self.client_secret()?));
            }
            OAuthGrant::DeviceCode => {
                form.push((K_REFRESH_TOKEN.into(), required(ctx, K_REFRESH_TOKEN)?));
                // Device-code clients are usually public and may have no secret.
                if let Some(secret) = self.secrets.secret(&s.client_secret_env) {
                    form.push(("client_secret".into(), secret));
                }
            }
        }
        Ok(GrantRequest {
            url: s.with_tenant(&s.grant_token_request_url),
            form,
        })
    }

    /// Posts a prepared refresh request. Failures yield an empty map.
    pub fn refresh_token_request(&self, request: &GrantRequest) -> JsonMap {
        self.post_form("refresh_token_request", &request.url, &request.form)
    }

    // --- Whole flows ---

    /// Client-credentials flow end to end: grant, filter and decode.
    ///
    /// # Errors
    /// `NotSupported` for user flows; otherwise any preparation error. An HTTP
    /// failure is not an error here; it yields an empty map.
    pub fn acquire_service_token(&self) -> OAuthResult<JsonMap> {
        if !self.settings.grant.is_service() {
            return Err(OAuthError::NotSupported {
                grant: self.settings.grant.to_string(),
                operation: "acquire_service_token".into(),
            });
        }
        let request = self.prepare_grant_request(&JsonMap::new())?;
        Ok(self.process_grant_response(&self.grant_request(&request)))
    }

    /// Device-code flow end to end. Empty on any failure.
    ///
    /// # Errors
    /// `NotSupported` for other flows.
    pub fn run_device_flow(&self) -> OAuthResult<JsonMap> {
        if self.settings.grant != OAuthGrant::DeviceCode {
            return Err(OAuthError::NotSupported {
                grant: self.settings.grant.to_string(),
                operation: "run_device_flow".into(),
            });
        }
        let request = self.prepare_authorize_request()?;
        let authorized = self.authorize_request(&request);
        if authorized.is_empty() {
            return Ok(JsonMap::new());
        }
        let polled = self.process_authorize_response(&authorized);
        Ok(self.process_grant_response(&polled))
    }

    // --- Tokens ---

    /// Whether `token` is a JWT (its header parses).
    pub fn is_jwt(token: &str) -> bool {
        jsonwebtoken::decode_header(token).is_ok()
    }

    /// Copies each requested token from `response`; JWTs are also decoded
    /// into `decoded_<type>`. Signatures are checked only when
    /// `verify_signature` is set.
    ///
    /// # Errors
    /// `TokenDecode` if a JWT's claims cannot be decoded (or fail verification),
    /// `MissingParam` if verification is on but no signing key is configured.
    pub fn decode_token(&self, response: &JsonMap, token_types: &[String]) -> OAuthResult<JsonMap> {
        let mut out = JsonMap::new();
        for token_type in token_types {
            let Some(token) = response.get(token_type).and_then(Value::as_str).filter(|t| !t.is_empty()) else {
                log::warn!("OAuth '{}': no '{}' in the response.", self.key, token_type);
                continue;
            };
            out.insert(token_type.clone(), Value::String(token.to_string()));
            if !Self::is_jwt(token) {
                continue;
            }
            let claims = self
                .decode_claims(token)
                .map_err(|source| match source {
                    DecodeFailure::Jwt(source) => OAuthError::TokenDecode {
                        token_type: token_type.clone(),
                        source,
                    },
                    DecodeFailure::Config(e) => e,
                })?;
            out.insert(format!("decoded_{}", token_type), claims);
        }
        Ok(out)
    }

    fn decode_claims(&self, token: &str) -> Result<Value, DecodeFailure> {
        let header = jsonwebtoken::decode_header(token).map_err(DecodeFailure::Jwt)?;
        let (key, mut validation) = if self.settings.verify_signature {
            let var = self
                .settings
                .signing_key_env
                .as_deref()
                .ok_or_else(|| OAuthError::MissingParam {
                    name: "signing_key_env".into(),
                })
                .map_err(DecodeFailure::Config)?;
            let material = self
                .secrets
                .secret(var)
                .ok_or_else(|| OAuthError::MissingSecret { var: var.to_string() })
                .map_err(DecodeFailure::Config)?;
            let key = decoding_key(header.alg, material.as_bytes()).map_err(DecodeFailure::Jwt)?;
            (key, Validation::new(header.alg))
        } else {
            let mut validation = Validation::new(header.alg);
            validation.insecure_disable_signature_validation();
            validation.validate_exp = false;
            validation.required_spec_claims.clear();
            (DecodingKey::from_secret(&[]), validation)
        };
        validation.validate_aud = false;
        jsonwebtoken::decode::<Value>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(DecodeFailure::Jwt)
    }

    // --- Helpers ---

    fn client_secret(&self) -> OAuthResult<String> {
        let var = &self.settings.client_secret_env;
        self.secrets
            .secret(var)
            .ok_or_else(|| OAuthError::MissingSecret { var: var.clone() })
    }

    fn has_error(&self, response: &JsonMap, operation: &str) -> bool {
        let errors: Vec<String> = self
            .settings
            .auth_response_errors
            .iter()
            .filter_map(|field| response.get(field).map(|v| format!("{}={}", field, v)))
            .collect();
        if errors.is_empty() {
            return false;
        }
        log::error!("OAuth '{}' {}(): {}", self.key, operation, errors.join("; "));
        true
    }

    fn post_form(&self, operation: &str, url: &str, form: &[(String, String)]) -> JsonMap {
        match self.send(url, form) {
            Ok((status, body)) if status.is_success() => body,
            Ok((status, body)) => {
                log::error!(
                    "OAuth '{}' {}(): HTTP {} from '{}': {}",
                    self.key,
                    operation,
                    status,
                    url,
                    Value::Object(body)
                );
                JsonMap::new()
            }
            Err(e) => {
                log::error!("OAuth '{}' {}(): request to '{}' failed: {}", self.key, operation, url, e);
                JsonMap::new()
            }
        }
    }

    fn send(&self, url: &str, form: &[(String, String)]) -> reqwest::Result<(StatusCode, JsonMap)> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, &self.settings.content_type)
            .form(form)
            .send()?;
        let status = response.status();
        let body = match response.json::<Value>() {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => JsonMap::new(),
        };
        Ok((status, body))
    }

    fn poll_device_authorization(&self, response: &JsonMap) -> JsonMap {
        let expires_in = response.get("expires_in").and_then(Value::as_u64).unwrap_or(0);
        let mut interval = response
            .get("interval")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let deadline = Instant::now() + Duration::from_secs(expires_in);

        if let Some(message) = response.get("message").and_then(Value::as_str) {
            log::info!("{}", message);
        } else if let (Some(uri), Some(code)) = (
            response.get("verification_uri").and_then(Value::as_str),
            response.get("user_code").and_then(Value::as_str),
        ) {
            log::info!("To sign in, open {} and enter the code {}", uri, code);
        }

        let request = match self.prepare_grant_request(response) {
            Ok(r) => r,
            Err(e) => {
                log::error!("OAuth '{}' device flow: {}", self.key, e);
                return JsonMap::new();
            }
        };

        loop {
            if Instant::now() >= deadline {
                log::error!(
                    "OAuth '{}' device flow: code expired before the user signed in.",
                    self.key
                );
                return JsonMap::new();
            }
            match self.send(&request.url, &request.form) {
                Ok((status, body)) if status.is_success() => {
                    let mut merged = response.clone();
                    merged.extend(body);
                    return merged;
                }
                Ok((status, body)) if status == StatusCode::BAD_REQUEST => {
                    match body.get("error").and_then(Value::as_str).unwrap_or("authorization_pending") {
                        "authorization_pending" => log::debug!("Waiting for the user to authorize..."),
                        "slow_down" => interval += SLOW_DOWN_INCREMENT_SECS,
                        other => {
                            log::error!("OAuth '{}' device flow stopped: {}", self.key, other);
                            return JsonMap::new();
                        }
                    }
                }
                Ok((status, body)) => {
                    log::error!(
                        "OAuth '{}' device flow: HTTP {}: {}",
                        self.key,
                        status,
                        Value::Object(body)
                    );
                    return JsonMap::new();
                }
                Err(e) => {
                    log::error!("OAuth '{}' device flow: {}", self.key, e);
                    return JsonMap::new();
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(Duration::from_secs(interval).min(remaining));
        }
    }
}

enum DecodeFailure {
    Jwt(jsonwebtoken::errors::Error),
    Config(OAuthError),
}

fn decoding_key(alg: Algorithm, material: &[u8]) -> jsonwebtoken::errors::Result<DecodingKey> {
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(DecodingKey::from_secret(material)),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(material),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(material),
        _ => DecodingKey::from_rsa_pem(material),
    }
}

fn required(ctx: &JsonMap, name: &str) -> OAuthResult<String> {
    ctx.get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OAuthError::MissingParam { name: name.to_string() })
}
