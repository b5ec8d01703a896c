// src/models.rs

use crate::constants::{K_DATA_CONNECTS, K_OAUTH_CONNECTS};
use std::fmt;
use toml::Value;

/// A merged configuration tree. Keys at every level are trimmed and lower-cased.
pub type ConfigTree = toml::Table;

/// A JSON object, as returned by OAuth endpoints and passed between flow steps.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// --- Section Keys ---

/// The top-level sections of the configuration tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigType {
    Apps,
    AppConnects,
    DataSetups,
    MlPipelines,
    MlOps,
    BaseApps,
}

impl ConfigType {
    /// Every known section, in declaration order.
    pub const ALL: [ConfigType; 6] = [
        ConfigType::Apps,
        ConfigType::AppConnects,
        ConfigType::DataSetups,
        ConfigType::MlPipelines,
        ConfigType::MlOps,
        ConfigType::BaseApps,
    ];

    /// The section name as written in TOML files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::Apps => "apps",
            ConfigType::AppConnects => "app_connects",
            ConfigType::DataSetups => "data_setups",
            ConfigType::MlPipelines => "ml_pipelines",
            ConfigType::MlOps => "ml_ops",
            ConfigType::BaseApps => "base_apps",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Application Types ---

/// The kinds of application an `apps` entry may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppType {
    Default,
    Console,
    Notebook,
    Streamlit,
    StreamlitMl,
}

impl AppType {
    pub const ALL: [AppType; 5] = [
        AppType::Default,
        AppType::Console,
        AppType::Notebook,
        AppType::Streamlit,
        AppType::StreamlitMl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Default => "default",
            AppType::Console => "console",
            AppType::Notebook => "notebook",
            AppType::Streamlit => "streamlit",
            AppType::StreamlitMl => "streamlit_ml",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Connection Kinds ---

/// The two groups under `app_connects`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectFamily {
    OAuth,
    Data,
}

impl ConnectFamily {
    pub fn group_name(&self) -> &'static str {
        match self {
            ConnectFamily::OAuth => K_OAUTH_CONNECTS,
            ConnectFamily::Data => K_DATA_CONNECTS,
        }
    }

    pub fn from_group(group: &str) -> Option<Self> {
        match group {
            K_OAUTH_CONNECTS => Some(ConnectFamily::OAuth),
            K_DATA_CONNECTS => Some(ConnectFamily::Data),
            _ => None,
        }
    }
}

/// The `type` of a data connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectType {
    Snowflake,
    File,
    /// A plain `host:port` endpoint with no session semantics.
    Generic,
}

impl ConnectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectType::Snowflake => "snowflake",
            ConnectType::File => "file",
            ConnectType::Generic => "generic",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "snowflake" => ConnectType::Snowflake,
            "file" => ConnectType::File,
            _ => ConnectType::Generic,
        }
    }
}

impl fmt::Display for ConnectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `auth_type` of a data connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// Plain user/password authentication (`auth_type = "snowflake"`).
    Password,
    KeyPair,
    ExternalBrowser,
    OAuth,
    /// No authentication declared (files, generic endpoints).
    None,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Password => "snowflake",
            AuthType::KeyPair => "keypair",
            AuthType::ExternalBrowser => "externalbrowser",
            AuthType::OAuth => "oauth",
            AuthType::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "snowflake" | "password" => Some(AuthType::Password),
            "keypair" => Some(AuthType::KeyPair),
            "externalbrowser" => Some(AuthType::ExternalBrowser),
            "oauth" => Some(AuthType::OAuth),
            "" | "none" => Some(AuthType::None),
            _ => None,
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The grant flow of an OAuth connect (its `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthGrant {
    AuthCode,
    DeviceCode,
    ClientCredentials,
}

impl OAuthGrant {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthGrant::AuthCode => "auth_code",
            OAuthGrant::DeviceCode => "device_code",
            OAuthGrant::ClientCredentials => "client_creds",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "auth_code" | "authorization_code" => Some(OAuthGrant::AuthCode),
            "device_code" => Some(OAuthGrant::DeviceCode),
            "client_creds" | "client_credentials" => Some(OAuthGrant::ClientCredentials),
            _ => None,
        }
    }

    /// The `grant_type` form value sent to the token endpoint by default.
    pub fn default_grant_type(&self) -> &'static str {
        match self {
            OAuthGrant::AuthCode => "authorization_code",
            OAuthGrant::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            OAuthGrant::ClientCredentials => "client_credentials",
        }
    }

    /// Client-credentials tokens belong to the application, not to an end user.
    pub fn is_service(&self) -> bool {
        matches!(self, OAuthGrant::ClientCredentials)
    }
}

impl fmt::Display for OAuthGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The effective authentication strategy of a data connect, once any OAuth
/// reference has been followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    Password,
    KeyPair,
    ExternalBrowser,
    /// A token obtained by an end user (auth-code or device-code flow).
    OAuthDelegated,
    /// A token obtained by the application itself (client-credentials flow).
    OAuthClientCredentials,
    None,
}

impl AuthMode {
    pub fn resolve(auth: AuthType, grant: Option<OAuthGrant>) -> Self {
        match auth {
            AuthType::Password => AuthMode::Password,
            AuthType::KeyPair => AuthMode::KeyPair,
            AuthType::ExternalBrowser => AuthMode::ExternalBrowser,
            AuthType::OAuth => match grant {
                Some(g) if g.is_service() => AuthMode::OAuthClientCredentials,
                _ => AuthMode::OAuthDelegated,
            },
            AuthType::None => AuthMode::None,
        }
    }

    /// Whether a connection using this mode may be shared process-wide.
    pub fn is_service(&self) -> bool {
        match self {
            AuthMode::Password
            | AuthMode::KeyPair
            | AuthMode::OAuthClientCredentials
            | AuthMode::None => true,
            AuthMode::ExternalBrowser | AuthMode::OAuthDelegated => false,
        }
    }
}

// --- Keys and Lookups ---

/// A `<group>.<item>` key into a configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedKey {
    pub group: String,
    pub item: String,
}

impl QualifiedKey {
    pub fn new(group: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            item: item.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.group.is_empty() && !self.item.is_empty()
    }
}

impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.item)
    }
}

/// The result of a hierarchical key lookup: the key that matched and its subtree.
/// Both are empty when nothing matched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionLookup {
    pub key: String,
    pub config: ConfigTree,
}

impl SectionLookup {
    pub fn new(key: impl Into<String>, config: ConfigTree) -> Self {
        Self {
            key: key.into(),
            config,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_empty()
    }
}

// --- Tree Accessors ---

/// Typed read helpers over a configuration subtree.
pub trait ConfigTreeExt {
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_table(&self, key: &str) -> Option<&ConfigTree>;
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_string_list(&self, key: &str) -> Vec<String>;
    /// Returns a copy with nested tables removed.
    fn scalars_only(&self) -> ConfigTree;
}

impl ConfigTreeExt for ConfigTree {
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_table(&self, key: &str) -> Option<&ConfigTree> {
        self.get(key).and_then(Value::as_table)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v.as_str() {
                    Some(s) => Some(s.trim().to_lowercase()),
                    None => {
                        log::warn!("Ignoring non-string entry {} in list '{}'.", v, key);
                        None
                    }
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_lowercase()],
            _ => Vec::new(),
        }
    }

    fn scalars_only(&self) -> ConfigTree {
        self.iter()
            .filter(|(_, v)| !v.is_table())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
