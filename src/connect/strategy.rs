// src/connect/strategy.rs

//! How each `(connect type, auth mode)` pair builds its resource.

use crate::connect::keypair;
use crate::connect::oauth::{OAuthConnect, TokenContext};
use crate::connect::secrets::SecretSource;
use crate::connect::session::{Credential, Resource, SessionFactory, SessionParams};
use crate::connect::{ConnectError, ConnectResult, file};
use crate::models::{AuthMode, ConfigTree, ConfigTreeExt, ConnectType, QualifiedKey};
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a builder may draw on.
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub key: &'a QualifiedKey,
    pub params: &'a ConfigTree,
    /// Absolute configuration root, for relative paths.
    pub root: &'a Path,
    pub factory: &'a dyn SessionFactory,
    pub secrets: &'a dyn SecretSource,
    /// The OAuth connect named by `oauth_connect`, for OAuth modes.
    pub oauth: Option<Arc<OAuthConnect>>,
}

type ServiceBuilder = fn(&BuildContext<'_>) -> ConnectResult<Resource>;
type UserBuilder = fn(&BuildContext<'_>, &TokenContext) -> ConnectResult<Resource>;

/// Shared connections are built from configuration alone; user sessions also
/// need the signed-in user's token context.
#[derive(Debug, Clone, Copy)]
pub enum Builder {
    Service(ServiceBuilder),
    User(UserBuilder),
}

#[derive(Debug)]
pub struct Strategy {
    pub connect_type: ConnectType,
    pub auth: AuthMode,
    pub builder: Builder,
}

impl Strategy {
    pub fn is_service(&self) -> bool {
        matches!(self.builder, Builder::Service(_))
    }
}

/// Every supported combination. Anything not listed is `Unsupported`.
static STRATEGIES: &[Strategy] = &[
    Strategy {
        connect_type: ConnectType::Snowflake,
        auth: AuthMode::Password,
        builder: Builder::Service(password_session),
    },
    Strategy {
        connect_type: ConnectType::Snowflake,
        auth: AuthMode::KeyPair,
        builder: Builder::Service(keypair_session),
    },
    Strategy {
        connect_type: ConnectType::Snowflake,
        auth: AuthMode::OAuthClientCredentials,
        builder: Builder::Service(client_credentials_session),
    },
    Strategy {
        connect_type: ConnectType::Snowflake,
        auth: AuthMode::ExternalBrowser,
        builder: Builder::User(browser_session),
    },
    Strategy {
        connect_type: ConnectType::Snowflake,
        auth: AuthMode::OAuthDelegated,
        builder: Builder::User(delegated_session),
    },
    Strategy {
        connect_type: ConnectType::File,
        auth: AuthMode::None,
        builder: Builder::Service(file_handle),
    },
    Strategy {
        connect_type: ConnectType::Generic,
        auth: AuthMode::None,
        builder: Builder::Service(endpoint_handle),
    },
];

/// Finds the strategy for a combination.
///
/// # Errors
/// `Unsupported` if no strategy is registered for it.
pub fn lookup(connect_type: ConnectType, auth: AuthMode) -> ConnectResult<&'static Strategy> {
    STRATEGIES
        .iter()
        .find(|s| s.connect_type == connect_type && s.auth == auth)
        .ok_or_else(|| ConnectError::Unsupported {
            family: connect_type.to_string(),
            auth: format!("{:?}", auth),
        })
}

/// All registered combinations, in table order.
pub fn supported() -> impl Iterator<Item = (ConnectType, AuthMode)> {
    STRATEGIES.iter().map(|s| (s.connect_type, s.auth))
}

// --- Builders ---

fn password_session(ctx: &BuildContext<'_>) -> ConnectResult<Resource> {
    let var = required_field(ctx, "password_env")?;
    let password = ctx.secrets.require(var)?;
    open_session(ctx, None, Credential::Password(password))
}

fn keypair_session(ctx: &BuildContext<'_>) -> ConnectResult<Resource> {
    let path_var = required_field(ctx, "private_key_path_env")?;
    let key_path = PathBuf::from(ctx.secrets.require(path_var)?);
    let passphrase = ctx
        .params
        .get_str("private_key_phrase_env")
        .and_then(|var| ctx.secrets.secret(var));

    let key = keypair::load_private_key(&key_path, passphrase.as_deref()).map_err(|e| ConnectError::AuthFailure {
        key: ctx.key.to_string(),
        reason: e.to_string(),
    })?;
    open_session(ctx, None, Credential::KeyPair { private_key_der: key.der })
}

fn client_credentials_session(ctx: &BuildContext<'_>) -> ConnectResult<Resource> {
    let oauth = ctx.oauth.as_ref().ok_or_else(|| ConnectError::MissingField {
        key: ctx.key.to_string(),
        field: crate::constants::K_OAUTH_CONNECT_REF.to_string(),
    })?;
    let tokens = TokenContext::from(oauth.acquire_service_token()?);
    let token = tokens.access_token().ok_or_else(|| ConnectError::AuthFailure {
        key: ctx.key.to_string(),
        reason: format!("OAuth connect '{}' returned no access token", oauth.key()),
    })?;
    open_session(ctx, None, Credential::OAuthToken(token.to_string()))
}

fn browser_session(ctx: &BuildContext<'_>, tokens: &TokenContext) -> ConnectResult<Resource> {
    open_session(ctx, tokens.user_principal(), Credential::ExternalBrowser)
}

fn delegated_session(ctx: &BuildContext<'_>, tokens: &TokenContext) -> ConnectResult<Resource> {
    let token = tokens.access_token().ok_or_else(|| ConnectError::AuthFailure {
        key: ctx.key.to_string(),
        reason: "the token context holds no access token".to_string(),
    })?;
    open_session(ctx, tokens.user_principal(), Credential::OAuthToken(token.to_string()))
}

fn file_handle(ctx: &BuildContext<'_>) -> ConnectResult<Resource> {
    file::resolve_file_path(ctx.key, ctx.params, ctx.root).map(Resource::Path)
}

fn endpoint_handle(ctx: &BuildContext<'_>) -> ConnectResult<Resource> {
    let host = required_field(ctx, "host")?;
    match ctx.params.get("port").and_then(toml::Value::as_integer) {
        Some(port) => Ok(Resource::Endpoint(format!("{}:{}", host, port))),
        None => Ok(Resource::Endpoint(host.to_string())),
    }
}

// --- Helpers ---

fn required_field<'a>(ctx: &BuildContext<'a>, field: &str) -> ConnectResult<&'a str> {
    ctx.params
        .get_str(field)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConnectError::MissingField {
            key: ctx.key.to_string(),
            field: field.to_string(),
        })
}

fn open_session(ctx: &BuildContext<'_>, user: Option<String>, credential: Credential) -> ConnectResult<Resource> {
    let params = SessionParams::from_config(ctx.params, user, credential);
    log::info!(
        "Opening session '{}' for account '{}' as '{}' ({}).",
        ctx.key,
        params.account,
        params.user,
        params.credential.authenticator()
    );
    ctx.factory.create_session(&params).map(Resource::Session)
}
