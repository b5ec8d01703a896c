// src/connect/secrets.rs

use crate::connect::{ConnectError, ConnectResult};
use std::collections::HashMap;
use std::env;
use std::fmt;

/// Where secret values named by `*_env` configuration keys are read from.
pub trait SecretSource: Send + Sync + fmt::Debug {
    /// Returns the value of `var`, or `None` if it is unset or empty.
    fn secret(&self, var: &str) -> Option<String>;

    /// Like [`SecretSource::secret`], but a missing value is an error.
    ///
    /// # Errors
    /// Returns `ConnectError::MissingEnv` naming the variable.
    fn require(&self, var: &str) -> ConnectResult<String> {
        self.secret(var).ok_or_else(|| ConnectError::MissingEnv {
            var: var.to_string(),
        })
    }
}

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, var: &str) -> Option<String> {
        env::var(var).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, var: &str) -> Option<String> {
        self.get(var).filter(|v| !v.is_empty()).cloned()
    }
}

/// Stands in for a secret value in logs and `Debug` output.
pub(crate) struct Redacted;

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}
