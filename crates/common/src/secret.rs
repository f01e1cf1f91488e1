//! Secret wrapper for sensitive values

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Resolve a secret from an environment variable, falling back to a file.
    ///
    /// The env var wins when set and non-empty. File contents are trimmed; a
    /// whitespace-only file yields `None`. A configured file that cannot be
    /// read is an error rather than a silent miss.
    pub fn from_env_or_file(env_var: &str, file: Option<&Path>) -> Result<Option<Self>> {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim().to_owned();
            if !value.is_empty() {
                return Ok(Some(Self::new(value)));
            }
        }

        let Some(path) = file else {
            return Ok(None);
        };

        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read secret file {}: {e}", path.display()))
        })?;
        let value = contents.trim().to_owned();
        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self::new(value)))
        }
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
