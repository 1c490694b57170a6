use anyhow::{Context, Result};
use keyring::{Entry, Error as KeyringError};

/// API token storage backed by the system keyring, one entry per endpoint.
#[derive(Clone)]
pub struct TokenVault {
    service: String,
}

impl TokenVault {
    pub fn new() -> Self {
        Self {
            service: "ownermail-api-token".to_string(),
        }
    }

    fn entry(&self, endpoint: &str) -> Result<Entry> {
        Entry::new(&self.service, &account_key(endpoint)).context("Failed to create keyring entry")
    }

    /// Store a token securely in the system keyring
    pub fn store(&self, endpoint: &str, token: &str) -> Result<()> {
        self.entry(endpoint)?
            .set_password(token)
            .context("Failed to store token in keyring")?;

        log::debug!("Token stored for {}", account_key(endpoint));
        Ok(())
    }

    pub fn get(&self, endpoint: &str) -> Result<Option<String>> {
        match self.entry(endpoint)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Failed to retrieve token: {}", e)),
        }
    }

    pub fn delete(&self, endpoint: &str) -> Result<()> {
        match self.entry(endpoint)?.delete_password() {
            Ok(()) => {
                log::debug!("Token deleted for {}", account_key(endpoint));
                Ok(())
            }
            // Nothing stored, nothing to delete
            Err(KeyringError::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to delete token: {}", e)),
        }
    }

    /// Like `get`, but a broken keyring backend counts as "nothing stored".
    pub fn lookup(&self, endpoint: &str) -> Option<String> {
        match self.get(endpoint) {
            Ok(token) => token,
            Err(e) => {
                log::debug!("Keyring unavailable: {}", e);
                None
            }
        }
    }
}

impl Default for TokenVault {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyring account name for an endpoint: scheme and trailing slashes dropped.
pub fn account_key(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.to_lowercase()
}

/// Pick the first token source that has a value: explicit, configured, then keyring.
pub fn resolve_token(explicit: Option<String>, configured: Option<String>, endpoint: &str) -> Option<String> {
    let present = |t: &String| !t.trim().is_empty();
    explicit
        .filter(present)
        .or(configured.filter(present))
        .or_else(|| TokenVault::new().lookup(endpoint))
}
