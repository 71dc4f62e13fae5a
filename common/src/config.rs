use std::time::Duration;

use url::Url;

/// Production endpoint of the signed key request authority.
pub const DEFAULT_AUTHORITY_URL: &str = "https://api.warpcast.com";

/// Default storage namespace, the prefix of every persisted key.
pub const DEFAULT_NAMESPACE: &str = "farsign";

/// Default validity window of an authorization signature.
pub const DEFAULT_DEADLINE_SECS: u64 = 86_400;

/// Connection settings for the remote authority.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
}

impl AuthorityConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Pacing and bound of the approval polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Sleep before every status request.
    pub interval: Duration,
    /// Give up after this long. `None` polls until cancelled.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Some(Duration::from_secs(600)),
        }
    }
}
