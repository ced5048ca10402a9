//! Caller key derivation.

use std::fmt;

/// Stable identity a limiter buckets requests under.
///
/// Derived in priority order: authenticated user, then a submitted username,
/// then the network address. An authenticated user sharing an address with
/// others therefore gets a bucket of their own, while anonymous callers from
/// the same address share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerKey {
    /// Authenticated user id
    User(String),
    /// Username submitted before authentication (login, registration)
    Username(String),
    /// Caller network address
    Ip(String),
}

/// Placeholder address when the transport did not expose one.
pub const UNKNOWN_ADDR: &str = "unknown";

impl CallerKey {
    /// Derive a key from whatever key material the request carries.
    ///
    /// Blank values count as absent, so this never fails.
    pub fn derive(
        user_id: Option<&str>,
        username: Option<&str>,
        remote_addr: Option<&str>,
    ) -> Self {
        if let Some(id) = non_blank(user_id) {
            return CallerKey::User(id.to_string());
        }
        if let Some(name) = non_blank(username) {
            return CallerKey::Username(name.to_string());
        }
        CallerKey::Ip(non_blank(remote_addr).unwrap_or(UNKNOWN_ADDR).to_string())
    }

    /// The map key, e.g. `user:42`.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerKey::User(id) => write!(f, "user:{}", id),
            CallerKey::Username(name) => write!(f, "username:{}", name),
            CallerKey::Ip(addr) => write!(f, "ip:{}", addr),
        }
    }
}
