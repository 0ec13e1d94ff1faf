use std::fmt;
use std::path::Path;

use reqwest::Url;

use crate::error::CoreError;

/// HTTP basic auth credentials for the node.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) user: String,
    pub(crate) pass: String,
}

impl Credentials {
    /// Pick credentials from explicit settings, falling back to a cookie
    /// file. Explicit settings win; a user without a password (or the
    /// reverse) is a configuration error.
    pub(crate) fn resolve(
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
    ) -> Result<Option<Self>, CoreError> {
        match (user, pass, cookie_file) {
            (Some(user), Some(pass), _) => Ok(Some(Self {
                user: user.to_owned(),
                pass: pass.to_owned(),
            })),
            (Some(_), None, _) | (None, Some(_), _) => Err(CoreError::InvalidConfig(
                "rpc user and rpc pass must be given together".to_owned(),
            )),
            (None, None, Some(path)) => Self::from_cookie_file(path).map(Some),
            (None, None, None) => Ok(None),
        }
    }

    fn from_cookie_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidConfig(format!("read rpc cookie file {}: {e}", path.display()))
        })?;
        Self::parse_cookie(&text).map_err(|reason| {
            CoreError::InvalidConfig(format!("rpc cookie file {}: {reason}", path.display()))
        })
    }

    /// Parse `user:password` from the first line of a cookie file.
    fn parse_cookie(text: &str) -> Result<Self, &'static str> {
        let line = text.lines().next().map(str::trim).unwrap_or_default();
        match line.split_once(':') {
            _ if line.is_empty() => Err("file is empty"),
            Some((user, pass)) if !user.is_empty() && !pass.is_empty() => Ok(Self {
                user: user.to_owned(),
                pass: pass.to_owned(),
            }),
            _ => Err("expected `username:password` on the first line"),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"***")
            .finish()
    }
}

/// Accept only absolute http(s) URLs.
pub(super) fn validate_url(url: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(url)
        .map_err(|e| CoreError::InvalidConfig(format!("node url `{url}` is not a valid URL: {e}")))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(url.to_owned())
    } else {
        Err(CoreError::InvalidConfig(format!(
            "node url `{url}` uses scheme `{}`; only http and https are supported",
            parsed.scheme()
        )))
    }
}
