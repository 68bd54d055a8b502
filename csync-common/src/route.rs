//! Route keys address one remote sync target.

use crate::errors::{Categorized, ErrorCategory};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Path prefix shared by the sidecar and editor endpoints.
pub const PUSH_PATH_PREFIX: &str = "/api/v1/push";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteKeyError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} contains an invalid character: {value:?}")]
    InvalidCharacter { field: &'static str, value: String },
}

impl Categorized for RouteKeyError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Config
    }
}

/// `(app_id, deployment_id)`. Both parts are non-empty and usable as a single
/// URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    app_id: String,
    deployment_id: String,
}

fn check_segment(field: &'static str, value: &str) -> Result<(), RouteKeyError> {
    if value.trim().is_empty() {
        return Err(RouteKeyError::Empty { field });
    }
    if value.contains(['/', '?', '#']) || value.chars().any(char::is_control) {
        return Err(RouteKeyError::InvalidCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl RouteKey {
    pub fn new(
        app_id: impl Into<String>,
        deployment_id: impl Into<String>,
    ) -> Result<Self, RouteKeyError> {
        let app_id = app_id.into();
        let deployment_id = deployment_id.into();
        check_segment("app_id", &app_id)?;
        check_segment("deployment_id", &deployment_id)?;
        Ok(Self {
            app_id,
            deployment_id,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Relay path a sidecar connects to.
    pub fn sidecar_path(&self) -> String {
        format!(
            "{PUSH_PATH_PREFIX}/sidecar/{}/{}",
            self.app_id, self.deployment_id
        )
    }

    /// Relay path an editor-side publisher connects to.
    pub fn editor_path(&self) -> String {
        format!("{PUSH_PATH_PREFIX}/ide/{}/{}", self.app_id, self.deployment_id)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.deployment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_key() {
        let key = RouteKey::new("shop", "prod-1").unwrap();
        assert_eq!(key.app_id(), "shop");
        assert_eq!(key.deployment_id(), "prod-1");
        assert_eq!(key.to_string(), "shop/prod-1");
        assert_eq!(key.sidecar_path(), "/api/v1/push/sidecar/shop/prod-1");
        assert_eq!(key.editor_path(), "/api/v1/push/ide/shop/prod-1");
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert_eq!(
            RouteKey::new("", "d").unwrap_err(),
            RouteKeyError::Empty { field: "app_id" }
        );
        assert_eq!(
            RouteKey::new("a", "  ").unwrap_err(),
            RouteKeyError::Empty {
                field: "deployment_id"
            }
        );
    }

    #[test]
    fn test_path_separator_rejected() {
        assert!(matches!(
            RouteKey::new("a/b", "d"),
            Err(RouteKeyError::InvalidCharacter { field: "app_id", .. })
        ));
        assert!(RouteKey::new("a", "d?x=1").is_err());
    }

    #[test]
    fn test_keys_differ_by_either_part() {
        let a = RouteKey::new("app", "one").unwrap();
        let b = RouteKey::new("app", "two").unwrap();
        let c = RouteKey::new("other", "one").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, RouteKey::new("app", "one").unwrap());
    }
}
