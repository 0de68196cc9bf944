use crate::schema::{CounterBackend, GatehouseConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("identity.base_url is required")]
    MissingIdentityUrl,
    #[error("{field} must be an http(s) URL, got '{value}'")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} contains an unresolved placeholder: '{value}'")]
    UnresolvedPlaceholder { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("rate_limit.redis_url is required when rate_limit.backend = \"redis\"")]
    MissingRedisUrl,
}

impl GatehouseConfig {
    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.identity.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingIdentityUrl);
        }
        if url.contains("${") {
            return Err(ConfigError::UnresolvedPlaceholder {
                field: "identity.base_url",
                value: url.to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl {
                field: "identity.base_url",
                value: url.to_string(),
            });
        }

        for (field, value) in [
            ("identity.timeout_secs", self.identity.timeout_secs),
            ("upstream.timeout_secs", self.upstream.timeout_secs),
            ("registry.refresh_interval_secs", self.registry.refresh_interval_secs),
            ("rate_limit.window_secs", self.rate_limit.window_secs),
            ("rate_limit.limit", u64::from(self.rate_limit.limit)),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(field));
            }
        }

        if self.rate_limit.backend == CounterBackend::Redis {
            match self.rate_limit.redis_url.as_deref().map(str::trim) {
                None | Some("") => return Err(ConfigError::MissingRedisUrl),
                Some(u) if u.contains("${") => {
                    return Err(ConfigError::UnresolvedPlaceholder {
                        field: "rate_limit.redis_url",
                        value: u.to_string(),
                    });
                },
                Some(_) => {},
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GatehouseConfig {
        let mut cfg = GatehouseConfig::default();
        cfg.identity.base_url = "https://lae.example/api".into();
        cfg
    }

    #[test]
    fn defaults_plus_url_are_valid() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn identity_url_is_required() {
        assert_eq!(
            GatehouseConfig::default().validate(),
            Err(ConfigError::MissingIdentityUrl)
        );
    }

    #[test]
    fn rejects_non_http_and_placeholder_urls() {
        let mut cfg = valid();
        cfg.identity.base_url = "ftp://x".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidUrl { .. })));
        cfg.identity.base_url = "${API_URL}".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnresolvedPlaceholder { .. })
        ));
    }

    #[test]
    fn rejects_zero_windows() {
        let mut cfg = valid();
        cfg.rate_limit.window_secs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("rate_limit.window_secs")));
    }

    #[test]
    fn redis_backend_needs_url() {
        let mut cfg = valid();
        cfg.rate_limit.redis_url = None;
        assert_eq!(cfg.validate(), Err(ConfigError::MissingRedisUrl));
        cfg.rate_limit.backend = CounterBackend::Memory;
        assert_eq!(cfg.validate(), Ok(()));
    }
}
