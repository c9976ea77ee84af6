//! Request security: authentication, origin screening, rate limiting and capability
//! access control.
//!
//! The checks run in a fixed order — authentication, origin, rate limit, access control —
//! and all of them precede argument validation and handler execution. The gate is
//! constructed once from configuration and shared across transports.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::SecurityConfig;
use crate::context::Caller;
use crate::errors::SecurityError;

/// Screen a request `Origin` header value.
///
/// Allowed: the literal `"null"` (sent by non-browser and sandboxed contexts), any
/// `https://` origin, and plain-HTTP loopback (`localhost` / `127.0.0.1` on any port)
/// for local development. Everything else — plain HTTP to a real host, `file://`,
/// `javascript:`, an empty value — is rejected. This screens out the obviously hostile;
/// the CORS allow-list is the precise policy layer on top.
pub fn validate_origin(origin: &str) -> Result<(), SecurityError> {
    if origin == "null" {
        return Ok(());
    }
    if origin.starts_with("https://") && origin.len() > "https://".len() {
        return Ok(());
    }
    if let Some(rest) = origin.strip_prefix("http://") {
        let host = rest.split(':').next().unwrap_or("");
        if host == "localhost" || host == "127.0.0.1" {
            return Ok(());
        }
    }
    Err(SecurityError::OriginRejected(origin.to_string()))
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// The shared security gate. Interior mutability is confined to the rate-limit buckets.
pub struct SecurityGate {
    config: SecurityConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Authentication. A no-op unless API keys are configured.
    pub fn check_auth(&self, caller: &Caller) -> Result<(), SecurityError> {
        if self.config.api_keys.is_empty() {
            return Ok(());
        }
        match &caller.api_key {
            Some(key) if self.config.api_keys.iter().any(|k| k == key) => Ok(()),
            _ => Err(SecurityError::Authentication),
        }
    }

    /// Origin screening. A missing header (non-browser client) passes.
    pub fn check_origin(&self, origin: Option<&str>) -> Result<(), SecurityError> {
        match origin {
            Some(value) => validate_origin(value),
            None => Ok(()),
        }
    }

    /// Token-bucket rate limiting, keyed by the caller's rate identity. A no-op unless
    /// a rate limit is configured; callers with no identity at all are not limited.
    pub fn check_rate(&self, caller: &Caller) -> Result<(), SecurityError> {
        let Some(limit) = &self.config.rate_limit else {
            return Ok(());
        };
        let Some(identity) = caller.rate_identity() else {
            return Ok(());
        };

        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limit lock poisoned");
        let bucket = buckets.entry(identity.to_string()).or_insert(Bucket {
            tokens: limit.capacity as f64,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * limit.refill_per_second).min(limit.capacity as f64);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            tracing::warn!(identity = %identity, "Rate limit exceeded");
            Err(SecurityError::RateLimit)
        }
    }

    /// Capability access control: the global allow/deny lists, then any per-key rules
    /// for the presenting API key. Deny always wins over allow.
    pub fn check_access(&self, caller: &Caller, capability: &str) -> Result<(), SecurityError> {
        let Some(access) = &self.config.access_control else {
            return Ok(());
        };

        let denied = |allow: &Option<Vec<String>>, deny: &[String]| {
            deny.iter().any(|name| name == capability)
                || allow
                    .as_ref()
                    .is_some_and(|names| !names.iter().any(|name| name == capability))
        };

        if denied(&access.allow, &access.deny) {
            return Err(SecurityError::AccessDenied(capability.to_string()));
        }
        if let Some(rules) = caller.api_key.as_ref().and_then(|key| access.per_key.get(key)) {
            if denied(&rules.allow, &rules.deny) {
                return Err(SecurityError::AccessDenied(capability.to_string()));
            }
        }
        Ok(())
    }

    /// The transport-level gate, in the mandated order. Access control runs later, in
    /// the dispatcher, once the capability name is known.
    pub fn check_request(
        &self,
        caller: &Caller,
        origin: Option<&str>,
    ) -> Result<(), SecurityError> {
        self.check_auth(caller)?;
        self.check_origin(origin)?;
        self.check_rate(caller)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessControlConfig, AccessRules, RateLimitConfig};

    #[test]
    fn origin_allow_list() {
        assert!(validate_origin("null").is_ok());
        assert!(validate_origin("https://example.com").is_ok());
        assert!(validate_origin("http://localhost:3000").is_ok());
        assert!(validate_origin("http://127.0.0.1:8080").is_ok());

        assert!(validate_origin("").is_err());
        assert!(validate_origin("http://evil.example.com").is_err());
        assert!(validate_origin("file:///etc/passwd").is_err());
        assert!(validate_origin("javascript:alert(1)").is_err());
        assert!(validate_origin("data:text/html,x").is_err());
        assert!(validate_origin("https://").is_err());
    }

    #[test]
    fn missing_origin_header_passes() {
        let gate = SecurityGate::new(SecurityConfig::default());
        assert!(gate.check_origin(None).is_ok());
        assert_eq!(
            gate.check_origin(Some("http://evil.example.com")),
            Err(SecurityError::OriginRejected(
                "http://evil.example.com".to_string()
            ))
        );
    }

    #[test]
    fn auth_disabled_without_configured_keys() {
        let gate = SecurityGate::new(SecurityConfig::default());
        assert!(gate.check_auth(&Caller::default()).is_ok());
    }

    #[test]
    fn auth_requires_a_configured_key() {
        let gate = SecurityGate::new(SecurityConfig {
            api_keys: vec!["secret".to_string()],
            ..Default::default()
        });

        assert_eq!(
            gate.check_auth(&Caller::default()),
            Err(SecurityError::Authentication)
        );
        assert_eq!(
            gate.check_auth(&Caller {
                api_key: Some("wrong".to_string()),
                ..Default::default()
            }),
            Err(SecurityError::Authentication)
        );
        assert!(gate
            .check_auth(&Caller {
                api_key: Some("secret".to_string()),
                ..Default::default()
            })
            .is_ok());
    }

    #[test]
    fn rate_limit_burst_then_rejection() {
        let gate = SecurityGate::new(SecurityConfig {
            rate_limit: Some(RateLimitConfig {
                capacity: 3,
                refill_per_second: 0.001,
            }),
            ..Default::default()
        });
        let caller = Caller {
            remote_addr: Some("10.0.0.1".to_string()),
            ..Default::default()
        };

        for _ in 0..3 {
            assert!(gate.check_rate(&caller).is_ok());
        }
        assert_eq!(gate.check_rate(&caller), Err(SecurityError::RateLimit));

        // A different identity has its own bucket.
        let other = Caller {
            remote_addr: Some("10.0.0.2".to_string()),
            ..Default::default()
        };
        assert!(gate.check_rate(&other).is_ok());
    }

    #[test]
    fn rate_limit_refills_over_time() {
        let gate = SecurityGate::new(SecurityConfig {
            rate_limit: Some(RateLimitConfig {
                capacity: 1,
                refill_per_second: 50.0,
            }),
            ..Default::default()
        });
        let caller = Caller {
            session_id: Some("sess".to_string()),
            ..Default::default()
        };

        assert!(gate.check_rate(&caller).is_ok());
        assert_eq!(gate.check_rate(&caller), Err(SecurityError::RateLimit));
        std::thread::sleep(std::time::Duration::from_millis(40));
        assert!(gate.check_rate(&caller).is_ok());
    }

    #[test]
    fn access_control_deny_wins_over_allow() {
        let gate = SecurityGate::new(SecurityConfig {
            access_control: Some(AccessControlConfig {
                allow: Some(vec!["calculate".to_string(), "echo".to_string()]),
                deny: vec!["echo".to_string()],
                per_key: Default::default(),
            }),
            ..Default::default()
        });
        let caller = Caller::default();

        assert!(gate.check_access(&caller, "calculate").is_ok());
        assert_eq!(
            gate.check_access(&caller, "echo"),
            Err(SecurityError::AccessDenied("echo".to_string()))
        );
        assert_eq!(
            gate.check_access(&caller, "unlisted"),
            Err(SecurityError::AccessDenied("unlisted".to_string()))
        );
    }

    #[test]
    fn per_key_rules_narrow_the_global_policy() {
        let mut per_key = std::collections::BTreeMap::new();
        per_key.insert(
            "limited".to_string(),
            AccessRules {
                allow: Some(vec!["echo".to_string()]),
                deny: vec![],
            },
        );
        let gate = SecurityGate::new(SecurityConfig {
            api_keys: vec!["limited".to_string(), "full".to_string()],
            access_control: Some(AccessControlConfig {
                allow: None,
                deny: vec![],
                per_key,
            }),
            ..Default::default()
        });

        let limited = Caller {
            api_key: Some("limited".to_string()),
            ..Default::default()
        };
        assert!(gate.check_access(&limited, "echo").is_ok());
        assert!(gate.check_access(&limited, "calculate").is_err());

        let full = Caller {
            api_key: Some("full".to_string()),
            ..Default::default()
        };
        assert!(gate.check_access(&full, "calculate").is_ok());
    }
}
