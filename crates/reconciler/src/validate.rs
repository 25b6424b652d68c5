//! Configuration errors that no amount of retrying will fix.

use redbroker_api::{RedisBrokerSpec, SecretKeyRef, BROKER_DEPLOYMENT_READY, REDIS_DEPLOYMENT_READY};
use redbroker_core::ConditionType;

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidSpec {
    /// Dependent condition that carries the verdict.
    pub condition: ConditionType,
    pub reason: &'static str,
    pub message: String,
}

impl InvalidSpec {
    fn redis(reason: &'static str, message: String) -> Self {
        Self { condition: REDIS_DEPLOYMENT_READY, reason, message }
    }

    fn broker(reason: &'static str, message: String) -> Self {
        Self { condition: BROKER_DEPLOYMENT_READY, reason, message }
    }
}

fn secret_ok(s: &SecretKeyRef) -> bool {
    !s.name.is_empty() && !s.key.is_empty()
}

pub fn validate(spec: &RedisBrokerSpec) -> Result<(), InvalidSpec> {
    if let Some(conn) = spec.external_redis() {
        if !(conn.url.starts_with("redis://") || conn.url.starts_with("rediss://")) {
            return Err(InvalidSpec::redis(
                "InvalidRedisURL",
                format!("redis url {:?} must use the redis:// or rediss:// scheme", conn.url),
            ));
        }
        let creds = [conn.username.as_ref(), conn.password.as_ref()];
        if creds.into_iter().flatten().any(|s| !secret_ok(s)) {
            return Err(InvalidSpec::redis(
                "InvalidRedisCredentials",
                "redis credential references need both a secret name and a key".to_string(),
            ));
        }
    }
    if spec.stream().trim().is_empty() {
        return Err(InvalidSpec::broker("InvalidStream", "redis stream name must not be empty".to_string()));
    }
    if spec.stream_max_len() < 0 {
        return Err(InvalidSpec::broker(
            "InvalidStreamMaxLen",
            format!("stream max length {} must not be negative", spec.stream_max_len()),
        ));
    }
    let port = spec.broker_port();
    if !(1..=65535).contains(&port) {
        return Err(InvalidSpec::broker("InvalidPort", format!("broker port {} is outside 1..=65535", port)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redbroker_api::{BrokerSpec, RedisConnection, RedisSpec};

    fn external(url: &str) -> RedisBrokerSpec {
        RedisBrokerSpec {
            redis: Some(RedisSpec {
                connection: Some(RedisConnection { url: url.into(), ..Default::default() }),
                ..Default::default()
            }),
            broker: None,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate(&RedisBrokerSpec::default()), Ok(()));
        assert_eq!(validate(&external("rediss://cache:6380")), Ok(()));
    }

    #[test]
    fn bad_scheme_fails_redis_tier() {
        let err = validate(&external("http://cache")).unwrap_err();
        assert_eq!(err.condition, REDIS_DEPLOYMENT_READY);
        assert_eq!(err.reason, "InvalidRedisURL");
    }

    #[test]
    fn half_empty_secret_is_rejected() {
        let mut spec = external("redis://cache");
        if let Some(c) = spec.redis.as_mut().and_then(|r| r.connection.as_mut()) {
            c.username = Some(SecretKeyRef { name: "s".into(), key: String::new() });
        }
        assert_eq!(validate(&spec).unwrap_err().reason, "InvalidRedisCredentials");
    }

    #[test]
    fn broker_tier_errors() {
        let spec = RedisBrokerSpec {
            redis: Some(RedisSpec { stream: Some(" ".into()), ..Default::default() }),
            broker: None,
        };
        assert_eq!(validate(&spec).unwrap_err().reason, "InvalidStream");

        for port in [0, 70000, -1] {
            let spec = RedisBrokerSpec { redis: None, broker: Some(BrokerSpec { port: Some(port), observability: None }) };
            let err = validate(&spec).unwrap_err();
            assert_eq!(err.condition, BROKER_DEPLOYMENT_READY);
            assert_eq!(err.reason, "InvalidPort");
        }
    }
}
