use std::collections::BTreeMap;
use std::time::Duration;

use stan_gax::StanError;

/// Store-wide resource limits, with optional per-channel-name overrides.
/// Negative values are rejected at construction time rather than clamped.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_channels: u64,
    pub max_subscriptions: u64,
    pub max_msgs: u64,
    pub max_bytes: u64,
    pub max_age: Duration,
    /// Keyed by channel-name *pattern* (a dot-separated subject with `*`
    /// matching exactly one token and a trailing `>` matching one or more),
    /// not by literal channel name — `"orders.*"` matches `"orders.123"`.
    /// A `BTreeMap` rather than a `HashMap` so `resolve`'s specificity
    /// tie-break sees override patterns in a stable order.
    pub channel_overrides: BTreeMap<String, ChannelLimits>,
}

/// Per-channel overrides; any field left `None` falls back to the
/// store-wide [`Limits`] value. Resolved once at `CreateChannel` time.
#[derive(Clone, Debug, Default)]
pub struct ChannelLimits {
    pub max_subscriptions: Option<u64>,
    pub max_msgs: Option<u64>,
    pub max_bytes: Option<u64>,
    pub max_age: Option<Duration>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_channels: 100,
            max_subscriptions: 1000,
            max_msgs: 1_000_000,
            max_bytes: 1024 * 1024 * 1024,
            max_age: Duration::ZERO,
            channel_overrides: BTreeMap::new(),
        }
    }
}

/// Whether channel-name `pattern` (itself allowed to use subscribe-style
/// wildcard tokens) matches the concrete, wildcard-free `name` — the same
/// token-at-a-time grammar `subject::validate_channel_name` enforces `name`
/// against, extended with `*` (exactly one token) and a trailing `>` (one
/// or more remaining tokens).
fn pattern_matches(pattern: &str, name: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut name_tokens = name.split('.');
    loop {
        match (pattern_tokens.next(), name_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some(">"), None) => return false,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(n)) => {
                if p != n {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// How specific a matching pattern is: its count of literal (non-wildcard)
/// tokens, then its total token count — `resolve` prefers the override
/// whose pattern pins down the most tokens when more than one matches.
fn specificity(pattern: &str) -> (usize, usize) {
    let tokens: Vec<&str> = pattern.split('.').collect();
    let literal = tokens.iter().filter(|t| **t != "*" && **t != ">").count();
    (literal, tokens.len())
}

/// The limits actually in effect for one channel, after folding in any
/// matching [`ChannelLimits`] override.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedLimits {
    pub max_subscriptions: u64,
    pub max_msgs: u64,
    pub max_bytes: u64,
    pub max_age: Duration,
}

impl Limits {
    /// Rejects negative-equivalent (here: nonsensical zero-with-override)
    /// configuration eagerly, the way store construction is required to.
    pub fn validate(&self) -> Result<(), StanError> {
        if self.max_channels == 0 {
            return Err(StanError::invalid_argument("max_channels must be > 0"));
        }
        if self.max_subscriptions == 0 {
            return Err(StanError::invalid_argument("max_subscriptions must be > 0"));
        }
        Ok(())
    }

    /// Resolves the overrides in effect for `channel_name`: an override
    /// keyed by the literal name wins outright; otherwise every override
    /// pattern is matched (§4 "keyed by channel name pattern") and the most
    /// specific match, if any, applies.
    pub fn resolve(&self, channel_name: &str) -> ResolvedLimits {
        let over = self.channel_overrides.get(channel_name).or_else(|| {
            self.channel_overrides
                .iter()
                .filter(|(pattern, _)| pattern_matches(pattern, channel_name))
                .max_by_key(|(pattern, _)| specificity(pattern))
                .map(|(_, limits)| limits)
        });
        ResolvedLimits {
            max_subscriptions: over
                .and_then(|o| o.max_subscriptions)
                .unwrap_or(self.max_subscriptions),
            max_msgs: over.and_then(|o| o.max_msgs).unwrap_or(self.max_msgs),
            max_bytes: over.and_then(|o| o.max_bytes).unwrap_or(self.max_bytes),
            max_age: over.and_then(|o| o.max_age).unwrap_or(self.max_age),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_override_wins_over_store_wide_default() {
        let mut limits = Limits {
            max_msgs: 100,
            ..Default::default()
        };
        limits.channel_overrides.insert(
            "orders".to_string(),
            ChannelLimits {
                max_msgs: Some(10),
                ..Default::default()
            },
        );
        assert_eq!(limits.resolve("orders").max_msgs, 10);
        assert_eq!(limits.resolve("other").max_msgs, 100);
    }

    #[test]
    fn star_token_matches_exactly_one_segment() {
        let mut limits = Limits {
            max_msgs: 100,
            ..Default::default()
        };
        limits.channel_overrides.insert(
            "orders.*".to_string(),
            ChannelLimits {
                max_msgs: Some(10),
                ..Default::default()
            },
        );
        assert_eq!(limits.resolve("orders.123").max_msgs, 10);
        assert_eq!(limits.resolve("orders.123.extra").max_msgs, 100, "star matches exactly one token");
        assert_eq!(limits.resolve("orders").max_msgs, 100);
    }

    #[test]
    fn trailing_gt_token_matches_one_or_more_segments() {
        let mut limits = Limits {
            max_msgs: 100,
            ..Default::default()
        };
        limits.channel_overrides.insert(
            "orders.>".to_string(),
            ChannelLimits {
                max_msgs: Some(10),
                ..Default::default()
            },
        );
        assert_eq!(limits.resolve("orders.123").max_msgs, 10);
        assert_eq!(limits.resolve("orders.123.extra").max_msgs, 10);
        assert_eq!(limits.resolve("orders").max_msgs, 100, "> requires at least one trailing token");
    }

    #[test]
    fn exact_name_beats_a_matching_pattern() {
        let mut limits = Limits {
            max_msgs: 100,
            ..Default::default()
        };
        limits.channel_overrides.insert(
            "orders.>".to_string(),
            ChannelLimits {
                max_msgs: Some(10),
                ..Default::default()
            },
        );
        limits.channel_overrides.insert(
            "orders.123".to_string(),
            ChannelLimits {
                max_msgs: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(limits.resolve("orders.123").max_msgs, 1);
        assert_eq!(limits.resolve("orders.456").max_msgs, 10);
    }

    #[test]
    fn the_most_specific_pattern_wins_among_several_matches() {
        let mut limits = Limits::default();
        limits.channel_overrides.insert(
            "orders.>".to_string(),
            ChannelLimits {
                max_msgs: Some(10),
                ..Default::default()
            },
        );
        limits.channel_overrides.insert(
            "orders.*.urgent".to_string(),
            ChannelLimits {
                max_msgs: Some(999),
                ..Default::default()
            },
        );
        assert_eq!(limits.resolve("orders.123.urgent").max_msgs, 999);
        assert_eq!(limits.resolve("orders.123.normal").max_msgs, 10);
    }
}
