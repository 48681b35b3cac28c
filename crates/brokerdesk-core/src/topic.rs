//! MQTT topic filter and topic name rules.
//!
//! Filters are what clients subscribe to (may contain `+` and `#`); names are
//! what messages are published on (never contain wildcards).

use crate::error::{Error, Result};

/// Longest topic the protocol can encode (two-byte length prefix).
pub const MAX_TOPIC_LEN: usize = 65_535;

fn check_common(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic("topic is empty".into()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::InvalidTopic(format!(
            "topic is {} bytes, limit is {MAX_TOPIC_LEN}",
            topic.len()
        )));
    }
    if topic.contains('\0') {
        return Err(Error::InvalidTopic("topic contains NUL".into()));
    }
    Ok(())
}

/// Validate a subscription filter.
pub fn validate_filter(filter: &str) -> Result<()> {
    check_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != last) {
            return Err(Error::InvalidTopic(
                "'#' must occupy the whole last level".into(),
            ));
        }
        if level.contains('+') && *level != "+" {
            return Err(Error::InvalidTopic("'+' must occupy a whole level".into()));
        }
    }
    Ok(())
}

/// Validate a topic name used for publishing.
pub fn validate_name(name: &str) -> Result<()> {
    check_common(name)?;
    if name.contains(['+', '#']) {
        return Err(Error::InvalidTopic(
            "wildcards are not allowed when publishing".into(),
        ));
    }
    Ok(())
}

/// Whether a filter contains wildcards.
pub fn is_wildcard(filter: &str) -> bool {
    filter.contains(['+', '#'])
}

/// Match a topic name against a (valid) filter.
pub fn matches(filter: &str, name: &str) -> bool {
    // Names under `$` (e.g. `$SYS`) are only reachable by filters that spell
    // the first level out.
    if name.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut name_levels = name.split('/');
    loop {
        match (filter_levels.next(), name_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(n)) if f == n => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
