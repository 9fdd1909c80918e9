//! MQTT topic names and filters, checked with the `rumqttc` rules.
//!
//! Levels are separated by `/`. In filters `+` matches exactly one level and
//! `#` matches the remaining levels (including none); `#` must be the last
//! level. Topics starting with `$` never match.

use crate::error::BrokerError;

/// Check a concrete topic name used for publishing.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    if topic.is_empty() {
        return Err(invalid(topic, "topic is empty"));
    }
    if !rumqttc::valid_topic(topic) {
        return Err(invalid(topic, "wildcards are not allowed in topic names"));
    }
    if topic.contains('\0') {
        return Err(invalid(topic, "topic contains a NUL character"));
    }
    Ok(())
}

/// Check a subscription filter.
pub fn validate_filter(filter: &str) -> Result<(), BrokerError> {
    if !rumqttc::valid_filter(filter) {
        return Err(invalid(
            filter,
            "wildcards must occupy a whole level and `#` must be last",
        ));
    }
    Ok(())
}

/// Does `topic` match `filter`? Both are assumed valid.
pub fn matches(filter: &str, topic: &str) -> bool {
    rumqttc::matches(topic, filter)
}

fn invalid(topic: &str, reason: &str) -> BrokerError {
    BrokerError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    }
}
