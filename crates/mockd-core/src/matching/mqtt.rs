//! MQTT topic filter matching and validation
//!
//! `+` matches exactly one level, `#` matches the remainder and is only
//! valid as the last segment. ACL entries use the same matching rules.

use super::MatchEval;
use crate::events::RequestSnapshot;
use crate::model::MqttMockSpec;

/// Check a topic filter for structural validity.
///
/// Invalid filters are rejected at load time, never silently ignored.
pub fn validate_filter(filter: &str) -> Result<(), String> {
    if filter.is_empty() {
        return Err("filter must not be empty".to_string());
    }
    let segments: Vec<&str> = filter.split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.contains('#') && *segment != "#" {
            return Err(format!("'#' must occupy a whole level, found {segment:?}"));
        }
        if segment.contains('+') && *segment != "+" {
            return Err(format!("'+' must occupy a whole level, found {segment:?}"));
        }
        if *segment == "#" && i != segments.len() - 1 {
            return Err("'#' is only valid as the last segment".to_string());
        }
    }
    Ok(())
}

/// Does a concrete topic match a filter?
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut ti = 0;
    for (fi, filter_part) in filter_parts.iter().enumerate() {
        if *filter_part == "#" {
            // Tail wildcard: matches the rest, including zero levels
            return fi == filter_parts.len() - 1;
        }
        let Some(topic_part) = topic_parts.get(ti) else {
            return false;
        };
        if *filter_part != "+" && filter_part != topic_part {
            return false;
        }
        ti += 1;
    }
    ti == topic_parts.len()
}

/// Specificity of a filter: literal levels count double, wildcard levels
/// count single, so `devices/thermostat/status` outranks `devices/+/status`
/// which outranks `devices/#`.
pub fn filter_specificity(filter: &str) -> u32 {
    filter
        .split('/')
        .map(|segment| match segment {
            "#" => 0,
            "+" => 1,
            _ => 2,
        })
        .sum()
}

pub fn eval(spec: &MqttMockSpec, snapshot: &RequestSnapshot) -> MatchEval {
    let mut eval = MatchEval::default();
    if topic_matches(&spec.topic, &snapshot.path) {
        eval.pass("topic", filter_specificity(&spec.topic));
    } else {
        eval.fail(format!(
            "topic filter {} does not match {}",
            spec.topic, snapshot.path
        ));
    }
    eval.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("devices/+/status", "devices/thermostat/status"));
        assert!(!topic_matches("devices/+/status", "devices/a/b/status"));
        assert!(!topic_matches("devices/+/status", "devices/status"));
    }

    #[test]
    fn multi_level_wildcard_is_tail_only() {
        assert!(topic_matches("devices/#", "devices/a/b/c"));
        assert!(topic_matches("devices/#", "devices"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(validate_filter("devices/#/status").is_err());
        assert!(validate_filter("devices/#").is_ok());
    }

    #[test]
    fn wildcards_must_fill_a_level() {
        assert!(validate_filter("devices/temp+").is_err());
        assert!(validate_filter("devices/x#").is_err());
        assert!(validate_filter("devices/+/status").is_ok());
    }

    #[test]
    fn specificity_orders_filters() {
        let exact = filter_specificity("devices/thermostat/status");
        let plus = filter_specificity("devices/+/status");
        let hash = filter_specificity("devices/#");
        assert!(exact > plus);
        assert!(plus > hash);
    }

    #[test]
    fn exact_match_requires_same_levels() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }
}
