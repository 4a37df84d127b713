//! Parsing for `drbdsetup events2` lines and the reconcile-trigger predicate.
//!
//! A line looks like:
//!
//! ```text
//! change connection name:.drbdctrl peer-node-id:1 conn-name:bravo role:Secondary
//! ```
//!
//! The first two whitespace-separated tokens are the event type and the
//! source; everything after is `key:value` pairs.

use std::collections::BTreeMap;

/// One parsed `events2` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLine {
    pub event_type: String,
    pub source: String,
    pub fields: BTreeMap<String, String>,
}

impl EventLine {
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let event_type = tokens.next()?.to_string();
        let source = tokens.next()?.to_string();

        let mut fields = BTreeMap::new();
        for token in tokens {
            if let Some((key, value)) = token.split_once(':') {
                fields.insert(key.to_string(), value.to_string());
            }
        }

        Some(Self {
            event_type,
            source,
            fields,
        })
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// True if `line` should cause the daemon to schedule a reconcile pass.
///
/// Limited to changes on the control resource's connection/peer-device
/// lines that indicate this node just lost primacy or fell behind a peer:
/// a `connection` line transitioning to `role:Secondary`, or a
/// `peer-device` line transitioning to `replication:SyncTarget`.
pub fn is_reconcile_trigger(event: &EventLine, control_resource_name: &str) -> bool {
    if event.event_type != "change" {
        return false;
    }
    if event.field("name") != Some(control_resource_name) {
        return false;
    }
    match event.source.as_str() {
        "connection" => event.field("role") == Some("Secondary"),
        "peer-device" => event.field("replication") == Some("SyncTarget"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_source_and_fields() {
        let event =
            EventLine::parse("change connection name:.drbdctrl conn-name:bravo role:Secondary")
                .unwrap();
        assert_eq!(event.event_type, "change");
        assert_eq!(event.source, "connection");
        assert_eq!(event.field("role"), Some("Secondary"));
    }

    #[test]
    fn parse_rejects_line_with_no_source() {
        assert!(EventLine::parse("change").is_none());
    }

    #[test]
    fn connection_secondary_on_control_volume_triggers() {
        let event =
            EventLine::parse("change connection name:.drbdctrl role:Secondary").unwrap();
        assert!(is_reconcile_trigger(&event, ".drbdctrl"));
    }

    #[test]
    fn peer_device_sync_target_on_control_volume_triggers() {
        let event = EventLine::parse(
            "change peer-device name:.drbdctrl replication:SyncTarget",
        )
        .unwrap();
        assert!(is_reconcile_trigger(&event, ".drbdctrl"));
    }

    #[test]
    fn connection_primary_does_not_trigger() {
        let event = EventLine::parse("change connection name:.drbdctrl role:Primary").unwrap();
        assert!(!is_reconcile_trigger(&event, ".drbdctrl"));
    }

    #[test]
    fn events_on_a_data_resource_do_not_trigger() {
        let event = EventLine::parse("change connection name:res0 role:Secondary").unwrap();
        assert!(!is_reconcile_trigger(&event, ".drbdctrl"));
    }

    #[test]
    fn exists_events_never_trigger() {
        let event = EventLine::parse("exists connection name:.drbdctrl role:Secondary").unwrap();
        assert!(!is_reconcile_trigger(&event, ".drbdctrl"));
    }
}
