use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use alumnet_types::models::ChatMessage;

/// Display order of a message within its thread.
///
/// Resolved timestamps sort ascending; a message whose server timestamp is
/// not written yet sorts after every resolved one. Ties fall back to the
/// store's write sequence, which never changes between reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOrder {
    pub timestamp: Option<DateTime<Utc>>,
    pub seq: i64,
}

impl MessageOrder {
    pub fn of(message: &ChatMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            seq: message.seq,
        }
    }
}

impl Ord for MessageOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_time = match (self.timestamp, other.timestamp) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_time.then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for MessageOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorts a full snapshot in place.
pub fn sort_messages(messages: &mut [ChatMessage]) {
    messages.sort_by_key(MessageOrder::of);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(seq: i64, secs: Option<i64>) -> ChatMessage {
        ChatMessage {
            id: format!("m{}", seq),
            sender_id: "u1".into(),
            text: "x".into(),
            timestamp: secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            seq,
        }
    }

    #[test]
    fn pending_sorts_last_and_ties_keep_write_order() {
        let mut messages = vec![
            msg(1, None),
            msg(2, Some(20)),
            msg(3, Some(10)),
            msg(4, Some(20)),
            msg(5, None),
        ];
        sort_messages(&mut messages);

        let seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 2, 4, 1, 5]);
    }

    #[test]
    fn resolved_is_before_pending() {
        let resolved = MessageOrder { timestamp: Some(Utc::now()), seq: 9 };
        let pending = MessageOrder { timestamp: None, seq: 1 };
        assert!(resolved < pending);
    }
}
