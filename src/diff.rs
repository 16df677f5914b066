use crate::types::{DpValue, Event, StatusSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Change {
    pub code: String,
    pub old: Option<DpValue>,
    pub new: Option<DpValue>,
}

/// Codes whose value differs between two snapshots, in code order.
/// Codes that disappeared are reported with `new: None`.
pub(crate) fn diff_snapshots(previous: &StatusSnapshot, current: &StatusSnapshot) -> Vec<Change> {
    let mut changes: Vec<Change> = current
        .iter()
        .filter(|(code, value)| previous.get(*code) != Some(*value))
        .map(|(code, value)| Change {
            code: code.clone(),
            old: previous.get(code).cloned(),
            new: Some(value.clone()),
        })
        .collect();

    changes.extend(
        previous
            .iter()
            .filter(|(code, _)| !current.contains_key(*code))
            .map(|(code, value)| Change {
                code: code.clone(),
                old: Some(value.clone()),
                new: None,
            }),
    );
    changes.sort_by(|a, b| a.code.cmp(&b.code));
    changes
}

pub(crate) fn change_events(changes: Vec<Change>) -> Vec<Event> {
    changes
        .into_iter()
        .map(|c| Event::DataPointChanged {
            code: c.code,
            old: c.old,
            new: c.new,
        })
        .collect()
}
