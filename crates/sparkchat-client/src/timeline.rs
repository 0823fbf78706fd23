//! Timeline view model.
//!
//! Turns the reconciled list into what a chat view draws: day separators,
//! run-length sender grouping, and the auto-scroll decision.

use std::time::Duration;

use chrono::NaiveDate;
use sparkchat_core::Message;

/// Consecutive messages from one sender closer than this are drawn as one run.
pub const SEQUENTIAL_WINDOW: Duration = Duration::from_secs(60);

/// One message as drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry<'a> {
    /// The message.
    pub message: &'a Message,
    /// Authored by the local user.
    pub own: bool,
    /// Continues a run from the same sender (no avatar, tighter spacing).
    pub sequential: bool,
}

/// Messages of one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup<'a> {
    /// Calendar day.
    pub date: NaiveDate,
    /// Entries in list order.
    pub entries: Vec<TimelineEntry<'a>>,
}

/// True if `current` continues a run started by `previous`.
pub fn is_sequential(previous: &Message, current: &Message) -> bool {
    previous.sender_id == current.sender_id
        && (current.created_at - previous.created_at)
            .to_std()
            .is_ok_and(|gap| gap < SEQUENTIAL_WINDOW)
}

/// Group an ordered list by calendar day.
///
/// Runs are computed over the whole list, so a run can continue across a day
/// separator.
pub fn group_by_day<'a>(messages: &'a [Message], self_id: &str) -> Vec<DayGroup<'a>> {
    let mut groups: Vec<DayGroup<'a>> = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        let sequential = index
            .checked_sub(1)
            .and_then(|prev| messages.get(prev))
            .is_some_and(|prev| is_sequential(prev, message));
        let entry = TimelineEntry { message, own: message.sender_id == self_id, sequential };

        let date = message.created_at.date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.entries.push(entry),
            _ => groups.push(DayGroup { date, entries: vec![entry] }),
        }
    }

    groups
}

/// True if the view should scroll to the newest message: the newest message
/// is the local user's own.
pub fn should_autoscroll(messages: &[Message], self_id: &str) -> bool {
    messages.last().is_some_and(|m| m.sender_id == self_id)
}
