//! Detection API payload → [`AccountSnapshot`].
//!
//! Every lookup defaults on absence, so a partial payload still yields a
//! snapshot. `no_profile` forces the `not_found` status.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::account::{account_key, AccountSnapshot, BanFlags};

/// Map a parsed API response for `subject_key` into a snapshot observed at `observed_at`.
pub fn map_snapshot(subject_key: &str, payload: &Value, observed_at: DateTime<Utc>) -> AccountSnapshot {
    let legacy = payload.pointer("/user/legacy").unwrap_or(&Value::Null);

    let flags = BanFlags {
        search_ban: flag(payload, "search_ban"),
        search_suggestion_ban: flag(payload, "search_suggestion_ban"),
        ghost_ban: flag(payload, "ghost_ban"),
        no_reply: flag(payload, "no_reply"),
        reply_deboosting: flag(payload, "reply_deboosting"),
        no_tweet: flag(payload, "no_tweet"),
        suspended: flag(payload, "suspended"),
        protected: flag(payload, "protected") || flag(legacy, "protected"),
        not_found: flag(payload, "no_profile"),
    };

    let handle = text(legacy, "screen_name").unwrap_or_else(|| subject_key.to_string());

    AccountSnapshot {
        account_key: account_key(subject_key),
        display_name: text(legacy, "name").unwrap_or_default(),
        handle,
        status: flags.status(),
        flags,
        follower_count: count(legacy, "followers_count"),
        following_count: count(legacy, "friends_count"),
        media_count: count(legacy, "media_count"),
        favourite_count: count(legacy, "favourites_count"),
        post_count: count(legacy, "statuses_count"),
        updated_at: observed_at,
    }
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Counters may arrive as numbers or numeric strings; anything else is 0.
fn count(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0)
            .max(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0).max(0),
        _ => 0,
    }
}
