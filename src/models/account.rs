use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Derived classification of an account, stored lower-case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    SearchBan,
    SearchSuggestionBan,
    GhostBan,
    ReplyDeboosting,
    NoReply,
    NotFound,
}

/// Independent restriction flags reported by the detection API.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanFlags {
    pub search_ban: bool,
    pub search_suggestion_ban: bool,
    pub ghost_ban: bool,
    pub no_reply: bool,
    pub reply_deboosting: bool,
    pub no_tweet: bool,
    pub suspended: bool,
    pub protected: bool,
    pub not_found: bool,
}

impl BanFlags {
    /// Collapse the flags into a single status.
    ///
    /// `not_found` wins over everything else; `protected` and `no_tweet`
    /// never change the status on their own.
    pub fn status(&self) -> AccountStatus {
        if self.not_found {
            AccountStatus::NotFound
        } else if self.suspended {
            AccountStatus::Suspended
        } else if self.search_ban {
            AccountStatus::SearchBan
        } else if self.search_suggestion_ban {
            AccountStatus::SearchSuggestionBan
        } else if self.ghost_ban {
            AccountStatus::GhostBan
        } else if self.reply_deboosting {
            AccountStatus::ReplyDeboosting
        } else if self.no_reply {
            AccountStatus::NoReply
        } else {
            AccountStatus::Active
        }
    }
}

/// Normalized state of one monitored account, built from a single API response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSnapshot {
    /// Conflict key, `"@" + subject key`.
    pub account_key: String,
    pub handle: String,
    pub display_name: String,
    pub status: AccountStatus,
    pub flags: BanFlags,
    pub follower_count: i64,
    pub following_count: i64,
    pub media_count: i64,
    pub favourite_count: i64,
    pub post_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Build the account key for a normalized subject.
pub fn account_key(subject_key: &str) -> String {
    format!("@{}", subject_key)
}
