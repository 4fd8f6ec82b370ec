use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::models::account::{AccountSnapshot, AccountStatus, BanFlags};

/// Insert or replace the snapshot stored under its account key.
///
/// Every column comes from the snapshot itself, so repeating the call is a no-op.
pub async fn upsert_account(pool: &PgPool, snapshot: &AccountSnapshot) -> Result<(), sqlx::Error> {
    let flags = &snapshot.flags;

    sqlx::query(
        r#"
        INSERT INTO accounts (
            account_key, handle, display_name, status,
            search_ban, search_suggestion_ban, ghost_ban, no_reply, reply_deboosting,
            no_tweet, suspended, protected, not_found,
            follower_count, following_count, media_count, favourite_count, post_count,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT (account_key) DO UPDATE SET
            handle = EXCLUDED.handle,
            display_name = EXCLUDED.display_name,
            status = EXCLUDED.status,
            search_ban = EXCLUDED.search_ban,
            search_suggestion_ban = EXCLUDED.search_suggestion_ban,
            ghost_ban = EXCLUDED.ghost_ban,
            no_reply = EXCLUDED.no_reply,
            reply_deboosting = EXCLUDED.reply_deboosting,
            no_tweet = EXCLUDED.no_tweet,
            suspended = EXCLUDED.suspended,
            protected = EXCLUDED.protected,
            not_found = EXCLUDED.not_found,
            follower_count = EXCLUDED.follower_count,
            following_count = EXCLUDED.following_count,
            media_count = EXCLUDED.media_count,
            favourite_count = EXCLUDED.favourite_count,
            post_count = EXCLUDED.post_count,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&snapshot.account_key)
    .bind(&snapshot.handle)
    .bind(&snapshot.display_name)
    .bind(snapshot.status.as_ref())
    .bind(flags.search_ban)
    .bind(flags.search_suggestion_ban)
    .bind(flags.ghost_ban)
    .bind(flags.no_reply)
    .bind(flags.reply_deboosting)
    .bind(flags.no_tweet)
    .bind(flags.suspended)
    .bind(flags.protected)
    .bind(flags.not_found)
    .bind(snapshot.follower_count)
    .bind(snapshot.following_count)
    .bind(snapshot.media_count)
    .bind(snapshot.favourite_count)
    .bind(snapshot.post_count)
    .bind(snapshot.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the latest snapshot for an account key (e.g. "@alice")
pub async fn get_account(
    pool: &PgPool,
    account_key: &str,
) -> Result<Option<AccountSnapshot>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT account_key, handle, display_name, status,
               search_ban, search_suggestion_ban, ghost_ban, no_reply, reply_deboosting,
               no_tweet, suspended, protected, not_found,
               follower_count, following_count, media_count, favourite_count, post_count,
               updated_at
        FROM accounts
        WHERE account_key = $1
        "#,
    )
    .bind(account_key)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };

    let status: String = r.try_get("status")?;
    let status = AccountStatus::from_str(&status).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Some(AccountSnapshot {
        account_key: r.try_get("account_key")?,
        handle: r.try_get("handle")?,
        display_name: r.try_get("display_name")?,
        status,
        flags: BanFlags {
            search_ban: r.try_get("search_ban")?,
            search_suggestion_ban: r.try_get("search_suggestion_ban")?,
            ghost_ban: r.try_get("ghost_ban")?,
            no_reply: r.try_get("no_reply")?,
            reply_deboosting: r.try_get("reply_deboosting")?,
            no_tweet: r.try_get("no_tweet")?,
            suspended: r.try_get("suspended")?,
            protected: r.try_get("protected")?,
            not_found: r.try_get("not_found")?,
        },
        follower_count: r.try_get("follower_count")?,
        following_count: r.try_get("following_count")?,
        media_count: r.try_get("media_count")?,
        favourite_count: r.try_get("favourite_count")?,
        post_count: r.try_get("post_count")?,
        updated_at: r.try_get("updated_at")?,
    }))
}
