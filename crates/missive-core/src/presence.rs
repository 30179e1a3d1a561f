//! User directory and presence.
//!
//! Profile documents are created on first sign-in and refreshed on every
//! subsequent one; presence heartbeats (`online`, `lastSeen`) are
//! best-effort ambient writes that never surface failures.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use missive_shared::constants::{USERNAME_SEED_MAX, USERNAME_UID_SUFFIX};
use missive_shared::types::UserId;
use missive_store::{Deltas, DocumentStore, Filter, Query};

use crate::models::{decode, to_fields, UserProfile};
use crate::paths;
use crate::Result;

/// Identity attributes as reported by the authentication layer.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

/// Directory operations for the local signed-in user.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
    local_user: UserId,
}

/// Sanitize a display name or email prefix into a username seed:
/// lowercase, `[a-z0-9_]` only, truncated.
pub fn username_seed(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .take(USERNAME_SEED_MAX)
        .collect()
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>, local_user: UserId) -> Self {
        Self { store, local_user }
    }

    /// Create or refresh the local user's directory entry after sign-in.
    ///
    /// First sign-in generates the unique handle from the display name (or
    /// the email prefix) plus a uid-derived suffix; later sign-ins only
    /// refresh the mutable attributes and never touch the handle.
    pub async fn sync_profile(&self, auth: &AuthUser) -> Result<UserProfile> {
        let now = Utc::now();
        let existing = self
            .store
            .get(&paths::users(), self.local_user.as_str())
            .await?;

        if let Some(doc) = existing {
            self.store
                .update(
                    &paths::users(),
                    self.local_user.as_str(),
                    Deltas::new()
                        .set(
                            "displayName",
                            auth.display_name.clone().unwrap_or_else(|| "Anonymous".into()),
                        )
                        .set("photoURL", auth.photo_url.clone().unwrap_or_default())
                        .set("email", auth.email.clone().unwrap_or_default())
                        .set("online", true)
                        .set("lastSeen", now.timestamp_millis())
                        .set("updatedAt", now.timestamp_millis()),
                )
                .await?;
            let refreshed = self
                .store
                .get(&paths::users(), self.local_user.as_str())
                .await?
                .unwrap_or(doc);
            return decode(&refreshed);
        }

        let seed_source = auth
            .display_name
            .clone()
            .or_else(|| {
                auth.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "user".to_string());
        let seed = username_seed(&seed_source);
        let suffix: String = self.local_user.0.chars().take(USERNAME_UID_SUFFIX).collect();

        let profile = UserProfile {
            uid: self.local_user.clone(),
            display_name: auth.display_name.clone().unwrap_or_else(|| "Anonymous".into()),
            email: auth.email.clone().unwrap_or_default(),
            photo_url: auth.photo_url.clone().unwrap_or_default(),
            username: format!("{seed}_{suffix}"),
            about: "Available".into(),
            last_seen: now,
            online: true,
            blocked_users: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .set(&paths::users(), self.local_user.as_str(), to_fields(&profile)?)
            .await?;

        info!(uid = %self.local_user, username = %profile.username, "profile created");
        Ok(profile)
    }

    /// Best-effort presence heartbeat.
    pub async fn set_online(&self) {
        self.heartbeat(true).await;
    }

    /// Best-effort sign-off marker, also fired on abnormal teardown.
    pub async fn set_offline(&self) {
        self.heartbeat(false).await;
    }

    async fn heartbeat(&self, online: bool) {
        let now = Utc::now();
        let result = self
            .store
            .update(
                &paths::users(),
                self.local_user.as_str(),
                Deltas::new()
                    .set("online", online)
                    .set("lastSeen", now.timestamp_millis()),
            )
            .await;
        if let Err(e) = result {
            debug!(uid = %self.local_user, online, error = %e, "presence update dropped");
        }
    }

    pub async fn block_user(&self, target: &UserId) -> Result<()> {
        self.store
            .update(
                &paths::users(),
                self.local_user.as_str(),
                Deltas::new().array_union("blockedUsers", target.as_str()),
            )
            .await?;
        Ok(())
    }

    pub async fn unblock_user(&self, target: &UserId) -> Result<()> {
        self.store
            .update(
                &paths::users(),
                self.local_user.as_str(),
                Deltas::new().array_remove("blockedUsers", target.as_str()),
            )
            .await?;
        Ok(())
    }

    /// Exact-match handle lookup.
    pub async fn find_by_username(&self, username: &str) -> Result<Vec<UserProfile>> {
        let query = Query::collection(paths::users()).filter(Filter::Eq {
            field: "username".into(),
            value: username.into(),
        });
        let docs = self.store.query_docs(&query).await?;

        let mut profiles = Vec::with_capacity(docs.len());
        for doc in &docs {
            match decode(doc) {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(id = %doc.id, error = %e, "undecodable user document"),
            }
        }
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_store::MemoryStore;

    fn directory(store: &MemoryStore, uid: &str) -> UserDirectory {
        UserDirectory::new(Arc::new(store.clone()), UserId::new(uid))
    }

    fn auth(uid: &str, name: Option<&str>, email: Option<&str>) -> AuthUser {
        AuthUser {
            uid: UserId::new(uid),
            display_name: name.map(str::to_string),
            email: email.map(str::to_string),
            photo_url: None,
        }
    }

    #[test]
    fn test_username_seed_sanitizes() {
        assert_eq!(username_seed("Ada Lovelace!"), "adalovelace");
        assert_eq!(username_seed("under_score_9"), "under_score_9");
        assert_eq!(
            username_seed("averyveryverylongdisplayname"),
            "averyveryverylongdis"
        );
    }

    #[tokio::test]
    async fn test_first_sign_in_creates_profile_with_handle() {
        let store = MemoryStore::new();
        let dir = directory(&store, "uid-12345-rest");
        let profile = dir
            .sync_profile(&auth("uid-12345-rest", Some("Ada L"), None))
            .await
            .unwrap();

        assert_eq!(profile.username, "adal_uid-1");
        assert_eq!(profile.about, "Available");
        assert!(profile.online);
    }

    #[tokio::test]
    async fn test_resync_keeps_handle_and_refreshes_name() {
        let store = MemoryStore::new();
        let dir = directory(&store, "u1");
        let first = dir.sync_profile(&auth("u1", Some("Ada"), None)).await.unwrap();
        let second = dir
            .sync_profile(&auth("u1", Some("Ada Lovelace"), Some("ada@x.org")))
            .await
            .unwrap();

        assert_eq!(second.username, first.username);
        assert_eq!(second.display_name, "Ada Lovelace");
        assert_eq!(second.email, "ada@x.org");
    }

    #[tokio::test]
    async fn test_email_prefix_fallback_for_seed() {
        let store = MemoryStore::new();
        let dir = directory(&store, "u2abc");
        let profile = dir
            .sync_profile(&auth("u2abc", None, Some("Grace.H@navy.mil")))
            .await
            .unwrap();
        assert_eq!(profile.username, "graceh_u2abc");
    }

    #[tokio::test]
    async fn test_block_unblock_roundtrip() {
        let store = MemoryStore::new();
        let dir = directory(&store, "u1");
        dir.sync_profile(&auth("u1", Some("A"), None)).await.unwrap();

        dir.block_user(&UserId::new("spammer")).await.unwrap();
        dir.block_user(&UserId::new("spammer")).await.unwrap();
        let found = dir.find_by_username("a_u1").await.unwrap();
        assert_eq!(found[0].blocked_users, vec![UserId::new("spammer")]);

        dir.unblock_user(&UserId::new("spammer")).await.unwrap();
        let found = dir.find_by_username("a_u1").await.unwrap();
        assert!(found[0].blocked_users.is_empty());
    }

    #[tokio::test]
    async fn test_offline_heartbeat_sets_flag() {
        let store = MemoryStore::new();
        let dir = directory(&store, "u1");
        dir.sync_profile(&auth("u1", Some("A"), None)).await.unwrap();
        dir.set_offline().await;

        let found = dir.find_by_username("a_u1").await.unwrap();
        assert!(!found[0].online);
    }
}
