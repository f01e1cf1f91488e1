//! Member profile storage
//!
//! One `Profile` per provider user, kept in a JSON file with the same
//! atomic write discipline as the credential store: the in-memory map only
//! changes after the file write succeeds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use common::Result;

/// A member as the gateway knows them. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub whop_user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub community_id: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub xp: i64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields to write for one user. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub whop_user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub community_id: Option<String>,
    /// New profiles default to active.
    pub active: Option<bool>,
}

pub struct ProfileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Profile>>,
}

impl ProfileStore {
    /// Load profiles from `path`, creating an empty file on cold start.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let profiles: HashMap<String, Profile> = common::persist::load_or_init(&path).await?;
        info!(path = %path.display(), profiles = profiles.len(), "loaded profiles");
        Ok(Self {
            path,
            state: Mutex::new(profiles),
        })
    }

    /// Insert or merge a profile. Applying the same update twice leaves one
    /// record with the same contents.
    pub async fn upsert(&self, update: ProfileUpdate) -> Result<Profile> {
        let now = now_millis();
        let mut state = self.state.lock().await;

        let profile = match state.get(&update.whop_user_id) {
            Some(existing) => Profile {
                whop_user_id: existing.whop_user_id.clone(),
                username: update.username.or_else(|| existing.username.clone()),
                email: update.email.or_else(|| existing.email.clone()),
                community_id: update.community_id.or_else(|| existing.community_id.clone()),
                active: update.active.unwrap_or(existing.active),
                xp: existing.xp,
                created_at: existing.created_at,
                updated_at: now,
            },
            None => Profile {
                whop_user_id: update.whop_user_id.clone(),
                username: update.username,
                email: update.email,
                community_id: update.community_id,
                active: update.active.unwrap_or(true),
                xp: 0,
                created_at: now,
                updated_at: now,
            },
        };

        self.commit(&mut state, profile.clone()).await?;
        debug!(user_id = %profile.whop_user_id, active = profile.active, "upserted profile");
        Ok(profile)
    }

    /// Flip the `active` flag. Returns false, without writing, when the user
    /// has no profile.
    pub async fn set_active(&self, user_id: &str, active: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.get(user_id) else {
            return Ok(false);
        };

        let mut profile = existing.clone();
        profile.active = active;
        profile.updated_at = now_millis();
        self.commit(&mut state, profile).await?;
        debug!(user_id, active, "updated profile status");
        Ok(true)
    }

    /// Add `delta` to a user's XP and return the new total.
    ///
    /// The read-modify-write runs under the store lock, so concurrent awards
    /// for the same user all land. Returns `None` when the user has no
    /// profile.
    pub async fn increment_xp(&self, user_id: &str, delta: i64) -> Result<Option<i64>> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.get(user_id) else {
            return Ok(None);
        };

        let mut profile = existing.clone();
        profile.xp = profile.xp.saturating_add(delta);
        profile.updated_at = now_millis();
        let xp = profile.xp;
        self.commit(&mut state, profile).await?;
        Ok(Some(xp))
    }

    pub async fn get(&self, user_id: &str) -> Option<Profile> {
        let state = self.state.lock().await;
        state.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of profiles currently marked active.
    pub async fn active_count(&self) -> usize {
        let state = self.state.lock().await;
        state.values().filter(|p| p.active).count()
    }

    async fn commit(&self, state: &mut HashMap<String, Profile>, profile: Profile) -> Result<()> {
        let mut next = state.clone();
        next.insert(profile.whop_user_id.clone(), profile);
        common::persist::write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn update(id: &str) -> ProfileUpdate {
        ProfileUpdate {
            whop_user_id: id.into(),
            email: Some(format!("{id}@example.com")),
            ..Default::default()
        }
    }

    async fn store(dir: &tempfile::TempDir) -> ProfileStore {
        ProfileStore::load(dir.path().join("profiles.json")).await.unwrap()
    }

    #[tokio::test]
    async fn new_profile_defaults_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = store(&dir).await;

        let profile = profiles.upsert(update("u1")).await.unwrap();
        assert!(profile.active);
        assert_eq!(profile.xp, 0);
        assert_eq!(profile.created_at, profile.updated_at);
    }

    #[tokio::test]
    async fn upsert_merges_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = store(&dir).await;

        profiles.upsert(update("u1")).await.unwrap();
        let merged = profiles
            .upsert(ProfileUpdate {
                whop_user_id: "u1".into(),
                username: Some("ada".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(merged.email.as_deref(), Some("u1@example.com"));
        assert_eq!(merged.username.as_deref(), Some("ada"));

        let reloaded = store(&dir).await;
        assert_eq!(reloaded.get("u1").await, Some(merged));
        assert_eq!(reloaded.len().await, 1);
    }

    #[tokio::test]
    async fn set_active_on_missing_user_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = store(&dir).await;

        assert!(!profiles.set_active("ghost", false).await.unwrap());
        assert!(profiles.is_empty().await);
    }

    #[tokio::test]
    async fn deactivate_then_reactivate() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = store(&dir).await;
        profiles.upsert(update("u1")).await.unwrap();
        profiles.upsert(update("u2")).await.unwrap();

        assert!(profiles.set_active("u1", false).await.unwrap());
        assert_eq!(profiles.active_count().await, 1);

        let back = profiles
            .upsert(ProfileUpdate {
                active: Some(true),
                ..update("u1")
            })
            .await
            .unwrap();
        assert!(back.active);
        assert_eq!(profiles.active_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_xp_awards_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = Arc::new(store(&dir).await);
        profiles.upsert(update("u1")).await.unwrap();

        let mut handles = vec![];
        for _ in 0..20 {
            let profiles = profiles.clone();
            handles.push(tokio::spawn(async move {
                profiles.increment_xp("u1", 5).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(profiles.get("u1").await.unwrap().xp, 100);
        assert_eq!(store(&dir).await.get("u1").await.unwrap().xp, 100);
    }

    #[tokio::test]
    async fn increment_xp_for_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = store(&dir).await;
        assert_eq!(profiles.increment_xp("ghost", 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("state");
        std::fs::create_dir(&sub).unwrap();
        let profiles = ProfileStore::load(sub.join("p.json")).await.unwrap();
        profiles.upsert(update("u1")).await.unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        assert!(profiles.set_active("u1", false).await.is_err());
        assert!(profiles.get("u1").await.unwrap().active);
    }
}
