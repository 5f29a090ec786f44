use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Provider,
}

/// What the booking engine needs to know about a party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Ulid,
    pub role: Role,
    /// Price per hour. Only read at booking creation.
    #[serde(default)]
    pub rate: f64,
    /// IANA timezone name used for earnings windows.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Profile {
    pub fn provider(id: Ulid, rate: f64) -> Self {
        Self {
            id,
            role: Role::Provider,
            rate,
            timezone: None,
        }
    }

    pub fn requester(id: Ulid) -> Self {
        Self {
            id,
            role: Role::Requester,
            rate: 0.0,
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }
}

/// Identity/profile service owned by another subsystem.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn resolve(&self, id: Ulid) -> Option<Profile>;
}

/// In-process directory, optionally seeded from a JSON array of profiles.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    profiles: DashMap<Ulid, Profile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        let dir = Self::new();
        for p in profiles {
            dir.upsert(p);
        }
        dir
    }

    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let profiles: Vec<Profile> = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_profiles(profiles))
    }

    pub fn upsert(&self, profile: Profile) {
        self.profiles.insert(profile.id, profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileDirectory for StaticDirectory {
    async fn resolve(&self, id: Ulid) -> Option<Profile> {
        self.profiles.get(&id).map(|p| p.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_known_and_unknown() {
        let pid = Ulid::new();
        let dir = StaticDirectory::from_profiles([Profile::provider(pid, 80.0)]);
        let p = dir.resolve(pid).await.unwrap();
        assert_eq!(p.role, Role::Provider);
        assert_eq!(p.rate, 80.0);
        assert!(dir.resolve(Ulid::new()).await.is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_rate() {
        let pid = Ulid::new();
        let dir = StaticDirectory::new();
        dir.upsert(Profile::provider(pid, 80.0));
        dir.upsert(Profile::provider(pid, 95.0));
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.resolve(pid).await.unwrap().rate, 95.0);
    }

    #[tokio::test]
    async fn load_from_json() {
        let dir = std::env::temp_dir().join("slotguard_test_directory");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("profiles.json");
        let pid = Ulid::new();
        let rid = Ulid::new();
        let json = format!(
            r#"[
                {{"id": "{pid}", "role": "provider", "rate": 120.5, "timezone": "Europe/Berlin"}},
                {{"id": "{rid}", "role": "requester"}}
            ]"#
        );
        std::fs::write(&path, json).unwrap();

        let loaded = StaticDirectory::from_json_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let p = loaded.resolve(pid).await.unwrap();
        assert_eq!(p.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(loaded.resolve(rid).await.unwrap().role, Role::Requester);

        std::fs::write(&path, "not json").unwrap();
        assert!(StaticDirectory::from_json_file(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
