//! Local profile store (spec.md §3 `LocalProfile`, C3).
//!
//! Pure state: in-memory fields plus a monotonic version counter.
//! Persistence is the caller's job (see `persistence::Storage`); this
//! type just guarantees the invariant that any successful mutation
//! strictly increases `version`.
use serde::{Deserialize, Serialize};

/// The local node's own profile. `version` bumps on every mutation and
/// is piggybacked on heartbeat frames so peers know to re-fetch (spec.md
/// §4.3.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProfile {
    pub name: String,
    pub avatar: Option<Vec<u8>>,
    pub version: u64,
}

impl LocalProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avatar: None,
            version: 0,
        }
    }

    /// Restore a profile from persisted fields (used when rehydrating from
    /// storage on startup — does not bump `version`).
    pub fn from_parts(name: String, avatar: Option<Vec<u8>>, version: u64) -> Self {
        Self {
            name,
            avatar,
            version,
        }
    }

    /// Update the display name and/or avatar. No-op fields (`None`) are
    /// left unchanged. Always bumps `version`, even if the new values are
    /// identical to the old ones — the spec's invariant is "any successful
    /// mutation strictly increases version", and a `set_profile` call is a
    /// mutation attempt regardless of whether the values actually differ.
    pub fn set(&mut self, name: Option<String>, avatar: Option<Option<Vec<u8>>>) {
        if let Some(name) = name {
            self.name = name;
        }
        if let Some(avatar) = avatar {
            self.avatar = avatar;
        }
        self.version += 1;
    }

    /// Snapshot suitable for a `ProfileResponse` frame payload.
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            version: self.version,
        }
    }
}

/// Wire payload for `ProfileResponse` frames (spec.md §4.3.1 step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub name: String,
    pub avatar: Option<Vec<u8>>,
    pub version: u64,
}

impl ProfileSnapshot {
    pub fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("ProfileSnapshot serialization cannot fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, crate::error::MeshError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
