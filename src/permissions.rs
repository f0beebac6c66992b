//! Access Control Lists
//!
//! Two lists of identities: admins, who may manage the lists and run admin
//! console commands, and identities with database access. Admins always have
//! access.
//!
//! [`PermissionStore`] keeps the lists in a TOML file:
//!
//! ```toml
//! admins = ["alice"]
//! database_access = ["bob", "carol"]
//! ```
//!
//! The file is created with empty lists if it does not exist, and rewritten
//! after every change.

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Permission lookups and mutations.
pub trait AccessControl: Send + Sync {
    fn is_admin(&self, identity: &str) -> bool;

    /// True for admins and for identities on the access list.
    fn has_access(&self, identity: &str) -> bool;

    fn grant_access(&self, identity: &str) -> anyhow::Result<()>;

    fn revoke_access(&self, identity: &str) -> anyhow::Result<()>;

    fn add_admin(&self, identity: &str) -> anyhow::Result<()>;

    fn remove_admin(&self, identity: &str) -> anyhow::Result<()>;

    fn admins(&self) -> Vec<String>;

    fn access_list(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PermissionLists {
    #[serde(default)]
    admins: Vec<String>,
    #[serde(default)]
    database_access: Vec<String>,
}

/// TOML-file backed [`AccessControl`].
#[derive(Debug)]
pub struct PermissionStore {
    /// `None` keeps the lists in memory only
    path: Option<PathBuf>,
    lists: RwLock<PermissionLists>,
}

impl PermissionStore {
    /// Loads the permission file, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let lists = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("invalid permission file {}", path.display()))?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let lists = PermissionLists::default();
            write_lists(&path, &lists)?;
            info!(path = %path.display(), "Created empty permission file");
            lists
        };

        debug!(
            admins = lists.admins.len(),
            access = lists.database_access.len(),
            "Permissions loaded"
        );

        Ok(Self {
            path: Some(path),
            lists: RwLock::new(lists),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            lists: RwLock::new(PermissionLists::default()),
        }
    }

    fn update(&self, change: impl FnOnce(&mut PermissionLists) -> bool) -> anyhow::Result<()> {
        let mut lists = self.lists.write();
        if !change(&mut lists) {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_lists(path, &lists)?;
        }
        Ok(())
    }
}

fn write_lists(path: &Path, lists: &PermissionLists) -> anyhow::Result<()> {
    let text = toml::to_string_pretty(lists).context("failed to serialize permissions")?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn insert(list: &mut Vec<String>, identity: &str) -> bool {
    if list.iter().any(|i| i == identity) {
        return false;
    }
    list.push(identity.to_string());
    true
}

fn remove(list: &mut Vec<String>, identity: &str) -> bool {
    let before = list.len();
    list.retain(|i| i != identity);
    list.len() != before
}

impl AccessControl for PermissionStore {
    fn is_admin(&self, identity: &str) -> bool {
        self.lists.read().admins.iter().any(|i| i == identity)
    }

    fn has_access(&self, identity: &str) -> bool {
        self.is_admin(identity) || self.lists.read().database_access.iter().any(|i| i == identity)
    }

    fn grant_access(&self, identity: &str) -> anyhow::Result<()> {
        self.update(|l| insert(&mut l.database_access, identity))
    }

    fn revoke_access(&self, identity: &str) -> anyhow::Result<()> {
        self.update(|l| remove(&mut l.database_access, identity))
    }

    fn add_admin(&self, identity: &str) -> anyhow::Result<()> {
        self.update(|l| insert(&mut l.admins, identity))
    }

    fn remove_admin(&self, identity: &str) -> anyhow::Result<()> {
        self.update(|l| remove(&mut l.admins, identity))
    }

    fn admins(&self) -> Vec<String> {
        self.lists.read().admins.clone()
    }

    fn access_list(&self) -> Vec<String> {
        self.lists.read().database_access.clone()
    }
}
