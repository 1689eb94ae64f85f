use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::models::{Cid, Identity};

/// Looks up who a roster member is and which roles they hold.
#[async_trait]
pub trait Roster: Send + Sync {
    async fn member(&self, cid: Cid) -> Option<Identity>;
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    members: Vec<Identity>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    members: HashMap<Cid, Identity>,
}

impl StaticRoster {
    pub fn new(members: Vec<Identity>) -> Self {
        Self {
            members: members.into_iter().map(|m| (m.cid, m)).collect(),
        }
    }

    /// Reads `[[members]]` tables from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file: RosterFile = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        Ok(Self::new(file.members))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Roster for StaticRoster {
    async fn member(&self, cid: Cid) -> Option<Identity> {
        self.members.get(&cid).cloned()
    }
}
