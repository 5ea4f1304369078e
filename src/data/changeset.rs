//! Changesets: server-side transactional groupings of object mutations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::object::Tags;

/// A changeset as known locally.
///
/// A changeset with `id == 0` has never been created on the server.
/// Once closed it is never used for further uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: u64,
    open: bool,
    pub tags: Tags,
    pub created_at: Option<DateTime<Utc>>,
}

impl Changeset {
    /// A changeset that still has to be opened on the server
    pub fn new(tags: Tags) -> Self {
        Self {
            id: 0,
            open: true,
            tags,
            created_at: None,
        }
    }

    /// A changeset the server has opened
    pub fn opened(id: u64, tags: Tags, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            open: true,
            tags,
            created_at: Some(created_at),
        }
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn mark_closed(&mut self) {
        self.open = false;
    }

    /// Fresh, not yet created changeset carrying the same tags
    pub fn successor(&self) -> Self {
        Self::new(self.tags.clone())
    }
}

impl Default for Changeset {
    fn default() -> Self {
        Self::new(Tags::new())
    }
}
