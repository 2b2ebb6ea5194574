//! User id → display name directory.
//!
//! Built once per run by paginating the user listing to exhaustion, then
//! shared read-only by every enrichment call.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::fetcher::RateLimitedFetcher;
use crate::models::RawUser;
use crate::progress::{ProgressEvent, Stage};
use crate::traits::SourceError;

/// Immutable mapping from user id to resolved display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityDirectory {
    names: HashMap<String, String>,
}

/// Outcome of [`IdentityDirectory::build`].
///
/// A listing failure does not discard the users collected before it; the
/// caller decides whether `failure` is fatal.
#[derive(Debug)]
pub struct DirectoryBuild {
    pub directory: IdentityDirectory,
    pub failure: Option<SourceError>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an already collected user list. Users without an id are
    /// ignored; a later entry for the same id replaces an earlier one.
    pub fn from_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = RawUser>,
    {
        let mut directory = Self::new();
        directory.extend(users);
        directory
    }

    fn extend<I>(&mut self, users: I)
    where
        I: IntoIterator<Item = RawUser>,
    {
        for user in users {
            if user.id.trim().is_empty() {
                continue;
            }
            let name = user.preferred_name().to_string();
            self.names.insert(user.id, name);
        }
    }

    /// Paginate the user listing until no cursor is returned.
    pub async fn build(fetcher: &RateLimitedFetcher, page_limit: usize) -> DirectoryBuild {
        let mut directory = Self::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match fetcher.list_users(cursor.as_deref(), page_limit).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        users = directory.len(),
                        error = %e,
                        "user listing failed; continuing with partial directory"
                    );
                    return DirectoryBuild {
                        directory,
                        failure: Some(e),
                    };
                }
            };
            directory.extend(page.items);

            fetcher.reporter().report(ProgressEvent::Page {
                stage: Stage::UserDirectory,
                total: directory.len() as u64,
                next_cursor: page.next_cursor.clone(),
            });

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(users = directory.len(), "user directory built");
        DirectoryBuild {
            directory,
            failure: None,
        }
    }

    /// Resolve `id` to a display name; unknown ids resolve to themselves.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.names.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
