//! `owner/repo` repository identifiers.

use std::fmt;

use crate::error::RemoteError;
use crate::Result;

/// A repository slug split into owner and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySlug {
    pub owner: String,
    pub repo: String,
}

impl RepositorySlug {
    /// Parse `owner/repo`. Both halves must be non-empty.
    pub fn parse(repository: &str) -> Result<Self> {
        let mut parts = repository.trim().splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();

        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(RemoteError::InvalidRepository(repository.to_string()));
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl fmt::Display for RepositorySlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_owner_repo() {
        let slug = RepositorySlug::parse("flxbl-io/sf-core").unwrap();
        assert_eq!(slug.owner, "flxbl-io");
        assert_eq!(slug.repo, "sf-core");
        assert_eq!(slug.to_string(), "flxbl-io/sf-core");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "owner", "owner/", "/repo", "a/b/c"] {
            assert!(
                matches!(
                    RepositorySlug::parse(bad),
                    Err(RemoteError::InvalidRepository(_))
                ),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
