//! Application identity: the deterministic name of one (repository, branch)
//! deployment.
//!
//! The readable prefix keeps the repository basename and branch as given;
//! the suffix is a short SHA-256 digest of the lower-cased repository path,
//! which disambiguates repositories whose basenames collide.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the path digest.
const HASH_LEN: usize = 10;

/// Resolved identity of an application instance. Two locators that differ
/// only in host resolve to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity {
    /// Full key: `{basename}[_{branch}].{hash}`.
    name: String,
}

impl Identity {
    /// Resolve the identity of `repo` at `branch`.
    pub fn resolve(repo: &str, branch: &str) -> Self {
        let repo = normalize_locator(repo);
        let branch = branch.trim();

        let path = locator_path(&repo).to_lowercase();
        let digest = hex::encode(Sha256::digest(path.as_bytes()));

        let basename = repo.rsplit('/').next().unwrap_or(&repo);
        let basename = basename.rsplit(':').next().unwrap_or(basename);

        let mut name = basename.to_string();
        if !branch.is_empty() {
            name.push('_');
            name.push_str(branch);
        }
        name.push('.');
        name.push_str(&digest[..HASH_LEN]);

        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compose project slug: lower-cased name with every non-alphanumeric
    /// character removed. Volume and container names derive from it.
    pub fn project(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .collect()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Strip whitespace, trailing slashes and a trailing `.git`.
fn normalize_locator(repo: &str) -> String {
    let mut repo = repo.trim().trim_end_matches('/');
    while let Some(stripped) = repo.strip_suffix(".git") {
        repo = stripped.trim_end_matches('/');
    }
    repo.to_string()
}

/// Path component of a locator. URLs with a scheme drop the scheme and
/// authority; scp-style and plain paths are used whole.
fn locator_path(repo: &str) -> &str {
    let Some((_, rest)) = repo.split_once("://") else {
        return repo;
    };
    let path = match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "",
    };
    path.split(['?', '#']).next().unwrap_or(path)
}
