//! Mirror failover with escalating timeouts.
//!
//! When a transfer from a repository fails to connect, the caller asks the
//! selector for another mirror. Mirrors are tried round-robin, and every
//! tier allows one attempt per configured mirror before the timeout is
//! raised to the next tier.
//!
//! # State Machine
//!
//! ```text
//! Unstarted --[first failure]--> Remaining(mirrors) @ 10s
//! Remaining(n > 0) --[failure]--> Remaining(n - 1)
//! Remaining(0) @ 10s --[failure]--> Remaining(mirrors) @ 30s
//! Remaining(0) @ 30s --[failure]--> Remaining(mirrors) @ 60s
//! Remaining(0) @ 60s --[failure]--> NoMirrorsAvailable
//! ```
//!
//! State is kept per repository and lives only as long as the process.
//! [`MirrorSelector::reset_all`] returns every repository to the first tier.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use super::model::{RepoId, Repository};

/// Timeout tiers in milliseconds, in escalation order.
pub const TIMEOUT_TIERS_MS: [u64; 3] = [10_000, 30_000, 60_000];

/// Errors returned by [`MirrorSelector::next_mirror`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// No further mirror can be tried for this repository.
    #[error("{reason} (repository {repo})")]
    NoMirrorsAvailable {
        repo: RepoId,
        reason: &'static str,
    },
}

impl MirrorError {
    fn none_configured(repo: RepoId) -> Self {
        Self::NoMirrorsAvailable {
            repo,
            reason: "No mirrors available",
        }
    }

    fn exhausted(repo: RepoId) -> Self {
        Self::NoMirrorsAvailable {
            repo,
            reason: "Ran out of mirrors",
        }
    }
}

/// Remaining attempts in the current tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryBudget {
    /// No failure has been recorded since the last reset.
    Unstarted,
    /// Attempts left before escalating.
    Remaining(usize),
}

/// Per-repository failover state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorState {
    last_working_mirror: Option<String>,
    tier: usize,
    budget: TryBudget,
}

impl Default for MirrorState {
    fn default() -> Self {
        Self {
            last_working_mirror: None,
            tier: 0,
            budget: TryBudget::Unstarted,
        }
    }
}

impl MirrorState {
    /// The mirror handed out most recently.
    pub fn last_working_mirror(&self) -> Option<&str> {
        self.last_working_mirror.as_deref()
    }

    /// Timeout of the current tier.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(TIMEOUT_TIERS_MS[self.tier])
    }

    /// Attempts left in the current tier, or `None` before the first failure.
    pub fn remaining_tries(&self) -> Option<usize> {
        match self.budget {
            TryBudget::Unstarted => None,
            TryBudget::Remaining(n) => Some(n),
        }
    }
}

/// A replacement URL and the timeout to use for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorChoice {
    /// Failed URL rewritten onto the chosen mirror.
    pub url: String,
    /// Base URL of the chosen mirror.
    pub mirror: String,
    /// Timeout for the retried transfer.
    pub timeout: Duration,
}

/// Chooses mirrors after transfer failures.
///
/// Thread-safe; state for different repositories is independent.
#[derive(Debug, Default)]
pub struct MirrorSelector {
    states: Mutex<HashMap<RepoId, MirrorState>>,
}

impl MirrorSelector {
    /// Create a selector with every repository on the first tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the mirror to retry `failed_url` on.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::NoMirrorsAvailable`] when the repository has no
    /// mirrors, or when every tier has used up its attempts.
    pub fn next_mirror(
        &self,
        repo: &Repository,
        failed_url: &str,
    ) -> Result<MirrorChoice, MirrorError> {
        if !repo.has_mirrors() {
            return Err(MirrorError::none_configured(repo.id));
        }

        let mut states = self.states.lock();
        let state = states.entry(repo.id).or_default();
        let count = repo.mirror_count();

        let remaining = match state.budget {
            TryBudget::Unstarted => count,
            TryBudget::Remaining(0) => {
                if state.tier + 1 >= TIMEOUT_TIERS_MS.len() {
                    warn!(repo = %repo.address, "Mirrors: giving up");
                    return Err(MirrorError::exhausted(repo.id));
                }
                state.tier += 1;
                count
            }
            TryBudget::Remaining(n) => n,
        };

        let rotation = repo.mirror_rotation();
        let previous = state
            .last_working_mirror
            .clone()
            .filter(|m| rotation.contains(&m.as_str()))
            .unwrap_or_else(|| repo.address.clone());
        let next = next_in_rotation(&rotation, &previous);
        let prefix = failed_prefix(&rotation, &previous, failed_url);
        let url = match failed_url.strip_prefix(prefix) {
            Some(rest) => format!("{}{}", next, rest),
            None => failed_url.to_string(),
        };

        state.budget = TryBudget::Remaining(remaining - 1);
        state.last_working_mirror = Some(next.to_string());
        let timeout = state.timeout();

        debug!(
            repo = %repo.address,
            mirror = next,
            failed = prefix,
            timeout_secs = timeout.as_secs(),
            "Trying next mirror"
        );

        Ok(MirrorChoice {
            url,
            mirror: next.to_string(),
            timeout,
        })
    }

    /// Timeout to use for a fresh transfer from this repository.
    pub fn current_timeout(&self, repo: RepoId) -> Duration {
        self.states
            .lock()
            .get(&repo)
            .map(MirrorState::timeout)
            .unwrap_or_else(|| Duration::from_millis(TIMEOUT_TIERS_MS[0]))
    }

    /// Snapshot of a repository's state, if any failure was recorded.
    pub fn state(&self, repo: RepoId) -> Option<MirrorState> {
        self.states.lock().get(&repo).cloned()
    }

    /// Return one repository to the first tier.
    pub fn reset(&self, repo: RepoId) {
        self.states.lock().remove(&repo);
    }

    /// Return every repository to the first tier.
    pub fn reset_all(&self) {
        self.states.lock().clear();
    }
}

/// Mirror following `previous` in the rotation, wrapping around.
fn next_in_rotation<'a>(rotation: &[&'a str], previous: &str) -> &'a str {
    let index = rotation.iter().position(|m| *m == previous).unwrap_or(0);
    rotation[(index + 1) % rotation.len()]
}

/// The base URL the failed URL was built from.
fn failed_prefix<'a>(rotation: &[&'a str], previous: &'a str, failed_url: &str) -> &'a str {
    if is_under(failed_url, previous) {
        return previous;
    }
    rotation
        .iter()
        .filter(|m| is_under(failed_url, m))
        .max_by_key(|m| m.len())
        .copied()
        .unwrap_or(previous)
}

/// Whether `url` is `base` or a path below it.
fn is_under(url: &str, base: &str) -> bool {
    match url.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || base.ends_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn repo_with_mirrors(n: usize) -> Repository {
        let mirrors: Vec<String> = (0..n)
            .map(|i| format!("https://mirror{}.example/repo", i))
            .collect();
        Repository::new(RepoId(7), "https://primary.example/repo", "Example").with_mirrors(mirrors)
    }

    #[test]
    fn test_no_mirrors_fails_immediately() {
        let selector = MirrorSelector::new();
        let repo = repo_with_mirrors(0);

        let err = selector
            .next_mirror(&repo, "https://primary.example/repo/app.apk")
            .unwrap_err();

        assert_eq!(err, MirrorError::none_configured(RepoId(7)));
        assert!(err.to_string().contains("No mirrors available"));
        assert!(selector.state(RepoId(7)).is_none());
    }

    #[test]
    fn test_three_mirrors_escalate_through_tiers() {
        let selector = MirrorSelector::new();
        let repo = repo_with_mirrors(3);
        let mut url = "https://primary.example/repo/app.apk".to_string();

        let expected = [10, 10, 10, 30, 30, 30, 60, 60, 60];
        for (attempt, secs) in expected.iter().enumerate() {
            let choice = selector.next_mirror(&repo, &url).unwrap();
            assert_eq!(choice.timeout, Duration::from_secs(*secs), "attempt {}", attempt);
            url = choice.url;
        }

        let err = selector.next_mirror(&repo, &url).unwrap_err();
        assert!(err.to_string().contains("Ran out of mirrors"));
    }

    #[test]
    fn test_budget_resets_to_mirror_count_on_escalation() {
        let selector = MirrorSelector::new();
        let repo = repo_with_mirrors(3);
        let url = "https://primary.example/repo/app.apk";

        for _ in 0..3 {
            selector.next_mirror(&repo, url).unwrap();
        }
        assert_eq!(selector.state(repo.id).unwrap().remaining_tries(), Some(0));

        selector.next_mirror(&repo, url).unwrap();
        let state = selector.state(repo.id).unwrap();
        assert_eq!(state.timeout(), Duration::from_millis(30_000));
        assert_eq!(state.remaining_tries(), Some(2));
    }

    #[test]
    fn test_round_robin_rewrites_url() {
        let selector = MirrorSelector::new();
        let repo = repo_with_mirrors(2);

        let first = selector
            .next_mirror(&repo, "https://primary.example/repo/app_1.apk")
            .unwrap();
        assert_eq!(first.url, "https://mirror0.example/repo/app_1.apk");

        let second = selector.next_mirror(&repo, &first.url).unwrap();
        assert_eq!(second.url, "https://mirror1.example/repo/app_1.apk");

        let third = selector.next_mirror(&repo, &second.url).unwrap();
        assert_eq!(third.url, "https://primary.example/repo/app_1.apk");
        assert_eq!(
            selector.state(repo.id).unwrap().last_working_mirror(),
            Some("https://primary.example/repo")
        );
    }

    #[test]
    fn test_prefix_match_respects_path_boundary() {
        let selector = MirrorSelector::new();
        let repo = Repository::new(RepoId(3), "https://a.example/repo", "Example").with_mirrors(vec![
            "https://b.example/repo".to_string(),
            "https://a.example/repo2".to_string(),
        ]);

        let choice = selector
            .next_mirror(&repo, "https://a.example/repo2/app.apk")
            .unwrap();
        assert_eq!(choice.url, "https://b.example/repo/app.apk");
        assert!(is_under("https://a.example/repo/app.apk", "https://a.example/repo"));
        assert!(!is_under("https://a.example/repo2/app.apk", "https://a.example/repo"));
    }

    #[test]
    fn test_reset_returns_to_first_tier() {
        let selector = MirrorSelector::new();
        let repo = repo_with_mirrors(1);
        let url = "https://primary.example/repo/app.apk";

        selector.next_mirror(&repo, url).unwrap();
        selector.next_mirror(&repo, url).unwrap();
        assert_eq!(selector.current_timeout(repo.id), Duration::from_secs(30));

        selector.reset(repo.id);
        assert_eq!(selector.current_timeout(repo.id), Duration::from_secs(10));

        selector.next_mirror(&repo, url).unwrap();
        selector.reset_all();
        assert!(selector.state(repo.id).is_none());
    }

    #[test]
    fn test_repositories_are_independent() {
        let selector = MirrorSelector::new();
        let a = repo_with_mirrors(1);
        let mut b = repo_with_mirrors(1);
        b.id = RepoId(8);

        selector.next_mirror(&a, "https://primary.example/repo/x").unwrap();
        selector.next_mirror(&a, "https://primary.example/repo/x").unwrap();

        assert_eq!(selector.current_timeout(a.id), Duration::from_secs(30));
        assert_eq!(selector.current_timeout(b.id), Duration::from_secs(10));
    }

    proptest! {
        #[test]
        fn prop_tiers_allow_exactly_three_rounds(mirrors in 1usize..8) {
            let selector = MirrorSelector::new();
            let repo = repo_with_mirrors(mirrors);
            let url = "https://primary.example/repo/app.apk";

            for attempt in 0..(mirrors * TIMEOUT_TIERS_MS.len()) {
                let choice = selector.next_mirror(&repo, url).unwrap();
                let tier = attempt / mirrors;
                prop_assert_eq!(choice.timeout, Duration::from_millis(TIMEOUT_TIERS_MS[tier]));
                prop_assert_ne!(choice.mirror.as_str(), "");
            }
            prop_assert!(selector.next_mirror(&repo, url).is_err());
        }
    }
}
