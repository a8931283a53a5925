use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::Serialize;

use crate::model::Profile;

/// Hits scoring above this distance are dropped. 0 is a perfect match.
pub const MATCH_THRESHOLD: f64 = 0.25;

/// Distances handed to substring matches, best first.
const EXACT: f64 = 0.0;
const PREFIX: f64 = 0.05;
const CONTAINS: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub profile: Profile,
    /// In `[0, 1]`, lower is better.
    pub score: f64,
}

struct Entry {
    profile: Profile,
    /// Lowercased full name, then each of its words, then the email local part.
    keys: Vec<String>,
}

/// Immutable fuzzy-search index over a snapshot of the tenant's profiles.
pub struct ProfileIndex {
    entries: Vec<Entry>,
}

impl ProfileIndex {
    pub fn build<'a>(profiles: impl IntoIterator<Item = &'a Profile>) -> Self {
        let entries = profiles
            .into_iter()
            .map(|profile| {
                let name = profile.full_name.to_lowercase();
                let mut keys: Vec<String> = name.split_whitespace().map(str::to_string).collect();
                keys.insert(0, name);
                let local = profile
                    .email
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_lowercase();
                if !local.is_empty() {
                    keys.push(local);
                }
                Entry {
                    profile: profile.clone(),
                    keys,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best matches for `query`, sorted by ascending score then name.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = entry
                    .keys
                    .iter()
                    .map(|key| distance(&query, key))
                    .fold(1.0_f64, f64::min);
                (score <= MATCH_THRESHOLD).then(|| SearchHit {
                    profile: entry.profile.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.profile.full_name.cmp(&b.profile.full_name))
        });
        hits.truncate(limit);
        hits
    }
}

fn distance(query: &str, key: &str) -> f64 {
    if key == query {
        EXACT
    } else if key.starts_with(query) {
        PREFIX
    } else if key.contains(query) {
        CONTAINS
    } else {
        (1.0 - strsim::jaro_winkler(query, key)).clamp(0.0, 1.0)
    }
}

/// Lazily built search index, dropped whenever profiles change.
#[derive(Default)]
pub struct SearchCache {
    index: ArcSwapOption<ProfileIndex>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current index, building it from `profiles` when absent.
    pub fn get_or_build<F>(&self, profiles: F) -> Arc<ProfileIndex>
    where
        F: FnOnce() -> Vec<Profile>,
    {
        if let Some(index) = self.index.load_full() {
            return index;
        }
        let index = Arc::new(ProfileIndex::build(&profiles()));
        self.index.store(Some(index.clone()));
        index
    }

    pub fn invalidate(&self) {
        self.index.store(None);
    }

    pub fn is_built(&self) -> bool {
        self.index.load().is_some()
    }
}
