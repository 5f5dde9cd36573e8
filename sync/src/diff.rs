use std::collections::BTreeMap;

use crate::models::{Scrobble, ScrobbleKey};

/// What a day's re-fetch did to the store, keyed by natural key.
///
/// A scrobble whose key survived but whose other fields changed (say, the
/// album was edited on Last.fm) is `changed`, not added and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrobbleDiff {
    pub added: Vec<Scrobble>,
    pub removed: Vec<Scrobble>,
    pub changed: Vec<(Scrobble, Scrobble)>,
}

impl ScrobbleDiff {
    pub fn between(before: &[Scrobble], after: &[Scrobble]) -> Self {
        let before: BTreeMap<ScrobbleKey, &Scrobble> =
            before.iter().map(|s| (s.key(), s)).collect();
        let after: BTreeMap<ScrobbleKey, &Scrobble> =
            after.iter().map(|s| (s.key(), s)).collect();

        let mut diff = Self::default();

        for (key, old) in &before {
            match after.get(key) {
                None => diff.removed.push((*old).clone()),
                Some(new) if new != old => diff.changed.push(((*old).clone(), (*new).clone())),
                Some(_) => {}
            }
        }

        for (key, new) in &after {
            if !before.contains_key(key) {
                diff.added.push((*new).clone());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Human-readable report, removals first, each group in canonical order.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(
            self.removed.len() + self.changed.len() + self.added.len(),
        );
        lines.extend(self.removed.iter().map(|s| format!("Removed {}", s)));
        lines.extend(
            self.changed
                .iter()
                .map(|(old, new)| format!("Changed {} -> {}", old, new)),
        );
        lines.extend(self.added.iter().map(|s| format!("Added {}", s)));
        lines
    }
}
