//! Matching candidate elements to stored ones.
//!
//! Each [`Matcher`] looks for a stored counterpart by one criterion. A
//! [`MatcherChain`] asks its matchers in order and takes the first answer
//! that is not [`MatchOutcome::NoMatch`].

use crate::catalogs::names_match;
use crate::iduid::Uid;

/// Identity of a candidate element, as far as matching is concerned.
#[derive(Debug, Clone, Copy)]
pub struct MatchKey<'a> {
    pub name: &'a str,
    /// Explicit uid annotation binding the candidate to a stored element.
    pub uid: Option<Uid>,
}

/// A stored element that a candidate may be matched against.
#[derive(Debug, Clone, Copy)]
pub struct MatchEntry<'a> {
    pub name: &'a str,
    pub uid: Uid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Index into the entries passed to the matcher.
    Matched(usize),
    NoMatch,
    Ambiguous { uids: Vec<Uid>, reason: String },
}

// ---------------------------------------------------------------------------
// Matcher trait
// ---------------------------------------------------------------------------

pub trait Matcher: Send + Sync {
    /// Matcher identifier (e.g., "uid").
    fn id(&self) -> &str;

    fn find(&self, key: &MatchKey<'_>, entries: &[MatchEntry<'_>]) -> MatchOutcome;
}

/// Binds a candidate carrying a uid annotation to the element owning it.
/// A uid that doesn't resolve is an error, never a silent fallback to names.
pub struct UidMatcher;

impl Matcher for UidMatcher {
    fn id(&self) -> &str {
        "uid"
    }

    fn find(&self, key: &MatchKey<'_>, entries: &[MatchEntry<'_>]) -> MatchOutcome {
        let Some(uid) = key.uid else {
            return MatchOutcome::NoMatch;
        };
        match entries.iter().position(|e| e.uid == uid) {
            Some(i) => MatchOutcome::Matched(i),
            None => MatchOutcome::Ambiguous {
                uids: vec![uid],
                reason: format!("no stored element has uid {uid}"),
            },
        }
    }
}

/// Case-insensitive name match.
pub struct NameMatcher;

impl Matcher for NameMatcher {
    fn id(&self) -> &str {
        "name"
    }

    fn find(&self, key: &MatchKey<'_>, entries: &[MatchEntry<'_>]) -> MatchOutcome {
        let hits: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| names_match(e.name, key.name))
            .map(|(i, _)| i)
            .collect();
        match hits.as_slice() {
            [] => MatchOutcome::NoMatch,
            [i] => MatchOutcome::Matched(*i),
            _ => MatchOutcome::Ambiguous {
                uids: hits.iter().map(|i| entries[*i].uid).collect(),
                reason: "several stored elements share this name".to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

pub struct MatcherChain {
    matchers: Vec<Box<dyn Matcher>>,
}

impl MatcherChain {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    pub fn matchers(&self) -> &[Box<dyn Matcher>] {
        &self.matchers
    }

    pub fn resolve(&self, key: &MatchKey<'_>, entries: &[MatchEntry<'_>]) -> MatchOutcome {
        for matcher in &self.matchers {
            match matcher.find(key, entries) {
                MatchOutcome::NoMatch => continue,
                outcome => return outcome,
            }
        }
        MatchOutcome::NoMatch
    }
}

impl Default for MatcherChain {
    fn default() -> Self {
        Self::new(builtin_matchers())
    }
}

/// Uid annotations first, then names.
fn builtin_matchers() -> Vec<Box<dyn Matcher>> {
    vec![Box::new(UidMatcher), Box::new(NameMatcher)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<MatchEntry<'static>> {
        vec![
            MatchEntry { name: "Task", uid: 10 },
            MatchEntry { name: "User", uid: 20 },
        ]
    }

    fn key(name: &str, uid: Option<Uid>) -> MatchKey<'_> {
        MatchKey { name, uid }
    }

    #[test]
    fn builtin_order() {
        let chain = MatcherChain::default();
        let ids: Vec<&str> = chain.matchers().iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["uid", "name"]);
    }

    #[test]
    fn uid_wins_over_name() {
        let chain = MatcherChain::default();
        // Renamed: new name, old uid.
        assert_eq!(
            chain.resolve(&key("Person", Some(20)), &entries()),
            MatchOutcome::Matched(1)
        );
    }

    #[test]
    fn name_match_ignores_case() {
        let chain = MatcherChain::default();
        assert_eq!(
            chain.resolve(&key("task", None), &entries()),
            MatchOutcome::Matched(0)
        );
        assert_eq!(
            chain.resolve(&key("Note", None), &entries()),
            MatchOutcome::NoMatch
        );
    }

    #[test]
    fn unknown_uid_is_ambiguous() {
        let chain = MatcherChain::default();
        let outcome = chain.resolve(&key("Task", Some(99)), &entries());
        assert!(matches!(outcome, MatchOutcome::Ambiguous { ref uids, .. } if uids == &[99]));
    }

    #[test]
    fn duplicate_names_are_ambiguous() {
        let stored = vec![
            MatchEntry { name: "Task", uid: 1 },
            MatchEntry { name: "TASK", uid: 2 },
        ];
        let outcome = NameMatcher.find(&key("task", None), &stored);
        assert_eq!(
            outcome,
            MatchOutcome::Ambiguous {
                uids: vec![1, 2],
                reason: "several stored elements share this name".into()
            }
        );
    }
}
