use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tags the user wants preserved, one set per candidate kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepSet {
    pub languages: BTreeSet<String>,
    pub layouts: BTreeSet<String>,
    pub architectures: BTreeSet<String>,
}

impl KeepSet {
    pub fn new<L, K, A>(languages: L, layouts: K, architectures: A) -> Self
    where
        L: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
        A: IntoIterator<Item = String>,
    {
        Self {
            languages: languages.into_iter().collect(),
            layouts: layouts.into_iter().collect(),
            architectures: architectures.into_iter().collect(),
        }
    }

    pub fn keeps_language(&self, tag: &str) -> bool {
        self.languages.contains(tag)
    }

    pub fn keeps_layout(&self, tag: &str) -> bool {
        self.layouts.contains(tag)
    }

    pub fn keeps_architecture(&self, tag: &str) -> bool {
        self.architectures.contains(tag)
    }
}
