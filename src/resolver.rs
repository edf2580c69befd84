//! Requests gathered from a rendered document
//!
//! A document scan finds the elements that reference remote objects and
//! groups them by object key. Elements that want the cached bytes are
//! "direct"; elements that want a link are "signed".

use crate::artifacts::LocalArtifact;
use crate::error::ResolveError;
use std::collections::BTreeMap;

/// Outcome delivered once per object key.
#[derive(Debug, Clone)]
pub enum Resolution {
    Local(LocalArtifact),
    Signed(String),
    Failed(ResolveError),
}

impl Resolution {
    pub fn is_failed(&self) -> bool {
        matches!(self, Resolution::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ResolveRequests<E> {
    direct: BTreeMap<String, Vec<E>>,
    signed: BTreeMap<String, Vec<E>>,
}

impl<E> Default for ResolveRequests<E> {
    fn default() -> Self {
        Self {
            direct: BTreeMap::new(),
            signed: BTreeMap::new(),
        }
    }
}

impl<E> ResolveRequests<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_direct(&mut self, object_key: impl Into<String>, element: E) {
        self.direct.entry(object_key.into()).or_default().push(element);
    }

    pub fn add_signed(&mut self, object_key: impl Into<String>, element: E) {
        self.signed.entry(object_key.into()).or_default().push(element);
    }

    /// Fold another scan's requests into this one.
    pub fn merge(&mut self, other: ResolveRequests<E>) {
        for (key, elements) in other.direct {
            self.direct.entry(key).or_default().extend(elements);
        }
        for (key, elements) in other.signed {
            self.signed.entry(key).or_default().extend(elements);
        }
    }

    pub fn direct(&self) -> &BTreeMap<String, Vec<E>> {
        &self.direct
    }

    pub fn signed(&self) -> &BTreeMap<String, Vec<E>> {
        &self.signed
    }

    /// Distinct object keys across both request classes.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.direct.keys().chain(self.signed.keys()).cloned().collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.signed.is_empty()
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, Vec<E>>, BTreeMap<String, Vec<E>>) {
        (self.direct, self.signed)
    }
}
