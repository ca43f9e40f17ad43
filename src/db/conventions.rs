// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Document naming conventions.
//!
//! Every persisted entity lives under a collection prefix derived from its
//! type name, and its document id is `<Prefix>/<partial>`. Uniqueness
//! records and view names embed the same prefix, so the mapping must stay
//! stable for the life of a database.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default separator between the collection prefix and the partial id.
pub const DEFAULT_IDENTITY_PARTS_SEPARATOR: char = '/';

/// A record that can be stored as a document.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Type tag used to derive the collection prefix.
    const TYPE_NAME: &'static str;

    /// Full document id, empty until one is assigned.
    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

/// Maps a type name to its collection prefix.
pub type CollectionNameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Key/prefix derivation settings shared by a session and its stores.
#[derive(Clone)]
pub struct Conventions {
    identity_parts_separator: char,
    find_collection_name: CollectionNameFn,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            identity_parts_separator: DEFAULT_IDENTITY_PARTS_SEPARATOR,
            find_collection_name: Arc::new(pluralize),
        }
    }
}

impl fmt::Debug for Conventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conventions")
            .field("identity_parts_separator", &self.identity_parts_separator)
            .finish_non_exhaustive()
    }
}

impl Conventions {
    /// Replace the naming convention (default: pluralized type name).
    pub fn with_collection_name<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.find_collection_name = Arc::new(f);
        self
    }

    pub fn with_identity_parts_separator(mut self, separator: char) -> Self {
        self.identity_parts_separator = separator;
        self
    }

    pub fn identity_parts_separator(&self) -> char {
        self.identity_parts_separator
    }

    /// Collection prefix for a document type.
    pub fn prefix_for<T: Document>(&self) -> String {
        self.prefix_for_type_name(T::TYPE_NAME)
    }

    /// Collection prefix for a concrete entity.
    pub fn prefix_for_entity<T: Document>(&self, _entity: &T) -> String {
        self.prefix_for::<T>()
    }

    pub fn prefix_for_type_name(&self, type_name: &str) -> String {
        (self.find_collection_name)(type_name)
    }

    /// New `<Prefix>/<uuid>` document id.
    pub fn generate_document_id<T: Document>(&self) -> String {
        self.full_document_id::<T>(&uuid::Uuid::new_v4().to_string())
    }

    /// Prepend the collection prefix to a partial id.
    ///
    /// Ids that already carry the prefix are returned unchanged.
    pub fn full_document_id<T: Document>(&self, partial: &str) -> String {
        let prefix = self.prefix_for::<T>();
        let already_full = partial
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with(self.identity_parts_separator));
        if already_full {
            partial.to_string()
        } else {
            format!("{}{}{}", prefix, self.identity_parts_separator, partial)
        }
    }

    /// Strip the collection prefix from a full id.
    pub fn partial_document_id<'a>(&self, full: &'a str) -> &'a str {
        full.split_once(self.identity_parts_separator)
            .map(|(_, rest)| rest)
            .unwrap_or(full)
    }

    /// Collection prefix embedded in a full id, if any.
    pub fn collection_of<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.split_once(self.identity_parts_separator)
            .map(|(collection, _)| collection)
    }
}

/// English plural of a type name: `IdentityUser` -> `IdentityUsers`,
/// `Category` -> `Categories`, `Address` -> `Addresses`.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        return format!("{}es", name);
    }

    let mut chars = lower.chars().rev();
    if let (Some('y'), Some(before)) = (chars.next(), chars.next()) {
        if !"aeiou".contains(before) {
            return format!("{}ies", &name[..name.len() - 1]);
        }
    }

    format!("{}s", name)
}
