// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Lookup structures kept beside the documents: uniqueness records and the
//! claims/logins view.

pub mod claims_logins;
pub mod unique;

pub use claims_logins::{claims_and_logins_index, create_claims_and_logins_index};
pub use unique::{escape_unique_value, load_by_unique, UniqueField, UniqueFields, UniqueIndex};
