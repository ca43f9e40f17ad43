// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Role model for storage.

use crate::db::Document;
use crate::models::{new_stamp, Claim};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Role document, stored at `IdentityRoles/{guid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub normalized_name: Option<String>,
    /// Changes on every persisted mutation
    pub concurrency_stamp: String,
    /// Ids of member users
    pub users: Vec<String>,
    pub claims: Vec<Claim>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document for Role {
    const TYPE_NAME: &'static str = "IdentityRole";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency_stamp: new_stamp(),
            ..Default::default()
        }
    }
}
