//! Read-only tree view
//!
//! Trees are owned by the tree-care platform; the engine never writes to
//! them. Only the attributes the dispatch path needs are modelled.

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// A monitored tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: String,
    pub name: String,
    pub species: String,
    pub location: GeoPoint,
    pub active: bool,
}

/// Projection of a tree embedded in push payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeProjection {
    pub id: String,
    pub name: String,
    pub species: String,
    pub location: GeoPoint,
}

impl From<&Tree> for TreeProjection {
    fn from(tree: &Tree) -> Self {
        Self {
            id: tree.id.clone(),
            name: tree.name.clone(),
            species: tree.species.clone(),
            location: tree.location,
        }
    }
}
