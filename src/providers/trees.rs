//! Tree repository backends
//!
//! The tree collection is owned by the tree-care platform; the engine
//! reads it from the shared sled database and never writes rows other
//! than through the seeding helper used by bootstrap tooling and tests.

use async_trait::async_trait;
use tracing::warn;

use crate::error::EngineError;
use crate::types::Tree;

use super::TreeRepository;

/// Read model over the `trees` keyspace.
#[derive(Clone)]
pub struct SledTreeRepository {
    trees: sled::Tree,
}

impl SledTreeRepository {
    pub fn open(db: &sled::Db) -> Result<Self, EngineError> {
        Ok(Self {
            trees: db.open_tree("trees")?,
        })
    }

    /// Seed a tree row. Bootstrap/test helper — the platform writes the
    /// real collection.
    pub fn seed(&self, tree: &Tree) -> Result<(), EngineError> {
        let value = serde_json::to_vec(tree)?;
        self.trees.insert(tree.id.as_bytes(), value)?;
        Ok(())
    }
}

#[async_trait]
impl TreeRepository for SledTreeRepository {
    async fn list_active(&self) -> Result<Vec<Tree>, EngineError> {
        let mut rows = Vec::new();
        for item in self.trees.iter() {
            let (_, value) = item.map_err(EngineError::from)?;
            match serde_json::from_slice::<Tree>(&value) {
                Ok(tree) if tree.active => rows.push(tree),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping undecodable tree row"),
            }
        }
        Ok(rows)
    }

    async fn get(&self, id: &str) -> Result<Option<Tree>, EngineError> {
        match self.trees.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// In-memory repository for unit tests and minimal deployments.
#[derive(Default)]
pub struct InMemoryTreeRepository {
    trees: std::sync::RwLock<Vec<Tree>>,
}

impl InMemoryTreeRepository {
    pub fn new(trees: Vec<Tree>) -> Self {
        Self {
            trees: std::sync::RwLock::new(trees),
        }
    }
}

#[async_trait]
impl TreeRepository for InMemoryTreeRepository {
    async fn list_active(&self) -> Result<Vec<Tree>, EngineError> {
        let trees = self
            .trees
            .read()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(trees.iter().filter(|t| t.active).cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Tree>, EngineError> {
        let trees = self
            .trees
            .read()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(trees.iter().find(|t| t.id == id).cloned())
    }
}
