//! Index-addressed, id-keyed storage ("arena-with-ids", §9).
//!
//! Replaces the teacher's cyclic back-pointer-free patterns (goals, plans,
//! steps, decisions, participants all cross-reference each other by id, not
//! by pointer) with one small generic table reused by every component that
//! needs it. Lifetimes are the registry's; cross-references are plain
//! `String` ids resolved back through `get`.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

/// Generates an opaque, UUID-shaped identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A process-wide, reader-writer-locked table of id -> value. Reads dominate
/// (§5), so every accessor takes a read lock except `insert`/`remove`/
/// `update`.
pub struct IdTable<T> {
    rows: RwLock<HashMap<String, T>>,
}

impl<T: Clone> IdTable<T> {
    pub fn new() -> Self {
        Self { rows: RwLock::new(HashMap::new()) }
    }

    pub async fn insert(&self, id: String, value: T) {
        self.rows.write().await.insert(id, value);
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.rows.read().await.get(id).cloned()
    }

    /// Read-modify-write under a single write-lock acquisition so callers
    /// never race a concurrent insert for the same id.
    pub async fn update<F, R>(&self, id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut rows = self.rows.write().await;
        rows.get_mut(id).map(f)
    }

    pub async fn remove(&self, id: &str) -> Option<T> {
        self.rows.write().await.remove(id)
    }

    pub async fn values(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.rows.read().await.contains_key(id)
    }
}

impl<T: Clone> Default for IdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_get_update_remove() {
        let table: IdTable<i32> = IdTable::new();
        let id = new_id();
        table.insert(id.clone(), 1).await;
        assert_eq!(table.get(&id).await, Some(1));

        table.update(&id, |v| *v += 1).await;
        assert_eq!(table.get(&id).await, Some(2));

        assert_eq!(table.remove(&id).await, Some(2));
        assert_eq!(table.get(&id).await, None);
    }
}
