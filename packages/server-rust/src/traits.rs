use async_trait::async_trait;

use crate::storage::{StorageError, User};

/// Persistence backend for the `users` resource.
/// Implementations: [`StorageConnection`](crate::storage::StorageConnection)
/// (SQLite, MySQL, MySQL primary/replica split).
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users that are not soft-deleted.
    async fn list_users(&self) -> Result<Vec<User>, StorageError>;

    /// A single user by ID, `None` when absent or soft-deleted.
    async fn find_user(&self, id: &str) -> Result<Option<User>, StorageError>;

    /// Inserts a new user.
    async fn create_user(&self, user: &User) -> Result<(), StorageError>;

    /// One-time initialization (creates the `users` table if missing).
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Release resources and close connections.
    async fn close(&self);
}
