use super::BoxFuture;
use crate::DomainResult;
use crate::indexing::{PostDocument, UserDocument};

/// Result of a versioned index write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWrite {
    Applied,
    /// The stored document carries an equal or newer version.
    Stale,
    /// Delete of a document that was never indexed.
    Absent,
}

pub trait SearchIndex: Send + Sync {
    fn upsert_post(
        &self,
        document: &PostDocument,
        version: i64,
    ) -> BoxFuture<'_, DomainResult<IndexWrite>>;
    fn delete_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<IndexWrite>>;
    fn get_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<PostDocument>>>;
    fn upsert_user(
        &self,
        document: &UserDocument,
        version: i64,
    ) -> BoxFuture<'_, DomainResult<IndexWrite>>;
    /// Rewrites nickname/avatar on every post of the author; returns docs touched.
    fn update_author_profile(
        &self,
        author_id: u64,
        nickname: &str,
        avatar_url: &str,
    ) -> BoxFuture<'_, DomainResult<u64>>;
}
