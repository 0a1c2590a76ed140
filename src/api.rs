//! Query seam to the collaboration service.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{MemberSnapshot, Person, SpaceSnapshot};

/// The read-status queries the reconciler depends on.
///
/// Implementations: [`crate::http::HttpReadStatusApi`] for the live service and
/// [`crate::memory::MemoryApi`] for offline runs and tests.
#[async_trait]
pub trait ReadStatusApi: Send + Sync {
    /// The authenticated user.
    async fn current_user(&self) -> Result<Person>;

    /// Spaces with the local user's read status, most recent activity first.
    /// `None` lists every space.
    async fn list_spaces_with_read_status(&self, limit: Option<usize>) -> Result<Vec<SpaceSnapshot>>;

    /// A single space without read status (used for its title).
    async fn get_space(&self, id: &str) -> Result<SpaceSnapshot>;

    /// A single space with the local user's read status.
    async fn get_space_with_read_status(&self, id: &str) -> Result<SpaceSnapshot>;

    /// Every member of a space with their last-seen marker.
    async fn list_members_with_read_status(&self, space_id: &str) -> Result<Vec<MemberSnapshot>>;

    /// Move the local user's last-seen marker in `space_id` up to
    /// `message_id`. The service answers with a local `memberships:seen`
    /// event.
    async fn update_last_seen(&self, space_id: &str, message_id: &str) -> Result<()>;
}
