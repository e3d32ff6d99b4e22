//! The authenticated caller.

use keywarden_core::{GroupId, UserId};
use keywarden_envelope::X25519PublicKey;

/// The user on whose behalf an operation runs, as established by the
/// identity provider.
///
/// The user's password is passed separately to the operations that need
/// it and is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    /// Every group the user belongs to, private group included.
    pub group_ids: Vec<GroupId>,
    pub public_key: X25519PublicKey,
}

impl CurrentUser {
    pub fn is_member_of(&self, group_id: &GroupId) -> bool {
        self.group_ids.contains(group_id)
    }
}
