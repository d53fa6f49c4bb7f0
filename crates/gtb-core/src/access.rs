//! Access control: the first gate every inbound message passes through.

use crate::{config::Config, domain::UserId};

/// What an inbound user is allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessRole {
    /// Not in the allow-list. Gets a fixed rejection and nothing else runs.
    Unauthorized,
    /// Allowed to chat and use the public commands.
    User,
    /// Allowed everything, including `/stats`, `/mode` and `/health`.
    Admin,
}

/// Classify a user by static membership in the configured id sets.
///
/// Config loading guarantees the admin set is a subset of the allowed set,
/// so an admin is always an allowed user too.
pub fn classify(user_id: UserId, cfg: &Config) -> AccessRole {
    if cfg.admin_user_ids.contains(&user_id.0) {
        return AccessRole::Admin;
    }
    if cfg.allowed_user_ids.contains(&user_id.0) {
        return AccessRole::User;
    }
    AccessRole::Unauthorized
}
