//! Access rules for joining a room.
//!
//! ```text
//! owner                                  → allowed
//! public room                            → allowed
//! private room, user in allowed_users    → allowed
//! private room, role in allowed_roles    → allowed
//! no permission record                   → allowed (fail-open)
//! ```
//!
//! Private rooms with a password add a gate in front of the list check:
//! the right password admits anyone, a wrong one is refused outright, and
//! no password falls back to the allow-lists.

use std::collections::BTreeSet;

use constant_time_eq::constant_time_eq;
use huddle_protocol::{Permission, UserId};

use crate::{JoinRejection, RoomPermissions};

/// Decides whether `user_id` (with `roles`) may enter a room governed by
/// `permissions`.
///
/// A missing record allows access. Rooms materialized lazily by a join
/// have no restrictive policy yet; treat the absence as public.
pub fn check_access(
    permissions: Option<&RoomPermissions>,
    user_id: &UserId,
    roles: &BTreeSet<String>,
) -> bool {
    let Some(perms) = permissions else {
        tracing::debug!(%user_id, "no permission record, allowing access");
        return true;
    };
    if perms.owner_id == *user_id {
        return true;
    }
    match perms.permission {
        Permission::Public => true,
        Permission::Private => {
            perms.allowed_users.contains(user_id)
                || perms.allowed_roles.intersection(roles).next().is_some()
        }
    }
}

/// Runs the password gate and then the allow-list check.
pub(crate) fn admit(
    permissions: Option<&RoomPermissions>,
    user_id: &UserId,
    roles: &BTreeSet<String>,
    supplied: Option<&str>,
) -> Result<(), JoinRejection> {
    if let Some(perms) = permissions {
        let gated = perms.permission == Permission::Private && perms.owner_id != *user_id;
        if gated {
            match (perms.password.as_deref(), supplied) {
                (Some(expected), Some(given)) => {
                    return if constant_time_eq(expected.as_bytes(), given.as_bytes()) {
                        Ok(())
                    } else {
                        Err(JoinRejection::WrongPassword)
                    };
                }
                (Some(_), None) => {
                    return if check_access(permissions, user_id, roles) {
                        Ok(())
                    } else {
                        Err(JoinRejection::PasswordRequired)
                    };
                }
                (None, _) => {}
            }
        }
    }

    if check_access(permissions, user_id, roles) {
        Ok(())
    } else {
        Err(JoinRejection::PermissionDenied)
    }
}
