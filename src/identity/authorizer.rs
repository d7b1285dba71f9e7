use super::role::RoleTag;
use super::user::User;

/// Role check used by the session store and the route guard.
///
/// True when the user's role is `role`, OR the user carries the staff flag, OR the
/// user's role is `admin`. The last two make staff and admins pass every role gate:
/// an admin satisfies `has_role("student")` as well as `has_role("teacher")`.
pub fn has_role(user: Option<&User>, role: &str) -> bool {
    let Some(u) = user else { return false; };
    let resolved = u.resolved_role();
    resolved == Some(role) || u.is_staff || resolved == Some(RoleTag::Admin.as_str())
}

/// Exact-match capability check; a user without a permission set has none.
pub fn has_permission(user: Option<&User>, permission: &str) -> bool {
    user.and_then(|u| u.permissions.as_ref())
        .map(|p| p.contains(permission))
        .unwrap_or(false)
}
