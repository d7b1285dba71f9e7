//! Route guard: decides whether a protected page may render for the current session.
//!
//! Pure functions over a [`SessionSnapshot`]; nothing is cached between navigations.

use std::collections::BTreeSet;

use tracing::debug;

use crate::identity::{RoleTag, SessionSnapshot};

pub const SIGN_IN_PATH: &str = "/login";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

/// Access requirements attached to a route. Empty sets impose nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub required_role: Option<String>,
    pub allowed_roles: BTreeSet<String>,
    pub required_permissions: BTreeSet<String>,
}

impl AccessPolicy {
    /// Signed in, nothing else.
    pub fn authenticated() -> Self { Self::default() }

    pub fn allow(tags: &[RoleTag]) -> Self {
        Self { allowed_roles: tags.iter().map(|t| t.as_str().to_string()).collect(), ..Self::default() }
    }

    pub fn student() -> Self { Self::allow(&[RoleTag::Student]) }
    pub fn teacher() -> Self { Self::allow(&[RoleTag::Teacher]) }
    pub fn admin() -> Self { Self::allow(&[RoleTag::Admin, RoleTag::SuperAdmin]) }
    pub fn teacher_or_admin() -> Self { Self::allow(&[RoleTag::Teacher, RoleTag::Admin, RoleTag::SuperAdmin]) }

    pub fn with_required_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    pub fn with_allowed_roles<I, T>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.allowed_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permissions<I, T>(mut self, perms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.required_permissions.extend(perms.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not settled yet (startup restore or sign-in in flight); show a neutral state.
    Pending,
    Render,
    /// Go to the sign-in page; `from` is where to bounce back after signing in.
    RedirectSignIn { from: String },
    RedirectUnauthorized,
}

impl GuardDecision {
    /// Target path for redirects.
    pub fn redirect_path(&self) -> Option<&'static str> {
        match self {
            GuardDecision::RedirectSignIn { .. } => Some(SIGN_IN_PATH),
            GuardDecision::RedirectUnauthorized => Some(UNAUTHORIZED_PATH),
            GuardDecision::Pending | GuardDecision::Render => None,
        }
    }
}

/// Checks run in order and the first failure decides: authentication, required role,
/// allowed roles, permissions.
pub fn evaluate(session: &SessionSnapshot, policy: &AccessPolicy, location: &str) -> GuardDecision {
    if !session.is_authenticated {
        if session.is_loading {
            return GuardDecision::Pending;
        }
        return GuardDecision::RedirectSignIn { from: location.to_string() };
    }

    let role = session.resolved_role();

    if let Some(required) = policy.required_role.as_deref() {
        if !(session.has_role(required) || role == Some(required)) {
            debug!(target: "echo::session", "guard: required role '{}' not met by {:?} at {}", required, role, location);
            return GuardDecision::RedirectUnauthorized;
        }
    }

    if !policy.allowed_roles.is_empty() {
        let allowed = role.map(|r| policy.allowed_roles.contains(r)).unwrap_or(false);
        if !allowed {
            debug!(target: "echo::session", "guard: role {:?} not in {:?} at {}", role, policy.allowed_roles, location);
            return GuardDecision::RedirectUnauthorized;
        }
    }

    if let Some(missing) = policy.required_permissions.iter().find(|p| !session.has_permission(p)) {
        debug!(target: "echo::session", "guard: missing permission '{}' at {}", missing, location);
        return GuardDecision::RedirectUnauthorized;
    }

    GuardDecision::Render
}

/// Strict student gate: the role must be exactly `student`. Admins and staff do not pass.
pub fn student_only(session: &SessionSnapshot) -> GuardDecision {
    match session.identity.as_ref().and_then(|u| u.resolved_role()) {
        Some(r) if r == RoleTag::Student.as_str() => GuardDecision::Render,
        _ => GuardDecision::RedirectUnauthorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Role, User};

    fn signed_in(user: User) -> SessionSnapshot {
        SessionSnapshot { identity: Some(user), is_authenticated: true, is_loading: false }
    }

    fn with_perms(mut user: User, perms: &[&str]) -> User {
        user.permissions = Some(perms.iter().map(|p| p.to_string()).collect());
        user
    }

    #[test]
    fn unauthenticated_always_goes_to_sign_in_first() {
        let policy = AccessPolicy::admin()
            .with_required_role("teacher")
            .with_permissions(["courses.edit"]);
        let d = evaluate(&SessionSnapshot::signed_out(), &policy, "/teacher/courses");
        assert_eq!(d, GuardDecision::RedirectSignIn { from: "/teacher/courses".into() });
        assert_eq!(d.redirect_path(), Some(SIGN_IN_PATH));
    }

    #[test]
    fn loading_without_session_is_pending() {
        let s = SessionSnapshot { identity: None, is_authenticated: false, is_loading: true };
        assert_eq!(evaluate(&s, &AccessPolicy::student(), "/dashboard"), GuardDecision::Pending);
    }

    #[test]
    fn required_role_accepts_admin_shortcut_but_allowed_roles_do_not() {
        let admin = signed_in(User::new(1, "root").with_role(Role::simple("admin")));
        let required = AccessPolicy::authenticated().with_required_role("teacher");
        assert_eq!(evaluate(&admin, &required, "/x"), GuardDecision::Render);
        assert_eq!(evaluate(&admin, &AccessPolicy::teacher(), "/x"), GuardDecision::RedirectUnauthorized);
        assert_eq!(evaluate(&admin, &AccessPolicy::admin(), "/x"), GuardDecision::Render);
    }

    #[test]
    fn structured_role_is_resolved_for_allowed_roles() {
        let t = signed_in(User::new(2, "tina").with_role(Role::Structured { role_type: "teacher".into(), name: Some("Teacher".into()) }));
        assert_eq!(evaluate(&t, &AccessPolicy::teacher_or_admin(), "/x"), GuardDecision::Render);
        assert_eq!(evaluate(&t, &AccessPolicy::student(), "/x"), GuardDecision::RedirectUnauthorized);
    }

    #[test]
    fn missing_role_fails_allowed_roles() {
        let nobody = signed_in(User::new(3, "anon"));
        assert_eq!(evaluate(&nobody, &AccessPolicy::student(), "/x"), GuardDecision::RedirectUnauthorized);
        assert_eq!(evaluate(&nobody, &AccessPolicy::authenticated(), "/x"), GuardDecision::Render);
    }

    #[test]
    fn every_permission_is_required() {
        let s = signed_in(with_perms(User::new(4, "sam").with_role(Role::simple("student")), &["quiz.take"]));
        let one = AccessPolicy::student().with_permissions(["quiz.take"]);
        let two = one.clone().with_permissions(["quiz.grade"]);
        assert_eq!(evaluate(&s, &one, "/quiz"), GuardDecision::Render);
        assert_eq!(evaluate(&s, &two, "/quiz"), GuardDecision::RedirectUnauthorized);
    }

    #[test]
    fn student_only_is_strict() {
        let student = signed_in(User::new(5, "sue").with_role(Role::simple("student")));
        let admin = signed_in(User::new(6, "ada").with_role(Role::simple("admin")));
        let mut staff = User::new(7, "stu").with_role(Role::simple("teacher"));
        staff.is_staff = true;
        assert_eq!(student_only(&student), GuardDecision::Render);
        assert_eq!(student_only(&admin), GuardDecision::RedirectUnauthorized);
        assert_eq!(student_only(&signed_in(staff)), GuardDecision::RedirectUnauthorized);
        assert_eq!(student_only(&SessionSnapshot::signed_out()), GuardDecision::RedirectUnauthorized);
    }
}
