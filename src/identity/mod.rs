//! Identity and session state for the signed-in user.
//! Keep the public surface thin and split implementation across sub-modules.

mod user;
mod role;
mod authorizer;
mod session;

pub use user::{User, Preferences};
pub use role::{Role, RoleTag};
pub use authorizer::{has_role, has_permission};
pub use session::{SessionStore, SessionSnapshot, OpOutcome};
