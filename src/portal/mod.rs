//! Role-scoped sessions over the services.
//!
//! A portal is opened with the caller's [`Claims`](crate::auth::Claims)
//! and exposes the commands and live views available to that role.

mod cache;
mod student;
mod teacher;

pub use cache::{StudentCache, UNKNOWN_STUDENT};
pub use student::{StudentPortal, StudentProfile};
pub use teacher::{PurchaseHistoryRow, TeacherPortal};
