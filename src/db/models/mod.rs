//! Database models split into domain-specific modules.

pub mod app;
pub mod channel;
pub mod common;
pub mod notification;
pub mod rbac;
pub mod team;
pub mod user;

pub use app::*;
pub use channel::*;
pub use common::*;
pub use notification::*;
pub use rbac::*;
pub use team::*;
pub use user::*;
