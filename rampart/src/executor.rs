//! Virtual users and the pool that scales them.
mod pool;
mod virtual_user;

pub(crate) use pool::VuPool;
pub(crate) use virtual_user::flag_request_failure;
pub use virtual_user::VuState;
