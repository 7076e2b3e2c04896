//! HTTP handlers for BREAD resources and exec views.

pub mod bread;
pub mod exec;
pub use bread::{action_handler, dispatch, BreadContext};
pub use exec::{exec_route, ExecFn, ExecView};
