//! dockhand shared - types used on both sides of the exec capability boundary
//!
//! This crate holds the error taxonomy, the constants that backends and the
//! host-side engine must agree on, and daemon endpoint resolution.

pub mod constants;
pub mod errors;
pub mod transport;

pub use errors::{DockhandError, DockhandResult, TransferDirection};
pub use transport::DaemonEndpoint;
