//! `dispatch` crate: the wire call to a compute engine.
//!
//! Every dispatcher implements [`Dispatcher`]. The engine crate drives it from
//! the execute stage; [`HttpDispatcher`] is the production implementation and
//! [`mock::MockDispatcher`] a scripted test double.

pub mod error;
pub mod http;
pub mod mock;
pub mod payload;
pub mod traits;

pub use error::DispatchError;
pub use http::HttpDispatcher;
pub use payload::DispatchPayload;
pub use traits::{DispatchResult, Dispatcher};
