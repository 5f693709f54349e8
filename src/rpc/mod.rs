//! RPC module - request registry and response routing.
//!
//! - [`RequestManager`] tracks requests by expected response type
//! - [`ResponseHandler`] delivers decoded messages to them

mod request_manager;
mod response_handler;

pub use request_manager::{PendingRequest, RequestId, RequestInfo, RequestManager};
pub use response_handler::{Delivery, ResponseHandler};
