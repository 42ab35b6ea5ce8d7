//! Command execution seam.
//!
//! A connection handler hands every decoded message to an [`Executor`] when
//! one is installed on the server. Without one the server runs in echo mode
//! and answers with a plain acknowledgement.

use bytes::BytesMut;
use std::sync::Arc;

use crate::protocol;

/// Engine that turns a received message into the bytes written back.
pub trait Executor: Send + Sync {
    fn execute(&self, request: &str) -> BytesMut;
}

/// Build the response for one message.
pub fn respond(executor: Option<&Arc<dyn Executor>>, request: &str) -> BytesMut {
    match executor {
        Some(executor) => executor.execute(request),
        None => protocol::response_ack(request),
    }
}
