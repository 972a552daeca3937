pub mod catalog;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod sync;

pub use routes::create_router;

use serde::Serialize;

/// JSON body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
