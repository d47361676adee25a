pub mod demo;
pub mod response;
pub mod routes;
pub mod users;

pub use response::{ApiError, ApiResponse};
pub use routes::create_router;
