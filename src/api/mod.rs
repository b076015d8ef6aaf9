//! API Module
//!
//! HTTP gateway in front of the partition router.
//!
//! # Endpoints
//! - `GET /cache/:key?region=` - Read a value
//! - `PUT /cache/:key` - Store a value with a TTL or absolute expiration
//! - `PUT /cache/:key/policy` - Replace an entry's expiration
//! - `DELETE /cache/:key?region=` - Delete a value
//! - `DELETE /regions/:region` - Drop a region on every partition
//! - `DELETE /cache` - Drop every region
//! - `GET /stats` - Counters summed over hosted partitions
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
