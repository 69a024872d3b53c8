//! Token-protected expense CRUD API. Successful writes feed the change
//! stream through the hub's publisher.

pub mod auth;
pub mod errors;
pub mod expenses;
pub mod store;
