//! API test execution engine.
//!
//! Collections of templated HTTP requests run in order against an
//! environment; each response is checked by declarative assertions and may
//! feed captured values to the requests after it. Karate feature files,
//! Postman collections and OpenAPI documents are converted into the same
//! collection model and run by the same engine.

pub mod auth;
pub mod cli;
pub mod collections;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod http;
pub mod import_export;
pub mod karate;
pub mod storage;
pub mod testing;
