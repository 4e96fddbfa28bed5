//! Asynchronous OCR job queue.
//!
//! Callers submit a document locator (or inline image) and poll for the result
//! or receive a callback. Job state lives in a shared store so API processes and
//! any number of workers can restart independently.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
