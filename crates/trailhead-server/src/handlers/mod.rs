//! HTTP request handlers.

pub(crate) mod health;
