pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod validation;
