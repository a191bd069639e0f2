pub mod config;
pub mod error;
pub mod gemini;
pub mod inference;
pub mod server;
pub mod validator;
