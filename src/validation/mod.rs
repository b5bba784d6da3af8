//! Document-level checks run before the project model is built

pub mod rules;
pub mod validator;

pub use validator::Validator;
