pub mod assistants;
pub mod conversation;
pub mod documents;
pub mod error;
pub mod model;
pub mod ports;
pub mod run;
pub mod session;

#[cfg(test)]
pub(crate) mod fake_service;
