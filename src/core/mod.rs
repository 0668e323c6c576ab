pub mod chat;
pub mod services;
pub mod session;
pub mod traits;
pub mod upload;
