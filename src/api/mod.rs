pub mod sessions;

pub use sessions::SessionRegistry;
