pub mod closure;
pub mod file;
pub mod not_implemented;

pub use closure::FnHandler;
pub use file::{DirectoryHandler, FileHandler};
pub use not_implemented::NotImplementedHandler;
