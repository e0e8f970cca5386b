//! Session name registry: uniqueness, resumable persistence, and the
//! exit callback that files a session away once it's done.

mod error;
mod persistence;
mod registry;

pub use error::{RegistryError, Result};
pub use registry::{CreateRequest, CreateSource, SessionRegistry};
