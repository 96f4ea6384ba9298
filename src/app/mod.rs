pub mod context;
pub mod error;

pub use context::{AppContext, Capabilities};
pub use error::{DogearError, Result};
