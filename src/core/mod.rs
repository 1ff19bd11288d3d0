pub mod error;
pub mod languages;
pub mod status;

pub use error::{ExecutionError, ExecutionResult};
pub use languages::LanguageSpecFactory;
pub use status::ExecutionStatus;
