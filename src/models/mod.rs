// Re-export all model types from submodules
mod completion;
mod location;
mod settings;
mod tasks;

pub use completion::*;
pub use location::*;
pub use settings::*;
pub use tasks::*;
