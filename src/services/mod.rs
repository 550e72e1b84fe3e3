pub mod completion;
pub mod location;
pub mod proximity;
pub mod tasks;
