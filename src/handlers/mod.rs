pub mod admin;
pub mod completion;
pub mod events;
pub mod location;
pub mod tasks;
