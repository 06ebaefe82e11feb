pub mod api;
pub mod registry;
pub mod task;
