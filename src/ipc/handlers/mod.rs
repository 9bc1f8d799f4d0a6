pub mod core;
pub mod directory;
pub mod grading;
pub mod promotions;
pub mod reports;
pub mod setup;
