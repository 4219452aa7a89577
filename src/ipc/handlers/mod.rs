pub mod attendance;
pub mod auth;
pub mod core;
pub mod departments;
pub mod nav;
pub mod reports;
pub mod sections;
pub mod setup;
pub mod subjects;
pub mod users;
