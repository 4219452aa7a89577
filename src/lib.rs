pub mod db;
pub mod export;
pub mod ipc;
pub mod logging;
pub mod matching;
pub mod nav;
pub mod session;
pub mod store;
