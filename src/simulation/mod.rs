pub mod agents;
pub mod config;
pub mod controller;
pub mod error;
pub mod instruction;
pub mod io;
pub mod logging;
pub mod messaging;
pub mod network;
pub mod pt;
pub mod realm;
pub mod time_wheel;
pub mod world;
