pub mod barrier;
pub mod events;
pub mod message_broker;
pub mod messages;
pub mod sim_communication;
