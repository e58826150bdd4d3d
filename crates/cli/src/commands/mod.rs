pub mod chat;
pub mod config_cmd;
pub mod doctor;
pub mod instructions;
pub mod onboard;
