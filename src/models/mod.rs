pub mod application;
pub mod command;
