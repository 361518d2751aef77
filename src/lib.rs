//! Supervisor daemon for a long-running Minecraft server process: spawns and
//! restarts the child JVM, probes it, reconciles operator intent against
//! observed status, and exposes a small command surface over a chat-room
//! transport.

pub mod chat;
pub mod cli;
pub mod config;
pub mod controller;
pub mod events;
pub mod logging;
pub mod pinger;
pub mod platform;
pub mod process;
pub mod properties;
pub mod status;
pub mod supervisor;
