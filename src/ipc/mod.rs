// IPC module - Communication between the warden CLI and the daemon

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{Command, Request, Response, ResponseData};
pub use server::IpcServer;

/// Default socket path for daemon communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/warden.sock";
