//! IPC control surface (§6): a loopback TCP listener that lets a UI process
//! drive the Coordinator and receive its events, framed per `protocol`.

pub mod protocol;
pub mod server;

pub use server::run;
