//! prise - persistent terminal multiplexer.
//!
//! A long-lived daemon (`prised`) owns pseudo-terminal sessions and their
//! emulated screen state; short-lived front-end clients attach over a Unix
//! domain socket, render what the daemon sees, and forward user input.
//! Multiple clients may attach to the same session concurrently and share
//! identical views.
//!
//! Architecture:
//! - One tokio current-thread runtime runs all socket I/O, timers, and
//!   registry mutation; nothing client-visible is touched off that thread.
//! - One dedicated OS thread per session blocks on the PTY master, feeds
//!   output into the terminal emulator under the session mutex, and pokes a
//!   wake channel.
//! - A per-session frame scheduler coalesces wakes into screen captures at
//!   most every 8 ms and multicasts differential `redraw` notifications to
//!   attached clients.
//! - The wire protocol is MessagePack-RPC over the socket.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod keys;
pub mod pty;
pub mod redraw;
pub mod registry;
pub mod render;
pub mod rpc;
pub mod server;
pub mod session;
pub mod term;
