#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Code relating to setting up the server which accepts sessions and spawns handlers for them.
pub mod server;

/// The command line interface.
pub mod cli;

/// Routes what sessions ask for into the components below.
pub mod gateway;

/// The messages that can be sent from a connected session,
/// as well as what the server sends back.
pub mod messages;

/// Owns the one shared serial connection.
pub mod connection;

/// Rate limited forwarding of commands to the device.
pub mod relay;

/// The rate limiter used per continuous channel.
pub mod throttle;

/// Control channels, i.e. sliders and toggles.
pub mod channel;

/// Recording and playing back sequences of steps.
pub mod sequence;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// A connected browser tab.
pub(crate) mod session;

/// Mocked serial ports.
pub mod mock;

/// Serial port driver.
pub mod serial;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// Events every session hears about.
pub mod events;
