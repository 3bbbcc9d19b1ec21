//! Chat channel implementations for tierbot.
//!
//! Each channel turns platform traffic into normalized inbound messages and
//! delivers formatted replies. The bundled channel is the terminal.

pub mod cli;

pub use cli::CliChannel;
