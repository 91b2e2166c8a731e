//! Outbound messaging abstractions (Telegram today; other chat transports later).

pub mod port;
pub mod types;
