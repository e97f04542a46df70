//! # Audio Streaming Module
//!
//! Everything a realtime `/ws/stream` session needs between the socket and the
//! detection engine.
//!
//! ## Key Components:
//! - **Format**: PCM layout description and sample conversion
//! - **Frame Buffer**: Append-only accumulator of the received PCM
//! - **Window Scheduler**: Boundary detection for cumulative analysis windows
//! - **Protocol**: Init payload, server messages and the socket/session channel items
//! - **Session**: The per-connection state machine
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 48kHz (48,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

// WebSocket handler is in src/websocket.rs at the root level
pub mod buffer;       // Append-only PCM accumulator
pub mod format;       // PCM layout and sample conversion
pub mod protocol;     // Wire messages
pub mod session;      // Session state machine
pub mod window;       // Analysis window boundaries
