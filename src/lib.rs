//! `datalink-sim` — a sliding-window ARQ data-link layer over a simulated
//! lossy broadcast medium.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────┐  transport units  ┌───────────────┐
//!  │ NetworkLayer  │──────────────────▶│   LinkLayer   │
//!  │ (file chunks) │◀──────────────────│ (ARQ windows) │
//!  └───────────────┘   in order, no    └───────┬───────┘
//!                      gaps, no dups           │ frames via ring buffers
//!                                      ┌───────▼───────┐
//!                                      │ PhysicalLayer │  encode/decode,
//!                                      │               │  discard corrupt
//!                                      └───────┬───────┘
//!                                              │ raw payloads
//!                                      ┌───────▼───────┐
//!                                      │      Hub      │  broadcast + noise
//!                                      └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`addr`]     — 6-byte hardware addresses
//! - [`seq`]      — circular sequence-number arithmetic
//! - [`wire`]     — record layouts (serialise / deserialise / probe)
//! - [`ring`]     — fixed-capacity SPSC byte ring for typed records
//! - [`timer`]    — min-heap timer service feeding typed expiry events
//! - [`sender`]   — outbound sliding-window state machine
//! - [`receiver`] — inbound acceptance-window state machine
//! - [`link`]     — the ARQ protocol engine (sender/receiver loops)
//! - [`coding`]   — error-coding transforms (pass-through, Hamming, CRC)
//! - [`physical`] — byte-level transmit/receive loops
//! - [`medium`]   — shared broadcast hub with injected interference
//! - [`network`]  — file chunking/reassembly collaborator
//! - [`node`]     — one full station stack
//! - [`config`]   — session parameters

pub mod addr;
pub mod coding;
pub mod config;
pub mod link;
pub mod medium;
pub mod network;
pub mod node;
pub mod physical;
pub mod receiver;
pub mod ring;
pub mod sender;
pub mod seq;
pub mod timer;
pub mod wire;
