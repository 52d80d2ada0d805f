//! # Audio Module
//!
//! Per-guild queueing and playback orchestration for Open Music.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - FIFO [`queue::TrackQueue`] bounded globally and per requester
//! - [`queue::QueueHandle`] pairs a shared queue with its "not empty" signal
//!
//! ### [`session`] - Voice Session
//! - One [`session::GuildSession`] per connected guild
//! - Player loop: dequeue, materialize, play, wait, clean up, repeat
//! - Monitor: empty-channel grace period and inactivity timeout
//! - Voice and text channel access go through the [`session::VoiceHandle`]
//!   and [`session::Notifier`] traits, implemented over Songbird in `bot::voice`
//!
//! ### [`registry`] - Session Registry
//! - Creates, reuses and replaces sessions with per-guild locking
//! - Owns every guild queue and exposes snapshots for persistence
//!
//! ## Concurrency
//!
//! Each session runs two tasks that share one cancellation token. Command
//! handlers only touch the queue and the registry; the player loop is the
//! single writer of the current-track state.

pub mod queue;
pub mod registry;
pub mod session;
