#![forbid(unsafe_code)]

//! Watches one video channel and relays each new upload to a Telegram chat
//! as a video-only file and an audio-only file.

pub mod cleanup;
pub mod config;
pub mod cookies;
pub mod notify;
pub mod poller;
pub mod sent_log;
pub mod source;
