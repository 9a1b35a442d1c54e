//! Republishes the liked TikTok videos of one account to a Telegram chat.
pub mod cache;
pub mod config;
pub mod db;
pub mod delivery;
pub mod feed;
pub mod model;
pub mod worker;
