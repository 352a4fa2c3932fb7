//! The three proxy-facing protocol adapters. Each adapter holds nothing
//! but a clone of the shared `BanEngine` — one capability, `is_banned`,
//! consumed by all three — and its own listener.

pub mod envoy;
pub mod nginx;
pub mod spoa;
