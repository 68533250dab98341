//! pdf-mirror: keep a Google Drive folder mirroring the PDFs linked from a website's sitemap.
//!
//! One invocation runs [`synchronise::synchronise`]: discover PDF links, download them,
//! list the destination folder, reconcile by file name, delete what disappeared from the
//! site and upload everything discovered.

pub mod auth;
pub mod cli;
pub mod config;
pub mod contract;
pub mod discover;
pub mod download;
pub mod drive;
pub mod error;
pub mod load_config;
pub mod reconcile;
pub mod retry;
pub mod synchronise;

pub use cli::{run, Cli, Commands};
