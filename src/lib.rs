#![doc = "post-ledger: collect subreddit tips into a spreadsheet ledger, \
          render and publish each once."]

//! The ledger ([`ledger`]) is the record every stage consults: a post is
//! appended once, rendered while its upload flag is unset, and the flag is
//! flipped once after a successful publish.
//!
//! External services sit behind the traits in [`contract`]; the adapters live
//! in [`sheets`], [`download`], [`render`] and [`upload`]. [`synchronise`]
//! wires them into the three pipeline stages the [`cli`] exposes.

pub mod cli;
pub mod contract;
pub mod download;
pub mod ledger;
pub mod load_config;
pub mod preprocess;
pub mod render;
pub mod sheets;
pub mod synchronise;
pub mod upload;

pub use cli::{run, Cli, Commands};
