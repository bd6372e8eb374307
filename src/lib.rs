//! tidepkg - repository synchronization and package transactions for
//! Slackware-style systems
//!
//! Repositories are synced and verified into an in-memory inventory, the
//! [`resolver`] pairs that inventory with the installed packages, and a
//! [`transaction`] hands the result to the pkgtools programs.

pub mod cli;
pub mod config;
pub mod database;
pub mod download;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod installer;
pub mod lock;
pub mod output;
pub mod package;
pub mod parsers;
pub mod repository;
pub mod resolver;
pub mod signing;
pub mod transaction;

pub use error::{Result, TidepkgError};
