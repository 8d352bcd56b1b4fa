//! Termwatch - legal document history for online services
//!
//! Termwatch tracks Terms of Service, Privacy Policies and similar
//! documents: it fetches each declared document, archives the raw page
//! as a snapshot, extracts the legal text, and archives that as a
//! version. Both archives are git repositories, so every change ever
//! observed is one commit away.

pub mod cli;
pub mod config;
pub mod declarations;
pub mod fetcher;
pub mod filter;
pub mod history;
pub mod tracker;
