//! Typed client for the Meda VM manager REST API.
//!
//! Generated at build time from `spec/meda.json` with progenitor, using the
//! builder interface:
//!
//! ```no_run
//! # async fn example() -> Result<(), mb_api::Error<()>> {
//! let client = mb_api::Client::new("http://127.0.0.1:7777");
//! client.start_vm().name("packer-ubuntu-1700000000").send().await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::all, unused_imports, dead_code)]

include!(concat!(env!("OUT_DIR"), "/codegen.rs"));
