//! # Benchlink
//!
//! A CLI that connects a Benchling tenant to an existing Quilt stack by
//! provisioning and maintaining the webhook integration end to end.
//!
//! ## Usage
//!
//! ```bash
//! benchlink setup [--stack NAME] [--tenant TENANT] [--action PLAN] [-y]
//! benchlink status [--stack NAME]
//! benchlink resume
//! ```
//!
//! ## Modules
//!
//! - `cli` - Terminal prompts and output formatting for the wizard
//! - `discovery` - Stack snapshots, resource extraction, and state classification
//! - `engine` - Plan menus, the wizard state machine, and plan execution
//! - `error` - Error taxonomy with process exit codes
//! - `profile` - Profile documents, layered merge, and atomic persistence
//! - `provider` - Infrastructure and credential backends (AWS, Benchling)
//! - `setup` - Orchestration for the setup, status, and resume commands
//! - `testing` - Testing utilities and fixtures

pub mod cli;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod profile;
pub mod provider;
pub mod setup;

pub mod testing;
