//! OKR planner library
//!
//! This library exposes the server's core functionality for the binary
//! and for integration testing.

pub mod api;
pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;
