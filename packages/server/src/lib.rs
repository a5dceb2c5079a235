// Content Generation Service - Core
//
// This crate runs multi-stage content generation jobs: keyword and SERP data
// comes through the provider gateway, writing stages go to chat-completion
// providers, and jobs are tracked, dispatched and streamed by the kernel.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
