//! Greenlight: email and Slack automation agent.
//!
//! Inbound messages open an append-only [`thread::Thread`]; the
//! [`agent::AgentRunner`] loops plan → act, auto-executing read-only tool
//! calls and suspending for human approval before anything consequential.
//! Human responses arrive later as webhooks and resume the persisted thread.

pub mod agent;
pub mod approvals;
pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod server;
pub mod store;
pub mod thread;
pub mod tools;
