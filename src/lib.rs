//! Agent Orchestrator Library
//!
//! Asynchronous task orchestration: a durable task store, an inter-agent
//! message store, a task manager that runs agents under a concurrency bound,
//! and an orchestrator agent that composes other agents into workflows.

pub mod agents;
pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
