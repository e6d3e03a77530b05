// HTTP handlers for the caller-facing task API

pub mod tasks;
