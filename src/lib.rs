//! Solo is a single-action agent: it sends the conversation to an
//! OpenAI-compatible chat endpoint, runs whatever bash command the model
//! requests, appends the result, and repeats until the model answers
//! without a tool call. Every message is persisted to a JSONL transcript
//! before it is acted on, so a run can be resumed or inspected at any
//! point.

pub mod agent;
pub mod bash;
pub mod cli;
pub mod config;
pub mod llm;
pub mod logging;
pub mod overflow;
pub mod session;
