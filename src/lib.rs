//! Internship Triage
//!
//! A polling pipeline that watches a Gmail inbox for internship inquiry
//! email, evaluates each candidate against an eligibility rubric via an
//! LLM service, and files the result under hierarchical Gmail labels.
//!
//! # Overview
//!
//! Each poll cycle lists the most recent inbox messages and takes every
//! unseen, keyword-matching message through the pipeline:
//! - **Extraction**: message body plus text pulled from PDF/DOCX resume
//!   attachments
//! - **Evaluation**: one chat-completion call returning a structured
//!   Promising / Not Promising verdict
//! - **Labeling**: classification and processed labels applied, message
//!   archived out of the inbox
//! - **Recording**: a durable per-message record that makes processing
//!   idempotent across restarts
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and the credential-provider seam
//! - [`client`] - Gmail API client with retry logic
//! - [`cli`] - Command-line interface and command execution
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result alias
//! - [`evaluator`] - Candidate evaluation via OpenRouter
//! - [`extractor`] - Body and attachment text extraction
//! - [`labels`] - Label cache and label application
//! - [`models`] - Core data structures
//! - [`poller`] - Poll loop orchestration
//! - [`store`] - Processed-message record store

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod extractor;
pub mod labels;
pub mod models;
pub mod poller;
pub mod store;

pub use error::{Result, TriageError};
pub use models::{Classification, EvaluationVerdict, ProcessedMessageRecord};
pub use poller::{CycleSummary, Outcome, Poller};
