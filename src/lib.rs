//! Query-Agent Library
//!
//! Natural-language question answering over a SQL Server database: a cached
//! schema catalog, a statement safety gate, a bounded execution gateway and
//! multi-provider LLM chat sessions.
//! The main binary is in src/main.rs.

pub mod api;
pub mod chat;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod llm;
pub mod tools;
