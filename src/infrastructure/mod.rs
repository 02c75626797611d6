//! Infrastructure layer - collaborator implementations and services

pub mod chain;
pub mod knowledge_base;
pub mod llm;
pub mod logging;
pub mod services;
