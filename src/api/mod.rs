pub mod anthropic;
pub(crate) mod common;
pub mod health;
pub mod models;
pub mod openai_chat;
