//! Yoga Assist: a conversational yoga coach.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod practice;
pub mod presentation;
pub mod profile;
pub mod scheduler;
pub mod store;
