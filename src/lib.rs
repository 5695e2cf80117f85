//! Minimal real-time chat over an embedded auth and document store.

pub mod api;
pub mod auth;
pub mod backend;
pub mod bus;
pub mod chat;
pub mod config;
pub mod entity;
pub mod error;
pub mod live;
pub mod navigation;
pub mod session;
pub mod store;
pub mod views;
