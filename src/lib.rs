pub mod attachment;
pub mod auth;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod db;
pub mod directory;
pub mod error;
pub mod message;
pub mod middleware;
pub mod notification;
pub mod pagination;
pub mod presence;
pub mod reaction;
pub mod realtime;
pub mod routes;
pub mod state;
