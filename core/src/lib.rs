pub mod bot;
pub mod chemistry;
pub mod compatibility;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod service;
pub mod session;
pub mod species;
pub mod telegram;
