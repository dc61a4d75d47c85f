pub mod auth;
pub mod config;
pub mod db;
pub mod inference;
pub mod routes;
pub mod storage;
