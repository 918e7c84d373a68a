pub mod auth;
pub mod database;
pub mod environment;
pub mod web;
pub mod xp;

pub use web::start_web_server;
