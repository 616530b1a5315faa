pub mod connection;
pub mod event;
pub mod health;
pub mod response;
pub mod retry;
pub mod role;
pub mod settings;
pub mod status;
pub mod template;
pub mod user;
pub mod validation;
