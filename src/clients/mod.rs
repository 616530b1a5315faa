pub mod broker;
pub mod database;
pub mod health;
pub mod ledger;
pub mod mail;
pub mod redis;
pub mod settlement;
pub mod template;
pub mod worker;
