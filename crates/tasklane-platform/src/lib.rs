pub mod config;
pub mod db;
pub mod redis_bus;
pub mod services;
pub mod settings;
pub mod stripe;

pub use config::{ServiceConfig, StripeConfig};
pub use db::connect_database;
pub use redis_bus::RedisBus;
pub use services::{HttpMailer, HttpOfflineAlerts, HttpPaymentProtection};
pub use settings::load_fee_config;
pub use stripe::{SignatureError, StripeClient, WebhookEvent, parse_event, verify_signature};
