pub mod channels;
pub mod dispatcher;
pub mod notification_dto;
pub mod notification_handlers;
pub mod notification_models;
pub mod notification_repository;
pub mod notification_service;
pub mod push_subscription_repository;
pub mod quiet_hours;
pub mod settings_repository;

pub use dispatcher::{BulkNotice, NotificationDispatcher};
pub use notification_service::NotificationService;
