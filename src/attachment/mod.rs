pub mod attachment_handlers;
pub mod attachment_models;
pub mod attachment_repository;
pub mod attachment_service;
pub mod attachment_storage;
pub mod attachment_validation;

pub use attachment_service::AttachmentService;
pub use attachment_storage::AttachmentStorage;
