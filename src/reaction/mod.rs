pub mod delivery_repository;
pub mod reaction_dto;
pub mod reaction_handlers;
pub mod reaction_models;
pub mod reaction_repository;
pub mod reaction_service;

pub use reaction_service::ReactionService;
