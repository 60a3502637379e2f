pub mod health_handlers;
pub mod library_handlers;
