pub mod connector;
pub mod decoder;
pub mod lister;
pub mod message;
pub mod provider;
