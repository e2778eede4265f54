pub mod inventory;
pub mod layout;
pub mod settings;
