pub mod mail_account;
pub mod message;
pub mod message_file;
