pub mod crypto;
pub mod email;
