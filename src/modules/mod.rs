pub mod crypto;
pub mod secure_keys;
