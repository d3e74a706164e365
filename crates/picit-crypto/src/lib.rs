/// PicIt Crypto Library
///
/// Direct message content is encrypted with AES-256-GCM before it is written
/// to the data store and decrypted on read. The key is held by the server and
/// derived from a configured secret, so this protects rows at rest from
/// readers of the database, not from the server itself.

pub mod cipher;
pub mod keys;

pub use cipher::{CipherError, MessageCipher, UNREADABLE_PLACEHOLDER};
pub use keys::MessageKey;
