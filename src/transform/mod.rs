pub mod checksum;
pub mod compression;
pub mod encryption;

pub use compression::CompressionAlgorithm;
pub use encryption::{AesGcmEncryptor, EncryptionConfig, EncryptionKey};
