use thiserror::Error;

use crate::crypto::CryptoError;
use crate::validator::ValidationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("block construction is missing {0}")]
    Config(&'static str),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("malformed frame: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("private store decryption produced garbage, wrong password?")]
    WrongPassword,
}
