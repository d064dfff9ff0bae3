use bincode::{
    config,
    error::{DecodeError, EncodeError},
    serde::{decode_from_slice, encode_to_vec},
};
use log::debug;
use thiserror::Error;

use crate::ir::IRProgram;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode IR: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to decode IR: {0}")]
    Decode(#[from] DecodeError),
    #[error("trailing {0} bytes after IR image")]
    Trailing(usize),
}

pub fn encode_ir(program: &IRProgram) -> Result<Vec<u8>, SerializeError> {
    let encoded = encode_to_vec(program, config::standard())?;
    debug!("encoded IR image ({} bytes)", encoded.len());
    Ok(encoded)
}

pub fn decode_ir(bytes: &[u8]) -> Result<IRProgram, SerializeError> {
    let (program, read): (IRProgram, usize) = decode_from_slice(bytes, config::standard())?;
    if read != bytes.len() {
        return Err(SerializeError::Trailing(bytes.len() - read));
    }
    Ok(program)
}
