// MIT License - Copyright (c) 2026 Peter Wright
// Panel wire codec

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::constants::{CHECKSUM_LEN, CODE_LEN, CRLF, MAX_CODE, MIN_FRAME_LEN};
use crate::error::{Result, SecCtlError};

/// One decoded wire frame.
///
/// # Wire format
///
/// ```text
/// CCC DATA.. XX \r\n
/// ```
///
/// - `CCC`: 3-digit zero-padded decimal code, 000-999
/// - `DATA`: 0..n bytes, never containing CR LF
/// - `XX`: uppercase hex of the low byte of the sum of every byte before it
///
/// Several frames may arrive back to back in one read; see
/// [`FrameReader`](crate::transport::reader::FrameReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(code: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }

    /// Encode without the trailing delimiter.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_frame(self.code, &self.data)
    }

    /// Decode a frame with its delimiter already stripped.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_frame(bytes)
    }

    /// Write the encoded frame followed by CR LF.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut bytes = self.encode()?;
        bytes.extend_from_slice(CRLF);
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Encode a code and its data into frame bytes (no delimiter).
pub fn encode_frame(code: u16, data: &[u8]) -> Result<Vec<u8>> {
    if contains_delimiter(data) {
        return Err(SecCtlError::framing("frame data contains CR LF"));
    }
    let mut enc = encode_code(code)?;
    enc.extend_from_slice(data);
    let chk = checksum(&enc);
    enc.extend_from_slice(chk.as_bytes());
    Ok(enc)
}

/// Decode frame bytes (no delimiter) into code and data.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(SecCtlError::framing(format!(
            "got {} bytes, need at least {}",
            bytes.len(),
            MIN_FRAME_LEN
        )));
    }

    let data_end = bytes.len() - CHECKSUM_LEN;
    let received = &bytes[data_end..];
    let computed = checksum(&bytes[..data_end]);
    if !received.eq_ignore_ascii_case(computed.as_bytes()) {
        return Err(SecCtlError::framing(format!(
            "checksum mismatch: expected {}, got {}",
            computed,
            String::from_utf8_lossy(received)
        )));
    }

    let code = decode_code(&bytes[..CODE_LEN])?;
    Ok(Frame {
        code,
        data: bytes[CODE_LEN..data_end].to_vec(),
    })
}

/// Low byte of the byte sum, as two uppercase hex digits.
pub fn checksum(bytes: &[u8]) -> String {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    format!("{:02X}", sum)
}

/// Encode a code as 3 zero-padded decimal digits.
pub fn encode_code(code: u16) -> Result<Vec<u8>> {
    if code > MAX_CODE {
        return Err(SecCtlError::Code {
            code: code.to_string(),
        });
    }
    Ok(format!("{:03}", code).into_bytes())
}

/// Parse a 3-byte decimal code field.
pub fn decode_code(bytes: &[u8]) -> Result<u16> {
    let invalid = || SecCtlError::Code {
        code: String::from_utf8_lossy(bytes).into_owned(),
    };
    if bytes.len() != CODE_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(invalid)
}

fn contains_delimiter(data: &[u8]) -> bool {
    data.windows(CRLF.len()).any(|w| w == CRLF)
}
