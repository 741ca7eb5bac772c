//! Column encoding helpers shared by the SQLite queries.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use vaultkeeper_core::{CoreError, SealedBlock, WrappedKey};

use crate::error::{Result, StoreError};

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

/// Read a text column into anything parsed by `FromStr` (ids, status enums).
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CoreError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: CoreError| conversion_error(idx, Type::Text, e.to_string()))
}

/// Nullable variant of [`parsed`].
pub(crate) fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = CoreError>,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        t.parse()
            .map_err(|e: CoreError| conversion_error(idx, Type::Text, e.to_string()))
    })
    .transpose()
}

/// Read a fixed-size blob.
pub(crate) fn array<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        conversion_error(idx, Type::Blob, format!("expected {N} bytes, got {}", v.len()))
    })
}

/// Read a wrapped key stored as `(ciphertext, ephemeral, nonce)` starting at `idx`.
pub(crate) fn wrapped_key(row: &Row<'_>, idx: usize) -> rusqlite::Result<WrappedKey> {
    Ok(WrappedKey {
        ciphertext: row.get(idx)?,
        ephemeral_public: array(row, idx + 1)?,
        nonce: array(row, idx + 2)?,
    })
}

/// Read a JSON text column.
pub(crate) fn json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Encode payload blocks as CBOR.
pub(crate) fn encode_blocks(blocks: &[SealedBlock]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(blocks, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Read a CBOR blocks column.
pub(crate) fn blocks(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<SealedBlock>> {
    let bytes: Vec<u8> = row.get(idx)?;
    ciborium::from_reader(&bytes[..]).map_err(|e| conversion_error(idx, Type::Blob, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_blocks_cbor_roundtrip() {
        let blocks = vec![
            SealedBlock {
                nonce: [1; 12],
                ciphertext: Bytes::from_static(b"abc"),
            },
            SealedBlock {
                nonce: [2; 12],
                ciphertext: Bytes::from_static(b""),
            },
        ];
        let encoded = encode_blocks(&blocks).unwrap();

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let decoded = conn
            .query_row("SELECT ?1", [&encoded], |row| self::blocks(row, 0))
            .unwrap();
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn test_array_length_checked() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let short = vec![0u8; 31];
        let result = conn.query_row("SELECT ?1", [&short], |row| array::<32>(row, 0));
        assert!(result.is_err());
    }
}
