//! Log record framing.
//!
//! On disk, each record is:
//! - record length (u32 LE, length of everything after this field)
//! - op type (u8)
//! - tick (u64 LE)
//! - payload (JSON)
//! - checksum (u32 LE, crc32 over op type + tick + payload)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{WalError, WalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    Insert = 0,
    Update = 1,
    Replace = 2,
    Remove = 3,
    Truncate = 4,
}

impl WalOp {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WalOp::Insert),
            1 => Some(WalOp::Update),
            2 => Some(WalOp::Replace),
            3 => Some(WalOp::Remove),
            4 => Some(WalOp::Truncate),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One logical log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub tick: u64,
    #[serde(skip, default = "default_op")]
    pub op: WalOp,
    pub database: String,
    pub collection: String,
    /// Document key the operation applies to.
    pub key: String,
    /// Full post-operation document for insert/update/replace; null for
    /// remove and truncate.
    pub document: Value,
}

fn default_op() -> WalOp {
    WalOp::Insert
}

impl WalRecord {
    pub fn encode(&self) -> WalResult<Vec<u8>> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| WalError::Malformed(format!("payload serialization: {}", e)))?;

        let mut body = Vec::with_capacity(payload.len() + 9);
        body.push(self.op.as_u8());
        body.extend_from_slice(&self.tick.to_le_bytes());
        body.extend_from_slice(&payload);

        let checksum = crc32fast::hash(&body);

        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    /// Decodes one record from `buf`. Returns the record and the number of
    /// bytes consumed, or None if `buf` holds an incomplete (torn) record.
    pub fn decode(buf: &[u8]) -> WalResult<Option<(WalRecord, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let total = 4 + body_len + 4;
        if buf.len() < total {
            return Ok(None);
        }
        let body = &buf[4..4 + body_len];
        let stored_checksum = u32::from_le_bytes([
            buf[4 + body_len],
            buf[5 + body_len],
            buf[6 + body_len],
            buf[7 + body_len],
        ]);
        if crc32fast::hash(body) != stored_checksum {
            return Err(WalError::Corruption {
                segment: 0,
                offset: 0,
            });
        }
        if body.len() < 9 {
            return Err(WalError::Malformed("record body too short".into()));
        }
        let op = WalOp::from_u8(body[0])
            .ok_or_else(|| WalError::Malformed(format!("unknown op type {}", body[0])))?;
        let tick = u64::from_le_bytes([
            body[1], body[2], body[3], body[4], body[5], body[6], body[7], body[8],
        ]);
        let mut record: WalRecord = serde_json::from_slice(&body[9..])
            .map_err(|e| WalError::Malformed(format!("payload deserialization: {}", e)))?;
        record.op = op;
        record.tick = tick;
        Ok(Some((record, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> WalRecord {
        WalRecord {
            tick: 42,
            op: WalOp::Insert,
            database: "_system".into(),
            collection: "users".into(),
            key: "alice".into(),
            document: json!({"_key": "alice", "age": 7}),
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let record = sample();
        let bytes = record.encode().unwrap();
        let (decoded, consumed) = WalRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_torn_record_is_incomplete_not_error() {
        let bytes = sample().encode().unwrap();
        for cut in [0, 3, 10, bytes.len() - 1] {
            assert!(matches!(WalRecord::decode(&bytes[..cut]), Ok(None)));
        }
    }

    #[test]
    fn test_flipped_bit_is_corruption() {
        let mut bytes = sample().encode().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(WalRecord::decode(&bytes).is_err());
    }
}
