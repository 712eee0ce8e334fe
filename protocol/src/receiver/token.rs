//! Connection tokens.
//!
//! The receiver stores nothing per connection. Everything it needs to answer
//! a packet travels inside the destination address as an encrypted token:
//!
//! ```text
//! flags u8 | payment tag var-octets? | receipt nonce 16? | receipt secret 32?
//!          | asset code var-octets? | asset scale u8?
//! ```
//!
//! Bit 0 of `flags` enables the payment tag, bit 1 the receipt parameters
//! and bit 2 the asset details.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{RECEIPT_NONCE_LENGTH, RECEIPT_SECRET_LENGTH};
use crate::controllers::AssetDetails;
use crate::packet::oer::{OerReadExt, OerWriteExt};
use crate::packet::PacketError;

const FLAG_PAYMENT_TAG: u8 = 1;
const FLAG_RECEIPTS: u8 = 1 << 1;
const FLAG_ASSET_DETAILS: u8 = 1 << 2;

/// Parameters for signing STREAM receipts on a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceiptSetup {
    pub nonce: [u8; RECEIPT_NONCE_LENGTH],
    pub secret: [u8; RECEIPT_SECRET_LENGTH],
}

impl std::fmt::Debug for ReceiptSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptSetup")
            .field("nonce", &hex::encode(self.nonce))
            .finish_non_exhaustive()
    }
}

/// Application metadata bound into one set of credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionDetails {
    /// Identifies what the payment is for, e.g. an invoice or account id.
    pub payment_tag: Option<String>,
    pub receipt_setup: Option<ReceiptSetup>,
    /// Shared with senders that open the connection.
    pub asset: Option<AssetDetails>,
}

impl ConnectionDetails {
    pub(crate) fn to_bytes(&self) -> Bytes {
        let flags = self.payment_tag.as_ref().map_or(0, |_| FLAG_PAYMENT_TAG)
            | self.receipt_setup.as_ref().map_or(0, |_| FLAG_RECEIPTS)
            | self.asset.as_ref().map_or(0, |_| FLAG_ASSET_DETAILS);

        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(flags);
        if let Some(tag) = &self.payment_tag {
            buf.put_var_octet_string(tag.as_bytes());
        }
        if let Some(receipts) = &self.receipt_setup {
            buf.put_slice(&receipts.nonce);
            buf.put_slice(&receipts.secret);
        }
        if let Some(asset) = &self.asset {
            buf.put_var_octet_string(asset.code.as_bytes());
            buf.put_u8(asset.scale);
        }
        buf.freeze()
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut reader = bytes;
        let flags = reader.read_u8()?;

        let payment_tag = if flags & FLAG_PAYMENT_TAG != 0 {
            Some(reader.read_utf8_string()?)
        } else {
            None
        };
        let receipt_setup = if flags & FLAG_RECEIPTS != 0 {
            Some(ReceiptSetup {
                nonce: reader.read_array::<RECEIPT_NONCE_LENGTH>()?,
                secret: reader.read_array::<RECEIPT_SECRET_LENGTH>()?,
            })
        } else {
            None
        };
        let asset = if flags & FLAG_ASSET_DETAILS != 0 {
            let code = reader.read_utf8_string()?;
            let scale = reader.read_u8()?;
            Some(AssetDetails::new(code, scale))
        } else {
            None
        };

        Ok(Self {
            payment_tag,
            receipt_setup,
            asset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_a_single_flags_byte() {
        let details = ConnectionDetails::default();
        assert_eq!(details.to_bytes().as_ref(), &[0u8]);
        assert_eq!(ConnectionDetails::from_bytes(&[0u8]).unwrap(), details);
    }

    #[test]
    fn all_fields_survive_encoding() {
        let details = ConnectionDetails {
            payment_tag: Some("invoice-42".into()),
            receipt_setup: Some(ReceiptSetup {
                nonce: [1u8; 16],
                secret: [2u8; 32],
            }),
            asset: Some(AssetDetails::new("XRP", 9)),
        };
        let bytes = details.to_bytes();
        assert_eq!(bytes[0], 0b111);
        assert_eq!(ConnectionDetails::from_bytes(&bytes).unwrap(), details);
    }

    #[test]
    fn truncated_token_is_rejected() {
        let details = ConnectionDetails {
            asset: Some(AssetDetails::new("USD", 2)),
            ..Default::default()
        };
        let bytes = details.to_bytes();
        assert!(ConnectionDetails::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn receipt_secret_is_not_debug_printed() {
        let setup = ReceiptSetup {
            nonce: [0u8; 16],
            secret: [0xab; 32],
        };
        assert!(!format!("{setup:?}").contains("abab"));
    }
}
