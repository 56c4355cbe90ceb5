use serde::{Deserialize, Serialize};

use crypto::{Hash256, KeyImage, PublicKey, Signature};

use crate::GetHash;

/// Tag byte introducing a transaction public key in the extra field
const EXTRA_TAG_PUBKEY: u8 = 0x01;
/// Tag byte introducing a nonce blob in the extra field
const EXTRA_TAG_NONCE: u8 = 0x02;
/// First byte of a nonce blob carrying a plain payment ID
const NONCE_PAYMENT_ID: u8 = 0x00;

/// Transaction input
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum TXIn {
    /// Coinbase (generation) input. Creates new coins
    ///
    /// Contains the height of the block this transaction is part of
    Gen(u64),
    /// Coins from an existing "ToKey" output
    FromKey {
        /// Amount of coins spent
        amount: u64,
        /// Relative offsets of each ring member in the per-amount output index
        key_offsets: Vec<u64>,
        /// Key image of the spender's output
        key_image: KeyImage,
    },
}

/// Transaction output target
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum TXOutTarget {
    /// Send to specified public key
    ToKey {
        /// Target public key
        key: PublicKey,
    },
}

/// Transaction output
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TXOut {
    /// Amount of coins received
    pub amount: u64,
    /// Transaction output target
    pub target: TXOutTarget,
}

/// Structured entry parsed from a transaction's extra bytes
#[derive(Clone, Debug, PartialEq)]
pub enum TXExtra {
    /// Public key of this transaction (for determining output secret keys)
    TxPublicKey(PublicKey),
    /// Free-form nonce blob tagged onto the transaction
    TxNonce(TXNonce),
}

/// Nonce blob carried in the extra field
#[derive(Clone, Debug, PartialEq)]
pub enum TXNonce {
    /// A plain 32 byte payment ID
    PaymentId(Hash256),
    /// Uninterpreted nonce data
    Data(Vec<u8>),
}

/// Error type for extra field parsing
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ExtraParseError {
    /// Returned when a tagged entry extends past the end of the field
    #[error("Extra field entry is truncated")]
    Truncated,

    /// Returned when an unknown tag byte is encountered
    #[error("Unknown extra field tag {0:#x}")]
    UnknownTag(u8),

    /// Returned when a nonce length varint is malformed
    #[error("Malformed nonce length: {0}")]
    BadNonceLength(#[from] varint::Error),
}

/// Transaction prefix
///
/// Everything the transaction commits to except its signatures
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct TransactionPrefix {
    /// This transaction's version
    pub version: u64,
    /// Block height or UNIX time after which outputs may be spent
    ///
    /// Values below the maximum block number are heights, anything
    /// larger is wall-clock seconds
    pub unlock_time: u64,
    /// List of inputs to this transaction
    pub inputs: Vec<TXIn>,
    /// List of outputs in this transaction
    pub outputs: Vec<TXOut>,
    /// Extra bytes tagged onto this transaction
    ///
    /// Parsed with [`parse_extra`] for the transaction public key and an
    /// optional payment ID nonce
    pub extra: Vec<u8>,
}

/// A complete Transaction
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct Transaction {
    /// This transaction's prefix
    pub prefix: TransactionPrefix,
    /// Ring signatures proving ownership and authorizing the transaction
    ///
    /// One signature vector per input, one term per ring member. Empty
    /// for the miner transaction
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    /// Hash of the prefix alone; the message signed by every ring signature
    pub fn prefix_hash(&self) -> Hash256 {
        crypto::cn_fast_hash(&bincode::serialize(&self.prefix).unwrap())
    }

    /// Serialized size of this transaction in bytes
    pub fn blob_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap()
    }

    /// True if this transaction's sole input mints new coins
    pub fn is_coinbase(&self) -> bool {
        matches!(self.prefix.inputs.as_slice(), [TXIn::Gen(_)])
    }

    /// Iterates over the key images consumed by this transaction
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.prefix.inputs.iter().filter_map(|input| match input {
            TXIn::FromKey { key_image, .. } => Some(key_image),
            TXIn::Gen(_) => None,
        })
    }

    /// Sum of all input amounts, or None on 64-bit overflow
    ///
    /// Generation inputs count as zero
    pub fn input_amount(&self) -> Option<u64> {
        self.prefix
            .inputs
            .iter()
            .try_fold(0u64, |acc, input| match input {
                TXIn::Gen(_) => Some(acc),
                TXIn::FromKey { amount, .. } => acc.checked_add(*amount),
            })
    }

    /// Sum of all output amounts, or None on 64-bit overflow
    pub fn output_amount(&self) -> Option<u64> {
        self.prefix
            .outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.amount))
    }

    /// The fee paid by this transaction (inputs minus outputs)
    ///
    /// None if either sum overflows or the outputs exceed the inputs
    pub fn fee(&self) -> Option<u64> {
        if self.is_coinbase() {
            return Some(0);
        }
        self.input_amount()?.checked_sub(self.output_amount()?)
    }
}

impl GetHash for Transaction {
    fn get_hash_blob(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap()
    }
}

/// Serializes structured extra entries into the raw byte form carried in
/// a transaction prefix
pub fn write_extra(entries: &[TXExtra]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        match entry {
            TXExtra::TxPublicKey(key) => {
                buf.push(EXTRA_TAG_PUBKEY);
                buf.extend_from_slice(key.as_bytes());
            }
            TXExtra::TxNonce(nonce) => {
                buf.push(EXTRA_TAG_NONCE);
                match nonce {
                    TXNonce::PaymentId(id) => {
                        buf.extend_from_slice(&varint::serialize(33));
                        buf.push(NONCE_PAYMENT_ID);
                        buf.extend_from_slice(id.data());
                    }
                    TXNonce::Data(data) => {
                        buf.extend_from_slice(&varint::serialize(data.len() as u64));
                        buf.extend_from_slice(data);
                    }
                }
            }
        }
    }
    buf
}

/// Parses a transaction's raw extra bytes into structured entries
///
/// # Errors
/// If an entry is truncated, a tag is unknown, or a nonce length does
/// not decode
pub fn parse_extra(extra: &[u8]) -> Result<Vec<TXExtra>, ExtraParseError> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < extra.len() {
        let tag = extra[pos];
        pos += 1;
        match tag {
            EXTRA_TAG_PUBKEY => {
                if extra.len() < pos + 32 {
                    return Err(ExtraParseError::Truncated);
                }
                let mut data = [0; 32];
                data.copy_from_slice(&extra[pos..pos + 32]);
                entries.push(TXExtra::TxPublicKey(crypto::ecc::CompressedPoint(data)));
                pos += 32;
            }
            EXTRA_TAG_NONCE => {
                let (length, consumed) = varint::deserialize(&extra[pos..])?;
                pos += consumed;
                let length = length as usize;
                if extra.len() < pos + length {
                    return Err(ExtraParseError::Truncated);
                }
                let data = &extra[pos..pos + length];
                pos += length;

                if length == 33 && data[0] == NONCE_PAYMENT_ID {
                    let mut id = [0; 32];
                    id.copy_from_slice(&data[1..]);
                    entries.push(TXExtra::TxNonce(TXNonce::PaymentId(Hash256::from(id))));
                } else {
                    entries.push(TXExtra::TxNonce(TXNonce::Data(data.to_vec())));
                }
            }
            tag => return Err(ExtraParseError::UnknownTag(tag)),
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use crypto::KeyPair;

    use super::*;

    #[test]
    fn extra_round_trips() {
        let entries = vec![
            TXExtra::TxPublicKey(KeyPair::generate().public_key),
            TXExtra::TxNonce(TXNonce::PaymentId(crypto::cn_fast_hash(b"payment"))),
        ];
        assert_eq!(parse_extra(&write_extra(&entries)).unwrap(), entries);
    }

    #[test]
    fn extra_rejects_garbage() {
        assert_eq!(parse_extra(&[0x01, 0xab]), Err(ExtraParseError::Truncated));
        assert_eq!(parse_extra(&[0x77]), Err(ExtraParseError::UnknownTag(0x77)));
        assert!(matches!(
            parse_extra(&[0x02, 0x80]),
            Err(ExtraParseError::BadNonceLength(_))
        ));
    }

    #[test]
    fn amount_sums_check_overflow() {
        let mut tx = Transaction::default();
        tx.prefix.outputs = vec![
            TXOut {
                amount: u64::max_value(),
                target: TXOutTarget::ToKey {
                    key: KeyPair::generate().public_key,
                },
            },
            TXOut {
                amount: 1,
                target: TXOutTarget::ToKey {
                    key: KeyPair::generate().public_key,
                },
            },
        ];
        assert_eq!(tx.output_amount(), None);

        tx.prefix.outputs.pop();
        assert_eq!(tx.output_amount(), Some(u64::max_value()));
    }

    #[test]
    fn fee_is_input_minus_output() {
        let keypair = KeyPair::generate();
        let mut tx = Transaction::default();
        tx.prefix.inputs = vec![TXIn::FromKey {
            amount: 700,
            key_offsets: vec![0],
            key_image: crypto::generate_key_image(&keypair),
        }];
        tx.prefix.outputs = vec![TXOut {
            amount: 550,
            target: TXOutTarget::ToKey {
                key: keypair.public_key,
            },
        }];
        assert_eq!(tx.fee(), Some(150));

        tx.prefix.outputs[0].amount = 900;
        assert_eq!(tx.fee(), None);
    }
}
