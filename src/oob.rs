//! Out Of Band Pairing Data
//!
//! With LE Secure Connections the out of band (OOB) data is a confirm value and a random value. The
//! confirm value is a commitment of the public key used for pairing, so the key pair that created
//! the local OOB data is pinned and reused by every pairing that uses that OOB data.
//!
//! The OOB interface itself (NFC is the usual one) is out of scope of this library. To help, the
//! LE OOB data can be converted to and from the advertising data structures that carry it (Core
//! Specification Supplement, Part A, section 1.6).

use crate::toolbox::{self, EcdhKeyPair};
use crate::Error;
use rand_core::{CryptoRng, RngCore};

/// AD type of the LE Secure Connections Confirmation Value
const AD_TYPE_LE_SC_CONFIRM_VALUE: u8 = 0x22;

/// AD type of the LE Secure Connections Random Value
const AD_TYPE_LE_SC_RANDOM_VALUE: u8 = 0x23;

/// The OOB data generated by this device
#[derive(Debug, Clone)]
pub struct LeOobData {
    key_pair: EcdhKeyPair,
    random: u128,
    confirm: u128,
}

impl LeOobData {
    /// Generate new OOB data
    ///
    /// This creates a new key pair, the confirm value is `f4(PKx, PKx, r, 0)`.
    pub fn generate<R>(rng: &mut R) -> Self
    where
        R: CryptoRng + RngCore,
    {
        let key_pair = EcdhKeyPair::generate(rng);

        let random = toolbox::rand_u128(rng);

        let pkx = key_pair.public_key().x;

        let confirm = toolbox::f4(pkx, pkx, random, 0);

        LeOobData {
            key_pair,
            random,
            confirm,
        }
    }

    pub fn get_confirm(&self) -> u128 {
        self.confirm
    }

    pub fn get_random(&self) -> u128 {
        self.random
    }

    pub(crate) fn get_key_pair(&self) -> &EcdhKeyPair {
        &self.key_pair
    }

    /// Convert into the AD structures sent over the OOB interface
    pub fn to_ad_structures(&self) -> [u8; 36] {
        let mut ret = [0u8; 36];

        ret[0] = 17;
        ret[1] = AD_TYPE_LE_SC_CONFIRM_VALUE;
        ret[2..18].copy_from_slice(&self.confirm.to_le_bytes());
        ret[18] = 17;
        ret[19] = AD_TYPE_LE_SC_RANDOM_VALUE;
        ret[20..].copy_from_slice(&self.random.to_le_bytes());

        ret
    }
}

/// The OOB data received from the peer device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteLeOobData {
    pub confirm: u128,
    pub random: u128,
}

impl RemoteLeOobData {
    pub fn new(confirm: u128, random: u128) -> Self {
        RemoteLeOobData { confirm, random }
    }

    /// Try to get the OOB data from AD structures received over the OOB interface
    ///
    /// AD structures of other types are skipped.
    pub fn try_from_ad_structures(mut data: &[u8]) -> Result<Self, Error> {
        let mut confirm = None;
        let mut random = None;

        while let Some((&len, rest)) = data.split_first() {
            let len = len as usize;

            if len == 0 {
                break;
            }

            if rest.len() < len {
                return Err(Error::Size);
            }

            let (structure, next) = rest.split_at(len);

            match structure {
                [AD_TYPE_LE_SC_CONFIRM_VALUE, value @ ..] => {
                    let v: [u8; 16] = value.try_into().map_err(|_| Error::Size)?;

                    confirm = Some(<u128>::from_le_bytes(v))
                }
                [AD_TYPE_LE_SC_RANDOM_VALUE, value @ ..] => {
                    let v: [u8; 16] = value.try_into().map_err(|_| Error::Size)?;

                    random = Some(<u128>::from_le_bytes(v))
                }
                _ => (),
            }

            data = next;
        }

        match (confirm, random) {
            (Some(confirm), Some(random)) => Ok(RemoteLeOobData { confirm, random }),
            _ => Err(Error::Value),
        }
    }
}

/// BR/EDR OOB data
///
/// This is the hash C and randomizer R of either the P-192 or the P-256 curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassicOobData {
    pub c: [u8; 16],
    pub r: [u8; 16],
}

impl ClassicOobData {
    pub fn new(c: [u8; 16], r: [u8; 16]) -> Self {
        ClassicOobData { c, r }
    }

    /// Check if the data is valid (not all zeros)
    pub fn is_valid(&self) -> bool {
        self.c != [0; 16] || self.r != [0; 16]
    }
}
