//! Key distribution related Security Manager commands
//!
//! These commands are defined under the Security In Bluetooth Low Energy section of the Bluetooth
//! Specification (v5.0 | Vol 3, Part H, section 3.6)

use super::CommandData;
use crate::{BluetoothDeviceAddress, Error, IdentityAddress};

fn u128_from_icd(icd: &[u8], name: &str) -> Result<u128, Error> {
    let v: [u8; 16] = icd.try_into().map_err(|_| {
        log::error!("(SM) failed to generate '{}' from raw data", name);
        Error::Size
    })?;

    Ok(<u128>::from_le_bytes(v))
}

/// The Encryption Information command
///
/// This contains the LTK distributed by LE legacy pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInformation {
    long_term_key: u128,
}

impl CommandData for EncryptionInformation {
    fn into_command_format(self) -> Vec<u8> {
        self.long_term_key.to_le_bytes().to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        Ok(EncryptionInformation {
            long_term_key: u128_from_icd(icd, "encryption information")?,
        })
    }
}

impl EncryptionInformation {
    pub fn new(long_term_key: u128) -> Self {
        EncryptionInformation { long_term_key }
    }

    pub fn get_long_term_key(&self) -> u128 {
        self.long_term_key
    }
}

/// The Central Identification command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralIdentification {
    encryption_diversifier: u16,
    random: u64,
}

impl CommandData for CentralIdentification {
    fn into_command_format(self) -> Vec<u8> {
        let ediv = self.encryption_diversifier.to_le_bytes();
        let rand = self.random.to_le_bytes();

        ediv.iter().chain(rand.iter()).copied().collect()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 10 {
            let mut ediv_a = [0u8; 2];
            let mut rand_a = [0u8; 8];

            ediv_a.copy_from_slice(&icd[..2]);
            rand_a.copy_from_slice(&icd[2..]);

            Ok(CentralIdentification {
                encryption_diversifier: <u16>::from_le_bytes(ediv_a),
                random: <u64>::from_le_bytes(rand_a),
            })
        } else {
            Err(Error::Size)
        }
    }
}

impl CentralIdentification {
    pub fn new(encryption_diversifier: u16, random: u64) -> Self {
        CentralIdentification {
            encryption_diversifier,
            random,
        }
    }

    /// Get the Encryption Diversifier (EDIV)
    pub fn get_encryption_diversifier(&self) -> u16 {
        self.encryption_diversifier
    }

    /// Get the random value (Rand)
    pub fn get_random(&self) -> u64 {
        self.random
    }
}

/// The Identity Information command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityInformation {
    irk: u128,
}

impl CommandData for IdentityInformation {
    fn into_command_format(self) -> Vec<u8> {
        self.irk.to_le_bytes().to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        Ok(IdentityInformation {
            irk: u128_from_icd(icd, "identity information")?,
        })
    }
}

impl IdentityInformation {
    pub fn new(irk: u128) -> Self {
        IdentityInformation { irk }
    }

    pub fn get_irk(&self) -> u128 {
        self.irk
    }
}

/// The Identity Address Information command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityAddressInformation {
    address: IdentityAddress,
}

impl CommandData for IdentityAddressInformation {
    fn into_command_format(self) -> Vec<u8> {
        let (addr_type_val, address) = match self.address {
            IdentityAddress::Public(address) => (0, address),
            IdentityAddress::StaticRandom(address) => (1, address),
        };

        let mut v = vec![addr_type_val];

        v.extend_from_slice(&address.0);

        v
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        if icd.len() == 7 {
            let mut address = BluetoothDeviceAddress::zeroed();

            address.0.copy_from_slice(&icd[1..]);

            let address = match icd[0] {
                0 => IdentityAddress::Public(address),
                1 => IdentityAddress::StaticRandom(address),
                _ => return Err(Error::Value),
            };

            Ok(IdentityAddressInformation { address })
        } else {
            Err(Error::Size)
        }
    }
}

impl IdentityAddressInformation {
    pub fn new(address: IdentityAddress) -> Self {
        IdentityAddressInformation { address }
    }

    pub fn get_address(&self) -> IdentityAddress {
        self.address
    }
}

/// The Signing Information command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningInformation {
    signature_key: u128,
}

impl CommandData for SigningInformation {
    fn into_command_format(self) -> Vec<u8> {
        self.signature_key.to_le_bytes().to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        Ok(SigningInformation {
            signature_key: u128_from_icd(icd, "signing information")?,
        })
    }
}

impl SigningInformation {
    pub fn new(signature_key: u128) -> Self {
        SigningInformation { signature_key }
    }

    pub fn get_signature_key(&self) -> u128 {
        self.signature_key
    }
}
