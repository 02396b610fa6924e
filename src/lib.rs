//! Bluetooth Security Manager
//!
//! This crate contains the security manager of a Bluetooth host. It manages pairing and bonding
//! with peer devices over both BR/EDR (Classic) and Low Energy (LE) transports.
//!
//! The pairing engine for LE is the [`LePairingHandler`](le::LePairingHandler), a state machine
//! implementing LE Secure Connections (with a fallback to LE legacy pairing). Classic pairing is
//! done by the [`ClassicPairingHandler`](classic::ClassicPairingHandler) which works over the HCI
//! security events. Both handlers are owned and driven by a [`SecurityManager`] which keeps the
//! [security records](record::SecurityRecord) of every peer device, dispatches the protocol input
//! to the correct handler, relays the user's input, and notifies the registered listeners.
//!
//! ## Pairing Methods
//!
//! # Just Works
//! Just works is the simplest form of pairing as it provides no protection against a man in the
//! middle attack. It is used whenever neither device requires MITM protection or when one of the
//! devices cannot display or input anything.
//!
//! # Numeric Comparison
//! Both devices display a six digit number and the user must confirm on both that the numbers
//! match.
//!
//! # Passkey
//! One device displays a six digit passkey (or the user makes one up) and the user enters it on the
//! other device. The passkey is then verified one bit at a time over twenty rounds of confirm and
//! random exchanges.
//!
//! # Out of Band
//! Out of band pairing is done by exchanging a confirm value and a random value over an interface
//! that is not the Bluetooth link (NFC is the usual case). These values are generated with
//! [`SecurityManager::get_le_out_of_band_data`] and the values received from the peer are given to
//! the security manager with [`SecurityManager::set_out_of_band_data`].
//!
//! ## Execution
//! A `SecurityManager` is not thread safe and does not block. Every input is processed to completion
//! by a method taking `&mut self`. To use it from multiple tasks use the
//! [`SecurityModule`](module::SecurityModule) which serializes every request onto a single async
//! task.
//!
//! # Note
//! This crate uses the following crates for parts of the encryption process.
//! * ['aes'](https://lib.rs/crates/aes)
//! * ['p256'](https://lib.rs/crates/p256)

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod classic;
pub mod hci;
pub mod le;
pub mod manager;
pub mod module;
pub mod oob;
pub mod record;
pub mod smp;
pub mod toolbox;
pub mod ui;

pub use manager::{
    LeSecurityPolicy, SecurityEvent, SecurityManager, SecurityManagerBuilder, SecurityPolicy, Transport,
};

/// General error within the security manager
///
/// These are errors for converting the protocol data (SMP PDUs and HCI events) received from a
/// peer or controller. Errors of the pairing process itself are a
/// [`PairingFailure`](le::PairingFailure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Incorrect Size
    Size,
    /// Incorrect Value
    Value,
    /// Incorrect Security Manager Command
    IncorrectCommand {
        expected: Option<smp::CommandType>,
        received: smp::CommandType,
    },
    /// The HCI event is not one used by the security manager
    UnknownEvent(u8),
    /// A stored property could not be used
    Storage(&'static str),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::Size => f.write_str("size"),
            Error::Value => f.write_str("value"),
            Error::IncorrectCommand { expected, received } => {
                write!(f, "incorrect command: {received}")?;

                if let Some(expected) = expected {
                    write!(f, ", expected command: {expected}")
                } else {
                    f.write_str(" as no command was expected")
                }
            }
            Error::UnknownEvent(code) => write!(f, "unknown security event code 0x{:02x}", code),
            Error::Storage(what) => write!(f, "invalid stored property: {}", what),
        }
    }
}

impl std::error::Error for Error {}

/// A Bluetooth device address
///
/// The address is stored in the order it is sent over the interfaces of the Bluetooth
/// specification, the least significant byte is first. The `Display` implementation writes the
/// address in the usual human readable form (most significant byte first).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl BluetoothDeviceAddress {
    /// Create an address of all zeros
    pub const fn zeroed() -> Self {
        BluetoothDeviceAddress([0; 6])
    }

    /// Check if this address is all zeros
    pub fn is_zeroed(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Try to parse an address from the string form `XX:XX:XX:XX:XX:XX`
    pub fn try_from_str(s: &str) -> Result<Self, Error> {
        let mut address = [0u8; 6];

        let mut count = 0;

        for (i, part) in s.split(':').enumerate() {
            if i >= 6 || part.len() != 2 {
                return Err(Error::Value);
            }

            address[5 - i] = u8::from_str_radix(part, 16).map_err(|_| Error::Value)?;

            count += 1;
        }

        if count == 6 {
            Ok(BluetoothDeviceAddress(address))
        } else {
            Err(Error::Size)
        }
    }
}

impl core::ops::Deref for BluetoothDeviceAddress {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::fmt::Display for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

/// The type of a Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddressType {
    Public,
    Random,
}

impl AddressType {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            AddressType::Public => 0,
            AddressType::Random => 1,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0 => Ok(AddressType::Public),
            1 => Ok(AddressType::Random),
            _ => Err(Error::Value),
        }
    }
}

/// A device address along with its address type
///
/// Security records and pairing handlers are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AddressWithType {
    pub address: BluetoothDeviceAddress,
    pub address_type: AddressType,
}

impl AddressWithType {
    pub fn new(address: BluetoothDeviceAddress, address_type: AddressType) -> Self {
        AddressWithType { address, address_type }
    }

    /// Create a public `AddressWithType`
    pub fn public(address: BluetoothDeviceAddress) -> Self {
        Self::new(address, AddressType::Public)
    }

    /// Create a random `AddressWithType`
    pub fn random(address: BluetoothDeviceAddress) -> Self {
        Self::new(address, AddressType::Random)
    }

    pub fn is_public(&self) -> bool {
        self.address_type == AddressType::Public
    }
}

impl core::fmt::Display for AddressWithType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.address_type {
            AddressType::Public => write!(f, "{} (public)", self.address),
            AddressType::Random => write!(f, "{} (random)", self.address),
        }
    }
}

/// The identity address of an device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IdentityAddress {
    Public(BluetoothDeviceAddress),
    StaticRandom(BluetoothDeviceAddress),
}

impl IdentityAddress {
    /// Get the identity address
    pub fn get_address(&self) -> BluetoothDeviceAddress {
        match self {
            IdentityAddress::Public(address) => *address,
            IdentityAddress::StaticRandom(address) => *address,
        }
    }

    /// Check if the identity address is a public device address
    pub fn is_public(&self) -> bool {
        matches!(self, IdentityAddress::Public(_))
    }

    /// Check if the identity address is a random device address
    pub fn is_random(&self) -> bool {
        !self.is_public()
    }
}

impl From<IdentityAddress> for AddressWithType {
    fn from(identity: IdentityAddress) -> Self {
        match identity {
            IdentityAddress::Public(address) => AddressWithType::public(address),
            IdentityAddress::StaticRandom(address) => AddressWithType::random(address),
        }
    }
}

/// The role of this device on a LE connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

/// The security level reached by pairing
///
/// The order of the enumerations is by strength, a comparison of two `SecurityLevel`s can be used
/// to check if one is at least as strong as the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SecurityLevel {
    /// Not paired or not encrypted
    #[default]
    NoSecurity,
    /// Paired by a legacy method without MITM protection
    UnauthenticatedLegacy,
    /// Paired by a legacy method with MITM protection
    AuthenticatedLegacy,
    /// Paired with LE Secure Connections (or secure simple pairing) without MITM protection
    UnauthenticatedSecureConnections,
    /// Paired with LE Secure Connections (or secure simple pairing) with MITM protection
    AuthenticatedSecureConnections,
}

impl SecurityLevel {
    /// Check if the pairing that created this level was protected against MITM
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            SecurityLevel::AuthenticatedLegacy | SecurityLevel::AuthenticatedSecureConnections
        )
    }

    pub(crate) fn into_val(self) -> u8 {
        match self {
            SecurityLevel::NoSecurity => 0,
            SecurityLevel::UnauthenticatedLegacy => 1,
            SecurityLevel::AuthenticatedLegacy => 2,
            SecurityLevel::UnauthenticatedSecureConnections => 3,
            SecurityLevel::AuthenticatedSecureConnections => 4,
        }
    }

    pub(crate) fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0 => Ok(SecurityLevel::NoSecurity),
            1 => Ok(SecurityLevel::UnauthenticatedLegacy),
            2 => Ok(SecurityLevel::AuthenticatedLegacy),
            3 => Ok(SecurityLevel::UnauthenticatedSecureConnections),
            4 => Ok(SecurityLevel::AuthenticatedSecureConnections),
            _ => Err(Error::Value),
        }
    }
}

impl core::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            SecurityLevel::NoSecurity => f.write_str("no security"),
            SecurityLevel::UnauthenticatedLegacy => f.write_str("unauthenticated legacy pairing"),
            SecurityLevel::AuthenticatedLegacy => f.write_str("authenticated legacy pairing"),
            SecurityLevel::UnauthenticatedSecureConnections => f.write_str("unauthenticated secure connections"),
            SecurityLevel::AuthenticatedSecureConnections => f.write_str("authenticated secure connections"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_most_significant_first() {
        let address = BluetoothDeviceAddress([0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);

        assert_eq!("01:02:03:04:05:06", address.to_string());

        assert_eq!(Ok(address), BluetoothDeviceAddress::try_from_str("01:02:03:04:05:06"));
    }

    #[test]
    fn address_parse_errors() {
        assert_eq!(Err(Error::Size), BluetoothDeviceAddress::try_from_str("01:02:03"));

        assert_eq!(Err(Error::Value), BluetoothDeviceAddress::try_from_str("01:02:03:04:05:0G"));

        assert_eq!(Err(Error::Value), BluetoothDeviceAddress::try_from_str("01:02:03:04:05:06:07"));
    }

    #[test]
    fn security_level_order() {
        assert!(SecurityLevel::AuthenticatedSecureConnections > SecurityLevel::UnauthenticatedSecureConnections);
        assert!(SecurityLevel::UnauthenticatedLegacy > SecurityLevel::NoSecurity);
        assert!(!SecurityLevel::UnauthenticatedSecureConnections.is_authenticated());
    }
}
