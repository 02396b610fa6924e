//! Pairing commands as specified in the Bluetooth Specification (v5.0 | vol 3, part H, section 3.5)

use super::{CommandData, CommandType};
use crate::toolbox::EcdhPublicKey;
use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The IO Capabilities of a device as it relates to the pairing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IoCapability {
    /// The device only contains a display
    DisplayOnly,
    /// The device contains a display with a method for the user to enter yes or no
    DisplayWithYesOrNo,
    /// The device only contains a keyboard
    KeyboardOnly,
    /// The device has no input or output for the user
    NoInputNoOutput,
    /// The device contains a keyboard and a display
    KeyboardDisplay,
}

impl IoCapability {
    pub fn into_val(self) -> u8 {
        match self {
            IoCapability::DisplayOnly => 0x0,
            IoCapability::DisplayWithYesOrNo => 0x1,
            IoCapability::KeyboardOnly => 0x2,
            IoCapability::NoInputNoOutput => 0x3,
            IoCapability::KeyboardDisplay => 0x4,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(IoCapability::DisplayOnly),
            0x1 => Ok(IoCapability::DisplayWithYesOrNo),
            0x2 => Ok(IoCapability::KeyboardOnly),
            0x3 => Ok(IoCapability::NoInputNoOutput),
            0x4 => Ok(IoCapability::KeyboardDisplay),
            _ => Err(Error::Value),
        }
    }

    /// Check if this device has no input or output capability for pairing
    pub fn no_io_capability(self) -> bool {
        matches!(self, IoCapability::NoInputNoOutput)
    }
}

/// Flag if out of band data was received from the peer device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobDataFlag {
    AuthenticationDataNotPresent,
    AuthenticationDataFromRemoteDevicePresent,
}

impl OobDataFlag {
    pub fn into_val(self) -> u8 {
        match self {
            OobDataFlag::AuthenticationDataNotPresent => 0x0,
            OobDataFlag::AuthenticationDataFromRemoteDevicePresent => 0x1,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x0 => Ok(OobDataFlag::AuthenticationDataNotPresent),
            0x1 => Ok(OobDataFlag::AuthenticationDataFromRemoteDevicePresent),
            _ => Err(Error::Value),
        }
    }

    pub fn is_present(self) -> bool {
        self == OobDataFlag::AuthenticationDataFromRemoteDevicePresent
    }
}

impl From<bool> for OobDataFlag {
    fn from(present: bool) -> Self {
        if present {
            OobDataFlag::AuthenticationDataFromRemoteDevicePresent
        } else {
            OobDataFlag::AuthenticationDataNotPresent
        }
    }
}

/// The authentication requirements field (AuthReq)
///
/// The raw value is kept as received, reserved bits included, as the exact octet is an input to the
/// check value function [`f6`](crate::toolbox::f6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthReq(pub u8);

impl AuthReq {
    const BONDING: u8 = 0b01;
    const MITM: u8 = 1 << 2;
    const SC: u8 = 1 << 3;
    const KEYPRESS: u8 = 1 << 4;

    pub fn new(bonding: bool, mitm: bool, sc: bool, keypress: bool) -> Self {
        let mut val = 0;

        if bonding {
            val |= Self::BONDING
        }

        if mitm {
            val |= Self::MITM
        }

        if sc {
            val |= Self::SC
        }

        if keypress {
            val |= Self::KEYPRESS
        }

        AuthReq(val)
    }

    pub fn bonding(&self) -> bool {
        self.0 & 0b11 == Self::BONDING
    }

    pub fn mitm(&self) -> bool {
        self.0 & Self::MITM != 0
    }

    pub fn sc(&self) -> bool {
        self.0 & Self::SC != 0
    }

    pub fn keypress(&self) -> bool {
        self.0 & Self::KEYPRESS != 0
    }

    /// Set (or clear) the MITM flag
    pub fn with_mitm(self, mitm: bool) -> Self {
        if mitm {
            AuthReq(self.0 | Self::MITM)
        } else {
            AuthReq(self.0 & !Self::MITM)
        }
    }
}

/// Type of Key Distributions
///
/// See the security manager key distribution and generation section of the Bluetooth
/// Specification (v5.0 | vol 3, Part H, section 3.6.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyDistributions {
    /// LTK, EDIV and Rand (only distributed with LE legacy pairing)
    pub enc_key: bool,
    /// IRK and identity address
    pub id_key: bool,
    /// CSRK
    pub sign_key: bool,
    pub link_key: bool,
}

impl KeyDistributions {
    pub fn into_val(self) -> u8 {
        u8::from(self.enc_key) | u8::from(self.id_key) << 1 | u8::from(self.sign_key) << 2 | u8::from(self.link_key) << 3
    }

    pub fn from_val(val: u8) -> Self {
        KeyDistributions {
            enc_key: val & (1 << 0) != 0,
            id_key: val & (1 << 1) != 0,
            sign_key: val & (1 << 2) != 0,
            link_key: val & (1 << 3) != 0,
        }
    }

    /// Intersect two `KeyDistributions`
    pub fn intersect(self, other: Self) -> Self {
        Self::from_val(self.into_val() & other.into_val())
    }

    /// Key distribution for Secure Connections Bonding
    ///
    /// The encryption key is never distributed as both devices generate the LTK.
    pub fn sc_distribution(id: bool, sign: bool) -> Self {
        KeyDistributions {
            enc_key: false,
            id_key: id,
            sign_key: sign,
            link_key: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.into_val() == 0
    }
}

/// The parameters of a Pairing Request or Pairing Response
///
/// Both commands contain the same fields, the command code is what differentiates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    io_capability: IoCapability,
    oob_data_flag: OobDataFlag,
    auth_req: AuthReq,
    max_encryption_size: u8,
    initiator_key_distribution: KeyDistributions,
    responder_key_distribution: KeyDistributions,
}

impl CommandData for PairingFeatures {
    fn into_command_format(self) -> Vec<u8> {
        vec![
            self.io_capability.into_val(),
            self.oob_data_flag.into_val(),
            self.auth_req.0,
            self.max_encryption_size,
            self.initiator_key_distribution.into_val(),
            self.responder_key_distribution.into_val(),
        ]
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        log::trace!("(SM) received pairing features: {:x?}", icd);

        if icd.len() == 6 {
            Ok(Self {
                io_capability: IoCapability::try_from_val(icd[0])?,
                oob_data_flag: OobDataFlag::try_from_val(icd[1])?,
                auth_req: AuthReq(icd[2]),
                max_encryption_size: icd[3],
                initiator_key_distribution: KeyDistributions::from_val(icd[4]),
                responder_key_distribution: KeyDistributions::from_val(icd[5]),
            })
        } else {
            log::error!("(SM) failed to generate 'pairing request/response' from raw data");
            log::trace!("(SM) failed raw data: '{:x?}'", icd);
            Err(Error::Size)
        }
    }
}

impl PairingFeatures {
    /// The valid range of the maximum encryption key size
    pub const MAX_ENCRYPTION_SIZE_RANGE: core::ops::RangeInclusive<u8> = 7..=16;

    pub fn new(
        io_capability: IoCapability,
        oob_data_flag: OobDataFlag,
        auth_req: AuthReq,
        max_encryption_size: u8,
        initiator_key_distribution: KeyDistributions,
        responder_key_distribution: KeyDistributions,
    ) -> Self {
        Self {
            io_capability,
            oob_data_flag,
            auth_req,
            max_encryption_size,
            initiator_key_distribution,
            responder_key_distribution,
        }
    }

    pub fn get_io_capability(&self) -> IoCapability {
        self.io_capability
    }

    pub fn get_oob_data_flag(&self) -> OobDataFlag {
        self.oob_data_flag
    }

    pub fn get_auth_req(&self) -> AuthReq {
        self.auth_req
    }

    pub fn get_max_encryption_size(&self) -> u8 {
        self.max_encryption_size
    }

    pub fn get_initiator_key_distribution(&self) -> KeyDistributions {
        self.initiator_key_distribution
    }

    pub fn get_responder_key_distribution(&self) -> KeyDistributions {
        self.responder_key_distribution
    }

    /// Check that the maximum encryption key size is within `7..=16`
    pub fn is_valid_max_encryption_size(&self) -> bool {
        Self::MAX_ENCRYPTION_SIZE_RANGE.contains(&self.max_encryption_size)
    }

    /// Get the IOcap (not the IO capabilities)
    ///
    /// This is the IOcapA/IOcapB value that is used as part of the [`f6`] toolbox function.
    ///
    /// [`f6`]: crate::toolbox::f6
    pub fn get_io_cap(&self) -> [u8; 3] {
        [self.auth_req.0, self.oob_data_flag.into_val(), self.io_capability.into_val()]
    }

    /// Get the value of the PDU for the [`c1`] toolbox function
    ///
    /// This is either the `preq` or `pres` input depending on `command_type`.
    ///
    /// [`c1`]: crate::toolbox::c1
    pub fn get_c1_value(&self, command_type: CommandType) -> u128 {
        let mut bytes = [0u8; 16];

        bytes[0] = command_type.into_val();
        bytes[1..7].copy_from_slice(&self.into_command_format());

        <u128>::from_le_bytes(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfirm {
    value: u128,
}

impl CommandData for PairingConfirm {
    fn into_command_format(self) -> Vec<u8> {
        self.value.to_le_bytes().to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let v: [u8; 16] = icd.try_into().map_err(|_| {
            log::error!("(SM) failed to generate 'pairing confirm' from raw data");
            log::trace!("(SM) failed raw data: {:x?}", icd);
            Error::Size
        })?;

        Ok(PairingConfirm {
            value: <u128>::from_le_bytes(v),
        })
    }
}

impl PairingConfirm {
    pub fn new(confirm_value: u128) -> Self {
        PairingConfirm { value: confirm_value }
    }

    pub fn get_value(&self) -> u128 {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRandom {
    value: u128,
}

impl CommandData for PairingRandom {
    fn into_command_format(self) -> Vec<u8> {
        self.value.to_le_bytes().to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let v: [u8; 16] = icd.try_into().map_err(|_| {
            log::error!("(SM) failed to generate 'pairing random' from raw data");
            log::trace!("(SM) failed raw data: {:x?}", icd);
            Error::Size
        })?;

        Ok(PairingRandom {
            value: <u128>::from_le_bytes(v),
        })
    }
}

impl PairingRandom {
    pub fn new(rand: u128) -> Self {
        PairingRandom { value: rand }
    }

    pub fn get_value(&self) -> u128 {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PairingFailedReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyDerivationGenerationNotAllowed,
}

impl PairingFailedReason {
    pub fn into_val(self) -> u8 {
        match self {
            PairingFailedReason::PasskeyEntryFailed => 0x1,
            PairingFailedReason::OobNotAvailable => 0x2,
            PairingFailedReason::AuthenticationRequirements => 0x3,
            PairingFailedReason::ConfirmValueFailed => 0x4,
            PairingFailedReason::PairingNotSupported => 0x5,
            PairingFailedReason::EncryptionKeySize => 0x6,
            PairingFailedReason::CommandNotSupported => 0x7,
            PairingFailedReason::UnspecifiedReason => 0x8,
            PairingFailedReason::RepeatedAttempts => 0x9,
            PairingFailedReason::InvalidParameters => 0xa,
            PairingFailedReason::DhKeyCheckFailed => 0xb,
            PairingFailedReason::NumericComparisonFailed => 0xc,
            PairingFailedReason::BrEdrPairingInProgress => 0xd,
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => 0xe,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(PairingFailedReason::PasskeyEntryFailed),
            0x2 => Ok(PairingFailedReason::OobNotAvailable),
            0x3 => Ok(PairingFailedReason::AuthenticationRequirements),
            0x4 => Ok(PairingFailedReason::ConfirmValueFailed),
            0x5 => Ok(PairingFailedReason::PairingNotSupported),
            0x6 => Ok(PairingFailedReason::EncryptionKeySize),
            0x7 => Ok(PairingFailedReason::CommandNotSupported),
            0x8 => Ok(PairingFailedReason::UnspecifiedReason),
            0x9 => Ok(PairingFailedReason::RepeatedAttempts),
            0xa => Ok(PairingFailedReason::InvalidParameters),
            0xb => Ok(PairingFailedReason::DhKeyCheckFailed),
            0xc => Ok(PairingFailedReason::NumericComparisonFailed),
            0xd => Ok(PairingFailedReason::BrEdrPairingInProgress),
            0xe => Ok(PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed),
            _ => Err(Error::Value),
        }
    }
}

impl core::fmt::Display for PairingFailedReason {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PairingFailedReason::PasskeyEntryFailed => f.write_str("passkey entry failed"),
            PairingFailedReason::OobNotAvailable => f.write_str("out of band data not available"),
            PairingFailedReason::AuthenticationRequirements => f.write_str("authentication requirements not met"),
            PairingFailedReason::ConfirmValueFailed => f.write_str("confirm value check failed"),
            PairingFailedReason::PairingNotSupported => f.write_str("pairing not supported"),
            PairingFailedReason::EncryptionKeySize => f.write_str("invalid encryption key size"),
            PairingFailedReason::CommandNotSupported => f.write_str("security manager command not supported"),
            PairingFailedReason::UnspecifiedReason => f.write_str("unspecified reason"),
            PairingFailedReason::RepeatedAttempts => f.write_str("too many attempts at pairing"),
            PairingFailedReason::InvalidParameters => f.write_str("invalid parameters"),
            PairingFailedReason::DhKeyCheckFailed => f.write_str("Diffie Hellman key check failed"),
            PairingFailedReason::NumericComparisonFailed => f.write_str("numeric comparison failed"),
            PairingFailedReason::BrEdrPairingInProgress => f.write_str("BR/EDR pairing in progress"),
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => {
                f.write_str("cross transport key derivation generation not allowed")
            }
        }
    }
}

/// The Pairing Failed Command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFailed {
    reason: PairingFailedReason,
}

impl CommandData for PairingFailed {
    fn into_command_format(self) -> Vec<u8> {
        vec![self.reason.into_val()]
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        match icd {
            [reason] => Ok(PairingFailed {
                reason: PairingFailedReason::try_from_val(*reason)?,
            }),
            _ => {
                log::error!("(SM) failed to generate 'pairing failed' from raw data");
                log::trace!("(SM) failed raw data: {:x?}", icd);
                Err(Error::Size)
            }
        }
    }
}

impl PairingFailed {
    /// Create a new `PairingFailed`
    pub fn new(reason: PairingFailedReason) -> Self {
        Self { reason }
    }

    /// Get the reason for why pairing failed
    pub fn get_reason(&self) -> PairingFailedReason {
        self.reason
    }
}

/// The Pairing Public Key command
///
/// The coordinates are kept in the little endian PDU format.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PairingPubKey {
    x_y: [u8; 64],
}

impl CommandData for PairingPubKey {
    fn into_command_format(self) -> Vec<u8> {
        self.x_y.to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let x_y: [u8; 64] = icd.try_into().map_err(|_| {
            log::error!("(SM) failed to generate 'pairing public key' from raw data");
            log::trace!("(SM) failed raw data: {:x?}", icd);
            Error::Size
        })?;

        Ok(PairingPubKey { x_y })
    }
}

impl PairingPubKey {
    pub fn new(public_key: &EcdhPublicKey) -> Self {
        PairingPubKey {
            x_y: public_key.to_pdu_bytes(),
        }
    }

    /// Get the public key
    ///
    /// The returned key is not validated.
    pub fn get_key(&self) -> EcdhPublicKey {
        EcdhPublicKey::from_pdu_bytes(&self.x_y)
    }
}

impl core::fmt::Debug for PairingPubKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_tuple("PairingPubKey").field(&self.get_key()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingDhKeyCheck {
    check: u128,
}

impl CommandData for PairingDhKeyCheck {
    fn into_command_format(self) -> Vec<u8> {
        self.check.to_le_bytes().to_vec()
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let v: [u8; 16] = icd.try_into().map_err(|_| {
            log::error!("(SM) failed to generate 'pairing DHKey check' from raw data");
            log::trace!("(SM) failed raw data: {:x?}", icd);
            Error::Size
        })?;

        Ok(PairingDhKeyCheck {
            check: <u128>::from_le_bytes(v),
        })
    }
}

impl PairingDhKeyCheck {
    pub fn new(check: u128) -> Self {
        PairingDhKeyCheck { check }
    }

    pub fn get_key_check(&self) -> u128 {
        self.check
    }
}

/// The Keypress Notification command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPressNotification {
    PasskeyEntryStarted,
    PasskeyDigitEntered,
    PasskeyDigitErased,
    PasskeyCleared,
    PasskeyEntryCompleted,
}

impl CommandData for KeyPressNotification {
    fn into_command_format(self) -> Vec<u8> {
        let val = match self {
            KeyPressNotification::PasskeyEntryStarted => 0x0,
            KeyPressNotification::PasskeyDigitEntered => 0x1,
            KeyPressNotification::PasskeyDigitErased => 0x2,
            KeyPressNotification::PasskeyCleared => 0x3,
            KeyPressNotification::PasskeyEntryCompleted => 0x4,
        };

        vec![val]
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        match icd {
            [0x0] => Ok(KeyPressNotification::PasskeyEntryStarted),
            [0x1] => Ok(KeyPressNotification::PasskeyDigitEntered),
            [0x2] => Ok(KeyPressNotification::PasskeyDigitErased),
            [0x3] => Ok(KeyPressNotification::PasskeyCleared),
            [0x4] => Ok(KeyPressNotification::PasskeyEntryCompleted),
            [_] => Err(Error::Value),
            _ => Err(Error::Size),
        }
    }
}

/// The Security Request command
///
/// This is sent by a peripheral to request that the central start pairing (or encryption).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRequest {
    auth_req: AuthReq,
}

impl CommandData for SecurityRequest {
    fn into_command_format(self) -> Vec<u8> {
        vec![self.auth_req.0]
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        match icd {
            [auth_req] => Ok(SecurityRequest {
                auth_req: AuthReq(*auth_req),
            }),
            _ => Err(Error::Size),
        }
    }
}

impl SecurityRequest {
    pub fn new(auth_req: AuthReq) -> Self {
        SecurityRequest { auth_req }
    }

    pub fn get_auth_req(&self) -> AuthReq {
        self.auth_req
    }
}
