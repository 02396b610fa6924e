//! Host Controller Interface security events and commands
//!
//! These are the HCI events received from and the commands sent to the controller that are used for
//! pairing. Only the security related events and commands of the Bluetooth Specification (v5.0 |
//! Vol 2, Part E, section 7) are here.
//!
//! An event packet is the event code, the parameter length, and then the parameters. A command
//! packet is the opcode (little endian), the parameter length, and then the parameters.

use crate::{BluetoothDeviceAddress, Error, SecurityLevel};
use core::fmt::{self, Display, Formatter};

/// A connection handle
pub type ConnectionHandle = u16;

/// Event codes
pub mod event_code {
    pub const AUTHENTICATION_COMPLETE: u8 = 0x06;
    pub const ENCRYPTION_CHANGE: u8 = 0x08;
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    pub const PIN_CODE_REQUEST: u8 = 0x16;
    pub const LINK_KEY_REQUEST: u8 = 0x17;
    pub const LINK_KEY_NOTIFICATION: u8 = 0x18;
    pub const IO_CAPABILITY_REQUEST: u8 = 0x31;
    pub const IO_CAPABILITY_RESPONSE: u8 = 0x32;
    pub const USER_CONFIRMATION_REQUEST: u8 = 0x33;
    pub const USER_PASSKEY_REQUEST: u8 = 0x34;
    pub const REMOTE_OOB_DATA_REQUEST: u8 = 0x35;
    pub const SIMPLE_PAIRING_COMPLETE: u8 = 0x36;
    pub const USER_PASSKEY_NOTIFICATION: u8 = 0x3B;
    pub const KEYPRESS_NOTIFICATION: u8 = 0x3C;
    pub const LE_META: u8 = 0x3E;

    /// LE Long Term Key Request subevent code
    pub const LE_LONG_TERM_KEY_REQUEST: u8 = 0x05;
}

/// Command opcodes
pub mod opcode {
    pub const LINK_KEY_REQUEST_REPLY: u16 = 0x040B;
    pub const LINK_KEY_REQUEST_NEGATIVE_REPLY: u16 = 0x040C;
    pub const PIN_CODE_REQUEST_REPLY: u16 = 0x040D;
    pub const PIN_CODE_REQUEST_NEGATIVE_REPLY: u16 = 0x040E;
    pub const AUTHENTICATION_REQUESTED: u16 = 0x0411;
    pub const IO_CAPABILITY_REQUEST_REPLY: u16 = 0x042B;
    pub const USER_CONFIRMATION_REQUEST_REPLY: u16 = 0x042C;
    pub const USER_CONFIRMATION_REQUEST_NEGATIVE_REPLY: u16 = 0x042D;
    pub const USER_PASSKEY_REQUEST_REPLY: u16 = 0x042E;
    pub const USER_PASSKEY_REQUEST_NEGATIVE_REPLY: u16 = 0x042F;
    pub const REMOTE_OOB_DATA_REQUEST_REPLY: u16 = 0x0430;
    pub const REMOTE_OOB_DATA_REQUEST_NEGATIVE_REPLY: u16 = 0x0433;
    pub const IO_CAPABILITY_REQUEST_NEGATIVE_REPLY: u16 = 0x0434;
    pub const REMOTE_OOB_EXTENDED_DATA_REQUEST_REPLY: u16 = 0x0445;
    pub const DELETE_STORED_LINK_KEY: u16 = 0x0C12;
    pub const WRITE_SIMPLE_PAIRING_MODE: u16 = 0x0C56;
    pub const READ_LOCAL_OOB_DATA: u16 = 0x0C57;
    pub const WRITE_SECURE_CONNECTIONS_HOST_SUPPORT: u16 = 0x0C7A;
    pub const LE_ENABLE_ENCRYPTION: u16 = 0x2019;
    pub const LE_LONG_TERM_KEY_REQUEST_REPLY: u16 = 0x201A;
    pub const LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY: u16 = 0x201B;
}

/// Controller error codes
///
/// These are the error codes (Bluetooth Specification v5.0 | Vol 1, Part F) that can be a status
/// of a security event. Any other code is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    Unknown(u8),
    AuthenticationFailure,
    PinOrKeyMissing,
    ConnectionTimeout,
    RemoteUserTerminatedConnection,
    ConnectionTerminatedByLocalHost,
    RepeatedAttempts,
    PairingNotAllowed,
    UnspecifiedError,
    InstantPassed,
    PairingWithUnitKeyNotSupported,
    InsufficientSecurity,
    SimplePairingNotSupportedByHost,
}

impl ErrorCode {
    pub fn is_ok(&self) -> bool {
        *self == ErrorCode::NoError
    }
}

impl From<u8> for ErrorCode {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => ErrorCode::NoError,
            0x05 => ErrorCode::AuthenticationFailure,
            0x06 => ErrorCode::PinOrKeyMissing,
            0x08 => ErrorCode::ConnectionTimeout,
            0x13 => ErrorCode::RemoteUserTerminatedConnection,
            0x16 => ErrorCode::ConnectionTerminatedByLocalHost,
            0x17 => ErrorCode::RepeatedAttempts,
            0x18 => ErrorCode::PairingNotAllowed,
            0x1F => ErrorCode::UnspecifiedError,
            0x28 => ErrorCode::InstantPassed,
            0x29 => ErrorCode::PairingWithUnitKeyNotSupported,
            0x2F => ErrorCode::InsufficientSecurity,
            0x37 => ErrorCode::SimplePairingNotSupportedByHost,
            _ => ErrorCode::Unknown(raw),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NoError => 0x00,
            ErrorCode::Unknown(raw) => raw,
            ErrorCode::AuthenticationFailure => 0x05,
            ErrorCode::PinOrKeyMissing => 0x06,
            ErrorCode::ConnectionTimeout => 0x08,
            ErrorCode::RemoteUserTerminatedConnection => 0x13,
            ErrorCode::ConnectionTerminatedByLocalHost => 0x16,
            ErrorCode::RepeatedAttempts => 0x17,
            ErrorCode::PairingNotAllowed => 0x18,
            ErrorCode::UnspecifiedError => 0x1F,
            ErrorCode::InstantPassed => 0x28,
            ErrorCode::PairingWithUnitKeyNotSupported => 0x29,
            ErrorCode::InsufficientSecurity => 0x2F,
            ErrorCode::SimplePairingNotSupportedByHost => 0x37,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ErrorCode::NoError => f.write_str("no error"),
            ErrorCode::Unknown(raw) => write!(f, "unknown error code (0x{:X})", raw),
            ErrorCode::AuthenticationFailure => f.write_str("authentication failure (0x5)"),
            ErrorCode::PinOrKeyMissing => f.write_str("pin or key missing (0x6)"),
            ErrorCode::ConnectionTimeout => f.write_str("connection timeout (0x8)"),
            ErrorCode::RemoteUserTerminatedConnection => f.write_str("remote user terminated connection (0x13)"),
            ErrorCode::ConnectionTerminatedByLocalHost => f.write_str("connection terminated by local host (0x16)"),
            ErrorCode::RepeatedAttempts => f.write_str("repeated attempts (0x17)"),
            ErrorCode::PairingNotAllowed => f.write_str("pairing not allowed (0x18)"),
            ErrorCode::UnspecifiedError => f.write_str("unspecified error (0x1F)"),
            ErrorCode::InstantPassed => f.write_str("instant passed (0x28)"),
            ErrorCode::PairingWithUnitKeyNotSupported => f.write_str("pairing with unit key not supported (0x29)"),
            ErrorCode::InsufficientSecurity => f.write_str("insufficient security (0x2F)"),
            ErrorCode::SimplePairingNotSupportedByHost => f.write_str("simple pairing not supported by host (0x37)"),
        }
    }
}

/// The IO capability of a BR/EDR device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClassicIoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
}

impl ClassicIoCapability {
    pub fn into_val(self) -> u8 {
        match self {
            ClassicIoCapability::DisplayOnly => 0,
            ClassicIoCapability::DisplayYesNo => 1,
            ClassicIoCapability::KeyboardOnly => 2,
            ClassicIoCapability::NoInputNoOutput => 3,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0 => Ok(ClassicIoCapability::DisplayOnly),
            1 => Ok(ClassicIoCapability::DisplayYesNo),
            2 => Ok(ClassicIoCapability::KeyboardOnly),
            3 => Ok(ClassicIoCapability::NoInputNoOutput),
            _ => Err(Error::Value),
        }
    }
}

/// The authentication requirements of a BR/EDR device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClassicAuthRequirements {
    NoBonding,
    NoBondingMitmProtection,
    DedicatedBonding,
    DedicatedBondingMitmProtection,
    GeneralBonding,
    GeneralBondingMitmProtection,
}

impl ClassicAuthRequirements {
    pub fn into_val(self) -> u8 {
        match self {
            ClassicAuthRequirements::NoBonding => 0,
            ClassicAuthRequirements::NoBondingMitmProtection => 1,
            ClassicAuthRequirements::DedicatedBonding => 2,
            ClassicAuthRequirements::DedicatedBondingMitmProtection => 3,
            ClassicAuthRequirements::GeneralBonding => 4,
            ClassicAuthRequirements::GeneralBondingMitmProtection => 5,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0 => Ok(ClassicAuthRequirements::NoBonding),
            1 => Ok(ClassicAuthRequirements::NoBondingMitmProtection),
            2 => Ok(ClassicAuthRequirements::DedicatedBonding),
            3 => Ok(ClassicAuthRequirements::DedicatedBondingMitmProtection),
            4 => Ok(ClassicAuthRequirements::GeneralBonding),
            5 => Ok(ClassicAuthRequirements::GeneralBondingMitmProtection),
            _ => Err(Error::Value),
        }
    }

    /// Check if MITM protection is required
    pub fn is_mitm(self) -> bool {
        self.into_val() & 1 == 1
    }
}

/// The out of band data present field of the IO Capability Request Reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassicOobDataPresent {
    NotPresent,
    P192Present,
    P256Present,
    P192AndP256Present,
}

impl ClassicOobDataPresent {
    pub fn into_val(self) -> u8 {
        match self {
            ClassicOobDataPresent::NotPresent => 0,
            ClassicOobDataPresent::P192Present => 1,
            ClassicOobDataPresent::P256Present => 2,
            ClassicOobDataPresent::P192AndP256Present => 3,
        }
    }
}

/// The type of a BR/EDR link key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkKeyType {
    Combination,
    LocalUnit,
    RemoteUnit,
    DebugCombination,
    UnauthenticatedCombinationP192,
    AuthenticatedCombinationP192,
    ChangedCombination,
    UnauthenticatedCombinationP256,
    AuthenticatedCombinationP256,
}

impl LinkKeyType {
    pub fn into_val(self) -> u8 {
        match self {
            LinkKeyType::Combination => 0,
            LinkKeyType::LocalUnit => 1,
            LinkKeyType::RemoteUnit => 2,
            LinkKeyType::DebugCombination => 3,
            LinkKeyType::UnauthenticatedCombinationP192 => 4,
            LinkKeyType::AuthenticatedCombinationP192 => 5,
            LinkKeyType::ChangedCombination => 6,
            LinkKeyType::UnauthenticatedCombinationP256 => 7,
            LinkKeyType::AuthenticatedCombinationP256 => 8,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0 => Ok(LinkKeyType::Combination),
            1 => Ok(LinkKeyType::LocalUnit),
            2 => Ok(LinkKeyType::RemoteUnit),
            3 => Ok(LinkKeyType::DebugCombination),
            4 => Ok(LinkKeyType::UnauthenticatedCombinationP192),
            5 => Ok(LinkKeyType::AuthenticatedCombinationP192),
            6 => Ok(LinkKeyType::ChangedCombination),
            7 => Ok(LinkKeyType::UnauthenticatedCombinationP256),
            8 => Ok(LinkKeyType::AuthenticatedCombinationP256),
            _ => Err(Error::Value),
        }
    }

    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            LinkKeyType::AuthenticatedCombinationP192 | LinkKeyType::AuthenticatedCombinationP256
        )
    }

    /// The security level of a link encrypted with a key of this type
    pub fn security_level(self) -> SecurityLevel {
        match self {
            LinkKeyType::AuthenticatedCombinationP256 => SecurityLevel::AuthenticatedSecureConnections,
            LinkKeyType::UnauthenticatedCombinationP256 => SecurityLevel::UnauthenticatedSecureConnections,
            LinkKeyType::AuthenticatedCombinationP192 => SecurityLevel::AuthenticatedLegacy,
            _ => SecurityLevel::UnauthenticatedLegacy,
        }
    }
}

/// HCI events used by the security manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent {
    AuthenticationComplete {
        status: ErrorCode,
        handle: ConnectionHandle,
    },
    EncryptionChange {
        status: ErrorCode,
        handle: ConnectionHandle,
        enabled: bool,
    },
    /// Command Complete event of the Read Local OOB Data command
    ReadLocalOobDataComplete {
        status: ErrorCode,
        c: [u8; 16],
        r: [u8; 16],
    },
    PinCodeRequest {
        address: BluetoothDeviceAddress,
    },
    LinkKeyRequest {
        address: BluetoothDeviceAddress,
    },
    LinkKeyNotification {
        address: BluetoothDeviceAddress,
        link_key: [u8; 16],
        key_type: LinkKeyType,
    },
    IoCapabilityRequest {
        address: BluetoothDeviceAddress,
    },
    IoCapabilityResponse {
        address: BluetoothDeviceAddress,
        io_capability: ClassicIoCapability,
        oob_data_present: bool,
        authentication_requirements: ClassicAuthRequirements,
    },
    UserConfirmationRequest {
        address: BluetoothDeviceAddress,
        numeric_value: u32,
    },
    UserPasskeyRequest {
        address: BluetoothDeviceAddress,
    },
    RemoteOobDataRequest {
        address: BluetoothDeviceAddress,
    },
    SimplePairingComplete {
        status: ErrorCode,
        address: BluetoothDeviceAddress,
    },
    UserPasskeyNotification {
        address: BluetoothDeviceAddress,
        passkey: u32,
    },
    KeypressNotification {
        address: BluetoothDeviceAddress,
        notification_type: u8,
    },
    LeLongTermKeyRequest {
        handle: ConnectionHandle,
        random: u64,
        ediv: u16,
    },
}

/// A cursor over the parameters of an event
struct Params<'a>(&'a [u8]);

impl<'a> Params<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.0.len() < len {
            return Err(Error::Size);
        }

        let (taken, rest) = self.0.split_at(len);

        self.0 = rest;

        Ok(taken)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;

        Ok(<u16>::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let mut a = [0u8; 4];

        a.copy_from_slice(self.take(4)?);

        Ok(<u32>::from_le_bytes(a))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let mut a = [0u8; 8];

        a.copy_from_slice(self.take(8)?);

        Ok(<u64>::from_le_bytes(a))
    }

    fn array16(&mut self) -> Result<[u8; 16], Error> {
        let mut a = [0u8; 16];

        a.copy_from_slice(self.take(16)?);

        Ok(a)
    }

    fn address(&mut self) -> Result<BluetoothDeviceAddress, Error> {
        let mut address = BluetoothDeviceAddress::zeroed();

        address.0.copy_from_slice(self.take(6)?);

        Ok(address)
    }

    fn status(&mut self) -> Result<ErrorCode, Error> {
        self.u8().map(ErrorCode::from)
    }
}

impl HciEvent {
    /// Try to create a `HciEvent` from an event packet
    pub fn try_from_packet(packet: &[u8]) -> Result<Self, Error> {
        if packet.len() < 2 {
            return Err(Error::Size);
        }

        let code = packet[0];

        let len = packet[1] as usize;

        if packet.len() != len + 2 {
            return Err(Error::Size);
        }

        let mut p = Params(&packet[2..]);

        let event = match code {
            event_code::AUTHENTICATION_COMPLETE => HciEvent::AuthenticationComplete {
                status: p.status()?,
                handle: p.u16()?,
            },
            event_code::ENCRYPTION_CHANGE => HciEvent::EncryptionChange {
                status: p.status()?,
                handle: p.u16()?,
                enabled: p.u8()? != 0,
            },
            event_code::COMMAND_COMPLETE => {
                let _num_hci_command_packets = p.u8()?;

                match p.u16()? {
                    opcode::READ_LOCAL_OOB_DATA => HciEvent::ReadLocalOobDataComplete {
                        status: p.status()?,
                        c: p.array16()?,
                        r: p.array16()?,
                    },
                    _ => return Err(Error::UnknownEvent(code)),
                }
            }
            event_code::PIN_CODE_REQUEST => HciEvent::PinCodeRequest { address: p.address()? },
            event_code::LINK_KEY_REQUEST => HciEvent::LinkKeyRequest { address: p.address()? },
            event_code::LINK_KEY_NOTIFICATION => HciEvent::LinkKeyNotification {
                address: p.address()?,
                link_key: p.array16()?,
                key_type: LinkKeyType::try_from_val(p.u8()?)?,
            },
            event_code::IO_CAPABILITY_REQUEST => HciEvent::IoCapabilityRequest { address: p.address()? },
            event_code::IO_CAPABILITY_RESPONSE => HciEvent::IoCapabilityResponse {
                address: p.address()?,
                io_capability: ClassicIoCapability::try_from_val(p.u8()?)?,
                oob_data_present: p.u8()? != 0,
                authentication_requirements: ClassicAuthRequirements::try_from_val(p.u8()?)?,
            },
            event_code::USER_CONFIRMATION_REQUEST => HciEvent::UserConfirmationRequest {
                address: p.address()?,
                numeric_value: p.u32()?,
            },
            event_code::USER_PASSKEY_REQUEST => HciEvent::UserPasskeyRequest { address: p.address()? },
            event_code::REMOTE_OOB_DATA_REQUEST => HciEvent::RemoteOobDataRequest { address: p.address()? },
            event_code::SIMPLE_PAIRING_COMPLETE => HciEvent::SimplePairingComplete {
                status: p.status()?,
                address: p.address()?,
            },
            event_code::USER_PASSKEY_NOTIFICATION => HciEvent::UserPasskeyNotification {
                address: p.address()?,
                passkey: p.u32()?,
            },
            event_code::KEYPRESS_NOTIFICATION => HciEvent::KeypressNotification {
                address: p.address()?,
                notification_type: p.u8()?,
            },
            event_code::LE_META => match p.u8()? {
                event_code::LE_LONG_TERM_KEY_REQUEST => HciEvent::LeLongTermKeyRequest {
                    handle: p.u16()?,
                    random: p.u64()?,
                    ediv: p.u16()?,
                },
                _ => return Err(Error::UnknownEvent(code)),
            },
            _ => return Err(Error::UnknownEvent(code)),
        };

        if p.0.is_empty() {
            Ok(event)
        } else {
            Err(Error::Size)
        }
    }

    /// Get the event code
    pub fn event_code(&self) -> u8 {
        match self {
            HciEvent::AuthenticationComplete { .. } => event_code::AUTHENTICATION_COMPLETE,
            HciEvent::EncryptionChange { .. } => event_code::ENCRYPTION_CHANGE,
            HciEvent::ReadLocalOobDataComplete { .. } => event_code::COMMAND_COMPLETE,
            HciEvent::PinCodeRequest { .. } => event_code::PIN_CODE_REQUEST,
            HciEvent::LinkKeyRequest { .. } => event_code::LINK_KEY_REQUEST,
            HciEvent::LinkKeyNotification { .. } => event_code::LINK_KEY_NOTIFICATION,
            HciEvent::IoCapabilityRequest { .. } => event_code::IO_CAPABILITY_REQUEST,
            HciEvent::IoCapabilityResponse { .. } => event_code::IO_CAPABILITY_RESPONSE,
            HciEvent::UserConfirmationRequest { .. } => event_code::USER_CONFIRMATION_REQUEST,
            HciEvent::UserPasskeyRequest { .. } => event_code::USER_PASSKEY_REQUEST,
            HciEvent::RemoteOobDataRequest { .. } => event_code::REMOTE_OOB_DATA_REQUEST,
            HciEvent::SimplePairingComplete { .. } => event_code::SIMPLE_PAIRING_COMPLETE,
            HciEvent::UserPasskeyNotification { .. } => event_code::USER_PASSKEY_NOTIFICATION,
            HciEvent::KeypressNotification { .. } => event_code::KEYPRESS_NOTIFICATION,
            HciEvent::LeLongTermKeyRequest { .. } => event_code::LE_META,
        }
    }

    /// Get the peer address of a BR/EDR pairing event
    pub fn get_address(&self) -> Option<BluetoothDeviceAddress> {
        match self {
            HciEvent::PinCodeRequest { address }
            | HciEvent::LinkKeyRequest { address }
            | HciEvent::LinkKeyNotification { address, .. }
            | HciEvent::IoCapabilityRequest { address }
            | HciEvent::IoCapabilityResponse { address, .. }
            | HciEvent::UserConfirmationRequest { address, .. }
            | HciEvent::UserPasskeyRequest { address }
            | HciEvent::RemoteOobDataRequest { address }
            | HciEvent::SimplePairingComplete { address, .. }
            | HciEvent::UserPasskeyNotification { address, .. }
            | HciEvent::KeypressNotification { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// HCI commands sent by the security manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciCommand {
    LinkKeyRequestReply {
        address: BluetoothDeviceAddress,
        link_key: [u8; 16],
    },
    LinkKeyRequestNegativeReply {
        address: BluetoothDeviceAddress,
    },
    /// The PIN is between one and sixteen bytes
    PinCodeRequestReply {
        address: BluetoothDeviceAddress,
        pin: Vec<u8>,
    },
    PinCodeRequestNegativeReply {
        address: BluetoothDeviceAddress,
    },
    AuthenticationRequested {
        handle: ConnectionHandle,
    },
    IoCapabilityRequestReply {
        address: BluetoothDeviceAddress,
        io_capability: ClassicIoCapability,
        oob_data_present: ClassicOobDataPresent,
        authentication_requirements: ClassicAuthRequirements,
    },
    IoCapabilityRequestNegativeReply {
        address: BluetoothDeviceAddress,
        reason: ErrorCode,
    },
    UserConfirmationRequestReply {
        address: BluetoothDeviceAddress,
    },
    UserConfirmationRequestNegativeReply {
        address: BluetoothDeviceAddress,
    },
    UserPasskeyRequestReply {
        address: BluetoothDeviceAddress,
        passkey: u32,
    },
    UserPasskeyRequestNegativeReply {
        address: BluetoothDeviceAddress,
    },
    RemoteOobDataRequestReply {
        address: BluetoothDeviceAddress,
        c: [u8; 16],
        r: [u8; 16],
    },
    RemoteOobExtendedDataRequestReply {
        address: BluetoothDeviceAddress,
        c_192: [u8; 16],
        r_192: [u8; 16],
        c_256: [u8; 16],
        r_256: [u8; 16],
    },
    RemoteOobDataRequestNegativeReply {
        address: BluetoothDeviceAddress,
    },
    /// Delete the link key of `address`, or every stored link key when `address` is `None`
    DeleteStoredLinkKey {
        address: Option<BluetoothDeviceAddress>,
    },
    WriteSimplePairingMode {
        enabled: bool,
    },
    ReadLocalOobData,
    WriteSecureConnectionsHostSupport {
        enabled: bool,
    },
    LeEnableEncryption {
        handle: ConnectionHandle,
        random: u64,
        ediv: u16,
        long_term_key: u128,
    },
    LeLongTermKeyRequestReply {
        handle: ConnectionHandle,
        long_term_key: u128,
    },
    LeLongTermKeyRequestNegativeReply {
        handle: ConnectionHandle,
    },
}

impl HciCommand {
    pub fn get_opcode(&self) -> u16 {
        match self {
            HciCommand::LinkKeyRequestReply { .. } => opcode::LINK_KEY_REQUEST_REPLY,
            HciCommand::LinkKeyRequestNegativeReply { .. } => opcode::LINK_KEY_REQUEST_NEGATIVE_REPLY,
            HciCommand::PinCodeRequestReply { .. } => opcode::PIN_CODE_REQUEST_REPLY,
            HciCommand::PinCodeRequestNegativeReply { .. } => opcode::PIN_CODE_REQUEST_NEGATIVE_REPLY,
            HciCommand::AuthenticationRequested { .. } => opcode::AUTHENTICATION_REQUESTED,
            HciCommand::IoCapabilityRequestReply { .. } => opcode::IO_CAPABILITY_REQUEST_REPLY,
            HciCommand::IoCapabilityRequestNegativeReply { .. } => opcode::IO_CAPABILITY_REQUEST_NEGATIVE_REPLY,
            HciCommand::UserConfirmationRequestReply { .. } => opcode::USER_CONFIRMATION_REQUEST_REPLY,
            HciCommand::UserConfirmationRequestNegativeReply { .. } => {
                opcode::USER_CONFIRMATION_REQUEST_NEGATIVE_REPLY
            }
            HciCommand::UserPasskeyRequestReply { .. } => opcode::USER_PASSKEY_REQUEST_REPLY,
            HciCommand::UserPasskeyRequestNegativeReply { .. } => opcode::USER_PASSKEY_REQUEST_NEGATIVE_REPLY,
            HciCommand::RemoteOobDataRequestReply { .. } => opcode::REMOTE_OOB_DATA_REQUEST_REPLY,
            HciCommand::RemoteOobExtendedDataRequestReply { .. } => opcode::REMOTE_OOB_EXTENDED_DATA_REQUEST_REPLY,
            HciCommand::RemoteOobDataRequestNegativeReply { .. } => opcode::REMOTE_OOB_DATA_REQUEST_NEGATIVE_REPLY,
            HciCommand::DeleteStoredLinkKey { .. } => opcode::DELETE_STORED_LINK_KEY,
            HciCommand::WriteSimplePairingMode { .. } => opcode::WRITE_SIMPLE_PAIRING_MODE,
            HciCommand::ReadLocalOobData => opcode::READ_LOCAL_OOB_DATA,
            HciCommand::WriteSecureConnectionsHostSupport { .. } => opcode::WRITE_SECURE_CONNECTIONS_HOST_SUPPORT,
            HciCommand::LeEnableEncryption { .. } => opcode::LE_ENABLE_ENCRYPTION,
            HciCommand::LeLongTermKeyRequestReply { .. } => opcode::LE_LONG_TERM_KEY_REQUEST_REPLY,
            HciCommand::LeLongTermKeyRequestNegativeReply { .. } => opcode::LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY,
        }
    }

    /// Convert into a command packet
    pub fn into_packet(self) -> Vec<u8> {
        let mut packet = self.get_opcode().to_le_bytes().to_vec();

        // placeholder for the parameter length
        packet.push(0);

        match self {
            HciCommand::LinkKeyRequestReply { address, link_key } => {
                packet.extend_from_slice(&address.0);
                packet.extend_from_slice(&link_key);
            }
            HciCommand::PinCodeRequestReply { address, pin } => {
                let mut pin_field = [0u8; 16];

                let len = pin.len().min(16);

                pin_field[..len].copy_from_slice(&pin[..len]);

                packet.extend_from_slice(&address.0);
                packet.push(len as u8);
                packet.extend_from_slice(&pin_field);
            }
            HciCommand::LinkKeyRequestNegativeReply { address }
            | HciCommand::PinCodeRequestNegativeReply { address }
            | HciCommand::UserConfirmationRequestReply { address }
            | HciCommand::UserConfirmationRequestNegativeReply { address }
            | HciCommand::UserPasskeyRequestNegativeReply { address }
            | HciCommand::RemoteOobDataRequestNegativeReply { address } => packet.extend_from_slice(&address.0),
            HciCommand::AuthenticationRequested { handle } | HciCommand::LeLongTermKeyRequestNegativeReply { handle } => {
                packet.extend_from_slice(&handle.to_le_bytes())
            }
            HciCommand::IoCapabilityRequestReply {
                address,
                io_capability,
                oob_data_present,
                authentication_requirements,
            } => {
                packet.extend_from_slice(&address.0);
                packet.push(io_capability.into_val());
                packet.push(oob_data_present.into_val());
                packet.push(authentication_requirements.into_val());
            }
            HciCommand::IoCapabilityRequestNegativeReply { address, reason } => {
                packet.extend_from_slice(&address.0);
                packet.push(reason.into());
            }
            HciCommand::UserPasskeyRequestReply { address, passkey } => {
                packet.extend_from_slice(&address.0);
                packet.extend_from_slice(&passkey.to_le_bytes());
            }
            HciCommand::RemoteOobDataRequestReply { address, c, r } => {
                packet.extend_from_slice(&address.0);
                packet.extend_from_slice(&c);
                packet.extend_from_slice(&r);
            }
            HciCommand::RemoteOobExtendedDataRequestReply {
                address,
                c_192,
                r_192,
                c_256,
                r_256,
            } => {
                packet.extend_from_slice(&address.0);
                packet.extend_from_slice(&c_192);
                packet.extend_from_slice(&r_192);
                packet.extend_from_slice(&c_256);
                packet.extend_from_slice(&r_256);
            }
            HciCommand::DeleteStoredLinkKey { address } => {
                let (address, delete_all) = match address {
                    Some(address) => (address, 0),
                    None => (BluetoothDeviceAddress::zeroed(), 1),
                };

                packet.extend_from_slice(&address.0);
                packet.push(delete_all);
            }
            HciCommand::WriteSimplePairingMode { enabled } | HciCommand::WriteSecureConnectionsHostSupport { enabled } => {
                packet.push(enabled.into())
            }
            HciCommand::ReadLocalOobData => (),
            HciCommand::LeEnableEncryption {
                handle,
                random,
                ediv,
                long_term_key,
            } => {
                packet.extend_from_slice(&handle.to_le_bytes());
                packet.extend_from_slice(&random.to_le_bytes());
                packet.extend_from_slice(&ediv.to_le_bytes());
                packet.extend_from_slice(&long_term_key.to_le_bytes());
            }
            HciCommand::LeLongTermKeyRequestReply { handle, long_term_key } => {
                packet.extend_from_slice(&handle.to_le_bytes());
                packet.extend_from_slice(&long_term_key.to_le_bytes());
            }
        }

        packet[2] = (packet.len() - 3) as u8;

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_capability_response_event() {
        let packet = [0x32, 9, 1, 2, 3, 4, 5, 6, 3, 0, 4];

        let event = HciEvent::try_from_packet(&packet).unwrap();

        assert_eq!(
            HciEvent::IoCapabilityResponse {
                address: BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
                io_capability: ClassicIoCapability::NoInputNoOutput,
                oob_data_present: false,
                authentication_requirements: ClassicAuthRequirements::GeneralBonding,
            },
            event
        );

        assert_eq!(Some(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6])), event.get_address());
    }

    #[test]
    fn long_term_key_request_event() {
        let packet = [0x3E, 13, 0x05, 0x40, 0x00, 1, 0, 0, 0, 0, 0, 0, 0, 0x34, 0x12];

        assert_eq!(
            Ok(HciEvent::LeLongTermKeyRequest {
                handle: 0x40,
                random: 1,
                ediv: 0x1234,
            }),
            HciEvent::try_from_packet(&packet)
        );
    }

    #[test]
    fn bad_event_packets() {
        assert_eq!(Err(Error::Size), HciEvent::try_from_packet(&[0x17, 6, 1, 2, 3]));

        assert_eq!(Err(Error::UnknownEvent(0x05)), HciEvent::try_from_packet(&[0x05, 0]));
    }

    #[test]
    fn pin_code_reply_command() {
        let command = HciCommand::PinCodeRequestReply {
            address: BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
            pin: b"0000".to_vec(),
        };

        let packet = command.into_packet();

        assert_eq!([0x0D, 0x04, 23], packet[..3]);
        assert_eq!(4, packet[9]);
        assert_eq!(b"0000", &packet[10..14]);
        assert_eq!(26, packet.len());
    }

    #[test]
    fn delete_all_link_keys_command() {
        let packet = HciCommand::DeleteStoredLinkKey { address: None }.into_packet();

        assert_eq!(vec![0x12, 0x0C, 7, 0, 0, 0, 0, 0, 0, 1], packet);
    }

    #[test]
    fn link_key_types() {
        assert!(LinkKeyType::AuthenticatedCombinationP256.is_authenticated());
        assert!(!LinkKeyType::UnauthenticatedCombinationP256.is_authenticated());
        assert_eq!(
            SecurityLevel::UnauthenticatedSecureConnections,
            LinkKeyType::UnauthenticatedCombinationP256.security_level()
        );
    }
}
