//! Security Manager Protocol
//!
//! These are the commands sent over the LE security manager L2CAP channel. Every command is a
//! single PDU consisting of the command code followed by the command's data. The format of each
//! command is defined in the Bluetooth Specification (v5.0 | Vol 3, Part H, section 3).
//!
//! A received PDU is converted into a [`SmpPdu`] with [`SmpPdu::try_from_bytes`], and a PDU is
//! created for sending with [`SmpPdu::into_bytes`].

use crate::Error;

pub mod encrypt_info;
pub mod pairing;

pub use encrypt_info::{
    CentralIdentification, EncryptionInformation, IdentityAddressInformation, IdentityInformation,
    SigningInformation,
};
pub use pairing::{
    AuthReq, IoCapability, KeyDistributions, KeyPressNotification, OobDataFlag, PairingConfirm, PairingDhKeyCheck,
    PairingFailed, PairingFailedReason, PairingFeatures, PairingPubKey, PairingRandom, SecurityRequest,
};

/// The fixed L2CAP channel identifier for the Security Manager on a LE-U logical link
pub const L2CAP_CHANNEL_ID: u16 = 0x6;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CommandType {
    PairingRequest,
    PairingResponse,
    PairingConfirm,
    PairingRandom,
    PairingFailed,
    EncryptionInformation,
    CentralIdentification,
    IdentityInformation,
    IdentityAddressInformation,
    SigningInformation,
    SecurityRequest,
    PairingPublicKey,
    PairingDHKeyCheck,
    PairingKeyPressNotification,
}

impl CommandType {
    pub fn into_val(self) -> u8 {
        match self {
            CommandType::PairingRequest => 0x1,
            CommandType::PairingResponse => 0x2,
            CommandType::PairingConfirm => 0x3,
            CommandType::PairingRandom => 0x4,
            CommandType::PairingFailed => 0x5,
            CommandType::EncryptionInformation => 0x6,
            CommandType::CentralIdentification => 0x7,
            CommandType::IdentityInformation => 0x8,
            CommandType::IdentityAddressInformation => 0x9,
            CommandType::SigningInformation => 0xa,
            CommandType::SecurityRequest => 0xb,
            CommandType::PairingPublicKey => 0xc,
            CommandType::PairingDHKeyCheck => 0xd,
            CommandType::PairingKeyPressNotification => 0xe,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(CommandType::PairingRequest),
            0x2 => Ok(CommandType::PairingResponse),
            0x3 => Ok(CommandType::PairingConfirm),
            0x4 => Ok(CommandType::PairingRandom),
            0x5 => Ok(CommandType::PairingFailed),
            0x6 => Ok(CommandType::EncryptionInformation),
            0x7 => Ok(CommandType::CentralIdentification),
            0x8 => Ok(CommandType::IdentityInformation),
            0x9 => Ok(CommandType::IdentityAddressInformation),
            0xa => Ok(CommandType::SigningInformation),
            0xb => Ok(CommandType::SecurityRequest),
            0xc => Ok(CommandType::PairingPublicKey),
            0xd => Ok(CommandType::PairingDHKeyCheck),
            0xe => Ok(CommandType::PairingKeyPressNotification),
            _ => Err(Error::Value),
        }
    }

    /// The length of the PDU for this command
    ///
    /// This includes the byte for the command code.
    pub fn pdu_len(self) -> usize {
        match self {
            CommandType::PairingRequest | CommandType::PairingResponse => 7,
            CommandType::PairingConfirm | CommandType::PairingRandom => 17,
            CommandType::PairingFailed => 2,
            CommandType::EncryptionInformation => 17,
            CommandType::CentralIdentification => 11,
            CommandType::IdentityInformation => 17,
            CommandType::IdentityAddressInformation => 8,
            CommandType::SigningInformation => 17,
            CommandType::SecurityRequest => 2,
            CommandType::PairingPublicKey => 65,
            CommandType::PairingDHKeyCheck => 17,
            CommandType::PairingKeyPressNotification => 2,
        }
    }
}

impl core::fmt::Display for CommandType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            CommandType::PairingRequest => f.write_str("pairing request"),
            CommandType::PairingResponse => f.write_str("pairing response"),
            CommandType::PairingConfirm => f.write_str("pairing confirm"),
            CommandType::PairingRandom => f.write_str("pairing random"),
            CommandType::PairingFailed => f.write_str("pairing failed"),
            CommandType::EncryptionInformation => f.write_str("encryption information"),
            CommandType::CentralIdentification => f.write_str("central identification"),
            CommandType::IdentityInformation => f.write_str("identity information"),
            CommandType::IdentityAddressInformation => f.write_str("identity address information"),
            CommandType::SigningInformation => f.write_str("signing information"),
            CommandType::SecurityRequest => f.write_str("security request"),
            CommandType::PairingPublicKey => f.write_str("pairing public key"),
            CommandType::PairingDHKeyCheck => f.write_str("pairing Diffie Hellman key check"),
            CommandType::PairingKeyPressNotification => f.write_str("pairing key press notification"),
        }
    }
}

/// Command Data
///
/// A trait for converting to or from the format within a Security Manager Command PDU. The format
/// does not include the command code.
pub trait CommandData
where
    Self: Sized,
{
    /// Convert into command data
    fn into_command_format(self) -> Vec<u8>;

    /// Try to convert from command data
    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error>;
}

/// A command code along with the command's data
pub struct Command<D> {
    command_type: CommandType,
    data: D,
}

impl<D> Command<D> {
    pub fn new(command_type: CommandType, data: D) -> Self {
        Command { command_type, data }
    }

    pub fn get_command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn into_data(self) -> D {
        self.data
    }
}

impl<D> CommandData for Command<D>
where
    D: CommandData,
{
    fn into_command_format(self) -> Vec<u8> {
        let mut data = self.data.into_command_format();

        data.insert(0, self.command_type.into_val());

        data
    }

    fn try_from_command_format(icd: &[u8]) -> Result<Self, Error> {
        let (code, data) = icd.split_first().ok_or(Error::Size)?;

        Ok(Command {
            command_type: CommandType::try_from_val(*code)?,
            data: D::try_from_command_format(data)?,
        })
    }
}

/// A Security Manager Protocol data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpPdu {
    PairingRequest(PairingFeatures),
    PairingResponse(PairingFeatures),
    PairingConfirm(PairingConfirm),
    PairingRandom(PairingRandom),
    PairingFailed(PairingFailed),
    EncryptionInformation(EncryptionInformation),
    CentralIdentification(CentralIdentification),
    IdentityInformation(IdentityInformation),
    IdentityAddressInformation(IdentityAddressInformation),
    SigningInformation(SigningInformation),
    SecurityRequest(SecurityRequest),
    PairingPublicKey(PairingPubKey),
    PairingDhKeyCheck(PairingDhKeyCheck),
    KeyPressNotification(KeyPressNotification),
}

impl SmpPdu {
    pub fn command_type(&self) -> CommandType {
        match self {
            SmpPdu::PairingRequest(_) => CommandType::PairingRequest,
            SmpPdu::PairingResponse(_) => CommandType::PairingResponse,
            SmpPdu::PairingConfirm(_) => CommandType::PairingConfirm,
            SmpPdu::PairingRandom(_) => CommandType::PairingRandom,
            SmpPdu::PairingFailed(_) => CommandType::PairingFailed,
            SmpPdu::EncryptionInformation(_) => CommandType::EncryptionInformation,
            SmpPdu::CentralIdentification(_) => CommandType::CentralIdentification,
            SmpPdu::IdentityInformation(_) => CommandType::IdentityInformation,
            SmpPdu::IdentityAddressInformation(_) => CommandType::IdentityAddressInformation,
            SmpPdu::SigningInformation(_) => CommandType::SigningInformation,
            SmpPdu::SecurityRequest(_) => CommandType::SecurityRequest,
            SmpPdu::PairingPublicKey(_) => CommandType::PairingPublicKey,
            SmpPdu::PairingDhKeyCheck(_) => CommandType::PairingDHKeyCheck,
            SmpPdu::KeyPressNotification(_) => CommandType::PairingKeyPressNotification,
        }
    }

    /// Try to create a `SmpPdu` from the payload of a security manager L2CAP frame
    ///
    /// This rigidly checks the length of the PDU. An error is returned if the command code is
    /// unknown, if the length of the PDU is not the length of the command, or a field of the
    /// command has an invalid value.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let command_type = CommandType::try_from_val(*bytes.first().ok_or(Error::Size)?)?;

        if bytes.len() != command_type.pdu_len() {
            log::error!(
                "(SM) invalid length of {} bytes for a {} PDU",
                bytes.len(),
                command_type
            );

            return Err(Error::Size);
        }

        let data = &bytes[1..];

        let pdu = match command_type {
            CommandType::PairingRequest => SmpPdu::PairingRequest(PairingFeatures::try_from_command_format(data)?),
            CommandType::PairingResponse => SmpPdu::PairingResponse(PairingFeatures::try_from_command_format(data)?),
            CommandType::PairingConfirm => SmpPdu::PairingConfirm(PairingConfirm::try_from_command_format(data)?),
            CommandType::PairingRandom => SmpPdu::PairingRandom(PairingRandom::try_from_command_format(data)?),
            CommandType::PairingFailed => SmpPdu::PairingFailed(PairingFailed::try_from_command_format(data)?),
            CommandType::EncryptionInformation => {
                SmpPdu::EncryptionInformation(EncryptionInformation::try_from_command_format(data)?)
            }
            CommandType::CentralIdentification => {
                SmpPdu::CentralIdentification(CentralIdentification::try_from_command_format(data)?)
            }
            CommandType::IdentityInformation => {
                SmpPdu::IdentityInformation(IdentityInformation::try_from_command_format(data)?)
            }
            CommandType::IdentityAddressInformation => {
                SmpPdu::IdentityAddressInformation(IdentityAddressInformation::try_from_command_format(data)?)
            }
            CommandType::SigningInformation => {
                SmpPdu::SigningInformation(SigningInformation::try_from_command_format(data)?)
            }
            CommandType::SecurityRequest => SmpPdu::SecurityRequest(SecurityRequest::try_from_command_format(data)?),
            CommandType::PairingPublicKey => SmpPdu::PairingPublicKey(PairingPubKey::try_from_command_format(data)?),
            CommandType::PairingDHKeyCheck => {
                SmpPdu::PairingDhKeyCheck(PairingDhKeyCheck::try_from_command_format(data)?)
            }
            CommandType::PairingKeyPressNotification => {
                SmpPdu::KeyPressNotification(KeyPressNotification::try_from_command_format(data)?)
            }
        };

        Ok(pdu)
    }

    /// Convert into the bytes of the PDU
    pub fn into_bytes(self) -> Vec<u8> {
        let command_type = self.command_type();

        match self {
            SmpPdu::PairingRequest(d) | SmpPdu::PairingResponse(d) => {
                Command::new(command_type, d).into_command_format()
            }
            SmpPdu::PairingConfirm(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::PairingRandom(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::PairingFailed(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::EncryptionInformation(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::CentralIdentification(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::IdentityInformation(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::IdentityAddressInformation(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::SigningInformation(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::SecurityRequest(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::PairingPublicKey(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::PairingDhKeyCheck(d) => Command::new(command_type, d).into_command_format(),
            SmpPdu::KeyPressNotification(d) => Command::new(command_type, d).into_command_format(),
        }
    }
}
