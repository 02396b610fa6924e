//! User interface requests
//!
//! Most of the methods for protection against a man in the middle require the user. Whenever
//! pairing needs the user a [`UiRequest`] is posted to the user interface handler set with
//! [`SecurityManager::set_user_interface_handler`]. The user's answer is given back to the security
//! manager through one of the methods `on_pairing_prompt_accepted`, `on_confirm_yes_no`,
//! `on_passkey_entry`, or `on_pin_entry`.
//!
//! [`SecurityManager::set_user_interface_handler`]: crate::SecurityManager::set_user_interface_handler

use crate::AddressWithType;

/// A request to the user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiRequest {
    /// Ask the user if pairing with the device should be allowed
    ///
    /// The answer is given with `on_pairing_prompt_accepted`.
    PairingPrompt(ConfirmationData),
    /// Display the compare value and ask the user if it matches the value on the peer device
    ///
    /// The answer is given with `on_confirm_yes_no`.
    DisplayYesNo(ConfirmationData, CompareValue),
    /// Display the passkey that the user must enter on the peer device
    ///
    /// No answer is expected.
    DisplayPasskey(ConfirmationData, PasskeyOutput),
    /// Ask the user to enter the passkey displayed on the peer device
    ///
    /// The answer is given with `on_passkey_entry`.
    DisplayEnterPasskey(ConfirmationData),
    /// Ask the user for the PIN of a legacy BR/EDR device
    ///
    /// The answer is given with `on_pin_entry`.
    DisplayEnterPin(ConfirmationData),
    /// Any prompt shown for this device must be removed
    Cancel(AddressWithType),
}

impl UiRequest {
    pub fn get_address(&self) -> AddressWithType {
        match self {
            UiRequest::PairingPrompt(data)
            | UiRequest::DisplayYesNo(data, _)
            | UiRequest::DisplayPasskey(data, _)
            | UiRequest::DisplayEnterPasskey(data)
            | UiRequest::DisplayEnterPin(data) => data.address,
            UiRequest::Cancel(address) => *address,
        }
    }
}

/// The device information shown along with a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationData {
    pub address: AddressWithType,
    /// The name of the device, if one is known
    pub name: Option<String>,
}

impl ConfirmationData {
    pub fn new(address: AddressWithType) -> Self {
        ConfirmationData { address, name: None }
    }
}

/// The compare value used for numeric comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareValue(pub(crate) u32);

impl CompareValue {
    /// Create the six digit value from the output of [`g2`](crate::toolbox::g2)
    pub(crate) fn from_g2(g2: u32) -> Self {
        CompareValue(g2 % 1_000_000)
    }

    pub fn get_value(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for CompareValue {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Output of a Passkey
///
/// The passkey is generated by the security manager, the user then enters it on the other device.
///
/// ```
/// # use bo_tie_security::ui::PasskeyOutput;
/// fn display_passkey(p: PasskeyOutput) {
///     println!("please enter this passkey on the other device: {}", p);
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasskeyOutput(pub(crate) u32);

impl PasskeyOutput {
    pub fn get_passkey(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for PasskeyOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Passkey input from the application user
///
/// This is a helper for building the passkey given to `on_passkey_entry` from the digits typed by
/// the user. *The user must enter the passkey from left to right, the most significant digit must
/// be the first digit entered*.
#[derive(Debug, Default, Clone)]
pub struct PasskeyInput {
    passkey: [char; 6],
    count: usize,
}

impl PasskeyInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to the passkey
    ///
    /// # Error
    /// An error is returned if six digits are already in the passkey or input `key` is not a digit
    /// character.
    pub fn add(&mut self, key: char) -> Result<(), PasskeyError> {
        if !key.is_ascii_digit() {
            return Err(PasskeyError::NotADigit(key));
        }

        *self.passkey.get_mut(self.count).ok_or(PasskeyError::TooManyKeys(key))? = key;

        self.count += 1;

        Ok(())
    }

    /// Remove a key from the passkey
    ///
    /// # Error
    /// The index must be the index of a key already added to this `PasskeyInput`.
    pub fn remove(&mut self, index: usize) -> Result<(), PasskeyError> {
        if index < self.count {
            self.passkey[index..self.count].rotate_left(1);
            self.count -= 1;
            Ok(())
        } else {
            Err(PasskeyError::InvalidKeyPosition(index))
        }
    }

    /// Clear the passkey
    pub fn clear(&mut self) {
        self.count = 0;
    }

    /// Passkey completed
    ///
    /// # Error
    /// The passkey must be a complete six digit number.
    pub fn complete(self) -> Result<u32, PasskeyError> {
        if self.count != 6 {
            return Err(PasskeyError::PasskeyIncomplete);
        }

        Ok(self
            .passkey
            .iter()
            .filter_map(|digit| digit.to_digit(10))
            .fold(0, |sum, digit| sum * 10 + digit))
    }
}

/// Passkey error
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PasskeyError {
    NotADigit(char),
    TooManyKeys(char),
    InvalidKeyPosition(usize),
    PasskeyIncomplete,
}

impl core::fmt::Display for PasskeyError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PasskeyError::NotADigit(c) => write!(f, "non-digit entered in passkey ({})", c),
            PasskeyError::TooManyKeys(c) => write!(f, "too many keys entered for passkey ({})", c),
            PasskeyError::InvalidKeyPosition(p) => write!(f, "cannot erase key at position ({})", p),
            PasskeyError::PasskeyIncomplete => f.write_str("full passkey not entered"),
        }
    }
}

impl std::error::Error for PasskeyError {}

/// The input of the user
///
/// This is what the user interface methods of the security manager give to a waiting pairing
/// handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiInput {
    PairingPromptAccepted(bool),
    ConfirmYesNo(bool),
    Passkey(u32),
    Pin(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_six_digits() {
        assert_eq!("000042", CompareValue::from_g2(42).to_string());

        // the g2 test data of the Bluetooth Specification
        assert_eq!("938554", CompareValue::from_g2(0x2f9e_d5ba).to_string());

        assert_eq!("001234", PasskeyOutput(1234).to_string());
    }

    #[test]
    fn passkey_input() {
        let mut input = PasskeyInput::new();

        for c in "123456".chars() {
            input.add(c).unwrap();
        }

        assert_eq!(Err(PasskeyError::TooManyKeys('7')), input.add('7'));

        input.remove(0).unwrap();

        assert_eq!(Err(PasskeyError::PasskeyIncomplete), input.clone().complete());

        input.add('0').unwrap();

        assert_eq!(Ok(234560), input.complete());
    }

    #[test]
    fn passkey_input_rejects_letters() {
        let mut input = PasskeyInput::new();

        assert_eq!(Err(PasskeyError::NotADigit('a')), input.add('a'));

        input.add('9').unwrap();

        input.clear();

        assert_eq!(Err(PasskeyError::PasskeyIncomplete), input.complete());
    }
}
