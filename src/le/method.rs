//! Pairing method selection
//!
//! The method is chosen from the pairing request and the pairing response. Both devices run the
//! same selection and end up with the same method.

use crate::smp::{IoCapability, PairingFeatures};
use crate::Role;

/// The association model used for phase 2 of pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMethod {
    JustWorks,
    NumericComparison,
    PasskeyEntry,
    OutOfBand,
}

impl PairingMethod {
    pub fn is_just_works(&self) -> bool {
        matches!(self, PairingMethod::JustWorks)
    }
}

impl core::fmt::Display for PairingMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PairingMethod::JustWorks => f.write_str("just works"),
            PairingMethod::NumericComparison => f.write_str("numeric comparison"),
            PairingMethod::PasskeyEntry => f.write_str("passkey entry"),
            PairingMethod::OutOfBand => f.write_str("out of band"),
        }
    }
}

/// What this device does with the passkey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasskeyRole {
    /// Generate and display the passkey
    Display,
    /// The user enters the passkey
    Enter,
}

fn is_display_yes_no_or_keyboard_display(io: IoCapability) -> bool {
    matches!(io, IoCapability::DisplayWithYesOrNo | IoCapability::KeyboardDisplay)
}

fn is_display_only_or_display_yes_no(io: IoCapability) -> bool {
    matches!(io, IoCapability::DisplayOnly | IoCapability::DisplayWithYesOrNo)
}

/// Select the LE Secure Connections pairing method
///
/// The rules are evaluated in order, the first one to match selects the method.
/// 1. Neither device requires MITM protection: Just Works
/// 2. Either device has OOB data: Out of Band
/// 3. Both are DisplayYesNo or KeyboardDisplay: Numeric Comparison
/// 4. Either is NoInputNoOutput: Just Works
/// 5. Both are DisplayOnly or DisplayYesNo: Just Works
/// 6. Passkey Entry
pub fn select_secure_connections(request: &PairingFeatures, response: &PairingFeatures) -> PairingMethod {
    let initiator = request.get_io_capability();
    let responder = response.get_io_capability();

    if !request.get_auth_req().mitm() && !response.get_auth_req().mitm() {
        PairingMethod::JustWorks
    } else if request.get_oob_data_flag().is_present() || response.get_oob_data_flag().is_present() {
        PairingMethod::OutOfBand
    } else if is_display_yes_no_or_keyboard_display(initiator) && is_display_yes_no_or_keyboard_display(responder) {
        PairingMethod::NumericComparison
    } else if initiator.no_io_capability() || responder.no_io_capability() {
        PairingMethod::JustWorks
    } else if is_display_only_or_display_yes_no(initiator) && is_display_only_or_display_yes_no(responder) {
        PairingMethod::JustWorks
    } else {
        PairingMethod::PasskeyEntry
    }
}

/// Select the LE legacy pairing method
///
/// Out of band is only selected when both devices have OOB data. Numeric comparison does not exist
/// for legacy pairing, a pair of devices that would use it in secure connections use Passkey Entry
/// (or Just Works when both are DisplayYesNo).
pub fn select_legacy(request: &PairingFeatures, response: &PairingFeatures) -> PairingMethod {
    let initiator = request.get_io_capability();
    let responder = response.get_io_capability();

    if request.get_oob_data_flag().is_present() && response.get_oob_data_flag().is_present() {
        PairingMethod::OutOfBand
    } else if !request.get_auth_req().mitm() && !response.get_auth_req().mitm() {
        PairingMethod::JustWorks
    } else if initiator.no_io_capability() || responder.no_io_capability() {
        PairingMethod::JustWorks
    } else if is_display_only_or_display_yes_no(initiator) && is_display_only_or_display_yes_no(responder) {
        PairingMethod::JustWorks
    } else {
        PairingMethod::PasskeyEntry
    }
}

/// Get the passkey role of this device
///
/// When both devices are KeyboardOnly the user enters the same passkey on both. `None` is
/// returned for a pair of capabilities that never selects Passkey Entry.
pub fn passkey_role(local: IoCapability, remote: IoCapability, role: Role) -> Option<PasskeyRole> {
    use IoCapability::*;

    match (local, remote) {
        (KeyboardOnly, KeyboardOnly) => Some(PasskeyRole::Enter),
        (DisplayOnly, _) | (_, KeyboardOnly) => Some(PasskeyRole::Display),
        (KeyboardOnly, _) | (_, DisplayOnly) => Some(PasskeyRole::Enter),
        (DisplayWithYesOrNo, KeyboardDisplay) => Some(PasskeyRole::Display),
        (KeyboardDisplay, DisplayWithYesOrNo) => Some(PasskeyRole::Enter),
        (KeyboardDisplay, KeyboardDisplay) => match role {
            Role::Central => Some(PasskeyRole::Display),
            Role::Peripheral => Some(PasskeyRole::Enter),
        },
        _ => None,
    }
}

/// The largest valid passkey
pub const PASSKEY_MAX: u32 = 999_999;

/// Create a passkey from a random value
///
/// The value is cut to 20 bits and then shifted right until it is six digits.
pub fn passkey_from_random(random: u32) -> u32 {
    let mut passkey = random & 0xF_FFFF;

    while passkey > PASSKEY_MAX {
        passkey >>= 1;
    }

    passkey
}

/// Number of rounds of Passkey Entry
pub const PASSKEY_ROUNDS: usize = 20;

/// Get `ri` for the passkey round `round`
///
/// This is `0x80` with bit `round` of the passkey as the least significant bit.
pub fn passkey_round_bit(passkey: u32, round: usize) -> u8 {
    0x80 | ((passkey >> round) & 1) as u8
}
