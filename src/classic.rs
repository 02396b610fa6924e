//! BR/EDR (Classic) pairing
//!
//! Secure simple pairing for BR/EDR is done by the controller, the host only answers the security
//! events of the controller. A [`ClassicPairingHandler`] answers these events for one peer device
//! until the controller notifies the new link key (or fails the pairing).
//!
//! The events do not need to come in a particular order, the controller decides what is requested
//! from the host. The handler only checks that the answer of the user is for the request that was
//! sent to the user interface.

use crate::hci::{
    ClassicAuthRequirements, ClassicIoCapability, ClassicOobDataPresent, ConnectionHandle, ErrorCode, HciCommand,
    HciEvent, LinkKeyType,
};
use crate::le::{method, FailureReason, PairingFailure};
use crate::oob::ClassicOobData;
use crate::ui::{CompareValue, ConfirmationData, PasskeyOutput, UiInput, UiRequest};
use crate::{AddressWithType, BluetoothDeviceAddress};

/// The output of a classic pairing handler
pub trait ClassicContext {
    fn send_hci(&mut self, command: HciCommand);

    fn post_ui(&mut self, request: UiRequest);
}

/// The configuration of a classic pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassicPairingConfig {
    pub io_capability: ClassicIoCapability,
    pub authentication_requirements: ClassicAuthRequirements,
    /// Ask the user before pairing with a device that initiated pairing
    pub pairing_prompt: bool,
}

impl Default for ClassicPairingConfig {
    fn default() -> Self {
        ClassicPairingConfig {
            io_capability: ClassicIoCapability::DisplayYesNo,
            authentication_requirements: ClassicAuthRequirements::GeneralBonding,
            pairing_prompt: false,
        }
    }
}

/// The result of a successful classic pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassicPairingResult {
    pub peer: BluetoothDeviceAddress,
    pub link_key: [u8; 16],
    pub key_type: LinkKeyType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassicProgress {
    Pending,
    Complete(ClassicPairingResult),
    Failed(PairingFailure),
}

impl ClassicProgress {
    pub fn is_pending(&self) -> bool {
        matches!(self, ClassicProgress::Pending)
    }
}

/// The request sent to the user interface that is waiting for an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    PairingPrompt,
    Pin,
    Confirmation,
    Passkey,
}

/// The IO capability response of the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemoteCapabilities {
    io_capability: ClassicIoCapability,
    authentication_requirements: ClassicAuthRequirements,
}

/// The BR/EDR pairing handler of one peer device
#[derive(Debug)]
pub struct ClassicPairingHandler {
    peer: BluetoothDeviceAddress,
    config: ClassicPairingConfig,
    locally_initiated: bool,
    handle: Option<ConnectionHandle>,
    remote_p192_oob: Option<ClassicOobData>,
    remote_p256_oob: Option<ClassicOobData>,
    stored_link_key: Option<([u8; 16], LinkKeyType)>,
    remote: Option<RemoteCapabilities>,
    awaiting: Option<Awaiting>,
    replied_stored_key: bool,
    finished: bool,
}

impl ClassicPairingHandler {
    pub fn new(peer: BluetoothDeviceAddress, config: ClassicPairingConfig, locally_initiated: bool) -> Self {
        ClassicPairingHandler {
            peer,
            config,
            locally_initiated,
            handle: None,
            remote_p192_oob: None,
            remote_p256_oob: None,
            stored_link_key: None,
            remote: None,
            awaiting: None,
            replied_stored_key: false,
            finished: false,
        }
    }

    /// Set the OOB data received from the peer
    pub fn with_remote_oob_data(mut self, p192: Option<ClassicOobData>, p256: Option<ClassicOobData>) -> Self {
        self.remote_p192_oob = p192.filter(ClassicOobData::is_valid);
        self.remote_p256_oob = p256.filter(ClassicOobData::is_valid);
        self
    }

    /// Set the link key stored for the peer
    ///
    /// This key is given to the controller when it requests the link key.
    pub fn with_stored_link_key(mut self, key: Option<([u8; 16], LinkKeyType)>) -> Self {
        self.stored_link_key = key;
        self
    }

    pub fn get_peer(&self) -> BluetoothDeviceAddress {
        self.peer
    }

    pub fn get_handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    pub fn is_locally_initiated(&self) -> bool {
        self.locally_initiated
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn address(&self) -> AddressWithType {
        AddressWithType::public(self.peer)
    }

    fn confirmation_data(&self) -> ConfirmationData {
        ConfirmationData::new(self.address())
    }

    fn finish_failed(&mut self, reason: FailureReason, message: &str) -> ClassicProgress {
        log::info!("(SM classic) pairing with {} failed: {}", self.peer, message);

        self.finished = true;

        ClassicProgress::Failed(PairingFailure::new(reason, message))
    }

    /// Start authentication of the ACL link to the peer
    ///
    /// This is used by the initiator once the connection to the peer is established.
    pub fn authenticate<C: ClassicContext>(&mut self, ctx: &mut C, handle: ConnectionHandle) {
        if self.finished {
            return;
        }

        self.handle = Some(handle);

        log::info!("(SM classic) requesting authentication of {}", self.peer);

        ctx.send_hci(HciCommand::AuthenticationRequested { handle });
    }

    /// Process a HCI security event for the peer
    pub fn on_hci_event<C: ClassicContext>(&mut self, ctx: &mut C, event: &HciEvent) -> ClassicProgress {
        if self.finished {
            log::warn!("(SM classic) dropping event 0x{:02x} for finished pairing", event.event_code());

            return ClassicProgress::Pending;
        }

        match *event {
            HciEvent::LinkKeyRequest { address } => match self.stored_link_key {
                Some((link_key, _)) => {
                    self.replied_stored_key = true;

                    ctx.send_hci(HciCommand::LinkKeyRequestReply { address, link_key })
                }
                None => ctx.send_hci(HciCommand::LinkKeyRequestNegativeReply { address }),
            },
            HciEvent::PinCodeRequest { .. } => {
                ctx.post_ui(UiRequest::DisplayEnterPin(self.confirmation_data()));

                self.awaiting = Some(Awaiting::Pin);
            }
            HciEvent::IoCapabilityRequest { .. } => {
                if !self.locally_initiated && self.config.pairing_prompt {
                    ctx.post_ui(UiRequest::PairingPrompt(self.confirmation_data()));

                    self.awaiting = Some(Awaiting::PairingPrompt);
                } else {
                    self.io_capability_reply(ctx);
                }
            }
            HciEvent::IoCapabilityResponse {
                io_capability,
                oob_data_present,
                authentication_requirements,
                ..
            } => {
                log::info!(
                    "(SM classic) {} io capability: {:?}, {:?}, OOB data: {}",
                    self.peer,
                    io_capability,
                    authentication_requirements,
                    oob_data_present
                );

                self.remote = Some(RemoteCapabilities {
                    io_capability,
                    authentication_requirements,
                });
            }
            HciEvent::UserConfirmationRequest { address, numeric_value } => {
                if self.is_just_works() {
                    log::info!("(SM classic) accepting just works confirmation of {}", self.peer);

                    ctx.send_hci(HciCommand::UserConfirmationRequestReply { address });
                } else {
                    ctx.post_ui(UiRequest::DisplayYesNo(
                        self.confirmation_data(),
                        CompareValue(numeric_value % 1_000_000),
                    ));

                    self.awaiting = Some(Awaiting::Confirmation);
                }
            }
            HciEvent::UserPasskeyRequest { .. } => {
                ctx.post_ui(UiRequest::DisplayEnterPasskey(self.confirmation_data()));

                self.awaiting = Some(Awaiting::Passkey);
            }
            HciEvent::UserPasskeyNotification { passkey, .. } => {
                ctx.post_ui(UiRequest::DisplayPasskey(self.confirmation_data(), PasskeyOutput(passkey)));
            }
            HciEvent::KeypressNotification { notification_type, .. } => {
                log::info!("(SM classic) keypress notification {} from {}", notification_type, self.peer);
            }
            HciEvent::RemoteOobDataRequest { address } => self.remote_oob_data_reply(ctx, address),
            HciEvent::SimplePairingComplete { status, .. } => {
                if !status.is_ok() {
                    return self.finish_failed(FailureReason::Controller(status), "Simple pairing failed");
                }

                log::info!("(SM classic) simple pairing with {} complete", self.peer);
            }
            HciEvent::LinkKeyNotification { link_key, key_type, .. } => {
                log::info!("(SM classic) new link key of type {:?} for {}", key_type, self.peer);

                self.finished = true;

                return ClassicProgress::Complete(ClassicPairingResult {
                    peer: self.peer,
                    link_key,
                    key_type,
                });
            }
            HciEvent::AuthenticationComplete { status, .. } => {
                if !status.is_ok() {
                    return self.finish_failed(FailureReason::Controller(status), "Authentication failed");
                }

                // authentication with the stored link key does not generate a new key
                if let Some(progress) = self.complete_with_stored_key() {
                    return progress;
                }
            }
            HciEvent::EncryptionChange { status, enabled, .. } => {
                // the responder of an authentication with a stored key only sees the encryption
                if !self.replied_stored_key {
                    log::info!("(SM classic) ignoring encryption change during pairing with {}", self.peer);
                } else if !status.is_ok() {
                    return self.finish_failed(FailureReason::Controller(status), "Encryption failed");
                } else if enabled {
                    if let Some(progress) = self.complete_with_stored_key() {
                        return progress;
                    }
                }
            }
            HciEvent::ReadLocalOobDataComplete { .. }
            | HciEvent::LeLongTermKeyRequest { .. } => {
                log::warn!("(SM classic) event 0x{:02x} is not for a pairing handler", event.event_code())
            }
        }

        ClassicProgress::Pending
    }

    fn complete_with_stored_key(&mut self) -> Option<ClassicProgress> {
        match (self.replied_stored_key, self.stored_link_key) {
            (true, Some((link_key, key_type))) => {
                self.finished = true;

                Some(ClassicProgress::Complete(ClassicPairingResult {
                    peer: self.peer,
                    link_key,
                    key_type,
                }))
            }
            _ => None,
        }
    }

    pub(crate) fn on_ui_input<C: ClassicContext>(&mut self, ctx: &mut C, input: UiInput) -> ClassicProgress {
        if self.finished {
            return ClassicProgress::Pending;
        }

        let address = self.peer;

        match (self.awaiting.take(), input) {
            (Some(Awaiting::PairingPrompt), UiInput::PairingPromptAccepted(true)) => self.io_capability_reply(ctx),
            (Some(Awaiting::PairingPrompt), UiInput::PairingPromptAccepted(false)) => {
                ctx.send_hci(HciCommand::IoCapabilityRequestNegativeReply {
                    address,
                    reason: ErrorCode::PairingNotAllowed,
                });

                return self.finish_failed(FailureReason::UserRejected, "User said no");
            }
            (Some(Awaiting::Pin), UiInput::Pin(pin)) => {
                if (1..=16).contains(&pin.len()) {
                    ctx.send_hci(HciCommand::PinCodeRequestReply { address, pin })
                } else {
                    ctx.send_hci(HciCommand::PinCodeRequestNegativeReply { address });

                    return self.finish_failed(FailureReason::PasskeyEntryFailed, "Invalid PIN");
                }
            }
            (Some(Awaiting::Confirmation), UiInput::ConfirmYesNo(true)) => {
                ctx.send_hci(HciCommand::UserConfirmationRequestReply { address })
            }
            (Some(Awaiting::Confirmation), UiInput::ConfirmYesNo(false)) => {
                ctx.send_hci(HciCommand::UserConfirmationRequestNegativeReply { address });

                return self.finish_failed(FailureReason::UserRejected, "User rejected the numeric comparison");
            }
            (Some(Awaiting::Passkey), UiInput::Passkey(passkey)) => {
                if passkey <= method::PASSKEY_MAX {
                    ctx.send_hci(HciCommand::UserPasskeyRequestReply { address, passkey })
                } else {
                    ctx.send_hci(HciCommand::UserPasskeyRequestNegativeReply { address });

                    return self.finish_failed(FailureReason::PasskeyEntryFailed, "Invalid passkey");
                }
            }
            (awaiting, input) => {
                log::warn!(
                    "(SM classic) dropping user input {:?} for {}, awaiting {:?}",
                    input,
                    self.peer,
                    awaiting
                );

                self.awaiting = awaiting;
            }
        }

        ClassicProgress::Pending
    }

    pub fn on_pairing_prompt_accepted<C: ClassicContext>(&mut self, ctx: &mut C, accepted: bool) -> ClassicProgress {
        self.on_ui_input(ctx, UiInput::PairingPromptAccepted(accepted))
    }

    pub fn on_confirm_yes_no<C: ClassicContext>(&mut self, ctx: &mut C, confirmed: bool) -> ClassicProgress {
        self.on_ui_input(ctx, UiInput::ConfirmYesNo(confirmed))
    }

    pub fn on_passkey_entry<C: ClassicContext>(&mut self, ctx: &mut C, passkey: u32) -> ClassicProgress {
        self.on_ui_input(ctx, UiInput::Passkey(passkey))
    }

    pub fn on_pin_entry<C: ClassicContext>(&mut self, ctx: &mut C, pin: Vec<u8>) -> ClassicProgress {
        self.on_ui_input(ctx, UiInput::Pin(pin))
    }

    /// Cancel pairing
    ///
    /// No further HCI commands are sent by this handler.
    pub fn cancel(&mut self) -> ClassicProgress {
        if self.finished {
            ClassicProgress::Pending
        } else {
            self.finish_failed(FailureReason::Canceled, "Pairing canceled")
        }
    }

    pub fn on_connection_closed(&mut self) -> ClassicProgress {
        if self.finished {
            ClassicProgress::Pending
        } else {
            self.finish_failed(FailureReason::ConnectionClosed, "Connection closed")
        }
    }

    fn io_capability_reply<C: ClassicContext>(&mut self, ctx: &mut C) {
        let oob_data_present = match (self.remote_p192_oob.is_some(), self.remote_p256_oob.is_some()) {
            (false, false) => ClassicOobDataPresent::NotPresent,
            (true, false) => ClassicOobDataPresent::P192Present,
            (false, true) => ClassicOobDataPresent::P256Present,
            (true, true) => ClassicOobDataPresent::P192AndP256Present,
        };

        ctx.send_hci(HciCommand::IoCapabilityRequestReply {
            address: self.peer,
            io_capability: self.config.io_capability,
            oob_data_present,
            authentication_requirements: self.config.authentication_requirements,
        });
    }

    fn remote_oob_data_reply<C: ClassicContext>(&mut self, ctx: &mut C, address: BluetoothDeviceAddress) {
        match (self.remote_p192_oob, self.remote_p256_oob) {
            (p192, Some(p256)) => {
                let p192 = p192.unwrap_or_default();

                ctx.send_hci(HciCommand::RemoteOobExtendedDataRequestReply {
                    address,
                    c_192: p192.c,
                    r_192: p192.r,
                    c_256: p256.c,
                    r_256: p256.r,
                })
            }
            (Some(p192), None) => ctx.send_hci(HciCommand::RemoteOobDataRequestReply {
                address,
                c: p192.c,
                r: p192.r,
            }),
            (None, None) => ctx.send_hci(HciCommand::RemoteOobDataRequestNegativeReply { address }),
        }
    }

    /// Check if the association model is Just Works
    ///
    /// Just Works is used when neither device requires MITM protection or when one of the devices
    /// cannot both display a value and confirm it.
    fn is_just_works(&self) -> bool {
        let remote = match self.remote {
            Some(remote) => remote,
            None => return false,
        };

        let cannot_confirm =
            |io: ClassicIoCapability| matches!(io, ClassicIoCapability::DisplayOnly | ClassicIoCapability::NoInputNoOutput);

        (!self.config.authentication_requirements.is_mitm() && !remote.authentication_requirements.is_mitm())
            || cannot_confirm(self.config.io_capability)
            || cannot_confirm(remote.io_capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        commands: Vec<HciCommand>,
        requests: Vec<UiRequest>,
    }

    impl ClassicContext for Recorder {
        fn send_hci(&mut self, command: HciCommand) {
            self.commands.push(command)
        }

        fn post_ui(&mut self, request: UiRequest) {
            self.requests.push(request)
        }
    }

    const PEER: BluetoothDeviceAddress = BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]);

    fn io_response(io_capability: ClassicIoCapability, mitm: bool) -> HciEvent {
        HciEvent::IoCapabilityResponse {
            address: PEER,
            io_capability,
            oob_data_present: false,
            authentication_requirements: if mitm {
                ClassicAuthRequirements::GeneralBondingMitmProtection
            } else {
                ClassicAuthRequirements::GeneralBonding
            },
        }
    }

    #[test]
    fn just_works_confirmation_is_accepted() {
        let mut ctx = Recorder::default();

        let mut handler = ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), false);

        handler.on_hci_event(&mut ctx, &HciEvent::IoCapabilityRequest { address: PEER });

        handler.on_hci_event(&mut ctx, &io_response(ClassicIoCapability::NoInputNoOutput, false));

        handler.on_hci_event(
            &mut ctx,
            &HciEvent::UserConfirmationRequest {
                address: PEER,
                numeric_value: 123456,
            },
        );

        assert!(ctx.requests.is_empty());

        assert_eq!(
            vec![
                HciCommand::IoCapabilityRequestReply {
                    address: PEER,
                    io_capability: ClassicIoCapability::DisplayYesNo,
                    oob_data_present: ClassicOobDataPresent::NotPresent,
                    authentication_requirements: ClassicAuthRequirements::GeneralBonding,
                },
                HciCommand::UserConfirmationRequestReply { address: PEER },
            ],
            ctx.commands
        );

        let progress = handler.on_hci_event(
            &mut ctx,
            &HciEvent::LinkKeyNotification {
                address: PEER,
                link_key: [7; 16],
                key_type: LinkKeyType::UnauthenticatedCombinationP256,
            },
        );

        assert_eq!(
            ClassicProgress::Complete(ClassicPairingResult {
                peer: PEER,
                link_key: [7; 16],
                key_type: LinkKeyType::UnauthenticatedCombinationP256,
            }),
            progress
        );
    }

    #[test]
    fn numeric_comparison_rejected() {
        let mut ctx = Recorder::default();

        let config = ClassicPairingConfig {
            authentication_requirements: ClassicAuthRequirements::GeneralBondingMitmProtection,
            ..Default::default()
        };

        let mut handler = ClassicPairingHandler::new(PEER, config, true);

        handler.on_hci_event(&mut ctx, &io_response(ClassicIoCapability::DisplayYesNo, true));

        handler.on_hci_event(
            &mut ctx,
            &HciEvent::UserConfirmationRequest {
                address: PEER,
                numeric_value: 1_012_345,
            },
        );

        assert_eq!(
            vec![UiRequest::DisplayYesNo(
                ConfirmationData::new(AddressWithType::public(PEER)),
                CompareValue(12_345)
            )],
            ctx.requests
        );

        let progress = handler.on_confirm_yes_no(&mut ctx, false);

        assert!(matches!(progress, ClassicProgress::Failed(f) if f.get_reason() == FailureReason::UserRejected));

        assert_eq!(
            Some(&HciCommand::UserConfirmationRequestNegativeReply { address: PEER }),
            ctx.commands.last()
        );
    }

    #[test]
    fn stored_link_key() {
        let mut ctx = Recorder::default();

        let key = ([9; 16], LinkKeyType::AuthenticatedCombinationP256);

        let mut handler =
            ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), true).with_stored_link_key(Some(key));

        handler.authenticate(&mut ctx, 0x40);

        handler.on_hci_event(&mut ctx, &HciEvent::LinkKeyRequest { address: PEER });

        let progress = handler.on_hci_event(
            &mut ctx,
            &HciEvent::AuthenticationComplete {
                status: ErrorCode::NoError,
                handle: 0x40,
            },
        );

        assert_eq!(
            vec![
                HciCommand::AuthenticationRequested { handle: 0x40 },
                HciCommand::LinkKeyRequestReply {
                    address: PEER,
                    link_key: [9; 16]
                },
            ],
            ctx.commands
        );

        assert!(matches!(progress, ClassicProgress::Complete(r) if r.link_key == [9; 16]));
    }

    #[test]
    fn stored_link_key_responder() {
        let mut ctx = Recorder::default();

        let key = ([5; 16], LinkKeyType::UnauthenticatedCombinationP256);

        let mut handler =
            ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), false).with_stored_link_key(Some(key));

        let progress = handler.on_hci_event(&mut ctx, &HciEvent::LinkKeyRequest { address: PEER });

        assert!(progress.is_pending());

        let progress = handler.on_hci_event(
            &mut ctx,
            &HciEvent::EncryptionChange {
                status: ErrorCode::NoError,
                handle: 0x41,
                enabled: true,
            },
        );

        assert!(matches!(progress, ClassicProgress::Complete(r) if r.link_key == [5; 16]));
    }

    #[test]
    fn encryption_failure_after_stored_link_key() {
        let mut ctx = Recorder::default();

        let key = ([5; 16], LinkKeyType::UnauthenticatedCombinationP256);

        let mut handler =
            ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), false).with_stored_link_key(Some(key));

        handler.on_hci_event(&mut ctx, &HciEvent::LinkKeyRequest { address: PEER });

        let progress = handler.on_hci_event(
            &mut ctx,
            &HciEvent::EncryptionChange {
                status: ErrorCode::AuthenticationFailure,
                handle: 0x41,
                enabled: false,
            },
        );

        assert!(matches!(
            progress,
            ClassicProgress::Failed(f) if f.get_reason() == FailureReason::Controller(ErrorCode::AuthenticationFailure)
        ));
    }

    #[test]
    fn pin_entry() {
        let mut ctx = Recorder::default();

        let mut handler = ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), false);

        handler.on_hci_event(&mut ctx, &HciEvent::PinCodeRequest { address: PEER });

        assert_eq!(
            vec![UiRequest::DisplayEnterPin(ConfirmationData::new(AddressWithType::public(PEER)))],
            ctx.requests
        );

        assert!(handler.on_pin_entry(&mut ctx, b"0000".to_vec()).is_pending());

        assert_eq!(
            vec![HciCommand::PinCodeRequestReply {
                address: PEER,
                pin: b"0000".to_vec()
            }],
            ctx.commands
        );
    }

    #[test]
    fn canceled_handler_is_silent() {
        let mut ctx = Recorder::default();

        let mut handler = ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), false);

        assert!(matches!(handler.cancel(), ClassicProgress::Failed(f) if f.get_reason() == FailureReason::Canceled));

        assert!(handler
            .on_hci_event(&mut ctx, &HciEvent::IoCapabilityRequest { address: PEER })
            .is_pending());

        assert!(ctx.commands.is_empty());
    }

    #[test]
    fn extended_oob_reply() {
        let mut ctx = Recorder::default();

        let p256 = ClassicOobData::new([1; 16], [2; 16]);

        let mut handler = ClassicPairingHandler::new(PEER, ClassicPairingConfig::default(), true)
            .with_remote_oob_data(Some(ClassicOobData::default()), Some(p256));

        handler.on_hci_event(&mut ctx, &HciEvent::IoCapabilityRequest { address: PEER });

        handler.on_hci_event(&mut ctx, &HciEvent::RemoteOobDataRequest { address: PEER });

        assert_eq!(
            vec![
                HciCommand::IoCapabilityRequestReply {
                    address: PEER,
                    io_capability: ClassicIoCapability::DisplayYesNo,
                    oob_data_present: ClassicOobDataPresent::P256Present,
                    authentication_requirements: ClassicAuthRequirements::GeneralBonding,
                },
                HciCommand::RemoteOobExtendedDataRequestReply {
                    address: PEER,
                    c_192: [0; 16],
                    r_192: [0; 16],
                    c_256: [1; 16],
                    r_256: [2; 16],
                },
            ],
            ctx.commands
        );
    }
}
