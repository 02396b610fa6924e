//! LE Pairing
//!
//! A [`LePairingHandler`] is the state machine for pairing with one peer device over a LE link. The
//! handler does not block or own any execution context. Every input (a received security manager
//! PDU, an answer of the user, a link encryption event) is given to the handler through one of its
//! `on_*` methods, the input is queued in the handler's inbox and then the handler is run until it
//! needs an input that has not yet arrived. Output is sent through the [`PairingContext`] given with
//! the input.
//!
//! # Phases
//! 1. The pairing request and pairing response are exchanged. The features within them decide
//!    whether LE Secure Connections or LE legacy pairing is used, the pairing method, the
//!    encryption key size, and which keys are distributed.
//! 2. For LE Secure Connections the public keys are exchanged, stage 1 authenticates the public
//!    keys with the pairing method, and stage 2 checks that both devices calculated the same
//!    DHKey. For LE legacy pairing the temporary key is confirmed and the short term key is
//!    generated.
//! 3. The link is encrypted and the keys are distributed, the responder distributes first.
//!
//! Every step that waits for a PDU checks that the next PDU of the inbox is the expected command,
//! any other command fails pairing.

mod distribution;
mod legacy;
pub mod method;
mod secure_connections;

pub use method::{PairingMethod, PasskeyRole};

use crate::hci::{ConnectionHandle, ErrorCode, HciCommand};
use crate::oob::{LeOobData, RemoteLeOobData};
use crate::smp::{
    AuthReq, CommandType, IoCapability, KeyDistributions, OobDataFlag, PairingFailed, PairingFailedReason,
    PairingFeatures, SecurityRequest, SmpPdu,
};
use crate::toolbox::{DhKey, EcdhKeyPair, EcdhPublicKey, PairingAddress};
use crate::ui::{ConfirmationData, PasskeyOutput, UiInput, UiRequest};
use crate::{AddressType, AddressWithType, IdentityAddress, Role, SecurityLevel};
use rand_core::{CryptoRng, RngCore};
use std::collections::VecDeque;

/// The output of a pairing handler
///
/// This is implemented by the owner of the pairing handler (normally the
/// [`SecurityManager`](crate::SecurityManager)).
pub trait PairingContext {
    type Rng: CryptoRng + RngCore;

    /// Send a security manager PDU to `peer`
    fn send_smp(&mut self, peer: &AddressWithType, pdu: Vec<u8>);

    /// Send a HCI command to the controller
    fn send_hci(&mut self, command: HciCommand);

    /// Post a request to the user interface
    fn post_ui(&mut self, request: UiRequest);

    fn rng(&mut self) -> &mut Self::Rng;
}

/// Information on the LE link that pairing is done over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeLinkInfo {
    /// The connection address of the peer device
    pub peer: AddressWithType,
    /// The connection address of this device
    pub local: AddressWithType,
    /// The role of this device
    pub role: Role,
    pub handle: ConnectionHandle,
    /// The identity address distributed by this device
    pub local_identity: IdentityAddress,
    /// The identity resolving key distributed by this device
    pub local_irk: u128,
}

/// The pairing features of this device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LePairingConfig {
    pub io_capability: IoCapability,
    pub auth_req: AuthReq,
    pub max_encryption_size: u8,
    /// This device has OOB data of the peer device
    pub oob_data_present: bool,
    pub initiator_key_distribution: KeyDistributions,
    pub responder_key_distribution: KeyDistributions,
    /// Ask the user before answering a pairing request
    pub pairing_prompt: bool,
}

impl Default for LePairingConfig {
    fn default() -> Self {
        let key_distribution = KeyDistributions::from_val(0x07);

        LePairingConfig {
            io_capability: IoCapability::KeyboardDisplay,
            auth_req: AuthReq::new(true, true, true, false),
            max_encryption_size: 16,
            oob_data_present: false,
            initiator_key_distribution: key_distribution,
            responder_key_distribution: key_distribution,
            pairing_prompt: false,
        }
    }
}

/// The reason pairing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Pairing was canceled by this device
    Canceled,
    ConfirmValueFailed,
    DhKeyCheckFailed,
    /// The public key of the peer is not a point on the P-256 curve
    InvalidPublicKey,
    /// The peer sent back the public key of this device
    PublicKeysMatch,
    ConnectionClosed,
    Timeout,
    AlreadyInProgress,
    AlreadyBonded,
    /// The user rejected pairing
    UserRejected,
    PasskeyEntryFailed,
    /// The peer sent a PDU that was not expected
    UnexpectedCommand,
    InvalidParameters,
    EncryptionFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    /// The peer sent a pairing failed PDU
    Remote(PairingFailedReason),
    /// The controller reported a failed status for a BR/EDR pairing
    Controller(ErrorCode),
}

impl core::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FailureReason::Canceled => f.write_str("canceled"),
            FailureReason::ConfirmValueFailed => f.write_str("confirm value failed"),
            FailureReason::DhKeyCheckFailed => f.write_str("DHKey check failed"),
            FailureReason::InvalidPublicKey => f.write_str("invalid remote public key"),
            FailureReason::PublicKeysMatch => f.write_str("public keys match"),
            FailureReason::ConnectionClosed => f.write_str("connection closed"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::AlreadyInProgress => f.write_str("already in progress"),
            FailureReason::AlreadyBonded => f.write_str("already bonded"),
            FailureReason::UserRejected => f.write_str("rejected by the user"),
            FailureReason::PasskeyEntryFailed => f.write_str("passkey entry failed"),
            FailureReason::UnexpectedCommand => f.write_str("unexpected command"),
            FailureReason::InvalidParameters => f.write_str("invalid parameters"),
            FailureReason::EncryptionFailed => f.write_str("encryption failed"),
            FailureReason::OobNotAvailable => f.write_str("out of band data not available"),
            FailureReason::AuthenticationRequirements => f.write_str("authentication requirements"),
            FailureReason::Remote(reason) => write!(f, "remote failure: {}", reason),
            FailureReason::Controller(status) => write!(f, "controller failure: {}", status),
        }
    }
}

/// A failed pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingFailure {
    reason: FailureReason,
    message: String,
}

impl PairingFailure {
    pub fn new<M: Into<String>>(reason: FailureReason, message: M) -> Self {
        PairingFailure {
            reason,
            message: message.into(),
        }
    }

    pub fn get_reason(&self) -> FailureReason {
        self.reason
    }

    pub fn get_message(&self) -> &str {
        &self.message
    }
}

impl core::fmt::Display for PairingFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{} ({})", self.message, self.reason)
    }
}

impl std::error::Error for PairingFailure {}

/// Keys distributed during phase 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistributedKeys {
    pub ltk: Option<u128>,
    pub ediv: Option<u16>,
    pub rand: Option<u64>,
    pub irk: Option<u128>,
    pub identity: Option<IdentityAddress>,
    pub csrk: Option<u128>,
}

/// The result of a successful pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingResult {
    pub peer: AddressWithType,
    pub handle: ConnectionHandle,
    pub secure_connections: bool,
    pub method: PairingMethod,
    /// The key that encrypted the link
    ///
    /// This is the LTK for secure connections and the STK for legacy pairing.
    pub ltk: u128,
    pub key_size: u8,
    pub security_level: SecurityLevel,
    /// Both devices requested bonding
    pub bonding: bool,
    /// The keys distributed by the peer
    pub remote_keys: DistributedKeys,
    /// The keys distributed by this device
    pub local_keys: DistributedKeys,
}

/// The progress of a pairing handler after an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Pairing is waiting for more input
    Pending,
    Complete(PairingResult),
    Failed(PairingFailure),
}

impl Progress {
    pub fn is_pending(&self) -> bool {
        matches!(self, Progress::Pending)
    }
}

/// Link events from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEvent {
    EncryptionChange { status: ErrorCode, enabled: bool },
    LongTermKeyRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    WaitConfirm,
    WaitRandom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasskeyStep {
    WaitPasskey,
    RoundStart,
    Exchange(Exchange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    WaitPairingRequest,
    WaitPairingPrompt,
    WaitPairingResponse,
    WaitPublicKey,
    JustWorks(Exchange),
    WaitNumericComparison,
    Passkey(PasskeyStep),
    OutOfBandRandom,
    WaitDhKeyCheck,
    Legacy(PasskeyStep),
    WaitLongTermKeyRequest,
    WaitEncryptionChange,
    ReceiveKeys,
    Done,
}

enum Flow {
    Continue,
    Wait,
    Complete(PairingResult),
}

/// Take the next PDU of the inbox if it is the expected command
///
/// The step returns with `Flow::Wait` when the inbox is empty.
macro_rules! expect_pdu {
    ($handler:expr, $ctx:expr, $variant:ident) => {
        match $handler.smp_inbox.pop_front() {
            None => return Ok(Flow::Wait),
            Some(SmpPdu::$variant(data)) => data,
            Some(other) => return Err($handler.unexpected($ctx, &other, stringify!($variant))),
        }
    };
}

pub(crate) use expect_pdu;

/// Mask a key to the negotiated encryption key size
fn mask_key(key: u128, key_size: u8) -> u128 {
    if key_size >= 16 {
        key
    } else {
        key & ((1u128 << (key_size as u32 * 8)) - 1)
    }
}

/// The LE pairing state machine
#[derive(Debug)]
pub struct LePairingHandler {
    link: LeLinkInfo,
    config: LePairingConfig,
    local_oob: Option<LeOobData>,
    remote_oob: Option<RemoteLeOobData>,
    remotely_initiated: bool,
    step: Step,
    smp_inbox: VecDeque<SmpPdu>,
    ui_inbox: VecDeque<UiInput>,
    link_inbox: VecDeque<LinkEvent>,
    request: Option<PairingFeatures>,
    response: Option<PairingFeatures>,
    key_size: u8,
    secure_connections: bool,
    method: Option<PairingMethod>,
    key_pair: Option<EcdhKeyPair>,
    remote_public_key: Option<EcdhPublicKey>,
    dh_key: Option<DhKey>,
    local_nonce: u128,
    remote_nonce: u128,
    remote_confirm: u128,
    ra: u128,
    rb: u128,
    passkey: Option<u32>,
    passkey_round: usize,
    oob_verified: bool,
    stage_one: Option<(u128, u128)>,
    mac_key: u128,
    tk: u128,
    ltk: u128,
    local_distribution: KeyDistributions,
    expected_keys: VecDeque<CommandType>,
    remote_keys: DistributedKeys,
    local_keys: DistributedKeys,
}

impl LePairingHandler {
    /// Create a new pairing handler
    ///
    /// Starting the handler sends a pairing request if this device is the central, or a security
    /// request if this device is the peripheral. Use [`with_pairing_request`] for a handler that
    /// answers a pairing request of the peer.
    ///
    /// [`with_pairing_request`]: LePairingHandler::with_pairing_request
    pub fn new(link: LeLinkInfo, config: LePairingConfig) -> Self {
        LePairingHandler {
            link,
            config,
            local_oob: None,
            remote_oob: None,
            remotely_initiated: false,
            step: Step::Start,
            smp_inbox: VecDeque::new(),
            ui_inbox: VecDeque::new(),
            link_inbox: VecDeque::new(),
            request: None,
            response: None,
            key_size: 0,
            secure_connections: false,
            method: None,
            key_pair: None,
            remote_public_key: None,
            dh_key: None,
            local_nonce: 0,
            remote_nonce: 0,
            remote_confirm: 0,
            ra: 0,
            rb: 0,
            passkey: None,
            passkey_round: 0,
            oob_verified: false,
            stage_one: None,
            mac_key: 0,
            tk: 0,
            ltk: 0,
            local_distribution: KeyDistributions::default(),
            expected_keys: VecDeque::new(),
            remote_keys: DistributedKeys::default(),
            local_keys: DistributedKeys::default(),
        }
    }

    /// Set the OOB data generated by this device
    ///
    /// The key pair of the OOB data is used when the peer has this OOB data.
    pub fn with_local_oob_data(mut self, oob: Option<LeOobData>) -> Self {
        self.local_oob = oob;
        self
    }

    /// Set the OOB data received from the peer
    pub fn with_remote_oob_data(mut self, oob: Option<RemoteLeOobData>) -> Self {
        self.remote_oob = oob;
        self
    }

    /// Answer the pairing request of the peer
    pub fn with_pairing_request(mut self, request: PairingFeatures) -> Self {
        self.request = Some(request);
        self.remotely_initiated = true;
        self
    }

    pub fn get_peer(&self) -> AddressWithType {
        self.link.peer
    }

    pub fn get_handle(&self) -> ConnectionHandle {
        self.link.handle
    }

    pub fn get_role(&self) -> Role {
        self.link.role
    }

    pub fn is_remotely_initiated(&self) -> bool {
        self.remotely_initiated
    }

    /// Get the pairing method
    ///
    /// This is `None` until the pairing request and response are exchanged.
    pub fn get_method(&self) -> Option<PairingMethod> {
        self.method
    }

    /// Get the random values `ra` and `rb` of LE secure connections stage 1
    ///
    /// This is `None` until stage 1 is completed.
    pub fn get_stage_one_random(&self) -> Option<(u128, u128)> {
        self.stage_one
    }

    /// Get the number of Passkey Entry rounds done
    pub fn get_passkey_rounds(&self) -> usize {
        self.passkey_round
    }

    pub fn is_finished(&self) -> bool {
        self.step == Step::Done
    }

    /// Start pairing
    pub fn start<C: PairingContext>(&mut self, ctx: &mut C) -> Progress {
        self.run(ctx)
    }

    /// Input a security manager PDU received from the peer
    pub fn on_smp_pdu<C: PairingContext>(&mut self, ctx: &mut C, pdu: SmpPdu) -> Progress {
        if self.is_finished() {
            log::warn!("(SM) dropping {} received after pairing ended", pdu.command_type());

            return Progress::Pending;
        }

        log::trace!("(SM) received {} from {}", pdu.command_type(), self.link.peer);

        match pdu {
            SmpPdu::PairingFailed(failed) => {
                self.step = Step::Done;

                let reason = failed.get_reason();

                return Progress::Failed(PairingFailure::new(
                    FailureReason::Remote(reason),
                    format!("Remote device sent pairing failed: {}", reason),
                ));
            }
            SmpPdu::KeyPressNotification(notification) => {
                log::info!("(SM) keypress notification: {:?}", notification);

                return Progress::Pending;
            }
            SmpPdu::PairingRequest(request) if self.step == Step::Start && !self.is_central() => {
                self.request = Some(request);
                self.remotely_initiated = true;
            }
            SmpPdu::SecurityRequest(_) if self.step != Step::Start || !self.is_central() => {
                log::info!("(SM) ignoring security request received during pairing");

                return Progress::Pending;
            }
            // a central that has not started answers with a pairing request
            SmpPdu::SecurityRequest(_) => (),
            pdu => self.smp_inbox.push_back(pdu),
        }

        self.run(ctx)
    }

    pub(crate) fn on_ui_input<C: PairingContext>(&mut self, ctx: &mut C, input: UiInput) -> Progress {
        if self.is_finished() {
            return Progress::Pending;
        }

        self.ui_inbox.push_back(input);

        self.run(ctx)
    }

    /// Input the user's answer to the pairing prompt
    pub fn on_pairing_prompt_accepted<C: PairingContext>(&mut self, ctx: &mut C, accepted: bool) -> Progress {
        self.on_ui_input(ctx, UiInput::PairingPromptAccepted(accepted))
    }

    /// Input the user's answer to the numeric comparison
    pub fn on_confirm_yes_no<C: PairingContext>(&mut self, ctx: &mut C, confirmed: bool) -> Progress {
        self.on_ui_input(ctx, UiInput::ConfirmYesNo(confirmed))
    }

    /// Input the passkey entered by the user
    pub fn on_passkey_entry<C: PairingContext>(&mut self, ctx: &mut C, passkey: u32) -> Progress {
        self.on_ui_input(ctx, UiInput::Passkey(passkey))
    }

    /// Input a HCI Encryption Change event for the link
    pub fn on_encryption_change<C: PairingContext>(&mut self, ctx: &mut C, status: ErrorCode, enabled: bool) -> Progress {
        if self.is_finished() {
            return Progress::Pending;
        }

        self.link_inbox.push_back(LinkEvent::EncryptionChange { status, enabled });

        self.run(ctx)
    }

    /// Input a HCI LE Long Term Key Request event for the link
    pub fn on_long_term_key_request<C: PairingContext>(&mut self, ctx: &mut C) -> Progress {
        if self.is_finished() {
            return Progress::Pending;
        }

        self.link_inbox.push_back(LinkEvent::LongTermKeyRequest);

        self.run(ctx)
    }

    /// Cancel pairing
    ///
    /// Nothing is sent to the peer.
    pub fn cancel(&mut self) -> Progress {
        self.abort(FailureReason::Canceled, "Pairing canceled")
    }

    /// The security manager timer expired
    pub fn on_timeout(&mut self) -> Progress {
        self.abort(FailureReason::Timeout, "Security manager timeout")
    }

    pub fn on_connection_closed(&mut self) -> Progress {
        self.abort(FailureReason::ConnectionClosed, "Connection closed")
    }

    fn abort(&mut self, reason: FailureReason, message: &str) -> Progress {
        if self.is_finished() {
            Progress::Pending
        } else {
            log::info!("(SM) pairing with {} aborted: {}", self.link.peer, message);

            self.step = Step::Done;

            Progress::Failed(PairingFailure::new(reason, message))
        }
    }

    fn run<C: PairingContext>(&mut self, ctx: &mut C) -> Progress {
        loop {
            let flow = match self.step {
                Step::Start => self.start_pairing(ctx),
                Step::WaitPairingRequest => self.wait_pairing_request(ctx),
                Step::WaitPairingPrompt => self.wait_pairing_prompt(ctx),
                Step::WaitPairingResponse => self.wait_pairing_response(ctx),
                Step::WaitPublicKey => self.wait_public_key(ctx),
                Step::JustWorks(exchange) => self.just_works(ctx, exchange),
                Step::WaitNumericComparison => self.wait_numeric_comparison(ctx),
                Step::Passkey(step) => self.passkey_entry(ctx, step),
                Step::OutOfBandRandom => self.out_of_band_random(ctx),
                Step::WaitDhKeyCheck => self.wait_dh_key_check(ctx),
                Step::Legacy(step) => self.legacy_pairing(ctx, step),
                Step::WaitLongTermKeyRequest => self.wait_long_term_key_request(ctx),
                Step::WaitEncryptionChange => self.wait_encryption_change(ctx),
                Step::ReceiveKeys => self.receive_keys(ctx),
                Step::Done => return Progress::Pending,
            };

            match flow {
                Ok(Flow::Continue) => (),
                Ok(Flow::Wait) => return Progress::Pending,
                Ok(Flow::Complete(result)) => {
                    log::info!("(SM) pairing with {} complete, {}", self.link.peer, result.security_level);

                    self.step = Step::Done;

                    return Progress::Complete(result);
                }
                Err(failure) => {
                    log::info!("(SM) pairing with {} failed: {}", self.link.peer, failure);

                    self.step = Step::Done;

                    return Progress::Failed(failure);
                }
            }
        }
    }

    fn is_central(&self) -> bool {
        self.link.role == Role::Central
    }

    fn send<C: PairingContext>(&self, ctx: &mut C, pdu: SmpPdu) {
        log::trace!("(SM) sending {} to {}", pdu.command_type(), self.link.peer);

        ctx.send_smp(&self.link.peer, pdu.into_bytes());
    }

    /// Send a pairing failed PDU and create the failure
    fn fail<C: PairingContext>(
        &self,
        ctx: &mut C,
        sent_reason: PairingFailedReason,
        reason: FailureReason,
        message: &str,
    ) -> PairingFailure {
        self.send(ctx, SmpPdu::PairingFailed(PairingFailed::new(sent_reason)));

        PairingFailure::new(reason, message)
    }

    fn unexpected<C: PairingContext, E: core::fmt::Display>(
        &self,
        ctx: &mut C,
        received: &SmpPdu,
        expected: E,
    ) -> PairingFailure {
        let message = format!("Was expecting {}, but received {}", expected, received.command_type());

        log::error!("(SM) {}", message);

        self.send(
            ctx,
            SmpPdu::PairingFailed(PairingFailed::new(PairingFailedReason::UnspecifiedReason)),
        );

        PairingFailure::new(FailureReason::UnexpectedCommand, message)
    }

    fn missing(what: &str) -> PairingFailure {
        PairingFailure::new(FailureReason::InvalidParameters, format!("Missing {}", what))
    }

    fn confirmation_data(&self) -> ConfirmationData {
        ConfirmationData::new(self.link.peer)
    }

    /// Get the pairing request and pairing response
    fn features(&self) -> Result<(PairingFeatures, PairingFeatures), PairingFailure> {
        match (self.request, self.response) {
            (Some(request), Some(response)) => Ok((request, response)),
            _ => Err(Self::missing("pairing features")),
        }
    }

    /// Get the features of this device and the features of the peer
    fn local_remote_features(&self) -> Result<(PairingFeatures, PairingFeatures), PairingFailure> {
        let (request, response) = self.features()?;

        if self.is_central() {
            Ok((request, response))
        } else {
            Ok((response, request))
        }
    }

    /// Get the addresses of the central (A) and the peripheral (B)
    fn connection_addresses(&self) -> (AddressWithType, AddressWithType) {
        if self.is_central() {
            (self.link.local, self.link.peer)
        } else {
            (self.link.peer, self.link.local)
        }
    }

    fn pairing_addresses(&self) -> (PairingAddress, PairingAddress) {
        let (a, b) = self.connection_addresses();

        (PairingAddress::new(&a), PairingAddress::new(&b))
    }

    /// Get the nonces of the central (Na) and the peripheral (Nb)
    fn nonces(&self) -> (u128, u128) {
        if self.is_central() {
            (self.local_nonce, self.remote_nonce)
        } else {
            (self.remote_nonce, self.local_nonce)
        }
    }

    fn local_features(&self) -> PairingFeatures {
        PairingFeatures::new(
            self.config.io_capability,
            OobDataFlag::from(self.config.oob_data_present || self.remote_oob.is_some()),
            self.config.auth_req,
            self.config.max_encryption_size,
            self.config.initiator_key_distribution,
            self.config.responder_key_distribution,
        )
    }

    fn start_pairing<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        match (self.link.role, self.request) {
            (Role::Central, _) => {
                let request = self.local_features();

                log::info!("(SM) sending pairing request to {}", self.link.peer);

                self.send(ctx, SmpPdu::PairingRequest(request));

                self.request = Some(request);

                self.step = Step::WaitPairingResponse;
            }
            (Role::Peripheral, Some(_)) if self.config.pairing_prompt => {
                ctx.post_ui(UiRequest::PairingPrompt(self.confirmation_data()));

                self.step = Step::WaitPairingPrompt;
            }
            (Role::Peripheral, Some(_)) => return self.respond(ctx),
            (Role::Peripheral, None) => {
                self.send(ctx, SmpPdu::SecurityRequest(SecurityRequest::new(self.config.auth_req)));

                self.step = Step::WaitPairingRequest;
            }
        }

        Ok(Flow::Continue)
    }

    fn wait_pairing_request<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let request = expect_pdu!(self, ctx, PairingRequest);

        self.request = Some(request);

        self.respond(ctx)
    }

    fn wait_pairing_prompt<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        match self.ui_inbox.pop_front() {
            None => Ok(Flow::Wait),
            Some(UiInput::PairingPromptAccepted(true)) => self.respond(ctx),
            Some(_) => Err(self.fail(
                ctx,
                PairingFailedReason::UnspecifiedReason,
                FailureReason::UserRejected,
                "User said no",
            )),
        }
    }

    /// Send the pairing response to the received pairing request
    fn respond<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let request = self.request.ok_or_else(|| Self::missing("pairing request"))?;

        if !request.is_valid_max_encryption_size() {
            return Err(self.fail(
                ctx,
                PairingFailedReason::EncryptionKeySize,
                FailureReason::InvalidParameters,
                "Invalid maximum encryption key size",
            ));
        }

        let local = self.local_features();

        let response = PairingFeatures::new(
            local.get_io_capability(),
            local.get_oob_data_flag(),
            local.get_auth_req(),
            local.get_max_encryption_size(),
            request
                .get_initiator_key_distribution()
                .intersect(local.get_initiator_key_distribution()),
            request
                .get_responder_key_distribution()
                .intersect(local.get_responder_key_distribution()),
        );

        log::info!("(SM) sending pairing response to {}", self.link.peer);

        self.send(ctx, SmpPdu::PairingResponse(response));

        self.response = Some(response);

        self.negotiate(ctx)
    }

    fn wait_pairing_response<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let response = expect_pdu!(self, ctx, PairingResponse);

        let request = self.request.ok_or_else(|| Self::missing("pairing request"))?;

        if !response.is_valid_max_encryption_size() {
            return Err(self.fail(
                ctx,
                PairingFailedReason::EncryptionKeySize,
                FailureReason::InvalidParameters,
                "Invalid maximum encryption key size",
            ));
        }

        let is_subset = |requested: KeyDistributions, responded: KeyDistributions| {
            requested.intersect(responded) == responded
        };

        if !is_subset(
            request.get_initiator_key_distribution(),
            response.get_initiator_key_distribution(),
        ) || !is_subset(
            request.get_responder_key_distribution(),
            response.get_responder_key_distribution(),
        ) {
            return Err(self.fail(
                ctx,
                PairingFailedReason::InvalidParameters,
                FailureReason::InvalidParameters,
                "Key distribution not requested",
            ));
        }

        self.response = Some(response);

        self.negotiate(ctx)
    }

    /// Decide the pairing from the pairing request and response
    fn negotiate<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let (request, response) = self.features()?;

        self.key_size = core::cmp::min(request.get_max_encryption_size(), response.get_max_encryption_size());

        self.secure_connections = request.get_auth_req().sc() && response.get_auth_req().sc();

        let method = if self.secure_connections {
            method::select_secure_connections(&request, &response)
        } else {
            method::select_legacy(&request, &response)
        };

        log::info!(
            "(SM) {} pairing method: {}, key size: {}",
            if self.secure_connections { "secure connections" } else { "legacy" },
            method,
            self.key_size
        );

        self.method = Some(method);

        if self.secure_connections {
            self.begin_public_key_exchange(ctx)
        } else {
            self.begin_legacy(ctx)
        }
    }

    /// Set up the passkey for Passkey Entry
    ///
    /// The returned boolean is true when the passkey must be entered by the user.
    fn setup_passkey<C: PairingContext>(&mut self, ctx: &mut C) -> Result<bool, PairingFailure> {
        let (local, remote) = self.local_remote_features()?;

        match method::passkey_role(local.get_io_capability(), remote.get_io_capability(), self.link.role) {
            Some(PasskeyRole::Display) => {
                let passkey = method::passkey_from_random(ctx.rng().next_u32());

                ctx.post_ui(UiRequest::DisplayPasskey(self.confirmation_data(), PasskeyOutput(passkey)));

                self.passkey = Some(passkey);

                Ok(false)
            }
            Some(PasskeyRole::Enter) => {
                ctx.post_ui(UiRequest::DisplayEnterPasskey(self.confirmation_data()));

                Ok(true)
            }
            None => Err(self.fail(
                ctx,
                PairingFailedReason::UnspecifiedReason,
                FailureReason::InvalidParameters,
                "Passkey entry is not possible with the IO capabilities",
            )),
        }
    }

    /// Take the passkey entered by the user
    fn take_passkey_entry<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Option<u32>, PairingFailure> {
        match self.ui_inbox.pop_front() {
            None => Ok(None),
            Some(UiInput::Passkey(passkey)) if passkey <= method::PASSKEY_MAX => {
                self.passkey = Some(passkey);

                Ok(Some(passkey))
            }
            Some(_) => Err(self.fail(
                ctx,
                PairingFailedReason::PasskeyEntryFailed,
                FailureReason::PasskeyEntryFailed,
                "Passkey did not arrive!",
            )),
        }
    }

    fn security_level(&self) -> SecurityLevel {
        let authenticated = match self.method {
            Some(PairingMethod::NumericComparison | PairingMethod::PasskeyEntry) => true,
            Some(PairingMethod::OutOfBand) => self.oob_verified,
            Some(PairingMethod::JustWorks) | None => false,
        };

        match (self.secure_connections, authenticated) {
            (true, true) => SecurityLevel::AuthenticatedSecureConnections,
            (true, false) => SecurityLevel::UnauthenticatedSecureConnections,
            (false, true) => SecurityLevel::AuthenticatedLegacy,
            (false, false) => SecurityLevel::UnauthenticatedLegacy,
        }
    }

    fn pairing_result(&self) -> Result<PairingResult, PairingFailure> {
        let (request, response) = self.features()?;

        Ok(PairingResult {
            peer: self.link.peer,
            handle: self.link.handle,
            secure_connections: self.secure_connections,
            method: self.method.ok_or_else(|| Self::missing("pairing method"))?,
            ltk: self.ltk,
            key_size: self.key_size,
            security_level: self.security_level(),
            bonding: request.get_auth_req().bonding() && response.get_auth_req().bonding(),
            remote_keys: self.remote_keys,
            local_keys: self.local_keys,
        })
    }
}

/// Convert an address into the `ia` or `ra` input of `c1`
fn c1_address(address: &AddressWithType) -> (bool, u128) {
    let mut bytes = [0u8; 16];

    bytes[..6].copy_from_slice(&address.address.0);

    (address.address_type == AddressType::Random, <u128>::from_le_bytes(bytes))
}
