//! The Security Manager
//!
//! The [`SecurityManager`] owns every pairing handler and the security records of the peer devices.
//! Protocol input (SMP PDUs, HCI events, connection changes) and the answers of the user are given
//! to the manager which routes them to the handler of the peer. When a handler finishes the manager
//! updates the record of the peer, saves the records to storage, and notifies the listeners.
//!
//! # Handlers
//! There is a handler for every peer device pairing over BR/EDR, but only one LE pairing can be
//! pending at a time. Starting a second LE pairing while one is pending replaces the pending one.
//!
//! # Notifications
//! Listeners and the user interface are the sending half of an unbounded channel. Notifications are
//! posted to the channel and never call back into user code while the manager is processing.
//!
//! ```
//! use bo_tie_security::record::MemoryStorage;
//! use bo_tie_security::hci::HciCommand;
//! use bo_tie_security::{AddressWithType, BluetoothDeviceAddress, SecurityManagerBuilder, Transport};
//! use rand_core::OsRng;
//!
//! #[derive(Default)]
//! struct NullTransport;
//!
//! impl Transport for NullTransport {
//!     fn send_smp(&mut self, _: &AddressWithType, _: Vec<u8>) {}
//!     fn send_hci(&mut self, _: HciCommand) {}
//!     fn connect_le(&mut self, _: &AddressWithType) {}
//!     fn connect_classic(&mut self, _: &BluetoothDeviceAddress) {}
//!     fn disconnect(&mut self, _: &AddressWithType) {}
//! }
//!
//! let (events_sender, _events) = futures::channel::mpsc::unbounded();
//!
//! let mut manager = SecurityManagerBuilder::new(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]))
//!     .build(NullTransport, MemoryStorage::new(), OsRng);
//!
//! manager.register_callback_listener(events_sender);
//! ```

use crate::classic::{ClassicContext, ClassicPairingConfig, ClassicPairingHandler, ClassicProgress};
use crate::hci::{
    ClassicAuthRequirements, ClassicIoCapability, ConnectionHandle, ErrorCode, HciCommand, HciEvent,
};
use crate::le::{
    FailureReason, LeLinkInfo, LePairingConfig, LePairingHandler, PairingContext, PairingFailure, Progress,
};
use crate::oob::{ClassicOobData, LeOobData, RemoteLeOobData};
use crate::record::{self, SecurityDatabase, SecurityRecord, Storage};
use crate::smp::{AuthReq, IoCapability, KeyDistributions, SmpPdu};
use crate::toolbox;
use crate::ui::UiRequest;
use crate::{AddressWithType, BluetoothDeviceAddress, IdentityAddress, Role, SecurityLevel};
use futures::channel::mpsc::UnboundedSender;
use rand_core::{CryptoRng, RngCore};
use std::collections::HashMap;

/// The interface to the lower layers of the host
pub trait Transport {
    /// Send a PDU over the security manager channel of the LE link to `peer`
    fn send_smp(&mut self, peer: &AddressWithType, pdu: Vec<u8>);

    fn send_hci(&mut self, command: HciCommand);

    /// Create a LE connection to `peer`
    ///
    /// The manager expects either [`on_le_connection_open`] or [`on_le_connection_failed`] to be
    /// called for `peer` afterwards.
    ///
    /// [`on_le_connection_open`]: SecurityManager::on_le_connection_open
    /// [`on_le_connection_failed`]: SecurityManager::on_le_connection_failed
    fn connect_le(&mut self, peer: &AddressWithType);

    /// Create a BR/EDR connection to `peer`
    ///
    /// The manager expects [`on_classic_connection_complete`] to be called once connected.
    ///
    /// [`on_classic_connection_complete`]: SecurityManager::on_classic_connection_complete
    fn connect_classic(&mut self, peer: &BluetoothDeviceAddress);

    fn disconnect(&mut self, peer: &AddressWithType);
}

/// Notifications sent to the registered listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    DeviceBonded(AddressWithType),
    DeviceUnbonded(AddressWithType),
    DeviceBondFailed(AddressWithType, PairingFailure),
    /// The encryption of a link that is not being paired changed
    EncryptionStateChanged {
        handle: ConnectionHandle,
        status: ErrorCode,
        enabled: bool,
    },
    /// The result of [`SecurityManager::get_out_of_band_data`]
    LocalOobData(Result<ClassicOobData, ErrorCode>),
}

/// Security requirements of a BR/EDR link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityPolicy {
    /// The best security that both devices support
    Best,
    /// The link must be encrypted with a key created with MITM protection
    AuthenticatedEncryptedTransport,
    /// The link must be encrypted
    EncryptedTransport,
}

/// Security requirements of a LE link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeSecurityPolicy {
    NoSecurity,
    EncryptedTransport,
    AuthenticatedEncryptedTransport,
    /// Authenticated secure connections with a 128 bit key
    Best,
    /// Authenticated pairing (legacy or secure connections) with a 128 bit key
    AuthenticatedPairingWith128BitKey,
}

/// Called with the result of enforcing a security policy
pub type PolicyCallback = Box<dyn FnOnce(bool) + Send>;

/// An open LE link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeLink {
    handle: ConnectionHandle,
    local: AddressWithType,
    role: Role,
}

/// The single pending LE pairing
#[derive(Debug, Default)]
struct PendingLePairing {
    address: Option<AddressWithType>,
    handle: Option<ConnectionHandle>,
    handler: Option<LePairingHandler>,
}

/// The output of the handlers
struct Output<'a, T, R> {
    transport: &'a mut T,
    rng: &'a mut R,
    ui: Option<&'a UnboundedSender<UiRequest>>,
}

fn post_ui(ui: Option<&UnboundedSender<UiRequest>>, request: UiRequest) {
    match ui {
        Some(sender) => {
            if sender.unbounded_send(request).is_err() {
                log::warn!("(SM) user interface handler is closed");
            }
        }
        None => log::warn!("(SM) no user interface handler for {:?}", request),
    }
}

impl<T: Transport, R: CryptoRng + RngCore> PairingContext for Output<'_, T, R> {
    type Rng = R;

    fn send_smp(&mut self, peer: &AddressWithType, pdu: Vec<u8>) {
        log::trace!("(SM) sending PDU {:x?}", pdu);

        self.transport.send_smp(peer, pdu)
    }

    fn send_hci(&mut self, command: HciCommand) {
        self.transport.send_hci(command)
    }

    fn post_ui(&mut self, request: UiRequest) {
        post_ui(self.ui, request)
    }

    fn rng(&mut self) -> &mut R {
        self.rng
    }
}

impl<T: Transport, R> ClassicContext for Output<'_, T, R> {
    fn send_hci(&mut self, command: HciCommand) {
        self.transport.send_hci(command)
    }

    fn post_ui(&mut self, request: UiRequest) {
        post_ui(self.ui, request)
    }
}

/// Borrow the output of the handlers without borrowing the handlers
macro_rules! output {
    ($manager:expr) => {
        Output {
            transport: &mut $manager.transport,
            rng: &mut $manager.rng,
            ui: $manager.ui.as_ref(),
        }
    };
}

/// The builder of a [`SecurityManager`]
#[derive(Debug, Clone)]
pub struct SecurityManagerBuilder {
    local_address: BluetoothDeviceAddress,
    classic: ClassicPairingConfig,
    le: LePairingConfig,
}

impl SecurityManagerBuilder {
    /// Create a new builder
    ///
    /// `local_address` is the public address of the controller. It is the identity address
    /// distributed to LE peers.
    pub fn new(local_address: BluetoothDeviceAddress) -> Self {
        SecurityManagerBuilder {
            local_address,
            classic: ClassicPairingConfig::default(),
            le: LePairingConfig::default(),
        }
    }

    pub fn set_io_capability(mut self, io_capability: ClassicIoCapability) -> Self {
        self.classic.io_capability = io_capability;
        self
    }

    pub fn set_authentication_requirements(mut self, requirements: ClassicAuthRequirements) -> Self {
        self.classic.authentication_requirements = requirements;
        self
    }

    pub fn set_le_io_capability(mut self, io_capability: IoCapability) -> Self {
        self.le.io_capability = io_capability;
        self
    }

    pub fn set_le_auth_requirements(mut self, auth_req: AuthReq) -> Self {
        self.le.auth_req = auth_req;
        self
    }

    /// Set the maximum LE encryption key size
    ///
    /// # Panic
    /// `size` must be between 7 and 16
    pub fn set_le_maximum_encryption_key_size(mut self, size: u8) -> Self {
        assert!((7..=16).contains(&size), "invalid encryption key size {}", size);

        self.le.max_encryption_size = size;
        self
    }

    pub fn set_le_oob_data_present(mut self, present: bool) -> Self {
        self.le.oob_data_present = present;
        self
    }

    /// Set the keys distributed by the initiator and the responder
    pub fn set_key_distribution(mut self, initiator: KeyDistributions, responder: KeyDistributions) -> Self {
        self.le.initiator_key_distribution = initiator;
        self.le.responder_key_distribution = responder;
        self
    }

    /// Ask the user before answering pairing initiated by the peer
    pub fn enable_pairing_prompt(mut self) -> Self {
        self.classic.pairing_prompt = true;
        self.le.pairing_prompt = true;
        self
    }

    /// Build and initialize the security manager
    ///
    /// The records are loaded from `storage`, and the controller is configured for secure simple
    /// pairing and secure connections.
    pub fn build<T, S, R>(self, transport: T, storage: S, rng: R) -> SecurityManager<T, S, R>
    where
        T: Transport,
        S: Storage,
        R: CryptoRng + RngCore,
    {
        let mut manager = SecurityManager {
            local_address: self.local_address,
            local_irk: 0,
            classic_config: self.classic,
            le_config: self.le,
            transport,
            storage,
            rng,
            database: SecurityDatabase::new(),
            classic_handlers: HashMap::new(),
            classic_connections: HashMap::new(),
            pending_le: PendingLePairing::default(),
            le_links: HashMap::new(),
            listeners: Vec::new(),
            ui: None,
            policy_callbacks: HashMap::new(),
            local_le_oob: None,
            remote_le_oob: None,
        };

        manager.init();

        manager
    }
}

/// The Security Manager
pub struct SecurityManager<T, S, R> {
    local_address: BluetoothDeviceAddress,
    local_irk: u128,
    classic_config: ClassicPairingConfig,
    le_config: LePairingConfig,
    transport: T,
    storage: S,
    rng: R,
    database: SecurityDatabase,
    classic_handlers: HashMap<BluetoothDeviceAddress, ClassicPairingHandler>,
    classic_connections: HashMap<ConnectionHandle, BluetoothDeviceAddress>,
    pending_le: PendingLePairing,
    le_links: HashMap<AddressWithType, LeLink>,
    listeners: Vec<UnboundedSender<SecurityEvent>>,
    ui: Option<UnboundedSender<UiRequest>>,
    policy_callbacks: HashMap<AddressWithType, Vec<(SecurityPolicy, PolicyCallback)>>,
    local_le_oob: Option<LeOobData>,
    remote_le_oob: Option<(AddressWithType, RemoteLeOobData)>,
}

impl<T, S, R> SecurityManager<T, S, R>
where
    T: Transport,
    S: Storage,
    R: CryptoRng + RngCore,
{
    fn init(&mut self) {
        self.transport.send_hci(HciCommand::WriteSimplePairingMode { enabled: true });

        self.transport
            .send_hci(HciCommand::WriteSecureConnectionsHostSupport { enabled: true });

        self.database.load_records_from_storage(&self.storage);

        let stored_irk = self
            .storage
            .get_property(record::ADAPTER_SECTION, record::LOCAL_IRK_KEY)
            .and_then(|hex| record::from_hex::<16>(&hex).ok());

        self.local_irk = match stored_irk {
            Some(irk) => <u128>::from_le_bytes(irk),
            None => {
                log::info!("(SM) generating a new identity resolving key");

                let irk = toolbox::rand_u128(&mut self.rng);

                self.storage.set_property(
                    record::ADAPTER_SECTION,
                    record::LOCAL_IRK_KEY,
                    record::to_hex(&irk.to_le_bytes()),
                );

                irk
            }
        };

        let address = self.local_address.to_string();

        if self
            .storage
            .get_property(record::ADAPTER_SECTION, record::LOCAL_ADDRESS_KEY)
            .as_deref()
            != Some(address.as_str())
        {
            self.storage
                .set_property(record::ADAPTER_SECTION, record::LOCAL_ADDRESS_KEY, address);
        }
    }

    pub fn get_local_address(&self) -> BluetoothDeviceAddress {
        self.local_address
    }

    /// Get the identity resolving key of this device
    pub fn get_local_irk(&self) -> u128 {
        self.local_irk
    }

    pub fn get_record(&self, address: &AddressWithType) -> Option<&SecurityRecord> {
        self.database.find(address)
    }

    pub fn records(&self) -> impl Iterator<Item = &SecurityRecord> {
        self.database.iter()
    }

    pub fn get_storage(&self) -> &S {
        &self.storage
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Check if a BR/EDR pairing handler exists for `address`
    pub fn has_classic_handler(&self, address: &BluetoothDeviceAddress) -> bool {
        self.classic_handlers.contains_key(address)
    }

    /// Get the peer of the pending LE pairing
    pub fn get_pending_le_address(&self) -> Option<AddressWithType> {
        self.pending_le.handler.as_ref().map(|handler| handler.get_peer())
    }

    /// Get the pending LE pairing handler
    pub fn get_pending_le_handler(&self) -> Option<&LePairingHandler> {
        self.pending_le.handler.as_ref()
    }

    // Listeners and user interface

    /// Register a listener
    ///
    /// # Panic
    /// The listener must not already be registered
    pub fn register_callback_listener(&mut self, listener: UnboundedSender<SecurityEvent>) {
        if self.listeners.iter().any(|l| l.same_receiver(&listener)) {
            panic!("Listener has already been registered!");
        }

        self.listeners.push(listener);
    }

    /// Unregister a listener
    ///
    /// # Panic
    /// The listener must be registered
    pub fn unregister_callback_listener(&mut self, listener: &UnboundedSender<SecurityEvent>) {
        match self.listeners.iter().position(|l| l.same_receiver(listener)) {
            Some(index) => {
                self.listeners.remove(index);
            }
            None => panic!("Listener has not been registered!"),
        }
    }

    /// Set the user interface handler
    ///
    /// # Panic
    /// A user interface handler must not already be set
    pub fn set_user_interface_handler(&mut self, handler: UnboundedSender<UiRequest>) {
        if self.ui.is_some() {
            panic!("User interface handler has already been set!");
        }

        self.ui = Some(handler);
    }

    fn notify(&mut self, event: SecurityEvent) {
        log::trace!("(SM) notifying {:?}", event);

        self.listeners.retain(|listener| {
            if listener.unbounded_send(event.clone()).is_err() {
                log::warn!("(SM) removing closed listener");

                false
            } else {
                true
            }
        });
    }

    // Configuration

    pub fn set_io_capability(&mut self, io_capability: ClassicIoCapability) {
        self.classic_config.io_capability = io_capability;
    }

    pub fn set_authentication_requirements(&mut self, requirements: ClassicAuthRequirements) {
        self.classic_config.authentication_requirements = requirements;
    }

    pub fn set_le_io_capability(&mut self, io_capability: IoCapability) {
        self.le_config.io_capability = io_capability;
    }

    pub fn set_le_auth_requirements(&mut self, auth_req: AuthReq) {
        self.le_config.auth_req = auth_req;
    }

    /// Set the maximum LE encryption key size
    ///
    /// # Panic
    /// `size` must be between 7 and 16
    pub fn set_le_maximum_encryption_key_size(&mut self, size: u8) {
        assert!((7..=16).contains(&size), "invalid encryption key size {}", size);

        self.le_config.max_encryption_size = size;
    }

    pub fn set_le_oob_data_present(&mut self, present: bool) {
        self.le_config.oob_data_present = present;
    }

    /// Generate the LE out of band data of this device
    ///
    /// The returned confirm and random values are sent to the peer over the OOB interface. The
    /// key pair of the OOB data is used for every pairing until new OOB data is generated.
    pub fn get_le_out_of_band_data(&mut self) -> (u128, u128) {
        let oob = LeOobData::generate(&mut self.rng);

        let values = (oob.get_confirm(), oob.get_random());

        self.local_le_oob = Some(oob);

        values
    }

    /// Set the LE out of band data received from `remote`
    pub fn set_out_of_band_data(&mut self, remote: AddressWithType, confirm: u128, random: u128) {
        self.remote_le_oob = Some((remote, RemoteLeOobData::new(confirm, random)));
    }

    /// Read the BR/EDR out of band data of the controller
    ///
    /// The data is sent to the listeners as [`SecurityEvent::LocalOobData`].
    pub fn get_out_of_band_data(&mut self) {
        self.transport.send_hci(HciCommand::ReadLocalOobData);
    }

    // Bonding

    /// Bond with `peer` over BR/EDR
    pub fn create_bond(&mut self, peer: AddressWithType) {
        self.create_bond_out_of_band(peer, None, None)
    }

    /// Bond with `peer` over BR/EDR using the OOB data received from `peer`
    ///
    /// If the peer is already paired the listeners are immediately notified that it is bonded.
    pub fn create_bond_out_of_band(
        &mut self,
        peer: AddressWithType,
        p192: Option<ClassicOobData>,
        p256: Option<ClassicOobData>,
    ) {
        let record = self.database.find_or_create(peer);

        if record.is_paired() {
            self.notify(SecurityEvent::DeviceBonded(peer));
        } else if !record.is_pairing() {
            let requirements = self.classic_config.authentication_requirements;

            self.dispatch_classic(peer, true, requirements, p192, p256);
        }
    }

    fn dispatch_classic(
        &mut self,
        peer: AddressWithType,
        locally_initiated: bool,
        authentication_requirements: ClassicAuthRequirements,
        p192: Option<ClassicOobData>,
        p256: Option<ClassicOobData>,
    ) {
        if self.classic_handlers.contains_key(&peer.address) {
            log::warn!("(SM classic) {} is already pairing", peer);

            return;
        }

        if !peer.is_public() {
            log::error!("(SM classic) BR/EDR pairing with {} requires a public address", peer);

            self.notify(SecurityEvent::DeviceBondFailed(
                peer,
                PairingFailure::new(FailureReason::InvalidParameters, "BR/EDR pairing requires a public address"),
            ));

            self.update_link_security_condition(peer);

            self.database.remove_if_temporary(&peer);

            return;
        }

        let record = self.database.find_or_create(peer);

        record.set_pairing();

        let stored_link_key = record.get_link_key().copied().zip(record.get_key_type());

        let config = ClassicPairingConfig {
            authentication_requirements,
            ..self.classic_config
        };

        log::info!("(SM classic) dispatching pairing handler for {}", peer);

        let mut handler = ClassicPairingHandler::new(peer.address, config, locally_initiated)
            .with_stored_link_key(stored_link_key)
            .with_remote_oob_data(p192, p256);

        if locally_initiated {
            let handle = self
                .classic_connections
                .iter()
                .find(|(_, address)| **address == peer.address)
                .map(|(handle, _)| *handle);

            match handle {
                Some(handle) => handler.authenticate(&mut output!(self), handle),
                None => self.transport.connect_classic(&peer.address),
            }
        }

        self.classic_handlers.insert(peer.address, handler);
    }

    /// Bond with `peer` over LE
    ///
    /// If there is no LE connection to `peer` a connection is created, pairing starts once the
    /// connection is open.
    pub fn create_bond_le(&mut self, peer: AddressWithType) {
        if self.database.find_or_create(peer).is_paired() {
            self.notify(SecurityEvent::DeviceBondFailed(
                peer,
                PairingFailure::new(FailureReason::AlreadyBonded, "Already bonded"),
            ));

            return;
        }

        self.pending_le.address = Some(peer);

        if self.le_links.contains_key(&peer) {
            self.start_le_pairing(peer, None);
        } else {
            self.transport.connect_le(&peer);
        }
    }

    /// Cancel bonding with `peer`
    pub fn cancel_bond(&mut self, peer: AddressWithType) {
        if let Some(mut handler) = self.classic_handlers.remove(&peer.address) {
            let progress = handler.cancel();

            if !progress.is_pending() {
                post_ui(self.ui.as_ref(), UiRequest::Cancel(peer));
            }

            self.on_classic_progress(peer.address, progress);
        }

        self.database.find_or_create(peer).cancel_pairing();

        if self.pending_le.address == Some(peer) {
            if let Some(progress) = self.pending_le.handler.as_mut().map(|handler| handler.cancel()) {
                post_ui(self.ui.as_ref(), UiRequest::Cancel(peer));

                self.on_le_progress(progress);
            }

            self.wipe_le_pairing();
        }
    }

    /// Remove the bond with `peer`
    ///
    /// Any pairing is canceled, the connection is closed, and the record and link key of `peer`
    /// are deleted.
    pub fn remove_bond(&mut self, peer: AddressWithType) {
        self.cancel_bond(peer);

        self.transport.disconnect(&peer);

        self.database.remove(&peer);

        self.database.save_records_to_storage(&mut self.storage);

        self.transport.send_hci(HciCommand::DeleteStoredLinkKey {
            address: Some(peer.address),
        });

        self.notify(SecurityEvent::DeviceUnbonded(peer));
    }

    // Security policies

    fn is_security_requirement_satisfied(&mut self, peer: AddressWithType, policy: SecurityPolicy) -> bool {
        let record = self.database.find_or_create(peer);

        match policy {
            SecurityPolicy::Best | SecurityPolicy::AuthenticatedEncryptedTransport => {
                record.is_paired() && record.is_authenticated()
            }
            SecurityPolicy::EncryptedTransport => record.is_paired(),
        }
    }

    /// Enforce a security policy on the BR/EDR link to `peer`
    ///
    /// If the policy is already satisfied `callback` is called immediately. Otherwise pairing is
    /// started (unless a pairing is in progress) and `callback` is called once pairing ends.
    pub fn enforce_security_policy<F>(&mut self, peer: AddressWithType, policy: SecurityPolicy, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        log::info!("(SM) enforcing {:?} for {}", policy, peer);

        if self.is_security_requirement_satisfied(peer, policy) {
            callback(true);

            return;
        }

        self.policy_callbacks
            .entry(peer)
            .or_default()
            .push((policy, Box::new(callback)));

        if self.database.find_or_create(peer).is_pairing() {
            return;
        }

        let requirements = match policy {
            SecurityPolicy::Best | SecurityPolicy::AuthenticatedEncryptedTransport => {
                ClassicAuthRequirements::GeneralBondingMitmProtection
            }
            SecurityPolicy::EncryptedTransport => ClassicAuthRequirements::GeneralBonding,
        };

        self.dispatch_classic(peer, true, requirements, None, None);
    }

    fn update_link_security_condition(&mut self, peer: AddressWithType) {
        let callbacks = match self.policy_callbacks.remove(&peer) {
            Some(callbacks) => callbacks,
            None => return,
        };

        for (policy, callback) in callbacks {
            callback(self.is_security_requirement_satisfied(peer, policy));
        }
    }

    /// Check if the LE security of `peer` satisfies `policy`
    ///
    /// Pairing is not started when the policy is not satisfied.
    pub fn enforce_le_security_policy<F>(&mut self, peer: AddressWithType, policy: LeSecurityPolicy, callback: F)
    where
        F: FnOnce(bool),
    {
        let result = match self.database.find(&peer) {
            None => policy == LeSecurityPolicy::NoSecurity,
            Some(record) => {
                let full_key = record.key_size == Some(16);

                match policy {
                    LeSecurityPolicy::NoSecurity => true,
                    LeSecurityPolicy::EncryptedTransport => record.is_paired(),
                    LeSecurityPolicy::AuthenticatedEncryptedTransport => record.is_paired() && record.is_authenticated(),
                    LeSecurityPolicy::Best => {
                        record.is_paired()
                            && record.security_level == SecurityLevel::AuthenticatedSecureConnections
                            && full_key
                    }
                    LeSecurityPolicy::AuthenticatedPairingWith128BitKey => {
                        record.is_paired() && record.is_authenticated() && full_key
                    }
                }
            }
        };

        callback(result)
    }

    // User interface relays

    fn le_handler_for(&mut self, peer: &AddressWithType) -> Option<&mut LePairingHandler> {
        match self.pending_le.handler.as_mut() {
            Some(handler) if handler.get_peer() == *peer => Some(handler),
            _ => None,
        }
    }

    pub fn on_pairing_prompt_accepted(&mut self, peer: AddressWithType, accepted: bool) {
        if let Some(handler) = self.classic_handlers.get_mut(&peer.address) {
            let progress = handler.on_pairing_prompt_accepted(&mut output!(self), accepted);

            self.on_classic_progress(peer.address, progress);
        } else if self.le_handler_for(&peer).is_some() {
            let progress = self.run_le(|handler, ctx| handler.on_pairing_prompt_accepted(ctx, accepted));

            self.on_le_progress(progress);
        }
    }

    pub fn on_confirm_yes_no(&mut self, peer: AddressWithType, confirmed: bool) {
        if let Some(handler) = self.classic_handlers.get_mut(&peer.address) {
            let progress = handler.on_confirm_yes_no(&mut output!(self), confirmed);

            self.on_classic_progress(peer.address, progress);
        } else if self.le_handler_for(&peer).is_some() {
            let progress = self.run_le(|handler, ctx| handler.on_confirm_yes_no(ctx, confirmed));

            self.on_le_progress(progress);
        }
    }

    pub fn on_passkey_entry(&mut self, peer: AddressWithType, passkey: u32) {
        if let Some(handler) = self.classic_handlers.get_mut(&peer.address) {
            let progress = handler.on_passkey_entry(&mut output!(self), passkey);

            self.on_classic_progress(peer.address, progress);
        } else if self.le_handler_for(&peer).is_some() {
            let progress = self.run_le(|handler, ctx| handler.on_passkey_entry(ctx, passkey));

            self.on_le_progress(progress);
        }
    }

    pub fn on_pin_entry(&mut self, peer: AddressWithType, pin: Vec<u8>) {
        if let Some(handler) = self.classic_handlers.get_mut(&peer.address) {
            log::info!("(SM classic) PIN for {}", peer);

            let progress = handler.on_pin_entry(&mut output!(self), pin);

            self.on_classic_progress(peer.address, progress);
        } else {
            log::warn!("(SM) no handler found for PIN for {}", peer);
        }
    }

    /// Run the pending LE handler with the handler's output
    fn run_le<F>(&mut self, f: F) -> Progress
    where
        F: FnOnce(&mut LePairingHandler, &mut Output<'_, T, R>) -> Progress,
    {
        let mut ctx = output!(self);

        match self.pending_le.handler.as_mut() {
            Some(handler) => f(handler, &mut ctx),
            None => Progress::Pending,
        }
    }

    // Dispatch of HCI events

    /// Process a HCI event
    pub fn on_hci_event(&mut self, event: &HciEvent) {
        match *event {
            HciEvent::EncryptionChange {
                status,
                handle,
                enabled,
            } => {
                if self.pending_le.handle == Some(handle) && self.pending_le.handler.is_some() {
                    let progress = self.run_le(|handler, ctx| handler.on_encryption_change(ctx, status, enabled));

                    self.on_le_progress(progress);
                } else {
                    self.notify(SecurityEvent::EncryptionStateChanged {
                        handle,
                        status,
                        enabled,
                    });

                    match self.classic_connections.get(&handle).copied() {
                        Some(address) if self.classic_handlers.contains_key(&address) => {
                            self.on_classic_event(address, event)
                        }
                        _ => (),
                    }
                }
            }
            HciEvent::LeLongTermKeyRequest { handle, .. } => {
                if self.pending_le.handle == Some(handle) && self.pending_le.handler.is_some() {
                    let progress = self.run_le(|handler, ctx| handler.on_long_term_key_request(ctx));

                    self.on_le_progress(progress);
                } else {
                    log::info!("(SM) unhandled LE long term key request for handle {:#x}", handle);
                }
            }
            HciEvent::ReadLocalOobDataComplete { status, c, r } => {
                let result = if status.is_ok() {
                    Ok(ClassicOobData::new(c, r))
                } else {
                    Err(status)
                };

                self.notify(SecurityEvent::LocalOobData(result));
            }
            HciEvent::AuthenticationComplete { handle, .. } => match self.classic_connections.get(&handle).copied() {
                Some(address) => self.on_classic_event(address, event),
                None => log::error!("(SM classic) authentication complete for unknown handle {:#x}", handle),
            },
            _ => match event.get_address() {
                Some(address) => self.on_classic_event(address, event),
                None => log::error!("(SM) cannot handle event 0x{:02x}", event.event_code()),
            },
        }
    }

    /// Process a HCI event packet
    pub fn on_hci_event_packet(&mut self, packet: &[u8]) -> Result<(), crate::Error> {
        let event = HciEvent::try_from_packet(packet)?;

        self.on_hci_event(&event);

        Ok(())
    }

    fn on_classic_event(&mut self, address: BluetoothDeviceAddress, event: &HciEvent) {
        if !self.classic_handlers.contains_key(&address) {
            if !matches!(
                event,
                HciEvent::LinkKeyRequest { .. } | HciEvent::PinCodeRequest { .. } | HciEvent::IoCapabilityResponse { .. }
            ) {
                log::error!(
                    "(SM classic) no pairing handler for {} ready for event 0x{:02x}",
                    address,
                    event.event_code()
                );

                return;
            }

            let requirements = self.classic_config.authentication_requirements;

            self.dispatch_classic(AddressWithType::public(address), false, requirements, None, None);
        }

        if let Some(handler) = self.classic_handlers.get_mut(&address) {
            let progress = handler.on_hci_event(&mut output!(self), event);

            self.on_classic_progress(address, progress);
        }
    }

    fn on_classic_progress(&mut self, address: BluetoothDeviceAddress, progress: ClassicProgress) {
        let peer = AddressWithType::public(address);

        match progress {
            ClassicProgress::Pending => return,
            ClassicProgress::Complete(result) => {
                self.classic_handlers.remove(&address);

                self.database
                    .find_or_create(peer)
                    .set_link_key(result.link_key, result.key_type);

                self.notify(SecurityEvent::DeviceBonded(peer));
            }
            ClassicProgress::Failed(failure) => {
                self.classic_handlers.remove(&address);

                self.notify(SecurityEvent::DeviceBondFailed(peer, failure));
            }
        }

        self.database.find_or_create(peer).cancel_pairing();

        self.database.save_records_to_storage(&mut self.storage);

        self.update_link_security_condition(peer);
    }

    // BR/EDR connections

    /// A BR/EDR connection is complete
    pub fn on_classic_connection_complete(&mut self, address: BluetoothDeviceAddress, handle: ConnectionHandle) {
        self.classic_connections.insert(handle, address);

        let mut ctx = output!(self);

        if let Some(handler) = self.classic_handlers.get_mut(&address) {
            if handler.is_locally_initiated() && handler.get_handle().is_none() {
                handler.authenticate(&mut ctx, handle);
            }
        }
    }

    /// A BR/EDR connection is closed
    ///
    /// Pairing with the device is canceled and a temporary record is removed.
    pub fn on_classic_connection_closed(&mut self, address: BluetoothDeviceAddress) {
        self.classic_connections.retain(|_, a| *a != address);

        if let Some(handler) = self.classic_handlers.get_mut(&address) {
            log::info!("(SM classic) cancelling pairing handler for {}", address);

            let progress = handler.on_connection_closed();

            self.on_classic_progress(address, progress);
        }

        self.database.remove_if_temporary(&AddressWithType::public(address));
    }

    // LE connections and SMP

    /// A LE connection is open
    ///
    /// Pairing starts if [`create_bond_le`](SecurityManager::create_bond_le) was called for `peer`.
    pub fn on_le_connection_open(
        &mut self,
        peer: AddressWithType,
        handle: ConnectionHandle,
        local: AddressWithType,
        role: Role,
    ) {
        self.le_links.insert(peer, LeLink { handle, local, role });

        if self.pending_le.address == Some(peer) && self.pending_le.handler.is_none() {
            self.start_le_pairing(peer, None);
        }
    }

    /// Creating the LE connection to the pending peer failed
    pub fn on_le_connection_failed(&mut self, peer: AddressWithType) {
        if self.pending_le.address == Some(peer) {
            self.database.find_or_create(peer).cancel_pairing();

            self.notify(SecurityEvent::DeviceBondFailed(
                peer,
                PairingFailure::new(FailureReason::ConnectionClosed, "Connection establishment failed"),
            ));

            self.wipe_le_pairing();
        }
    }

    pub fn on_le_connection_closed(&mut self, peer: AddressWithType) {
        self.le_links.remove(&peer);

        if self.pending_le.address == Some(peer) {
            if let Some(progress) = self.pending_le.handler.as_mut().map(|handler| handler.on_connection_closed()) {
                self.on_le_progress(progress);
            }

            self.wipe_le_pairing();
        }
    }

    /// The SMP timer of the pending pairing with `peer` expired
    pub fn on_smp_timeout(&mut self, peer: AddressWithType) {
        if let Some(progress) = self.le_handler_for(&peer).map(|handler| handler.on_timeout()) {
            self.on_le_progress(progress);
        }
    }

    /// Process a PDU received on the security manager channel of the LE link to `peer`
    pub fn on_smp_pdu(&mut self, peer: AddressWithType, data: &[u8]) {
        let pdu = match SmpPdu::try_from_bytes(data) {
            Ok(pdu) => pdu,
            Err(e) => {
                log::error!("(SM) invalid PDU from {}: {}", peer, e);

                return;
            }
        };

        if self.le_handler_for(&peer).is_some() {
            let progress = self.run_le(|handler, ctx| handler.on_smp_pdu(ctx, pdu));

            self.on_le_progress(progress);

            return;
        }

        match pdu {
            SmpPdu::SecurityRequest(_) => log::warn!("(SM) unhandled security request from {}", peer),
            SmpPdu::PairingRequest(request) => match self.le_links.get(&peer) {
                Some(link) if link.role == Role::Peripheral => {
                    log::info!("(SM) pairing request from {}", peer);

                    self.start_le_pairing(peer, Some(request));
                }
                Some(_) => log::error!("(SM) pairing request from peripheral {}", peer),
                None => log::error!("(SM) pairing request from {} without a connection", peer),
            },
            pdu => log::error!("(SM) no pending pairing with {} for {}", peer, pdu.command_type()),
        }
    }

    fn start_le_pairing(&mut self, peer: AddressWithType, request: Option<crate::smp::PairingFeatures>) {
        let link = match self.le_links.get(&peer) {
            Some(link) => *link,
            None => {
                log::error!("(SM) no LE link to {}", peer);

                return;
            }
        };

        if let Some(pending) = self.pending_le.handler.as_ref() {
            log::warn!("(SM) replacing the pending pairing with {}", pending.get_peer());
        }

        let info = LeLinkInfo {
            peer,
            local: link.local,
            role: link.role,
            handle: link.handle,
            local_identity: IdentityAddress::Public(self.local_address),
            local_irk: self.local_irk,
        };

        let remote_oob = match self.remote_le_oob {
            Some((address, oob)) if address == peer => Some(oob),
            _ => None,
        };

        let mut handler = LePairingHandler::new(info, self.le_config)
            .with_local_oob_data(self.local_le_oob.clone())
            .with_remote_oob_data(remote_oob);

        if let Some(request) = request {
            handler = handler.with_pairing_request(request);
        }

        self.database.find_or_create(peer).set_pairing();

        self.pending_le = PendingLePairing {
            address: Some(peer),
            handle: Some(link.handle),
            handler: Some(handler),
        };

        let progress = self.run_le(|handler, ctx| handler.start(ctx));

        self.on_le_progress(progress);
    }

    fn on_le_progress(&mut self, progress: Progress) {
        let peer = match self.pending_le.address {
            Some(peer) => peer,
            None => return,
        };

        match progress {
            Progress::Pending => return,
            Progress::Complete(result) => {
                log::info!("(SM) pairing with {} was successful", result.peer);

                let record = self.database.find_or_create(result.peer);

                record.identity_address = result.remote_keys.identity.map(AddressWithType::from);

                if result.secure_connections {
                    record.ltk = Some(result.ltk);
                } else {
                    record.local_ltk = result.local_keys.ltk;
                    record.local_ediv = result.local_keys.ediv;
                    record.local_rand = result.local_keys.rand;
                }

                record.remote_ltk = result.remote_keys.ltk;
                record.remote_ediv = result.remote_keys.ediv;
                record.remote_rand = result.remote_keys.rand;
                record.remote_irk = result.remote_keys.irk;
                record.remote_signature_key = result.remote_keys.csrk;
                record.key_size = Some(result.key_size);
                record.security_level = result.security_level;
                record.set_paired();

                self.database.save_records_to_storage(&mut self.storage);

                self.notify(SecurityEvent::DeviceBonded(result.peer));

                if let Some(identity) = result.remote_keys.identity {
                    self.notify(SecurityEvent::DeviceBonded(identity.into()));
                }
            }
            Progress::Failed(failure) => {
                self.database.find_or_create(peer).cancel_pairing();

                self.notify(SecurityEvent::DeviceBondFailed(peer, failure));
            }
        }

        self.wipe_le_pairing();
    }

    fn wipe_le_pairing(&mut self) {
        self.pending_le = PendingLePairing::default();
    }
}
