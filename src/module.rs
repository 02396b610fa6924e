//! Async access to a security manager
//!
//! A [`SecurityModule`] owns a [`SecurityManager`] and processes the requests sent to it by any
//! number of [`SecurityManagerHandle`]s. Requests are processed one at a time, in the order they
//! were sent, on whatever task runs [`SecurityModule::run`].
//!
//! ```
//! # use bo_tie_security::record::MemoryStorage;
//! # use bo_tie_security::hci::HciCommand;
//! # use bo_tie_security::{AddressWithType, BluetoothDeviceAddress, SecurityManagerBuilder, Transport};
//! # use bo_tie_security::module::SecurityModule;
//! # struct NullTransport;
//! # impl Transport for NullTransport {
//! #     fn send_smp(&mut self, _: &AddressWithType, _: Vec<u8>) {}
//! #     fn send_hci(&mut self, _: HciCommand) {}
//! #     fn connect_le(&mut self, _: &AddressWithType) {}
//! #     fn connect_classic(&mut self, _: &BluetoothDeviceAddress) {}
//! #     fn disconnect(&mut self, _: &AddressWithType) {}
//! # }
//! # futures::executor::block_on(async {
//! let manager = SecurityManagerBuilder::new(BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]))
//!     .build(NullTransport, MemoryStorage::new(), rand_core::OsRng);
//!
//! let (module, handle) = SecurityModule::new(manager);
//!
//! let peer = AddressWithType::public(BluetoothDeviceAddress([6, 5, 4, 3, 2, 1]));
//!
//! handle.cancel_bond(peer).unwrap();
//!
//! drop(handle);
//!
//! let manager = module.run().await;
//! # let _ = manager;
//! # });
//! ```

use crate::classic::ClassicPairingConfig;
use crate::hci::{ClassicAuthRequirements, ClassicIoCapability, ConnectionHandle, HciEvent};
use crate::oob::ClassicOobData;
use crate::record::{SecurityRecord, Storage};
use crate::smp::{AuthReq, IoCapability};
use crate::ui::UiRequest;
use crate::{
    AddressWithType, BluetoothDeviceAddress, LeSecurityPolicy, Role, SecurityEvent, SecurityManager, SecurityPolicy,
    Transport,
};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use rand_core::{CryptoRng, RngCore};
use std::future::Future;

/// The security module is no longer running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStopped;

impl core::fmt::Display for ModuleStopped {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str("the security module has stopped")
    }
}

impl std::error::Error for ModuleStopped {}

/// Requests to the security module
enum Request {
    CreateBond(AddressWithType),
    CreateBondOutOfBand(AddressWithType, Option<ClassicOobData>, Option<ClassicOobData>),
    CreateBondLe(AddressWithType),
    CancelBond(AddressWithType),
    RemoveBond(AddressWithType),
    SetIoCapability(ClassicIoCapability),
    SetAuthenticationRequirements(ClassicAuthRequirements),
    SetLeIoCapability(IoCapability),
    SetLeAuthRequirements(AuthReq),
    SetLeMaximumEncryptionKeySize(u8),
    SetLeOobDataPresent(bool),
    GetLeOutOfBandData(oneshot::Sender<(u128, u128)>),
    SetOutOfBandData(AddressWithType, u128, u128),
    GetOutOfBandData,
    RegisterListener(mpsc::UnboundedSender<SecurityEvent>),
    SetUserInterfaceHandler(mpsc::UnboundedSender<UiRequest>),
    PairingPromptAccepted(AddressWithType, bool),
    ConfirmYesNo(AddressWithType, bool),
    PasskeyEntry(AddressWithType, u32),
    PinEntry(AddressWithType, Vec<u8>),
    SmpPdu(AddressWithType, Vec<u8>),
    SmpTimeout(AddressWithType),
    HciEvent(HciEvent),
    LeConnectionOpen {
        peer: AddressWithType,
        handle: ConnectionHandle,
        local: AddressWithType,
        role: Role,
    },
    LeConnectionClosed(AddressWithType),
    LeConnectionFailed(AddressWithType),
    ClassicConnectionComplete(BluetoothDeviceAddress, ConnectionHandle),
    ClassicConnectionClosed(BluetoothDeviceAddress),
    EnforceSecurityPolicy(AddressWithType, SecurityPolicy, oneshot::Sender<bool>),
    EnforceLeSecurityPolicy(AddressWithType, LeSecurityPolicy, oneshot::Sender<bool>),
    GetRecord(AddressWithType, oneshot::Sender<Option<SecurityRecord>>),
}

/// The task side of the security module
pub struct SecurityModule<T, S, R> {
    manager: SecurityManager<T, S, R>,
    requests: mpsc::UnboundedReceiver<Request>,
}

impl<T, S, R> SecurityModule<T, S, R>
where
    T: Transport,
    S: Storage,
    R: CryptoRng + RngCore,
{
    /// Create a new security module and the first handle to it
    pub fn new(manager: SecurityManager<T, S, R>) -> (Self, SecurityManagerHandle) {
        let (sender, requests) = mpsc::unbounded();

        (SecurityModule { manager, requests }, SecurityManagerHandle { sender })
    }

    /// Run the security module
    ///
    /// This returns the security manager once every handle is dropped.
    pub async fn run(mut self) -> SecurityManager<T, S, R> {
        while let Some(request) = self.requests.next().await {
            self.process(request)
        }

        log::info!("(SM) security module stopped");

        self.manager
    }

    fn process(&mut self, request: Request) {
        let manager = &mut self.manager;

        match request {
            Request::CreateBond(peer) => manager.create_bond(peer),
            Request::CreateBondOutOfBand(peer, p192, p256) => manager.create_bond_out_of_band(peer, p192, p256),
            Request::CreateBondLe(peer) => manager.create_bond_le(peer),
            Request::CancelBond(peer) => manager.cancel_bond(peer),
            Request::RemoveBond(peer) => manager.remove_bond(peer),
            Request::SetIoCapability(io) => manager.set_io_capability(io),
            Request::SetAuthenticationRequirements(requirements) => manager.set_authentication_requirements(requirements),
            Request::SetLeIoCapability(io) => manager.set_le_io_capability(io),
            Request::SetLeAuthRequirements(auth_req) => manager.set_le_auth_requirements(auth_req),
            Request::SetLeMaximumEncryptionKeySize(size) => manager.set_le_maximum_encryption_key_size(size),
            Request::SetLeOobDataPresent(present) => manager.set_le_oob_data_present(present),
            Request::GetLeOutOfBandData(sender) => {
                let _ = sender.send(manager.get_le_out_of_band_data());
            }
            Request::SetOutOfBandData(peer, confirm, random) => manager.set_out_of_band_data(peer, confirm, random),
            Request::GetOutOfBandData => manager.get_out_of_band_data(),
            Request::RegisterListener(listener) => manager.register_callback_listener(listener),
            Request::SetUserInterfaceHandler(handler) => manager.set_user_interface_handler(handler),
            Request::PairingPromptAccepted(peer, accepted) => manager.on_pairing_prompt_accepted(peer, accepted),
            Request::ConfirmYesNo(peer, confirmed) => manager.on_confirm_yes_no(peer, confirmed),
            Request::PasskeyEntry(peer, passkey) => manager.on_passkey_entry(peer, passkey),
            Request::PinEntry(peer, pin) => manager.on_pin_entry(peer, pin),
            Request::SmpPdu(peer, data) => manager.on_smp_pdu(peer, &data),
            Request::SmpTimeout(peer) => manager.on_smp_timeout(peer),
            Request::HciEvent(event) => manager.on_hci_event(&event),
            Request::LeConnectionOpen {
                peer,
                handle,
                local,
                role,
            } => manager.on_le_connection_open(peer, handle, local, role),
            Request::LeConnectionClosed(peer) => manager.on_le_connection_closed(peer),
            Request::LeConnectionFailed(peer) => manager.on_le_connection_failed(peer),
            Request::ClassicConnectionComplete(address, handle) => {
                manager.on_classic_connection_complete(address, handle)
            }
            Request::ClassicConnectionClosed(address) => manager.on_classic_connection_closed(address),
            Request::EnforceSecurityPolicy(peer, policy, sender) => {
                manager.enforce_security_policy(peer, policy, move |result| {
                    let _ = sender.send(result);
                })
            }
            Request::EnforceLeSecurityPolicy(peer, policy, sender) => {
                manager.enforce_le_security_policy(peer, policy, move |result| {
                    let _ = sender.send(result);
                })
            }
            Request::GetRecord(peer, sender) => {
                let _ = sender.send(manager.get_record(&peer).cloned());
            }
        }
    }
}

/// A handle to a running [`SecurityModule`]
///
/// Every method fails with [`ModuleStopped`] once the module is no longer running.
#[derive(Clone)]
pub struct SecurityManagerHandle {
    sender: mpsc::UnboundedSender<Request>,
}

impl SecurityManagerHandle {
    fn send(&self, request: Request) -> Result<(), ModuleStopped> {
        self.sender.unbounded_send(request).map_err(|_| ModuleStopped)
    }

    /// Send a request with a response
    ///
    /// The request is sent before the returned future is polled.
    fn query<V, F>(&self, f: F) -> impl Future<Output = Result<V, ModuleStopped>>
    where
        F: FnOnce(oneshot::Sender<V>) -> Request,
    {
        let (sender, receiver) = oneshot::channel();

        let sent = self.send(f(sender));

        async move {
            sent?;

            receiver.await.map_err(|_| ModuleStopped)
        }
    }

    pub fn create_bond(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::CreateBond(peer))
    }

    pub fn create_bond_out_of_band(
        &self,
        peer: AddressWithType,
        p192: Option<ClassicOobData>,
        p256: Option<ClassicOobData>,
    ) -> Result<(), ModuleStopped> {
        self.send(Request::CreateBondOutOfBand(peer, p192, p256))
    }

    pub fn create_bond_le(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::CreateBondLe(peer))
    }

    pub fn cancel_bond(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::CancelBond(peer))
    }

    pub fn remove_bond(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::RemoveBond(peer))
    }

    pub fn set_io_capability(&self, io_capability: ClassicIoCapability) -> Result<(), ModuleStopped> {
        self.send(Request::SetIoCapability(io_capability))
    }

    pub fn set_authentication_requirements(&self, requirements: ClassicAuthRequirements) -> Result<(), ModuleStopped> {
        self.send(Request::SetAuthenticationRequirements(requirements))
    }

    /// Set the BR/EDR configuration
    pub fn set_classic_config(&self, config: ClassicPairingConfig) -> Result<(), ModuleStopped> {
        self.set_io_capability(config.io_capability)?;

        self.set_authentication_requirements(config.authentication_requirements)
    }

    pub fn set_le_io_capability(&self, io_capability: IoCapability) -> Result<(), ModuleStopped> {
        self.send(Request::SetLeIoCapability(io_capability))
    }

    pub fn set_le_auth_requirements(&self, auth_req: AuthReq) -> Result<(), ModuleStopped> {
        self.send(Request::SetLeAuthRequirements(auth_req))
    }

    /// Set the maximum LE encryption key size
    ///
    /// # Panic
    /// `size` must be between 7 and 16
    pub fn set_le_maximum_encryption_key_size(&self, size: u8) -> Result<(), ModuleStopped> {
        assert!((7..=16).contains(&size), "invalid encryption key size {}", size);

        self.send(Request::SetLeMaximumEncryptionKeySize(size))
    }

    pub fn set_le_oob_data_present(&self, present: bool) -> Result<(), ModuleStopped> {
        self.send(Request::SetLeOobDataPresent(present))
    }

    /// Generate the LE out of band data, returns the confirm and random values
    pub fn get_le_out_of_band_data(&self) -> impl Future<Output = Result<(u128, u128), ModuleStopped>> {
        self.query(Request::GetLeOutOfBandData)
    }

    pub fn set_out_of_band_data(&self, peer: AddressWithType, confirm: u128, random: u128) -> Result<(), ModuleStopped> {
        self.send(Request::SetOutOfBandData(peer, confirm, random))
    }

    /// Read the BR/EDR out of band data of the controller
    ///
    /// The data is sent to the listeners as [`SecurityEvent::LocalOobData`].
    pub fn get_out_of_band_data(&self) -> Result<(), ModuleStopped> {
        self.send(Request::GetOutOfBandData)
    }

    /// Register a new listener, the returned receiver gets every [`SecurityEvent`]
    pub fn register_callback_listener(&self) -> Result<mpsc::UnboundedReceiver<SecurityEvent>, ModuleStopped> {
        let (sender, receiver) = mpsc::unbounded();

        self.send(Request::RegisterListener(sender))?;

        Ok(receiver)
    }

    /// Set the user interface, the returned receiver gets every [`UiRequest`]
    ///
    /// The module panics if the user interface was already set.
    pub fn set_user_interface_handler(&self) -> Result<mpsc::UnboundedReceiver<UiRequest>, ModuleStopped> {
        let (sender, receiver) = mpsc::unbounded();

        self.send(Request::SetUserInterfaceHandler(sender))?;

        Ok(receiver)
    }

    pub fn on_pairing_prompt_accepted(&self, peer: AddressWithType, accepted: bool) -> Result<(), ModuleStopped> {
        self.send(Request::PairingPromptAccepted(peer, accepted))
    }

    pub fn on_confirm_yes_no(&self, peer: AddressWithType, confirmed: bool) -> Result<(), ModuleStopped> {
        self.send(Request::ConfirmYesNo(peer, confirmed))
    }

    pub fn on_passkey_entry(&self, peer: AddressWithType, passkey: u32) -> Result<(), ModuleStopped> {
        self.send(Request::PasskeyEntry(peer, passkey))
    }

    pub fn on_pin_entry(&self, peer: AddressWithType, pin: Vec<u8>) -> Result<(), ModuleStopped> {
        self.send(Request::PinEntry(peer, pin))
    }

    pub fn on_smp_pdu(&self, peer: AddressWithType, data: Vec<u8>) -> Result<(), ModuleStopped> {
        self.send(Request::SmpPdu(peer, data))
    }

    pub fn on_smp_timeout(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::SmpTimeout(peer))
    }

    pub fn on_hci_event(&self, event: HciEvent) -> Result<(), ModuleStopped> {
        self.send(Request::HciEvent(event))
    }

    pub fn on_le_connection_open(
        &self,
        peer: AddressWithType,
        handle: ConnectionHandle,
        local: AddressWithType,
        role: Role,
    ) -> Result<(), ModuleStopped> {
        self.send(Request::LeConnectionOpen {
            peer,
            handle,
            local,
            role,
        })
    }

    pub fn on_le_connection_closed(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::LeConnectionClosed(peer))
    }

    pub fn on_le_connection_failed(&self, peer: AddressWithType) -> Result<(), ModuleStopped> {
        self.send(Request::LeConnectionFailed(peer))
    }

    pub fn on_classic_connection_complete(
        &self,
        address: BluetoothDeviceAddress,
        handle: ConnectionHandle,
    ) -> Result<(), ModuleStopped> {
        self.send(Request::ClassicConnectionComplete(address, handle))
    }

    pub fn on_classic_connection_closed(&self, address: BluetoothDeviceAddress) -> Result<(), ModuleStopped> {
        self.send(Request::ClassicConnectionClosed(address))
    }

    /// Enforce a security policy on the BR/EDR link to `peer`
    ///
    /// The request is sent when this is called, the returned future resolves once the policy is
    /// satisfied or pairing to satisfy it ended.
    pub fn enforce_security_policy(
        &self,
        peer: AddressWithType,
        policy: SecurityPolicy,
    ) -> impl Future<Output = Result<bool, ModuleStopped>> {
        self.query(move |sender| Request::EnforceSecurityPolicy(peer, policy, sender))
    }

    pub fn enforce_le_security_policy(
        &self,
        peer: AddressWithType,
        policy: LeSecurityPolicy,
    ) -> impl Future<Output = Result<bool, ModuleStopped>> {
        self.query(move |sender| Request::EnforceLeSecurityPolicy(peer, policy, sender))
    }

    /// Get a copy of the security record of `peer`
    pub fn get_record(
        &self,
        peer: AddressWithType,
    ) -> impl Future<Output = Result<Option<SecurityRecord>, ModuleStopped>> {
        self.query(move |sender| Request::GetRecord(peer, sender))
    }
}
