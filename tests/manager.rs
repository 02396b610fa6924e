mod common;

use bo_tie_security::hci::{ClassicIoCapability, ClassicAuthRequirements, ErrorCode, HciCommand, HciEvent, LinkKeyType};
use bo_tie_security::le::FailureReason;
use bo_tie_security::record::{MemoryStorage, Storage, ADAPTER_SECTION, LOCAL_IRK_KEY};
use bo_tie_security::smp::{AuthReq, IoCapability};
use bo_tie_security::ui::UiRequest;
use bo_tie_security::{
    AddressWithType, BluetoothDeviceAddress, LeSecurityPolicy, Role, SecurityEvent, SecurityLevel,
    SecurityManagerBuilder, SecurityPolicy,
};
use common::{pump_managers, TestManager, TestTransport, CENTRAL_ADDRESS, HANDLE, PERIPHERAL_ADDRESS};
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use std::sync::{Arc, Mutex};

/// The connection address of the central
fn central_connection() -> AddressWithType {
    AddressWithType::random(BluetoothDeviceAddress([0x21, 0x22, 0x23, 0x24, 0x25, 0x66]))
}

/// The connection address of the peripheral
fn peripheral_connection() -> AddressWithType {
    AddressWithType::random(BluetoothDeviceAddress([0x31, 0x32, 0x33, 0x34, 0x35, 0x76]))
}

fn manager(address: BluetoothDeviceAddress, io: IoCapability, seed: u64) -> TestManager {
    SecurityManagerBuilder::new(address)
        .set_le_io_capability(io)
        .set_le_auth_requirements(AuthReq::new(true, false, true, false))
        .build(TestTransport::default(), MemoryStorage::new(), common::rng(seed))
}

fn drain<T>(receiver: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();

    while let Ok(Some(item)) = receiver.try_next() {
        items.push(item)
    }

    items
}

struct Devices {
    central: TestManager,
    peripheral: TestManager,
    central_events: UnboundedReceiver<SecurityEvent>,
    peripheral_events: UnboundedReceiver<SecurityEvent>,
    central_ui: UnboundedReceiver<UiRequest>,
    peripheral_ui: UnboundedReceiver<UiRequest>,
}

impl Devices {
    fn new(central_io: IoCapability, peripheral_io: IoCapability) -> Self {
        Self::from_managers(
            manager(CENTRAL_ADDRESS, central_io, 10),
            manager(PERIPHERAL_ADDRESS, peripheral_io, 20),
        )
    }

    fn from_managers(mut central: TestManager, mut peripheral: TestManager) -> Self {
        let (sender, central_events) = unbounded();
        central.register_callback_listener(sender);

        let (sender, peripheral_events) = unbounded();
        peripheral.register_callback_listener(sender);

        let (sender, central_ui) = unbounded();
        central.set_user_interface_handler(sender);

        let (sender, peripheral_ui) = unbounded();
        peripheral.set_user_interface_handler(sender);

        Devices {
            central,
            peripheral,
            central_events,
            peripheral_events,
            central_ui,
            peripheral_ui,
        }
    }

    fn connect(&mut self) {
        self.central
            .on_le_connection_open(peripheral_connection(), HANDLE, central_connection(), Role::Central);

        self.peripheral
            .on_le_connection_open(central_connection(), HANDLE, peripheral_connection(), Role::Peripheral);
    }

    fn pump(&mut self) {
        pump_managers(
            &mut self.central,
            central_connection(),
            &mut self.peripheral,
            peripheral_connection(),
        )
    }

    fn bond(&mut self) {
        self.connect();

        self.central.create_bond_le(peripheral_connection());

        self.pump();
    }
}

#[test]
fn init_configures_controller_and_stores_irk() {
    common::init_logger();

    let manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 1);

    assert_eq!(
        vec![
            HciCommand::WriteSimplePairingMode { enabled: true },
            HciCommand::WriteSecureConnectionsHostSupport { enabled: true },
        ],
        manager.transport().hci
    );

    let stored = manager
        .get_storage()
        .get_property(ADAPTER_SECTION, LOCAL_IRK_KEY)
        .expect("no stored IRK");

    assert_eq!(32, stored.len());

    let storage = manager.get_storage().clone();

    let irk = manager.get_local_irk();

    // the stored IRK is reused
    let rebuilt = SecurityManagerBuilder::new(CENTRAL_ADDRESS).build(TestTransport::default(), storage, common::rng(2));

    assert_eq!(irk, rebuilt.get_local_irk());
}

#[test]
fn le_just_works_bond() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::NoInputNoOutput, IoCapability::DisplayWithYesOrNo);

    devices.bond();

    assert!(drain(&mut devices.central_ui).is_empty());
    assert!(drain(&mut devices.peripheral_ui).is_empty());

    let identity = AddressWithType::public(PERIPHERAL_ADDRESS);

    assert_eq!(
        vec![
            SecurityEvent::DeviceBonded(peripheral_connection()),
            SecurityEvent::DeviceBonded(identity),
        ],
        drain(&mut devices.central_events)
    );

    assert!(drain(&mut devices.peripheral_events).contains(&SecurityEvent::DeviceBonded(central_connection())));

    let record = devices.central.get_record(&peripheral_connection()).expect("no record");

    assert!(record.is_paired());
    assert!(!record.is_pairing());
    assert!(!record.is_temporary());
    assert_eq!(SecurityLevel::UnauthenticatedSecureConnections, record.security_level);
    assert_eq!(Some(identity), record.identity_address);
    assert_eq!(Some(devices.peripheral.get_local_irk()), record.remote_irk);
    assert_eq!(Some(16), record.key_size);

    // both sides keep the long term key that encrypted the link
    let peripheral_record = devices.peripheral.get_record(&central_connection()).expect("no record");

    assert!(record.ltk.is_some());
    assert_eq!(record.ltk, peripheral_record.ltk);
    assert_eq!(
        record.get_le_encryption_key(Role::Central),
        peripheral_record.get_le_encryption_key(Role::Peripheral)
    );

    assert_eq!(None, devices.central.get_pending_le_address());
    assert_eq!(None, devices.peripheral.get_pending_le_address());

    // the record was saved
    let mut loaded = bo_tie_security::record::SecurityDatabase::new();

    loaded.load_records_from_storage(devices.central.get_storage());

    assert_eq!(Some(record), loaded.find(&peripheral_connection()));
    assert_eq!(record.ltk, loaded.find(&peripheral_connection()).and_then(|r| r.ltk));

    let mut loaded = bo_tie_security::record::SecurityDatabase::new();

    loaded.load_records_from_storage(devices.peripheral.get_storage());

    assert_eq!(record.ltk, loaded.find(&central_connection()).and_then(|r| r.ltk));
}

#[test]
fn le_legacy_bond_keeps_distributed_keys() {
    common::init_logger();

    let legacy = |address, seed| {
        SecurityManagerBuilder::new(address)
            .set_le_io_capability(IoCapability::NoInputNoOutput)
            .set_le_auth_requirements(AuthReq::new(true, false, false, false))
            .build(TestTransport::default(), MemoryStorage::new(), common::rng(seed))
    };

    let mut devices = Devices::from_managers(legacy(CENTRAL_ADDRESS, 11), legacy(PERIPHERAL_ADDRESS, 21));

    devices.bond();

    let central_record = devices.central.get_record(&peripheral_connection()).expect("no record");
    let peripheral_record = devices.peripheral.get_record(&central_connection()).expect("no record");

    assert!(central_record.is_paired());
    assert_eq!(SecurityLevel::UnauthenticatedLegacy, central_record.security_level);
    assert_eq!(None, central_record.ltk);

    // the central encrypts with the key distributed by the peripheral
    let key = central_record.get_le_encryption_key(Role::Central);

    assert!(key.is_some());
    assert_eq!(key, peripheral_record.get_le_encryption_key(Role::Peripheral));
    assert_eq!(central_record.remote_ltk, peripheral_record.local_ltk);

    let mut loaded = bo_tie_security::record::SecurityDatabase::new();

    loaded.load_records_from_storage(devices.peripheral.get_storage());

    assert_eq!(
        key,
        loaded
            .find(&central_connection())
            .and_then(|r| r.get_le_encryption_key(Role::Peripheral))
    );
}

#[test]
fn bonding_a_bonded_device() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::NoInputNoOutput, IoCapability::NoInputNoOutput);

    devices.bond();

    drain(&mut devices.central_events);

    devices.central.create_bond(peripheral_connection());

    assert_eq!(
        vec![SecurityEvent::DeviceBonded(peripheral_connection())],
        drain(&mut devices.central_events)
    );

    devices.central.create_bond_le(peripheral_connection());

    match drain(&mut devices.central_events).as_slice() {
        [SecurityEvent::DeviceBondFailed(address, failure)] => {
            assert_eq!(peripheral_connection(), *address);
            assert_eq!(FailureReason::AlreadyBonded, failure.get_reason());
        }
        other => panic!("unexpected events {:?}", other),
    }

    assert!(devices.central.transport().smp.is_empty());
    assert!(devices.central.transport().classic_connects.is_empty());
}

#[test]
fn bonding_connects_first() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::NoInputNoOutput, IoCapability::NoInputNoOutput);

    devices.central.create_bond_le(peripheral_connection());

    assert_eq!(vec![peripheral_connection()], devices.central.transport().le_connects);
    assert!(devices.central.transport().smp.is_empty());

    devices.connect();

    assert_eq!(Some(peripheral_connection()), devices.central.get_pending_le_address());

    devices.pump();

    assert!(devices
        .central
        .get_record(&peripheral_connection())
        .map_or(false, |record| record.is_paired()));
}

#[test]
fn cancel_bond() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::KeyboardDisplay, IoCapability::KeyboardDisplay);

    devices.connect();

    devices.central.create_bond_le(peripheral_connection());

    assert!(devices.central.get_record(&peripheral_connection()).unwrap().is_pairing());

    devices.central.cancel_bond(peripheral_connection());

    match drain(&mut devices.central_events).as_slice() {
        [SecurityEvent::DeviceBondFailed(address, failure)] => {
            assert_eq!(peripheral_connection(), *address);
            assert_eq!(FailureReason::Canceled, failure.get_reason());
        }
        other => panic!("unexpected events {:?}", other),
    }

    assert_eq!(
        vec![UiRequest::Cancel(peripheral_connection())],
        drain(&mut devices.central_ui)
    );

    assert_eq!(None, devices.central.get_pending_le_address());
    assert!(!devices.central.get_record(&peripheral_connection()).unwrap().is_pairing());

    // the peer answers the pairing request after the bond was canceled
    for (_, pdu) in core::mem::take(&mut devices.central.transport_mut().smp) {
        devices.peripheral.on_smp_pdu(central_connection(), &pdu);
    }

    let responses = core::mem::take(&mut devices.peripheral.transport_mut().smp);

    assert!(!responses.is_empty());

    for (_, pdu) in responses {
        devices.central.on_smp_pdu(peripheral_connection(), &pdu);
    }

    assert!(devices.central.transport().smp.is_empty());
    assert!(drain(&mut devices.central_events).is_empty());
    assert!(drain(&mut devices.central_ui).is_empty());
    assert_eq!(None, devices.central.get_pending_le_address());
    assert!(!devices.central.get_record(&peripheral_connection()).unwrap().is_pairing());
}

#[test]
fn connection_closed_during_pairing() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::KeyboardDisplay, IoCapability::KeyboardDisplay);

    devices.connect();

    devices.central.create_bond_le(peripheral_connection());

    devices.central.on_le_connection_closed(peripheral_connection());

    match drain(&mut devices.central_events).as_slice() {
        [SecurityEvent::DeviceBondFailed(_, failure)] => {
            assert_eq!(FailureReason::ConnectionClosed, failure.get_reason())
        }
        other => panic!("unexpected events {:?}", other),
    }

    assert!(drain(&mut devices.central_ui).is_empty());
    assert_eq!(None, devices.central.get_pending_le_address());
}

#[test]
fn remove_bond() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::NoInputNoOutput, IoCapability::NoInputNoOutput);

    devices.bond();

    drain(&mut devices.central_events);

    devices.central.remove_bond(peripheral_connection());

    assert!(devices.central.get_record(&peripheral_connection()).is_none());

    assert_eq!(
        vec![SecurityEvent::DeviceUnbonded(peripheral_connection())],
        drain(&mut devices.central_events)
    );

    assert_eq!(vec![peripheral_connection()], devices.central.transport().disconnects);

    assert!(devices.central.transport().hci.contains(&HciCommand::DeleteStoredLinkKey {
        address: Some(peripheral_connection().address)
    }));

    let mut loaded = bo_tie_security::record::SecurityDatabase::new();

    loaded.load_records_from_storage(devices.central.get_storage());

    assert!(loaded.find(&peripheral_connection()).is_none());
}

#[test]
fn le_security_policy() {
    common::init_logger();

    let mut devices = Devices::new(IoCapability::NoInputNoOutput, IoCapability::NoInputNoOutput);

    let check = |manager: &mut TestManager, policy| {
        let mut result = None;

        manager.enforce_le_security_policy(peripheral_connection(), policy, |r| result = Some(r));

        result.expect("callback not called")
    };

    assert!(check(&mut devices.central, LeSecurityPolicy::NoSecurity));
    assert!(!check(&mut devices.central, LeSecurityPolicy::EncryptedTransport));

    devices.bond();

    assert!(check(&mut devices.central, LeSecurityPolicy::EncryptedTransport));
    assert!(!check(&mut devices.central, LeSecurityPolicy::AuthenticatedEncryptedTransport));
    assert!(!check(&mut devices.central, LeSecurityPolicy::Best));
}

#[test]
#[should_panic]
fn registering_a_listener_twice() {
    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 3);

    let (sender, _receiver) = unbounded();

    manager.register_callback_listener(sender.clone());

    manager.register_callback_listener(sender);
}

#[test]
#[should_panic]
fn invalid_maximum_key_size() {
    SecurityManagerBuilder::new(CENTRAL_ADDRESS).set_le_maximum_encryption_key_size(17);
}

#[test]
fn closed_listeners_are_removed() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 4);

    let (sender, receiver) = unbounded();

    manager.register_callback_listener(sender.clone());

    drop(receiver);

    manager.on_hci_event(&HciEvent::EncryptionChange {
        status: ErrorCode::NoError,
        handle: 7,
        enabled: true,
    });

    // unregistering panics if the listener was not removed
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        manager.unregister_callback_listener(&sender)
    }));

    assert!(result.is_err());
}

#[test]
fn encryption_change_of_other_link() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 5);

    let (sender, mut events) = unbounded();

    manager.register_callback_listener(sender);

    manager.on_hci_event(&HciEvent::EncryptionChange {
        status: ErrorCode::NoError,
        handle: 7,
        enabled: true,
    });

    assert_eq!(
        vec![SecurityEvent::EncryptionStateChanged {
            handle: 7,
            status: ErrorCode::NoError,
            enabled: true
        }],
        drain(&mut events)
    );
}

fn classic_peer() -> BluetoothDeviceAddress {
    BluetoothDeviceAddress([0x41, 0x42, 0x43, 0x44, 0x45, 0x46])
}

#[test]
fn classic_remotely_initiated_just_works() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 6);

    let (sender, mut events) = unbounded();

    manager.register_callback_listener(sender);

    manager.transport_mut().hci.clear();

    let address = classic_peer();

    // an event that is not on the allow list does not create a handler
    manager.on_hci_event(&HciEvent::UserPasskeyRequest { address });

    assert!(!manager.has_classic_handler(&address));

    manager.on_hci_event(&HciEvent::IoCapabilityResponse {
        address,
        io_capability: ClassicIoCapability::NoInputNoOutput,
        oob_data_present: false,
        authentication_requirements: ClassicAuthRequirements::GeneralBonding,
    });

    assert!(manager.has_classic_handler(&address));

    manager.on_hci_event(&HciEvent::IoCapabilityRequest { address });

    manager.on_hci_event(&HciEvent::UserConfirmationRequest {
        address,
        numeric_value: 123_456,
    });

    manager.on_hci_event(&HciEvent::SimplePairingComplete {
        status: ErrorCode::NoError,
        address,
    });

    let link_key = [0xab; 16];

    manager.on_hci_event(&HciEvent::LinkKeyNotification {
        address,
        link_key,
        key_type: LinkKeyType::UnauthenticatedCombinationP256,
    });

    let sent = &manager.transport().hci;

    assert!(matches!(sent[0], HciCommand::IoCapabilityRequestReply { .. }));
    assert_eq!(HciCommand::UserConfirmationRequestReply { address }, sent[1]);

    let peer = AddressWithType::public(address);

    assert_eq!(vec![SecurityEvent::DeviceBonded(peer)], drain(&mut events));

    let record = manager.get_record(&peer).expect("no record");

    assert_eq!(Some(&link_key), record.get_link_key());
    assert!(record.is_paired());
    assert!(!record.is_authenticated());
    assert!(!manager.has_classic_handler(&address));
}

#[test]
fn classic_bond_connects_then_authenticates() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 7);

    let address = classic_peer();

    manager.create_bond(AddressWithType::public(address));

    assert_eq!(vec![address], manager.transport().classic_connects);

    manager.transport_mut().hci.clear();

    manager.on_classic_connection_complete(address, 0x20);

    assert_eq!(
        vec![HciCommand::AuthenticationRequested { handle: 0x20 }],
        manager.transport().hci
    );
}

#[test]
fn classic_connection_closed_removes_temporary_record() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 8);

    let (sender, mut events) = unbounded();

    manager.register_callback_listener(sender);

    let address = classic_peer();

    manager.on_hci_event(&HciEvent::LinkKeyRequest { address });

    assert!(manager.has_classic_handler(&address));

    manager.on_classic_connection_closed(address);

    match drain(&mut events).as_slice() {
        [SecurityEvent::DeviceBondFailed(_, failure)] => {
            assert_eq!(FailureReason::ConnectionClosed, failure.get_reason())
        }
        other => panic!("unexpected events {:?}", other),
    }

    assert!(manager.get_record(&AddressWithType::public(address)).is_none());
}

#[test]
fn security_policy_pairs_when_needed() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 9);

    let address = classic_peer();

    let peer = AddressWithType::public(address);

    let result = Arc::new(Mutex::new(None));

    let callback_result = result.clone();

    manager.enforce_security_policy(peer, SecurityPolicy::EncryptedTransport, move |satisfied| {
        *callback_result.lock().unwrap() = Some(satisfied)
    });

    assert_eq!(None, *result.lock().unwrap());

    assert!(manager.has_classic_handler(&address));

    assert_eq!(vec![address], manager.transport().classic_connects);

    manager.on_hci_event(&HciEvent::LinkKeyNotification {
        address,
        link_key: [1; 16],
        key_type: LinkKeyType::UnauthenticatedCombinationP256,
    });

    assert_eq!(Some(true), *result.lock().unwrap());

    // satisfied policies call back immediately
    *result.lock().unwrap() = None;

    let callback_result = result.clone();

    manager.enforce_security_policy(peer, SecurityPolicy::EncryptedTransport, move |satisfied| {
        *callback_result.lock().unwrap() = Some(satisfied)
    });

    assert_eq!(Some(true), *result.lock().unwrap());

    assert_eq!(vec![address], manager.transport().classic_connects);
}

#[test]
fn classic_stored_link_key_responder() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 12);

    let (sender, mut events) = unbounded();

    manager.register_callback_listener(sender);

    let address = classic_peer();

    let peer = AddressWithType::public(address);

    manager.create_bond(peer);

    manager.on_hci_event(&HciEvent::LinkKeyNotification {
        address,
        link_key: [3; 16],
        key_type: LinkKeyType::UnauthenticatedCombinationP256,
    });

    assert_eq!(vec![SecurityEvent::DeviceBonded(peer)], drain(&mut events));

    // the peer authenticates a later connection with the stored key
    manager.on_classic_connection_complete(address, 0x21);

    manager.transport_mut().hci.clear();

    manager.on_hci_event(&HciEvent::LinkKeyRequest { address });

    assert_eq!(
        vec![HciCommand::LinkKeyRequestReply {
            address,
            link_key: [3; 16]
        }],
        manager.transport().hci
    );

    assert!(manager.has_classic_handler(&address));

    manager.on_hci_event(&HciEvent::EncryptionChange {
        status: ErrorCode::NoError,
        handle: 0x21,
        enabled: true,
    });

    assert_eq!(
        vec![
            SecurityEvent::EncryptionStateChanged {
                handle: 0x21,
                status: ErrorCode::NoError,
                enabled: true
            },
            SecurityEvent::DeviceBonded(peer),
        ],
        drain(&mut events)
    );

    assert!(!manager.has_classic_handler(&address));
    assert!(!manager.get_record(&peer).expect("no record").is_pairing());

    // a later policy request does not wait on a leftover handler
    let result = Arc::new(Mutex::new(None));

    let callback_result = result.clone();

    manager.enforce_security_policy(peer, SecurityPolicy::EncryptedTransport, move |satisfied| {
        *callback_result.lock().unwrap() = Some(satisfied)
    });

    assert_eq!(Some(true), *result.lock().unwrap());
}

#[test]
fn classic_bond_with_random_address_fails() {
    common::init_logger();

    let mut manager = manager(CENTRAL_ADDRESS, IoCapability::KeyboardDisplay, 13);

    let (sender, mut events) = unbounded();

    manager.register_callback_listener(sender);

    let peer = AddressWithType::random(classic_peer());

    manager.create_bond(peer);

    match drain(&mut events).as_slice() {
        [SecurityEvent::DeviceBondFailed(address, failure)] => {
            assert_eq!(peer, *address);
            assert_eq!(FailureReason::InvalidParameters, failure.get_reason());
        }
        other => panic!("unexpected events {:?}", other),
    }

    assert!(!manager.has_classic_handler(&peer.address));
    assert!(manager.transport().classic_connects.is_empty());
    assert!(manager.get_record(&peer).is_none());

    let result = Arc::new(Mutex::new(None));

    let callback_result = result.clone();

    manager.enforce_security_policy(peer, SecurityPolicy::Best, move |satisfied| {
        *callback_result.lock().unwrap() = Some(satisfied)
    });

    assert_eq!(Some(false), *result.lock().unwrap());
}
