//! Helpers shared by the integration tests
//!
//! The controllers of both devices are simulated by moving the output of one device to the input
//! of the other. Encrypting the link is simulated by answering the `LE Enable Encryption` command
//! of the central with a `LE Long Term Key Request` event to the peripheral, and the peripheral's
//! reply with an `Encryption Change` event to both.

#![allow(dead_code)]

use bo_tie_security::hci::{ConnectionHandle, ErrorCode, HciCommand, HciEvent};
use bo_tie_security::le::{LeLinkInfo, LePairingConfig, LePairingHandler, PairingContext, Progress};
use bo_tie_security::record::MemoryStorage;
use bo_tie_security::smp::SmpPdu;
use bo_tie_security::ui::UiRequest;
use bo_tie_security::{
    AddressWithType, BluetoothDeviceAddress, IdentityAddress, Role, SecurityManager, Transport,
};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;

pub const HANDLE: ConnectionHandle = 0x40;

pub const CENTRAL_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0xc6]);

pub const PERIPHERAL_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]);

pub fn init_logger() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}

pub fn rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

/// The output of a `LePairingHandler`
pub struct Endpoint {
    pub smp: Vec<Vec<u8>>,
    pub hci: Vec<HciCommand>,
    pub ui: Vec<UiRequest>,
    rng: ChaCha20Rng,
}

impl Endpoint {
    pub fn new(seed: u64) -> Self {
        Endpoint {
            smp: Vec::new(),
            hci: Vec::new(),
            ui: Vec::new(),
            rng: rng(seed),
        }
    }

    /// Get the sent PDUs
    pub fn sent_pdus(&self) -> Vec<SmpPdu> {
        self.smp
            .iter()
            .map(|pdu| SmpPdu::try_from_bytes(pdu).expect("invalid sent PDU"))
            .collect()
    }
}

impl PairingContext for Endpoint {
    type Rng = ChaCha20Rng;

    fn send_smp(&mut self, _: &AddressWithType, pdu: Vec<u8>) {
        self.smp.push(pdu)
    }

    fn send_hci(&mut self, command: HciCommand) {
        self.hci.push(command)
    }

    fn post_ui(&mut self, request: UiRequest) {
        self.ui.push(request)
    }

    fn rng(&mut self) -> &mut ChaCha20Rng {
        &mut self.rng
    }
}

/// One side of a LE pairing between two handlers
pub struct Side {
    pub handler: LePairingHandler,
    pub out: Endpoint,
    pub progress: Option<Progress>,
    /// Every PDU sent by this side
    pub sent: Vec<SmpPdu>,
}

impl Side {
    pub fn record(&mut self, progress: Progress) {
        if !progress.is_pending() {
            assert!(self.progress.is_none(), "pairing ended twice");

            self.progress = Some(progress);
        }
    }

    pub fn take_ui(&mut self) -> Vec<UiRequest> {
        core::mem::take(&mut self.out.ui)
    }
}

pub fn central_link() -> LeLinkInfo {
    LeLinkInfo {
        peer: AddressWithType::public(PERIPHERAL_ADDRESS),
        local: AddressWithType::random(CENTRAL_ADDRESS),
        role: Role::Central,
        handle: HANDLE,
        local_identity: IdentityAddress::StaticRandom(CENTRAL_ADDRESS),
        local_irk: 0x1111_2222_3333_4444_5555_6666_7777_8888,
    }
}

pub fn peripheral_link() -> LeLinkInfo {
    LeLinkInfo {
        peer: AddressWithType::random(CENTRAL_ADDRESS),
        local: AddressWithType::public(PERIPHERAL_ADDRESS),
        role: Role::Peripheral,
        handle: HANDLE,
        local_identity: IdentityAddress::Public(PERIPHERAL_ADDRESS),
        local_irk: 0x9999_aaaa_bbbb_cccc_dddd_eeee_ffff_0000,
    }
}

/// A pairing between two `LePairingHandler`s
pub struct HandlerPair {
    pub central: Side,
    pub peripheral: Side,
    /// The key given to the controller of the central with `LE Enable Encryption`
    pub central_key: Option<u128>,
}

impl HandlerPair {
    pub fn new(central: LePairingHandler, peripheral: LePairingHandler) -> Self {
        let side = |handler, seed| Side {
            handler,
            out: Endpoint::new(seed),
            progress: None,
            sent: Vec::new(),
        };

        HandlerPair {
            central: side(central, 1),
            peripheral: side(peripheral, 2),
            central_key: None,
        }
    }

    pub fn with_configs(central: LePairingConfig, peripheral: LePairingConfig) -> Self {
        Self::new(
            LePairingHandler::new(central_link(), central),
            LePairingHandler::new(peripheral_link(), peripheral),
        )
    }

    /// Start pairing at the central
    pub fn start(&mut self) {
        let progress = self.central.handler.start(&mut self.central.out);

        self.central.record(progress);
    }

    /// Move the output of each side to the other until neither sends anything
    pub fn pump(&mut self) {
        loop {
            let mut moved = false;

            moved |= Self::deliver_smp(&mut self.central, &mut self.peripheral);

            moved |= Self::deliver_smp(&mut self.peripheral, &mut self.central);

            for command in core::mem::take(&mut self.central.out.hci) {
                if let HciCommand::LeEnableEncryption { long_term_key, .. } = command {
                    moved = true;

                    self.central_key = Some(long_term_key);

                    let progress = self.peripheral.handler.on_long_term_key_request(&mut self.peripheral.out);

                    self.peripheral.record(progress);
                }
            }

            for command in core::mem::take(&mut self.peripheral.out.hci) {
                if let HciCommand::LeLongTermKeyRequestReply { long_term_key, .. } = command {
                    moved = true;

                    let status = if Some(long_term_key) == self.central_key {
                        ErrorCode::NoError
                    } else {
                        ErrorCode::AuthenticationFailure
                    };

                    let progress = self
                        .central
                        .handler
                        .on_encryption_change(&mut self.central.out, status, status.is_ok());

                    self.central.record(progress);

                    let progress = self
                        .peripheral
                        .handler
                        .on_encryption_change(&mut self.peripheral.out, status, status.is_ok());

                    self.peripheral.record(progress);
                }
            }

            if !moved {
                break;
            }
        }
    }

    fn deliver_smp(from: &mut Side, to: &mut Side) -> bool {
        let pdus = core::mem::take(&mut from.out.smp);

        let moved = !pdus.is_empty();

        for bytes in pdus {
            let pdu = SmpPdu::try_from_bytes(&bytes).expect("invalid PDU");

            from.sent.push(pdu.clone());

            let progress = to.handler.on_smp_pdu(&mut to.out, pdu);

            to.record(progress);
        }

        moved
    }
}

/// A `Transport` that records everything sent through it
#[derive(Default)]
pub struct TestTransport {
    pub smp: Vec<(AddressWithType, Vec<u8>)>,
    pub hci: Vec<HciCommand>,
    pub le_connects: Vec<AddressWithType>,
    pub classic_connects: Vec<BluetoothDeviceAddress>,
    pub disconnects: Vec<AddressWithType>,
}

impl Transport for TestTransport {
    fn send_smp(&mut self, peer: &AddressWithType, pdu: Vec<u8>) {
        self.smp.push((*peer, pdu))
    }

    fn send_hci(&mut self, command: HciCommand) {
        self.hci.push(command)
    }

    fn connect_le(&mut self, peer: &AddressWithType) {
        self.le_connects.push(*peer)
    }

    fn connect_classic(&mut self, peer: &BluetoothDeviceAddress) {
        self.classic_connects.push(*peer)
    }

    fn disconnect(&mut self, peer: &AddressWithType) {
        self.disconnects.push(*peer)
    }
}

pub type TestManager = SecurityManager<TestTransport, MemoryStorage, ChaCha20Rng>;

/// Move the output of two security managers connected by a LE link to each other
///
/// `central_address` is the address of the central as seen by the peripheral and
/// `peripheral_address` is the address of the peripheral as seen by the central.
pub fn pump_managers(
    central: &mut TestManager,
    central_address: AddressWithType,
    peripheral: &mut TestManager,
    peripheral_address: AddressWithType,
) {
    let mut central_key = None;

    loop {
        let mut moved = false;

        for (_, pdu) in core::mem::take(&mut central.transport_mut().smp) {
            moved = true;

            peripheral.on_smp_pdu(central_address, &pdu);
        }

        for (_, pdu) in core::mem::take(&mut peripheral.transport_mut().smp) {
            moved = true;

            central.on_smp_pdu(peripheral_address, &pdu);
        }

        for command in core::mem::take(&mut central.transport_mut().hci) {
            if let HciCommand::LeEnableEncryption {
                handle,
                random,
                ediv,
                long_term_key,
            } = command
            {
                moved = true;

                central_key = Some(long_term_key);

                peripheral.on_hci_event(&HciEvent::LeLongTermKeyRequest { handle, random, ediv });
            }
        }

        for command in core::mem::take(&mut peripheral.transport_mut().hci) {
            if let HciCommand::LeLongTermKeyRequestReply { handle, long_term_key } = command {
                moved = true;

                let status = if Some(long_term_key) == central_key {
                    ErrorCode::NoError
                } else {
                    ErrorCode::AuthenticationFailure
                };

                let event = HciEvent::EncryptionChange {
                    status,
                    handle,
                    enabled: status.is_ok(),
                };

                central.on_hci_event(&event);

                peripheral.on_hci_event(&event);
            }
        }

        if !moved {
            break;
        }
    }
}
