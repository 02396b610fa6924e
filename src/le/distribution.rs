//! Link encryption and key distribution
//!
//! After phase 2 the central encrypts the link with the LTK (the STK for legacy pairing) and the
//! peripheral answers the long term key request of its controller. Once the link is encrypted the
//! responder distributes its keys first and then the initiator distributes its keys.

use super::{FailureReason, Flow, LePairingHandler, LinkEvent, PairingContext, PairingFailure, Step};
use crate::hci::HciCommand;
use crate::smp::{
    CentralIdentification, CommandType, EncryptionInformation, IdentityAddressInformation, IdentityInformation,
    KeyDistributions, SigningInformation, SmpPdu,
};
use crate::toolbox;
use rand_core::RngCore;

impl LePairingHandler {
    /// Start encrypting the link
    pub(super) fn begin_encryption<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        if self.is_central() {
            log::info!("(SM) enabling encryption of link {:#x}", self.link.handle);

            ctx.send_hci(HciCommand::LeEnableEncryption {
                handle: self.link.handle,
                random: 0,
                ediv: 0,
                long_term_key: self.ltk,
            });

            self.step = Step::WaitEncryptionChange;
        } else {
            self.step = Step::WaitLongTermKeyRequest;
        }

        Ok(Flow::Continue)
    }

    pub(super) fn wait_long_term_key_request<C: PairingContext>(
        &mut self,
        ctx: &mut C,
    ) -> Result<Flow, PairingFailure> {
        match self.link_inbox.pop_front() {
            None => Ok(Flow::Wait),
            Some(LinkEvent::LongTermKeyRequest) => {
                ctx.send_hci(HciCommand::LeLongTermKeyRequestReply {
                    handle: self.link.handle,
                    long_term_key: self.ltk,
                });

                self.step = Step::WaitEncryptionChange;

                Ok(Flow::Continue)
            }
            Some(LinkEvent::EncryptionChange { .. }) => Err(PairingFailure::new(
                FailureReason::EncryptionFailed,
                "Encryption changed before the long term key was requested",
            )),
        }
    }

    pub(super) fn wait_encryption_change<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        match self.link_inbox.pop_front() {
            None => Ok(Flow::Wait),
            Some(LinkEvent::EncryptionChange { status, enabled: true }) if status.is_ok() => {
                self.begin_key_distribution(ctx)
            }
            Some(LinkEvent::EncryptionChange { status, .. }) => Err(PairingFailure::new(
                FailureReason::EncryptionFailed,
                format!("Failed to encrypt the link: {}", status),
            )),
            Some(LinkEvent::LongTermKeyRequest) => {
                log::warn!("(SM) ignoring repeated long term key request");

                Ok(Flow::Continue)
            }
        }
    }

    fn begin_key_distribution<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let (_, response) = self.features()?;

        let sc_filter = |distribution: KeyDistributions| {
            let mut distribution = distribution;

            if self.secure_connections {
                distribution.enc_key = false;
            }

            distribution.link_key = false;

            distribution
        };

        let initiator = sc_filter(response.get_initiator_key_distribution());

        let responder = sc_filter(response.get_responder_key_distribution());

        let (local, remote) = if self.is_central() {
            (initiator, responder)
        } else {
            (responder, initiator)
        };

        self.local_distribution = local;

        self.expected_keys.clear();

        if remote.enc_key {
            self.expected_keys.push_back(CommandType::EncryptionInformation);
            self.expected_keys.push_back(CommandType::CentralIdentification);
        }

        if remote.id_key {
            self.expected_keys.push_back(CommandType::IdentityInformation);
            self.expected_keys.push_back(CommandType::IdentityAddressInformation);
        }

        if remote.sign_key {
            self.expected_keys.push_back(CommandType::SigningInformation);
        }

        log::info!(
            "(SM) link encrypted, distributing {:#x}, expecting {:#x}",
            local.into_val(),
            remote.into_val()
        );

        if !self.is_central() {
            self.send_keys(ctx);
        }

        self.step = Step::ReceiveKeys;

        Ok(Flow::Continue)
    }

    /// Send the keys this device distributes
    fn send_keys<C: PairingContext>(&mut self, ctx: &mut C) {
        let distribution = self.local_distribution;

        if distribution.enc_key && !self.secure_connections {
            let ltk = super::mask_key(toolbox::rand_u128(ctx.rng()), self.key_size);

            let ediv = ctx.rng().next_u32() as u16;

            let rand = ctx.rng().next_u64();

            self.send(ctx, SmpPdu::EncryptionInformation(EncryptionInformation::new(ltk)));

            self.send(
                ctx,
                SmpPdu::CentralIdentification(CentralIdentification::new(ediv, rand)),
            );

            self.local_keys.ltk = Some(ltk);
            self.local_keys.ediv = Some(ediv);
            self.local_keys.rand = Some(rand);
        }

        if distribution.id_key {
            self.send(
                ctx,
                SmpPdu::IdentityInformation(IdentityInformation::new(self.link.local_irk)),
            );

            self.send(
                ctx,
                SmpPdu::IdentityAddressInformation(IdentityAddressInformation::new(self.link.local_identity)),
            );

            self.local_keys.irk = Some(self.link.local_irk);
            self.local_keys.identity = Some(self.link.local_identity);
        }

        if distribution.sign_key {
            let csrk = toolbox::rand_u128(ctx.rng());

            self.send(ctx, SmpPdu::SigningInformation(SigningInformation::new(csrk)));

            self.local_keys.csrk = Some(csrk);
        }
    }

    /// Receive the keys distributed by the peer
    ///
    /// The keys must arrive in the order they are defined in the key distribution field.
    pub(super) fn receive_keys<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        while let Some(expected) = self.expected_keys.front().copied() {
            let pdu = match self.smp_inbox.pop_front() {
                None => return Ok(Flow::Wait),
                Some(pdu) => pdu,
            };

            match (expected, pdu) {
                (CommandType::EncryptionInformation, SmpPdu::EncryptionInformation(info)) => {
                    self.remote_keys.ltk = Some(info.get_long_term_key())
                }
                (CommandType::CentralIdentification, SmpPdu::CentralIdentification(id)) => {
                    self.remote_keys.ediv = Some(id.get_encryption_diversifier());
                    self.remote_keys.rand = Some(id.get_random());
                }
                (CommandType::IdentityInformation, SmpPdu::IdentityInformation(info)) => {
                    self.remote_keys.irk = Some(info.get_irk())
                }
                (CommandType::IdentityAddressInformation, SmpPdu::IdentityAddressInformation(info)) => {
                    self.remote_keys.identity = Some(info.get_address())
                }
                (CommandType::SigningInformation, SmpPdu::SigningInformation(info)) => {
                    self.remote_keys.csrk = Some(info.get_signature_key())
                }
                (expected, other) => return Err(self.unexpected(ctx, &other, expected)),
            }

            log::trace!("(SM) received key {} from {}", expected, self.link.peer);

            self.expected_keys.pop_front();
        }

        if self.is_central() {
            self.send_keys(ctx);
        }

        Ok(Flow::Complete(self.pairing_result()?))
    }
}
