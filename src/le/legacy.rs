//! LE legacy pairing
//!
//! Legacy pairing is used when either device does not support secure connections. The temporary
//! key (TK) is zero for Just Works and the passkey for Passkey Entry. Both devices confirm the TK
//! with `c1` and then generate the short term key (STK) with `s1`. The STK encrypts the link for
//! the key distribution.

use super::{expect_pdu, Exchange, FailureReason, Flow, LePairingHandler, PairingContext, PairingFailure, PairingMethod, PasskeyStep, Step};
use crate::smp::{CommandType, PairingConfirm, PairingFailedReason, PairingRandom, SmpPdu};
use crate::toolbox;

impl LePairingHandler {
    pub(super) fn begin_legacy<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        match self.method {
            Some(PairingMethod::JustWorks) => {
                self.tk = 0;

                self.step = Step::Legacy(PasskeyStep::RoundStart);
            }
            Some(PairingMethod::PasskeyEntry) => {
                if self.setup_passkey(ctx)? {
                    self.step = Step::Legacy(PasskeyStep::WaitPasskey);
                } else {
                    self.tk = self.passkey.map(u128::from).unwrap_or_default();

                    self.step = Step::Legacy(PasskeyStep::RoundStart);
                }
            }
            Some(PairingMethod::OutOfBand) => {
                return Err(self.fail(
                    ctx,
                    PairingFailedReason::OobNotAvailable,
                    FailureReason::OobNotAvailable,
                    "Out of band is not supported for legacy pairing",
                ))
            }
            Some(PairingMethod::NumericComparison) | None => return Err(Self::missing("legacy pairing method")),
        }

        Ok(Flow::Continue)
    }

    /// Calculate the confirm value of `random` with the TK
    fn legacy_confirm(&self, random: u128) -> Result<u128, PairingFailure> {
        let (request, response) = self.features()?;

        let preq = request.get_c1_value(CommandType::PairingRequest);

        let pres = response.get_c1_value(CommandType::PairingResponse);

        let (initiator, responder) = self.connection_addresses();

        let (iat, ia) = super::c1_address(&initiator);

        let (rat, ra) = super::c1_address(&responder);

        Ok(toolbox::c1(self.tk, random, pres, preq, iat, ia, rat, ra))
    }

    /// The confirm and random exchange
    ///
    /// The central sends Mconfirm, the peripheral answers with Sconfirm, then the central sends
    /// Mrand and the peripheral answers with Srand.
    pub(super) fn legacy_pairing<C: PairingContext>(&mut self, ctx: &mut C, step: PasskeyStep) -> Result<Flow, PairingFailure> {
        match step {
            PasskeyStep::WaitPasskey => match self.take_passkey_entry(ctx)? {
                None => return Ok(Flow::Wait),
                Some(passkey) => {
                    self.tk = passkey.into();

                    self.step = Step::Legacy(PasskeyStep::RoundStart);
                }
            },
            PasskeyStep::RoundStart => {
                self.local_nonce = toolbox::rand_u128(ctx.rng());

                if self.is_central() {
                    let mconfirm = self.legacy_confirm(self.local_nonce)?;

                    self.send(ctx, SmpPdu::PairingConfirm(PairingConfirm::new(mconfirm)));
                }

                self.step = Step::Legacy(PasskeyStep::Exchange(Exchange::WaitConfirm));
            }
            PasskeyStep::Exchange(Exchange::WaitConfirm) => {
                self.remote_confirm = expect_pdu!(self, ctx, PairingConfirm).get_value();

                if self.is_central() {
                    self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));
                } else {
                    let sconfirm = self.legacy_confirm(self.local_nonce)?;

                    self.send(ctx, SmpPdu::PairingConfirm(PairingConfirm::new(sconfirm)));
                }

                self.step = Step::Legacy(PasskeyStep::Exchange(Exchange::WaitRandom));
            }
            PasskeyStep::Exchange(Exchange::WaitRandom) => {
                let remote_random = expect_pdu!(self, ctx, PairingRandom).get_value();

                if self.legacy_confirm(remote_random)? != self.remote_confirm {
                    return Err(self.fail(
                        ctx,
                        PairingFailedReason::ConfirmValueFailed,
                        FailureReason::ConfirmValueFailed,
                        "Confirm value of the remote random does not match",
                    ));
                }

                self.remote_nonce = remote_random;

                if !self.is_central() {
                    self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));
                }

                let (mrand, srand) = self.nonces();

                self.ltk = super::mask_key(toolbox::s1(self.tk, srand, mrand), self.key_size);

                return self.begin_encryption(ctx);
            }
        }

        Ok(Flow::Continue)
    }
}
