//! LE Secure Connections
//!
//! The public key exchange, the stage 1 authentication of the public keys by the pairing method,
//! and the stage 2 DHKey check.

use super::{
    expect_pdu, method, Exchange, FailureReason, Flow, LePairingHandler, PairingContext, PairingFailure, PairingMethod,
    PasskeyStep, Step,
};
use crate::smp::{PairingConfirm, PairingDhKeyCheck, PairingFailedReason, PairingPubKey, PairingRandom, SmpPdu};
use crate::toolbox::{self, EcdhKeyPair, EcdhPublicKey};
use crate::ui::{CompareValue, UiInput, UiRequest};

impl LePairingHandler {
    /// Get the public keys of the central (PKa) and the peripheral (PKb)
    fn public_keys(&self) -> Result<(EcdhPublicKey, EcdhPublicKey), PairingFailure> {
        match (&self.key_pair, &self.remote_public_key) {
            (Some(key_pair), Some(remote)) if self.is_central() => Ok((*key_pair.public_key(), *remote)),
            (Some(key_pair), Some(remote)) => Ok((*remote, *key_pair.public_key())),
            _ => Err(Self::missing("public keys")),
        }
    }

    pub(super) fn begin_public_key_exchange<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let (_, remote) = self.local_remote_features()?;

        // the confirm value of the OOB data commits to this key pair
        let key_pair = match &self.local_oob {
            Some(oob) if remote.get_oob_data_flag().is_present() => oob.get_key_pair().clone(),
            _ => EcdhKeyPair::generate(ctx.rng()),
        };

        if self.is_central() {
            self.send(ctx, SmpPdu::PairingPublicKey(PairingPubKey::new(key_pair.public_key())));
        }

        self.key_pair = Some(key_pair);

        self.step = Step::WaitPublicKey;

        Ok(Flow::Continue)
    }

    pub(super) fn wait_public_key<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let remote_public_key = expect_pdu!(self, ctx, PairingPublicKey).get_key();

        let (local_public_key, dh_key) = match &self.key_pair {
            Some(key_pair) => (*key_pair.public_key(), key_pair.dh_key(&remote_public_key)),
            None => return Err(Self::missing("key pair")),
        };

        log::trace!("(SM) remote public key: {:?}", remote_public_key);

        if remote_public_key.x == local_public_key.x {
            return Err(PairingFailure::new(
                FailureReason::PublicKeysMatch,
                "Remote and local public keys match",
            ));
        }

        let dh_key = match dh_key {
            Some(dh_key) if remote_public_key.is_valid() => dh_key,
            _ => {
                return Err(self.fail(
                    ctx,
                    PairingFailedReason::DhKeyCheckFailed,
                    FailureReason::InvalidPublicKey,
                    "Can't validate remote public key",
                ))
            }
        };

        if !self.is_central() {
            self.send(ctx, SmpPdu::PairingPublicKey(PairingPubKey::new(&local_public_key)));
        }

        self.remote_public_key = Some(remote_public_key);

        self.dh_key = Some(dh_key);

        self.begin_stage_one(ctx)
    }

    fn begin_stage_one<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        match self.method {
            Some(PairingMethod::JustWorks | PairingMethod::NumericComparison) => {
                self.local_nonce = toolbox::nonce(ctx.rng());

                if self.is_central() {
                    self.step = Step::JustWorks(Exchange::WaitConfirm);
                } else {
                    let (pka, pkb) = self.public_keys()?;

                    let cb = toolbox::f4(pkb.x, pka.x, self.local_nonce, 0);

                    self.send(ctx, SmpPdu::PairingConfirm(PairingConfirm::new(cb)));

                    self.step = Step::JustWorks(Exchange::WaitRandom);
                }
            }
            Some(PairingMethod::PasskeyEntry) => {
                self.step = if self.setup_passkey(ctx)? {
                    Step::Passkey(PasskeyStep::WaitPasskey)
                } else {
                    Step::Passkey(PasskeyStep::RoundStart)
                };
            }
            Some(PairingMethod::OutOfBand) => self.begin_out_of_band(ctx)?,
            None => return Err(Self::missing("pairing method")),
        }

        Ok(Flow::Continue)
    }

    /// Just Works and the first part of Numeric Comparison
    pub(super) fn just_works<C: PairingContext>(&mut self, ctx: &mut C, exchange: Exchange) -> Result<Flow, PairingFailure> {
        match (self.is_central(), exchange) {
            (true, Exchange::WaitConfirm) => {
                self.remote_confirm = expect_pdu!(self, ctx, PairingConfirm).get_value();

                self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));

                self.step = Step::JustWorks(Exchange::WaitRandom);

                Ok(Flow::Continue)
            }
            (true, Exchange::WaitRandom) => {
                let nb = expect_pdu!(self, ctx, PairingRandom).get_value();

                let (pka, pkb) = self.public_keys()?;

                if self.remote_confirm != toolbox::f4(pkb.x, pka.x, nb, 0) {
                    return Err(self.fail(
                        ctx,
                        PairingFailedReason::ConfirmValueFailed,
                        FailureReason::ConfirmValueFailed,
                        "Cb_local != Cb",
                    ));
                }

                self.remote_nonce = nb;

                self.end_just_works(ctx)
            }
            (false, Exchange::WaitRandom) => {
                self.remote_nonce = expect_pdu!(self, ctx, PairingRandom).get_value();

                self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));

                self.end_just_works(ctx)
            }
            (false, Exchange::WaitConfirm) => Err(Self::missing("confirm value")),
        }
    }

    fn end_just_works<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        self.ra = 0;
        self.rb = 0;

        if let Some(PairingMethod::NumericComparison) = self.method {
            let (pka, pkb) = self.public_keys()?;

            let (na, nb) = self.nonces();

            let value = CompareValue::from_g2(toolbox::g2(pka.x, pkb.x, na, nb));

            log::info!("(SM) numeric comparison value: {}", value);

            ctx.post_ui(UiRequest::DisplayYesNo(self.confirmation_data(), value));

            self.step = Step::WaitNumericComparison;

            Ok(Flow::Continue)
        } else {
            self.end_stage_one(ctx)
        }
    }

    pub(super) fn wait_numeric_comparison<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        match self.ui_inbox.pop_front() {
            None => Ok(Flow::Wait),
            Some(UiInput::ConfirmYesNo(true)) => self.end_stage_one(ctx),
            Some(_) => Err(self.fail(
                ctx,
                PairingFailedReason::NumericComparisonFailed,
                FailureReason::UserRejected,
                "Was expecting the user value confirm",
            )),
        }
    }

    /// Passkey Entry
    ///
    /// Each of the twenty rounds commits to one bit of the passkey. The central sends its confirm
    /// first and the peripheral sends its random last.
    pub(super) fn passkey_entry<C: PairingContext>(&mut self, ctx: &mut C, step: PasskeyStep) -> Result<Flow, PairingFailure> {
        match step {
            PasskeyStep::WaitPasskey => match self.take_passkey_entry(ctx)? {
                None => return Ok(Flow::Wait),
                Some(_) => self.step = Step::Passkey(PasskeyStep::RoundStart),
            },
            PasskeyStep::RoundStart => {
                log::trace!("(SM) passkey round {}", self.passkey_round);

                self.local_nonce = toolbox::nonce(ctx.rng());

                if self.is_central() {
                    let (pka, pkb) = self.public_keys()?;

                    let cai = toolbox::f4(pka.x, pkb.x, self.local_nonce, self.round_bit()?);

                    self.send(ctx, SmpPdu::PairingConfirm(PairingConfirm::new(cai)));
                }

                self.step = Step::Passkey(PasskeyStep::Exchange(Exchange::WaitConfirm));
            }
            PasskeyStep::Exchange(Exchange::WaitConfirm) => {
                self.remote_confirm = expect_pdu!(self, ctx, PairingConfirm).get_value();

                if self.is_central() {
                    self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));
                } else {
                    let (pka, pkb) = self.public_keys()?;

                    let cbi = toolbox::f4(pkb.x, pka.x, self.local_nonce, self.round_bit()?);

                    self.send(ctx, SmpPdu::PairingConfirm(PairingConfirm::new(cbi)));
                }

                self.step = Step::Passkey(PasskeyStep::Exchange(Exchange::WaitRandom));
            }
            PasskeyStep::Exchange(Exchange::WaitRandom) => {
                let remote_nonce = expect_pdu!(self, ctx, PairingRandom).get_value();

                let (pka, pkb) = self.public_keys()?;

                let ri = self.round_bit()?;

                let check = if self.is_central() {
                    toolbox::f4(pkb.x, pka.x, remote_nonce, ri)
                } else {
                    toolbox::f4(pka.x, pkb.x, remote_nonce, ri)
                };

                if check != self.remote_confirm {
                    return Err(self.fail(
                        ctx,
                        PairingFailedReason::ConfirmValueFailed,
                        FailureReason::ConfirmValueFailed,
                        "Cai != Cbi",
                    ));
                }

                self.remote_nonce = remote_nonce;

                if !self.is_central() {
                    self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));
                }

                self.passkey_round += 1;

                if self.passkey_round < method::PASSKEY_ROUNDS {
                    self.step = Step::Passkey(PasskeyStep::RoundStart);
                } else {
                    let passkey = self.passkey.ok_or_else(|| Self::missing("passkey"))?;

                    self.ra = passkey.into();
                    self.rb = passkey.into();

                    return self.end_stage_one(ctx);
                }
            }
        }

        Ok(Flow::Continue)
    }

    fn round_bit(&self) -> Result<u8, PairingFailure> {
        let passkey = self.passkey.ok_or_else(|| Self::missing("passkey"))?;

        Ok(method::passkey_round_bit(passkey, self.passkey_round))
    }

    /// Start Out of Band
    ///
    /// The peer's confirm value is only checked when this device has the peer's OOB data. Otherwise
    /// the peer's random value is zero and the pairing is not authenticated.
    fn begin_out_of_band<C: PairingContext>(&mut self, ctx: &mut C) -> Result<(), PairingFailure> {
        let (local, remote) = self.local_remote_features()?;

        let remote_public_key = self.remote_public_key.ok_or_else(|| Self::missing("remote public key"))?;

        let local_r = match &self.local_oob {
            Some(oob) if remote.get_oob_data_flag().is_present() => oob.get_random(),
            _ => 0,
        };

        let remote_r = match self.remote_oob {
            Some(oob) if local.get_oob_data_flag().is_present() => {
                let check = toolbox::f4(remote_public_key.x, remote_public_key.x, oob.random, 0);

                if check != oob.confirm {
                    return Err(self.fail(
                        ctx,
                        PairingFailedReason::ConfirmValueFailed,
                        FailureReason::ConfirmValueFailed,
                        "C_computed != C_from_remote, aborting",
                    ));
                }

                self.oob_verified = true;

                oob.random
            }
            _ => 0,
        };

        if self.is_central() {
            self.ra = local_r;
            self.rb = remote_r;
        } else {
            self.ra = remote_r;
            self.rb = local_r;
        }

        self.local_nonce = toolbox::nonce(ctx.rng());

        if self.is_central() {
            self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));
        }

        self.step = Step::OutOfBandRandom;

        Ok(())
    }

    pub(super) fn out_of_band_random<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        self.remote_nonce = expect_pdu!(self, ctx, PairingRandom).get_value();

        if !self.is_central() {
            self.send(ctx, SmpPdu::PairingRandom(PairingRandom::new(self.local_nonce)));
        }

        self.end_stage_one(ctx)
    }

    fn end_stage_one<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        self.stage_one = Some((self.ra, self.rb));

        self.begin_stage_two(ctx)
    }

    /// Calculate the check values Ea and Eb
    fn check_values(&self) -> Result<(u128, u128), PairingFailure> {
        let (request, response) = self.features()?;

        let (a, b) = self.pairing_addresses();

        let (na, nb) = self.nonces();

        let ea = toolbox::f6(self.mac_key, na, nb, self.rb, request.get_io_cap(), a, b);

        let eb = toolbox::f6(self.mac_key, nb, na, self.ra, response.get_io_cap(), b, a);

        Ok((ea, eb))
    }

    fn begin_stage_two<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let dh_key = self.dh_key.ok_or_else(|| Self::missing("DHKey"))?;

        let (a, b) = self.pairing_addresses();

        let (na, nb) = self.nonces();

        let (mac_key, ltk) = toolbox::f5(dh_key, na, nb, a, b);

        self.mac_key = mac_key;

        self.ltk = super::mask_key(ltk, self.key_size);

        if self.is_central() {
            let (ea, _) = self.check_values()?;

            self.send(ctx, SmpPdu::PairingDhKeyCheck(PairingDhKeyCheck::new(ea)));
        }

        self.step = Step::WaitDhKeyCheck;

        Ok(Flow::Continue)
    }

    pub(super) fn wait_dh_key_check<C: PairingContext>(&mut self, ctx: &mut C) -> Result<Flow, PairingFailure> {
        let check = expect_pdu!(self, ctx, PairingDhKeyCheck).get_key_check();

        let (ea, eb) = self.check_values()?;

        let expected = if self.is_central() { eb } else { ea };

        if check != expected {
            log::trace!("(SM) received check: {:x}, calculated check: {:x}", check, expected);

            return Err(self.fail(
                ctx,
                PairingFailedReason::DhKeyCheckFailed,
                FailureReason::DhKeyCheckFailed,
                "Ea != Eb",
            ));
        }

        if !self.is_central() {
            self.send(ctx, SmpPdu::PairingDhKeyCheck(PairingDhKeyCheck::new(eb)));
        }

        self.begin_encryption(ctx)
    }
}
