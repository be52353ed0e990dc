use crate::domain::amount::Amount;
use crate::domain::message::Voucher;
use crate::domain::types::{Address, Destination};
use crate::error::{EngineError, Result};
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentBalance {
    pub paid: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone)]
struct PaymentChannel {
    payer: Address,
    payee: Address,
    budget: Decimal,
    paid: Decimal,
}

impl PaymentChannel {
    fn balance(&self) -> PaymentBalance {
        PaymentBalance {
            paid: self.paid,
            remaining: self.budget - self.paid,
        }
    }
}

/// Tracks cumulative vouchers on unidirectional payment channels.
///
/// Vouchers carry the running total, so only the latest one matters and a
/// lost voucher is superseded by the next.
#[derive(Debug, Default)]
pub struct VoucherManager {
    channels: Mutex<HashMap<Destination, PaymentChannel>>,
}

impl VoucherManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel. Registering the same channel again keeps its history.
    pub fn register(&self, channel: Destination, payer: Address, payee: Address, budget: Decimal) {
        self.channels
            .lock()
            .entry(channel)
            .or_insert(PaymentChannel {
                payer,
                payee,
                budget,
                paid: Decimal::ZERO,
            });
    }

    pub fn is_registered(&self, channel: &Destination) -> bool {
        self.channels.lock().contains_key(channel)
    }

    pub fn payee(&self, channel: &Destination) -> Result<Address> {
        self.with_channel(channel, |c| Ok(c.payee))
    }

    /// Signs a voucher raising the channel's total by `amount`.
    pub fn pay(&self, channel: &Destination, amount: Amount, key: &SigningKey) -> Result<Voucher> {
        let me = Address::from(key);
        self.with_channel(channel, |c| {
            if c.payer != me {
                return Err(EngineError::NotPayer {
                    channel: *channel,
                    address: me,
                });
            }
            let total = c.paid.checked_add(amount.value()).filter(|t| *t <= c.budget);
            let Some(total) = total else {
                return Err(EngineError::InvalidVoucher(format!(
                    "paying {} would exceed the budget of {} on {channel}",
                    amount.value(),
                    c.budget
                )));
            };
            c.paid = total;
            Ok(Voucher::sign(*channel, Amount::new(total)?, key))
        })
    }

    /// Accepts a voucher from the payer and returns the new total received.
    pub fn receive(&self, voucher: &Voucher) -> Result<Decimal> {
        self.with_channel(&voucher.channel_id, |c| {
            voucher.verify(&c.payer)?;
            let total = voucher.amount.value();
            if total <= c.paid {
                return Err(EngineError::InvalidVoucher(format!(
                    "voucher total {total} does not exceed {} already received",
                    c.paid
                )));
            }
            if total > c.budget {
                return Err(EngineError::InvalidVoucher(format!(
                    "voucher total {total} exceeds the budget of {}",
                    c.budget
                )));
            }
            c.paid = total;
            Ok(total)
        })
    }

    pub fn balance(&self, channel: &Destination) -> Result<PaymentBalance> {
        self.with_channel(channel, |c| Ok(c.balance()))
    }

    fn with_channel<T>(
        &self,
        channel: &Destination,
        f: impl FnOnce(&mut PaymentChannel) -> Result<T>,
    ) -> Result<T> {
        let mut channels = self.channels.lock();
        let entry = channels
            .get_mut(channel)
            .ok_or(EngineError::PaymentChannelNotRegistered(*channel))?;
        f(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::tests::key;
    use rust_decimal_macros::dec;

    fn setup() -> (VoucherManager, VoucherManager, Destination) {
        let channel = Destination([5; 32]);
        let payer = Address::from(&key(1));
        let payee = Address::from(&key(2));
        let sender = VoucherManager::new();
        let receiver = VoucherManager::new();
        sender.register(channel, payer, payee, dec!(10));
        receiver.register(channel, payer, payee, dec!(10));
        (sender, receiver, channel)
    }

    #[test]
    fn test_vouchers_are_cumulative() {
        let (sender, receiver, channel) = setup();
        let v1 = sender.pay(&channel, Amount::new(dec!(3)).unwrap(), &key(1)).unwrap();
        let v2 = sender.pay(&channel, Amount::new(dec!(2)).unwrap(), &key(1)).unwrap();
        assert_eq!(v2.amount.value(), dec!(5));

        // Only the latest voucher matters.
        assert_eq!(receiver.receive(&v2).unwrap(), dec!(5));
        assert!(matches!(receiver.receive(&v1), Err(EngineError::InvalidVoucher(_))));
        assert_eq!(
            receiver.balance(&channel).unwrap(),
            PaymentBalance {
                paid: dec!(5),
                remaining: dec!(5)
            }
        );
    }

    #[test]
    fn test_only_the_payer_can_pay() {
        let (sender, _, channel) = setup();
        assert!(matches!(
            sender.pay(&channel, Amount::new(dec!(1)).unwrap(), &key(2)),
            Err(EngineError::NotPayer { .. })
        ));
    }

    #[test]
    fn test_budget_is_enforced() {
        let (sender, _, channel) = setup();
        assert!(sender.pay(&channel, Amount::new(dec!(11)).unwrap(), &key(1)).is_err());
        assert_eq!(sender.balance(&channel).unwrap().paid, Decimal::ZERO);
    }

    #[test]
    fn test_forged_voucher_is_rejected() {
        let (_, receiver, channel) = setup();
        let forged = Voucher::sign(channel, Amount::new(dec!(1)).unwrap(), &key(2));
        assert!(matches!(receiver.receive(&forged), Err(EngineError::InvalidSignature(_))));
    }

    #[test]
    fn test_unregistered_channel() {
        let manager = VoucherManager::new();
        assert!(matches!(
            manager.balance(&Destination([1; 32])),
            Err(EngineError::PaymentChannelNotRegistered(_))
        ));
    }
}
