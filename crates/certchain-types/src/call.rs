use crate::address::Address;
use crate::hash::Hash;

/// A single intended contract interaction.
///
/// `to == None` is a contract creation whose `data` is the creation payload
/// (bytecode plus encoded constructor arguments). Otherwise `data` is the
/// encoded method call. Built once per invocation and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCall {
    from: Address,
    to: Option<Address>,
    method: Option<String>,
    data: Vec<u8>,
    value: u128,
}

impl PendingCall {
    /// Contract creation.
    pub fn deploy(from: Address, payload: Vec<u8>) -> Self {
        Self {
            from,
            to: None,
            method: None,
            data: payload,
            value: 0,
        }
    }

    /// Method invocation on a deployed contract.
    pub fn method(from: Address, to: Address, method: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            from,
            to: Some(to),
            method: Some(method.into()),
            data,
            value: 0,
        }
    }

    /// Attach a value (wei) to the call.
    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Option<Address> {
        self.to
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn is_deploy(&self) -> bool {
        self.to.is_none()
    }

    /// Short label for logs: the method name or `deploy`.
    pub fn label(&self) -> &str {
        self.method.as_deref().unwrap_or("deploy")
    }

    /// Keccak digest identifying this exact call.
    pub fn digest(&self) -> Hash {
        let to = self.to.map(|a| *a.as_bytes()).unwrap_or([0u8; 20]);
        let kind: &[u8] = if self.is_deploy() { b"create" } else { b"call" };
        Hash::keccak_multi(&[
            kind,
            self.from.as_bytes(),
            &to,
            &self.value.to_be_bytes(),
            &self.data,
        ])
    }
}

/// Gas price and limit derived for one specific [`PendingCall`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasPlan {
    price: u128,
    limit: u64,
    call_digest: Hash,
}

impl GasPlan {
    /// Build a plan bound to `call`.
    pub fn for_call(call: &PendingCall, price: u128, limit: u64) -> Self {
        Self {
            price,
            limit,
            call_digest: call.digest(),
        }
    }

    pub fn price(&self) -> u128 {
        self.price
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether this plan was derived for `call`.
    pub fn belongs_to(&self, call: &PendingCall) -> bool {
        self.call_digest == call.digest()
    }

    /// Upper bound of the fee this plan can spend.
    pub fn max_fee(&self) -> u128 {
        self.price.saturating_mul(self.limit as u128)
    }

    /// `limit` increased by `percent`, rounded up.
    pub fn limit_with_margin(limit: u64, percent: u32) -> u64 {
        let extra = (limit as u128 * percent as u128).div_ceil(100);
        (limit as u128 + extra).min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Address {
        Address::from_bytes([1u8; 20])
    }

    fn target() -> Address {
        Address::from_bytes([2u8; 20])
    }

    #[test]
    fn test_deploy_call() {
        let call = PendingCall::deploy(sender(), vec![0x60, 0x80]);
        assert!(call.is_deploy());
        assert_eq!(call.label(), "deploy");
        assert_eq!(call.value(), 0);
    }

    #[test]
    fn test_method_call() {
        let call = PendingCall::method(sender(), target(), "storeKey", vec![1, 2, 3]);
        assert!(!call.is_deploy());
        assert_eq!(call.to(), Some(target()));
        assert_eq!(call.label(), "storeKey");
    }

    #[test]
    fn test_plan_is_bound_to_its_call() {
        let a = PendingCall::method(sender(), target(), "storeKey", vec![1]);
        let b = PendingCall::method(sender(), target(), "storeKey", vec![2]);
        let plan = GasPlan::for_call(&a, 1_000_000_000, 50_000);

        assert!(plan.belongs_to(&a));
        assert!(!plan.belongs_to(&b));
        assert!(!plan.belongs_to(&a.clone().with_value(1)));
    }

    #[test]
    fn test_limit_with_margin() {
        assert_eq!(GasPlan::limit_with_margin(100_000, 0), 100_000);
        assert_eq!(GasPlan::limit_with_margin(100_000, 10), 110_000);
        // rounds up
        assert_eq!(GasPlan::limit_with_margin(21_001, 1), 21_212);
        assert_eq!(GasPlan::limit_with_margin(u64::MAX, 50), u64::MAX);
    }

    #[test]
    fn test_max_fee() {
        let call = PendingCall::deploy(sender(), vec![]);
        let plan = GasPlan::for_call(&call, 2, 21_000);
        assert_eq!(plan.max_fee(), 42_000);
    }
}
