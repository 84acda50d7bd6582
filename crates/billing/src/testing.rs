//! In-memory test doubles shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use campus_shared::types::{Enrollment, MembershipRecord, MembershipTier};

use crate::checkout::CheckoutService;
use crate::commands::MembershipCommands;
use crate::customer::CustomerService;
use crate::enrollment::EnrollmentStore;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, CheckoutParams, CheckoutSessionInfo};
use crate::store::MembershipStore;

/// A Pro record with an attached subscription, the common starting point.
pub fn pro_record(account_id: Uuid, subscription_id: &str) -> MembershipRecord {
    let mut record = MembershipRecord::new(account_id);
    record.tier = MembershipTier::Pro;
    record.stripe_customer_id = Some("cus_test".to_string());
    record.stripe_subscription_id = Some(subscription_id.to_string());
    record.stripe_price_id = Some("price_pro".to_string());
    record.current_period_end = Some(OffsetDateTime::from_unix_timestamp(1_900_000_000).unwrap());
    record
}

/// Wire a command service over the given doubles with fixed checkout config.
pub fn commands_with(
    store: Arc<MemoryMembershipStore>,
    gateway: Arc<MockGateway>,
) -> MembershipCommands {
    let store: Arc<dyn MembershipStore> = store;
    let gateway: Arc<dyn BillingGateway> = gateway;
    MembershipCommands::new(
        store.clone(),
        gateway.clone(),
        CustomerService::new(store.clone(), gateway.clone()),
        CheckoutService::new(
            gateway,
            "price_pro".to_string(),
            "https://campus.test".to_string(),
        ),
    )
}

/// Membership store over a mutex-guarded map, with the same CAS semantics as
/// the Postgres implementation.
pub struct MemoryMembershipStore {
    records: Mutex<HashMap<Uuid, MembershipRecord>>,
    fail_next_replace: AtomicBool,
}

impl MemoryMembershipStore {
    pub fn with_record(record: MembershipRecord) -> Self {
        let mut records = HashMap::new();
        records.insert(record.account_id, record);
        Self {
            records: Mutex::new(records),
            fail_next_replace: AtomicBool::new(false),
        }
    }

    /// Make the next `replace` lose its write race once.
    pub fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn get(&self, account_id: Uuid) -> BillingResult<MembershipRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&account_id)
            .cloned()
            .ok_or_else(|| BillingError::MembershipNotFound(account_id.to_string()))
    }

    async fn find_by_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<MembershipRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.stripe_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn set_customer_id(&self, account_id: Uuid, customer_id: &str) -> BillingResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&account_id)
            .ok_or_else(|| BillingError::MembershipNotFound(account_id.to_string()))?;
        match &record.stripe_customer_id {
            None => {
                record.stripe_customer_id = Some(customer_id.to_string());
                record.version += 1;
                Ok(())
            }
            Some(existing) if existing == customer_id => Ok(()),
            Some(_) => Err(BillingError::ConcurrentModification(format!(
                "customer id already set for account {account_id}"
            ))),
        }
    }

    async fn replace(&self, record: &MembershipRecord) -> BillingResult<MembershipRecord> {
        if !record.invariants_hold() {
            return Err(BillingError::Internal(format!(
                "membership invariant violated for account {}",
                record.account_id
            )));
        }

        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(&record.account_id)
            .ok_or_else(|| BillingError::MembershipNotFound(record.account_id.to_string()))?;

        if self.fail_next_replace.swap(false, Ordering::SeqCst) || stored.version != record.version
        {
            return Err(BillingError::ConcurrentModification(format!(
                "membership for account {} changed since version {}",
                record.account_id, record.version
            )));
        }

        *stored = record.clone();
        stored.version += 1;
        stored.updated_at = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }
}

/// Enrollment store with the unique-pair guard of the Postgres implementation.
pub struct MemoryEnrollmentStore {
    rows: Mutex<Vec<Enrollment>>,
}

impl MemoryEnrollmentStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub async fn count(&self, account_id: Uuid) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.account_id == account_id)
            .count()
    }
}

#[async_trait]
impl EnrollmentStore for MemoryEnrollmentStore {
    async fn find(&self, account_id: Uuid, course_id: Uuid) -> BillingResult<Option<Enrollment>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.account_id == account_id && e.course_id == course_id)
            .cloned())
    }

    async fn create_if_absent(&self, account_id: Uuid, course_id: Uuid) -> BillingResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|e| e.account_id == account_id && e.course_id == course_id)
        {
            return Ok(false);
        }
        rows.push(Enrollment {
            id: Uuid::new_v4(),
            account_id,
            course_id,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(true)
    }
}

/// Scriptable gateway double with call counters.
pub struct MockGateway {
    customer_calls: AtomicUsize,
    checkout_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    fail_set_cancel: AtomicBool,
    period_end: Mutex<Option<OffsetDateTime>>,
    last_checkout: Mutex<Option<CheckoutParams>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            customer_calls: AtomicUsize::new(0),
            checkout_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            fail_set_cancel: AtomicBool::new(false),
            period_end: Mutex::new(Some(
                OffsetDateTime::from_unix_timestamp(1_900_000_000).unwrap(),
            )),
            last_checkout: Mutex::new(None),
        }
    }

    pub fn create_customer_calls(&self) -> usize {
        self.customer_calls.load(Ordering::SeqCst)
    }

    pub fn create_checkout_calls(&self) -> usize {
        self.checkout_calls.load(Ordering::SeqCst)
    }

    pub fn set_cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn fail_set_cancel(&self) {
        self.fail_set_cancel.store(true, Ordering::SeqCst);
    }

    pub fn set_period_end(&self, period_end: Option<OffsetDateTime>) {
        *self.period_end.lock().unwrap() = period_end;
    }

    pub fn last_checkout_params(&self) -> Option<CheckoutParams> {
        self.last_checkout.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingGateway for MockGateway {
    async fn create_customer(&self, _account_id: Uuid, _email: &str) -> BillingResult<String> {
        let n = self.customer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_mock_{n}"))
    }

    async fn create_checkout_session(
        &self,
        params: CheckoutParams,
    ) -> BillingResult<CheckoutSessionInfo> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_checkout.lock().unwrap() = Some(params);
        Ok(CheckoutSessionInfo {
            session_id: "cs_mock".to_string(),
            url: "https://checkout.test/cs_mock".to_string(),
        })
    }

    async fn set_cancel_at_period_end(
        &self,
        _subscription_id: &str,
        _cancel: bool,
    ) -> BillingResult<()> {
        if self.fail_set_cancel.swap(false, Ordering::SeqCst) {
            return Err(BillingError::StripeApi("provider unavailable".to_string()));
        }
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscription_period_end(
        &self,
        _subscription_id: &str,
    ) -> BillingResult<Option<OffsetDateTime>> {
        Ok(*self.period_end.lock().unwrap())
    }
}
