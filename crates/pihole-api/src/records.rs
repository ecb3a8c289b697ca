// Local DNS records
//
// Host records (`<ip> <domain>`) and alias records (`<domain>,<target>`)
// share one reconciliation algorithm: read the full set, diff against the
// desired record, then mutate. The appliance addresses records by their
// full composite key, so a changed value is a delete plus a create.
//
//   GET    /api/config/dns/{collection}
//   PUT    /api/config/dns/{collection}/{escaped composite key}
//   DELETE /api/config/dns/{collection}/{escaped composite key}

use std::fmt;
use std::marker::PhantomData;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::PiholeClient;
use crate::error::Error;

/// A record kind the appliance stores as one line of text.
pub trait RecordKind: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Collection name under `/api/config/dns/`.
    const COLLECTION: &'static str;
    /// Human-readable kind, used in logs and error context.
    const KIND: &'static str;

    fn from_parts(domain: String, value: String) -> Self;
    fn domain(&self) -> &str;
    /// The field that is not the domain (address or target).
    fn value(&self) -> &str;
    /// Wire line / composite key.
    fn encode(&self) -> String;
    /// Parse one wire line. `None` only if it does not split into two
    /// fields; empty fields are kept as they are.
    fn decode(line: &str) -> Option<Self>;
}

/// Domain → IPv4 address mapping. Wire form: `"<address> <domain>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub domain: String,
    pub address: String,
}

impl HostRecord {
    pub fn new(domain: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            address: address.into(),
        }
    }
}

impl RecordKind for HostRecord {
    const COLLECTION: &'static str = "hosts";
    const KIND: &'static str = "host";

    fn from_parts(domain: String, value: String) -> Self {
        Self {
            domain,
            address: value,
        }
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn value(&self) -> &str {
        &self.address
    }

    fn encode(&self) -> String {
        format!("{} {}", self.address, self.domain)
    }

    fn decode(line: &str) -> Option<Self> {
        let (address, domain) = line.split_once(' ')?;
        Some(Self::new(domain, address))
    }
}

/// Domain → domain alias. Wire form: `"<domain>,<target>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub domain: String,
    pub target: String,
}

impl AliasRecord {
    pub fn new(domain: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            target: target.into(),
        }
    }
}

impl RecordKind for AliasRecord {
    const COLLECTION: &'static str = "cnameRecords";
    const KIND: &'static str = "alias";

    fn from_parts(domain: String, value: String) -> Self {
        Self {
            domain,
            target: value,
        }
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn value(&self) -> &str {
        &self.target
    }

    fn encode(&self) -> String {
        format!("{},{}", self.domain, self.target)
    }

    fn decode(line: &str) -> Option<Self> {
        let (domain, target) = line.split_once(',')?;
        Some(Self::new(domain, target))
    }
}

// ── Update state machine ─────────────────────────────────────────────

/// Progress of one create-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// The record already holds the desired value.
    Unchanged,
    /// The stale record still has to be removed.
    PendingDelete,
    /// The desired record still has to be created.
    PendingCreate,
    Done,
}

/// What an upsert ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Unchanged,
    Created,
    /// The old record was deleted and the new one created.
    Replaced,
}

/// A planned create-or-update for one record.
///
/// A failed run leaves the plan in the state it reached, so it can be
/// handed back to [`Records::resume`] to finish the job.
#[derive(Debug, Clone)]
pub struct Upsert<R> {
    desired: R,
    existing: Option<R>,
    state: UpdateState,
}

impl<R: RecordKind> Upsert<R> {
    /// Diff `desired` against the current record set.
    pub fn plan(current: &[R], desired: R) -> Self {
        match current.iter().find(|r| r.domain() == desired.domain()) {
            Some(found) if found.value() == desired.value() => Self {
                desired,
                existing: None,
                state: UpdateState::Unchanged,
            },
            Some(found) => Self {
                existing: Some(found.clone()),
                desired,
                state: UpdateState::PendingDelete,
            },
            None => Self {
                desired,
                existing: None,
                state: UpdateState::PendingCreate,
            },
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn desired(&self) -> &R {
        &self.desired
    }

    /// The stale record being replaced, if any.
    pub fn existing(&self) -> Option<&R> {
        self.existing.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, UpdateState::Unchanged | UpdateState::Done)
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Record operations for one record kind.
pub struct Records<'a, R> {
    client: &'a PiholeClient,
    _kind: PhantomData<R>,
}

impl PiholeClient {
    /// Host (A) records.
    pub fn hosts(&self) -> Records<'_, HostRecord> {
        Records {
            client: self,
            _kind: PhantomData,
        }
    }

    /// Alias (CNAME) records.
    pub fn aliases(&self) -> Records<'_, AliasRecord> {
        Records {
            client: self,
            _kind: PhantomData,
        }
    }
}

impl<R: RecordKind> Records<'_, R> {
    /// Fetch and decode the full record set.
    ///
    /// `GET /api/config/dns/{collection}`. Lines that do not decode are
    /// skipped with a warning.
    pub async fn list(&self) -> Result<Vec<R>, Error> {
        let url = self
            .client
            .api_url(&format!("config/dns/{}", R::COLLECTION))?;
        debug!(kind = R::KIND, "listing records");

        let resp = self.client.execute(Method::GET, url, None).await?;
        let body =
            PiholeClient::read_json(resp, || format!("list {} records", R::KIND)).await?;

        let pointer = format!("/config/dns/{}", R::COLLECTION);
        let lines: Vec<String> = match body.pointer(&pointer) {
            Some(raw) => {
                serde_json::from_value(raw.clone()).map_err(|e| Error::Deserialization {
                    message: format!("{} list is not an array of strings: {e}", R::KIND),
                    body: body.to_string(),
                })?
            }
            None => Vec::new(),
        };

        Ok(decode_lines(&lines))
    }

    /// Look up the record for `domain`.
    pub async fn find(&self, domain: &str) -> Result<Option<R>, Error> {
        Ok(self.list().await?.into_iter().find(|r| r.domain() == domain))
    }

    /// Create the record, or replace it if `domain` maps to another value.
    ///
    /// Idempotent: a record that already holds `value` costs no mutation.
    /// Not atomic: if the create half of a replacement fails, the old
    /// record is already gone and [`Error::PartialUpdate`] is returned.
    pub async fn upsert(&self, domain: &str, value: &str) -> Result<UpsertOutcome, Error> {
        let mut plan = self.plan_upsert(domain, value).await?;
        self.resume(&mut plan).await
    }

    /// Diff `domain -> value` against the live record set without mutating.
    ///
    /// Callers that want to retry a half-finished replacement keep the
    /// returned plan and pass it to [`resume`](Self::resume) again after an
    /// [`Error::PartialUpdate`].
    pub async fn plan_upsert(&self, domain: &str, value: &str) -> Result<Upsert<R>, Error> {
        self.client.throttle().await?;
        let current = self.list().await?;

        let desired = R::from_parts(domain.to_owned(), value.to_owned());
        let plan = Upsert::plan(&current, desired);
        debug!(kind = R::KIND, domain, state = ?plan.state(), "planned upsert");
        Ok(plan)
    }

    /// Drive a plan to completion from whatever state it is in.
    ///
    /// A stale record is only deleted while the plan is `PendingDelete`, so
    /// resuming after a failed create never deletes twice.
    pub async fn resume(&self, plan: &mut Upsert<R>) -> Result<UpsertOutcome, Error> {
        let replacing = plan.existing.is_some();
        loop {
            match plan.state {
                UpdateState::Unchanged => return Ok(UpsertOutcome::Unchanged),
                UpdateState::Done if replacing => return Ok(UpsertOutcome::Replaced),
                UpdateState::Done => return Ok(UpsertOutcome::Created),
                UpdateState::PendingDelete => {
                    if let Some(stale) = plan.existing.clone() {
                        self.remove(&stale).await?;
                    }
                    plan.state = UpdateState::PendingCreate;
                    self.client.throttle().await.map_err(|e| partial(plan, e))?;
                }
                UpdateState::PendingCreate => {
                    self.create(&plan.desired).await.map_err(|e| {
                        if replacing { partial(plan, e) } else { e }
                    })?;
                    plan.state = UpdateState::Done;
                }
            }
        }
    }

    /// Delete the record for `domain`.
    ///
    /// Returns `false` when there was nothing to delete.
    pub async fn delete(&self, domain: &str) -> Result<bool, Error> {
        self.client.throttle().await?;
        let Some(record) = self.find(domain).await? else {
            debug!(kind = R::KIND, domain, "record already absent");
            return Ok(false);
        };
        self.remove(&record).await?;
        Ok(true)
    }

    async fn create(&self, record: &R) -> Result<(), Error> {
        let url = self
            .client
            .api_url_with_segment(&format!("config/dns/{}", R::COLLECTION), &record.encode())?;
        debug!(kind = R::KIND, domain = record.domain(), "creating record");

        let resp = self.client.execute(Method::PUT, url, None).await?;
        PiholeClient::expect_success(resp, || {
            format!("create {} record '{}'", R::KIND, record.domain())
        })
        .await
    }

    async fn remove(&self, record: &R) -> Result<(), Error> {
        let url = self
            .client
            .api_url_with_segment(&format!("config/dns/{}", R::COLLECTION), &record.encode())?;
        debug!(kind = R::KIND, domain = record.domain(), "deleting record");

        let resp = self.client.execute(Method::DELETE, url, None).await?;
        PiholeClient::expect_success(resp, || {
            format!("delete {} record '{}'", R::KIND, record.domain())
        })
        .await
    }
}

fn partial<R: RecordKind>(plan: &Upsert<R>, source: Error) -> Error {
    Error::PartialUpdate {
        domain: plan.desired.domain().to_owned(),
        state: plan.state,
        source: Box::new(source),
    }
}

/// Decode wire lines, logging and skipping the ones that do not parse.
fn decode_lines<R: RecordKind>(lines: &[String]) -> Vec<R> {
    lines
        .iter()
        .filter_map(|line| {
            let decoded = R::decode(line);
            if decoded.is_none() {
                warn!(kind = R::KIND, line = %line, "skipping malformed record line");
            }
            decoded
        })
        .collect()
}
