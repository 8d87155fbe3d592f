//! Concurrent enrichment of a canonical package list.
//!
//! Each call to [`Orchestrator::start`] opens a new generation: a fixed-size
//! slot table holding the canonical records, one task per resolvable record
//! and one batch audit task. Tasks write only to their own slot and only
//! while their generation is still the active one, so a superseded
//! generation never receives late results.

use crate::audit::build_inventory;
use crate::config::{InsightConfig, LicensePolicy, StalenessThresholds};
use crate::error::Result;
use crate::metadata::{HttpAuditor, HttpLookup, PackageLookup, VulnerabilityAudit};
use crate::types::{AuditSummary, Enrichment, EnrichmentState, InventoryReport, PackageRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SlotTable = Arc<RwLock<Vec<PackageRecord>>>;

/// Incremental update published while a generation runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The record at `index` left `Pending`
    Settled {
        index: usize,
        state: EnrichmentState,
    },
    /// Audit results were merged into the table
    Audited { vulnerable_packages: usize },
    /// The audit call failed; no vulnerability data for this generation
    AuditFailed,
}

/// "N of M done"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub settled: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.settled == self.total
    }
}

/// Drives registry/host lookups and the vulnerability audit for each new
/// package list, superseding the previous one.
pub struct Orchestrator<L, A> {
    lookup: Arc<L>,
    auditor: Arc<A>,
    /// Id of the active generation; bumped on every start and cancel
    current: Arc<AtomicU64>,
    active: Mutex<Option<CancellationToken>>,
    thresholds: StalenessThresholds,
    policy: LicensePolicy,
}

impl Orchestrator<HttpLookup, HttpAuditor> {
    /// HTTP-backed orchestrator built from configuration
    pub fn from_config(config: &InsightConfig) -> Result<Self> {
        Ok(Self::new(
            HttpLookup::new(&config.network)?,
            HttpAuditor::new(&config.network)?,
        )
        .with_classification(config.staleness_thresholds.clone(), config.license_policy.clone()))
    }
}

impl<L: PackageLookup, A: VulnerabilityAudit> Orchestrator<L, A> {
    pub fn new(lookup: L, auditor: A) -> Self {
        Self {
            lookup: Arc::new(lookup),
            auditor: Arc::new(auditor),
            current: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
            thresholds: StalenessThresholds::default(),
            policy: LicensePolicy::default(),
        }
    }

    /// Thresholds and policy used for report summaries
    pub fn with_classification(mut self, thresholds: StalenessThresholds, policy: LicensePolicy) -> Self {
        self.thresholds = thresholds;
        self.policy = policy;
        self
    }

    /// Parse, extract and merge a lockfile, then start enriching it.
    ///
    /// An input error cancels the active generation before it is returned.
    pub fn ingest(&self, text: &str) -> Result<Generation> {
        let packages = match build_inventory(text) {
            Ok(packages) => packages,
            Err(e) => {
                warn!("Rejected lockfile: {}", e);
                self.cancel();
                return Err(e);
            }
        };
        Ok(self.start(packages))
    }

    /// Start a new generation over `packages`, cancelling the previous one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, mut packages: Vec<PackageRecord>) -> Generation {
        let cancel = CancellationToken::new();
        let id = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = active.replace(cancel.clone()) {
                previous.cancel();
            }
            self.current.fetch_add(1, Ordering::SeqCst) + 1
        };

        let (events, receiver) = mpsc::unbounded_channel();
        let total = packages.len();

        // Records without a resolved location settle immediately
        let mut to_lookup = Vec::new();
        for (index, pkg) in packages.iter_mut().enumerate() {
            if pkg.is_resolvable() {
                to_lookup.push((index, pkg.name().to_string(), pkg.version().map(str::to_string)));
            } else if pkg.transition(EnrichmentState::LocalOnly) {
                let _ = events.send(ProgressEvent::Settled {
                    index,
                    state: EnrichmentState::LocalOnly,
                });
            }
        }

        let audit_request: BTreeMap<String, String> = packages
            .iter()
            .filter_map(|p| Some((p.name().to_string(), p.version()?.to_string())))
            .collect();

        info!(
            "Generation {}: enriching {} of {} packages",
            id,
            to_lookup.len(),
            total
        );

        let slots: SlotTable = Arc::new(RwLock::new(packages));
        let guard = WriteGuard {
            generation: id,
            current: Arc::clone(&self.current),
            cancel: cancel.clone(),
            slots: Arc::clone(&slots),
        };

        let handles = to_lookup
            .into_iter()
            .map(|(index, name, version)| {
                let lookup = Arc::clone(&self.lookup);
                let guard = guard.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        biased;
                        _ = guard.cancel.cancelled() => return,
                        outcome = lookup.lookup(&name, version.as_deref()) => outcome,
                    };
                    if let Some(state) = guard.settle(index, &name, outcome) {
                        let _ = events.send(ProgressEvent::Settled { index, state });
                    }
                })
            })
            .collect();

        let auditor = Arc::clone(&self.auditor);
        let audit = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = guard.cancel.cancelled() => return None,
                outcome = auditor.audit(&audit_request) => outcome,
            };
            match outcome {
                Ok(summary) => {
                    let vulnerable_packages = guard.apply_audit(&summary)?;
                    let _ = events.send(ProgressEvent::Audited { vulnerable_packages });
                    Some(summary)
                }
                Err(e) => {
                    warn!("Vulnerability audit failed: {}", e);
                    let _ = events.send(ProgressEvent::AuditFailed);
                    None
                }
            }
        });

        Generation {
            id,
            total,
            slots,
            cancel,
            events: receiver,
            handles,
            audit: Some(audit),
            thresholds: self.thresholds.clone(),
            policy: self.policy.clone(),
        }
    }

    /// Consumer detached: cancel the active generation, leaving none active
    pub fn cancel(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = active.take() {
            token.cancel();
        }
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    /// Id of the most recently started generation, if it is still active
    pub fn active_generation(&self) -> Option<u64> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active
            .as_ref()
            .filter(|token| !token.is_cancelled())
            .map(|_| self.current.load(Ordering::SeqCst))
    }
}

/// Everything a task needs to decide whether it may still write
#[derive(Clone)]
struct WriteGuard {
    generation: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    slots: SlotTable,
}

impl WriteGuard {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Write a lookup outcome into slot `index` if the generation is live
    /// and the slot is still pending
    fn settle(&self, index: usize, name: &str, outcome: Result<Enrichment>) -> Option<EnrichmentState> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if !self.is_live() {
            debug!("Discarding result for {} from superseded generation {}", name, self.generation);
            return None;
        }

        let slot = slots.get_mut(index).filter(|slot| slot.is_pending())?;
        let state = match outcome {
            Ok(enrichment) => {
                slot.enrichment = enrichment;
                EnrichmentState::Resolved
            }
            Err(e) => {
                warn!("Lookup failed for {}: {}", slot, e);
                EnrichmentState::ResolvedWithError
            }
        };
        slot.transition(state).then_some(state)
    }

    /// Merge advisory counts by package name without touching states
    fn apply_audit(&self, summary: &AuditSummary) -> Option<usize> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if !self.is_live() {
            return None;
        }

        let mut vulnerable = 0;
        for slot in slots.iter_mut() {
            if let Some(found) = summary.packages.get(slot.name()) {
                slot.vulnerabilities = Some(*found);
                if found.count > 0 {
                    vulnerable += 1;
                }
            }
        }
        Some(vulnerable)
    }
}

/// Handle on one running generation. Dropping it cancels the generation.
pub struct Generation {
    id: u64,
    total: usize,
    slots: SlotTable,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    handles: Vec<JoinHandle<()>>,
    audit: Option<JoinHandle<Option<AuditSummary>>>,
    thresholds: StalenessThresholds,
    policy: LicensePolicy,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Copy of the slot table in canonical order
    pub fn snapshot(&self) -> Vec<PackageRecord> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn progress(&self) -> Progress {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Progress {
            settled: slots.iter().filter(|p| p.state().is_settled()).count(),
            total: self.total,
        }
    }

    /// Next progress event; `None` once every task has finished
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Cancel this generation and abort its in-flight lookups
    pub fn cancel(&self) {
        self.cancel.cancel();
        for handle in &self.handles {
            handle.abort();
        }
        if let Some(audit) = &self.audit {
            audit.abort();
        }
    }

    /// Wait for every lookup and the audit, then build the report
    pub async fn wait(mut self) -> InventoryReport {
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Lookup task failed: {}", e);
                }
            }
        }

        let audit = match self.audit.take() {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        let mut report = InventoryReport::new(self.id, self.snapshot(), audit);
        report.compute_summary(&self.thresholds, &self.policy);

        info!(
            "Generation {} complete: {} resolved, {} errors, {} local-only, {} pending",
            report.generation,
            report.summary.resolved,
            report.summary.resolved_with_error,
            report.summary.local_only,
            report.summary.pending,
        );
        report
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InsightError;
    use crate::types::{Origin, PackageVulnerabilities, VulnerabilitySeverity};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeLookup {
        failures: Vec<String>,
        delays_ms: HashMap<String, u64>,
        gate: Option<Arc<Semaphore>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl PackageLookup for FakeLookup {
        async fn lookup(&self, name: &str, _version: Option<&str>) -> Result<Enrichment> {
            self.calls.lock().unwrap().push(name.to_string());
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            if let Some(ms) = self.delays_ms.get(name) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.failures.iter().any(|f| f == name) {
                return Err(InsightError::network("connection reset"));
            }
            Ok(Enrichment {
                latest_version: Some("9.9.9".to_string()),
                license: Some("MIT".to_string()),
                ..Enrichment::default()
            })
        }
    }

    #[derive(Default)]
    struct FakeAuditor {
        fail: bool,
        requests: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
    }

    impl VulnerabilityAudit for FakeAuditor {
        async fn audit(&self, packages: &BTreeMap<String, String>) -> Result<AuditSummary> {
            self.requests.lock().unwrap().push(packages.clone());
            if self.fail {
                return Err(InsightError::api("audit", "HTTP 500"));
            }
            let mut summary = AuditSummary::default();
            if packages.contains_key("a") {
                summary.vulnerabilities = 2;
                summary.packages.insert(
                    "a".to_string(),
                    PackageVulnerabilities {
                        count: 2,
                        severity: VulnerabilitySeverity::High,
                    },
                );
            }
            Ok(summary)
        }
    }

    fn resolvable(name: &str) -> PackageRecord {
        let mut pkg = PackageRecord::new(name, name, Some("1.0.0".to_string()), Origin::Packages);
        pkg.resolved = Some(format!("https://registry.npmjs.org/{name}/-/{name}-1.0.0.tgz"));
        pkg
    }

    fn local(name: &str) -> PackageRecord {
        PackageRecord::new(name, name, Some("0.0.1".to_string()), Origin::Packages)
    }

    #[tokio::test]
    async fn test_all_lookups_settle() {
        let orchestrator = Orchestrator::new(FakeLookup::default(), FakeAuditor::default());
        let generation = orchestrator.start(vec![resolvable("a"), resolvable("b")]);
        assert_eq!(generation.progress().total, 2);

        let report = generation.wait().await;
        assert!(report
            .packages
            .iter()
            .all(|p| p.state() == EnrichmentState::Resolved));
        assert_eq!(report.packages[0].enrichment.latest_version.as_deref(), Some("9.9.9"));
        assert_eq!(report.summary.resolved, 2);
    }

    #[tokio::test]
    async fn test_local_only_records_never_looked_up() {
        let lookup = FakeLookup::default();
        let calls = Arc::clone(&lookup.calls);
        let orchestrator = Orchestrator::new(lookup, FakeAuditor::default());

        let generation = orchestrator.start(vec![local("linked"), resolvable("a")]);
        assert_eq!(generation.snapshot()[0].state(), EnrichmentState::LocalOnly);

        let report = generation.wait().await;
        assert_eq!(report.packages[0].state(), EnrichmentState::LocalOnly);
        assert_eq!(report.packages[0].enrichment, Enrichment::default());
        assert_eq!(*calls.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_package() {
        let lookup = FakeLookup {
            failures: vec!["b".to_string()],
            ..FakeLookup::default()
        };
        let orchestrator = Orchestrator::new(lookup, FakeAuditor::default());
        let report = orchestrator
            .start(vec![resolvable("a"), resolvable("b"), resolvable("c")])
            .wait()
            .await;

        assert_eq!(report.packages[0].state(), EnrichmentState::Resolved);
        assert_eq!(report.packages[1].state(), EnrichmentState::ResolvedWithError);
        assert_eq!(report.packages[1].enrichment, Enrichment::default());
        assert_eq!(report.packages[2].state(), EnrichmentState::Resolved);
    }

    #[tokio::test]
    async fn test_completions_land_in_their_own_slots() {
        let lookup = FakeLookup {
            delays_ms: HashMap::from([("a".to_string(), 120), ("c".to_string(), 60)]),
            ..FakeLookup::default()
        };
        let orchestrator = Orchestrator::new(lookup, FakeAuditor::default());
        let mut generation = orchestrator.start(vec![resolvable("a"), resolvable("b"), resolvable("c")]);

        let mut order = Vec::new();
        while let Some(event) = generation.next_event().await {
            if let ProgressEvent::Settled { index, .. } = event {
                order.push(index);
            }
        }

        assert_eq!(order, vec![1, 2, 0]);
        assert!(generation.progress().is_complete());
        let names: Vec<_> = generation.snapshot().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_superseded_generation_gets_no_writes() {
        let gate = Arc::new(Semaphore::new(0));
        let lookup = FakeLookup {
            gate: Some(Arc::clone(&gate)),
            ..FakeLookup::default()
        };
        let orchestrator = Orchestrator::new(lookup, FakeAuditor::default());

        let mut first = orchestrator.start(vec![resolvable("a"), resolvable("b")]);
        tokio::task::yield_now().await;

        let second = orchestrator.start(vec![resolvable("c")]);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        gate.add_permits(1);
        let report = second.wait().await;
        assert_eq!(report.packages[0].state(), EnrichmentState::Resolved);

        while let Some(event) = first.next_event().await {
            assert!(!matches!(event, ProgressEvent::Settled { .. }));
        }
        assert!(first.snapshot().iter().all(|p| p.is_pending()));
        assert_eq!(first.progress().settled, 0);
    }

    #[tokio::test]
    async fn test_consumer_cancel_stops_writes() {
        let gate = Arc::new(Semaphore::new(0));
        let lookup = FakeLookup {
            gate: Some(Arc::clone(&gate)),
            ..FakeLookup::default()
        };
        let orchestrator = Orchestrator::new(lookup, FakeAuditor::default());

        let generation = orchestrator.start(vec![resolvable("a")]);
        assert!(orchestrator.active_generation().is_some());
        orchestrator.cancel();
        assert_eq!(orchestrator.active_generation(), None);

        gate.add_permits(1);
        let report = generation.wait().await;
        assert!(report.packages[0].is_pending());
        assert!(report.audit.is_none());
    }

    #[tokio::test]
    async fn test_audit_merges_without_changing_state() {
        let auditor = FakeAuditor::default();
        let requests = Arc::clone(&auditor.requests);
        let orchestrator = Orchestrator::new(FakeLookup::default(), auditor);

        let report = orchestrator
            .start(vec![resolvable("a"), local("b")])
            .wait()
            .await;

        let a = &report.packages[0];
        assert_eq!(a.state(), EnrichmentState::Resolved);
        assert_eq!(a.vulnerabilities.map(|v| v.count), Some(2));
        assert_eq!(report.packages[1].state(), EnrichmentState::LocalOnly);
        assert_eq!(report.audit.as_ref().map(|s| s.vulnerabilities), Some(2));
        assert_eq!(report.summary.vulnerable, 1);

        let sent = requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get("a").map(String::as_str), Some("1.0.0"));
        assert_eq!(sent[0].get("b").map(String::as_str), Some("0.0.1"));
    }

    #[tokio::test]
    async fn test_audit_failure_leaves_no_vulnerability_data() {
        let auditor = FakeAuditor {
            fail: true,
            ..FakeAuditor::default()
        };
        let orchestrator = Orchestrator::new(FakeLookup::default(), auditor);
        let mut generation = orchestrator.start(vec![resolvable("a")]);

        let mut saw_failure = false;
        while let Some(event) = generation.next_event().await {
            saw_failure |= event == ProgressEvent::AuditFailed;
        }
        assert!(saw_failure);

        let report = generation.wait().await;
        assert!(report.audit.is_none());
        assert_eq!(report.packages[0].state(), EnrichmentState::Resolved);
        assert!(report.packages[0].vulnerabilities.is_none());
    }

    #[test]
    fn test_ingest_rejects_bad_input_and_cancels_active() {
        tokio_test::block_on(async {
            let orchestrator = Orchestrator::new(FakeLookup::default(), FakeAuditor::default());
            let first = orchestrator
                .ingest(r#"{"packages": {"node_modules/x": {"version": "1.0.0"}}}"#)
                .unwrap();
            assert_eq!(first.progress().total, 1);

            let err = orchestrator.ingest("{ not json").err().unwrap();
            assert!(err.is_input_error());
            assert!(first.is_cancelled());

            let err = orchestrator.ingest(r#"{"name": "empty"}"#).err().unwrap();
            assert!(matches!(err, InsightError::EmptyInventory));
        });
    }
}
