//! Request/response operations over the procurement stores.
//!
//! Every state-changing call takes a per-RFQ guard before loading its snapshot, so a second
//! award, revision, reopen or close racing on the same RFQ fails fast with
//! `ConcurrentModification`. The store's version check covers writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::convert::RateTable;
use crate::domain::award::{ActorId, Award, AwardId};
use crate::domain::quote::{PricedQuote, QuoteLineItemPrice, SupplierId, SupplierQuoteId};
use crate::domain::rfq::{LineItem, Rfq, RfqId};
use crate::domain::terms::Incoterm;
use crate::errors::{ApplicationError, DomainError};
use crate::matrix::{self, ComparisonMatrix, MatrixOptions, MatrixWarning};
use crate::negotiation::{
    AwardEvidence, NegotiationAction, NegotiationCommand, NegotiationContext, NegotiationEngine,
    NegotiationError, NegotiationSnapshot, NotificationKind, NotificationRequest, QuoteRevision,
    TransitionOutcome,
};
use crate::normalize::{
    self, NormalizationContext, NormalizationSettings, NormalizationWarning, NormalizedMatrix,
};
use crate::ports::{NotificationDispatcher, NotificationError, ProcurementStore};
use crate::ranking::{self, RankedMatrix, RankingConfig};

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub ranking: RankingConfig,
    pub notification_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { ranking: RankingConfig::default(), notification_timeout: Duration::from_secs(10) }
    }
}

/// Who is acting and under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: ActorId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: ActorId(actor.into()), correlation_id: format!("req-{}", Uuid::new_v4()) }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    fn audit(&self, rfq_id: &RfqId) -> AuditContext {
        AuditContext::new(Some(rfq_id.clone()), self.correlation_id.clone(), self.actor.0.clone())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ComparisonOptions {
    pub include_historical: bool,
    /// Raw prices are ranked when absent.
    pub normalization: Option<NormalizationSettings>,
    /// Move the RFQ to evaluation and submitted quotes to under review.
    pub mark_reviewed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComparisonWarning {
    Matrix(MatrixWarning),
    Normalization(NormalizationWarning),
}

impl std::fmt::Display for ComparisonWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matrix(warning) => write!(f, "{warning}"),
            Self::Normalization(warning) => write!(f, "{warning}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ComparisonResult {
    pub rfq: Rfq,
    pub matrix: ComparisonMatrix,
    pub normalized: Option<NormalizedMatrix>,
    pub rankings: RankedMatrix,
    pub warnings: Vec<ComparisonWarning>,
}

impl ComparisonResult {
    /// Currency the rankings are expressed in, when it is uniform.
    pub fn currency(&self) -> Option<&str> {
        self.normalized.as_ref().map(|normalized| normalized.settings.target_currency.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub supplier_id: SupplierId,
    pub quote_id: SupplierQuoteId,
    pub kind: NotificationKind,
    pub error: Option<NotificationError>,
}

impl NotificationOutcome {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BafoStatus {
    Requested,
    NotificationFailed { error: NotificationError },
    Skipped { reason: NegotiationError },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BafoOutcome {
    pub quote_id: SupplierQuoteId,
    pub supplier_id: Option<SupplierId>,
    #[serde(flatten)]
    pub status: BafoStatus,
}

/// Price sheet a supplier sends back after a BAFO request.
#[derive(Clone, Debug, PartialEq)]
pub struct RevisedQuote {
    pub previous_quote_id: SupplierQuoteId,
    pub total_price: Option<Decimal>,
    pub lead_time_days: Option<u32>,
    pub incoterm: Option<Incoterm>,
    pub prices: Vec<QuoteLineItemPrice>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevisionReceipt {
    pub previous_quote_id: SupplierQuoteId,
    pub new_quote_id: SupplierQuoteId,
    pub revision: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AwardReceipt {
    pub award: Award,
    pub notifications: Vec<NotificationOutcome>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReopenReceipt {
    pub rfq_id: RfqId,
    pub round: u32,
    pub superseded_award: Option<AwardId>,
    pub notifications: Vec<NotificationOutcome>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseReceipt {
    pub rfq_id: RfqId,
    pub notifications: Vec<NotificationOutcome>,
}

pub struct ProcurementService {
    store: Arc<dyn ProcurementStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    rates: Arc<dyn RateTable>,
    settings: ServiceSettings,
    engine: NegotiationEngine,
    guards: GuardMap,
}

impl ProcurementService {
    pub fn new(
        store: Arc<dyn ProcurementStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        rates: Arc<dyn RateTable>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            rates,
            settings,
            engine: NegotiationEngine::new(),
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub async fn build_comparison(
        &self,
        rfq_id: &RfqId,
        options: &ComparisonOptions,
        request: &RequestContext,
    ) -> Result<ComparisonResult, ApplicationError> {
        if options.mark_reviewed {
            self.mark_reviewed(rfq_id, request).await;
        }

        let rfq = self.load_rfq(rfq_id).await?;
        let line_items = self.store.list_line_items(rfq_id).await?;
        let quotes = self.load_priced_quotes(rfq_id, options.include_historical).await?;

        let matrix = matrix::build(
            &rfq,
            &line_items,
            &quotes,
            MatrixOptions { include_historical: options.include_historical },
        );
        let mut warnings: Vec<ComparisonWarning> =
            matrix.warnings.iter().cloned().map(ComparisonWarning::Matrix).collect();

        let (normalized, rankings) = match &options.normalization {
            Some(settings) => {
                let context = NormalizationContext { settings, rates: self.rates.as_ref() };
                let normalized = normalize::normalize(&matrix, context);
                warnings.extend(
                    normalized.warnings.iter().cloned().map(ComparisonWarning::Normalization),
                );
                let rankings = ranking::rank(&normalized, &self.settings.ranking);
                (Some(normalized), rankings)
            }
            None => {
                let rankings = ranking::rank(&matrix, &self.settings.ranking);
                (None, rankings)
            }
        };

        info!(
            event_name = "comparison.built",
            correlation_id = %request.correlation_id,
            rfq_id = %rfq_id,
            line_items = matrix.row_count(),
            suppliers = matrix.column_count(),
            warnings = warnings.len(),
            normalized = normalized.is_some(),
            "comparison matrix built"
        );
        self.audit.emit(
            request
                .audit(rfq_id)
                .event("comparison.built", AuditCategory::Comparison, AuditOutcome::Success)
                .with_metadata("line_items", matrix.row_count().to_string())
                .with_metadata("suppliers", matrix.column_count().to_string())
                .with_metadata("warnings", warnings.len().to_string()),
        );

        Ok(ComparisonResult { rfq, matrix, normalized, rankings, warnings })
    }

    pub async fn request_bafo(
        &self,
        rfq_id: &RfqId,
        quote_ids: &[SupplierQuoteId],
        message: &str,
        request: &RequestContext,
    ) -> Result<Vec<BafoOutcome>, ApplicationError> {
        let _guard = self.acquire(rfq_id)?;
        let snapshot = self.load_snapshot(rfq_id).await?;
        let line_items = self.store.list_line_items(rfq_id).await?;
        let command = NegotiationCommand::RequestBafo {
            quote_ids: quote_ids.to_vec(),
            message: message.to_string(),
        };
        let outcome = self.transition(&snapshot, &command, &line_items, None, request)?;
        self.commit(&outcome).await?;

        let notifications = self.dispatch(&outcome, request).await;
        let mut results = Vec::with_capacity(quote_ids.len());
        for quote_id in quote_ids {
            if results.iter().any(|result: &BafoOutcome| &result.quote_id == quote_id) {
                continue;
            }
            let supplier_id = snapshot.quote(quote_id).map(|quote| quote.supplier_id.clone());
            let status = if let Some(skipped) =
                outcome.skipped.iter().find(|skipped| &skipped.quote_id == quote_id)
            {
                BafoStatus::Skipped { reason: skipped.reason.clone() }
            } else {
                match notifications.iter().find(|sent| &sent.quote_id == quote_id) {
                    Some(NotificationOutcome { error: Some(error), .. }) => {
                        BafoStatus::NotificationFailed { error: error.clone() }
                    }
                    _ => BafoStatus::Requested,
                }
            };
            results.push(BafoOutcome { quote_id: quote_id.clone(), supplier_id, status });
        }

        info!(
            event_name = "negotiation.bafo_requested",
            correlation_id = %request.correlation_id,
            rfq_id = %rfq_id,
            requested = results
                .iter()
                .filter(|result| !matches!(result.status, BafoStatus::Skipped { .. }))
                .count(),
            skipped = outcome.skipped.len(),
            "BAFO round requested"
        );

        Ok(results)
    }

    pub async fn submit_revised_quote(
        &self,
        rfq_id: &RfqId,
        revised: RevisedQuote,
        request: &RequestContext,
    ) -> Result<RevisionReceipt, ApplicationError> {
        let _guard = self.acquire(rfq_id)?;
        let snapshot = self.load_snapshot(rfq_id).await?;
        let line_items = self.store.list_line_items(rfq_id).await?;

        let new_quote_id = SupplierQuoteId(format!("quote-{}", Uuid::new_v4()));
        let command = NegotiationCommand::SubmitRevision(QuoteRevision {
            previous_quote_id: revised.previous_quote_id.clone(),
            new_quote_id: new_quote_id.clone(),
            submitted_at: Utc::now(),
            total_price: revised.total_price,
            lead_time_days: revised.lead_time_days,
            incoterm: revised.incoterm,
            prices: revised.prices,
        });
        let outcome = self.transition(&snapshot, &command, &line_items, None, request)?;
        self.commit(&outcome).await?;

        let revision = outcome
            .changes
            .quotes
            .iter()
            .find(|quote| quote.id == new_quote_id)
            .map(|quote| quote.revision)
            .unwrap_or_default();

        info!(
            event_name = "negotiation.revision_submitted",
            correlation_id = %request.correlation_id,
            rfq_id = %rfq_id,
            quote_id = %new_quote_id,
            supersedes = %revised.previous_quote_id,
            revision,
            "revised quote recorded"
        );

        Ok(RevisionReceipt {
            previous_quote_id: revised.previous_quote_id,
            new_quote_id,
            revision,
        })
    }

    pub async fn award(
        &self,
        rfq_id: &RfqId,
        quote_id: &SupplierQuoteId,
        po_number: Option<String>,
        notes: Option<String>,
        request: &RequestContext,
    ) -> Result<AwardReceipt, ApplicationError> {
        let _guard = self.acquire(rfq_id)?;
        let snapshot = self.load_snapshot(rfq_id).await?;
        let line_items = self.store.list_line_items(rfq_id).await?;

        let priced = self.load_priced_quotes(rfq_id, false).await?;
        let matrix = matrix::build(&snapshot.rfq, &line_items, &priced, MatrixOptions::default());
        let ranked = ranking::rank(&matrix, &self.settings.ranking);
        let currency = match priced.iter().find(|candidate| &candidate.quote.id == quote_id) {
            Some(candidate) if !candidate.prices.is_empty() => candidate.price_currency(),
            _ => Some(snapshot.rfq.currency.as_str()),
        };
        let evidence = AwardEvidence { ranked: &ranked, currency };

        let command = NegotiationCommand::Award {
            award_id: AwardId(format!("award-{}", Uuid::new_v4())),
            quote_id: quote_id.clone(),
            po_number,
            notes,
        };
        let outcome = self.transition(&snapshot, &command, &line_items, Some(evidence), request)?;
        let award = outcome.changes.award.clone().ok_or_else(|| {
            ApplicationError::Domain(DomainError::InvariantViolation(
                "award transition produced no award record".to_string(),
            ))
        })?;
        self.commit(&outcome).await?;

        info!(
            event_name = "award.created",
            correlation_id = %request.correlation_id,
            rfq_id = %rfq_id,
            quote_id = %quote_id,
            award_id = %award.id,
            round = award.round,
            "RFQ awarded"
        );
        for action in &outcome.actions {
            if let NegotiationAction::GeneratePurchaseOrder { award_id, po_number } = action {
                info!(
                    event_name = "award.purchase_order_requested",
                    correlation_id = %request.correlation_id,
                    rfq_id = %rfq_id,
                    award_id = %award_id,
                    po_number = po_number.as_deref().unwrap_or("unassigned"),
                    "purchase order generation requested"
                );
            }
        }

        let notifications = self.dispatch(&outcome, request).await;
        Ok(AwardReceipt { award, notifications })
    }

    pub async fn reopen(
        &self,
        rfq_id: &RfqId,
        reason: Option<String>,
        request: &RequestContext,
    ) -> Result<ReopenReceipt, ApplicationError> {
        let _guard = self.acquire(rfq_id)?;
        let snapshot = self.load_snapshot(rfq_id).await?;
        let line_items = self.store.list_line_items(rfq_id).await?;

        let command = NegotiationCommand::Reopen { reason };
        let outcome = self.transition(&snapshot, &command, &line_items, None, request)?;
        self.commit(&outcome).await?;

        info!(
            event_name = "award.reopened",
            correlation_id = %request.correlation_id,
            rfq_id = %rfq_id,
            round = outcome.changes.rfq.round,
            "negotiation round reopened"
        );

        let notifications = self.dispatch(&outcome, request).await;
        Ok(ReopenReceipt {
            rfq_id: rfq_id.clone(),
            round: outcome.changes.rfq.round,
            superseded_award: outcome.changes.superseded_award.clone(),
            notifications,
        })
    }

    pub async fn close(
        &self,
        rfq_id: &RfqId,
        reason: Option<String>,
        request: &RequestContext,
    ) -> Result<CloseReceipt, ApplicationError> {
        let _guard = self.acquire(rfq_id)?;
        let snapshot = self.load_snapshot(rfq_id).await?;
        let line_items = self.store.list_line_items(rfq_id).await?;

        let command = NegotiationCommand::Close { reason };
        let outcome = self.transition(&snapshot, &command, &line_items, None, request)?;
        self.commit(&outcome).await?;

        info!(
            event_name = "negotiation.closed",
            correlation_id = %request.correlation_id,
            rfq_id = %rfq_id,
            "RFQ closed without award"
        );

        let notifications = self.dispatch(&outcome, request).await;
        Ok(CloseReceipt { rfq_id: rfq_id.clone(), notifications })
    }

    /// Moves a published RFQ into evaluation. The comparison is returned whatever happens here.
    async fn mark_reviewed(&self, rfq_id: &RfqId, request: &RequestContext) {
        if let Err(error) = self.try_mark_reviewed(rfq_id, request).await {
            warn!(
                event_name = "comparison.review_marker_failed",
                correlation_id = %request.correlation_id,
                rfq_id = %rfq_id,
                error_code = error.code(),
                error = %error,
                "review marker not recorded"
            );
        }
    }

    async fn try_mark_reviewed(
        &self,
        rfq_id: &RfqId,
        request: &RequestContext,
    ) -> Result<(), ApplicationError> {
        let Ok(_guard) = self.acquire(rfq_id) else {
            debug!(rfq_id = %rfq_id, "review marking skipped while another transition runs");
            return Ok(());
        };
        let snapshot = self.load_snapshot(rfq_id).await?;
        if !snapshot.rfq.status.is_negotiable() {
            return Ok(());
        }
        let line_items = self.store.list_line_items(rfq_id).await?;
        let command = NegotiationCommand::OpenReview { quote_ids: Vec::new() };
        let outcome = self.transition(&snapshot, &command, &line_items, None, request)?;
        self.commit(&outcome).await
    }

    fn transition(
        &self,
        snapshot: &NegotiationSnapshot,
        command: &NegotiationCommand,
        line_items: &[LineItem],
        evidence: Option<AwardEvidence<'_>>,
        request: &RequestContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let context = NegotiationContext {
            actor: request.actor.clone(),
            now: Utc::now(),
            line_items,
            evidence,
        };
        let outcome = self.engine.apply_with_audit(
            snapshot,
            command,
            &context,
            self.audit.as_ref(),
            &request.audit(&snapshot.rfq.id),
        );
        outcome.map_err(|error| {
            warn!(
                event_name = "negotiation.transition_rejected",
                correlation_id = %request.correlation_id,
                rfq_id = %snapshot.rfq.id,
                event = command.event().as_str(),
                error_code = error.code(),
                error = %error,
                "negotiation transition rejected"
            );
            ApplicationError::from(error)
        })
    }

    async fn commit(&self, outcome: &TransitionOutcome) -> Result<(), ApplicationError> {
        if outcome.is_noop() {
            return Ok(());
        }
        self.store.commit(&outcome.changes).await.map_err(ApplicationError::from)
    }

    async fn dispatch(
        &self,
        outcome: &TransitionOutcome,
        request: &RequestContext,
    ) -> Vec<NotificationOutcome> {
        let mut results = Vec::new();
        for notification in outcome.notifications() {
            let error = self.notify_one(notification).await.err();
            let audit_outcome =
                if error.is_some() { AuditOutcome::Failed } else { AuditOutcome::Success };
            let mut event = request
                .audit(&outcome.changes.rfq.id)
                .event("notification.dispatched", AuditCategory::Notification, audit_outcome)
                .with_quote(notification.quote_id.clone())
                .with_metadata("kind", notification.kind.as_str())
                .with_metadata("supplier_id", notification.supplier_id.0.clone());
            if let Some(error) = &error {
                warn!(
                    event_name = "notification.failed",
                    correlation_id = %request.correlation_id,
                    rfq_id = %outcome.changes.rfq.id,
                    supplier_id = %notification.supplier_id,
                    kind = notification.kind.as_str(),
                    error = %error,
                    "supplier notification failed"
                );
                event = event.with_metadata("error", error.to_string());
            }
            self.audit.emit(event);
            results.push(NotificationOutcome {
                supplier_id: notification.supplier_id.clone(),
                quote_id: notification.quote_id.clone(),
                kind: notification.kind,
                error,
            });
        }
        results
    }

    async fn notify_one(
        &self,
        notification: &NotificationRequest,
    ) -> Result<(), NotificationError> {
        let timeout = self.settings.notification_timeout;
        match tokio::time::timeout(timeout, self.notifier.notify(notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout {
                supplier_id: notification.supplier_id.clone(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn acquire(&self, rfq_id: &RfqId) -> Result<RfqGuard<'_>, ApplicationError> {
        let mut guards = lock_guards(&self.guards);
        let slot = Arc::clone(guards.entry(rfq_id.clone()).or_default());
        match slot.try_lock_owned() {
            Ok(held) => {
                Ok(RfqGuard { guards: &self.guards, rfq_id: rfq_id.clone(), held: Some(held) })
            }
            Err(_) => {
                Err(NegotiationError::ConcurrentModification { rfq_id: rfq_id.clone() }.into())
            }
        }
    }

    async fn load_rfq(&self, rfq_id: &RfqId) -> Result<Rfq, ApplicationError> {
        self.store
            .find_rfq(rfq_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound { entity: "rfq", id: rfq_id.0.clone() })
    }

    async fn load_snapshot(&self, rfq_id: &RfqId) -> Result<NegotiationSnapshot, ApplicationError> {
        let rfq = self.load_rfq(rfq_id).await?;
        let quotes = self.store.list_quotes(rfq_id, true).await?;
        let awards = self.store.list_awards(rfq_id).await?;
        Ok(NegotiationSnapshot { rfq, quotes, awards })
    }

    async fn load_priced_quotes(
        &self,
        rfq_id: &RfqId,
        include_historical: bool,
    ) -> Result<Vec<PricedQuote>, ApplicationError> {
        let quotes = self.store.list_quotes(rfq_id, include_historical).await?;
        let mut priced = Vec::with_capacity(quotes.len());
        for quote in quotes {
            let prices = self.store.list_line_item_prices(&quote.id).await?;
            priced.push(PricedQuote { quote, prices });
        }
        Ok(priced)
    }
}

type GuardMap = Mutex<HashMap<RfqId, Arc<tokio::sync::Mutex<()>>>>;

fn lock_guards(guards: &GuardMap) -> MutexGuard<'_, HashMap<RfqId, Arc<tokio::sync::Mutex<()>>>> {
    match guards.lock() {
        Ok(guards) => guards,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive hold on one RFQ. The map entry is dropped with the last holder.
struct RfqGuard<'a> {
    guards: &'a GuardMap,
    rfq_id: RfqId,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for RfqGuard<'_> {
    fn drop(&mut self) {
        // Slots are only cloned under the map lock, so a count of one means nobody is waiting.
        let mut guards = lock_guards(self.guards);
        self.held.take();
        if guards.get(&self.rfq_id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            guards.remove(&self.rfq_id);
        }
    }
}
