use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::award::{Award, AwardId, AwardStatus};
use crate::domain::quote::{QuoteLineItemPrice, QuoteStatus, SupplierQuote, SupplierQuoteId};
use crate::domain::rfq::{LineItemId, Rfq, RfqStatus};
use crate::negotiation::states::{
    NegotiationAction, NegotiationChangeSet, NegotiationCommand, NegotiationContext,
    NegotiationEvent, NegotiationSnapshot, NotificationKind, NotificationRequest, QuoteRevision,
    SkippedQuote, TransitionOutcome,
};
use crate::negotiation::NegotiationError;

/// Applies negotiation commands to a snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct NegotiationEngine;

impl NegotiationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(
        &self,
        snapshot: &NegotiationSnapshot,
        command: &NegotiationCommand,
        context: &NegotiationContext<'_>,
    ) -> Result<TransitionOutcome, NegotiationError> {
        match command {
            NegotiationCommand::OpenReview { quote_ids } => {
                open_review(snapshot, quote_ids, context)
            }
            NegotiationCommand::RequestBafo { quote_ids, message } => {
                request_bafo(snapshot, quote_ids, message, context)
            }
            NegotiationCommand::SubmitRevision(revision) => {
                submit_revision(snapshot, revision, context)
            }
            NegotiationCommand::Award { award_id, quote_id, po_number, notes } => award(
                snapshot,
                AwardRequest {
                    award_id,
                    quote_id,
                    po_number: po_number.as_deref(),
                    notes: notes.as_deref(),
                },
                context,
            ),
            NegotiationCommand::Reopen { reason } => reopen(snapshot, reason.as_deref(), context),
            NegotiationCommand::Close { reason } => close(snapshot, reason.as_deref(), context),
        }
    }

    pub fn apply_with_audit<S>(
        &self,
        snapshot: &NegotiationSnapshot,
        command: &NegotiationCommand,
        context: &NegotiationContext<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, NegotiationError>
    where
        S: AuditSink + ?Sized,
    {
        let event = command.event();
        let category = match event {
            NegotiationEvent::Award | NegotiationEvent::Reopen => AuditCategory::Award,
            _ => AuditCategory::Negotiation,
        };
        let result = self.apply(snapshot, command, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("negotiation.transition_applied", category, AuditOutcome::Success)
                        .with_metadata("event", event.as_str())
                        .with_metadata("from", outcome.rfq_from.as_str())
                        .with_metadata("to", outcome.rfq_to.as_str())
                        .with_metadata("quotes_changed", outcome.changes.quotes.len().to_string())
                        .with_metadata("skipped", outcome.skipped.len().to_string()),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("negotiation.transition_rejected", category, AuditOutcome::Rejected)
                        .with_metadata("event", event.as_str())
                        .with_metadata("state", snapshot.rfq.status.as_str())
                        .with_metadata("error_code", error.code())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

struct AwardRequest<'a> {
    award_id: &'a AwardId,
    quote_id: &'a SupplierQuoteId,
    po_number: Option<&'a str>,
    notes: Option<&'a str>,
}

/// Accumulates quote edits keyed by id so each quote appears once in the change set.
struct Draft<'s> {
    snapshot: &'s NegotiationSnapshot,
    event: NegotiationEvent,
    rfq: Rfq,
    quotes: BTreeMap<SupplierQuoteId, SupplierQuote>,
    actions: Vec<NegotiationAction>,
    skipped: Vec<SkippedQuote>,
}

impl<'s> Draft<'s> {
    fn new(snapshot: &'s NegotiationSnapshot, event: NegotiationEvent) -> Self {
        Self {
            snapshot,
            event,
            rfq: snapshot.rfq.clone(),
            quotes: BTreeMap::new(),
            actions: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn update(&mut self, quote: SupplierQuote) {
        self.quotes.insert(quote.id.clone(), quote);
    }

    fn notify(
        &mut self,
        quote: &SupplierQuote,
        kind: NotificationKind,
        title: String,
        body: String,
    ) {
        self.actions.push(NegotiationAction::Notify(NotificationRequest {
            supplier_id: quote.supplier_id.clone(),
            quote_id: quote.id.clone(),
            kind,
            title,
            body,
            data: json!({
                "rfq_id": self.rfq.id.0,
                "quote_id": quote.id.0,
                "round": self.rfq.round,
            }),
        }));
    }

    fn finish(
        mut self,
        context: &NegotiationContext<'_>,
        new_prices: Vec<QuoteLineItemPrice>,
        award: Option<Award>,
        superseded_award: Option<AwardId>,
    ) -> TransitionOutcome {
        let rfq_from = self.snapshot.rfq.status;
        let rfq_to = self.rfq.status;
        self.rfq.version = self.snapshot.rfq.version + 1;
        // Keep snapshot order so change sets are reproducible.
        let mut quotes: Vec<SupplierQuote> = self
            .snapshot
            .quotes
            .iter()
            .filter_map(|quote| self.quotes.remove(&quote.id))
            .collect();
        quotes.extend(self.quotes.into_values());

        TransitionOutcome {
            event: self.event,
            rfq_from,
            rfq_to,
            changes: NegotiationChangeSet {
                expected_version: self.snapshot.rfq.version,
                rfq: self.rfq,
                quotes,
                new_prices,
                award,
                superseded_award,
                committed_at: context.now,
            },
            actions: self.actions,
            skipped: self.skipped,
        }
    }
}

fn open_review(
    snapshot: &NegotiationSnapshot,
    quote_ids: &[SupplierQuoteId],
    context: &NegotiationContext<'_>,
) -> Result<TransitionOutcome, NegotiationError> {
    let event = NegotiationEvent::OpenReview;
    if !snapshot.rfq.status.is_negotiable() {
        return Err(NegotiationError::illegal("rfq", snapshot.rfq.status.as_str(), event));
    }

    let mut draft = Draft::new(snapshot, event);
    draft.rfq.status = RfqStatus::Evaluation;

    let selected: BTreeSet<&SupplierQuoteId> = quote_ids.iter().collect();
    for quote in snapshot.quotes.iter().filter(|quote| quote.is_active()) {
        if !selected.is_empty() && !selected.contains(&quote.id) {
            continue;
        }
        if quote.status == QuoteStatus::Submitted {
            let mut reviewed = quote.clone();
            reviewed.status = QuoteStatus::UnderReview;
            draft.update(reviewed);
        }
    }

    Ok(draft.finish(context, Vec::new(), None, None))
}

fn request_bafo(
    snapshot: &NegotiationSnapshot,
    quote_ids: &[SupplierQuoteId],
    message: &str,
    context: &NegotiationContext<'_>,
) -> Result<TransitionOutcome, NegotiationError> {
    let event = NegotiationEvent::RequestBafo;
    ensure_negotiable(&snapshot.rfq, event)?;

    let mut draft = Draft::new(snapshot, event);
    let mut seen = BTreeSet::new();
    for quote_id in quote_ids {
        if !seen.insert(quote_id) {
            continue;
        }
        let quote = match eligible_for_bafo(snapshot, quote_id) {
            Ok(quote) => quote,
            Err(reason) => {
                draft.skipped.push(SkippedQuote { quote_id: quote_id.clone(), reason });
                continue;
            }
        };

        let mut flagged = quote.clone();
        flagged.bafo_requested = true;
        draft.notify(
            quote,
            NotificationKind::BafoRequested,
            format!("Best and final offer requested: {}", snapshot.rfq.title),
            message.to_string(),
        );
        draft.update(flagged);
    }

    Ok(draft.finish(context, Vec::new(), None, None))
}

fn eligible_for_bafo<'a>(
    snapshot: &'a NegotiationSnapshot,
    quote_id: &SupplierQuoteId,
) -> Result<&'a SupplierQuote, NegotiationError> {
    let quote = find_quote(snapshot, quote_id)?;
    if !quote.is_active() {
        return Err(not_eligible(quote, "quote has been superseded by a revision"));
    }
    if !matches!(quote.status, QuoteStatus::Submitted | QuoteStatus::UnderReview) {
        return Err(not_eligible(
            quote,
            "only submitted or under-review quotes can be asked for a BAFO",
        ));
    }
    Ok(quote)
}

fn submit_revision(
    snapshot: &NegotiationSnapshot,
    revision: &QuoteRevision,
    context: &NegotiationContext<'_>,
) -> Result<TransitionOutcome, NegotiationError> {
    let event = NegotiationEvent::SubmitRevision;
    ensure_negotiable(&snapshot.rfq, event)?;

    let prior = find_quote(snapshot, &revision.previous_quote_id)?;
    if !prior.is_active() {
        return Err(not_eligible(prior, "quote has already been superseded"));
    }
    if !prior.bafo_requested {
        return Err(not_eligible(prior, "no BAFO was requested for this quote"));
    }
    if snapshot.quote(&revision.new_quote_id).is_some() {
        return Err(NegotiationError::illegal("quote", "existing", event));
    }

    let known: BTreeSet<&LineItemId> = context
        .line_items
        .iter()
        .filter(|item| item.rfq_id == snapshot.rfq.id)
        .map(|item| &item.id)
        .collect();
    let mut new_prices = Vec::with_capacity(revision.prices.len());
    for price in &revision.prices {
        if !known.contains(&price.line_item_id) {
            return Err(NegotiationError::ForeignLineItem {
                rfq_id: snapshot.rfq.id.clone(),
                line_item_id: price.line_item_id.clone(),
            });
        }
        let mut price = price.clone();
        price.quote_id = revision.new_quote_id.clone();
        new_prices.push(price);
    }

    let mut draft = Draft::new(snapshot, event);
    let mut superseded = prior.clone();
    superseded.bafo_requested = false;
    superseded.superseded_by = Some(revision.new_quote_id.clone());
    draft.update(superseded);
    draft.update(SupplierQuote {
        id: revision.new_quote_id.clone(),
        rfq_id: prior.rfq_id.clone(),
        supplier_id: prior.supplier_id.clone(),
        supplier_name: prior.supplier_name.clone(),
        submitted_at: revision.submitted_at,
        status: QuoteStatus::Submitted,
        bafo_requested: false,
        total_price: revision.total_price,
        lead_time_days: revision.lead_time_days,
        incoterm: revision.incoterm.unwrap_or(prior.incoterm),
        revision: prior.revision + 1,
        supersedes: Some(prior.id.clone()),
        superseded_by: None,
    });

    Ok(draft.finish(context, new_prices, None, None))
}

fn award(
    snapshot: &NegotiationSnapshot,
    request: AwardRequest<'_>,
    context: &NegotiationContext<'_>,
) -> Result<TransitionOutcome, NegotiationError> {
    let event = NegotiationEvent::Award;
    let rfq = &snapshot.rfq;
    match rfq.status {
        RfqStatus::Awarded => {
            return Err(NegotiationError::AlreadyAwarded {
                rfq_id: rfq.id.clone(),
                award_id: snapshot.active_award().map(|award| award.id.clone()),
            });
        }
        RfqStatus::Draft => {
            return Err(NegotiationError::illegal("rfq", rfq.status.as_str(), event));
        }
        RfqStatus::Published | RfqStatus::Evaluation | RfqStatus::Closed => {}
    }
    if let Some(existing) = snapshot.active_award() {
        return Err(NegotiationError::AlreadyAwarded {
            rfq_id: rfq.id.clone(),
            award_id: Some(existing.id.clone()),
        });
    }

    let target = find_quote(snapshot, request.quote_id)?;
    if !target.is_active() {
        return Err(not_eligible(target, "quote has been superseded by a revision"));
    }
    if !matches!(target.status, QuoteStatus::Submitted | QuoteStatus::UnderReview) {
        return Err(not_eligible(target, "only submitted or under-review quotes can be awarded"));
    }

    let mut total_value = target.total_price;
    let mut currency = target.total_price.map(|_| rfq.currency.clone());
    if let Some(evidence) = context.evidence {
        let summary = evidence
            .ranked
            .supplier(&target.id)
            .filter(|summary| summary.priced_line_items > 0)
            .ok_or_else(|| not_eligible(target, "quote has no priced line items"))?;
        if total_value.is_none() {
            total_value = Some(summary.total);
        }
        currency = evidence.currency.map(str::to_string);
    }

    let mut draft = Draft::new(snapshot, event);
    draft.rfq.status = RfqStatus::Awarded;

    let mut winner = target.clone();
    winner
        .transition_to(QuoteStatus::Accepted)
        .map_err(|_| not_eligible(target, "cannot accept"))?;
    winner.bafo_requested = false;
    draft.notify(
        target,
        NotificationKind::QuoteAwarded,
        format!("Quote awarded: {}", rfq.title),
        format!("Your quote {} has been selected for RFQ {}.", target.id, rfq.id),
    );
    draft.update(winner);

    for quote in snapshot.quotes.iter().filter(|quote| quote.is_active() && quote.id != target.id) {
        if quote.status.is_terminal() {
            if quote.bafo_requested {
                let mut cleared = quote.clone();
                cleared.bafo_requested = false;
                draft.update(cleared);
            }
            continue;
        }
        let mut rejected = quote.clone();
        rejected
            .transition_to(QuoteStatus::Rejected)
            .map_err(|_| not_eligible(quote, "cannot reject competing quote"))?;
        rejected.bafo_requested = false;
        draft.notify(
            quote,
            NotificationKind::QuoteRejected,
            format!("RFQ awarded: {}", rfq.title),
            format!("RFQ {} was awarded to another supplier. Thank you for quoting.", rfq.id),
        );
        draft.update(rejected);
    }

    let award = Award {
        id: request.award_id.clone(),
        rfq_id: rfq.id.clone(),
        quote_id: target.id.clone(),
        supplier_id: target.supplier_id.clone(),
        awarded_by: context.actor.clone(),
        awarded_at: context.now,
        po_number: request.po_number.map(str::to_string),
        notes: request.notes.map(str::to_string),
        total_value,
        currency,
        round: rfq.round,
        status: AwardStatus::Active,
        superseded_at: None,
    };
    draft.actions.push(NegotiationAction::GeneratePurchaseOrder {
        award_id: award.id.clone(),
        po_number: award.po_number.clone(),
    });

    Ok(draft.finish(context, Vec::new(), Some(award), None))
}

fn reopen(
    snapshot: &NegotiationSnapshot,
    reason: Option<&str>,
    context: &NegotiationContext<'_>,
) -> Result<TransitionOutcome, NegotiationError> {
    let event = NegotiationEvent::Reopen;
    if snapshot.rfq.status != RfqStatus::Awarded {
        return Err(NegotiationError::illegal("rfq", snapshot.rfq.status.as_str(), event));
    }

    let mut draft = Draft::new(snapshot, event);
    draft.rfq.status = RfqStatus::Evaluation;
    draft.rfq.round = snapshot.rfq.round + 1;

    let body = match reason {
        Some(reason) => format!("RFQ {} has been reopened: {reason}", snapshot.rfq.id),
        None => format!("RFQ {} has been reopened for a new round.", snapshot.rfq.id),
    };
    for quote in snapshot.quotes.iter().filter(|quote| quote.is_active()) {
        // A supplier who declined the RFQ stays declined across rounds.
        if quote.status == QuoteStatus::Declined {
            continue;
        }
        let mut reset = quote.clone();
        reset.status = QuoteStatus::Submitted;
        reset.bafo_requested = false;
        draft.notify(
            quote,
            NotificationKind::RfqReopened,
            format!("RFQ reopened: {}", snapshot.rfq.title),
            body.clone(),
        );
        draft.update(reset);
    }

    let superseded = snapshot.active_award().map(|award| award.id.clone());
    Ok(draft.finish(context, Vec::new(), None, superseded))
}

fn close(
    snapshot: &NegotiationSnapshot,
    reason: Option<&str>,
    context: &NegotiationContext<'_>,
) -> Result<TransitionOutcome, NegotiationError> {
    let event = NegotiationEvent::Close;
    if !snapshot.rfq.status.is_negotiable() {
        return Err(NegotiationError::illegal("rfq", snapshot.rfq.status.as_str(), event));
    }

    let mut draft = Draft::new(snapshot, event);
    draft.rfq.status = RfqStatus::Closed;

    let body = match reason {
        Some(reason) => format!("RFQ {} closed without award: {reason}", snapshot.rfq.id),
        None => format!("RFQ {} closed without award.", snapshot.rfq.id),
    };
    for quote in snapshot.quotes.iter().filter(|quote| quote.is_active()) {
        if quote.bafo_requested {
            let mut cleared = quote.clone();
            cleared.bafo_requested = false;
            draft.update(cleared);
        }
        if !quote.status.is_terminal() {
            draft.notify(
                quote,
                NotificationKind::RfqClosed,
                format!("RFQ closed: {}", snapshot.rfq.title),
                body.clone(),
            );
        }
    }

    Ok(draft.finish(context, Vec::new(), None, None))
}

fn ensure_negotiable(rfq: &Rfq, event: NegotiationEvent) -> Result<(), NegotiationError> {
    match rfq.status {
        RfqStatus::Published | RfqStatus::Evaluation => Ok(()),
        RfqStatus::Draft => Err(NegotiationError::illegal("rfq", rfq.status.as_str(), event)),
        RfqStatus::Closed | RfqStatus::Awarded => {
            Err(NegotiationError::RfqClosed { rfq_id: rfq.id.clone(), status: rfq.status })
        }
    }
}

fn find_quote<'a>(
    snapshot: &'a NegotiationSnapshot,
    quote_id: &SupplierQuoteId,
) -> Result<&'a SupplierQuote, NegotiationError> {
    snapshot.quote(quote_id).ok_or_else(|| NegotiationError::QuoteNotFound {
        rfq_id: snapshot.rfq.id.clone(),
        quote_id: quote_id.clone(),
    })
}

fn not_eligible(quote: &SupplierQuote, reason: &str) -> NegotiationError {
    NegotiationError::QuoteNotEligible {
        quote_id: quote.id.clone(),
        status: quote.status,
        reason: reason.to_string(),
    }
}
