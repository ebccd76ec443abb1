//! Execution engine
//!
//! The only component allowed to write domain entities. Applies an approved
//! plan exactly once: the executed flag is flipped by a compare-and-set
//! inside the plan store's write lock before any domain write, so a doubled
//! button press or a retried request can never mutate twice.

use crate::audit::AuditLog;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    ActorKind, Approval, ApprovalStatus, AuditEvent, Budget, Intent, Invoice, InvoiceStatus,
    LineItem, PaymentBatch, PaymentTranche, Plan,
};
use crate::store::{Entity, Repository};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The concrete entity mutation a successful execution produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    InvoiceCreated(Invoice),
    PaymentsScheduled(PaymentBatch),
    BudgetFrozen(Budget),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub plan_id: Uuid,
    pub summary: String,
    pub outcome: ExecutionOutcome,
}

pub struct ExecutionEngine {
    plans: Repository<Plan>,
    approvals: Repository<Approval>,
    invoices: Repository<Invoice>,
    payments: Repository<PaymentBatch>,
    budgets: Repository<Budget>,
    audit: Arc<AuditLog>,
    config: PipelineConfig,
}

impl ExecutionEngine {
    pub fn new(
        plans: Repository<Plan>,
        approvals: Repository<Approval>,
        invoices: Repository<Invoice>,
        payments: Repository<PaymentBatch>,
        budgets: Repository<Budget>,
        audit: Arc<AuditLog>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            plans,
            approvals,
            invoices,
            payments,
            budgets,
            audit,
            config,
        }
    }

    /// Execute a plan at most once. Preconditions: the plan exists, has not
    /// executed, and any linked approval is Approved. Violations produce no
    /// mutation and no audit entry.
    pub async fn execute(&self, plan_id: Uuid, actor: &str) -> Result<ExecutionResult> {
        let plan = self
            .plans
            .get(&plan_id.to_string())
            .await
            .ok_or(PipelineError::PlanNotFound(plan_id))?;

        if plan.executed {
            return Err(PipelineError::AlreadyExecuted(plan_id));
        }

        if let Some(approval_id) = plan.approval_id {
            let approval = self
                .approvals
                .get(&approval_id.to_string())
                .await
                .ok_or(PipelineError::ApprovalNotFound(approval_id))?;

            match approval.status {
                ApprovalStatus::Approved => {}
                ApprovalStatus::Pending => {
                    warn!(plan_id = %plan_id, "Execution blocked: approval still pending");
                    return Err(PipelineError::NotExecutable(format!(
                        "approval {} is still pending",
                        approval_id
                    )));
                }
                ApprovalStatus::Rejected => {
                    warn!(plan_id = %plan_id, "Execution blocked: approval rejected");
                    return Err(PipelineError::NotExecutable(format!(
                        "approval {} was rejected",
                        approval_id
                    )));
                }
            }
        }

        // Single point of mutual exclusion: the compare-and-set runs inside
        // the plan store's write lock. Exactly one caller wins the flip.
        let reserved = self
            .plans
            .update(&plan_id.to_string(), |p| {
                if p.executed {
                    false
                } else {
                    p.executed = true;
                    true
                }
            })
            .await?
            .ok_or(PipelineError::PlanNotFound(plan_id))?;

        if !reserved {
            debug!(plan_id = %plan_id, "Lost execution race");
            return Err(PipelineError::AlreadyExecuted(plan_id));
        }

        debug!(plan_id = %plan_id, intent = %plan.intent, actor = actor, "Executing plan");

        match self.apply(&plan).await {
            Ok(result) => {
                info!(plan_id = %plan_id, summary = %result.summary, "Plan executed");
                Ok(result)
            }
            Err(e) => {
                // Release the reservation so no partial mutation is
                // observable after a storage failure.
                self.release(plan_id).await;
                Err(e)
            }
        }
    }

    async fn release(&self, plan_id: Uuid) {
        let released = self
            .plans
            .update(&plan_id.to_string(), |p| p.executed = false)
            .await;
        if released.is_err() {
            warn!(plan_id = %plan_id, "Failed to release execution reservation");
        }
    }

    async fn apply(&self, plan: &Plan) -> Result<ExecutionResult> {
        match plan.intent {
            Intent::IssueInvoice => self.issue_invoice(plan).await,
            Intent::DisbursePayments => self.disburse_payments(plan).await,
            Intent::FreezeBudget => self.freeze_budget(plan).await,
            Intent::Unclassified => Err(PipelineError::NotExecutable(
                "unclassified commands produce no executable plan".to_string(),
            )),
        }
    }

    async fn issue_invoice(&self, plan: &Plan) -> Result<ExecutionResult> {
        let today = Utc::now().date_naive();
        let sequence = self.invoices.len().await + 1;

        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            number: format!("INV-{}-{:03}", today.year(), sequence),
            customer_id: "cust_1".to_string(),
            customer_name: "Ravi Dairy Distributors".to_string(),
            date: today,
            due_date: today + Duration::days(self.config.invoice_due_days),
            items: vec![
                LineItem {
                    item_name: "Full Cream Milk".to_string(),
                    qty: 2000,
                    rate: 62,
                    amount: 124_000,
                },
                LineItem {
                    item_name: "Ghee".to_string(),
                    qty: 223,
                    rate: 520,
                    amount: 116_000,
                },
            ],
            total: plan.total_amount,
            status: InvoiceStatus::Sent,
        };

        self.invoices.create(invoice.clone()).await?;

        let summary = format!(
            "Invoice #{} has been created and sent to Ravi Dairy Distributors.",
            invoice.number
        );

        let audited = self
            .audit
            .append(AuditEvent {
                actor: plan.lead_agent().to_string(),
                actor_kind: ActorKind::Ai,
                action: "Invoice Created".to_string(),
                entity: "Invoice".to_string(),
                entity_id: invoice.key(),
                before: None,
                after: Some(invoice.number.clone()),
                amount: Some(plan.total_amount),
                reason: summary.clone(),
            })
            .await;

        if let Err(e) = audited {
            self.invoices.remove(&invoice.key()).await.ok();
            return Err(e);
        }

        Ok(ExecutionResult {
            plan_id: plan.plan_id,
            summary,
            outcome: ExecutionOutcome::InvoiceCreated(invoice),
        })
    }

    async fn disburse_payments(&self, plan: &Plan) -> Result<ExecutionResult> {
        let today = Utc::now().date_naive();
        let sequence = self.payments.len().await + 1;

        // Staggered 3:2 split: the larger tranche goes out now, the rest on
        // the 28th to preserve the liquidity buffer.
        let immediate = plan.total_amount * 3 / 5;
        let deferred = plan.total_amount - immediate;

        let batch = PaymentBatch {
            batch_id: Uuid::new_v4(),
            reference: format!("PAY-{:04}", sequence),
            payee_group: "Farmers".to_string(),
            total: plan.total_amount,
            tranches: vec![
                PaymentTranche {
                    amount: immediate,
                    scheduled_for: today,
                },
                PaymentTranche {
                    amount: deferred,
                    scheduled_for: upcoming_28th(today),
                },
            ],
            created_at: Utc::now(),
        };

        self.payments.create(batch.clone()).await?;

        let summary = format!(
            "Payment batch #{} scheduled. ₹3L immediate, ₹2L for 28th.",
            batch.reference
        );

        let audited = self
            .audit
            .append(AuditEvent {
                actor: plan.lead_agent().to_string(),
                actor_kind: ActorKind::Ai,
                action: "Payments Scheduled".to_string(),
                entity: "Payment".to_string(),
                entity_id: batch.key(),
                before: None,
                after: Some(batch.reference.clone()),
                amount: Some(plan.total_amount),
                reason: "Staggered payment maintains liquidity while ensuring farmer trust"
                    .to_string(),
            })
            .await;

        if let Err(e) = audited {
            self.payments.remove(&batch.key()).await.ok();
            return Err(e);
        }

        Ok(ExecutionResult {
            plan_id: plan.plan_id,
            summary,
            outcome: ExecutionOutcome::PaymentsScheduled(batch),
        })
    }

    async fn freeze_budget(&self, plan: &Plan) -> Result<ExecutionResult> {
        let existing = self
            .budgets
            .list()
            .await
            .into_iter()
            .find(|b| b.name.contains("Transport"));

        let (budget, was_frozen, created) = match existing {
            Some(current) => {
                let frozen = self
                    .budgets
                    .update(&current.budget_id, |b| {
                        let before = b.frozen;
                        b.frozen = true;
                        (before, b.clone())
                    })
                    .await?
                    .ok_or_else(|| {
                        PipelineError::StorageError(format!(
                            "budget {} disappeared during freeze",
                            current.budget_id
                        ))
                    })?;
                (frozen.1, frozen.0, false)
            }
            None => {
                let budget = Budget {
                    budget_id: "bud_transport".to_string(),
                    name: "Transport & Logistics".to_string(),
                    period: Utc::now().format("%B %Y").to_string(),
                    allocated: 150_000,
                    spent: 127_000,
                    category: "Operations".to_string(),
                    frozen: true,
                };
                self.budgets.create(budget.clone()).await?;
                (budget, false, true)
            }
        };

        let summary =
            "Transport budget frozen. Approvals now required for any new expenses >₹0.".to_string();

        let audited = self
            .audit
            .append(AuditEvent {
                actor: plan.lead_agent().to_string(),
                actor_kind: ActorKind::Ai,
                action: "Budget Frozen".to_string(),
                entity: "Budget".to_string(),
                entity_id: budget.budget_id.clone(),
                before: Some((if was_frozen { "frozen" } else { "active" }).to_string()),
                after: Some("frozen".to_string()),
                amount: None,
                reason: "Current run rate suggests budget will be exceeded by month-end"
                    .to_string(),
            })
            .await;

        if let Err(e) = audited {
            if created {
                self.budgets.remove(&budget.budget_id).await.ok();
            } else {
                self.budgets
                    .update(&budget.budget_id, |b| b.frozen = was_frozen)
                    .await
                    .ok();
            }
            return Err(e);
        }

        Ok(ExecutionResult {
            plan_id: plan.plan_id,
            summary,
            outcome: ExecutionOutcome::BudgetFrozen(budget),
        })
    }
}

/// The 28th of the current month, or of the next month once it has passed.
fn upcoming_28th(today: NaiveDate) -> NaiveDate {
    if today.day() < 28 {
        NaiveDate::from_ymd_opt(today.year(), today.month(), 28).unwrap_or(today)
    } else if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 28).unwrap_or(today)
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 28).unwrap_or(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{CannedPlanBuilder, PlanBuilder};
    use crate::store::Stores;

    struct Harness {
        engine: Arc<ExecutionEngine>,
        stores: Stores,
        audit: Arc<AuditLog>,
    }

    async fn harness() -> Harness {
        let stores = Stores::in_memory();
        let audit = Arc::new(AuditLog::new(stores.audit_entries.clone()).await);
        let engine = Arc::new(ExecutionEngine::new(
            stores.plans.clone(),
            stores.approvals.clone(),
            stores.invoices.clone(),
            stores.payments.clone(),
            stores.budgets.clone(),
            audit.clone(),
            PipelineConfig::default(),
        ));

        Harness {
            engine,
            stores,
            audit,
        }
    }

    async fn seeded_plan(h: &Harness, intent: Intent) -> Plan {
        let plan = CannedPlanBuilder.build(intent).await.unwrap().unwrap();
        h.stores.plans.create(plan.clone()).await.unwrap();
        plan
    }

    async fn link_approval(h: &Harness, plan: &Plan, status: ApprovalStatus) -> Uuid {
        let approval = Approval {
            approval_id: Uuid::new_v4(),
            plan_id: Some(plan.plan_id),
            kind: "Payment".to_string(),
            description: "Pay farmers".to_string(),
            amount: plan.outflow_amount,
            requested_by: plan.lead_agent().to_string(),
            approver: crate::models::Approver::Cfo,
            status,
            created_at: Utc::now(),
        };
        h.stores.approvals.create(approval.clone()).await.unwrap();
        h.stores
            .plans
            .update(&plan.plan_id.to_string(), |p| {
                p.approval_id = Some(approval.approval_id)
            })
            .await
            .unwrap();
        approval.approval_id
    }

    #[tokio::test]
    async fn test_invoice_execution() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::IssueInvoice).await;

        let result = h.engine.execute(plan.plan_id, "Admin").await.unwrap();

        let ExecutionOutcome::InvoiceCreated(invoice) = &result.outcome else {
            panic!("expected an invoice");
        };
        assert_eq!(invoice.total, 240_000);
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(invoice.customer_name, "Ravi Dairy Distributors");
        assert!(invoice.number.starts_with("INV-"));
        assert_eq!(invoice.due_date - invoice.date, Duration::days(15));
        assert_eq!(h.stores.invoices.len().await, 1);

        let stored = h.stores.plans.get(&plan.plan_id.to_string()).await.unwrap();
        assert!(stored.executed);

        let entries = h.audit.query(&Default::default()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "Invoice Created");
        assert_eq!(entries[0].actor_kind, ActorKind::Ai);
        assert_eq!(entries[0].amount, Some(240_000));
    }

    #[tokio::test]
    async fn test_second_execute_is_idempotent_noop() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::IssueInvoice).await;

        h.engine.execute(plan.plan_id, "Admin").await.unwrap();
        let err = h.engine.execute(plan.plan_id, "Admin").await.unwrap_err();

        assert!(matches!(err, PipelineError::AlreadyExecuted(id) if id == plan.plan_id));
        assert_eq!(h.stores.invoices.len().await, 1);
        assert_eq!(h.audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_pending_approval_blocks_execution() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::DisbursePayments).await;
        link_approval(&h, &plan, ApprovalStatus::Pending).await;

        let err = h.engine.execute(plan.plan_id, "Admin").await.unwrap_err();

        assert!(matches!(err, PipelineError::NotExecutable(_)));
        assert_eq!(h.stores.payments.len().await, 0);
        assert_eq!(h.audit.len().await, 0);
        let stored = h.stores.plans.get(&plan.plan_id.to_string()).await.unwrap();
        assert!(!stored.executed);
    }

    #[tokio::test]
    async fn test_rejected_approval_blocks_execution() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::DisbursePayments).await;
        link_approval(&h, &plan, ApprovalStatus::Rejected).await;

        let err = h.engine.execute(plan.plan_id, "Admin").await.unwrap_err();

        assert!(matches!(err, PipelineError::NotExecutable(_)));
        assert_eq!(h.stores.payments.len().await, 0);
    }

    #[tokio::test]
    async fn test_approved_plan_schedules_payments() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::DisbursePayments).await;
        link_approval(&h, &plan, ApprovalStatus::Approved).await;

        let result = h.engine.execute(plan.plan_id, "Admin").await.unwrap();

        let ExecutionOutcome::PaymentsScheduled(batch) = &result.outcome else {
            panic!("expected a payment batch");
        };
        assert_eq!(batch.total, 500_000);
        assert_eq!(batch.reference, "PAY-0001");
        assert_eq!(batch.tranches.len(), 2);
        assert_eq!(batch.tranches[0].amount, 300_000);
        assert_eq!(batch.tranches[1].amount, 200_000);
        assert_eq!(batch.tranches[1].scheduled_for.day(), 28);

        let entries = h.audit.query(&Default::default()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "Payments Scheduled");
    }

    #[tokio::test]
    async fn test_freeze_flips_seeded_budget() {
        let h = harness().await;
        h.stores
            .budgets
            .create(Budget {
                budget_id: "bud_2".to_string(),
                name: "Transport & Logistics".to_string(),
                period: "March 2024".to_string(),
                allocated: 150_000,
                spent: 127_000,
                category: "Operations".to_string(),
                frozen: false,
            })
            .await
            .unwrap();
        let plan = seeded_plan(&h, Intent::FreezeBudget).await;

        let result = h.engine.execute(plan.plan_id, "Admin").await.unwrap();

        let ExecutionOutcome::BudgetFrozen(budget) = &result.outcome else {
            panic!("expected a frozen budget");
        };
        assert!(budget.frozen);
        assert_eq!(budget.budget_id, "bud_2");

        let entries = h.audit.query(&Default::default()).await;
        assert_eq!(entries[0].action, "Budget Frozen");
        assert_eq!(entries[0].before.as_deref(), Some("active"));
        assert_eq!(entries[0].after.as_deref(), Some("frozen"));
        assert_eq!(entries[0].amount, None);
    }

    #[tokio::test]
    async fn test_freeze_creates_missing_budget() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::FreezeBudget).await;

        let result = h.engine.execute(plan.plan_id, "Admin").await.unwrap();

        let ExecutionOutcome::BudgetFrozen(budget) = &result.outcome else {
            panic!("expected a frozen budget");
        };
        assert!(budget.frozen);
        assert_eq!(h.stores.budgets.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let h = harness().await;

        let err = h.engine.execute(Uuid::new_v4(), "Admin").await.unwrap_err();

        assert!(matches!(err, PipelineError::PlanNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_executions_mutate_once() {
        let h = harness().await;
        let plan = seeded_plan(&h, Intent::IssueInvoice).await;

        let first = tokio::spawn({
            let engine = h.engine.clone();
            let id = plan.plan_id;
            async move { engine.execute(id, "Admin").await }
        });
        let second = tokio::spawn({
            let engine = h.engine.clone();
            let id = plan.plan_id;
            async move { engine.execute(id, "Admin").await }
        });

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();
        let losers = outcomes
            .iter()
            .filter(|r| matches!(r, Err(PipelineError::AlreadyExecuted(_))))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(losers, 1);
        assert_eq!(h.stores.invoices.len().await, 1);
        assert_eq!(h.audit.len().await, 1);
    }

    #[test]
    fn test_upcoming_28th() {
        let mid_march = NaiveDate::from_ymd_opt(2024, 3, 24).unwrap();
        assert_eq!(
            upcoming_28th(mid_march),
            NaiveDate::from_ymd_opt(2024, 3, 28).unwrap()
        );

        let late_march = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        assert_eq!(
            upcoming_28th(late_march),
            NaiveDate::from_ymd_opt(2024, 4, 28).unwrap()
        );

        let december = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        assert_eq!(
            upcoming_28th(december),
            NaiveDate::from_ymd_opt(2025, 1, 28).unwrap()
        );
    }
}
