//! Approval gate
//!
//! Owns the approval state machine. Routes each submitted plan by its cash
//! outflow: small amounts execute immediately, larger ones wait for an
//! explicit Manager or CFO decision. Every created approval and every
//! transition is audited.

use crate::audit::AuditLog;
use crate::config::ApprovalPolicy;
use crate::error::{PipelineError, Result};
use crate::models::{
    ActorKind, Approval, ApprovalDecision, ApprovalStatus, AuditEvent, Plan,
};
use crate::store::Repository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of submitting a plan to the gate.
#[derive(Debug, Clone)]
pub enum Routing {
    /// Below the policy threshold: no approval record, execution may proceed.
    AutoApproved,
    /// A pending approval now blocks execution until decided.
    PendingApproval(Approval),
}

pub struct ApprovalGate {
    approvals: Repository<Approval>,
    audit: Arc<AuditLog>,
    policy: ApprovalPolicy,
}

impl ApprovalGate {
    pub fn new(
        approvals: Repository<Approval>,
        audit: Arc<AuditLog>,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            approvals,
            audit,
            policy,
        }
    }

    /// Route a plan through the policy. Auto-approved plans leave no trace
    /// here; gated plans get a Pending approval plus one audit entry.
    pub async fn submit(&self, plan: &Plan, requested_by: &str) -> Result<Routing> {
        let Some(approver) = self.policy.route(plan.outflow_amount) else {
            info!(
                plan_id = %plan.plan_id,
                outflow = plan.outflow_amount,
                "Plan auto-approved"
            );
            return Ok(Routing::AutoApproved);
        };

        let approval = Approval {
            approval_id: Uuid::new_v4(),
            plan_id: Some(plan.plan_id),
            kind: plan.approval_kind().to_string(),
            description: plan.approval_description(),
            amount: plan.outflow_amount,
            requested_by: requested_by.to_string(),
            approver,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
        };

        self.approvals.create(approval.clone()).await?;

        let audited = self
            .audit
            .append(AuditEvent {
                actor: requested_by.to_string(),
                actor_kind: ActorKind::Ai,
                action: format!("{} Proposed", approval.kind),
                entity: "Approval".to_string(),
                entity_id: approval.approval_id.to_string(),
                before: None,
                after: Some(ApprovalStatus::Pending.to_string()),
                amount: Some(approval.amount),
                reason: approval.description.clone(),
            })
            .await;

        if let Err(e) = audited {
            self.approvals
                .remove(&approval.approval_id.to_string())
                .await?;
            return Err(e);
        }

        info!(
            plan_id = %plan.plan_id,
            approval_id = %approval.approval_id,
            approver = %approver,
            amount = approval.amount,
            "Approval required"
        );

        Ok(Routing::PendingApproval(approval))
    }

    /// Apply an explicit operator decision. Only a Pending approval can
    /// transition; the check-and-set runs inside the store's write lock, so
    /// concurrent decides have exactly one winner and every loser gets
    /// `InvalidTransition`.
    pub async fn decide(
        &self,
        approval_id: Uuid,
        decision: ApprovalDecision,
        actor: &str,
    ) -> Result<Approval> {
        let transition = self
            .approvals
            .update(&approval_id.to_string(), |approval| {
                match approval.status {
                    ApprovalStatus::Pending => {
                        approval.status = decision.into();
                        Ok(approval.clone())
                    }
                    current => Err(current),
                }
            })
            .await?;

        let updated = match transition {
            None => return Err(PipelineError::ApprovalNotFound(approval_id)),
            Some(Err(current)) => {
                warn!(
                    approval_id = %approval_id,
                    current = %current,
                    "Rejected decision on non-pending approval"
                );
                return Err(PipelineError::InvalidTransition {
                    approval_id,
                    current,
                });
            }
            Some(Ok(updated)) => updated,
        };

        let action = match decision {
            ApprovalDecision::Approved => "Approval Granted",
            ApprovalDecision::Rejected => "Approval Rejected",
        };

        let audited = self
            .audit
            .append(AuditEvent {
                actor: actor.to_string(),
                actor_kind: ActorKind::Human,
                action: action.to_string(),
                entity: "Approval".to_string(),
                entity_id: approval_id.to_string(),
                before: Some(ApprovalStatus::Pending.to_string()),
                after: Some(updated.status.to_string()),
                amount: Some(updated.amount),
                reason: updated.description.clone(),
            })
            .await;

        if let Err(e) = audited {
            self.approvals
                .update(&approval_id.to_string(), |approval| {
                    approval.status = ApprovalStatus::Pending;
                })
                .await?;
            return Err(e);
        }

        info!(
            approval_id = %approval_id,
            status = %updated.status,
            actor = actor,
            "Approval decided"
        );

        Ok(updated)
    }

    /// Administrative override: push a resolved approval back to Pending.
    /// Not part of the normal lifecycle; always audited.
    pub async fn revert(&self, approval_id: Uuid, actor: &str) -> Result<Approval> {
        let reverted = self
            .approvals
            .update(&approval_id.to_string(), |approval| {
                let previous = approval.status;
                approval.status = ApprovalStatus::Pending;
                (previous, approval.clone())
            })
            .await?;

        let Some((previous, updated)) = reverted else {
            return Err(PipelineError::ApprovalNotFound(approval_id));
        };

        let audited = self
            .audit
            .append(AuditEvent {
                actor: actor.to_string(),
                actor_kind: ActorKind::Human,
                action: "Approval Reverted".to_string(),
                entity: "Approval".to_string(),
                entity_id: approval_id.to_string(),
                before: Some(previous.to_string()),
                after: Some(ApprovalStatus::Pending.to_string()),
                amount: Some(updated.amount),
                reason: "Administrative override back to pending".to_string(),
            })
            .await;

        if let Err(e) = audited {
            self.approvals
                .update(&approval_id.to_string(), |approval| {
                    approval.status = previous;
                })
                .await?;
            return Err(e);
        }

        warn!(
            approval_id = %approval_id,
            from = %previous,
            actor = actor,
            "Approval reverted to pending"
        );

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, PlanStep, StepStatus};

    fn plan_with_outflow(outflow: i64) -> Plan {
        Plan {
            plan_id: Uuid::new_v4(),
            intent: Intent::DisbursePayments,
            summary: "test plan".to_string(),
            steps: vec![PlanStep {
                agent: "Farmer Payment Optimizer".to_string(),
                task: "Optimize payment schedule".to_string(),
                decision: "Stagger".to_string(),
                impact: "Liquidity preserved".to_string(),
                confidence: 94,
                reason: "test".to_string(),
                evidence: "test".to_string(),
                status: StepStatus::Completed,
            }],
            total_amount: outflow,
            outflow_amount: outflow,
            created_at: Utc::now(),
            executed: false,
            approval_id: None,
        }
    }

    async fn gate() -> (Arc<ApprovalGate>, Repository<Approval>, Arc<AuditLog>) {
        let approvals: Repository<Approval> = Repository::in_memory();
        let audit = Arc::new(AuditLog::new(Repository::in_memory()).await);
        let gate = Arc::new(ApprovalGate::new(
            approvals.clone(),
            audit.clone(),
            ApprovalPolicy::default(),
        ));
        (gate, approvals, audit)
    }

    #[tokio::test]
    async fn test_small_outflow_auto_approves() {
        let (gate, approvals, audit) = gate().await;
        let plan = plan_with_outflow(4_999);

        let routing = gate.submit(&plan, "Farmer Payment Optimizer").await.unwrap();

        assert!(matches!(routing, Routing::AutoApproved));
        assert_eq!(approvals.len().await, 0);
        assert_eq!(audit.len().await, 0);
    }

    #[tokio::test]
    async fn test_mid_band_routes_to_manager() {
        let (gate, approvals, audit) = gate().await;
        let plan = plan_with_outflow(20_000);

        let routing = gate.submit(&plan, "Financial Planner").await.unwrap();

        let Routing::PendingApproval(approval) = routing else {
            panic!("expected pending approval");
        };
        assert_eq!(approval.approver, crate::models::Approver::Manager);
        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(approvals.len().await, 1);
        assert_eq!(audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_large_outflow_routes_to_cfo() {
        let (gate, _, audit) = gate().await;
        let plan = plan_with_outflow(500_000);

        let routing = gate.submit(&plan, "Farmer Payment Optimizer").await.unwrap();

        let Routing::PendingApproval(approval) = routing else {
            panic!("expected pending approval");
        };
        assert_eq!(approval.approver, crate::models::Approver::Cfo);
        assert_eq!(approval.plan_id, Some(plan.plan_id));

        let proposed = audit.query(&Default::default()).await;
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed[0].action, "Payment Proposed");
        assert_eq!(proposed[0].actor_kind, ActorKind::Ai);
    }

    #[tokio::test]
    async fn test_decide_transitions_and_audits() {
        let (gate, _, audit) = gate().await;
        let plan = plan_with_outflow(500_000);

        let Routing::PendingApproval(approval) =
            gate.submit(&plan, "Farmer Payment Optimizer").await.unwrap()
        else {
            panic!("expected pending approval");
        };

        let decided = gate
            .decide(approval.approval_id, ApprovalDecision::Approved, "Admin")
            .await
            .unwrap();

        assert_eq!(decided.status, ApprovalStatus::Approved);

        let entries = audit.query(&Default::default()).await;
        let granted = entries.last().unwrap();
        assert_eq!(granted.action, "Approval Granted");
        assert_eq!(granted.actor_kind, ActorKind::Human);
        assert_eq!(granted.before.as_deref(), Some("Pending"));
        assert_eq!(granted.after.as_deref(), Some("Approved"));
    }

    #[tokio::test]
    async fn test_decide_on_resolved_is_invalid_and_unaudited() {
        let (gate, _, audit) = gate().await;
        let plan = plan_with_outflow(500_000);

        let Routing::PendingApproval(approval) =
            gate.submit(&plan, "Farmer Payment Optimizer").await.unwrap()
        else {
            panic!("expected pending approval");
        };
        gate.decide(approval.approval_id, ApprovalDecision::Rejected, "Admin")
            .await
            .unwrap();

        let audit_before = audit.len().await;
        let err = gate
            .decide(approval.approval_id, ApprovalDecision::Approved, "Admin")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(audit.len().await, audit_before);
    }

    #[tokio::test]
    async fn test_decide_unknown_approval() {
        let (gate, _, _) = gate().await;

        let err = gate
            .decide(Uuid::new_v4(), ApprovalDecision::Approved, "Admin")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ApprovalNotFound(_)));
    }

    #[tokio::test]
    async fn test_revert_reopens_the_state_machine() {
        let (gate, _, audit) = gate().await;
        let plan = plan_with_outflow(500_000);

        let Routing::PendingApproval(approval) =
            gate.submit(&plan, "Farmer Payment Optimizer").await.unwrap()
        else {
            panic!("expected pending approval");
        };
        gate.decide(approval.approval_id, ApprovalDecision::Rejected, "Admin")
            .await
            .unwrap();

        let reverted = gate.revert(approval.approval_id, "Admin").await.unwrap();
        assert_eq!(reverted.status, ApprovalStatus::Pending);

        let entries = audit.query(&Default::default()).await;
        let override_entry = entries.last().unwrap();
        assert_eq!(override_entry.action, "Approval Reverted");
        assert_eq!(override_entry.before.as_deref(), Some("Rejected"));

        // Normal flow resumes after the override.
        let decided = gate
            .decide(approval.approval_id, ApprovalDecision::Approved, "Admin")
            .await
            .unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_concurrent_decides_have_one_winner() {
        let (gate, _, audit) = gate().await;
        let plan = plan_with_outflow(500_000);

        let Routing::PendingApproval(approval) =
            gate.submit(&plan, "Farmer Payment Optimizer").await.unwrap()
        else {
            panic!("expected pending approval");
        };

        let approve = tokio::spawn({
            let gate = gate.clone();
            let id = approval.approval_id;
            async move { gate.decide(id, ApprovalDecision::Approved, "Admin").await }
        });
        let reject = tokio::spawn({
            let gate = gate.clone();
            let id = approval.approval_id;
            async move { gate.decide(id, ApprovalDecision::Rejected, "Admin").await }
        });

        let outcomes = [approve.await.unwrap(), reject.await.unwrap()];
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();

        assert_eq!(winners, 1);
        // Submission entry plus exactly one decision entry.
        assert_eq!(audit.len().await, 2);
    }
}
