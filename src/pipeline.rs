//! Command pipeline facade
//!
//! Wires the pipeline end to end:
//! COMMAND → INTENT → PLAN → APPROVAL GATE → EXECUTE → AUDIT
//!
//! Collaborators (a command input surface, an approvals list, an audit
//! viewer) talk to this type only.

use crate::approval::{ApprovalGate, Routing};
use crate::audit::{AuditFilter, AuditLog};
use crate::config::PipelineConfig;
use crate::execution::{ExecutionEngine, ExecutionResult};
use crate::intent::IntentResolver;
use crate::models::{Approval, ApprovalDecision, AuditEntry, Intent, Plan};
use crate::planner::{advisory_reply, CannedPlanBuilder, PlanBuilder};
use crate::store::{Repository, Stores};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What a submitted command produced.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub reply: String,
    pub intent: Intent,
    pub plan: Option<Plan>,
    pub requires_approval: bool,
    pub approval: Option<Approval>,
}

pub struct CommandPipeline {
    builder: Box<dyn PlanBuilder>,
    gate: ApprovalGate,
    engine: ExecutionEngine,
    plans: Repository<Plan>,
    audit: Arc<AuditLog>,
}

impl CommandPipeline {
    pub fn new(
        builder: Box<dyn PlanBuilder>,
        gate: ApprovalGate,
        engine: ExecutionEngine,
        plans: Repository<Plan>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            builder,
            gate,
            engine,
            plans,
            audit,
        }
    }

    /// Standard wiring over a store bundle with the canned plan builder.
    pub async fn with_stores(stores: &Stores, config: PipelineConfig) -> Self {
        let audit = Arc::new(AuditLog::new(stores.audit_entries.clone()).await);

        let gate = ApprovalGate::new(stores.approvals.clone(), audit.clone(), config.approvals);
        let engine = ExecutionEngine::new(
            stores.plans.clone(),
            stores.approvals.clone(),
            stores.invoices.clone(),
            stores.payments.clone(),
            stores.budgets.clone(),
            audit.clone(),
            config,
        );

        Self::new(
            Box::new(CannedPlanBuilder),
            gate,
            engine,
            stores.plans.clone(),
            audit,
        )
    }

    /// Resolve a command, build and persist its plan, and route it through
    /// the approval gate. Unrecognized commands get an advisory reply and
    /// leave no trace in any store.
    pub async fn submit_command(&self, text: &str, actor: &str) -> Result<CommandOutcome> {
        let intent = IntentResolver::resolve(text);

        info!(intent = %intent, actor = actor, command = text, "Command received");

        let Some(mut plan) = self.builder.build(intent).await? else {
            debug!(command = text, "No rule matched; advisory reply only");
            return Ok(CommandOutcome {
                reply: advisory_reply(text),
                intent,
                plan: None,
                requires_approval: false,
                approval: None,
            });
        };

        self.plans.create(plan.clone()).await?;

        let requester = plan.lead_agent().to_string();
        match self.gate.submit(&plan, &requester).await? {
            Routing::AutoApproved => Ok(CommandOutcome {
                reply: plan.summary.clone(),
                intent,
                plan: Some(plan),
                requires_approval: false,
                approval: None,
            }),
            Routing::PendingApproval(approval) => {
                self.plans
                    .update(&plan.plan_id.to_string(), |p| {
                        p.approval_id = Some(approval.approval_id)
                    })
                    .await?;
                plan.approval_id = Some(approval.approval_id);

                Ok(CommandOutcome {
                    reply: plan.summary.clone(),
                    intent,
                    plan: Some(plan),
                    requires_approval: true,
                    approval: Some(approval),
                })
            }
        }
    }

    pub async fn decide_approval(
        &self,
        approval_id: Uuid,
        decision: ApprovalDecision,
        actor: &str,
    ) -> Result<Approval> {
        self.gate.decide(approval_id, decision, actor).await
    }

    pub async fn revert_approval(&self, approval_id: Uuid, actor: &str) -> Result<Approval> {
        self.gate.revert(approval_id, actor).await
    }

    pub async fn execute_plan(&self, plan_id: Uuid, actor: &str) -> Result<ExecutionResult> {
        self.engine.execute(plan_id, actor).await
    }

    pub async fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.query(filter).await
    }
}
