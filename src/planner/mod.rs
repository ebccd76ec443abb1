//! Plan builder trait and implementations
//!
//! Turns a resolved intent into an ordered sequence of agent steps with
//! confidence and evidence metadata. The canned builder hard-codes the step
//! content per intent; the trait keeps the seam open for a builder that
//! computes plans dynamically.

use crate::models::{Intent, Plan, PlanStep, StepStatus};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// Trait for plan generation
#[async_trait]
pub trait PlanBuilder: Send + Sync {
    /// Build a plan for an intent. `Unclassified` short-circuits: no plan.
    async fn build(&self, intent: Intent) -> Result<Option<Plan>>;
}

/// Builder with fixed per-intent playbooks
pub struct CannedPlanBuilder;

#[async_trait]
impl PlanBuilder for CannedPlanBuilder {
    async fn build(&self, intent: Intent) -> Result<Option<Plan>> {
        let (summary, steps, total_amount, outflow_amount) = match intent {
            Intent::IssueInvoice => (
                "I'll create an invoice for Ravi Dairy Distributors. Here's my execution plan:",
                invoice_steps(),
                240_000,
                // Issuing a receivable moves no cash out.
                0,
            ),
            Intent::DisbursePayments => (
                "Processing farmer payment request. This requires CFO approval (>₹50K):",
                payment_steps(),
                500_000,
                500_000,
            ),
            Intent::FreezeBudget => (
                "Budget freeze request analyzed:",
                freeze_steps(),
                0,
                0,
            ),
            Intent::Unclassified => return Ok(None),
        };

        Ok(Some(Plan {
            plan_id: Uuid::new_v4(),
            intent,
            summary: summary.to_string(),
            steps,
            total_amount,
            outflow_amount,
            created_at: Utc::now(),
            executed: false,
            approval_id: None,
        }))
    }
}

/// Advisory reply for commands no rule recognizes. No plan, no approval,
/// no audit activity.
pub fn advisory_reply(command: &str) -> String {
    format!(
        "I understand your request: \"{}\". Let me analyze this and provide a recommendation.\n\n\
         Based on current data, I'll need to coordinate between agents to process this. \
         The Financial Planner and relevant agents are being activated.\n\n\
         Would you like me to proceed with execution, or would you prefer to see a detailed \
         impact analysis first?",
        command
    )
}

fn step(
    agent: &str,
    task: &str,
    decision: &str,
    impact: &str,
    confidence: u8,
    reason: &str,
    evidence: &str,
    status: StepStatus,
) -> PlanStep {
    PlanStep {
        agent: agent.to_string(),
        task: task.to_string(),
        decision: decision.to_string(),
        impact: impact.to_string(),
        confidence,
        reason: reason.to_string(),
        evidence: evidence.to_string(),
        status,
    }
}

fn invoice_steps() -> Vec<PlanStep> {
    vec![
        step(
            "Financial Planner",
            "Validate invoice parameters",
            "Invoice amount ₹2,40,000 is within normal range for Ravi",
            "Receivables +₹2.4L",
            96,
            "Historical average order from Ravi is ₹1.5-2.5L",
            "Last 6 invoices averaged ₹1.89L",
            StepStatus::Completed,
        ),
        step(
            "Risk Assessor",
            "Credit risk check",
            "Ravi has good payment history — LOW risk",
            "No additional collateral needed",
            92,
            "Payment within 12 days average",
            "95% on-time payment rate over 12 months",
            StepStatus::Completed,
        ),
        step(
            "Compliance Auditor",
            "GST & tax validation",
            "GST @5% applicable on milk products",
            "Tax: ₹12,000",
            99,
            "HSN 0401 attracts 5% GST",
            "FSSAI and GST Act Schedule I",
            StepStatus::Completed,
        ),
    ]
}

fn payment_steps() -> Vec<PlanStep> {
    vec![
        step(
            "Farmer Payment Optimizer",
            "Optimize payment schedule",
            "Stagger ₹5L: ₹3L today + ₹2L on 28th",
            "Maintains ₹24.5L liquidity buffer",
            94,
            "Staggering preserves cash for incoming receivables due 26th-28th",
            "Cash flow forecast shows ₹4.2L inflow expected by 28th",
            StepStatus::Completed,
        ),
        step(
            "Cash Flow Forecaster",
            "Verify cash sufficiency",
            "Sufficient cash available — ₹33.9L balance",
            "Post-payment balance: ₹28.9L (safe)",
            91,
            "Current balance exceeds payment + safety margin",
            "Bank balance ₹24.5L + Cash ₹0.45L + incoming ₹9L",
            StepStatus::Completed,
        ),
        step(
            "Budget Controller",
            "Budget check",
            "Procurement budget has ₹1.29L remaining",
            "Budget utilization will reach 97%",
            97,
            "March budget ₹8L, spent ₹6.71L",
            "Budget ledger shows ₹1,28,800 available",
            StepStatus::Running,
        ),
    ]
}

fn freeze_steps() -> Vec<PlanStep> {
    vec![
        step(
            "Budget Controller",
            "Analyze transport budget",
            "Transport budget at 85% (₹1.27L of ₹1.5L spent)",
            "Freeze will block ₹23K remaining",
            97,
            "Current run rate suggests budget will be exceeded by month-end",
            "Daily transport cost ₹4,200 × 10 remaining days = ₹42K needed vs ₹23K available",
            StepStatus::Completed,
        ),
        step(
            "Risk Assessor",
            "Impact analysis",
            "Freeze may cause delivery delays — MEDIUM risk",
            "3-4 deliveries may need rescheduling",
            85,
            "Insufficient budget for all scheduled deliveries",
            "8 deliveries scheduled, budget covers only 5",
            StepStatus::Completed,
        ),
    ]
}
