//! Core data models for the command pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Recognized command intents. Closed set; anything the resolver cannot
/// place lands on `Unclassified` and produces no plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    IssueInvoice,
    DisbursePayments,
    FreezeBudget,
    Unclassified,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Outcome of an explicit operator decision on a pending approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Approver {
    Manager,
    #[serde(rename = "CFO")]
    Cfo,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Human,
    Ai,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

//
// ================= Plan =================
//

/// One agent's contribution to a plan. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub agent: String,
    pub task: String,
    pub decision: String,
    pub impact: String,
    /// Confidence in the decision, 0-100.
    pub confidence: u8,
    pub reason: String,
    pub evidence: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub intent: Intent,
    /// Operator-facing headline shown with the step cards.
    pub summary: String,
    pub steps: Vec<PlanStep>,
    /// Total monetary impact of the action (e.g. the invoice value).
    pub total_amount: i64,
    /// Cash leaving the business if executed. The approval gate routes on
    /// this, not on `total_amount`: issuing a receivable costs nothing.
    pub outflow_amount: i64,
    pub created_at: DateTime<Utc>,
    /// Flips false -> true exactly once, at the execution engine's
    /// compare-and-set. Never reverts on a completed execution.
    pub executed: bool,
    /// Set when the approval gate routed this plan to a pending approval.
    pub approval_id: Option<Uuid>,
}

impl Plan {
    /// The agent credited with the plan, used as requester and audit actor.
    pub fn lead_agent(&self) -> &str {
        self.steps
            .first()
            .map(|step| step.agent.as_str())
            .unwrap_or("Financial Planner")
    }

    /// Approval category shown in the approvals queue.
    pub fn approval_kind(&self) -> &'static str {
        match self.intent {
            Intent::IssueInvoice => "Invoice",
            Intent::DisbursePayments => "Payment",
            Intent::FreezeBudget => "Budget Freeze",
            Intent::Unclassified => "General",
        }
    }

    pub fn approval_description(&self) -> String {
        match self.intent {
            Intent::IssueInvoice => format!(
                "Issue invoice to Ravi Dairy Distributors {}",
                format_inr_full(self.total_amount)
            ),
            Intent::DisbursePayments => format!(
                "Pay farmers {} — staggered batch",
                format_inr_full(self.total_amount)
            ),
            Intent::FreezeBudget => "Freeze Transport & Logistics budget".to_string(),
            Intent::Unclassified => "Unclassified command".to_string(),
        }
    }
}

//
// ================= Approval =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approval_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub kind: String,
    pub description: String,
    pub amount: i64,
    pub requested_by: String,
    pub approver: Approver,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
}

//
// ================= Audit =================
//

/// Input to the audit logger. The logger assigns identity, timestamp,
/// sequence number, and the integrity hash.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor: String,
    pub actor_kind: ActorKind,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub amount: Option<i64>,
    pub reason: String,
}

/// One immutable line of history. Never updated or deleted; total order is
/// `(timestamp, seq)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub actor_kind: ActorKind,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub amount: Option<i64>,
    pub reason: String,
    /// SHA-256 of the entry's JSON form with this field blank.
    pub integrity_hash: String,
}

//
// ================= Domain Entities =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub item_name: String,
    pub qty: u32,
    pub rate: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub number: String,
    pub customer_id: String,
    pub customer_name: String,
    pub date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<LineItem>,
    pub total: i64,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTranche {
    pub amount: i64,
    pub scheduled_for: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentBatch {
    pub batch_id: Uuid,
    pub reference: String,
    pub payee_group: String,
    pub total: i64,
    pub tranches: Vec<PaymentTranche>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub budget_id: String,
    pub name: String,
    pub period: String,
    pub allocated: i64,
    pub spent: i64,
    pub category: String,
    pub frozen: bool,
}

//
// ================= Currency Helpers =================
//

/// Full INR rendering with Indian digit grouping: 240000 -> "₹2,40,000".
pub fn format_inr_full(amount: i64) -> String {
    let negative = amount < 0;
    let digits = amount.unsigned_abs().to_string();

    let mut grouped = String::new();
    if digits.len() <= 3 {
        grouped.push_str(&digits);
    } else {
        let (head, tail) = digits.split_at(digits.len() - 3);
        let mut head_groups = Vec::new();
        let mut end = head.len();
        while end > 2 {
            head_groups.push(&head[end - 2..end]);
            end -= 2;
        }
        head_groups.push(&head[..end]);
        head_groups.reverse();
        grouped.push_str(&head_groups.join(","));
        grouped.push(',');
        grouped.push_str(tail);
    }

    if negative {
        format!("-₹{}", grouped)
    } else {
        format!("₹{}", grouped)
    }
}

/// Compact INR rendering: 240000 -> "₹2.40L", 12000000 -> "₹1.20Cr".
pub fn format_inr(amount: i64) -> String {
    let value = amount as f64;
    if amount >= 10_000_000 {
        format!("₹{:.2}Cr", value / 10_000_000.0)
    } else if amount >= 100_000 {
        format!("₹{:.2}L", value / 100_000.0)
    } else if amount >= 1_000 {
        format!("₹{:.1}K", value / 1_000.0)
    } else {
        format_inr_full(amount)
    }
}

//
// ================= Display =================
//

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::IssueInvoice => "issue-invoice",
            Intent::DisbursePayments => "disburse-payments",
            Intent::FreezeBudget => "freeze-budget",
            Intent::Unclassified => "unclassified",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Approver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Approver::Manager => "Manager",
            Approver::Cfo => "CFO",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "Pending",
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::Rejected => "Rejected",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalDecision::Approved => "Approved",
            ApprovalDecision::Rejected => "Rejected",
        };
        write!(f, "{}", s)
    }
}

impl From<ApprovalDecision> for ApprovalStatus {
    fn from(decision: ApprovalDecision) -> Self {
        match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        }
    }
}
