//! Pipeline configuration
//!
//! Approval thresholds are configuration, not constants baked into the state
//! machine. Binaries load overrides from the environment (via dotenv).

use crate::models::Approver;
use std::env;
use std::path::PathBuf;

/// Amount bands that decide who must sign off on a plan's cash outflow.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalPolicy {
    /// Outflows strictly below this auto-approve with no approval record.
    pub auto_approve_below: i64,
    /// Outflows above this require the CFO; anything in between, a Manager.
    pub cfo_threshold: i64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_below: 5_000,
            cfo_threshold: 50_000,
        }
    }
}

impl ApprovalPolicy {
    /// Route an outflow amount: `None` means auto-approved.
    pub fn route(&self, amount: i64) -> Option<Approver> {
        if amount < self.auto_approve_below {
            None
        } else if amount <= self.cfo_threshold {
            Some(Approver::Manager)
        } else {
            Some(Approver::Cfo)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub approvals: ApprovalPolicy,
    /// Net terms for generated invoices, in days.
    pub invoice_due_days: i64,
    /// Directory for the durable JSON stores; `None` keeps everything
    /// in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            approvals: ApprovalPolicy::default(),
            invoice_due_days: 15,
            data_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            approvals: ApprovalPolicy {
                auto_approve_below: env_i64(
                    "AUTO_APPROVE_BELOW",
                    defaults.approvals.auto_approve_below,
                ),
                cfo_threshold: env_i64("CFO_THRESHOLD", defaults.approvals.cfo_threshold),
            },
            invoice_due_days: env_i64("INVOICE_DUE_DAYS", defaults.invoice_due_days),
            data_dir: env::var("DATA_DIR").ok().map(PathBuf::from),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
