use cfo_command_pipeline::{
    audit::AuditFilter,
    config::PipelineConfig,
    models::{ApprovalDecision, Budget},
    pipeline::CommandPipeline,
    store::Stores,
};
use tracing::info;

fn demo_budgets() -> Vec<Budget> {
    vec![
        Budget {
            budget_id: "bud_1".to_string(),
            name: "Farmer Procurement".to_string(),
            period: "March 2024".to_string(),
            allocated: 800_000,
            spent: 671_200,
            category: "Procurement".to_string(),
            frozen: false,
        },
        Budget {
            budget_id: "bud_2".to_string(),
            name: "Transport & Logistics".to_string(),
            period: "March 2024".to_string(),
            allocated: 150_000,
            spent: 127_000,
            category: "Operations".to_string(),
            frozen: false,
        },
        Budget {
            budget_id: "bud_4".to_string(),
            name: "Marketing".to_string(),
            period: "March 2024".to_string(),
            allocated: 50_000,
            spent: 15_000,
            category: "Marketing".to_string(),
            frozen: false,
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    dotenv::dotenv().ok();

    info!("CFO Command Pipeline starting");

    let config = PipelineConfig::from_env();
    let stores = Stores::in_memory();
    for budget in demo_budgets() {
        stores.budgets.create(budget).await?;
    }

    let pipeline = CommandPipeline::with_stores(&stores, config).await;
    let actor = "Admin User";

    // Scenario 1: invoice issuance auto-approves and executes immediately.
    println!("\n=== COMMAND: Create invoice for Ravi ₹2.4L ===");
    let outcome = pipeline
        .submit_command("Create invoice for Ravi ₹2.4L", actor)
        .await?;
    println!("{}", outcome.reply);
    let plan = outcome.plan.ok_or("invoice command built no plan")?;
    for step in &plan.steps {
        println!(
            "  [{}] {} -> {} ({}%)",
            step.agent, step.task, step.decision, step.confidence
        );
    }
    let result = pipeline.execute_plan(plan.plan_id, actor).await?;
    println!("executed: {}", result.summary);

    // Scenario 2: a ₹5L payout needs the CFO before it can run.
    println!("\n=== COMMAND: Pay farmers ₹5L ===");
    let outcome = pipeline.submit_command("Pay farmers ₹5L", actor).await?;
    println!("{}", outcome.reply);
    let plan = outcome.plan.ok_or("payment command built no plan")?;
    let approval = outcome.approval.ok_or("₹5L outflow should need approval")?;
    println!(
        "approval pending: {} (approver: {})",
        approval.description, approval.approver
    );

    match pipeline.execute_plan(plan.plan_id, actor).await {
        Err(e) => println!("execution blocked as expected: {}", e),
        Ok(_) => println!("unexpected execution before approval"),
    }

    let decided = pipeline
        .decide_approval(approval.approval_id, ApprovalDecision::Approved, actor)
        .await?;
    println!("approval decided: {}", decided.status);

    let result = pipeline.execute_plan(plan.plan_id, actor).await?;
    println!("executed: {}", result.summary);

    // Scenario 3: non-monetary budget freeze.
    println!("\n=== COMMAND: Freeze transport budget ===");
    let outcome = pipeline
        .submit_command("Freeze transport budget", actor)
        .await?;
    let plan = outcome.plan.ok_or("freeze command built no plan")?;
    let result = pipeline.execute_plan(plan.plan_id, actor).await?;
    println!("executed: {}", result.summary);

    // The trail that makes it all replayable.
    println!("\n=== AUDIT TRAIL ===");
    for entry in pipeline.query_audit(&AuditFilter::default()).await {
        println!(
            "  #{} [{}] {} — {} ({}) :: {}",
            entry.seq,
            entry.timestamp.format("%H:%M:%S"),
            entry.actor,
            entry.action,
            entry.entity,
            entry.reason
        );
    }

    Ok(())
}
