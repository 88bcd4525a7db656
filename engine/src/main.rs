//! Studio Credits server
//!
//! Runs the engine with its background sweeps until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Seed a demo class and customer, export Prometheus metrics
//! METRICS_ADDR=0.0.0.0:9090 cargo run --bin studio-credits -- --demo
//!
//! # Persist state across restarts
//! STATE_FILE=./credits.json cargo run --bin studio-credits
//! ```

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use studio_credits::catalog::{ClassInstance, ClassStatus};
use studio_credits::discount::{DiscountCondition, DiscountRule, DiscountValue, RuleScope};
use studio_credits::notify::LogNotifier;
use studio_credits::{
    BusinessId, ClassInstanceId, ClassTemplateId, Config, CreditsEnvironment, Engine, Money,
    UserProfile, VenueId,
};
use studio_credits_core::environment::SystemClock;
use studio_credits_runtime::metrics::MetricsServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    tracing::info!(policy = ?config.policy, jobs = ?config.jobs, "Configuration loaded");

    let mut metrics_server = None;
    if let Some(addr) = &config.server.metrics_addr {
        let mut server = MetricsServer::new(addr.parse()?);
        server.start()?;
        studio_credits::metrics::describe();
        tracing::info!(%addr, "Metrics exporter listening");
        metrics_server = Some(server);
    }

    let env = CreditsEnvironment::new(Arc::new(SystemClock), Arc::new(LogNotifier))
        .with_policy(config.policy)
        .with_delivery(config.delivery);

    let engine = match &config.server.state_file {
        Some(path) if tokio::fs::try_exists(path).await? => {
            let json = tokio::fs::read_to_string(path).await?;
            let engine = Engine::from_snapshot_json(&json, env)?;
            tracing::info!(%path, "State restored");
            engine
        },
        _ => Engine::new(env),
    };

    if std::env::args().any(|arg| arg == "--demo") {
        seed_demo(&engine).await?;
    }

    let jobs = studio_credits::jobs::spawn_background_jobs(&engine, &config.jobs);
    tracing::info!("Studio credits engine running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully...");

    jobs.stop().await;
    if let Err(error) = engine
        .shutdown(Duration::from_secs(config.server.shutdown_timeout))
        .await
    {
        tracing::warn!(%error, "Effects still running at shutdown");
    }

    if let Some(path) = &config.server.state_file {
        tokio::fs::write(path, engine.snapshot_json().await?).await?;
        tracing::info!(%path, "State saved");
    }

    drop(metrics_server);
    Ok(())
}

/// One business, one discounted class tomorrow, one customer with credits.
async fn seed_demo(engine: &Engine) -> studio_credits::Result<()> {
    let now = engine.environment().now();
    let business_id = BusinessId::new();
    let owner = UserProfile::new("Studio Owner", "owner@example.com");
    let customer = UserProfile::new("Demo Customer", "customer@example.com");
    let start = now + ChronoDuration::hours(26);

    let instance = ClassInstance {
        id: ClassInstanceId::new(),
        business_id,
        venue_id: VenueId::new(),
        template_id: ClassTemplateId::new(),
        name: "Morning Flow".to_string(),
        venue_name: "Riverside Studio".to_string(),
        start_time: start,
        end_time: start + ChronoDuration::hours(1),
        capacity: 12,
        booked_count: 0,
        price: Money::from_dollars(20),
        cancellation_window_hours: 24,
        requires_confirmation: false,
        status: ClassStatus::Scheduled,
        deleted: false,
        discount_rules: vec![DiscountRule::new(
            "Book a day ahead",
            RuleScope::Instance,
            DiscountCondition::HoursBeforeMin { hours: 24 },
            DiscountValue::FixedAmount {
                value_in_cents: 500,
            },
            owner.id,
            now,
        )],
        template_discount_rules: Vec::new(),
        cancelled_at: None,
        completed_at: None,
    };
    let class_instance_id = instance.id;

    engine.register_user(owner).await?;
    engine.register_user(customer.clone()).await?;
    engine.upsert_class_instance(instance).await?;
    engine
        .gift_credits(customer.id, 100, Some("Welcome credits".to_string()))
        .await?;
    let receipt = engine.book_class(customer.id, class_instance_id, None).await?;
    engine.rebuild_discount_summary().await?;

    tracing::info!(
        booking_id = %receipt.booking_id,
        credits = receipt.credits_used,
        "Demo data seeded"
    );
    Ok(())
}
