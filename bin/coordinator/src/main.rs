mod config;
mod flows;
mod provisioning;

use chrono::Utc;
use config::CoordinatorConfig;
use flowctl_approval::{ApprovalCoordinator, ApprovalGateAdapter, FlowActionPolicyResolver, PgApprovalStore};
use flowctl_authz::{GroupMembership, InMemoryGroupMembership};
use flowctl_flow::{FlowCache, FlowExecutionHandler, LogStreamManager, PgExecutionLogStore};
use flowctl_notify::{NotificationHandler, WebhookMessenger};
use flowctl_queue::job::{JobStore, PayloadType};
use flowctl_queue::{HandlerRegistry, PgJobStore, QueueConfig, Scheduler};
use flowctl_transport::{DefaultDriverFactory, DefaultExecutorFactory};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn flow_execution_payload_type() -> PayloadType {
    PayloadType::new("flow_execution")
}

fn notification_payload_type() -> PayloadType {
    PayloadType::new("notification")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoordinatorConfig::from_env().expect("failed to load configuration");
    tracing::info!("loaded coordinator configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let (node_resolver, credential_vault) = provisioning::provision(&config.nodes)
        .await
        .expect("failed to provision node inventory");
    let node_resolver = Arc::new(node_resolver);
    let driver_factory = Arc::new(DefaultDriverFactory::new(
        Arc::new(credential_vault),
        std::env::temp_dir(),
    ));
    let executor_factory = Arc::new(DefaultExecutorFactory);

    let group_membership = Arc::new(InMemoryGroupMembership::new());
    for (group_name, members) in &config.groups {
        for member in members {
            group_membership.add_member(group_name, member).await;
        }
    }

    let execution_log_store: Arc<dyn flowctl_flow::ExecutionLogStore> =
        Arc::new(PgExecutionLogStore::new(db_pool.clone()));
    let log_stream = Arc::new(LogStreamManager::new());
    let flow_cache = Arc::new(FlowCache::new());

    let approval_store = Arc::new(PgApprovalStore::new(db_pool.clone()));
    let group_membership_dyn: Arc<dyn GroupMembership> = group_membership.clone();
    let approval_coordinator = Arc::new(ApprovalCoordinator::new(approval_store, group_membership_dyn.clone()));
    let policy_resolver = Arc::new(FlowActionPolicyResolver::new(flow_cache.clone()));
    let approval_gate = Arc::new(ApprovalGateAdapter::new(approval_coordinator, policy_resolver));

    let flow_handler = FlowExecutionHandler {
        execution_log_store,
        log_stream,
        approval_gate,
        node_resolver,
        driver_factory,
        executor_factory,
        flow_cache,
        artifact_root: config.artifact_root.clone(),
        job_timeout: StdDuration::from_secs(config.job_timeout_secs),
    };

    let messenger = Arc::new(WebhookMessenger::new(config.webhooks.clone()));
    let notification_handler = NotificationHandler::new(messenger, group_membership_dyn);

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Box::new(flow_handler));
    registry.register(Box::new(notification_handler));

    let job_store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.clone()));
    match job_store.initialize().await {
        Ok(reclaimed) if reclaimed > 0 => {
            tracing::info!(reclaimed, "reclaimed expired job leases on startup");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "failed to reclaim expired job leases on startup"),
    }

    let mut weights = HashMap::new();
    weights.insert(flow_execution_payload_type(), config.queue.flow_execution_weight);
    weights.insert(notification_payload_type(), config.queue.notification_weight);
    let queue_config = QueueConfig::new(weights, config.queue.worker_budget);

    let scheduler = Arc::new(
        Scheduler::new(job_store, registry, queue_config.clone())
            .expect("scheduler weights must sum to 100"),
    );

    let initial_flows = flows::load_flows(&config.flows.directory)
        .await
        .expect("failed to read flows directory");
    tracing::info!(count = initial_flows.len(), "loaded flow definitions");
    scheduler.set_cron_cache(flows::cron_entries(&initial_flows, &config.flows.directory));

    let mut tasks = Vec::new();

    for payload_type in [flow_execution_payload_type(), notification_payload_type()] {
        let scheduler = scheduler.clone();
        let period = queue_config.task_loop_period;
        let worker_id = format!("{payload_type}-worker");
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                scheduler.run_task_loop_tick(&payload_type, &worker_id).await;
            }
        }));
    }

    {
        let scheduler = scheduler.clone();
        let period = queue_config.periodic_loop_period;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                scheduler.run_periodic_loop_tick(Utc::now()).await;
            }
        }));
    }

    {
        let scheduler = scheduler.clone();
        let period = queue_config.cron_sync_period;
        let directory = config.flows.directory.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match flows::load_flows(&directory).await {
                    Ok(flows) => scheduler.set_cron_cache(flows::cron_entries(&flows, &directory)),
                    Err(e) => tracing::warn!(error = %e, "failed to reload flows directory"),
                }
            }
        }));
    }

    tracing::info!("coordinator running");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    tracing::info!("shutting down");
    for task in tasks {
        task.abort();
    }
}
