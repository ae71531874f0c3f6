// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Casework server
//!
//! Wires repositories, the document store, the CHIEF gateway, the mailer and
//! the job runner from configuration, then serves the HTTP API until Ctrl+C
//! or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{info, warn};

use icms_core::application::chief::ChiefGateway;
use icms_core::application::context::{CaseContext, CaseSettings};
use icms_core::application::jobs::{JobQueue, JobRunner, RetryPolicy};
use icms_core::application::notifications::Mailer;
use icms_core::application::IcmsServices;
use icms_core::domain::config::{resolve_secret, EmailBackend, IcmsConfigManifest};
use icms_core::domain::repository::{ProcessRepository, ReferenceSequence, UserRepository};
use icms_core::infrastructure::db::Database;
use icms_core::infrastructure::event_bus::EventBus;
use icms_core::infrastructure::hawk::{HawkAuthenticator, HawkCredentials};
use icms_core::infrastructure::repositories::{
    InMemoryProcessRepository, InMemoryReferenceSequence, InMemoryUserRepository, PostgresProcessRepository,
    PostgresReferenceSequence, PostgresUserRepository,
};
use icms_core::infrastructure::{
    ChiefClient, DisabledChiefGateway, JsonDocumentGenerator, LocalDocumentStore, LogMailer, NotifyMailer,
};
use icms_core::presentation::{app, AppState};

struct Repositories {
    processes: Arc<dyn ProcessRepository>,
    users: Arc<dyn UserRepository>,
    sequences: Arc<dyn ReferenceSequence>,
}

pub async fn start_server(config: IcmsConfigManifest) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    let spec = &config.spec;

    info!("Starting ICMS casework server ({})", config.metadata.name);

    if let Some(port) = spec.observability.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exposed on port {}", port);
    }

    let repositories = build_repositories(&config).await?;

    for organisation in &spec.bootstrap.organisations {
        repositories
            .users
            .save_organisation(organisation)
            .await
            .with_context(|| format!("Failed to seed organisation {}", organisation.name))?;
    }
    for user in &spec.bootstrap.users {
        repositories
            .users
            .save(user)
            .await
            .with_context(|| format!("Failed to seed user {}", user.email))?;
    }
    if !spec.bootstrap.users.is_empty() || !spec.bootstrap.organisations.is_empty() {
        info!(
            "Seeded {} organisations and {} users",
            spec.bootstrap.organisations.len(),
            spec.bootstrap.users.len()
        );
    }

    let (jobs, receiver) = JobQueue::new();
    let ctx = CaseContext {
        processes: repositories.processes,
        users: repositories.users,
        sequences: repositories.sequences,
        jobs,
        event_bus: EventBus::default(),
        settings: CaseSettings {
            allow_bypass_chief: spec.features.allow_bypass_chief,
            send_licence_to_chief: spec.chief.send_licence_to_chief,
        },
    };
    if spec.features.allow_bypass_chief {
        warn!("CHIEF bypass is enabled; never run this configuration in production");
    }

    let store = LocalDocumentStore::new(&spec.documents.storage_path)
        .with_context(|| format!("Failed to open document store at {:?}", spec.documents.storage_path))?;
    let generator = Arc::new(JsonDocumentGenerator::new(store));

    let hawk_credentials = HawkCredentials {
        id: spec.hawk.auth_id.clone(),
        key: resolve_secret(&spec.hawk.auth_key)?,
    };

    let gateway: Arc<dyn ChiefGateway> = match &spec.chief.base_url {
        Some(base_url) => {
            let client = ChiefClient::new(
                base_url,
                &spec.chief.update_licence_endpoint,
                hawk_credentials.clone(),
                Duration::from_secs(spec.chief.timeout_seconds),
            )
            .context("Failed to create ICMS-HMRC client")?;
            info!("Licence data will be sent to {}", client.endpoint());
            Arc::new(client)
        }
        None => {
            info!("ICMS-HMRC URL not configured; licences stay on CHIEF_WAIT");
            Arc::new(DisabledChiefGateway)
        }
    };

    let services = IcmsServices::new(ctx, generator, gateway);

    let mailer: Arc<dyn Mailer> = match spec.email.backend {
        EmailBackend::Log => Arc::new(LogMailer::new(spec.email.from.clone())),
        EmailBackend::Notify => {
            let api_key = spec
                .email
                .notify_api_key
                .as_deref()
                .context("spec.email.notify_api_key is required for the notify backend")?;
            let template_id = spec
                .email
                .notify_template_id
                .clone()
                .context("spec.email.notify_template_id is required for the notify backend")?;
            Arc::new(
                NotifyMailer::new(spec.email.notify_base_url.clone(), &resolve_secret(api_key)?, template_id)
                    .context("Failed to create GOV.UK Notify client")?,
            )
        }
    };

    let runner = JobRunner::new(
        services.job_handler(mailer),
        RetryPolicy {
            max_attempts: spec.email.max_attempts,
            delay: Duration::from_millis(spec.email.retry_delay_ms),
        },
    );
    tokio::spawn(async move {
        runner.run(receiver).await;
    });
    info!("Background job runner started");

    let router = app(AppState {
        services,
        hawk: HawkAuthenticator::new(hawk_credentials, spec.hawk.timestamp_skew_seconds),
    });

    let addr = format!("{}:{}", spec.server.bind_address, spec.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("ICMS casework server stopped");
    Ok(())
}

async fn build_repositories(config: &IcmsConfigManifest) -> Result<Repositories> {
    match &config.spec.database {
        Some(database) => {
            let url = resolve_secret(&database.url)?;
            let db = Database::new(&url, database.max_connections).await?;
            let pool = db.get_pool().clone();
            info!("Using PostgreSQL repositories");
            Ok(Repositories {
                processes: Arc::new(PostgresProcessRepository::new(pool.clone())),
                users: Arc::new(PostgresUserRepository::new(pool.clone())),
                sequences: Arc::new(PostgresReferenceSequence::new(pool)),
            })
        }
        None => {
            warn!("No database configured; using in-memory repositories (state is lost on restart)");
            Ok(Repositories {
                processes: Arc::new(InMemoryProcessRepository::new()),
                users: Arc::new(InMemoryUserRepository::new()),
                sequences: Arc::new(InMemoryReferenceSequence::new()),
            })
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
