use std::sync::Arc;
use std::sync::atomic::Ordering;

use support_triage::api::{self, AppState};
use support_triage::channels::{
    ChatHub, ChatReplySender, EmailConfig, ReplyRouter, SmtpReplySender,
};
use support_triage::config::AppConfig;
use support_triage::error::PipelineError;
use support_triage::llm::create_provider;
use support_triage::pipeline::{EventHub, MessageProcessor, RulesEngine, spawn_pending_processor};
use support_triage::store::{Database, LibSqlBackend};
use support_triage::triage::TriageEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📬 Support Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   API: http://0.0.0.0:{}/api/triage", config.port);
    eprintln!("   Dashboard WS: ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Chat WS: ws://0.0.0.0:{}/ws/chat", config.port);

    let llm = create_provider(&config.llm)?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Rules ────────────────────────────────────────────────────────────
    let mut rules = RulesEngine::default_rules();
    for pattern in &config.escalate_patterns {
        rules
            .add_escalate_pattern(pattern)
            .map_err(|e| PipelineError::Rules(format!("{pattern}: {e}")))?;
    }

    // ── Channels ─────────────────────────────────────────────────────────
    let chat = ChatHub::new();
    let mut replies = ReplyRouter::new().with(Arc::new(ChatReplySender::new(Arc::clone(&chat))));
    match EmailConfig::from_env() {
        Some(email_config) => {
            eprintln!(
                "   Email replies: enabled (SMTP: {}:{})",
                email_config.smtp_host, email_config.smtp_port
            );
            replies.register(Arc::new(SmtpReplySender::new(email_config)));
        }
        None => eprintln!("   Email replies: disabled (SMTP_HOST not set)"),
    }
    eprintln!(
        "   Auto-reply: {}\n",
        if config.auto_reply { "on" } else { "off" }
    );

    // ── Pipeline ─────────────────────────────────────────────────────────
    let triage = Arc::new(TriageEngine::new(llm, config.triage.clone()));
    let processor = Arc::new(
        MessageProcessor::new(
            Arc::clone(&db),
            Arc::clone(&triage),
            rules,
            replies,
            EventHub::new(),
        )
        .with_auto_reply(config.auto_reply),
    );

    let (pending_handle, pending_shutdown) = spawn_pending_processor(
        Arc::clone(&db),
        Arc::clone(&processor),
        config.pending_interval,
    );

    // ── Server ───────────────────────────────────────────────────────────
    let app = api::router(
        AppState {
            db,
            triage,
            processor,
        },
        chat,
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "Support triage server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    pending_shutdown.store(true, Ordering::Relaxed);
    pending_handle.abort();

    Ok(())
}
