//! Logs in (or resumes a stored session), keeps the realtime channel up and
//! prints incoming chat messages until Ctrl-C.
//!
//! ```text
//! LIFELINE_BASE_URL=http://127.0.0.1:8000 \
//! LIFELINE_SOCKET_URL=ws://127.0.0.1:8000/socket \
//! LIFELINE_EMAIL=ana@example.com LIFELINE_PASSWORD=secret \
//! cargo run -p console-client
//! ```

use std::env;
use std::path::PathBuf;

use lifeline::prelude::*;

fn var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = env::var("LIFELINE_STORE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("lifeline-console.json"));

    let facade = SessionFacade::builder()
        .base_url(var("LIFELINE_BASE_URL", "http://127.0.0.1:8000"))
        .realtime_endpoint(var("LIFELINE_SOCKET_URL", "ws://127.0.0.1:8000/socket"))
        .file_store(&store)
        .build()?;

    let _messages = facade.on(EventKind::NewMessage, |event| {
        if let ServerEvent::NewMessage(message) = event {
            println!("{message:?}");
        }
    });

    let mut connection = facade.connection_events();
    tokio::spawn(async move {
        while let Ok(event) = connection.recv().await {
            tracing::info!(?event, "channel");
        }
    });

    let mut notices = facade.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            eprintln!("! {notice}");
        }
    });

    let session = match facade.restore().await? {
        Some(session) => session,
        None => {
            let email = env::var("LIFELINE_EMAIL")?;
            let password = env::var("LIFELINE_PASSWORD")?;
            let outcome = facade.login(email, password).await?;
            for warning in &outcome.warnings {
                tracing::warn!(?warning, "login warning");
            }
            outcome.session
        }
    };
    tracing::info!(user_id = %session.id, name = %session.display_name, store = %store.display(), "signed in");

    match facade
        .send_json::<serde_json::Value>(ApiRequest::get("/api/users/me"))
        .await
    {
        Ok(profile) => println!("{profile:#}"),
        Err(e) if e.is_session_terminal() => {
            eprintln!("session ended: {e}");
            return Ok(());
        }
        Err(e) => eprintln!("profile request failed: {e}"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    if let Err(e) = facade.flush_store().await {
        tracing::warn!(error = %e, "credential store not flushed");
    }
    Ok(())
}
