use axum::http::HeaderMap;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

mod api;
mod app_state;
mod companion;
mod config;
mod openapi;
mod responses;
mod router;
mod telemetry;

pub(crate) use app_state::AppState;

use companion::{CompanionSupervisor, SupervisorError};
use gate_store::Store;

#[tokio::main]
async fn main() {
    match openapi::ensure_openapi_export() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: failed to write generated OPENAPI_OUT: {err}");
            std::process::exit(2);
        }
    }

    telemetry::init();

    let cfg = match config::Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let code = run(cfg).await;
    std::process::exit(code);
}

/// Startup sequence: store first, then the listener, then the companion.
/// Any fatal step prints a diagnostic and yields a non-zero exit without
/// starting later steps.
async fn run(cfg: config::Config) -> i32 {
    let store = match Store::open(&cfg.state_dir) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("error: {err}");
            return 2;
        }
    };
    match store.seed_default_async(&cfg.default_account).await {
        Ok(true) => info!(username = %cfg.default_account.username, "default account seeded"),
        Ok(false) => debug!("credential store already populated"),
        Err(err) => {
            eprintln!("error: {err}");
            return 2;
        }
    }

    let supervisor = match cfg.companion.clone() {
        Some(spec) => match CompanionSupervisor::new(spec) {
            Ok(sup) => Some(sup),
            Err(err) => {
                eprintln!("error: {err}");
                return 2;
            }
        },
        None => {
            warn!("GATE_COMPANION_CMD unset; companion supervision disabled");
            None
        }
    };

    let state = AppState::new(store, supervisor.clone(), cfg.admin_token.clone());
    let app = router::build_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: failed to bind {}: {err}", cfg.addr);
            return 2;
        }
    };
    info!(addr = %cfg.addr, "verification listener bound");

    let shutdown = tokio_util::sync::CancellationToken::new();

    // The listener is already accepting; readiness of the companion is
    // confirmed concurrently so the two processes never wait on each other.
    let companion_task = supervisor.clone().map(|sup| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match sup.run().await {
                Ok(()) => {
                    info!(target: "gate::companion", "dependent confirmed ready");
                    true
                }
                Err(SupervisorError::Cancelled) => true,
                Err(err) => {
                    error!(
                        target: "gate::companion",
                        error = %err,
                        "companion supervision failed; aborting"
                    );
                    shutdown.cancel();
                    false
                }
            }
        })
    });

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
    });

    shutdown.cancelled().await;
    info!("shutdown requested; draining in-flight requests");
    match tokio::time::timeout(cfg.http_drain, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!("http server exited with error: {err}"),
        Ok(Err(err)) => error!("http server task failed: {err}"),
        Err(_) => warn!(
            drain_ms = cfg.http_drain.as_millis() as u64,
            "drain window elapsed; abandoning in-flight requests"
        ),
    }

    if let Some(sup) = supervisor.as_ref() {
        sup.shutdown().await;
    }
    let mut code = 0;
    if let Some(task) = companion_task {
        match task.await {
            Ok(true) => {}
            Ok(false) => code = 1,
            Err(err) => {
                error!("companion task failed: {err}");
                code = 1;
            }
        }
    }
    code
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

/// Admin-token gate for the account-creation surface. The token comes from
/// configuration; absent token means the surface stays closed.
pub(crate) fn admin_ok(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_token() else {
        return false;
    };
    let mut presented: Option<&str> = None;
    if let Some(hv) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(bearer) = hv.strip_prefix("Bearer ") {
            presented = Some(bearer);
        }
    }
    if presented.is_none() {
        presented = headers.get("X-Gate-Admin").and_then(|h| h.to_str().ok());
    }
    let Some(presented) = presented else {
        return false;
    };
    ct_eq(expected.as_bytes(), presented.as_bytes())
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}
