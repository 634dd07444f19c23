use agentic_rpa::{AgentError, AgentEvent, Command, Envelope, Reply};
use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

/// Port range probed after the configured one is taken.
const PORT_ATTEMPTS: u16 = 10;
/// Events buffered per console subscriber before it starts missing some.
const EVENT_BUFFER: usize = 1024;

/// SSE event name and JSON data for one broadcast item. A subscriber that
/// fell behind gets a `lagged` event with the skip count.
fn sse_frame(result: Result<AgentEvent, BroadcastStreamRecvError>) -> (&'static str, String) {
    match result {
        Ok(event) => (
            event.channel(),
            serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string()),
        ),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "console subscriber lagged, events dropped");
            ("lagged", json!({ "skipped": skipped }).to_string())
        }
    }
}

fn command_response(reply: Reply) -> (StatusCode, Json<Value>) {
    match reply {
        Ok(Some(run_id)) => (StatusCode::ACCEPTED, Json(json!({ "runId": run_id }))),
        Ok(None) => (StatusCode::ACCEPTED, Json(json!({ "ok": true }))),
        Err(e) => {
            let status = match e {
                AgentError::UnknownStep(_) => StatusCode::BAD_REQUEST,
                AgentError::RunActive(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": e.to_string() })))
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<Envelope>,
    pub event_tx: broadcast::Sender<AgentEvent>,
}

/// Channels shared between the web console and the worker.
pub struct Console {
    pub commands: mpsc::Receiver<Envelope>,
    pub events: broadcast::Sender<AgentEvent>,
    pub port: u16,
}

/// Serve the console on the first free port starting at `port`.
pub async fn start_server(port: u16) -> Result<Console> {
    let (cmd_tx, commands) = mpsc::channel::<Envelope>(16);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(EVENT_BUFFER);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                bound = Some((l, p));
                break;
            }
            Err(e) => debug!(port = p, error = %e, "port unavailable"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "Could not bind to any port {}-{}. Stop the old agent first.",
            port,
            port.saturating_add(PORT_ATTEMPTS - 1)
        )
    })?;

    info!("web console running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "web console stopped");
        }
    });

    Ok(Console {
        commands,
        events: event_tx,
        port,
    })
}

async fn index_handler() -> Html<&'static str> {
    debug!("GET /");
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> (StatusCode, Json<Value>) {
    debug!(?command, "POST /command");
    let unavailable = || {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "worker is not running" })),
        )
    };
    let (reply, answer) = oneshot::channel();
    let envelope = Envelope {
        command,
        reply: Some(reply),
    };
    if state.cmd_tx.send(envelope).await.is_err() {
        return unavailable();
    }
    match answer.await {
        Ok(reply) => command_response(reply),
        Err(_) => unavailable(),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).map(|result| {
        let (name, data) = sse_frame(result);
        Ok::<_, Infallible>(Event::default().event(name).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>RPA Console</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  header .dot.paused { background: #f59e0b; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 900px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 12px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry {
    padding: 8px 12px;
    border-radius: 6px;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
    background: #111118;
    border-left: 3px solid #3b82f6;
    white-space: pre-wrap;
  }
  .entry.error { background: #1a0a0a; border-left-color: #ef4444; color: #fca5a5; }
  .entry.pause { background: #1a150a; border-left-color: #f59e0b; color: #fcd34d; }
  textarea {
    width: 100%;
    min-height: 110px;
    background: #111118;
    color: #e0e0e0;
    border: 1px solid #2a2a3e;
    border-radius: 8px;
    padding: 12px;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
  }
  .buttons { display: flex; gap: 8px; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 6px;
    padding: 8px 18px;
    font-size: 14px;
    cursor: pointer;
  }
  button.secondary { background: #2a2a3e; }
</style>
</head>
<body>
<header><div class="dot" id="dot"></div><h1>RPA Console</h1></header>
<div class="main">
  <div id="log"></div>
  <textarea id="task" placeholder='open https://example.com -> waitFor text="Example Domain" -> getText h1'></textarea>
  <div class="buttons">
    <button id="run">Run</button>
    <button class="secondary" id="resume">Resume</button>
    <button class="secondary" id="takeOver">Take over</button>
    <button class="secondary" id="stop">Stop</button>
  </div>
</div>
<script>
  const log = document.getElementById('log');
  const dot = document.getElementById('dot');
  const add = (cls, text) => {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  };
  const send = (body) => fetch('/command', {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify(body),
  }).then(r => r.json()).then(res => {
    if (res.error) add('error', res.error);
    else if (res.runId) add('', 'Started run ' + res.runId);
  });
  document.getElementById('run').onclick = () => {
    const task = document.getElementById('task').value.trim();
    if (task) send({ type: 'run', task });
  };
  document.getElementById('resume').onclick = () => { dot.classList.remove('paused'); send({ type: 'resume' }); };
  document.getElementById('takeOver').onclick = () => send({ type: 'takeOver' });
  document.getElementById('stop').onclick = () => send({ type: 'stop' });

  const es = new EventSource('/events');
  es.addEventListener('log', e => {
    const ev = JSON.parse(e.data);
    const p = ev.payload || {};
    const text = p.message || ((p.ok ? 'ok  ' : 'ERR ') + JSON.stringify(p.step)
      + (p.detail ? '  ' + p.detail : '') + (p.error ? '  ' + p.error : ''));
    add(ev.level === 'error' ? 'error' : '', text);
  });
  es.addEventListener('lagged', e => {
    add('error', 'Console fell behind, ' + JSON.parse(e.data).skipped + ' events skipped');
  });
  es.addEventListener('humanPause', e => {
    const ev = JSON.parse(e.data);
    dot.classList.add('paused');
    add('pause', 'Waiting for you: ' + ev.reason + ' (press Resume when done)');
  });
</script>
</body>
</html>
"##;
