// =============================================================================
// server.rs — THE FRONT DESK
// =============================================================================
//
// A tiny HTTP server, hand-rolled on raw TCP, because the control surface
// is four routes and a framework would outweigh the rest of the binary.
// This is the Rust equivalent of mounting a turret on a skateboard, and
// we are at peace with that.
//
// Routes:
//   GET  /health              → liveness, nothing more
//   GET  /progresso-busca     → progress snapshot (?run_id=, else latest)
//   POST /run-real            → quick run over the last N gazette days
//   POST /busca-personalizada → custom range + custom terms
//
// Runs execute inside the request: the caller POSTs, the engine marches
// through the whole date range (or surrenders to the bouncer), records
// get delivered, and the response carries the final stats. Anyone who
// wants a progress bar in the meantime polls /progresso-busca from
// another connection — that's what the registry is for.
// =============================================================================

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::RunStats;
use crate::orchestrator::{self, Orchestrator};
use crate::patterns::TermMatcher;
use crate::progress::ProgressRegistry;
use crate::publisher::ApiPublisher;
use crate::session::RetrievalSession;
use crate::webdriver::WebDriverPage;

/// Cap on how much request we are willing to read. Nobody's date range
/// needs more than a few hundred bytes.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Quick-run body: how many days back from today.
#[derive(Debug, Deserialize)]
struct RunRealBody {
    #[serde(rename = "daysBack")]
    days_back: Option<i64>,
}

/// Custom-run body: explicit terms and an explicit date range.
#[derive(Debug, Deserialize)]
struct CustomBody {
    termos: Option<Vec<String>>,
    data_inicio: Option<String>,
    data_fim: Option<String>,
}

/// A parsed request, just enough of HTTP for our four routes.
#[derive(Debug, PartialEq, Eq)]
struct Request {
    method: String,
    path: String,
    query: String,
    body: String,
}

/// Run the control server until the shutdown signal flips.
pub async fn run(
    config: Arc<Config>,
    registry: Arc<ProgressRegistry>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "control server failed to bind");
            return;
        }
    };

    info!("📋 control server listening on http://{addr}");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let config = Arc::clone(&config);
                        let registry = Arc::clone(&registry);
                        // Runs take minutes; each connection gets its own task
                        // so the health check stays answerable throughout.
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, config, registry).await {
                                warn!(error = %e, "connection handling failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control server accept error");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("control server: shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    config: Arc<Config>,
    registry: Arc<ProgressRegistry>,
) -> std::io::Result<()> {
    let raw = read_request(&mut stream).await?;
    let Some(request) = parse_request(&raw) else {
        return respond(&mut stream, 400, &json!({ "error": "requisição malformada" })).await;
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            respond(
                &mut stream,
                200,
                &json!({ "status": "ok", "engine": "dje_gazette_engine" }),
            )
            .await
        }
        ("GET", "/progresso-busca") => {
            let run_id = query_param(&request.query, "run_id").and_then(|v| Uuid::parse_str(&v).ok());
            match registry.get(run_id) {
                Some(progress) => {
                    let snap = progress.snapshot();
                    respond(&mut stream, 200, &serde_json::to_value(&snap).unwrap_or_default())
                        .await
                }
                None => {
                    respond(&mut stream, 404, &json!({ "error": "nenhuma busca encontrada" }))
                        .await
                }
            }
        }
        ("POST", "/run-real") => {
            let body: RunRealBody = match serde_json::from_str(&request.body) {
                Ok(b) => b,
                Err(_) if request.body.trim().is_empty() => RunRealBody { days_back: None },
                Err(e) => {
                    return respond(&mut stream, 400, &json!({ "error": e.to_string() })).await;
                }
            };
            let days_back = body.days_back.unwrap_or(1);
            if days_back < 1 || days_back > config.max_days_back {
                return respond(
                    &mut stream,
                    400,
                    &json!({
                        "error": format!(
                            "daysBack deve estar entre 1 e {}",
                            config.max_days_back
                        )
                    }),
                )
                .await;
            }
            let dates = last_n_days(Utc::now().date_naive(), days_back);
            let terms = TermMatcher::from_csv_or_default(
                &config.search_terms_csv,
                &config.default_terms(),
            );
            let (run_id, stats) = execute_run(&config, &registry, &dates, terms).await;
            respond(&mut stream, 200, &run_response(run_id, &stats)).await
        }
        ("POST", "/busca-personalizada") => {
            let body: CustomBody = match serde_json::from_str(&request.body) {
                Ok(b) => b,
                Err(e) => {
                    return respond(&mut stream, 400, &json!({ "error": e.to_string() })).await;
                }
            };
            let (dates, terms) = match validate_custom(&body, config.max_range_days) {
                Ok(v) => v,
                Err(message) => {
                    return respond(&mut stream, 400, &json!({ "error": message })).await;
                }
            };
            let matcher = TermMatcher::new(terms);
            let (run_id, stats) = execute_run(&config, &registry, &dates, matcher).await;
            respond(&mut stream, 200, &run_response(run_id, &stats)).await
        }
        _ => respond(&mut stream, 404, &json!({ "error": "rota desconhecida" })).await,
    }
}

/// How much of the inter-run cooldown is still owed, given when the
/// previous run finished.
fn cooldown_remaining(last_finished: Option<Instant>, cooldown: Duration) -> Duration {
    match last_finished {
        Some(last) => cooldown.saturating_sub(last.elapsed()),
        None => Duration::ZERO,
    }
}

/// One full run: session, orchestration, delivery. Never fails — the
/// worst case is a fully synthetic outcome with an outage reason.
///
/// The registry's run gate is held from before the cooldown until after
/// delivery: runs execute one at a time against the source, and each
/// waits out the remainder of the cooldown since the previous run
/// finished before its browser session opens.
async fn execute_run(
    config: &Config,
    registry: &ProgressRegistry,
    dates: &[NaiveDate],
    terms: TermMatcher,
) -> (Uuid, RunStats) {
    let mut gate = registry.run_gate().lock().await;
    let wait = cooldown_remaining(*gate, config.run_cooldown);
    if !wait.is_zero() {
        info!(wait_secs = wait.as_secs(), "cooling down before the next run");
        tokio::time::sleep(wait).await;
    }

    let (run_id, progress) = registry.create_run();
    let periodo = format!(
        "{} a {}",
        dates.first().map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_default(),
        dates.last().map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_default(),
    );
    progress.begin(
        dates.len() as u64,
        periodo,
        terms.terms().to_vec(),
    );
    info!(run_id = %run_id, dates = dates.len(), "run accepted");

    let mut outcome =
        match WebDriverPage::open(&config.webdriver_url, &config.gazette_base_url).await {
            Ok(page) => {
                let mut session = RetrievalSession::new(page);
                let orchestrator = Orchestrator::new(config.retry_policy(), Arc::clone(&progress));
                let outcome = orchestrator.run(&mut session, dates, &terms).await;
                session.into_page().close().await;
                outcome
            }
            Err(fault) => {
                orchestrator::full_fallback_run(dates, &terms, &progress, &fault.to_string())
            }
        };

    let http = reqwest::Client::new();
    let publisher = ApiPublisher::new(http, &config.api_url);
    let delivery = publisher.publish_all(&outcome.records).await;
    outcome.stats.total_enviadas = delivery.delivered;
    outcome.stats.total_erros = delivery.failed;

    info!(
        run_id = %run_id,
        encontradas = outcome.stats.total_encontradas,
        enviadas = outcome.stats.total_enviadas,
        erros = outcome.stats.total_erros,
        "run finished"
    );
    *gate = Some(Instant::now());
    (run_id, outcome.stats)
}

fn run_response(run_id: Uuid, stats: &RunStats) -> serde_json::Value {
    let mut value = serde_json::to_value(stats).unwrap_or_default();
    if let Some(map) = value.as_object_mut() {
        map.insert("runId".to_string(), json!(run_id.to_string()));
    }
    value
}

/// The last `n` gazette days ending today, oldest first.
fn last_n_days(today: NaiveDate, n: i64) -> Vec<NaiveDate> {
    (0..n)
        .map(|i| today - ChronoDuration::days(n - 1 - i))
        .collect()
}

/// Either date format our callers actually use: the Brazilian one and
/// the ISO one. Everything else is a 400.
fn parse_date_flexible(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d"))
        .ok()
}

/// Validate the custom-run body: terms present, both dates present and
/// parseable, start before end, range within bounds. Returns the
/// expanded date list (oldest first) and the cleaned terms.
fn validate_custom(
    body: &CustomBody,
    max_range_days: i64,
) -> Result<(Vec<NaiveDate>, Vec<String>), String> {
    let terms: Vec<String> = body
        .termos
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return Err("termos é obrigatório".to_string());
    }

    let start = body
        .data_inicio
        .as_deref()
        .and_then(parse_date_flexible)
        .ok_or_else(|| "data_inicio inválida (use dd/mm/aaaa ou aaaa-mm-dd)".to_string())?;
    let end = body
        .data_fim
        .as_deref()
        .and_then(parse_date_flexible)
        .ok_or_else(|| "data_fim inválida (use dd/mm/aaaa ou aaaa-mm-dd)".to_string())?;

    if start > end {
        return Err("data_inicio deve ser anterior ou igual a data_fim".to_string());
    }
    let span = (end - start).num_days() + 1;
    if span > max_range_days {
        return Err(format!("período máximo é de {max_range_days} dias"));
    }

    let dates = (0..span).map(|i| start + ChronoDuration::days(i)).collect();
    Ok((dates, terms))
}

/// A client gets this long to deliver its whole request. A stalled
/// connection must not pin its task forever.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Read one HTTP request: headers up to the blank line, then exactly
/// Content-Length bytes of body. Deadline-bounded.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_unbounded(stream))
        .await
        .map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "request read timed out")
        })?
}

async fn read_request_unbounded(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }
        if let Some(header_end) = find_header_end(&buffer) {
            let headers = String::from_utf8_lossy(&buffer[..header_end]);
            let content_length = content_length(&headers);
            if buffer.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    memchr::memmem::find(buffer, b"\r\n\r\n")
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

/// Parse the request line + body out of the raw request text.
fn parse_request(raw: &str) -> Option<Request> {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.to_string(), String::new()),
    };
    Some(Request {
        method,
        path,
        query,
        body: body.to_string(),
    })
}

/// Pull one query parameter, percent-decoding not included — run ids
/// and our parameter names never need it.
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            Some(v.to_string())
        } else {
            None
        }
    })
}

async fn respond(
    stream: &mut TcpStream,
    status: u16,
    body: &serde_json::Value,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let json = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\n\r\n{}",
        json.len(),
        json,
    );
    stream.write_all(response.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line_and_query() {
        let raw = "GET /progresso-busca?run_id=abc HTTP/1.1\r\nHost: x\r\n\r\n";
        let request = parse_request(raw).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/progresso-busca");
        assert_eq!(query_param(&request.query, "run_id"), Some("abc".to_string()));
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_parse_request_with_body() {
        let raw = "POST /run-real HTTP/1.1\r\nContent-Length: 15\r\n\r\n{\"daysBack\": 3}";
        let request = parse_request(raw).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.body, "{\"daysBack\": 3}");
    }

    #[test]
    fn test_content_length_header_case_insensitive() {
        assert_eq!(content_length("POST / HTTP/1.1\r\ncontent-length: 42"), 42);
        assert_eq!(content_length("POST / HTTP/1.1\r\nHost: x"), 0);
    }

    #[test]
    fn test_last_n_days_oldest_first() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 19).unwrap();
        let dates = last_n_days(today, 3);
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2025, 3, 17).unwrap());
        assert_eq!(dates[2], today);
    }

    #[test]
    fn test_date_parsing_both_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        assert_eq!(parse_date_flexible("17/03/2025"), Some(expected));
        assert_eq!(parse_date_flexible("2025-03-17"), Some(expected));
        assert_eq!(parse_date_flexible("03/17/2025"), None);
    }

    fn custom_body(termos: &[&str], inicio: &str, fim: &str) -> CustomBody {
        CustomBody {
            termos: Some(termos.iter().map(|t| t.to_string()).collect()),
            data_inicio: Some(inicio.to_string()),
            data_fim: Some(fim.to_string()),
        }
    }

    #[test]
    fn test_custom_validation_happy_path() {
        let body = custom_body(&["RPV", "INSS"], "17/03/2025", "19/03/2025");
        let (dates, terms) = validate_custom(&body, 30).unwrap();
        assert_eq!(dates.len(), 3);
        assert_eq!(terms, ["RPV", "INSS"]);
    }

    #[test]
    fn test_custom_validation_rejects_missing_terms() {
        let mut body = custom_body(&[], "17/03/2025", "19/03/2025");
        assert!(validate_custom(&body, 30).is_err());
        body.termos = Some(vec!["  ".to_string()]);
        assert!(validate_custom(&body, 30).is_err());
    }

    #[test]
    fn test_custom_validation_rejects_inverted_range() {
        let body = custom_body(&["RPV"], "19/03/2025", "17/03/2025");
        let error = validate_custom(&body, 30).unwrap_err();
        assert!(error.contains("anterior"));
    }

    #[test]
    fn test_custom_validation_rejects_oversized_range() {
        let body = custom_body(&["RPV"], "01/01/2025", "15/02/2025");
        let error = validate_custom(&body, 30).unwrap_err();
        assert!(error.contains("30"));
    }

    #[test]
    fn test_custom_validation_range_bound_is_inclusive() {
        // Exactly 30 days is allowed.
        let body = custom_body(&["RPV"], "01/01/2025", "30/01/2025");
        let (dates, _) = validate_custom(&body, 30).unwrap();
        assert_eq!(dates.len(), 30);
    }

    #[test]
    fn test_cooldown_owed_after_a_fresh_run() {
        let cooldown = Duration::from_secs(30);
        // No previous run: go right in.
        assert_eq!(cooldown_remaining(None, cooldown), Duration::ZERO);
        // A run that just finished owes (nearly) the full cooldown.
        let owed = cooldown_remaining(Some(Instant::now()), cooldown);
        assert!(owed > Duration::from_secs(29));
        assert!(owed <= cooldown);
    }

    #[test]
    fn test_cooldown_elapsed_means_no_wait() {
        let long_ago = Instant::now() - Duration::from_secs(120);
        assert_eq!(
            cooldown_remaining(Some(long_ago), Duration::from_secs(30)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_read_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Connect and then send nothing at all.
        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();
        let err = read_request(&mut server_side).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
