use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use serde::Serialize;
use std::sync::Arc;
use stepcore::{EngineError, Payload, WorkflowDefinition, WorkflowError};
use stepruntime::{RuntimeConfig, StepRuntime};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<StepRuntime>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    workflow_id: String,
    message: String,
}

/// Response for run creation
#[derive(Debug, Serialize)]
struct RunResponse {
    run_id: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stepflow",
        "workers": data.runtime.worker_count(),
    }))
}

/// Submit a workflow definition
#[post("/workflow")]
async fn create_workflow(
    data: web::Data<AppState>,
    definition: web::Json<WorkflowDefinition>,
) -> ActixResult<impl Responder> {
    let definition = definition.into_inner();
    let name = definition.name.clone();

    match data.runtime.engine().register_workflow(definition).await {
        Ok(workflow_id) => {
            info!("Created workflow: {} ({})", name, workflow_id);
            Ok(HttpResponse::Created().json(WorkflowResponse {
                workflow_id,
                message: "Workflow saved successfully.".to_string(),
            }))
        }
        Err(e) => {
            warn!("Rejected workflow {}: {}", name, e);
            Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// List registered workflows
#[get("/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let engine = data.runtime.engine();
    let mut workflows = Vec::new();
    for workflow_id in engine.workflow_ids().await {
        if let Some(compiled) = engine.workflow(&workflow_id).await {
            workflows.push(serde_json::json!({
                "workflow_id": workflow_id,
                "name": compiled.name(),
                "start_at": compiled.start_at(),
                "nodes": compiled.definition().nodes.len(),
            }));
        }
    }

    Ok(HttpResponse::Ok().json(workflows))
}

/// Initial payload of a run request. An empty body gets the default
/// `{"source": "api_trigger"}`; anything else must be a JSON object.
fn parse_run_payload(body: &[u8]) -> Result<Payload, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        let mut payload = Payload::new();
        payload.insert("source".to_string(), serde_json::json!("api_trigger"));
        return Ok(payload);
    }
    serde_json::from_slice::<Payload>(body).map_err(|e| format!("Invalid run payload: {}", e))
}

/// Start a new run of a workflow
#[post("/workflow/{id}/run")]
async fn run_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let payload = match parse_run_payload(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!("Rejected run request for {}: {}", workflow_id, error);
            return Ok(HttpResponse::BadRequest().json(ErrorResponse { error }));
        }
    };

    let run_id = Uuid::new_v4().to_string();
    match data
        .runtime
        .engine()
        .start_workflow(&workflow_id, &run_id, payload)
        .await
    {
        Ok(()) => Ok(HttpResponse::Ok().json(RunResponse { run_id })),
        Err(EngineError::Workflow(WorkflowError::NotFound(_))) => {
            Ok(HttpResponse::NotFound().json(ErrorResponse {
                error: "Workflow not found.".to_string(),
            }))
        }
        Err(e) => {
            error!("Failed to start workflow {}: {}", workflow_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// Current state of a run
#[get("/run/{run_id}/status")]
async fn get_run_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();

    match data.runtime.engine().get_run(&run_id).await {
        Ok(Some(state)) => Ok(HttpResponse::Ok().json(state)),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: "Run not found.".to_string(),
        })),
        Err(e) => {
            error!("Failed to read run {}: {}", run_id, e);
            Ok(HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// Ids of every stored run
#[get("/runs")]
async fn list_runs(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.runtime.engine().store().list_runs().await {
        Ok(runs) => Ok(HttpResponse::Ok().json(runs)),
        Err(e) => Ok(HttpResponse::ServiceUnavailable().json(ErrorResponse {
            error: e.to_string(),
        })),
    }
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    // Subscribe to events
    let mut events = data.runtime.subscribe_events();

    // Spawn task to handle WebSocket
    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                // Receive event from runtime
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, skipped {} events", skipped);
                        }
                        Err(_) => break,
                    }
                }

                // Handle incoming WebSocket messages (ping/pong)
                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.engine().registry();
    let node_types = registry.list_node_types();

    let nodes: Vec<_> = node_types
        .iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(node_type);
            serde_json::json!({
                "type": node_type,
                "kind": metadata.as_ref().map(|m| m.kind.to_string()).unwrap_or_default(),
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting step engine server");

    let config = RuntimeConfig::from_env();
    let registry = Arc::new(stepnodes::standard_registry());
    let runtime = StepRuntime::from_config(registry, config.clone()).await?;

    info!(
        "Runtime initialized with {} worker(s), state dir: {:?}",
        runtime.worker_count(),
        config.state_dir
    );

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("Server starting on http://{}", bind_address);

    // Start HTTP server
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(create_workflow)
            .service(list_workflows)
            .service(run_workflow)
            .service(get_run_status)
            .service(list_runs)
            .service(websocket_events)
            .service(list_node_types)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_body_gets_default_payload() {
        for body in [&b""[..], &b"  \n"[..]] {
            let payload = parse_run_payload(body).unwrap();
            assert_eq!(payload.get("source"), Some(&json!("api_trigger")));
            assert_eq!(payload.len(), 1);
        }
    }

    #[test]
    fn object_body_is_used_as_is() {
        let payload = parse_run_payload(br#"{"user_type": "premium"}"#).unwrap();
        assert_eq!(payload.get("user_type"), Some(&json!("premium")));
        assert!(payload.get("source").is_none());
    }

    #[test]
    fn malformed_or_non_object_body_is_rejected() {
        assert!(parse_run_payload(b"{not json").is_err());
        assert!(parse_run_payload(b"[1, 2]").is_err());
        assert!(parse_run_payload(b"\"premium\"").is_err());
    }

    #[actix_web::test]
    async fn malformed_run_body_is_a_bad_request() {
        let registry = std::sync::Arc::new(stepnodes::standard_registry());
        let runtime = StepRuntime::from_config(registry, RuntimeConfig::default())
            .await
            .unwrap();
        let state = web::Data::new(AppState {
            runtime: Arc::new(runtime),
        });
        let app = actix_web::test::init_service(App::new().app_data(state).service(run_workflow)).await;

        let req = actix_web::test::TestRequest::post()
            .uri("/workflow/wf_missing/run")
            .set_payload("{not json")
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let req = actix_web::test::TestRequest::post()
            .uri("/workflow/wf_missing/run")
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
