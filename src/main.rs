use anyhow::Result;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

use grading_system::{
    api::{AppState, create_router},
    config::Config,
    database::Database,
    llm_service::LLMService,
    logging::setup_logging,
    session::SessionStore,
    student_service::StudentService,
};
use grading_system::log_system_event;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = setup_logging(&config.logging)?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting grading system server");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let student_service = StudentService::new(db);
    let llm_service = LLMService::new(&config.llm)?;
    info!(
        provider = llm_service.provider_name(),
        model = llm_service.model_name(),
        "Initialized LLM service"
    );

    let state = AppState {
        student_service,
        llm_service,
        sessions: SessionStore::new(),
        grading: config.grading.clone(),
    };

    let app = Router::new()
        .merge(create_router(state))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
