//! reqscope demo: runs a create and a list through the request pipeline and
//! prints each outcome with its status and classification.
//!
//! Pass `--latency-ms` larger than `--timeout-ms` to see the deadline path.

use std::sync::Arc;

use clap::Parser;
use reqscope_core::{Level, RequestContext, TracingLog};
use reqscope_server::service::{
    build_request_pipeline, classify, Entity, EntityService, Operation, OperationError,
    OperationResponse, ServerConfig,
};
use reqscope_server::storage::MemoryEntityStore;
use reqscope_server::{Credentials, StaticAuthenticator};
use tower::ServiceExt;

/// Request pipeline demo.
#[derive(Parser, Debug)]
#[command(name = "demo")]
#[command(about = "Run entity operations through the reqscope request pipeline")]
struct Args {
    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQSCOPE_TIMEOUT_MS", default_value_t = 5_000)]
    timeout_ms: u64,

    /// Simulated storage latency per call in milliseconds
    #[arg(long, env = "REQSCOPE_STORE_LATENCY_MS", default_value_t = 0)]
    latency_ms: u64,

    /// Minimum log level when RUST_LOG is not set
    #[arg(long, env = "REQSCOPE_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Comma-separated token:user_id pairs. Authentication is off when unset.
    #[arg(long, env = "REQSCOPE_AUTH_TOKENS")]
    auth_tokens: Option<String>,

    /// Bearer token presented with each request
    #[arg(long)]
    token: Option<String>,

    #[arg(long, default_value = "ada@example.com")]
    email: String,

    #[arg(long, default_value = "Ada")]
    name: String,

    #[arg(long, default_value_t = 36)]
    age: i64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            default_operation_timeout_ms: self.timeout_ms,
            store_latency_ms: self.latency_ms,
            log_level: self.log_level,
        }
    }

    fn request_context(&self) -> RequestContext {
        let ctx = RequestContext::background();
        match &self.token {
            Some(token) => ctx.with_value(Credentials::new(token.clone())),
            None => ctx,
        }
    }
}

fn report(label: &str, result: &Result<OperationResponse, OperationError>) -> anyhow::Result<()> {
    match result {
        Ok(resp) => println!("{label}: 200 {}", serde_json::to_string(resp)?),
        Err(err) => {
            let class = classify(err);
            println!("{label}: {} {class}: {err}", class.status_code());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.server_config();
    reqscope_core::log::init(&config.log_config());

    let store = Arc::new(MemoryEntityStore::new(config.store_latency()));
    let service = EntityService::new(store, Arc::new(TracingLog::new(&config.log_config())));
    let authenticator = Arc::new(StaticAuthenticator::from_token_list(
        args.auth_tokens.as_deref(),
    ));
    let pipeline = build_request_pipeline(service, authenticator, &config);

    let create = Operation::CreateEntity {
        ctx: args.request_context(),
        params: Entity {
            email: args.email.clone(),
            name: args.name.clone(),
            age: args.age,
            ..Entity::default()
        },
    };
    let result = pipeline.clone().oneshot(create).await;
    report("create", &result)?;

    let list = Operation::ListEntities {
        ctx: args.request_context(),
    };
    let result = pipeline.oneshot(list).await;
    report("list", &result)?;

    Ok(())
}
