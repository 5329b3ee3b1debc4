//! CLI job submitter (spec.md §6): posts a `jobs/run` request to a running
//! orchestrator and prints the created job as JSON.
//!
//! Grounded on the teacher's `dev-cli` (clap derive CLI, JSON output to
//! stdout for scripting) but scoped to the single action spec.md names.

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "dispatcher-submit")]
#[command(about = "Submit a job to the dispatcher orchestrator")]
struct Cli {
    /// Name of the registered job specification to run.
    spec_name: String,

    /// Runtime arguments as a JSON object, e.g. '{"foo": "bar"}'.
    #[arg(long, default_value = "{}")]
    args: String,

    /// Queue to submit into (defaults to the system default queue).
    #[arg(long)]
    queue: Option<String>,

    /// Identity recorded as the job's creator.
    #[arg(long, default_value = "cli")]
    created_by: String,

    /// Base URL of the orchestrator API.
    #[arg(long, env = "DISPATCHER_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Bearer token, if the orchestrator requires authentication.
    #[arg(long, env = "DISPATCHER_TOKEN")]
    token: Option<String>,
}

#[derive(Serialize)]
struct RunJobRequest {
    spec_name: String,
    runtime_args: Value,
    created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime_args: Value = match serde_json::from_str(&cli.args) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("invalid --args JSON: {e}");
            return ExitCode::FAILURE;
        }
    };

    let client = reqwest::Client::new();
    let mut req = client
        .post(format!("{}/api/jobs/run", cli.url.trim_end_matches('/')))
        .json(&RunJobRequest {
            spec_name: cli.spec_name,
            runtime_args,
            created_by: cli.created_by,
            queue: cli.queue,
        });
    if let Some(token) = &cli.token {
        req = req.bearer_auth(token);
    }

    let response = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("request failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let status = response.status();
    let body: Value = response.json().await.unwrap_or_else(|_| serde_json::json!({}));

    if !status.is_success() {
        eprintln!("orchestrator returned {status}: {body}");
        return ExitCode::FAILURE;
    }

    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    ExitCode::SUCCESS
}
