//! Reconciles declared cloud resources against an eventually consistent
//! control plane.
//!
//! One call handles one resource instance: the caller hands in the declared
//! [`DesiredSpec`], the last persisted [`ManagedRecord`] and a [`Context`]
//! with deadline and cancellation, and gets back the confirmed remote state
//! or a typed [`ReconcileError`]. Ordering across resources and persistence
//! stay with the caller.

pub mod client;
pub mod config;
pub mod context;
pub mod diff;
pub mod equivalence;
pub mod error;
pub mod identity;
pub mod model;
pub mod operator;
pub mod reconciler;
pub mod schema;
pub mod waiter;

pub use client::{HttpClient, HttpClientBuilder, RemoteApi};
pub use config::Config;
pub use context::{Canceller, Context};
pub use error::{ApiError, ErrorCategory, ReconcileError};
pub use identity::Identity;
pub use model::{DesiredSpec, ReadOutcome, RemoteState, Status};
pub use operator::{ManagedRecord, Operator, Outcome, Phase};
pub use reconciler::{Reconciler, ResourceReconciler};
pub use schema::{Registry, ResourceType};

/// One instruction from the orchestration engine.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Apply {
        record: ManagedRecord,
        #[serde(default)]
        spec: DesiredSpec,
    },
    Refresh {
        record: ManagedRecord,
    },
    Destroy {
        record: ManagedRecord,
    },
    Import {
        kind: ResourceType,
        id: String,
    },
}

/// The record to persist, whether or not the action succeeded.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub record: Option<ManagedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
}

impl Response {
    fn from_result(record: Option<ManagedRecord>, result: Result<Outcome, ReconcileError>) -> Self {
        match result {
            Ok(outcome) => Self {
                record,
                outcome: Some(outcome),
                error: None,
                retryable: false,
            },
            Err(err) => Self {
                record,
                outcome: None,
                retryable: err.is_retryable(),
                error: Some(err.to_string()),
            },
        }
    }
}

pub async fn run(config: Config, request: Request, ctx: &Context) -> anyhow::Result<Response> {
    log::info!("Config: {config:#?}");

    let client = HttpClientBuilder::from(&config.client).build()?;
    let operator = Operator::new(client, config.registry());

    Ok(execute(&operator, request, ctx).await)
}

/// Run `request` against `operator`.
pub async fn execute<A>(operator: &Operator<A>, request: Request, ctx: &Context) -> Response
where
    A: RemoteApi + Clone,
{
    match request {
        Request::Apply { mut record, spec } => {
            let result = operator.apply(&mut record, &spec, ctx).await;
            Response::from_result(Some(record), result)
        }
        Request::Refresh { mut record } => {
            let result = operator.refresh(&mut record, ctx).await;
            Response::from_result(Some(record), result)
        }
        Request::Destroy { mut record } => {
            let result = operator.destroy(&mut record, ctx).await;
            Response::from_result(Some(record), result)
        }
        Request::Import { kind, id } => match operator.import(kind, &id, ctx).await {
            Ok(record) => Response::from_result(Some(record), Ok(Outcome::Imported)),
            Err(err) => Response::from_result(None, Err(err)),
        },
    }
}
