use super::ApiError;
use crate::address::Address;
use crate::pipeline::Pipeline;
use crate::types::Transaction;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// True when this request added the subscription
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightResponse {
    pub height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub height: u64,
    pub subscriptions: usize,
    pub indexed_transactions: usize,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/transactions", post(transactions))
        .route("/transactions/:address", get(transactions_by_path))
        .route("/height", get(height))
        .route("/health", get(health))
        .with_state(pipeline)
}

async fn subscribe(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let address = Address::parse(&req.address)?;
    let ok = pipeline.subscribe(&address);
    Ok(Json(SubscribeResponse { ok }))
}

async fn transactions(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    lookup(&pipeline, &req.address)
}

async fn transactions_by_path(
    State(pipeline): State<Arc<Pipeline>>,
    Path(address): Path<String>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    lookup(&pipeline, &address)
}

fn lookup(pipeline: &Pipeline, raw: &str) -> Result<Json<TransactionsResponse>, ApiError> {
    let address = Address::parse(raw)?;
    Ok(Json(TransactionsResponse {
        transactions: pipeline.transactions_for(&address),
    }))
}

async fn height(State(pipeline): State<Arc<Pipeline>>) -> Json<HeightResponse> {
    Json(HeightResponse {
        height: pipeline.current_height(),
    })
}

async fn health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        height: pipeline.current_height(),
        subscriptions: pipeline.registry().len(),
        indexed_transactions: pipeline.index().len(),
    })
}
