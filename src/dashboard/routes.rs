//! Control API route handlers.
//!
//! All endpoints return JSON. Handlers share the `AgentRunner` through an
//! `Arc`; reads go to its published snapshot.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::AgentRunner;
use crate::market::VolatilityScenario;
use crate::types::{AgentLoopState, ExecutionLog};

pub type AppState = Arc<AgentRunner>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    pub action: String,
}

/// Operator commands accepted by `POST /api/agent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Step,
    Reset,
    Simulate(VolatilityScenario),
}

impl std::str::FromStr for ControlAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "step" => Ok(ControlAction::Step),
            "reset" => Ok(ControlAction::Reset),
            "simulate_high_volatility" => Ok(ControlAction::Simulate(VolatilityScenario::High)),
            "simulate_low_volatility" => Ok(ControlAction::Simulate(VolatilityScenario::Low)),
            "simulate_extreme_volatility" => {
                Ok(ControlAction::Simulate(VolatilityScenario::Extreme))
            }
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub success: bool,
    pub running: bool,
    pub state: AgentLoopState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/agent
pub async fn get_agent(State(runner): State<AppState>) -> Json<AgentResponse> {
    Json(AgentResponse {
        success: true,
        running: runner.is_running(),
        state: runner.snapshot().await,
    })
}

/// POST /api/agent
pub async fn control_agent(
    State(runner): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<AgentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let action: ControlAction = request.action.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                error: "Unknown action".to_string(),
            }),
        )
    })?;

    let state = match action {
        ControlAction::Start => {
            runner.start();
            runner.snapshot().await
        }
        ControlAction::Stop => {
            runner.stop();
            runner.snapshot().await
        }
        ControlAction::Step => runner.step().await,
        ControlAction::Reset => runner.reset().await,
        ControlAction::Simulate(scenario) => runner.simulate(scenario).await,
    };

    Ok(Json(AgentResponse {
        success: true,
        running: runner.is_running(),
        state,
    }))
}

/// GET /api/agent/history, newest first
pub async fn get_history(State(runner): State<AppState>) -> Json<Vec<ExecutionLog>> {
    let state = runner.snapshot().await;
    Json(state.history.newest_first().cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
