pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use chrono::FixedOffset;

use crate::database::ExamStore;
use crate::services::{
    allocation_service::AllocationService, attempt_service::AttemptService,
    projection_service::ProjectionService,
};
use crate::utils::time::{display_offset, Clock};

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub allocation_service: AllocationService,
    pub projection_service: ProjectionService,
    pub jwt_secret: String,
    /// Used only to render `*_local` fields; storage stays in UTC.
    pub display_offset: FixedOffset,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ExamStore>,
        clock: Arc<dyn Clock>,
        jwt_secret: String,
        display_offset_minutes: i32,
    ) -> Self {
        Self {
            attempt_service: AttemptService::new(store.clone(), clock.clone()),
            allocation_service: AllocationService::new(store.clone(), clock),
            projection_service: ProjectionService::new(store),
            jwt_secret,
            display_offset: display_offset(display_offset_minutes),
        }
    }
}
