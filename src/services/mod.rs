pub mod allocation_service;
pub mod answer_service;
pub mod attempt_service;
pub mod grading_service;
pub mod projection_service;
