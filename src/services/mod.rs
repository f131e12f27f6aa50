pub mod attempt_service;
pub mod certificate_service;
pub mod grading_service;
pub mod notification_service;
pub mod outbox_service;
pub mod question_bank;
pub mod review_service;
pub mod selection_service;
pub mod training_gate;
