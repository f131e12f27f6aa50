pub mod certificate;
pub mod exam;
pub mod exam_session;
pub mod outbox_event;
pub mod question;
pub mod training;
pub mod user;
pub mod user_answer;
