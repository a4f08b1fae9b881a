// Models module

pub mod choice;
pub mod question;
pub mod session;
pub mod user;
pub mod vote;

// Re-export commonly used types
pub use choice::{Choice, ChoiceTally, PollResults};
pub use question::{CreateQuestionRequest, Question, QuestionDetail, QuestionSummary};
pub use session::Session;
pub use user::{CreateUserRequest, LoginRequest, User, UserCredentials};
pub use vote::{Vote, VoteOutcome, VoteRequest};
