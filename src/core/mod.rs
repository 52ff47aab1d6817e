pub mod flashcard;
pub mod folder;
pub mod planner;
pub mod session;
