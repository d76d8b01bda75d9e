pub mod allocation;
pub mod answer;
pub mod question;
pub mod test_attempt;
pub mod test_result;
