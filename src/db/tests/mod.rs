pub mod helpers;

mod tests_recovery;
mod tests_rollover;
